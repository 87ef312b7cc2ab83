//! Outbound transport: frame encoding and the TCP connection manager

pub mod connection;
pub mod framer;

pub use connection::{ConnectError, Connector, FrameSink, SendError, TcpConnection, TcpConnector};
pub use framer::{encode_frame, read_frame, FrameError, HEADER_LEN};
