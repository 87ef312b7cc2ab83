use std::fmt;

use crate::config::CameraSettings;

/// RTSP login for a camera
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Network locator of one camera.
///
/// Immutable once handed to a worker. `Display` prints the host only, so the
/// value is safe to use in log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraAddress {
    host: String,
    credentials: Option<Credentials>,
}

impl CameraAddress {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: normalize_host(&host.into()),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Build `rtsp://[user:password@]host:port/path`
    pub fn rtsp_url(&self, settings: &CameraSettings) -> String {
        let auth = match &self.credentials {
            Some(c) => format!("{}:{}@", c.user, c.password),
            None => String::new(),
        };
        let path = settings.path.trim_start_matches('/');
        format!(
            "rtsp://{auth}{}:{}/{path}",
            self.host, settings.rtsp_port
        )
    }
}

impl fmt::Display for CameraAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

// nmap prints hosts with a resolved name as "name (10.0.0.5)"
fn normalize_host(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .to_string()
}
