//! OBS Studio capture backend
//!
//! Drives OBS through its built-in WebSocket server (protocol v5).

mod client;
pub mod protocol;

pub use client::ObsClient;

use std::fmt;
use std::time::Duration;

/// Connection settings for the OBS WebSocket server
#[derive(Clone)]
pub struct ObsSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Bound on connecting and on waiting for each response
    pub timeout: Duration,
}

impl ObsSettings {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Default for ObsSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: None,
            timeout: Duration::from_secs(3),
        }
    }
}

impl fmt::Debug for ObsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObsSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}
