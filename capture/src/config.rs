use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scope::CaptureSettings;

#[derive(Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    /// Byte cap on the close-time drain of an abandoned response.
    #[serde(default = "default_drain_cap")]
    pub drain_cap: usize,
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout: default_timeout(),
            headers: Vec::new(),
            drain_cap: default_drain_cap(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            drain_cap: self.drain_cap,
            drain_timeout: self.drain_timeout,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_drain_cap() -> usize {
    1024 * 1024
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(2)
}
