use std::error::Error;
use std::path::Path;

use liverec_archive::ArchiveConfig;
use liverec_capture::HttpConfig;
use serde::{Deserialize, Serialize};

#[derive(Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl FullConfig {
    pub async fn load(path: Option<&Path>) -> Result<FullConfig, Box<dyn Error>> {
        match path {
            Some(path) => Ok(toml::from_str(&tokio::fs::read_to_string(path).await?)?),
            None => Ok(FullConfig::default()),
        }
    }
}
