use std::io::{Error as IoError, ErrorKind, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Redirects followed by one operation before giving up
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Bytes of textual request and response bodies kept in errors
    #[serde(default = "default_max_excerpt_size")]
    pub max_excerpt_size: usize,

    pub user_agent: Option<String>,

    /// Applied to every exchange by the hyper transport
    pub timeout_secs: Option<u64>,
}
impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            max_excerpt_size: default_max_excerpt_size(),
            user_agent: None,
            timeout_secs: None,
        }
    }
}

pub fn read_config(config_file: &Path) -> Result<ClientConfig, IoError> {
    let mut file = std::fs::OpenOptions::new().read(true).open(config_file)?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    toml::from_str(&config).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_excerpt_size() -> usize {
    20 * 1024
}
