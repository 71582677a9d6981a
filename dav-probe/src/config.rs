use std::io::{Error as IoError, ErrorKind, Read};
use std::path::PathBuf;

use base64::Engine;
use dav_client::ClientConfig;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProbeConfig {
    /// Resource every command is run against
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default)]
    pub client: ClientConfig,
}

impl ProbeConfig {
    /// `Authorization` header value for HTTP basic authentication
    pub fn basic_auth(&self) -> Option<String> {
        let username = self.username.as_ref()?;
        let creds = format!(
            "{}:{}",
            username,
            self.password.as_deref().unwrap_or_default()
        );
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(creds)
        ))
    }
}

pub fn read_config(config_file: PathBuf) -> Result<ProbeConfig, IoError> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    toml::from_str(&config).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}
