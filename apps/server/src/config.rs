use mien_api::state::DEFAULT_MAX_UPLOAD_BYTES;
use mien_serving::{ServingConfig, ServingError};
use std::env;
use std::net::{IpAddr, SocketAddr};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: IpAddr,
    /// Request body cap for uploads
    pub max_upload_bytes: usize,
    pub serving: ServingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BIND_ADDRESS".to_string()))?,
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .map(|v| v.parse())
                .unwrap_or(Ok(DEFAULT_MAX_UPLOAD_BYTES))
                .map_err(|_| ConfigError::InvalidValue("MAX_UPLOAD_BYTES".to_string()))?,
            serving: ServingConfig::from_env()?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for: {0}")]
    InvalidValue(String),
    #[error(transparent)]
    Serving(#[from] ServingError),
}
