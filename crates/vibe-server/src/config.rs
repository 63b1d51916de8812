use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    /// Built web client to serve, if any.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match lookup("VIBE_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("VIBE_PORT is not a port number: {port}"))?,
            None => 5000,
        };
        let cors_origins = lookup("VIBE_CORS_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(Self {
            jwt_secret: lookup("VIBE_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            data_dir: lookup("VIBE_DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            host: lookup("VIBE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            cors_origins,
            static_dir: lookup("VIBE_STATIC_DIR").map(PathBuf::from),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
