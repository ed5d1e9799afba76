use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_PORT: u16 = 8000;

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `APPSTORE_ALLOWED_ORIGINS`, comma-separated. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("APPSTORE_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("APPSTORE_API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            allowed_origins: split_origins(&env::var("APPSTORE_ALLOWED_ORIGINS").unwrap_or_default()),
        }
    }

    /// Listen address; an unparseable host binds every interface
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = self.host.parse().unwrap_or_else(|_| {
            tracing::warn!(host = %self.host, "Invalid bind host, using 0.0.0.0");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        SocketAddr::new(ip, self.port)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
