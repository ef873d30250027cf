use std::io::{self, ErrorKind};
use std::path::PathBuf;

/// Certificate and key, PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read from `LABRES_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "labres".into(),
            max_connections: 256,
            metrics_port: None,
            tls: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();
        let tls = match (lookup("LABRES_TLS_CERT"), lookup("LABRES_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "both LABRES_TLS_CERT and LABRES_TLS_KEY must be set, or neither",
                ));
            }
        };

        Ok(Self {
            bind: lookup("LABRES_BIND").unwrap_or(defaults.bind),
            port: lookup("LABRES_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("LABRES_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("LABRES_PASSWORD").unwrap_or(defaults.password),
            max_connections: lookup("LABRES_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            metrics_port: lookup("LABRES_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
