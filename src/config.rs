//! Process configuration from `PARKD_*` environment variables.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::auth::DEFAULT_COST;
use crate::limits::{MAX_PASSWORD_COST, MIN_PASSWORD_COST};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("both PARKD_TLS_CERT and PARKD_TLS_KEY must be set, or neither")]
    TlsPair,
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("TLS: {0}")]
    Tls(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub seed_spaces: usize,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    /// bcrypt work factor for account passwords.
    pub password_cost: u32,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "parkd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            seed_spaces: 10,
            sweep_interval: Duration::from_secs(60),
            metrics_port: None,
            password_cost: DEFAULT_COST,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparsable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();

        let config = Self {
            bind: lookup("PARKD_BIND").unwrap_or(d.bind),
            port: parse_var(&lookup, "PARKD_PORT")?.unwrap_or(d.port),
            data_dir: lookup("PARKD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("PARKD_PASSWORD").unwrap_or(d.password),
            max_connections: parse_var(&lookup, "PARKD_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            compact_threshold: parse_var(&lookup, "PARKD_COMPACT_THRESHOLD")?.unwrap_or(d.compact_threshold),
            seed_spaces: parse_var(&lookup, "PARKD_SEED_SPACES")?.unwrap_or(d.seed_spaces),
            sweep_interval: parse_var::<u64, _>(&lookup, "PARKD_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            metrics_port: parse_var(&lookup, "PARKD_METRICS_PORT")?,
            password_cost: parse_var(&lookup, "PARKD_PASSWORD_COST")?.unwrap_or(d.password_cost),
            tls_cert: lookup("PARKD_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("PARKD_TLS_KEY").map(PathBuf::from),
        };

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid { var: "PARKD_MAX_CONNECTIONS", value: "0".into() });
        }
        if config.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid { var: "PARKD_SWEEP_INTERVAL_SECS", value: "0".into() });
        }
        if !(MIN_PASSWORD_COST..=MAX_PASSWORD_COST).contains(&config.password_cost) {
            return Err(ConfigError::Invalid {
                var: "PARKD_PASSWORD_COST",
                value: config.password_cost.to_string(),
            });
        }
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkd.wal")
    }

    /// TLS acceptor when a cert/key pair is configured.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| ConfigError::NoPrivateKey(key_path.display().to_string()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigError::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::Invalid { var, value }),
    }
}
