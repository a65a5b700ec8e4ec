//! Pool de connexions PostgreSQL

use std::path::Path;
use std::time::Duration;

use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use serde::Deserialize;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

use super::WarehouseError;
use crate::config::{ConfigError, CredentialSource};

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum SslMode {
    /// Pas de SSL (défaut)
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    /// SSL requis
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {}. Use: disable, prefer, require", s)),
        }
    }
}

impl TryFrom<String> for SslMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Configuration de la base de données
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "evpoi".into(),
            user: "postgres".into(),
            password: None,
            // Le pipeline est séquentiel: une connexion de travail suffit
            pool_size: 2,
            ssl_mode: SslMode::Disable,
        }
    }
}

/// Fichier d'identifiants (équivalent d'un fichier de compte de service)
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    host: Option<String>,
    port: Option<u16>,
    dbname: Option<String>,
    user: Option<String>,
    password: Option<String>,
    sslmode: Option<SslMode>,
}

impl DatabaseConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Charge la configuration depuis une source de variables (`PG*`, `POOL_SIZE`)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("PGHOST").unwrap_or(defaults.host),
            port: lookup("PGPORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: lookup("PGDATABASE").unwrap_or(defaults.dbname),
            user: lookup("PGUSER").unwrap_or(defaults.user),
            password: lookup("PGPASSWORD"),
            pool_size: lookup("POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            ssl_mode: lookup("PGSSLMODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Charge la configuration depuis un fichier JSON d'identifiants
    pub fn from_credentials_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Credentials {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: CredentialsFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::Credentials {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let defaults = Self::default();
        Ok(Self {
            host: file.host.unwrap_or(defaults.host),
            port: file.port.unwrap_or(defaults.port),
            dbname: file.dbname.unwrap_or(defaults.dbname),
            user: file.user.unwrap_or(defaults.user),
            password: file.password,
            pool_size: defaults.pool_size,
            ssl_mode: file.sslmode.unwrap_or_default(),
        })
    }

    /// Résout la source d'identifiants; le projet désigne la base cible
    pub fn resolve(credentials: &CredentialSource, project_id: &str) -> Result<Self, ConfigError> {
        let mut config = match credentials {
            CredentialSource::Environment => Self::from_env(),
            CredentialSource::File(path) => Self::from_credentials_file(path)?,
        };
        if !project_id.is_empty() {
            config.dbname = project_id.to_string();
        }
        Ok(config)
    }
}

/// Crée la configuration TLS pour rustls
fn make_tls_connector() -> MakeRustlsConnect {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    MakeRustlsConnect::new(config)
}

/// Crée un pool de connexions
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, WarehouseError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();

    cfg.pool = Some(PoolConfig {
        max_size: config.pool_size.max(1),
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });

    let pool = match config.ssl_mode {
        SslMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls)?,
        SslMode::Prefer | SslMode::Require => {
            cfg.create_pool(Some(Runtime::Tokio1), make_tls_connector())?
        }
    };
    Ok(pool)
}

/// Teste la connexion à la base
pub async fn test_connection(pool: &Pool) -> Result<(), WarehouseError> {
    let client = pool.get().await?;
    client.execute("SELECT 1", &[]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("Require".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("prefer".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert!("verify-full".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_from_lookup_defaults_and_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("PGHOST", "db.internal"), ("PGPORT", "6432"), ("PGSSLMODE", "require")]);
        let config = DatabaseConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert!(config.password.is_none());
    }

    #[test]
    fn test_credentials_file_with_project_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"host": "warehouse.example", "user": "loader", "password": "s3cret", "sslmode": "require"}}"#
        )
        .unwrap();

        let source = CredentialSource::File(file.path().to_path_buf());
        let config = DatabaseConfig::resolve(&source, "ev_project").unwrap();

        assert_eq!(config.host, "warehouse.example");
        assert_eq!(config.user, "loader");
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.dbname, "ev_project");
        assert_eq!(config.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_missing_credentials_file() {
        let source = CredentialSource::File("/nonexistent/creds.json".into());
        let err = DatabaseConfig::resolve(&source, "p").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/creds.json"));
    }
}
