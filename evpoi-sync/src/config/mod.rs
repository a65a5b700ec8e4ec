//! Configuration du système
//!
//! Tout vient de l'environnement (éventuellement d'un fichier `.env`); le
//! binaire ne prend aucun argument de pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::warehouse::TableRef;

pub const DEFAULT_OCM_BASE_URL: &str = "https://api.openchargemap.io/v3/poi/";
pub const DEFAULT_NOMINATIM_BASE_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_COUNTRY_CODE: &str = "GB";
pub const DEFAULT_MAX_RESULTS: u32 = 60_000;
pub const DEFAULT_PLACE: &str = "City of London, Greater London, England, United Kingdom";
pub const DEFAULT_USER_AGENT: &str = concat!("evpoi-sync/", env!("CARGO_PKG_VERSION"));

/// Erreurs de configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable obligatoire absente
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// Valeur illisible
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Fichier d'identifiants illisible
    #[error("cannot read credentials file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },

    /// Limite et points dans des CRS différents
    #[error(transparent)]
    Crs(#[from] evpoi::PoiError),
}

/// API OpenChargeMap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub country_code: String,
    pub max_results: u32,
}

/// Limite géographique: recherche Nominatim ou fichier GeoJSON local
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub place: String,
    pub file: Option<PathBuf>,
}

/// Géocodage inverse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    pub base_url: String,
    /// En-tête `User-Agent` identifiant le client (exigé par Nominatim)
    pub user_agent: String,
}

/// Backend de l'entrepôt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    #[default]
    Postgres,
    /// Essai à blanc: rien n'est écrit hors du processus
    Memory,
}

impl std::str::FromStr for WarehouseBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(WarehouseBackend::Postgres),
            "memory" | "dry-run" | "dryrun" => Ok(WarehouseBackend::Memory),
            _ => Err(format!("unknown backend {}. Use: postgres, memory", s)),
        }
    }
}

/// Origine des identifiants de l'entrepôt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialSource {
    /// Variables `PGHOST`, `PGUSER`, `PGPASSWORD`, ...
    Environment,
    /// Fichier JSON `{host, port, dbname, user, password, sslmode}`
    File(PathBuf),
}

/// Configuration de l'entrepôt passée au moteur de synchronisation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    /// Base PostgreSQL cible (vide: celle des identifiants)
    pub project_id: String,
    /// Schéma par défaut, dont celui de la table de staging
    pub dataset_id: String,
    /// `table` ou `dataset.table`
    pub staging_table: String,
    /// `table` ou `dataset.table`
    pub target_table: String,
    pub credentials: CredentialSource,
}

impl WarehouseConfig {
    pub fn staging_ref(&self) -> Result<TableRef, ConfigError> {
        TableRef::parse(&self.staging_table, &self.dataset_id).map_err(|reason| {
            ConfigError::Invalid {
                key: "WAREHOUSE_STAGING_TABLE",
                value: self.staging_table.clone(),
                reason,
            }
        })
    }

    pub fn target_ref(&self) -> Result<TableRef, ConfigError> {
        TableRef::parse(&self.target_table, &self.dataset_id).map_err(|reason| {
            ConfigError::Invalid {
                key: "WAREHOUSE_TARGET_TABLE",
                value: self.target_table.clone(),
                reason,
            }
        })
    }

    /// Vérifie les identifiants et l'absence de collision staging/cible
    pub fn validate(&self) -> Result<(), ConfigError> {
        let staging = self.staging_ref()?;
        let target = self.target_ref()?;
        if staging == target {
            return Err(ConfigError::Invalid {
                key: "WAREHOUSE_STAGING_TABLE",
                value: self.staging_table.clone(),
                reason: "staging table must differ from target table".into(),
            });
        }
        Ok(())
    }
}

/// Configuration principale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub boundary: BoundaryConfig,
    pub geocoder: GeocoderConfig,
    pub http_timeout: Duration,
    pub export_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub warehouse: WarehouseConfig,
}

impl AppConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Charge la configuration depuis une source de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Une variable vide vaut absence
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let api_key = get("OCM_API_KEY").ok_or(ConfigError::Missing("OCM_API_KEY"))?;

        let max_results = parse_number(&get, "OCM_MAX_RESULTS", DEFAULT_MAX_RESULTS)?;
        if max_results == 0 {
            return Err(ConfigError::Invalid {
                key: "OCM_MAX_RESULTS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        let timeout_secs = parse_number(&get, "HTTP_TIMEOUT_SECS", 60u64)?;

        let backend = match get("WAREHOUSE_BACKEND") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "WAREHOUSE_BACKEND",
                value,
                reason,
            })?,
            None => WarehouseBackend::default(),
        };

        let config = Self {
            source: SourceConfig {
                base_url: or("OCM_BASE_URL", DEFAULT_OCM_BASE_URL),
                api_key,
                country_code: or("OCM_COUNTRY_CODE", DEFAULT_COUNTRY_CODE).to_uppercase(),
                max_results,
            },
            boundary: BoundaryConfig {
                place: or("BOUNDARY_PLACE", DEFAULT_PLACE),
                file: get("BOUNDARY_FILE").map(PathBuf::from),
            },
            geocoder: GeocoderConfig {
                base_url: or("NOMINATIM_BASE_URL", DEFAULT_NOMINATIM_BASE_URL),
                user_agent: or("NOMINATIM_USER_AGENT", DEFAULT_USER_AGENT),
            },
            http_timeout: Duration::from_secs(timeout_secs),
            export_path: PathBuf::from(or("EXPORT_PATH", "geo_london.csv")),
            report_path: get("REPORT_PATH").map(PathBuf::from),
            warehouse: WarehouseConfig {
                backend,
                project_id: or("WAREHOUSE_PROJECT", ""),
                dataset_id: or("WAREHOUSE_DATASET", "staging_ev"),
                staging_table: or("WAREHOUSE_STAGING_TABLE", "staging_tbl"),
                target_table: or("WAREHOUSE_TARGET_TABLE", "data_ev.ev_tbl"),
                credentials: match get("WAREHOUSE_CREDENTIALS") {
                    Some(path) => CredentialSource::File(PathBuf::from(path)),
                    None => CredentialSource::Environment,
                },
            },
        };

        config.warehouse.validate()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("OCM_API_KEY", "key")]).unwrap();

        assert_eq!(config.source.base_url, DEFAULT_OCM_BASE_URL);
        assert_eq!(config.source.country_code, "GB");
        assert_eq!(config.source.max_results, 60_000);
        assert_eq!(config.boundary.place, DEFAULT_PLACE);
        assert!(config.boundary.file.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(60));
        assert_eq!(config.export_path, PathBuf::from("geo_london.csv"));
        assert_eq!(config.warehouse.backend, WarehouseBackend::Postgres);
        assert_eq!(config.warehouse.credentials, CredentialSource::Environment);

        let staging = config.warehouse.staging_ref().unwrap();
        let target = config.warehouse.target_ref().unwrap();
        assert_eq!(staging.to_string(), "staging_ev.staging_tbl");
        assert_eq!(target.to_string(), "data_ev.ev_tbl");
    }

    #[test]
    fn test_missing_api_key() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OCM_API_KEY")));

        let err = load(&[("OCM_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OCM_API_KEY")));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("OCM_API_KEY", "key"),
            ("OCM_COUNTRY_CODE", "ie"),
            ("OCM_MAX_RESULTS", "500"),
            ("BOUNDARY_FILE", "/data/dublin.geojson"),
            ("WAREHOUSE_BACKEND", "memory"),
            ("WAREHOUSE_CREDENTIALS", "service-account.json"),
            ("WAREHOUSE_TARGET_TABLE", "chargers"),
            ("HTTP_TIMEOUT_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(config.source.country_code, "IE");
        assert_eq!(config.source.max_results, 500);
        assert_eq!(
            config.boundary.file.as_deref(),
            Some(std::path::Path::new("/data/dublin.geojson"))
        );
        assert_eq!(config.warehouse.backend, WarehouseBackend::Memory);
        assert_eq!(
            config.warehouse.credentials,
            CredentialSource::File(PathBuf::from("service-account.json"))
        );
        assert_eq!(
            config.warehouse.target_ref().unwrap().to_string(),
            "staging_ev.chargers"
        );
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_numbers_and_identifiers() {
        let err = load(&[("OCM_API_KEY", "k"), ("OCM_MAX_RESULTS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("OCM_MAX_RESULTS"));

        let err = load(&[("OCM_API_KEY", "k"), ("OCM_MAX_RESULTS", "0")]).unwrap_err();
        assert!(err.to_string().contains("must be positive"));

        let err = load(&[("OCM_API_KEY", "k"), ("WAREHOUSE_STAGING_TABLE", "tmp;drop")])
            .unwrap_err();
        assert!(err.to_string().contains("WAREHOUSE_STAGING_TABLE"));

        let err = load(&[("OCM_API_KEY", "k"), ("WAREHOUSE_BACKEND", "bigquery")]).unwrap_err();
        assert!(err.to_string().contains("WAREHOUSE_BACKEND"));
    }

    #[test]
    fn test_staging_must_differ_from_target() {
        let err = load(&[
            ("OCM_API_KEY", "k"),
            ("WAREHOUSE_STAGING_TABLE", "data_ev.ev_tbl"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = load(&[("OCM_API_KEY", "super-secret")]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
