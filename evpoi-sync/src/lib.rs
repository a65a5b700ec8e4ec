//! # evpoi-sync
//!
//! Synchronisation des points de recharge OpenChargeMap d'une ville vers un
//! entrepôt PostgreSQL.
//!
//! ## Features
//!
//! - Récupération des stations d'un pays (API OpenChargeMap)
//! - Filtrage strict par la limite d'un lieu (Nominatim ou fichier GeoJSON)
//! - Complément des localités manquantes par géocodage inverse
//! - Export CSV
//! - Synchronisation staging → `MERGE` → nettoyage, sous verrou consultatif
//!
//! ## Usage CLI
//!
//! ```bash
//! # Toute la configuration vient de l'environnement (ou de .env)
//! OCM_API_KEY=... PGHOST=localhost evpoi-sync
//!
//! # Essai à blanc, sans base de données
//! WAREHOUSE_BACKEND=memory evpoi-sync -v
//! ```

pub mod boundary;
pub mod config;
pub mod error;
pub mod export;
pub mod geocode;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod sync;
pub mod warehouse;

pub use config::{AppConfig, WarehouseBackend, WarehouseConfig};
pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use report::{RunReport, RunStatus};
pub use sync::{SyncEngine, SyncError, SyncReport, SyncState, SyncStep};
pub use warehouse::{create_pool, DatabaseConfig, MemoryWarehouse, PostgresWarehouse, Warehouse};
