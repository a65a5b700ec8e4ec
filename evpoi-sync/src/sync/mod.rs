//! Moteur de synchronisation vers l'entrepôt
//!
//! Protocole en trois étapes, sous verrou consultatif:
//!
//! 1. **Stage**: tables cible et de staging créées si absentes, lot chargé
//!    dans le staging (troncature puis chargement, donc rejouable)
//! 2. **Merge**: une seule instruction `MERGE` staging → cible sur
//!    `(uuid, connection_id)`
//! 3. **Clean**: `DROP TABLE IF EXISTS` du staging
//!
//! Un échec de Stage laisse le staging en place et ne fusionne rien. Un échec
//! de Merge déclenche quand même le nettoyage, puis l'erreur de Merge remonte.

pub mod merge;

use std::collections::HashMap;
use std::fmt;

use evpoi::{MergeKey, PoiRecord, POI_COLUMNS};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, WarehouseConfig};
use crate::warehouse::{TableKind, TableRef, Warehouse, WarehouseError};

pub use merge::MergeStatement;

/// Étape du protocole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStep {
    Stage,
    Merge,
    Clean,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::Stage => "stage",
            SyncStep::Merge => "merge",
            SyncStep::Clean => "clean",
        };
        f.write_str(name)
    }
}

/// État d'une synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Staged,
    Merged,
    /// Terminal
    Cleaned,
    Failed { step: SyncStep },
}

/// Erreur de synchronisation, étiquetée par étape
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("stage into {table} failed: {source}")]
    Stage {
        table: TableRef,
        source: WarehouseError,
    },

    #[error("merge into {table} failed: {source}")]
    Merge {
        table: TableRef,
        source: WarehouseError,
    },

    #[error("cleaning {table} failed: {source}")]
    Clean {
        table: TableRef,
        source: WarehouseError,
    },

    /// Une autre exécution détient le verrou du staging
    #[error("staging table {table} is locked by another run")]
    Locked { table: TableRef },
}

impl SyncError {
    /// Étape en échec (un verrou refusé bloque l'étape Stage)
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            SyncError::Stage { .. } | SyncError::Locked { .. } => Some(SyncStep::Stage),
            SyncError::Merge { .. } => Some(SyncStep::Merge),
            SyncError::Clean { .. } => Some(SyncStep::Clean),
        }
    }
}

/// Résultat d'une synchronisation réussie
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub staged_rows: u64,
    /// Lignes insérées ou mises à jour par le `MERGE`
    pub merged_rows: u64,
    pub state: SyncState,
    pub transitions: Vec<SyncState>,
}

/// Clé du verrou consultatif d'une table de staging
///
/// Dérivée de `dataset.table`: deux exécutions visant le même staging se
/// sérialisent, des stagings distincts ne se gênent pas.
pub fn staging_lock_key(staging: &TableRef) -> i64 {
    let hash = blake3::hash(format!("evpoi-staging:{}", staging).as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(key)
}

/// Réduit le lot à une ligne par clé; la dernière occurrence gagne, à la
/// position de la première
fn dedupe_by_key(records: &[PoiRecord]) -> Vec<PoiRecord> {
    let mut positions: HashMap<MergeKey, usize> = HashMap::with_capacity(records.len());
    let mut batch: Vec<PoiRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.merge_key()) {
            Some(&i) => batch[i] = record.clone(),
            None => {
                positions.insert(record.merge_key(), batch.len());
                batch.push(record.clone());
            }
        }
    }

    let duplicates = records.len() - batch.len();
    if duplicates > 0 {
        warn!(
            duplicates,
            "Batch contains duplicate (uuid, connection_id) keys, keeping last occurrence"
        );
    }
    batch
}

/// Moteur de synchronisation, propriétaire de la session d'entrepôt
pub struct SyncEngine<W> {
    warehouse: W,
    target: TableRef,
    staging: TableRef,
    state: SyncState,
    transitions: Vec<SyncState>,
}

impl<W: Warehouse> SyncEngine<W> {
    /// Construit le moteur à partir de la configuration de l'entrepôt
    pub fn new(warehouse: W, config: &WarehouseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_tables(
            warehouse,
            config.target_ref()?,
            config.staging_ref()?,
        ))
    }

    pub fn with_tables(warehouse: W, target: TableRef, staging: TableRef) -> Self {
        Self {
            warehouse,
            target,
            staging,
            state: SyncState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Transitions de la dernière synchronisation
    pub fn transitions(&self) -> &[SyncState] {
        &self.transitions
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn into_inner(self) -> W {
        self.warehouse
    }

    fn transition(&mut self, state: SyncState) {
        debug!(from = ?self.state, to = ?state, "Sync state transition");
        self.state = state;
        self.transitions.push(state);
    }

    /// Synchronise le lot: verrou, Stage, Merge, Clean, libération du verrou
    pub async fn sync(&mut self, records: &[PoiRecord]) -> Result<SyncReport, SyncError> {
        self.state = SyncState::Idle;
        self.transitions.clear();

        let key = staging_lock_key(&self.staging);
        let acquired = match self.warehouse.try_lock(key).await {
            Ok(acquired) => acquired,
            Err(source) => {
                self.transition(SyncState::Failed {
                    step: SyncStep::Stage,
                });
                return Err(SyncError::Stage {
                    table: self.staging.clone(),
                    source,
                });
            }
        };
        if !acquired {
            warn!(staging = %self.staging, "Staging table locked by another run");
            self.transition(SyncState::Failed {
                step: SyncStep::Stage,
            });
            return Err(SyncError::Locked {
                table: self.staging.clone(),
            });
        }

        info!(
            backend = self.warehouse.backend(),
            target = %self.target,
            staging = %self.staging,
            rows = records.len(),
            "Starting warehouse sync"
        );
        let result = self.run_steps(records).await;

        if let Err(e) = self.warehouse.unlock(key).await {
            warn!(error = %e, "Failed to release staging lock");
        }
        result
    }

    async fn run_steps(&mut self, records: &[PoiRecord]) -> Result<SyncReport, SyncError> {
        let staged_rows = self.stage(records).await?;

        let merged_rows = match self.merge().await {
            Ok(rows) => rows,
            Err(err) => {
                // Le staging ne doit pas survivre à un merge raté
                match self.warehouse.drop_table_if_exists(&self.staging).await {
                    Ok(()) => info!(staging = %self.staging, "Dropped staging table after failed merge"),
                    Err(clean_err) => error!(
                        staging = %self.staging,
                        error = %clean_err,
                        "Failed to drop staging table after failed merge"
                    ),
                }
                return Err(err);
            }
        };

        self.clean().await?;

        Ok(SyncReport {
            staged_rows,
            merged_rows,
            state: self.state,
            transitions: self.transitions.clone(),
        })
    }

    /// Charge le lot dans la table de staging (rejouable)
    pub async fn stage(&mut self, records: &[PoiRecord]) -> Result<u64, SyncError> {
        let batch = dedupe_by_key(records);
        match self.load_staging(&batch).await {
            Ok(rows) => {
                self.transition(SyncState::Staged);
                info!(staging = %self.staging, rows, "Batch staged");
                Ok(rows)
            }
            Err(source) => {
                self.transition(SyncState::Failed {
                    step: SyncStep::Stage,
                });
                Err(SyncError::Stage {
                    table: self.staging.clone(),
                    source,
                })
            }
        }
    }

    async fn load_staging(&mut self, batch: &[PoiRecord]) -> Result<u64, WarehouseError> {
        if !self.warehouse.table_exists(&self.target).await? {
            info!(target = %self.target, "Target table absent, creating it");
            self.warehouse
                .create_table(&self.target, POI_COLUMNS, TableKind::Permanent)
                .await?;
        }
        if !self.warehouse.table_exists(&self.staging).await? {
            self.warehouse
                .create_table(&self.staging, POI_COLUMNS, TableKind::Staging)
                .await?;
        }
        self.warehouse.load_overwrite(&self.staging, batch).await
    }

    /// Fusionne le staging dans la table cible (une instruction)
    pub async fn merge(&mut self) -> Result<u64, SyncError> {
        let statement = MergeStatement::for_poi(self.target.clone(), self.staging.clone());
        match self.warehouse.execute_merge(&statement).await {
            Ok(rows) => {
                self.transition(SyncState::Merged);
                info!(target = %self.target, rows, "Staging merged into target");
                Ok(rows)
            }
            Err(source) => {
                self.transition(SyncState::Failed {
                    step: SyncStep::Merge,
                });
                Err(SyncError::Merge {
                    table: self.target.clone(),
                    source,
                })
            }
        }
    }

    /// Supprime la table de staging; absente = succès
    pub async fn clean(&mut self) -> Result<(), SyncError> {
        match self.warehouse.drop_table_if_exists(&self.staging).await {
            Ok(()) => {
                self.transition(SyncState::Cleaned);
                debug!(staging = %self.staging, "Staging table dropped");
                Ok(())
            }
            Err(source) => {
                self.transition(SyncState::Failed {
                    step: SyncStep::Clean,
                });
                Err(SyncError::Clean {
                    table: self.staging.clone(),
                    source,
                })
            }
        }
    }
}
