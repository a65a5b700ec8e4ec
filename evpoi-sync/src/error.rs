//! Erreurs du pipeline

use thiserror::Error;

use crate::boundary::BoundaryError;
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::source::SourceError;
use crate::sync::{SyncError, SyncStep};

/// Erreur fatale d'une exécution
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error("export: {0}")]
    Export(#[from] ExportError),

    #[error("warehouse sync: {0}")]
    Sync(#[from] SyncError),

    #[error("HTTP client setup: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    /// Étape de synchronisation en échec, si l'erreur vient du moteur
    pub fn sync_step(&self) -> Option<SyncStep> {
        match self {
            PipelineError::Sync(e) => e.step(),
            _ => None,
        }
    }
}
