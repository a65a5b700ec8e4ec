//! Rapport d'exécution du pipeline
//!
//! Collecte les compteurs de chaque étape (source, filtre, géocodage, export,
//! synchronisation) et les affiche en fin d'exécution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use evpoi::FlattenReport;
use serde::Serialize;

use crate::geocode::BackfillReport;
use crate::sync::{SyncReport, SyncStep};

/// Statut global de l'exécution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Tout est synchronisé
    Success,
    /// Synchronisé, avec des localités non résolues
    PartialSuccess,
    /// Rien à synchroniser (source ou filtre vide)
    NothingToSync,
    Failed,
}

/// Rapport complet d'exécution
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub country_code: String,
    pub boundary: String,
    pub duration_secs: f64,
    pub status: RunStatus,

    /// Stations reçues de l'API
    pub stations_fetched: usize,
    pub flatten: FlattenReport,
    /// Lignes dans la limite
    pub records_in_boundary: usize,
    pub backfill: BackfillReport,

    pub export_path: Option<PathBuf>,
    pub exported_rows: usize,

    pub warehouse_backend: Option<String>,
    pub sync: Option<SyncReport>,
    /// Étape de synchronisation en échec
    pub failed_step: Option<SyncStep>,

    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(country_code: &str, boundary: &str) -> Self {
        Self {
            country_code: country_code.to_string(),
            boundary: boundary.to_string(),
            duration_secs: 0.0,
            status: RunStatus::Success,
            stations_fetched: 0,
            flatten: FlattenReport::default(),
            records_in_boundary: 0,
            backfill: BackfillReport::default(),
            export_path: None,
            exported_rows: 0,
            warehouse_backend: None,
            sync: None,
            failed_step: None,
            errors: Vec::new(),
        }
    }

    /// Enregistre une erreur fatale
    pub fn record_failure(&mut self, message: impl Into<String>, step: Option<SyncStep>) {
        self.errors.push(message.into());
        if step.is_some() {
            self.failed_step = step;
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = if !self.errors.is_empty() {
            RunStatus::Failed
        } else if self.sync.is_none() {
            RunStatus::NothingToSync
        } else if self.backfill.unresolved > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!(
            "EV POI SYNC REPORT - {} within {}",
            self.country_code, self.boundary
        );
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SOURCE ---");
        println!(
            "Stations: {} fetched, {} without connections, {} incomplete",
            self.stations_fetched,
            self.flatten.stations_without_connections,
            self.flatten.stations_incomplete
        );
        println!(
            "Connectors: {} flattened, {} incomplete, {} within boundary",
            self.flatten.records, self.flatten.connections_incomplete, self.records_in_boundary
        );

        println!("\n--- GEOCODING ---");
        println!(
            "Towns: {} looked up, {} resolved, {} unresolved, {} failed requests",
            self.backfill.attempted,
            self.backfill.resolved,
            self.backfill.unresolved,
            self.backfill.failures
        );

        if let Some(ref path) = self.export_path {
            println!("\n--- EXPORT ---");
            println!("{} rows written to {}", self.exported_rows, path.display());
        }

        if let Some(ref sync) = self.sync {
            println!("\n--- WAREHOUSE ---");
            println!(
                "Backend: {}",
                self.warehouse_backend.as_deref().unwrap_or("unknown")
            );
            println!(
                "Rows: {} staged, {} merged ({:?})",
                sync.staged_rows, sync.merged_rows, sync.state
            );
        }

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in &self.errors {
                match self.failed_step {
                    Some(step) => println!("  [{}] {}", step, e),
                    None => println!("  {}", e),
                }
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        let (staged, merged) = self
            .sync
            .as_ref()
            .map_or((0, 0), |s| (s.staged_rows, s.merged_rows));
        format!(
            "{}: {} stations, {} connectors in boundary, {} staged, {} merged, {} errors",
            self.country_code,
            self.stations_fetched,
            self.records_in_boundary,
            staged,
            merged,
            self.errors.len()
        )
    }
}
