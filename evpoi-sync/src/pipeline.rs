//! Orchestration: Limite → Source → Filtre → Géocodage → Export → Synchronisation
//!
//! Chaque étape est attendue avant la suivante; aucune parallélisation.

use std::path::PathBuf;

use evpoi::{ensure_wgs84, filter_within_boundary, flatten_with_report};
use reqwest::Client;
use tracing::{info, warn};

use crate::boundary::{provider_from_config, BoundaryProvider};
use crate::config::{AppConfig, ConfigError};
use crate::error::PipelineError;
use crate::export::export_csv;
use crate::geocode::{backfill_towns, NominatimGeocoder, ReverseGeocoder};
use crate::report::RunReport;
use crate::source::PoiSourceClient;
use crate::sync::SyncEngine;
use crate::warehouse::Warehouse;

/// Client HTTP partagé par les trois services
pub fn http_client(config: &AppConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.http_timeout)
        .user_agent(config.geocoder.user_agent.as_str())
        .build()
}

/// Pipeline complet pour un entrepôt donné
pub struct Pipeline<W> {
    source: PoiSourceClient,
    boundary: Box<dyn BoundaryProvider>,
    geocoder: Box<dyn ReverseGeocoder>,
    country_code: String,
    export_path: PathBuf,
    engine: SyncEngine<W>,
}

impl<W: Warehouse> Pipeline<W> {
    pub fn from_config(config: &AppConfig, warehouse: W) -> Result<Self, PipelineError> {
        let http = http_client(config)?;
        Ok(Self {
            source: PoiSourceClient::new(http.clone(), &config.source),
            boundary: provider_from_config(&http, &config.boundary, &config.geocoder),
            geocoder: Box::new(NominatimGeocoder::new(http, &config.geocoder)),
            country_code: config.source.country_code.clone(),
            export_path: config.export_path.clone(),
            engine: SyncEngine::new(warehouse, &config.warehouse)?,
        })
    }

    /// Remplace le fournisseur de limite
    pub fn with_boundary(mut self, boundary: Box<dyn BoundaryProvider>) -> Self {
        self.boundary = boundary;
        self
    }

    /// Remplace le géocodeur
    pub fn with_geocoder(mut self, geocoder: Box<dyn ReverseGeocoder>) -> Self {
        self.geocoder = geocoder;
        self
    }

    /// Rapport vierge pour cette exécution
    pub fn new_report(&self) -> RunReport {
        RunReport::new(&self.country_code, &self.boundary.describe())
    }

    pub fn engine(&self) -> &SyncEngine<W> {
        &self.engine
    }

    /// Exécute le pipeline en remplissant `report` au fil des étapes
    pub async fn run(&mut self, report: &mut RunReport) -> Result<(), PipelineError> {
        // Limite résolue et CRS vérifié avant de télécharger les stations
        let boundary = self.boundary.boundary().await?;
        ensure_wgs84(&boundary).map_err(ConfigError::from)?;

        let stations = self.source.fetch(&self.country_code).await?;
        report.stations_fetched = stations.len();
        if stations.is_empty() {
            warn!(country = %self.country_code, "POI API returned no station, nothing to do");
            return Ok(());
        }

        let (records, flatten) = flatten_with_report(&stations);
        info!(
            stations = flatten.stations,
            records = flatten.records,
            without_connections = flatten.stations_without_connections,
            "Stations flattened"
        );
        report.flatten = flatten;
        drop(stations);

        let mut records =
            filter_within_boundary(records, &boundary).map_err(ConfigError::from)?;
        report.records_in_boundary = records.len();

        report.backfill = backfill_towns(&mut records, self.geocoder.as_ref()).await;

        report.exported_rows = export_csv(&records, &self.export_path)?;
        report.export_path = Some(self.export_path.clone());

        if records.is_empty() {
            warn!(boundary = %self.boundary.describe(), "No charging point within boundary, sync skipped");
            return Ok(());
        }

        report.warehouse_backend = Some(self.engine.warehouse().backend().to_string());
        let sync = self.engine.sync(&records).await?;
        info!(
            staged = sync.staged_rows,
            merged = sync.merged_rows,
            "Warehouse sync done"
        );
        report.sync = Some(sync);
        Ok(())
    }
}
