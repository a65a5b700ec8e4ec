//! Géocodage inverse (Nominatim) et complément des localités manquantes
//!
//! Un échec de géocodage n'est jamais fatal: la localité reste inconnue,
//! l'échec est journalisé et compté.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use evpoi::PoiRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GeocoderConfig;

/// Résolution coordonnées → nom de localité
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Localité au point donné, `None` si inconnue ou en cas d'échec
    async fn resolve_city(&self, lat: f64, lon: f64) -> Option<String>;

    /// Nombre de requêtes en échec depuis la création
    fn failures(&self) -> u64 {
        0
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<ReverseAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl ReverseAddress {
    fn locality(self) -> Option<String> {
        [self.city, self.town, self.village]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
    }
}

/// Client Nominatim `/reverse`
#[derive(Debug)]
pub struct NominatimGeocoder {
    http: Client,
    base_url: String,
    user_agent: String,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl NominatimGeocoder {
    pub fn new(http: Client, config: &GeocoderConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn lookup(&self, lat: f64, lon: f64) -> Result<Option<String>, reqwest::Error> {
        let response = self
            .http
            .get(format!("{}/reverse", self.base_url))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: ReverseResponse = response.json().await?;
        Ok(body.address.and_then(ReverseAddress::locality))
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn resolve_city(&self, lat: f64, lon: f64) -> Option<String> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match self.lookup(lat, lon).await {
            Ok(city) => city,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(lat, lon, error = %e, "Reverse geocoding failed");
                None
            }
        }
    }

    fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Compteurs du complément de localités
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Lignes sans localité, une requête chacune
    pub attempted: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Requêtes en échec pendant ce complément
    pub failures: u64,
}

/// Complète `Town` pour les lignes qui n'en ont pas (boucle séquentielle)
pub async fn backfill_towns(
    records: &mut [PoiRecord],
    geocoder: &dyn ReverseGeocoder,
) -> BackfillReport {
    let failures_before = geocoder.failures();
    let mut report = BackfillReport::default();

    for record in records.iter_mut().filter(|r| r.needs_town()) {
        report.attempted += 1;
        match geocoder
            .resolve_city(record.latitude, record.longitude)
            .await
        {
            Some(city) => {
                debug!(uuid = %record.uuid, connection_id = record.connection_id, town = %city, "Town resolved");
                record.town = Some(city);
                report.resolved += 1;
            }
            None => report.unresolved += 1,
        }
    }

    report.failures = geocoder.failures().saturating_sub(failures_before);
    if report.attempted > 0 {
        info!(
            attempted = report.attempted,
            resolved = report.resolved,
            unresolved = report.unresolved,
            failures = report.failures,
            "Town backfill done"
        );
    }
    report
}
