//! Fournisseurs de limite géographique
//!
//! - recherche de lieu nommé (Nominatim, `polygon_geojson=1`), toujours en WGS84
//! - fichier GeoJSON local, dont le CRS est lu dans le membre `crs` historique
//!   (absent = WGS84)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use evpoi::{Boundary, Crs, PoiError};
use geojson::{GeoJson, Geometry as GeoJsonGeometry, Value as GeoJsonValue};
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BoundaryConfig, GeocoderConfig};

/// Erreurs de récupération de la limite
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("boundary lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cannot read boundary file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Aucune géométrie polygonale trouvée
    #[error("no boundary found for {0}")]
    NotFound(String),

    #[error(transparent)]
    Geometry(#[from] PoiError),
}

/// Source de la limite utilisée par le filtre spatial
#[async_trait]
pub trait BoundaryProvider: Send + Sync {
    async fn boundary(&self) -> Result<Boundary, BoundaryError>;

    /// Description pour les logs et le rapport
    fn describe(&self) -> String;
}

fn crs_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"EPSG:{1,2}(\d+)").expect("valid regex"))
}

/// CRS déclaré par un nom de la forme `urn:ogc:def:crs:EPSG::27700` ou `EPSG:27700`
pub fn parse_crs_name(name: &str) -> Option<Crs> {
    if name.ends_with("CRS84") {
        return Some(Crs::WGS84);
    }
    crs_regex()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
        .map(Crs::epsg)
}

/// Lit le membre `crs` historique (`{"type": "name", "properties": {"name": ...}}`)
fn legacy_crs(value: &serde_json::Value) -> Result<Crs, BoundaryError> {
    let Some(crs) = value.get("crs") else {
        return Ok(Crs::WGS84);
    };
    let name = crs
        .pointer("/properties/name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| PoiError::invalid_boundary("unsupported crs member"))?;
    parse_crs_name(name)
        .ok_or_else(|| PoiError::invalid_boundary(format!("unknown CRS name {}", name)).into())
}

fn is_polygonal(geometry: &GeoJsonGeometry) -> bool {
    matches!(
        geometry.value,
        GeoJsonValue::Polygon(_) | GeoJsonValue::MultiPolygon(_)
    )
}

/// Première géométrie polygonale d'un document GeoJSON
fn first_polygonal(geojson: GeoJson) -> Option<GeoJsonGeometry> {
    match geojson {
        GeoJson::Geometry(geometry) => Some(geometry),
        GeoJson::Feature(feature) => feature.geometry,
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .find(is_polygonal),
    }
}

/// Construit une limite depuis un document GeoJSON (Geometry, Feature ou FeatureCollection)
pub fn boundary_from_geojson(text: &str, origin: &str) -> Result<Boundary, BoundaryError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let crs = legacy_crs(&value)?;
    let geojson = GeoJson::from_json_value(value)?;

    let geometry = first_polygonal(geojson).ok_or_else(|| BoundaryError::NotFound(origin.to_string()))?;
    let geometry = geo::Geometry::<f64>::try_from(geometry)?;
    Ok(Boundary::from_geometry(geometry, crs)?)
}

/// Limite issue d'un fichier GeoJSON local
#[derive(Debug, Clone)]
pub struct GeoJsonFileBoundary {
    path: PathBuf,
}

impl GeoJsonFileBoundary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BoundaryProvider for GeoJsonFileBoundary {
    async fn boundary(&self) -> Result<Boundary, BoundaryError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| BoundaryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let boundary = boundary_from_geojson(&text, &self.path.display().to_string())?;
        info!(
            path = %self.path.display(),
            crs = %boundary.crs,
            polygons = boundary.area.0.len(),
            "Boundary loaded from file"
        );
        Ok(boundary)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Limite d'un lieu nommé via la recherche Nominatim
#[derive(Debug, Clone)]
pub struct NominatimBoundaryProvider {
    http: Client,
    base_url: String,
    user_agent: String,
    place: String,
}

impl NominatimBoundaryProvider {
    pub fn new(http: Client, config: &GeocoderConfig, place: &str) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            place: place.to_string(),
        }
    }
}

#[async_trait]
impl BoundaryProvider for NominatimBoundaryProvider {
    async fn boundary(&self) -> Result<Boundary, BoundaryError> {
        debug!(place = %self.place, "Looking up boundary");
        let text = self
            .http
            .get(format!("{}/search", self.base_url))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[
                ("q", self.place.as_str()),
                ("format", "geojson"),
                ("polygon_geojson", "1"),
                ("limit", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let value: serde_json::Value = serde_json::from_str(&text)?;
        let geometry = match GeoJson::from_json_value(value)? {
            GeoJson::FeatureCollection(collection) => collection
                .features
                .into_iter()
                .next()
                .and_then(|f| f.geometry),
            other => first_polygonal(other),
        }
        .ok_or_else(|| BoundaryError::NotFound(self.place.clone()))?;

        // RFC 7946: toujours WGS84
        let geometry = geo::Geometry::<f64>::try_from(geometry)?;
        let boundary = Boundary::from_geometry(geometry, Crs::WGS84)?;
        info!(
            place = %self.place,
            polygons = boundary.area.0.len(),
            "Boundary resolved"
        );
        Ok(boundary)
    }

    fn describe(&self) -> String {
        format!("place \"{}\"", self.place)
    }
}

/// Limite fournie directement (tests, limite pré-calculée)
#[derive(Debug, Clone)]
pub struct StaticBoundary(pub Boundary);

#[async_trait]
impl BoundaryProvider for StaticBoundary {
    async fn boundary(&self) -> Result<Boundary, BoundaryError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("static boundary ({})", self.0.crs)
    }
}

/// Fournisseur selon la configuration: le fichier prime sur la recherche
pub fn provider_from_config(
    http: &Client,
    boundary: &BoundaryConfig,
    geocoder: &GeocoderConfig,
) -> Box<dyn BoundaryProvider> {
    match &boundary.file {
        Some(path) => Box::new(GeoJsonFileBoundary::new(path.clone())),
        None => Box::new(NominatimBoundaryProvider::new(
            http.clone(),
            geocoder,
            &boundary.place,
        )),
    }
}
