//! Filtrage spatial des POI par polygone de limite
//!
//! Un point est retenu s'il est strictement à l'intérieur du polygone
//! (sémantique `within`): un point posé sur la frontière est exclu.

use std::fmt;

use geo::{Contains, Geometry, MultiPolygon, Point};
use tracing::debug;

use crate::error::PoiError;
use crate::types::PoiRecord;

/// Système de coordonnées de référence, identifié par son code EPSG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    /// WGS84 (longitude/latitude), CRS des coordonnées OpenChargeMap
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub const fn epsg(epsg: u32) -> Self {
        Self { epsg }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Polygone de limite et son CRS
#[derive(Debug, Clone)]
pub struct Boundary {
    pub area: MultiPolygon<f64>,
    pub crs: Crs,
}

impl Boundary {
    pub fn new(area: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { area, crs }
    }

    /// Construit une limite depuis une géométrie polygonale
    pub fn from_geometry(geometry: Geometry<f64>, crs: Crs) -> Result<Self, PoiError> {
        let area = match geometry {
            Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            Geometry::MultiPolygon(multi) => multi,
            Geometry::GeometryCollection(collection) => {
                let polygons: Vec<_> = collection
                    .into_iter()
                    .filter_map(|g| match g {
                        Geometry::Polygon(p) => Some(vec![p]),
                        Geometry::MultiPolygon(m) => Some(m.0),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                if polygons.is_empty() {
                    return Err(PoiError::invalid_boundary(
                        "geometry collection holds no polygon",
                    ));
                }
                MultiPolygon::new(polygons)
            }
            other => {
                return Err(PoiError::invalid_boundary(format!(
                    "expected a polygon, got {}",
                    geometry_kind(&other)
                )))
            }
        };

        if area.0.is_empty() {
            return Err(PoiError::invalid_boundary("empty multipolygon"));
        }

        Ok(Self { area, crs })
    }

    /// Vrai si le point est strictement à l'intérieur de la limite
    pub fn contains_point(&self, point: &Point<f64>) -> bool {
        self.area.contains(point)
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Point `(Longitude, Latitude)` d'un enregistrement
pub fn record_point(record: &PoiRecord) -> Point<f64> {
    Point::new(record.longitude, record.latitude)
}

/// Vérifie que la limite est dans le CRS des enregistrements (WGS84)
pub fn ensure_wgs84(boundary: &Boundary) -> Result<(), PoiError> {
    if boundary.crs != Crs::WGS84 {
        return Err(PoiError::CrsMismatch {
            expected: Crs::WGS84,
            found: boundary.crs,
        });
    }
    Ok(())
}

/// Conserve les enregistrements situés strictement dans la limite.
///
/// Les enregistrements sont en WGS84: une limite dans un autre CRS est une
/// erreur de configuration, levée avant toute évaluation.
pub fn filter_within_boundary(
    records: Vec<PoiRecord>,
    boundary: &Boundary,
) -> Result<Vec<PoiRecord>, PoiError> {
    ensure_wgs84(boundary)?;

    let total = records.len();
    let kept: Vec<PoiRecord> = records
        .into_iter()
        .filter(|r| boundary.contains_point(&record_point(r)))
        .collect();

    debug!(total, kept = kept.len(), "Filtered records within boundary");
    Ok(kept)
}
