//! Aplatissement des stations: une ligne par connecteur
//!
//! Chaque connecteur produit un [`PoiRecord`] qui reprend les champs de sa
//! station. Deux politiques nommées s'appliquent:
//!
//! - [`DROP_STATIONS_WITHOUT_CONNECTIONS`]: une station sans connecteur ne
//!   produit aucune ligne.
//! - [`SKIP_INCOMPLETE`]: une station sans `ID`, `UUID` ou coordonnées, ou un
//!   connecteur sans `ID`, ne peut pas former une ligne valide et est ignoré.

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{PoiRecord, RawAddressInfo, RawConnection, RawStation};

/// Nom de la politique appliquée aux stations sans connecteur
pub const DROP_STATIONS_WITHOUT_CONNECTIONS: &str = "DropStationsWithoutConnections";

/// Nom de la politique appliquée aux stations ou connecteurs incomplets
pub const SKIP_INCOMPLETE: &str = "SkipIncomplete";

/// Compteurs d'aplatissement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    /// Stations reçues
    pub stations: usize,
    /// Lignes produites
    pub records: usize,
    /// Stations sans connecteur (politique `DropStationsWithoutConnections`)
    pub stations_without_connections: usize,
    /// Stations ignorées (ID, UUID ou coordonnées manquants)
    pub stations_incomplete: usize,
    /// Connecteurs ignorés (ID manquant)
    pub connections_incomplete: usize,
}

/// Aplatit les stations en lignes (une par connecteur)
pub fn flatten(stations: &[RawStation]) -> Vec<PoiRecord> {
    flatten_with_report(stations).0
}

/// Aplatit les stations et retourne les compteurs associés
pub fn flatten_with_report(stations: &[RawStation]) -> (Vec<PoiRecord>, FlattenReport) {
    let mut report = FlattenReport {
        stations: stations.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(stations.len() * 2);

    for station in stations {
        let connections = station.connections.as_deref().unwrap_or_default();
        if connections.is_empty() {
            report.stations_without_connections += 1;
            debug!(
                id = ?station.id,
                policy = DROP_STATIONS_WITHOUT_CONNECTIONS,
                "Station has no connection, dropped"
            );
            continue;
        }

        let Some(base) = StationBase::from_raw(station) else {
            report.stations_incomplete += 1;
            warn!(
                id = ?station.id,
                uuid = ?station.uuid,
                policy = SKIP_INCOMPLETE,
                "Station lacks ID, UUID or coordinates, skipped"
            );
            continue;
        };

        for connection in connections {
            match base.record_for(connection) {
                Some(record) => records.push(record),
                None => {
                    report.connections_incomplete += 1;
                    warn!(
                        station = base.id,
                        policy = SKIP_INCOMPLETE,
                        "Connection without ID, skipped"
                    );
                }
            }
        }
    }

    report.records = records.len();
    (records, report)
}

/// Champs communs à toutes les lignes d'une station
struct StationBase<'a> {
    id: i64,
    uuid: &'a str,
    latitude: f64,
    longitude: f64,
    station: &'a RawStation,
    address: Option<&'a RawAddressInfo>,
}

impl<'a> StationBase<'a> {
    fn from_raw(station: &'a RawStation) -> Option<Self> {
        let address = station.address_info.as_ref();
        let latitude = address.and_then(|a| a.latitude)?;
        let longitude = address.and_then(|a| a.longitude)?;
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }

        Some(Self {
            id: station.id?,
            uuid: station.uuid.as_deref().filter(|u| !u.is_empty())?,
            latitude,
            longitude,
            station,
            address,
        })
    }

    fn address_field<T: Clone>(&self, f: impl Fn(&RawAddressInfo) -> &Option<T>) -> Option<T> {
        self.address.and_then(|a| f(a).clone())
    }

    fn record_for(&self, connection: &RawConnection) -> Option<PoiRecord> {
        Some(PoiRecord {
            id: self.id,
            uuid: self.uuid.to_string(),
            usage_cost: self.station.usage_cost.clone(),
            number_of_points: self.station.number_of_points,
            status_type_id: self.station.status_type_id,
            address_info_id: self.address_field(|a| &a.id),
            title: self.address_field(|a| &a.title),
            address_line1: self.address_field(|a| &a.address_line1),
            address_line2: self.address_field(|a| &a.address_line2),
            town: self.address_field(|a| &a.town),
            state_or_province: self.address_field(|a| &a.state_or_province),
            postcode: self.address_field(|a| &a.postcode),
            country_id: self.address_field(|a| &a.country_id),
            latitude: self.latitude,
            longitude: self.longitude,
            distance_unit: self.address_field(|a| &a.distance_unit),
            connection_id: connection.id?,
            power_kw: connection.power_kw,
            amps: connection.amps,
            voltage: connection.voltage,
            quantity: connection.quantity,
            level_id: connection.level_id,
            connection_type_id: connection.connection_type_id,
            status_type_id_connection: connection.status_type_id,
            current_type_id: connection.current_type_id,
        })
    }
}
