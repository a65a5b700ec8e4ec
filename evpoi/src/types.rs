//! Types de données pour le crate evpoi

use serde::{Deserialize, Serialize};

/// Station brute telle que renvoyée par l'API OpenChargeMap (`compact=false`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStation {
    #[serde(rename = "ID")]
    pub id: Option<i64>,

    #[serde(rename = "UUID")]
    pub uuid: Option<String>,

    #[serde(rename = "UsageCost")]
    pub usage_cost: Option<String>,

    #[serde(rename = "NumberOfPoints")]
    pub number_of_points: Option<i32>,

    #[serde(rename = "StatusTypeID")]
    pub status_type_id: Option<i32>,

    #[serde(rename = "AddressInfo")]
    pub address_info: Option<RawAddressInfo>,

    /// Connecteurs de la station (absent ou `null` = aucun)
    #[serde(rename = "Connections", default)]
    pub connections: Option<Vec<RawConnection>>,
}

/// Bloc `AddressInfo` d'une station
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAddressInfo {
    #[serde(rename = "ID")]
    pub id: Option<i64>,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "AddressLine1")]
    pub address_line1: Option<String>,
    #[serde(rename = "AddressLine2")]
    pub address_line2: Option<String>,
    #[serde(rename = "Town")]
    pub town: Option<String>,
    #[serde(rename = "StateOrProvince")]
    pub state_or_province: Option<String>,
    #[serde(rename = "Postcode")]
    pub postcode: Option<String>,
    #[serde(rename = "CountryID")]
    pub country_id: Option<i32>,
    #[serde(rename = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "DistanceUnit")]
    pub distance_unit: Option<i32>,
}

/// Connecteur physique d'une station
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConnection {
    #[serde(rename = "ID")]
    pub id: Option<i64>,
    #[serde(rename = "ConnectionTypeID")]
    pub connection_type_id: Option<i32>,
    #[serde(rename = "StatusTypeID")]
    pub status_type_id: Option<i32>,
    #[serde(rename = "LevelID")]
    pub level_id: Option<i32>,
    #[serde(rename = "Amps")]
    pub amps: Option<i32>,
    #[serde(rename = "Voltage")]
    pub voltage: Option<i32>,
    #[serde(rename = "PowerKW")]
    pub power_kw: Option<f64>,
    #[serde(rename = "CurrentTypeID")]
    pub current_type_id: Option<i32>,
    #[serde(rename = "Quantity")]
    pub quantity: Option<i32>,
}

/// Une ligne par connecteur, héritant des champs de sa station.
///
/// L'ordre des champs est celui des colonnes de l'export CSV et de la table
/// d'entrepôt (voir [`POI_COLUMNS`]).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PoiRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "UsageCost")]
    pub usage_cost: Option<String>,
    #[serde(rename = "NumberOfPoints")]
    pub number_of_points: Option<i32>,
    #[serde(rename = "StatusTypeID")]
    pub status_type_id: Option<i32>,
    #[serde(rename = "AddressInfoID")]
    pub address_info_id: Option<i64>,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "AddressLine1")]
    pub address_line1: Option<String>,
    #[serde(rename = "AddressLine2")]
    pub address_line2: Option<String>,
    #[serde(rename = "Town")]
    pub town: Option<String>,
    #[serde(rename = "StateOrProvince")]
    pub state_or_province: Option<String>,
    #[serde(rename = "Postcode")]
    pub postcode: Option<String>,
    #[serde(rename = "CountryID")]
    pub country_id: Option<i32>,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    #[serde(rename = "DistanceUnit")]
    pub distance_unit: Option<i32>,
    #[serde(rename = "ConnectionID")]
    pub connection_id: i64,
    #[serde(rename = "PowerKW")]
    pub power_kw: Option<f64>,
    #[serde(rename = "Amps")]
    pub amps: Option<i32>,
    #[serde(rename = "Voltage")]
    pub voltage: Option<i32>,
    #[serde(rename = "Quantity")]
    pub quantity: Option<i32>,
    #[serde(rename = "LevelID")]
    pub level_id: Option<i32>,
    #[serde(rename = "ConnectionTypeID")]
    pub connection_type_id: Option<i32>,
    #[serde(rename = "StatusTypeID_Connection")]
    pub status_type_id_connection: Option<i32>,
    #[serde(rename = "CurrentTypeID")]
    pub current_type_id: Option<i32>,
}

/// Clé naturelle d'un enregistrement: `(UUID, ConnectionID)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey {
    pub uuid: String,
    pub connection_id: i64,
}

impl PoiRecord {
    /// Retourne la clé utilisée pour l'upsert
    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            uuid: self.uuid.clone(),
            connection_id: self.connection_id,
        }
    }

    /// Vrai si la localité doit être complétée par géocodage inverse
    /// (seule une valeur nulle compte, le texte source est gardé tel quel)
    pub fn needs_town(&self) -> bool {
        self.town.is_none()
    }
}

/// Type SQL d'une colonne de la table d'entrepôt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    BigInt,
    Integer,
    Double,
    Text,
}

impl SqlType {
    /// Nom du type PostgreSQL
    pub fn pg_type(self) -> &'static str {
        match self {
            SqlType::BigInt => "BIGINT",
            SqlType::Integer => "INTEGER",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
        }
    }
}

/// Description d'une colonne: en-tête d'export, nom SQL, type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoiColumn {
    /// En-tête dans l'export CSV (nom de champ de l'API)
    pub header: &'static str,
    /// Nom de colonne dans l'entrepôt
    pub name: &'static str,
    pub sql_type: SqlType,
    /// Colonne non nulle
    pub required: bool,
    /// Fait partie de la clé `(uuid, connection_id)`
    pub key: bool,
}

const fn col(
    header: &'static str,
    name: &'static str,
    sql_type: SqlType,
    required: bool,
    key: bool,
) -> PoiColumn {
    PoiColumn {
        header,
        name,
        sql_type,
        required,
        key,
    }
}

/// Colonnes d'un [`PoiRecord`], dans l'ordre des champs de la structure
pub const POI_COLUMNS: &[PoiColumn] = &[
    col("ID", "id", SqlType::BigInt, true, false),
    col("UUID", "uuid", SqlType::Text, true, true),
    col("UsageCost", "usage_cost", SqlType::Text, false, false),
    col("NumberOfPoints", "number_of_points", SqlType::Integer, false, false),
    col("StatusTypeID", "status_type_id", SqlType::Integer, false, false),
    col("AddressInfoID", "address_info_id", SqlType::BigInt, false, false),
    col("Title", "title", SqlType::Text, false, false),
    col("AddressLine1", "address_line1", SqlType::Text, false, false),
    col("AddressLine2", "address_line2", SqlType::Text, false, false),
    col("Town", "town", SqlType::Text, false, false),
    col("StateOrProvince", "state_or_province", SqlType::Text, false, false),
    col("Postcode", "postcode", SqlType::Text, false, false),
    col("CountryID", "country_id", SqlType::Integer, false, false),
    col("Latitude", "latitude", SqlType::Double, true, false),
    col("Longitude", "longitude", SqlType::Double, true, false),
    col("DistanceUnit", "distance_unit", SqlType::Integer, false, false),
    col("ConnectionID", "connection_id", SqlType::BigInt, true, true),
    col("PowerKW", "power_kw", SqlType::Double, false, false),
    col("Amps", "amps", SqlType::Integer, false, false),
    col("Voltage", "voltage", SqlType::Integer, false, false),
    col("Quantity", "quantity", SqlType::Integer, false, false),
    col("LevelID", "level_id", SqlType::Integer, false, false),
    col("ConnectionTypeID", "connection_type_id", SqlType::Integer, false, false),
    col(
        "StatusTypeID_Connection",
        "status_type_id_connection",
        SqlType::Integer,
        false,
        false,
    ),
    col("CurrentTypeID", "current_type_id", SqlType::Integer, false, false),
];

/// Décode la réponse JSON de l'API (tableau de stations)
pub fn parse_stations(json: &[u8]) -> Result<Vec<RawStation>, crate::PoiError> {
    Ok(serde_json::from_slice(json)?)
}
