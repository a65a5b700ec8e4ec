//! # evpoi
//!
//! Modèle des points de recharge OpenChargeMap et transformations sans I/O.
//!
//! ## Features
//!
//! - Décodage de la réponse JSON de l'API (`compact=false`)
//! - Aplatissement: une ligne par connecteur, héritant des champs de la station
//! - Filtrage spatial strict (`within`) par polygone de limite, types `geo`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evpoi::{filter_within_boundary, flatten, parse_stations};
//!
//! let stations = parse_stations(&body)?;
//! let records = flatten(&stations);
//! let in_city = filter_within_boundary(records, &boundary)?;
//! println!("{} connecteurs dans la limite", in_city.len());
//! ```

pub mod error;
pub mod flatten;
pub mod spatial;
pub mod types;

pub use error::PoiError;
pub use flatten::{flatten, flatten_with_report, FlattenReport};
pub use spatial::{ensure_wgs84, filter_within_boundary, Boundary, Crs};
pub use types::{
    parse_stations, MergeKey, PoiColumn, PoiRecord, RawAddressInfo, RawConnection, RawStation,
    SqlType, POI_COLUMNS,
};
