//! Export des lignes filtrées (CSV)

pub mod csv;

pub use self::csv::{export_csv, ExportError};
