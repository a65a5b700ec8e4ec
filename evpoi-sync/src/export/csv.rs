//! Export CSV: en-têtes de l'API, une ligne par connecteur

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use evpoi::{PoiRecord, POI_COLUMNS};
use thiserror::Error;
use tracing::info;

/// Erreur d'écriture de l'export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("writing {path}: {source}")]
    Write { path: PathBuf, source: ::csv::Error },
}

/// Écrit `records` dans `path` (écrase le fichier); retourne le nombre de lignes.
///
/// L'en-tête est toujours écrit, même sans ligne.
pub fn export_csv(records: &[PoiRecord], path: &Path) -> Result<usize, ExportError> {
    let file = File::create(path).map_err(|source| ExportError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    writer
        .write_record(POI_COLUMNS.iter().map(|c| c.header))
        .map_err(write_err)?;
    for record in records {
        writer.serialize(record).map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| write_err(::csv::Error::from(e)))?;

    info!(path = %path.display(), rows = records.len(), "CSV export written");
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: &str, town: Option<&str>) -> PoiRecord {
        PoiRecord {
            id: 3,
            uuid: uuid.into(),
            usage_cost: None,
            number_of_points: Some(1),
            status_type_id: None,
            address_info_id: None,
            title: Some("Barbican".into()),
            address_line1: None,
            address_line2: None,
            town: town.map(String::from),
            state_or_province: None,
            postcode: None,
            country_id: Some(1),
            latitude: 51.52,
            longitude: -0.095,
            distance_unit: None,
            connection_id: 30,
            power_kw: Some(7.4),
            amps: None,
            voltage: None,
            quantity: None,
            level_id: None,
            connection_type_id: None,
            status_type_id_connection: None,
            current_type_id: None,
        }
    }

    #[test]
    fn test_export_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_london.csv");

        let written = export_csv(&[record("a", Some("London")), record("b", None)], &path).unwrap();
        assert_eq!(written, 2);

        let mut reader = ::csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), POI_COLUMNS.len());
        assert_eq!(&headers[0], "ID");
        assert_eq!(&headers[23], "StatusTypeID_Connection");

        let rows: Vec<PoiRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].town.as_deref(), Some("London"));
        assert_eq!(rows[1].town, None);
        assert_eq!(rows[1].power_kw, Some(7.4));
    }

    #[test]
    fn test_export_empty_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");

        assert_eq!(export_csv(&[], &path).unwrap(), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("ID,UUID,UsageCost"));
    }

    #[test]
    fn test_export_to_missing_directory() {
        let err = export_csv(&[], Path::new("/nonexistent/dir/out.csv")).unwrap_err();
        assert!(matches!(err, ExportError::Create { .. }));
    }
}
