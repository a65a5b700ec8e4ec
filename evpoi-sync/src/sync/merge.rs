//! Instruction `MERGE` staging → table permanente

use evpoi::POI_COLUMNS;

use crate::warehouse::TableRef;

/// Colonne dénormalisée de la station: insérée, jamais réécrite par l'upsert
const INSERT_ONLY_COLUMNS: &[&str] = &["id"];

/// Upsert en une instruction, joint sur la clé composite
///
/// - ligne correspondante: toutes les colonnes de `update_columns` sont
///   réécrites sans condition avec la valeur de staging (dernière écriture gagnante)
/// - ligne absente: insérée avec `insert_columns`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    pub target: TableRef,
    pub source: TableRef,
    pub key_columns: Vec<&'static str>,
    pub update_columns: Vec<&'static str>,
    pub insert_columns: Vec<&'static str>,
}

impl MergeStatement {
    /// Upsert des [`evpoi::PoiRecord`] sur `(uuid, connection_id)`
    pub fn for_poi(target: TableRef, source: TableRef) -> Self {
        let key_columns = POI_COLUMNS.iter().filter(|c| c.key).map(|c| c.name).collect();
        let update_columns = POI_COLUMNS
            .iter()
            .filter(|c| !c.key && !INSERT_ONLY_COLUMNS.contains(&c.name))
            .map(|c| c.name)
            .collect();
        let insert_columns = POI_COLUMNS.iter().map(|c| c.name).collect();

        Self {
            target,
            source,
            key_columns,
            update_columns,
            insert_columns,
        }
    }

    /// Rend l'instruction SQL (identifiants validés en amont par [`TableRef`])
    pub fn to_sql(&self) -> String {
        let on = self
            .key_columns
            .iter()
            .map(|c| format!("t.{c} = s.{c}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let set = self
            .update_columns
            .iter()
            .map(|c| format!("{c} = s.{c}"))
            .collect::<Vec<_>>()
            .join(",\n            ");
        let insert = self.insert_columns.join(", ");
        let values = self
            .insert_columns
            .iter()
            .map(|c| format!("s.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"
        MERGE INTO {target} AS t
        USING {source} AS s
        ON {on}
        WHEN MATCHED THEN
          UPDATE SET
            {set}
        WHEN NOT MATCHED THEN
          INSERT ({insert})
          VALUES ({values})
        "#,
            target = self.target.quoted(),
            source = self.source.quoted(),
        )
    }
}
