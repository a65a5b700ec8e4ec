//! Entrepôt PostgreSQL
//!
//! Une seule connexion du pool est tenue pour toute la synchronisation: le
//! verrou consultatif est attaché à la session.

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Object, Pool};
use evpoi::{PoiColumn, PoiRecord, POI_COLUMNS};
use futures::SinkExt;
use tracing::{debug, info};

use super::pool::{create_pool, test_connection, DatabaseConfig};
use super::{TableKind, TableRef, Warehouse, WarehouseError};
use crate::config::{ConfigError, WarehouseConfig};
use crate::sync::MergeStatement;

/// Lignes par chunk envoyé dans le flux COPY
const COPY_CHUNK_ROWS: usize = 5_000;

/// Entrepôt PostgreSQL (une session)
pub struct PostgresWarehouse {
    client: Object,
}

impl PostgresWarehouse {
    /// Prend une connexion du pool
    pub async fn connect(pool: &Pool) -> Result<Self, WarehouseError> {
        test_connection(pool).await?;
        let client = pool.get().await?;
        Ok(Self { client })
    }

    /// Résout les identifiants, crée le pool et ouvre la session
    pub async fn from_config(config: &WarehouseConfig) -> Result<Self, ConnectError> {
        let db = DatabaseConfig::resolve(&config.credentials, &config.project_id)?;
        info!(
            host = %db.host,
            port = db.port,
            dbname = %db.dbname,
            user = %db.user,
            ssl = ?db.ssl_mode,
            "Connecting to PostgreSQL"
        );
        let pool = create_pool(&db)?;
        Ok(Self::connect(&pool).await?)
    }
}

/// Erreur d'ouverture de l'entrepôt
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Définition SQL des colonnes pour `CREATE TABLE`
fn column_definitions(columns: &[PoiColumn], kind: TableKind) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let not_null = if c.required && kind == TableKind::Permanent {
                " NOT NULL"
            } else {
                ""
            };
            format!("{} {}{}", c.name, c.sql_type.pg_type(), not_null)
        })
        .collect();

    if kind == TableKind::Permanent {
        let keys: Vec<&str> = columns.iter().filter(|c| c.key).map(|c| c.name).collect();
        if !keys.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
    }

    defs.join(",\n            ")
}

/// Encode les lignes en chunks CSV (sans en-tête) pour `COPY ... FORMAT csv`.
///
/// Un champ vide non quoté est lu comme NULL par PostgreSQL.
pub fn encode_copy_chunks(
    rows: &[PoiRecord],
    chunk_rows: usize,
) -> Result<Vec<Bytes>, WarehouseError> {
    rows.chunks(chunk_rows.max(1))
        .map(|chunk| {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(Vec::with_capacity(chunk.len() * 160));
            for row in chunk {
                writer
                    .serialize(row)
                    .map_err(|e| WarehouseError::Encode(e.to_string()))?;
            }
            let data = writer
                .into_inner()
                .map_err(|e| WarehouseError::Encode(e.to_string()))?;
            Ok(Bytes::from(data))
        })
        .collect()
}

fn copy_statement(table: &TableRef) -> String {
    let columns: Vec<&str> = POI_COLUMNS.iter().map(|c| c.name).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        table.quoted(),
        columns.join(", ")
    )
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn table_exists(&mut self, table: &TableRef) -> Result<bool, WarehouseError> {
        let exists = self
            .client
            .query_opt(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[&table.dataset, &table.table],
            )
            .await?
            .is_some();
        Ok(exists)
    }

    async fn create_table(
        &mut self,
        table: &TableRef,
        columns: &[PoiColumn],
        kind: TableKind,
    ) -> Result<(), WarehouseError> {
        self.client
            .execute(
                &format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", table.dataset),
                &[],
            )
            .await?;

        let unlogged = match kind {
            TableKind::Staging => "UNLOGGED ",
            TableKind::Permanent => "",
        };
        let sql = format!(
            r#"
            CREATE {unlogged}TABLE IF NOT EXISTS {table} (
            {columns}
            )
            "#,
            table = table.quoted(),
            columns = column_definitions(columns, kind),
        );
        self.client.execute(&sql, &[]).await?;

        info!(table = %table, kind = ?kind, "Created table");
        Ok(())
    }

    async fn load_overwrite(
        &mut self,
        table: &TableRef,
        rows: &[PoiRecord],
    ) -> Result<u64, WarehouseError> {
        let chunks = encode_copy_chunks(rows, COPY_CHUNK_ROWS)?;

        // TRUNCATE + COPY dans la même transaction: la table n'est jamais à moitié chargée
        let tx = self.client.transaction().await?;
        tx.execute(&format!("TRUNCATE TABLE {}", table.quoted()), &[])
            .await?;

        let copy_in = tx.copy_in(&copy_statement(table)).await?;
        let mut pinned = std::pin::pin!(copy_in);
        for chunk in chunks {
            pinned.as_mut().send(chunk).await?;
        }
        let copied = pinned.as_mut().finish().await?;
        tx.commit().await?;

        debug!(table = %table, rows = copied, "Loaded rows with COPY");
        Ok(copied)
    }

    async fn execute_merge(&mut self, merge: &MergeStatement) -> Result<u64, WarehouseError> {
        let affected = self.client.execute(&merge.to_sql(), &[]).await?;
        Ok(affected)
    }

    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), WarehouseError> {
        self.client
            .execute(&format!("DROP TABLE IF EXISTS {}", table.quoted()), &[])
            .await?;
        Ok(())
    }

    async fn try_lock(&mut self, key: i64) -> Result<bool, WarehouseError> {
        let row = self
            .client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await?;
        Ok(row.get(0))
    }

    async fn unlock(&mut self, key: i64) -> Result<(), WarehouseError> {
        self.client
            .execute("SELECT pg_advisory_unlock($1)", &[&key])
            .await?;
        Ok(())
    }
}
