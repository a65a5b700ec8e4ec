//! Entrepôt cible: contrat minimal utilisé par le moteur de synchronisation
//!
//! Deux implémentations:
//! - [`postgres::PostgresWarehouse`]: PostgreSQL (>= 15 pour `MERGE`)
//! - [`memory::MemoryWarehouse`]: en mémoire, pour les essais à blanc et les tests

pub mod memory;
pub mod pool;
pub mod postgres;

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use evpoi::{PoiColumn, PoiRecord};
use regex::Regex;
use thiserror::Error;

use crate::sync::MergeStatement;

pub use memory::MemoryWarehouse;
pub use pool::{create_pool, DatabaseConfig, SslMode};
pub use postgres::PostgresWarehouse;

/// Erreurs remontées par un entrepôt
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Erreur PostgreSQL
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Impossible d'obtenir une connexion du pool
    #[error("connection pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Création du pool impossible
    #[error("connection pool setup: {0}")]
    PoolSetup(#[from] deadpool_postgres::CreatePoolError),

    /// Encodage CSV du lot pour COPY
    #[error("encoding rows: {0}")]
    Encode(String),

    /// Table absente
    #[error("table {0} does not exist")]
    MissingTable(TableRef),

    /// Erreur renvoyée par l'entrepôt en mémoire
    #[error("{0}")]
    Rejected(String),
}

/// Nature d'une table créée par le moteur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Table de staging: non journalisée, sans contrainte
    Staging,
    /// Table permanente: clé primaire `(uuid, connection_id)`
    Permanent,
}

/// Opérations requises de l'entrepôt
///
/// Le moteur possède l'entrepôt pour la durée d'une synchronisation; toutes les
/// opérations passent par la même session (le verrou consultatif en dépend).
#[async_trait]
pub trait Warehouse: Send {
    /// Nom court du backend (logs, rapport)
    fn backend(&self) -> &'static str;

    async fn table_exists(&mut self, table: &TableRef) -> Result<bool, WarehouseError>;

    /// Crée la table (et son schéma) si absente
    async fn create_table(
        &mut self,
        table: &TableRef,
        columns: &[PoiColumn],
        kind: TableKind,
    ) -> Result<(), WarehouseError>;

    /// Remplace le contenu de la table par `rows` (troncature puis chargement)
    async fn load_overwrite(
        &mut self,
        table: &TableRef,
        rows: &[PoiRecord],
    ) -> Result<u64, WarehouseError>;

    /// Exécute l'upsert en une seule instruction; retourne les lignes touchées
    async fn execute_merge(&mut self, merge: &MergeStatement) -> Result<u64, WarehouseError>;

    /// Supprime la table; une table déjà absente n'est pas une erreur
    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), WarehouseError>;

    /// Tente de prendre le verrou consultatif `key` sans attendre
    async fn try_lock(&mut self, key: i64) -> Result<bool, WarehouseError>;

    async fn unlock(&mut self, key: i64) -> Result<(), WarehouseError>;
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
}

/// Vrai si `name` est un identifiant SQL sûr (lettres, chiffres, `_`, 63 max)
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_match(name)
}

/// Table qualifiée `dataset.table` (schéma PostgreSQL + nom)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Construit une référence validée
    pub fn new(dataset: &str, table: &str) -> Result<Self, String> {
        for part in [dataset, table] {
            if !is_valid_identifier(part) {
                return Err(format!("invalid SQL identifier: {:?}", part));
            }
        }
        Ok(Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }

    /// Accepte `table` ou `dataset.table`; `default_dataset` s'applique au premier cas
    pub fn parse(value: &str, default_dataset: &str) -> Result<Self, String> {
        match value.split_once('.') {
            Some((dataset, table)) => Self::new(dataset, table),
            None => Self::new(default_dataset, value),
        }
    }

    /// Forme SQL échappée: `"dataset"."table"`
    pub fn quoted(&self) -> String {
        format!("\"{}\".\"{}\"", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("staging_tbl"));
        assert!(is_valid_identifier("_ev2"));
        assert!(!is_valid_identifier("2ev"));
        assert!(!is_valid_identifier("ev_tbl; DROP TABLE x"));
        assert!(!is_valid_identifier("ev\"tbl"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_table_ref_parse() {
        let unqualified = TableRef::parse("staging_tbl", "staging_ev").unwrap();
        assert_eq!(unqualified.to_string(), "staging_ev.staging_tbl");

        let qualified = TableRef::parse("data_ev.ev_tbl", "staging_ev").unwrap();
        assert_eq!(qualified.dataset, "data_ev");
        assert_eq!(qualified.quoted(), "\"data_ev\".\"ev_tbl\"");

        assert!(TableRef::parse("a.b.c", "x").is_err());
        assert!(TableRef::parse("ev-tbl", "x").is_err());
    }
}
