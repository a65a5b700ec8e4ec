//! Entrepôt en mémoire
//!
//! Même contrat que PostgreSQL: tables indépendantes, `MERGE` appliqué en un
//! bloc (la table cible est remplacée d'un coup), verrous consultatifs par
//! session. Les clones partagent les tables mais ouvrent une nouvelle session.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use evpoi::{MergeKey, PoiColumn, PoiRecord};
use tracing::debug;

use super::{TableKind, TableRef, Warehouse, WarehouseError};
use crate::sync::MergeStatement;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Opération à faire échouer (tests, diagnostic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    CreateTable,
    Load,
    Merge,
    Drop,
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<PoiRecord>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableRef, MemoryTable>,
    locks: HashMap<i64, u64>,
    failures: HashSet<FailOn>,
}

/// Entrepôt en mémoire partagé entre clones
#[derive(Debug)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
    session: u64,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryWarehouse {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Un panic pendant une opération ne laisse pas d'état partiel: on continue
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fait échouer toutes les prochaines exécutions de `op`
    pub fn fail_on(&self, op: FailOn) {
        self.state().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Vrai si la table existe
    pub fn contains_table(&self, table: &TableRef) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Copie des lignes d'une table, triées par clé
    pub fn rows(&self, table: &TableRef) -> Vec<PoiRecord> {
        let mut rows = self
            .state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        rows.sort_by_key(|r| r.merge_key());
        rows
    }

    /// Insère des lignes directement (préparation d'un état existant)
    pub fn seed(&self, table: &TableRef, rows: Vec<PoiRecord>) {
        let mut state = self.state();
        state.tables.entry(table.clone()).or_default().rows.extend(rows);
    }

    fn check(state: &State, op: FailOn) -> Result<(), WarehouseError> {
        if state.failures.contains(&op) {
            return Err(WarehouseError::Rejected(format!("injected failure on {:?}", op)));
        }
        Ok(())
    }
}

/// Affecte la colonne `column` de `source` à `target`
fn assign_column(
    target: &mut PoiRecord,
    source: &PoiRecord,
    column: &str,
) -> Result<(), WarehouseError> {
    match column {
        "id" => target.id = source.id,
        "uuid" => target.uuid = source.uuid.clone(),
        "usage_cost" => target.usage_cost = source.usage_cost.clone(),
        "number_of_points" => target.number_of_points = source.number_of_points,
        "status_type_id" => target.status_type_id = source.status_type_id,
        "address_info_id" => target.address_info_id = source.address_info_id,
        "title" => target.title = source.title.clone(),
        "address_line1" => target.address_line1 = source.address_line1.clone(),
        "address_line2" => target.address_line2 = source.address_line2.clone(),
        "town" => target.town = source.town.clone(),
        "state_or_province" => target.state_or_province = source.state_or_province.clone(),
        "postcode" => target.postcode = source.postcode.clone(),
        "country_id" => target.country_id = source.country_id,
        "latitude" => target.latitude = source.latitude,
        "longitude" => target.longitude = source.longitude,
        "distance_unit" => target.distance_unit = source.distance_unit,
        "connection_id" => target.connection_id = source.connection_id,
        "power_kw" => target.power_kw = source.power_kw,
        "amps" => target.amps = source.amps,
        "voltage" => target.voltage = source.voltage,
        "quantity" => target.quantity = source.quantity,
        "level_id" => target.level_id = source.level_id,
        "connection_type_id" => target.connection_type_id = source.connection_type_id,
        "status_type_id_connection" => {
            target.status_type_id_connection = source.status_type_id_connection
        }
        "current_type_id" => target.current_type_id = source.current_type_id,
        other => {
            return Err(WarehouseError::Rejected(format!(
                "column \"{}\" does not exist",
                other
            )))
        }
    }
    Ok(())
}

/// Applique l'upsert sur une copie de la table cible
fn apply_merge(
    target: &[PoiRecord],
    staged: &[PoiRecord],
    merge: &MergeStatement,
) -> Result<(Vec<PoiRecord>, u64), WarehouseError> {
    if merge.key_columns != ["uuid", "connection_id"] {
        return Err(WarehouseError::Rejected(format!(
            "unsupported merge key {:?}",
            merge.key_columns
        )));
    }

    let mut rows = target.to_vec();
    let index: BTreeMap<MergeKey, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.merge_key(), i))
        .collect();

    let mut touched = HashSet::new();
    let mut affected = 0u64;
    for source in staged {
        let key = source.merge_key();
        if !touched.insert(key.clone()) {
            return Err(WarehouseError::Rejected(
                "MERGE command cannot affect row a second time".to_string(),
            ));
        }
        match index.get(&key) {
            Some(&i) => {
                for column in &merge.update_columns {
                    assign_column(&mut rows[i], source, column)?;
                }
            }
            None => {
                let mut inserted = source.clone();
                for column in &merge.insert_columns {
                    assign_column(&mut inserted, source, column)?;
                }
                rows.push(inserted);
            }
        }
        affected += 1;
    }

    Ok((rows, affected))
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn table_exists(&mut self, table: &TableRef) -> Result<bool, WarehouseError> {
        Ok(self.contains_table(table))
    }

    async fn create_table(
        &mut self,
        table: &TableRef,
        _columns: &[PoiColumn],
        kind: TableKind,
    ) -> Result<(), WarehouseError> {
        let mut state = self.state();
        Self::check(&state, FailOn::CreateTable)?;
        if !state.tables.contains_key(table) {
            debug!(table = %table, kind = ?kind, "Created table");
            state.tables.insert(table.clone(), MemoryTable::default());
        }
        Ok(())
    }

    async fn load_overwrite(
        &mut self,
        table: &TableRef,
        rows: &[PoiRecord],
    ) -> Result<u64, WarehouseError> {
        let mut state = self.state();
        Self::check(&state, FailOn::Load)?;
        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::MissingTable(table.clone()))?;
        entry.rows = rows.to_vec();
        debug!(table = %table, rows = rows.len(), "Loaded rows (overwrite)");
        Ok(rows.len() as u64)
    }

    async fn execute_merge(&mut self, merge: &MergeStatement) -> Result<u64, WarehouseError> {
        let mut state = self.state();
        Self::check(&state, FailOn::Merge)?;

        let staged = state
            .tables
            .get(&merge.source)
            .ok_or_else(|| WarehouseError::MissingTable(merge.source.clone()))?;
        let target = state
            .tables
            .get(&merge.target)
            .ok_or_else(|| WarehouseError::MissingTable(merge.target.clone()))?;

        let (rows, affected) = apply_merge(&target.rows, &staged.rows, merge)?;
        if let Some(entry) = state.tables.get_mut(&merge.target) {
            entry.rows = rows;
        }
        Ok(affected)
    }

    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), WarehouseError> {
        let mut state = self.state();
        Self::check(&state, FailOn::Drop)?;
        state.tables.remove(table);
        Ok(())
    }

    async fn try_lock(&mut self, key: i64) -> Result<bool, WarehouseError> {
        let mut state = self.state();
        let owner = *state.locks.entry(key).or_insert(self.session);
        Ok(owner == self.session)
    }

    async fn unlock(&mut self, key: i64) -> Result<(), WarehouseError> {
        let mut state = self.state();
        if state.locks.get(&key) == Some(&self.session) {
            state.locks.remove(&key);
        }
        Ok(())
    }
}
