//! Per-row decision logic
//!
//! Pure functions: the accept/reject/duplicate outcome for a row is decided
//! from the row itself plus already-resolved context (foreign-key lookups,
//! existing-key sets) passed as plain arguments. The processor performs the
//! database round-trips and feeds the results in here.

use std::collections::{HashMap, HashSet};

use crate::db::queries::target::FkOutcome;
use crate::services::validation::{self, VehicleData};
use crate::spreadsheet::Row;
use crate::types::{ColumnType, FieldValue, MappingConfig};

/// Outcome of planning one source row
#[derive(Debug, Clone, PartialEq)]
pub enum RowPlan<T> {
    /// Row passed every check; carries the values to insert
    Insert(T),
    /// Row duplicates an existing or already-seen key (warning message)
    Duplicate(String),
    /// Row failed validation; every reason found
    Invalid(Vec<String>),
}

/// Plan one row of the vehicle preset.
///
/// `existing` holds plates already in the target table, `seen` plates
/// accepted earlier in this chunk. The caller registers accepted plates in
/// `seen` itself.
pub fn plan_vehicle_row(
    row: &Row,
    existing: &HashSet<String>,
    seen: &HashSet<String>,
) -> RowPlan<VehicleData> {
    match validation::validate_vehicle(row) {
        Ok(vehicle) => {
            if existing.contains(&vehicle.placa) || seen.contains(&vehicle.placa) {
                RowPlan::Duplicate(format!("Placa '{}' duplicada", vehicle.placa))
            } else {
                RowPlan::Insert(vehicle)
            }
        }
        Err(reasons) => RowPlan::Invalid(reasons),
    }
}

/// Foreign-key lookups a mapped row needs before it can be planned.
///
/// Returns `(column index, lookup value)` for every non-empty fk cell.
pub fn fk_lookups(row: &Row, mapping: &MappingConfig) -> Vec<(usize, String)> {
    mapping
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| col.column_type == ColumnType::Fk)
        .filter_map(|(idx, col)| {
            let raw = row.get(&col.source_column).unwrap_or("");
            match validation::coerce(raw, col.column_type) {
                Ok(FieldValue::Text(lookup)) => Some((idx, lookup)),
                _ => None,
            }
        })
        .collect()
}

/// Plan one row of the mapped path.
///
/// `fk_outcomes` carries the resolved lookup per fk column index (from
/// [`fk_lookups`]); `existing` and `seen` hold the duplicate keys per unique
/// db column. Accepted rows are registered into `seen` via
/// [`register_keys`] by the caller.
pub fn plan_mapped_row(
    row: &Row,
    mapping: &MappingConfig,
    fk_outcomes: &HashMap<usize, FkOutcome>,
    existing: &HashMap<String, HashSet<String>>,
    seen: &HashMap<String, HashSet<String>>,
) -> RowPlan<Vec<FieldValue>> {
    let mut reasons: Vec<String> = Vec::new();
    let mut values: Vec<FieldValue> = Vec::with_capacity(mapping.columns.len());

    for (idx, col) in mapping.columns.iter().enumerate() {
        let raw = row.get(&col.source_column).unwrap_or("");
        let mut value = match validation::coerce(raw, col.column_type) {
            Ok(value) => value,
            Err(e) => {
                reasons.push(format!("Coluna '{}': {}", col.db_column, e));
                FieldValue::Null
            }
        };

        if let (ColumnType::Fk, Some(fk)) = (col.column_type, col.fk.as_ref()) {
            if let FieldValue::Text(lookup) = value.clone() {
                match fk_outcomes.get(&idx) {
                    Some(FkOutcome::Resolved(id)) => value = FieldValue::Uuid(*id),
                    Some(FkOutcome::Ignored) | None => value = FieldValue::Null,
                    Some(FkOutcome::Missing) => {
                        reasons.push(format!(
                            "Referência não encontrada: {}.{} = '{}'",
                            fk.table, fk.lookup_column, lookup
                        ));
                    }
                }
            }
        }

        if col.required && value.is_null() {
            reasons.push(format!("Campo '{}' é obrigatório", col.source_column));
        }
        values.push(value);
    }

    if !reasons.is_empty() {
        return RowPlan::Invalid(reasons);
    }

    for (idx, col) in mapping.columns.iter().enumerate().filter(|(_, c)| c.unique) {
        if let Some(key) = values[idx].key_string() {
            let in_db = existing.get(&col.db_column).is_some_and(|s| s.contains(&key));
            let in_chunk = seen.get(&col.db_column).is_some_and(|s| s.contains(&key));
            if in_db || in_chunk {
                return RowPlan::Duplicate(format!(
                    "Valor '{}' duplicado em '{}'",
                    key, col.db_column
                ));
            }
        }
    }

    RowPlan::Insert(values)
}

/// Record an accepted row's unique keys into the per-column seen sets
pub fn register_keys(
    mapping: &MappingConfig,
    values: &[FieldValue],
    seen: &mut HashMap<String, HashSet<String>>,
) {
    for (idx, col) in mapping.columns.iter().enumerate().filter(|(_, c)| c.unique) {
        if let Some(key) = values[idx].key_string() {
            if let Some(keys) = seen.get_mut(&col.db_column) {
                keys.insert(key);
            }
        }
    }
}
