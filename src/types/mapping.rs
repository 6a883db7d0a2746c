//! Mapping configuration for spreadsheet-to-table imports
//!
//! The caller describes how source columns become target columns; the row
//! processor interprets this per row. Unknown JSON fields (display names,
//! icons) are ignored so templates persisted with richer shapes still load.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex");
}

/// Schemas a qualified target table may live in
const ALLOWED_SCHEMAS: &[&str] = &["public"];

/// Declared type of a mapped column, selecting its coercion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Decimal,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Boolean,
    Fk,
}

impl ColumnType {
    /// SQL column type used when provisioning the target table
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Int => "INTEGER",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Decimal => "NUMERIC(12, 2)",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Fk => "UUID",
        }
    }
}

/// What to do when a foreign-key lookup finds no row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMissing {
    Create,
    Ignore,
    Error,
}

impl Default for OnMissing {
    fn default() -> Self {
        OnMissing::Error
    }
}

/// Foreign-key resolution policy for an `fk` column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkConfig {
    pub table: String,
    pub lookup_column: String,
    #[serde(default)]
    pub on_missing: OnMissing,
}

/// One source-column-to-db-column mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub db_column: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    /// Marks this column as a duplicate-detection key
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk: Option<FkConfig>,
}

/// Complete mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub target_table: String,
    #[serde(default)]
    pub create_table: bool,
    pub columns: Vec<ColumnMapping>,
}

impl MappingConfig {
    /// Validate the configuration; returns every problem found.
    ///
    /// Table and column names are restricted to plain identifiers (one
    /// optional schema qualifier from the allow-list) so they can be spliced
    /// into runtime SQL safely.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_valid_table_name(&self.target_table) {
            errors.push(format!("Invalid target_table name: {}", self.target_table));
        }

        if self.columns.is_empty() {
            errors.push("At least one column mapping is required".to_string());
        }

        let mut seen_db_columns = std::collections::HashSet::new();
        for (idx, col) in self.columns.iter().enumerate() {
            if col.source_column.trim().is_empty() {
                errors.push(format!("Column {}: source_column is required", idx));
            }

            if !is_valid_column_name(&col.db_column) {
                errors.push(format!("Column {}: invalid db_column name: {}", idx, col.db_column));
            } else if !seen_db_columns.insert(col.db_column.as_str()) {
                errors.push(format!("Column {}: duplicate db_column: {}", idx, col.db_column));
            }

            match (&col.column_type, &col.fk) {
                (ColumnType::Fk, None) => {
                    errors.push(format!("Column {}: fk config is required when type is 'fk'", idx));
                }
                (ColumnType::Fk, Some(fk)) => {
                    if !is_valid_table_name(&fk.table) {
                        errors.push(format!("Column {}: invalid fk.table name: {}", idx, fk.table));
                    }
                    if !is_valid_column_name(&fk.lookup_column) {
                        errors.push(format!(
                            "Column {}: invalid fk.lookup_column name: {}",
                            idx, fk.lookup_column
                        ));
                    }
                }
                (_, Some(_)) => {
                    errors.push(format!("Column {}: fk config can only be set when type is 'fk'", idx));
                }
                (_, None) => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Columns designated as uniqueness keys
    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns.iter().filter(|c| c.unique)
    }

    /// Source columns that must be present in the header
    pub fn required_source_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.required)
            .map(|c| c.source_column.clone())
            .collect()
    }
}

/// A persisted, reusable mapping configuration
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ImportTemplate {
    pub id: uuid::Uuid,
    pub name: String,
    pub target_table: String,
    pub create_table: bool,
    pub mapping_config: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Validate a table name, optionally schema-qualified
pub fn is_valid_table_name(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }

    let parts: Vec<&str> = name.split('.').collect();
    match parts.as_slice() {
        [table] => IDENTIFIER.is_match(table),
        [schema, table] => ALLOWED_SCHEMAS.contains(schema) && IDENTIFIER.is_match(table),
        _ => false,
    }
}

/// Validate a bare column name
pub fn is_valid_column_name(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mapping() -> MappingConfig {
        serde_json::from_value(serde_json::json!({
            "target_table": "assets",
            "create_table": true,
            "columns": [
                {"source_column": "Nome", "db_column": "nome", "type": "string", "required": true, "unique": true},
                {"source_column": "Valor", "db_column": "valor", "type": "decimal"},
                {"source_column": "Dono", "db_column": "owner_id", "type": "fk",
                 "fk": {"table": "owners", "lookup_column": "email", "on_missing": "create"}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_mapping_passes() {
        assert!(sample_mapping().validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let config: MappingConfig = serde_json::from_value(serde_json::json!({
            "target_table": "assets",
            "entity_display_name": "Assets",
            "description": "imported assets",
            "icon": "box",
            "columns": [
                {"source_column": "a", "db_column": "a", "type": "string"}
            ]
        }))
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let mut config = sample_mapping();
        config.target_table = "assets; DROP TABLE jobs".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("target_table")));
    }

    #[test]
    fn test_rejects_unlisted_schema() {
        assert!(is_valid_table_name("public.assets"));
        assert!(!is_valid_table_name("pg_catalog.pg_tables"));
        assert!(!is_valid_table_name("a.b.c"));
    }

    #[test]
    fn test_rejects_duplicate_db_column() {
        let mut config = sample_mapping();
        config.columns[1].db_column = "nome".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate db_column")));
    }

    #[test]
    fn test_rejects_empty_columns() {
        let mut config = sample_mapping();
        config.columns.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fk_requires_config() {
        let mut config = sample_mapping();
        config.columns[2].fk = None;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("fk config is required")));
    }

    #[test]
    fn test_fk_config_only_on_fk_type() {
        let mut config = sample_mapping();
        let fk = config.columns[2].fk.clone();
        config.columns[0].fk = fk;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("only be set when type is 'fk'")));
    }

    #[test]
    fn test_unique_columns_and_required_headers() {
        let config = sample_mapping();
        let unique: Vec<&str> = config.unique_columns().map(|c| c.db_column.as_str()).collect();
        assert_eq!(unique, vec!["nome"]);
        assert_eq!(config.required_source_columns(), vec!["Nome".to_string()]);
    }

    #[test]
    fn test_on_missing_defaults_to_error() {
        let fk: FkConfig = serde_json::from_value(serde_json::json!({
            "table": "owners",
            "lookup_column": "email"
        }))
        .unwrap();
        assert_eq!(fk.on_missing, OnMissing::Error);
    }

    #[test]
    fn test_datetime_type_name() {
        let col: ColumnMapping = serde_json::from_value(serde_json::json!({
            "source_column": "quando", "db_column": "quando", "type": "datetime"
        }))
        .unwrap();
        assert_eq!(col.column_type, ColumnType::DateTime);
        assert_eq!(col.column_type.sql_type(), "TIMESTAMP");
    }
}
