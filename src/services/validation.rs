//! Value coercion and vehicle validation
//!
//! Coercion turns raw spreadsheet cells into typed values per the declared
//! column type. The vehicle preset adds the domain validators: Mercosul
//! plate format, model year range, and a strictly positive FIPE value.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use crate::spreadsheet::Row;
use crate::types::{ColumnType, FieldValue};

lazy_static! {
    static ref PLACA_PATTERN: Regex =
        Regex::new(r"^[A-Z]{3}[0-9][A-Z0-9][0-9]{2}$").expect("valid regex");
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Coerce a raw cell into the declared type.
///
/// Empty (after trimming) becomes `Null`; the required-field check decides
/// whether that fails the row.
pub fn coerce(raw: &str, column_type: ColumnType) -> Result<FieldValue, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(FieldValue::Null);
    }

    match column_type {
        ColumnType::String => Ok(FieldValue::Text(trimmed.to_string())),
        // FK lookup values stay textual until resolution
        ColumnType::Fk => Ok(FieldValue::Text(trimmed.to_string())),
        ColumnType::Int => parse_int(trimmed).map(FieldValue::Int),
        ColumnType::Float => clean_decimal(trimmed)
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|_| format!("'{}' não é um número válido", trimmed)),
        ColumnType::Decimal => Decimal::from_str_exact(&clean_decimal(trimmed))
            .map(FieldValue::Decimal)
            .map_err(|_| format!("'{}' não é um valor decimal válido", trimmed)),
        ColumnType::Date => parse_date(trimmed).map(FieldValue::Date),
        ColumnType::DateTime => parse_datetime(trimmed).map(FieldValue::DateTime),
        ColumnType::Boolean => parse_bool(trimmed).map(FieldValue::Bool),
    }
}

/// Integers also accept integral decimals ("123.0" is 123, "123.5" is not)
fn parse_int(raw: &str) -> Result<i64, String> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(f as i64),
        _ => Err(format!("'{}' não é um número inteiro válido", raw)),
    }
}

/// Strip currency markers and normalize comma/dot separators.
///
/// Handles "R$ 1.234,56", "1,234.56", "55000,5" and plain "55000.00".
fn clean_decimal(raw: &str) -> String {
    let cleaned: String = raw
        .replace("R$", "")
        .replace('$', "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            // The rightmost separator is the decimal point
            if comma > dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) => {
            if cleaned.matches(',').count() == 1 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) => {
            if cleaned.matches('.').count() == 1 {
                cleaned
            } else {
                cleaned.replace('.', "")
            }
        }
        (None, None) => cleaned,
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
    }
    // Datetime-shaped cells carry a date too
    parse_datetime(raw)
        .map(|dt| dt.date())
        .map_err(|_| format!("'{}' não é uma data válida", raw))
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.and_hms_opt(0, 0, 0).expect("midnight"));
        }
    }
    Err(format!("'{}' não é uma data/hora válida", raw))
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "sim" => Ok(true),
        "false" | "0" | "no" | "não" | "nao" => Ok(false),
        other => Err(format!("'{}' não é um valor booleano válido", other)),
    }
}

/// Mercosul plate format (also matches the pre-Mercosul ABC1234 shape)
pub fn placa_valida(placa: &str) -> bool {
    PLACA_PATTERN.is_match(placa)
}

/// Model year must fall within [1900, current year + 1]
pub fn ano_valido(ano: i32) -> bool {
    let current_year = Utc::now().year();
    (1900..=current_year + 1).contains(&ano)
}

/// FIPE values are strictly positive
pub fn valor_fipe_valido(valor: Decimal) -> bool {
    valor > Decimal::ZERO
}

/// A validated vehicle row, plate already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleData {
    pub modelo: String,
    pub placa: String,
    pub ano: i32,
    pub valor_fipe: Decimal,
}

/// Validate one source row against the vehicle preset.
///
/// Every problem is collected, not just the first, so the log line can list
/// the joined reasons for the whole row.
pub fn validate_vehicle(row: &Row) -> Result<VehicleData, Vec<String>> {
    let mut errors = Vec::new();

    let modelo = row.get("modelo").unwrap_or_default().trim().to_string();
    if modelo.is_empty() {
        errors.push("Campo 'modelo' é obrigatório".to_string());
    }

    let placa = row.get("placa").unwrap_or_default().trim().to_uppercase();
    if placa.is_empty() {
        errors.push("Campo 'placa' é obrigatório".to_string());
    } else if !placa_valida(&placa) {
        errors.push(format!("Placa '{}' inválida (formato esperado: ABC1D23)", placa));
    }

    let raw_ano = row.get("ano").unwrap_or_default().trim();
    let mut ano = 0i32;
    if raw_ano.is_empty() {
        errors.push("Campo 'ano' é obrigatório".to_string());
    } else {
        match parse_int(raw_ano) {
            Ok(parsed) if parsed >= i32::MIN as i64 && parsed <= i32::MAX as i64 => {
                ano = parsed as i32;
                if !ano_valido(ano) {
                    errors.push(format!(
                        "Ano '{}' inválido (deve estar entre 1900 e {})",
                        ano,
                        Utc::now().year() + 1
                    ));
                }
            }
            _ => errors.push(format!("Ano '{}' inválido (deve ser um número)", raw_ano)),
        }
    }

    let raw_valor = row.get("valor_fipe").unwrap_or_default().trim();
    let mut valor_fipe = Decimal::ZERO;
    if raw_valor.is_empty() {
        errors.push("Campo 'valor_fipe' é obrigatório".to_string());
    } else {
        match Decimal::from_str_exact(&clean_decimal(raw_valor)) {
            Ok(valor) => {
                valor_fipe = valor;
                if !valor_fipe_valido(valor) {
                    errors.push(format!(
                        "Valor FIPE '{}' inválido (deve ser maior que zero)",
                        valor
                    ));
                }
            }
            Err(_) => {
                errors.push(format!("Valor FIPE '{}' inválido (deve ser um número)", raw_valor));
            }
        }
    }

    if errors.is_empty() {
        Ok(VehicleData {
            modelo,
            placa,
            ano,
            valor_fipe,
        })
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn make_row(columns: &[&str], values: &[&str]) -> Row {
        Row::new(
            Arc::new(columns.iter().map(|c| c.to_string()).collect()),
            values.iter().map(|v| v.to_string()).collect(),
        )
    }

    fn vehicle_row(modelo: &str, placa: &str, ano: &str, valor: &str) -> Row {
        make_row(
            &["modelo", "placa", "ano", "valor_fipe"],
            &[modelo, placa, ano, valor],
        )
    }

    // ── coercion ──

    #[test]
    fn test_coerce_empty_is_null() {
        assert_eq!(coerce("  ", ColumnType::String).unwrap(), FieldValue::Null);
        assert_eq!(coerce("", ColumnType::Int).unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_coerce_string_trims() {
        assert_eq!(
            coerce("  Gol 1.0  ", ColumnType::String).unwrap(),
            FieldValue::Text("Gol 1.0".to_string())
        );
    }

    #[test]
    fn test_coerce_int_accepts_integral_decimal() {
        assert_eq!(coerce("123", ColumnType::Int).unwrap(), FieldValue::Int(123));
        assert_eq!(coerce("123.0", ColumnType::Int).unwrap(), FieldValue::Int(123));
        assert!(coerce("123.5", ColumnType::Int).is_err());
        assert!(coerce("abc", ColumnType::Int).is_err());
    }

    #[test]
    fn test_coerce_decimal_separators() {
        assert_eq!(
            coerce("55000.00", ColumnType::Decimal).unwrap(),
            FieldValue::Decimal(dec!(55000.00))
        );
        assert_eq!(
            coerce("55000,50", ColumnType::Decimal).unwrap(),
            FieldValue::Decimal(dec!(55000.50))
        );
        assert_eq!(
            coerce("R$ 1.234,56", ColumnType::Decimal).unwrap(),
            FieldValue::Decimal(dec!(1234.56))
        );
        assert_eq!(
            coerce("1,234.56", ColumnType::Decimal).unwrap(),
            FieldValue::Decimal(dec!(1234.56))
        );
        assert_eq!(
            coerce("1.234.567", ColumnType::Decimal).unwrap(),
            FieldValue::Decimal(dec!(1234567))
        );
    }

    #[test]
    fn test_coerce_date_formats() {
        let expected = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(coerce("2024-03-15", ColumnType::Date).unwrap(), expected);
        assert_eq!(coerce("15/03/2024", ColumnType::Date).unwrap(), expected);
        assert_eq!(coerce("15-03-2024", ColumnType::Date).unwrap(), expected);
        assert_eq!(coerce("15.03.2024", ColumnType::Date).unwrap(), expected);
        assert!(coerce("2024-13-40", ColumnType::Date).is_err());
    }

    #[test]
    fn test_coerce_datetime_formats() {
        let expected = FieldValue::DateTime(
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
        );
        assert_eq!(
            coerce("2024-03-15 10:30:00", ColumnType::DateTime).unwrap(),
            expected
        );
        assert_eq!(
            coerce("2024-03-15T10:30:00", ColumnType::DateTime).unwrap(),
            expected
        );
        assert_eq!(
            coerce("15/03/2024 10:30", ColumnType::DateTime).unwrap(),
            expected
        );
    }

    #[test]
    fn test_coerce_date_only_datetime_is_midnight() {
        let value = coerce("2024-03-15", ColumnType::DateTime).unwrap();
        assert_eq!(
            value,
            FieldValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 3, 15)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_coerce_boolean_variants() {
        for truthy in ["true", "TRUE", "1", "yes", "Sim"] {
            assert_eq!(
                coerce(truthy, ColumnType::Boolean).unwrap(),
                FieldValue::Bool(true),
                "{}",
                truthy
            );
        }
        for falsy in ["false", "0", "no", "Não", "nao"] {
            assert_eq!(
                coerce(falsy, ColumnType::Boolean).unwrap(),
                FieldValue::Bool(false),
                "{}",
                falsy
            );
        }
        assert!(coerce("talvez", ColumnType::Boolean).is_err());
    }

    // ── validators ──

    #[test]
    fn test_placa_mercosul_and_old_format() {
        assert!(placa_valida("ABC1D23"));
        assert!(placa_valida("ABC1234"));
        assert!(!placa_valida("AB12345"));
        assert!(!placa_valida("abc1d23"));
        assert!(!placa_valida(""));
    }

    #[test]
    fn test_ano_range() {
        let next_year = Utc::now().year() + 1;
        assert!(ano_valido(1900));
        assert!(ano_valido(next_year));
        assert!(!ano_valido(1899));
        assert!(!ano_valido(next_year + 1));
    }

    #[test]
    fn test_valor_fipe_positive() {
        assert!(valor_fipe_valido(dec!(0.01)));
        assert!(!valor_fipe_valido(Decimal::ZERO));
        assert!(!valor_fipe_valido(dec!(-5)));
    }

    // ── vehicle row validation ──

    #[test]
    fn test_valid_vehicle_normalizes_placa() {
        let row = vehicle_row("Gol", "abc1d23", "2020", "55000.00");
        let vehicle = validate_vehicle(&row).unwrap();
        assert_eq!(vehicle.placa, "ABC1D23");
        assert_eq!(vehicle.modelo, "Gol");
        assert_eq!(vehicle.ano, 2020);
        assert_eq!(vehicle.valor_fipe, dec!(55000.00));
    }

    #[test]
    fn test_missing_modelo_is_the_only_error() {
        let row = vehicle_row("", "ABC1D23", "2020", "55000");
        let errors = validate_vehicle(&row).unwrap_err();
        assert_eq!(errors, vec!["Campo 'modelo' é obrigatório".to_string()]);
    }

    #[test]
    fn test_missing_field_does_not_mask_other_errors() {
        // Missing modelo, valid plate format, year out of range, negative value
        let row = vehicle_row("", "ZZZ9Z99", "1800", "-5");
        let errors = validate_vehicle(&row).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("'modelo' é obrigatório"));
        assert!(errors[1].contains("Ano"));
        assert!(errors[2].contains("maior que zero"));
    }

    #[test]
    fn test_invalid_row_collects_all_reasons() {
        let row = vehicle_row("Uno", "ZZZ9Z9", "1800", "-5");
        let errors = validate_vehicle(&row).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("Placa"));
        assert!(errors[1].contains("Ano"));
        assert!(errors[2].contains("Valor FIPE"));
    }

    #[test]
    fn test_vehicle_missing_column_entirely() {
        let row = make_row(&["modelo", "placa"], &["Gol", "ABC1D23"]);
        let errors = validate_vehicle(&row).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'ano'")));
        assert!(errors.iter().any(|e| e.contains("'valor_fipe'")));
    }

    #[test]
    fn test_vehicle_year_not_a_number() {
        let row = vehicle_row("Gol", "ABC1D23", "dois mil", "55000");
        let errors = validate_vehicle(&row).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("deve ser um número")));
    }
}
