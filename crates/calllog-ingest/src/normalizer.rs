//! Record normalization
//!
//! Turns a [`RawBatch`] of text fields into a [`NormalizedBatch`] with
//! canonical column names and typed values. Every step is skipped when its
//! input column is absent, and every coercion failure becomes
//! [`Value::Null`] rather than an error: no row is ever dropped here.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{NormalizedBatch, RawBatch, Value};

pub const DATE_COLUMN: &str = "date_appel";
pub const TIME_COLUMN: &str = "heure_appel";
pub const WEEK_COLUMN: &str = "semaine";
pub const TIMESTAMP_COLUMN: &str = "datetime_appel";
pub const PHONE_COLUMN: &str = "numero_telephone";
pub const CLEAN_PHONE_COLUMN: &str = "numero_telephone_clean";

/// Columns coerced to integers
pub const NUMERIC_COLUMNS: [&str; 6] = [
    "duree_prise_en_charge",
    "duree_post_travail_agent",
    "duree_appel",
    "indice",
    "raccrochage",
    "numero_court",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M"];

/// Canonical form of a header name
///
/// Trim, lowercase, map spaces and hyphens to `_`, then drop anything
/// outside `[0-9a-z_]`.
pub fn canonicalize_column(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || *c == '_')
        .collect()
}

/// Digits of a phone number, or `None` when there are none
pub fn normalize_phone(raw: Option<&str>) -> Option<String> {
    let digits: String = raw?.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Parse a call date; a trailing time part is ignored
///
/// Slash and dash dates with the year last are read day first.
pub fn parse_call_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw
        .trim()
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()?;

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Call timestamp from a parsed date and the raw time of day
///
/// A missing or blank time means midnight; an unparseable one gives `None`.
pub fn compose_timestamp(date: NaiveDate, time: Option<&str>) -> Option<NaiveDateTime> {
    let time = time.map(str::trim).unwrap_or("");
    if time.is_empty() {
        return date.and_hms_opt(0, 0, 0);
    }

    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())
        .map(|t| date.and_time(t))
}

/// Integral text (`"42"`) or integral decimal (`"42.0"`)
pub fn coerce_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n);
    }

    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Canonical, non-empty and distinct names for a header
///
/// A header that canonicalizes to nothing becomes `unnamed_{position}`; a
/// repeated name gets `_2`, `_3`, ... in file order.
pub fn unique_columns(header: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(header.len());

    for (i, raw) in header.iter().enumerate() {
        let mut base = canonicalize_column(raw);
        if base.is_empty() {
            base = format!("unnamed_{i}");
        }

        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        names.push(name);
    }

    names
}

/// SQL type used when provisioning the destination table
pub fn column_sql_type(column: &str) -> &'static str {
    match column {
        DATE_COLUMN => "DATE",
        TIMESTAMP_COLUMN => "TIMESTAMP",
        WEEK_COLUMN => "BIGINT",
        c if NUMERIC_COLUMNS.contains(&c) => "BIGINT",
        _ => "TEXT",
    }
}

/// Normalize one batch
pub fn normalize(batch: &RawBatch) -> NormalizedBatch {
    let mut columns = unique_columns(&batch.columns);

    let mut rows: Vec<Vec<Value>> = batch
        .rows
        .iter()
        .map(|row| row.iter().map(|field| text_value(field.as_deref())).collect())
        .collect();

    if let Some(date_idx) = position(&columns, DATE_COLUMN) {
        let dates: Vec<Option<NaiveDate>> = rows
            .iter()
            .map(|row| row[date_idx].as_text().and_then(parse_call_date))
            .collect();

        let weeks = dates
            .iter()
            .map(|d| d.map_or(Value::Null, |d| Value::Integer(i64::from(d.iso_week().week()))))
            .collect();

        if let Some(time_idx) = position(&columns, TIME_COLUMN) {
            let stamps = rows
                .iter()
                .zip(&dates)
                .map(|(row, date)| {
                    date.and_then(|d| compose_timestamp(d, row[time_idx].as_text()))
                        .map_or(Value::Null, Value::Timestamp)
                })
                .collect();
            set_column(&mut columns, &mut rows, TIMESTAMP_COLUMN, stamps);
        }

        for (row, date) in rows.iter_mut().zip(&dates) {
            row[date_idx] = date.map_or(Value::Null, Value::Date);
        }
        set_column(&mut columns, &mut rows, WEEK_COLUMN, weeks);
    }

    for numeric in NUMERIC_COLUMNS {
        if let Some(idx) = position(&columns, numeric) {
            for row in rows.iter_mut() {
                row[idx] = row[idx]
                    .as_text()
                    .and_then(coerce_integer)
                    .map_or(Value::Null, Value::Integer);
            }
        }
    }

    if let Some(phone_idx) = position(&columns, PHONE_COLUMN) {
        let cleaned = rows
            .iter()
            .map(|row| normalize_phone(row[phone_idx].as_text()).map_or(Value::Null, Value::Text))
            .collect();
        set_column(&mut columns, &mut rows, CLEAN_PHONE_COLUMN, cleaned);
    }

    NormalizedBatch {
        index: batch.index,
        columns,
        rows,
    }
}

fn text_value(field: Option<&str>) -> Value {
    match field.map(str::trim) {
        Some(s) if !s.is_empty() => Value::Text(s.to_string()),
        _ => Value::Null,
    }
}

fn position(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c == name)
}

/// Replace `name` if the batch already carries it, append it otherwise
fn set_column(columns: &mut Vec<String>, rows: &mut [Vec<Value>], name: &str, values: Vec<Value>) {
    match position(columns, name) {
        Some(idx) => {
            for (row, value) in rows.iter_mut().zip(values) {
                row[idx] = value;
            }
        },
        None => {
            columns.push(name.to_string());
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(columns: &[&str], rows: &[&[Option<&str>]]) -> RawBatch {
        RawBatch {
            index: 0,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|f| f.map(str::to_string)).collect())
                .collect(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_canonicalize_column() {
        assert_eq!(canonicalize_column(" Date Appel "), "date_appel");
        assert_eq!(canonicalize_column("Durée-Appel"), "dure_appel");
        assert_eq!(canonicalize_column("Date Appel-2 "), "date_appel_2");
        assert_eq!(canonicalize_column("N° court"), "n_court");
        assert_eq!(canonicalize_column("numero_telephone"), "numero_telephone");
    }

    #[test]
    fn test_blank_and_symbol_headers_named_by_position() {
        let header: Vec<String> = ["Date Appel", "Agent", "", "N°", "°"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            unique_columns(&header),
            vec!["date_appel", "agent", "unnamed_2", "n", "unnamed_4"]
        );
    }

    #[test]
    fn test_colliding_headers_suffixed() {
        let header: Vec<String> = ["Durée", "Duree", "dure", "dure_2", "Agent"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            unique_columns(&header),
            vec!["dure", "duree", "dure_2", "dure_2_2", "agent"]
        );
    }

    #[test]
    fn test_normalize_never_emits_empty_or_duplicate_columns() {
        let batch = raw(
            &["Date Appel", "Agent", "", "N°", "°", "agent"],
            &[&[Some("2024-03-05"), Some("Martin"), Some("x"), Some("1"), None, Some("Durand")]],
        );
        let out = normalize(&batch);

        assert_eq!(
            out.columns,
            vec!["date_appel", "agent", "unnamed_2", "n", "unnamed_4", "agent_2", "semaine"]
        );
        assert_eq!(out.get(0, "unnamed_2"), Some(&Value::Text("x".into())));
        assert_eq!(out.get(0, "agent_2"), Some(&Value::Text("Durand".into())));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone(Some("01-23 45.67.89")).as_deref(), Some("0123456789"));
        assert_eq!(normalize_phone(Some("+33 (0)1 23")).as_deref(), Some("330123"));
        assert_eq!(normalize_phone(Some("anonyme")), None);
        assert_eq!(normalize_phone(Some("")), None);
        assert_eq!(normalize_phone(None), None);
    }

    #[test]
    fn test_parse_call_date_formats() {
        assert_eq!(parse_call_date("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("2024/03/05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("05/03/2024"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("05-03-2024"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("2024-03-05 08:15:00"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("2024-03-05T08:15:00"), Some(date(2024, 3, 5)));
        assert_eq!(parse_call_date("not a date"), None);
        assert_eq!(parse_call_date("2024-13-45"), None);
        assert_eq!(parse_call_date(""), None);
    }

    #[test]
    fn test_compose_timestamp() {
        let d = date(2024, 3, 5);
        let at = |h, m, s| d.and_hms_opt(h, m, s).unwrap();

        assert_eq!(compose_timestamp(d, Some("08:15:30")), Some(at(8, 15, 30)));
        assert_eq!(compose_timestamp(d, Some("08:15")), Some(at(8, 15, 0)));
        assert_eq!(
            compose_timestamp(d, Some("08:15:30.250")),
            Some(d.and_hms_milli_opt(8, 15, 30, 250).unwrap())
        );
        assert_eq!(compose_timestamp(d, None), Some(at(0, 0, 0)));
        assert_eq!(compose_timestamp(d, Some("  ")), Some(at(0, 0, 0)));
        assert_eq!(compose_timestamp(d, Some("midi")), None);
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(coerce_integer("42"), Some(42));
        assert_eq!(coerce_integer(" -7 "), Some(-7));
        assert_eq!(coerce_integer("12.0"), Some(12));
        assert_eq!(coerce_integer("12.5"), None);
        assert_eq!(coerce_integer("abc"), None);
        assert_eq!(coerce_integer("NaN"), None);
        assert_eq!(coerce_integer("inf"), None);
    }

    #[test]
    fn test_column_sql_type() {
        assert_eq!(column_sql_type("date_appel"), "DATE");
        assert_eq!(column_sql_type("datetime_appel"), "TIMESTAMP");
        assert_eq!(column_sql_type("semaine"), "BIGINT");
        assert_eq!(column_sql_type("duree_appel"), "BIGINT");
        assert_eq!(column_sql_type("numero_telephone_clean"), "TEXT");
    }

    #[test]
    fn test_normalize_full_row() {
        let batch = raw(
            &["Date Appel", "Heure Appel", "Duree Appel", "Numero Telephone", "Agent"],
            &[&[
                Some("2024-03-05"),
                Some("08:15:30"),
                Some("125"),
                Some("01 23 45 67 89"),
                Some("  Martin  "),
            ]],
        );

        let out = normalize(&batch);
        assert_eq!(
            out.columns,
            vec![
                "date_appel",
                "heure_appel",
                "duree_appel",
                "numero_telephone",
                "agent",
                "datetime_appel",
                "semaine",
                "numero_telephone_clean",
            ]
        );

        assert_eq!(out.get(0, "date_appel"), Some(&Value::Date(date(2024, 3, 5))));
        assert_eq!(out.get(0, "semaine"), Some(&Value::Integer(10)));
        assert_eq!(
            out.get(0, "datetime_appel"),
            Some(&Value::Timestamp(date(2024, 3, 5).and_hms_opt(8, 15, 30).unwrap()))
        );
        assert_eq!(out.get(0, "duree_appel"), Some(&Value::Integer(125)));
        assert_eq!(out.get(0, "numero_telephone"), Some(&Value::Text("01 23 45 67 89".into())));
        assert_eq!(out.get(0, "numero_telephone_clean"), Some(&Value::Text("0123456789".into())));
        assert_eq!(out.get(0, "agent"), Some(&Value::Text("Martin".into())));
    }

    #[test]
    fn test_bad_values_become_null_without_dropping_rows() {
        let batch = raw(
            &["date_appel", "heure_appel", "duree_appel"],
            &[
                &[Some("garbage"), Some("08:00"), Some("abc")],
                &[Some("2024-01-01"), None, Some("   ")],
            ],
        );

        let out = normalize(&batch);
        assert_eq!(out.len(), 2);

        assert_eq!(out.get(0, "date_appel"), Some(&Value::Null));
        assert_eq!(out.get(0, "semaine"), Some(&Value::Null));
        assert_eq!(out.get(0, "datetime_appel"), Some(&Value::Null));
        assert_eq!(out.get(0, "duree_appel"), Some(&Value::Null));

        assert_eq!(out.get(1, "semaine"), Some(&Value::Integer(1)));
        assert_eq!(
            out.get(1, "datetime_appel"),
            Some(&Value::Timestamp(date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap()))
        );
        assert_eq!(out.get(1, "duree_appel"), Some(&Value::Null));
    }

    #[test]
    fn test_absent_columns_skip_their_steps() {
        let batch = raw(&["agent", "file"], &[&[Some("x"), Some("")]]);
        let out = normalize(&batch);

        assert_eq!(out.columns, vec!["agent", "file"]);
        assert_eq!(out.rows[0], vec![Value::Text("x".into()), Value::Null]);
    }

    #[test]
    fn test_no_timestamp_without_time_column() {
        let batch = raw(&["date_appel"], &[&[Some("05/03/2024")]]);
        let out = normalize(&batch);

        assert_eq!(out.columns, vec!["date_appel", "semaine"]);
        assert_eq!(out.column_index("datetime_appel"), None);
    }

    #[test]
    fn test_existing_derived_column_replaced() {
        let batch = raw(&["date_appel", "Semaine"], &[&[Some("2024-03-05"), Some("99")]]);
        let out = normalize(&batch);

        assert_eq!(out.columns, vec!["date_appel", "semaine"]);
        assert_eq!(out.get(0, "semaine"), Some(&Value::Integer(10)));
    }

    proptest! {
        #[test]
        fn canonicalize_is_idempotent(name in "\\PC{0,40}") {
            let once = canonicalize_column(&name);
            prop_assert_eq!(canonicalize_column(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == '_'));
        }

        #[test]
        fn phone_keeps_only_digits(raw in ".{0,30}") {
            if let Some(clean) = normalize_phone(Some(&raw)) {
                prop_assert!(!clean.is_empty());
                prop_assert!(clean.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }
}
