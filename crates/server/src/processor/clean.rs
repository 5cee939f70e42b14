//! Row normalization: key/value cleaning, de-duplication, column ordering.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use falcon_core::Row;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Number, Value};

static RE_NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Preferred column positions. Lower sorts first; unknown columns go last.
const COLUMN_PRIORITIES: &[(&str, u32)] = &[
    ("name", 0),
    ("first_name", 1),
    ("last_name", 2),
    ("full_name", 3),
    ("family_name", 4),
    ("title", 10),
    ("role", 11),
    ("position", 12),
    ("job_title", 13),
    ("company", 20),
    ("organization", 21),
    ("affiliation", 22),
    ("employer", 23),
    ("department", 24),
    ("email", 30),
    ("phone", 31),
    ("mobile", 32),
    ("telephone", 33),
    ("linkedin", 40),
    ("twitter", 41),
    ("x_twitter", 42),
    ("github", 43),
    ("website", 44),
    ("personal_website", 45),
    ("instagram", 46),
    ("facebook", 47),
    ("youtube", 48),
    ("tiktok", 49),
    ("location", 60),
    ("address", 61),
    ("city", 62),
    ("state", 63),
    ("country", 64),
    ("description", 70),
    ("bio", 71),
    ("summary", 72),
    ("about", 73),
    ("price", 80),
    ("cost", 81),
    ("value", 82),
    ("availability", 83),
    ("status", 84),
    ("category", 85),
    ("brand", 86),
    ("date", 90),
    ("created_at", 91),
    ("updated_at", 92),
    ("published", 93),
    ("url", 100),
    ("link", 101),
    ("source", 102),
    ("id", 110),
    ("uuid", 111),
    ("index", 112),
];

const UNKNOWN_PRIORITY: u32 = 2_000;

/// Cleaned rows plus their column order and summary statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total_rows: usize,
    pub total_columns: usize,
    pub column_statistics: IndexMap<String, ColumnStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub non_null_count: usize,
    pub null_count: usize,
    pub data_types: Vec<&'static str>,
    pub unique_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_values: Option<Vec<String>>,
}

/// Clean `rows` into a table with a stable column order.
pub fn build_table(rows: Vec<Row>) -> Table {
    let cleaned: Vec<Row> = rows
        .into_iter()
        .map(clean_row)
        .filter(|row| !row.is_empty())
        .collect();
    let unique = dedupe(cleaned);
    let columns = order_columns(&unique);
    let rows: Vec<Row> = unique
        .into_iter()
        .map(|row| align(row, &columns))
        .collect();
    let summary = summarize(&rows, &columns);
    Table { rows, columns, summary }
}

fn clean_row(row: Row) -> Row {
    row.into_iter()
        .map(|(k, v)| (clean_key(&k), clean_value(v)))
        .collect()
}

/// Lowercase snake_case field name, never empty and never digit-first.
pub fn clean_key(key: &str) -> String {
    let lowered = key.to_lowercase();
    let clean = RE_NON_ALNUM.replace_all(&lowered, "_");
    let clean = clean.trim_matches('_');
    if clean.is_empty() {
        "unknown_field".to_string()
    } else if clean.starts_with(|c: char| c.is_ascii_digit()) {
        format!("field_{clean}")
    } else {
        clean.to_string()
    }
}

pub fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let collapsed = RE_WHITESPACE.replace_all(s.trim(), " ");
            if collapsed.is_empty() {
                Value::Null
            } else {
                auto_convert(&collapsed)
            }
        }
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other,
    }
}

/// Recognize integers, floats, booleans and null words in scraped text.
fn auto_convert(s: &str) -> Value {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" => Value::Bool(true),
        "false" | "no" | "off" => Value::Bool(false),
        "null" | "none" | "n/a" | "na" => Value::Null,
        _ => Value::String(s.to_string()),
    }
}

fn dedupe(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    let total = rows.len();
    let unique: Vec<Row> = rows
        .into_iter()
        .filter(|row| {
            let sorted: BTreeMap<&String, &Value> = row.iter().collect();
            seen.insert(serde_json::to_string(&sorted).unwrap_or_default())
        })
        .collect();
    if unique.len() < total {
        tracing::info!(removed = total - unique.len(), "removed duplicate rows");
    }
    unique
}

/// Priority doubled so partial matches can sit half a step behind exact ones.
fn priority(column: &str) -> u32 {
    if let Some((_, p)) = COLUMN_PRIORITIES.iter().find(|(name, _)| *name == column) {
        return p * 2;
    }
    COLUMN_PRIORITIES
        .iter()
        .find(|(name, _)| column.contains(name))
        .map_or(UNKNOWN_PRIORITY, |(_, p)| p * 2 + 1)
}

pub fn order_columns(rows: &[Row]) -> Vec<String> {
    let all: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();
    let mut columns: Vec<String> = all.into_iter().cloned().collect();
    columns.sort_by_cached_key(|c| (priority(c), c.to_lowercase()));
    columns
}

fn align(mut row: Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), row.remove(c).unwrap_or(Value::Null)))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

fn summarize(rows: &[Row], columns: &[String]) -> Summary {
    let mut column_statistics = IndexMap::new();
    for column in columns {
        let values: Vec<&Value> = rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter(|v| !v.is_null())
            .collect();
        let types: BTreeSet<&'static str> = values.iter().map(|v| type_name(v)).collect();
        let unique: BTreeSet<String> = values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        column_statistics.insert(
            column.clone(),
            ColumnStats {
                non_null_count: values.len(),
                null_count: rows.len() - values.len(),
                data_types: types.into_iter().collect(),
                unique_count: unique.len(),
                unique_values: (!unique.is_empty() && unique.len() <= 10)
                    .then(|| unique.into_iter().collect()),
            },
        );
    }
    Summary {
        total_rows: rows.len(),
        total_columns: columns.len(),
        column_statistics,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_clean_key() {
        assert_eq!(clean_key("Full Name"), "full_name");
        assert_eq!(clean_key("  E-mail Address!! "), "e_mail_address");
        assert_eq!(clean_key("2024 Revenue"), "field_2024_revenue");
        assert_eq!(clean_key("***"), "unknown_field");
    }

    #[test]
    fn test_clean_value_conversions() {
        assert_eq!(clean_value(json!("  42 ")), json!(42));
        assert_eq!(clean_value(json!("-7")), json!(-7));
        assert_eq!(clean_value(json!("19.99")), json!(19.99));
        assert_eq!(clean_value(json!("Yes")), json!(true));
        assert_eq!(clean_value(json!("off")), json!(false));
        assert_eq!(clean_value(json!("N/A")), Value::Null);
        assert_eq!(clean_value(json!("   ")), Value::Null);
        assert_eq!(clean_value(json!("Acme   Corp\n Ltd")), json!("Acme Corp Ltd"));
        assert_eq!(clean_value(json!(["a", "b"])), json!("[\"a\",\"b\"]"));
        assert_eq!(clean_value(json!(3)), json!(3));
    }

    #[test]
    fn test_priority_ordering() {
        let rows = vec![row(json!({
            "zeta": 1, "email": "a@b.io", "price": 3, "name": "A", "company_name": "Acme", "title": "CEO"
        }))];
        let columns = order_columns(&rows);
        assert_eq!(columns, vec!["name", "company_name", "title", "email", "price", "zeta"]);
    }

    #[test]
    fn test_build_table_dedupes_and_fills_missing() {
        let table = build_table(vec![
            row(json!({"Name": "Widget", "Price": "9.99"})),
            row(json!({"name": "Widget", "price": 9.99})),
            row(json!({"name": "Gadget", "Brand": "Acme"})),
            row(json!({})),
        ]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns, vec!["name", "price", "brand"]);
        assert_eq!(table.rows[1]["price"], Value::Null);
        let keys: Vec<&String> = table.rows[1].keys().collect();
        assert_eq!(keys, vec!["name", "price", "brand"]);

        assert_eq!(table.summary.total_rows, 2);
        let price = &table.summary.column_statistics["price"];
        assert_eq!(price.non_null_count, 1);
        assert_eq!(price.null_count, 1);
        assert_eq!(price.data_types, vec!["float"]);
    }

    #[test]
    fn test_empty_input() {
        let table = build_table(vec![]);
        assert!(table.rows.is_empty());
        assert!(table.columns.is_empty());
        assert_eq!(table.summary.total_rows, 0);
    }
}
