//! JSON and CSV artifact rendering.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::clean::Table;

pub const TOOL_NAME: &str = "Falcon Parse";

pub fn render_json(job_id: Uuid, table: &Table) -> Result<String, serde_json::Error> {
    let doc = json!({
        "metadata": {
            "job_id": job_id,
            "exported_at": Utc::now().to_rfc3339(),
            "tool": TOOL_NAME,
            "summary": table.summary,
        },
        "data": table.rows,
        "columns": table.columns,
    });
    serde_json::to_string_pretty(&doc)
}

pub fn render_csv(table: &Table) -> String {
    let mut out = table
        .columns
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');

    for row in &table.rows {
        let cells: Vec<String> = table
            .columns
            .iter()
            .map(|c| row.get(c).map(csv_value).unwrap_or_default())
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        other => csv_field(&other.to_string()),
    }
}

/// Quote a field when it holds a delimiter, quote or line break.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::clean::build_table;
    use super::*;

    fn table() -> Table {
        let rows = [
            json!({"name": "Widget, large", "price": "9.99", "in_stock": "yes"}),
            json!({"name": "The \"Best\" Gadget", "price": null}),
        ]
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .collect();
        build_table(rows)
    }

    #[test]
    fn test_csv_quoting_and_nulls() {
        let csv = render_csv(&table());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "name,price,in_stock");
        assert_eq!(lines[1], "\"Widget, large\",9.99,true");
        assert_eq!(lines[2], "\"The \"\"Best\"\" Gadget\",,");
    }

    #[test]
    fn test_json_document_shape() {
        let id = Uuid::new_v4();
        let doc: Value = serde_json::from_str(&render_json(id, &table()).unwrap()).unwrap();
        assert_eq!(doc["metadata"]["job_id"], id.to_string());
        assert_eq!(doc["metadata"]["tool"], TOOL_NAME);
        assert_eq!(doc["metadata"]["summary"]["total_rows"], 2);
        assert_eq!(doc["columns"][0], "name");
        assert_eq!(doc["data"].as_array().unwrap().len(), 2);
    }
}
