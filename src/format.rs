//! Rendering of DataSets for the command line.
//!
//! Tables are laid out with display widths (wide characters count double),
//! numbers are right-aligned and NULL prints as `NULL`.

use crate::config::OutputFormat;
use crate::models::{DataSet, DataSetKind, Value};
use unicode_width::UnicodeWidthStr;

pub fn format_value(value: &Value) -> String {
    value.as_text().unwrap_or_else(|| "NULL".to_string())
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

/// Render one DataSet in the requested format.
pub fn format_data_set(data_set: &DataSet, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_as_table(data_set),
        OutputFormat::Markdown => format_as_markdown(data_set),
        OutputFormat::Json => format_as_json(data_set),
    }
}

pub fn format_as_table(data_set: &DataSet) -> String {
    let mut output = String::new();
    if let Some(caption) = &data_set.caption {
        output.push_str(caption);
        output.push('\n');
    }

    if let DataSetKind::UpdateCount { affected, .. } = data_set.kind {
        let row_text = if affected == 1 { "row" } else { "rows" };
        output.push_str(&format!("{} {} affected\n", affected, row_text));
        return output;
    }

    if data_set.columns.is_empty() {
        output.push_str("Empty set\n");
        return output;
    }

    let mut widths: Vec<usize> = data_set.columns.iter().map(|c| c.name.width()).collect();
    for row in &data_set.rows {
        for (i, value) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(format_value(value).width());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = data_set
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(&col.name, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &data_set.rows {
        let row_str: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let value = row.get(i).unwrap_or(&Value::Null);
                let formatted = format_value(value);
                if is_numeric(value) {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_count = data_set.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    if data_set.truncated {
        output.push_str(&format!("{} {} in set (truncated)\n", row_count, row_text));
    } else {
        output.push_str(&format!("{} {} in set\n", row_count, row_text));
    }

    output
}

pub fn format_as_markdown(data_set: &DataSet) -> String {
    let mut output = String::new();
    if let Some(caption) = &data_set.caption {
        output.push_str(&format!("**{}**\n\n", caption));
    }

    if let DataSetKind::UpdateCount { affected, .. } = data_set.kind {
        output.push_str(&format!("*{} rows affected*\n", affected));
        return output;
    }

    if data_set.columns.is_empty() {
        output.push_str("*Empty set*\n");
        return output;
    }

    let header: String = data_set
        .columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(&c.name)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = data_set.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &data_set.rows {
        let row_str: String = (0..data_set.columns.len())
            .map(|i| {
                let value = row.get(i).unwrap_or(&Value::Null);
                format!("| {} ", escape_markdown(&format_value(value)))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} rows*\n", data_set.row_count()));

    output
}

/// One JSON document per DataSet.
pub fn format_as_json(data_set: &DataSet) -> String {
    serde_json::to_string(data_set).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

fn escape_markdown(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn pad_right(text: &str, width: usize) -> String {
    format!("{}{}", text, " ".repeat(width.saturating_sub(text.width())))
}

fn pad_left(text: &str, width: usize) -> String {
    format!("{}{}", " ".repeat(width.saturating_sub(text.width())), text)
}

fn pad_center(text: &str, width: usize) -> String {
    let padding = width.saturating_sub(text.width());
    let left = padding / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(padding - left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMetadata;

    fn sample() -> DataSet {
        DataSet::rows(
            vec![
                ColumnMetadata::new("id", "int8", false),
                ColumnMetadata::new("name", "text", true),
            ],
            vec![
                vec![Value::Int(1), Value::String("Alice".to_string())],
                vec![Value::Int(22), Value::Null],
            ],
            false,
        )
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::Bool(true)), "true");
        assert_eq!(format_value(&Value::Int(42)), "42");
        assert_eq!(format_value(&Value::String("hello".to_string())), "hello");
    }

    #[test]
    fn test_format_as_table() {
        let output = format_as_table(&sample());
        assert!(output.contains("+----+-------+"));
        assert!(output.contains("| id | name  |"));
        assert!(output.contains("|  1 | Alice |"));
        assert!(output.contains("| 22 | NULL  |"));
        assert!(output.contains("2 rows in set"));
    }

    #[test]
    fn test_format_table_wide_characters() {
        let data_set = DataSet::rows(
            vec![ColumnMetadata::new("city", "text", false)],
            vec![vec![Value::String("東京".to_string())]],
            false,
        );
        let output = format_as_table(&data_set);
        // Two wide characters occupy four columns
        assert!(output.contains("| 東京 |"));
        assert!(output.contains("+------+"));
    }

    #[test]
    fn test_format_table_update_count_and_caption() {
        let output = format_as_table(&DataSet::update_count(1, 1));
        assert_eq!(output, "1 row affected\n");

        let output = format_as_table(&sample().with_caption("Cursor rc"));
        assert!(output.starts_with("Cursor rc\n"));
    }

    #[test]
    fn test_format_table_truncated() {
        let mut data_set = sample();
        data_set.truncated = true;
        assert!(format_as_table(&data_set).contains("2 rows in set (truncated)"));
    }

    #[test]
    fn test_format_as_markdown() {
        let output = format_as_markdown(&sample());
        assert!(output.contains("| id | name |"));
        assert!(output.contains("|---|---|"));
        assert!(output.contains("| 1 | Alice |"));
        assert!(output.contains("*2 rows*"));
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let data_set = DataSet::rows(
            vec![ColumnMetadata::new("expr", "text", false)],
            vec![vec![Value::String("a|b".to_string())]],
            false,
        );
        assert!(format_as_markdown(&data_set).contains("| a\\|b |"));
    }

    #[test]
    fn test_format_as_json() {
        let output = format_as_json(&DataSet::update_count(3, 10));
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["kind"]["type"], "update_count");
        assert_eq!(parsed["kind"]["total"], 10);
    }
}
