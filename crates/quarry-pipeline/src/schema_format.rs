//! DDL-style schema text for the gated tables.

use quarry_types::{Column, FormattedSchema, Table};

fn column_line(column: &Column) -> String {
    let mut flags = Vec::new();
    if column.primary_key {
        flags.push("PK".to_string());
    }
    if let Some(ref fk) = column.references {
        flags.push(format!("FK→{}.{}", fk.table, fk.column));
    }
    if !column.nullable {
        flags.push("NOT NULL".to_string());
    }

    let mut line = format!("  {} {}", column.name, column.data_type);
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    line
}

pub fn table_block(table: &Table) -> String {
    let mut lines = vec![format!("TABLE: {}.{}", table.schema, table.name)];
    if let Some(ref comment) = table.comment {
        lines.push(format!("  COMMENT: {comment}"));
    }
    lines.extend(table.columns.iter().map(column_line));
    lines.join("\n")
}

/// Gated tables in gate order. The token estimate is a whitespace word count.
pub fn format_schema(tables: &[Table]) -> FormattedSchema {
    let content = tables
        .iter()
        .map(table_block)
        .collect::<Vec<_>>()
        .join("\n\n");
    let token_estimate = content.split_whitespace().count();
    tracing::info!(tables = tables.len(), token_estimate, "Schema formatted");
    FormattedSchema {
        content,
        table_names: tables.iter().map(|t| t.name.clone()).collect(),
        token_estimate,
    }
}
