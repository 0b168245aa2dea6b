//! Renders upsert plans to `INSERT ... ON CONFLICT` SQL.
//!
//! Bulk plans may carry rows with different column sets (columns marked
//! `skip_nil` are omitted per row), but a multi-row VALUES list needs a
//! uniform column list, so rows are grouped by their column set and one
//! statement is rendered per group. The `RETURNING` clause reports
//! which rows were actually written; conflict rows rejected by the
//! predicate are absent from it.

use std::collections::BTreeMap;

use tributary_core::sql::quote_ident;
use tributary_core::types::ColumnValue;

use crate::adapter::{UpdatePolicy, UpdatePredicate};
use crate::storage::UpsertPlan;

/// One rendered statement covering the plan rows at `row_indexes`.
#[derive(Debug, Clone)]
pub struct RenderedUpsert {
    /// The full statement text.
    pub sql: String,
    /// Indexes into the plan's row list, in VALUES order.
    pub row_indexes: Vec<usize>,
}

/// Renders a plan to one statement per distinct row column set.
#[must_use]
pub fn render_upsert(plan: &UpsertPlan) -> Vec<RenderedUpsert> {
    // Group rows by column set, preserving first-seen order.
    let mut groups: Vec<(Vec<&String>, Vec<usize>)> = Vec::new();
    for (i, row) in plan.rows.iter().enumerate() {
        let columns: Vec<&String> = row.keys().collect();
        match groups.iter_mut().find(|(cols, _)| *cols == columns) {
            Some((_, indexes)) => indexes.push(i),
            None => groups.push((columns, vec![i])),
        }
    }

    groups
        .into_iter()
        .map(|(columns, row_indexes)| RenderedUpsert {
            sql: render_group(plan, &columns, &row_indexes),
            row_indexes,
        })
        .collect()
}

fn render_group(plan: &UpsertPlan, columns: &[&String], row_indexes: &[usize]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let values: Vec<String> = row_indexes
        .iter()
        .map(|i| {
            let row = &plan.rows[*i];
            let cells: Vec<String> = columns
                .iter()
                .map(|c| {
                    row.get(c.as_str())
                        .map_or_else(|| "NULL".to_string(), ColumnValue::to_sql_literal)
                })
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();

    let conflict_target: Vec<String> = plan
        .conflict_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect();

    // Conflict-target columns never appear in the SET list.
    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| !plan.conflict_columns.contains(**c))
        .map(|c| {
            let ident = quote_ident(c);
            match plan.policy(c) {
                UpdatePolicy::TakeIncoming => format!("{ident} = excluded.{ident}"),
                UpdatePolicy::CoalesceExisting => {
                    format!("{ident} = coalesce(excluded.{ident}, t.{ident})")
                }
            }
        })
        .collect();

    // A group carrying nothing but conflict-target columns has no SET
    // list to render; inserting new rows is all it can do.
    if assignments.is_empty() {
        return format!(
            "INSERT INTO {} AS t ({}) VALUES {} ON CONFLICT ({}) DO NOTHING RETURNING {}",
            plan.table.qualified(),
            column_list.join(", "),
            values.join(", "),
            conflict_target.join(", "),
            quote_ident(&plan.remote_key_column),
        );
    }

    format!(
        "INSERT INTO {} AS t ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {} WHERE {} RETURNING {}",
        plan.table.qualified(),
        column_list.join(", "),
        values.join(", "),
        conflict_target.join(", "),
        assignments.join(", "),
        predicate_sql(&plan.predicate),
        quote_ident(&plan.remote_key_column),
    )
}

/// Renders the conflict-UPDATE predicate.
#[must_use]
pub fn predicate_sql(predicate: &UpdatePredicate) -> String {
    match predicate {
        UpdatePredicate::TimestampNewer { column } => {
            let ident = quote_ident(column);
            format!("(t.{ident} IS NULL OR excluded.{ident} > t.{ident})")
        }
        UpdatePredicate::DataChanged => {
            "t.\"data\" IS DISTINCT FROM excluded.\"data\"".to_string()
        }
    }
}

/// Maps a statement's returned remote keys back to per-row change
/// flags. `returned` holds the remote-key literals of written rows.
#[must_use]
pub fn changed_flags(
    plan: &UpsertPlan,
    row_indexes: &[usize],
    returned: &[String],
) -> BTreeMap<usize, bool> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for key in returned {
        *counts.entry(key.as_str()).or_default() += 1;
    }
    row_indexes
        .iter()
        .map(|i| {
            let key = plan.rows[*i]
                .get(&plan.remote_key_column)
                .map(remote_key_text)
                .unwrap_or_default();
            let changed = counts
                .get(key.as_str())
                .is_some_and(|remaining| *remaining > 0);
            if changed {
                if let Some(remaining) = counts.get_mut(key.as_str()) {
                    *remaining -= 1;
                }
            }
            (*i, changed)
        })
        .collect()
}

/// Renders a remote-key value as plain text, the way `RETURNING`
/// reports it.
#[must_use]
pub fn remote_key_text(value: &ColumnValue) -> String {
    match value {
        ColumnValue::Text(s) => s.clone(),
        other => other.to_sql_literal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::schema_mod::TableRef;
    use tributary_core::types::ColumnValue;

    use crate::storage::Row;

    fn plan_with(rows: Vec<Row>) -> UpsertPlan {
        UpsertPlan {
            table: TableRef::new("org_1", "fake_v1"),
            remote_key_column: "remote_id".into(),
            conflict_columns: vec!["remote_id".into()],
            rows,
            coalesce_columns: vec!["created".into()],
            predicate: UpdatePredicate::TimestampNewer {
                column: "updated".into(),
            },
        }
    }

    fn row(pairs: &[(&str, ColumnValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_single_row_statement() {
        let plan = plan_with(vec![row(&[
            ("remote_id", ColumnValue::Text("x".into())),
            ("title", ColumnValue::Text("A".into())),
        ])]);
        let rendered = render_upsert(&plan);
        assert_eq!(rendered.len(), 1);
        let sql = &rendered[0].sql;
        assert!(sql.starts_with("INSERT INTO \"org_1\".\"fake_v1\" AS t (\"remote_id\", \"title\")"));
        assert!(sql.contains("VALUES ('x', 'A')"));
        assert!(sql.contains("ON CONFLICT (\"remote_id\") DO UPDATE SET \"title\" = excluded.\"title\""));
        assert!(sql.contains("WHERE (t.\"updated\" IS NULL OR excluded.\"updated\" > t.\"updated\")"));
        assert!(sql.ends_with("RETURNING \"remote_id\""));
    }

    #[test]
    fn test_coalesce_column_assignment() {
        let plan = plan_with(vec![row(&[
            ("remote_id", ColumnValue::Text("x".into())),
            ("created", ColumnValue::Null),
        ])]);
        let sql = &render_upsert(&plan)[0].sql;
        assert!(sql.contains("\"created\" = coalesce(excluded.\"created\", t.\"created\")"));
    }

    #[test]
    fn test_heterogeneous_rows_split_into_groups() {
        let plan = plan_with(vec![
            row(&[
                ("remote_id", ColumnValue::Text("a".into())),
                ("title", ColumnValue::Text("A".into())),
            ]),
            // skip_nil row omitting "title"
            row(&[("remote_id", ColumnValue::Text("b".into()))]),
            row(&[
                ("remote_id", ColumnValue::Text("c".into())),
                ("title", ColumnValue::Text("C".into())),
            ]),
        ]);
        let rendered = render_upsert(&plan);
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].row_indexes, vec![0, 2]);
        assert_eq!(rendered[1].row_indexes, vec![1]);
        assert!(rendered[0].sql.contains("VALUES ('a', 'A'), ('c', 'C')"));
    }

    #[test]
    fn test_data_changed_predicate_sql() {
        assert_eq!(
            predicate_sql(&UpdatePredicate::DataChanged),
            "t.\"data\" IS DISTINCT FROM excluded.\"data\""
        );
    }

    #[test]
    fn test_changed_flags_maps_returned_keys() {
        let plan = plan_with(vec![
            row(&[("remote_id", ColumnValue::Text("a".into()))]),
            row(&[("remote_id", ColumnValue::Text("b".into()))]),
        ]);
        let flags = changed_flags(&plan, &[0, 1], &["b".to_string()]);
        assert!(!flags[&0]);
        assert!(flags[&1]);
    }
}
