use std::collections::HashMap;

use serde::Serialize;

use crate::graph_catalog::{ColumnInfo, ForeignKey, TableRecord};

pub const FOREIGN_KEY_LABEL: &str = "Foreign keys: ";

/// A table selected as relevant to the current question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateTable {
    pub name: String,
    pub description: String,
    pub foreign_keys: Vec<ForeignKey>,
    /// `foreign_keys` rendered for prompts, prefixed with [`FOREIGN_KEY_LABEL`]
    pub foreign_key_summary: String,
    pub columns: Vec<ColumnInfo>,
}

impl CandidateTable {
    fn from_record(record: TableRecord) -> Self {
        let mut candidate = CandidateTable {
            foreign_key_summary: summarize(&record.foreign_keys),
            name: record.name,
            description: record.description,
            foreign_keys: record.foreign_keys,
            columns: Vec::with_capacity(record.columns.len()),
        };
        candidate.absorb_columns(record.columns);
        candidate
    }

    /// Append columns this table owns and has not seen yet
    fn absorb_columns(&mut self, columns: Vec<ColumnInfo>) {
        for column in columns {
            if column.table != self.name {
                log::warn!(
                    "Dropping column {}.{} offered for table {}",
                    column.table,
                    column.name,
                    self.name
                );
                continue;
            }
            if !self.columns.iter().any(|c| c.name == column.name) {
                self.columns.push(column);
            }
        }
    }
}

fn summarize(foreign_keys: &[ForeignKey]) -> String {
    let rendered: Vec<String> = foreign_keys.iter().map(ToString::to_string).collect();
    format!("{}{}", FOREIGN_KEY_LABEL, rendered.join("; "))
}

/// Candidate tables keyed by name, remembering first-insertion order.
///
/// Re-inserting a table is idempotent apart from last-writer-wins on the
/// description and foreign keys; columns are unioned by name.
#[derive(Debug, Default)]
pub struct CandidateSet {
    order: Vec<String>,
    tables: HashMap<String, CandidateTable>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: TableRecord) {
        match self.tables.get_mut(&record.name) {
            Some(existing) => {
                existing.description = record.description;
                existing.foreign_key_summary = summarize(&record.foreign_keys);
                existing.foreign_keys = record.foreign_keys;
                existing.absorb_columns(record.columns);
            }
            None => {
                self.order.push(record.name.clone());
                self.tables
                    .insert(record.name.clone(), CandidateTable::from_record(record));
            }
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = TableRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Tables in first-insertion order
    pub fn into_tables(mut self) -> Vec<CandidateTable> {
        self.order
            .iter()
            .filter_map(|name| self.tables.remove(name))
            .collect()
    }
}
