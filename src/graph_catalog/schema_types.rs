use std::fmt;

use serde::{Deserialize, Serialize};

/// Key role of a column inside its table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    #[default]
    None,
    Primary,
    Foreign,
    Unique,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::None => "NONE",
            KeyType::Primary => "PRIMARY",
            KeyType::Foreign => "FOREIGN",
            KeyType::Unique => "UNIQUE",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign-key constraint declared on a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} references {}.{}",
            self.constraint_name, self.column, self.referenced_table, self.referenced_column
        )
    }
}

/// Table node as stored in the schema graph
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub description: String,
    pub foreign_keys: Vec<ForeignKey>,
    pub embedding: Vec<f32>,
}

/// Column node as stored in the schema graph (owned by `table` via BELONGS_TO)
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub table: String,
    pub name: String,
    pub description: String,
    pub data_type: String,
    pub key_type: KeyType,
    pub nullable: bool,
    pub embedding: Vec<f32>,
}

impl Column {
    pub fn info(&self) -> ColumnInfo {
        ColumnInfo {
            table: self.table.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            data_type: self.data_type.clone(),
            key_type: self.key_type,
            nullable: self.nullable,
        }
    }
}

/// Column as returned by graph queries (no embedding)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Owning table name
    pub table: String,
    pub name: String,
    pub description: String,
    pub data_type: String,
    pub key_type: KeyType,
    pub nullable: bool,
}

/// A table together with every column that belongs to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub name: String,
    pub description: String,
    pub foreign_keys: Vec<ForeignKey>,
    pub columns: Vec<ColumnInfo>,
}

/// The `Database` node of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub description: String,
    /// Connection target for the executor, if the graph was loaded from a live database
    pub url: Option<String>,
}

/// A node lying on a shortest path between two tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathNode {
    Table {
        name: String,
    },
    Column {
        table: String,
        name: String,
        key_type: KeyType,
    },
}
