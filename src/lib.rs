//! QueryGraph - natural-language questions to SQL over a schema graph
//!
//! This crate provides:
//! - A schema graph of tables, columns and foreign keys with embeddings
//! - Relevance resolution of the tables a question needs
//! - A per-turn pipeline from relevancy check to SQL execution, with a
//!   confirmation gate for destructive statements and schema refresh after DDL
//! - An HTTP server streaming pipeline progress

pub mod agents;
pub mod config;
pub mod executor;
pub mod graph_catalog;
pub mod llm;
pub mod pipeline;
pub mod resolver;
pub mod server;
