//! Unit tests - no external services required
//!
//! Schema graphs are built in memory and language-model collaborators are
//! replaced by mocks or deterministic stand-ins.

mod pipeline_tests;
mod resolver_tests;
