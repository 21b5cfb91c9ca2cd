//! Integration tests for the dispatch pipeline
//!
//! These tests use wiremock to create mock HTTP servers and a temporary
//! SQLite database, and drive the full pipeline end-to-end.

mod crawl_tests;
mod recovery_tests;
mod support;
