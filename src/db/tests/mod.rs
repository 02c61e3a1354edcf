//! Shared database repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL implementations:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! Each repository has a test module containing shared test functions that take
//! a test context of `&dyn XxxRepo`, plus per-backend setup macros.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
