//! # askdocs core
//!
//! Runtime-agnostic logic for askdocs: data models, the error taxonomy,
//! the overlapping chunker, embedding and generation capability traits,
//! the in-memory vector index, and grounding-prompt construction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Backend adapters, persistence, timeouts and session management live in
//! the `askdocs` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;

pub use error::{QaError, Result};
