//! # askdocs
//!
//! Retrieval-augmented question answering over local documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│ IndexSnapshot│
//! │ dir/file │   │         │   │          │   │ index.sqlite │
//! └──────────┘   └─────────┘   └──────────┘   └──────┬───────┘
//!                                                    │
//!                      ┌─────────────────────────────┤
//!                      ▼                             ▼
//!                ┌───────────┐                ┌─────────────┐
//!                │  Session  │───────────────▶│ QueryEngine │──▶ Generator
//!                │ (history) │                └─────────────┘
//!                └───────────┘
//! ```
//!
//! Runtime-agnostic pieces (models, chunking, the vector index, prompts and
//! the backend traits) live in [`askdocs_core`]. This crate adds the I/O:
//! loading files, HTTP backends, snapshot persistence, sessions, the CLI
//! and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Text extraction per file format |
//! | [`loader`] | Document sources → `RawDocument`s |
//! | [`embedding`] | Embedding backends |
//! | [`generation`] | Answer-generation backends |
//! | [`backend`] | Retry and timeout helpers for backends |
//! | [`store`] | Snapshot persistence and the rebuild lock |
//! | [`engine`] | Retrieval + generation |
//! | [`session`] | Active index and conversation state |
//! | [`commands`] | CLI command runners |
//! | [`server`] | HTTP server |

pub mod backend;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod loader;
pub mod server;
pub mod session;
pub mod store;

pub use askdocs_core::{QaError, Result};
