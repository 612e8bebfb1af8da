//! iching - I Ching research database
//!
//! Hexagram structure, a SQLite import pipeline and the graph/statistics
//! analyses run over it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use iching::{graph::TransformationGraph, import, stats, Lexicon};
//!
//! // Build the database from a data directory
//! let report = import::rebuild_database(&data_dir, &db_path, &Lexicon::default())?;
//!
//! // Lucky rate per hexagram, then attractors on the transformation graph
//! let conn = iching::init_db(&db_path)?;
//! let lines = iching::db::labelled_lines(&conn)?;
//! let rates = stats::hexagram_rates(&lines);
//! let graph = TransformationGraph::build();
//! let scores = graph.attraction(&rates);
//! ```
//!
//! # Pipeline
//!
//! ```text
//! King Wen table ──► structure (JSON) ──┐
//!                                      ├──► import ──► iching.db ──► graph / stats
//! scraped text JSON ───────────────────┘        (fortune labels)
//! ```

pub mod config;
pub mod db;
pub mod fortune;
pub mod graph;
pub mod hexagram;
pub mod import;
pub mod provenance;
pub mod stats;
pub mod structure;
pub mod types;

// Core types
pub use db::init_db;
pub use fortune::{Classification, Lexicon};
pub use graph::TransformationGraph;
pub use hexagram::{Pattern, TrigramPattern};
pub use types::*;

// Import pipeline
pub use import::{import_all, rebuild_database, ImportReport};
