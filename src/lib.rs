//! BuildTrace's asynchronous page-level processing core.
//!
//! An Orchestrator dispatches per-page OCR/Diff/Summary tasks over a durable
//! message bus (`bus`) to independent worker processes (`workers`), and
//! records progress in a Diesel-backed store (`repository`/`models`) so a
//! crashed orchestrator or worker can resume from where it left off.

pub mod api;
pub mod bus;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod prefer_db;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod workers;
