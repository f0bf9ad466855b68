//! AgentSense — persistent entity/relationship memory.
//!
//! A SQLite-backed graph of typed entities and weighted relationships, built
//! incrementally from short bursts of extracted facts and queried through a
//! lexical index and a deterministic recall scorer.
//!
//! - [`GraphStore`] — durable nodes/edges/observations with merge-on-write
//!   upserts and an always-in-sync FTS mirror.
//! - [`GraphStore::ingest_extraction`] — one extraction batch as one atomic
//!   transaction.
//! - [`recall`] — prompt → ranked entities via term extraction and scoring.
//!
//! Extraction itself (turning raw text into candidate entities) and the
//! capture lifecycle live outside this crate; they interact with the store
//! only through [`types::ExtractionResult`] and the observation log.

pub mod config;
pub mod error;
pub mod ingest;
pub mod logger;
pub mod recall;
pub mod store;
pub mod types;

pub use error::AppError;
pub use ingest::IngestReport;
pub use store::GraphStore;
pub use types::{
    Direction, Edge, EntityType, ExtractionResult, GraphExport, GraphSearchResult, Neighbor, Node,
    Observation, StoreStats,
};
