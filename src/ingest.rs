//! Ingestion Coordinator — one extraction batch, one transaction.
//!
//! [`GraphStore::ingest_extraction`] is the single entry point by which an
//! external extraction result becomes durable. All node upserts, all edge
//! upserts, and the resulting observation are applied as one atomic unit:
//! either the whole batch is visible afterward, or none of it is.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::AppError;
use crate::store::{self, GraphStore, normalize};
use crate::types::{ExtractionResult, truncate_chars};

/// Upper bound on observation raw text recorded per batch.
/// Matches the capture side's chunking bound, so one batch maps to roughly
/// one captured chunk.
const RAW_TEXT_MAX: usize = 6000;

/// Counts of what one batch actually wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IngestReport {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
}

impl GraphStore {
    /// Atomically apply one extraction batch and record its provenance.
    ///
    /// Edge endpoints are resolved by name, case-insensitively, **only
    /// against the batch's own node list** — an edge whose `from` or `to`
    /// does not appear among `extraction.nodes` is silently dropped; that is
    /// not an error and does not abort the batch. The raw text (truncated)
    /// and session key are recorded as one observation marked processed at
    /// ingestion time, even for an empty-entities batch.
    ///
    /// Any failure rolls the store back to its pre-call state and surfaces
    /// as [`AppError::Transaction`].
    pub fn ingest_extraction(
        &mut self,
        extraction: &ExtractionResult,
        raw_text: &str,
        session_key: &str,
    ) -> Result<IngestReport, AppError> {
        let entities_json = serde_json::to_string(extraction)
            .map_err(|e| AppError::Transaction(format!("serialize extraction record: {e}")))?;

        let conn = self.conn_mut()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Transaction(format!("begin ingest: {e}")))?;

        // Node pass. The name->id map doubles as the batch-local resolution
        // table for the edge pass.
        let mut batch_ids: HashMap<String, i64> = HashMap::new();
        for extracted in &extraction.nodes {
            let node = store::upsert_node_tx(
                &tx,
                &extracted.name,
                extracted.entity_type,
                &extracted.summary,
            )
            .map_err(|e| AppError::Transaction(format!("upsert node '{}': {e}", extracted.name)))?;
            batch_ids.insert(node.name.clone(), node.id);
        }
        let nodes_upserted = batch_ids.len();

        // Edge pass: endpoints must both be in this batch.
        let mut edges_upserted = 0;
        for extracted in &extraction.edges {
            let from = batch_ids.get(&normalize(&extracted.from));
            let to = batch_ids.get(&normalize(&extracted.to));
            let (Some(&source_id), Some(&target_id)) = (from, to) else {
                debug!(
                    from = %extracted.from,
                    to = %extracted.to,
                    relation = %extracted.relation,
                    "edge endpoint missing from batch, dropping edge"
                );
                continue;
            };
            store::upsert_edge_tx(&tx, source_id, target_id, &extracted.relation, &extracted.context, 1.0)
                .map_err(|e| {
                    AppError::Transaction(format!("upsert edge '{}': {e}", extracted.relation))
                })?;
            edges_upserted += 1;
        }

        // Provenance is recorded regardless of whether anything was upserted.
        store::add_observation_conn(
            &tx,
            "ingest",
            &truncate_chars(raw_text, RAW_TEXT_MAX),
            &entities_json,
            session_key,
        )
        .map_err(|e| AppError::Transaction(format!("record observation: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Transaction(format!("commit ingest: {e}")))?;

        info!(nodes_upserted, edges_upserted, session_key, "extraction batch ingested");
        Ok(IngestReport { nodes_upserted, edges_upserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, ExtractedEdge, ExtractedNode};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, GraphStore) {
        let tmp = TempDir::new().expect("tempdir");
        let mut store = GraphStore::new(tmp.path().join("graph.db"));
        store.initialize().expect("initialize");
        (tmp, store)
    }

    fn node(name: &str) -> ExtractedNode {
        ExtractedNode {
            name: name.to_string(),
            entity_type: EntityType::Person,
            summary: String::new(),
        }
    }

    fn edge(from: &str, to: &str, relation: &str) -> ExtractedEdge {
        ExtractedEdge {
            from: from.to_string(),
            to: to.to_string(),
            relation: relation.to_string(),
            context: String::new(),
        }
    }

    #[test]
    fn batch_writes_nodes_edges_and_observation() {
        let (_tmp, mut store) = open_store();
        let extraction = ExtractionResult {
            nodes: vec![node("Alice"), node("Bob")],
            edges: vec![edge("Alice", "Bob", "knows")],
        };
        let report = store.ingest_extraction(&extraction, "alice knows bob", "s-1").unwrap();
        assert_eq!(report, IngestReport { nodes_upserted: 2, edges_upserted: 1 });

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.observations, 1);
    }

    #[test]
    fn edge_with_endpoint_outside_batch_is_dropped() {
        let (_tmp, mut store) = open_store();
        // "Nonexistent" is in the store but not in this batch — still dropped.
        store.upsert_node("nonexistent", EntityType::Person, "").unwrap();
        let extraction = ExtractionResult {
            nodes: vec![node("Bob")],
            edges: vec![edge("Bob", "Nonexistent", "knows")],
        };
        let report = store.ingest_extraction(&extraction, "raw", "s-1").unwrap();
        assert_eq!(report.nodes_upserted, 1);
        assert_eq!(report.edges_upserted, 0);
        assert_eq!(store.stats().unwrap().edges, 0);
        assert_eq!(store.stats().unwrap().observations, 1);
    }

    #[test]
    fn endpoint_resolution_is_case_insensitive() {
        let (_tmp, mut store) = open_store();
        let extraction = ExtractionResult {
            nodes: vec![node("Alice"), node("BOB")],
            edges: vec![edge("ALICE", "bob", "knows")],
        };
        let report = store.ingest_extraction(&extraction, "raw", "s").unwrap();
        assert_eq!(report.edges_upserted, 1);
    }

    #[test]
    fn empty_batch_still_records_provenance() {
        let (_tmp, mut store) = open_store();
        let report = store
            .ingest_extraction(&ExtractionResult::default(), "nothing extractable here", "s-2")
            .unwrap();
        assert_eq!(report, IngestReport { nodes_upserted: 0, edges_upserted: 0 });

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.observations, 1);
        // Recorded as processed, not pending.
        assert!(store.get_pending_observations(10).unwrap().is_empty());
    }

    #[test]
    fn raw_text_is_truncated() {
        let (_tmp, mut store) = open_store();
        let long = "x".repeat(20_000);
        store.ingest_extraction(&ExtractionResult::default(), &long, "s").unwrap();
        let dump = store.export().unwrap();
        assert_eq!(dump.observations[0].raw_text.chars().count(), 6000);
    }

    #[test]
    fn repeated_batches_merge_rather_than_duplicate() {
        let (_tmp, mut store) = open_store();
        let extraction = ExtractionResult {
            nodes: vec![node("Alice"), node("Bob")],
            edges: vec![edge("Alice", "Bob", "knows")],
        };
        store.ingest_extraction(&extraction, "raw", "s").unwrap();
        store.ingest_extraction(&extraction, "raw", "s").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.observations, 2);

        let alice = store.get_node_by_name("alice").unwrap().unwrap();
        let neighbors = store.get_neighbors(alice.id).unwrap();
        assert!((neighbors[0].edge.weight - 1.1).abs() < 1e-9);
    }

    #[test]
    fn ingest_before_initialize_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let mut store = GraphStore::new(tmp.path().join("graph.db"));
        let err = store
            .ingest_extraction(&ExtractionResult::default(), "raw", "s")
            .unwrap_err();
        assert!(matches!(err, AppError::NotInitialized));
    }
}
