//! Lexical search over the node index, with a substring-scan fallback.
//!
//! Query pipeline:
//! 1. Tokenize on whitespace, quote each token as a literal phrase, OR-join.
//! 2. `MATCH` against the FTS5 mirror, ranked by BM25, capped at `limit`.
//! 3. If that yields nothing, fall back to a case-insensitive `LIKE` scan
//!    over name and summary, most-recently-updated first.
//! 4. Attach each hit's full neighbor list.
//!
//! Hostile input (boolean keywords, asterisks, unbalanced quotes) must never
//! raise — the escaping makes syntax errors unreachable, and any that slip
//! through anyway degrade to the fallback scan.

use rusqlite::params;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::types::{GraphSearchResult, Node};

use super::{GraphStore, escape_match_query, get_neighbors_conn};

impl GraphStore {
    /// Search node name/summary/type, returning up to `limit` results with
    /// their neighbor lists. An empty or unmatched query is `Ok(vec![])`,
    /// never an error.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<GraphSearchResult>, AppError> {
        let conn = self.conn()?;
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut nodes = self.search_index(query, limit)?;
        if nodes.is_empty() {
            nodes = self.search_substring(query, limit)?;
            if !nodes.is_empty() {
                debug!(query, hits = nodes.len(), "lexical index empty, substring fallback hit");
            }
        }

        nodes
            .into_iter()
            .map(|node| {
                let neighbors = get_neighbors_conn(conn, node.id)?;
                Ok(GraphSearchResult { node, neighbors, score: None })
            })
            .collect()
    }

    /// FTS5 pass: OR of quoted tokens, BM25-ranked.
    fn search_index(&self, query: &str, limit: usize) -> Result<Vec<Node>, AppError> {
        let safe_query = escape_match_query(query);
        if safe_query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT n.id, n.name, n.type, n.summary, n.metadata, n.created_at, n.updated_at
                 FROM node_index
                 JOIN nodes n ON n.id = node_index.node_id
                 WHERE node_index MATCH ?1
                 ORDER BY bm25(node_index)
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare index search: {e}")))?;

        let rows_result = stmt.query_map(params![safe_query, limit as i64], super::node_from_row);
        let rows = match rows_result {
            Ok(rows) => rows,
            Err(e) => {
                // Escaping should make this unreachable; tolerate it anyway
                // rather than let an odd query surface as a store failure.
                let msg = e.to_string();
                if msg.contains("fts5") {
                    warn!(error = %msg, "FTS query rejected, treating as zero hits");
                    return Ok(Vec::new());
                }
                return Err(AppError::Storage(format!("graph: index search: {e}")));
            }
        };

        let mut nodes = Vec::new();
        for row in rows {
            match row {
                Ok(node) => nodes.push(node),
                Err(e) if e.to_string().contains("fts5") => {
                    warn!(error = %e.to_string(), "FTS row error, treating as zero hits");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(AppError::Storage(format!("graph: index row: {e}"))),
            }
        }
        Ok(nodes)
    }

    /// Fallback pass: case-insensitive substring scan over name and summary,
    /// most-recently-updated first.
    fn search_substring(&self, query: &str, limit: usize) -> Result<Vec<Node>, AppError> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, type, summary, metadata, created_at, updated_at
                 FROM nodes
                 WHERE lower(name) LIKE ?1 OR lower(summary) LIKE ?1
                 ORDER BY updated_at DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare substring scan: {e}")))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], super::node_from_row)
            .map_err(|e| AppError::Storage(format!("graph: substring scan: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: substring row: {e}"))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;
    use tempfile::TempDir;

    fn seeded_store() -> (TempDir, GraphStore) {
        let tmp = TempDir::new().expect("tempdir");
        let mut store = GraphStore::new(tmp.path().join("graph.db"));
        store.initialize().expect("initialize");
        store
            .upsert_node("alice", EntityType::Person, "backend developer on billing")
            .unwrap();
        store
            .upsert_node("projectx", EntityType::Project, "main billing platform")
            .unwrap();
        (tmp, store)
    }

    #[test]
    fn index_match_ranks_and_returns_neighbors() {
        let (_tmp, mut store) = seeded_store();
        let alice = store.get_node_by_name("alice").unwrap().unwrap();
        let project = store.get_node_by_name("projectx").unwrap().unwrap();
        store.upsert_edge(alice.id, project.id, "works_on", "", 1.0).unwrap();

        let results = store.search("billing", 10).unwrap();
        assert_eq!(results.len(), 2);
        let hit = results.iter().find(|r| r.node.name == "alice").unwrap();
        assert_eq!(hit.neighbors.len(), 1);
        assert_eq!(hit.neighbors[0].node.name, "projectx");
    }

    #[test]
    fn adversarial_queries_never_error() {
        let (_tmp, store) = seeded_store();
        for q in [
            "\"unbalanced",
            "AND OR NOT",
            "*",
            "a* b(",
            "name:\"",
            "((((",
            "alice\" OR \"1\"=\"1",
        ] {
            let results = store.search(q, 5).expect("must not raise");
            let _ = results;
        }
    }

    #[test]
    fn substring_fallback_catches_partial_tokens() {
        let (_tmp, store) = seeded_store();
        // "proj" is a prefix, not a full token — FTS misses it, LIKE does not.
        let results = store.search("proj", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.name, "projectx");
    }

    #[test]
    fn search_respects_limit() {
        let tmp = TempDir::new().unwrap();
        let mut store = GraphStore::new(tmp.path().join("graph.db"));
        store.initialize().unwrap();
        for i in 0..10 {
            store
                .upsert_node(&format!("widget{i}"), EntityType::Tool, "common widget summary")
                .unwrap();
        }
        assert_eq!(store.search("widget summary", 3).unwrap().len(), 3);
    }

    #[test]
    fn empty_query_is_empty_result() {
        let (_tmp, store) = seeded_store();
        assert!(store.search("", 5).unwrap().is_empty());
        assert!(store.search("   ", 5).unwrap().is_empty());
        assert!(store.search("alice", 0).unwrap().is_empty());
    }

    #[test]
    fn type_field_is_searchable() {
        let (_tmp, store) = seeded_store();
        let results = store.search("person", 5).unwrap();
        assert!(results.iter().any(|r| r.node.name == "alice"));
    }
}
