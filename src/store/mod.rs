//! `store` — the durable entity/relationship graph.
//!
//! [`GraphStore`] owns one SQLite file holding three tables (`nodes`, `edges`,
//! `observations`) plus the `node_index` FTS5 mirror. Every write is merge-on
//! -write: node and edge upserts fetch the existing row, compute the merged
//! row, and write it back inside one transaction, and every node mutation is
//! paired with an index mutation in the same unit of work so the index never
//! drifts from the table.
//!
//! ## Lifecycle
//! Construct with [`GraphStore::new`], then call [`initialize`] before any
//! operation — calling twice is a no-op, but calling an operation first (or
//! after [`close`]) fails fast with [`AppError::NotInitialized`]. One
//! connection is opened per store handle and held until close; concurrent
//! access across handles on the same file is serialized by SQLite's WAL mode,
//! not by application-level locking.
//!
//! [`initialize`]: GraphStore::initialize
//! [`close`]: GraphStore::close

mod schema;
mod search;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use crate::error::AppError;
use crate::types::{
    Direction, Edge, EntityType, GraphExport, Neighbor, Node, Observation, StoreStats,
};

pub(crate) use schema::{escape_match_query, now_iso8601};

/// Weight added each time an existing `(source, target, relation)` triple is
/// re-asserted.
pub const EDGE_WEIGHT_STEP: f64 = 0.1;
/// Upper bound on edge weight.
pub const EDGE_WEIGHT_CAP: f64 = 5.0;

/// Normalize an entity name or relation label: trim and lower-case.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Persistent graph of typed entities and weighted relationships.
#[derive(Debug)]
pub struct GraphStore {
    db_path: PathBuf,
    conn: Option<Connection>,
}

impl GraphStore {
    /// Create a handle for the graph at `db_path`. No I/O happens until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), conn: None }
    }

    /// Open the backing file and ensure the schema exists.
    ///
    /// Idempotent: calling on an already-initialized store is a no-op, so the
    /// host may race multiple initialization attempts. An on-disk schema with
    /// an unsupported `user_version` is a hard error.
    pub fn initialize(&mut self) -> Result<(), AppError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = schema::open_conn(&self.db_path)?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Storage(format!("graph: read schema version: {e}")))?;
        match version {
            0 => schema::init_schema(&conn)?,
            schema::SCHEMA_VERSION => {}
            other => {
                return Err(AppError::Storage(format!(
                    "graph: unsupported schema version {other}, expected {}",
                    schema::SCHEMA_VERSION
                )));
            }
        }
        info!(db_path = %self.db_path.display(), "graph store initialized");
        self.conn = Some(conn);
        Ok(())
    }

    /// `true` between [`initialize`](Self::initialize) and [`close`](Self::close).
    pub fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    /// Release the backing connection. Operations after close fail exactly as
    /// operations before initialization do.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            info!(db_path = %self.db_path.display(), "graph store closed");
        }
    }

    /// Path of the backing file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> Result<&Connection, AppError> {
        self.conn.as_ref().ok_or(AppError::NotInitialized)
    }

    pub(crate) fn conn_mut(&mut self) -> Result<&mut Connection, AppError> {
        self.conn.as_mut().ok_or(AppError::NotInitialized)
    }

    // ── Node operations ───────────────────────────────────────────────────

    /// Insert or merge a node by normalized name.
    ///
    /// Merge rules for an existing node: `type` is always overwritten with the
    /// incoming value; `summary` is replaced only if the incoming summary is
    /// strictly longer than the stored one. The FTS mirror is updated in the
    /// same transaction.
    pub fn upsert_node(
        &mut self,
        name: &str,
        entity_type: EntityType,
        summary: &str,
    ) -> Result<Node, AppError> {
        let conn = self.conn_mut()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Storage(format!("graph: begin upsert_node tx: {e}")))?;
        let node = upsert_node_tx(&tx, name, entity_type, summary)?;
        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit upsert_node: {e}")))?;
        Ok(node)
    }

    /// Fetch a node by id. A missing id is `Ok(None)`, not an error.
    pub fn get_node(&self, id: i64) -> Result<Option<Node>, AppError> {
        self.conn()?
            .query_row(
                "SELECT id, name, type, summary, metadata, created_at, updated_at
                 FROM nodes WHERE id = ?1",
                params![id],
                node_from_row,
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("graph: get_node {id}: {e}")))
    }

    /// Fetch a node by name (normalized before lookup). A missing name is
    /// `Ok(None)`, not an error.
    pub fn get_node_by_name(&self, name: &str) -> Result<Option<Node>, AppError> {
        self.conn()?
            .query_row(
                "SELECT id, name, type, summary, metadata, created_at, updated_at
                 FROM nodes WHERE name = ?1",
                params![normalize(name)],
                node_from_row,
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("graph: get_node_by_name: {e}")))
    }

    /// All nodes, optionally filtered by type, most-recently-updated first.
    pub fn get_all_nodes(&self, type_filter: Option<EntityType>) -> Result<Vec<Node>, AppError> {
        let conn = self.conn()?;
        let collect = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<Vec<Node>, AppError> {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| AppError::Storage(format!("graph: prepare get_all_nodes: {e}")))?;
            let rows = stmt
                .query_map(p, node_from_row)
                .map_err(|e| AppError::Storage(format!("graph: query get_all_nodes: {e}")))?;
            rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: node row: {e}"))))
                .collect()
        };
        match type_filter {
            Some(t) => collect(
                "SELECT id, name, type, summary, metadata, created_at, updated_at
                 FROM nodes WHERE type = ?1 ORDER BY updated_at DESC, id DESC",
                &[&t.as_str()],
            ),
            None => collect(
                "SELECT id, name, type, summary, metadata, created_at, updated_at
                 FROM nodes ORDER BY updated_at DESC, id DESC",
                &[],
            ),
        }
    }

    /// Delete a node, its FTS mirror row, and (via cascade) all touching
    /// edges, in one transaction. `NotFound` if the id does not exist.
    pub fn delete_node(&mut self, id: i64) -> Result<(), AppError> {
        let conn = self.conn_mut()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Storage(format!("graph: begin delete_node tx: {e}")))?;
        tx.execute("DELETE FROM node_index WHERE node_id = ?1", params![id])
            .map_err(|e| AppError::Storage(format!("graph: delete index row {id}: {e}")))?;
        let affected = tx
            .execute("DELETE FROM nodes WHERE id = ?1", params![id])
            .map_err(|e| AppError::Storage(format!("graph: delete node {id}: {e}")))?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("node {id}")));
        }
        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit delete_node: {e}")))?;
        Ok(())
    }

    // ── Edge operations ───────────────────────────────────────────────────

    /// Insert or merge a directed edge.
    ///
    /// If the `(source, target, relation)` triple already exists its weight is
    /// incremented by [`EDGE_WEIGHT_STEP`] (capped at [`EDGE_WEIGHT_CAP`]) and
    /// `context` is replaced only if the incoming context is strictly longer;
    /// otherwise a new edge is inserted at `initial_weight`.
    pub fn upsert_edge(
        &mut self,
        source_id: i64,
        target_id: i64,
        relation: &str,
        context: &str,
        initial_weight: f64,
    ) -> Result<Edge, AppError> {
        let conn = self.conn_mut()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Storage(format!("graph: begin upsert_edge tx: {e}")))?;
        let edge = upsert_edge_tx(&tx, source_id, target_id, relation, context, initial_weight)?;
        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit upsert_edge: {e}")))?;
        Ok(edge)
    }

    /// All edges touching `node_id` in both directions, each paired with the
    /// neighbor node and tagged with its direction, ordered by descending
    /// weight within each direction (outgoing first).
    pub fn get_neighbors(&self, node_id: i64) -> Result<Vec<Neighbor>, AppError> {
        get_neighbors_conn(self.conn()?, node_id)
    }

    // ── Observation operations ────────────────────────────────────────────

    /// Append one observation. An empty `entities_json` marks it pending
    /// extraction; a non-empty one marks it processed immediately.
    pub fn add_observation(
        &mut self,
        source: &str,
        raw_text: &str,
        entities_json: &str,
        session_key: &str,
    ) -> Result<Observation, AppError> {
        add_observation_conn(self.conn()?, source, raw_text, entities_json, session_key)
    }

    /// Observations still awaiting extraction, oldest first, at most `limit`.
    pub fn get_pending_observations(&self, limit: usize) -> Result<Vec<Observation>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, source, raw_text, entities_json, session_key, processed_at
                 FROM observations WHERE entities_json = '' ORDER BY id ASC LIMIT ?1",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare pending: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], observation_from_row)
            .map_err(|e| AppError::Storage(format!("graph: query pending: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: observation row: {e}"))))
            .collect()
    }

    /// Transition one observation from pending to processed, exactly once.
    ///
    /// Fails with `NotFound` if the id does not exist and with
    /// `AlreadyProcessed` if the observation left the pending state earlier —
    /// processed records are immutable.
    pub fn mark_observation_processed(
        &mut self,
        id: i64,
        entities_json: &str,
    ) -> Result<Observation, AppError> {
        let conn = self.conn()?;
        let now = now_iso8601();
        let affected = conn
            .execute(
                "UPDATE observations SET entities_json = ?1, processed_at = ?2
                 WHERE id = ?3 AND entities_json = ''",
                params![entities_json, now, id],
            )
            .map_err(|e| AppError::Storage(format!("graph: mark processed {id}: {e}")))?;
        if affected == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM observations WHERE id = ?1)",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|e| AppError::Storage(format!("graph: check observation {id}: {e}")))?;
            if exists {
                return Err(AppError::AlreadyProcessed(id));
            }
            return Err(AppError::NotFound(format!("observation {id}")));
        }
        conn.query_row(
            "SELECT id, source, raw_text, entities_json, session_key, processed_at
             FROM observations WHERE id = ?1",
            params![id],
            observation_from_row,
        )
        .map_err(|e| AppError::Storage(format!("graph: reread observation {id}: {e}")))
    }

    // ── Administrative operations ─────────────────────────────────────────

    /// Row counts across the three tables.
    pub fn stats(&self) -> Result<StoreStats, AppError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64, AppError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(|e| AppError::Storage(format!("graph: count {table}: {e}")))
        };
        Ok(StoreStats {
            nodes: count("nodes")?,
            edges: count("edges")?,
            observations: count("observations")?,
        })
    }

    /// Delete all rows in all tables (and the FTS mirror). Used for resets.
    pub fn clear(&mut self) -> Result<(), AppError> {
        let conn = self.conn_mut()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Storage(format!("graph: begin clear tx: {e}")))?;
        for table in ["edges", "node_index", "nodes", "observations"] {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(|e| AppError::Storage(format!("graph: clear {table}: {e}")))?;
        }
        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit clear: {e}")))?;
        info!("graph store cleared");
        Ok(())
    }

    /// Full dump of all three tables for backup/inspection.
    pub fn export(&self) -> Result<GraphExport, AppError> {
        let conn = self.conn()?;
        let nodes = self.get_all_nodes(None)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, source_id, target_id, relation, weight, context, created_at, updated_at
                 FROM edges ORDER BY id ASC",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare export edges: {e}")))?;
        let edges: Vec<Edge> = stmt
            .query_map([], edge_from_row)
            .map_err(|e| AppError::Storage(format!("graph: query export edges: {e}")))?
            .map(|r| r.map_err(|e| AppError::Storage(format!("graph: edge row: {e}"))))
            .collect::<Result<_, _>>()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, source, raw_text, entities_json, session_key, processed_at
                 FROM observations ORDER BY id ASC",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare export observations: {e}")))?;
        let observations: Vec<Observation> = stmt
            .query_map([], observation_from_row)
            .map_err(|e| AppError::Storage(format!("graph: query export observations: {e}")))?
            .map(|r| r.map_err(|e| AppError::Storage(format!("graph: observation row: {e}"))))
            .collect::<Result<_, _>>()?;

        Ok(GraphExport { nodes, edges, observations })
    }
}

// ── Row mappers ───────────────────────────────────────────────────────────────

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let type_str: String = row.get(2)?;
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: EntityType::parse_lossy(&type_str),
        summary: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation: row.get(3)?,
        weight: row.get(4)?,
        context: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        source: row.get(1)?,
        raw_text: row.get(2)?,
        entities_json: row.get(3)?,
        session_key: row.get(4)?,
        processed_at: row.get(5)?,
    })
}

// ── Transaction-scoped write helpers ──────────────────────────────────────────
// Shared between the single-op public methods (which wrap one helper in one
// transaction) and the ingestion coordinator (which wraps the whole batch in
// one). Each takes a plain `&Connection` so it composes with either.

pub(crate) fn upsert_node_tx(
    conn: &Connection,
    name: &str,
    entity_type: EntityType,
    summary: &str,
) -> Result<Node, AppError> {
    let name = normalize(name);
    let now = now_iso8601();

    let existing = conn
        .query_row(
            "SELECT id, name, type, summary, metadata, created_at, updated_at
             FROM nodes WHERE name = ?1",
            params![name],
            node_from_row,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("graph: lookup node '{name}': {e}")))?;

    let node = match existing {
        Some(mut node) => {
            // Type is always overwritten; summary only grows.
            node.entity_type = entity_type;
            if summary.chars().count() > node.summary.chars().count() {
                node.summary = summary.to_string();
            }
            node.updated_at = now;
            conn.execute(
                "UPDATE nodes SET type = ?1, summary = ?2, updated_at = ?3 WHERE id = ?4",
                params![node.entity_type.as_str(), node.summary, node.updated_at, node.id],
            )
            .map_err(|e| AppError::Storage(format!("graph: update node '{name}': {e}")))?;
            node
        }
        None => {
            conn.execute(
                "INSERT INTO nodes (name, type, summary, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
                params![name, entity_type.as_str(), summary, now],
            )
            .map_err(|e| AppError::Storage(format!("graph: insert node '{name}': {e}")))?;
            Node {
                id: conn.last_insert_rowid(),
                name,
                entity_type,
                summary: summary.to_string(),
                metadata: "{}".to_string(),
                created_at: now.clone(),
                updated_at: now,
            }
        }
    };

    // Mirror into the FTS index inside the same unit of work.
    conn.execute("DELETE FROM node_index WHERE node_id = ?1", params![node.id])
        .map_err(|e| AppError::Storage(format!("graph: refresh index for {}: {e}", node.id)))?;
    conn.execute(
        "INSERT INTO node_index (node_id, name, summary, type) VALUES (?1, ?2, ?3, ?4)",
        params![node.id, node.name, node.summary, node.entity_type.as_str()],
    )
    .map_err(|e| AppError::Storage(format!("graph: index node {}: {e}", node.id)))?;

    Ok(node)
}

pub(crate) fn upsert_edge_tx(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    relation: &str,
    context: &str,
    initial_weight: f64,
) -> Result<Edge, AppError> {
    let relation = normalize(relation);
    let now = now_iso8601();

    let existing = conn
        .query_row(
            "SELECT id, source_id, target_id, relation, weight, context, created_at, updated_at
             FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
            params![source_id, target_id, relation],
            edge_from_row,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("graph: lookup edge '{relation}': {e}")))?;

    let edge = match existing {
        Some(mut edge) => {
            edge.weight = (edge.weight + EDGE_WEIGHT_STEP).min(EDGE_WEIGHT_CAP);
            if context.chars().count() > edge.context.chars().count() {
                edge.context = context.to_string();
            }
            edge.updated_at = now;
            conn.execute(
                "UPDATE edges SET weight = ?1, context = ?2, updated_at = ?3 WHERE id = ?4",
                params![edge.weight, edge.context, edge.updated_at, edge.id],
            )
            .map_err(|e| AppError::Storage(format!("graph: update edge {}: {e}", edge.id)))?;
            edge
        }
        None => {
            conn.execute(
                "INSERT INTO edges (source_id, target_id, relation, weight, context, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![source_id, target_id, relation, initial_weight, context, now],
            )
            .map_err(|e| AppError::Storage(format!("graph: insert edge '{relation}': {e}")))?;
            Edge {
                id: conn.last_insert_rowid(),
                source_id,
                target_id,
                relation,
                weight: initial_weight,
                context: context.to_string(),
                created_at: now.clone(),
                updated_at: now,
            }
        }
    };

    Ok(edge)
}

pub(crate) fn add_observation_conn(
    conn: &Connection,
    source: &str,
    raw_text: &str,
    entities_json: &str,
    session_key: &str,
) -> Result<Observation, AppError> {
    let processed_at = if entities_json.is_empty() { None } else { Some(now_iso8601()) };
    conn.execute(
        "INSERT INTO observations (source, raw_text, entities_json, session_key, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![source, raw_text, entities_json, session_key, processed_at],
    )
    .map_err(|e| AppError::Storage(format!("graph: insert observation: {e}")))?;
    Ok(Observation {
        id: conn.last_insert_rowid(),
        source: source.to_string(),
        raw_text: raw_text.to_string(),
        entities_json: entities_json.to_string(),
        session_key: session_key.to_string(),
        processed_at,
    })
}

pub(crate) fn get_neighbors_conn(
    conn: &Connection,
    node_id: i64,
) -> Result<Vec<Neighbor>, AppError> {
    let mut neighbors = Vec::new();
    for (sql, direction) in [
        (
            "SELECT e.id, e.source_id, e.target_id, e.relation, e.weight, e.context,
                    e.created_at, e.updated_at,
                    n.id, n.name, n.type, n.summary, n.metadata, n.created_at, n.updated_at
             FROM edges e JOIN nodes n ON n.id = e.target_id
             WHERE e.source_id = ?1 ORDER BY e.weight DESC, e.id ASC",
            Direction::Outgoing,
        ),
        (
            "SELECT e.id, e.source_id, e.target_id, e.relation, e.weight, e.context,
                    e.created_at, e.updated_at,
                    n.id, n.name, n.type, n.summary, n.metadata, n.created_at, n.updated_at
             FROM edges e JOIN nodes n ON n.id = e.source_id
             WHERE e.target_id = ?1 ORDER BY e.weight DESC, e.id ASC",
            Direction::Incoming,
        ),
    ] {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Storage(format!("graph: prepare neighbors: {e}")))?;
        let rows = stmt
            .query_map(params![node_id], |row| {
                let edge = edge_from_row(row)?;
                let type_str: String = row.get(10)?;
                let node = Node {
                    id: row.get(8)?,
                    name: row.get(9)?,
                    entity_type: EntityType::parse_lossy(&type_str),
                    summary: row.get(11)?,
                    metadata: row.get(12)?,
                    created_at: row.get(13)?,
                    updated_at: row.get(14)?,
                };
                Ok(Neighbor { node, edge, direction })
            })
            .map_err(|e| AppError::Storage(format!("graph: query neighbors: {e}")))?;
        for r in rows {
            neighbors.push(r.map_err(|e| AppError::Storage(format!("graph: neighbor row: {e}")))?);
        }
    }
    Ok(neighbors)
}
