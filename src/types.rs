//! Core data model and the extraction boundary.
//!
//! Nodes, edges, and observations mirror the three persisted tables one to
//! one. [`ExtractionResult`] is the inbound contract from the external
//! extraction collaborator; [`ExtractionResult::from_json_value`] is the only
//! place untyped JSON is validated — unknown categories default to
//! [`EntityType::Other`] and string fields are length-bounded here, never
//! inside the store.

use serde_json::Value;

// ── Boundary bounds ───────────────────────────────────────────────────────────

/// Maximum entity name length accepted at the extraction boundary.
const NAME_MAX: usize = 200;
/// Maximum summary length accepted at the extraction boundary.
const SUMMARY_MAX: usize = 1000;
/// Maximum relation label length accepted at the extraction boundary.
const RELATION_MAX: usize = 100;
/// Maximum edge context length accepted at the extraction boundary.
const CONTEXT_MAX: usize = 500;

// ── Entity types ──────────────────────────────────────────────────────────────

/// Closed set of category tags for graph entities.
///
/// The extraction boundary maps anything unrecognised to [`EntityType::Other`];
/// the store itself assumes the value is already valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Organization,
    Tool,
    Concept,
    Event,
    Place,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Project => "project",
            EntityType::Organization => "organization",
            EntityType::Tool => "tool",
            EntityType::Concept => "concept",
            EntityType::Event => "event",
            EntityType::Place => "place",
            EntityType::Other => "other",
        }
    }

    /// Lenient parse used at the extraction boundary and when reading rows
    /// back from storage. Anything unrecognised becomes `Other`.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "person" => EntityType::Person,
            "project" => EntityType::Project,
            "organization" | "org" | "company" => EntityType::Organization,
            "tool" => EntityType::Tool,
            "concept" => EntityType::Concept,
            "event" => EntityType::Event,
            "place" | "location" => EntityType::Place,
            _ => EntityType::Other,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Graph rows ────────────────────────────────────────────────────────────────

/// A uniquely named, typed entity in the graph.
///
/// `name` is stored normalized (trimmed, lower-cased) and is the unique key;
/// `id` is the store-assigned rowid and is stable for the node's lifetime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub summary: String,
    /// Opaque structured blob (JSON text), currently `"{}"` beyond export.
    #[serde(default)]
    pub metadata: String,
    /// ISO 8601 timestamp of first insertion.
    pub created_at: String,
    /// ISO 8601 timestamp of the last merge that changed the row.
    pub updated_at: String,
}

/// A directed, weighted relationship between two nodes.
///
/// The triple `(source_id, target_id, relation)` is unique; direction matters.
/// Edges hold non-owning references to node ids — deleting a node cascades
/// deletion of its edges.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Edge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    /// Normalized (trimmed, lower-cased) free-form label.
    pub relation: String,
    /// Starts at 1.0, +0.1 per re-assertion of the same triple, capped at 5.0.
    pub weight: f64,
    pub context: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A unit of raw captured text, awaiting or having undergone extraction.
///
/// `entities_json` empty means pending; non-empty means processed and holds a
/// serialized record of what was extracted. Observations are never mutated
/// after processing — they are a pure append log of provenance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Observation {
    pub id: i64,
    /// Origin tag of the raw text (conversation turn, transcript, buffer, …).
    pub source: String,
    pub raw_text: String,
    pub entities_json: String,
    pub session_key: String,
    pub processed_at: Option<String>,
}

// ── Query results ─────────────────────────────────────────────────────────────

/// Which side of an edge the queried node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outgoing => write!(f, "outgoing"),
            Direction::Incoming => write!(f, "incoming"),
        }
    }
}

/// One edge touching a queried node, paired with the node on the other end.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Neighbor {
    pub node: Node,
    pub edge: Edge,
    pub direction: Direction,
}

/// Outbound contract to search/recall consumers: a matched node with its full
/// neighbor list and, for recall results, the heuristic score.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphSearchResult {
    pub node: Node,
    pub neighbors: Vec<Neighbor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Row counts across the three tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreStats {
    pub nodes: u64,
    pub edges: u64,
    pub observations: u64,
}

/// Full dump of all three tables, for backup and inspection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub observations: Vec<Observation>,
}

// ── Extraction boundary ───────────────────────────────────────────────────────

/// A candidate entity produced by the external extraction step.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedNode {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub summary: String,
}

/// A candidate relationship produced by the external extraction step.
/// Endpoints are named, not id'd — resolution happens batch-locally at
/// ingestion time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default)]
    pub context: String,
}

/// The inbound contract from the extraction collaborator.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub nodes: Vec<ExtractedNode>,
    #[serde(default)]
    pub edges: Vec<ExtractedEdge>,
}

impl ExtractionResult {
    /// Validate untyped extractor JSON into a typed result.
    ///
    /// Tolerant by design: missing arrays become empty, entries without a
    /// usable name (or edge endpoints/relation) are skipped, unknown entity
    /// categories default to `other`, and every string field is clamped to
    /// its boundary bound. Never errors — a hostile extractor can produce an
    /// empty batch, not a failure.
    pub fn from_json_value(value: &Value) -> Self {
        let mut result = ExtractionResult::default();

        if let Some(nodes) = value.get("nodes").and_then(Value::as_array) {
            for entry in nodes {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let name = truncate_chars(name.trim(), NAME_MAX);
                if name.is_empty() {
                    continue;
                }
                let entity_type = entry
                    .get("type")
                    .and_then(Value::as_str)
                    .map(EntityType::parse_lossy)
                    .unwrap_or(EntityType::Other);
                let summary = entry
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(|s| truncate_chars(s, SUMMARY_MAX))
                    .unwrap_or_default();
                result.nodes.push(ExtractedNode { name, entity_type, summary });
            }
        }

        if let Some(edges) = value.get("edges").and_then(Value::as_array) {
            for entry in edges {
                let from = entry.get("from").and_then(Value::as_str).unwrap_or("").trim();
                let to = entry.get("to").and_then(Value::as_str).unwrap_or("").trim();
                let relation = entry.get("relation").and_then(Value::as_str).unwrap_or("").trim();
                if from.is_empty() || to.is_empty() || relation.is_empty() {
                    continue;
                }
                let context = entry
                    .get("context")
                    .and_then(Value::as_str)
                    .map(|s| truncate_chars(s, CONTEXT_MAX))
                    .unwrap_or_default();
                result.edges.push(ExtractedEdge {
                    from: truncate_chars(from, NAME_MAX),
                    to: truncate_chars(to, NAME_MAX),
                    relation: truncate_chars(relation, RELATION_MAX),
                    context,
                });
            }
        }

        result
    }
}

/// Clamp a string to at most `max` characters, on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_type_round_trip() {
        for t in [
            EntityType::Person,
            EntityType::Project,
            EntityType::Organization,
            EntityType::Tool,
            EntityType::Concept,
            EntityType::Event,
            EntityType::Place,
            EntityType::Other,
        ] {
            assert_eq!(EntityType::parse_lossy(t.as_str()), t);
        }
    }

    #[test]
    fn unknown_category_defaults_to_other() {
        assert_eq!(EntityType::parse_lossy("gizmo"), EntityType::Other);
        assert_eq!(EntityType::parse_lossy(""), EntityType::Other);
        assert_eq!(EntityType::parse_lossy("  Person "), EntityType::Person);
    }

    #[test]
    fn boundary_accepts_well_formed_payload() {
        let v = json!({
            "nodes": [{"name": "Alice", "type": "person", "summary": "Developer"}],
            "edges": [{"from": "Alice", "to": "ProjectX", "relation": "works_on"}]
        });
        let r = ExtractionResult::from_json_value(&v);
        assert_eq!(r.nodes.len(), 1);
        assert_eq!(r.nodes[0].entity_type, EntityType::Person);
        assert_eq!(r.edges.len(), 1);
        assert_eq!(r.edges[0].context, "");
    }

    #[test]
    fn boundary_skips_unusable_entries() {
        let v = json!({
            "nodes": [{"summary": "no name"}, {"name": "   "}, {"name": "Ok"}],
            "edges": [{"from": "Ok", "to": "", "relation": "x"}, {"from": "Ok"}]
        });
        let r = ExtractionResult::from_json_value(&v);
        assert_eq!(r.nodes.len(), 1);
        assert!(r.edges.is_empty());
    }

    #[test]
    fn boundary_clamps_long_fields() {
        let long = "x".repeat(5000);
        let v = json!({
            "nodes": [{"name": long, "type": "tool", "summary": long}],
            "edges": []
        });
        let r = ExtractionResult::from_json_value(&v);
        assert_eq!(r.nodes[0].name.chars().count(), 200);
        assert_eq!(r.nodes[0].summary.chars().count(), 1000);
    }

    #[test]
    fn boundary_tolerates_non_object_garbage() {
        let r = ExtractionResult::from_json_value(&json!("just a string"));
        assert!(r.nodes.is_empty() && r.edges.is_empty());
        let r = ExtractionResult::from_json_value(&json!({"nodes": 42, "edges": null}));
        assert!(r.nodes.is_empty() && r.edges.is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        assert_eq!(truncate_chars(s, 4), "héll");
        assert_eq!(truncate_chars(s, 100), s);
    }
}
