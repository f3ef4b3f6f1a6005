//! Cross-record relationship graph used as a disambiguation signal.
//!
//! Nodes are records namespaced by source collection; edges capture shared
//! organizations, locations, mentions and contact patterns. The graph is
//! built once per run, single-threaded and deterministic; all queries are
//! read-only and may be shared across workers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use coalesce_match::normalize;
use coalesce_types::{EntityType, GraphSignal, Record};

// ── model ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    SharedOrganization,
    SharedLocation,
    SharedEvent,
    SharedContact,
    MentionedIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationKind,
    /// Relationship strength in [0, 1].
    pub strength: f64,
    /// Confidence in the relationship itself, in [0, 1].
    pub confidence: f64,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub data: Record,
    pub neighbors: BTreeSet<String>,
    /// Strongest edge per neighbor; edges own nothing, this map is the
    /// adjacency the traversals walk.
    pub edge_strength: BTreeMap<String, f64>,
    pub centrality: f64,
    pub cluster_id: Option<u64>,
}

/// Aggregate shape of the built graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub mean_degree: f64,
    pub relation_kinds: usize,
    pub cluster_count: usize,
    pub largest_cluster: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphSettings {
    /// Minimum edge strength followed when forming clusters.
    pub clustering_threshold: f64,
    /// Edges weaker than this are discarded at build time.
    pub min_relationship_strength: f64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            clustering_threshold: 0.6,
            min_relationship_strength: 0.3,
        }
    }
}

// ── relation weights ──────────────────────────────────────────────────────────

const SHARED_ORGANIZATION_WEIGHT: f64 = 0.8;
const SHARED_LOCATION_WEIGHT: f64 = 0.6;
const MENTION_WEIGHT: f64 = 0.3;
const SHARED_EMAIL_DOMAIN_WEIGHT: f64 = 0.4;
const SHARED_PHONE_SUFFIX_WEIGHT: f64 = 0.3;

const ORGANIZATION_FIELDS: &[&str] = &["organization", "company", "affiliation", "key_people"];
const LOCATION_FIELDS: &[&str] = &["address", "location", "venue", "place"];
const MENTION_FIELDS: &[&str] = &["description", "notes", "people_involved", "tagged_entities"];

// ── analyzer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct GraphAnalyzer {
    settings: GraphSettings,
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<Edge>,
    metrics: NetworkMetrics,
}

impl GraphAnalyzer {
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Build the relationship graph from every collection.
    ///
    /// Replaces any previously built graph. Node ids are namespaced as
    /// `{collection}:{record_id}`; records without an id get a hashed
    /// fallback so ids stay globally unique.
    pub fn build(&mut self, collections: &BTreeMap<String, Vec<Record>>) {
        self.nodes.clear();
        self.edges.clear();

        for (collection, records) in collections {
            let entity_type = EntityType::for_collection(collection);
            for record in records {
                let entity_id = entity_id_for(collection, record);
                self.nodes.insert(
                    entity_id.clone(),
                    GraphNode {
                        entity_id,
                        entity_type,
                        data: record.clone(),
                        neighbors: BTreeSet::new(),
                        edge_strength: BTreeMap::new(),
                        centrality: 0.0,
                        cluster_id: None,
                    },
                );
            }
        }

        self.link_nodes();
        self.compute_centrality();
        self.assign_clusters();
        self.metrics = self.compute_metrics();

        tracing::info!(
            nodes = self.metrics.node_count,
            edges = self.metrics.edge_count,
            clusters = self.metrics.cluster_count,
            "relationship graph built"
        );
    }

    fn link_nodes(&mut self) {
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let node_a = &self.nodes[&ids[i]];
                let node_b = &self.nodes[&ids[j]];
                let edges = relate(&node_a.data, &node_b.data, &ids[i], &ids[j]);
                for edge in edges {
                    if edge.strength < self.settings.min_relationship_strength {
                        continue;
                    }
                    self.attach(edge);
                }
            }
        }
    }

    fn attach(&mut self, edge: Edge) {
        if let Some(node) = self.nodes.get_mut(&edge.source_id) {
            node.neighbors.insert(edge.target_id.clone());
            let entry = node.edge_strength.entry(edge.target_id.clone()).or_insert(0.0);
            *entry = entry.max(edge.strength);
        }
        if let Some(node) = self.nodes.get_mut(&edge.target_id) {
            node.neighbors.insert(edge.source_id.clone());
            let entry = node.edge_strength.entry(edge.source_id.clone()).or_insert(0.0);
            *entry = entry.max(edge.strength);
        }
        self.edges.push(edge);
    }

    /// Degree centrality normalized by the maximum degree in the graph.
    fn compute_centrality(&mut self) {
        let max_degree = self
            .nodes
            .values()
            .map(|n| n.neighbors.len())
            .max()
            .unwrap_or(0);
        if max_degree == 0 {
            return;
        }
        for node in self.nodes.values_mut() {
            node.centrality = node.neighbors.len() as f64 / max_degree as f64;
        }
    }

    /// Greedy connected-component walk following edges at or above the
    /// clustering threshold. Singleton components carry no cluster id.
    fn assign_clusters(&mut self) {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut next_cluster: u64 = 0;
        let ids: Vec<String> = self.nodes.keys().cloned().collect();

        for start in ids {
            if visited.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(current) = stack.pop() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                let Some(node) = self.nodes.get(&current) else {
                    continue;
                };
                component.push(current.clone());
                for (neighbor, strength) in &node.edge_strength {
                    if !visited.contains(neighbor) && *strength >= self.settings.clustering_threshold {
                        stack.push(neighbor.clone());
                    }
                }
            }
            if component.len() > 1 {
                for id in &component {
                    if let Some(node) = self.nodes.get_mut(id) {
                        node.cluster_id = Some(next_cluster);
                    }
                }
                next_cluster += 1;
            }
        }
    }

    fn compute_metrics(&self) -> NetworkMetrics {
        let node_count = self.nodes.len();
        let degree_total: usize = self.nodes.values().map(|n| n.neighbors.len()).sum();
        let kinds: BTreeSet<RelationKind> = self.edges.iter().map(|e| e.kind).collect();
        let mut cluster_sizes: BTreeMap<u64, usize> = BTreeMap::new();
        for node in self.nodes.values() {
            if let Some(cluster) = node.cluster_id {
                *cluster_sizes.entry(cluster).or_insert(0) += 1;
            }
        }
        NetworkMetrics {
            node_count,
            edge_count: self.edges.len(),
            mean_degree: if node_count > 0 {
                degree_total as f64 / node_count as f64
            } else {
                0.0
            },
            relation_kinds: kinds.len(),
            cluster_count: cluster_sizes.len(),
            largest_cluster: cluster_sizes.values().copied().max().unwrap_or(0),
        }
    }

    pub fn node(&self, entity_id: &str) -> Option<&GraphNode> {
        self.nodes.get(entity_id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    /// Contextual disambiguation signal for a pair of entities.
    ///
    /// Missing nodes yield `None`, as does a pair whose graph context is too
    /// weak to be meaningful.
    pub fn pair_signal(&self, entity_a: &str, entity_b: &str) -> Option<GraphSignal> {
        let node_a = self.nodes.get(entity_a)?;
        let node_b = self.nodes.get(entity_b)?;

        let mut confidence = 0.0;
        let mut evidence = Vec::new();

        if let Some(direct) = self.direct_edge(entity_a, entity_b) {
            confidence += direct.strength * 0.4;
            evidence.push(format!("direct {:?} relationship", direct.kind));
        }

        let shared: Vec<&String> = node_a.neighbors.intersection(&node_b.neighbors).collect();
        if !shared.is_empty() {
            let total: f64 = shared
                .iter()
                .map(|n| {
                    node_a
                        .edge_strength
                        .get(*n)
                        .copied()
                        .unwrap_or(0.0)
                        .min(node_b.edge_strength.get(*n).copied().unwrap_or(0.0))
                })
                .sum();
            confidence += total / shared.len() as f64 * 0.3;
            evidence.push(format!("{} shared connections", shared.len()));
        }

        if (node_a.centrality - node_b.centrality).abs() < 0.2 {
            confidence += 0.2;
            evidence.push("similar network centrality".to_string());
        }

        if confidence > 0.1 {
            Some(GraphSignal {
                confidence: confidence.min(1.0),
                evidence,
            })
        } else {
            None
        }
    }

    fn direct_edge(&self, entity_a: &str, entity_b: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| {
            (e.source_id == entity_a && e.target_id == entity_b)
                || (e.source_id == entity_b && e.target_id == entity_a)
        })
    }
}

/// Namespaced node id; hashes the serialized record when it carries no id.
pub fn entity_id_for(collection: &str, record: &Record) -> String {
    let id = record.id();
    if !id.is_empty() {
        return format!("{collection}:{id}");
    }
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&record.to_value()).unwrap_or_default());
    let digest = format!("{:x}", hasher.finalize());
    format!("{collection}:{}", &digest[..16])
}

// ── edge detection ────────────────────────────────────────────────────────────

fn relate(a: &Record, b: &Record, id_a: &str, id_b: &str) -> Vec<Edge> {
    let mut edges = Vec::new();
    if let Some(edge) = shared_organization(a, b, id_a, id_b) {
        edges.push(edge);
    }
    if let Some(edge) = shared_location(a, b, id_a, id_b) {
        edges.push(edge);
    }
    if let Some(edge) = mention_edge(a, b, id_a, id_b) {
        edges.push(edge);
    }
    if let Some(edge) = shared_contact(a, b, id_a, id_b) {
        edges.push(edge);
    }
    edges
}

fn shared_organization(a: &Record, b: &Record, id_a: &str, id_b: &str) -> Option<Edge> {
    let mut evidence = Vec::new();
    let mut checked = 0usize;
    let mut matches = 0usize;

    for field in ORGANIZATION_FIELDS {
        let value_a = a.text(field).to_lowercase();
        let value_b = b.text(field).to_lowercase();
        if value_a.is_empty() || value_b.is_empty() {
            continue;
        }
        checked += 1;
        if value_a == value_b {
            evidence.push(format!("shared {field}: {value_a}"));
            matches += 1;
        }
    }

    if matches == 0 {
        return None;
    }
    Some(Edge {
        source_id: id_a.to_string(),
        target_id: id_b.to_string(),
        kind: RelationKind::SharedOrganization,
        strength: (SHARED_ORGANIZATION_WEIGHT * matches as f64 / checked as f64).min(1.0),
        confidence: (matches as f64 * 0.3).min(1.0),
        evidence,
    })
}

fn shared_location(a: &Record, b: &Record, id_a: &str, id_b: &str) -> Option<Edge> {
    let mut evidence = Vec::new();
    let mut matches = 0.0f64;

    for field in LOCATION_FIELDS {
        let value_a = a.text(field).to_lowercase();
        let value_b = b.text(field).to_lowercase();
        if value_a.is_empty() || value_b.is_empty() {
            continue;
        }
        if value_a == value_b {
            evidence.push(format!("same {field}: {value_a}"));
            matches += 1.0;
        } else {
            let tokens_a = normalize::key_tokens(&value_a);
            let tokens_b = normalize::key_tokens(&value_b);
            if normalize::token_jaccard(&tokens_a, &tokens_b) > 0.8 {
                evidence.push(format!("similar {field}: {value_a} / {value_b}"));
                matches += 0.5;
            }
        }
    }

    if matches == 0.0 {
        return None;
    }
    Some(Edge {
        source_id: id_a.to_string(),
        target_id: id_b.to_string(),
        kind: RelationKind::SharedLocation,
        strength: (matches * SHARED_LOCATION_WEIGHT).min(1.0),
        confidence: (matches * 0.4).min(1.0),
        evidence,
    })
}

/// Substring mentions of one entity's name inside the other's text fields.
/// Mutual mentions become a `SharedEvent` edge, one-directional mentions a
/// `MentionedIn` edge.
fn mention_edge(a: &Record, b: &Record, id_a: &str, id_b: &str) -> Option<Edge> {
    let name_a = a.text("name").to_lowercase();
    let name_b = b.text("name").to_lowercase();

    let mut strength = 0.0f64;
    let mut evidence = Vec::new();
    let mut a_mentioned = false;
    let mut b_mentioned = false;

    for field in MENTION_FIELDS {
        if !name_a.is_empty() && b.text(field).to_lowercase().contains(&name_a) {
            evidence.push(format!("{name_a} mentioned in counterpart {field}"));
            strength += MENTION_WEIGHT;
            a_mentioned = true;
        }
        if !name_b.is_empty() && a.text(field).to_lowercase().contains(&name_b) {
            evidence.push(format!("{name_b} mentioned in counterpart {field}"));
            strength += MENTION_WEIGHT;
            b_mentioned = true;
        }
    }

    if evidence.is_empty() {
        return None;
    }
    let kind = if a_mentioned && b_mentioned {
        RelationKind::SharedEvent
    } else {
        RelationKind::MentionedIn
    };
    Some(Edge {
        source_id: id_a.to_string(),
        target_id: id_b.to_string(),
        kind,
        strength: strength.min(1.0),
        confidence: (evidence.len() as f64 * 0.3).min(1.0),
        evidence,
    })
}

fn shared_contact(a: &Record, b: &Record, id_a: &str, id_b: &str) -> Option<Edge> {
    let mut strength = 0.0f64;
    let mut evidence = Vec::new();

    let domain_a = normalize::email_domain(&a.text("email"));
    let domain_b = normalize::email_domain(&b.text("email"));
    if !domain_a.is_empty() && domain_a == domain_b {
        evidence.push(format!("shared email domain: {domain_a}"));
        strength += SHARED_EMAIL_DOMAIN_WEIGHT;
    }

    let digits_a = normalize::phone_digits(&a.text("phone"));
    let digits_b = normalize::phone_digits(&b.text("phone"));
    if digits_a.len() >= 7 && digits_b.len() >= 7 && digits_a[digits_a.len() - 7..] == digits_b[digits_b.len() - 7..]
    {
        evidence.push("matching phone suffix".to_string());
        strength += SHARED_PHONE_SUFFIX_WEIGHT;
    }

    if evidence.is_empty() {
        return None;
    }
    Some(Edge {
        source_id: id_a.to_string(),
        target_id: id_b.to_string(),
        kind: RelationKind::SharedContact,
        strength: strength.min(1.0),
        confidence: (evidence.len() as f64 * 0.4).min(1.0),
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(&value).expect("object")
    }

    fn people_graph() -> (GraphAnalyzer, BTreeMap<String, Vec<Record>>) {
        let mut collections = BTreeMap::new();
        collections.insert(
            "people".to_string(),
            vec![
                record(json!({
                    "id": "p1",
                    "name": "Anthony Smith",
                    "organization": "Swanage Town Council",
                    "email": "tony@swanage.gov.uk",
                    "address": "Town Hall, Swanage"
                })),
                record(json!({
                    "id": "p2",
                    "name": "Tony Smith",
                    "organization": "Swanage Town Council",
                    "email": "t.smith@swanage.gov.uk",
                    "address": "Town Hall, Swanage"
                })),
                record(json!({
                    "id": "p3",
                    "name": "Unrelated Person",
                    "organization": "Elsewhere Ltd",
                    "email": "x@elsewhere.com"
                })),
            ],
        );
        let mut analyzer = GraphAnalyzer::new(GraphSettings::default());
        analyzer.build(&collections);
        (analyzer, collections)
    }

    #[test]
    fn builds_namespaced_nodes() {
        let (analyzer, _) = people_graph();
        assert!(analyzer.node("people:p1").is_some());
        assert!(analyzer.node("people:p2").is_some());
        assert_eq!(analyzer.metrics().node_count, 3);
    }

    #[test]
    fn records_without_ids_get_unique_hashed_ids() {
        let a = record(json!({"name": "Alpha"}));
        let b = record(json!({"name": "Beta"}));
        let id_a = entity_id_for("docs", &a);
        let id_b = entity_id_for("docs", &b);
        assert_ne!(id_a, id_b);
        assert!(id_a.starts_with("docs:"));
    }

    #[test]
    fn shared_organization_creates_an_edge() {
        let (analyzer, _) = people_graph();
        let node = analyzer.node("people:p1").unwrap();
        assert!(node.neighbors.contains("people:p2"));
        assert!(node.edge_strength["people:p2"] > 0.0);
    }

    #[test]
    fn strong_components_get_cluster_ids() {
        let (analyzer, _) = people_graph();
        let p1 = analyzer.node("people:p1").unwrap();
        let p2 = analyzer.node("people:p2").unwrap();
        let p3 = analyzer.node("people:p3").unwrap();
        assert!(p1.cluster_id.is_some());
        assert_eq!(p1.cluster_id, p2.cluster_id);
        assert_eq!(p3.cluster_id, None);
    }

    #[test]
    fn centrality_is_normalized_by_max_degree() {
        let (analyzer, _) = people_graph();
        for node in ["people:p1", "people:p2", "people:p3"] {
            let centrality = analyzer.node(node).unwrap().centrality;
            assert!((0.0..=1.0).contains(&centrality));
        }
        assert_eq!(analyzer.node("people:p1").unwrap().centrality, 1.0);
    }

    #[test]
    fn pair_signal_combines_direct_and_context() {
        let (analyzer, _) = people_graph();
        let signal = analyzer.pair_signal("people:p1", "people:p2").unwrap();
        assert!(signal.confidence > 0.1);
        assert!(signal.confidence <= 1.0);
        assert!(!signal.evidence.is_empty());
    }

    #[test]
    fn missing_nodes_yield_none() {
        let (analyzer, _) = people_graph();
        assert!(analyzer.pair_signal("people:p1", "people:nope").is_none());
        assert!(analyzer.pair_signal("ghost:a", "ghost:b").is_none());
    }

    #[test]
    fn mentions_create_edges() {
        let mut collections = BTreeMap::new();
        collections.insert(
            "events".to_string(),
            vec![
                record(json!({
                    "id": "e1",
                    "name": "Harbour Meeting",
                    "description": "Chaired by Jane Doe at the harbour office"
                })),
                record(json!({"id": "e2", "name": "Jane Doe"})),
            ],
        );
        let mut analyzer = GraphAnalyzer::new(GraphSettings {
            min_relationship_strength: 0.1,
            ..GraphSettings::default()
        });
        analyzer.build(&collections);
        let edge = analyzer
            .edges()
            .iter()
            .find(|e| e.kind == RelationKind::MentionedIn)
            .expect("mention edge");
        assert!(edge.strength > 0.0);
    }

    #[test]
    fn shared_contact_detects_domain_and_phone_suffix() {
        let a = record(json!({"email": "a@swanage.gov.uk", "phone": "01234 567 890"}));
        let b = record(json!({"email": "b@swanage.gov.uk", "phone": "+44 1234 567890"}));
        let edge = shared_contact(&a, &b, "x:a", "x:b").expect("contact edge");
        assert_eq!(edge.kind, RelationKind::SharedContact);
        assert!((edge.strength - 0.7).abs() < 1e-9);
        assert_eq!(edge.evidence.len(), 2);
    }
}
