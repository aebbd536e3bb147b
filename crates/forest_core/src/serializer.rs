//! IR document schema and (de)serialization
//!
//! The on-disk document is JSON:
//!
//! ```json
//! {
//!   "num_features": 1,
//!   "aggregation": "sum",
//!   "task": "regression",
//!   "base_score": 0.0,
//!   "feature_types": [{"type": "numerical"}],
//!   "trees": [
//!     {"nodes": [
//!       {"id": 0, "type": "split", "feature_index": 0, "operator": "<", "threshold": 0.5, "children": [1, 2]},
//!       {"id": 1, "type": "leaf", "value": -1.0},
//!       {"id": 2, "type": "leaf", "value": 1.0}
//!     ]},
//!     {"nodes": [{"id": 0, "type": "leaf", "value": 2.0}]}
//!   ]
//! }
//! ```
//!
//! Categorical splits use `"operator": "in"` with `"categories": [[..], ..]`
//! and one child per category set plus a trailing fallback child.
//!
//! Every field is optional at the serde level so that a missing field is
//! reported as `MalformedIr` with the path of the node that lacks it.
//! Deserialization validates the whole document eagerly; a `TreeEnsembleIR`
//! obtained from it is safe to evaluate and to hand to the code generator.

use crate::errors::{ForestError, Result};
use crate::ir::{
    Aggregation, ComparisonOp, FeatureType, Node, Predicate, TaskType, Tree, TreeEnsembleIR,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

const LEAF: &str = "leaf";
const SPLIT: &str = "split";
const IN_CATEGORIES: &str = "in";

/// Top-level IR document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_features: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_types: Option<Vec<FeatureType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trees: Option<Vec<TreeDocument>>,
}

/// One tree: a flat list of nodes referencing each other by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeDocument>>,
}

/// One node, tagged by `type`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Vec<u32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<u32>>,
}

/// Convert an ensemble into its document form. Node ids are arena indices.
pub fn serialize(ir: &TreeEnsembleIR) -> IrDocument {
    IrDocument {
        num_features: Some(i64::from(ir.num_features)),
        aggregation: Some(ir.aggregation.as_str().to_string()),
        task: Some(task_name(ir.task).to_string()),
        base_score: Some(ir.base_score),
        feature_types: Some(ir.feature_types.clone()),
        trees: Some(ir.trees.iter().map(serialize_tree).collect()),
    }
}

fn task_name(task: TaskType) -> &'static str {
    match task {
        TaskType::Regression => "regression",
    }
}

fn serialize_tree(tree: &Tree) -> TreeDocument {
    let nodes = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(id, node)| match node {
            Node::Leaf { value } => NodeDocument {
                id: Some(id as u32),
                kind: Some(LEAF.to_string()),
                value: Some(*value),
                ..NodeDocument::default()
            },
            Node::Split {
                feature_index,
                predicate,
                children,
            } => {
                let mut doc = NodeDocument {
                    id: Some(id as u32),
                    kind: Some(SPLIT.to_string()),
                    feature_index: Some(i64::from(*feature_index)),
                    children: Some(children.clone()),
                    ..NodeDocument::default()
                };
                match predicate {
                    Predicate::Compare { op, threshold } => {
                        doc.operator = Some(op.as_str().to_string());
                        doc.threshold = Some(*threshold);
                    }
                    Predicate::InCategories { sets } => {
                        doc.operator = Some(IN_CATEGORIES.to_string());
                        doc.categories = Some(sets.clone());
                    }
                }
                doc
            }
        })
        .collect();

    TreeDocument { nodes: Some(nodes) }
}

/// Validate a document and build the ensemble it describes
pub fn deserialize(doc: IrDocument) -> Result<TreeEnsembleIR> {
    let num_features = doc
        .num_features
        .ok_or_else(|| ForestError::malformed("num_features", "missing required field"))?;
    let num_features = u32::try_from(num_features).map_err(|_| {
        ForestError::malformed("num_features", format!("invalid feature count {num_features}"))
    })?;

    let aggregation = match doc.aggregation.as_deref() {
        Some("sum") => Aggregation::Sum,
        Some("mean") => Aggregation::Mean,
        Some(other) => {
            return Err(ForestError::malformed(
                "aggregation",
                format!("unknown aggregation `{other}`"),
            ))
        }
        None => return Err(ForestError::malformed("aggregation", "missing required field")),
    };

    let task = match doc.task.as_deref() {
        None | Some("regression") => TaskType::Regression,
        Some(other) => {
            return Err(ForestError::malformed("task", format!("unsupported task `{other}`")))
        }
    };

    let base_score = doc.base_score.unwrap_or(0.0);
    let feature_types = doc
        .feature_types
        .unwrap_or_else(|| vec![FeatureType::Numerical; num_features as usize]);

    if feature_types.len() != num_features as usize {
        return Err(ForestError::malformed(
            "feature_types",
            format!(
                "{} feature types declared for {} features",
                feature_types.len(),
                num_features
            ),
        ));
    }

    let tree_docs = doc
        .trees
        .ok_or_else(|| ForestError::malformed("trees", "missing required field"))?;
    if tree_docs.is_empty() {
        return Err(ForestError::malformed("trees", "ensemble has no trees"));
    }

    let mut trees = Vec::with_capacity(tree_docs.len());
    for (t, tree_doc) in tree_docs.into_iter().enumerate() {
        let (tree, ids) = deserialize_tree(t, tree_doc)?;
        tree.check(&feature_types, |i| format!("trees[{t}].nodes[id={}]", ids[i]))?;
        trees.push(tree);
    }

    let ir = TreeEnsembleIR {
        num_features,
        aggregation,
        task,
        base_score,
        feature_types,
        trees,
    };
    ir.validate()?;

    debug!(
        "Deserialized ensemble: {} trees, {} features, {} aggregation",
        ir.num_trees(),
        ir.num_features,
        ir.aggregation.as_str()
    );
    Ok(ir)
}

/// Returns the tree and, per arena index, the document id it came from.
fn deserialize_tree(t: usize, doc: TreeDocument) -> Result<(Tree, Vec<u32>)> {
    let node_docs = doc
        .nodes
        .ok_or_else(|| {
            ForestError::malformed(format!("trees[{t}]"), "missing required field `nodes`")
        })?;
    if node_docs.is_empty() {
        return Err(ForestError::malformed(format!("trees[{t}]"), "tree has no nodes"));
    }

    let mut doc_ids = Vec::with_capacity(node_docs.len());
    for (pos, node) in node_docs.iter().enumerate() {
        let id = node.id.ok_or_else(|| {
            ForestError::malformed(
                format!("trees[{t}].nodes[{pos}]"),
                "missing required field `id`",
            )
        })?;
        doc_ids.push(id);
    }

    // Root (id 0) first, everything else in document order.
    let root_pos = doc_ids
        .iter()
        .position(|&id| id == 0)
        .ok_or_else(|| ForestError::malformed(format!("trees[{t}]"), "missing root node (id 0)"))?;
    let mut order = Vec::with_capacity(node_docs.len());
    order.push(root_pos);
    order.extend((0..node_docs.len()).filter(|&pos| pos != root_pos));

    let mut arena_of: HashMap<u32, u32> = HashMap::with_capacity(node_docs.len());
    for (arena_idx, &pos) in order.iter().enumerate() {
        let id = doc_ids[pos];
        if arena_of.insert(id, arena_idx as u32).is_some() {
            return Err(ForestError::malformed(
                format!("trees[{t}].nodes[id={id}]"),
                "duplicate node id",
            ));
        }
    }

    let mut slots: Vec<Option<NodeDocument>> = node_docs.into_iter().map(Some).collect();
    let mut nodes = Vec::with_capacity(order.len());
    let mut ids = Vec::with_capacity(order.len());

    for &pos in &order {
        let id = doc_ids[pos];
        let path = format!("trees[{t}].nodes[id={id}]");
        let node_doc = slots[pos].take().unwrap_or_default();
        nodes.push(deserialize_node(&path, node_doc, &arena_of)?);
        ids.push(id);
    }

    Ok((Tree::new(nodes), ids))
}

fn deserialize_node(path: &str, doc: NodeDocument, arena_of: &HashMap<u32, u32>) -> Result<Node> {
    let missing = |field: &str| {
        ForestError::malformed(path, format!("missing required field `{field}`"))
    };

    match doc.kind.as_deref() {
        Some(LEAF) => {
            let value = doc.value.ok_or_else(|| missing("value"))?;
            Ok(Node::leaf(value))
        }
        Some(SPLIT) => {
            let feature_index = doc.feature_index.ok_or_else(|| missing("feature_index"))?;
            let feature_index = u32::try_from(feature_index).map_err(|_| {
                ForestError::malformed(path, format!("feature index {feature_index} out of range"))
            })?;
            let operator = doc.operator.ok_or_else(|| missing("operator"))?;

            let predicate = if operator == IN_CATEGORIES {
                let sets = doc.categories.ok_or_else(|| missing("categories"))?;
                Predicate::InCategories { sets }
            } else {
                let op = ComparisonOp::parse(&operator).ok_or_else(|| {
                    ForestError::malformed(path, format!("unknown operator `{operator}`"))
                })?;
                let threshold = doc.threshold.ok_or_else(|| missing("threshold"))?;
                Predicate::Compare { op, threshold }
            };

            let children = doc
                .children
                .ok_or_else(|| missing("children"))?
                .into_iter()
                .map(|child| {
                    arena_of.get(&child).copied().ok_or_else(|| {
                        ForestError::malformed(path, format!("dangling child reference {child}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(Node::Split {
                feature_index,
                predicate,
                children,
            })
        }
        Some(other) => Err(ForestError::malformed(path, format!("unknown node type `{other}`"))),
        None => Err(missing("type")),
    }
}

impl TreeEnsembleIR {
    pub fn to_document(&self) -> IrDocument {
        serialize(self)
    }

    pub fn from_document(doc: IrDocument) -> Result<Self> {
        deserialize(doc)
    }

    /// Human-readable JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&serialize(self))?)
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: IrDocument = serde_json::from_str(json)
            .map_err(|e| ForestError::malformed("$", e.to_string()))?;
        deserialize(doc)
    }

    /// Canonical JSON (sorted keys, no whitespace)
    ///
    /// Going through `serde_json::Value` sorts object keys: its map is a
    /// `BTreeMap` since the workspace never enables `preserve_order`.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(serialize(self))?;
        Ok(serde_json::to_string(&value)?)
    }

    /// BLAKE3 hex digest of the canonical JSON document
    pub fn fingerprint(&self) -> Result<String> {
        let hash = blake3::hash(self.to_canonical_json()?.as_bytes());
        Ok(hex::encode(hash.as_bytes()))
    }

    /// Save as canonical JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_canonical_json()?)?;
        Ok(())
    }

    /// Load and validate a JSON document from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading IR document from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
