//! Treelite JSON importer
//!
//! Reads the output of treelite's `dump_as_json()`. Only single-target
//! regressors with scalar leaves and an identity postprocessor are accepted.
//! Numerical tests keep treelite's `[left, right]` order: the left child is
//! taken when `x <op> threshold` holds. Categorical tests become a single
//! category set whose matching child is the one named by
//! `category_list_right_child`.

use crate::errors::{ForestError, Result};
use crate::ir::{FeatureType, TreeEnsembleIR};
use crate::serializer::{deserialize, IrDocument, NodeDocument, TreeDocument};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const NUMERICAL_TEST: &str = "numerical_test_node";
const CATEGORICAL_TEST: &str = "categorical_test_node";
const LEAF_NODE: &str = "leaf_node";

#[derive(Debug, Deserialize)]
struct TreeliteModel {
    num_feature: i64,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    average_tree_output: bool,
    #[serde(default)]
    num_target: Option<u32>,
    #[serde(default)]
    threshold_type: Option<String>,
    #[serde(default)]
    leaf_output_type: Option<String>,
    #[serde(default)]
    postprocessor: Option<String>,
    #[serde(default)]
    base_scores: Option<Vec<f64>>,
    #[serde(default)]
    trees: Vec<TreeliteTree>,
}

#[derive(Debug, Deserialize)]
struct TreeliteTree {
    #[serde(default)]
    nodes: Vec<TreeliteNode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LeafValue {
    Scalar(f64),
    Vector(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct TreeliteNode {
    node_id: u32,
    #[serde(default)]
    leaf_value: Option<LeafValue>,
    #[serde(default)]
    split_feature_id: Option<i64>,
    #[serde(default)]
    default_left: Option<bool>,
    #[serde(default)]
    comparison_op: Option<String>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    left_child: Option<u32>,
    #[serde(default)]
    right_child: Option<u32>,
    #[serde(default)]
    node_type: Option<String>,
    #[serde(default)]
    category_list: Option<Vec<u32>>,
    #[serde(default)]
    category_list_right_child: Option<bool>,
}

fn unsupported(reason: impl Into<String>) -> ForestError {
    ForestError::UnsupportedModel(reason.into())
}

fn check_model(model: &TreeliteModel) -> Result<()> {
    match model.task_type.as_deref() {
        Some("kRegressor") => {}
        Some(other) => return Err(unsupported(format!("task type `{other}`"))),
        None => return Err(unsupported("missing task_type")),
    }
    if let Some(n) = model.num_target {
        if n != 1 {
            return Err(unsupported(format!("{n} targets")));
        }
    }
    // float32 models compare a float-cast input; generated code compares doubles
    for (field, kind) in [
        ("threshold type", &model.threshold_type),
        ("leaf output type", &model.leaf_output_type),
    ] {
        if let Some(kind) = kind.as_deref() {
            if kind != "float64" {
                return Err(unsupported(format!("{field} `{kind}`")));
            }
        }
    }
    if let Some(post) = model.postprocessor.as_deref() {
        if post != "identity" {
            return Err(unsupported(format!("postprocessor `{post}`")));
        }
    }
    if let Some(scores) = &model.base_scores {
        if scores.len() > 1 {
            return Err(unsupported(format!("{} base scores", scores.len())));
        }
    }
    Ok(())
}

/// Categorical cardinalities per feature, `max code + 1`
fn infer_feature_types(model: &TreeliteModel) -> Result<Vec<FeatureType>> {
    let mut numerical = vec![false; usize::try_from(model.num_feature).unwrap_or(0)];
    let mut categorical: BTreeMap<i64, u32> = BTreeMap::new();

    for node in model.trees.iter().flat_map(|tree| &tree.nodes) {
        let Some(feature) = node.split_feature_id else {
            continue;
        };
        match node.node_type.as_deref() {
            Some(NUMERICAL_TEST) => {
                let slot = usize::try_from(feature)
                    .ok()
                    .and_then(|f| numerical.get_mut(f));
                if let Some(slot) = slot {
                    *slot = true;
                }
            }
            Some(CATEGORICAL_TEST) => {
                let max_code = node
                    .category_list
                    .as_deref()
                    .and_then(|codes| codes.iter().max().copied())
                    .unwrap_or(0);
                let cardinality = categorical.entry(feature).or_insert(0);
                *cardinality = (*cardinality).max(max_code.saturating_add(1));
            }
            _ => {}
        }
    }

    let mut types = vec![FeatureType::Numerical; numerical.len()];
    for (&feature, &cardinality) in &categorical {
        let Some(index) = usize::try_from(feature).ok().filter(|&f| f < types.len()) else {
            // left for IR validation to report with the node path
            continue;
        };
        if numerical[index] {
            return Err(unsupported(format!(
                "feature {feature} is used by both numerical and categorical splits"
            )));
        }
        types[index] = FeatureType::Categorical { cardinality };
    }
    Ok(types)
}

fn convert_node(t: usize, node: TreeliteNode) -> Result<NodeDocument> {
    let mut doc = NodeDocument {
        id: Some(node.node_id),
        ..NodeDocument::default()
    };

    match node.node_type.as_deref() {
        None | Some(LEAF_NODE) => {
            doc.kind = Some("leaf".to_string());
            doc.value = match node.leaf_value {
                Some(LeafValue::Scalar(value)) => Some(value),
                Some(LeafValue::Vector(_)) => {
                    return Err(unsupported(format!(
                        "vector leaf output at trees[{t}].nodes[id={}]",
                        node.node_id
                    )))
                }
                None => None,
            };
        }
        Some(NUMERICAL_TEST) => {
            doc.kind = Some("split".to_string());
            doc.feature_index = node.split_feature_id;
            doc.operator = node.comparison_op;
            doc.threshold = node.threshold;
            doc.children = node.left_child.zip(node.right_child).map(|(l, r)| vec![l, r]);
        }
        Some(CATEGORICAL_TEST) => {
            doc.kind = Some("split".to_string());
            doc.feature_index = node.split_feature_id;
            doc.operator = Some("in".to_string());
            doc.categories = node.category_list.map(|codes| vec![codes]);
            let matched_goes_right = node.category_list_right_child.unwrap_or(false);
            doc.children = node.left_child.zip(node.right_child).map(|(l, r)| {
                if matched_goes_right {
                    vec![r, l]
                } else {
                    vec![l, r]
                }
            });
        }
        Some(other) => {
            return Err(unsupported(format!(
                "node type `{other}` at trees[{t}].nodes[id={}]",
                node.node_id
            )))
        }
    }

    Ok(doc)
}

/// Convert a parsed treelite dump into a validated ensemble
fn convert(model: TreeliteModel) -> Result<TreeEnsembleIR> {
    check_model(&model)?;
    let feature_types = infer_feature_types(&model)?;

    let default_left = model
        .trees
        .iter()
        .flat_map(|tree| &tree.nodes)
        .filter(|node| node.default_left == Some(true))
        .count();
    if default_left > 0 {
        info!(
            "Ignoring default_left on {} splits; missing values take the false branch",
            default_left
        );
    }

    let aggregation = if model.average_tree_output { "mean" } else { "sum" };
    let base_score = model
        .base_scores
        .as_deref()
        .and_then(|scores| scores.first().copied())
        .unwrap_or(0.0);

    let trees = model
        .trees
        .into_iter()
        .enumerate()
        .map(|(t, tree)| {
            let nodes = tree
                .nodes
                .into_iter()
                .map(|node| convert_node(t, node))
                .collect::<Result<Vec<_>>>()?;
            Ok(TreeDocument { nodes: Some(nodes) })
        })
        .collect::<Result<Vec<_>>>()?;

    let ir = deserialize(IrDocument {
        num_features: Some(model.num_feature),
        aggregation: Some(aggregation.to_string()),
        task: Some("regression".to_string()),
        base_score: Some(base_score),
        feature_types: Some(feature_types),
        trees: Some(trees),
    })?;

    debug!(
        "Imported treelite model: {} trees, {} features",
        ir.num_trees(),
        ir.num_features
    );
    Ok(ir)
}

/// Import a treelite JSON dump from a string
pub fn from_json_str(json: &str) -> Result<TreeEnsembleIR> {
    let model: TreeliteModel = serde_json::from_str(json)?;
    convert(model)
}

/// Import a treelite JSON dump from disk
pub fn from_path<P: AsRef<Path>>(path: P) -> Result<TreeEnsembleIR> {
    let path = path.as_ref();
    info!("Importing treelite model from {}", path.display());
    from_json_str(&fs::read_to_string(path)?)
}
