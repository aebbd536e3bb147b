//! Decision tree arena for the ensemble IR
//!
//! Nodes live in a flat `Vec<Node>` and refer to their children by index
//! (`NodeId`). Index 0 is always the root. Every traversal in this module is
//! iterative, so tree depth is bounded only by memory.

use crate::errors::{ForestError, Result};
use crate::ir::FeatureType;
use serde::{Deserialize, Serialize};

/// Index of a node inside its tree's arena
pub type NodeId = u32;

/// Numeric comparison applied as `feature <op> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl ComparisonOp {
    /// Operator spelling, shared by the IR document and the generated C
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(ComparisonOp::Lt),
            "<=" => Some(ComparisonOp::Le),
            "==" => Some(ComparisonOp::Eq),
            ">" => Some(ComparisonOp::Gt),
            ">=" => Some(ComparisonOp::Ge),
            _ => None,
        }
    }

    /// IEEE comparison; any NaN operand yields `false`, as in C
    #[inline]
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Le => lhs <= rhs,
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Ge => lhs >= rhs,
        }
    }
}

/// Test evaluated at a split node
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Two children: `[true_branch, false_branch]`
    Compare { op: ComparisonOp, threshold: f64 },

    /// `sets.len() + 1` children: child `i` when the value is a member of
    /// `sets[i]` (first match wins), the last child otherwise
    InCategories { sets: Vec<Vec<u32>> },
}

impl Predicate {
    /// Number of children a split with this predicate must own
    pub fn arity(&self) -> usize {
        match self {
            Predicate::Compare { .. } => 2,
            Predicate::InCategories { sets } => sets.len() + 1,
        }
    }

    /// Position of the child selected for `value`
    #[inline]
    pub fn select(&self, value: f64) -> usize {
        match self {
            Predicate::Compare { op, threshold } => {
                if op.holds(value, *threshold) {
                    0
                } else {
                    1
                }
            }
            Predicate::InCategories { sets } => sets
                .iter()
                .position(|set| set.iter().any(|&code| value == f64::from(code)))
                .unwrap_or(sets.len()),
        }
    }
}

/// A decision tree node (split or leaf)
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature_index: u32,
        predicate: Predicate,
        children: Vec<NodeId>,
    },
}

impl Node {
    /// Create a leaf node
    pub fn leaf(value: f64) -> Self {
        Node::Leaf { value }
    }

    /// Create a numeric split: `if feature <op> threshold { yes } else { no }`
    pub fn split(
        feature_index: u32,
        op: ComparisonOp,
        threshold: f64,
        yes: NodeId,
        no: NodeId,
    ) -> Self {
        Node::Split {
            feature_index,
            predicate: Predicate::Compare { op, threshold },
            children: vec![yes, no],
        }
    }

    /// Create a categorical split with one child per category set plus a fallback
    pub fn categorical(feature_index: u32, sets: Vec<Vec<u32>>, children: Vec<NodeId>) -> Self {
        Node::Split {
            feature_index,
            predicate: Predicate::InCategories { sets },
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Split { children, .. } => children,
        }
    }
}

/// A single decision tree; node 0 is the root
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// A tree made of a single constant leaf
    pub fn constant(value: f64) -> Self {
        Self::new(vec![Node::leaf(value)])
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk the tree for one feature vector and return the leaf output.
    ///
    /// Returns NaN for a structurally broken tree (dangling child or a cycle);
    /// validated trees never hit that path. Missing feature slots read as NaN.
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;

        // A well-formed walk visits each node at most once.
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature_index,
                    predicate,
                    children,
                }) => {
                    let value = features
                        .get(*feature_index as usize)
                        .copied()
                        .unwrap_or(f64::NAN);
                    match children.get(predicate.select(value)) {
                        Some(&child) => idx = child as usize,
                        None => return f64::NAN,
                    }
                }
                None => return f64::NAN,
            }
        }

        f64::NAN
    }

    /// Validate structure against the ensemble's feature declarations.
    ///
    /// Paths in errors are `trees[<tree_index>].nodes[<arena index>]`.
    pub fn validate(&self, tree_index: usize, feature_types: &[FeatureType]) -> Result<()> {
        self.check(feature_types, |i| format!("trees[{tree_index}].nodes[{i}]"))
    }

    /// Validation with a caller-supplied node label, so document loaders can
    /// report node ids instead of arena positions.
    pub(crate) fn check<F>(&self, feature_types: &[FeatureType], label: F) -> Result<()>
    where
        F: Fn(usize) -> String,
    {
        if self.nodes.is_empty() {
            return Err(ForestError::malformed(label(0), "tree has no nodes"));
        }

        let len = self.nodes.len();
        let mut parent: Vec<Option<NodeId>> = vec![None; len];

        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(ForestError::malformed(
                            label(i),
                            format!("leaf value {value} is not finite"),
                        ));
                    }
                }
                Node::Split {
                    feature_index,
                    predicate,
                    children,
                } => {
                    let feature_type = feature_types
                        .get(*feature_index as usize)
                        .ok_or_else(|| {
                            ForestError::malformed(
                                label(i),
                                format!(
                                    "feature index {} out of range for {} features",
                                    feature_index,
                                    feature_types.len()
                                ),
                            )
                        })?;

                    if children.len() != predicate.arity() {
                        return Err(ForestError::malformed(
                            label(i),
                            format!(
                                "split needs {} children, found {}",
                                predicate.arity(),
                                children.len()
                            ),
                        ));
                    }

                    if let Predicate::InCategories { sets } = predicate {
                        let cardinality = match feature_type {
                            FeatureType::Categorical { cardinality } => *cardinality,
                            FeatureType::Numerical => {
                                return Err(ForestError::malformed(
                                    label(i),
                                    format!(
                                        "categorical split on numerical feature {feature_index}"
                                    ),
                                ))
                            }
                        };
                        if sets.is_empty() {
                            return Err(ForestError::malformed(
                                label(i),
                                "categorical split has no category sets",
                            ));
                        }
                        for set in sets {
                            if set.is_empty() {
                                return Err(ForestError::malformed(label(i), "empty category set"));
                            }
                            if let Some(code) = set.iter().find(|&&code| code >= cardinality) {
                                return Err(ForestError::malformed(
                                    label(i),
                                    format!(
                                        "category {code} outside cardinality {cardinality} \
                                         of feature {feature_index}"
                                    ),
                                ));
                            }
                        }
                    }

                    for &child in children {
                        let c = child as usize;
                        if c >= len {
                            return Err(ForestError::malformed(
                                label(i),
                                format!("dangling child reference {child}"),
                            ));
                        }
                        if c == 0 || parent[c].is_some() {
                            return Err(ForestError::malformed(
                                label(c),
                                "node reachable by more than one path (cycle or shared child)",
                            ));
                        }
                        parent[c] = Some(i as NodeId);
                    }
                }
            }
        }

        detect_parent_cycles(&parent).map_err(|i| {
            ForestError::malformed(label(i), "cyclic reference")
        })
    }

    /// Arena indices reachable from the root, in depth-first pre-order
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            for &child in self.nodes[idx].children().iter().rev() {
                if let Some(false) = seen.get(child as usize) {
                    stack.push(child as usize);
                }
            }
        }
        seen
    }
}

/// With every node owning at most one parent edge, the only possible cycles
/// are parent chains that never reach a parentless node. Returns the index of
/// a node on such a cycle.
fn detect_parent_cycles(parent: &[Option<NodeId>]) -> std::result::Result<(), usize> {
    const UNKNOWN: u8 = 0;
    const ON_PATH: u8 = 1;
    const ROOTED: u8 = 2;

    let mut state = vec![UNKNOWN; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        let mut cur = start;
        loop {
            match state[cur] {
                ROOTED => break,
                ON_PATH => return Err(cur),
                _ => {}
            }
            state[cur] = ON_PATH;
            path.push(cur);
            match parent[cur] {
                Some(p) => cur = p as usize,
                None => break,
            }
        }
        for idx in path.drain(..) {
            state[idx] = ROOTED;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numerical(n: usize) -> Vec<FeatureType> {
        vec![FeatureType::Numerical; n]
    }

    fn stump(threshold: f64) -> Tree {
        Tree::new(vec![
            Node::split(0, ComparisonOp::Lt, threshold, 1, 2),
            Node::leaf(-1.0),
            Node::leaf(1.0),
        ])
    }

    #[test]
    fn test_tree_evaluation() {
        let tree = stump(0.5);
        assert_eq!(tree.evaluate(&[0.1]), -1.0);
        assert_eq!(tree.evaluate(&[0.5]), 1.0); // strict less-than
        assert_eq!(tree.evaluate(&[0.9]), 1.0);
    }

    #[test]
    fn test_nan_follows_false_branch() {
        assert_eq!(stump(0.5).evaluate(&[f64::NAN]), 1.0);
    }

    #[test]
    fn test_comparison_operators() {
        assert!(ComparisonOp::Le.holds(0.5, 0.5));
        assert!(!ComparisonOp::Lt.holds(0.5, 0.5));
        assert!(ComparisonOp::Eq.holds(2.0, 2.0));
        assert!(ComparisonOp::Gt.holds(3.0, 2.0));
        assert!(ComparisonOp::Ge.holds(2.0, 2.0));
        for op in ["<", "<=", "==", ">", ">="] {
            assert_eq!(ComparisonOp::parse(op).unwrap().as_str(), op);
        }
        assert!(ComparisonOp::parse("!=").is_none());
    }

    #[test]
    fn test_categorical_fanout() {
        let tree = Tree::new(vec![
            Node::categorical(0, vec![vec![1, 2], vec![5]], vec![1, 2, 3]),
            Node::leaf(10.0),
            Node::leaf(20.0),
            Node::leaf(30.0),
        ]);
        assert_eq!(tree.evaluate(&[2.0]), 10.0);
        assert_eq!(tree.evaluate(&[5.0]), 20.0);
        assert_eq!(tree.evaluate(&[0.0]), 30.0);
        assert_eq!(tree.evaluate(&[2.5]), 30.0);
    }

    #[test]
    fn test_tree_validation() {
        assert!(stump(0.5).validate(0, &numerical(1)).is_ok());

        let dangling = Tree::new(vec![
            Node::split(0, ComparisonOp::Lt, 0.5, 5, 2),
            Node::leaf(1.0),
            Node::leaf(2.0),
        ]);
        let err = dangling.validate(3, &numerical(1)).unwrap_err();
        assert!(err.to_string().contains("trees[3].nodes[0]"));
        assert!(err.to_string().contains("dangling"));

        let out_of_range = Tree::new(vec![
            Node::split(4, ComparisonOp::Lt, 0.5, 1, 2),
            Node::leaf(1.0),
            Node::leaf(2.0),
        ]);
        assert!(out_of_range.validate(0, &numerical(2)).is_err());
    }

    #[test]
    fn test_cycles_and_shared_children_rejected() {
        let back_edge = Tree::new(vec![
            Node::split(0, ComparisonOp::Lt, 0.5, 1, 2),
            Node::split(0, ComparisonOp::Lt, 0.2, 0, 2),
            Node::leaf(2.0),
        ]);
        assert!(back_edge.validate(0, &numerical(1)).is_err());

        let orphan_loop = Tree::new(vec![
            Node::leaf(0.0),
            Node::split(0, ComparisonOp::Lt, 0.5, 2, 3),
            Node::split(0, ComparisonOp::Lt, 0.5, 1, 3),
            Node::leaf(1.0),
        ]);
        assert!(orphan_loop.validate(0, &numerical(1)).is_err());

        let pure_loop = Tree::new(vec![
            Node::leaf(0.0),
            Node::categorical(0, vec![vec![0]], vec![2, 3]),
            Node::categorical(0, vec![vec![0]], vec![1, 4]),
            Node::leaf(1.0),
            Node::leaf(2.0),
        ]);
        let types = vec![FeatureType::Categorical { cardinality: 2 }];
        let err = pure_loop.validate(0, &types).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_categorical_validation() {
        let tree = Tree::new(vec![
            Node::categorical(0, vec![vec![7]], vec![1, 2]),
            Node::leaf(1.0),
            Node::leaf(2.0),
        ]);
        assert!(tree
            .validate(0, &[FeatureType::Categorical { cardinality: 8 }])
            .is_ok());
        assert!(tree
            .validate(0, &[FeatureType::Categorical { cardinality: 4 }])
            .is_err());
        assert!(tree.validate(0, &numerical(1)).is_err());
    }

    #[test]
    fn test_reachable_marks_orphans() {
        let tree = Tree::new(vec![
            Node::split(0, ComparisonOp::Lt, 0.5, 1, 2),
            Node::leaf(1.0),
            Node::leaf(2.0),
            Node::leaf(3.0),
        ]);
        assert_eq!(tree.reachable(), vec![true, true, true, false]);
    }

    #[test]
    fn test_deep_tree_walk_is_iterative() {
        let depth = 100_000u32;
        let mut nodes = Vec::with_capacity(2 * depth as usize + 1);
        for d in 0..depth {
            let next = 2 * d + 2;
            nodes.push(Node::split(0, ComparisonOp::Lt, d as f64, 2 * d + 1, next));
            nodes.push(Node::leaf(d as f64));
        }
        nodes.push(Node::leaf(-1.0));
        let tree = Tree::new(nodes);
        assert!(tree.validate(0, &numerical(1)).is_ok());
        assert_eq!(tree.evaluate(&[f64::MAX]), -1.0);
        assert_eq!(tree.evaluate(&[-1.0]), 0.0);
    }
}
