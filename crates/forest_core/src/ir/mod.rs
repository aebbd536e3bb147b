//! Tree-ensemble intermediate representation
//!
//! A portable description of a regression forest, independent of the
//! framework that trained it and of the code generated from it:
//!
//! - `tree`: node arena, predicates, reference tree walk, structural checks
//! - `ensemble`: ensemble metadata, aggregation and reference inference
//!
//! # Example
//!
//! ```rust
//! use forestgen_core::ir::{Aggregation, ComparisonOp, Node, Tree, TreeEnsembleIR};
//!
//! let stump = Tree::new(vec![
//!     Node::split(0, ComparisonOp::Lt, 0.5, 1, 2),
//!     Node::leaf(-1.0),
//!     Node::leaf(1.0),
//! ]);
//! let ir = TreeEnsembleIR::new(1, Aggregation::Sum, vec![stump, Tree::constant(2.0)]);
//!
//! assert_eq!(ir.evaluate(&[0.1]), 1.0);
//! assert_eq!(ir.evaluate(&[0.9]), 3.0);
//! ```

pub mod ensemble;
pub mod tree;

pub use ensemble::{Aggregation, FeatureType, TaskType, TreeEnsembleIR};
pub use tree::{ComparisonOp, Node, NodeId, Predicate, Tree};
