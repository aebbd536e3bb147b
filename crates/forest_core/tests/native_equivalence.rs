//! Generated native code must reproduce the reference evaluator.
//!
//! These tests compile real shared libraries and are skipped when no C
//! compiler can be executed.

use forestgen_core::codegen::PartitionStrategy;
use forestgen_core::config::ForestConfig;
use forestgen_core::ir::{Aggregation, ComparisonOp, FeatureType, Node, Tree, TreeEnsembleIR};
use forestgen_core::native::NativeArtifact;
use forestgen_core::pipeline::{export, verify_ensemble};
use forestgen_core::{ForestError, Predictor, ReferenceFixture};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn compiler_available() -> bool {
    let available = ForestConfig::default().toolchain.compiler_available();
    if !available {
        eprintln!("skipping: no C compiler available");
    }
    available
}

fn two_tree_ensemble(aggregation: Aggregation) -> TreeEnsembleIR {
    let tree_a = Tree::new(vec![
        Node::split(0, ComparisonOp::Lt, 0.5, 1, 2),
        Node::leaf(-1.0),
        Node::leaf(1.0),
    ]);
    TreeEnsembleIR::new(1, aggregation, vec![tree_a, Tree::constant(2.0)])
}

fn random_tree(rng: &mut StdRng, num_features: u32, max_depth: usize) -> Tree {
    const OPS: [ComparisonOp; 4] = [
        ComparisonOp::Lt,
        ComparisonOp::Le,
        ComparisonOp::Gt,
        ComparisonOp::Ge,
    ];
    let mut nodes = vec![Node::leaf(0.0)];
    let mut pending = vec![(0usize, 0usize)];

    while let Some((index, depth)) = pending.pop() {
        if depth < max_depth && rng.gen_bool(0.7) {
            let yes = nodes.len();
            nodes.push(Node::leaf(0.0));
            nodes.push(Node::leaf(0.0));
            nodes[index] = Node::split(
                rng.gen_range(0..num_features),
                OPS[rng.gen_range(0..OPS.len())],
                rng.gen_range(-1.0..1.0),
                yes as u32,
                yes as u32 + 1,
            );
            pending.push((yes, depth + 1));
            pending.push((yes + 1, depth + 1));
        } else {
            nodes[index] = Node::leaf(rng.gen_range(-10.0..10.0));
        }
    }

    Tree::new(nodes)
}

fn random_ensemble(seed: u64, num_trees: usize, num_features: u32) -> TreeEnsembleIR {
    let mut rng = StdRng::seed_from_u64(seed);
    let trees = (0..num_trees)
        .map(|_| random_tree(&mut rng, num_features, 6))
        .collect();
    TreeEnsembleIR::new(num_features, Aggregation::Sum, trees)
        .with_base_score(rng.gen_range(-1.0..1.0))
}

fn random_rows(seed: u64, n: usize, width: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..width).map(|_| rng.gen_range(-1.5..1.5)).collect())
        .collect()
}

/// Rows placing every feature exactly on split thresholds
fn threshold_rows(ir: &TreeEnsembleIR) -> Vec<Vec<f64>> {
    let width = ir.num_features as usize;
    ir.trees
        .iter()
        .flat_map(|tree| &tree.nodes)
        .filter_map(|node| match node {
            Node::Split {
                predicate: forestgen_core::Predicate::Compare { threshold, .. },
                ..
            } => Some(vec![*threshold; width]),
            _ => None,
        })
        .take(50)
        .collect()
}

#[test]
fn test_two_tree_scenario() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ir = two_tree_ensemble(Aggregation::Sum);
    let fixture = ReferenceFixture::new(vec![vec![0.1], vec![0.9]], vec![1.0, 3.0]).unwrap();

    let report = verify_ensemble(&ir, &fixture, dir.path(), &ForestConfig::default()).unwrap();
    assert!(report.passed());
    assert_eq!(report.checked(), 2);
    assert_eq!(report.max_abs_deviation, 0.0);
}

#[test]
fn test_mean_scenario() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ir = two_tree_ensemble(Aggregation::Mean);
    let exported = export(&ir, dir.path(), &ForestConfig::default()).unwrap();
    let artifact = NativeArtifact::load(&exported.library, &exported.load_options()).unwrap();

    assert_eq!(artifact.predict(&[0.1]).unwrap(), 0.5);
    assert_eq!(artifact.predict(&[0.9]).unwrap(), 1.5);
    artifact.close().unwrap();
}

#[test]
fn test_random_ensembles_match_reference() {
    if !compiler_available() {
        return;
    }
    for seed in 0..3 {
        let dir = tempfile::tempdir().unwrap();
        let ir = random_ensemble(seed, 40, 5);
        let mut rows = random_rows(seed + 100, 500, 5);
        rows.extend(threshold_rows(&ir));

        let fixture = ReferenceFixture::capture(&ir, rows).unwrap();
        let report = verify_ensemble(&ir, &fixture, dir.path(), &ForestConfig::default()).unwrap();
        report.ensure_passed().unwrap();
        assert_eq!(report.checked(), fixture.len());
    }
}

#[test]
fn test_partition_invariance() {
    if !compiler_available() {
        return;
    }
    let ir = random_ensemble(7, 25, 3);
    let rows = random_rows(8, 200, 3);

    let mut outputs = Vec::new();
    for (units, strategy) in [
        (1, PartitionStrategy::Contiguous),
        (4, PartitionStrategy::Contiguous),
        (20, PartitionStrategy::RoundRobin),
        (100, PartitionStrategy::RoundRobin),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ForestConfig::default();
        config.codegen.parallel_units = units;
        config.codegen.partition = strategy;

        let exported = export(&ir, dir.path(), &config).unwrap();
        assert_eq!(exported.sources.units.len(), units.min(25));
        let artifact = NativeArtifact::load(&exported.library, &exported.load_options()).unwrap();
        let predictions: Vec<f64> = rows.iter().map(|row| artifact.predict(row).unwrap()).collect();
        outputs.push(predictions);
    }

    let tolerance = ForestConfig::default().tolerance().unwrap();
    for other in &outputs[1..] {
        for (a, b) in outputs[0].iter().zip(other) {
            assert!(tolerance.allows(*a, *b), "{a} vs {b}");
        }
    }
}

#[test]
fn test_categorical_splits_native() {
    if !compiler_available() {
        return;
    }
    let tree = Tree::new(vec![
        Node::categorical(1, vec![vec![0, 2], vec![5]], vec![1, 2, 3]),
        Node::leaf(10.0),
        Node::split(0, ComparisonOp::Ge, 0.0, 4, 5),
        Node::leaf(30.0),
        Node::leaf(21.0),
        Node::leaf(22.0),
    ]);
    let ir = TreeEnsembleIR::new(2, Aggregation::Sum, vec![tree]).with_feature_types(vec![
        FeatureType::Numerical,
        FeatureType::Categorical { cardinality: 6 },
    ]);

    let rows: Vec<Vec<f64>> = (0..6)
        .flat_map(|code| [vec![-1.0, code as f64], vec![1.0, code as f64]])
        .collect();
    let fixture = ReferenceFixture::capture(&ir, rows).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let report = verify_ensemble(&ir, &fixture, dir.path(), &ForestConfig::default()).unwrap();
    assert!(report.passed());
    assert_eq!(report.max_abs_deviation, 0.0);
}

#[test]
fn test_batch_entry_point() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ir = random_ensemble(11, 10, 4);
    let mut config = ForestConfig::default();
    config.codegen.emit_batch = true;
    config.codegen.entry_symbol = "forest_predict".to_string();

    let exported = export(&ir, dir.path(), &config).unwrap();
    let artifact = NativeArtifact::load(&exported.library, &exported.load_options()).unwrap();
    assert!(artifact.has_batch());
    assert_eq!(artifact.symbol(), "forest_predict");

    let rows = random_rows(12, 64, 4);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    let batch = artifact.predict_batch(&flat).unwrap();
    let single: Vec<f64> = rows.iter().map(|row| artifact.predict(row).unwrap()).collect();
    assert_eq!(batch, single);

    assert!(matches!(
        artifact.predict_batch(&flat[..5]),
        Err(ForestError::NativeCall { .. })
    ));
}

#[test]
fn test_loader_errors() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ir = two_tree_ensemble(Aggregation::Sum);
    let exported = export(&ir, dir.path(), &ForestConfig::default()).unwrap();

    let mut options = exported.load_options();
    options.entry_symbol = "no_such_symbol".to_string();
    match NativeArtifact::load(&exported.library, &options) {
        Err(ForestError::NativeLoad { symbol, .. }) => assert_eq!(symbol, "no_such_symbol"),
        other => panic!("expected NativeLoad, got {other:?}"),
    }

    // unit functions are not exported
    options.entry_symbol = "forest_unit_0".to_string();
    assert!(NativeArtifact::load(&exported.library, &options).is_err());

    let artifact = NativeArtifact::load(&exported.library, &exported.load_options()).unwrap();
    assert!(!artifact.has_batch());
    assert!(matches!(
        artifact.predict(&[0.1, 0.2]),
        Err(ForestError::NativeCall { .. })
    ));
    assert_eq!(artifact.num_features(), 1);
}

#[test]
fn test_fixture_mismatch_before_native_call() {
    let features = random_rows(1, 100, 1);
    let predictions = vec![0.0; 99];

    match ReferenceFixture::new(features, predictions) {
        Err(ForestError::FixtureMismatch {
            features,
            predictions,
        }) => {
            assert_eq!((features, predictions), (100, 99));
        }
        other => panic!("expected FixtureMismatch, got {other:?}"),
    }
}

#[test]
fn test_width_mismatch_before_native_call() {
    let dir = tempfile::tempdir().unwrap();
    let ir = two_tree_ensemble(Aggregation::Sum);
    let fixture = ReferenceFixture::new(random_rows(2, 10, 3), vec![0.0; 10]).unwrap();

    assert!(matches!(
        verify_ensemble(&ir, &fixture, dir.path(), &ForestConfig::default()),
        Err(ForestError::FeatureWidth { expected: 1, found: 3, .. })
    ));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_tolerance_violations_are_reported() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ir = two_tree_ensemble(Aggregation::Sum);
    let rows = vec![vec![0.1], vec![0.9], vec![0.2]];
    let fixture = ReferenceFixture::new(rows, vec![1.0, 3.5, 1.0]).unwrap();

    let report = verify_ensemble(&ir, &fixture, dir.path(), &ForestConfig::default()).unwrap();
    assert!(!report.passed());
    assert_eq!(report.checked(), 3);
    assert_eq!(report.violations().map(|o| o.row).collect::<Vec<_>>(), vec![1]);
    assert_eq!(report.max_abs_deviation, 0.5);
    assert!(matches!(
        report.ensure_passed(),
        Err(ForestError::ToleranceViolation { failed: 1, checked: 3, worst_row: 1, .. })
    ));
}
