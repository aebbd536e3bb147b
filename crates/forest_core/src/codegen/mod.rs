//! Native inference code generation
//!
//! Turns a `TreeEnsembleIR` into a set of C translation units:
//!
//! - `header.h`: export macros, the public entry point, per-unit declarations
//! - `main.c`: the entry point, which sums every unit and applies aggregation
//! - `unit<k>.c`: one hidden function per unit summing the leaf outputs of its
//!   share of the trees
//!
//! The public ABI is `double <entry_symbol>(const double* data)` where `data`
//! points at `num_features` contiguous doubles. With `emit_batch`,
//! `void <entry_symbol>_batch(const double* data, size_t num_rows, double* out)`
//! is exported as well.
//!
//! Output is a pure function of the IR and the options: no timestamps, a
//! deterministic partition, and ordered assembly of units rendered in
//! parallel. Units are independent so an external build can compile them
//! concurrently and link once.

pub mod c;
pub mod partition;

pub use partition::{partition, PartitionStrategy};

use crate::errors::{ForestError, Result};
use crate::ir::{Node, Predicate, TreeEnsembleIR};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default name of the exported prediction routine
pub const DEFAULT_ENTRY_SYMBOL: &str = "predict";

/// Code generation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Number of translation units the trees are spread over
    pub parallel_units: usize,
    /// Tree-to-unit assignment
    pub partition: PartitionStrategy,
    /// Exported entry point name
    pub entry_symbol: String,
    /// Also export `<entry_symbol>_batch`
    pub emit_batch: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            parallel_units: 4,
            partition: PartitionStrategy::Contiguous,
            entry_symbol: DEFAULT_ENTRY_SYMBOL.to_string(),
            emit_batch: false,
        }
    }
}

impl CodegenOptions {
    pub fn with_units(parallel_units: usize) -> Self {
        Self {
            parallel_units,
            ..Self::default()
        }
    }

    pub fn batch_symbol(&self) -> String {
        format!("{}_batch", self.entry_symbol)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel_units == 0 {
            return Err(ForestError::InvalidConfig(
                "parallel_units must be at least 1".to_string(),
            ));
        }
        if !is_c_identifier(&self.entry_symbol) {
            return Err(ForestError::InvalidConfig(format!(
                "entry symbol `{}` is not a valid C identifier",
                self.entry_symbol
            )));
        }
        if self.entry_symbol.starts_with("forest_unit_") {
            return Err(ForestError::InvalidConfig(format!(
                "entry symbol `{}` collides with internal unit functions",
                self.entry_symbol
            )));
        }
        Ok(())
    }
}

fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One generated file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub contents: String,
}

/// In-memory result of code generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProgram {
    /// Header first, then the entry point, then units in order
    pub files: Vec<GeneratedFile>,
    /// Tree indices per unit
    pub units: Vec<Vec<usize>>,
    /// IR fingerprint stamped into the header
    pub fingerprint: String,
}

/// Paths of generated sources on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSources {
    pub dir: PathBuf,
    pub header: PathBuf,
    pub entry: PathBuf,
    pub units: Vec<PathBuf>,
    pub entry_symbol: String,
    pub num_features: usize,
    pub fingerprint: String,
}

impl GeneratedSources {
    /// Every `.c` file that must be compiled, entry point first
    pub fn translation_units(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.entry.as_path()).chain(self.units.iter().map(PathBuf::as_path))
    }
}

/// Reject anything that cannot be lowered, before emitting a single byte.
pub fn check_lowerable(ir: &TreeEnsembleIR) -> Result<()> {
    ir.validate()?;

    for (t, tree) in ir.trees.iter().enumerate() {
        let reachable = tree.reachable();
        if let Some(orphan) = reachable.iter().position(|seen| !seen) {
            return Err(ForestError::unsupported(
                format!("trees[{t}].nodes[{orphan}]"),
                "node is not reachable from the root",
            ));
        }

        for (i, node) in tree.nodes.iter().enumerate() {
            if let Node::Split {
                predicate: Predicate::Compare { threshold, .. },
                ..
            } = node
            {
                if !threshold.is_finite() {
                    return Err(ForestError::unsupported(
                        format!("trees[{t}].nodes[{i}]"),
                        format!("non-finite threshold {threshold}"),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Render all sources in memory
pub fn render(ir: &TreeEnsembleIR, options: &CodegenOptions) -> Result<GeneratedProgram> {
    options.validate()?;
    check_lowerable(ir)?;

    let fingerprint = ir.fingerprint()?;
    let units = partition(ir.num_trees(), options.parallel_units, options.partition);
    debug!(
        "Partitioned {} trees into {} units ({:?})",
        ir.num_trees(),
        units.len(),
        options.partition
    );

    let unit_files = units
        .par_iter()
        .enumerate()
        .map(|(unit, trees)| {
            c::render_unit(ir, unit, trees).map(|contents| GeneratedFile {
                name: c::unit_file(unit),
                contents,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut files = Vec::with_capacity(unit_files.len() + 2);
    files.push(GeneratedFile {
        name: c::HEADER_FILE.to_string(),
        contents: c::render_header(ir, options, units.len(), &fingerprint),
    });
    files.push(GeneratedFile {
        name: c::MAIN_FILE.to_string(),
        contents: c::render_main(ir, options, units.len())?,
    });
    files.extend(unit_files);

    Ok(GeneratedProgram {
        files,
        units,
        fingerprint,
    })
}

/// Render and write all sources into `target_dir`
pub fn generate<P: AsRef<Path>>(
    ir: &TreeEnsembleIR,
    target_dir: P,
    options: &CodegenOptions,
) -> Result<GeneratedSources> {
    let dir = target_dir.as_ref();
    let program = render(ir, options)?;

    fs::create_dir_all(dir)?;
    program.files.par_iter().try_for_each(|file| {
        debug!("Writing {}", file.name);
        fs::write(dir.join(&file.name), &file.contents)
    })?;

    info!(
        "Generated {} translation units for model {} in {}",
        program.units.len(),
        &program.fingerprint[..12],
        dir.display()
    );

    Ok(GeneratedSources {
        dir: dir.to_path_buf(),
        header: dir.join(c::HEADER_FILE),
        entry: dir.join(c::MAIN_FILE),
        units: (0..program.units.len())
            .map(|unit| dir.join(c::unit_file(unit)))
            .collect(),
        entry_symbol: options.entry_symbol.clone(),
        num_features: ir.num_features as usize,
        fingerprint: program.fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Aggregation, ComparisonOp, Node, Tree};

    fn stump_ensemble(num_trees: usize) -> TreeEnsembleIR {
        let trees = (0..num_trees)
            .map(|i| {
                Tree::new(vec![
                    Node::split(0, ComparisonOp::Le, i as f64 * 0.25, 1, 2),
                    Node::leaf(i as f64),
                    Node::leaf(-(i as f64)),
                ])
            })
            .collect();
        TreeEnsembleIR::new(1, Aggregation::Sum, trees)
    }

    #[test]
    fn test_render_is_deterministic() {
        let ir = stump_ensemble(9);
        let options = CodegenOptions::with_units(4);
        let first = render(&ir, &options).unwrap();
        for _ in 0..5 {
            assert_eq!(render(&ir, &options).unwrap(), first);
        }
    }

    #[test]
    fn test_each_tree_emitted_once() {
        let ir = stump_ensemble(9);
        for units in [1, 2, 4, 9, 20] {
            let program = render(&ir, &CodegenOptions::with_units(units)).unwrap();
            let all: String = program.files.iter().map(|f| f.contents.as_str()).collect();
            for t in 0..9 {
                assert_eq!(all.matches(&format!("/* tree {t} */")).count(), 1);
            }
            assert_eq!(program.files.len(), 2 + units.min(9));
        }
    }

    #[test]
    fn test_invalid_options() {
        let ir = stump_ensemble(2);
        assert!(matches!(
            render(&ir, &CodegenOptions::with_units(0)),
            Err(ForestError::InvalidConfig(_))
        ));

        for bad in ["", "9lives", "pre-dict", "forest_unit_0"] {
            let options = CodegenOptions {
                entry_symbol: bad.to_string(),
                ..CodegenOptions::default()
            };
            assert!(render(&ir, &options).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut ir = stump_ensemble(2);
        ir.trees[1].nodes.push(Node::leaf(42.0));
        match render(&ir, &CodegenOptions::default()) {
            Err(ForestError::UnsupportedConstruct { path, .. }) => {
                assert_eq!(path, "trees[1].nodes[3]")
            }
            other => panic!("expected UnsupportedConstruct, got {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let mut ir = stump_ensemble(1);
        ir.trees[0].nodes[0] = Node::split(0, ComparisonOp::Lt, f64::NAN, 1, 2);
        assert!(matches!(
            render(&ir, &CodegenOptions::default()),
            Err(ForestError::UnsupportedConstruct { .. })
        ));
    }

    #[test]
    fn test_generate_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let ir = stump_ensemble(5);
        let sources = generate(&ir, dir.path(), &CodegenOptions::with_units(2)).unwrap();

        assert!(sources.header.exists());
        assert!(sources.entry.exists());
        assert_eq!(sources.units.len(), 2);
        assert_eq!(sources.translation_units().count(), 3);
        for unit in &sources.units {
            let text = fs::read_to_string(unit).unwrap();
            assert!(text.starts_with("#include \"header.h\""));
        }
        let header = fs::read_to_string(&sources.header).unwrap();
        assert!(header.contains(&sources.fingerprint));
    }

    #[test]
    fn test_generate_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut ir = stump_ensemble(1);
        ir.trees[0].nodes.push(Node::leaf(0.0));
        assert!(generate(&ir, &target, &CodegenOptions::default()).is_err());
        assert!(!target.exists());
    }
}
