//! C emitter
//!
//! Lowers trees into nested `if`/`else` blocks that accumulate leaf outputs
//! into a local `sum`. Literals are printed with Rust's shortest round-trip
//! float formatting, which C parses back to the identical `double`.

use super::CodegenOptions;
use crate::errors::{ForestError, Result};
use crate::ir::{Aggregation, Node, NodeId, Predicate, Tree, TreeEnsembleIR};

pub(crate) const HEADER_FILE: &str = "header.h";
pub(crate) const MAIN_FILE: &str = "main.c";

const INDENT: &str = "  ";

pub(crate) fn unit_file(unit: usize) -> String {
    format!("unit{unit}.c")
}

pub(crate) fn unit_function(unit: usize) -> String {
    format!("forest_unit_{unit}")
}

/// `double` literal that parses back to exactly `value`
pub(crate) fn c_double(value: f64, path: impl FnOnce() -> String) -> Result<String> {
    if !value.is_finite() {
        return Err(ForestError::unsupported(
            path(),
            format!("non-finite constant {value} has no C literal"),
        ));
    }
    Ok(format!("{value:?}"))
}

fn push_line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

pub(crate) fn render_header(
    ir: &TreeEnsembleIR,
    options: &CodegenOptions,
    num_units: usize,
    fingerprint: &str,
) -> String {
    let mut out = String::new();
    out.push_str("/* Generated by forestgen. Do not edit.\n");
    out.push_str(&format!(" * model: blake3:{fingerprint}\n"));
    out.push_str(&format!(
        " * trees: {}, features: {}, aggregation: {}, units: {}\n */\n",
        ir.num_trees(),
        ir.num_features,
        ir.aggregation.as_str(),
        num_units
    ));
    out.push_str("#ifndef FORESTGEN_MODEL_H\n#define FORESTGEN_MODEL_H\n\n");
    out.push_str("#include <stddef.h>\n\n");
    out.push_str("#if defined(_WIN32)\n");
    out.push_str("#define FORESTGEN_EXPORT __declspec(dllexport)\n");
    out.push_str("#define FORESTGEN_INTERNAL\n");
    out.push_str("#else\n");
    out.push_str("#define FORESTGEN_EXPORT __attribute__((visibility(\"default\")))\n");
    out.push_str("#define FORESTGEN_INTERNAL __attribute__((visibility(\"hidden\")))\n");
    out.push_str("#endif\n\n");
    out.push_str(&format!("#define FORESTGEN_NUM_FEATURES {}\n\n", ir.num_features));

    out.push_str(&format!(
        "FORESTGEN_EXPORT double {}(const double* data);\n",
        options.entry_symbol
    ));
    if options.emit_batch {
        out.push_str(&format!(
            "FORESTGEN_EXPORT void {}(const double* data, size_t num_rows, double* out);\n",
            options.batch_symbol()
        ));
    }
    out.push('\n');

    for unit in 0..num_units {
        out.push_str(&format!(
            "FORESTGEN_INTERNAL double {}(const double* data);\n",
            unit_function(unit)
        ));
    }

    out.push_str("\n#endif /* FORESTGEN_MODEL_H */\n");
    out
}

pub(crate) fn render_main(
    ir: &TreeEnsembleIR,
    options: &CodegenOptions,
    num_units: usize,
) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("#include \"{HEADER_FILE}\"\n\n"));
    out.push_str(&format!(
        "FORESTGEN_EXPORT double {}(const double* data) {{\n",
        options.entry_symbol
    ));
    push_line(&mut out, 1, "double sum = 0.0;");
    for unit in 0..num_units {
        push_line(&mut out, 1, &format!("sum += {}(data);", unit_function(unit)));
    }

    let base = c_double(ir.base_score, || "base_score".to_string())?;
    let combined = match ir.aggregation {
        Aggregation::Sum => "sum".to_string(),
        Aggregation::Mean => format!(
            "(sum / {})",
            c_double(ir.num_trees() as f64, || "trees".to_string())?
        ),
    };
    push_line(&mut out, 1, &format!("return {combined} + ({base});"));
    out.push_str("}\n");

    if options.emit_batch {
        out.push_str(&format!(
            "\nFORESTGEN_EXPORT void {}(const double* data, size_t num_rows, double* out) {{\n",
            options.batch_symbol()
        ));
        push_line(&mut out, 1, "for (size_t row = 0; row < num_rows; ++row) {");
        push_line(
            &mut out,
            2,
            &format!(
                "out[row] = {}(data + row * FORESTGEN_NUM_FEATURES);",
                options.entry_symbol
            ),
        );
        push_line(&mut out, 1, "}");
        out.push_str("}\n");
    }

    Ok(out)
}

pub(crate) fn render_unit(ir: &TreeEnsembleIR, unit: usize, trees: &[usize]) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("#include \"{HEADER_FILE}\"\n\n"));
    out.push_str(&format!(
        "FORESTGEN_INTERNAL double {}(const double* data) {{\n",
        unit_function(unit)
    ));
    push_line(&mut out, 1, "double sum = 0.0;");
    push_line(&mut out, 1, "(void)data;");

    for &t in trees {
        push_line(&mut out, 1, &format!("/* tree {t} */"));
        lower_tree(&mut out, &ir.trees[t], t)?;
    }

    push_line(&mut out, 1, "return sum;");
    out.push_str("}\n");
    Ok(out)
}

enum Step {
    Visit { node: NodeId, depth: usize },
    Text { depth: usize, text: String },
}

/// Iterative pre-order lowering of one tree.
fn lower_tree(out: &mut String, tree: &Tree, tree_index: usize) -> Result<()> {
    let path = |node: NodeId| format!("trees[{tree_index}].nodes[{node}]");
    let mut stack = vec![Step::Visit { node: 0, depth: 1 }];

    while let Some(step) = stack.pop() {
        let (node, depth) = match step {
            Step::Text { depth, text } => {
                push_line(out, depth, &text);
                continue;
            }
            Step::Visit { node, depth } => (node, depth),
        };

        let close = || Step::Text {
            depth,
            text: "}".to_string(),
        };
        let orelse = || Step::Text {
            depth,
            text: "} else {".to_string(),
        };

        match &tree.nodes[node as usize] {
            Node::Leaf { value } => {
                let literal = c_double(*value, || path(node))?;
                push_line(out, depth, &format!("sum += {literal};"));
            }
            Node::Split {
                feature_index,
                predicate,
                children,
            } => match predicate {
                Predicate::Compare { op, threshold } => {
                    let literal = c_double(*threshold, || path(node))?;
                    push_line(
                        out,
                        depth,
                        &format!("if (data[{feature_index}] {} {literal}) {{", op.as_str()),
                    );
                    stack.push(close());
                    stack.push(Step::Visit { node: children[1], depth: depth + 1 });
                    stack.push(orelse());
                    stack.push(Step::Visit { node: children[0], depth: depth + 1 });
                }
                Predicate::InCategories { sets } => {
                    let fallback = children[sets.len()];
                    push_line(
                        out,
                        depth,
                        &format!("if ({}) {{", membership(*feature_index, &sets[0])),
                    );
                    stack.push(close());
                    stack.push(Step::Visit { node: fallback, depth: depth + 1 });
                    stack.push(orelse());
                    for i in (1..sets.len()).rev() {
                        stack.push(Step::Visit { node: children[i], depth: depth + 1 });
                        stack.push(Step::Text {
                            depth,
                            text: format!(
                                "}} else if ({}) {{",
                                membership(*feature_index, &sets[i])
                            ),
                        });
                    }
                    stack.push(Step::Visit { node: children[0], depth: depth + 1 });
                }
            },
        }
    }

    Ok(())
}

fn membership(feature_index: u32, codes: &[u32]) -> String {
    codes
        .iter()
        .map(|&code| format!("data[{feature_index}] == {:?}", f64::from(code)))
        .collect::<Vec<_>>()
        .join(" || ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ComparisonOp, FeatureType};

    #[test]
    fn test_c_double_literals_roundtrip() {
        for value in [0.0, -1.0, 0.1, 1e-7, 1e16, 123456.789, f64::MAX, f64::MIN_POSITIVE, -0.0] {
            let literal = c_double(value, String::new).unwrap();
            assert_eq!(literal.parse::<f64>().unwrap().to_bits(), value.to_bits());
            assert!(literal.contains('.') || literal.contains('e'), "{literal}");
        }
        assert!(c_double(f64::NAN, String::new).is_err());
        assert!(c_double(f64::INFINITY, String::new).is_err());
    }

    #[test]
    fn test_lower_numeric_split() {
        let tree = Tree::new(vec![
            Node::split(0, ComparisonOp::Lt, 0.5, 1, 2),
            Node::leaf(-1.0),
            Node::leaf(1.0),
        ]);
        let mut out = String::new();
        lower_tree(&mut out, &tree, 0).unwrap();
        assert_eq!(
            out,
            "  if (data[0] < 0.5) {\n    sum += -1.0;\n  } else {\n    sum += 1.0;\n  }\n"
        );
    }

    #[test]
    fn test_lower_categorical_fanout() {
        let tree = Tree::new(vec![
            Node::categorical(2, vec![vec![1, 3], vec![7]], vec![1, 2, 3]),
            Node::leaf(1.0),
            Node::leaf(2.0),
            Node::leaf(3.0),
        ]);
        let mut out = String::new();
        lower_tree(&mut out, &tree, 0).unwrap();
        assert_eq!(
            out,
            "  if (data[2] == 1.0 || data[2] == 3.0) {\n    sum += 1.0;\n  \
             } else if (data[2] == 7.0) {\n    sum += 2.0;\n  \
             } else {\n    sum += 3.0;\n  }\n"
        );
    }

    #[test]
    fn test_main_mean_with_base_score() {
        let trees = vec![Tree::constant(1.0), Tree::constant(3.0)];
        let ir = TreeEnsembleIR::new(1, Aggregation::Mean, trees).with_base_score(-0.5);
        let options = CodegenOptions::default();
        let main = render_main(&ir, &options, 2).unwrap();
        assert!(main.contains("sum += forest_unit_0(data);\n"));
        assert!(main.contains("sum += forest_unit_1(data);\n"));
        assert!(main.contains("return (sum / 2.0) + (-0.5);"));
        assert!(!main.contains("predict_batch"));
    }

    #[test]
    fn test_header_declares_batch_when_requested() {
        let ir = TreeEnsembleIR::new(3, Aggregation::Sum, vec![Tree::constant(1.0)])
            .with_feature_types(vec![FeatureType::Numerical; 3]);
        let options = CodegenOptions {
            emit_batch: true,
            ..CodegenOptions::default()
        };
        let header = render_header(&ir, &options, 1, "00");
        assert!(header.contains("FORESTGEN_EXPORT double predict(const double* data);"));
        assert!(header.contains(
            "FORESTGEN_EXPORT void predict_batch(const double* data, size_t num_rows, double* out);"
        ));
        assert!(header.contains("#define FORESTGEN_NUM_FEATURES 3"));
        assert!(header.contains("FORESTGEN_INTERNAL double forest_unit_0(const double* data);"));
    }
}
