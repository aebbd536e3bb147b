//! Deterministic assignment of trees to translation units

use serde::{Deserialize, Serialize};

/// How trees are distributed over codegen units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Consecutive blocks; the first `num_trees % units` blocks get one extra tree
    #[default]
    Contiguous,
    /// Tree `i` goes to unit `i % units`
    RoundRobin,
}

/// Split tree indices `0..num_trees` into at most `units` non-empty groups.
///
/// Pure function of its inputs. `units` is clamped to `[1, num_trees]`, so
/// every returned group holds at least one tree whenever `num_trees > 0`.
pub fn partition(num_trees: usize, units: usize, strategy: PartitionStrategy) -> Vec<Vec<usize>> {
    let units = units.clamp(1, num_trees.max(1));

    match strategy {
        PartitionStrategy::Contiguous => {
            let base = num_trees / units;
            let extra = num_trees % units;
            let mut start = 0;
            (0..units)
                .map(|unit| {
                    let len = base + usize::from(unit < extra);
                    let group: Vec<usize> = (start..start + len).collect();
                    start += len;
                    group
                })
                .collect()
        }
        PartitionStrategy::RoundRobin => (0..units)
            .map(|unit| (unit..num_trees).step_by(units).collect())
            .collect(),
    }
}
