use std::collections::{BTreeMap, BTreeSet};

use super::scoring::{self, MetricTables};
use super::types::DecisionInput;
use super::{DecisionEngine, DecisionOutput, Result};
use crate::canon::quantize;

/// Reference engine over ordered maps. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableEngine;

impl PortableEngine {
    pub const ID: &'static str = "portable";

    pub fn new() -> Self {
        Self
    }
}

impl DecisionEngine for PortableEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        crate::VERSION
    }

    fn evaluate(&self, input: &DecisionInput) -> Result<DecisionOutput> {
        input.validate()?;
        scoring::assemble(input, map_tables(input))
    }
}

fn map_tables(input: &DecisionInput) -> MetricTables {
    // Cells without an outcome count as zero utility.
    let mut utility: BTreeMap<String, BTreeMap<String, f64>> = input
        .actions
        .iter()
        .map(|a| {
            let row = input.scenarios.iter().map(|s| (s.id.clone(), 0.0)).collect();
            (a.id.clone(), row)
        })
        .collect();

    let mut filled_cells = 0;
    for o in &input.outcomes {
        if let Some(cell) = utility
            .get_mut(&o.action_id)
            .and_then(|row| row.get_mut(&o.scenario_id))
        {
            *cell = quantize(o.utility);
            filled_cells += 1;
        }
    }

    let adversarial_ids: BTreeSet<&str> = input
        .scenarios
        .iter()
        .filter(|s| s.adversarial)
        .map(|s| s.id.as_str())
        .collect();

    let best: BTreeMap<&str, f64> = input
        .scenarios
        .iter()
        .map(|s| {
            let max = utility
                .values()
                .filter_map(|row| row.get(&s.id))
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            (s.id.as_str(), quantize(max))
        })
        .collect();

    let worst_case = utility
        .iter()
        .map(|(a, row)| (a.clone(), quantize(row.values().copied().fold(f64::INFINITY, f64::min))))
        .collect();

    let regret: BTreeMap<String, BTreeMap<String, f64>> = utility
        .iter()
        .map(|(a, row)| {
            let regrets = row
                .iter()
                .map(|(s, &u)| {
                    let b = best.get(s.as_str()).copied().unwrap_or(0.0);
                    (s.clone(), quantize(b - u))
                })
                .collect();
            (a.clone(), regrets)
        })
        .collect();

    let max_regret = regret
        .iter()
        .map(|(a, row)| (a.clone(), quantize(row.values().copied().fold(0.0, f64::max))))
        .collect();

    let adversarial = if adversarial_ids.is_empty() {
        BTreeMap::new()
    } else {
        utility
            .iter()
            .map(|(a, row)| {
                let min = row
                    .iter()
                    .filter(|(s, _)| adversarial_ids.contains(s.as_str()))
                    .map(|(_, &u)| u)
                    .fold(f64::INFINITY, f64::min);
                (a.clone(), quantize(min))
            })
            .collect()
    };

    MetricTables {
        utility,
        worst_case,
        regret,
        max_regret,
        adversarial,
        filled_cells,
    }
}
