use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::scoring::{self, MetricTables};
use super::types::DecisionInput;
use super::{DecisionEngine, DecisionError, DecisionOutput, Result};
use crate::canon::quantize;

/// Accelerated engine: dense row-major utility matrix over id-sorted axes.
///
/// Availability is a health flag that operators (or tests) can drop to force
/// fallback onto the portable engine.
pub struct NativeEngine {
    available: AtomicBool,
}

impl NativeEngine {
    pub const ID: &'static str = "native";

    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine for NativeEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        crate::VERSION
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn evaluate(&self, input: &DecisionInput) -> Result<DecisionOutput> {
        if !self.is_available() {
            return Err(DecisionError::EngineUnavailable {
                engine: Self::ID.to_string(),
            });
        }
        input.validate()?;
        scoring::assemble(input, dense_tables(input))
    }
}

fn dense_tables(input: &DecisionInput) -> MetricTables {
    let mut actions: Vec<&str> = input.actions.iter().map(|a| a.id.as_str()).collect();
    actions.sort_unstable();
    let mut scenarios: Vec<(&str, bool)> = input
        .scenarios
        .iter()
        .map(|s| (s.id.as_str(), s.adversarial))
        .collect();
    scenarios.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let a_idx: HashMap<&str, usize> = actions.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let s_idx: HashMap<&str, usize> = scenarios.iter().enumerate().map(|(i, s)| (s.0, i)).collect();
    let (na, ns) = (actions.len(), scenarios.len());

    let mut matrix = vec![0.0_f64; na * ns];
    let mut filled_cells = 0;
    for o in &input.outcomes {
        if let (Some(&a), Some(&s)) = (a_idx.get(o.action_id.as_str()), s_idx.get(o.scenario_id.as_str())) {
            matrix[a * ns + s] = quantize(o.utility);
            filled_cells += 1;
        }
    }

    let mut col_max = vec![f64::NEG_INFINITY; ns];
    for a in 0..na {
        for s in 0..ns {
            col_max[s] = col_max[s].max(matrix[a * ns + s]);
        }
    }
    let col_max: Vec<f64> = col_max.into_iter().map(quantize).collect();
    let any_adversarial = scenarios.iter().any(|s| s.1);

    let mut tables = MetricTables {
        utility: BTreeMap::new(),
        worst_case: BTreeMap::new(),
        regret: BTreeMap::new(),
        max_regret: BTreeMap::new(),
        adversarial: BTreeMap::new(),
        filled_cells,
    };

    for (a, action_id) in actions.iter().enumerate() {
        let row = &matrix[a * ns..(a + 1) * ns];
        let mut worst = f64::INFINITY;
        let mut adversarial = f64::INFINITY;
        let mut max_regret = 0.0_f64;
        let mut regrets = BTreeMap::new();
        let mut utilities = BTreeMap::new();

        for (s, &u) in row.iter().enumerate() {
            let (scenario_id, is_adversarial) = scenarios[s];
            worst = worst.min(u);
            if is_adversarial {
                adversarial = adversarial.min(u);
            }
            let regret = quantize(col_max[s] - u);
            max_regret = max_regret.max(regret);
            regrets.insert(scenario_id.to_string(), regret);
            utilities.insert(scenario_id.to_string(), u);
        }

        let key = action_id.to_string();
        tables.utility.insert(key.clone(), utilities);
        tables.regret.insert(key.clone(), regrets);
        tables.worst_case.insert(key.clone(), quantize(worst));
        tables.max_regret.insert(key.clone(), quantize(max_regret));
        if any_adversarial {
            tables.adversarial.insert(key, quantize(adversarial));
        }
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::types::{ActionOption, Outcome, Scenario};

    #[test]
    fn unavailable_engine_refuses() {
        let engine = NativeEngine::new();
        engine.set_available(false);
        let input = DecisionInput {
            id: None,
            actions: vec![ActionOption { id: "a".into(), label: "A".into() }],
            scenarios: vec![Scenario { id: "s".into(), probability: None, adversarial: false }],
            outcomes: vec![Outcome::new("a", "s", 1.0)],
            constraints: vec![],
            evidence: None,
            meta: None,
        };
        assert!(matches!(
            engine.evaluate(&input),
            Err(DecisionError::EngineUnavailable { .. })
        ));
        engine.set_available(true);
        assert!(engine.evaluate(&input).is_ok());
    }
}
