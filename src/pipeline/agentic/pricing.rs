//! Per-model token pricing and the running cost tracker.

use super::types::Usage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// Known model families, matched by prefix.
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-opus",
        ModelPricing {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
        },
    ),
    (
        "claude-sonnet",
        ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        },
    ),
    (
        "claude-haiku",
        ModelPricing {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input_per_mtok: 0.8,
            output_per_mtok: 4.0,
        },
    ),
];

/// Unknown models are billed at the most expensive known rate so the budget
/// can only trip early, never late.
pub const CONSERVATIVE_DEFAULT: ModelPricing = ModelPricing {
    input_per_mtok: 15.0,
    output_per_mtok: 75.0,
};

pub fn pricing_for(model: &str) -> ModelPricing {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
        .unwrap_or_else(|| {
            tracing::warn!(model, "No pricing for model, using conservative default");
            CONSERVATIVE_DEFAULT
        })
}

/// Cumulative usage across rounds. Cost is recomputed from totals each time.
#[derive(Debug, Clone)]
pub struct CostTracker {
    pricing: ModelPricing,
    input_tokens: u64,
    output_tokens: u64,
}

impl CostTracker {
    pub fn new(pricing: ModelPricing) -> Self {
        Self {
            pricing,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn record(&mut self, usage: Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    pub fn cost_usd(&self) -> f64 {
        (self.input_tokens as f64 * self.pricing.input_per_mtok
            + self.output_tokens as f64 * self.pricing.output_per_mtok)
            / 1_000_000.0
    }

    pub fn exceeds(&self, budget_usd: f64) -> bool {
        self.cost_usd() > budget_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_match_by_prefix() {
        assert_eq!(pricing_for("claude-sonnet-4-5").input_per_mtok, 3.0);
        assert_eq!(pricing_for("claude-3-5-haiku-latest").output_per_mtok, 4.0);
    }

    #[test]
    fn unknown_model_uses_conservative_default() {
        assert_eq!(pricing_for("some-other-model"), CONSERVATIVE_DEFAULT);
    }

    #[test]
    fn cost_accumulates_across_rounds() {
        let mut tracker = CostTracker::new(pricing_for("claude-sonnet-4-5"));
        tracker.record(Usage {
            input_tokens: 100_000,
            output_tokens: 10_000,
        });
        assert!((tracker.cost_usd() - 0.45).abs() < 1e-9);
        tracker.record(Usage {
            input_tokens: 100_000,
            output_tokens: 10_000,
        });
        assert!((tracker.cost_usd() - 0.90).abs() < 1e-9);
        assert!(tracker.exceeds(0.5));
        assert!(!tracker.exceeds(1.0));
    }
}
