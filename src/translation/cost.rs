/*!
 * Cost estimation and tracking.
 *
 * `CostEstimator` predicts tokens and spend for a document before any model call is
 * made. `CostLedger` accumulates the actual usage reported by the provider while a
 * job runs, and is rebuilt from the checkpoint on resume.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::{CostConfig, ModelSpec, TranslationProvider};
use crate::translation::prompts::PROMPT_OVERHEAD_TOKENS;
use crate::translation::unit::{TokenUsage, TranslationUnit, UnitContent};

/// Price of a model, in USD per million tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Model name or name prefix, without provider
    pub model: String,
    pub input_cost_per_1m_tokens: f64,
    pub output_cost_per_1m_tokens: f64,
}

impl ModelPrice {
    pub fn new(model: impl Into<String>, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1m_tokens: input,
            output_cost_per_1m_tokens: output,
        }
    }

    /// Free pricing, used for local and unknown models
    pub fn free(model: impl Into<String>) -> Self {
        Self::new(model, 0.0, 0.0)
    }

    /// Cost of the given usage
    pub fn cost_of(&self, usage: TokenUsage) -> f64 {
        (usage.input as f64 / 1_000_000.0) * self.input_cost_per_1m_tokens
            + (usage.output as f64 / 1_000_000.0) * self.output_cost_per_1m_tokens
    }
}

/// Built-in prices
pub fn default_price_table() -> Vec<ModelPrice> {
    vec![
        ModelPrice::new("gpt-5-nano", 0.05, 0.40),
        ModelPrice::new("gpt-5-mini", 0.25, 2.00),
        ModelPrice::new("gpt-5", 1.25, 10.00),
        ModelPrice::new("gpt-4.1-mini", 0.40, 1.60),
        ModelPrice::new("gpt-4.1", 2.00, 8.00),
        ModelPrice::new("gpt-4o-mini", 0.15, 0.60),
        ModelPrice::new("gpt-4o", 2.50, 10.00),
        ModelPrice::new("claude-3-5-haiku", 0.80, 4.00),
        ModelPrice::new("claude-3-5-sonnet", 3.00, 15.00),
        ModelPrice::new("claude-sonnet-4", 3.00, 15.00),
        ModelPrice::new("claude-opus-4", 15.00, 75.00),
    ]
}

/// Lookup over a list of model prices
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: Vec<ModelPrice>,
}

impl PriceTable {
    pub fn new(prices: Vec<ModelPrice>) -> Self {
        Self { prices }
    }

    /// Price for a model; the longest matching name prefix wins, local and unknown models are free
    pub fn price_for(&self, spec: &ModelSpec) -> ModelPrice {
        if spec.provider.is_local() {
            return ModelPrice::free(spec.model.clone());
        }
        let name = strip_provider_prefix(&spec.model).to_lowercase();
        self.prices
            .iter()
            .filter(|p| name.starts_with(&p.model.to_lowercase()))
            .max_by_key(|p| p.model.len())
            .cloned()
            .unwrap_or_else(|| ModelPrice::free(spec.model.clone()))
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(default_price_table())
    }
}

// "openai/gpt-5" and "openai:gpt-5" -> "gpt-5"
fn strip_provider_prefix(model: &str) -> &str {
    let model = model.rsplit_once('/').map(|(_, name)| name).unwrap_or(model);
    match model.split_once(':') {
        Some((provider, name)) if provider.parse::<TranslationProvider>().is_ok() => name,
        _ => model,
    }
}

/// Coarse spend bracket shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl CostLevel {
    pub fn from_cost(cost: f64) -> Self {
        if cost < 1.0 {
            Self::Low
        } else if cost < 5.0 {
            Self::Medium
        } else if cost < 20.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }
}

impl std::fmt::Display for CostLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very high",
        };
        write!(f, "{}", s)
    }
}

/// Predicted usage for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEstimate {
    pub sequence_index: usize,
    pub tokens: TokenUsage,
    pub cost: f64,
}

/// Pre-flight estimate for a whole document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Input plus output tokens over all units
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    pub per_unit_breakdown: Vec<UnitEstimate>,
    pub warnings: Vec<String>,
    pub cost_level: CostLevel,
    pub estimated_time: Duration,
}

/// Estimator for tokens and cost before a job starts; makes no model calls
#[derive(Debug, Clone)]
pub struct CostEstimator {
    config: CostConfig,
    prices: PriceTable,
}

impl CostEstimator {
    pub fn new(config: CostConfig) -> Self {
        let prices = PriceTable::new(config.prices.clone());
        Self { config, prices }
    }

    pub fn price_table(&self) -> &PriceTable {
        &self.prices
    }

    /// Estimated input tokens for a unit, including the prompt overhead
    pub fn input_tokens(&self, unit: &TranslationUnit) -> u64 {
        let content = match unit.content() {
            UnitContent::Text(text) => {
                let chars = text.chars().count() as u64;
                chars.div_ceil(self.config.chars_per_token.max(1) as u64)
            }
            UnitContent::Image { .. } => self.config.image_tokens_per_page,
        };
        content + PROMPT_OVERHEAD_TOKENS
    }

    /// Estimate tokens, cost and duration for the given units
    pub fn estimate(
        &self,
        units: &[TranslationUnit],
        spec: &ModelSpec,
        source_language: &str,
        target_language: &str,
    ) -> CostEstimate {
        let price = self.prices.price_for(spec);
        let ratio = self.config.ratio_for(source_language, target_language);

        let per_unit_breakdown: Vec<UnitEstimate> = units
            .iter()
            .map(|unit| {
                let input = self.input_tokens(unit);
                let output = (input as f64 * ratio).ceil() as u64;
                let tokens = TokenUsage::new(input, output);
                UnitEstimate {
                    sequence_index: unit.sequence_index(),
                    tokens,
                    cost: price.cost_of(tokens),
                }
            })
            .collect();

        let estimated_tokens: u64 = per_unit_breakdown.iter().map(|u| u.tokens.total()).sum();
        let estimated_cost: f64 = per_unit_breakdown.iter().map(|u| u.cost).sum();

        let tokens_per_second = if spec.provider.is_local() { 20.0 } else { 5.0 };
        let estimated_time = Duration::from_secs_f64(estimated_tokens as f64 / tokens_per_second);

        let mut warnings = Vec::new();
        if !spec.provider.is_local() && estimated_tokens > self.config.large_document_tokens {
            warnings.push(format!(
                "Large document detected ({} tokens). Consider using Ollama for no cost.",
                estimated_tokens
            ));
        }
        if let Some(max_cost) = self.config.max_cost {
            if estimated_cost > max_cost {
                warnings.push(format!(
                    "Estimated cost (${:.2}) exceeds maximum threshold (${:.2})",
                    estimated_cost, max_cost
                ));
            }
        }
        if !spec.provider.is_local() && price.input_cost_per_1m_tokens == 0.0 && price.output_cost_per_1m_tokens == 0.0 {
            warnings.push(format!("No price known for model '{}', cost reported as 0", spec.model));
        }

        CostEstimate {
            estimated_tokens,
            estimated_cost,
            per_unit_breakdown,
            warnings,
            cost_level: CostLevel::from_cost(estimated_cost),
            estimated_time,
        }
    }
}

/// Running totals of actual usage for a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    pub tokens: TokenUsage,
    pub cost: f64,
    pub calls: u64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call's usage; totals never decrease
    pub fn append(&mut self, usage: TokenUsage, price: &ModelPrice) {
        self.tokens += usage;
        self.cost += price.cost_of(usage);
        self.calls += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}
