//! Token and cost accounting

use spool_ai::{ModelInfo, StreamEvent, Usage};

/// Aggregates usage reports into monotonically increasing totals.
///
/// Totals only go back to zero through [`UsageAccumulator::reset`].
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    totals: Usage,
    reports: u32,
    /// Used to price reports that arrive without a cost
    pricing: Option<ModelInfo>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price cost-less reports with this model's rates
    pub fn with_pricing(model: ModelInfo) -> Self {
        Self {
            pricing: Some(model),
            ..Self::default()
        }
    }

    /// Add one usage record
    pub fn record(&mut self, usage: &Usage) {
        let mut usage = usage.clone();
        if usage.cost == 0.0 {
            if let Some(model) = &self.pricing {
                usage.cost = usage.calculate_cost(model);
            }
        }
        self.totals.add(&usage);
        self.reports += 1;
    }

    /// Record a `usage` stream event. Returns false for any other event kind.
    pub fn record_event(&mut self, event: &StreamEvent) -> bool {
        match event.as_usage() {
            Some(usage) => {
                self.record(&usage);
                true
            }
            None => false,
        }
    }

    /// Fold another accumulator's totals into this one
    pub fn merge(&mut self, other: &UsageAccumulator) {
        self.totals.add(&other.totals);
        self.reports += other.reports;
    }

    pub fn totals(&self) -> &Usage {
        &self.totals
    }

    /// Number of usage reports recorded since the last reset
    pub fn reports(&self) -> u32 {
        self.reports
    }

    pub fn reset(&mut self) {
        self.totals = Usage::default();
        self.reports = 0;
    }
}
