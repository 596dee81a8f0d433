//! Bounded rolling statistics used by the feature engine.
//!
//! `RollingWindow` keeps at most `capacity` samples. Variance is the
//! population variance, matching the standard deviation used elsewhere.
//! `EwmaVariance` is the RiskMetrics-style recursion
//! `var[t] = λ·var[t-1] + (1-λ)·x[t]²`, seeded with the first squared sample.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn stddev(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / self.values.len() as f64;
        variance.sqrt()
    }

    /// Average change per sample between the oldest and newest value.
    pub fn slope(&self) -> f64 {
        match (self.values.front(), self.values.back()) {
            (Some(first), Some(last)) if self.values.len() > 1 => {
                (last - first) / (self.values.len() - 1) as f64
            }
            _ => 0.0,
        }
    }

    /// `(x - mean) / stddev`; zero when the window has no spread.
    pub fn zscore(&self, x: f64) -> f64 {
        let sd = self.stddev();
        if sd > 0.0 { (x - self.mean()) / sd } else { 0.0 }
    }
}

#[derive(Debug, Clone)]
pub struct EwmaVariance {
    lambda: f64,
    variance: Option<f64>,
}

impl EwmaVariance {
    pub fn new(lambda: f64) -> Self {
        EwmaVariance {
            lambda: lambda.clamp(0.0, 1.0),
            variance: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let sq = x * x;
        let next = match self.variance {
            Some(prev) => self.lambda * prev + (1.0 - self.lambda) * sq,
            None => sq,
        };
        self.variance = Some(next);
        next
    }

    pub fn variance(&self) -> f64 {
        self.variance.unwrap_or(0.0)
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}
