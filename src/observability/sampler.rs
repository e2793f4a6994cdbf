//! Parent-based ratio sampling.
//!
//! A span with a valid parent inherits the parent's sampled flag. A root span
//! is sampled when the low 64 bits of its trace id fall under `ratio`, so every
//! service that sees the same root trace id reaches the same decision.

use crate::observability::context::{TraceContext, TraceId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    ratio: f64,
}

impl Sampler {
    /// `ratio` is clamped to `[0, 1]`.
    pub fn parent_based(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self { ratio }
    }

    pub fn always_on() -> Self {
        Self::parent_based(1.0)
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn should_sample(&self, parent: Option<&TraceContext>, trace_id: TraceId) -> bool {
        if let Some(parent) = parent.filter(|p| p.is_valid()) {
            return parent.sampled;
        }
        if self.ratio >= 1.0 {
            return true;
        }
        if self.ratio <= 0.0 {
            return false;
        }
        let threshold = (self.ratio * u64::MAX as f64) as u64;
        (trace_id.to_u128() as u64) < threshold
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::always_on()
    }
}
