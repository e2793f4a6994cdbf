//! Trace and span identifiers.
//!
//! # Responsibilities
//! - 128-bit trace ids and 64-bit span ids with lowercase hex rendering
//! - Random id generation (never all-zero)
//! - `TraceContext`: the value threaded through a request from middleware to handler
//!
//! # Design Decisions
//! - All-zero ids are the "invalid" sentinel, matching the W3C format
//! - `TraceContext::empty()` means "no parent"; decode failures produce it

use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};

/// 16-byte trace identifier, stable across a causal chain of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId(u128);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn to_u128(self) -> u128 {
        self.0
    }

    /// Mint a fresh, non-zero trace id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u128 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    /// Parse exactly 32 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        parse_lower_hex(s, 32).map(Self)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 8-byte span identifier, unique per span within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Allocate a fresh, non-zero span id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u64 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    /// Parse exactly 16 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        parse_lower_hex(s, 16).map(|v| Self(v as u64))
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Uppercase digits are rejected: the wire format is lowercase only.
fn parse_lower_hex(s: &str, len: usize) -> Option<u128> {
    if s.len() != len || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u128::from_str_radix(s, 16).ok()
}

/// Identity of one span plus its lineage.
///
/// `span_id` is the span this context belongs to. For a context decoded from an
/// inbound carrier that is the *remote caller's* span, and `parent_span_id` is
/// `None` because the wire format does not carry grandparents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
}

impl TraceContext {
    /// The "no parent" context.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            sampled,
        }
    }

    /// A context is usable as a parent only when both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}
