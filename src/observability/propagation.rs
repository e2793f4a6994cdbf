//! Trace context carrier codec.
//!
//! Encodes a [`TraceContext`] into a flat header map as a single `traceparent`
//! entry and decodes it on the receiving side.
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//!              ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//!         version            trace id                  span id      flags
//! ```
//!
//! Decoding is permissive: a missing or malformed entry yields
//! [`TraceContext::empty`], which callers treat as "start a new trace".

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::observability::context::{SpanId, TraceContext, TraceId};

/// Carrier key. Lookups are case-insensitive.
pub const TRACEPARENT: &str = "traceparent";

const SUPPORTED_VERSION: u8 = 0x00;
const FLAG_SAMPLED: u8 = 0x01;

/// A string-keyed map that can carry trace context across a process boundary.
pub trait Carrier {
    /// Case-insensitive lookup.
    fn get(&self, key: &str) -> Option<&str>;

    /// Write `value` under `key`, replacing any existing entry for that key.
    fn set(&mut self, key: &str, value: String);
}

impl Carrier for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.insert(name, value);
        }
    }
}

impl Carrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: String) {
        self.retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.insert(key.to_ascii_lowercase(), value);
    }
}

/// Decode the trace context from `carrier`.
///
/// Never fails: an absent, malformed or all-zero entry returns an empty context.
pub fn extract<C: Carrier + ?Sized>(carrier: &C) -> TraceContext {
    carrier
        .get(TRACEPARENT)
        .and_then(decode)
        .unwrap_or_else(TraceContext::empty)
}

/// Encode `ctx` into `carrier`, overwriting any existing entry.
///
/// Invalid contexts leave the carrier untouched.
pub fn inject<C: Carrier + ?Sized>(ctx: &TraceContext, carrier: &mut C) {
    if let Some(value) = encode(ctx) {
        carrier.set(TRACEPARENT, value);
    }
}

/// Render the `traceparent` value for a valid context.
pub fn encode(ctx: &TraceContext) -> Option<String> {
    if !ctx.is_valid() {
        return None;
    }
    let flags = if ctx.sampled { FLAG_SAMPLED } else { 0 };
    Some(format!(
        "{:02x}-{}-{}-{:02x}",
        SUPPORTED_VERSION, ctx.trace_id, ctx.span_id, flags
    ))
}

/// Parse a `traceparent` value.
pub fn decode(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');

    let version = parse_byte(parts.next()?)?;
    if version == 0xff {
        return None;
    }
    let trace_id = TraceId::from_hex(parts.next()?)?;
    let span_id = SpanId::from_hex(parts.next()?)?;
    let flags = parse_byte(parts.next()?)?;

    // Version 00 has exactly four fields; later versions may append more.
    if version == SUPPORTED_VERSION && parts.next().is_some() {
        return None;
    }

    let ctx = TraceContext::new(trace_id, span_id, flags & FLAG_SAMPLED != 0);
    ctx.is_valid().then_some(ctx)
}

fn parse_byte(s: &str) -> Option<u8> {
    if s.len() != 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_round_trip_through_empty_carrier() {
        for sampled in [true, false] {
            let ctx = TraceContext::new(TraceId::random(), SpanId::random(), sampled);
            let mut carrier: HashMap<String, String> = HashMap::new();
            inject(&ctx, &mut carrier);
            assert_eq!(extract(&carrier), ctx);

            let mut headers = HeaderMap::new();
            inject(&ctx, &mut headers);
            assert_eq!(extract(&headers), ctx);
        }
    }

    #[test]
    fn test_extract_known_value() {
        let mut headers = HeaderMap::new();
        headers.insert("Traceparent", HeaderValue::from_static(SAMPLE));

        let ctx = extract(&headers);
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(ctx.parent_span_id, None);
    }

    #[test]
    fn test_key_lookup_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.insert("TraceParent".to_string(), SAMPLE.to_string());
        assert!(extract(&carrier).is_valid());
    }

    #[test]
    fn test_missing_or_malformed_yields_empty() {
        let cases = [
            "",
            "garbage",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "0-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1",
            "00_4bf92f3577b34da6a3ce929d0e0e4736_00f067aa0ba902b7_01",
        ];
        for case in cases {
            let mut carrier = HashMap::new();
            carrier.insert(TRACEPARENT.to_string(), case.to_string());
            assert_eq!(extract(&carrier), TraceContext::empty(), "case: {case:?}");
        }

        assert_eq!(extract(&HeaderMap::new()), TraceContext::empty());
    }

    #[test]
    fn test_future_version_accepts_trailing_fields() {
        let ctx = decode("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00-what").unwrap();
        assert!(!ctx.sampled);
        assert!(ctx.is_valid());
    }

    #[test]
    fn test_inject_overwrites_existing_value() {
        let mut carrier = HashMap::new();
        carrier.insert("TRACEPARENT".to_string(), SAMPLE.to_string());

        let ctx = TraceContext::new(TraceId::random(), SpanId::random(), true);
        inject(&ctx, &mut carrier);

        assert_eq!(carrier.len(), 1);
        assert_eq!(extract(&carrier), ctx);
    }

    #[test]
    fn test_inject_skips_invalid_context() {
        let mut headers = HeaderMap::new();
        inject(&TraceContext::empty(), &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parent_span_id_is_not_carried() {
        let mut ctx = TraceContext::new(TraceId::random(), SpanId::random(), true);
        ctx.parent_span_id = Some(SpanId::random());

        let mut carrier: HashMap<String, String> = HashMap::new();
        inject(&ctx, &mut carrier);
        let decoded = extract(&carrier);

        assert_eq!(decoded.trace_id, ctx.trace_id);
        assert_eq!(decoded.span_id, ctx.span_id);
        assert_eq!(decoded.parent_span_id, None);
    }
}
