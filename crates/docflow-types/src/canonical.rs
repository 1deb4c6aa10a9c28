//! Canonical JSON encoding: the exact byte sequence that is signed and
//! transmitted (spec glossary, §4.5 "Body: canonical JSON").
//!
//! `serde_json`'s `Map` is backed by a `BTreeMap` unless the
//! `preserve_order` feature is enabled — which this crate deliberately does
//! not enable, anywhere in the workspace. That means `serde_json::to_vec`
//! already produces a compact encoding with keys in sorted order at every
//! nesting level; canonicalization is a documented property of our
//! dependency choice, not a hand-rolled serializer.

use serde::Serialize;

/// Serialize `value` to the canonical (compact, sorted-key) JSON byte
/// sequence used for webhook bodies and HMAC signing.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// As [`canonical_json`], but returns a `String` — convenient for the
/// `timestamp + "." + body` signing input.
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
