//! Query Key Function
//!
//! Deterministic string derivation from a parameter map. Generalizes the
//! teacher's `QueryKey` (a fixed `Vec<String>` of segments, `src/types/mod.rs`)
//! into an arbitrary sorted parameter map per spec §3: two maps with equal
//! values in the same key order produce identical keys, regardless of
//! insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameter value. Isomorphic to the scalar/array subset of
/// `serde_json::Value` — deliberately closed so parameters stay canonically
/// serializable without inviting arbitrary nested objects into the key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ParamValue>),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for ParamValue {
            fn from(v: $t) -> Self {
                ParamValue::Number(v as f64)
            }
        })*
    };
}
impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, usize, isize);

/// An unordered mapping from string keys to values (spec §3's `P`). Accepted
/// at the API boundary as a plain map; the resolver sorts it on every key
/// derivation, so callers never need to pre-sort.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Derive the canonical query key for a parameter map: sort keys ascending,
/// serialize the value sequence in that order as a JSON array. `BTreeMap`
/// already iterates in sorted key order, so this is a direct serialization.
pub fn query_key(params: &ParamMap) -> String {
    let values: Vec<&ParamValue> = params.values().collect();
    serde_json::to_string(&values).expect("ParamValue is always serializable")
}
