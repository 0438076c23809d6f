//! Friendly-value policy.
//!
//! The synchronous call surface never raises for routine network/service
//! conditions; it returns a type-appropriate stand-in instead: zero for
//! numbers, false for booleans, `"error: <message>"` for strings, empty
//! containers, the empty case for optionals, null for raw JSON values.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use sb_core::RpcError;
use serde_json::Value;

/// Return types the non-throwing call surface can stand in for.
pub trait FriendlyReturn: Sized {
    fn friendly(err: &RpcError) -> Self;
}

macro_rules! zero_friendly {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FriendlyReturn for $ty {
                fn friendly(_err: &RpcError) -> Self {
                    0 as $ty
                }
            }
        )*
    };
}

zero_friendly!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl FriendlyReturn for bool {
    fn friendly(_err: &RpcError) -> Self {
        false
    }
}

impl FriendlyReturn for String {
    fn friendly(err: &RpcError) -> Self {
        format!("error: {err}")
    }
}

impl FriendlyReturn for () {
    fn friendly(_err: &RpcError) -> Self {}
}

impl FriendlyReturn for Value {
    fn friendly(_err: &RpcError) -> Self {
        Value::Null
    }
}

impl<T> FriendlyReturn for Option<T> {
    fn friendly(_err: &RpcError) -> Self {
        None
    }
}

impl<T> FriendlyReturn for Vec<T> {
    fn friendly(_err: &RpcError) -> Self {
        Vec::new()
    }
}

impl<K: std::hash::Hash + Eq, V> FriendlyReturn for HashMap<K, V> {
    fn friendly(_err: &RpcError) -> Self {
        HashMap::new()
    }
}

impl<K: Ord, V> FriendlyReturn for BTreeMap<K, V> {
    fn friendly(_err: &RpcError) -> Self {
        BTreeMap::new()
    }
}

impl<T: std::hash::Hash + Eq> FriendlyReturn for HashSet<T> {
    fn friendly(_err: &RpcError) -> Self {
        HashSet::new()
    }
}

impl<T: Ord> FriendlyReturn for BTreeSet<T> {
    fn friendly(_err: &RpcError) -> Self {
        BTreeSet::new()
    }
}
