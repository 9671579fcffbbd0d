//! Head, skip, random-sampling, and ordering pipelines.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::expr::Expr;

use super::errors::StageResult;

/// Draws the randomization multiplier for `take` and `shuffle`. Seeded
/// draws are reproducible; unseeded draws come from OS entropy.
pub(crate) fn draw_multiplier(seed: Option<u64>) -> i64 {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    rng.gen_range(10_000_000..=10_000_000_000i64)
}

pub(crate) fn limit_pipeline(limit: i64) -> Vec<Value> {
    if limit <= 0 {
        return vec![match_nothing()];
    }
    vec![json!({"$limit": limit})]
}

pub(crate) fn skip_pipeline(skip: i64) -> Vec<Value> {
    if skip <= 0 {
        return Vec::new();
    }
    vec![json!({"$skip": skip})]
}

/// Random sample of `size` documents, keyed off the persisted `_rand`
/// field so the same multiplier always draws the same subset.
pub(crate) fn take_pipeline(size: i64, multiplier: i64) -> Vec<Value> {
    if size <= 0 {
        return vec![match_nothing()];
    }
    vec![
        json!({"$set": {"_rand_take": {"$mod": [multiplier, "$_rand"]}}}),
        json!({"$sort": {"_rand_take": 1}}),
        json!({"$limit": size}),
        json!({"$unset": "_rand_take"}),
    ]
}

/// Deterministic reorder of the whole collection keyed off `_rand`.
pub(crate) fn shuffle_pipeline(multiplier: i64) -> Vec<Value> {
    vec![
        json!({"$set": {"_rand_shuffle": {"$mod": [multiplier, "$_rand"]}}}),
        json!({"$sort": {"_rand_shuffle": 1}}),
        json!({"$unset": "_rand_shuffle"}),
    ]
}

pub(crate) fn sort_by_field_pipeline(field: &str, reverse: bool) -> Vec<Value> {
    vec![json!({"$sort": { field: sort_order(reverse) }})]
}

/// Sorting by an expression materializes the key into a scratch field,
/// sorts on it, then drops it.
pub(crate) fn sort_by_expr_pipeline(expr: &Expr, reverse: bool) -> StageResult<Vec<Value>> {
    let compiled = expr.compile(None)?;
    Ok(vec![
        json!({"$set": {"_sort_field": compiled}}),
        json!({"$sort": {"_sort_field": sort_order(reverse)}}),
        json!({"$unset": "_sort_field"}),
    ])
}

fn sort_order(reverse: bool) -> i64 {
    if reverse {
        -1
    } else {
        1
    }
}

fn match_nothing() -> Value {
    json!({"$match": {"_id": null}})
}
