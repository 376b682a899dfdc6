//! Query Model → native MongoDB documents.
//!
//! Pure functions; the only state is the `TranslateOptions` policy.

use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{
    AggregateKeys, DataType, Filter, Filters, GroupKeys, Operator, Projection, Range, SortKey,
    Update, UpdateOperator, Updates, Value,
};
use crate::errors::DbError;

/// What to do with an operator the current operation cannot express.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorPolicy {
    /// Emit no constraint and log a warning.
    #[default]
    Lenient,
    /// Fail with `DbError::Translation`; also checks values against their `DataType`.
    Strict,
}

/// How filters that share a key are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeys {
    /// The last filter for a key replaces earlier ones.
    #[default]
    LastWriteWins,
    /// Repeated keys are combined under `$and`.
    Conjoin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateOptions {
    #[serde(default)]
    pub operators: OperatorPolicy,
    #[serde(default)]
    pub duplicate_keys: DuplicateKeys,
}

impl TranslateOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self { operators: OperatorPolicy::Strict, ..Self::default() }
    }

    const fn is_strict(&self) -> bool {
        matches!(self.operators, OperatorPolicy::Strict)
    }
}

const UPSERT_OPERATORS: &[Operator] =
    &[Operator::Equal, Operator::In, Operator::GreaterThanEqual, Operator::LessThan];
const REPLACE_OPERATORS: &[Operator] = &[Operator::Equal, Operator::In];

fn mismatch(key: &str, op: Operator, expected: &str, got: &Value) -> DbError {
    DbError::Translation(format!(
        "filter `{key}`: operator {op:?} requires a {expected} value, got {}",
        got.kind()
    ))
}

fn skip_or_fail(opts: &TranslateOptions, what: String) -> Result<Option<Bson>, DbError> {
    if opts.is_strict() {
        return Err(DbError::Translation(what));
    }
    log::warn!("{what}; no constraint emitted");
    Ok(None)
}

fn check_type(key: &str, data_type: DataType, value: &Value) -> Result<(), DbError> {
    let ok = match value {
        Value::Scalar(v) => data_type.admits(v),
        Value::Array(vs) => vs.iter().all(|v| data_type.admits(v)),
        Value::Range(Range { left, right }) => data_type.admits(left) && data_type.admits(right),
        Value::Filters(_) => true,
    };
    if ok {
        Ok(())
    } else {
        Err(DbError::Translation(format!("`{key}`: value does not match declared type {data_type:?}")))
    }
}

fn as_array(filter: &Filter) -> Result<Bson, DbError> {
    match &filter.value {
        Value::Array(vs) => Ok(Bson::Array(vs.clone())),
        Value::Scalar(v) => Ok(Bson::Array(vec![v.clone()])),
        other => Err(mismatch(&filter.key, filter.operator, "scalar or array", other)),
    }
}

fn as_scalar(filter: &Filter) -> Result<Bson, DbError> {
    match &filter.value {
        Value::Scalar(v) => Ok(v.clone()),
        other => Err(mismatch(&filter.key, filter.operator, "scalar", other)),
    }
}

fn with_op(op: &str, value: Bson) -> Bson {
    let mut d = Document::new();
    d.insert(op, value);
    Bson::Document(d)
}

/// Native constraint for one filter entry, or `None` when the entry is dropped.
fn constraint(filter: &Filter, opts: &TranslateOptions) -> Result<Option<Bson>, DbError> {
    if opts.is_strict() {
        check_type(&filter.key, filter.data_type, &filter.value)?;
    }
    let c = match filter.operator {
        Operator::Equal | Operator::InArray => match &filter.value {
            Value::Scalar(v) => v.clone(),
            Value::Array(vs) => Bson::Array(vs.clone()),
            other => return Err(mismatch(&filter.key, filter.operator, "scalar or array", other)),
        },
        Operator::In => with_op("$in", as_array(filter)?),
        Operator::NotIn => with_op("$nin", as_array(filter)?),
        Operator::All => with_op("$all", as_array(filter)?),
        Operator::GreaterThan => with_op("$gt", as_scalar(filter)?),
        Operator::GreaterThanEqual => with_op("$gte", as_scalar(filter)?),
        Operator::LessThan => with_op("$lt", as_scalar(filter)?),
        Operator::LessThanEqual => with_op("$lte", as_scalar(filter)?),
        Operator::Between => match &filter.value {
            Value::Range(r) => Bson::Document(doc! { "$gte": r.left.clone(), "$lte": r.right.clone() }),
            other => return Err(mismatch(&filter.key, filter.operator, "range", other)),
        },
        Operator::Or => match &filter.value {
            Value::Filters(sub) => {
                let alternatives = translate_entries(sub, opts, None, "or")?
                    .into_iter()
                    .map(|(k, v)| {
                        let mut alt = Document::new();
                        alt.insert(k, v);
                        Bson::Document(alt)
                    })
                    .collect();
                Bson::Array(alternatives)
            }
            other => return Err(mismatch(&filter.key, filter.operator, "filters", other)),
        },
        Operator::Unknown(code) => {
            return skip_or_fail(opts, format!("filter `{}`: unknown operator code {code}", filter.key));
        }
    };
    Ok(Some(c))
}

/// Translates `filters` into a native predicate document.
///
/// `allowed` restricts the operators the calling operation accepts; `op_name`
/// labels the operation in errors and warnings.
fn translate_entries(
    filters: &Filters,
    opts: &TranslateOptions,
    allowed: Option<&[Operator]>,
    op_name: &str,
) -> Result<Document, DbError> {
    let mut entries: Vec<(String, Bson)> = Vec::with_capacity(filters.len());
    for f in filters {
        if let Some(allowed) = allowed
            && !allowed.contains(&f.operator)
        {
            skip_or_fail(opts, format!("{op_name}: operator {:?} on `{}` not supported", f.operator, f.key))?;
            continue;
        }
        if let Some(c) = constraint(f, opts)? {
            entries.push((f.key.clone(), c));
        }
    }

    let mut out = Document::new();
    match opts.duplicate_keys {
        DuplicateKeys::LastWriteWins => {
            for (k, c) in entries {
                out.insert(k, c);
            }
        }
        DuplicateKeys::Conjoin => {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for (k, _) in &entries {
                *counts.entry(k.as_str()).or_default() += 1;
            }
            let repeated: Vec<bool> = entries.iter().map(|(k, _)| counts[k.as_str()] > 1).collect();
            let mut conjuncts = Vec::new();
            for ((k, c), rep) in entries.into_iter().zip(repeated) {
                if rep {
                    let mut single = Document::new();
                    single.insert(k, c);
                    conjuncts.push(Bson::Document(single));
                } else {
                    out.insert(k, c);
                }
            }
            if !conjuncts.is_empty() {
                let mut all = match out.remove("$and") {
                    Some(Bson::Array(existing)) => existing,
                    Some(caller) => vec![caller],
                    None => Vec::new(),
                };
                all.extend(conjuncts);
                out.insert("$and", all);
            }
        }
    }
    Ok(out)
}

/// Native predicate for a general read/write.
///
/// # Errors
/// `DbError::Translation` when a payload does not fit its operator, or in
/// strict mode for unknown operators and type mismatches.
pub fn filters_to_document(filters: &Filters, opts: &TranslateOptions) -> Result<Document, DbError> {
    translate_entries(filters, opts, None, "filter")
}

/// Match side of an upsert: EQUAL, IN, `GREATER_THAN_EQUAL` and `LESS_THAN` only.
///
/// # Errors
/// See [`filters_to_document`]; other operators are errors in strict mode.
pub fn upsert_filter(filters: &Filters, opts: &TranslateOptions) -> Result<Document, DbError> {
    translate_entries(filters, opts, Some(UPSERT_OPERATORS), "upsert")
}

/// Match side of a replace: EQUAL and IN only.
///
/// # Errors
/// See [`filters_to_document`]; other operators are errors in strict mode.
pub fn replace_filter(filters: &Filters, opts: &TranslateOptions) -> Result<Document, DbError> {
    translate_entries(filters, opts, Some(REPLACE_OPERATORS), "replace")
}

fn update_value(u: &Update) -> Result<Bson, DbError> {
    match &u.value {
        Value::Scalar(v) => Ok(v.clone()),
        Value::Array(vs) => Ok(Bson::Array(vs.clone())),
        other => Err(DbError::Translation(format!(
            "update `{}`: {} cannot carry a {} value",
            u.key,
            u.operator,
            other.kind()
        ))),
    }
}

/// Groups updates by operator into one clause each. Push entries for the same
/// field accumulate into a single `$each` list in input order.
///
/// # Errors
/// `DbError::Translation` for range/filters payloads, or strict type mismatches.
pub fn updates_to_document(updates: &Updates, opts: &TranslateOptions) -> Result<Document, DbError> {
    let mut out = Document::new();
    for u in updates {
        if opts.is_strict() {
            check_type(&u.key, u.data_type, &u.value)?;
        }
        let value = update_value(u)?;
        let op = u.operator.as_str();
        if !out.contains_key(op) {
            out.insert(op, Document::new());
        }
        let clause = out.get_document_mut(op)?;

        if u.operator == UpdateOperator::Push {
            // only the batch form spreads; a single array value is one element
            let items = match (&u.value, value) {
                (Value::Array(_), Bson::Array(vs)) => vs,
                (_, single) => vec![single],
            };
            if let Ok(existing) = clause.get_document_mut(&u.key)
                && let Ok(each) = existing.get_array_mut("$each")
            {
                each.extend(items);
            } else {
                clause.insert(u.key.clone(), doc! { "$each": items });
            }
        } else {
            clause.insert(u.key.clone(), value);
        }
    }
    Ok(out)
}

/// Upsert update: every entry becomes a `$set`, whatever its operator.
///
/// # Errors
/// `DbError::Translation` for range/filters payloads.
pub fn upsert_update(updates: &Updates, opts: &TranslateOptions) -> Result<Document, DbError> {
    let mut set = Document::new();
    for u in updates {
        if opts.is_strict() {
            check_type(&u.key, u.data_type, &u.value)?;
        }
        if u.operator != UpdateOperator::Set {
            log::debug!("upsert: `{}` {} applied as $set", u.key, u.operator);
        }
        set.insert(u.key.clone(), update_value(u)?);
    }
    Ok(doc! { "$set": set })
}

/// Sort specification in key order.
#[must_use]
pub fn sort_document(keys: &[SortKey]) -> Document {
    let mut d = Document::new();
    for k in keys {
        d.insert(k.key.clone(), i32::from(k.order));
    }
    d
}

#[must_use]
pub fn projection_document(projections: &[Projection]) -> Document {
    let mut d = Document::new();
    for p in projections {
        d.insert(p.key.clone(), p.value.clone());
    }
    d
}

/// `"$field"` stays a field reference; numeric strings become literals so
/// `$sum: 1` can count documents.
fn accumulator_operand(value: &str) -> Bson {
    if value.starts_with('$') {
        return Bson::String(value.to_string());
    }
    if let Ok(i) = value.parse::<i64>() {
        return Bson::Int64(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return Bson::Double(f);
    }
    Bson::String(value.to_string())
}

/// Two-stage `$match` → `$group` pipeline.
///
/// # Errors
/// Filter translation errors; unknown accumulators in strict mode.
pub fn aggregate_pipeline(
    filters: &Filters,
    group_keys: &GroupKeys,
    aggregate_keys: &AggregateKeys,
    opts: &TranslateOptions,
) -> Result<Vec<Document>, DbError> {
    let matcher = filters_to_document(filters, opts)?;

    let mut id = Document::new();
    for g in group_keys {
        id.insert(g.key.clone(), g.value.clone());
    }
    let mut group = Document::new();
    group.insert("_id", id);
    for a in aggregate_keys {
        match a.operator.native() {
            Some(acc) => {
                let mut d = Document::new();
                d.insert(acc, accumulator_operand(&a.value));
                group.insert(a.key.clone(), d);
            }
            None => {
                skip_or_fail(opts, format!("aggregate `{}`: unknown operator {:?}", a.key, a.operator))?;
            }
        }
    }
    Ok(vec![doc! { "$match": matcher }, doc! { "$group": group }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::{AggregateKey, AggregateOperator, GroupKey};

    fn lenient() -> TranslateOptions {
        TranslateOptions::default()
    }

    #[test]
    fn equality_in_and_ranges() {
        let fs = Filters::from(vec![
            Filter::eq("user_id", "U1"),
            Filter::is_in("team", vec!["a", "b"]),
            Filter::gte("age", 18),
            Filter::lt("score", 10),
            Filter::not_in("state", vec!["gone"]),
            Filter::all("tags", vec!["x", "y"]),
        ]);
        let d = filters_to_document(&fs, &lenient()).unwrap();
        assert_eq!(
            d,
            doc! {
                "user_id": "U1",
                "team": { "$in": ["a", "b"] },
                "age": { "$gte": 18 },
                "score": { "$lt": 10 },
                "state": { "$nin": ["gone"] },
                "tags": { "$all": ["x", "y"] },
            }
        );
    }

    #[test]
    fn same_key_last_write_wins() {
        let fs = Filters::from(vec![Filter::eq("k", 1), Filter::eq("k", 2)]);
        let d = filters_to_document(&fs, &lenient()).unwrap();
        assert_eq!(d, doc! { "k": 2 });
    }

    #[test]
    fn same_key_conjoin_uses_and() {
        let opts = TranslateOptions { duplicate_keys: DuplicateKeys::Conjoin, ..lenient() };
        let fs = Filters::from(vec![Filter::gte("k", 1), Filter::eq("x", 0), Filter::lte("k", 5)]);
        let d = filters_to_document(&fs, &opts).unwrap();
        assert_eq!(d, doc! { "x": 0, "$and": [ { "k": { "$gte": 1 } }, { "k": { "$lte": 5 } } ] });
    }

    #[test]
    fn between_is_a_closed_range() {
        let fs = Filters::from(vec![Filter::between("k", 1, 5)]);
        let d = filters_to_document(&fs, &lenient()).unwrap();
        assert_eq!(d, doc! { "k": { "$gte": 1, "$lte": 5 } });
    }

    #[test]
    fn between_without_range_is_translation_error() {
        let fs = Filters::from(vec![Filter::new("k", Value::Scalar(Bson::Int32(1)), DataType::Int, Operator::Between)]);
        let err = filters_to_document(&fs, &lenient()).unwrap_err();
        assert!(matches!(err, DbError::Translation(_)));
    }

    #[test]
    fn or_becomes_single_field_alternatives_in_order() {
        let sub = Filters::from(vec![Filter::eq("a", 1), Filter::gt("b", 2)]);
        let fs = Filters::from(vec![Filter::or(sub.clone()), Filter::eq("c", 3)]);
        let d = filters_to_document(&fs, &lenient()).unwrap();
        assert_eq!(d, doc! { "$or": [ { "a": 1 }, { "b": { "$gt": 2 } } ], "c": 3 });

        let inner = filters_to_document(&sub, &lenient()).unwrap();
        let alts = d.get_array("$or").unwrap();
        assert_eq!(alts.len(), inner.len());
    }

    #[test]
    fn or_with_scalar_payload_fails() {
        let fs = Filters::from(vec![Filter::new("$or", Value::Scalar(Bson::Int32(1)), DataType::Any, Operator::Or)]);
        assert!(matches!(filters_to_document(&fs, &lenient()), Err(DbError::Translation(_))));
    }

    #[test]
    fn unknown_operator_lenient_vs_strict() {
        let fs = Filters::from(vec![
            Filter::eq("a", 1),
            Filter::new("b", Value::Scalar(Bson::Int32(2)), DataType::Int, Operator::Unknown(99)),
        ]);
        assert_eq!(filters_to_document(&fs, &lenient()).unwrap(), doc! { "a": 1 });
        assert!(matches!(
            filters_to_document(&fs, &TranslateOptions::strict()),
            Err(DbError::Translation(_))
        ));
    }

    #[test]
    fn strict_checks_declared_type() {
        let fs = Filters::from(vec![Filter::new("a", Value::Scalar(Bson::Int32(1)), DataType::String, Operator::Equal)]);
        assert!(filters_to_document(&fs, &lenient()).is_ok());
        assert!(filters_to_document(&fs, &TranslateOptions::strict()).is_err());
    }

    #[test]
    fn in_with_scalar_is_wrapped() {
        let fs = Filters::from(vec![Filter::new("a", Value::Scalar(Bson::Int32(1)), DataType::Int, Operator::In)]);
        assert_eq!(filters_to_document(&fs, &lenient()).unwrap(), doc! { "a": { "$in": [1] } });
    }

    #[test]
    fn updates_grouped_by_operator() {
        let us = Updates::from(vec![
            Update::set("channel_id", "C1"),
            Update::set("team_domain", "acme"),
            Update::inc("visits", 1),
            Update::unset("legacy"),
        ]);
        let d = updates_to_document(&us, &lenient()).unwrap();
        assert_eq!(
            d,
            doc! {
                "$set": { "channel_id": "C1", "team_domain": "acme" },
                "$inc": { "visits": 1 },
                "$unset": { "legacy": "" },
            }
        );
    }

    #[test]
    fn push_entries_merge_into_each_in_order() {
        let us = Updates::from(vec![
            Update::push("schedule", doc! { "from": "09:00", "to": "10:00" }),
            Update::push_each("schedule", vec![doc! { "from": "12:00", "to": "13:00" }]),
            Update::push("address_ids", "A1"),
        ]);
        let d = updates_to_document(&us, &lenient()).unwrap();
        assert_eq!(
            d,
            doc! {
                "$push": {
                    "schedule": { "$each": [
                        { "from": "09:00", "to": "10:00" },
                        { "from": "12:00", "to": "13:00" },
                    ] },
                    "address_ids": { "$each": ["A1"] },
                }
            }
        );
    }

    #[test]
    fn push_of_an_array_appends_it_as_one_element() {
        let us = Updates::from(vec![Update::push("pairs", vec![1, 2]), Update::push_each("pairs", vec![3, 4])]);
        let d = updates_to_document(&us, &lenient()).unwrap();
        assert_eq!(d, doc! { "$push": { "pairs": { "$each": [[1, 2], 3, 4] } } });

        let mut target = doc! { "pairs": [] };
        crate::query::eval::apply_update(&mut target, &d).unwrap();
        assert_eq!(target, doc! { "pairs": [[1, 2], 3, 4] });
    }

    #[test]
    fn conjoin_keeps_callers_and_clause() {
        let opts = TranslateOptions { duplicate_keys: DuplicateKeys::Conjoin, ..lenient() };
        let caller = Filter::new(
            "$and",
            Value::Filters(Filters::from(vec![Filter::eq("a", 1)])),
            DataType::Any,
            Operator::Or,
        );
        let fs = Filters::from(vec![caller, Filter::eq("k", 1), Filter::eq("k", 2)]);
        let d = filters_to_document(&fs, &opts).unwrap();
        assert_eq!(d, doc! { "$and": [ { "a": 1 }, { "k": 1 }, { "k": 2 } ] });
    }

    #[test]
    fn nested_or_recurses() {
        let inner = Filters::from(vec![Filter::eq("b", 2), Filter::eq("c", 3)]);
        let fs = Filters::from(vec![Filter::or(Filters::from(vec![Filter::eq("a", 1), Filter::or(inner)]))]);
        let d = filters_to_document(&fs, &lenient()).unwrap();
        assert_eq!(d, doc! { "$or": [ { "a": 1 }, { "$or": [ { "b": 2 }, { "c": 3 } ] } ] });
    }

    #[test]
    fn upsert_restricts_operators_and_sets_everything() {
        let fs = Filters::from(vec![Filter::eq("user_id", "U1"), Filter::gt("age", 3)]);
        assert_eq!(upsert_filter(&fs, &lenient()).unwrap(), doc! { "user_id": "U1" });
        assert!(upsert_filter(&fs, &TranslateOptions::strict()).is_err());

        let us = Updates::from(vec![Update::set("a", 1), Update::push("b", 2)]);
        assert_eq!(upsert_update(&us, &lenient()).unwrap(), doc! { "$set": { "a": 1, "b": 2 } });
    }

    #[test]
    fn replace_accepts_only_eq_and_in() {
        let fs = Filters::from(vec![Filter::eq("a", 1), Filter::is_in("b", vec![1, 2]), Filter::lt("c", 0)]);
        assert_eq!(replace_filter(&fs, &lenient()).unwrap(), doc! { "a": 1, "b": { "$in": [1, 2] } });
    }

    #[test]
    fn sort_and_projection_keep_order() {
        let s = sort_document(&[SortKey::desc("created_at"), SortKey::asc("name")]);
        assert_eq!(s, doc! { "created_at": -1, "name": 1 });
        let p = projection_document(&[Projection::include("user_id"), Projection::exclude("_id")]);
        assert_eq!(p, doc! { "user_id": 1, "_id": 0 });
    }

    #[test]
    fn aggregate_pipeline_match_then_group() {
        let fs = Filters::from(vec![Filter::eq("status", "delivered")]);
        let gk = GroupKeys::from(vec![GroupKey::field("restaurant")]);
        let ak = AggregateKeys::from(vec![
            AggregateKey::new("orders", AggregateOperator::Sum, "1"),
            AggregateKey::new("first", AggregateOperator::Min, "$ts"),
            AggregateKey::new("last", AggregateOperator::Max, "$ts"),
        ]);
        let p = aggregate_pipeline(&fs, &gk, &ak, &lenient()).unwrap();
        assert_eq!(
            p,
            vec![
                doc! { "$match": { "status": "delivered" } },
                doc! { "$group": {
                    "_id": { "restaurant": "$restaurant" },
                    "orders": { "$sum": 1i64 },
                    "first": { "$min": "$ts" },
                    "last": { "$max": "$ts" },
                } },
            ]
        );
    }
}
