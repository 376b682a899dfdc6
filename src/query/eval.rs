//! Evaluation of native MongoDB query, update, projection and group
//! documents against in-memory BSON. Covers the operator surface the
//! translator emits, with server semantics for arrays and missing fields.

use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::errors::DbError;

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 10_000;

fn driver(msg: impl Into<String>) -> DbError {
    DbError::Driver(msg.into())
}

fn split_path(path: &str) -> Result<Vec<&str>, DbError> {
    if path.is_empty() {
        return Err(driver("empty field path"));
    }
    let segs: Vec<&str> = path.split('.').collect();
    if segs.len() > MAX_PATH_DEPTH {
        return Err(driver(format!("field path too deep: {path}")));
    }
    Ok(segs)
}

fn values_at<'a>(v: &'a Bson, segs: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segs.split_first() else {
        out.push(v);
        return;
    };
    match v {
        Bson::Document(d) => {
            if let Some(child) = d.get(*head) {
                values_at(child, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(i) = head.parse::<usize>() {
                if let Some(child) = items.get(i) {
                    values_at(child, rest, out);
                }
            } else {
                for item in items {
                    if matches!(item, Bson::Document(_)) {
                        values_at(item, segs, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// All values a dotted path reaches, descending through arrays of documents.
pub(crate) fn lookup<'a>(doc: &'a Document, path: &str) -> Result<Vec<&'a Bson>, DbError> {
    let segs = split_path(path)?;
    let mut out = Vec::new();
    if let Some((head, rest)) = segs.split_first()
        && let Some(v) = doc.get(*head)
    {
        values_at(v, rest, &mut out);
    }
    Ok(out)
}

/// Candidates plus the elements of any array candidate.
pub(crate) fn expand<'a>(candidates: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(candidates.len());
    for c in candidates {
        out.push(*c);
        if let Bson::Array(items) = c {
            out.extend(items.iter());
        }
    }
    out
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn as_f64(x: &Bson) -> Option<f64> {
    match x {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with numeric widening (1 == 1i64 == 1.0).
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return as_f64(a) == as_f64(b);
    }
    a == b
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64(a).unwrap_or(f64::NAN).total_cmp(&as_f64(b).unwrap_or(f64::NAN));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Canonical type order used for sorting mixed types.
fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 255,
    }
}

/// Range comparisons only match within the same type bracket.
fn comparable(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}

fn is_operator_doc(d: &Document) -> bool {
    d.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn eq_candidates(candidates: &[&Bson], target: &Bson) -> bool {
    if candidates.is_empty() {
        return matches!(target, Bson::Null);
    }
    expand(candidates).iter().any(|v| bson_eq(v, target))
}

fn in_set(candidates: &[&Bson], set: &Bson, op: &str) -> Result<bool, DbError> {
    let Bson::Array(set) = set else {
        return Err(driver(format!("{op} needs an array")));
    };
    if set.len() > MAX_IN_SET {
        return Err(driver(format!("{op} set too large: {}", set.len())));
    }
    Ok(set.iter().any(|s| eq_candidates(candidates, s)))
}

fn range_match(candidates: &[&Bson], target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    expand(candidates)
        .iter()
        .any(|v| comparable(v, target) && accept(compare_bson(v, target)))
}

fn eval_ops(candidates: &[&Bson], ops: &Document) -> Result<bool, DbError> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_candidates(candidates, arg),
            "$ne" => !eq_candidates(candidates, arg),
            "$gt" => range_match(candidates, arg, |o| o == Ordering::Greater),
            "$gte" => range_match(candidates, arg, |o| o != Ordering::Less),
            "$lt" => range_match(candidates, arg, |o| o == Ordering::Less),
            "$lte" => range_match(candidates, arg, |o| o != Ordering::Greater),
            "$in" => in_set(candidates, arg, "$in")?,
            "$nin" => !in_set(candidates, arg, "$nin")?,
            "$all" => match arg {
                Bson::Array(required) => {
                    !required.is_empty() && required.iter().all(|r| eq_candidates(candidates, r))
                }
                _ => return Err(driver("$all needs an array")),
            },
            "$exists" => {
                let want = match arg {
                    Bson::Boolean(b) => *b,
                    other => as_f64(other).is_some_and(|f| f != 0.0),
                };
                candidates.is_empty() != want
            }
            "$not" => match arg {
                Bson::Document(inner) => !eval_ops(candidates, inner)?,
                _ => return Err(driver("$not needs a document")),
            },
            other => return Err(driver(format!("unknown operator: {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(arg: &'a Bson, op: &str) -> Result<Vec<&'a Document>, DbError> {
    let Bson::Array(items) = arg else {
        return Err(driver(format!("{op} must be an array")));
    };
    if items.is_empty() {
        return Err(driver(format!("{op} must be a nonempty array")));
    }
    items
        .iter()
        .map(|b| match b {
            Bson::Document(d) => Ok(d),
            _ => Err(driver(format!("{op} entries must be documents"))),
        })
        .collect()
}

/// Whether `doc` satisfies the native `filter`.
///
/// # Errors
/// Malformed filters fail the way the server rejects them.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, DbError> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$or" => {
                let mut any = false;
                for f in sub_filters(cond, "$or")? {
                    if matches(doc, f)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let mut all = true;
                for f in sub_filters(cond, "$and")? {
                    if !matches(doc, f)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$nor" => {
                let mut none = true;
                for f in sub_filters(cond, "$nor")? {
                    if matches(doc, f)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            k if k.starts_with('$') => return Err(driver(format!("unknown top level operator: {k}"))),
            path => {
                let candidates = lookup(doc, path)?;
                match cond {
                    Bson::Document(ops) if is_operator_doc(ops) => eval_ops(&candidates, ops)?,
                    literal => eq_candidates(&candidates, literal),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// First value at `path` without array fan-out; used for sort keys and `$group`.
fn first_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    lookup(doc, path).ok().and_then(|v| v.into_iter().next())
}

pub fn compare_docs(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, dir) in sort {
        let ord = match (first_value(a, field), first_value(b, field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            let descending = as_f64(dir).is_some_and(|d| d < 0.0);
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).is_none_or(|f| f != 0.0),
    }
}

/// Applies an inclusion or exclusion projection; `_id` is kept unless excluded.
///
/// # Errors
/// Mixed inclusion and exclusion (other than `_id`) is rejected.
pub fn project(doc: &Document, projection: &Document) -> Result<Document, DbError> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }
    let include_id = projection.get("_id").is_none_or(truthy);
    let fields: Vec<(&String, bool)> =
        projection.iter().filter(|(k, _)| k.as_str() != "_id").map(|(k, v)| (k, truthy(v))).collect();
    let inclusive = fields.first().map_or(include_id, |(_, inc)| *inc);
    if fields.iter().any(|(_, inc)| *inc != inclusive) {
        return Err(driver("cannot mix inclusion and exclusion in projection"));
    }

    if inclusive {
        let mut out = Document::new();
        if include_id && let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
        for (field, _) in fields {
            if let Some(v) = first_value(doc, field) {
                set_path(&mut out, field, v.clone())?;
            }
        }
        Ok(out)
    } else {
        let mut out = doc.clone();
        if !include_id {
            out.remove("_id");
        }
        for (field, _) in fields {
            unset_path(&mut out, field)?;
        }
        Ok(out)
    }
}

fn ensure_subdoc<'a>(root: &'a mut Document, key: &str) -> Result<&'a mut Document, DbError> {
    match root.get(key) {
        Some(Bson::Document(_)) => {}
        None => {
            root.insert(key.to_string(), Document::new());
        }
        Some(other) => {
            return Err(driver(format!("cannot create field in element {{{key}: {other}}}")));
        }
    }
    Ok(root.get_document_mut(key)?)
}

fn traverse_to_parent<'a>(root: &'a mut Document, path: &str) -> Result<(&'a mut Document, String), DbError> {
    let segs = split_path(path)?;
    let Some((last, parents)) = segs.split_last() else {
        return Err(driver("empty field path"));
    };
    let mut cur = root;
    for seg in parents {
        cur = ensure_subdoc(cur, seg)?;
    }
    Ok((cur, (*last).to_string()))
}

pub(crate) fn set_path(root: &mut Document, path: &str, value: Bson) -> Result<bool, DbError> {
    let (parent, last) = traverse_to_parent(root, path)?;
    let old = parent.insert(last, value.clone());
    Ok(old.as_ref() != Some(&value))
}

fn get_path_mut<'a>(root: &'a mut Document, path: &str) -> Result<Option<&'a mut Bson>, DbError> {
    let segs = split_path(path)?;
    let Some((last, parents)) = segs.split_last() else {
        return Ok(None);
    };
    let mut cur = root;
    for seg in parents {
        match cur.get_mut(*seg) {
            Some(Bson::Document(d)) => cur = d,
            _ => return Ok(None),
        }
    }
    Ok(cur.get_mut(*last))
}

fn unset_path(root: &mut Document, path: &str) -> Result<bool, DbError> {
    let segs = split_path(path)?;
    let Some((last, parents)) = segs.split_last() else {
        return Ok(false);
    };
    let mut cur = root;
    for seg in parents {
        match cur.get_mut(*seg) {
            Some(Bson::Document(d)) => cur = d,
            _ => return Ok(false),
        }
    }
    Ok(cur.remove(*last).is_some())
}

#[allow(clippy::cast_precision_loss)]
fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    Some(match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => {
            x.checked_add(*y).map_or_else(|| Bson::Int64(i64::from(*x) + i64::from(*y)), Bson::Int32)
        }
        (Bson::Int32(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Int32(x)) => {
            Bson::Int64(i64::from(*x).checked_add(*y)?)
        }
        (Bson::Int64(x), Bson::Int64(y)) => Bson::Int64(x.checked_add(*y)?),
        _ => Bson::Double(as_f64(a)? + as_f64(b)?),
    })
}

fn inc_path(root: &mut Document, path: &str, by: &Bson) -> Result<bool, DbError> {
    if !is_num(by) {
        return Err(driver(format!("cannot increment with non-numeric argument: {{{path}: {by}}}")));
    }
    let current = get_path_mut(root, path)?.map(|v| v.clone());
    let next = match current {
        None => by.clone(),
        Some(cur) if is_num(&cur) => {
            add_numbers(&cur, by).ok_or_else(|| driver(format!("integer overflow incrementing {path}")))?
        }
        Some(cur) => {
            return Err(driver(format!("cannot apply $inc to a value of non-numeric type: {cur}")));
        }
    };
    set_path(root, path, next)
}

fn push_path(root: &mut Document, path: &str, arg: &Bson) -> Result<bool, DbError> {
    let items = match arg {
        Bson::Document(d) if d.contains_key("$each") => match d.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => return Err(driver("$each must be an array")),
        },
        single => vec![single.clone()],
    };
    match get_path_mut(root, path)? {
        Some(Bson::Array(existing)) => {
            existing.extend(items.iter().cloned());
            Ok(!items.is_empty())
        }
        Some(other) => Err(driver(format!("the field '{path}' must be an array but is {other}"))),
        None => set_path(root, path, Bson::Array(items)),
    }
}

fn pull_path(root: &mut Document, path: &str, cond: &Bson) -> Result<bool, DbError> {
    let Some(Bson::Array(existing)) = get_path_mut(root, path)? else {
        return Ok(false);
    };
    let before = existing.len();
    let mut kept = Vec::with_capacity(before);
    for item in existing.drain(..) {
        let remove = match cond {
            Bson::Document(ops) if is_operator_doc(ops) => eval_ops(&[&item], ops)?,
            Bson::Document(sub) => match &item {
                Bson::Document(d) => matches(d, sub)?,
                _ => false,
            },
            literal => bson_eq(&item, literal),
        };
        if !remove {
            kept.push(item);
        }
    }
    *existing = kept;
    Ok(existing.len() != before)
}

/// Applies a native update document. Returns whether the document changed.
///
/// # Errors
/// Unknown update operators and type conflicts fail like the server does; the
/// document may be partially modified, so callers apply to a copy.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, DbError> {
    if update.is_empty() {
        return Err(driver("update document must not be empty"));
    }
    let mut changed = false;
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(driver(format!("modifier {op} expects a document")));
        };
        for (path, arg) in fields {
            let c = match op.as_str() {
                "$set" => set_path(doc, path, arg.clone())?,
                "$unset" => unset_path(doc, path)?,
                "$inc" => inc_path(doc, path, arg)?,
                "$push" => push_path(doc, path, arg)?,
                "$pull" => pull_path(doc, path, arg)?,
                other if other.starts_with('$') => return Err(driver(format!("unknown modifier: {other}"))),
                _ => return Err(driver("update document requires atomic operators")),
            };
            changed |= c;
        }
    }
    Ok(changed)
}

/// Document an upsert inserts before applying its update: the filter's
/// top-level equality fields.
///
/// # Errors
/// Fails only on malformed field paths.
pub fn upsert_seed(filter: &Document) -> Result<Document, DbError> {
    let mut seed = Document::new();
    for (key, cond) in filter {
        if key.starts_with('$') {
            continue;
        }
        match cond {
            Bson::Document(ops) if is_operator_doc(ops) => {
                if let Some(v) = ops.get("$eq") {
                    set_path(&mut seed, key, v.clone())?;
                }
            }
            literal => {
                set_path(&mut seed, key, literal.clone())?;
            }
        }
    }
    Ok(seed)
}

fn eval_expr(doc: &Document, expr: &Bson) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            first_value(doc, &s[1..]).cloned().unwrap_or(Bson::Null)
        }
        Bson::Document(d) => {
            let mut out = Document::new();
            for (k, v) in d {
                out.insert(k.clone(), eval_expr(doc, v));
            }
            Bson::Document(out)
        }
        literal => literal.clone(),
    }
}

enum Acc {
    Sum { int: i64, float: f64, all_int32: bool, all_int: bool },
    Min(Option<Bson>),
    Max(Option<Bson>),
}

impl Acc {
    fn feed(&mut self, v: &Bson) {
        if !matches!(self, Self::Sum { .. }) && matches!(v, Bson::Null | Bson::Undefined) {
            return;
        }
        match self {
            Self::Sum { int, float, all_int32, all_int } => match v {
                Bson::Int32(i) => {
                    *int = int.saturating_add(i64::from(*i));
                    *float += f64::from(*i);
                }
                Bson::Int64(i) => {
                    *all_int32 = false;
                    *int = int.saturating_add(*i);
                    *float += as_f64(v).unwrap_or(0.0);
                }
                other if is_num(other) => {
                    *all_int32 = false;
                    *all_int = false;
                    *float += as_f64(other).unwrap_or(0.0);
                }
                _ => {}
            },
            Self::Min(cur) => {
                if cur.as_ref().is_none_or(|c| compare_bson(v, c) == Ordering::Less) {
                    *cur = Some(v.clone());
                }
            }
            Self::Max(cur) => {
                if cur.as_ref().is_none_or(|c| compare_bson(v, c) == Ordering::Greater) {
                    *cur = Some(v.clone());
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Self::Sum { int, float, all_int32, all_int } => {
                if all_int32 && let Ok(small) = i32::try_from(int) {
                    Bson::Int32(small)
                } else if all_int {
                    Bson::Int64(int)
                } else {
                    Bson::Double(float)
                }
            }
            Self::Min(v) | Self::Max(v) => v.unwrap_or(Bson::Null),
        }
    }
}

/// Evaluates a `$group` stage over `docs`. Groups come out in first-seen order.
///
/// # Errors
/// Missing `_id` or unsupported accumulators.
pub fn group(docs: &[Document], stage: &Document) -> Result<Vec<Document>, DbError> {
    let id_expr = stage.get("_id").ok_or_else(|| driver("a $group stage must include an _id"))?;
    let mut accs: Vec<(&str, &str, &Bson)> = Vec::new();
    for (field, acc) in stage {
        if field == "_id" {
            continue;
        }
        let Bson::Document(acc) = acc else {
            return Err(driver(format!("the field '{field}' must be an accumulator object")));
        };
        let Some((name, operand)) = acc.iter().next() else {
            return Err(driver(format!("the field '{field}' must specify one accumulator")));
        };
        if !matches!(name.as_str(), "$sum" | "$min" | "$max") {
            return Err(driver(format!("unknown group operator '{name}'")));
        }
        accs.push((field.as_str(), name.as_str(), operand));
    }

    let mut groups: Vec<(Bson, Vec<Acc>)> = Vec::new();
    for doc in docs {
        let key = eval_expr(doc, id_expr);
        let idx = match groups.iter().position(|(k, _)| *k == key) {
            Some(i) => i,
            None => {
                let fresh = accs
                    .iter()
                    .map(|(_, name, _)| match *name {
                        "$sum" => Acc::Sum { int: 0, float: 0.0, all_int32: true, all_int: true },
                        "$min" => Acc::Min(None),
                        _ => Acc::Max(None),
                    })
                    .collect();
                groups.push((key, fresh));
                groups.len() - 1
            }
        };
        let (_, state) = &mut groups[idx];
        for ((_, _, operand), acc) in accs.iter().zip(state.iter_mut()) {
            acc.feed(&eval_expr(doc, operand));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, state)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for ((field, _, _), acc) in accs.iter().zip(state) {
                out.insert(*field, acc.finish());
            }
            out
        })
        .collect())
}
