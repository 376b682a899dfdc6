//! In-process store with MongoDB semantics for the native documents the
//! translator produces. Backs the test suites and local runs without a server.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{DeleteReport, FindOptions, InsertManyReport, NativeStore, UpdateReport, WriteFailure};
use crate::errors::DbError;
use crate::query::eval;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

/// Puts `_id` first, generating an `ObjectId` when absent.
fn with_id(mut document: Document) -> (Bson, Document) {
    let id = document.remove("_id").unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
    let mut out = Document::new();
    out.insert("_id", id.clone());
    out.extend(document);
    (id, out)
}

fn check_unique(docs: &[Document], id: &Bson) -> Result<(), DbError> {
    if docs.iter().any(|d| d.get("_id").is_some_and(|x| eval::bson_eq(x, id))) {
        return Err(DbError::DuplicateKey(format!("_id: {id}")));
    }
    Ok(())
}

fn matching(docs: &[Document], filter: &Document) -> Result<Vec<usize>, DbError> {
    let mut out = Vec::new();
    for (i, d) in docs.iter().enumerate() {
        if eval::matches(d, filter)? {
            out.push(i);
        }
    }
    Ok(out)
}

fn first_match(docs: &[Document], filter: &Document) -> Result<Option<usize>, DbError> {
    for (i, d) in docs.iter().enumerate() {
        if eval::matches(d, filter)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Applies `update` to a copy and keeps `_id` immutable.
fn updated(current: &Document, update: &Document) -> Result<(Document, bool), DbError> {
    let mut next = current.clone();
    let changed = eval::apply_update(&mut next, update)?;
    if next.get("_id") != current.get("_id") {
        return Err(DbError::Driver(
            "performing an update on the path '_id' would modify the immutable field '_id'".into(),
        ));
    }
    Ok((next, changed))
}

fn check_replacement(replacement: &Document) -> Result<(), DbError> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(DbError::Driver("replacement document must not contain update operators".into()));
    }
    Ok(())
}

fn limit_docs(docs: Vec<Document>, skip: u64, limit: i64) -> Vec<Document> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let iter = docs.into_iter().skip(skip);
    match usize::try_from(limit.unsigned_abs()) {
        Ok(0) | Err(_) => iter.collect(),
        Ok(n) => iter.take(n).collect(),
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_locked(docs: &mut Vec<Document>, document: Document) -> Result<Bson, DbError> {
        let (id, document) = with_id(document);
        check_unique(docs, &id)?;
        docs.push(document);
        Ok(id)
    }

    fn upsert_locked(docs: &mut Vec<Document>, filter: &Document, update: &Document) -> Result<Document, DbError> {
        let mut seed = eval::upsert_seed(filter)?;
        eval::apply_update(&mut seed, update)?;
        let (id, seed) = with_id(seed);
        check_unique(docs, &id)?;
        docs.push(seed.clone());
        Ok(seed)
    }

    fn run_pipeline(docs: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>, DbError> {
        let mut current = docs;
        for stage in pipeline {
            let Some((name, body)) = stage.iter().next() else {
                return Err(DbError::Driver("pipeline stage must not be empty".into()));
            };
            current = match (name.as_str(), body) {
                ("$match", Bson::Document(filter)) => {
                    let mut kept = Vec::new();
                    for d in current {
                        if eval::matches(&d, filter)? {
                            kept.push(d);
                        }
                    }
                    kept
                }
                ("$group", Bson::Document(group)) => eval::group(&current, group)?,
                ("$sort", Bson::Document(sort)) => {
                    current.sort_by(|a, b| eval::compare_docs(a, b, sort));
                    current
                }
                ("$project", Bson::Document(projection)) => {
                    current.iter().map(|d| eval::project(d, projection)).collect::<Result<_, _>>()?
                }
                ("$skip", n) => limit_docs(current, eval::as_f64(n).map_or(0, |f| f as u64), 0),
                ("$limit", n) => limit_docs(current, 0, eval::as_f64(n).map_or(0, |f| f as i64)),
                (other, _) => {
                    return Err(DbError::Driver(format!("unrecognized pipeline stage name: '{other}'")));
                }
            };
        }
        Ok(current)
    }
}

#[async_trait]
impl NativeStore for MemoryStore {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DbError> {
        let mut map = self.collections.write();
        Self::insert_locked(map.entry(collection.to_string()).or_default(), document)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertManyReport, DbError> {
        let mut map = self.collections.write();
        let docs = map.entry(collection.to_string()).or_default();
        let mut report = InsertManyReport::default();
        for (index, document) in documents.into_iter().enumerate() {
            match Self::insert_locked(docs, document) {
                Ok(id) => report.inserted_ids.push(id),
                Err(e) => {
                    report.failures.push(WriteFailure { index, message: e.to_string() });
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let map = self.collections.read();
        let Some(docs) = map.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<Document> =
            matching(docs, &filter)?.into_iter().map(|i| docs[i].clone()).collect();
        drop(map);
        if let Some(sort) = &options.sort {
            hits.sort_by(|a, b| eval::compare_docs(a, b, sort));
        }
        let hits = limit_docs(hits, options.skip.unwrap_or(0), options.limit.unwrap_or(0));
        match &options.projection {
            Some(p) => hits.iter().map(|d| eval::project(d, p)).collect(),
            None => Ok(hits),
        }
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DbError> {
        let map = self.collections.read();
        let Some(docs) = map.get(collection) else {
            return Ok(None);
        };
        match first_match(docs, &filter)? {
            Some(i) => match &projection {
                Some(p) => eval::project(&docs[i], p).map(Some),
                None => Ok(Some(docs[i].clone())),
            },
            None => Ok(None),
        }
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DbError> {
        let map = self.collections.read();
        match map.get(collection) {
            Some(docs) => Ok(matching(docs, &filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        let mut map = self.collections.write();
        let docs = map.entry(collection.to_string()).or_default();
        match first_match(docs, &filter)? {
            Some(i) => {
                let (next, changed) = updated(&docs[i], &update)?;
                docs[i] = next;
                Ok(UpdateReport { matched: 1, modified: u64::from(changed), upserted: 0 })
            }
            None if upsert => {
                Self::upsert_locked(docs, &filter, &update)?;
                Ok(UpdateReport { matched: 0, modified: 0, upserted: 1 })
            }
            None => Ok(UpdateReport::default()),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        let mut map = self.collections.write();
        let docs = map.entry(collection.to_string()).or_default();
        let mut report = UpdateReport::default();
        for i in matching(docs, &filter)? {
            let (next, changed) = updated(&docs[i], &update)?;
            docs[i] = next;
            report.matched += 1;
            report.modified += u64::from(changed);
        }
        if report.matched == 0 && upsert {
            Self::upsert_locked(docs, &filter, &update)?;
            report.upserted = 1;
        }
        Ok(report)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        check_replacement(&replacement)?;
        let mut map = self.collections.write();
        let docs = map.entry(collection.to_string()).or_default();
        match first_match(docs, &filter)? {
            Some(i) => {
                let id = docs[i].get("_id").cloned().unwrap_or(Bson::Null);
                if replacement.get("_id").is_some_and(|r| !eval::bson_eq(r, &id)) {
                    return Err(DbError::Driver(
                        "the _id field cannot be changed by a replacement".into(),
                    ));
                }
                let mut body = replacement;
                body.insert("_id", id);
                let (_, next) = with_id(body);
                let changed = next != docs[i];
                docs[i] = next;
                Ok(UpdateReport { matched: 1, modified: u64::from(changed), upserted: 0 })
            }
            None if upsert => {
                let mut body = replacement;
                if !body.contains_key("_id")
                    && let Some(id) = eval::upsert_seed(&filter)?.get("_id")
                {
                    body.insert("_id", id.clone());
                }
                Self::insert_locked(docs, body)?;
                Ok(UpdateReport { matched: 0, modified: 0, upserted: 1 })
            }
            None => Ok(UpdateReport::default()),
        }
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<Option<Document>, DbError> {
        let mut map = self.collections.write();
        let Some(docs) = map.get_mut(collection) else {
            return Ok(None);
        };
        match first_match(docs, &filter)? {
            Some(i) => {
                let (next, _) = updated(&docs[i], &update)?;
                docs[i] = next.clone();
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        let mut map = self.collections.write();
        let Some(docs) = map.get_mut(collection) else {
            return Ok(DeleteReport::default());
        };
        match first_match(docs, &filter)? {
            Some(i) => {
                docs.remove(i);
                Ok(DeleteReport { deleted: 1 })
            }
            None => Ok(DeleteReport::default()),
        }
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        let mut map = self.collections.write();
        let Some(docs) = map.get_mut(collection) else {
            return Ok(DeleteReport::default());
        };
        let hits = matching(docs, &filter)?;
        let before = docs.len();
        let mut idx = 0;
        docs.retain(|_| {
            let keep = hits.binary_search(&idx).is_err();
            idx += 1;
            keep
        });
        Ok(DeleteReport { deleted: (before - docs.len()) as u64 })
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>, DbError> {
        let map = self.collections.read();
        let Some(docs) = map.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Bson> = Vec::new();
        for i in matching(docs, &filter)? {
            let found = eval::lookup(&docs[i], field)?;
            for v in found {
                let flattened: Vec<&Bson> = match v {
                    Bson::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for x in flattened {
                    if !out.iter().any(|seen| eval::bson_eq(seen, x)) {
                        out.push(x.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>, DbError> {
        let docs = self.collections.read().get(collection).cloned().unwrap_or_default();
        Self::run_pipeline(docs, &pipeline)
    }
}
