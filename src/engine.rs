//! Data Access Engine: the operation contracts callers use. Each call
//! translates Query Model values, runs one or two native calls raced against
//! the caller's `Context`, and maps the outcome onto `DbError`.

use bson::{Bson, Document};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::context::Context;
use crate::errors::DbError;
use crate::query::translate::{self, TranslateOptions};
use crate::query::{AggregateKeys, Cursor, Filters, GroupKeys, Projection, SortKey, Updates};
use crate::store::{BulkWriteReport, DeleteReport, FindOptions, InsertManyReport, NativeStore, UpdateReport, WriteModel};

const QUERY_TARGET: &str = "snacktrack::query";

/// Operation labels used to tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    GetOne,
    GetSorted,
    GetAggregate,
    Insert,
    InsertMany,
    Upsert,
    Replace,
    Count,
    GetCursor,
    BulkWrite,
    FindOneAndUpdate,
    Delete,
    DeleteMany,
    GetDistinct,
    Update,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "Get",
            Self::GetOne => "GetOne",
            Self::GetSorted => "GetSorted",
            Self::GetAggregate => "GetAggregate",
            Self::Insert => "Insert",
            Self::InsertMany => "InsertMany",
            Self::Upsert => "Upsert",
            Self::Replace => "Replace",
            Self::Count => "Count",
            Self::GetCursor => "GetCursor",
            Self::BulkWrite => "BulkWrite",
            Self::FindOneAndUpdate => "FindOneAndUpdate",
            Self::Delete => "Delete",
            Self::DeleteMany => "DeleteMany",
            Self::GetDistinct => "GetDistinct",
            Self::Update => "Update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a paginated read. `next` is the offset of the following page,
/// empty when there is none or pagination was disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub next: String,
}

#[derive(Debug, Clone)]
pub struct Engine {
    database: String,
    store: Arc<dyn NativeStore>,
    options: TranslateOptions,
    timeout: Option<Duration>,
}

fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, DbError> {
    Ok(bson::deserialize_from_document(doc)?)
}

fn encode<T: Serialize>(record: &T) -> Result<Document, DbError> {
    Ok(bson::serialize_to_document(record)?)
}

fn parse_offset(offset: &str) -> Result<u64, DbError> {
    if offset.is_empty() {
        return Ok(0);
    }
    offset.trim().parse::<u64>().map_err(|e| DbError::InvalidOffset(format!("{offset:?}: {e}")))
}

impl Engine {
    #[must_use]
    pub fn new(database: impl Into<String>, store: Arc<dyn NativeStore>) -> Self {
        Self { database: database.into(), store, options: TranslateOptions::default(), timeout: None }
    }

    /// Engine whose database name, translator policy and per-call deadline
    /// come from `config`.
    #[must_use]
    pub fn from_config(config: &Config, store: Arc<dyn NativeStore>) -> Self {
        Self {
            database: config.database.clone(),
            store,
            options: config.translate_options(),
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: TranslateOptions) -> Self {
        self.options = options;
        self
    }

    /// Applies `timeout` to every call on top of the caller's context.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub const fn options(&self) -> &TranslateOptions {
        &self.options
    }

    fn checked<T>(op: Operation, collection: &str, r: Result<T, DbError>) -> Result<T, DbError> {
        if let Err(e) = &r {
            log::warn!("{op} {collection}: {e}");
        }
        r
    }

    fn filter(&self, op: Operation, collection: &str, filters: &Filters) -> Result<Document, DbError> {
        let doc = Self::checked(op, collection, translate::filters_to_document(filters, &self.options))?;
        log::debug!(target: QUERY_TARGET, "{op} {collection} filter={doc}");
        Ok(doc)
    }

    fn updates(&self, op: Operation, collection: &str, updates: &Updates) -> Result<Document, DbError> {
        let doc = Self::checked(op, collection, translate::updates_to_document(updates, &self.options))?;
        log::debug!(target: QUERY_TARGET, "{op} {collection} update={doc}");
        Ok(doc)
    }

    /// Runs `fut` unless `ctx` is already done; if `ctx` finishes first the
    /// native call is dropped and the cancellation error returned.
    async fn run<T, F>(&self, op: Operation, collection: &str, ctx: &Context, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>> + Send,
    {
        let ctx = match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.clone(),
        };
        let res = match ctx.err() {
            Some(e) => Err(e),
            None => tokio::select! {
                biased;
                e = ctx.done() => Err(e),
                r = fut => r,
            },
        };
        match &res {
            Err(DbError::NotFound) => log::debug!("{op} {collection}: no document matched"),
            Err(e) if e.is_driver() => log::error!("{op} {collection}: {e}"),
            Err(e) => log::warn!("{op} {collection}: {e}"),
            Ok(_) => {}
        }
        res
    }

    pub async fn insert<T: Serialize>(&self, ctx: &Context, collection: &str, record: &T) -> Result<Bson, DbError> {
        let op = Operation::Insert;
        let doc = Self::checked(op, collection, encode(record))?;
        self.run(op, collection, ctx, self.store.insert_one(collection, doc)).await
    }

    /// Unordered batch insert: a rejected record is reported and the rest proceed.
    pub async fn insert_many<T: Serialize>(
        &self,
        ctx: &Context,
        collection: &str,
        records: &[T],
    ) -> Result<InsertManyReport, DbError> {
        let op = Operation::InsertMany;
        let docs = Self::checked(op, collection, records.iter().map(encode).collect::<Result<Vec<_>, _>>())?;
        let report = self.run(op, collection, ctx, self.store.insert_many(collection, docs, false)).await?;
        for f in &report.failures {
            log::error!("{op} {collection}: record {} rejected: {}", f.index, f.message);
        }
        Ok(report)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        offset: &str,
        limit: u64,
    ) -> Result<Page<T>, DbError> {
        self.paged(Operation::Get, ctx, collection, filters, None, offset, limit).await
    }

    /// Like `get`, with `sort` applied before skip/limit.
    pub async fn get_sorted<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        sort: &[SortKey],
        offset: &str,
        limit: u64,
    ) -> Result<Page<T>, DbError> {
        let sort = (!sort.is_empty()).then(|| translate::sort_document(sort));
        self.paged(Operation::GetSorted, ctx, collection, filters, sort, offset, limit).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn paged<T: DeserializeOwned>(
        &self,
        op: Operation,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        sort: Option<Document>,
        offset: &str,
        limit: u64,
    ) -> Result<Page<T>, DbError> {
        // limit 0 disables pagination; the offset is then ignored
        let skip = if limit == 0 { 0 } else { Self::checked(op, collection, parse_offset(offset))? };
        let filter = self.filter(op, collection, filters)?;
        let options = FindOptions {
            sort,
            skip: (limit != 0 && skip != 0).then_some(skip),
            limit: (limit != 0).then(|| i64::try_from(limit).unwrap_or(i64::MAX)),
            projection: None,
        };
        let store = &self.store;
        let work = async {
            let docs = store.find(collection, filter.clone(), options).await?;
            let next = if limit == 0 {
                String::new()
            } else {
                let total = store.count(collection, filter).await?;
                let end = skip.saturating_add(limit);
                if end < total { end.to_string() } else { String::new() }
            };
            Ok((docs, next))
        };
        let (docs, next) = self.run(op, collection, ctx, work).await?;
        let records = Self::checked(op, collection, docs.into_iter().map(decode).collect::<Result<Vec<T>, _>>())?;
        Ok(Page { records, next })
    }

    /// First match, or `DbError::NotFound`.
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        projection: &[Projection],
    ) -> Result<T, DbError> {
        let op = Operation::GetOne;
        let filter = self.filter(op, collection, filters)?;
        let projection = (!projection.is_empty()).then(|| translate::projection_document(projection));
        let work = async {
            self.store.find_one(collection, filter, projection).await?.ok_or(DbError::NotFound)
        };
        let doc = self.run(op, collection, ctx, work).await?;
        Self::checked(op, collection, decode(doc))
    }

    /// Applies `updates` to every matching document.
    pub async fn update(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        updates: &Updates,
    ) -> Result<UpdateReport, DbError> {
        let op = Operation::Update;
        let filter = self.filter(op, collection, filters)?;
        let update = self.updates(op, collection, updates)?;
        self.run(op, collection, ctx, self.store.update_many(collection, filter, update, false)).await
    }

    /// Updates the first match or inserts one document; every update is
    /// applied with `$set`.
    pub async fn upsert(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        updates: &Updates,
    ) -> Result<UpdateReport, DbError> {
        let op = Operation::Upsert;
        let filter = Self::checked(op, collection, translate::upsert_filter(filters, &self.options))?;
        let update = Self::checked(op, collection, translate::upsert_update(updates, &self.options))?;
        log::debug!(target: QUERY_TARGET, "{op} {collection} filter={filter} update={update}");
        self.run(op, collection, ctx, self.store.update_one(collection, filter, update, true)).await
    }

    pub async fn replace<T: Serialize>(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        record: &T,
    ) -> Result<UpdateReport, DbError> {
        let op = Operation::Replace;
        let filter = Self::checked(op, collection, translate::replace_filter(filters, &self.options))?;
        let replacement = Self::checked(op, collection, encode(record))?;
        log::debug!(target: QUERY_TARGET, "{op} {collection} filter={filter}");
        self.run(op, collection, ctx, self.store.replace_one(collection, filter, replacement, false)).await
    }

    /// Atomically updates the first match and returns it as updated, or
    /// `DbError::NotFound`.
    pub async fn find_one_and_update<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        updates: &Updates,
    ) -> Result<T, DbError> {
        let op = Operation::FindOneAndUpdate;
        let filter = self.filter(op, collection, filters)?;
        let update = self.updates(op, collection, updates)?;
        let work = async {
            self.store.find_one_and_update(collection, filter, update).await?.ok_or(DbError::NotFound)
        };
        let doc = self.run(op, collection, ctx, work).await?;
        Self::checked(op, collection, decode(doc))
    }

    pub async fn count(&self, ctx: &Context, collection: &str, filters: &Filters) -> Result<u64, DbError> {
        let op = Operation::Count;
        let filter = self.filter(op, collection, filters)?;
        self.run(op, collection, ctx, self.store.count(collection, filter)).await
    }

    /// Removes at most one match.
    pub async fn delete(&self, ctx: &Context, collection: &str, filters: &Filters) -> Result<DeleteReport, DbError> {
        let op = Operation::Delete;
        let filter = self.filter(op, collection, filters)?;
        self.run(op, collection, ctx, self.store.delete_one(collection, filter)).await
    }

    pub async fn delete_many(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
    ) -> Result<DeleteReport, DbError> {
        let op = Operation::DeleteMany;
        let filter = self.filter(op, collection, filters)?;
        self.run(op, collection, ctx, self.store.delete_many(collection, filter)).await
    }

    pub async fn distinct(
        &self,
        ctx: &Context,
        collection: &str,
        field: &str,
        filters: &Filters,
    ) -> Result<Vec<Bson>, DbError> {
        let op = Operation::GetDistinct;
        let filter = self.filter(op, collection, filters)?;
        self.run(op, collection, ctx, self.store.distinct(collection, field, filter)).await
    }

    /// `$match` on `filters`, then `$group` by `group` with `aggregates`.
    pub async fn get_aggregate(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        group: &GroupKeys,
        aggregates: &AggregateKeys,
    ) -> Result<Cursor, DbError> {
        let op = Operation::GetAggregate;
        let pipeline =
            Self::checked(op, collection, translate::aggregate_pipeline(filters, group, aggregates, &self.options))?;
        log::debug!(target: QUERY_TARGET, "{op} {collection} pipeline={pipeline:?}");
        let docs = self.run(op, collection, ctx, self.store.aggregate(collection, pipeline)).await?;
        Ok(Cursor::new(docs))
    }

    /// Unpaginated read of every match.
    pub async fn get_cursor(
        &self,
        ctx: &Context,
        collection: &str,
        filters: &Filters,
        sort: &[SortKey],
        projection: &[Projection],
    ) -> Result<Cursor, DbError> {
        let op = Operation::GetCursor;
        let filter = self.filter(op, collection, filters)?;
        let options = FindOptions {
            sort: (!sort.is_empty()).then(|| translate::sort_document(sort)),
            projection: (!projection.is_empty()).then(|| translate::projection_document(projection)),
            ..FindOptions::default()
        };
        let docs = self.run(op, collection, ctx, self.store.find(collection, filter, options)).await?;
        Ok(Cursor::new(docs))
    }

    /// Pass-through for batched native writes, executed in order.
    pub async fn bulk_write(
        &self,
        ctx: &Context,
        collection: &str,
        models: Vec<WriteModel>,
    ) -> Result<BulkWriteReport, DbError> {
        let op = Operation::BulkWrite;
        log::debug!(target: QUERY_TARGET, "{op} {collection} models={}", models.len());
        self.run(op, collection, ctx, self.store.bulk_write(collection, models)).await
    }
}
