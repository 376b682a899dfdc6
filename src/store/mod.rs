//! The native driver seam. The engine only ever talks to a `NativeStore`,
//! passing it documents already translated to MongoDB syntax.

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::errors::DbError;

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

/// Options for `find`. Sort is applied before skip/limit; projection last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}

/// One rejected record of an unordered batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyReport {
    pub inserted_ids: Vec<Bson>,
    pub failures: Vec<WriteFailure>,
}

impl InsertManyReport {
    #[must_use]
    pub fn inserted(&self) -> u64 {
        self.inserted_ids.len() as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteReport {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub deleted: u64,
}

impl BulkWriteReport {
    fn absorb_update(&mut self, r: UpdateReport) {
        self.matched += r.matched;
        self.modified += r.modified;
        self.upserted += r.upserted;
    }
}

/// A native write for `bulk_write`, already in MongoDB syntax.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document, upsert: bool },
    UpdateMany { filter: Document, update: Document, upsert: bool },
    ReplaceOne { filter: Document, replacement: Document, upsert: bool },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

impl WriteModel {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InsertOne { .. } => "insertOne",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::ReplaceOne { .. } => "replaceOne",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
        }
    }
}

#[async_trait]
pub trait NativeStore: Send + Sync + std::fmt::Debug {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DbError>;

    /// With `ordered == false` every record is attempted and failures are
    /// reported per index; ordered batches stop at the first failure.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertManyReport, DbError>;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, DbError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DbError>;

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DbError>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError>;

    /// Updates every match; with `upsert`, inserts one seeded document when nothing matches.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError>;

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError>;

    /// Atomic read-modify-write; returns the document after the update.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<Option<Document>, DbError>;

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError>;

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError>;

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>, DbError>;

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>, DbError>;

    /// Ordered: stops at the first failing model. One native call per model.
    async fn bulk_write(&self, collection: &str, models: Vec<WriteModel>) -> Result<BulkWriteReport, DbError> {
        let mut report = BulkWriteReport::default();
        for model in models {
            match model {
                WriteModel::InsertOne { document } => {
                    self.insert_one(collection, document).await?;
                    report.inserted += 1;
                }
                WriteModel::UpdateOne { filter, update, upsert } => {
                    report.absorb_update(self.update_one(collection, filter, update, upsert).await?);
                }
                WriteModel::UpdateMany { filter, update, upsert } => {
                    report.absorb_update(self.update_many(collection, filter, update, upsert).await?);
                }
                WriteModel::ReplaceOne { filter, replacement, upsert } => {
                    report.absorb_update(self.replace_one(collection, filter, replacement, upsert).await?);
                }
                WriteModel::DeleteOne { filter } => {
                    report.deleted += self.delete_one(collection, filter).await?.deleted;
                }
                WriteModel::DeleteMany { filter } => {
                    report.deleted += self.delete_many(collection, filter).await?.deleted;
                }
            }
        }
        Ok(report)
    }
}
