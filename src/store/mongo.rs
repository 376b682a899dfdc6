//! MongoDB driver adapter. The client is created once and shared; the driver
//! owns pooling and reconnection.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database};

use super::{DeleteReport, FindOptions, InsertManyReport, NativeStore, UpdateReport, WriteFailure};
use crate::errors::DbError;

/// `NativeStore` over the official driver.
///
/// `bulk_write` is the trait's ordered default: one round-trip per model,
/// not a single batched command, so it is not atomic across models.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

fn report(r: &mongodb::results::UpdateResult) -> UpdateReport {
    UpdateReport {
        matched: r.matched_count,
        modified: r.modified_count,
        upserted: u64::from(r.upserted_id.is_some()),
    }
}

async fn drain(mut cursor: mongodb::Cursor<Document>) -> Result<Vec<Document>, DbError> {
    let mut out = Vec::new();
    while cursor.advance().await? {
        out.push(cursor.deserialize_current()?);
    }
    Ok(out)
}

impl MongoStore {
    /// Connects and pings `database` so a bad URI fails at startup.
    ///
    /// # Errors
    /// Returns `DbError::Driver` when the server cannot be reached.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await?;
        log::info!("connected to MongoDB database {database}");
        Ok(Self { client, db })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

#[async_trait]
impl NativeStore for MongoStore {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DbError> {
        match self.coll(collection).insert_one(document).await {
            Ok(r) => Ok(r.inserted_id),
            Err(e) if matches!(e.kind.as_ref(), ErrorKind::Write(_)) && e.to_string().contains("E11000") => {
                Err(DbError::DuplicateKey(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertManyReport, DbError> {
        match self.coll(collection).insert_many(documents).ordered(ordered).await {
            Ok(r) => {
                let mut ids: Vec<(usize, Bson)> = r.inserted_ids.into_iter().collect();
                ids.sort_by_key(|(i, _)| *i);
                Ok(InsertManyReport { inserted_ids: ids.into_iter().map(|(_, id)| id).collect(), failures: Vec::new() })
            }
            Err(e) => match e.kind.as_ref() {
                ErrorKind::InsertMany(failure) => {
                    let mut ids: Vec<(usize, Bson)> =
                        failure.inserted_ids.iter().map(|(i, id)| (*i, id.clone())).collect();
                    ids.sort_by_key(|(i, _)| *i);
                    let failures = failure
                        .write_errors
                        .iter()
                        .flatten()
                        .map(|w| WriteFailure { index: w.index, message: w.message.clone() })
                        .collect();
                    Ok(InsertManyReport { inserted_ids: ids.into_iter().map(|(_, id)| id).collect(), failures })
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let mut action = self.coll(collection).find(filter);
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(skip) = options.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit);
        }
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }
        drain(action.await?).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DbError> {
        let mut action = self.coll(collection).find_one(filter);
        if let Some(p) = projection {
            action = action.projection(p);
        }
        Ok(action.await?)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DbError> {
        Ok(self.coll(collection).count_documents(filter).await?)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        let r = self.coll(collection).update_one(filter, update).upsert(upsert).await?;
        Ok(report(&r))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        let r = self.coll(collection).update_many(filter, update).upsert(upsert).await?;
        Ok(report(&r))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        let r = self.coll(collection).replace_one(filter, replacement).upsert(upsert).await?;
        Ok(report(&r))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<Option<Document>, DbError> {
        Ok(self
            .coll(collection)
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        let r = self.coll(collection).delete_one(filter).await?;
        Ok(DeleteReport { deleted: r.deleted_count })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        let r = self.coll(collection).delete_many(filter).await?;
        Ok(DeleteReport { deleted: r.deleted_count })
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>, DbError> {
        Ok(self.coll(collection).distinct(field, filter).await?)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>, DbError> {
        drain(self.coll(collection).aggregate(pipeline).await?).await
    }
}
