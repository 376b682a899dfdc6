#![allow(dead_code)]

use async_trait::async_trait;
use bson::{Bson, Document};
use fake::Fake;
use fake::faker::company::en::CompanyName;
use std::sync::Arc;
use std::time::Duration;

use snacktrack::errors::DbError;
use snacktrack::models::{Schedule, User};
use snacktrack::store::{
    DeleteReport, FindOptions, InsertManyReport, MemoryStore, NativeStore, UpdateReport,
};
use snacktrack::{Context, Engine};

pub const USERS: &str = "users";

pub fn engine() -> Engine {
    Engine::new("snack-track", Arc::new(MemoryStore::new()))
}

pub fn fake_user(i: usize) -> User {
    let team: String = CompanyName().fake();
    User {
        user_id: format!("U{i:04}"),
        channel_id: format!("C{i:04}"),
        team_domain: team,
        schedule: vec![Schedule { from: "09:00".into(), to: "17:00".into() }],
        address_ids: (0..(i % 3)).map(|a| format!("A{a}")).collect(),
    }
}

/// Inserts `n` fake users and returns them in insertion order.
pub async fn seed_users(engine: &Engine, n: usize) -> Vec<User> {
    let users: Vec<User> = (0..n).map(fake_user).collect();
    let report = engine.insert_many(&Context::background(), USERS, &users).await.unwrap();
    assert!(report.failures.is_empty());
    users
}

pub fn as_i64(v: &Bson) -> i64 {
    match v {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        Bson::Double(f) => *f as i64,
        other => panic!("not a number: {other}"),
    }
}

/// Delays every read by `delay` before delegating to a `MemoryStore`.
#[derive(Debug, Default)]
pub struct SlowStore {
    pub inner: MemoryStore,
    pub delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self { inner: MemoryStore::new(), delay }
    }
}

#[async_trait]
impl NativeStore for SlowStore {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson, DbError> {
        self.inner.insert_one(collection, document).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertManyReport, DbError> {
        self.inner.insert_many(collection, documents, ordered).await
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> Result<Vec<Document>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(collection, filter, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_one(collection, filter, projection).await
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<u64, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.count(collection, filter).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        self.inner.update_one(collection, filter, update, upsert).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        self.inner.update_many(collection, filter, update, upsert).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateReport, DbError> {
        self.inner.replace_one(collection, filter, replacement, upsert).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<Option<Document>, DbError> {
        self.inner.find_one_and_update(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteReport, DbError> {
        self.inner.delete_many(collection, filter).await
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>, DbError> {
        self.inner.distinct(collection, field, filter).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.aggregate(collection, pipeline).await
    }
}
