mod common;

use bson::{Bson, Document, doc};
use std::sync::Arc;
use std::time::Duration;

use common::{USERS, as_i64, engine, fake_user, seed_users};
use snacktrack::models::{Schedule, User};
use snacktrack::query::{
    AggregateKey, AggregateKeys, AggregateOperator, DataType, Filter, Filters, GroupKey, GroupKeys,
    Operator, Projection, SortKey, TranslateOptions, Update, Updates, Value,
};
use snacktrack::store::WriteModel;
use snacktrack::{Context, DbError, Engine, Page};

fn filters(items: Vec<Filter>) -> Filters {
    Filters::from(items)
}

fn updates(items: Vec<Update>) -> Updates {
    Updates::from(items)
}

async fn seed_numbers(engine: &Engine, n: i32) {
    let ctx = Context::background();
    for i in 0..n {
        engine.insert(&ctx, "items", &doc! { "n": i }).await.unwrap();
    }
}

#[tokio::test]
async fn get_paginates_and_reports_next_offset() {
    let engine = engine();
    let ctx = Context::background();
    seed_numbers(&engine, 10).await;

    let first: Page<Document> = engine.get(&ctx, "items", &Filters::new(), "", 4).await.unwrap();
    assert_eq!(first.records.len(), 4);
    assert_eq!(first.next, "4");

    let middle: Page<Document> = engine.get(&ctx, "items", &Filters::new(), &first.next, 4).await.unwrap();
    assert_eq!(middle.records.len(), 4);
    assert_eq!(middle.next, "8");

    let last: Page<Document> = engine.get(&ctx, "items", &Filters::new(), "8", 4).await.unwrap();
    assert_eq!(last.records.len(), 2);
    assert_eq!(last.next, "");
}

#[tokio::test]
async fn get_with_zero_limit_returns_everything_and_ignores_offset() {
    let engine = engine();
    let ctx = Context::background();
    seed_numbers(&engine, 10).await;

    let all: Page<Document> = engine.get(&ctx, "items", &Filters::new(), "not-a-number", 0).await.unwrap();
    assert_eq!(all.records.len(), 10);
    assert_eq!(all.next, "");

    let err = engine.get::<Document>(&ctx, "items", &Filters::new(), "x", 4).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidOffset(_)));
}

#[tokio::test]
async fn get_sorted_orders_before_skipping() {
    let engine = engine();
    let ctx = Context::background();
    seed_numbers(&engine, 10).await;

    let page: Page<Document> = engine
        .get_sorted(&ctx, "items", &filters(vec![Filter::gte("n", 2)]), &[SortKey::desc("n")], "1", 3)
        .await
        .unwrap();
    let ns: Vec<i32> = page.records.iter().map(|d| d.get_i32("n").unwrap()).collect();
    assert_eq!(ns, vec![8, 7, 6]);
    assert_eq!(page.next, "4");
}

#[tokio::test]
async fn nested_or_matches_either_branch() {
    let engine = engine();
    let ctx = Context::background();
    seed_numbers(&engine, 10).await;

    let inner = filters(vec![Filter::gte("n", 8), Filter::lt("n", 0)]);
    let outer = filters(vec![Filter::or(filters(vec![Filter::eq("n", 1), Filter::or(inner)]))]);
    let native = snacktrack::query::translate::filters_to_document(&outer, &TranslateOptions::default()).unwrap();
    assert_eq!(native, doc! { "$or": [ { "n": 1 }, { "$or": [ { "n": { "$gte": 8 } }, { "n": { "$lt": 0 } } ] } ] });

    assert_eq!(engine.count(&ctx, "items", &outer).await.unwrap(), 3);
    let page: Page<Document> = engine.get(&ctx, "items", &outer, "", 0).await.unwrap();
    let mut got: Vec<i64> = page.records.iter().map(|d| as_i64(d.get("n").unwrap())).collect();
    got.sort_unstable();
    assert_eq!(got, vec![1, 8, 9]);
}

#[tokio::test]
async fn get_one_round_trips_an_inserted_record() {
    let engine = engine();
    let ctx = Context::background();
    let user = fake_user(7);
    engine.insert(&ctx, USERS, &user).await.unwrap();

    let got: User = engine.get_one(&ctx, USERS, &User::key_filters(&user.user_id), &[]).await.unwrap();
    assert_eq!(got, user);
}

#[tokio::test]
async fn get_one_reports_not_found() {
    let engine = engine();
    let ctx = Context::background();
    seed_users(&engine, 3).await;

    let err = engine.get_one::<User>(&ctx, USERS, &User::key_filters("nobody"), &[]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn get_one_applies_projection() {
    let engine = engine();
    let ctx = Context::background();
    let users = seed_users(&engine, 2).await;

    let projection = [Projection::include("user_id"), Projection::include("team_domain"), Projection::exclude("_id")];
    let got: Document = engine.get_one(&ctx, USERS, &User::key_filters(&users[1].user_id), &projection).await.unwrap();
    assert_eq!(got, doc! { "user_id": users[1].user_id.clone(), "team_domain": users[1].team_domain.clone() });
}

#[tokio::test]
async fn update_touches_every_match() {
    let engine = engine();
    let ctx = Context::background();
    seed_users(&engine, 6).await;

    let report = engine
        .update(&ctx, USERS, &filters(vec![Filter::in_array("address_ids", "A0")]), &updates(vec![Update::set("channel_id", "C-shared")]))
        .await
        .unwrap();
    // users 1, 2, 4, 5 have at least one address
    assert_eq!(report.matched, 4);
    assert_eq!(report.modified, 4);
    let n = engine.count(&ctx, USERS, &filters(vec![Filter::eq("channel_id", "C-shared")])).await.unwrap();
    assert_eq!(n, 4);
}

#[tokio::test]
async fn upsert_creates_one_document_from_set_and_filter_equality() {
    let engine = engine();
    let ctx = Context::background();

    let key = filters(vec![Filter::eq("user_id", "U9"), Filter::is_in("channel_id", ["C1", "C2"])]);
    let changes = updates(vec![Update::set("team_domain", "acme"), Update::push("address_ids", "A1")]);
    let report = engine.upsert(&ctx, USERS, &key, &changes).await.unwrap();
    assert_eq!(report.upserted, 1);

    let got: Document = engine.get_one(&ctx, USERS, &User::key_filters("U9"), &[Projection::exclude("_id")]).await.unwrap();
    // push is applied as $set; $in contributes nothing to the seed
    assert_eq!(got, doc! { "user_id": "U9", "team_domain": "acme", "address_ids": "A1" });

    let again = engine
        .upsert(&ctx, USERS, &User::key_filters("U9"), &updates(vec![Update::set("team_domain", "globex")]))
        .await
        .unwrap();
    assert_eq!((again.matched, again.upserted), (1, 0));
    assert_eq!(engine.count(&ctx, USERS, &Filters::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_and_replace_reject_unsupported_operators_in_strict_mode() {
    let engine = engine().with_options(TranslateOptions::strict());
    let ctx = Context::background();
    let bad = filters(vec![Filter::gt("n", 1)]);

    let err = engine.upsert(&ctx, USERS, &bad, &updates(vec![Update::set("a", 1)])).await.unwrap_err();
    assert!(matches!(err, DbError::Translation(_)));

    let err = engine.replace(&ctx, USERS, &filters(vec![Filter::lte("n", 1)]), &doc! { "a": 1 }).await.unwrap_err();
    assert!(matches!(err, DbError::Translation(_)));
}

#[tokio::test]
async fn replace_swaps_the_whole_first_match() {
    let engine = engine();
    let ctx = Context::background();
    let users = seed_users(&engine, 3).await;

    let mut replacement = users[0].clone();
    replacement.team_domain = "replaced".into();
    replacement.schedule.clear();
    let report = engine.replace(&ctx, USERS, &User::key_filters(&users[0].user_id), &replacement).await.unwrap();
    assert_eq!(report.matched, 1);

    let got: User = engine.get_one(&ctx, USERS, &User::key_filters(&users[0].user_id), &[]).await.unwrap();
    assert_eq!(got, replacement);
}

#[tokio::test]
async fn find_one_and_update_returns_the_updated_record() {
    let engine = engine();
    let ctx = Context::background();
    let users = seed_users(&engine, 2).await;

    let evening = bson::serialize_to_bson(&Schedule::parse("18:00", "22:30").unwrap()).unwrap();
    let key = User::key_filters(&users[0].user_id);
    let got: User = engine
        .find_one_and_update(&ctx, USERS, &key, &updates(vec![Update::push_each("schedule", [evening])]))
        .await
        .unwrap();
    assert_eq!(got.schedule.len(), 2);
    assert_eq!(got.schedule[1], Schedule { from: "18:00".into(), to: "22:30".into() });

    let err = engine
        .find_one_and_update::<User>(&ctx, USERS, &User::key_filters("ghost"), &updates(vec![Update::set("x", 1)]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_removes_one_and_delete_many_removes_all() {
    let engine = engine();
    let ctx = Context::background();
    seed_users(&engine, 9).await;

    let with_address = filters(vec![Filter::in_array("address_ids", "A0")]);
    assert_eq!(engine.delete(&ctx, USERS, &with_address).await.unwrap().deleted, 1);
    assert_eq!(engine.delete_many(&ctx, USERS, &with_address).await.unwrap().deleted, 5);
    assert_eq!(engine.count(&ctx, USERS, &Filters::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn distinct_flattens_arrays() {
    let engine = engine();
    let ctx = Context::background();
    seed_users(&engine, 6).await;

    let mut ids = engine.distinct(&ctx, USERS, "address_ids", &Filters::new()).await.unwrap();
    ids.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    assert_eq!(ids, vec![Bson::from("A0"), Bson::from("A1")]);
}

#[tokio::test]
async fn get_aggregate_matches_then_groups() {
    let engine = engine();
    let ctx = Context::background();
    for (restaurant, amount, status) in [("Pizza Place", 12, "delivered"), ("Sushi Bar", 30, "delivered"), ("Pizza Place", 8, "delivered"), ("Pizza Place", 50, "cancelled")] {
        engine.insert(&ctx, "orders", &doc! { "restaurant": restaurant, "amount": amount, "status": status }).await.unwrap();
    }

    let group = GroupKeys::from(vec![GroupKey::field("restaurant")]);
    let aggregates = AggregateKeys::from(vec![
        AggregateKey::new("total", AggregateOperator::Sum, "$amount"),
        AggregateKey::new("orders", AggregateOperator::Sum, "1"),
        AggregateKey::new("smallest", AggregateOperator::Min, "$amount"),
        AggregateKey::new("largest", AggregateOperator::Max, "$amount"),
    ]);
    let cursor = engine
        .get_aggregate(&ctx, "orders", &filters(vec![Filter::eq("status", "delivered")]), &group, &aggregates)
        .await
        .unwrap();
    let rows = cursor.to_vec();
    assert_eq!(rows.len(), 2);

    let pizza = rows
        .iter()
        .find(|r| r.get_document("_id").unwrap().get_str("restaurant").unwrap() == "Pizza Place")
        .unwrap();
    assert_eq!(as_i64(pizza.get("total").unwrap()), 20);
    assert_eq!(as_i64(pizza.get("orders").unwrap()), 2);
    assert_eq!(as_i64(pizza.get("smallest").unwrap()), 8);
    assert_eq!(as_i64(pizza.get("largest").unwrap()), 12);
}

#[tokio::test]
async fn get_cursor_streams_sorted_projected_records() {
    let engine = engine();
    let ctx = Context::background();
    seed_numbers(&engine, 5).await;

    let mut cursor = engine
        .get_cursor(&ctx, "items", &filters(vec![Filter::lt("n", 3)]), &[SortKey::desc("n")], &[Projection::exclude("_id")])
        .await
        .unwrap();
    assert_eq!(cursor.advance(), Some(doc! { "n": 2 }));
    assert_eq!(cursor.collect::<Vec<_>>(), vec![doc! { "n": 1 }, doc! { "n": 0 }]);
}

#[tokio::test]
async fn insert_many_is_unordered() {
    let engine = engine();
    let ctx = Context::background();
    let docs = vec![doc! { "_id": "a" }, doc! { "_id": "a" }, doc! { "_id": "b" }];
    let report = engine.insert_many(&ctx, "items", &docs).await.unwrap();
    assert_eq!(report.inserted(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(engine.count(&ctx, "items", &Filters::new()).await.unwrap(), 2);
}

#[tokio::test]
async fn bulk_write_passes_native_models_through() {
    let engine = engine();
    let ctx = Context::background();
    let models = vec![
        WriteModel::InsertOne { document: doc! { "_id": 1, "n": 1 } },
        WriteModel::InsertOne { document: doc! { "_id": 2, "n": 2 } },
        WriteModel::UpdateMany { filter: doc! {}, update: doc! { "$inc": { "n": 10 } }, upsert: false },
        WriteModel::UpdateOne { filter: doc! { "_id": 3 }, update: doc! { "$set": { "n": 0 } }, upsert: true },
        WriteModel::DeleteOne { filter: doc! { "_id": 1 } },
    ];
    let report = engine.bulk_write(&ctx, "items", models).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.matched, 2);
    assert_eq!(report.upserted, 1);
    assert_eq!(report.deleted, 1);

    let page: Page<Document> = engine.get_sorted(&ctx, "items", &Filters::new(), &[SortKey::asc("_id")], "", 0).await.unwrap();
    assert_eq!(page.records, vec![doc! { "_id": 2, "n": 12 }, doc! { "_id": 3, "n": 0 }]);
}

#[tokio::test]
async fn ill_typed_payload_fails_translation_without_touching_the_store() {
    let engine = engine();
    let ctx = Context::background();
    let bad = filters(vec![Filter::new("n", Value::Scalar(Bson::Int32(3)), DataType::Int, Operator::Between)]);

    let err = engine.count(&ctx, "items", &bad).await.unwrap_err();
    assert!(matches!(err, DbError::Translation(_)));
}

#[tokio::test]
async fn unknown_operator_is_dropped_leniently_and_rejected_strictly() {
    let ctx = Context::background();
    let lenient = engine();
    seed_numbers(&lenient, 3).await;
    let unknown = filters(vec![Filter::new("n", Value::Scalar(Bson::Int32(1)), DataType::Int, Operator::Unknown(42))]);
    assert_eq!(lenient.count(&ctx, "items", &unknown).await.unwrap(), 3);

    let strict = lenient.clone().with_options(TranslateOptions::strict());
    assert!(matches!(strict.count(&ctx, "items", &unknown).await, Err(DbError::Translation(_))));
}

#[tokio::test]
async fn cancelled_context_aborts_before_the_native_call() {
    let engine = engine();
    let (ctx, handle) = Context::with_cancel();
    handle.cancel();

    let err = engine.insert(&ctx, "items", &doc! { "n": 1 }).await.unwrap_err();
    assert!(matches!(err, DbError::Cancelled));
    assert_eq!(engine.count(&Context::background(), "items", &Filters::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancellation_mid_call_wins_over_the_native_result() {
    let engine = Engine::new("snack-track", Arc::new(common::SlowStore::new(Duration::from_secs(30))));
    let (ctx, handle) = Context::with_cancel();
    let call = tokio::spawn({
        let engine = engine.clone();
        let ctx = ctx.clone();
        async move { engine.count(&ctx, "items", &Filters::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), call).await.unwrap().unwrap();
    assert!(matches!(res, Err(DbError::Cancelled)));
}

#[tokio::test]
async fn engine_timeout_expires_slow_calls() {
    let engine = Engine::new("snack-track", Arc::new(common::SlowStore::new(Duration::from_secs(30))))
        .with_timeout(Duration::from_millis(20));
    let err = engine.get::<Document>(&Context::background(), "items", &Filters::new(), "", 0).await.unwrap_err();
    assert!(matches!(err, DbError::DeadlineExceeded));
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn engine_exposes_its_database_name() {
    assert_eq!(engine().database(), "snack-track");
}
