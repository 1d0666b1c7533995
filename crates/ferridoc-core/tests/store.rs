//! Integration tests for ferridoc-core: open a store on disk, drive it through
//! collection handles, verify persisted state.

use std::time::Duration;

use serde_json::{Value, json};
use tempfile::tempdir;

use ferridoc_core::{
    CollectionSchema, ColumnType, Error, FieldDef, QueryError, SchemaRegistry, SortDirection, Store,
    StoreConfig,
};

fn open_test_store() -> (tempfile::TempDir, Store) {
    let dir = tempdir().unwrap();
    let store = Store::open(StoreConfig::file(dir.path().join("test.sqlite"))).unwrap();
    (dir, store)
}

#[tokio::test]
async fn test_insert_then_find_one_returns_superset_with_defaults() {
    let (_dir, store) = open_test_store();
    let logs = store.collection("admin_logs");

    let result = logs
        .insert_one(json!({"chat_id": -100, "n": 3, "tags": ["x"]}))
        .await
        .unwrap();
    assert_eq!(result.inserted_id, json!(-100));

    let doc = logs.find_one(&json!({"chat_id": -100})).await.unwrap().unwrap();
    assert_eq!(doc["chat_id"], -100);
    assert_eq!(doc["n"], 3);
    assert_eq!(doc["tags"], json!(["x"]));
    // Declared fields absent from the insert come back with their defaults.
    assert_eq!(doc["enabled"], false);
    assert_eq!(doc["updated_at"], Value::Null);
    // The bucket column itself is never visible.
    assert!(!doc.contains_key("data"));
}

#[tokio::test]
async fn test_find_one_miss_returns_none() {
    let (_dir, store) = open_test_store();
    let users = store.collection("users");
    users.insert_one(json!({"user_id": 1})).await.unwrap();
    assert!(users.find_one(&json!({"user_id": 2})).await.unwrap().is_none());
}

#[tokio::test]
async fn test_inc_upsert_twice() {
    let (_dir, store) = open_test_store();
    let counters = store.collection("counters");
    let filter = json!({"name": "hits"});
    let update = json!({"$inc": {"n": 1}});

    let first = counters.update_one(&filter, &update, true).await.unwrap();
    assert_eq!(first.matched_count, 0);
    assert!(first.upserted_id.is_some());

    let second = counters.update_one(&filter, &update, true).await.unwrap();
    assert_eq!(second.matched_count, 1);
    assert_eq!(second.modified_count, 1);
    assert!(second.upserted_id.is_none());

    let doc = counters.find_one(&filter).await.unwrap().unwrap();
    assert_eq!(doc["n"], 2);
    assert_eq!(counters.count_documents(&Value::Null).await.unwrap(), 1);
}

#[tokio::test]
async fn test_push_each_then_pull() {
    let (_dir, store) = open_test_store();
    let lists = store.collection("lists");
    lists.insert_one(json!({"k": 1})).await.unwrap();

    lists
        .update_one(
            &json!({"k": 1}),
            &json!({"$push": {"l": {"$each": ["a", "b", "a"]}}}),
            false,
        )
        .await
        .unwrap();
    let doc = lists.find_one(&json!({"k": 1})).await.unwrap().unwrap();
    assert_eq!(doc["l"], json!(["a", "b", "a"]));

    lists
        .update_one(&json!({"k": 1}), &json!({"$pull": {"l": "a"}}), false)
        .await
        .unwrap();
    let doc = lists.find_one(&json!({"k": 1})).await.unwrap().unwrap();
    assert_eq!(doc["l"], json!(["b"]));
}

#[tokio::test]
async fn test_add_to_set_each_skips_duplicates() {
    let (_dir, store) = open_test_store();
    let blocklist = store.collection("blocklist");
    blocklist
        .insert_one(json!({"chat_id": 7, "words": ["spam"]}))
        .await
        .unwrap();

    blocklist
        .update_one(
            &json!({"chat_id": 7}),
            &json!({"$addToSet": {"words": {"$each": ["spam", "scam"]}}}),
            false,
        )
        .await
        .unwrap();
    let doc = blocklist.find_one(&json!({"chat_id": 7})).await.unwrap().unwrap();
    assert_eq!(doc["words"], json!(["spam", "scam"]));
}

#[tokio::test]
async fn test_unset_removes_key() {
    let (_dir, store) = open_test_store();
    let afk = store.collection("afk");
    afk.insert_one(json!({"user_id": 5, "reason": "lunch"}))
        .await
        .unwrap();
    afk.update_one(&json!({"user_id": 5}), &json!({"$unset": {"reason": ""}}), false)
        .await
        .unwrap();
    let doc = afk.find_one(&json!({"user_id": 5})).await.unwrap().unwrap();
    assert!(!doc.contains_key("reason"));
    assert_eq!(doc["user_id"], 5);
}

#[tokio::test]
async fn test_upsert_seeds_equality_clauses_only() {
    let (_dir, store) = open_test_store();
    let karma = store.collection("karma");
    karma
        .update_one(
            &json!({"chat_id": 1, "user_id": 2, "score": {"$gt": 10}}),
            &json!({"$set": {"score": 0}}),
            true,
        )
        .await
        .unwrap();

    let doc = karma.find_one(&json!({"chat_id": 1})).await.unwrap().unwrap();
    assert_eq!(doc["chat_id"], 1);
    assert_eq!(doc["user_id"], 2);
    assert_eq!(doc["score"], 0);
}

#[tokio::test]
async fn test_or_over_modes() {
    let (_dir, store) = open_test_store();
    let filters = store.collection("filters");
    filters
        .insert_many(vec![
            json!({"name": "a", "mode": "warn"}),
            json!({"name": "b", "mode": "ban"}),
            json!({"name": "c", "mode": "delete"}),
        ])
        .await
        .unwrap();

    let found: Vec<String> = filters
        .find(&json!({"$or": [{"mode": "warn"}, {"mode": "ban"}]}))
        .await
        .unwrap()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(found, vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inc_upserts_serialize() {
    let (_dir, store) = open_test_store();
    let filter = json!({"name": "race"});
    let update = json!({"$inc": {"n": 1}});

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..50 {
        let counters = store.collection("counters");
        let filter = filter.clone();
        let update = update.clone();
        tasks.spawn(async move { counters.update_one(&filter, &update, true).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let counters = store.collection("counters");
    assert_eq!(counters.count_documents(&filter).await.unwrap(), 1);
    let doc = counters.find_one(&filter).await.unwrap().unwrap();
    assert_eq!(doc["n"], 50);
}

#[tokio::test]
async fn test_generic_collections_are_isolated() {
    let (_dir, store) = open_test_store();
    let a = store.collection("notes_a");
    let b = store.collection("notes_b");
    a.insert_one(json!({"k": 1})).await.unwrap();
    b.insert_one(json!({"k": 1})).await.unwrap();
    b.insert_one(json!({"k": 2})).await.unwrap();

    assert_eq!(a.count_documents(&Value::Null).await.unwrap(), 1);
    assert_eq!(b.count_documents(&Value::Null).await.unwrap(), 2);

    a.delete_many(&json!({"k": 1})).await.unwrap();
    assert_eq!(b.count_documents(&json!({"k": 1})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_one_miss_is_noop() {
    let (_dir, store) = open_test_store();
    let rules = store.collection("rules");
    rules.insert_one(json!({"chat_id": 1, "rules": "x"})).await.unwrap();

    let result = rules.delete_one(&json!({"chat_id": 2})).await.unwrap();
    assert_eq!(result.deleted_count, 0);
    assert_eq!(rules.count_documents(&Value::Null).await.unwrap(), 1);

    let result = rules.delete_one(&json!({"chat_id": 1})).await.unwrap();
    assert_eq!(result.deleted_count, 1);
    assert_eq!(rules.count_documents(&Value::Null).await.unwrap(), 0);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("persist.sqlite");
    {
        let store = Store::open(StoreConfig::file(&path)).unwrap();
        store
            .collection("settings")
            .insert_one(json!({"key": "lang", "value": {"default": "en"}, "note": "x"}))
            .await
            .unwrap();
        store
            .collection("karma")
            .insert_one(json!({"user": 1, "score": 5}))
            .await
            .unwrap();
    }

    let store = Store::open(StoreConfig::file(&path)).unwrap();
    let setting = store
        .collection("settings")
        .find_one(&json!({"key": "lang"}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(setting["value"], json!({"default": "en"}));
    assert_eq!(setting["note"], "x");
    assert_eq!(setting["id"], 1);

    let names = store.list_collections().await.unwrap();
    assert!(names.contains(&"karma".to_string()));
    let karma = store.collection("karma").find_one(&json!({})).await.unwrap().unwrap();
    assert_eq!(karma["score"], 5);
}

#[tokio::test]
async fn test_filter_operators_end_to_end() {
    let (_dir, store) = open_test_store();
    let users = store.collection("users");
    users
        .insert_many(vec![
            json!({"user_id": 1, "name": "Alice", "age": 30}),
            json!({"user_id": 2, "name": "bob", "age": 17}),
            json!({"user_id": 3, "name": "Carol"}),
        ])
        .await
        .unwrap();

    let count = |filter: Value| {
        let users = users.clone();
        async move { users.count_documents(&filter).await.unwrap() }
    };
    assert_eq!(count(json!({"age": {"$gte": 18}})).await, 1);
    assert_eq!(count(json!({"age": {"$exists": false}})).await, 1);
    assert_eq!(count(json!({"user_id": {"$in": [1, 3, 9]}})).await, 2);
    assert_eq!(
        count(json!({"name": {"$regex": "^b", "$options": "i"}})).await,
        1
    );
    assert_eq!(count(json!({"name": {"$regex": "^B"}})).await, 0);
}

#[tokio::test]
async fn test_find_sort_skip_limit() {
    let (_dir, store) = open_test_store();
    let scores = store.collection("scores");
    for (name, score) in [("a", 5), ("b", 9), ("c", 1), ("d", 7)] {
        scores
            .insert_one(json!({"name": name, "score": score}))
            .await
            .unwrap();
    }

    let top: Vec<Value> = scores
        .find(&json!({}))
        .await
        .unwrap()
        .sort("score", SortDirection::Descending)
        .skip(1)
        .limit(2)
        .map(|d| d["name"].clone())
        .collect();
    assert_eq!(top, vec![json!("d"), json!("a")]);
}

#[tokio::test]
async fn test_bucket_key_shadows_column() {
    let (_dir, store) = open_test_store();
    let logs = store.collection("admin_logs");
    logs.insert_one(json!({"chat_id": 1, "enabled": false, "data": {"enabled": "shadow"}}))
        .await
        .unwrap();
    let doc = logs.find_one(&json!({"chat_id": 1})).await.unwrap().unwrap();
    assert_eq!(doc["enabled"], "shadow");
}

#[tokio::test]
async fn test_update_writes_shadowing_value_into_column() {
    let (_dir, store) = open_test_store();
    let logs = store.collection("admin_logs");
    logs.insert_one(json!({"chat_id": 1, "enabled": false, "data": {"enabled": "shadow"}}))
        .await
        .unwrap();
    logs.update_one(&json!({"chat_id": 1}), &json!({"$set": {"n": 1}}), false)
        .await
        .unwrap();

    // The merged view was persisted: the column now holds the bucket's value
    // and the original `false` is gone.
    let doc = logs.find_one(&json!({"chat_id": 1})).await.unwrap().unwrap();
    assert_eq!(doc["enabled"], "shadow");
    logs.update_one(&json!({"chat_id": 1}), &json!({"$unset": {"enabled": ""}}), false)
        .await
        .unwrap();
    let doc = logs.find_one(&json!({"chat_id": 1})).await.unwrap().unwrap();
    assert_eq!(doc["enabled"], false);
}

#[tokio::test]
async fn test_first_class_values_keep_their_type() {
    let (_dir, store) = open_test_store();

    let logs = store.collection("admin_logs");
    logs.insert_one(json!({"chat_id": 1, "enabled": 5, "updated_at": {"t": 5}}))
        .await
        .unwrap();
    let doc = logs
        .find_one(&json!({"enabled": 5, "updated_at": {"t": 5}}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["enabled"], 5);
    assert_eq!(doc["updated_at"], json!({"t": 5}));

    let rules = store.collection("rules");
    rules.insert_one(json!({"chat_id": 2, "rules": 42})).await.unwrap();
    let doc = rules.find_one(&json!({"rules": 42})).await.unwrap().unwrap();
    assert_eq!(doc["rules"], 42);

    let bans = store.collection("bans");
    bans.insert_one(json!({"user_id": "123"})).await.unwrap();
    let doc = bans.find_one(&json!({"user_id": "123"})).await.unwrap().unwrap();
    assert_eq!(doc["user_id"], "123");
    assert!(bans.find_one(&json!({"user_id": 123})).await.unwrap().is_none());

    let settings = store.collection("settings");
    settings
        .insert_one(json!({"key": "motd", "value": "plain text"}))
        .await
        .unwrap();
    let doc = settings.find_one(&json!({"key": "motd"})).await.unwrap().unwrap();
    assert_eq!(doc["value"], "plain text");
}

#[tokio::test]
async fn test_real_column_keeps_integers_and_strings() {
    let dir = tempdir().unwrap();
    let prices = CollectionSchema::builder("prices")
        .natural_key("sku", ColumnType::Text)
        .field(FieldDef::new("amount", ColumnType::Real))
        .build()
        .unwrap();
    let registry = SchemaRegistry::empty().with(prices).unwrap();
    let store =
        Store::open_with_registry(StoreConfig::file(dir.path().join("prices.sqlite")), registry)
            .unwrap();
    let prices = store.collection("prices");
    prices
        .insert_many(vec![
            json!({"sku": "a", "amount": 3}),
            json!({"sku": "b", "amount": 2.5}),
            json!({"sku": "c", "amount": "free"}),
        ])
        .await
        .unwrap();

    let amounts: Vec<Value> = prices
        .find(&json!({}))
        .await
        .unwrap()
        .map(|d| d["amount"].clone())
        .collect();
    assert_eq!(amounts, vec![json!(3), json!(2.5), json!("free")]);
    assert!(amounts[0].is_i64());
}

#[tokio::test]
async fn test_generic_collection_accepts_any_id() {
    let (_dir, store) = open_test_store();
    let notes = store.collection("notes");

    let named = notes.insert_one(json!({"_id": "abc", "v": 1})).await.unwrap();
    assert_eq!(named.inserted_id, "abc");
    let auto = notes.insert_one(json!({"v": 2})).await.unwrap();
    assert!(auto.inserted_id.is_i64());

    let doc = notes.find_one(&json!({"_id": "abc"})).await.unwrap().unwrap();
    assert_eq!(doc["v"], 1);
    let doc = notes
        .find_one(&json!({"_id": auto.inserted_id.clone()}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["v"], 2);

    // The assigned id stays stable across updates.
    notes
        .update_one(&json!({"v": 2}), &json!({"$set": {"v": 3}}), false)
        .await
        .unwrap();
    let doc = notes.find_one(&json!({"v": 3})).await.unwrap().unwrap();
    assert_eq!(doc["_id"], auto.inserted_id);
}

#[tokio::test]
async fn test_cancelled_calls_leave_in_memory_store_intact() {
    let store = Store::open_in_memory().unwrap();
    let users = store.collection("users");
    let docs: Vec<Value> = (0..20_000)
        .map(|i| json!({"user_id": i, "name": format!("user-{i}")}))
        .collect();
    users.insert_many(docs).await.unwrap();

    // Callers that give up early. The abandoned scan keeps its connection,
    // which for an in-memory store is the only copy of the data.
    let _ = tokio::time::timeout(
        Duration::from_millis(1),
        users.count_documents(&json!({"name": {"$regex": "^user-1"}})),
    )
    .await;
    let _ = tokio::time::timeout(
        Duration::from_millis(1),
        users.find_one(&json!({"user_id": 19_999})),
    )
    .await;

    assert_eq!(users.count_documents(&Value::Null).await.unwrap(), 20_000);
    let doc = users.find_one(&json!({"user_id": 19_999})).await.unwrap().unwrap();
    assert_eq!(doc["name"], "user-19999");
    users.insert_one(json!({"user_id": 20_000})).await.unwrap();
    assert_eq!(users.count_documents(&Value::Null).await.unwrap(), 20_001);
}
