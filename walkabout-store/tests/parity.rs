//! Every backend must answer every query identically. These tests run one
//! document set and one query battery across memory, json and sqlite and
//! compare the result ids, counts, and distinct sets.

use std::sync::Arc;

use serde_json::{json, Value};
use walkabout_store::{Backend, FindOptions, JsonFileBackend, MemoryBackend, SqliteBackend};

fn backends(dir: &tempfile::TempDir) -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(MemoryBackend::new()),
        Arc::new(JsonFileBackend::new(dir.path())),
        Arc::new(SqliteBackend::connect_lazy("sqlite::memory:").unwrap()),
    ]
}

async fn seed(backend: &dyn Backend) {
    let docs = vec![
        json!({"id": "p1", "context": {"price": 10, "name": "pen", "tags": ["office"]}}),
        json!({"id": "p2", "context": {"price": 50, "name": "lamp", "tags": ["home", "light"]}}),
        json!({"id": "p3", "context": {"price": 100, "name": "Desk", "tags": ["office", "home"]}}),
        json!({"id": "p4", "context": {"price": 500, "name": "chair"}}),
        json!({"id": "p5", "context": {"price": 1000, "name": "sofa", "stock": null}}),
    ];
    for doc in docs {
        backend.save("product", doc).await.unwrap();
    }
}

fn queries() -> Vec<Value> {
    vec![
        json!({}),
        json!({"context.price": {"$gte": 50, "$lte": 500}}),
        json!({"context.name": {"$regex": "^[a-z]", "$options": ""}}),
        json!({"context.name": {"$regex": "^desk", "$options": "i"}}),
        json!({"context.tags": "office"}),
        json!({"context.tags": {"$size": 2}}),
        json!({"context.tags": {"$all": ["home", "office"]}}),
        json!({"context.stock": {"$exists": true}}),
        json!({"context.stock": {"$exists": false}}),
        json!({"$or": [{"context.price": {"$lt": 20}}, {"context.price": {"$gt": 900}}]}),
        json!({"context.price": {"$in": [10, 1000, 77]}}),
        json!({"context.price": {"$mod": [3, 1]}}),
        json!({"context.price": {"$not": {"$gte": 100}}}),
    ]
}

fn ids(docs: &[Value]) -> Vec<String> {
    docs.iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn find_results_agree_across_backends() {
    let dir = tempfile::tempdir().unwrap();
    let backends = backends(&dir);
    for backend in &backends {
        seed(backend.as_ref()).await;
    }
    for query in queries() {
        let mut per_backend = Vec::new();
        for backend in &backends {
            let hits = backend
                .find("product", &query, FindOptions::default())
                .await
                .unwrap();
            per_backend.push((backend.name(), ids(&hits)));
        }
        let (first_name, first) = &per_backend[0];
        for (name, result) in &per_backend[1..] {
            assert_eq!(
                result, first,
                "query {query} disagrees between {first_name} and {name}"
            );
        }
    }
}

#[tokio::test]
async fn count_equals_find_length_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(&dir) {
        seed(backend.as_ref()).await;
        for query in queries() {
            let found = backend
                .find("product", &query, FindOptions::default())
                .await
                .unwrap();
            let count = backend.count("product", Some(&query)).await.unwrap();
            assert_eq!(
                count,
                found.len() as u64,
                "count/find mismatch on {} for {query}",
                backend.name()
            );
        }
    }
}

#[tokio::test]
async fn find_one_is_the_deterministic_head_of_find() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(&dir) {
        seed(backend.as_ref()).await;
        for query in queries() {
            let found = backend
                .find("product", &query, FindOptions::default())
                .await
                .unwrap();
            let one = backend.find_one("product", &query).await.unwrap();
            match found.first() {
                Some(head) => assert_eq!(one.as_ref(), Some(head)),
                None => assert!(one.is_none()),
            }
        }
    }
}

#[tokio::test]
async fn distinct_returns_each_value_once_from_matching_docs() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(&dir) {
        seed(backend.as_ref()).await;
        let mut values = backend
            .distinct("product", "context.price", Some(&json!({"context.price": {"$gte": 50, "$lte": 500}})))
            .await
            .unwrap();
        values.sort_by(|a, b| walkabout_query::cmp_values(a, b));
        assert_eq!(values, vec![json!(50), json!(100), json!(500)]);

        // Array fields contribute elements, deduplicated.
        let mut tags = backend
            .distinct("product", "context.tags", None)
            .await
            .unwrap();
        tags.sort_by(|a, b| walkabout_query::cmp_values(a, b));
        assert_eq!(tags, vec![json!("home"), json!("light"), json!("office")]);
    }
}

#[tokio::test]
async fn scenario_price_window() {
    // Spec'd end-to-end: 5 products, price in {10,50,100,500,1000};
    // the [50, 500] window holds exactly three.
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(&dir) {
        seed(backend.as_ref()).await;
        let query = json!({"context.price": {"$gte": 50, "$lte": 500}});
        let found = backend
            .find("product", &query, FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 3, "backend {}", backend.name());
        assert_eq!(backend.count("product", Some(&query)).await.unwrap(), 3);
    }
}

#[tokio::test]
async fn updates_agree_across_backends() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(&dir) {
        seed(backend.as_ref()).await;
        backend
            .update_many(
                "product",
                &json!({"context.price": {"$lt": 100}}),
                &json!({"$set": {"context.sale": true}, "$inc": {"context.price": 1}}),
            )
            .await
            .unwrap();
        let discounted = backend
            .find("product", &json!({"context.sale": true}), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&discounted), vec!["p1", "p2"], "backend {}", backend.name());
        let p1 = backend.get("product", "p1").await.unwrap().unwrap();
        assert_eq!(p1["context"]["price"], json!(11));
    }
}
