use serde_json::json;
use skein_core::{Processor, Record};

use crate::integration::common::setup_test_db;

#[tokio::test]
#[ignore = "requires docker"]
async fn save_and_list_recent() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    let first = Record::new()
        .with("url", "https://example.com/a")
        .with("title", "A");
    let second = Record::new()
        .with("url", "https://example.com/b")
        .with("title", "B");

    let id_a = repo.save(&first).await.unwrap();
    let id_b = repo.save(&second).await.unwrap();
    assert_ne!(id_a, id_b);
    assert_eq!(repo.count().await.unwrap(), 2);

    let all = repo.list_recent(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|r| r.id == id_a));
    assert!(all.iter().any(|r| r.id == id_b));

    let only_a = repo
        .list_recent(Some("https://example.com/a"), 10)
        .await
        .unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].data, json!({"url": "https://example.com/a", "title": "A"}));
    assert_eq!(only_a[0].data_hash.len(), 64);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn record_without_url_is_stored() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    repo.save(&Record::new().with("n", 1)).await.unwrap();

    let rows = repo.list_recent(None, 5).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].url.is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn repository_as_processor() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    let mut record = Record::new().with("url", "https://example.com/");
    repo.process(&mut record).await.unwrap();

    assert_eq!(repo.count().await.unwrap(), 1);
    repo.health_check().await.unwrap();
}
