use skein_core::DedupFilter;

use crate::integration::common::setup_test_db;

#[tokio::test]
#[ignore = "requires docker"]
async fn first_sighting_is_new() {
    let (db, _container) = setup_test_db().await;
    let filter = db.fingerprint_filter("crawl-a");

    assert!(!filter.seen("GET https://example.com/").await.unwrap());
    assert!(filter.seen("GET https://example.com/").await.unwrap());
    assert!(!filter.seen("GET https://example.com/other").await.unwrap());
    assert_eq!(filter.len().await.unwrap(), 2);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn sets_are_independent() {
    let (db, _container) = setup_test_db().await;
    let a = db.fingerprint_filter("crawl-a");
    let b = db.fingerprint_filter("crawl-b");

    assert!(!a.seen("GET https://example.com/").await.unwrap());
    assert!(!b.seen("GET https://example.com/").await.unwrap());

    // A second handle on the same set shares its contents.
    let a_again = db.fingerprint_filter("crawl-a");
    assert!(a_again.seen("GET https://example.com/").await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn clear_forgets_set() {
    let (db, _container) = setup_test_db().await;
    let filter = db.fingerprint_filter("crawl-a");

    filter.seen("x").await.unwrap();
    filter.seen("y").await.unwrap();
    assert_eq!(filter.clear().await.unwrap(), 2);
    assert_eq!(filter.len().await.unwrap(), 0);
    assert!(!filter.seen("x").await.unwrap());
}
