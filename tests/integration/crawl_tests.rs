//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small bookstore catalog and run the
//! full fetch, parse and persist cycle against it.

use shelfwatch::changes::{ChangeTracker, SharedStorage};
use shelfwatch::config::CrawlConfig;
use shelfwatch::crawler::{run_locked_crawl, Coordinator, CrawlRun, FetchFailure, Fetcher};
use shelfwatch::kv::MemoryKvStore;
use shelfwatch::model::{ChangeType, TrackedField};
use shelfwatch::storage::{ChangeQuery, SqliteStorage, Storage};
use shelfwatch::CrawlLock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a crawl configuration pointing at the mock server
fn create_test_config(base_url: &str) -> CrawlConfig {
    CrawlConfig {
        base_url: base_url.to_string(),
        catalog_path: "catalogue/page-{page}.html".to_string(),
        start_page: 1,
        end_page: None,
        default_total_pages: 1,
        concurrency: 4,
        batch_size: 3,
        max_crawl_duration_secs: 60,
        lock_name: "crawl:test".to_string(),
    }
}

/// Fetcher with a tiny backoff and no politeness delay
fn test_fetcher(max_retries: u32) -> Fetcher {
    Fetcher::with_client(
        reqwest::Client::new(),
        Duration::from_millis(5),
        max_retries,
        Duration::ZERO,
    )
}

fn test_storage() -> SharedStorage {
    Arc::new(Mutex::new(
        SqliteStorage::new_in_memory().expect("Failed to create storage"),
    ))
}

fn coordinator(config: CrawlConfig, storage: &SharedStorage) -> Coordinator {
    let tracker = Arc::new(ChangeTracker::new(Arc::clone(storage)));
    Coordinator::with_fetcher(config, test_fetcher(2), tracker)
}

/// A catalog listing page linking to `slugs`
fn catalog_html(slugs: &[String], page: u32, total_pages: Option<u32>) -> String {
    let mut html = String::from("<html><body><ol class=\"row\">\n");
    for slug in slugs {
        html.push_str(&format!(
            "<li><article class=\"product_pod\"><h3><a href=\"{}/index.html\">{}</a></h3></article></li>\n",
            slug, slug
        ));
    }
    html.push_str("</ol>\n");
    if let Some(total) = total_pages {
        html.push_str(&format!(
            "<ul class=\"pager\"><li class=\"current\">Page {} of {}</li></ul>\n",
            page, total
        ));
    }
    html.push_str("</body></html>");
    html
}

/// A book detail page
fn item_html(name: &str, price: f64) -> String {
    format!(
        r#"<html><body>
  <ul class="breadcrumb">
    <li><a href="../../index.html">Home</a></li>
    <li><a href="../category/books_1/index.html">Books</a></li>
    <li><a href="../category/books/travel_2/index.html">Travel</a></li>
    <li class="active">{name}</li>
  </ul>
  <div class="product_main">
    <h1>{name}</h1>
    <p class="star-rating Four"></p>
  </div>
  <table class="table table-striped">
    <tr><th>Price (excl. tax)</th><td>£{price:.2}</td></tr>
    <tr><th>Price (incl. tax)</th><td>£{price:.2}</td></tr>
    <tr><th>Availability</th><td>In stock (3 available)</td></tr>
    <tr><th>Number of reviews</th><td>0</td></tr>
  </table>
</body></html>"#
    )
}

fn slugs(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("book-{}_{}", i, i)).collect()
}

async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_items(server: &MockServer, slugs: &[String], price: f64) {
    for slug in slugs {
        mount_page(
            server,
            &format!("/catalogue/{}/index.html", slug),
            item_html(slug, price),
        )
        .await;
    }
}

#[tokio::test]
async fn test_fetch_retries_after_rate_limiting() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&mock_server)
        .await;

    let fetcher = test_fetcher(3);
    let started = Instant::now();
    let body = fetcher
        .fetch(&format!("{}/flaky", mock_server.uri()))
        .await
        .expect("Fetch should succeed on the fourth attempt");
    let elapsed = started.elapsed();

    assert_eq!(body, "finally");
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);

    // Backoff of 5ms, 10ms and 20ms between the four attempts
    assert!(
        elapsed >= Duration::from_millis(35),
        "retries did not back off: {:?}",
        elapsed
    );
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_fetch_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let url = format!("{}/missing", mock_server.uri());
    let result = test_fetcher(3).fetch(&url).await;

    assert_eq!(result, Err(FetchFailure::Terminal { url, status: 404 }));
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_fetch_gives_up_after_retry_budget() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let result = test_fetcher(2)
        .fetch(&format!("{}/down", mock_server.uri()))
        .await;

    match result {
        Err(FetchFailure::RetriesExhausted {
            attempts, reason, ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("503"));
        }
        other => panic!("Expected exhausted retries, got {:?}", other),
    }
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_full_crawl_with_one_missing_item() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(10);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    // The last item is gone
    Mock::given(method("GET"))
        .and(path(format!("/catalogue/{}/index.html", slugs[9])))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_items(&mock_server, &slugs[..9], 12.5).await;

    let storage = test_storage();
    let coordinator = coordinator(create_test_config(&mock_server.uri()), &storage);

    let summary = coordinator.crawl(1, None).await;

    assert_eq!(summary.catalog_pages, 1);
    assert_eq!(summary.items_discovered, 10);
    assert_eq!(summary.scraped, 9);
    assert_eq!(summary.inserted, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.changes_logged, 9);
    assert!(!summary.timed_out);

    // Discovery reused page one's body
    let requests = mock_server.received_requests().await.unwrap();
    let catalog_fetches = requests
        .iter()
        .filter(|r| r.url.path() == "/catalogue/page-1.html")
        .count();
    assert_eq!(catalog_fetches, 1);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_items().unwrap(), 9);
    let new_items = storage
        .count_changes(&ChangeQuery {
            change_type: Some(ChangeType::NewItem),
            ..ChangeQuery::default()
        })
        .unwrap();
    assert_eq!(new_items, 9);

    let stored = storage
        .find_item_by_url(&format!(
            "{}/catalogue/{}/index.html",
            mock_server.uri(),
            slugs[0]
        ))
        .unwrap()
        .expect("First item should be stored");
    assert_eq!(stored.item.category, "Travel");
    assert_eq!(stored.item.rating, 4);
    assert_eq!(stored.item.availability, "In stock");
}

#[tokio::test]
async fn test_recrawl_logs_only_price_change() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(2);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    mount_items(&mock_server, &slugs, 20.0).await;

    let storage = test_storage();
    let coordinator = coordinator(create_test_config(&mock_server.uri()), &storage);

    let first = coordinator.crawl(1, Some(1)).await;
    assert_eq!(first.inserted, 2);

    // Second day: the first book got cheaper
    mock_server.reset().await;
    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    mount_items(&mock_server, &slugs[..1], 15.0).await;
    mount_items(&mock_server, &slugs[1..], 20.0).await;

    let second = coordinator.crawl(1, Some(1)).await;

    assert_eq!(second.scraped, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.unchanged, 1);
    // Both price columns moved
    assert_eq!(second.changes_logged, 2);

    let storage = storage.lock().unwrap();
    let price_changes = storage
        .query_changes(&ChangeQuery {
            field: Some(TrackedField::PriceInclTax),
            ..ChangeQuery::default()
        })
        .unwrap();
    assert_eq!(price_changes.len(), 1);
    assert_eq!(
        price_changes[0].change.description,
        "Price decreased by £5.00 (from £20.00 to £15.00)"
    );
    assert_eq!(storage.count_items().unwrap(), 2);
}

#[tokio::test]
async fn test_discovery_falls_back_to_default_page_count() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(4);

    // No pagination markup anywhere
    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs[..2], 1, None),
    )
    .await;
    mount_page(
        &mock_server,
        "/catalogue/page-2.html",
        catalog_html(&slugs[2..], 2, None),
    )
    .await;
    mount_items(&mock_server, &slugs, 9.99).await;

    let mut config = create_test_config(&mock_server.uri());
    config.default_total_pages = 2;

    let storage = test_storage();
    let summary = coordinator(config, &storage).crawl(1, None).await;

    assert_eq!(summary.catalog_pages, 2);
    assert_eq!(summary.items_discovered, 4);
    assert_eq!(summary.inserted, 4);
}

#[tokio::test]
async fn test_failed_catalog_page_is_counted() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(2);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(2)),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_items(&mock_server, &slugs, 3.0).await;

    let storage = test_storage();
    let summary = coordinator(create_test_config(&mock_server.uri()), &storage)
        .crawl(1, Some(2))
        .await;

    assert_eq!(summary.catalog_pages, 1);
    assert_eq!(summary.catalog_pages_failed, 1);
    assert_eq!(summary.inserted, 2);
}

#[tokio::test]
async fn test_duplicate_links_are_fetched_once() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(1);
    let repeated = vec![slugs[0].clone(), slugs[0].clone()];

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&repeated, 1, Some(1)),
    )
    .await;
    mount_items(&mock_server, &slugs, 7.0).await;

    let storage = test_storage();
    let summary = coordinator(create_test_config(&mock_server.uri()), &storage)
        .crawl(1, Some(1))
        .await;

    assert_eq!(summary.items_discovered, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.duplicates, 0);
}

#[tokio::test]
async fn test_zero_duration_budget_stops_before_first_page() {
    let mock_server = MockServer::start().await;

    let mut config = create_test_config(&mock_server.uri());
    config.max_crawl_duration_secs = 0;

    let storage = test_storage();
    let summary = coordinator(config, &storage).crawl(1, Some(3)).await;

    assert!(summary.timed_out);
    assert_eq!(summary.catalog_pages, 0);
    assert_eq!(summary.scraped, 0);
    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_locked_crawl_skips_while_lock_is_held() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(1);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    mount_items(&mock_server, &slugs, 1.0).await;

    let storage = test_storage();
    let coordinator = coordinator(create_test_config(&mock_server.uri()), &storage);
    let lock = CrawlLock::new(Arc::new(MemoryKvStore::new()));

    let held = lock
        .try_acquire("crawl:test", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("Lock should be free");

    let run = run_locked_crawl(&lock, &coordinator, 1, Some(1))
        .await
        .unwrap();
    assert_eq!(run, CrawlRun::Skipped);
    assert!(mock_server.received_requests().await.unwrap().is_empty());

    assert!(lock.release(held).await.unwrap());

    let run = run_locked_crawl(&lock, &coordinator, 1, Some(1))
        .await
        .unwrap();
    match run {
        CrawlRun::Completed(summary) => assert_eq!(summary.inserted, 1),
        CrawlRun::Skipped => panic!("Crawl should run once the lock is free"),
    }

    // The run released its lease
    assert!(lock
        .try_acquire("crawl:test", Duration::from_secs(60))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_zero_pool_settings_are_raised_to_one() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(2);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    mount_items(&mock_server, &slugs, 3.5).await;

    let mut config = create_test_config(&mock_server.uri());
    config.concurrency = 0;
    config.batch_size = 0;

    let storage = test_storage();
    let coordinator = coordinator(config, &storage);
    assert_eq!(coordinator.config().concurrency, 1);
    assert_eq!(coordinator.config().batch_size, 1);

    let summary = coordinator.crawl(1, Some(1)).await;
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_item_is_cut_off_at_crawl_deadline() {
    let mock_server = MockServer::start().await;
    let slugs = slugs(1);

    mount_page(
        &mock_server,
        "/catalogue/page-1.html",
        catalog_html(&slugs, 1, Some(1)),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/catalogue/{}/index.html", slugs[0])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(item_html(&slugs[0], 9.99))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri());
    config.max_crawl_duration_secs = 1;

    let storage = test_storage();
    let coordinator = coordinator(config, &storage);
    let store = Arc::new(MemoryKvStore::new());
    let lock = CrawlLock::new(store.clone());
    let contender = CrawlLock::new(store);

    let started = Instant::now();
    let (run, contended) = tokio::join!(
        run_locked_crawl(&lock, &coordinator, 1, Some(1)),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            contender
                .try_acquire("crawl:test", Duration::from_secs(60))
                .await
        }
    );
    let elapsed = started.elapsed();

    // The lease outlives the crawl budget
    assert!(contended.unwrap().is_none());

    let CrawlRun::Completed(summary) = run.unwrap() else {
        panic!("Crawl should have run");
    };
    assert!(summary.timed_out);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scraped, 0);
    assert!(
        elapsed < Duration::from_millis(2500),
        "crawl overran its budget: {:?}",
        elapsed
    );

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_items().unwrap(), 0);
}
