//! Integration tests for change tracking and the audit log

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use shelfwatch::changes::{
    detect, ChangeEvent, ChangeNotifier, ChangeTracker, NotifyError, SharedStorage,
};
use shelfwatch::model::{
    ChangeDescriptor, ChangeLogEntry, ChangeType, FieldValue, ItemRecord, ParsedItem,
    TrackedField,
};
use shelfwatch::storage::{ChangeQuery, SqliteStorage, Storage, StorageResult};
use shelfwatch::UpsertOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn book(url: &str) -> ParsedItem {
    ParsedItem {
        source_url: url.to_string(),
        name: "Tipping the Velvet".to_string(),
        description: Some("Erotic and absorbing...".to_string()),
        category: "Historical Fiction".to_string(),
        price_excl_tax: 53.74,
        price_incl_tax: 53.74,
        availability: "In stock".to_string(),
        num_reviews: 0,
        rating: 1,
        image_url: "https://books.example/media/velvet.jpg".to_string(),
    }
}

const URL: &str = "https://books.example/catalogue/tipping-the-velvet_999/index.html";

fn shared_storage() -> SharedStorage {
    Arc::new(Mutex::new(
        SqliteStorage::new_in_memory().expect("Failed to create storage"),
    ))
}

fn all_changes(storage: &SharedStorage) -> Vec<ChangeLogEntry> {
    storage
        .lock()
        .unwrap()
        .query_changes(&ChangeQuery::default())
        .unwrap()
}

fn stored(storage: &SharedStorage, url: &str) -> ItemRecord {
    storage
        .lock()
        .unwrap()
        .find_item_by_url(url)
        .unwrap()
        .expect("Item should be stored")
}

#[test]
fn test_first_sighting_writes_item_and_new_item_entry() {
    let storage = shared_storage();
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    let outcome = tracker.upsert(&book(URL));
    let UpsertOutcome::Inserted { item_id } = outcome else {
        panic!("Expected an insert, got {:?}", outcome);
    };

    let record = stored(&storage, URL);
    assert_eq!(record.id, item_id);
    assert_eq!(record.item, book(URL));

    let changes = all_changes(&storage);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].item_id, item_id);
    assert_eq!(changes[0].change.change_type, ChangeType::NewItem);
    assert_eq!(
        changes[0].change.description,
        "New item added: Tipping the Velvet"
    );
}

#[test]
fn test_unchanged_item_only_advances_timestamp() {
    let storage = shared_storage();
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    tracker.upsert(&book(URL));
    let before = stored(&storage, URL);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let outcome = tracker.upsert(&book(URL));

    assert_eq!(
        outcome,
        UpsertOutcome::Updated {
            item_id: before.id,
            changes: Vec::new(),
        }
    );
    let after = stored(&storage, URL);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.crawled_at, before.crawled_at);
    assert_eq!(after.content_hash, before.content_hash);
    assert_eq!(all_changes(&storage).len(), 1);
}

#[test]
fn test_single_field_change_logs_one_entry() {
    let storage = shared_storage();
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    tracker.upsert(&book(URL));
    let before = stored(&storage, URL);

    let mut reviewed = book(URL);
    reviewed.num_reviews = 4;
    let outcome = tracker.upsert(&reviewed);

    assert_eq!(outcome.changes_logged(), 1);
    let after = stored(&storage, URL);
    assert_eq!(after.item.num_reviews, 4);
    assert_ne!(after.content_hash, before.content_hash);

    let updates = storage
        .lock()
        .unwrap()
        .query_changes(&ChangeQuery {
            change_type: Some(ChangeType::Update),
            ..ChangeQuery::default()
        })
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].change.field, Some(TrackedField::NumReviews));
    assert_eq!(updates[0].change.old_value, Some(FieldValue::Count(0)));
    assert_eq!(updates[0].change.new_value, Some(FieldValue::Count(4)));
    assert_eq!(
        updates[0].change.description,
        "Number of reviews increased by 4 (now 4)"
    );
}

#[test]
fn test_repeated_upsert_is_idempotent() {
    let storage = shared_storage();
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    let mut cheaper = book(URL);
    tracker.upsert(&cheaper);
    cheaper.price_incl_tax = 40.0;

    let first = tracker.upsert(&cheaper);
    let second = tracker.upsert(&cheaper);

    assert_eq!(first.changes_logged(), 1);
    assert_eq!(second.changes_logged(), 0);
    assert_eq!(all_changes(&storage).len(), 2);
}

#[test]
fn test_untracked_fields_do_not_create_entries() {
    let storage = shared_storage();
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    tracker.upsert(&book(URL));

    let mut renamed = book(URL);
    renamed.name = "Tipping the Velvet (Anniversary Edition)".to_string();
    renamed.description = None;
    let outcome = tracker.upsert(&renamed);

    assert_eq!(outcome.changes_detected(), 0);
    assert_eq!(all_changes(&storage).len(), 1);
    assert_eq!(stored(&storage, URL).item.name, renamed.name);
}

#[test]
fn test_failed_write_rolls_back_item_and_entries() {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
    let original = book(URL);

    let record = storage
        .insert_new_item(
            &original,
            "original-hash",
            &ChangeDescriptor::new_item(&original.name, at),
            at,
        )
        .unwrap();

    let mut incoming = original.clone();
    incoming.price_incl_tax = 10.0;
    incoming.rating = 5;
    let mut changes = detect(&original, &incoming, at);
    assert_eq!(changes.len(), 2);

    // An update without a field violates the change_log constraints
    changes[1].field = None;

    let result = storage.apply_item_changes(record.id, &incoming, "new-hash", &changes, at);
    assert!(result.is_err());

    let after = storage.get_item(record.id).unwrap();
    assert_eq!(after.item, original);
    assert_eq!(after.content_hash, "original-hash");
    assert_eq!(storage.count_changes(&ChangeQuery::default()).unwrap(), 1);
}

/// Storage whose lookups never see existing rows, as if another writer raced us
struct StaleLookup(SqliteStorage);

impl Storage for StaleLookup {
    fn find_item_by_url(&self, _url: &str) -> StorageResult<Option<ItemRecord>> {
        Ok(None)
    }

    fn get_item(&self, item_id: i64) -> StorageResult<ItemRecord> {
        self.0.get_item(item_id)
    }

    fn count_items(&self) -> StorageResult<u64> {
        self.0.count_items()
    }

    fn insert_new_item(
        &mut self,
        item: &ParsedItem,
        content_hash: &str,
        change: &ChangeDescriptor,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        self.0.insert_new_item(item, content_hash, change, at)
    }

    fn apply_item_changes(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        changes: &[ChangeDescriptor],
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        self.0
            .apply_item_changes(item_id, item, content_hash, changes, at)
    }

    fn touch_item(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        self.0.touch_item(item_id, item, content_hash, at)
    }

    fn query_changes(&self, query: &ChangeQuery) -> StorageResult<Vec<ChangeLogEntry>> {
        self.0.query_changes(query)
    }

    fn count_changes(&self, query: &ChangeQuery) -> StorageResult<u64> {
        self.0.count_changes(query)
    }
}

#[test]
fn test_concurrent_insert_of_same_url_is_a_duplicate() {
    let storage: SharedStorage = Arc::new(Mutex::new(StaleLookup(
        SqliteStorage::new_in_memory().unwrap(),
    )));
    let tracker = ChangeTracker::new(Arc::clone(&storage));

    assert!(matches!(
        tracker.upsert(&book(URL)),
        UpsertOutcome::Inserted { .. }
    ));

    let outcome = tracker.upsert(&book(URL));
    assert_eq!(outcome, UpsertOutcome::Duplicate);
    assert_eq!(outcome.changes_logged(), 0);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_items().unwrap(), 1);
    assert_eq!(storage.count_changes(&ChangeQuery::default()).unwrap(), 1);
}

/// Notifier that always fails, counting calls
#[derive(Default)]
struct BrokenNotifier {
    calls: AtomicUsize,
}

impl ChangeNotifier for BrokenNotifier {
    fn notify(&self, _event: &ChangeEvent<'_>) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Delivery("smtp unreachable".to_string()))
    }
}

#[test]
fn test_notifier_failure_does_not_affect_commit() {
    let storage = shared_storage();
    let notifier = Arc::new(BrokenNotifier::default());
    let shared: Arc<dyn ChangeNotifier> = notifier.clone();
    let tracker = ChangeTracker::new(Arc::clone(&storage)).with_notifier(shared);

    let inserted = tracker.upsert(&book(URL));
    assert!(matches!(inserted, UpsertOutcome::Inserted { .. }));

    let mut restocked = book(URL);
    restocked.availability = "Out of stock".to_string();
    let updated = tracker.upsert(&restocked);
    assert_eq!(updated.changes_logged(), 1);

    // Unchanged upserts are not announced
    tracker.upsert(&restocked);

    assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    assert_eq!(all_changes(&storage).len(), 2);
    assert_eq!(stored(&storage, URL).item.availability, "Out of stock");
}

#[test]
fn test_history_is_newest_first() {
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    let day = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
    let original = book(URL);

    let record = storage
        .insert_new_item(
            &original,
            "h0",
            &ChangeDescriptor::new_item(&original.name, day),
            day,
        )
        .unwrap();

    // Two changes committed together share a timestamp
    let later = day + ChronoDuration::hours(2);
    let mut incoming = original.clone();
    incoming.price_excl_tax = 50.0;
    incoming.price_incl_tax = 50.0;
    let changes = detect(&original, &incoming, later);
    assert_eq!(changes.len(), 2);
    storage
        .apply_item_changes(record.id, &incoming, "h1", &changes, later)
        .unwrap();

    let history = storage.item_history(record.id).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].change.changed_at >= history[1].change.changed_at);
    assert!(history[0].id > history[1].id);
    assert_eq!(history[2].change.change_type, ChangeType::NewItem);

    let page = storage
        .query_changes(&ChangeQuery {
            limit: Some(1),
            offset: Some(1),
            ..ChangeQuery::default()
        })
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, history[1].id);

    let before_update = storage
        .query_changes(&ChangeQuery {
            until: Some(later),
            ..ChangeQuery::default()
        })
        .unwrap();
    assert_eq!(before_update.len(), 1);
}
