//! Integration tests for the tempmail crate
//!
//! These drive the sync engine end to end against an in-memory change log,
//! checking inbox contents, fan-out and the persisted watermark together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tempmail::gmail::api::GmailMessage;
use tempmail::storage::{FileWatermarkStore, InMemoryWatermarkStore};
use tempmail::{
    ChangeBatch, ChangeEvent, ChangeLog, Cursor, InboxEvent, InboxStore, MessageId, Notifier,
    RemoteError, SyncEngine, SyncError, WatermarkStore,
};
use tokio::sync::broadcast::error::TryRecvError;

/// Change log fake: a scripted batch per start cursor plus a message table
#[derive(Default)]
struct FakeChangeLog {
    batches: HashMap<String, ChangeBatch>,
    messages: HashMap<String, GmailMessage>,
    list_error: Mutex<Option<RemoteError>>,
    fetch_errors: Mutex<HashMap<String, RemoteError>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeChangeLog {
    fn with_batch(mut self, since: &str, ids: &[&str], new_cursor: &str) -> Self {
        self.batches.insert(
            since.to_string(),
            ChangeBatch {
                events: ids.iter().map(|id| ChangeEvent::message_added(*id)).collect(),
                new_cursor: Cursor::new(new_cursor),
            },
        );
        self
    }

    fn with_message(mut self, id: &str, to: &str, subject: &str) -> Self {
        self.messages.insert(id.to_string(), gmail_message(id, to, subject));
        self
    }

    fn fail_list_once(self, err: RemoteError) -> Self {
        *self.list_error.lock().unwrap() = Some(err);
        self
    }

    fn fail_fetch_once(self, id: &str, err: RemoteError) -> Self {
        self.fetch_errors.lock().unwrap().insert(id.to_string(), err);
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ChangeLog for FakeChangeLog {
    fn list_changes(&self, since: &Cursor) -> Result<ChangeBatch, RemoteError> {
        if let Some(err) = self.list_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self
            .batches
            .get(since.as_str())
            .cloned()
            .unwrap_or_else(|| ChangeBatch {
                events: Vec::new(),
                new_cursor: since.clone(),
            }))
    }

    fn fetch_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        self.fetched.lock().unwrap().push(id.to_string());
        if let Some(err) = self.fetch_errors.lock().unwrap().remove(id.as_str()) {
            return Err(err);
        }
        self.messages
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }
}

fn gmail_message(id: &str, to: &str, subject: &str) -> GmailMessage {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "internalDate": "1700000000000",
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "Delivered-To", "value": to},
                {"name": "From", "value": "Alice <alice@example.com>"},
                {"name": "Subject", "value": subject}
            ],
            "parts": [
                {"mimeType": "text/plain", "body": {"data": "SGVsbG8gcGxhaW4"}},
                {"mimeType": "text/html", "body": {"data": "PHA-SGVsbG88L3A-"}}
            ]
        }
    }))
    .unwrap()
}

struct Harness {
    engine: SyncEngine,
    log: Arc<FakeChangeLog>,
    watermark: Arc<InMemoryWatermarkStore>,
    inboxes: Arc<InboxStore>,
    notifier: Notifier,
}

fn harness(log: FakeChangeLog, cursor: Option<&str>, active: &[&str]) -> Harness {
    let log = Arc::new(log);
    let watermark = Arc::new(InMemoryWatermarkStore::new(cursor.map(Cursor::new)));
    let inboxes = Arc::new(InboxStore::new());
    inboxes.activate_all(active.iter().copied());
    let notifier = Notifier::default();

    let engine = SyncEngine::new(
        log.clone(),
        watermark.clone(),
        inboxes.clone(),
        notifier.clone(),
    );

    Harness {
        engine,
        log,
        watermark,
        inboxes,
        notifier,
    }
}

fn inbox_ids(inboxes: &InboxStore, address: &str) -> Vec<String> {
    inboxes
        .list(address)
        .into_iter()
        .map(|m| m.id.to_string())
        .collect()
}

#[test]
fn test_end_to_end_sync() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_message("m1", "foo@test.com", "Hi");
    let h = harness(log, Some("100"), &["foo@test.com"]);
    let mut subscriber = h.notifier.subscribe();

    let report = h.engine.run_once().unwrap();
    assert_eq!(report.inserted, 1);

    let inbox = h.inboxes.list("foo@test.com");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id.as_str(), "m1");
    assert_eq!(inbox[0].subject, "Hi");
    assert_eq!(inbox[0].sender, "Alice <alice@example.com>");
    assert_eq!(inbox[0].body, "<p>Hello</p>");

    match subscriber.try_recv().unwrap() {
        InboxEvent::NewMail { message } => assert_eq!(message.id.as_str(), "m1"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(h.watermark.current(), Some(Cursor::new("105")));
}

#[test]
fn test_empty_batch_changes_nothing() {
    let h = harness(FakeChangeLog::default(), Some("100"), &["foo@test.com"]);
    let mut subscriber = h.notifier.subscribe();

    let report = h.engine.run_once().unwrap();
    assert_eq!(report.events, 0);
    assert_eq!(report.advanced_to, None);

    assert_eq!(h.watermark.current(), Some(Cursor::new("100")));
    assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));
    assert!(h.log.fetched().is_empty());
}

#[test]
fn test_replay_after_aborted_pass_creates_no_duplicates() {
    // First pass fails on m2 after m1 was inserted; the watermark stays at
    // 100, so the second pass replays m1.
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1", "m2"], "110")
        .with_message("m1", "foo@test.com", "One")
        .with_message("m2", "foo@test.com", "Two")
        .fail_fetch_once("m2", RemoteError::Timeout);
    let h = harness(log, Some("100"), &["foo@test.com"]);
    let mut subscriber = h.notifier.subscribe();

    let err = h.engine.run_once().unwrap_err();
    assert!(matches!(
        err,
        SyncError::FetchMessage {
            source: RemoteError::Timeout,
            ..
        }
    ));
    assert_eq!(h.watermark.current(), Some(Cursor::new("100")));
    assert_eq!(inbox_ids(&h.inboxes, "foo@test.com"), vec!["m1"]);

    let report = h.engine.run_once().unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(inbox_ids(&h.inboxes, "foo@test.com"), vec!["m2", "m1"]);
    assert_eq!(h.watermark.current(), Some(Cursor::new("110")));

    // m1 was only announced once
    let mut announced = Vec::new();
    while let Ok(InboxEvent::NewMail { message }) = subscriber.try_recv() {
        announced.push(message.id.to_string());
    }
    assert_eq!(announced, vec!["m1", "m2"]);
}

#[test]
fn test_deleted_message_is_skipped() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["gone", "m1"], "105")
        .with_message("m1", "foo@test.com", "Hi");
    let h = harness(log, Some("100"), &["foo@test.com"]);

    let report = h.engine.run_once().unwrap();
    assert_eq!(report.missing, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(h.log.fetched(), vec!["gone", "m1"]);
    assert_eq!(h.watermark.current(), Some(Cursor::new("105")));
}

#[test]
fn test_list_failure_aborts_without_advancing() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_message("m1", "foo@test.com", "Hi")
        .fail_list_once(RemoteError::Transient("503 Service Unavailable".into()));
    let h = harness(log, Some("100"), &["foo@test.com"]);

    assert!(matches!(
        h.engine.run_once(),
        Err(SyncError::ListChanges(RemoteError::Transient(_)))
    ));
    assert_eq!(h.watermark.current(), Some(Cursor::new("100")));
    assert!(h.inboxes.list("foo@test.com").is_empty());

    // next trigger recovers
    h.engine.run_once().unwrap();
    assert_eq!(h.watermark.current(), Some(Cursor::new("105")));
}

#[test]
fn test_unauthorized_fetch_aborts() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_message("m1", "foo@test.com", "Hi")
        .fail_fetch_once("m1", RemoteError::Unauthorized("no token".into()));
    let h = harness(log, Some("100"), &["foo@test.com"]);

    let err = h.engine.run_once().unwrap_err();
    assert!(err.needs_operator());
    assert_eq!(h.watermark.current(), Some(Cursor::new("100")));
}

#[test]
fn test_inactive_address_is_dropped_silently() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_message("m1", "stranger@test.com", "Hi");
    let h = harness(log, Some("100"), &["foo@test.com"]);
    let mut subscriber = h.notifier.subscribe();

    let report = h.engine.run_once().unwrap();
    assert_eq!(report.inactive, 1);
    assert!(h.inboxes.list("stranger@test.com").is_empty());
    assert!(h.inboxes.list("foo@test.com").is_empty());
    assert!(matches!(subscriber.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(h.watermark.current(), Some(Cursor::new("105")));
}

#[test]
fn test_missing_watermark_refuses_to_sync() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_message("m1", "foo@test.com", "Hi");
    let h = harness(log, None, &["foo@test.com"]);

    assert!(matches!(
        h.engine.run_once(),
        Err(SyncError::WatermarkMissing(_))
    ));
    assert!(h.log.fetched().is_empty());
    assert_eq!(h.watermark.current(), None);
}

#[test]
fn test_corrupt_watermark_file_refuses_to_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "garbage").unwrap();

    let log = Arc::new(FakeChangeLog::default());
    let engine = SyncEngine::new(
        log.clone(),
        Arc::new(FileWatermarkStore::new(&path)),
        Arc::new(InboxStore::new()),
        Notifier::default(),
    );

    let err = engine.run_once().unwrap_err();
    assert!(matches!(err, SyncError::WatermarkUnreadable(_)));
    assert!(err.needs_operator());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "garbage");
}

#[test]
fn test_inbox_order_is_most_recent_first() {
    let ids = ["m1", "m2", "m3", "m4"];
    let mut log = FakeChangeLog::default().with_batch("100", &ids, "120");
    for id in ids {
        log = log.with_message(id, "foo@test.com", id);
    }
    let h = harness(log, Some("100"), &["foo@test.com"]);

    h.engine.run_once().unwrap();
    assert_eq!(
        inbox_ids(&h.inboxes, "foo@test.com"),
        vec!["m4", "m3", "m2", "m1"]
    );
}

#[test]
fn test_consecutive_syncs_follow_the_watermark() {
    let log = FakeChangeLog::default()
        .with_batch("100", &["m1"], "105")
        .with_batch("105", &["m2"], "107")
        .with_message("m1", "Foo@Test.com", "One")
        .with_message("m2", "foo@test.com", "Two");

    let dir = tempfile::tempdir().unwrap();
    let watermark = Arc::new(FileWatermarkStore::new(dir.path().join("state.json")));
    watermark.save(&Cursor::new("100")).unwrap();

    let inboxes = Arc::new(InboxStore::new());
    inboxes.activate("foo@test.com");
    let engine = SyncEngine::new(
        Arc::new(log),
        watermark.clone(),
        inboxes.clone(),
        Notifier::default(),
    );

    engine.run_once().unwrap();
    engine.run_once().unwrap();
    // nothing new after 107
    engine.run_once().unwrap();

    assert_eq!(inbox_ids(&inboxes, "foo@test.com"), vec!["m2", "m1"]);
    assert_eq!(watermark.load().unwrap(), Cursor::new("107"));
}
