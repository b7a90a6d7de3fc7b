//! End-to-end tests of the sync client against an in-process server.

use keenotes_crypto::{EnvelopeCodec, Password};
use keenotes_storage::{
    Commit, InMemoryBackend, LogStore, Note, NoteStore, StorageError, StorageResult, SyncState,
};
use keenotes_sync_engine::{
    MockConnector, MockPeer, MockServer, SessionState, SyncClient, SyncConfig, SyncHandle,
    SyncReconciler, SyncStatus, DECRYPTION_FAILED_PLACEHOLDER,
};
use keenotes_sync_protocol::{ClientMessage, NotePayload, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Store = LogStore<InMemoryBackend>;

const WAIT: Duration = Duration::from_secs(10);

fn config() -> SyncConfig {
    SyncConfig::new("http://localhost:8080")
        .with_token("test-token")
        .with_reconnect_delay(Duration::from_millis(50))
}

fn notes(ids: std::ops::RangeInclusive<i64>) -> Vec<NotePayload> {
    ids.map(|id| NotePayload::new(id, format!("note {id}"), "2024-01-01 09:00:00"))
        .collect()
}

fn batch(batch_id: u32, total_batches: u32, ids: std::ops::RangeInclusive<i64>) -> ServerMessage {
    ServerMessage::SyncBatch {
        batch_id,
        total_batches,
        notes: notes(ids),
    }
}

fn spawn_client<S: NoteStore + 'static>(
    store: Arc<S>,
) -> (SyncHandle<S>, MockConnector, MockServer) {
    let (connector, server) = MockConnector::new();
    let reconciler = Arc::new(SyncReconciler::new(store));
    let handle = SyncClient::spawn(config(), connector.clone(), reconciler).unwrap();
    (handle, connector, server)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn accept(server: &mut MockServer) -> MockPeer {
    tokio::time::timeout(WAIT, server.accept())
        .await
        .expect("no connection in time")
        .expect("connector dropped")
}

async fn expect_handshake(peer: &mut MockPeer) -> (Uuid, i64) {
    match tokio::time::timeout(WAIT, peer.recv()).await.unwrap() {
        Some(ClientMessage::Handshake {
            client_id,
            last_sync_id,
        }) => (client_id, last_sync_id),
        other => panic!("expected handshake, got {other:?}"),
    }
}

fn last_sync_id<S: NoteStore>(store: &S) -> i64 {
    store.last_sync_id().unwrap()
}

fn seeded_store(last_sync_id: i64) -> Arc<Store> {
    let store = Store::in_memory().unwrap();
    store
        .commit(Commit::new().with_sync_state(SyncState::at(last_sync_id)))
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn resumes_from_watermark_and_checkpoints_each_batch() {
    let store = seeded_store(100);
    let (handle, _connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    let (client_id, resume) = expect_handshake(&mut peer).await;
    assert_eq!(resume, 100);
    assert_eq!(client_id, store.client_id());

    peer.send(&batch(1, 2, 101..=105));
    wait_until(|| handle.stats().batches_applied == 1).await;
    assert_eq!(last_sync_id(&*store), 105);
    assert_eq!(handle.status(), SyncStatus::Syncing);
    assert_eq!(handle.reconciler().burst_progress(), (2, 1));

    peer.send(&batch(2, 2, 106..=110));
    wait_until(|| last_sync_id(&*store) == 110).await;

    peer.send(&ServerMessage::SyncComplete {
        total_synced: 10,
        last_sync_id: 110,
    });
    wait_until(|| handle.status() == SyncStatus::Completed).await;

    assert_eq!(last_sync_id(&*store), 110);
    assert_eq!(store.count().unwrap(), 10);
    assert_eq!(store.get(107).unwrap().unwrap().content, "note 107");
    assert_eq!(handle.stats().batches_applied, 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn dropped_connection_resumes_without_duplicates() {
    let store = seeded_store(100);
    let (handle, connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut first = accept(&mut server).await;
    let (client_id, resume) = expect_handshake(&mut first).await;
    assert_eq!(resume, 100);
    first.send(&batch(1, 2, 101..=105));
    wait_until(|| last_sync_id(&*store) == 105).await;

    first.break_connection();

    let mut second = accept(&mut server).await;
    let (same_client, resume) = expect_handshake(&mut second).await;
    assert_eq!(resume, 105);
    assert_eq!(same_client, client_id);
    assert_eq!(connector.dial_count(), 2);

    // A server that ignores the resume point re-sends everything.
    second.send(&batch(1, 2, 101..=105));
    second.send(&batch(2, 2, 106..=110));
    second.send(&ServerMessage::SyncComplete {
        total_synced: 10,
        last_sync_id: 110,
    });
    wait_until(|| handle.status() == SyncStatus::Completed).await;

    assert_eq!(store.count().unwrap(), 10);
    assert_eq!(last_sync_id(&*store), 110);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn back_to_back_connects_open_one_socket() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, connector, mut server) = spawn_client(store);
    connector.set_dial_delay(Duration::from_millis(100));

    handle.connect().unwrap();
    handle.connect().unwrap();
    handle
        .wait_for_state(SessionState::Connected, WAIT)
        .await
        .unwrap();
    handle.connect().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(connector.dial_count(), 1);
    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    assert!(server.try_accept().is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn lower_server_watermark_never_rewinds() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, _connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    peer.send(&batch(1, 1, 1..=20));
    peer.send(&ServerMessage::SyncComplete {
        total_synced: 20,
        last_sync_id: 7,
    });
    wait_until(|| handle.status() == SyncStatus::Completed).await;
    assert_eq!(last_sync_id(&*store), 20);

    peer.send(&ServerMessage::SyncComplete {
        total_synced: 0,
        last_sync_id: 0,
    });
    wait_until(|| handle.stats().bursts_completed == 2).await;
    assert_eq!(last_sync_id(&*store), 20);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn realtime_notes_decrypt_or_become_placeholders() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, _connector, mut server) = spawn_client(Arc::clone(&store));
    let envelope = EnvelopeCodec::new()
        .encrypt("hello", &Password::new("p1"))
        .unwrap();

    handle.set_password(Some(Password::new("p1")));
    handle.connect().unwrap();
    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;

    peer.send(&ServerMessage::RealtimeUpdate {
        note: NotePayload::new(1, envelope.clone(), "2024-01-01 09:00:00").with_encrypted(true),
    });
    wait_until(|| store.count().unwrap() == 1).await;
    assert_eq!(store.get(1).unwrap().unwrap().content, "hello");

    handle.set_password(Some(Password::new("p2")));
    peer.send(&ServerMessage::RealtimeUpdate {
        note: NotePayload::new(2, envelope, "2024-01-01 09:01:00").with_encrypted(true),
    });
    wait_until(|| store.count().unwrap() == 2).await;

    assert_eq!(
        store.get(2).unwrap().unwrap().content,
        DECRYPTION_FAILED_PLACEHOLDER
    );
    assert_eq!(handle.stats().decrypt_failures, 1);
    assert_eq!(last_sync_id(&*store), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_and_malformed_frames_keep_connection_alive() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    peer.send_raw(r#"{"type":"presence","online":3}"#);
    peer.send_raw("not json at all");
    peer.send(&ServerMessage::Error {
        message: "slow down".into(),
    });
    peer.send(&ServerMessage::RealtimeUpdate {
        note: NotePayload::new(42, "plain", "2024-01-01 09:00:00"),
    });

    wait_until(|| store.count().unwrap() == 1).await;
    assert_eq!(handle.state(), SessionState::Connected);
    assert_eq!(connector.dial_count(), 1);
    assert_eq!(handle.stats().server_errors, 1);
    assert_eq!(handle.stats().batches_applied, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn note_with_both_timestamp_keys_is_stored() {
    let store = seeded_store(100);
    let (handle, _connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    peer.send_raw(
        r#"{"type":"sync_batch","batch_id":1,"total_batches":2,"notes":[
            {"id":101,"content":"both stamps","created_at":"2024-01-01 09:00:00",
             "createdAt":"2024-01-01T09:00:00Z","channel":null,"encrypted":false}]}"#,
    );
    peer.send(&batch(2, 2, 102..=105));
    peer.send(&ServerMessage::SyncComplete {
        total_synced: 5,
        last_sync_id: 105,
    });
    wait_until(|| handle.status() == SyncStatus::Completed).await;

    let note = store.get(101).unwrap().unwrap();
    assert_eq!(note.content, "both stamps");
    assert_eq!(note.created_at, "2024-01-01 09:00:00");
    assert_eq!(store.count().unwrap(), 5);
    assert_eq!(last_sync_id(&*store), 105);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_batch_resyncs_from_last_checkpoint() {
    let store = seeded_store(100);
    let (handle, connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut first = accept(&mut server).await;
    expect_handshake(&mut first).await;
    first.send_raw(
        r#"{"type":"sync_batch","batch_id":1,"total_batches":2,"notes":[{"id":"101","content":"x"}]}"#,
    );
    // Nothing after the rejected batch may be checkpointed.
    first.send(&batch(2, 2, 102..=105));
    first.send(&ServerMessage::SyncComplete {
        total_synced: 5,
        last_sync_id: 105,
    });

    let mut second = accept(&mut server).await;
    let (_, resume) = expect_handshake(&mut second).await;
    assert_eq!(resume, 100);
    assert_eq!(connector.dial_count(), 2);
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(last_sync_id(&*store), 100);

    second.send(&batch(1, 2, 101..=101));
    second.send(&batch(2, 2, 102..=105));
    wait_until(|| last_sync_id(&*store) == 105).await;
    assert_eq!(store.count().unwrap(), 5);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn misnumbered_batch_and_broken_update_force_resync() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut first = accept(&mut server).await;
    expect_handshake(&mut first).await;
    first.send(&batch(3, 2, 1..=2));

    let mut second = accept(&mut server).await;
    let (_, resume) = expect_handshake(&mut second).await;
    assert_eq!(resume, 0);
    second.send_raw(r#"{"type":"realtime_update","note":{"content":"no id"}}"#);

    let mut third = accept(&mut server).await;
    expect_handshake(&mut third).await;
    assert_eq!(connector.dial_count(), 3);
    assert_eq!(store.count().unwrap(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (connector, mut server) = MockConnector::new();
    let reconciler = Arc::new(SyncReconciler::new(store));
    let handle = SyncClient::spawn(
        config().with_reconnect_delay(Duration::from_millis(200)),
        connector.clone(),
        reconciler,
    )
    .unwrap();
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    peer.close();
    handle
        .wait_for_state(SessionState::Disconnected, WAIT)
        .await
        .unwrap();

    handle.disconnect().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(connector.dial_count(), 1);
    assert_eq!(handle.state(), SessionState::Disconnected);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_dials_are_retried() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (handle, connector, mut server) = spawn_client(store);
    connector.fail_next_dials(2);
    handle.connect().unwrap();

    let mut peer = accept(&mut server).await;
    expect_handshake(&mut peer).await;
    assert_eq!(connector.dial_count(), 3);

    handle.shutdown().await.unwrap();
}

/// Store whose next commit fails once armed.
struct FlakyStore {
    inner: Store,
    fail_next_commit: AtomicBool,
}

impl NoteStore for FlakyStore {
    fn commit(&self, commit: Commit) -> StorageResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.commit(commit)
    }

    fn get(&self, id: i64) -> StorageResult<Option<Note>> {
        self.inner.get(id)
    }

    fn list_recent(&self, limit: usize) -> StorageResult<Vec<Note>> {
        self.inner.list_recent(limit)
    }

    fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<Note>> {
        self.inner.search(query, limit)
    }

    fn count(&self) -> StorageResult<usize> {
        self.inner.count()
    }

    fn sync_state(&self) -> StorageResult<Option<SyncState>> {
        self.inner.sync_state()
    }

    fn delete_all(&self, reset_sync_state: bool) -> StorageResult<()> {
        self.inner.delete_all(reset_sync_state)
    }

    fn reset_sync_state(&self) -> StorageResult<()> {
        self.inner.reset_sync_state()
    }

    fn client_id(&self) -> Uuid {
        self.inner.client_id()
    }
}

#[tokio::test]
async fn storage_failure_resyncs_from_durable_watermark() {
    let store = Arc::new(FlakyStore {
        inner: Store::in_memory().unwrap(),
        fail_next_commit: AtomicBool::new(false),
    });
    let (handle, _connector, mut server) = spawn_client(Arc::clone(&store));
    handle.connect().unwrap();

    let mut first = accept(&mut server).await;
    expect_handshake(&mut first).await;
    first.send(&batch(1, 3, 1..=5));
    wait_until(|| last_sync_id(&*store) == 5).await;

    store.fail_next_commit.store(true, Ordering::SeqCst);
    first.send(&batch(2, 3, 6..=10));
    // Must not be checkpointed past the notes that failed to land.
    first.send(&batch(3, 3, 11..=15));

    let mut second = accept(&mut server).await;
    let (_, resume) = expect_handshake(&mut second).await;
    assert_eq!(resume, 5);
    assert_eq!(store.count().unwrap(), 5);
    assert!(handle.stats().last_error.is_some());

    second.send(&batch(1, 2, 6..=10));
    second.send(&batch(2, 2, 11..=15));
    wait_until(|| last_sync_id(&*store) == 15).await;
    assert_eq!(store.count().unwrap(), 15);

    handle.shutdown().await.unwrap();
}
