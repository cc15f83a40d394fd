//! Multi-session tests over the in-process relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gridmesh_client::{
    ClientConfig, FetchError, LoopbackRelay, PayloadSource, SessionHandle, SessionOptions,
    SessionState, StaticPayloadSource, open_session,
};
use gridmesh_types::{ClientId, Identity, Position, SheetData, Selection};

const PATH: &str = "/team/budget.sheet";

/// Counts fetches so tests can tell first openers from joiners.
struct CountingSource {
    sheets: Vec<SheetData>,
    fetches: AtomicUsize,
}

impl CountingSource {
    fn new(sheets: Vec<SheetData>) -> Arc<Self> {
        Arc::new(Self { sheets, fetches: AtomicUsize::new(0) })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadSource for CountingSource {
    async fn fetch(&self, _path: &str, _token: Option<&str>) -> Result<Vec<SheetData>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.sheets.clone())
    }
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        initial_backoff_millis: 10,
        max_backoff_secs: 1,
        ..ClientConfig::default()
    }
}

fn open(relay: &LoopbackRelay, client: u64, payload: Arc<dyn PayloadSource>) -> SessionHandle {
    let options = SessionOptions::new(PATH)
        .with_client_id(ClientId::from_raw(client))
        .with_config(fast_config());
    open_session(options, Arc::new(relay.clone()), payload)
}

fn empty_source() -> Arc<dyn PayloadSource> {
    Arc::new(StaticPayloadSource::empty())
}

/// Poll `check` until it holds, failing after a few seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for: {what}");
}

/// Open a seeded session and wait for the relay to hold its sheets.
async fn open_seeded(relay: &LoopbackRelay, client: u64) -> SessionHandle {
    let session = open(relay, client, empty_source());
    session.wait_synced().await.unwrap();
    let room = session.room();
    eventually("relay holds the seeded sheets", || {
        relay.sheets(&room).is_some_and(|sheets| !sheets.is_empty())
    })
    .await;
    session
}

#[tokio::test]
async fn test_edits_reach_the_other_session() {
    let relay = LoopbackRelay::new();
    let a = open_seeded(&relay, 1).await;
    let b = open(&relay, 2, empty_source());
    b.wait_synced().await.unwrap();
    eventually("joiner receives the sheets", || b.sheets().len() == 1).await;

    a.set_cell(0, 0, 0, "Test").unwrap();
    eventually("edit reaches b", || b.sheets()[0].data[0][0] == "Test").await;

    b.insert_row(0, 0, Some(vec!["top".into()])).unwrap();
    eventually("row insert reaches a", || a.sheets()[0].data[0][0] == "top").await;
    assert_eq!(a.sheets()[0].data[1][0], "Test");
    assert_eq!(a.sheets(), b.sheets());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_only_the_first_opener_fetches() {
    let relay = LoopbackRelay::new();
    let source = CountingSource::new(vec![SheetData::from_rows("inventory", [vec!["sku", "qty"]])]);

    let a = open(&relay, 1, source.clone());
    a.wait_synced().await.unwrap();
    let room = a.room();
    eventually("relay holds the payload", || {
        relay.sheets(&room).is_some_and(|sheets| !sheets.is_empty())
    })
    .await;

    let b = open(&relay, 2, source.clone());
    b.wait_synced().await.unwrap();
    eventually("joiner receives the payload", || !b.sheets().is_empty()).await;

    assert_eq!(source.fetches(), 1);
    assert_eq!(b.sheets()[0].sheet_name, "inventory");
    assert_eq!(b.sheets()[0].data[0][..2], ["sku".to_string(), "qty".to_string()]);
    assert_eq!(b.sheets().len(), 1);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let relay = LoopbackRelay::new();
    let a = open_seeded(&relay, 1).await;
    let b = open(&relay, 2, empty_source());
    b.wait_synced().await.unwrap();
    eventually("joiner receives the sheets", || b.sheets().len() == 1).await;

    a.set_cell(0, 1, 1, "from a").unwrap();
    b.set_cell(0, 2, 2, "from b").unwrap();
    a.insert_column(0, 0, None).unwrap();

    eventually("replicas converge", || {
        let (sa, sb) = (a.sheets(), b.sheets());
        sa == sb && sa[0].data[1][2] == "from a" && sa[0].data[2][3] == "from b"
    })
    .await;

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_presence_appears_and_leaves() {
    let relay = LoopbackRelay::new();
    let a = open_seeded(&relay, 1).await;
    let b = open(&relay, 2, empty_source());
    b.wait_synced().await.unwrap();

    let position = Position { sheet_idx: 0, selection: Selection::cell(3, 4) };
    a.set_selection(Some(position)).unwrap();

    eventually("b sees a's cursor", || {
        b.peers()
            .iter()
            .any(|(id, record)| id.get() == 1 && record.position == Some(position))
    })
    .await;
    eventually("a sees b", || a.peers().iter().any(|(id, _)| id.get() == 2)).await;

    a.close().await;
    eventually("a's cursor disappears", || b.peers().is_empty()).await;
    b.close().await;
}

#[tokio::test]
async fn test_reconnect_after_server_drop() {
    let relay = LoopbackRelay::new();
    let a = open_seeded(&relay, 1).await;
    let b = open(&relay, 2, empty_source());
    b.wait_synced().await.unwrap();
    eventually("joiner receives the sheets", || b.sheets().len() == 1).await;

    let mut state = a.subscribe_state();
    relay.drop_connections(&a.room());
    tokio::time::timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() == SessionState::Synced {
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    // Made while the transport is down; carried by the next handshake.
    a.set_cell(0, 5, 5, "offline").unwrap();

    tokio::time::timeout(Duration::from_secs(5), a.wait_synced())
        .await
        .unwrap()
        .unwrap();
    eventually("offline edit reaches b", || b.sheets()[0].data[5][5] == "offline").await;
    assert!(relay.connect_attempts() >= 4);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_access_token_is_offered() {
    let relay = LoopbackRelay::new();
    let identity = Identity::new("u1", "Ada").with_access_token("secret-token");
    let options = SessionOptions::new(PATH)
        .with_identity(identity)
        .with_config(fast_config());
    let session = open_session(options, Arc::new(relay.clone()), empty_source());
    session.wait_synced().await.unwrap();

    assert_eq!(relay.offered_tokens(), vec![Some("secret-token".to_string())]);
    assert_eq!(session.local_presence().unwrap().user.name, "Ada");
    session.close().await;
}

#[tokio::test]
async fn test_undo_only_reverts_local_changes() {
    let relay = LoopbackRelay::new();
    let a = open_seeded(&relay, 1).await;
    let b = open(&relay, 2, empty_source());
    b.wait_synced().await.unwrap();
    eventually("joiner receives the sheets", || b.sheets().len() == 1).await;

    a.set_cell(0, 0, 0, "mine").unwrap();
    b.set_cell(0, 1, 0, "theirs").unwrap();
    eventually("a sees b's edit", || a.sheets()[0].data[1][0] == "theirs").await;

    assert!(a.undo().unwrap());
    assert_eq!(a.sheets()[0].data[0][0], "");
    assert_eq!(a.sheets()[0].data[1][0], "theirs");
    eventually("undo reaches b", || b.sheets()[0].data[0][0].is_empty()).await;

    a.close().await;
    b.close().await;
}
