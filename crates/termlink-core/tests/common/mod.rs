// In-process doubles for the manager and dispatcher tests: a transport
// whose channel is a `Channel::pair` the test drives, and a factory that
// hands out one such transport per mode kind.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use termlink_api::{
    Channel, ChannelEvent, ChannelPeer, CommandStyle, Conventions, Error, Method, ModeKind,
    OneShotPath, ReadRoute, Transport,
};
use termlink_core::{
    ConnectionManager, ConnectionMode, CoreError, ManagerConfig, TerminalEvent, TransportFactory,
};

// ── FakeTransport ───────────────────────────────────────────────────

pub struct FakeTransport {
    kind: ModeKind,
    refuse: AtomicBool,
    peers: mpsc::UnboundedSender<ChannelPeer>,
    opens: Mutex<Vec<Instant>>,
    calls: Mutex<Vec<(OneShotPath, Method, Option<Value>)>>,
    replies: Mutex<HashMap<OneShotPath, VecDeque<Result<Value, Error>>>>,
    closes: AtomicUsize,
}

impl FakeTransport {
    pub fn new(kind: ModeKind) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            kind,
            refuse: AtomicBool::new(false),
            peers,
            opens: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            closes: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Make every subsequent `open` fail (or succeed again).
    pub fn refuse_opens(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(OneShotPath, Method, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: OneShotPath) -> Vec<Option<Value>> {
        self.calls()
            .into_iter()
            .filter(|(p, _, _)| *p == path)
            .map(|(_, _, body)| body)
            .collect()
    }

    /// Queue the answer for the next one-shot call to `path`. Unscripted
    /// calls answer `{"ok": true}`.
    pub fn reply(&self, path: OneShotPath, reply: Result<Value, Error>) {
        self.replies
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .push_back(reply);
    }
}

impl Transport for FakeTransport {
    fn mode_kind(&self) -> ModeKind {
        self.kind
    }

    fn conventions(&self) -> Conventions {
        match self.kind {
            ModeKind::Local => Conventions {
                commands: CommandStyle::ControlAction,
                status: ReadRoute::Endpoint,
                config: ReadRoute::Endpoint,
                logs: ReadRoute::Endpoint,
            },
            ModeKind::Remote => Conventions {
                commands: CommandStyle::CommandEnvelope,
                status: ReadRoute::EndpointOrRequest,
                config: ReadRoute::Request,
                logs: ReadRoute::EndpointOrRequest,
            },
        }
    }

    fn open(&self) -> BoxFuture<'_, Result<Channel, Error>> {
        Box::pin(async move {
            self.opens.lock().unwrap().push(Instant::now());
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::WebSocketConnect("connection refused".into()));
            }
            let (channel, peer) = Channel::pair();
            let _ = self.peers.send(peer);
            Ok(channel)
        })
    }

    fn send_one_shot(
        &self,
        path: OneShotPath,
        method: Method,
        body: Option<Value>,
    ) -> BoxFuture<'_, Result<Value, Error>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push((path, method, body));
            self.replies
                .lock()
                .unwrap()
                .get_mut(&path)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(json!({"ok": true})))
        })
    }

    fn status_request_frame(&self) -> Value {
        json!({"type": "request_status"})
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── FakeFactory ─────────────────────────────────────────────────────

pub struct FakeFactory {
    pub local: Arc<FakeTransport>,
    pub remote: Arc<FakeTransport>,
}

impl TransportFactory for FakeFactory {
    fn build(&self, mode: &ConnectionMode) -> Result<Arc<dyn Transport>, CoreError> {
        Ok(match mode {
            ConnectionMode::Local { .. } => Arc::clone(&self.local) as Arc<dyn Transport>,
            ConnectionMode::Remote { .. } => Arc::clone(&self.remote) as Arc<dyn Transport>,
        })
    }
}

/// Everything a test needs to drive a manager end to end.
pub struct Harness {
    pub manager: ConnectionManager,
    pub local: Arc<FakeTransport>,
    pub remote: Arc<FakeTransport>,
    pub local_peers: mpsc::UnboundedReceiver<ChannelPeer>,
    pub remote_peers: mpsc::UnboundedReceiver<ChannelPeer>,
}

impl Harness {
    pub fn new(mode: ConnectionMode) -> Self {
        let (local, local_peers) = FakeTransport::new(ModeKind::Local);
        let (remote, remote_peers) = FakeTransport::new(ModeKind::Remote);
        let factory = Arc::new(FakeFactory {
            local: Arc::clone(&local),
            remote: Arc::clone(&remote),
        });
        let config = ManagerConfig {
            mode,
            relay_url: Some("https://relay.example/".parse().unwrap()),
            ..ManagerConfig::default()
        };
        Self {
            manager: ConnectionManager::new(config, factory),
            local,
            remote,
            local_peers,
            remote_peers,
        }
    }
}

// ── Event capture ───────────────────────────────────────────────────

/// A subscriber that forwards every event to a channel.
pub fn recorder() -> (
    impl Fn(&TerminalEvent) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<TerminalEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event: &TerminalEvent| {
            let _ = tx.send(event.clone());
        },
        rx,
    )
}

/// Next event, failing the test if none arrives within a minute of
/// (possibly paused) time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TerminalEvent>) -> TerminalEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no event within 60s")
        .expect("recorder dropped")
}

pub async fn next_peer(rx: &mut mpsc::UnboundedReceiver<ChannelPeer>) -> ChannelPeer {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no channel opened within 60s")
        .expect("transport dropped")
}

/// Next outbound frame the manager wrote to `peer`.
pub async fn next_outbound(peer: &mut ChannelPeer) -> Value {
    tokio::time::timeout(Duration::from_secs(60), peer.outbound.recv())
        .await
        .expect("nothing sent within 60s")
        .expect("channel sender dropped")
}

pub async fn push_frame(peer: &ChannelPeer, frame: Value) {
    peer.events.send(ChannelEvent::Frame(frame)).await.unwrap();
}

/// Poll until `check` holds, letting spawned tasks run in between.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
