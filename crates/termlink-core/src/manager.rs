// ── Connection Manager ──
//
// Single source of truth for "is there a live channel, and who is
// listening to it". Owns the active adapter, the reconnect state machine
// and the subscriber list. All I/O runs on spawned tasks; the public
// operations never block and report failures to subscribers as events.

use std::any::Any;
use std::collections::HashMap;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Value, json};
use termlink_api::{Channel, ChannelEvent, ChannelSender, Method, OneShotPath, Transport};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::error::CoreError;
use crate::factory::TransportFactory;
use crate::model::{
    ConnectionMode, ConnectionState, ErrorEvent, EventPayload, ModeKind, SubscriptionId,
    TerminalEvent,
};
use crate::normalize::{normalize_event, now_rfc3339};

/// Subscriber callback. Receives each event by reference.
pub type Callback = Arc<dyn Fn(&TerminalEvent) + Send + Sync>;

// ── Internal state ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ReconnectState {
    attempts: u32,
    timer: Option<CancellationToken>,
    reconnecting: bool,
}

enum Link {
    Idle,
    Connecting {
        cancel: CancellationToken,
    },
    Open {
        sender: ChannelSender,
        cancel: CancellationToken,
    },
}

struct Shared {
    mode: ConnectionMode,
    transport: Option<Arc<dyn Transport>>,
    subscribers: IndexMap<SubscriptionId, Callback>,
    link: Link,
    reconnect: ReconnectState,
    /// Bumped on every attempt and teardown; tasks holding an older value are stale.
    generation: u64,
    pending: HashMap<String, oneshot::Sender<Value>>,
}

impl Shared {
    fn current_transport(
        &mut self,
        factory: &dyn TransportFactory,
    ) -> Result<Arc<dyn Transport>, CoreError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        let transport = factory.build(&self.mode)?;
        self.transport = Some(Arc::clone(&transport));
        Ok(transport)
    }

    fn outbox(&self, events: Vec<TerminalEvent>) -> Outbox {
        Outbox {
            callbacks: self
                .subscribers
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect(),
            events,
        }
    }

    /// Dropping the senders wakes every waiter with `NotConnected`.
    fn fail_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "failing pending channel requests");
            self.pending.clear();
        }
    }
}

/// Events ready for delivery, with the subscriber list they go to.
/// Delivered only after the state lock is released.
#[must_use]
struct Outbox {
    callbacks: Vec<(SubscriptionId, Callback)>,
    events: Vec<TerminalEvent>,
}

impl Outbox {
    fn empty() -> Self {
        Self {
            callbacks: Vec::new(),
            events: Vec::new(),
        }
    }

    fn deliver(self) {
        for event in &self.events {
            for (id, callback) in &self.callbacks {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    error!(
                        subscription = %id,
                        panic = panic_message(panic.as_ref()),
                        "subscriber callback panicked"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn error_event(err: &CoreError, mode: ModeKind, fatal: bool) -> TerminalEvent {
    TerminalEvent::now(EventPayload::Error(ErrorEvent {
        kind: err.kind(),
        message: err.to_string(),
        mode,
        fatal,
    }))
}

// ── ConnectionManager ────────────────────────────────────────────────

/// Owns one persistent channel to one terminal and fans its events out.
///
/// Cheaply cloneable; all clones share the same channel. Must be used from
/// within a Tokio runtime: `connect` and the reconnect timer spawn tasks.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn TransportFactory>,
    config: ManagerConfig,
    state: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Shared {
            mode: config.mode.clone(),
            transport: None,
            subscribers: IndexMap::new(),
            link: Link::Idle,
            reconnect: ReconnectState::default(),
            generation: 0,
            pending: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                state,
                shared: Mutex::new(shared),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &Arc<dyn TransportFactory> {
        &self.inner.factory
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn mode(&self) -> ConnectionMode {
        self.inner.lock().mode.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Reconnect attempts made since the channel was last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect.attempts
    }

    /// `true` while a reconnect timer is pending.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.lock().reconnect.reconnecting
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().link, Link::Open { .. })
    }

    /// `true` if the open channel was produced by `transport`.
    pub fn is_open_on(&self, transport: &Arc<dyn Transport>) -> bool {
        let shared = self.inner.lock();
        matches!(shared.link, Link::Open { .. })
            && shared
                .transport
                .as_ref()
                .is_some_and(|current| same_transport(current, transport))
    }

    /// The adapter serving the current mode, built on first use.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, CoreError> {
        let mut shared = self.inner.lock();
        shared.current_transport(self.inner.factory.as_ref())
    }

    // ── Subscription lifecycle ───────────────────────────────────────

    /// Register `callback` and open the channel if nothing is open or
    /// being opened. Returns immediately.
    ///
    /// # Panics
    ///
    /// Opening spawns onto the current Tokio runtime, so the first
    /// subscription must be registered from within one.
    pub fn connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TerminalEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let mut shared = self.inner.lock();
        shared.subscribers.insert(id, Arc::new(callback));
        debug!(subscription = %id, subscribers = shared.subscribers.len(), "subscriber added");

        let idle = matches!(shared.link, Link::Idle) && shared.reconnect.timer.is_none();
        if !idle {
            return id;
        }

        shared.reconnect = ReconnectState::default();
        let outbox = self.inner.start_attempt(&mut shared);
        drop(shared);
        outbox.deliver();
        id
    }

    /// Remove one subscription, or all of them with `None`. The channel is
    /// torn down once no subscription remains.
    pub fn disconnect(&self, id: Option<SubscriptionId>) {
        let mut shared = self.inner.lock();
        match id {
            Some(id) => {
                if shared.subscribers.shift_remove(&id).is_none() {
                    debug!(subscription = %id, "unknown subscription");
                    return;
                }
                if !shared.subscribers.is_empty() {
                    debug!(subscription = %id, remaining = shared.subscribers.len(), "subscriber removed");
                    return;
                }
            }
            None => shared.subscribers.clear(),
        }
        self.inner.teardown(&mut shared);
        info!("no subscribers remain, channel closed");
    }

    /// Switch to `mode`. Returns `false`, touching nothing, when it equals
    /// the current mode. Subscriptions survive; the channel is not reopened.
    pub fn set_mode(&self, mode: ConnectionMode) -> bool {
        let mut shared = self.inner.lock();
        if shared.mode == mode {
            return false;
        }

        self.inner.teardown(&mut shared);
        let previous = mem::replace(&mut shared.mode, mode.clone());
        let old_transport = shared.transport.take();

        let notice = match (&previous, &mode) {
            (ConnectionMode::Local { .. }, ConnectionMode::Remote { terminal_id }) => {
                old_transport.map(|transport| {
                    let server_url = self.inner.config.relay_url.as_ref().map(ToString::to_string);
                    (
                        transport,
                        json!({
                            "mode": "remote",
                            "server_url": server_url,
                            "terminal_id": terminal_id.get(),
                        }),
                    )
                })
            }
            (ConnectionMode::Remote { .. }, ConnectionMode::Local { .. }) => shared
                .current_transport(self.inner.factory.as_ref())
                .ok()
                .map(|transport| (transport, json!({ "mode": "local" }))),
            _ => None,
        };
        drop(shared);

        info!(from = %previous, to = %mode, "connection mode changed");
        if let Some((transport, body)) = notice {
            notify_switch(transport, body);
        }
        true
    }

    // ── Channel operations ───────────────────────────────────────────

    /// Ask the terminal to push a fresh status snapshot. `false` (with a
    /// warning) when no channel is open.
    pub fn request_status_update(&self) -> bool {
        let shared = self.inner.lock();
        let (Link::Open { sender, .. }, Some(transport)) = (&shared.link, &shared.transport) else {
            warn!("status update requested with no open channel");
            return false;
        };
        match sender.try_send(transport.status_request_frame()) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "status update request not sent");
                false
            }
        }
    }

    /// Send `{type:"request", request, request_id, params}` on the open
    /// channel and wait for the frame carrying the same `request_id`.
    pub async fn channel_request(
        &self,
        name: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CoreError> {
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let sender = {
            let mut shared = self.inner.lock();
            let Link::Open { sender, .. } = &shared.link else {
                return Err(CoreError::NotConnected);
            };
            let sender = sender.clone();
            shared.pending.insert(request_id.clone(), tx);
            sender
        };

        let frame = json!({
            "type": "request",
            "request": name,
            "request_id": request_id,
            "params": params,
            "timestamp": now_rfc3339(),
        });
        debug!(request = name, %request_id, "sending channel request");

        if let Err(e) = sender.send(frame).await {
            self.inner.lock().pending.remove(&request_id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply_payload(reply),
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => {
                self.inner.lock().pending.remove(&request_id);
                warn!(request = name, %request_id, "channel request timed out");
                Err(CoreError::RequestTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Extract the answer from a correlated reply frame.
fn reply_payload(reply: Value) -> Result<Value, CoreError> {
    if reply.get("success").and_then(Value::as_bool) == Some(false)
        || reply.get("error").is_some_and(Value::is_string)
    {
        let message = reply
            .get("error")
            .or_else(|| reply.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_owned();
        return Err(CoreError::Rejected { message });
    }
    Ok(match reply {
        Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    })
}

/// Best-effort notice to the local terminal that the mode changed.
fn notify_switch(transport: Arc<dyn Transport>, body: Value) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("no runtime, skipping switch_mode notification");
        return;
    };
    handle.spawn(async move {
        match transport
            .send_one_shot(OneShotPath::SwitchMode, Method::POST, Some(body))
            .await
        {
            Ok(_) => info!("local terminal notified of mode switch"),
            Err(e) => warn!(error = %e, "switch_mode notification failed (non-fatal)"),
        }
    });
}

// ── State machine ────────────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state");
        }
    }

    /// Idle/Reconnecting → Connecting. Spawns the task that opens and then
    /// pumps the channel.
    fn start_attempt(self: &Arc<Self>, shared: &mut Shared) -> Outbox {
        let transport = match shared.current_transport(self.factory.as_ref()) {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, mode = %shared.mode, "no adapter for mode");
                shared.link = Link::Idle;
                self.set_state(ConnectionState::Idle);
                return shared.outbox(vec![error_event(&e, shared.mode.kind(), true)]);
            }
        };

        shared.generation += 1;
        let generation = shared.generation;
        let cancel = CancellationToken::new();
        shared.link = Link::Connecting {
            cancel: cancel.clone(),
        };
        self.set_state(ConnectionState::Connecting);
        info!(mode = %shared.mode, generation, "opening channel");

        tokio::spawn(Arc::clone(self).run_channel(generation, transport, cancel));
        Outbox::empty()
    }

    async fn run_channel(
        self: Arc<Self>,
        generation: u64,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) {
        let mode = transport.mode_kind();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = transport.open() => result,
        };

        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                let err = CoreError::from_api(mode, e);
                warn!(error = %err, "channel open failed");
                self.on_lost(generation, &err, false);
                return;
            }
        };

        if !self.on_open(generation, &channel, transport.as_ref()) {
            return;
        }

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    channel.close();
                    return;
                }
                event = channel.next() => match event {
                    Some(ChannelEvent::Frame(frame)) => self.on_frame(generation, &frame, mode),
                    Some(ChannelEvent::Closed(reason)) => {
                        let message = match reason.code {
                            Some(code) => format!("channel closed ({code}): {}", reason.reason),
                            None => format!("channel closed: {}", reason.reason),
                        };
                        let err = CoreError::TransportUnreachable { mode: Some(mode), message };
                        self.on_lost(generation, &err, true);
                        return;
                    }
                    None => {
                        let err = CoreError::TransportUnreachable {
                            mode: Some(mode),
                            message: "channel ended".into(),
                        };
                        self.on_lost(generation, &err, true);
                        return;
                    }
                }
            }
        }
    }

    /// Connecting → Open. Returns `false` if this attempt is stale, in
    /// which case the caller drops (and thereby closes) the channel.
    fn on_open(&self, generation: u64, channel: &Channel, transport: &dyn Transport) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!(generation, "discarding channel from stale attempt");
            return false;
        }

        let cancel = match mem::replace(&mut shared.link, Link::Idle) {
            Link::Connecting { cancel } | Link::Open { cancel, .. } => cancel,
            Link::Idle => channel.close_token(),
        };
        let sender = channel.sender();
        if let Err(e) = sender.try_send(transport.status_request_frame()) {
            debug!(error = %e, "initial status request not sent");
        }
        shared.link = Link::Open { sender, cancel };
        shared.reconnect = ReconnectState::default();
        self.set_state(ConnectionState::Open);
        info!(mode = %shared.mode, "channel open");

        let outbox = shared.outbox(vec![TerminalEvent::now(EventPayload::Connection {
            connected: true,
            mode: transport.mode_kind(),
            reason: None,
        })]);
        drop(shared);
        outbox.deliver();
        true
    }

    fn on_frame(&self, generation: u64, frame: &Value, mode: ModeKind) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }

        if let Some(request_id) = frame.get("request_id").and_then(Value::as_str) {
            if let Some(waiter) = shared.pending.remove(request_id) {
                let _ = waiter.send(frame.clone());
                return;
            }
        }

        if frame.get("type").and_then(Value::as_str).is_none() {
            debug!(%frame, "dropping untyped frame");
            return;
        }

        let outbox = shared.outbox(vec![normalize_event(frame, mode)]);
        drop(shared);
        outbox.deliver();
    }

    /// Unexpected closure or failed open. Schedules the next attempt, or
    /// gives up once the policy is exhausted.
    fn on_lost(self: &Arc<Self>, generation: u64, err: &CoreError, was_open: bool) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }

        shared.generation += 1;
        shared.link = Link::Idle;
        shared.fail_pending();

        let mode = shared.mode.kind();
        let mut events = Vec::with_capacity(3);
        if was_open {
            events.push(TerminalEvent::now(EventPayload::Connection {
                connected: false,
                mode,
                reason: Some(err.to_string()),
            }));
        }
        events.push(error_event(err, mode, false));

        let policy = self.config.reconnect;
        if shared.subscribers.is_empty() {
            shared.reconnect = ReconnectState::default();
            self.set_state(ConnectionState::Idle);
        } else if shared.reconnect.attempts >= policy.max_attempts {
            let attempts = shared.reconnect.attempts;
            shared.reconnect.reconnecting = false;
            shared.reconnect.timer = None;
            self.set_state(ConnectionState::Idle);
            error!(attempts, "reconnect attempts exhausted");
            events.push(error_event(
                &CoreError::ReconnectExhausted { attempts },
                mode,
                true,
            ));
        } else {
            shared.reconnect.attempts += 1;
            let attempt = shared.reconnect.attempts;
            let delay = policy.delay_for(attempt);
            let timer = CancellationToken::new();
            shared.reconnect.timer = Some(timer.clone());
            shared.reconnect.reconnecting = true;
            self.set_state(ConnectionState::Reconnecting { attempt });
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );
            tokio::spawn(Arc::clone(self).reconnect_after(shared.generation, delay, timer));
        }

        let outbox = shared.outbox(events);
        drop(shared);
        outbox.deliver();
    }

    async fn reconnect_after(
        self: Arc<Self>,
        generation: u64,
        delay: Duration,
        timer: CancellationToken,
    ) {
        tokio::select! {
            biased;
            () = timer.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let mut shared = self.lock();
        if shared.generation != generation || timer.is_cancelled() {
            return;
        }
        shared.reconnect.timer = None;
        let outbox = self.start_attempt(&mut shared);
        drop(shared);
        outbox.deliver();
    }

    /// Manager-initiated teardown: cancel the timer, close the channel,
    /// fail pending requests, return to Idle.
    fn teardown(&self, shared: &mut Shared) {
        shared.generation += 1;

        let link = mem::replace(&mut shared.link, Link::Idle);
        if let Link::Connecting { cancel } | Link::Open { cancel, .. } = link {
            self.set_state(ConnectionState::Closing);
            cancel.cancel();
        }
        if let Some(timer) = shared.reconnect.timer.take() {
            debug!("cancelling pending reconnect");
            timer.cancel();
        }
        shared.reconnect = ReconnectState::default();
        shared.fail_pending();
        if let Some(transport) = &shared.transport {
            transport.close();
        }
        self.set_state(ConnectionState::Idle);
    }
}
