//! The session driver: one long-lived duplex connection per
//! (event, agent type).
//!
//! Flow:
//! 1. `connect()` dials the transport, sends the session configuration,
//!    and waits for `session.created`
//! 2. The run loop routes inbound events to the attached sink, drains the
//!    send queue (at most one response-expecting send in flight), and
//!    heartbeats
//! 3. On transport drop the loop reconnects with jittered back-off; an
//!    unacknowledged response-expecting send is re-queued at the front
//! 4. `close()` cancels everything and discards the queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sh_domain::{AgentType, Error, Result, SessionStatus};

use crate::protocol::{ClientEvent, ServerEvent, SessionSetup};
use crate::reconnect::ReconnectBackoff;
use crate::transport::{SessionTransport, TransportPipe};

/// Lifecycle hook: one callback per status transition.
pub type StatusHook = Arc<dyn Fn(AgentType, SessionStatus, Option<String>) + Send + Sync>;

/// Inbound event sink. Returns `false` when the receiver could not accept
/// the event (runtime mailbox full) — the driver counts the drop.
pub type EventSink = Arc<dyn Fn(AgentType, ServerEvent) -> bool + Send + Sync>;

/// Opaque audio handed through to the provider.
#[derive(Debug, Clone)]
pub struct AudioAppend {
    pub audio_base64: String,
    pub is_final: bool,
    pub sample_rate: Option<u32>,
    pub encoding: Option<String>,
    pub duration_ms: Option<u64>,
    pub speaker: Option<String>,
}

#[derive(Clone)]
pub struct DriverConfig {
    pub agent_type: AgentType,
    pub setup: SessionSetup,
    pub send_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub backoff: ReconnectBackoff,
}

const QUEUE_CAPACITY: usize = 256;
const CREATED_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MISSED_PONGS: u32 = 2;

struct QueuedSend {
    event: ClientEvent,
    response_expected: bool,
}

struct Inner {
    config: DriverConfig,
    transport: Arc<dyn SessionTransport>,
    status_hook: StatusHook,
    event_sink: Mutex<Option<EventSink>>,
    status_tx: watch::Sender<SessionStatus>,
    session_id: Mutex<Option<String>>,
    paused: Mutex<bool>,
    queue: Mutex<VecDeque<QueuedSend>>,
    queue_notify: Notify,
    cancel: CancellationToken,
    dropped_events: AtomicU64,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A long-lived duplex session to the upstream model.
#[derive(Clone)]
pub struct SessionDriver {
    inner: Arc<Inner>,
}

impl SessionDriver {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        config: DriverConfig,
        status_hook: StatusHook,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Created);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                status_hook,
                event_sink: Mutex::new(None),
                status_tx,
                session_id: Mutex::new(None),
                paused: Mutex::new(false),
                queue: Mutex::new(VecDeque::new()),
                queue_notify: Notify::new(),
                cancel: CancellationToken::new(),
                dropped_events: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    // ── public surface ───────────────────────────────────────────────

    pub fn agent_type(&self) -> AgentType {
        self.inner.config.agent_type
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().clone()
    }

    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped_events.load(Ordering::Relaxed)
    }

    /// Attach (or replace) the inbound event sink.
    pub fn set_event_sink(&self, sink: EventSink) {
        *self.inner.event_sink.lock() = Some(sink);
    }

    pub fn has_event_sink(&self) -> bool {
        self.inner.event_sink.lock().is_some()
    }

    /// Establish the session. Idempotent: an already-active driver
    /// returns the existing provider session id.
    pub async fn connect(&self) -> Result<String> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Fatal("driver is closed".into()));
        }
        if self.status() == SessionStatus::Active {
            if let Some(id) = self.session_id() {
                return Ok(id);
            }
        }
        self.ensure_run_task();
        self.wait_for_active().await
    }

    /// Suppress outbound sends; inbound drain continues.
    pub fn pause(&self) {
        *self.inner.paused.lock() = true;
        if self.status() == SessionStatus::Active {
            set_status(&self.inner, SessionStatus::Paused);
        }
    }

    /// Return to active. The run loop keeps the connection during pause,
    /// so this usually just reopens the outbound gate; if the transport
    /// dropped meanwhile, the loop is already reconnecting and we wait.
    pub async fn resume(&self) -> Result<String> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Fatal("driver is closed".into()));
        }
        *self.inner.paused.lock() = false;
        if self.status() == SessionStatus::Paused {
            set_status(&self.inner, SessionStatus::Active);
        }
        self.inner.queue_notify.notify_one();
        self.ensure_run_task();
        self.wait_for_active().await
    }

    /// Terminal: cancel the run loop and discard the pending queue.
    pub fn close(&self) {
        if self.status().is_terminal() {
            return;
        }
        set_status(&self.inner, SessionStatus::Closing);
        self.inner.cancel.cancel();
        let discarded = {
            let mut queue = self.inner.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if discarded > 0 {
            tracing::debug!(
                agent_type = %self.agent_type(),
                discarded,
                "discarded pending sends on close"
            );
        }
        set_status(&self.inner, SessionStatus::Closed);
    }

    /// Enqueue a message. `response_expected` sends are serialized: the
    /// next one leaves the queue only after the previous `response.done`
    /// (or its timeout-cancel).
    pub fn send(&self, event: ClientEvent, response_expected: bool) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Fatal("driver is closed".into()));
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= QUEUE_CAPACITY {
                return Err(Error::Busy(format!(
                    "{} session queue full",
                    self.agent_type()
                )));
            }
            queue.push_back(QueuedSend {
                event,
                response_expected,
            });
        }
        self.inner.queue_notify.notify_one();
        Ok(())
    }

    /// Stream opaque audio (transcript drivers only).
    pub fn append_audio_chunk(&self, append: AudioAppend) -> Result<()> {
        self.send(
            ClientEvent::InputAudioAppend {
                audio: append.audio_base64,
                sample_rate: append.sample_rate,
                encoding: append.encoding,
                speaker: append.speaker,
                duration_ms: append.duration_ms,
            },
            false,
        )?;
        if append.is_final {
            self.send(ClientEvent::InputAudioCommit, false)?;
        }
        Ok(())
    }

    // ── internals ────────────────────────────────────────────────────

    fn ensure_run_task(&self) {
        let mut task = self.inner.task.lock();
        let running = task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        if !running {
            let inner = self.inner.clone();
            *task = Some(tokio::spawn(run_loop(inner)));
        }
    }

    async fn wait_for_active(&self) -> Result<String> {
        let mut rx = self.inner.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            match status {
                SessionStatus::Active => {
                    return self
                        .session_id()
                        .ok_or_else(|| Error::Fatal("active session without an id".into()));
                }
                SessionStatus::Error => {
                    return Err(Error::Session {
                        agent_type: self.agent_type().to_string(),
                        message: "session failed to connect".into(),
                    });
                }
                SessionStatus::Closed => {
                    return Err(Error::Fatal("driver closed while connecting".into()));
                }
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| Error::Fatal("driver state channel closed".into()))?;
        }
    }
}

fn set_status(inner: &Arc<Inner>, status: SessionStatus) {
    let changed = {
        let current = *inner.status_tx.borrow();
        // Closed is terminal; a racing run-loop transition must not
        // revive the driver.
        !current.is_terminal() && current != status
    };
    if changed {
        let _ = inner.status_tx.send(status);
        let session_id = inner.session_id.lock().clone();
        (inner.status_hook)(inner.config.agent_type, status, session_id);
    }
}

fn forward_event(inner: &Arc<Inner>, event: ServerEvent) {
    let sink = inner.event_sink.lock().clone();
    match sink {
        Some(sink) => {
            if !sink(inner.config.agent_type, event) {
                let dropped = inner.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    agent_type = %inner.config.agent_type,
                    dropped,
                    "runtime mailbox rejected inbound session event"
                );
            }
        }
        None => {
            tracing::debug!(
                agent_type = %inner.config.agent_type,
                "inbound event before handler attach, ignoring"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_loop(inner: Arc<Inner>) {
    let mut attempt: u32 = 0;

    'outer: loop {
        if inner.cancel.is_cancelled() {
            break;
        }
        set_status(&inner, SessionStatus::Connecting);

        let connected = tokio::select! {
            result = inner.transport.connect() => result,
            _ = inner.cancel.cancelled() => break 'outer,
        };
        let mut pipe = match connected {
            Ok(pipe) => pipe,
            Err(e) => {
                if !backoff_or_fail(&inner, &mut attempt, &e).await {
                    break 'outer;
                }
                continue;
            }
        };

        // Initial configuration, then wait for session.created.
        let setup = ClientEvent::SessionUpdate {
            session: inner.config.setup.clone(),
        };
        if send_frame(&pipe, &setup).await.is_err() {
            if !backoff_or_fail(&inner, &mut attempt, &Error::Http("setup send failed".into()))
                .await
            {
                break 'outer;
            }
            continue;
        }

        let session_id = match wait_for_created(&inner, &mut pipe).await {
            Some(id) => id,
            None => {
                if !backoff_or_fail(
                    &inner,
                    &mut attempt,
                    &Error::Timeout("session.created".into()),
                )
                .await
                {
                    break 'outer;
                }
                continue;
            }
        };

        *inner.session_id.lock() = Some(session_id.clone());
        attempt = 0;
        if *inner.paused.lock() {
            set_status(&inner, SessionStatus::Paused);
        } else {
            set_status(&inner, SessionStatus::Active);
        }
        tracing::info!(
            agent_type = %inner.config.agent_type,
            session_id = %session_id,
            "session established"
        );

        // Unacked response-expecting send carried across reconnects.
        let mut inflight: Option<(QueuedSend, Instant)> = None;

        match connection_loop(&inner, &mut pipe, &mut inflight).await {
            LoopExit::Cancelled => break 'outer,
            LoopExit::Reconnect => {
                // Re-queue the send whose response.done never arrived.
                if let Some((item, _)) = inflight.take() {
                    inner.queue.lock().push_front(item);
                }
                set_status(&inner, SessionStatus::Error);
                tracing::warn!(
                    agent_type = %inner.config.agent_type,
                    "session transport lost, reconnecting"
                );
            }
        }
    }

    if !inner.cancel.is_cancelled() {
        // Reconnects exhausted: fatal.
        set_status(&inner, SessionStatus::Error);
    }
}

enum LoopExit {
    Cancelled,
    Reconnect,
}

async fn connection_loop(
    inner: &Arc<Inner>,
    pipe: &mut TransportPipe,
    inflight: &mut Option<(QueuedSend, Instant)>,
) -> LoopExit {
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + inner.config.heartbeat_interval,
        inner.config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut awaiting_pong = false;
    let mut missed_pongs: u32 = 0;

    loop {
        // Transmit whatever the queue allows before sleeping.
        if drain_queue(inner, pipe, inflight).await.is_err() {
            return LoopExit::Reconnect;
        }

        let inflight_deadline = inflight
            .as_ref()
            .map(|(_, started)| *started + inner.config.send_timeout);

        tokio::select! {
            biased;

            _ = inner.cancel.cancelled() => return LoopExit::Cancelled,

            inbound = pipe.inbound.recv() => {
                let Some(text) = inbound else {
                    return LoopExit::Reconnect;
                };
                match route_inbound(inner, &text) {
                    Routed::ResponseDone => {
                        *inflight = None;
                    }
                    Routed::Pong => {
                        awaiting_pong = false;
                        missed_pongs = 0;
                    }
                    Routed::SessionId(id) => {
                        *inner.session_id.lock() = Some(id);
                    }
                    Routed::Other => {}
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    missed_pongs += 1;
                    if missed_pongs >= MAX_MISSED_PONGS {
                        tracing::warn!(
                            agent_type = %inner.config.agent_type,
                            missed_pongs,
                            "heartbeat lost, forcing reconnect"
                        );
                        return LoopExit::Reconnect;
                    }
                }
                let ping = ClientEvent::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                if send_frame(pipe, &ping).await.is_err() {
                    return LoopExit::Reconnect;
                }
                awaiting_pong = true;
            }

            _ = inner.queue_notify.notified() => {
                // Fall through to the drain at the top of the loop.
            }

            _ = sleep_until_opt(inflight_deadline), if inflight_deadline.is_some() => {
                tracing::warn!(
                    agent_type = %inner.config.agent_type,
                    timeout_ms = inner.config.send_timeout.as_millis() as u64,
                    "response timed out, cancelling and proceeding"
                );
                let _ = send_frame(pipe, &ClientEvent::ResponseCancel).await;
                *inflight = None;
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Transmit whatever the queue allows. Response-expecting sends are
/// serialized (at most one in flight); non-response sends — tool
/// results, audio frames — may overtake an in-flight response, because
/// the model needs the tool result to finish that very response. Pause
/// gates the queue but never inbound routing.
async fn drain_queue(
    inner: &Arc<Inner>,
    pipe: &TransportPipe,
    inflight: &mut Option<(QueuedSend, Instant)>,
) -> Result<()> {
    loop {
        if *inner.paused.lock() {
            return Ok(());
        }
        let item = {
            let mut queue = inner.queue.lock();
            if inflight.is_none() {
                queue.pop_front()
            } else {
                queue
                    .iter()
                    .position(|i| !i.response_expected)
                    .and_then(|idx| queue.remove(idx))
            }
        };
        let Some(item) = item else {
            return Ok(());
        };
        send_frame(pipe, &item.event).await?;
        if item.response_expected {
            *inflight = Some((item, Instant::now()));
        }
    }
}

async fn send_frame(pipe: &TransportPipe, event: &ClientEvent) -> Result<()> {
    let text = serde_json::to_string(event)?;
    pipe.outbound
        .send(text)
        .await
        .map_err(|_| Error::Http("transport outbound closed".into()))
}

enum Routed {
    ResponseDone,
    Pong,
    SessionId(String),
    Other,
}

fn route_inbound(inner: &Arc<Inner>, text: &str) -> Routed {
    let event: ServerEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                agent_type = %inner.config.agent_type,
                error = %e,
                "ignoring unparseable provider event"
            );
            return Routed::Other;
        }
    };

    match event {
        ServerEvent::Pong { .. } => Routed::Pong,
        ServerEvent::SessionCreated { session_id } => {
            // Mid-stream re-announcement; keep the freshest id.
            Routed::SessionId(session_id)
        }
        ServerEvent::SessionUpdated => Routed::Other,
        ServerEvent::ResponseDone => {
            forward_event(inner, ServerEvent::ResponseDone);
            Routed::ResponseDone
        }
        ServerEvent::Error { ref message, ref code } => {
            tracing::warn!(
                agent_type = %inner.config.agent_type,
                code = code.as_deref().unwrap_or("-"),
                "provider error: {message}"
            );
            forward_event(inner, event);
            Routed::Other
        }
        other => {
            forward_event(inner, other);
            Routed::Other
        }
    }
}

async fn wait_for_created(inner: &Arc<Inner>, pipe: &mut TransportPipe) -> Option<String> {
    let deadline = Instant::now() + CREATED_TIMEOUT;
    loop {
        let recv = tokio::time::timeout_at(deadline, pipe.inbound.recv()).await;
        match recv {
            Ok(Some(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::SessionCreated { session_id }) => return Some(session_id),
                Ok(other) => forward_event(inner, other),
                Err(_) => continue,
            },
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Sleep the back-off delay for this attempt. Returns `false` when the
/// driver should give up (fatal) or was cancelled.
async fn backoff_or_fail(inner: &Arc<Inner>, attempt: &mut u32, error: &Error) -> bool {
    if inner.config.backoff.should_give_up(*attempt) {
        tracing::error!(
            agent_type = %inner.config.agent_type,
            attempts = *attempt,
            error = %error,
            "reconnect attempts exhausted"
        );
        return false;
    }
    let delay = inner.config.backoff.delay_for_attempt(*attempt);
    tracing::info!(
        agent_type = %inner.config.agent_type,
        attempt = *attempt + 1,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "reconnecting after transport failure"
    );
    *attempt += 1;
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = inner.cancel.cancelled() => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{PipeEnd, PipeTransport};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn test_config() -> DriverConfig {
        DriverConfig {
            agent_type: AgentType::Cards,
            setup: SessionSetup {
                model: "test-model".into(),
                instructions: "policy".into(),
                tools: vec![],
            },
            send_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(10),
            backoff: ReconnectBackoff {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 3,
            },
        }
    }

    fn noop_hook() -> StatusHook {
        Arc::new(|_, _, _| {})
    }

    /// Accept a connection and perform the provider side of the
    /// handshake: swallow `session.update`, answer `session.created`.
    async fn accept_and_welcome(
        accept_rx: &mut mpsc::Receiver<PipeEnd>,
        session_id: &str,
    ) -> PipeEnd {
        let mut end = accept_rx.recv().await.expect("driver should dial");
        match end.next_client_event().await {
            Some(ClientEvent::SessionUpdate { .. }) => {}
            other => panic!("expected session.update first, got {other:?}"),
        }
        end.send_event(&ServerEvent::SessionCreated {
            session_id: session_id.into(),
        })
        .await;
        end
    }

    #[tokio::test]
    async fn connect_performs_handshake_and_returns_session_id() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let harness = tokio::spawn(async move {
            accept_and_welcome(&mut accept_rx, "sess-1").await
        });

        let id = driver.connect().await.unwrap();
        assert_eq!(id, "sess-1");
        assert_eq!(driver.status(), SessionStatus::Active);
        drop(harness.await.unwrap());
        driver.close();
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let harness = tokio::spawn(async move {
            accept_and_welcome(&mut accept_rx, "sess-1").await
        });

        let first = driver.connect().await.unwrap();
        let second = driver.connect().await.unwrap();
        assert_eq!(first, second);
        drop(harness.await.unwrap());
        driver.close();
    }

    #[tokio::test]
    async fn second_response_send_waits_for_response_done() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let driver_clone = driver.clone();
        let harness = tokio::spawn(async move {
            let mut end = accept_and_welcome(&mut accept_rx, "sess-1").await;

            // Both prompts are enqueued before the provider answers.
            driver_clone
                .send(ClientEvent::ResponseCreate { input: "one".into() }, true)
                .unwrap();
            driver_clone
                .send(ClientEvent::ResponseCreate { input: "two".into() }, true)
                .unwrap();

            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "one"),
                other => panic!("expected first prompt, got {other:?}"),
            }

            // The second must NOT arrive until response.done.
            let premature = tokio::time::timeout(
                Duration::from_millis(100),
                end.next_client_event(),
            )
            .await;
            assert!(premature.is_err(), "second send leaked before response.done");

            end.send_event(&ServerEvent::ResponseDone).await;

            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "two"),
                other => panic!("expected second prompt, got {other:?}"),
            }
        });

        driver.connect().await.unwrap();
        harness.await.unwrap();
        driver.close();
    }

    #[tokio::test]
    async fn tool_results_overtake_an_inflight_response() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let driver_clone = driver.clone();
        let harness = tokio::spawn(async move {
            let mut end = accept_and_welcome(&mut accept_rx, "sess-1").await;

            driver_clone
                .send(ClientEvent::ResponseCreate { input: "prompt".into() }, true)
                .unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { .. }) => {}
                other => panic!("unexpected: {other:?}"),
            }

            // Mid-response the model asked for a tool; the result must
            // flow even though response.done has not arrived yet.
            driver_clone
                .send(
                    ClientEvent::ToolResult {
                        call_id: "t1".into(),
                        output: serde_json::json!([]),
                    },
                    false,
                )
                .unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::ToolResult { call_id, .. }) => assert_eq!(call_id, "t1"),
                other => panic!("tool result stuck behind inflight response: {other:?}"),
            }

            end.send_event(&ServerEvent::ResponseDone).await;
        });

        driver.connect().await.unwrap();
        harness.await.unwrap();
        driver.close();
    }

    #[tokio::test]
    async fn reconnect_resends_unacked_item_only() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let driver_clone = driver.clone();
        let harness = tokio::spawn(async move {
            let mut end = accept_and_welcome(&mut accept_rx, "sess-1").await;

            driver_clone
                .send(ClientEvent::ResponseCreate { input: "acked".into() }, true)
                .unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "acked"),
                other => panic!("unexpected: {other:?}"),
            }
            end.send_event(&ServerEvent::ResponseDone).await;

            driver_clone
                .send(ClientEvent::ResponseCreate { input: "unacked".into() }, true)
                .unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "unacked"),
                other => panic!("unexpected: {other:?}"),
            }

            // Drop the connection with the second prompt unacknowledged.
            drop(end);

            // Driver reconnects; new provider session id.
            let mut end = accept_and_welcome(&mut accept_rx, "sess-2").await;

            // The unacked prompt is re-sent; the acked one is not.
            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "unacked"),
                other => panic!("expected re-sent prompt, got {other:?}"),
            }
            end.send_event(&ServerEvent::ResponseDone).await;
            end
        });

        driver.connect().await.unwrap();
        let _end = harness.await.unwrap();
        assert_eq!(driver.session_id().as_deref(), Some("sess-2"));
        driver.close();
    }

    #[tokio::test]
    async fn pause_suppresses_sends_until_resume() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let driver_clone = driver.clone();
        let harness = tokio::spawn(async move {
            let mut end = accept_and_welcome(&mut accept_rx, "sess-1").await;

            driver_clone.pause();
            driver_clone
                .send(ClientEvent::ResponseCreate { input: "held".into() }, true)
                .unwrap();

            let held = tokio::time::timeout(
                Duration::from_millis(100),
                end.next_client_event(),
            )
            .await;
            assert!(held.is_err(), "paused driver transmitted anyway");

            driver_clone.resume().await.unwrap();
            match end.next_client_event().await {
                Some(ClientEvent::ResponseCreate { input }) => assert_eq!(input, "held"),
                other => panic!("expected held prompt after resume, got {other:?}"),
            }
        });

        driver.connect().await.unwrap();
        harness.await.unwrap();
        driver.close();
    }

    #[tokio::test]
    async fn exhausted_reconnects_surface_error_status() {
        let (transport, _accept_rx) = PipeTransport::new();
        transport.fail_next_connects(10);

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_clone = statuses.clone();
        let hook: StatusHook = Arc::new(move |_, status, _| {
            statuses_clone.lock().push(status);
        });

        let driver = SessionDriver::new(Arc::new(transport), test_config(), hook);
        let result = driver.connect().await;
        assert!(result.is_err());
        assert_eq!(driver.status(), SessionStatus::Error);
        assert!(statuses.lock().contains(&SessionStatus::Error));
    }

    #[tokio::test]
    async fn inbound_events_reach_the_sink() {
        let (transport, mut accept_rx) = PipeTransport::new();
        let driver = SessionDriver::new(Arc::new(transport), test_config(), noop_hook());

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        driver.set_event_sink(Arc::new(move |_, event| {
            if matches!(event, ServerEvent::ResponseTextDone { .. }) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
            true
        }));

        let harness = tokio::spawn(async move {
            let end = accept_and_welcome(&mut accept_rx, "sess-1").await;
            end.send_event(&ServerEvent::ResponseTextDone {
                text: "[]".into(),
            })
            .await;
            end
        });

        driver.connect().await.unwrap();
        let _end = harness.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink never saw the event");
        driver.close();
    }
}
