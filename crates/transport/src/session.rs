//! The transport session: owns exactly one logical connection to the
//! server at a time, retries forever on failure, and translates wire
//! frames to and from hub envelopes.
//!
//! Connection lifecycle: `DISCONNECTED → CONNECTING → CONNECTED`, with a
//! sticky failure flag set the first time an attempt errors. A connection
//! counts as live only once the first inbound frame arrives; that
//! transition emits exactly one status event and drains the outbound
//! queue. All per-connection tasks (writer, heartbeat) hang off a child
//! cancellation token, so superseding or tearing down a connection stops
//! them synchronously.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio::sync::{Notify, mpsc},
    tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    uplink_dispatch::Hub,
    uplink_protocol::{
        ECHO_KEY, Envelope, SESSION_ID_KEY, SESSION_ID_LEN, SESSION_ID_PARAM,
        handshake_subprotocols,
    },
};

use crate::{
    config::SessionConfig,
    error::{Error, Result},
    platform::{CookieJar, Platform},
    queue::OutboundQueue,
    status::StatusBroadcaster,
};

/// Opaque per-session token, created once and immutable thereafter.
fn generate_session_id() -> String {
    use rand::{Rng, distr::Alphanumeric};
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Mutable connection state. `connected` and the queue are only ever
/// flipped together under this lock, so a concurrent `send()` either sees
/// the live writer or lands in the queue that is about to be flushed.
#[derive(Default)]
struct Link {
    connected: bool,
    writer: Option<mpsc::UnboundedSender<Envelope>>,
    queue: OutboundQueue,
}

/// How a single physical connection ended.
enum ConnectionEnd {
    /// The request could not be built or the handshake failed.
    ConstructFailed(Error),
    /// The socket closed or errored after opening.
    Closed { was_connected: bool },
    /// Close attributed to the runtime shutting down; no reconnect.
    Intentional,
    /// `shutdown()` was called.
    Shutdown,
}

pub struct Session {
    config: SessionConfig,
    hub: Arc<Hub>,
    cookies: Arc<dyn CookieJar>,
    platform: Arc<dyn Platform>,
    status: StatusBroadcaster,
    session_id: String,
    link: Mutex<Link>,
    ever_connected: AtomicBool,
    has_failed: AtomicBool,
    never_established_reported: AtomicBool,
    running: AtomicBool,
    retry_now: Notify,
    shutdown: CancellationToken,
}

impl Session {
    /// Create the session and bind it to `hub` as the outbound sink.
    pub fn new(
        config: SessionConfig,
        hub: Arc<Hub>,
        cookies: Arc<dyn CookieJar>,
        platform: Arc<dyn Platform>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            status: StatusBroadcaster::new(Arc::clone(&hub)),
            session_id: generate_session_id(),
            config,
            hub,
            cookies,
            platform,
            link: Mutex::new(Link::default()),
            ever_connected: AtomicBool::new(false),
            has_failed: AtomicBool::new(false),
            never_established_reported: AtomicBool::new(false),
            running: AtomicBool::new(false),
            retry_now: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        let weak = Arc::downgrade(&session);
        session.hub.bind_transport(Box::new(move |envelope, echo| {
            if let Some(session) = weak.upgrade() {
                session.send_with_echo(envelope, echo);
            }
        }));
        session
    }

    /// Start the connection run loop, or force a reconnect. No-op while
    /// an attempt is already in flight or live; during a reconnect
    /// backoff it skips the remaining delay and retries immediately.
    /// Must be called from within a tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            warn!("connect() after shutdown; ignoring");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            if !self.is_connected() {
                self.retry_now.notify_one();
            }
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(session.run());
    }

    /// Transmit immediately when live, queue otherwise. The session
    /// identity is injected into the payload either way.
    pub fn send(&self, envelope: Envelope) {
        self.send_with_echo(envelope, false);
    }

    fn send_with_echo(&self, mut envelope: Envelope, echo: bool) {
        if let Value::Object(event) = &mut envelope.event {
            event.insert(
                SESSION_ID_KEY.to_string(),
                Value::String(self.session_id.clone()),
            );
            if echo {
                event.insert(ECHO_KEY.to_string(), Value::Bool(true));
            }
        }
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = if link.connected {
            link.writer.clone()
        } else {
            None
        };
        if let Some(writer) = writer {
            match writer.send(envelope) {
                Ok(()) => return,
                Err(returned) => {
                    // Writer task already gone; the connection is dying.
                    link.connected = false;
                    link.writer = None;
                    envelope = returned.0;
                }
            }
        }
        link.queue.enqueue(envelope);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    #[must_use]
    pub fn has_ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    /// True unless the session has failed without ever once connecting.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.has_failed.load(Ordering::SeqCst) || self.has_ever_connected()
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Tear down the run loop, the live connection, and all per-connection
    /// tasks. No further reconnects happen after this.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            info!("attempting websocket connection");
            let delay = match self.run_connection().await {
                ConnectionEnd::Shutdown => return,
                ConnectionEnd::Intentional => {
                    info!("close attributed to runtime shutdown; not reconnecting");
                    return;
                }
                ConnectionEnd::ConstructFailed(err) => {
                    self.has_failed.store(true, Ordering::SeqCst);
                    if self.has_ever_connected() {
                        self.status.lost(&format!(
                            "Unable to re-create a websocket connection ({err})"
                        ));
                    } else {
                        self.status.failed(&format!(
                            "Could not create a websocket connection ({err})"
                        ));
                        self.record_never_established(&err.to_string());
                    }
                    self.config.retry_delay()
                }
                ConnectionEnd::Closed { was_connected } => {
                    self.has_failed.store(true, Ordering::SeqCst);
                    if was_connected {
                        self.status.lost("You lost connection to the server");
                    } else if self.has_ever_connected() {
                        self.status.lost("Websocket connection failed");
                    } else {
                        self.status.failed("Websocket connection failed");
                        self.record_never_established("connection closed before becoming live");
                    }
                    // A live connection that just dropped reconnects fast.
                    if was_connected {
                        Duration::ZERO
                    } else {
                        self.config.retry_delay()
                    }
                }
            };
            if !delay.is_zero() {
                tokio::select! {
                    () = self.shutdown.cancelled() => return,
                    () = self.retry_now.notified() => {
                        info!("explicit connect() during backoff; retrying now");
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Drive one physical connection from handshake to teardown.
    async fn run_connection(&self) -> ConnectionEnd {
        let request = match self.build_request() {
            Ok(request) => request,
            Err(err) => return ConnectionEnd::ConstructFailed(err),
        };

        let stream = tokio::select! {
            () = self.shutdown.cancelled() => return ConnectionEnd::Shutdown,
            result = tokio_tungstenite::connect_async(request) => match result {
                Ok((stream, _response)) => stream,
                Err(err) => return ConnectionEnd::ConstructFailed(err.into()),
            },
        };

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Envelope>();
        let conn_token = self.shutdown.child_token();
        // One live report per physical connection, even if the flush on
        // the first frame fails and later frames keep arriving.
        let live_reported = AtomicBool::new(false);

        // Writer: serializes envelopes onto the socket in submission order.
        let writer = tokio::spawn({
            let token = conn_token.clone();
            async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        next = writer_rx.recv() => {
                            let Some(envelope) = next else { break };
                            let text = match serde_json::to_string(&envelope) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(error = %err, "dropping unserializable envelope");
                                    continue;
                                }
                            };
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        // The server keys the connection on this first ping.
        if writer_tx.send(Envelope::ping(&self.session_id)).is_err() {
            conn_token.cancel();
            let _ = writer.await;
            return ConnectionEnd::Closed {
                was_connected: false,
            };
        }

        // Heartbeat tied to this exact connection instance; the child
        // token cancels it the moment the connection is superseded.
        let heartbeat = tokio::spawn({
            let token = conn_token.clone();
            let tx = writer_tx.clone();
            let ping = Envelope::ping(&self.session_id);
            let interval = self.config.ping_interval;
            async move {
                let mut tick =
                    tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = tick.tick() => {
                            if tx.send(ping.clone()).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        let end = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break ConnectionEnd::Shutdown,
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.on_frame(text.as_str(), &writer_tx, &live_reported);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1005);
                        if self.platform.is_intentional_close(code) {
                            break ConnectionEnd::Intentional;
                        }
                        debug!(code, "websocket closed");
                        break ConnectionEnd::Closed { was_connected: false };
                    }
                    // Binary frames and protocol-level ping/pong carry no
                    // application events.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket error");
                        break ConnectionEnd::Closed { was_connected: false };
                    }
                    None => break ConnectionEnd::Closed { was_connected: false },
                },
            }
        };

        conn_token.cancel();
        drop(writer_tx);
        let was_connected = self.teardown_link();
        let _ = tokio::join!(writer, heartbeat);

        match end {
            ConnectionEnd::Closed { .. } => ConnectionEnd::Closed { was_connected },
            other => other,
        }
    }

    fn on_frame(
        &self,
        text: &str,
        writer_tx: &mpsc::UnboundedSender<Envelope>,
        live_reported: &AtomicBool,
    ) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "discarding unparseable frame");
                return;
            }
        };
        self.mark_live(writer_tx, live_reported);
        if !envelope.is_chatter() {
            debug!(event_type = %envelope.r#type, "inbound event");
        }
        self.hub.publish_local(&envelope.r#type, Some(envelope.event));
    }

    /// The first inbound frame confirms the connection is live: emit the
    /// status event, then drain the queue. Sends made by status listeners
    /// land in the queue and are flushed in the same pass, preserving
    /// submission order.
    fn mark_live(&self, writer_tx: &mpsc::UnboundedSender<Envelope>, live_reported: &AtomicBool) {
        if live_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ever_connected.store(true, Ordering::SeqCst);
        self.status.established();

        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let flushed = link.queue.flush(|envelope| {
            writer_tx
                .send(envelope.clone())
                .map_err(|_| Error::message("writer task gone"))
        });
        if let Err(err) = flushed {
            // The connection is already dying; the remainder stays queued
            // for the next reconnect and we never report live.
            warn!(error = %err, "queue flush interrupted");
            return;
        }
        link.writer = Some(writer_tx.clone());
        link.connected = true;
    }

    fn teardown_link(&self) -> bool {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let was_connected = link.connected;
        link.connected = false;
        link.writer = None;
        was_connected
    }

    fn build_request(&self) -> Result<tungstenite::handshake::client::Request> {
        let mut url = url::Url::parse(&self.config.ws_url)?;
        url.query_pairs_mut()
            .append_pair(SESSION_ID_PARAM, &self.session_id);
        let mut request = url.as_str().into_client_request()?;
        // Custom headers are unavailable to browser websockets, so the
        // anti-forgery token rides in the sub-protocol list. An absent
        // cookie yields an empty token the server will reject.
        let token = self
            .cookies
            .get(&self.config.xsrf_cookie_name)
            .unwrap_or_default();
        request.headers_mut().insert(
            http::header::SEC_WEBSOCKET_PROTOCOL,
            http::HeaderValue::from_str(&handshake_subprotocols(&token))?,
        );
        Ok(request)
    }

    fn record_never_established(&self, reason: &str) {
        if !self.never_established_reported.swap(true, Ordering::SeqCst) {
            metrics::counter!("uplink_connection_never_established_total").increment(1);
            warn!(reason, "websocket connection could never be established");
        }
    }
}
