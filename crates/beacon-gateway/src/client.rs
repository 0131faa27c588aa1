//! Gateway client
//!
//! One spawned driver task owns the connection: the socket halves, the
//! handshake state, the pending-request table, the request timers and the
//! keepalive. `GatewayClient` is a handle that talks to the driver through a
//! command channel and watches the connection state.

use crate::config::GatewayConfig;
use crate::correlator::{Correlator, Responder, Settlement};
use crate::handshake::{AckOutcome, ConnectionState, ErrorOutcome, Handshake};
use crate::protocol::{
    self, ActionResponse, Envelope, HandshakeBody, HandshakeInfo, Inbound, PROTOCOL_VERSION,
    RequestBody,
};
use crate::tcp::{TcpReadWrapper, TcpWriteWrapper};
use crate::transport::{AsyncReader, AsyncWriter};
use beacon_core::{GatewayError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, sleep_until};
use tracing::{debug, error, info, warn};

/// Characters of frame JSON included in debug logs
const PREVIEW_CHARS: usize = 200;

/// Longest keepalive period accepted from a handshake ack
const MAX_KEEPALIVE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Stand-in for "never" when a timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline `timeout` from now, saturating instead of overflowing
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Commands from the client handle to the driver
enum Command {
    Request {
        action: String,
        payload: Value,
        timeout: Duration,
        respond_to: Responder,
    },
    Ping {
        respond_to: oneshot::Sender<Result<()>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Client for a Beacon gateway
pub struct GatewayClient {
    config: GatewayConfig,
    commands: Option<mpsc::Sender<Command>>,
    state: watch::Receiver<ConnectionState>,
    info: Option<HandshakeInfo>,
    driver: Option<JoinHandle<()>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let (_, state) = watch::channel(ConnectionState::Connecting);
        Self {
            config,
            commands: None,
            state,
            info: None,
            driver: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Current connection state; `Connecting` until `connect()` settles
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Details from the `handshake_ack`
    pub fn handshake_info(&self) -> Option<&HandshakeInfo> {
        self.info.as_ref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.connection_id.as_str())
    }

    /// Open the socket and complete the handshake.
    ///
    /// Returns once the server acknowledged the handshake, or with the error
    /// that failed it. Any previous connection on this client is closed first.
    pub async fn connect(&mut self) -> Result<()> {
        self.config.validate()?;
        self.close().await;
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }

        let addr = self.config.address();
        info!("Connecting to Beacon gateway at {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| GatewayError::Transport(format!("Connection timeout to {}", addr)))?
            .map_err(|e| GatewayError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| GatewayError::Transport(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let (read_half, write_half) = stream.into_split();
        self.start(
            TcpReadWrapper::new(read_half, self.config.max_frame_len),
            TcpWriteWrapper(write_half),
        )
        .await
    }

    async fn start<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver = Driver {
            reader,
            writer,
            commands: command_rx,
            state: state_tx,
            ready: Some(ready_tx),
            handshake: Handshake::new(),
            correlator: Correlator::new(),
            keepalive: None,
            handshake_deadline: deadline_after(self.config.handshake_timeout),
            handshake_timeout: self.config.handshake_timeout,
            client_id: self.config.client_id.clone(),
            token: self.config.token.clone(),
            keepalive_enabled: self.config.keepalive,
        };

        self.state = state_rx;
        self.commands = Some(command_tx);
        self.info = None;
        self.driver = Some(tokio::spawn(driver.run()));

        let info = ready_rx.await.map_err(|_| {
            GatewayError::ClosedBeforeHandshake("connection driver stopped".into())
        })??;
        self.info = Some(info);
        Ok(())
    }

    /// Invoke an action with the configured default timeout
    pub async fn request(&self, action: &str, payload: Value) -> Result<ActionResponse> {
        self.request_with_timeout(action, payload, self.config.request_timeout)
            .await
    }

    /// Invoke an action and wait for its response.
    ///
    /// Fails with `NotEstablished` without any I/O if the handshake has not
    /// completed. A response with a non-OK `result` is still a success here;
    /// inspect `ActionResponse::is_ok`.
    pub async fn request_with_timeout(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ActionResponse> {
        let commands = self.live_commands()?;
        let (respond_to, response) = oneshot::channel();
        commands
            .send(Command::Request {
                action: action.to_string(),
                payload,
                timeout,
                respond_to,
            })
            .await
            .map_err(|_| GatewayError::ConnectionClosed)?;

        response.await.map_err(|_| GatewayError::ConnectionClosed)?
    }

    /// Send one keepalive `ping`
    pub async fn ping(&self) -> Result<()> {
        let commands = self.live_commands()?;
        let (respond_to, sent) = oneshot::channel();
        commands
            .send(Command::Ping { respond_to })
            .await
            .map_err(|_| GatewayError::ConnectionClosed)?;

        sent.await.map_err(|_| GatewayError::ConnectionClosed)?
    }

    /// Close the connection.
    ///
    /// Every pending request has failed with `ConnectionClosed` by the time
    /// this returns. Closing twice is a no-op.
    pub async fn close(&self) {
        let Some(commands) = &self.commands else {
            return;
        };
        let (done, closed) = oneshot::channel();
        if commands.send(Command::Close { done }).await.is_ok() {
            let _ = closed.await;
        }
    }

    fn live_commands(&self) -> Result<&mpsc::Sender<Command>> {
        match self.state() {
            ConnectionState::Established => {}
            ConnectionState::Closed if self.info.is_some() => {
                return Err(GatewayError::ConnectionClosed);
            }
            _ => return Err(GatewayError::NotEstablished),
        }
        self.commands.as_ref().ok_or(GatewayError::NotEstablished)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Connection driver task state
struct Driver<R, W> {
    reader: R,
    writer: W,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    ready: Option<oneshot::Sender<Result<HandshakeInfo>>>,
    handshake: Handshake,
    correlator: Correlator,
    keepalive: Option<Interval>,
    handshake_deadline: Instant,
    handshake_timeout: Duration,
    client_id: String,
    token: String,
    keepalive_enabled: bool,
}

impl<R: AsyncReader, W: AsyncWriter> Driver<R, W> {
    async fn run(mut self) {
        if let Err(e) = self.send_handshake().await {
            error!("Failed to send handshake: {}", e);
            self.lose_transport(&e.to_string());
            return;
        }

        loop {
            let handshake_pending = self.handshake.state().is_pending();
            let next_deadline = self.correlator.next_deadline();

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("Command channel closed, driver exiting");
                            self.shutdown().await;
                            Flow::Stop
                        }
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }

                frame = self.reader.read_frame() => {
                    match frame {
                        Ok(Some(bytes)) => {
                            if let Flow::Stop = self.handle_frame(&bytes) {
                                self.shutdown().await;
                                break;
                            }
                        }
                        Ok(None) => {
                            info!("Gateway closed the connection");
                            self.lose_transport("connection closed by server");
                            break;
                        }
                        Err(e) => {
                            error!("Reader failed: {}", e);
                            self.lose_transport(&e.to_string());
                            break;
                        }
                    }
                }

                _ = sleep_until(self.handshake_deadline), if handshake_pending => {
                    error!("No handshake_ack within {:?}", self.handshake_timeout);
                    self.handshake.fail();
                    self.settle_ready(Err(GatewayError::HandshakeTimeout(self.handshake_timeout)));
                    self.shutdown().await;
                    break;
                }

                _ = sleep_until(next_deadline.unwrap_or(self.handshake_deadline)), if next_deadline.is_some() => {
                    self.correlator.expire(Instant::now());
                }

                _ = tick(&mut self.keepalive) => {
                    let ping = self.ping_envelope();
                    if let Err(e) = self.send(&ping).await {
                        error!("Keepalive ping failed: {}", e);
                        self.lose_transport(&e.to_string());
                        break;
                    }
                }
            }
        }
    }

    async fn send_handshake(&mut self) -> Result<()> {
        let body = HandshakeBody::new(self.client_id.clone(), self.token.clone());
        self.send(&Envelope::handshake(&body)?).await?;
        self.handshake.mark_sent()?;
        self.publish();
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Request {
                action,
                payload,
                timeout,
                respond_to,
            } => self.send_request(action, payload, timeout, respond_to).await,
            Command::Ping { respond_to } => {
                let Some(connection_id) = self.handshake.connection_id() else {
                    let _ = respond_to.send(Err(GatewayError::NotEstablished));
                    return Flow::Continue;
                };
                let envelope = Envelope::ping(connection_id);
                match self.send(&envelope).await {
                    Ok(()) => {
                        let _ = respond_to.send(Ok(()));
                        Flow::Continue
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        let _ = respond_to.send(Err(e));
                        self.lose_transport(&reason);
                        Flow::Stop
                    }
                }
            }
            Command::Close { done } => {
                debug!("Closing gateway connection");
                if self.handshake.fail() {
                    self.settle_ready(Err(GatewayError::ClosedBeforeHandshake(
                        "closed by client".into(),
                    )));
                }
                self.handshake.close();
                self.shutdown().await;
                let _ = done.send(());
                Flow::Stop
            }
        }
    }

    async fn send_request(
        &mut self,
        action: String,
        payload: Value,
        timeout: Duration,
        respond_to: Responder,
    ) -> Flow {
        let Some(connection_id) = self.handshake.connection_id() else {
            let _ = respond_to.send(Err(GatewayError::NotEstablished));
            return Flow::Continue;
        };

        let request_id = self.correlator.new_request_id();
        let body = RequestBody::new(request_id.clone(), action.clone(), payload);
        let envelope = match Envelope::request(connection_id, &body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return Flow::Continue;
            }
        };

        self.correlator
            .register(request_id.clone(), action, deadline_after(timeout), respond_to);

        if let Err(e) = self.send(&envelope).await {
            let reason = e.to_string();
            self.correlator.fail(&request_id, e);
            self.lose_transport(&reason);
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Flow {
        debug!("[Beacon→Probe] len={} json={}", bytes.len(), preview(bytes));

        let inbound = match protocol::decode(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Discarding frame: {}", e);
                return Flow::Continue;
            }
        };

        match inbound {
            Inbound::HandshakeAck(info) => self.on_handshake_ack(info),
            Inbound::Response(response) => {
                let request_id = response.request_id.clone();
                match self.correlator.resolve(response) {
                    Settlement::Delivered { action } => {
                        debug!("Response for {} ({})", action, request_id);
                    }
                    Settlement::Unknown => {
                        warn!("Received response for unknown requestId {}", request_id);
                    }
                    Settlement::CallerGone { action } => {
                        debug!("Caller stopped waiting for {} ({})", action, request_id);
                    }
                }
            }
            Inbound::Error(body) => {
                let code = body.code().to_string();
                let message = body.message().to_string();
                match self.handshake.on_error(body) {
                    ErrorOutcome::Rejected(err) => {
                        error!("Handshake rejected: {} - {}", code, message);
                        self.settle_ready(Err(err));
                        self.publish();
                        return Flow::Stop;
                    }
                    ErrorOutcome::Warning => warn!("Gateway error: {} - {}", code, message),
                    ErrorOutcome::Ignored => {}
                }
            }
            Inbound::Pong => debug!("Received pong"),
            Inbound::Unexpected(kind) => warn!("Ignoring unexpected {} envelope", kind),
        }
        Flow::Continue
    }

    fn on_handshake_ack(&mut self, info: HandshakeInfo) {
        match self.handshake.on_ack(info) {
            AckOutcome::Established(info) => {
                info!(
                    "Handshake complete: connectionId={} server={} modVersion={}",
                    info.connection_id, info.server_name, info.mod_version
                );
                if let Some(version) = info.protocol_version.filter(|v| *v != PROTOCOL_VERSION) {
                    warn!(
                        "Gateway speaks protocol version {}, client speaks {}",
                        version, PROTOCOL_VERSION
                    );
                }
                if let Some(message) = &info.message {
                    debug!("Gateway says: {}", message);
                }
                self.keepalive = self.keepalive_interval(&info);
                self.publish();
                self.settle_ready(Ok(info));
            }
            AckOutcome::Ignored => warn!("Ignoring unexpected handshake_ack"),
        }
    }

    fn keepalive_interval(&self, info: &HandshakeInfo) -> Option<Interval> {
        let seconds = info.heartbeat_interval_seconds.filter(|s| *s > 0)?;
        if !self.keepalive_enabled {
            return None;
        }
        let period = Duration::from_secs(seconds);
        let first_tick = match Instant::now().checked_add(period) {
            Some(at) if period <= MAX_KEEPALIVE_PERIOD => at,
            _ => {
                warn!(
                    "Heartbeat interval of {}s is out of range, keepalive disabled",
                    seconds
                );
                return None;
            }
        };
        let mut interval = tokio::time::interval_at(first_tick, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Sending keepalive pings every {:?}", period);
        Some(interval)
    }

    fn ping_envelope(&self) -> Envelope {
        Envelope::ping(self.handshake.connection_id().unwrap_or_default())
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let data = envelope.to_bytes()?;
        debug!("[Probe→Beacon] len={} json={}", data.len(), preview(&data));
        self.writer.write_frame(&data).await
    }

    fn settle_ready(&mut self, result: Result<HandshakeInfo>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.handshake.state());
    }

    /// Socket is gone: settle the handshake and every pending request
    fn lose_transport(&mut self, reason: &str) {
        if let Some(err) = self.handshake.on_transport_lost(reason) {
            self.settle_ready(Err(err));
        }
        self.fail_pending();
        self.publish();
    }

    /// Orderly teardown from our side
    async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutdown failed: {}", e);
        }
        if !matches!(
            self.handshake.state(),
            ConnectionState::Failed | ConnectionState::Closed
        ) {
            self.handshake.close();
        }
        self.fail_pending();
        self.publish();
    }

    fn fail_pending(&mut self) {
        let failed = self.correlator.fail_all();
        if failed > 0 {
            warn!("Connection closed with {} pending request(s)", failed);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn preview(data: &[u8]) -> String {
    String::from_utf8_lossy(data).chars().take(PREVIEW_CHARS).collect()
}
