// ── Unit facade ──
//
// Full lifecycle of one aMotion unit connection: the transport, the
// dispatch loop that routes inbound frames, the per-connection login
// task, periodic maintenance refresh, and the public command surface.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use amotion_api::codec::{self, Endpoint, Message, UI_INFO_EVENT};
use amotion_api::models::{self, DiagramResponse, Moments, UiInfo, VariableRange};
use amotion_api::transport::ws_url;
use amotion_api::{LinkState, TransportChannel, TransportEvent};
use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, WorkRegime};
use crate::config::UnitConfig;
use crate::error::CoreError;
use crate::request::Requester;
use crate::session::{self, Identity, Session, SessionState};
use crate::status::{StatusSnapshot, StatusStore, StatusStream};

type SetupResult = Result<(), CoreError>;

// ── Unit ─────────────────────────────────────────────────────────────

/// Handle to one aMotion unit.
///
/// Cheaply cloneable via `Arc<UnitInner>`. [`connect()`](Self::connect)
/// starts the background connection; every command waits (bounded) for
/// the session to authenticate before it is sent.
#[derive(Clone)]
pub struct Unit {
    inner: Arc<UnitInner>,
}

struct UnitInner {
    config: UnitConfig,
    requester: Requester,
    session: Session,
    status: StatusStore,
    cancel: CancellationToken,
    /// Child token for the current connect cycle, replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    /// Held for the whole of `connect()`.
    connecting: Mutex<()>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Completes `connect()` on the first login outcome (fail-fast only).
    setup_tx: std::sync::Mutex<Option<oneshot::Sender<SetupResult>>>,
    session_error: watch::Sender<Option<CoreError>>,
}

impl Unit {
    /// Create a unit handle. Does NOT connect.
    pub fn new(config: UnitConfig) -> Self {
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        let (session_error, _) = watch::channel(None);

        Self {
            inner: Arc::new(UnitInner {
                requester: Requester::new(config.login_wait),
                session: Session::new(),
                status: StatusStore::new(),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                connecting: Mutex::new(()),
                task_handles: Mutex::new(Vec::new()),
                setup_tx: std::sync::Mutex::new(None),
                session_error,
                config,
            }),
        }
    }

    pub fn config(&self) -> &UnitConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the connection and background tasks.
    ///
    /// With `fail_fast_on_setup` this resolves once the first login has
    /// succeeded and discovery plus the initial poll have run, or fails
    /// with `AuthenticationFailed` / `ConnectionFailed`. `login_wait`
    /// bounds the login only. Otherwise it returns immediately and the
    /// session keeps retrying in the background.
    ///
    /// Concurrent calls share one connection: later callers wait for the
    /// first and then return.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let _connecting = self.inner.connecting.lock().await;
        if self.inner.requester.transport().is_ok() {
            debug!("already connected");
            return Ok(());
        }

        let url = ws_url(&config.url).map_err(|e| CoreError::Config {
            message: e.to_string(),
        })?;

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();
        self.inner.session_error.send_replace(None);

        let setup_rx = if config.policy.fail_fast_on_setup {
            let (tx, rx) = oneshot::channel();
            *self.lock_setup() = Some(tx);
            Some(rx)
        } else {
            None
        };

        info!(url = %url, "connecting to unit");
        let (transport, events) =
            TransportChannel::start(url, config.reconnect.clone(), child.clone());
        self.inner.requester.attach(transport);

        {
            let mut handles = self.inner.task_handles.lock().await;
            handles.push(tokio::spawn(dispatch_task(
                self.clone(),
                events,
                child.clone(),
            )));

            let interval = config.maintenance_interval;
            if !interval.is_zero() {
                handles.push(tokio::spawn(maintenance_task(
                    self.clone(),
                    interval,
                    child.clone(),
                )));
            }
        }

        let Some(setup_rx) = setup_rx else {
            return Ok(());
        };

        let outcome = match tokio::time::timeout(config.login_wait, setup_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => Err(CoreError::ConnectionFailed {
                url: config.url.to_string(),
                reason: format!("no session within {}s", config.login_wait.as_secs()),
            }),
        };

        if let Err(e) = outcome {
            warn!(error = %e, "unit setup failed");
            self.disconnect().await;
            return Err(e);
        }

        self.bootstrap().await;
        info!(unit = %self.display_name(), "connected to unit");
        Ok(())
    }

    /// Stop background tasks and close the connection.
    ///
    /// Pending requests fail with `ConnectionLost`. The unit can be
    /// connected again afterwards.
    pub async fn disconnect(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(transport) = self.inner.requester.detach() {
            transport.shutdown();
            transport.closed().await;
        }

        self.lock_setup().take();
        self.end_session(SessionState::Unauthenticated);
        self.inner
            .requester
            .table()
            .fail_all(|| amotion_api::Error::ConnectionLost);
        debug!("disconnected");
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session.state()
    }

    /// Observe session state transitions.
    pub fn session_states(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        self.inner
            .requester
            .transport()
            .map_or(LinkState::Disconnected, |t| *t.state().borrow())
    }

    /// Error that made the session give up, if any.
    pub fn session_error(&self) -> Option<CoreError> {
        self.inner.session_error.borrow().clone()
    }

    /// Observe fatal session errors.
    pub fn session_errors(&self) -> watch::Receiver<Option<CoreError>> {
        self.inner.session_error.subscribe()
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Latest snapshot. Never blocks.
    pub fn current_status(&self) -> Arc<StatusSnapshot> {
        self.inner.status.current()
    }

    /// Change notifications for the snapshot.
    pub fn status(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.inner.status.subscribe()
    }

    pub fn status_stream(&self) -> StatusStream {
        StatusStream::new(self.inner.status.subscribe())
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn identity(&self) -> Arc<Identity> {
        self.inner.session.identity()
    }

    pub fn model(&self) -> Option<String> {
        self.identity().model.clone()
    }

    pub fn serial(&self) -> Option<String> {
        self.identity().serial.clone()
    }

    pub fn brand(&self) -> Option<String> {
        self.identity().brand.clone()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.identity().firmware_version.clone()
    }

    pub fn display_name(&self) -> String {
        self.identity().display_name().to_owned()
    }

    /// Air-flow range when the unit is flow-controlled.
    pub fn flow_range(&self) -> Option<VariableRange> {
        self.inner.session.flow_range()
    }

    /// Re-run scheme and identity discovery.
    pub async fn rediscover(&self) -> Result<Arc<Identity>, CoreError> {
        self.wait_authenticated().await?;
        let inner = &self.inner;
        inner
            .session
            .discover(&inner.requester, inner.config.request_timeout)
            .await;
        Ok(self.identity())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send one control command and wait for the unit's acknowledgement.
    pub async fn execute(&self, command: Command) -> Result<(), CoreError> {
        self.wait_authenticated().await?;
        let args = command.to_control_args(self.flow_range())?;
        info!(?command, "sending control command");
        self.inner
            .requester
            .request(Endpoint::Control, Some(&args), self.inner.config.request_timeout)
            .await?;
        Ok(())
    }

    pub async fn set_temperature(&self, celsius: f64) -> Result<(), CoreError> {
        self.execute(Command::SetTemperature(celsius)).await
    }

    pub async fn set_fan(&self, percent: u8) -> Result<(), CoreError> {
        self.execute(Command::SetFan(percent)).await
    }

    pub async fn set_mode(&self, regime: WorkRegime) -> Result<(), CoreError> {
        self.execute(Command::SetMode(regime)).await
    }

    // ── Fetches ──────────────────────────────────────────────────────

    /// Query `ui_info` and fold it into the snapshot.
    pub async fn fetch_status(&self) -> Result<Arc<StatusSnapshot>, CoreError> {
        self.wait_authenticated().await?;
        self.query_status().await?;
        Ok(self.current_status())
    }

    /// Full poll: clock sync on flow-controlled units, status, and
    /// maintenance data once it is older than the maintenance interval.
    pub async fn refresh(&self) -> Result<Arc<StatusSnapshot>, CoreError> {
        self.wait_authenticated().await?;
        self.refresh_now().await
    }

    pub async fn fetch_maintenance(&self) -> Result<Arc<StatusSnapshot>, CoreError> {
        self.wait_authenticated().await?;
        self.query_maintenance().await?;
        Ok(self.current_status())
    }

    pub async fn fetch_diagram(&self) -> Result<Arc<StatusSnapshot>, CoreError> {
        self.wait_authenticated().await?;
        self.query_diagram().await?;
        Ok(self.current_status())
    }

    /// Ask the unit for its clock; flow readings are only valid after it.
    pub async fn sync_time(&self) -> Result<(), CoreError> {
        self.wait_authenticated().await?;
        self.query_time().await
    }

    // ── Internals ────────────────────────────────────────────────────

    fn lock_setup(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<SetupResult>>> {
        self.inner
            .setup_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the first login outcome to a waiting `connect()`.
    /// Returns `false` once setup is over.
    fn report_setup(&self, result: SetupResult) -> bool {
        match self.lock_setup().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Leave `Authenticated`: close the request gate, then publish `next`.
    fn end_session(&self, next: SessionState) {
        self.inner.requester.revoke();
        self.inner.session.set_state(next);
    }

    async fn wait_authenticated(&self) -> Result<(), CoreError> {
        let wait = self.inner.config.login_wait;
        self.inner.requester.transport()?;
        let cancel = self.inner.cancel_child.lock().await.clone();
        let mut state = self.inner.session.subscribe();

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(self.session_error().unwrap_or(CoreError::NotConnected)),
            result = tokio::time::timeout(wait, state.wait_for(|s| *s == SessionState::Authenticated)) => {
                match result {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(_)) => Err(CoreError::NotConnected),
                    Err(_) => {
                        debug!(wait_secs = wait.as_secs(), "gave up waiting for login");
                        Err(CoreError::Timeout { timeout_secs: wait.as_secs() })
                    }
                }
            }
        }
    }

    async fn query_status(&self) -> Result<(), CoreError> {
        let info: UiInfo = session::fetch(
            &self.inner.requester,
            Endpoint::UiInfo,
            self.inner.config.request_timeout,
        )
        .await?;
        self.inner
            .status
            .apply_ui_info(&info, self.inner.session.flow_range());
        Ok(())
    }

    async fn query_maintenance(&self) -> Result<(), CoreError> {
        let moments: Moments = session::fetch(
            &self.inner.requester,
            Endpoint::MomentsGet,
            self.inner.config.maintenance_timeout,
        )
        .await?;
        self.inner.status.apply_maintenance(&moments);
        Ok(())
    }

    async fn query_diagram(&self) -> Result<(), CoreError> {
        let diagram: DiagramResponse = session::fetch(
            &self.inner.requester,
            Endpoint::UiDiagramData,
            self.inner.config.maintenance_timeout,
        )
        .await?;
        self.inner.status.apply_diagram(&diagram.ui_diagram_data);
        Ok(())
    }

    async fn query_time(&self) -> Result<(), CoreError> {
        self.inner
            .requester
            .request(Endpoint::Time, None, self.inner.config.request_timeout)
            .await?;
        Ok(())
    }

    async fn refresh_now(&self) -> Result<Arc<StatusSnapshot>, CoreError> {
        if self.inner.session.flow_range().is_some() {
            self.query_time().await?;
        }
        self.query_status().await?;

        if self.maintenance_stale() {
            if let Err(e) = self.query_maintenance().await {
                warn!(error = %e, "maintenance fetch failed");
            }
            if let Err(e) = self.query_diagram().await {
                warn!(error = %e, "diagram fetch failed");
            }
        }
        Ok(self.current_status())
    }

    /// Periodic part of the poll. Each request waits for a logged-in
    /// connection on its own.
    async fn refresh_maintenance(&self) {
        if let Err(e) = self.query_maintenance().await {
            warn!(error = %e, "periodic maintenance refresh failed");
        }
        if let Err(e) = self.query_diagram().await {
            warn!(error = %e, "periodic diagram refresh failed");
        }
    }

    fn maintenance_stale(&self) -> bool {
        let Some(last) = self.current_status().last_maintenance_update else {
            return true;
        };
        let interval = self.inner.config.maintenance_interval;
        if interval.is_zero() {
            return false;
        }
        chrono::Duration::from_std(interval)
            .map(|period| Utc::now() - last >= period)
            .unwrap_or(false)
    }

    // ── Dispatch handlers ────────────────────────────────────────────

    fn on_connected(&self, link: u64, cancel: &CancellationToken) {
        self.end_session(SessionState::LoggingIn);
        let epoch = self.inner.requester.table().begin_epoch();
        debug!(epoch, link, "connection up, starting login");

        let unit = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = unit.establish_session(epoch, link) => {}
            }
        });
    }

    fn on_frame(&self, raw: &str) {
        let inner = &self.inner;
        match codec::decode(raw) {
            Message::Response(response) => {
                let Some(id) = response.id else {
                    trace!(code = %response.code, "ignoring uncorrelated response");
                    return;
                };
                if !inner.requester.table().resolve(id, response.into_result()) {
                    trace!(id, "no waiter for response");
                }
            }
            Message::Unauthorized { id, error } => {
                let message = error.unwrap_or_default();
                warn!(?id, message = %message, "unit reports the session as unauthorized");
                // A rejected login is handled, and backed off, by its own task.
                let logging_in = inner.session.state() == SessionState::LoggingIn;
                self.end_session(SessionState::Unauthenticated);
                if let Some(id) = id {
                    inner
                        .requester
                        .table()
                        .resolve(id, Err(amotion_api::Error::Unauthorized { message }));
                }
                if !logging_in {
                    if let Ok(transport) = inner.requester.transport() {
                        transport.force_reconnect();
                    }
                }
            }
            Message::Event(event) if event.name == UI_INFO_EVENT => {
                if inner.session.state() != SessionState::Authenticated {
                    trace!("ignoring ui_info pushed before login");
                    return;
                }
                match models::parse_payload::<UiInfo>(UI_INFO_EVENT, event.args) {
                    Ok(info) => inner.status.apply_ui_info(&info, inner.session.flow_range()),
                    Err(e) => debug!(error = %e, "dropping unreadable ui_info event"),
                }
            }
            Message::Event(event) => trace!(event = %event.name, "ignoring event"),
            Message::Malformed { reason } => debug!(reason = %reason, "dropping malformed frame"),
        }
    }

    fn on_disconnected(&self, reason: &str) {
        self.end_session(SessionState::Unauthenticated);
        let failed = self
            .inner
            .requester
            .table()
            .fail_all(|| amotion_api::Error::ConnectionLost);
        info!(reason, failed, "connection to unit lost");
    }

    fn on_connect_failed(&self, reason: String) {
        let reported = self.report_setup(Err(CoreError::ConnectionFailed {
            url: self.inner.config.url.to_string(),
            reason,
        }));
        if reported {
            debug!("first connection attempt failed");
        }
    }

    /// Login on connection `link`, then discovery and the initial poll.
    async fn establish_session(&self, epoch: u64, link: u64) {
        let inner = &self.inner;

        if let Err(e) = inner
            .session
            .login(
                &inner.requester,
                &inner.config.credentials,
                epoch,
                link,
                inner.config.request_timeout,
            )
            .await
        {
            self.on_login_failure(epoch, link, e);
            return;
        }

        // A waiting `connect()` takes over from here.
        if self.report_setup(Ok(())) {
            return;
        }
        self.bootstrap().await;
    }

    /// First-time discovery and a full poll after a login.
    async fn bootstrap(&self) {
        let inner = &self.inner;
        if !inner.session.is_discovered() {
            inner
                .session
                .discover(&inner.requester, inner.config.request_timeout)
                .await;
        }
        if let Err(e) = self.refresh_now().await {
            warn!(error = %e, "initial status poll failed");
        }
    }

    fn on_login_failure(&self, epoch: u64, link: u64, err: CoreError) {
        let inner = &self.inner;
        if inner.requester.table().epoch() == epoch {
            self.end_session(SessionState::Unauthenticated);
        }

        let setup_err = match &err {
            CoreError::AuthenticationFailed { .. } => err.clone(),
            other => CoreError::ConnectionFailed {
                url: inner.config.url.to_string(),
                reason: other.to_string(),
            },
        };
        if self.report_setup(Err(setup_err)) {
            return;
        }

        let failures = inner.session.record_failure();
        if let Some(max) = inner.config.policy.max_login_failures {
            if failures >= max {
                error!(error = %err, failures, "giving up after repeated login failures");
                inner.session_error.send_replace(Some(err));
                if let Ok(transport) = inner.requester.transport() {
                    transport.shutdown();
                }
                return;
            }
        }

        warn!(error = %err, failures, "login failed, reconnecting");
        if let Ok(transport) = inner.requester.transport() {
            transport.reject(link);
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain the transport event stream.
///
/// Never awaits a caller: responses are handed over through `oneshot`s,
/// login runs in its own task.
async fn dispatch_task(
    unit: Unit,
    mut events: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };

        match event {
            TransportEvent::Connected { epoch } => unit.on_connected(epoch, &cancel),
            TransportEvent::Frame(raw) => unit.on_frame(&raw),
            TransportEvent::Disconnected { epoch, reason } => {
                debug!(transport_epoch = epoch, "transport disconnected");
                unit.on_disconnected(&reason);
            }
            TransportEvent::ConnectFailed { attempt, reason } => {
                debug!(attempt, reason = %reason, "connection attempt failed");
                unit.on_connect_failed(reason);
            }
        }
    }

    unit.end_session(SessionState::Unauthenticated);
    unit.inner
        .requester
        .table()
        .fail_all(|| amotion_api::Error::ConnectionLost);
    debug!("dispatch loop exiting");
}

/// Refresh maintenance counters and diagram data on a fixed period.
async fn maintenance_task(unit: Unit, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if unit.session_state() != SessionState::Authenticated {
            debug!("skipping maintenance refresh while logged out");
            continue;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = unit.refresh_maintenance() => {}
        }
    }
}
