// ── Session protocol ──
//
// Authentication state, the login handshake and one-time discovery of the
// unit's capability scheme and identity. The `Unit` drives these from its
// dispatch loop: a fresh connection starts a login, an `UNAUTHORIZED`
// frame or a disconnect drops back to `Unauthenticated`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use amotion_api::codec::Endpoint;
use amotion_api::models::{
    self, ControlScheme, Discovery, InfoScheme, VariableRange, VersionInfo,
};
use arc_swap::{ArcSwap, ArcSwapOption};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::CoreError;
use crate::request::Requester;

const FLOW_VARIABLE: &str = "flow_ventilation_req";

/// Authentication state of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Unauthenticated,
    LoggingIn,
    Authenticated,
}

/// Who the unit says it is. Fields stay `None` until discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub firmware_version: Option<String>,
}

impl Identity {
    /// Human-readable label: the configured name, else the model.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or("aMotion unit")
    }
}

pub(crate) struct Session {
    state: watch::Sender<SessionState>,
    identity: ArcSwap<Identity>,
    flow: ArcSwapOption<VariableRange>,
    discovered: AtomicBool,
    failures: AtomicU32,
}

impl Session {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            state,
            identity: ArcSwap::from_pointee(Identity::default()),
            flow: ArcSwapOption::empty(),
            discovered: AtomicBool::new(false),
            failures: AtomicU32::new(0),
        }
    }

    // ── State ────────────────────────────────────────────────────────

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "session state change");
            *current = next;
            true
        });
    }

    /// Count one more consecutive login failure and return the total.
    pub(crate) fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ── Discovered data ──────────────────────────────────────────────

    pub(crate) fn identity(&self) -> Arc<Identity> {
        self.identity.load_full()
    }

    /// Range of `flow_ventilation_req` on flow-controlled units.
    pub(crate) fn flow_range(&self) -> Option<VariableRange> {
        self.flow.load().as_deref().copied()
    }

    pub(crate) fn is_discovered(&self) -> bool {
        self.discovered.load(Ordering::SeqCst)
    }

    // ── Handshake ────────────────────────────────────────────────────

    /// Exchange credentials for a token, then present the token.
    ///
    /// Both frames go out on transport connection `link`; `epoch` is the
    /// correlation epoch it opened. If a newer connection has started
    /// meanwhile the result is discarded. On success the request gate
    /// opens for `link`.
    pub(crate) async fn login(
        &self,
        requester: &Requester,
        credentials: &Credentials,
        epoch: u64,
        link: u64,
        timeout: Duration,
    ) -> Result<(), CoreError> {
        self.set_state(SessionState::LoggingIn);

        let args = json!({
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
        });
        let payload = requester
            .request_on(link, Endpoint::Login, Some(&args), timeout)
            .await
            .map_err(credential_error)?;
        let token = models::login_token(&payload)?;

        requester
            .notify_on(link, Endpoint::Login, Some(&json!({ "token": token })))
            .await?;

        if requester.table().epoch() != epoch {
            debug!(epoch, "login finished on a replaced connection");
            return Err(CoreError::ConnectionLost);
        }

        requester.table().rebase_after_login();
        self.failures.store(0, Ordering::SeqCst);
        requester.authorize(link);
        self.set_state(SessionState::Authenticated);
        info!(epoch, link, user = %credentials.username, "logged in");
        Ok(())
    }

    /// Fetch the capability scheme and identity.
    ///
    /// Each step stands alone: a failure is logged and leaves its fields
    /// untouched. Returns `true` once every step has succeeded.
    pub(crate) async fn discover(&self, requester: &Requester, timeout: Duration) -> bool {
        let mut complete = true;

        match self.discover_flow_range(requester, timeout).await {
            Ok(range) => {
                debug!(?range, "capability scheme discovered");
                self.flow.store(range.map(Arc::new));
            }
            Err(e) => {
                warn!(error = %e, "scheme discovery failed");
                complete = false;
            }
        }

        let mut identity = Identity::clone(&self.identity());

        match fetch::<Discovery>(requester, Endpoint::Discovery, timeout).await {
            Ok(disc) => {
                identity.model = disc.model;
                identity.serial = disc.production_number;
                identity.brand = disc.brand;
                identity.name = disc.name;
            }
            Err(e) => {
                warn!(error = %e, "identity discovery failed");
                complete = false;
            }
        }

        match fetch::<VersionInfo>(requester, Endpoint::Version, timeout).await {
            Ok(version) => {
                identity.firmware_version = version.controller.and_then(|c| c.version);
            }
            Err(e) => {
                warn!(error = %e, "version discovery failed");
                complete = false;
            }
        }

        info!(
            model = identity.model.as_deref().unwrap_or("?"),
            serial = identity.serial.as_deref().unwrap_or("?"),
            firmware = identity.firmware_version.as_deref().unwrap_or("?"),
            "unit discovered"
        );
        self.identity.store(Arc::new(identity));
        self.discovered.store(complete, Ordering::SeqCst);
        complete
    }

    async fn discover_flow_range(
        &self,
        requester: &Requester,
        timeout: Duration,
    ) -> Result<Option<VariableRange>, CoreError> {
        let info: InfoScheme = fetch(requester, Endpoint::UiInfoScheme, timeout).await?;
        if !info.has_request(FLOW_VARIABLE) {
            return Ok(None);
        }
        let control: ControlScheme = fetch(requester, Endpoint::UiControlScheme, timeout).await?;
        Ok(control.range(FLOW_VARIABLE))
    }
}

/// Request `endpoint` with no arguments and parse the payload as `T`.
pub(crate) async fn fetch<T: serde::de::DeserializeOwned>(
    requester: &Requester,
    endpoint: Endpoint,
    timeout: Duration,
) -> Result<T, CoreError> {
    let payload = requester.request(endpoint, None, timeout).await?;
    Ok(models::parse_payload(endpoint.as_str(), payload)?)
}

/// Rejections of the credential exchange mean bad credentials.
fn credential_error(err: CoreError) -> CoreError {
    match err {
        CoreError::Unauthorized { message } => CoreError::AuthenticationFailed { message },
        CoreError::Rejected { code, message } => CoreError::AuthenticationFailed {
            message: format!("{code}: {message}"),
        },
        other => other,
    }
}
