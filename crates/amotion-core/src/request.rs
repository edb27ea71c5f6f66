// ── Request plumbing ──
//
// Joins the correlation table and the transport: allocate an id, park a
// waiter, encode, send, wait. Shared by the session handshake and the
// command facade.
//
// Application requests only go out on a connection that has completed
// its login: `authorize` records that connection's epoch, `request`
// waits for it and sends with `send_on`, so a frame queued for a link
// that has since dropped fails instead of reaching the next one before
// its login.

use std::sync::Arc;
use std::time::Duration;

use amotion_api::codec::{self, Endpoint};
use amotion_api::{CorrelationTable, TransportChannel};
use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::CoreError;

pub(crate) struct Requester {
    table: CorrelationTable,
    transport: ArcSwapOption<TransportChannel>,
    /// Transport epoch of the logged-in connection, if any.
    authorized: watch::Sender<Option<u64>>,
    /// Bound on waiting for `authorized`.
    auth_wait: Duration,
}

impl Requester {
    pub(crate) fn new(auth_wait: Duration) -> Self {
        let (authorized, _) = watch::channel(None);
        Self {
            table: CorrelationTable::new(),
            transport: ArcSwapOption::empty(),
            authorized,
            auth_wait,
        }
    }

    pub(crate) fn table(&self) -> &CorrelationTable {
        &self.table
    }

    pub(crate) fn attach(&self, transport: TransportChannel) {
        self.transport.store(Some(Arc::new(transport)));
    }

    pub(crate) fn detach(&self) -> Option<Arc<TransportChannel>> {
        self.transport.swap(None)
    }

    pub(crate) fn transport(&self) -> Result<Arc<TransportChannel>, CoreError> {
        self.transport.load_full().ok_or(CoreError::NotConnected)
    }

    // ── Authorization gate ───────────────────────────────────────────

    /// Open the gate for the connection with transport epoch `link`.
    pub(crate) fn authorize(&self, link: u64) {
        self.authorized.send_replace(Some(link));
    }

    /// Close the gate until the next login.
    pub(crate) fn revoke(&self) {
        self.authorized.send_if_modified(|current| current.take().is_some());
    }

    /// Transport epoch of the logged-in connection, waiting up to
    /// `auth_wait` for one.
    async fn authorized_link(&self) -> Result<u64, CoreError> {
        let mut rx = self.authorized.subscribe();
        match tokio::time::timeout(self.auth_wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(link)) => (*link).ok_or(CoreError::NotConnected),
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => Err(CoreError::Timeout {
                timeout_secs: self.auth_wait.as_secs(),
            }),
        }
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Send `endpoint` on the logged-in connection and wait for its
    /// correlated response.
    pub(crate) async fn request(
        &self,
        endpoint: Endpoint,
        args: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, CoreError> {
        let link = self.authorized_link().await?;
        self.request_on(link, endpoint, args, timeout).await
    }

    /// Send `endpoint` on connection `link` regardless of login state.
    /// Only the login handshake uses this directly.
    pub(crate) async fn request_on(
        &self,
        link: u64,
        endpoint: Endpoint,
        args: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, CoreError> {
        let transport = self.transport()?;
        let id = self.table.allocate_id();
        // Registered before sending so a fast response cannot slip past.
        let pending = self.table.register(id)?;
        let frame = codec::encode(endpoint, args, id)?;

        debug!(id, link, endpoint = endpoint.as_str(), "sending request");
        transport.send_on(link, frame).await?;

        let payload = pending.wait(timeout).await?;
        trace!(id, endpoint = endpoint.as_str(), "request completed");
        Ok(payload)
    }

    /// Send `endpoint` on connection `link` without waiting for an answer.
    ///
    /// The unit still answers; the dispatcher finds no waiter and drops it.
    pub(crate) async fn notify_on(
        &self,
        link: u64,
        endpoint: Endpoint,
        args: Option<&Value>,
    ) -> Result<(), CoreError> {
        let transport = self.transport()?;
        let id = self.table.allocate_id();
        let frame = codec::encode(endpoint, args, id)?;
        debug!(id, link, endpoint = endpoint.as_str(), "sending notification");
        transport.send_on(link, frame).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_wait_for_a_login() {
        let requester = Requester::new(Duration::from_secs(5));
        let err = requester
            .request(Endpoint::UiInfo, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { timeout_secs: 5 }));
        assert_eq!(requester.table().pending_len(), 0);
    }

    #[tokio::test]
    async fn gate_tracks_the_logged_in_link() {
        let requester = Requester::new(Duration::from_secs(5));
        requester.authorize(3);
        assert_eq!(requester.authorized_link().await.unwrap(), 3);

        requester.revoke();
        assert!(requester.authorized.borrow().is_none());

        // No transport attached: the gate opens, the send does not.
        requester.authorize(4);
        let err = requester
            .request(Endpoint::UiInfo, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }
}
