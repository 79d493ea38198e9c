//! Shared renewal of the access credential.
//!
//! At most one renewal call is in flight at any time. Every caller that asks
//! for a renewal while one is running joins it and observes the same outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AccessCredential, CredentialStore};
use crate::api::CORRELATION_HEADER;
use crate::models::AuthResponse;

/// Why a renewal did not produce a new credential. Any of these ends the
/// session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("Renewal request failed: {0}")]
    Transport(String),

    #[error("Renewal timed out")]
    Timeout,

    #[error("Renewal rejected with status {0}")]
    Rejected(u16),

    #[error("Malformed renewal response: {0}")]
    Malformed(String),
}

impl RenewalError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RenewalError::Timeout
        } else if err.is_decode() {
            RenewalError::Malformed(err.to_string())
        } else {
            RenewalError::Transport(err.to_string())
        }
    }
}

/// A renewal that any number of callers can await.
pub type PendingRenewal = Shared<BoxFuture<'static, Result<AccessCredential, RenewalError>>>;

/// Narrow interface the scheduler and the gateway use to ask for a renewal.
pub trait Renew: Send + Sync {
    /// Join the in-flight renewal, or start one if none is running.
    fn renew(&self) -> PendingRenewal;

    /// Why the most recent renewal failed, if it did. Reset by a success.
    fn last_failure(&self) -> Option<RenewalError> {
        None
    }
}

/// Performs renewals against the remote authority and writes the outcome
/// into the [`CredentialStore`].
///
/// The refresh cookie rides along in the client's cookie jar; this type
/// never sees it.
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    url: String,
    timeout: Duration,
    store: Arc<CredentialStore>,
    pending: Mutex<Option<PendingRenewal>>,
    last_failure: Mutex<Option<RenewalError>>,
}

impl RenewalCoordinator {
    pub fn new(
        client: Client,
        url: String,
        timeout: Duration,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                url,
                timeout,
                store,
                pending: Mutex::new(None),
                last_failure: Mutex::new(None),
            }),
        }
    }

    /// Whether a renewal call is currently in flight.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }
}

impl Renew for RenewalCoordinator {
    fn renew(&self) -> PendingRenewal {
        let mut slot = self.inner.pending.lock();
        if let Some(pending) = slot.as_ref() {
            debug!("Joining in-flight renewal");
            return pending.clone();
        }

        let inner = self.inner.clone();
        let pending = async move { inner.run().await }.boxed().shared();
        *slot = Some(pending.clone());
        drop(slot);

        // Driven to completion even if every caller goes away.
        tokio::spawn(pending.clone());
        pending
    }

    fn last_failure(&self) -> Option<RenewalError> {
        self.inner.last_failure.lock().clone()
    }
}

impl Inner {
    async fn run(&self) -> Result<AccessCredential, RenewalError> {
        let outcome = self.call_remote().await;

        match &outcome {
            Ok(credential) => {
                info!(expires_at = ?credential.expires_at(), "Access credential renewed");
                *self.last_failure.lock() = None;
                self.store.set(Some(credential.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Renewal failed, clearing credential");
                // Recorded before the clear so late 401s can report it.
                *self.last_failure.lock() = Some(e.clone());
                self.store.clear();
            }
        }

        *self.pending.lock() = None;
        outcome
    }

    async fn call_remote(&self) -> Result<AccessCredential, RenewalError> {
        let correlation_id = Uuid::new_v4().to_string();
        debug!(correlation_id = %correlation_id, url = %self.url, "Requesting renewal");

        let response = self
            .client
            .post(&self.url)
            .header(CORRELATION_HEADER, correlation_id.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(RenewalError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenewalError::Rejected(status.as_u16()));
        }

        let body: AuthResponse = response.json().await.map_err(RenewalError::from_reqwest)?;
        if body.access_token.trim().is_empty() {
            return Err(RenewalError::Malformed("empty access token".to_string()));
        }
        Ok(AccessCredential::new(body.access_token))
    }
}
