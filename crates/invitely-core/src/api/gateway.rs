//! Request gateway: every outbound call goes through here.
//!
//! Attaches the current credential, and answers a 401 with one shared
//! renewal followed by exactly one replay of the original call.

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, ApiRequest};
use crate::auth::{AccessCredential, CredentialStore, Renew, RenewalError};

/// Cheap to clone; the reqwest client shares its connection pool and
/// cookie jar.
#[derive(Clone)]
pub struct RequestGateway {
    client: Client,
    base_url: String,
    exempt_paths: Arc<Vec<String>>,
    store: Arc<CredentialStore>,
    renewer: Arc<dyn Renew>,
}

impl RequestGateway {
    /// `exempt_paths` are endpoint paths whose 401s must never trigger a
    /// renewal (renewal and sign-out at least).
    pub fn new(
        client: Client,
        base_url: String,
        exempt_paths: Vec<String>,
        store: Arc<CredentialStore>,
        renewer: Arc<dyn Renew>,
    ) -> Self {
        Self {
            client,
            base_url,
            exempt_paths: Arc::new(exempt_paths),
            store,
            renewer,
        }
    }

    /// Issue `request`, renewing and replaying once on 401.
    ///
    /// Any response other than a recoverable 401 is returned unchanged,
    /// whatever its status. The replay's response is returned as-is too.
    ///
    /// # Errors
    /// `SessionEnded` when the renewal fails; transport errors unchanged.
    pub async fn request(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let sent_with = self.store.get();
        let response = self.send(request, sent_with.as_ref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || self.is_exempt(request) {
            return Ok(response);
        }

        debug!(
            correlation_id = request.correlation_id(),
            path = request.target(),
            "Unauthorized, renewing credential before replay"
        );

        let credential = match (sent_with.as_ref(), self.store.get()) {
            // Someone else renewed while this call was in flight.
            (sent, Some(current)) if sent != Some(&current) => current,
            // The session ended while this call was in flight. Never renew
            // again on its behalf; a failed renewal is final.
            (Some(_), None) => {
                let reason = self
                    .renewer
                    .last_failure()
                    .unwrap_or(RenewalError::Rejected(StatusCode::UNAUTHORIZED.as_u16()));
                debug!(
                    correlation_id = request.correlation_id(),
                    error = %reason,
                    "Session already ended, not renewing"
                );
                return Err(ApiError::SessionEnded(reason));
            }
            _ => match self.renewer.renew().await {
                Ok(credential) => credential,
                Err(e) => {
                    // The coordinator has already cleared the store.
                    warn!(
                        correlation_id = request.correlation_id(),
                        error = %e,
                        "Renewal failed, ending session"
                    );
                    return Err(ApiError::SessionEnded(e));
                }
            },
        };

        debug!(correlation_id = request.correlation_id(), "Replaying request");
        self.send(request, Some(&credential)).await
    }

    /// [`request`](Self::request), then require success and decode JSON.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ApiError> {
        let response = Self::check_response(self.request(request).await?).await?;
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                request.target(),
                e
            ))
        })
    }

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn is_exempt(&self, request: &ApiRequest) -> bool {
        if request.is_renewal_exempt() {
            return true;
        }
        let path = request.path();
        self.exempt_paths.iter().any(|exempt| {
            path == *exempt || self.base_path_join(exempt).as_deref() == Some(path.as_str())
        })
    }

    /// `exempt` as seen from the server when the base URL carries a path
    /// prefix (`/api` + `/auth/refresh`).
    fn base_path_join(&self, exempt: &str) -> Option<String> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        Some(format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            exempt.trim_start_matches('/')
        ))
    }

    async fn send(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessCredential>,
    ) -> Result<Response, ApiError> {
        let builder = request.build(&self.client, &self.base_url, credential)?;
        builder.send().await.map_err(ApiError::from)
    }
}
