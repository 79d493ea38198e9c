use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{AccessCredential, CredentialStore};
use crate::api::{ApiError, ApiRequest, RequestGateway};
use crate::cache::{CachedData, ProfileCache};
use crate::config::Endpoints;
use crate::models::{AuthResponse, LoginRequest, ProfileSummary, Registration};

/// Register, login, logout and identity checks against the authority.
pub struct SessionFlows {
    gateway: RequestGateway,
    store: Arc<CredentialStore>,
    profile: ProfileCache,
    endpoints: Endpoints,
    logout_timeout: Duration,
}

impl SessionFlows {
    pub fn new(
        gateway: RequestGateway,
        store: Arc<CredentialStore>,
        profile: ProfileCache,
        endpoints: Endpoints,
        logout_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            profile,
            endpoints,
            logout_timeout,
        }
    }

    /// Sign in with an email address and password.
    ///
    /// # Errors
    /// `Rejected` with the server's message when the credentials are refused.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<ProfileSummary, ApiError> {
        let body = LoginRequest {
            email: identifier,
            password: secret,
        };
        let request = ApiRequest::post(&self.endpoints.login).json(&body)?;
        self.authenticate(request).await
    }

    /// Create an account and sign in to it.
    pub async fn register(&self, registration: &Registration) -> Result<ProfileSummary, ApiError> {
        let request = ApiRequest::post(&self.endpoints.register).json(registration)?;
        self.authenticate(request).await
    }

    async fn authenticate(&self, request: ApiRequest) -> Result<ProfileSummary, ApiError> {
        let request = request.exempt_from_renewal();
        let response = self.gateway.request(&request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), path = request.target(), "Sign-in refused");
            return Err(ApiError::rejected(status, &body));
        }

        let auth: AuthResponse = response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse auth response: {}", e))
        })?;
        if auth.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "Auth response has an empty token".to_string(),
            ));
        }

        self.store.set(Some(AccessCredential::new(auth.access_token)));

        let profile = match auth.user {
            Some(user) => {
                self.remember(&user);
                user
            }
            None => match self.current_user().await {
                Ok(profile) => profile,
                Err(e) => {
                    // Sign-in is all or nothing.
                    warn!(error = %e, "Identity lookup after sign-in failed");
                    self.end_session_locally();
                    return Err(e);
                }
            },
        };
        info!(user_id = %profile.id, "Signed in");
        Ok(profile)
    }

    /// Revoke the refresh cookie server-side, best effort, then always
    /// clear local session state.
    pub async fn logout(&self) {
        let request = ApiRequest::post(&self.endpoints.logout).exempt_from_renewal();

        match tokio::time::timeout(self.logout_timeout, self.gateway.request(&request)).await {
            Ok(Ok(response)) if response.status().is_success() => debug!("Server-side logout done"),
            Ok(Ok(response)) => {
                warn!(status = response.status().as_u16(), "Server-side logout refused")
            }
            Ok(Err(e)) => warn!(error = %e, "Server-side logout failed"),
            Err(_) => warn!(
                timeout_secs = self.logout_timeout.as_secs(),
                "Server-side logout timed out"
            ),
        }

        self.end_session_locally();
        info!("Signed out");
    }

    /// Ask the server who the current credential belongs to. Goes through
    /// the gateway, so an expired credential is renewed transparently.
    pub async fn current_user(&self) -> Result<ProfileSummary, ApiError> {
        let request = ApiRequest::get(&self.endpoints.me);
        match self.gateway.request_json::<ProfileSummary>(&request).await {
            Ok(profile) => {
                self.remember(&profile);
                Ok(profile)
            }
            Err(e) => {
                if e.is_session_ended() {
                    self.end_session_locally();
                }
                Err(e)
            }
        }
    }

    /// Drop the credential and the cached profile. Never touches the network.
    pub fn end_session_locally(&self) {
        self.store.clear();
        if let Err(e) = self.profile.clear() {
            warn!(error = %e, "Failed to clear profile cache");
        }
    }

    pub fn cached_profile(&self) -> Option<CachedData<ProfileSummary>> {
        self.profile.load_or_none()
    }

    fn remember(&self, profile: &ProfileSummary) {
        if let Err(e) = self.profile.save(profile) {
            warn!(error = %e, "Failed to cache profile summary");
        }
    }
}

