use std::sync::Arc;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{
    AccessCredential, CredentialObserver, CredentialStore, Renew, RenewalCoordinator,
    RenewalScheduler, SessionFlows, Visibility,
};
use crate::api::{ApiError, ApiRequest, RequestGateway};
use crate::cache::{CachedData, ProfileCache};
use crate::config::Config;
use crate::models::{ProfileSummary, Registration};

/// The session layer, wired together.
///
/// Owns one credential store, one renewal coordinator, one scheduler and the
/// gateway every call goes through. Create one per process (or per tab);
/// nothing survives it.
pub struct Session {
    store: Arc<CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
    scheduler: Arc<RenewalScheduler>,
    gateway: RequestGateway,
    flows: SessionFlows,
}

impl Session {
    /// Build a session for `config`. Must be called inside a tokio runtime.
    pub fn new(config: &Config, profile: ProfileCache) -> Result<Self, ApiError> {
        // In-memory cookie jar: the refresh cookie lives and dies with us.
        let client = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()?;

        let store = Arc::new(CredentialStore::new());
        let renewal = Arc::new(RenewalCoordinator::new(
            client.clone(),
            config.endpoint_url(&config.endpoints.refresh),
            config.renewal_timeout(),
            store.clone(),
        ));
        let renewer: Arc<dyn Renew> = renewal.clone();

        let scheduler = Arc::new(RenewalScheduler::new(
            store.clone(),
            renewer.clone(),
            config.safety_margin(),
        ));
        let observer: Arc<dyn CredentialObserver> = scheduler.clone();
        store.observe(&observer);

        let endpoints = &config.endpoints;
        let exempt = vec![
            endpoints.refresh.clone(),
            endpoints.logout.clone(),
            endpoints.login.clone(),
            endpoints.register.clone(),
        ];
        let gateway = RequestGateway::new(
            client,
            config.api_base_url.clone(),
            exempt,
            store.clone(),
            renewer,
        );

        let flows = SessionFlows::new(
            gateway.clone(),
            store.clone(),
            profile,
            endpoints.clone(),
            config.renewal_timeout(),
        );

        debug!(base_url = %config.api_base_url, "Session layer ready");
        Ok(Self {
            store,
            renewal,
            scheduler,
            gateway,
            flows,
        })
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<ProfileSummary, ApiError> {
        self.flows.login(identifier, secret).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<ProfileSummary, ApiError> {
        self.flows.register(registration).await
    }

    /// Always leaves the session signed out, whatever the server says.
    pub async fn logout(&self) {
        self.flows.logout().await
    }

    /// Server-verified identity; what route guards should call.
    pub async fn current_user(&self) -> Result<ProfileSummary, ApiError> {
        self.flows.current_user().await
    }

    /// Try to mint a credential from the refresh cookie alone, as on a page
    /// reload. Returns whether a session was recovered.
    pub async fn resume(&self) -> bool {
        match self.renewal.renew().await {
            Ok(_) => {
                info!("Session resumed");
                true
            }
            Err(e) => {
                debug!(error = %e, "No session to resume");
                self.flows.end_session_locally();
                false
            }
        }
    }

    /// Send an arbitrary API call through the gateway.
    ///
    /// # Errors
    /// `SessionEnded` after a failed renewal; local state is already cleared
    /// and the caller should route to sign-in.
    pub async fn request(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        self.end_on_session_loss(self.gateway.request(request).await)
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ApiError> {
        self.end_on_session_loss(self.gateway.request_json(request).await)
    }

    fn end_on_session_loss<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(ApiError::SessionEnded(_)) = &result {
            self.flows.end_session_locally();
        }
        result
    }

    /// The current credential. Never blocks, never hits the network.
    pub fn credential(&self) -> Option<AccessCredential> {
        self.store.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.exists()
    }

    /// Who was last signed in here, and how long ago that was cached.
    pub fn cached_profile(&self) -> Option<CachedData<ProfileSummary>> {
        self.flows.cached_profile()
    }

    /// Report that the host moved between foreground and background.
    pub fn visibility_changed(&self, visibility: Visibility) {
        self.scheduler.visibility_changed(visibility);
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Cancels the timer; the credential goes with the store.
        self.scheduler.disarm();
    }
}
