//! Client-side session layer for the invitely API.
//!
//! Holds the short-lived access credential in memory, renews it before it
//! expires, and makes every API call self-healing with respect to expiry.
//! UI code talks to [`Session`] only.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiError, ApiRequest, MultipartField, RequestGateway};
pub use auth::{AccessCredential, CredentialStore, RenewalError, Session, Visibility};
pub use cache::{CachedData, ProfileCache};
pub use config::{Config, Endpoints};
pub use models::{ProfileSummary, Registration};
