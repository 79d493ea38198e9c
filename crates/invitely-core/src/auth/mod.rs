//! Credential lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: volatile holder of the current access credential
//! - `RenewalCoordinator`: the single shared renewal operation
//! - `RenewalScheduler`: proactive renewal before expiry
//! - `SessionFlows`: login, registration, logout and identity checks
//! - `Session`: the wired-up inbound interface
//!
//! The access credential lives in memory only and is gone when the process
//! exits. The long-lived refresh cookie is held by the HTTP client's cookie
//! jar and is never read by this code.

pub mod credential;
pub mod flows;
pub mod renewal;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod timer;

pub use credential::AccessCredential;
pub use flows::SessionFlows;
pub use renewal::{PendingRenewal, Renew, RenewalCoordinator, RenewalError};
pub use scheduler::{RenewalScheduler, Visibility};
pub use session::Session;
pub use store::{CredentialObserver, CredentialStore};
pub use timer::ScheduledTask;
