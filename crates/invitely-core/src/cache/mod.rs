//! Local caching of non-sensitive display data.
//!
//! Only the signed-in user's profile summary is cached, as JSON in the
//! cache directory, so a restarted client can greet the user before the
//! session is confirmed. Credentials are never cached.

pub mod profile;

pub use profile::{CachedData, ProfileCache};
