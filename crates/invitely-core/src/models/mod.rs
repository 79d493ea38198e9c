//! Data models for the authority's account endpoints.

pub mod user;

pub use user::{AuthResponse, LoginRequest, ProfileSummary, Registration};
