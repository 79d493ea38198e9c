//! Outbound HTTP plumbing for the invitely API.
//!
//! `ApiRequest` describes a call, `RequestGateway` sends it with the current
//! access credential and recovers from an expired one by renewing and
//! replaying once.

pub mod error;
pub mod gateway;
pub mod request;

pub use error::ApiError;
pub use gateway::RequestGateway;
pub use request::{ApiRequest, MultipartField, RequestBody, CORRELATION_HEADER};
