//! Resilient client for the command-post remote service.
//!
//! The remote service is slow (some endpoints wait on a generative backend)
//! and fails independently of the panel. This crate turns that boundary into
//! a predictable contract:
//!
//! - [`executor::RequestExecutor`] runs one logical call as a bounded
//!   sequence of timed attempts with linear backoff
//! - [`transport::Transport`] is the single network primitive the executor
//!   drives; [`transport::HttpTransport`] is the reqwest implementation
//! - [`service::ServiceClient`] is the typed catalog of remote operations,
//!   including the single-flight chat send

pub mod error;
pub mod executor;
pub mod service;
pub mod transport;

pub use error::{AttemptError, ClientError};
pub use executor::{RequestExecutor, RetryPolicy};
pub use service::{ChatReply, ConnectionStatus, ServiceClient};
pub use transport::{ApiRequest, HttpTransport, Method, Transport};
