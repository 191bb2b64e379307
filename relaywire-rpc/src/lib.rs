//! # relaywire-rpc
//!
//! Request/response layer for relaywire.
//!
//! This crate provides:
//! - The `{success, data | error, compressed}` envelope
//! - A correlator pairing each request with its reply or its deadline
//! - A responder that always answers with a well-formed envelope
//! - Rate limit, circuit breaker, middleware and shape validation hooks
//! - Configuration loading (YAML + environment)

pub mod config;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod server;

pub use config::{Config, ConfigError, RpcConfig};
pub use correlator::{CallState, Correlator};
pub use envelope::Envelope;
pub use error::{ErrorCode, RpcError};
pub use policy::{
    Admission, CircuitBreaker, Middleware, Policy, RateLimiter, ShapeValidator, ThresholdBreaker,
    TokenBucket,
};
pub use server::Responder;
