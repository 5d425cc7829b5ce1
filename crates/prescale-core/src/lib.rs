//! prescale-core: shared types for the prescale autoscaler.
//!
//! Holds the pieces every other crate agrees on: the metric time series,
//! scaling decisions and their history, the running-instance handle, the
//! TOML configuration, the collaborator error taxonomy, and a small HTTP
//! client used by the Prometheus, Pushgateway and webhook integrations.
//!
//! # Clocks
//!
//! All timestamps are `chrono::DateTime<Utc>`. A control-loop tick captures
//! one precise `now` and derives a minute-truncated copy from it with
//! [`truncate_to_minute`]; the truncated value is what metric backends and
//! forecasts see.

pub mod config;
pub mod error;
pub mod http;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::future::Future;
use std::pin::Pin;

pub use config::{AutoscalerConfig, MetricKind};
pub use error::{CollaboratorError, CollaboratorResult, ConfigError};
pub use http::{HttpClient, HttpError};
pub use types::*;

/// Boxed `Send` future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
