//! AI video provider clients.
//!
//! This crate provides:
//! - The [`VideoProvider`] contract and the six built-in providers
//! - Transports: HTTP (reqwest) and a deterministic simulated upstream
//! - [`ProviderClient`]: breaker + retry + normalization around a transport
//! - [`ProviderRegistry`]: provider lookup with per-provider breakers

pub mod client;
pub mod error;
pub mod http;
pub mod metrics;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod simulated;
pub mod transport;

pub use client::ProviderClient;
pub use error::{ProviderError, ProviderResult};
pub use http::{Endpoint, HttpTransport, HttpTransportConfig};
pub use provider::VideoProvider;
pub use providers::builtin;
pub use registry::ProviderRegistry;
pub use simulated::SimulatedTransport;
pub use transport::{ProviderTransport, RawGeneration};
