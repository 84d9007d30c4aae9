//! Wire transport abstraction.
//!
//! A transport moves a shaped payload to an upstream and returns the raw
//! generation record. It knows nothing about retries, breakers or status
//! vocabularies; [`crate::ProviderClient`] layers those on top.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vgen_models::ProviderId;

use crate::error::ProviderResult;

/// Generation record as an upstream reports it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGeneration {
    pub id: String,
    /// Provider-native status string
    pub status: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// 0-100
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub eta_secs: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Start a generation.
    async fn submit(&self, provider: ProviderId, payload: &Value) -> ProviderResult<RawGeneration>;

    /// Fetch the current state of a generation.
    async fn fetch(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<RawGeneration>;

    /// Ask the upstream to stop a generation.
    async fn cancel(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<()>;
}
