//! HTTP transport for real provider APIs.
//!
//! JSON over HTTPS with bearer-key auth and one base URL per provider:
//! - `POST   {base}/generations`
//! - `GET    {base}/generations/{id}`
//! - `DELETE {base}/generations/{id}`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, info_span, Instrument};
use url::Url;
use vgen_models::ProviderId;

use crate::error::{ProviderError, ProviderResult};
use crate::transport::{ProviderTransport, RawGeneration};

// =============================================================================
// Configuration
// =============================================================================

/// Where to reach one provider.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: Url,
    pub api_key: Option<String>,
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub endpoints: HashMap<ProviderId, Endpoint>,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

fn default_base_url(id: ProviderId) -> &'static str {
    match id {
        ProviderId::Runway => "https://api.dev.runwayml.com/v1",
        ProviderId::Pika => "https://api.pika.art/v1",
        ProviderId::StableVideo => "https://api.stability.ai/v2beta",
        ProviderId::Luma => "https://api.lumalabs.ai/dream-machine/v1",
        ProviderId::Kling => "https://api.klingai.com/v1",
        ProviderId::Haiper => "https://api.haiper.ai/v1",
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpTransportConfig {
    /// Create config from environment variables.
    ///
    /// Reads `VGEN_<PROVIDER>_BASE_URL` (defaults to the public API) and
    /// `VGEN_<PROVIDER>_API_KEY` for every provider.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self {
            timeout: Duration::from_secs(
                std::env::var("VGEN_PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            ..Default::default()
        };

        for id in ProviderId::ALL {
            let prefix = format!("VGEN_{}", id.as_str().to_uppercase());
            let base_url = std::env::var(format!("{}_BASE_URL", prefix))
                .unwrap_or_else(|_| default_base_url(*id).to_string());
            let api_key = std::env::var(format!("{}_API_KEY", prefix))
                .ok()
                .filter(|k| !k.is_empty());
            config = config.with_endpoint(*id, &base_url, api_key)?;
        }

        Ok(config)
    }

    pub fn with_endpoint(
        mut self,
        id: ProviderId,
        base_url: &str,
        api_key: Option<String>,
    ) -> ProviderResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ProviderError::Config(format!("Invalid base URL for {}: {} ({})", id, base_url, e))
        })?;
        self.endpoints.insert(id, Endpoint { base_url, api_key });
        Ok(self)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// reqwest-backed [`ProviderTransport`].
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vgen-provider/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(HttpTransportConfig::from_env()?)
    }

    fn endpoint(&self, provider: ProviderId) -> ProviderResult<&Endpoint> {
        self.config
            .endpoints
            .get(&provider)
            .ok_or(ProviderError::NotConfigured(provider))
    }

    fn generations_url(&self, provider: ProviderId, id: Option<&str>) -> ProviderResult<String> {
        let base = self.endpoint(provider)?.base_url.as_str().trim_end_matches('/');
        Ok(match id {
            Some(id) => format!("{}/generations/{}", base, id),
            None => format!("{}/generations", base),
        })
    }

    fn authorize(&self, provider: ProviderId, builder: RequestBuilder) -> ProviderResult<RequestBuilder> {
        Ok(match &self.endpoint(provider)?.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        })
    }

    async fn send(&self, provider: ProviderId, builder: RequestBuilder) -> ProviderResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(provider, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::upstream(provider, status.as_u16(), truncate(&body, 512)))
    }

    async fn read_generation(provider: ProviderId, response: Response) -> ProviderResult<RawGeneration> {
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(provider, e))?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(provider, format!("{}: {}", e, truncate(&body, 256))))
    }
}

fn map_reqwest_error(provider: ProviderId, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout { provider }
    } else {
        ProviderError::network(provider, e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn submit(&self, provider: ProviderId, payload: &Value) -> ProviderResult<RawGeneration> {
        let url = self.generations_url(provider, None)?;
        let span = info_span!("provider_http", provider = %provider, operation = "submit");

        async {
            debug!(url = %url, "Submitting generation");
            let builder = self.authorize(provider, self.http.post(&url).json(payload))?;
            let response = self.send(provider, builder).await?;
            Self::read_generation(provider, response).await
        }
        .instrument(span)
        .await
    }

    async fn fetch(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<RawGeneration> {
        let url = self.generations_url(provider, Some(generation_id))?;
        let span = info_span!("provider_http", provider = %provider, operation = "fetch", generation_id = %generation_id);

        async {
            let builder = self.authorize(provider, self.http.get(&url))?;
            let response = self.send(provider, builder).await?;
            Self::read_generation(provider, response).await
        }
        .instrument(span)
        .await
    }

    async fn cancel(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<()> {
        let url = self.generations_url(provider, Some(generation_id))?;
        let span = info_span!("provider_http", provider = %provider, operation = "cancel", generation_id = %generation_id);

        async {
            let builder = self.authorize(provider, self.http.delete(&url))?;
            self.send(provider, builder).await.map(|_| ())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn transport(server: &MockServer) -> HttpTransport {
        let config = HttpTransportConfig::default()
            .with_endpoint(ProviderId::Runway, &server.uri(), Some("secret".to_string()))
            .unwrap();
        HttpTransport::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_submit_sends_bearer_and_parses_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generations"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen_1",
                "status": "PENDING"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let raw = transport(&server)
            .await
            .submit(ProviderId::Runway, &json!({ "promptText": "a fox" }))
            .await
            .unwrap();
        assert_eq!(raw.id, "gen_1");
        assert_eq!(raw.status, "PENDING");
        assert_eq!(raw.video_url, None);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generations/gen_1"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generations/gen_2"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let transport = transport(&server).await;
        let policy = vgen_resilience::RetryPolicy::default();

        let err = transport.fetch(ProviderId::Runway, "gen_1").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(policy.is_retryable(&err));

        let err = transport.fetch(ProviderId::Runway, "gen_2").await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(!policy.is_retryable(&err));
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generations/gen_1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .await
            .fetch(ProviderId::Runway, "gen_1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let server = MockServer::start().await;
        let err = transport(&server)
            .await
            .fetch(ProviderId::Kling, "gen_1")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::NotConfigured(ProviderId::Kling));
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = HttpTransportConfig::default()
            .with_endpoint(ProviderId::Luma, "not a url", None)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
