use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use url::Url;

/// Label reported when a location cannot be determined
pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(thiserror::Error, Debug)]
pub enum GeolocationError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid lookup URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Geolocation API error: HTTP {0}")]
    ApiError(reqwest::StatusCode),

    #[error("No city in geolocation response")]
    MissingCity,
}

/// Maps a network address to a coarse location label.
///
/// Implementations never fail: any lookup problem yields [`UNKNOWN_LOCATION`].
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, address: IpAddr) -> String;

    /// Whether lookups go to a real upstream
    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    city: Option<String>,
}

/// Resolver backed by an ipinfo-compatible `GET {base}/{ip}/json` endpoint
pub struct IpInfoResolver {
    client: Client,
    base_url: Url,
    token: Option<Secret<String>>,
}

impl IpInfoResolver {
    pub fn new(
        base_url: &str,
        token: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, GeolocationError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    async fn lookup(&self, address: IpAddr) -> Result<String, GeolocationError> {
        let url = self.base_url.join(&format!("{}/json", address))?;

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GeolocationError::ApiError(response.status()));
        }

        let body: IpInfoResponse = response.json().await?;
        body.city
            .filter(|city| !city.trim().is_empty())
            .ok_or(GeolocationError::MissingCity)
    }
}

#[async_trait]
impl LocationResolver for IpInfoResolver {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self, address: IpAddr) -> String {
        match self.lookup(address).await {
            Ok(city) => {
                tracing::debug!(location = %city, "Resolved requester location");
                city
            }
            Err(e) => {
                tracing::warn!(error = %e, "Geolocation lookup failed, using fallback label");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }
}

/// Resolver that reports the same label for every address
pub struct FixedLocation(pub String);

impl FixedLocation {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LOCATION)
    }
}

#[async_trait]
impl LocationResolver for FixedLocation {
    async fn resolve(&self, _address: IpAddr) -> String {
        self.0.clone()
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn address() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    #[tokio::test]
    async fn test_resolves_city_from_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/203.0.113.7/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ip": "203.0.113.7", "city": "Lagos" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = IpInfoResolver::new(&server.uri(), None, Duration::from_secs(2)).unwrap();

        assert_eq!(resolver.resolve(address()).await, "Lagos");
    }

    #[tokio::test]
    async fn test_sends_token_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/203.0.113.7/json"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "city": "Ibadan" })),
            )
            .mount(&server)
            .await;

        let resolver = IpInfoResolver::new(
            &server.uri(),
            Some(Secret::new("secret-token".to_string())),
            Duration::from_secs(2),
        )
        .unwrap();

        assert_eq!(resolver.resolve(address()).await, "Ibadan");
    }

    #[tokio::test]
    async fn test_upstream_error_falls_back_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = IpInfoResolver::new(&server.uri(), None, Duration::from_secs(2)).unwrap();

        assert_eq!(resolver.resolve(address()).await, UNKNOWN_LOCATION);
    }

    #[tokio::test]
    async fn test_missing_city_falls_back_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "ip": "10.0.0.1", "bogon": true })),
            )
            .mount(&server)
            .await;

        let resolver = IpInfoResolver::new(&server.uri(), None, Duration::from_secs(2)).unwrap();

        assert_eq!(resolver.resolve(address()).await, UNKNOWN_LOCATION);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "city": "Lagos" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let resolver =
            IpInfoResolver::new(&server.uri(), None, Duration::from_millis(100)).unwrap();

        assert_eq!(resolver.resolve(address()).await, UNKNOWN_LOCATION);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_falls_back_to_unknown() {
        let resolver =
            IpInfoResolver::new("http://127.0.0.1:9", None, Duration::from_millis(200)).unwrap();

        assert_eq!(resolver.resolve(address()).await, UNKNOWN_LOCATION);
    }
}
