//! Client de l'API OpenChargeMap
//!
//! Une seule requête par exécution (pas de pagination): `maxresults` borne la
//! taille de la réponse.

use evpoi::{parse_stations, PoiError, RawStation};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;

/// Longueur maximale du corps d'erreur écrit dans les logs
const MAX_LOGGED_BODY: usize = 2_048;

/// Erreurs de la source POI
#[derive(Debug, Error)]
pub enum SourceError {
    /// Réponse non-2xx de l'API
    #[error("POI API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Échec de transport
    #[error("POI API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Corps illisible
    #[error("POI API payload: {0}")]
    Decode(#[from] PoiError),
}

/// Client de l'API POI
#[derive(Debug, Clone)]
pub struct PoiSourceClient {
    http: Client,
    base_url: String,
    api_key: String,
    max_results: u32,
}

impl PoiSourceClient {
    pub fn new(http: Client, config: &SourceConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results,
        }
    }

    /// Récupère les stations brutes d'un pays
    pub async fn fetch(&self, country_code: &str) -> Result<Vec<RawStation>, SourceError> {
        info!(country = country_code, max_results = self.max_results, "Fetching POIs");

        let response = self
            .http
            .get(&self.base_url)
            .header("X-API-Key", &self.api_key)
            .query(&[
                ("output", "json"),
                ("countrycode", country_code),
                ("maxresults", &self.max_results.to_string()),
                ("compact", "false"),
                ("verbose", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body_len = body.len(),
                body = log_excerpt(&body),
                "POI API returned an error status"
            );
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "POI payload received");
        let stations = parse_stations(&bytes)?;
        info!(stations = stations.len(), "POIs fetched");
        Ok(stations)
    }
}

/// Début du corps, coupé sur une frontière de caractère
fn log_excerpt(body: &str) -> &str {
    if body.len() <= MAX_LOGGED_BODY {
        return body;
    }
    let mut end = MAX_LOGGED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PoiSourceClient {
        let config = SourceConfig {
            base_url: format!("{}/v3/poi/", server.uri()),
            api_key: "test-key".into(),
            country_code: "GB".into(),
            max_results: 60_000,
        };
        PoiSourceClient::new(Client::new(), &config)
    }

    #[tokio::test]
    async fn test_fetch_sends_parameters_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/poi/"))
            .and(header("X-API-Key", "test-key"))
            .and(query_param("output", "json"))
            .and(query_param("countrycode", "GB"))
            .and(query_param("maxresults", "60000"))
            .and(query_param("compact", "false"))
            .and(query_param("verbose", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"ID": 1, "UUID": "u-1", "AddressInfo": {"Latitude": 51.5, "Longitude": -0.1}, "Connections": []}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let stations = client(&server).fetch("GB").await.unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].uuid.as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid API key"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("GB").await.unwrap_err();
        match err {
            SourceError::Upstream { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "invalid API key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_long_upstream_body_is_kept_whole() {
        let body = format!("{}END", "é".repeat(1_500));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string(body.clone()))
            .mount(&server)
            .await;

        let err = client(&server).fetch("GB").await.unwrap_err();
        match err {
            SourceError::Upstream { status, body: got } => {
                assert_eq!(status, 502);
                assert!(got.len() > MAX_LOGGED_BODY);
                assert_eq!(got, body);
                assert!(got.ends_with("END"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_log_excerpt_cuts_on_char_boundary() {
        assert_eq!(log_excerpt("short"), "short");
        let long = "é".repeat(1_500);
        let excerpt = log_excerpt(&long);
        assert!(excerpt.len() <= MAX_LOGGED_BODY);
        assert_eq!(excerpt.len(), MAX_LOGGED_BODY);
        assert!(excerpt.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = client(&server).fetch("GB").await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let config = SourceConfig {
            base_url: "http://127.0.0.1:9/v3/poi/".into(),
            api_key: "k".into(),
            country_code: "GB".into(),
            max_results: 10,
        };
        let err = PoiSourceClient::new(Client::new(), &config)
            .fetch("GB")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Http(_)));
    }
}
