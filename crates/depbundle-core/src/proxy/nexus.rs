//! Nexus script API client.
//!
//! The proxy's management operations are Groovy scripts installed on the
//! Nexus instance. Running one is a single authenticated POST:
//!
//! ```text
//! POST <url>/service/rest/v1/script/<name>/run
//! Content-Type: text/plain
//!
//! {"repository_name": "...", "username": "...", ...}
//! ```

use super::ProxyClient;
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::version::USER_AGENT;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// HTTP client for a Nexus instance's script API.
#[derive(Clone)]
pub struct NexusClient {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

impl fmt::Debug for NexusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NexusClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl NexusClient {
    /// Create a client from the proxy settings.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)
            .map_err(|e| Error::proxy(format!("Invalid proxy URL '{}': {e}", config.url)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::proxy(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL that runs the named script.
    pub fn script_url(&self, script: &str) -> Result<Url> {
        self.base_url
            .join(&format!("service/rest/v1/script/{script}/run"))
            .map_err(|e| Error::proxy(format!("Failed to build URL for script '{script}': {e}")))
    }
}

#[async_trait]
impl ProxyClient for NexusClient {
    async fn execute_script(&self, script: &str, payload: serde_json::Value) -> Result<()> {
        let url = self.script_url(script)?;
        debug!(script, "executing proxy script");

        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(script, %status, "proxy script failed");
            return Err(Error::proxy(format!(
                "The proxy script {script} failed with status {status}: {}",
                body.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use base64::Engine;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn config(url: &str) -> ProxyConfig {
        ProxyConfig {
            url: url.to_string(),
            username: "admin".to_string(),
            password: "admin123".to_string(),
            ..ProxyConfig::default()
        }
    }

    /// One script run seen by the mock Nexus.
    #[derive(Debug, Clone)]
    struct ScriptCall {
        script: String,
        authorization: Option<String>,
        content_type: Option<String>,
        payload: serde_json::Value,
    }

    #[derive(Clone)]
    struct MockNexus {
        status: StatusCode,
        calls: Arc<Mutex<Vec<ScriptCall>>>,
    }

    async fn run_script(
        State(nexus): State<MockNexus>,
        Path(script): Path<String>,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, &'static str) {
        let header_value = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        nexus.calls.lock().unwrap().push(ScriptCall {
            script,
            authorization: header_value(header::AUTHORIZATION),
            content_type: header_value(header::CONTENT_TYPE),
            payload: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        });
        let text = if nexus.status.is_success() { "" } else { "script exploded" };
        (nexus.status, text)
    }

    /// Start a mock Nexus script API answering every run with `status`.
    async fn start_mock_nexus(status: StatusCode) -> (String, Arc<Mutex<Vec<ScriptCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/nexus/service/rest/v1/script/:script/run", post(run_script))
            .with_state(MockNexus {
                status,
                calls: Arc::clone(&calls),
            });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/nexus"), calls)
    }

    #[test]
    fn test_client_creation() {
        assert!(NexusClient::new(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_client_invalid_url() {
        assert!(NexusClient::new(&config("not-a-url")).is_err());
    }

    #[test]
    fn test_script_url_keeps_base_path() {
        let client = NexusClient::new(&config("http://proxy.example.com/nexus")).unwrap();
        assert_eq!(
            client.script_url("js_cleanup").unwrap().as_str(),
            "http://proxy.example.com/nexus/service/rest/v1/script/js_cleanup/run"
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let client = NexusClient::new(&config("http://nexus:8081")).unwrap();
        assert!(!format!("{client:?}").contains("admin123"));
    }

    #[tokio::test]
    async fn test_execute_script_posts_payload() {
        let (url, calls) = start_mock_nexus(StatusCode::OK).await;
        let client = NexusClient::new(&config(&url)).unwrap();

        client
            .execute_script(
                "js_before_content_staged",
                json!({"repository_name": "depbundle-js-1", "username": "depbundle-js-1"}),
            )
            .await
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.script, "js_before_content_staged");
        let credentials = base64::engine::general_purpose::STANDARD.encode("admin:admin123");
        assert_eq!(call.authorization.as_deref(), Some(format!("Basic {credentials}").as_str()));
        assert_eq!(call.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            call.payload,
            json!({"repository_name": "depbundle-js-1", "username": "depbundle-js-1"})
        );
    }

    #[tokio::test]
    async fn test_execute_script_failure_status() {
        let (url, calls) = start_mock_nexus(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = NexusClient::new(&config(&url)).unwrap();

        let err = client
            .execute_script("pip_after_content_staged", json!({"request_id": 3}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProxyProvisioning(_)));
        assert_eq!(
            err.to_string(),
            "The proxy script pip_after_content_staged failed with status \
             500 Internal Server Error: script exploded"
        );
        assert_eq!(calls.lock().unwrap()[0].payload, json!({"request_id": 3}));
    }

    #[tokio::test]
    async fn test_execute_script_unknown_route() {
        let (url, calls) = start_mock_nexus(StatusCode::OK).await;
        // Missing the /nexus base path
        let root = url.trim_end_matches("/nexus");
        let client = NexusClient::new(&config(root)).unwrap();

        let err = client.execute_script("js_cleanup", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("status 404"), "{err}");
        assert!(calls.lock().unwrap().is_empty());
    }
}
