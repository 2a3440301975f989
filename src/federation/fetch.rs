//! Remote ActivityPub document fetching
//!
//! Destinations are checked before any request is sent: only http(s), and no
//! loopback/private/link-local hosts, including hosts that merely resolve to
//! such addresses.

use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::error::AppError;
use crate::metrics::FEDERATION_REQUESTS_TOTAL;

const ACTIVITY_JSON: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let lookup = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::RemoteFetch(format!("failed to resolve {host}: {e}")))?;

    let mut resolved_any = false;
    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::RemoteFetch(format!("no DNS records for {host}")));
    }

    Ok(())
}

/// Reject destinations a fetch must never reach
pub async fn validate_fetch_target(url: &Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::RemoteFetch(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::RemoteFetch(format!("missing host in {url}")))?;
    if is_disallowed_host(host) {
        return Err(AppError::Forbidden);
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| AppError::RemoteFetch(format!("missing port in {url}")))?;
    validate_resolved_host_ips(host.trim_end_matches('.'), port).await
}

/// Fetches ActivityPub documents from other servers
#[derive(Clone)]
pub struct RemoteFetcher {
    http_client: reqwest::Client,
    allow_private_addresses: bool,
}

impl RemoteFetcher {
    /// Create a fetcher with its own HTTP client
    pub fn new(timeout: Duration, allow_private_addresses: bool) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fedibox/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(http_client, allow_private_addresses))
    }

    pub fn with_client(http_client: reqwest::Client, allow_private_addresses: bool) -> Self {
        Self {
            http_client,
            allow_private_addresses,
        }
    }

    /// Fetch a JSON document
    ///
    /// Every failure (blocked destination, transport, status, body) is
    /// reported as [`AppError::RemoteFetch`].
    pub async fn fetch_document(&self, url: &Url) -> Result<serde_json::Value, AppError> {
        let result = self.fetch_inner(url).await;

        let status = if result.is_ok() { "success" } else { "failure" };
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["fetch", status])
            .inc();

        result.map_err(|e| match e {
            AppError::RemoteFetch(message) => AppError::RemoteFetch(message),
            other => AppError::RemoteFetch(format!("{url}: {other}")),
        })
    }

    async fn fetch_inner(&self, url: &Url) -> Result<serde_json::Value, AppError> {
        if !self.allow_private_addresses {
            validate_fetch_target(url).await?;
        }

        tracing::debug!(url = %url, "Fetching remote document");

        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", ACTIVITY_JSON)
            .send()
            .await
            .map_err(|e| AppError::RemoteFetch(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::RemoteFetch(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::RemoteFetch(format!("{url}: invalid JSON: {e}")))?;

        if !document.is_object() {
            return Err(AppError::RemoteFetch(format!(
                "{url}: document is not an object"
            )));
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use serde_json::json;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn disallowed_hosts_are_detected() {
        assert!(is_disallowed_host("localhost"));
        assert!(is_disallowed_host("api.localhost."));
        assert!(is_disallowed_host("127.0.0.1"));
        assert!(is_disallowed_host("10.1.2.3"));
        assert!(is_disallowed_host("[::1]"));
        assert!(!is_disallowed_host("remote.example"));
        assert!(!is_disallowed_host("93.184.216.34"));
    }

    #[tokio::test]
    async fn validate_fetch_target_rejects_loopback() {
        let url = Url::parse("http://127.0.0.1:8080/users/alice").unwrap();
        assert!(matches!(
            validate_fetch_target(&url).await,
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn validate_fetch_target_rejects_non_http_scheme() {
        let url = Url::parse("ftp://remote.example/users/alice").unwrap();
        assert!(matches!(
            validate_fetch_target(&url).await,
            Err(AppError::RemoteFetch(_))
        ));
    }

    #[tokio::test]
    async fn fetch_blocks_private_address_by_default() {
        let base = spawn_server(Router::new().route(
            "/notes/1",
            get(|| async { Json(json!({ "id": "x", "type": "Note" })) }),
        ))
        .await;
        let fetcher = RemoteFetcher::new(Duration::from_secs(5), false).unwrap();

        let result = fetcher
            .fetch_document(&Url::parse(&format!("{base}/notes/1")).unwrap())
            .await;
        assert!(matches!(result, Err(AppError::RemoteFetch(_))));
    }

    #[tokio::test]
    async fn fetch_returns_document_when_allowed() {
        let base = spawn_server(Router::new().route(
            "/notes/1",
            get(|| async { Json(json!({ "id": "x", "type": "Note" })) }),
        ))
        .await;
        let fetcher = RemoteFetcher::new(Duration::from_secs(5), true).unwrap();

        let document = fetcher
            .fetch_document(&Url::parse(&format!("{base}/notes/1")).unwrap())
            .await
            .unwrap();
        assert_eq!(document["type"], "Note");
    }

    #[tokio::test]
    async fn fetch_reports_http_errors() {
        let base = spawn_server(Router::new()).await;
        let fetcher = RemoteFetcher::new(Duration::from_secs(5), true).unwrap();

        let result = fetcher
            .fetch_document(&Url::parse(&format!("{base}/missing")).unwrap())
            .await;
        assert!(matches!(result, Err(AppError::RemoteFetch(message)) if message.contains("404")));
    }
}
