//! Single-endpoint forwarding relay.
//!
//! `POST /proxy` with `{ "url", "payload", "headers" }` reissues the request as
//! a GET carrying those headers (and the payload as a JSON body when present)
//! and answers 200 with the upstream body parsed as JSON, whatever status the
//! upstream returned. Upstream failures surface as 500.

use crate::model::{ProxyRequest, RelayConfig};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RelayState {
    http: reqwest::Client,
}

impl RelayState {
    pub fn new(cfg: &RelayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("build upstream http client")?;
        Ok(Self { http })
    }
}

#[derive(Debug)]
pub enum RelayError {
    BadRequest(String),
    Upstream(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::BadRequest(msg) => write!(f, "bad relay request: {msg}"),
            RelayError::Upstream(msg) => write!(f, "upstream failure: {msg}"),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/proxy", post(proxy))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(cfg: RelayConfig) -> Result<()> {
    let state = RelayState::new(&cfg)?;
    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("bind relay on {}", cfg.listen))?;
    info!(addr = %listener.local_addr()?, "relay listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("relay shutting down");
        })
        .await
        .context("relay server failed")
}

async fn proxy(
    State(state): State<RelayState>,
    body: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<Value>, RelayError> {
    let Json(req) = body.map_err(|rej| RelayError::BadRequest(rej.body_text()))?;
    let url = req.url.clone();
    match forward(&state.http, req).await {
        Ok(v) => Ok(Json(v)),
        Err(e) => {
            warn!(%url, error = %e, "proxy request failed");
            Err(e)
        }
    }
}

/// Issue the outbound GET and return its body as JSON, untouched.
pub async fn forward(http: &reqwest::Client, req: ProxyRequest) -> Result<Value, RelayError> {
    let headers = header_map(&req)?;
    let mut builder = http.get(&req.url).headers(headers);
    if !req.payload.is_null() {
        builder = builder.json(&req.payload);
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| RelayError::Upstream(format!("request to {} failed: {e}", req.url)))?;
    let status = resp.status();
    debug!(url = %req.url, %status, "upstream responded");

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| RelayError::Upstream(format!("read body from {}: {e}", req.url)))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        RelayError::Upstream(format!(
            "{} returned a non-JSON body (status {status}): {e}",
            req.url
        ))
    })
}

fn header_map(req: &ProxyRequest) -> Result<HeaderMap, RelayError> {
    let mut map = HeaderMap::with_capacity(req.headers.len());
    for (k, v) in &req.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| RelayError::BadRequest(format!("header name {k:?}: {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| RelayError::BadRequest(format!("header {k} value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap as AxumHeaders, routing::get};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn upstream() -> Router {
        Router::new()
            .route(
                "/spf",
                get(|| async {
                    Json(json!({
                        "status": 200,
                        "data": {
                            "data": [{ "formasi_id": "8a02", "gaji_min": 2500000 }],
                            "meta": { "total": 1 }
                        }
                    }))
                }),
            )
            .route(
                "/missing",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "error": "not found", "code": 404 })),
                    )
                }),
            )
            .route("/html", get(|| async { "<html>maintenance</html>" }))
            .route(
                "/echo",
                get(|headers: AxumHeaders, body: String| async move {
                    let header = |name: &str| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string()
                    };
                    Json(json!({
                        "user_agent": header("user-agent"),
                        "origin": header("origin"),
                        "body": serde_json::from_str::<Value>(&body).unwrap_or(Value::Null),
                    }))
                }),
            )
    }

    async fn relay() -> SocketAddr {
        let state = RelayState::new(&RelayConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            timeout: Some(Duration::from_secs(5)),
        })
        .unwrap();
        spawn(router(state)).await
    }

    fn request(url: String) -> ProxyRequest {
        ProxyRequest {
            url,
            payload: Value::Null,
            headers: BTreeMap::new(),
        }
    }

    async fn call(relay: SocketAddr, req: &ProxyRequest) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{relay}/proxy"))
            .json(req)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn passes_upstream_body_through_unchanged() {
        let up = spawn(upstream()).await;
        let relay = relay().await;

        let resp = call(relay, &request(format!("http://{up}/spf"))).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(
            body,
            json!({
                "status": 200,
                "data": {
                    "data": [{ "formasi_id": "8a02", "gaji_min": 2500000 }],
                    "meta": { "total": 1 }
                }
            })
        );
    }

    #[tokio::test]
    async fn upstream_error_status_is_not_surfaced() {
        let up = spawn(upstream()).await;
        let relay = relay().await;

        let resp = call(relay, &request(format!("http://{up}/missing"))).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "error": "not found", "code": 404 }));
    }

    #[tokio::test]
    async fn forwards_headers_and_payload() {
        let up = spawn(upstream()).await;
        let relay = relay().await;

        let mut req = request(format!("http://{up}/echo"));
        req.headers.insert("User-Agent".into(), "Mozilla/5.0 test".into());
        req.headers.insert("Origin".into(), "https://sscasn.bkn.go.id".into());
        req.payload = json!({ "kode_ref_pend": "5101087", "pengadaan_kd": 3, "offset": 10 });

        let body: Value = call(relay, &req).await.json().await.unwrap();
        assert_eq!(body["user_agent"], "Mozilla/5.0 test");
        assert_eq!(body["origin"], "https://sscasn.bkn.go.id");
        assert_eq!(body["body"]["offset"], 10);
    }

    #[tokio::test]
    async fn non_json_upstream_body_is_a_server_error() {
        let up = spawn(upstream()).await;
        let relay = relay().await;

        let resp = call(relay, &request(format!("http://{up}/html"))).await;
        assert_eq!(resp.status(), 500);
        assert!(resp.text().await.unwrap().contains("non-JSON"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_server_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let relay = relay().await;

        let resp = call(relay, &request(format!("http://{dead}/spf"))).await;
        assert_eq!(resp.status(), 500);
    }

    #[tokio::test]
    async fn malformed_relay_body_is_rejected() {
        let relay = relay().await;
        let resp = reqwest::Client::new()
            .post(format!("http://{relay}/proxy"))
            .header("content-type", "application/json")
            .body(r#"{"payload": {}}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn invalid_header_name_is_rejected() {
        let up = spawn(upstream()).await;
        let relay = relay().await;
        let mut req = request(format!("http://{up}/spf"));
        req.headers.insert("bad header".into(), "x".into());

        let resp = call(relay, &req).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn only_post_is_routed() {
        let relay = relay().await;
        let resp = reqwest::get(format!("http://{relay}/proxy")).await.unwrap();
        assert_eq!(resp.status(), 405);
    }
}
