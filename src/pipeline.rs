//! The request pipeline (E) — the one thing every inbound call goes
//! through: authenticate, resolve the alias, gate on rate limits, rewrite
//! for the upstream provider, forward, and relay the response back.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::PipelineError;
use crate::providers::{self, RewriteContext};
use crate::ratelimit::RateLimiter;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub limiter: RateLimiter,
    pub http: reqwest::Client,
}

/// Handle one inbound request end-to-end. Never returns an upstream error
/// as a Rust `Err` once the response has started streaming — errors after
/// that point just end the connection.
pub async fn handle(
    state: Arc<AppState>,
    method: Method,
    path: String,
    raw_query: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    match run(state, method.clone(), &path, &raw_query, headers, body).await {
        Ok(resp) => {
            tracing::info!(
                method = %method,
                path = %path,
                status = resp.status().as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                "request relayed"
            );
            resp
        }
        Err(err) => {
            tracing::warn!(
                method = %method,
                path = %path,
                error = %err,
                latency_ms = start.elapsed().as_millis() as u64,
                "request rejected"
            );
            err.into_response()
        }
    }
}

async fn run(
    state: Arc<AppState>,
    method: Method,
    path: &str,
    raw_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PipelineError> {
    let virtual_key_plaintext = extract_bearer(&headers)?;
    let virtual_key = state
        .store
        .get_virtual_key_by_plaintext(&virtual_key_plaintext)
        .await
        .map_err(|_| PipelineError::UnknownKey)?;

    let body_json: Option<Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    let model_alias = body_json
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| providers::extract_alias_from_path(path))
        .ok_or(PipelineError::NoAlias)?;

    let assignment = state
        .store
        .get_assignment(&virtual_key.id, &model_alias)
        .await
        .map_err(|_| PipelineError::NotAuthorized(model_alias.clone()))?;

    let provider_model = state
        .store
        .get_provider_model(&assignment.provider_model_id)
        .await
        .map_err(|e| PipelineError::DanglingRef(e.to_string()))?;
    let connection = state
        .store
        .get_connection(&provider_model.connection_id)
        .await
        .map_err(|e| PipelineError::DanglingRef(e.to_string()))?;

    let estimated_tokens = 1;
    let (tps_ok, tokens_ok) = state.limiter.check(
        &virtual_key.id,
        &model_alias,
        assignment.rate_limit_tps,
        assignment.rate_limit_tokens,
        estimated_tokens,
    );
    if !tps_ok {
        return Err(PipelineError::TpsExceeded);
    }
    if !tokens_ok {
        return Err(PipelineError::TokensExceeded);
    }

    let inbound_headers: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let rewritten = providers::rewrite(RewriteContext {
        connection: &connection,
        remote_model: &provider_model.remote_model,
        model_alias: &model_alias,
        path,
        raw_query,
        headers: &inbound_headers,
        body: &body,
        body_json,
    })?;

    let mut req = state.http.request(method, rewritten.url.as_str());
    for (name, value) in &rewritten.headers {
        if let Ok(v) = HeaderValue::from_str(value) {
            req = req.header(name.as_str(), v);
        }
    }
    req = req.body(rewritten.body);

    let upstream = req
        .send()
        .await
        .map_err(|e| PipelineError::UpstreamDial(e.to_string()))?;

    relay(upstream).await
}

/// Copy all response headers verbatim, then status, then stream the body —
/// mirroring the order §4.5 specifies.
async fn relay(upstream: reqwest::Response) -> Result<Response, PipelineError> {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        response_headers.insert(name.clone(), value.clone());
    }

    let stream = upstream.bytes_stream();
    let body = axum::body::Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn extract_bearer(headers: &HeaderMap) -> Result<String, PipelineError> {
    let raw = headers
        .get("authorization")
        .ok_or(PipelineError::AuthMissing)?
        .to_str()
        .map_err(|_| PipelineError::AuthBadScheme)?;
    raw.strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(PipelineError::AuthBadScheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer vk-123"));
        assert_eq!(extract_bearer(&headers).unwrap(), "vk-123");
    }

    #[test]
    fn extract_bearer_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(matches!(extract_bearer(&headers), Err(PipelineError::AuthMissing)));
    }

    #[test]
    fn extract_bearer_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert!(matches!(extract_bearer(&headers), Err(PipelineError::AuthBadScheme)));
    }

    mod end_to_end {
        use super::*;
        use crate::crypto;
        use crate::store::sqlite::SqliteStore;
        use crate::store::{Connection, ProviderModel, VirtualKey, VirtualKeyAssignment};
        use chrono::Utc;
        use uuid::Uuid;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        async fn fixture(mock_uri: &str) -> (Arc<AppState>, String) {
            let dir = tempfile::tempdir().unwrap();
            let db_path = dir.path().join("test.db");
            std::mem::forget(dir);
            let store = SqliteStore::open(&db_path, "a-full-32-byte-encryption-key!!!".to_string())
                .unwrap();

            let now = Utc::now();
            let connection = Connection {
                id: Uuid::new_v4().to_string(),
                name: "mock".into(),
                provider: "openai".into(),
                endpoint: mock_uri.to_string(),
                api_key: "sk-real-upstream-key".into(),
                model: "gpt-4o".into(),
                deployment_name: None,
                created_at: now,
                updated_at: now,
            };
            store.save_connection(&connection).await.unwrap();

            let model = ProviderModel {
                id: Uuid::new_v4().to_string(),
                connection_id: connection.id.clone(),
                name: "gpt-4".into(),
                remote_model: "gpt-4o".into(),
                deployment_name: None,
                created_at: now,
                updated_at: now,
            };
            store.save_provider_model(&model).await.unwrap();

            let vk_plaintext = "vk-client-token";
            let virtual_key = VirtualKey {
                id: Uuid::new_v4().to_string(),
                name: "team-a".into(),
                key: vk_plaintext.into(),
                key_hash: crypto::hash_key(vk_plaintext),
                created_at: now,
                updated_at: now,
            };
            store.save_virtual_key(&virtual_key).await.unwrap();

            let assignment = VirtualKeyAssignment {
                id: Uuid::new_v4().to_string(),
                virtual_key_id: virtual_key.id.clone(),
                provider_model_id: model.id.clone(),
                model_alias: "gpt-4".into(),
                rate_limit_tps: 1.0,
                rate_limit_tokens: 1_000_000,
                created_at: now,
                updated_at: now,
            };
            store.save_assignment(&assignment).await.unwrap();

            let state = Arc::new(AppState {
                store: Arc::new(store),
                limiter: RateLimiter::new(),
                http: reqwest::Client::new(),
            });
            (state, vk_plaintext.to_string())
        }

        #[tokio::test]
        async fn happy_path_relays_upstream_response() {
            let mock = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
                .mount(&mock)
                .await;

            let (state, vk) = fixture(&mock.uri()).await;
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {vk}")).unwrap());

            let body = serde_json::json!({"model": "gpt-4", "messages": []});
            let resp = run(
                state,
                Method::POST,
                "/v1/chat/completions",
                "",
                headers,
                Bytes::from(serde_json::to_vec(&body).unwrap()),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn missing_auth_header_is_rejected() {
            let mock = MockServer::start().await;
            let (state, _vk) = fixture(&mock.uri()).await;
            let err = run(
                state,
                Method::POST,
                "/v1/chat/completions",
                "",
                HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PipelineError::AuthMissing));
        }

        #[tokio::test]
        async fn unassigned_alias_is_forbidden() {
            let mock = MockServer::start().await;
            let (state, vk) = fixture(&mock.uri()).await;
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {vk}")).unwrap());

            let body = serde_json::json!({"model": "mystery", "messages": []});
            let err = run(
                state,
                Method::POST,
                "/v1/chat/completions",
                "",
                headers,
                Bytes::from(serde_json::to_vec(&body).unwrap()),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PipelineError::NotAuthorized(alias) if alias == "mystery"));
        }

        #[tokio::test]
        async fn second_request_within_one_second_hits_tps_limit() {
            let mock = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/chat/completions"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&mock)
                .await;

            let (state, vk) = fixture(&mock.uri()).await;
            let body = serde_json::json!({"model": "gpt-4", "messages": []});

            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {vk}")).unwrap());
            let first = run(
                state.clone(),
                Method::POST,
                "/v1/chat/completions",
                "",
                headers.clone(),
                Bytes::from(serde_json::to_vec(&body).unwrap()),
            )
            .await;
            assert!(first.is_ok());

            let second = run(
                state,
                Method::POST,
                "/v1/chat/completions",
                "",
                headers,
                Bytes::from(serde_json::to_vec(&body).unwrap()),
            )
            .await;
            assert!(matches!(second, Err(PipelineError::TpsExceeded)));
        }
    }
}
