//! Provider rewriter (D) — per-provider URL/query/header/body transforms.
//!
//! A request is rewritten in two stages: general rules that apply to every
//! provider (model substitution, credential-header stripping), then
//! provider-specific rules dispatched on [`Connection::provider`]. The
//! pipeline never string-matches on a provider name itself — it calls
//! [`rewrite`] and gets back a ready-to-send request.

pub mod aws;
pub mod azure;
pub mod default;
pub mod google;

use serde_json::Value;
use thiserror::Error;

use crate::store::Connection;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("no model alias in request body or path")]
    NoAlias,
    #[error("failed to build outbound request: {0}")]
    UrlBuild(String),
}

/// Everything the rewriter needs, gathered by the pipeline before dispatch.
pub struct RewriteContext<'a> {
    pub connection: &'a Connection,
    pub remote_model: &'a str,
    pub model_alias: &'a str,
    pub path: &'a str,
    pub raw_query: &'a str,
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
    pub body_json: Option<Value>,
}

pub struct RewriteOutput {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Extract a model alias from a request path per the general rule: split on
/// `/`, find the segment `"models"`, take the segment after it, chop at the
/// first `:`. Used by the pipeline when the body carries no `"model"` field.
pub fn extract_alias_from_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let idx = segments.iter().position(|s| *s == "models")?;
    let candidate = segments.get(idx + 1)?;
    let alias = candidate.split(':').next().unwrap_or(candidate);
    if alias.is_empty() {
        None
    } else {
        Some(alias.to_string())
    }
}

fn strip_credential_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(k, _)| {
            let lk = k.to_ascii_lowercase();
            lk != "authorization" && lk != "host" && lk != "api-key"
        })
        .cloned()
        .collect()
}

/// Join `base` (endpoint, no trailing slash) with `path` (no leading slash)
/// and `raw_query`, producing the final outbound URL.
fn assemble_url(base: &str, path: &str, raw_query: &str) -> String {
    let mut url = format!("{}/{}", base, path);
    if !raw_query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(raw_query);
    }
    url
}

pub fn rewrite(ctx: RewriteContext) -> Result<RewriteOutput, RewriteError> {
    let base = ctx.connection.endpoint.trim_end_matches('/').to_string();
    let mut path = ctx.path.trim_start_matches('/').to_string();
    let mut raw_query = ctx.raw_query.to_string();

    let mut body_json = ctx.body_json;
    let had_model_field = body_json
        .as_ref()
        .and_then(Value::as_object)
        .map_or(false, |o| o.contains_key("model"));

    let substitute = !ctx.remote_model.is_empty() && ctx.remote_model != ctx.model_alias;
    let mut body = ctx.body.to_vec();

    if substitute {
        if had_model_field {
            if let Some(obj) = body_json.as_mut().and_then(Value::as_object_mut) {
                obj.insert(
                    "model".to_string(),
                    Value::String(ctx.remote_model.to_string()),
                );
            }
            if let Some(v) = &body_json {
                body = serde_json::to_vec(v)
                    .map_err(|e| RewriteError::UrlBuild(e.to_string()))?;
            }
        }
        if let Some(pos) = path.find(ctx.model_alias) {
            path.replace_range(pos..pos + ctx.model_alias.len(), ctx.remote_model);
        }
    }

    let headers = strip_credential_headers(ctx.headers);

    let (path, raw_query, headers) = match ctx.connection.provider.as_str() {
        "azure" => azure::apply(path, raw_query, headers, &ctx.connection.api_key),
        "google" => google::apply(
            path,
            raw_query,
            headers,
            &ctx.connection.endpoint,
            &ctx.connection.api_key,
        ),
        "aws" => aws::apply(path, raw_query, headers, ctx.remote_model, &ctx.connection.api_key),
        _ => default::apply(path, raw_query, headers, &ctx.connection.api_key),
    };

    let url = assemble_url(&base, &path, &raw_query);
    Ok(RewriteOutput { url, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conn(provider: &str, endpoint: &str, api_key: &str) -> Connection {
        Connection {
            id: "c1".into(),
            name: "c1".into(),
            provider: provider.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: "m".into(),
            deployment_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn extract_alias_from_models_segment() {
        assert_eq!(
            extract_alias_from_path("/v1/projects/p/locations/us-central1/publishers/google/models/gemini-1.5-flash:generateContent"),
            Some("gemini-1.5-flash".to_string())
        );
    }

    #[test]
    fn extract_alias_missing_without_models_segment() {
        assert_eq!(extract_alias_from_path("/v1/chat/completions"), None);
    }

    #[test]
    fn happy_openai_substitutes_model_and_sets_bearer() {
        let connection = conn("openai", "https://api.openai.com/v1", "real-openai-key");
        let body = br#"{"model":"gpt-4","messages":[]}"#;
        let body_json: Value = serde_json::from_slice(body).unwrap();
        let out = rewrite(RewriteContext {
            connection: &connection,
            remote_model: "gpt-4o",
            model_alias: "gpt-4",
            path: "/v1/chat/completions",
            raw_query: "",
            headers: &[("Authorization".into(), "Bearer client-vk".into())],
            body,
            body_json: Some(body_json),
        })
        .unwrap();

        assert_eq!(out.url, "https://api.openai.com/v1/v1/chat/completions");
        let parsed: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(parsed["model"], "gpt-4o");
        assert!(out
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer real-openai-key"));
    }

    #[test]
    fn body_without_model_field_is_byte_identical() {
        let connection = conn("openai", "https://api.openai.com/v1", "k");
        let body = br#"{"messages":[]}"#;
        let out = rewrite(RewriteContext {
            connection: &connection,
            remote_model: "gpt-4o",
            model_alias: "gpt-4",
            path: "/v1/chat/completions",
            raw_query: "",
            headers: &[],
            body,
            body_json: Some(serde_json::from_slice(body).unwrap()),
        })
        .unwrap();
        assert_eq!(out.body, body);
    }

    #[test]
    fn rate_limit_scenario_headers_stripped_case_insensitively() {
        let connection = conn("openai", "https://api.openai.com/v1", "k");
        let out = rewrite(RewriteContext {
            connection: &connection,
            remote_model: "gpt-4",
            model_alias: "gpt-4",
            path: "/v1/chat/completions",
            raw_query: "",
            headers: &[
                ("AUTHORIZATION".into(), "Bearer x".into()),
                ("HOST".into(), "example.com".into()),
                ("X-Custom".into(), "keep-me".into()),
            ],
            body: b"{}",
            body_json: Some(serde_json::json!({})),
        })
        .unwrap();
        assert!(!out.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("authorization")));
        assert!(!out.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("host")));
        assert!(out.headers.iter().any(|(k, _)| k == "X-Custom"));
    }
}
