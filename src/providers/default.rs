//! `default` provider rules — plain OpenAI-compatible endpoints (OpenAI,
//! Anthropic, and any unrecognized provider name).

/// Inject a bearer token and leave the path/query untouched.
pub fn apply(
    path: String,
    raw_query: String,
    mut headers: Vec<(String, String)>,
    api_key: &str,
) -> (String, String, Vec<(String, String)>) {
    headers.push(("Authorization".to_string(), format!("Bearer {}", api_key)));
    (path, raw_query, headers)
}
