//! `google` provider rules — Google AI Studio and Vertex AI.

/// Drop any `key=...` pair from a raw query string and append a fresh one.
fn sanitize_query(raw_query: &str, api_key: &str) -> String {
    let mut pairs: Vec<&str> = raw_query
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("key="))
        .collect();
    let key_pair = format!("key={}", api_key);
    pairs.push(&key_pair);
    pairs.join("&")
}

pub fn apply(
    mut path: String,
    raw_query: String,
    mut headers: Vec<(String, String)>,
    endpoint: &str,
    api_key: &str,
) -> (String, String, Vec<(String, String)>) {
    let is_vertex = endpoint.contains("aiplatform.googleapis.com");
    if !is_vertex {
        if let Some(pos) = path.find("publishers/google/") {
            path.replace_range(pos..pos + "publishers/google/".len(), "");
        }
    }

    if endpoint.ends_with("/openai") && path.starts_with("v1/") {
        path = path.trim_start_matches("v1/").to_string();
    }

    let raw_query = sanitize_query(&raw_query, api_key);

    headers.push(("x-goog-api-key".to_string(), api_key.to_string()));
    if api_key.starts_with("ya29.") {
        headers.push(("Authorization".to_string(), format!("Bearer {}", api_key)));
    }

    (path, raw_query, headers)
}
