//! `aws` provider rules — Bedrock invoke-model endpoints.
//!
//! No SigV4 signing is performed; this only rewrites the path and injects a
//! bearer token, which works against an OpenAI-compatible shim in front of
//! Bedrock but not against Bedrock's own API directly.

pub fn apply(
    mut path: String,
    raw_query: String,
    headers: Vec<(String, String)>,
    remote_model: &str,
    api_key: &str,
) -> (String, String, Vec<(String, String)>) {
    if path == "v1/chat/completions" || path == "chat/completions" {
        path = format!("model/{}/invoke", remote_model);
    }
    super::default::apply(path, raw_query, headers, api_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_chat_completions_to_invoke_path() {
        let (path, _, headers) = apply(
            "v1/chat/completions".into(),
            "".into(),
            vec![],
            "anthropic.claude-3-sonnet",
            "aws-key",
        );
        assert_eq!(path, "model/anthropic.claude-3-sonnet/invoke");
        assert!(headers.contains(&("Authorization".to_string(), "Bearer aws-key".to_string())));
    }
}
