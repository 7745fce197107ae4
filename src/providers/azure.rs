//! `azure` provider rules — Azure OpenAI / Foundry deployments.

const API_VERSION_PARAM: &str = "api-version=2024-05-01-preview";

pub fn apply(
    mut path: String,
    mut raw_query: String,
    mut headers: Vec<(String, String)>,
    api_key: &str,
) -> (String, String, Vec<(String, String)>) {
    if path == "v1/chat/completions" || path == "chat/completions" {
        path = "models/chat/completions".to_string();
    }

    if !raw_query.contains("api-version=") {
        if raw_query.is_empty() {
            raw_query = API_VERSION_PARAM.to_string();
        } else {
            raw_query = format!("{}&{}", raw_query, API_VERSION_PARAM);
        }
    }

    headers.push(("api-key".to_string(), api_key.to_string()));
    headers.push(("Authorization".to_string(), format!("Bearer {}", api_key)));

    (path, raw_query, headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_chat_completions_path_and_injects_api_version() {
        let (path, query, headers) = apply(
            "v1/chat/completions".into(),
            "x=1".into(),
            vec![],
            "azure-key",
        );
        assert_eq!(path, "models/chat/completions");
        assert_eq!(query, "x=1&api-version=2024-05-01-preview");
        assert!(headers.contains(&("api-key".to_string(), "azure-key".to_string())));
        assert!(headers.contains(&("Authorization".to_string(), "Bearer azure-key".to_string())));
    }

    #[test]
    fn leaves_existing_api_version_untouched() {
        let (_, query, _) = apply(
            "models/chat/completions".into(),
            "api-version=2023-01-01".into(),
            vec![],
            "k",
        );
        assert_eq!(query, "api-version=2023-01-01");
    }
}
