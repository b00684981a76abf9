//! Integration tests for the HTTP backends
//!
//! Tests request shape and response handling using wiremock.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use verifai::backends::{
    resolve_generation_backend, scoring_model_spec, GeminiClient, GenerationBackend,
    HttpScoringBackend, LocalLlmClient, PerplexitySearch, ScoringBackend, Scores, SearchBackend,
    UNCITED_RESULT_URL,
};
use verifai::config::{
    GenerationCandidate, GenerationConfig, GenerationProvider, RequestConfig, SearchConfig,
};
use verifai::error::BackendError;

/// Request config without retries for testing
fn no_retries() -> RequestConfig {
    RequestConfig {
        timeout_ms: 5000,
        max_retries: 0,
        retry_delay_ms: 10,
    }
}

fn search_client(base_url: &str, api_key: Option<&str>) -> PerplexitySearch {
    let config = SearchConfig {
        api_key: api_key.map(str::to_string),
        base_url: base_url.to_string(),
        ..Default::default()
    };
    PerplexitySearch::new(&config, no_retries()).expect("Failed to create search client")
}

#[cfg(test)]
mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_gemini_generate_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "  Привіт  "}], "role": "model"}
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            GeminiClient::new("test-key", &mock_server.uri(), "gemini-2.5-flash", no_retries())
                .unwrap();
        let reply = client.generate("Hello").await;

        assert_eq!(reply.unwrap(), "Привіт");
    }

    #[tokio::test]
    async fn test_gemini_without_candidates_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&mock_server)
            .await;

        let client =
            GeminiClient::new("test-key", &mock_server.uri(), "gemini-2.5-flash", no_retries())
                .unwrap();
        let err = client.generate("Hello").await.unwrap_err();

        match err {
            BackendError::Unavailable { message, retries, .. } => {
                assert!(message.contains("no candidates"), "message: {}", message);
                assert_eq!(retries, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gemini_retries_server_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let request_config = RequestConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            ..no_retries()
        };
        let client =
            GeminiClient::new("test-key", &mock_server.uri(), "gemini-2.5-flash", request_config)
                .unwrap();
        let err = client.generate("Hello").await.unwrap_err();

        assert!(err.to_string().contains("API error: 503 - overloaded"));
    }

    #[tokio::test]
    async fn test_local_chat_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gemma-3-12b",
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hi there\n"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            LocalLlmClient::new(&mock_server.uri(), "gemma-3-12b", 5000, no_retries()).unwrap();

        assert_eq!(client.generate("Hello").await.unwrap(), "Hi there");
        assert_eq!(client.name(), "local:gemma-3-12b");
    }

    #[tokio::test]
    async fn test_resolution_skips_gemini_without_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "local reply"}}]
            })))
            .mount(&mock_server)
            .await;

        let config = GenerationConfig {
            candidates: vec![
                GenerationCandidate {
                    provider: GenerationProvider::Gemini,
                    model: "gemini-2.5-flash".to_string(),
                    base_url: None,
                },
                GenerationCandidate {
                    provider: GenerationProvider::Local,
                    model: "gemma-3-12b".to_string(),
                    base_url: Some(mock_server.uri()),
                },
            ],
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            local_timeout_ms: 5000,
        };

        let backend = resolve_generation_backend(&config, &no_retries()).unwrap();
        assert_eq!(backend.name(), "local:gemma-3-12b");
        assert_eq!(backend.generate("ping").await.unwrap(), "local reply");
    }

    #[test]
    fn test_resolution_without_usable_candidate() {
        let config = GenerationConfig {
            candidates: vec![GenerationCandidate {
                provider: GenerationProvider::Gemini,
                model: "gemini-2.5-flash".to_string(),
                base_url: None,
            }],
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            local_timeout_ms: 5000,
        };

        let err = resolve_generation_backend(&config, &no_retries()).err().unwrap();
        assert!(matches!(err, BackendError::MissingCredentials { .. }));
    }
}

#[cfg(test)]
mod scoring_tests {
    use super::*;

    #[tokio::test]
    async fn test_binary_model_takes_top_label_from_nested_response() {
        let mock_server = MockServer::start().await;
        let spec = *scoring_model_spec("lapa-llm").unwrap();

        Mock::given(method("POST"))
            .and(path(format!("/models/{}", spec.model_id)))
            .and(header("Authorization", "Bearer hf-key"))
            .and(body_partial_json(json!({"inputs": "Текст"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
                {"label": "not_manipulative", "score": 0.2},
                {"label": "manipulative", "score": 0.8}
            ]])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpScoringBackend::new(
            &mock_server.uri(),
            Some("hf-key".to_string()),
            spec,
            no_retries(),
        )
        .unwrap();

        match backend.score("Текст").await.unwrap() {
            Scores::Single(top) => {
                assert_eq!(top.label, "manipulative");
                assert_eq!(top.score, 0.8);
            }
            other => panic!("expected a single score, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multilabel_model_keeps_every_label() {
        let mock_server = MockServer::start().await;
        let spec = *scoring_model_spec("modern-bert").unwrap();

        Mock::given(method("POST"))
            .and(path(format!("/models/{}", spec.model_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"label": "LABEL_1", "score": 0.9},
                {"label": "LABEL_4", "score": 0.05}
            ])))
            .mount(&mock_server)
            .await;

        let backend = HttpScoringBackend::new(&mock_server.uri(), None, spec, no_retries()).unwrap();
        let scores = backend.score("Текст").await.unwrap();

        match scores {
            Scores::Multi(labels) => {
                assert_eq!(labels.len(), 2);
                assert_eq!(labels[1].label, "LABEL_4");
            }
            other => panic!("expected multi-label scores, got {:?}", other),
        }
        assert_eq!(backend.default_threshold(), 0.15);
    }

    #[tokio::test]
    async fn test_scoring_error_status_is_reported() {
        let mock_server = MockServer::start().await;
        let spec = *scoring_model_spec("lapa-llm").unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Model is loading"))
            .mount(&mock_server)
            .await;

        let backend = HttpScoringBackend::new(&mock_server.uri(), None, spec, no_retries()).unwrap();
        let err = backend.score("Текст").await.unwrap_err();

        assert!(err.to_string().contains("Model is loading"));
    }
}

#[cfg(test)]
mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_citations_become_results() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer pplx-key"))
            .and(body_partial_json(json!({
                "model": "sonar",
                "search_domain_filter": ["-pinterest.com", "-reddit.com", "-quora.com"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Prices rose by 10%."}}],
                "citations": [
                    "https://stat.example.gov/prices",
                    "https://news.example.org/energy",
                    "https://bank.example.ua/report",
                    "https://ignored.example.com"
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let search = search_client(&mock_server.uri(), Some("pplx-key"));
        let results = search.search("gas prices 2025", 3).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].url, "https://stat.example.gov/prices");
        assert!(results.iter().all(|r| r.snippet == "Prices rose by 10%."));
    }

    #[tokio::test]
    async fn test_answer_without_citations_is_single_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "No official data found."}}]
            })))
            .mount(&mock_server)
            .await;

        let search = search_client(&mock_server.uri(), Some("pplx-key"));
        let results = search.search("gas prices 2025", 3).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, UNCITED_RESULT_URL);
        assert_eq!(results[0].snippet, "No official data found.");
    }

    #[tokio::test]
    async fn test_provider_error_yields_empty_results() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let search = search_client(&mock_server.uri(), Some("pplx-key"));
        assert!(search.search("gas prices 2025", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_skips_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let search = search_client(&mock_server.uri(), None);
        assert!(search.search("gas prices 2025", 3).await.is_empty());
    }
}
