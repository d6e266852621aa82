use erp_incident_triage::enrichment::{
    EmbeddingClient, LlmClassifier, OpenAiEmbeddingClient, OpenAiLlmClassifier,
};
use erp_incident_triage::error::{EmbeddingError, LlmError};
use erp_incident_triage::models::{Category, Environment, ErpModule, Incident, Severity};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::time::Duration;

fn embedding_client(url: &str, dimensions: Option<usize>) -> OpenAiEmbeddingClient {
    OpenAiEmbeddingClient::new(
        url,
        "text-embedding-3-small",
        "sk-test",
        dimensions,
        Duration::from_secs(2),
    )
    .unwrap()
}

fn llm_client(url: &str) -> OpenAiLlmClassifier {
    OpenAiLlmClassifier::new(url, "gpt-4o-mini", "sk-test", 0.3, Duration::from_secs(2)).unwrap()
}

fn create_test_incident() -> Incident {
    Incident::new(
        "Payroll export",
        "Bank file export failed for the monthly run.",
        ErpModule::Payroll,
        Environment::Prod,
        "People Ops",
    )
}

fn chat_body(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_embed_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/embeddings")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "text-embedding-3-small",
            "input": "Payroll export\n\nBank file export failed"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }] }).to_string())
        .create_async()
        .await;

    let vector = embedding_client(&server.url(), Some(3))
        .embed("Payroll export\n\nBank file export failed")
        .await
        .unwrap();

    assert_eq!(vector.as_slice(), &[0.1, 0.2, 0.3]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_embed_batch_reorders_by_index() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/embeddings")
        .with_status(200)
        .with_body(
            json!({ "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = embedding_client(&server.url(), None)
        .embed_batch(&texts)
        .await
        .unwrap();

    assert_eq!(vectors[0].as_slice(), &[1.0, 0.0]);
    assert_eq!(vectors[1].as_slice(), &[0.0, 1.0]);
}

#[tokio::test]
async fn test_embed_batch_without_indices_keeps_response_order() {
    let (server, _mock) = embeddings_server(
        json!({ "data": [
            { "embedding": [1.0, 0.0] },
            { "embedding": [0.0, 1.0] }
        ]})
        .to_string(),
    )
    .await;

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = embedding_client(&server.url(), None)
        .embed_batch(&texts)
        .await
        .unwrap();

    assert_eq!(vectors[0].as_slice(), &[1.0, 0.0]);
    assert_eq!(vectors[1].as_slice(), &[0.0, 1.0]);
}

#[tokio::test]
async fn test_embed_batch_count_mismatch() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/embeddings")
        .with_status(200)
        .with_body(json!({ "data": [{ "index": 0, "embedding": [1.0] }] }).to_string())
        .create_async()
        .await;

    let texts = vec!["a".to_string(), "b".to_string()];
    let err = embedding_client(&server.url(), None)
        .embed_batch(&texts)
        .await
        .unwrap_err();

    assert!(matches!(err, EmbeddingError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_embed_provider_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/embeddings")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
        .create_async()
        .await;

    let err = embedding_client(&server.url(), None)
        .embed("text")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EmbeddingError::Provider {
            status: 429,
            message: "Rate limit reached".to_string()
        }
    );
    assert!(err.is_transient());
}

async fn embeddings_server(body: String) -> (ServerGuard, Mock) {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/embeddings")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    (server, mock)
}

#[tokio::test]
async fn test_embed_malformed_responses() {
    let cases = [
        // wrong dimension
        (
            json!({ "data": [{ "index": 0, "embedding": [0.1, 0.2] }] }).to_string(),
            Some(1536),
        ),
        // no data
        (r#"{"object":"list"}"#.to_string(), None),
        // empty vector
        (json!({ "data": [{ "index": 0, "embedding": [] }] }).to_string(), None),
        // zero vector
        (json!({ "data": [{ "index": 0, "embedding": [0.0, 0.0] }] }).to_string(), None),
    ];

    for (body, dimensions) in cases {
        let (server, _mock) = embeddings_server(body).await;
        let err = embedding_client(&server.url(), dimensions)
            .embed("t")
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedResponse(_)), "{err:?}");
    }
}

#[tokio::test]
async fn test_embed_timeout() {
    // Accept connections but never answer
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = OpenAiEmbeddingClient::new(
        &format!("http://{}", addr),
        "text-embedding-3-small",
        "sk-test",
        None,
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.embed("text").await.unwrap_err();
    assert_eq!(err, EmbeddingError::Timeout(Duration::from_millis(200)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_classify_success() {
    let mut server = Server::new_async().await;
    let content = json!({
        "severity": "P2",
        "category": "Integration Failure",
        "summary": "Payroll bank export failed",
        "suggested_action": "Regenerate the bank file and resubmit",
        "confidence": 0.77
    })
    .to_string();

    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "response_format": { "type": "json_object" }
        })))
        .with_status(200)
        .with_body(chat_body(&content))
        .create_async()
        .await;

    let classification = llm_client(&server.url())
        .classify(&create_test_incident(), &[])
        .await
        .unwrap();

    assert_eq!(classification.severity, Severity::P2);
    assert_eq!(classification.category, Category::IntegrationFailure);
    assert_eq!(classification.confidence, 0.77);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_classify_prompt_mentions_empty_history() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("No similar incidents were found".to_string()))
        .with_status(200)
        .with_body(chat_body(
            r#"{"severity":"P3","category":"Unknown","summary":"s","suggested_action":"a","confidence":0.4}"#,
        ))
        .create_async()
        .await;

    llm_client(&server.url())
        .classify(&create_test_incident(), &[])
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_classify_strict_parse_errors() {
    let cases = [
        (
            r#"{"severity":"P2","category":"Network Issue","summary":"s","suggested_action":"a","confidence":0.5}"#,
            LlmError::InvalidValue {
                field: "category",
                value: "Network Issue".to_string(),
            },
        ),
        (
            r#"{"severity":"P2","category":"Data Issue"}"#,
            LlmError::MissingField("summary"),
        ),
    ];

    for (content, expected) in cases {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_body(content))
            .create_async()
            .await;

        let err = llm_client(&server.url())
            .classify(&create_test_incident(), &[])
            .await
            .unwrap_err();
        assert_eq!(err, expected);
    }

    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(chat_body("I think this is a P1."))
        .create_async()
        .await;
    let err = llm_client(&server.url())
        .classify(&create_test_incident(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Unparseable(_)));
}

#[tokio::test]
async fn test_classify_server_error_is_transient() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("upstream overloaded")
        .create_async()
        .await;

    let err = llm_client(&server.url())
        .classify(&create_test_incident(), &[])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LlmError::Provider {
            status: 503,
            message: "upstream overloaded".to_string()
        }
    );
    assert!(err.is_transient());
}
