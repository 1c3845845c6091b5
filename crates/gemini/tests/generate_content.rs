use axum::{
    Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use gemini_chat::types::{Content, GenerateContentRequest, GenerationConfig};
use gemini_chat::{Client, Config};
use secrecy::SecretString;
use serde_json::{Value, json};

async fn generate(
    Path(model_call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": { "code": 403, "message": "API key not valid.", "status": "PERMISSION_DENIED" } })),
        );
    }
    if model_call != "gemini-test:generateContent" {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    }

    let turns = body["contents"].as_array().map(Vec::len).unwrap_or(0);
    let max_tokens = body["generationConfig"]["maxOutputTokens"].clone();
    let text = format!("{turns} turns, max {max_tokens}");
    (
        StatusCode::OK,
        Json(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        })),
    )
}

async fn serve() -> String {
    let app = Router::new().route("/v1beta/models/{model_call}", post(generate));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1beta")
}

fn client(base_url: &str, api_key: &str) -> Client {
    let config = Config::builder()
        .with_base_url(base_url)
        .with_api_key(SecretString::from(api_key.to_string()))
        .with_model("gemini-test")
        .build();
    Client::new(config).unwrap()
}

fn request() -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: Some(Content::system("You are an interviewer.")),
        contents: vec![
            Content::user("I am ready."),
            Content::model("Tell me about yourself."),
            Content::user("I build things."),
        ],
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(150),
            temperature: None,
        }),
    }
}

#[tokio::test]
async fn test_generate_text_posts_to_model_endpoint() {
    let base_url = serve().await;
    let text = client(&base_url, "test-key")
        .generate_text(&request())
        .await
        .unwrap();
    assert_eq!(text, "3 turns, max 150");
}

#[tokio::test]
async fn test_error_status_carries_server_message() {
    let base_url = serve().await;
    let err = client(&base_url, "wrong-key")
        .generate_text(&request())
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("403"));
    assert!(message.contains("API key not valid."));
}
