//! LMM Gateway. Uniform interface over inline/presigned-URL/model-upload
//! request modes, context-cache lifecycle, and tolerant structured-output
//! parsing.

mod cache;
mod error;
mod gateway;
mod model_name;
mod parsing;
mod request;
mod retry;

pub use error::LmmError;
pub use gateway::{generate_structured, HttpLmmGateway, LmmGateway};
pub use model_name::ModelName;
pub use parsing::parse_tolerant;
pub use request::{ContextCache, GenerateRequest, MediaPart, UploadState};

#[cfg(test)]
mod integration_tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn generate_retries_on_5xx_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/models:generate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/models:generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "{\"saveable\": true}" })))
            .mount(&server)
            .await;

        let gateway = HttpLmmGateway::new(server.uri(), "test-key");
        let request = GenerateRequest {
            system_instruction: "be concise".into(),
            reference_image: None,
            media: vec![],
            prompt: "evaluate".into(),
            cache_id: None,
        };

        let text = gateway.generate(ModelName::FastMultimodal, request).await.unwrap();
        assert_eq!(text, "{\"saveable\": true}");
    }

    #[tokio::test]
    async fn generate_does_not_retry_invalid_argument() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/models:generate"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad schema"))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpLmmGateway::new(server.uri(), "test-key");
        let request = GenerateRequest {
            system_instruction: "be concise".into(),
            reference_image: None,
            media: vec![],
            prompt: "evaluate".into(),
            cache_id: None,
        };

        let err = gateway
            .generate(ModelName::FastMultimodal, request)
            .await
            .unwrap_err();
        assert!(matches!(err, LmmError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn wait_for_upload_times_out_on_perpetual_processing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/files/handle-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "PROCESSING" })))
            .mount(&server)
            .await;

        let gateway = HttpLmmGateway::new(server.uri(), "test-key");
        let err = gateway
            .wait_for_upload("handle-1", Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LmmError::FileProcessingTimeout(_)));
    }

    #[tokio::test]
    async fn wait_for_upload_fails_on_terminal_failed_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/files/handle-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "FAILED" })))
            .mount(&server)
            .await;

        let gateway = HttpLmmGateway::new(server.uri(), "test-key");
        let err = gateway
            .wait_for_upload("handle-2", Duration::from_millis(5), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LmmError::FileProcessingFailed(_)));
    }
}
