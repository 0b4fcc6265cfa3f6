//! Transport abstraction for opening the optimization stream

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Raw body chunks of one streaming response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens one streaming request per attempt
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Send `payload` and return the response body once the server has
    /// answered with a success status.
    async fn open(&self, payload: &serde_json::Value) -> Result<ByteStream>;
}

#[derive(Serialize)]
struct OptimizeRequest<'a> {
    popup_config: &'a serde_json::Value,
}

/// Direct HTTP transport - POSTs to the optimization endpoint
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, payload: &serde_json::Value) -> Result<ByteStream> {
        tracing::debug!("POST {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream, text/plain")
            .json(&OptimizeRequest {
                popup_config: payload,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(Error::MissingBody);
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(Error::from))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    async fn collect_body(mut body: ByteStream) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_posts_wrapped_payload_and_streams_body() {
        let server = MockServer::start().await;
        let body = "data: {\"type\": \"text_chunk\", \"content\": \"hi\"}\n\n";

        Mock::given(method("POST"))
            .and(path("/optimize"))
            .and(body_json(json!({"popup_config": {"goal": "x"}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/plain"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/optimize", server.uri()));
        let stream = transport.open(&json!({"goal": "x"})).await.unwrap();
        assert_eq!(collect_body(stream).await, body);
    }

    #[tokio::test]
    async fn test_non_success_status_is_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/optimize", server.uri()));
        let err = match transport.open(&json!({})).await {
            Err(e) => e,
            Ok(_) => panic!("expected status error"),
        };
        assert!(matches!(err, Error::Status { status: 503, ref body } if body == "overloaded"));
        assert_eq!(err.category(), crate::error::ErrorCategory::Server);
    }

    #[tokio::test]
    async fn test_no_content_is_missing_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri());
        assert!(matches!(transport.open(&json!({})).await, Err(Error::MissingBody)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // port 9 (discard) on localhost is not expected to be listening
        let transport = HttpTransport::new("http://127.0.0.1:9/optimize");
        let err = match transport.open(&json!({})).await {
            Err(e) => e,
            Ok(_) => panic!("expected connection failure"),
        };
        assert_eq!(err.category(), crate::error::ErrorCategory::Network);
    }
}
