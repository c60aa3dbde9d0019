use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum CallError {
    /// The remote job has not produced a fetchable result yet.
    #[error("Resource not found: {0}")]
    NotReady(String),
    #[error("Call failed: {0}")]
    Failed(String),
}

impl CallError {
    fn is_retryable(&self) -> bool {
        matches!(self, CallError::NotReady(_))
    }
}

/// Wire-level access to one upstream app. Kept behind a trait so retry
/// behavior can be exercised against scripted outcomes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        app_id: &str,
        payload: Value,
        user_id: &str,
    ) -> Result<Value, CallError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        app_id: &str,
        payload: Value,
        user_id: &str,
    ) -> Result<Value, CallError> {
        let url = format!("https://{}/execution?uid={}", app_id, user_id);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CallError::Failed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CallError::NotReady(format!("HTTP 404 from {}", app_id)));
        }
        if !response.status().is_success() {
            return Err(CallError::Failed(format!(
                "HTTP {} from {}",
                response.status(),
                app_id
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CallError::Failed(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Normalized output of the image-to-3d app. Either field may be absent;
/// the upstream decides what it produces for a given input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ModelOutput {
    pub model: Option<Vec<u8>>,
    pub video: Option<Vec<u8>>,
}

/// Client for the two generation apps: text-to-image and image-to-3d.
///
/// Both apps are asynchronous job systems, so a result may not exist
/// immediately after submission. Only that not-ready signature is retried;
/// any other failure is terminal. Callers see `None` for every failure mode
/// and the logs carry the distinction.
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    text_to_image_app: String,
    image_to_3d_app: String,
    user_id: String,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Self {
        Self::with_transport(
            Arc::new(HttpTransport::new()),
            config.text_to_image_app.clone(),
            config.image_to_3d_app.clone(),
            config.user_id.clone(),
            RetryPolicy {
                max_attempts: config.retry_max_attempts,
                delay: Duration::from_secs(config.retry_delay_secs),
            },
        )
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        text_to_image_app: String,
        image_to_3d_app: String,
        user_id: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            text_to_image_app,
            image_to_3d_app,
            user_id,
            retry,
        }
    }

    async fn call_with_retry(&self, app_id: &str, payload: Value) -> Option<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .transport
                .call(app_id, payload.clone(), &self.user_id)
                .await
            {
                Ok(response) => return Some(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    info!(
                        app_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        "Resource not ready, retrying in {}s",
                        self.retry.delay.as_secs()
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) => {
                    error!(app_id, attempt, "Upstream call failed: {}", err);
                    return None;
                }
            }
        }
    }

    /// Generate an image from a text prompt. Returns the raw image bytes,
    /// or `None` on any failure or unexpected response shape.
    pub async fn generate_image(&self, prompt: &str) -> Option<Vec<u8>> {
        let response = self
            .call_with_retry(&self.text_to_image_app, json!({ "prompt": prompt }))
            .await?;

        match response.get("result") {
            Some(value) => match decode_binary(value) {
                Some(bytes) => Some(bytes),
                None => {
                    error!("Text-to-image result field is not a binary payload");
                    None
                }
            },
            None => {
                error!("Invalid text-to-image response format: {}", response);
                None
            }
        }
    }

    /// Convert image bytes into a 3D model. A response carrying neither a
    /// model nor a video is still a response; only a failed call or a
    /// non-object body yields `None`.
    pub async fn convert_to_3d(&self, image: &[u8]) -> Option<ModelOutput> {
        let encoded = BASE64.encode(image);
        let response = self
            .call_with_retry(&self.image_to_3d_app, json!({ "input_image": encoded }))
            .await?;

        let Some(fields) = response.as_object() else {
            error!("Invalid image-to-3d response format: {}", response);
            return None;
        };

        Some(ModelOutput {
            model: optional_binary(fields, "generated_object"),
            video: optional_binary(fields, "video_object"),
        })
    }
}

fn decode_binary(value: &Value) -> Option<Vec<u8>> {
    BASE64.decode(value.as_str()?).ok()
}

fn optional_binary(fields: &serde_json::Map<String, Value>, key: &str) -> Option<Vec<u8>> {
    let value = fields.get(key)?;
    match decode_binary(value) {
        Some(bytes) => Some(bytes),
        None => {
            warn!("Ignoring undecodable {} field in image-to-3d response", key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<Value, CallError>>>,
        attempts: AtomicU32,
        last_payload: Mutex<Option<Value>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<Value, CallError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: AtomicU32::new(0),
                last_payload: Mutex::new(None),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &self,
            _app_id: &str,
            payload: Value,
            _user_id: &str,
        ) -> Result<Value, CallError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CallError::Failed("script exhausted".into())))
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> UpstreamClient {
        UpstreamClient::with_transport(
            transport,
            "text-to-image.test".into(),
            "image-to-3d.test".into(),
            "tester".into(),
            RetryPolicy::default(),
        )
    }

    fn not_ready() -> Result<Value, CallError> {
        Err(CallError::NotReady("HTTP 404".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_exhausts_all_attempts() {
        let transport = ScriptedTransport::new(vec![not_ready(), not_ready(), not_ready()]);
        let result = client(transport.clone()).generate_image("a dragon").await;

        assert!(result.is_none());
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_after_one_attempt() {
        let transport =
            ScriptedTransport::new(vec![Err(CallError::Failed("HTTP 500".into()))]);
        let result = client(transport.clone()).generate_image("a dragon").await;

        assert!(result.is_none());
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt_after_not_ready() {
        let image = b"png bytes".to_vec();
        let transport = ScriptedTransport::new(vec![
            not_ready(),
            Ok(json!({ "result": BASE64.encode(&image) })),
        ]);
        let result = client(transport.clone()).generate_image("a dragon").await;

        assert_eq!(result, Some(image));
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn rejects_response_without_result_field() {
        let transport = ScriptedTransport::new(vec![Ok(json!({ "image": "zzz" }))]);
        let result = client(transport).generate_image("a dragon").await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn convert_encodes_input_and_maps_both_fields() {
        let model = b"glb bytes".to_vec();
        let video = b"mp4 bytes".to_vec();
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "generated_object": BASE64.encode(&model),
            "video_object": BASE64.encode(&video),
        }))]);

        let input = b"input image".to_vec();
        let result = client(transport.clone()).convert_to_3d(&input).await.unwrap();

        assert_eq!(result.model, Some(model));
        assert_eq!(result.video, Some(video));

        let payload = transport.last_payload.lock().unwrap().take().unwrap();
        let sent = payload["input_image"].as_str().unwrap();
        assert_eq!(BASE64.decode(sent).unwrap(), input);
    }

    #[tokio::test]
    async fn convert_with_empty_object_yields_empty_output() {
        let transport = ScriptedTransport::new(vec![Ok(json!({}))]);
        let result = client(transport).convert_to_3d(b"input").await;

        assert_eq!(result, Some(ModelOutput::default()));
    }

    #[tokio::test]
    async fn convert_rejects_non_object_response() {
        let transport = ScriptedTransport::new(vec![Ok(json!("done"))]);
        let result = client(transport).convert_to_3d(b"input").await;

        assert!(result.is_none());
    }
}
