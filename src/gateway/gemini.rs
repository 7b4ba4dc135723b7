//! HTTP adapter for the generative language API.
//!
//! Three endpoints are used:
//!
//! - `models/{model}:generateContent` for title and image synthesis
//! - `models/{model}:streamGenerateContent?alt=sse` for chat turns
//!
//! Every streamed payload is a JSON `GenerateContentResponse`. Its parts and
//! grounding metadata are split into one [`StreamChunk`] per unit of new
//! information before they leave this module.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::sse::SseFramer;
use super::wire::{Content, InlineData, LatLng};
use super::{
    ChunkStream, GENERATE_IMAGE_TOOL, GatewayError, GenerativeGateway, StreamChunk, StreamRequest,
};
use crate::config::GatewayConfig;
use crate::conversation::{GroundingChunk, GroundingSource};

/// Gateway backed by the generative language REST API.
pub struct GeminiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    title_model: String,
    image_model: String,
}

impl std::fmt::Debug for GeminiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGateway")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("title_model", &self.title_model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

impl GeminiGateway {
    /// Create a gateway from configuration and a resolved API key.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: &GatewayConfig, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GatewayError::Config("API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key,
            chat_model: config.chat_model.clone(),
            title_model: config.title_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Request(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }
        Ok(response)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, GatewayError> {
        self.post(url, body)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Decode(format!("invalid response body: {e}")))
    }

    async fn try_generate_image(&self, prompt: &str) -> Result<Option<InlineData>, GatewayError> {
        let url = self.endpoint(&self.image_model, "generateContent");
        let body = build_image_request(prompt);
        let value = self.post_json(&url, &body).await?;
        Ok(first_inline_data(&value))
    }
}

/// Build the body of a streamed chat request.
pub fn build_stream_request(request: &StreamRequest) -> Value {
    let mut tools = vec![json!({
        "functionDeclarations": [{
            "name": GENERATE_IMAGE_TOOL,
            "description": "Generate an image that illustrates a hotel, room, amenity or destination.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "prompt": {
                        "type": "STRING",
                        "description": "Detailed description of the image to generate."
                    }
                },
                "required": ["prompt"]
            }
        }]
    })];

    let mut body = json!({
        "contents": request.contents,
    });

    if !request.system_instruction.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{ "text": request.system_instruction }]
        });
    }

    if let Some(LatLng {
        latitude,
        longitude,
    }) = request.location_bias
    {
        tools.push(json!({ "googleMaps": {} }));
        body["toolConfig"] = json!({
            "retrievalConfig": {
                "latLng": { "latitude": latitude, "longitude": longitude }
            }
        });
    }

    body["tools"] = Value::Array(tools);
    body
}

/// Build the body of a one-shot text request.
pub fn build_once_request(prompt: &str) -> Value {
    json!({ "contents": [Content::user_text(prompt)] })
}

/// Build the body of an image synthesis request.
pub fn build_image_request(prompt: &str) -> Value {
    json!({
        "contents": [Content::user_text(prompt)],
        "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] }
    })
}

/// The `parts` of the first candidate, if any.
fn candidate_parts(value: &Value) -> &[Value] {
    value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Concatenated text of the first candidate.
pub fn extract_text(value: &Value) -> String {
    candidate_parts(value)
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect()
}

fn first_inline_data(value: &Value) -> Option<InlineData> {
    candidate_parts(value).iter().find_map(parse_inline_data)
}

fn parse_inline_data(part: &Value) -> Option<InlineData> {
    let inline = part.get("inlineData")?;
    let mime_type = inline.get("mimeType").and_then(Value::as_str)?;
    let data = inline.get("data").and_then(Value::as_str)?;
    if data.is_empty() {
        return None;
    }
    Some(InlineData::new(mime_type, data))
}

fn parse_grounding(value: &Value) -> Vec<GroundingChunk> {
    let Some(chunks) = value
        .pointer("/candidates/0/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    chunks
        .iter()
        .filter_map(|chunk| {
            let (source, body) = if let Some(web) = chunk.get("web") {
                (GroundingSource::Web, web)
            } else if let Some(maps) = chunk.get("maps") {
                (GroundingSource::Maps, maps)
            } else {
                return None;
            };
            let uri = body.get("uri").and_then(Value::as_str)?;
            if uri.is_empty() {
                return None;
            }
            let title = body
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(uri)
                .to_owned();
            Some(GroundingChunk {
                source,
                uri: uri.to_owned(),
                title,
            })
        })
        .collect()
}

/// Split one streamed payload into normalized chunks.
///
/// Parts come first in payload order, followed by at most one citation
/// batch. An `error` object in the payload becomes [`GatewayError::Provider`].
/// Payloads that are not JSON are skipped.
pub fn parse_stream_payload(payload: &str) -> Result<Vec<StreamChunk>, GatewayError> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("skipping undecodable stream payload: {e}");
            return Ok(Vec::new());
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown backend error");
        return Err(GatewayError::Provider(format!("stream error: {message}")));
    }

    let mut chunks = Vec::new();
    for part in candidate_parts(&value) {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            // Thought summaries are never shown.
            if part.get("thought").and_then(Value::as_bool) == Some(true) || text.is_empty() {
                continue;
            }
            chunks.push(StreamChunk::TextDelta {
                text: text.to_owned(),
            });
        } else if let Some(call) = part.get("functionCall") {
            let Some(name) = call.get("name").and_then(Value::as_str) else {
                continue;
            };
            chunks.push(StreamChunk::FunctionCall {
                name: name.to_owned(),
                args: call.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        } else if let Some(data) = parse_inline_data(part) {
            chunks.push(StreamChunk::InlineMedia { data });
        }
    }

    let citations = parse_grounding(&value);
    if !citations.is_empty() {
        chunks.push(StreamChunk::Citations { chunks: citations });
    }

    Ok(chunks)
}

/// Map an HTTP error status to the appropriate [`GatewayError`].
fn map_http_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => GatewayError::Auth(format!("authentication failed: {message}")),
        400 | 404 | 429 => GatewayError::Request(format!("HTTP {}: {message}", status.as_u16())),
        _ => GatewayError::Provider(format!("HTTP {}: {message}", status.as_u16())),
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

#[async_trait]
impl GenerativeGateway for GeminiGateway {
    async fn generate_once(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = self.endpoint(&self.title_model, "generateContent");
        let value = self.post_json(&url, &build_once_request(prompt)).await?;
        let text = extract_text(&value);
        if text.trim().is_empty() {
            return Err(GatewayError::Decode("response carried no text".into()));
        }
        Ok(text)
    }

    async fn generate_stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&self.chat_model, "streamGenerateContent")
        );
        let body = build_stream_request(&request);
        tracing::debug!(
            model = %self.chat_model,
            blocks = request.contents.len(),
            maps = request.location_bias.is_some(),
            "opening chat stream"
        );

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Ok(Box::pin(futures_util::stream::empty()));
            }
            response = self.post(&url, &body) => response?,
        };

        Ok(Box::pin(chunk_stream(response.bytes_stream(), cancel)))
    }

    async fn generate_image(&self, prompt: &str) -> Option<InlineData> {
        match self.try_generate_image(prompt).await {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                tracing::warn!("image synthesis returned no image data");
                None
            }
            Err(e) => {
                tracing::warn!("image synthesis failed: {e}");
                None
            }
        }
    }
}

/// Internal state for the chunk stream.
struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    framer: SseFramer,
    pending: VecDeque<Result<StreamChunk, GatewayError>>,
    cancel: CancellationToken,
    done: bool,
}

impl StreamState {
    fn enqueue(&mut self, payload: &str) {
        match parse_stream_payload(payload) {
            Ok(chunks) => self.pending.extend(chunks.into_iter().map(Ok)),
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Turn a raw SSE byte stream into normalized chunks, ending on cancellation.
fn chunk_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamChunk, GatewayError>> + Send {
    futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            framer: SseFramer::new(),
            pending: VecDeque::new(),
            cancel,
            done: false,
        },
        |mut state| async move {
            loop {
                if state.cancel.is_cancelled() {
                    return None;
                }
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }

                let next = tokio::select! {
                    () = state.cancel.cancelled() => return None,
                    next = state.byte_stream.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        for payload in state.framer.push(&bytes) {
                            state.enqueue(&payload);
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(GatewayError::Stream(format!("stream read error: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        if let Some(payload) = state.framer.finish() {
                            state.enqueue(&payload);
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::wire::{Part, WireRole};

    fn request(location: Option<LatLng>) -> StreamRequest {
        StreamRequest {
            contents: vec![Content::user_text("Find me a room in Lisbon")],
            system_instruction: "You are a hotel concierge.".into(),
            location_bias: location,
        }
    }

    #[test]
    fn stream_request_carries_contents_and_system_instruction() {
        let body = build_stream_request(&request(None));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Find me a room in Lisbon");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are a hotel concierge."
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            GENERATE_IMAGE_TOOL
        );
    }

    #[test]
    fn stream_request_without_location_has_no_maps_tool() {
        let body = build_stream_request(&request(None));
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(1));
        assert!(body.get("toolConfig").is_none());
    }

    #[test]
    fn stream_request_with_location_attaches_retrieval_config() {
        let body = build_stream_request(&request(Some(LatLng {
            latitude: 38.72,
            longitude: -9.14,
        })));
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(2));
        assert!(body["tools"][1].get("googleMaps").is_some());
        assert_eq!(body["toolConfig"]["retrievalConfig"]["latLng"]["latitude"], 38.72);
        assert_eq!(body["toolConfig"]["retrievalConfig"]["latLng"]["longitude"], -9.14);
    }

    #[test]
    fn empty_system_instruction_is_omitted() {
        let mut req = request(None);
        req.system_instruction.clear();
        let body = build_stream_request(&req);
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn parse_text_delta() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"He"}]}}]}"#;
        let chunks = parse_stream_payload(payload);
        assert_eq!(
            chunks.unwrap_or_default(),
            vec![StreamChunk::TextDelta { text: "He".into() }]
        );
    }

    #[test]
    fn parse_splits_text_and_citations_into_separate_chunks() {
        let payload = r#"{"candidates":[{
            "content":{"parts":[{"text":"Try Hotel Avenida."}]},
            "groundingMetadata":{"groundingChunks":[
                {"maps":{"uri":"https://maps.example/a","title":"Hotel Avenida"}},
                {"web":{"uri":"https://web.example/b","title":"Review"}}
            ]}
        }]}"#;
        let chunks = parse_stream_payload(payload).unwrap_or_default();
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[0], StreamChunk::TextDelta { .. }));
        match &chunks[1] {
            StreamChunk::Citations { chunks } => {
                assert_eq!(chunks.len(), 2);
                assert_eq!(chunks[0].source, GroundingSource::Maps);
                assert_eq!(chunks[1].source, GroundingSource::Web);
                assert_eq!(chunks[1].title, "Review");
            }
            other => unreachable!("expected citations, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_call() {
        let payload = r#"{"candidates":[{"content":{"parts":[
            {"functionCall":{"name":"generate_image","args":{"prompt":"rooftop pool"}}}
        ]}}]}"#;
        let chunks = parse_stream_payload(payload).unwrap_or_default();
        assert_eq!(
            chunks,
            vec![StreamChunk::FunctionCall {
                name: "generate_image".into(),
                args: json!({"prompt": "rooftop pool"}),
            }]
        );
    }

    #[test]
    fn parse_inline_media() {
        let payload = r#"{"candidates":[{"content":{"parts":[
            {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
        ]}}]}"#;
        let chunks = parse_stream_payload(payload).unwrap_or_default();
        assert_eq!(
            chunks,
            vec![StreamChunk::InlineMedia {
                data: InlineData::new("image/png", "iVBORw0KGgo=")
            }]
        );
    }

    #[test]
    fn parse_skips_thoughts_and_empty_text() {
        let payload = r#"{"candidates":[{"content":{"parts":[
            {"text":"planning...","thought":true},
            {"text":""}
        ]}}]}"#;
        assert!(parse_stream_payload(payload).unwrap_or_default().is_empty());
    }

    #[test]
    fn parse_usage_only_payload_is_empty() {
        let payload = r#"{"usageMetadata":{"promptTokenCount":12}}"#;
        assert!(parse_stream_payload(payload).unwrap_or_default().is_empty());
    }

    #[test]
    fn parse_invalid_json_is_skipped() {
        assert!(parse_stream_payload("not json").unwrap_or_default().is_empty());
    }

    #[test]
    fn parse_error_payload_is_provider_error() {
        let result = parse_stream_payload(r#"{"error":{"code":500,"message":"overloaded"}}"#);
        match result {
            Err(GatewayError::Provider(msg)) => assert!(msg.contains("overloaded")),
            other => unreachable!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn grounding_entries_without_uri_are_dropped() {
        let payload = r#"{"candidates":[{"groundingMetadata":{"groundingChunks":[
            {"web":{"title":"no link"}},
            {"retrievedContext":{"uri":"x"}}
        ]}}]}"#;
        assert!(parse_stream_payload(payload).unwrap_or_default().is_empty());
    }

    #[test]
    fn extract_text_concatenates_parts() {
        let value = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Harbour " }, { "text": "view suites" }] }
            }]
        });
        assert_eq!(extract_text(&value), "Harbour view suites");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn first_inline_data_skips_text_parts() {
        let value = json!({"candidates":[{"content":{"parts":[
            {"text":"Here you go"},
            {"inlineData":{"mimeType":"image/png","data":"AAAA"}}
        ]}}]});
        assert_eq!(
            first_inline_data(&value),
            Some(InlineData::new("image/png", "AAAA"))
        );
    }

    #[test]
    fn http_error_mapping() {
        let body = r#"{"error":{"message":"API key not valid"}}"#;
        let err = map_http_error(reqwest::StatusCode::UNAUTHORIZED, body);
        assert_eq!(err.code(), "AUTH_FAILED");
        assert!(err.message().contains("API key not valid"));

        let err = map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.code(), "REQUEST_FAILED");

        let err = map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }

    #[test]
    fn once_request_is_single_user_block() {
        let body = build_once_request("title please");
        let contents: Vec<Content> =
            serde_json::from_value(body["contents"].clone()).unwrap_or_default();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, WireRole::User);
        assert_eq!(contents[0].parts, vec![Part::Text("title please".into())]);
    }

    #[tokio::test]
    async fn chunk_stream_decodes_split_reads() {
        let reads: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"te")),
            Ok(Bytes::from_static(b"xt\":\"He\"}]}}]}\n\ndata: {\"candidates\":[{\"content\":")),
            Ok(Bytes::from_static(b"{\"parts\":[{\"text\":\"llo\"}]}}]}\n\n")),
        ];
        let stream = chunk_stream(futures_util::stream::iter(reads), CancellationToken::new());
        let items: Vec<_> = stream.collect().await;
        let texts: Vec<String> = items
            .into_iter()
            .filter_map(|item| match item {
                Ok(StreamChunk::TextDelta { text }) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["He".to_string(), "llo".to_string()]);
    }

    #[tokio::test]
    async fn chunk_stream_stops_when_cancelled() {
        let reads: Vec<Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"},{\"text\":\"b\"}]}}]}\n\n",
        ))];
        let cancel = CancellationToken::new();
        let mut stream = Box::pin(chunk_stream(futures_util::stream::iter(reads), cancel.clone()));
        let first = stream.next().await;
        assert!(matches!(first, Some(Ok(StreamChunk::TextDelta { .. }))));
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn chunk_stream_flushes_unterminated_payload() {
        let reads: Vec<Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tail\"}]}}]}",
        ))];
        let items: Vec<_> =
            chunk_stream(futures_util::stream::iter(reads), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(StreamChunk::TextDelta { text }) if text == "tail"));
    }
}
