//! Remote text-to-speech synthesis.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::SpeechError;
use crate::config::{GatewayConfig, SpeechConfig};

/// Turns text into base64-encoded 16-bit mono PCM.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice identity.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SpeechError>;
}

/// TTS client for the generative language API.
pub struct GeminiSpeech {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSpeech").field("url", &self.url).finish()
    }
}

impl GeminiSpeech {
    /// Create a client from configuration and a resolved API key.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Request`] if the HTTP client cannot be built.
    pub fn new(
        gateway: &GatewayConfig,
        speech: &SpeechConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .connect_timeout(gateway.connect_timeout())
            .build()
            .map_err(|e| SpeechError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                gateway.base_url.trim_end_matches('/'),
                speech.tts_model
            ),
            api_key: api_key.into(),
        })
    }
}

/// Build the synthesis request body.
pub fn build_tts_request(text: &str, voice: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": text }] }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            }
        }
    })
}

fn extract_audio(value: &Value) -> Option<String> {
    value
        .pointer("/candidates/0/content/parts")?
        .as_array()?
        .iter()
        .find_map(|part| part.pointer("/inlineData/data").and_then(Value::as_str))
        .filter(|data| !data.is_empty())
        .map(String::from)
}

#[async_trait]
impl SpeechSynthesizer for GeminiSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SpeechError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_tts_request(text, voice))
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Request(format!("HTTP {}: {body}", status.as_u16())));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| SpeechError::Decode(format!("invalid response body: {e}")))?;
        extract_audio(&value).ok_or_else(|| SpeechError::Decode("response carried no audio".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_voice() {
        let body = build_tts_request("Welcome to the Harbour Hotel", "Puck");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Welcome to the Harbour Hotel");
        let voice = &body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"];
        assert_eq!(voice["voiceName"], "Puck");
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
    }

    #[test]
    fn extracts_first_inline_audio() {
        let value = json!({"candidates":[{"content":{"parts":[
            {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAAA"}}
        ]}}]});
        assert_eq!(extract_audio(&value).as_deref(), Some("AAAA"));
        assert!(extract_audio(&json!({"candidates":[]})).is_none());
    }
}
