//! Bot settings assembled once at startup from remote fragments.
//!
//! Three documents are fetched concurrently: the persona (a JSON object),
//! the hotel link catalog and the FAQ list (JSON arrays). Each fetch that
//! fails, times out or returns malformed JSON is logged and replaced by an
//! empty default; startup never blocks on a missing fragment.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SettingsSourceConfig;

const DEFAULT_INSTRUCTIONS: &str = "You are a friendly hotel-booking concierge. \
Help guests find and book rooms, answer questions about amenities and the \
surrounding area, and keep replies concise.";

/// Persona document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    /// Display name of the assistant.
    pub name: String,
    /// Core behavioural instructions.
    pub instructions: String,
    /// Optional greeting shown on a fresh conversation.
    pub greeting: Option<String>,
}

/// One entry of the hotel link catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelLink {
    /// Hotel name.
    pub name: String,
    /// Booking or detail page.
    pub url: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
}

/// One FAQ entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    /// Question.
    pub question: String,
    /// Answer.
    pub answer: String,
}

/// Immutable, process-wide bot configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BotSettings {
    persona: Persona,
    links: Vec<HotelLink>,
    faqs: Vec<FaqEntry>,
    system_instruction: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self::new(Persona::default(), Vec::new(), Vec::new())
    }
}

impl BotSettings {
    /// Assemble settings from parsed fragments.
    pub fn new(persona: Persona, links: Vec<HotelLink>, faqs: Vec<FaqEntry>) -> Self {
        let system_instruction = assemble_instruction(&persona, &links, &faqs);
        Self {
            persona,
            links,
            faqs,
            system_instruction,
        }
    }

    /// The system instruction attached to every chat turn.
    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Persona fragment.
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Hotel link catalog.
    pub fn links(&self) -> &[HotelLink] {
        &self.links
    }

    /// FAQ list.
    pub fn faqs(&self) -> &[FaqEntry] {
        &self.faqs
    }
}

fn assemble_instruction(persona: &Persona, links: &[HotelLink], faqs: &[FaqEntry]) -> String {
    let mut out = String::new();
    if !persona.name.trim().is_empty() {
        out.push_str(&format!("Your name is {}.\n", persona.name.trim()));
    }
    if persona.instructions.trim().is_empty() {
        out.push_str(DEFAULT_INSTRUCTIONS);
    } else {
        out.push_str(persona.instructions.trim());
    }

    if !links.is_empty() {
        out.push_str("\n\nHotel catalog (link to these pages when relevant):");
        for link in links {
            out.push_str(&format!("\n- {}: {}", link.name, link.url));
            if !link.description.is_empty() {
                out.push_str(&format!(" ({})", link.description));
            }
        }
    }

    if !faqs.is_empty() {
        out.push_str("\n\nFrequently asked questions:");
        for faq in faqs {
            out.push_str(&format!("\nQ: {}\nA: {}", faq.question, faq.answer));
        }
    }
    out
}

/// Fetches and assembles [`BotSettings`].
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    client: reqwest::Client,
    persona_url: Option<String>,
    links_url: Option<String>,
    faq_url: Option<String>,
    timeout: Duration,
}

impl SettingsLoader {
    /// Create a loader for the configured sources.
    pub fn new(config: &SettingsSourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            persona_url: config.persona_url.clone(),
            links_url: config.links_url.clone(),
            faq_url: config.faq_url.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_secs.max(1)),
        }
    }

    /// Fetch every fragment concurrently and assemble the settings.
    pub async fn load(&self) -> BotSettings {
        let (persona, links, faqs) = tokio::join!(
            self.fetch::<Persona>("persona", self.persona_url.as_deref()),
            self.fetch_list::<HotelLink>("links", self.links_url.as_deref()),
            self.fetch_list::<FaqEntry>("faq", self.faq_url.as_deref()),
        );
        let settings = BotSettings::new(persona.unwrap_or_default(), links, faqs);
        info!(
            links = settings.links.len(),
            faqs = settings.faqs.len(),
            instruction_len = settings.system_instruction.len(),
            "bot settings loaded"
        );
        settings
    }

    async fn fetch<T: DeserializeOwned>(&self, fragment: &str, url: Option<&str>) -> Option<T> {
        let url = url?;
        let request = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            response.json::<T>().await
        };
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(fragment, error = %e, "settings fetch failed, using default");
                None
            }
            Err(_) => {
                warn!(fragment, "settings fetch timed out, using default");
                None
            }
        }
    }

    /// Fetch an array, skipping entries that do not parse.
    async fn fetch_list<T: DeserializeOwned>(&self, fragment: &str, url: Option<&str>) -> Vec<T> {
        let Some(values) = self.fetch::<Vec<serde_json::Value>>(fragment, url).await else {
            return Vec::new();
        };
        let total = values.len();
        let items: Vec<T> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if items.len() < total {
            warn!(fragment, skipped = total - items.len(), "skipped malformed entries");
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sources(server: &MockServer) -> SettingsSourceConfig {
        SettingsSourceConfig {
            persona_url: Some(format!("{}/persona.json", server.uri())),
            links_url: Some(format!("{}/links.json", server.uri())),
            faq_url: Some(format!("{}/faq.json", server.uri())),
            fetch_timeout_secs: 2,
        }
    }

    #[test]
    fn default_settings_use_default_instructions() {
        let settings = BotSettings::default();
        assert_eq!(settings.system_instruction(), DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn instruction_includes_all_fragments() {
        let settings = BotSettings::new(
            Persona {
                name: "Ava".into(),
                instructions: "Be warm and brief.".into(),
                greeting: None,
            },
            vec![HotelLink {
                name: "Harbour Hotel".into(),
                url: "https://hotels.example/harbour".into(),
                description: "sea view".into(),
            }],
            vec![FaqEntry {
                question: "When is check-in?".into(),
                answer: "From 3pm.".into(),
            }],
        );
        let text = settings.system_instruction();
        assert!(text.starts_with("Your name is Ava.\nBe warm and brief."));
        assert!(text.contains("- Harbour Hotel: https://hotels.example/harbour (sea view)"));
        assert!(text.contains("Q: When is check-in?\nA: From 3pm."));
    }

    #[tokio::test]
    async fn loads_all_fragments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/persona.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Ava",
                "instructions": "Help guests book rooms."
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/links.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "Harbour Hotel", "url": "https://hotels.example/harbour"},
                {"broken": true}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/faq.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"question": "Pets?", "answer": "Small dogs welcome."}
            ])))
            .mount(&server)
            .await;

        let settings = SettingsLoader::new(&sources(&server)).load().await;
        assert_eq!(settings.persona().name, "Ava");
        assert_eq!(settings.links().len(), 1);
        assert_eq!(settings.faqs().len(), 1);
        assert!(settings.system_instruction().contains("Help guests book rooms."));
    }

    #[tokio::test]
    async fn failures_degrade_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/persona.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/links.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/faq.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut config = sources(&server);
        config.fetch_timeout_secs = 1;
        let settings = SettingsLoader::new(&config).load().await;
        assert_eq!(settings, BotSettings::default());
    }

    #[tokio::test]
    async fn unconfigured_sources_are_skipped() {
        let settings = SettingsLoader::new(&SettingsSourceConfig::default()).load().await;
        assert!(settings.links().is_empty());
        assert!(settings.faqs().is_empty());
    }
}
