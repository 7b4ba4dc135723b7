//! Localized strings the core writes into conversation state.

use serde::{Deserialize, Serialize};

/// UI language. Selects the [`Strings`] table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    English,
    /// Spanish.
    Spanish,
    /// Thai.
    Thai,
}

impl Language {
    /// Strings for this language.
    pub fn strings(self) -> &'static Strings {
        match self {
            Self::English => &ENGLISH,
            Self::Spanish => &SPANISH,
            Self::Thai => &THAI,
        }
    }

    /// Parse a BCP-47-ish code (`"en"`, `"es-MX"`, `"th"`). Unknown codes map to English.
    pub fn from_code(code: &str) -> Self {
        let primary = code
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "es" => Self::Spanish,
            "th" => Self::Thai,
            _ => Self::English,
        }
    }
}

/// Localized text written by the core.
#[derive(Debug)]
pub struct Strings {
    /// Title of a conversation before one is generated.
    pub new_chat_title: &'static str,
    /// Marker appended to a bot message when the user stops generation.
    pub response_stopped: &'static str,
    /// Shown in the bot message when a turn fails.
    pub turn_failed: &'static str,
    /// Appended when image synthesis fails.
    pub image_failed: &'static str,
    /// Sent alongside recorded audio input.
    pub audio_instruction: &'static str,
    /// Alert when microphone permission is denied.
    pub microphone_denied: &'static str,
    /// Alert when geolocation permission is denied.
    pub location_denied: &'static str,
}

static ENGLISH: Strings = Strings {
    new_chat_title: "New chat",
    response_stopped: "(response stopped.)",
    turn_failed: "Sorry, something went wrong. Please try again.",
    image_failed: "Sorry, I couldn't generate that image.",
    audio_instruction: "Please transcribe this audio and respond to what was said.",
    microphone_denied: "Microphone access was denied. Please allow it to send voice messages.",
    location_denied: "Location access was denied. Nearby suggestions are unavailable.",
};

static SPANISH: Strings = Strings {
    new_chat_title: "Nuevo chat",
    response_stopped: "(respuesta detenida.)",
    turn_failed: "Lo siento, algo salió mal. Inténtalo de nuevo.",
    image_failed: "Lo siento, no pude generar esa imagen.",
    audio_instruction: "Transcribe este audio y responde a lo que se dijo.",
    microphone_denied: "Se denegó el acceso al micrófono. Permítelo para enviar mensajes de voz.",
    location_denied: "Se denegó el acceso a la ubicación. Las sugerencias cercanas no están disponibles.",
};

static THAI: Strings = Strings {
    new_chat_title: "แชทใหม่",
    response_stopped: "(หยุดการตอบกลับแล้ว)",
    turn_failed: "ขออภัย เกิดข้อผิดพลาด กรุณาลองอีกครั้ง",
    image_failed: "ขออภัย ไม่สามารถสร้างรูปภาพได้",
    audio_instruction: "กรุณาถอดความเสียงนี้และตอบกลับสิ่งที่พูด",
    microphone_denied: "ไม่ได้รับอนุญาตให้ใช้ไมโครโฟน",
    location_denied: "ไม่ได้รับอนุญาตให้เข้าถึงตำแหน่ง",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_stopped_marker() {
        assert_eq!(Language::English.strings().response_stopped, "(response stopped.)");
    }

    #[test]
    fn from_code_handles_regions() {
        assert_eq!(Language::from_code("es-MX"), Language::Spanish);
        assert_eq!(Language::from_code("th_TH"), Language::Thai);
        assert_eq!(Language::from_code("fr"), Language::English);
        assert_eq!(Language::from_code(""), Language::English);
    }

    #[test]
    fn language_serializes_lowercase() {
        let json = serde_json::to_string(&Language::Thai).unwrap_or_default();
        assert_eq!(json, "\"thai\"");
    }
}
