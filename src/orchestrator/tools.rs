//! In-band function calls announced by the model.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::gateway::wire::InlineData;
use crate::gateway::{GENERATE_IMAGE_TOOL, GenerativeGateway};

/// How a function call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResolution {
    /// Attach `result` to the call and, if present, the image to the message.
    Resolved {
        /// Function response returned to the model on later turns.
        result: Value,
        /// Generated media.
        image: Option<InlineData>,
    },
    /// The side effect failed; clear the call and apologize.
    Failed,
}

/// Prompt for image synthesis: the `prompt` argument, else the user's text.
pub fn image_prompt(args: &Value, fallback: &str) -> String {
    args.get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

/// Service a function call.
pub async fn run_tool(
    gateway: &dyn GenerativeGateway,
    name: &str,
    args: &Value,
    fallback_prompt: &str,
) -> ToolResolution {
    if name != GENERATE_IMAGE_TOOL {
        warn!(tool = name, "model called an unknown function");
        return ToolResolution::Resolved {
            result: json!({ "error": format!("unknown function: {name}") }),
            image: None,
        };
    }

    let prompt = image_prompt(args, fallback_prompt);
    if prompt.is_empty() {
        warn!("image requested without a prompt");
        return ToolResolution::Failed;
    }

    match gateway.generate_image(&prompt).await {
        Some(image) => {
            info!(mime = %image.mime_type, "image generated");
            ToolResolution::Resolved {
                result: json!({ "status": "image generated", "prompt": prompt }),
                image: Some(image),
            }
        }
        None => ToolResolution::Failed,
    }
}
