use super::{ContentPart, LanguageModel, LlmError, LlmMessage, Role};
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

/// Asks the model for JSON matching `T` and deserializes the answer.
///
/// The schema derived from `T` is appended to the last user message; any
/// mismatch between the returned document and `T` fails the call.
pub async fn generate_json<T>(
    model: &dyn LanguageModel,
    mut messages: Vec<LlmMessage>,
) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_string_pretty(&schema_for!(T))
        .map_err(|err| LlmError::Schema(err.to_string()))?;
    let hint = ContentPart::Text(format!(
        "Respond with a single JSON document that validates against this JSON Schema:\n{schema}"
    ));
    match messages.iter_mut().rev().find(|m| m.role == Role::User) {
        Some(message) => message.content.push(hint),
        None => messages.push(LlmMessage::user(vec![hint])),
    }

    let text = model.generate(&messages).await?;
    debug!(target = "atelier.llm", model = model.model_name(), chars = text.len(), "llm_response");

    let value: Value = serde_json::from_str(extract_json(&text)).map_err(|err| {
        error!(target = "atelier.llm", error = %err, output = %text, "llm_output_not_json");
        LlmError::Parse(err.to_string())
    })?;
    serde_json::from_value(value).map_err(|err| LlmError::Schema(err.to_string()))
}

/// Cuts the JSON object out of a model reply that may be wrapped in a code fence.
pub fn extract_json(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(stripped) = body.strip_suffix("```") {
        body = stripped.trim_end();
    }
    match body.find('{') {
        Some(start) => &body[start..],
        None => body,
    }
}
