//! Prompts for PPE detection vision API calls.

use super::catalog::EquipmentId;
use super::types::ResponseFormat;

/// System message sent with every analysis request.
pub const SYSTEM_PROMPT: &str =
    "You are an industrial safety analyst. Always return valid JSON with no additional text.";

/// Build the user prompt for the requested response format.
///
/// A configured custom prompt replaces the built-in text entirely.
pub fn build_detection_prompt(format: ResponseFormat, custom_prompt: Option<&str>) -> String {
    if let Some(custom) = custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        return custom.to_string();
    }

    match format {
        ResponseFormat::Simple => build_simple_prompt(),
        ResponseFormat::Detailed => build_detailed_prompt(),
    }
}

fn token_list() -> String {
    EquipmentId::ALL
        .iter()
        .map(|id| format!("\"{}\"", id.token()))
        .collect::<Vec<_>>()
        .join(",")
}

fn equipment_glossary() -> String {
    EquipmentId::ALL
        .iter()
        .map(|id| format!("- {} = {}", id.token(), id.label().to_lowercase()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_simple_prompt() -> String {
    format!(
        r#"Analyze this image and detect whether people are present and which personal protective equipment (PPE) they are wearing.

Equipment tokens:
{glossary}

Return ONLY JSON with exactly this shape:
{{"persona_detectada": true/false, "epp_detectado": [{tokens}], "confianza": 0.0-1.0, "descripcion": "short description"}}

Only include equipment that is clearly visible. No additional text."#,
        glossary = equipment_glossary(),
        tokens = token_list(),
    )
}

fn build_detailed_prompt() -> String {
    let entries = EquipmentId::ALL
        .iter()
        .map(|id| {
            format!(
                "    \"{}\": {{ \"detectado\": true/false, \"confianza\": 0-100 }}",
                id.token()
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"Analyze this image and detect construction personal protective equipment.

Equipment tokens:
{glossary}

Respond ONLY with valid JSON using this exact structure:
{{
  "equipos_detectados": {{
{entries}
  }},
  "confianza_general": 0-100,
  "observaciones": "description of what was observed"
}}

Do not include any explanation, only the JSON."#,
        glossary = equipment_glossary(),
        entries = entries,
    )
}
