//! Turn raw vision-model text into a bounded [`AnalysisResult`].
//!
//! Models answer with JSON that is sometimes wrapped in markdown fences,
//! surrounded by prose, or shaped differently from what the prompt asked
//! for. Three shapes are understood:
//!
//! - **simple**: `{"persona_detectada", "epp_detectado": [...], "confianza", "descripcion"}`
//! - **detailed**: `{"equipos_detectados": {"casco": {"detectado", "confianza"}}, "confianza_general", "observaciones"}`
//! - **canonical**: a serialized [`AnalysisResult`], so normalizing twice is a no-op
//!
//! Equipment tokens outside the catalog are dropped without being reported.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::catalog::EquipmentId;
use super::types::{clamp_unit, AnalysisResult, DetectionItem, PersonDetection};
use crate::error::PpeError;

/// Confidence used when neither a numeric field nor a percentage in the text is available.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?[ \t]*\r?\n?").expect("fence regex"));

// Greedy: first '{' to last '}'
static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("percent regex"));

/// Normalize a raw model response.
///
/// # Errors
/// `PpeError::MalformedResponse` when no JSON object can be recovered from the text.
/// Never panics on arbitrary input.
pub fn normalize(raw: &str) -> Result<AnalysisResult, PpeError> {
    let value = extract_json_object(raw)?;
    Ok(normalize_object(&value))
}

/// Recover a JSON object from a possibly fenced or prose-wrapped response.
pub fn extract_json_object(raw: &str) -> Result<Map<String, Value>, PpeError> {
    let cleaned = strip_code_fences(raw);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(map);
    }

    if let Some(m) = OBJECT_RE.find(&cleaned) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(m.as_str()) {
            debug!("Recovered JSON object embedded in model response");
            return Ok(map);
        }
    }

    Err(PpeError::MalformedResponse(format!(
        "no JSON object found in response: {}",
        preview(raw, 200)
    )))
}

/// Remove markdown code fences (with or without a `json` tag) anywhere in the text.
pub fn strip_code_fences(text: &str) -> String {
    FENCE_RE.replace_all(text, "").trim().to_string()
}

/// First integer immediately followed by `%`, as a fraction in [0, 1].
pub fn percentage_in_text(text: &str) -> Option<f64> {
    PERCENT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|pct| clamp_unit(pct as f64 / 100.0))
}

fn normalize_object(obj: &Map<String, Value>) -> AnalysisResult {
    if obj.get("persons").is_some_and(Value::is_array) {
        normalize_canonical(obj)
    } else if equipment_map(obj).is_some() {
        normalize_detailed(obj)
    } else {
        normalize_simple(obj)
    }
}

fn normalize_simple(obj: &Map<String, Value>) -> AnalysisResult {
    let description = first_string(obj, &["descripcion", "description", "observaciones"]);

    let explicit = first_number(obj, &["confianza", "confidence"]).or_else(|| {
        first_number(obj, &["confianza_general", "overall_confidence_pct"]).map(|pct| pct / 100.0)
    });
    let confidence = resolve_confidence(explicit, &description);

    let raw_items = first_array(obj, &["epp_detectado", "ppe_detected", "equipment"]);
    let items = recognized_tokens(raw_items);

    let mut person = first_value(obj, &["persona_detectada", "person_detected"])
        .map(truthy)
        .unwrap_or(false);

    // Equipment seen on camera implies someone is wearing it
    if !person && !items.is_empty() {
        person = true;
    }

    let persons = if person {
        vec![PersonDetection::new(
            1,
            items.into_iter().map(|equipment| DetectionItem {
                equipment,
                confidence,
            }),
            String::new(),
        )]
    } else {
        Vec::new()
    };

    finish(persons, 0, confidence, description)
}

fn normalize_detailed(obj: &Map<String, Value>) -> AnalysisResult {
    let description = first_string(obj, &["observaciones", "observations", "descripcion"]);

    let explicit = first_number(obj, &["confianza_general", "overall_confidence"])
        .map(|pct| pct / 100.0);
    let overall = resolve_confidence(explicit, &description);

    let mut items = Vec::new();
    if let Some(equipment) = equipment_map(obj) {
        for (token, entry) in equipment {
            let Some(id) = EquipmentId::from_token(token) else {
                debug!("Dropping unrecognized equipment token '{}'", token);
                continue;
            };

            let detected = entry
                .get("detectado")
                .or_else(|| entry.get("detected"))
                .map(truthy)
                .unwrap_or(false);
            if !detected {
                continue;
            }

            let confidence = entry
                .get("confianza")
                .or_else(|| entry.get("confidence"))
                .and_then(Value::as_f64)
                .map(|pct| clamp_unit(pct / 100.0))
                .unwrap_or(overall);

            items.push(DetectionItem {
                equipment: id,
                confidence,
            });
        }
    }

    let persons = if items.is_empty() {
        Vec::new()
    } else {
        vec![PersonDetection::new(1, items, String::new())]
    };

    finish(persons, 0, overall, description)
}

fn normalize_canonical(obj: &Map<String, Value>) -> AnalysisResult {
    let description = first_string(obj, &["description"]);
    let explicit = first_number(obj, &["overall_confidence"]);
    let overall = resolve_confidence(explicit, &description);

    let persons = obj
        .get("persons")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .enumerate()
                .filter_map(|(idx, person)| {
                    let person = person.as_object()?;
                    let id = person
                        .get("id")
                        .and_then(Value::as_u64)
                        .and_then(|id| u32::try_from(id).ok())
                        .unwrap_or(idx as u32 + 1);
                    let notes = first_string(person, &["notes"]);
                    let items = person
                        .get("items")
                        .and_then(Value::as_array)
                        .map(|items| canonical_items(items, overall))
                        .unwrap_or_default();
                    Some(PersonDetection::new(id, items, notes))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let reported = obj
        .get("person_count")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);

    finish(persons, reported, overall, description)
}

fn canonical_items(items: &[Value], fallback: f64) -> Vec<DetectionItem> {
    items
        .iter()
        .filter_map(|item| {
            let (token, confidence) = match item {
                Value::String(token) => (token.as_str(), None),
                Value::Object(map) => (
                    map.get("type").and_then(Value::as_str)?,
                    map.get("confidence").and_then(Value::as_f64),
                ),
                _ => return None,
            };
            let Some(equipment) = EquipmentId::from_token(token) else {
                debug!("Dropping unrecognized equipment token '{}'", token);
                return None;
            };
            Some(DetectionItem {
                equipment,
                confidence: confidence.map(clamp_unit).unwrap_or(fallback),
            })
        })
        .collect()
}

fn finish(
    persons: Vec<PersonDetection>,
    reported_count: u32,
    overall_confidence: f64,
    description: String,
) -> AnalysisResult {
    let mut person_count = reported_count.max(persons.len() as u32);
    if person_count == 0 && persons.iter().any(|p| !p.items.is_empty()) {
        person_count = 1;
    }

    AnalysisResult {
        persons,
        person_count,
        overall_confidence: clamp_unit(overall_confidence),
        description,
    }
}

fn resolve_confidence(explicit: Option<f64>, description: &str) -> f64 {
    explicit
        .map(clamp_unit)
        .or_else(|| percentage_in_text(description))
        .unwrap_or(DEFAULT_CONFIDENCE)
}

fn recognized_tokens(values: &[Value]) -> Vec<EquipmentId> {
    let tokens: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
    let ids = super::catalog::filter_tokens(tokens.iter().copied());
    if ids.len() < values.len() {
        debug!(
            "Dropped {} unrecognized or duplicate equipment entries",
            values.len() - ids.len()
        );
    }
    ids
}

fn equipment_map(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    ["equipos_detectados", "equipment_detected"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_object))
}

fn first_value<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_f64))
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .unwrap_or("")
        .to_string()
}

fn first_array<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
