use std::collections::BTreeSet;
use std::path::PathBuf;

use ppe_monitor::analyzer::catalog::{default_required, EquipmentId};
use ppe_monitor::analyzer::confidence::{estimate, CONFIDENCE_FLOOR};
use ppe_monitor::analyzer::normalize;
use ppe_monitor::PpeError;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).expect("Failed to read fixture")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_fenced_simple_response() {
    let result = normalize(&fixture("simple_fenced.txt")).expect("Failed to normalize");

    assert_eq!(result.person_count, 1);
    assert_eq!(
        result.detection_list(),
        vec![EquipmentId::Helmet, EquipmentId::Vest, EquipmentId::Gloves]
    );
    assert_close(result.overall_confidence, 0.92);
    assert!(result.description.contains("casco amarillo"));
}

#[test]
fn test_detailed_response() {
    let result = normalize(&fixture("detailed.json")).expect("Failed to normalize");

    assert_eq!(result.person_count, 1);
    assert_close(result.overall_confidence, 0.85);

    let items = &result.persons[0].items;
    let found: Vec<(EquipmentId, f64)> = items.iter().map(|i| (i.equipment, i.confidence)).collect();
    assert_eq!(found.len(), 4);
    assert_eq!(found[0].0, EquipmentId::Helmet);
    assert_close(found[0].1, 0.95);
    assert_eq!(found[1].0, EquipmentId::Vest);
    assert_close(found[1].1, 0.88);
    // No per-item confidence: falls back to the overall value
    assert_eq!(found[2].0, EquipmentId::Mask);
    assert_close(found[2].1, 0.85);
    // Out-of-range percentage is clamped
    assert_eq!(found[3].0, EquipmentId::Gloves);
    assert_close(found[3].1, 1.0);
}

#[test]
fn test_prose_wrapped_response_uses_percentage_in_text() {
    let result = normalize(&fixture("prose_wrapped.txt")).expect("Failed to normalize");

    assert_eq!(result.detection_list(), vec![EquipmentId::Vest]);
    assert_close(result.overall_confidence, 0.75);
}

#[test]
fn test_refusal_is_malformed_response() {
    let err = normalize(&fixture("not_json.txt")).unwrap_err();
    assert!(matches!(err, PpeError::MalformedResponse(_)));
}

#[test]
fn test_normalization_is_idempotent_for_every_fixture() {
    for name in ["simple_fenced.txt", "detailed.json", "prose_wrapped.txt"] {
        let first = normalize(&fixture(name)).expect("Failed to normalize");
        let json = serde_json::to_string(&first).expect("Failed to serialize");
        let second = normalize(&json).expect("Failed to re-normalize");
        assert_eq!(first, second, "normalization of {} is not idempotent", name);
    }
}

#[test]
fn test_unknown_tokens_never_surface() {
    let raw = r#"{"persona_detectada": true, "epp_detectado": ["arnes", "CASCO ", "hat", "", "helmet"]}"#;
    let result = normalize(raw).expect("Failed to normalize");

    for person in &result.persons {
        for item in &person.items {
            assert!(EquipmentId::ALL.contains(&item.equipment));
        }
    }
    assert_eq!(result.detection_list(), vec![EquipmentId::Helmet]);
}

#[test]
fn test_arbitrary_text_never_panics() {
    let inputs = [
        "",
        "{",
        "}{",
        "```",
        "```json\n```",
        "null",
        "[1, 2, 3]",
        "{\"epp_detectado\": \"casco\"}",
        "{\"confianza\": \"alta\", \"epp_detectado\": [1, null, {}]}",
        "ñandú 100% ü {",
        "{\"persons\": [null, 3, {\"items\": \"x\"}]}",
    ];
    for input in inputs {
        match normalize(input) {
            Ok(result) => {
                assert!((0.0..=1.0).contains(&result.overall_confidence));
            }
            Err(e) => assert!(matches!(e, PpeError::MalformedResponse(_))),
        }
    }
}

#[test]
fn test_stored_confidence_examples() {
    let required = default_required();
    assert_eq!(required.len(), 6);

    let two: BTreeSet<EquipmentId> = [EquipmentId::Helmet, EquipmentId::Vest].into();
    assert_close(estimate(&two, &required), 2.0 / 6.0);

    assert_eq!(estimate(&required, &required), 1.0);
    assert_eq!(estimate(&BTreeSet::new(), &required), CONFIDENCE_FLOOR);
}
