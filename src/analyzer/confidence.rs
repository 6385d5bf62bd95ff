//! Coverage-based confidence score for a set of detected equipment.

use std::collections::BTreeSet;

use super::catalog::EquipmentId;

/// Lowest score reported when the required set is not fully covered.
/// Product heuristic inherited from the field deployment, not a derived bound.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

/// Score detected equipment against the required subset.
///
/// Returns exactly 1.0 when every required item was detected, otherwise the
/// covered fraction of `required`, never below [`CONFIDENCE_FLOOR`].
/// An empty `required` set is always fully covered.
pub fn estimate(detected: &BTreeSet<EquipmentId>, required: &BTreeSet<EquipmentId>) -> f64 {
    if required.is_subset(detected) {
        return 1.0;
    }

    let covered = required.intersection(detected).count();
    let ratio = covered as f64 / required.len() as f64;
    ratio.max(CONFIDENCE_FLOOR).clamp(0.0, 1.0)
}

/// Same as [`estimate`] for detections stored as a plain list.
pub fn estimate_list(detected: &[EquipmentId], required: &BTreeSet<EquipmentId>) -> f64 {
    let detected: BTreeSet<EquipmentId> = detected.iter().copied().collect();
    estimate(&detected, required)
}

/// Required items absent from `detected`, in catalog order.
pub fn missing(
    detected: &BTreeSet<EquipmentId>,
    required: &BTreeSet<EquipmentId>,
) -> Vec<EquipmentId> {
    required.difference(detected).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::catalog::default_required;

    fn set(items: &[EquipmentId]) -> BTreeSet<EquipmentId> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_two_of_six_required() {
        let detected = set(&[EquipmentId::Helmet, EquipmentId::Vest]);
        let score = estimate(&detected, &default_required());
        assert!((score - 2.0 / 6.0).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn test_full_coverage_is_exactly_one() {
        let required = default_required();
        assert_eq!(estimate(&required.clone(), &required), 1.0);
    }

    #[test]
    fn test_superset_is_exactly_one() {
        let mut detected = default_required();
        detected.insert(EquipmentId::EarProtection);
        assert_eq!(estimate(&detected, &default_required()), 1.0);
    }

    #[test]
    fn test_empty_detection_hits_floor() {
        let score = estimate(&BTreeSet::new(), &default_required());
        assert_eq!(score, CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_one_of_six_uses_floor() {
        let detected = set(&[EquipmentId::Helmet]);
        assert_eq!(estimate(&detected, &default_required()), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_non_required_items_do_not_count() {
        let detected = set(&[EquipmentId::EarProtection]);
        assert_eq!(estimate(&detected, &default_required()), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_empty_required_is_covered() {
        assert_eq!(estimate(&BTreeSet::new(), &BTreeSet::new()), 1.0);
    }

    #[test]
    fn test_score_bounds_for_every_subset() {
        let required = default_required();
        let all = EquipmentId::ALL;
        for mask in 0u32..(1 << all.len()) {
            let detected: BTreeSet<EquipmentId> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            let score = estimate(&detected, &required);
            assert!((CONFIDENCE_FLOOR..=1.0).contains(&score));
            assert_eq!(score == 1.0, required.is_subset(&detected));
        }
    }

    #[test]
    fn test_estimate_list_ignores_duplicates() {
        let score = estimate_list(
            &[EquipmentId::Helmet, EquipmentId::Helmet, EquipmentId::Vest],
            &default_required(),
        );
        assert!((score - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_items() {
        let detected = set(&[EquipmentId::Helmet, EquipmentId::Vest, EquipmentId::Boots]);
        let missing = missing(&detected, &default_required());
        assert_eq!(
            missing,
            vec![EquipmentId::Mask, EquipmentId::Goggles, EquipmentId::Gloves]
        );
    }
}
