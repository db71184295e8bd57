//! Hospital item catalog and payload splitting. Grounded on `original_source/items.py`.
//! The catalog is fixed fixture data (weights/priorities drawn from the Python source),
//! never mutated at runtime.

use std::collections::HashMap;
use thiserror::Error;

/// Maximum total payload weight a single drone trip can carry.
pub const MAX_PAYLOAD_CAPACITY_KG: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Item {
    pub id: &'static str,
    pub name: &'static str,
    pub weight_kg: f64,
    pub category: &'static str,
    pub description: &'static str,
    pub emergency_priority: u8,
    pub routine_priority: u8,
}

macro_rules! item {
    ($id:expr, $name:expr, $weight:expr, $category:expr, $desc:expr, $emerg:expr, $routine:expr) => {
        Item {
            id: $id,
            name: $name,
            weight_kg: $weight,
            category: $category,
            description: $desc,
            emergency_priority: $emerg,
            routine_priority: $routine,
        }
    };
}

/// The full item catalog, flattened across categories. Priority levels: 10 = life-critical,
/// 5 = important, 1 = routine.
pub const CATALOG: &[Item] = &[
    item!("med_epinephrine", "Epinephrine (EpiPen)", 0.1, "medications", "Emergency epinephrine auto-injector", 10, 7),
    item!("med_insulin", "Insulin Vial", 0.05, "medications", "Insulin medication vial", 9, 8),
    item!("med_pain_relief", "Pain Relief Medication", 0.08, "medications", "Standard pain relief medication pack", 8, 6),
    item!("med_antibiotics", "Antibiotics", 0.12, "medications", "Antibiotic medication pack", 9, 7),
    item!("med_saline_bag", "Saline Bag (100ml)", 0.15, "medications", "Small saline solution bag", 10, 6),
    item!("med_blood_sample", "Blood Sample Vial", 0.02, "medications", "Blood collection vial", 8, 5),
    item!("emerg_oxygen_mask", "Oxygen Mask", 0.08, "emergency", "Emergency oxygen delivery mask", 10, 5),
    item!("emerg_defibrillator_pad", "Defibrillator Pads", 0.15, "emergency", "AED defibrillator pads", 10, 4),
    item!("emerg_iv_kit", "IV Starter Kit", 0.2, "emergency", "Intravenous insertion kit", 10, 6),
    item!("emerg_tourniquet", "Tourniquet", 0.05, "emergency", "Medical tourniquet", 9, 4),
    item!("emerg_splint", "Splint (Small)", 0.3, "emergency", "Small medical splint", 7, 5),
    item!("supp_bandages", "Bandage Pack", 0.05, "supplies", "Assorted bandages", 8, 5),
    item!("supp_gloves", "Medical Gloves (Box)", 0.08, "supplies", "Box of medical examination gloves", 7, 6),
    item!("supp_syringes", "Syringes (Pack)", 0.1, "supplies", "Pack of sterile syringes", 8, 6),
    item!("supp_needles", "Needles (Pack)", 0.03, "supplies", "Pack of sterile needles", 7, 5),
    item!("supp_gauze", "Gauze Pack", 0.06, "supplies", "Sterile gauze pack", 7, 5),
    item!("supp_tape", "Medical Tape", 0.02, "supplies", "Medical adhesive tape", 6, 4),
    item!("lab_urine_sample", "Urine Sample", 0.05, "lab_samples", "Urine collection container", 6, 5),
    item!("lab_blood_vial", "Blood Sample Vial", 0.02, "lab_samples", "Blood collection vial", 8, 6),
    item!("lab_tissue_sample", "Tissue Sample", 0.03, "lab_samples", "Biological tissue sample container", 7, 5),
    item!("lab_culture_swab", "Culture Swab", 0.01, "lab_samples", "Bacterial culture swab", 6, 4),
    item!("food_meal", "Patient Meal", 0.4, "food", "Standard patient meal tray", 4, 7),
    item!("food_snack", "Snack Pack", 0.15, "food", "Small snack pack", 3, 5),
    item!("food_drink", "Drink Container", 0.2, "food", "Beverage container", 5, 6),
    item!("food_nutrition", "Nutritional Supplement", 0.25, "food", "Nutritional supplement drink", 6, 6),
    item!("eqp_thermometer", "Digital Thermometer", 0.05, "equipment", "Digital medical thermometer", 7, 5),
    item!("eqp_stethoscope", "Stethoscope", 0.2, "equipment", "Medical stethoscope", 6, 5),
    item!("eqp_blood_pressure", "Blood Pressure Cuff", 0.15, "equipment", "Portable blood pressure monitor", 8, 5),
    item!("eqp_pulse_oximeter", "Pulse Oximeter", 0.08, "equipment", "Finger pulse oximeter", 8, 5),
    item!("doc_chart", "Patient Chart", 0.1, "documents", "Patient medical chart/folder", 7, 6),
    item!("doc_xray", "X-Ray Film", 0.05, "documents", "X-Ray imaging film", 8, 6),
    item!("doc_lab_results", "Lab Results", 0.02, "documents", "Laboratory test results", 7, 6),
];

#[derive(Debug, Error, PartialEq)]
pub enum ItemsError {
    #[error("payload must contain at least one item")]
    EmptyPayload,
}

pub fn get_item(item_id: &str) -> Option<&'static Item> {
    CATALOG.iter().find(|item| item.id == item_id)
}

pub fn items_by_category(category: &str) -> impl Iterator<Item = &'static Item> {
    CATALOG.iter().filter(move |item| item.category == category)
}

/// A payload expressed as item id -> quantity.
pub type ItemQuantities = HashMap<String, u32>;

pub fn total_weight(quantities: &ItemQuantities) -> f64 {
    quantities
        .iter()
        .filter(|&(_, &qty)| qty > 0)
        .filter_map(|(id, &qty)| get_item(id).map(|item| item.weight_kg * qty as f64))
        .sum()
}

/// Confirms the payload has at least one recognized item with positive weight. Payloads
/// over `MAX_PAYLOAD_CAPACITY_KG` are not rejected here — `split` breaks them up instead.
pub fn validate(quantities: &ItemQuantities) -> Result<f64, ItemsError> {
    let weight = total_weight(quantities);
    if weight <= 0.0 {
        return Err(ItemsError::EmptyPayload);
    }
    Ok(weight)
}

/// `(item_id, quantity, total_weight_kg, priority_score)`, sorted by priority score
/// (highest first), then by weight (lighter first for equal priority).
pub fn prioritize(quantities: &ItemQuantities, patient_critical: bool) -> Vec<(String, u32, f64, u8)> {
    let mut prioritized: Vec<(String, u32, f64, u8)> = quantities
        .iter()
        .filter(|&(_, &qty)| qty > 0)
        .filter_map(|(id, &qty)| {
            get_item(id).map(|item| {
                let priority_score = if patient_critical {
                    item.emergency_priority
                } else {
                    item.routine_priority
                };
                (id.clone(), qty, item.weight_kg * qty as f64, priority_score)
            })
        })
        .collect();

    prioritized.sort_by(|a, b| b.3.cmp(&a.3).then_with(|| a.2.partial_cmp(&b.2).unwrap()));
    prioritized
}

/// Splits a payload into one or more drone loads, each within `MAX_PAYLOAD_CAPACITY_KG`,
/// packing highest-priority items first. Returns a single-element vector unchanged if the
/// payload already fits.
pub fn split(quantities: &ItemQuantities, patient_critical: bool) -> Vec<ItemQuantities> {
    if quantities.is_empty() {
        return Vec::new();
    }
    if total_weight(quantities) <= MAX_PAYLOAD_CAPACITY_KG {
        return vec![quantities.clone()];
    }

    let prioritized = prioritize(quantities, patient_critical);
    let mut payloads: Vec<ItemQuantities> = Vec::new();
    let mut current: ItemQuantities = HashMap::new();
    let mut current_weight = 0.0_f64;

    for (item_id, quantity, _, _) in prioritized {
        let Some(item) = get_item(&item_id) else { continue };
        let mut remaining_units = quantity;

        while remaining_units > 0 {
            let mut remaining_capacity = MAX_PAYLOAD_CAPACITY_KG - current_weight;
            if remaining_capacity < 0.01 {
                if !current.is_empty() {
                    payloads.push(std::mem::take(&mut current));
                }
                current_weight = 0.0;
                remaining_capacity = MAX_PAYLOAD_CAPACITY_KG;
            }

            let units_fitting = remaining_units.min((remaining_capacity / item.weight_kg) as u32);
            if units_fitting > 0 {
                *current.entry(item_id.clone()).or_insert(0) += units_fitting;
                current_weight += units_fitting as f64 * item.weight_kg;
                remaining_units -= units_fitting;
            } else {
                if !current.is_empty() {
                    payloads.push(std::mem::take(&mut current));
                }
                current_weight = 0.0;
                let units_per_payload = (MAX_PAYLOAD_CAPACITY_KG / item.weight_kg) as u32;
                if units_per_payload > 0 {
                    let units_for_payload = remaining_units.min(units_per_payload);
                    current.insert(item_id.clone(), units_for_payload);
                    current_weight += units_for_payload as f64 * item.weight_kg;
                    remaining_units -= units_for_payload;
                } else {
                    break;
                }
            }
        }
    }

    if !current.is_empty() {
        payloads.push(current);
    }

    if payloads.is_empty() {
        vec![quantities.clone()]
    } else {
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantities(pairs: &[(&str, u32)]) -> ItemQuantities {
        pairs.iter().map(|&(id, qty)| (id.to_string(), qty)).collect()
    }

    #[test]
    fn validate_rejects_empty_payload() {
        assert_eq!(validate(&HashMap::new()), Err(ItemsError::EmptyPayload));
    }

    #[test]
    fn under_capacity_payload_is_not_split() {
        let q = quantities(&[("med_insulin", 2)]);
        let payloads = split(&q, false);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0], q);
    }

    #[test]
    fn over_capacity_payload_splits_into_two_loads() {
        // 5 x food_meal (0.4kg each = 2.0kg) + 4 x med_insulin (0.05kg each = 0.2kg) = 2.2kg
        let q = quantities(&[("food_meal", 5), ("med_insulin", 4)]);
        assert!((total_weight(&q) - 2.2).abs() < 1e-9);
        let payloads = split(&q, false);
        assert_eq!(payloads.len(), 2);
        for payload in &payloads {
            assert!(total_weight(payload) <= MAX_PAYLOAD_CAPACITY_KG + 1e-9);
        }
        let total_insulin: u32 = payloads.iter().map(|p| *p.get("med_insulin").unwrap_or(&0)).sum();
        let total_meals: u32 = payloads.iter().map(|p| *p.get("food_meal").unwrap_or(&0)).sum();
        assert_eq!(total_insulin, 4);
        assert_eq!(total_meals, 5);
    }

    #[test]
    fn prioritize_ranks_critical_items_first_under_patient_critical() {
        let q = quantities(&[("food_meal", 1), ("emerg_iv_kit", 1)]);
        let ranked = prioritize(&q, true);
        assert_eq!(ranked[0].0, "emerg_iv_kit");
    }

    #[test]
    fn unknown_item_ids_are_ignored_not_erroring() {
        let q = quantities(&[("not_a_real_item", 3)]);
        assert_eq!(total_weight(&q), 0.0);
    }
}
