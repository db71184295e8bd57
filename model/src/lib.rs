//! Domain types shared by every other crate in the dispatch engine: locations, drones,
//! requests, and the CTAS triage scale. Grounded on the original `models.py`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

pub type LocationId = u32;
pub type DroneId = u32;
pub type RequestId = u32;

/// The five-level Canadian Triage and Acuity Scale used for clinical priority.
///
/// Higher numeric value means higher priority; `CtasI` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Ctas {
    CtasV = 1,
    CtasIV = 2,
    CtasIII = 3,
    CtasII = 4,
    CtasI = 5,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized triage class string: {0}")]
pub struct UnknownTriageString(pub String);

impl Ctas {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Target response time in minutes for this triage class.
    pub fn target_response_minutes(self) -> u32 {
        match self {
            Ctas::CtasI => 0,
            Ctas::CtasII => 15,
            Ctas::CtasIII => 30,
            Ctas::CtasIV => 60,
            Ctas::CtasV => 120,
        }
    }

    /// CTAS I and II are "emergency" classes.
    pub fn is_emergency(self) -> bool {
        matches!(self, Ctas::CtasI | Ctas::CtasII)
    }

    /// Parses the external boundary strings, including legacy aliases.
    ///
    /// Accepts `ctas_i`..`ctas_v` (case-insensitive) plus the legacy aliases
    /// `emergency_critical`, `emergency_urgent`, `normal_high`, `normal_low`.
    pub fn parse(input: &str) -> Result<Ctas, UnknownTriageString> {
        match input.to_ascii_lowercase().as_str() {
            "ctas_i" | "emergency_critical" => Ok(Ctas::CtasI),
            "ctas_ii" | "emergency_urgent" => Ok(Ctas::CtasII),
            "ctas_iii" | "normal_high" => Ok(Ctas::CtasIII),
            "ctas_iv" | "normal_low" => Ok(Ctas::CtasIV),
            "ctas_v" => Ok(Ctas::CtasV),
            other => Err(UnknownTriageString(other.to_string())),
        }
    }
}

/// A node in the hospital floor-plan graph.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub x: f64,
    pub y: f64,
    pub floor: i32,
}

impl Location {
    pub fn new(id: LocationId, x: f64, y: f64, floor: i32) -> Self {
        Self { id, x, y, floor }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DroneStatus {
    Available,
    Assigned,
    InTransit,
    ReturningToCharging,
    Charging,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Drone {
    pub id: DroneId,
    pub current_location_id: LocationId,
    pub status: DroneStatus,
    pub assigned_request_id: Option<RequestId>,
    pub emergency_drone: bool,
    pub battery_capacity_kwh: f64,
    pub battery_level_kwh: f64,
    pub is_charging: bool,
    pub flight_start_time: Option<DateTime<Utc>>,
    pub battery_consumed_this_flight_kwh: f64,
    pub delivery_route: Vec<LocationId>,
    pub current_payload_weight_kg: f64,
    pub current_speed_m_per_sec: f64,
}

impl Drone {
    pub fn new(id: DroneId, current_location_id: LocationId, emergency_drone: bool, battery_capacity_kwh: f64) -> Self {
        Self {
            id,
            current_location_id,
            status: DroneStatus::Available,
            assigned_request_id: None,
            emergency_drone,
            battery_capacity_kwh,
            battery_level_kwh: battery_capacity_kwh,
            is_charging: false,
            flight_start_time: None,
            battery_consumed_this_flight_kwh: 0.0,
            delivery_route: Vec::new(),
            current_payload_weight_kg: 0.0,
            current_speed_m_per_sec: 0.0,
        }
    }

    /// Per spec.md §9(b): available iff `status == Available && !is_charging`,
    /// independent of whether the drone's current node happens to be a charging station.
    pub fn is_available(&self) -> bool {
        self.status == DroneStatus::Available && !self.is_charging
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestStatus {
    Pending,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

/// Facts about a patient needed by the vital-priority-score computation, decoupled from the
/// `patients` crate so that `model` never depends on it (Request stores only a `patient_id`
/// and the dispatcher resolves these facts at score time — see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct PatientFacts {
    pub risk_score: f64,
    pub is_critical_vitals: bool,
    pub health_risk_count: u32,
    pub lifestyle_risk_count: u32,
    pub days_in_hospital: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub requester_id: String,
    pub requester_name: String,
    pub requester_location_id: LocationId,
    pub priority: Ctas,
    pub description: String,
    pub emergency: bool,
    pub timestamp: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub assigned_drone_id: Option<DroneId>,
    pub patient_id: Option<String>,
    pub payload_items: HashMap<String, u32>,
    pub payload_weight_kg: f64,

    pub parent_request_id: Option<RequestId>,
    pub is_partial_delivery: bool,
    pub delivery_sequence: u32,
    pub total_deliveries: u32,

    // Prioritization attributes, synthesized from patient data at creation when a
    // patient_id is supplied and the field was not explicitly given.
    pub patient_age: Option<u32>,
    pub waiting_time_minutes: f64,
    pub is_parent: bool,
    pub expected_life_years_gained: Option<f64>,
    pub quality_of_life_score: Option<f64>,
    pub lifestyle_responsibility: Option<String>,
    pub social_role: Option<String>,
    pub clinical_severity_score: Option<f64>,

    /// Cached Tier-2 score, recomputed by the dispatcher at the start of every processing
    /// pass (alongside `waiting_time_minutes`). `Ord` reads this field rather than taking a
    /// patient-store reference, which keeps the ordering total and free of side effects.
    pub vital_priority_score: f64,

    // Post-completion metrics.
    pub distance_traveled_meters: Option<f64>,
    pub drone_energy_kwh: Option<f64>,
    pub traditional_energy_kwh: Option<f64>,
    pub energy_saved_kwh: Option<f64>,
    pub co2_saved_kg: Option<f64>,
    pub traditional_method: Option<String>,
    pub chosen_path_distance_meters: Option<f64>,
    pub alternative_path_distance_meters: Option<f64>,
    pub path_efficiency_percentage: Option<f64>,
    pub path_efficiency_ratio: Option<f64>,
    pub time_saved_vs_alternative_seconds: Option<f64>,
}

const SCORE_EPSILON: f64 = 0.01;

impl Request {
    /// Recomputes the Tier-2 vital priority score (§4.3) and stores it in
    /// `vital_priority_score`. `patient` is `None` when the request has no `patient_id` or
    /// the patient could not be resolved.
    pub fn recompute_vital_priority_score(&mut self, patient: Option<PatientFacts>) {
        let clinical_severity_term = match self.clinical_severity_score {
            Some(score) => score * 30.0,
            None => patient.map(|p| p.risk_score * 30.0).unwrap_or(0.0),
        };

        let life_years_term = self
            .expected_life_years_gained
            .map(|years| (years / 50.0).min(1.0) * 25.0)
            .unwrap_or(0.0);

        let target_response = self.priority.target_response_minutes();
        let waiting_ratio = if target_response > 0 {
            (self.waiting_time_minutes / target_response as f64).min(2.0)
        } else {
            // CTAS_I's target response time is immediate (0 minutes); any measurable wait
            // already represents the worst-case overrun, so the ratio saturates at its cap.
            2.0
        };
        let waiting_term = waiting_ratio * 20.0;

        let age_term = self
            .patient_age
            .map(|age| age_factor(age as f64) * 15.0)
            .unwrap_or(0.0);

        let parent_term = if self.is_parent { 8.0 } else { 0.0 };

        let qol_term = self.quality_of_life_score.unwrap_or(0.0) * 6.0;

        let critical_term = match patient {
            Some(p) => {
                let base = if p.is_critical_vitals { 10.0 } else { 0.0 };
                let risks = (p.health_risk_count as f64 * 0.5).min(5.0);
                let stay = (p.days_in_hospital / 30.0).min(1.0) * 4.0;
                base + risks + stay
            }
            None => 0.0,
        };

        let social_term = match self.social_role.as_deref() {
            Some("healthcare_worker") => 4.0,
            Some("essential_worker") => 3.0,
            Some("elderly_caregiver") => 2.5,
            Some("general") => 1.0,
            Some(_other) => 1.0,
            // spec.md §4.3: "(+1 if absent)" — taken literally even though the source's
            // actual code path contributes 0 in this case. See SPEC_FULL.md / DESIGN.md.
            None => 1.0,
        };

        let lifestyle_term = match self.lifestyle_responsibility.as_deref() {
            Some("responsible") => 0.0,
            Some("moderate") => -1.0,
            Some("irresponsible") => -3.0,
            Some(_other) => 0.0,
            None => match patient {
                Some(p) => -(p.lifestyle_risk_count as f64 * 0.5).min(2.0),
                None => 0.0,
            },
        };

        self.vital_priority_score = clinical_severity_term
            + life_years_term
            + waiting_term
            + age_term
            + parent_term
            + qol_term
            + critical_term
            + social_term
            + lifestyle_term;
    }
}

fn age_factor(age: f64) -> f64 {
    if age < 5.0 {
        1.0
    } else if age < 25.0 {
        (1.0 - age / 100.0 + 0.3).clamp(0.0, 1.0)
    } else if age > 75.0 {
        (1.0 - age / 100.0).max(0.5)
    } else {
        1.0 - age / 100.0
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for Request {}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Request {
    /// Total order matching spec.md §4.3: CTAS first, then the vital priority score within
    /// an epsilon, then the tertiary/quaternary tie-breaks. "Greater" means "more urgent",
    /// so a `BinaryHeap<Request>` pops the highest-priority request first without `Reverse`.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        match self.priority.value().cmp(&other.priority.value()) {
            Ordering::Equal => {}
            non_eq => return non_eq,
        }

        let score_diff = self.vital_priority_score - other.vital_priority_score;
        if score_diff.abs() >= SCORE_EPSILON {
            return score_diff.partial_cmp(&0.0).unwrap_or(Ordering::Equal);
        }

        // Tertiary tie-break.
        if let (Some(a), Some(b)) = (self.parent_request_id, other.parent_request_id) {
            if a == b {
                // Same parent: earlier delivery_sequence wins (is "greater").
                return other.delivery_sequence.cmp(&self.delivery_sequence);
            }
        }
        match (self.is_partial_delivery, other.is_partial_delivery) {
            (false, true) => return Ordering::Greater,
            (true, false) => return Ordering::Less,
            _ => {}
        }
        if let (Some(a), Some(b)) = (self.parent_request_id, other.parent_request_id) {
            if a != b {
                // Lower parent id wins (is "greater" priority).
                return b.cmp(&a);
            }
        }

        // Quaternary tie-break: older timestamp wins.
        other.timestamp.cmp(&self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_request(id: RequestId, priority: Ctas, ts_secs: i64) -> Request {
        Request {
            id,
            requester_id: "r".into(),
            requester_name: "r".into(),
            requester_location_id: 1,
            priority,
            description: "d".into(),
            emergency: priority.is_emergency(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            completed_at: None,
            status: RequestStatus::Pending,
            assigned_drone_id: None,
            patient_id: None,
            payload_items: HashMap::new(),
            payload_weight_kg: 0.5,
            parent_request_id: None,
            is_partial_delivery: false,
            delivery_sequence: 1,
            total_deliveries: 1,
            patient_age: None,
            waiting_time_minutes: 0.0,
            is_parent: false,
            expected_life_years_gained: None,
            quality_of_life_score: None,
            lifestyle_responsibility: None,
            social_role: None,
            clinical_severity_score: None,
            vital_priority_score: 0.0,
            distance_traveled_meters: None,
            drone_energy_kwh: None,
            traditional_energy_kwh: None,
            energy_saved_kwh: None,
            co2_saved_kg: None,
            traditional_method: None,
            chosen_path_distance_meters: None,
            alternative_path_distance_meters: None,
            path_efficiency_percentage: None,
            path_efficiency_ratio: None,
            time_saved_vs_alternative_seconds: None,
        }
    }

    #[test]
    fn ctas_parse_accepts_legacy_aliases() {
        assert_eq!(Ctas::parse("emergency_critical").unwrap(), Ctas::CtasI);
        assert_eq!(Ctas::parse("emergency_urgent").unwrap(), Ctas::CtasII);
        assert_eq!(Ctas::parse("normal_high").unwrap(), Ctas::CtasIII);
        assert_eq!(Ctas::parse("normal_low").unwrap(), Ctas::CtasIV);
        assert_eq!(Ctas::parse("CTAS_V").unwrap(), Ctas::CtasV);
        assert!(Ctas::parse("bogus").is_err());
    }

    #[test]
    fn higher_ctas_always_wins_regardless_of_score() {
        let mut low = base_request(1, Ctas::CtasV, 1_700_000_000);
        low.vital_priority_score = 1000.0;
        let mut high = base_request(2, Ctas::CtasI, 1_700_000_100);
        high.vital_priority_score = 0.0;
        assert!(high > low);
    }

    #[test]
    fn ties_within_epsilon_fall_through_to_timestamp() {
        let mut a = base_request(1, Ctas::CtasIII, 1_700_000_000);
        a.vital_priority_score = 10.0;
        let mut b = base_request(2, Ctas::CtasIII, 1_700_000_050);
        b.vital_priority_score = 10.004;
        // within epsilon of each other -> falls through to timestamp (older wins)
        assert!(a > b);
    }

    #[test]
    fn split_children_earlier_sequence_wins() {
        let mut first = base_request(2, Ctas::CtasIII, 1_700_000_010);
        first.parent_request_id = Some(2);
        first.is_partial_delivery = true;
        first.delivery_sequence = 1;
        first.vital_priority_score = 5.0;

        let mut second = base_request(3, Ctas::CtasIII, 1_700_000_010);
        second.parent_request_id = Some(2);
        second.is_partial_delivery = true;
        second.delivery_sequence = 2;
        second.vital_priority_score = 5.0;

        assert!(first > second);
    }

    #[test]
    fn non_split_beats_split_at_equal_score() {
        let mut split = base_request(2, Ctas::CtasIII, 1_700_000_010);
        split.parent_request_id = Some(7);
        split.is_partial_delivery = true;
        split.vital_priority_score = 5.0;

        let mut whole = base_request(8, Ctas::CtasIII, 1_700_000_010);
        whole.vital_priority_score = 5.0;

        assert!(whole > split);
    }

    #[test]
    fn drone_available_iff_status_available_and_not_charging() {
        let mut d = Drone::new(1, 9, false, 2.0);
        assert!(d.is_available());
        d.is_charging = true;
        assert!(!d.is_available());
    }
}
