//! Read-only patient roster and clinical-risk scoring. Grounded on `original_source/patients.py`.
//! The dispatcher consults this store at request-creation and score-recompute time; it never
//! mutates a `Patient` itself (vitals-over-time simulation in the source is not reproduced —
//! the roster here models a fixed snapshot, not a live ward feed).

use chrono::{Duration, NaiveDate, Utc};
use model::PatientFacts;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CurrentStatus {
    Stable,
    Monitoring,
    Critical,
    Improving,
    Deteriorating,
}

impl CurrentStatus {
    fn weight(self) -> f64 {
        match self {
            CurrentStatus::Critical => 1.0,
            CurrentStatus::Deteriorating => 0.75,
            CurrentStatus::Monitoring => 0.5,
            CurrentStatus::Improving => 0.25,
            CurrentStatus::Stable => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct Vitals {
    pub heart_rate: Option<i32>,
    pub blood_pressure_systolic: Option<i32>,
    pub blood_pressure_diastolic: Option<i32>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<f64>,
    pub respiratory_rate: Option<i32>,
    pub pain_level: Option<i32>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Patient {
    pub patient_id: String,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub date_of_admission: NaiveDate,
    pub current_status: CurrentStatus,
    pub current_vitals: Option<Vitals>,
    pub health_risks: Vec<String>,
    pub lifestyle_risks: Vec<String>,
    pub reason_for_hospitalization: String,
}

impl Patient {
    pub fn age(&self) -> u32 {
        let today = Utc::now().date_naive();
        today.years_since(self.date_of_birth).unwrap_or(0)
    }

    pub fn days_in_hospital(&self) -> f64 {
        let today = Utc::now().date_naive();
        (today - self.date_of_admission).num_days().max(0) as f64
    }

    /// Heart rate <50 or >120, systolic BP <90 or >180, temperature <35°C or >39°C,
    /// SpO2 <90%, or pain level >=7.
    pub fn is_critical_vitals(&self) -> bool {
        let Some(v) = &self.current_vitals else { return false };
        if let Some(hr) = v.heart_rate {
            if !(50..=120).contains(&hr) {
                return true;
            }
        }
        if let Some(sys) = v.blood_pressure_systolic {
            if !(90..=180).contains(&sys) {
                return true;
            }
        }
        if let Some(temp) = v.temperature {
            if !(35.0..=39.0).contains(&temp) {
                return true;
            }
        }
        if let Some(spo2) = v.oxygen_saturation {
            if spo2 < 90.0 {
                return true;
            }
        }
        if let Some(pain) = v.pain_level {
            if pain >= 7 {
                return true;
            }
        }
        false
    }

    /// Overall health risk score in `[0, 1]`. The source's `is_critical_vitals` branch
    /// adds a dead `+= 0.` term; per the resolved open question it is not reintroduced here
    /// — critical-vitals urgency is carried entirely by the Tier-2 score's own term instead.
    pub fn risk_score(&self) -> f64 {
        let mut score = self.current_status.weight() * 0.3;
        score += (self.health_risks.len() as f64 * 0.1).min(0.2);
        score += (self.lifestyle_risks.len() as f64 * 0.05).min(0.1);
        let age = self.age();
        if age < 2 || age > 75 {
            score += 0.1;
        }
        score.min(1.0)
    }

    pub fn needs_urgency(&self) -> bool {
        self.current_status == CurrentStatus::Critical
            || self.is_critical_vitals()
            || self.risk_score() >= 0.7
    }

    pub fn to_facts(&self) -> PatientFacts {
        PatientFacts {
            risk_score: self.risk_score(),
            is_critical_vitals: self.is_critical_vitals(),
            health_risk_count: self.health_risks.len() as u32,
            lifestyle_risk_count: self.lifestyle_risks.len() as u32,
            days_in_hospital: self.days_in_hospital(),
        }
    }
}

/// A fixed in-memory roster, standing in for the hospital's patient records system
/// (an out-of-scope external collaborator per spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct PatientStore {
    patients: HashMap<String, Patient>,
}

impl PatientStore {
    pub fn new() -> Self {
        Self { patients: HashMap::new() }
    }

    pub fn insert(&mut self, patient: Patient) {
        self.patients.insert(patient.patient_id.clone(), patient);
    }

    pub fn get(&self, patient_id: &str) -> Option<&Patient> {
        self.patients.get(patient_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Patient> {
        self.patients.values()
    }

    /// Eight-patient seed roster transcribed from the sample dataset, minus the time-varying
    /// vitals simulation (out of scope here — the roster is a fixed snapshot).
    pub fn seeded() -> Self {
        let today = Utc::now().date_naive();
        let admitted = |days_ago: i64| today - Duration::days(days_ago);

        let mut store = Self::new();
        store.insert(Patient {
            patient_id: "P001".into(),
            name: "John Smith".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1945, 3, 15).unwrap(),
            date_of_admission: admitted(2),
            current_status: CurrentStatus::Critical,
            current_vitals: Some(Vitals {
                heart_rate: Some(105),
                blood_pressure_systolic: Some(150),
                blood_pressure_diastolic: Some(95),
                temperature: Some(37.8),
                oxygen_saturation: Some(92.0),
                respiratory_rate: Some(22),
                pain_level: Some(6),
            }),
            health_risks: vec!["hypertension".into(), "coronary_artery_disease".into(), "diabetes".into()],
            lifestyle_risks: vec!["smoking_history".into()],
            reason_for_hospitalization: "Acute myocardial infarction, cardiac monitoring".into(),
        });
        store.insert(Patient {
            patient_id: "P002".into(),
            name: "Sarah Johnson".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1998, 7, 22).unwrap(),
            date_of_admission: admitted(1),
            current_status: CurrentStatus::Monitoring,
            current_vitals: Some(Vitals {
                heart_rate: Some(95),
                blood_pressure_systolic: Some(120),
                blood_pressure_diastolic: Some(80),
                temperature: Some(38.5),
                oxygen_saturation: Some(98.0),
                respiratory_rate: Some(18),
                pain_level: Some(8),
            }),
            health_risks: vec!["obesity".into()],
            lifestyle_risks: vec!["sedentary".into()],
            reason_for_hospitalization: "Acute appendicitis, post-operative recovery".into(),
        });
        store.insert(Patient {
            patient_id: "P003".into(),
            name: "Michael Chen".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 11, 8).unwrap(),
            date_of_admission: admitted(3),
            current_status: CurrentStatus::Monitoring,
            current_vitals: Some(Vitals {
                heart_rate: Some(88),
                blood_pressure_systolic: Some(130),
                blood_pressure_diastolic: Some(85),
                temperature: Some(38.2),
                oxygen_saturation: Some(94.0),
                respiratory_rate: Some(20),
                pain_level: Some(4),
            }),
            health_risks: vec!["asthma".into()],
            lifestyle_risks: vec![],
            reason_for_hospitalization: "Pneumonia, respiratory support needed".into(),
        });
        store.insert(Patient {
            patient_id: "P004".into(),
            name: "Margaret Wilson".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1940, 5, 12).unwrap(),
            date_of_admission: admitted(5),
            current_status: CurrentStatus::Improving,
            current_vitals: Some(Vitals {
                heart_rate: Some(75),
                blood_pressure_systolic: Some(165),
                blood_pressure_diastolic: Some(100),
                temperature: Some(36.8),
                oxygen_saturation: Some(96.0),
                respiratory_rate: Some(16),
                pain_level: Some(2),
            }),
            health_risks: vec!["hypertension".into(), "atrial_fibrillation".into(), "diabetes".into()],
            lifestyle_risks: vec![],
            reason_for_hospitalization: "Cerebrovascular accident (stroke), rehabilitation".into(),
        });
        store.insert(Patient {
            patient_id: "P005".into(),
            name: "Emma Martinez".into(),
            date_of_birth: NaiveDate::from_ymd_opt(2020, 9, 3).unwrap(),
            date_of_admission: admitted(1),
            current_status: CurrentStatus::Critical,
            current_vitals: Some(Vitals {
                heart_rate: Some(120),
                blood_pressure_systolic: Some(100),
                blood_pressure_diastolic: Some(65),
                temperature: Some(37.5),
                oxygen_saturation: Some(91.0),
                respiratory_rate: Some(32),
                pain_level: Some(5),
            }),
            health_risks: vec!["asthma".into(), "eczema".into()],
            lifestyle_risks: vec![],
            reason_for_hospitalization: "Severe asthma exacerbation, respiratory distress".into(),
        });
        store.insert(Patient {
            patient_id: "P006".into(),
            name: "David Lee".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1992, 2, 18).unwrap(),
            date_of_admission: admitted(0),
            current_status: CurrentStatus::Stable,
            current_vitals: Some(Vitals {
                heart_rate: Some(72),
                blood_pressure_systolic: Some(118),
                blood_pressure_diastolic: Some(75),
                temperature: Some(36.9),
                oxygen_saturation: Some(99.0),
                respiratory_rate: Some(16),
                pain_level: Some(7),
            }),
            health_risks: vec![],
            lifestyle_risks: vec!["active_sports".into()],
            reason_for_hospitalization: "Right tibia fracture from fall, surgical fixation planned".into(),
        });
        store.insert(Patient {
            patient_id: "P007".into(),
            name: "Robert Taylor".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1938, 12, 25).unwrap(),
            date_of_admission: admitted(2),
            current_status: CurrentStatus::Monitoring,
            current_vitals: Some(Vitals {
                heart_rate: Some(92),
                blood_pressure_systolic: Some(140),
                blood_pressure_diastolic: Some(88),
                temperature: Some(38.8),
                oxygen_saturation: Some(95.0),
                respiratory_rate: Some(20),
                pain_level: Some(3),
            }),
            health_risks: vec!["diabetes".into(), "kidney_disease".into(), "hypertension".into()],
            lifestyle_risks: vec![],
            reason_for_hospitalization: "Urinary tract infection with sepsis, dehydration".into(),
        });
        store.insert(Patient {
            patient_id: "P008".into(),
            name: "Jennifer Adams".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1975, 6, 30).unwrap(),
            date_of_admission: admitted(1),
            current_status: CurrentStatus::Improving,
            current_vitals: Some(Vitals {
                heart_rate: Some(78),
                blood_pressure_systolic: Some(115),
                blood_pressure_diastolic: Some(70),
                temperature: Some(37.2),
                oxygen_saturation: Some(98.0),
                respiratory_rate: Some(14),
                pain_level: Some(5),
            }),
            health_risks: vec!["obesity".into()],
            lifestyle_risks: vec!["sedentary".into()],
            reason_for_hospitalization: "Laparoscopic cholecystectomy, post-op recovery".into(),
        });

        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_roster_has_eight_patients() {
        let store = PatientStore::seeded();
        assert_eq!(store.all().count(), 8);
        assert!(store.get("P001").is_some());
        assert!(store.get("P999").is_none());
    }

    #[test]
    fn p001_has_critical_vitals_from_low_oxygen_and_high_heart_rate() {
        let store = PatientStore::seeded();
        let p = store.get("P001").unwrap();
        assert!(p.is_critical_vitals());
        assert!(p.needs_urgency());
    }

    #[test]
    fn p006_stable_with_no_risks_has_low_risk_score() {
        let store = PatientStore::seeded();
        let p = store.get("P006").unwrap();
        assert!(p.risk_score() < 0.5);
    }

    #[test]
    fn risk_score_is_always_clamped_to_unit_interval() {
        let store = PatientStore::seeded();
        for p in store.all() {
            let score = p.risk_score();
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn facts_conversion_carries_through_risk_fields() {
        let store = PatientStore::seeded();
        let p = store.get("P004").unwrap();
        let facts = p.to_facts();
        assert_eq!(facts.health_risk_count, 3);
        assert_eq!(facts.lifestyle_risk_count, 0);
    }
}
