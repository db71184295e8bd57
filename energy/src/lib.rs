//! Pure functions mapping (distance, payload) to energy, and comparisons against baseline
//! transport. Grounded on `original_source/energy.py`. Treated by the dispatcher as a
//! read-only external collaborator (spec.md §1); no mutable state lives here.

pub const DRONE_ENERGY_PER_METER_BASE_KWH: f64 = 0.00108;
pub const DRONE_ENERGY_BASE_KWH: f64 = 0.02;

pub const VEHICLE_ENERGY_PER_METER_KWH: f64 = 0.0003;
pub const VEHICLE_ENERGY_BASE_KWH: f64 = 0.1;

pub const WALKING_ENERGY_PER_METER_KWH: f64 = 0.0002;
pub const WALKING_ENERGY_BASE_KWH: f64 = 0.001;

pub const ELECTRIC_CART_ENERGY_PER_METER_KWH: f64 = 0.00015;
pub const ELECTRIC_CART_ENERGY_BASE_KWH: f64 = 0.05;

/// 3 mph expressed in m/s, used for the walking-time comparison.
pub const WALKING_SPEED_M_PER_SEC: f64 = 3.0 * 1.60934 / 3.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TraditionalMethod {
    Vehicle,
    ElectricCart,
    Walking,
}

impl TraditionalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TraditionalMethod::Vehicle => "vehicle",
            TraditionalMethod::ElectricCart => "electric_cart",
            TraditionalMethod::Walking => "walking",
        }
    }

    /// Falls back to `Vehicle` for an unrecognized string, matching the source's default.
    pub fn parse(s: &str) -> Self {
        match s {
            "electric_cart" => TraditionalMethod::ElectricCart,
            "walking" => TraditionalMethod::Walking,
            _ => TraditionalMethod::Vehicle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergySource {
    Grid,
    Renewable,
    Fossil,
}

impl EnergySource {
    fn emissions_factor_kg_per_kwh(self) -> f64 {
        match self {
            EnergySource::Grid => 0.4,
            EnergySource::Renewable => 0.0,
            EnergySource::Fossil => 0.8,
        }
    }
}

/// Payload multiplier: 0.9x at 0kg, linear to 1.0x at 1kg, linear to 1.33x at 2kg
/// (Matternet M2 range drops from 20km to 15km as payload doubles from 1kg to 2kg).
fn payload_multiplier(payload_weight_kg: f64) -> f64 {
    let payload = payload_weight_kg.clamp(0.0, 2.0);
    if payload <= 0.0 {
        0.9
    } else if payload <= 1.0 {
        0.9 + payload * 0.1
    } else {
        1.0 + (payload - 1.0) * 0.33
    }
}

/// Energy consumed by a drone for a trip of `distance_meters` carrying `payload_weight_kg`.
pub fn calculate_drone_energy(distance_meters: f64, payload_weight_kg: f64) -> f64 {
    let energy_per_meter = DRONE_ENERGY_PER_METER_BASE_KWH * payload_multiplier(payload_weight_kg);
    DRONE_ENERGY_BASE_KWH + distance_meters * energy_per_meter
}

/// Energy per meter at a given payload, for real-time battery tracking mid-flight.
pub fn calculate_drone_energy_per_meter(payload_weight_kg: f64) -> f64 {
    DRONE_ENERGY_PER_METER_BASE_KWH * payload_multiplier(payload_weight_kg)
}

pub fn calculate_traditional_energy(distance_meters: f64, method: TraditionalMethod) -> f64 {
    let (base, per_meter) = match method {
        TraditionalMethod::Vehicle => (VEHICLE_ENERGY_BASE_KWH, VEHICLE_ENERGY_PER_METER_KWH),
        TraditionalMethod::ElectricCart => (ELECTRIC_CART_ENERGY_BASE_KWH, ELECTRIC_CART_ENERGY_PER_METER_KWH),
        TraditionalMethod::Walking => (WALKING_ENERGY_BASE_KWH, WALKING_ENERGY_PER_METER_KWH),
    };
    base + distance_meters * per_meter
}

/// Returns `(drone_energy_kwh, traditional_energy_kwh, energy_saved_kwh)`.
pub fn calculate_energy_savings(
    distance_meters: f64,
    payload_weight_kg: f64,
    traditional_method: TraditionalMethod,
) -> (f64, f64, f64) {
    let drone_energy = calculate_drone_energy(distance_meters, payload_weight_kg);
    let traditional_energy = calculate_traditional_energy(distance_meters, traditional_method);
    (drone_energy, traditional_energy, traditional_energy - drone_energy)
}

pub fn calculate_co2_equivalent(energy_kwh: f64, source: EnergySource) -> f64 {
    energy_kwh * source.emissions_factor_kg_per_kwh()
}

/// CO2 saved comparing a drone trip against a delivery van (UAV energy assumed 22x
/// cleaner than van energy, 0.4/22 ≈ 0.018 kg CO2/kWh vs. 0.8 for fossil-fueled vans).
pub fn calculate_co2_savings_drone_vs_van(drone_energy_kwh: f64, van_energy_kwh: f64) -> f64 {
    let drone_co2 = drone_energy_kwh * 0.018;
    let van_co2 = van_energy_kwh * 0.8;
    (van_co2 - drone_co2).max(0.0)
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TimeComparison {
    pub walking_time_seconds: f64,
    pub drone_time_seconds: f64,
    pub time_saved_seconds: f64,
    pub time_savings_percentage: f64,
    pub speed_ratio: f64,
}

/// Compares drone delivery time against walking time (3 mph) for the same distance.
pub fn calculate_time_comparison(distance_meters: f64, drone_speed_m_per_sec: f64) -> TimeComparison {
    let walking_time_seconds = if WALKING_SPEED_M_PER_SEC > 0.0 {
        distance_meters / WALKING_SPEED_M_PER_SEC
    } else {
        0.0
    };
    let drone_time_seconds = if drone_speed_m_per_sec > 0.0 {
        distance_meters / drone_speed_m_per_sec
    } else {
        0.0
    };
    let time_saved_seconds = walking_time_seconds - drone_time_seconds;
    let time_savings_percentage = if walking_time_seconds > 0.0 {
        time_saved_seconds / walking_time_seconds * 100.0
    } else {
        0.0
    };
    let speed_ratio = if drone_time_seconds > 0.0 {
        walking_time_seconds / drone_time_seconds
    } else {
        0.0
    };

    TimeComparison {
        walking_time_seconds: round2(walking_time_seconds),
        drone_time_seconds: round2(drone_time_seconds),
        time_saved_seconds: round2(time_saved_seconds),
        time_savings_percentage: round2(time_savings_percentage),
        speed_ratio: round2(speed_ratio),
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct EnergyReport {
    pub distance_meters: f64,
    pub distance_km: f64,
    pub drone_energy_kwh: f64,
    pub traditional_energy_kwh: f64,
    pub energy_saved_kwh: f64,
    pub energy_savings_percentage: f64,
    pub co2_saved_kg: Option<f64>,
    pub time_comparison: Option<TimeComparison>,
}

#[allow(clippy::too_many_arguments)]
pub fn format_energy_report(
    drone_energy: f64,
    traditional_energy: f64,
    energy_saved: f64,
    distance_meters: f64,
    co2_saved: Option<f64>,
    drone_speed_m_per_sec: Option<f64>,
) -> EnergyReport {
    let energy_savings_percentage = if traditional_energy > 0.0 {
        energy_saved / traditional_energy * 100.0
    } else {
        0.0
    };

    EnergyReport {
        distance_meters: round2(distance_meters),
        distance_km: round3(distance_meters / 1000.0),
        drone_energy_kwh: round4(drone_energy),
        traditional_energy_kwh: round4(traditional_energy),
        energy_saved_kwh: round4(energy_saved),
        energy_savings_percentage: round2(energy_savings_percentage),
        co2_saved_kg: co2_saved.map(round4),
        time_comparison: match drone_speed_m_per_sec {
            Some(speed) if speed > 0.0 => Some(calculate_time_comparison(distance_meters, speed)),
            _ => None,
        },
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_multiplier_matches_documented_bounds() {
        assert_eq!(payload_multiplier(0.0), 0.9);
        assert!((payload_multiplier(1.0) - 1.0).abs() < 1e-9);
        assert!((payload_multiplier(2.0) - 1.33).abs() < 1e-9);
    }

    #[test]
    fn drone_energy_increases_with_distance_and_payload() {
        let light = calculate_drone_energy(1000.0, 0.0);
        let heavy = calculate_drone_energy(1000.0, 2.0);
        assert!(heavy > light);
    }

    #[test]
    fn energy_savings_are_positive_for_typical_trip() {
        let (drone, traditional, saved) = calculate_energy_savings(500.0, 0.5, TraditionalMethod::Vehicle);
        assert!(drone > 0.0 && traditional > 0.0);
        assert_eq!(saved, traditional - drone);
    }

    #[test]
    fn co2_savings_never_negative() {
        let saved = calculate_co2_savings_drone_vs_van(100.0, 0.001);
        assert!(saved >= 0.0);
    }

    #[test]
    fn traditional_method_parse_defaults_to_vehicle() {
        assert_eq!(TraditionalMethod::parse("unknown"), TraditionalMethod::Vehicle);
        assert_eq!(TraditionalMethod::parse("walking"), TraditionalMethod::Walking);
    }
}
