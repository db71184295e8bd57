//! Runtime configuration, env-var-with-default with documented fallbacks for every field.

use model::LocationId;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub emergency_speed_m_per_sec: f64,
    pub normal_speed_m_per_sec: f64,
    pub low_priority_speed_m_per_sec: f64,
    pub min_battery_reserve_kwh: f64,
    pub charge_rate_kwh_per_sec: f64,
    pub charge_target_fraction: f64,
    pub default_battery_capacity_kwh: f64,
    pub charging_station_locations: Vec<LocationId>,
    /// Slack added to a delivery's computed travel time before its completion timer fires,
    /// to absorb small rounding/propagation delay.
    pub completion_slack_seconds: f64,
    pub charging_arrival_slack_seconds: f64,
    /// An intercepting drone may accept up to this fraction of the two-trip baseline energy.
    pub interception_energy_tolerance: f64,
}

impl DispatcherConfig {
    /// Loads configuration from the environment (via a `.env` file if present), falling back
    /// to the literals below. `charging_station_locations` comes from the floor-plan wiring,
    /// not the environment, since it names specific graph nodes.
    pub fn from_env(charging_station_locations: Vec<LocationId>) -> Self {
        dotenvy::dotenv().ok();

        Self {
            emergency_speed_m_per_sec: env_f64("DISPATCHER_EMERGENCY_SPEED_M_PER_SEC", 4.0),
            normal_speed_m_per_sec: env_f64("DISPATCHER_NORMAL_SPEED_M_PER_SEC", 2.5),
            low_priority_speed_m_per_sec: env_f64("DISPATCHER_LOW_PRIORITY_SPEED_M_PER_SEC", 1.5),
            min_battery_reserve_kwh: env_f64("DISPATCHER_MIN_BATTERY_RESERVE_KWH", 0.0243),
            charge_rate_kwh_per_sec: env_f64("DISPATCHER_CHARGE_RATE_KWH_PER_SEC", 0.01),
            charge_target_fraction: env_f64("DISPATCHER_CHARGE_TARGET_FRACTION", 0.8),
            default_battery_capacity_kwh: env_f64("DISPATCHER_DEFAULT_BATTERY_CAPACITY_KWH", 2.0),
            charging_station_locations,
            completion_slack_seconds: env_f64("DISPATCHER_COMPLETION_SLACK_SECONDS", 5.0),
            charging_arrival_slack_seconds: env_f64("DISPATCHER_CHARGING_ARRIVAL_SLACK_SECONDS", 2.0),
            interception_energy_tolerance: env_f64("DISPATCHER_INTERCEPTION_ENERGY_TOLERANCE", 1.10),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_falls_back_to_documented_defaults() {
        let config = DispatcherConfig::from_env(vec![1, 2]);
        assert_eq!(config.default_battery_capacity_kwh, 2.0);
        assert_eq!(config.charging_station_locations, vec![1, 2]);
        assert!((config.interception_energy_tolerance - 1.10).abs() < 1e-9);
    }
}
