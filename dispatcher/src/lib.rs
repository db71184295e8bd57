//! The dispatch engine: request intake, priority scheduling, drone assignment, in-flight
//! interception, completion accounting, and the charging lifecycle. Grounded on
//! `original_source/service.py`, styled after `multi_drone_control/src/{lib,mission_assignment}.rs`'s
//! struct-owned-state and command-method shape.
//!
//! Unlike `multi_drone_control`'s per-subsystem `Arc<RwLock<T>>` split, every piece of mutable
//! state here lives behind a single `Arc<Mutex<DispatcherState>>`. A dispatch decision reads
//! the drone table, the request table, and the active-flight map together, and splitting them
//! into independent locks would let two decisions interleave and double-book a drone.

mod config;
mod error;

pub use config::DispatcherConfig;
pub use error::DispatchError;

use chrono::{DateTime, Utc};
use model::{Ctas, Drone, DroneId, DroneStatus, LocationId, Request, RequestId, RequestStatus};
use patients::PatientStore;
use planner::Planner;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

/// A drone currently in flight and the request(s) it is carrying. Separate from
/// `model::Drone`'s own `delivery_route`/`current_payload_weight_kg` fields, which mirror
/// this for single-glance drone-status queries; this is the dispatcher's own bookkeeping.
#[derive(Debug, Clone)]
struct ActiveFlight {
    route: Vec<LocationId>,
    payload_weight_kg: f64,
    start_time: DateTime<Utc>,
    request_ids: Vec<RequestId>,
    speed_m_per_sec: f64,
    is_emergency: bool,
    distance_traveled_meters: f64,
    is_return_trip: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Statistics {
    pub completed_count: u64,
    pub pending_count: usize,
    pub total_distance_meters: f64,
    pub total_energy_saved_kwh: f64,
    pub total_co2_saved_kg: f64,
}

/// Everything a caller needs to specify when creating a delivery request. Attributes left
/// `None` are synthesized from the named patient, when one is given (§4.3).
#[derive(Debug, Clone)]
pub struct CreateRequestInput {
    pub requester_id: String,
    pub requester_name: String,
    pub requester_location_id: LocationId,
    pub priority: Ctas,
    pub description: String,
    pub emergency: bool,
    pub patient_id: Option<String>,
    pub payload_items: items::ItemQuantities,
    pub clinical_severity_score: Option<f64>,
    pub expected_life_years_gained: Option<f64>,
    pub quality_of_life_score: Option<f64>,
    pub lifestyle_responsibility: Option<String>,
    pub social_role: Option<String>,
    pub is_parent: Option<bool>,
    pub patient_age: Option<u32>,
}

impl Default for CreateRequestInput {
    fn default() -> Self {
        Self {
            requester_id: String::new(),
            requester_name: String::new(),
            requester_location_id: 0,
            priority: Ctas::CtasIII,
            description: String::new(),
            emergency: false,
            patient_id: None,
            payload_items: items::ItemQuantities::new(),
            clinical_severity_score: None,
            expected_life_years_gained: None,
            quality_of_life_score: None,
            lifestyle_responsibility: None,
            social_role: None,
            is_parent: None,
            patient_age: None,
        }
    }
}

/// A pending timer that must be scheduled once the caller has released the state lock.
#[derive(Debug, Clone)]
enum Timer {
    Completion { request_id: RequestId, delay_seconds: f64 },
    ChargingArrival { drone_id: DroneId, delay_seconds: f64 },
    ChargingComplete { drone_id: DroneId, delay_seconds: f64 },
}

struct DispatcherState {
    graph: graph::Graph,
    config: DispatcherConfig,
    planner: Planner,
    patients: PatientStore,
    drones: HashMap<DroneId, Drone>,
    requests: HashMap<RequestId, Request>,
    active_flights: HashMap<DroneId, ActiveFlight>,
    stats: Statistics,
    next_drone_id: DroneId,
    next_request_id: RequestId,
}

impl DispatcherState {
    fn allocate_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn speed_for(&self, emergency: bool, priority: Ctas) -> f64 {
        if emergency || priority.is_emergency() {
            self.config.emergency_speed_m_per_sec
        } else if priority == Ctas::CtasIII {
            self.config.normal_speed_m_per_sec
        } else {
            self.config.low_priority_speed_m_per_sec
        }
    }

    fn route_distance(&self, route: &[LocationId]) -> f64 {
        route
            .windows(2)
            .filter_map(|w| Some((self.graph.location(w[0])?, self.graph.location(w[1])?)))
            .map(|(a, b)| self.graph.euclidean_distance(a, b))
            .sum()
    }

    /// Cumulative distance along `route` from its start up to (and including) the leg that
    /// first reaches `target`.
    fn route_distance_prefix(&self, route: &[LocationId], target: LocationId) -> f64 {
        let mut distance = 0.0;
        for w in route.windows(2) {
            let (Some(a), Some(b)) = (self.graph.location(w[0]), self.graph.location(w[1])) else {
                continue;
            };
            distance += self.graph.euclidean_distance(a, b);
            if w[1] == target {
                break;
            }
        }
        distance
    }

    /// Per-leg payload profile over `route`: every request in `request_ids` is carried from
    /// the route's start and dropped once the route reaches its own `requester_location_id`,
    /// so a multi-stop (post-interception) flight sheds weight at each delivery instead of
    /// being charged as if it carried the full combined payload the whole way. `completing_id`
    /// uses `completing_payload_weight` in place of its stored weight, so a caller-supplied
    /// override is honored for the request actually being completed.
    fn per_leg_drone_energy(
        &self,
        route: &[LocationId],
        request_ids: &[RequestId],
        completing_id: RequestId,
        completing_payload_weight: f64,
    ) -> f64 {
        if route.len() < 2 {
            return energy::calculate_drone_energy(0.0, completing_payload_weight);
        }
        let weight_of = |rid: RequestId| -> f64 {
            if rid == completing_id {
                completing_payload_weight
            } else {
                self.requests.get(&rid).map(|r| r.payload_weight_kg).unwrap_or(0.0)
            }
        };

        let mut delivered: HashSet<RequestId> = HashSet::new();
        let mut current_payload: f64 = request_ids.iter().map(|&rid| weight_of(rid)).sum();
        let mut leg_energy = 0.0;
        for w in route.windows(2) {
            let (Some(a), Some(b)) = (self.graph.location(w[0]), self.graph.location(w[1])) else {
                continue;
            };
            let leg_distance = self.graph.euclidean_distance(a, b);
            leg_energy += leg_distance * energy::calculate_drone_energy_per_meter(current_payload);

            for &rid in request_ids {
                if delivered.contains(&rid) {
                    continue;
                }
                if self.requests.get(&rid).map(|r| r.requester_location_id) == Some(w[1]) {
                    current_payload = (current_payload - weight_of(rid)).max(0.0);
                    delivered.insert(rid);
                }
            }
        }
        energy::DRONE_ENERGY_BASE_KWH + leg_energy
    }

    /// Inserts `loc` into `route` at whichever position adds the least extra distance.
    fn insert_nearest(&self, route: &mut Vec<LocationId>, loc: LocationId) {
        let Some(target) = self.graph.location(loc) else { return };
        let mut best_idx = route.len();
        let mut best_added = f64::INFINITY;
        for i in 0..route.len().saturating_sub(1) {
            let (Some(a), Some(b)) = (self.graph.location(route[i]), self.graph.location(route[i + 1])) else {
                continue;
            };
            let added = self.graph.euclidean_distance(a, target) + self.graph.euclidean_distance(target, b)
                - self.graph.euclidean_distance(a, b);
            if added < best_added {
                best_added = added;
                best_idx = i + 1;
            }
        }
        route.insert(best_idx, loc);
    }

    fn planner_flights_excluding(&self, exclude: DroneId) -> Vec<planner::ActiveFlight> {
        self.active_flights
            .iter()
            .filter(|(&id, _)| id != exclude)
            .map(|(&id, f)| planner::ActiveFlight {
                drone_id: id,
                route: f.route.clone(),
                speed_m_per_sec: f.speed_m_per_sec,
                is_emergency: f.is_emergency,
            })
            .collect()
    }

    fn add_drone(&mut self, location_id: LocationId, is_emergency: bool) -> Result<DroneId, DispatchError> {
        if self.graph.location(location_id).is_none() {
            return Err(DispatchError::UnknownLocation(location_id));
        }
        let id = self.next_drone_id;
        self.next_drone_id += 1;
        self.drones
            .insert(id, Drone::new(id, location_id, is_emergency, self.config.default_battery_capacity_kwh));
        tracing::info!(drone_id = id, location_id, is_emergency, "drone registered");
        Ok(id)
    }

    fn create_request(&mut self, input: CreateRequestInput) -> Result<(RequestId, Vec<Timer>), DispatchError> {
        items::validate(&input.payload_items).map_err(|_| DispatchError::EmptyPayload)?;

        let patient = match &input.patient_id {
            Some(pid) => Some(
                self.patients
                    .get(pid)
                    .cloned()
                    .ok_or_else(|| DispatchError::UnknownPatient(pid.clone()))?,
            ),
            None => None,
        };

        let patient_age = input.patient_age.or_else(|| patient.as_ref().map(|p| p.age()));
        let clinical_severity_score = input
            .clinical_severity_score
            .or_else(|| patient.as_ref().map(|p| p.risk_score()));
        let is_parent = input
            .is_parent
            .unwrap_or_else(|| patient_age.map_or(false, |age| (20..=60).contains(&age)));
        let expected_life_years_gained = input
            .expected_life_years_gained
            .or_else(|| patient_age.map(life_years_estimate));
        let quality_of_life_score = input
            .quality_of_life_score
            .or_else(|| patient.as_ref().map(|p| quality_of_life(p, patient_age)));
        let social_role = input.social_role.clone().or(Some("general".to_string()));
        let lifestyle_responsibility = input
            .lifestyle_responsibility
            .clone()
            .or_else(|| patient.as_ref().map(|p| lifestyle_label(p.lifestyle_risks.len())));

        let patient_critical = patient
            .as_ref()
            .map_or(false, |p| p.current_status == patients::CurrentStatus::Critical || p.is_critical_vitals());
        let mut emergency = input.emergency;
        if patient_critical && !input.priority.is_emergency() {
            emergency = true;
        }

        let bins = items::split(&input.payload_items, patient_critical);
        let total_deliveries = bins.len() as u32;
        let ids: Vec<RequestId> = (0..bins.len()).map(|_| self.allocate_request_id()).collect();
        let first_id = ids[0];
        let now = Utc::now();
        let facts = patient.as_ref().map(|p| p.to_facts());

        for (i, (id, bin)) in ids.iter().zip(bins).enumerate() {
            let weight = items::total_weight(&bin);
            let mut request = Request {
                id: *id,
                requester_id: input.requester_id.clone(),
                requester_name: input.requester_name.clone(),
                requester_location_id: input.requester_location_id,
                priority: input.priority,
                description: input.description.clone(),
                emergency,
                timestamp: now,
                completed_at: None,
                status: RequestStatus::Pending,
                assigned_drone_id: None,
                patient_id: input.patient_id.clone(),
                payload_items: bin,
                payload_weight_kg: weight,
                parent_request_id: if total_deliveries > 1 { Some(first_id) } else { None },
                is_partial_delivery: total_deliveries > 1,
                delivery_sequence: i as u32 + 1,
                total_deliveries,
                patient_age,
                waiting_time_minutes: 0.0,
                is_parent,
                expected_life_years_gained,
                quality_of_life_score,
                lifestyle_responsibility: lifestyle_responsibility.clone(),
                social_role: social_role.clone(),
                clinical_severity_score,
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
            };
            request.recompute_vital_priority_score(facts);
            tracing::info!(request_id = *id, priority = ?request.priority, emergency, "request created");
            self.requests.insert(*id, request);
        }

        let timers = self.process_pending_requests();
        Ok((first_id, timers))
    }

    fn cancel_request(&mut self, request_id: RequestId) -> Result<(), DispatchError> {
        let request = self
            .requests
            .get_mut(&request_id)
            .ok_or(DispatchError::UnknownRequest(request_id))?;
        if request.status == RequestStatus::Pending {
            // Lazy deletion: the request simply won't be picked up by the next processing pass.
            request.status = RequestStatus::Cancelled;
            tracing::info!(request_id, "request cancelled");
        }
        Ok(())
    }

    /// Recomputes waiting time and vital-priority score for every pending request, then drains
    /// them in priority order: non-emergency requests try interception first, falling back to
    /// a fresh assignment; emergency requests always get a fresh assignment.
    fn process_pending_requests(&mut self) -> Vec<Timer> {
        let now = Utc::now();
        let pending_ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|(_, r)| r.status == RequestStatus::Pending)
            .map(|(&id, _)| id)
            .collect();

        let mut heap: std::collections::BinaryHeap<Request> = std::collections::BinaryHeap::new();
        for id in &pending_ids {
            let facts = {
                let request = self.requests.get(id).unwrap();
                request.patient_id.as_ref().and_then(|pid| self.patients.get(pid)).map(|p| p.to_facts())
            };
            let request = self.requests.get_mut(id).unwrap();
            request.waiting_time_minutes = (now - request.timestamp).num_seconds() as f64 / 60.0;
            request.recompute_vital_priority_score(facts);
            heap.push(request.clone());
        }

        let mut timers = Vec::new();
        while let Some(top) = heap.pop() {
            let Some(current) = self.requests.get(&top.id) else { continue };
            if current.status != RequestStatus::Pending {
                continue;
            }
            let is_emergency = current.emergency || current.priority.is_emergency();

            let mut intercepted = false;
            if !is_emergency {
                if let Some(mut t) = self.try_interception(top.id) {
                    timers.append(&mut t);
                    intercepted = true;
                }
            }
            if !intercepted {
                if let Some(mut t) = self.try_fresh_assignment(top.id) {
                    timers.append(&mut t);
                }
            }
        }
        timers
    }

    /// §4.7: nearest eligible drone (by graph distance), lowest id on ties, planned route,
    /// energy/battery check. Sends the drone to charging instead of assigning it when the
    /// route would leave it below the reserve.
    fn try_fresh_assignment(&mut self, request_id: RequestId) -> Option<Vec<Timer>> {
        let request = self.requests.get(&request_id)?.clone();
        let is_emergency = request.emergency || request.priority.is_emergency();

        let candidate_ids: Vec<DroneId> = self
            .drones
            .values()
            .filter(|d| d.is_available() && d.emergency_drone == is_emergency && d.battery_level_kwh >= self.config.min_battery_reserve_kwh)
            .map(|d| d.id)
            .collect();
        if candidate_ids.is_empty() {
            return None;
        }
        let candidate_locations: Vec<LocationId> = candidate_ids.iter().map(|id| self.drones[id].current_location_id).collect();
        let nearest_loc = self.graph.nearest_of_set(request.requester_location_id, &candidate_locations).ok()??;
        let drone_id = *candidate_ids.iter().filter(|id| self.drones[id].current_location_id == nearest_loc).min()?;

        let other_flights = self.planner_flights_excluding(drone_id);
        let drone_location = self.drones[&drone_id].current_location_id;
        let path = self
            .planner
            .plan_path_with_traffic_rules(&self.graph, drone_location, request.requester_location_id, drone_id, is_emergency, &other_flights)
            .ok()
            .filter(|p| p.len() >= 2)?;

        let distance = self.route_distance(&path);
        let speed = self.speed_for(is_emergency, request.priority);
        let required_energy = energy::calculate_drone_energy(distance, request.payload_weight_kg);

        let drone_battery = self.drones.get(&drone_id)?.battery_level_kwh;
        if drone_battery - required_energy < self.config.min_battery_reserve_kwh {
            tracing::debug!(drone_id, "insufficient battery for assignment, sending to charging instead");
            return Some(self.begin_send_to_charging(drone_id));
        }

        let now = Utc::now();
        let drone = self.drones.get_mut(&drone_id)?;
        drone.status = DroneStatus::Assigned;
        drone.assigned_request_id = Some(request_id);
        drone.delivery_route = path.clone();
        drone.current_payload_weight_kg = request.payload_weight_kg;
        drone.current_speed_m_per_sec = speed;
        drone.flight_start_time = Some(now);
        drone.battery_consumed_this_flight_kwh = 0.0;

        self.active_flights.insert(
            drone_id,
            ActiveFlight {
                route: path,
                payload_weight_kg: request.payload_weight_kg,
                start_time: now,
                request_ids: vec![request_id],
                speed_m_per_sec: speed,
                is_emergency,
                distance_traveled_meters: distance,
                is_return_trip: false,
            },
        );

        let request = self.requests.get_mut(&request_id)?;
        request.status = RequestStatus::Assigned;
        request.assigned_drone_id = Some(drone_id);

        let eta = distance / speed + self.config.completion_slack_seconds;
        tracing::info!(request_id, drone_id, distance, eta, "assigned drone to request");
        Some(vec![Timer::Completion { request_id, delay_seconds: eta }])
    }

    /// §4.6: looks for an in-flight, non-emergency drone that can absorb this request onto
    /// its existing route for less energy than a dedicated trip would cost (within
    /// `interception_energy_tolerance`), and schedules a separate completion timer for it.
    fn try_interception(&mut self, request_id: RequestId) -> Option<Vec<Timer>> {
        let request = self.requests.get(&request_id)?.clone();
        let mut best: Option<(DroneId, f64, Vec<LocationId>, f64)> = None;

        let candidate_drones: Vec<DroneId> = self
            .active_flights
            .iter()
            .filter(|(_, f)| !f.is_return_trip && !f.is_emergency)
            .map(|(&id, _)| id)
            .collect();

        for drone_id in candidate_drones {
            let Some(drone) = self.drones.get(&drone_id) else { continue };
            if drone.emergency_drone || !matches!(drone.status, DroneStatus::Assigned | DroneStatus::InTransit) {
                continue;
            }
            let flight = self.active_flights.get(&drone_id)?.clone();

            let baseline_existing = energy::calculate_drone_energy(flight.distance_traveled_meters, flight.payload_weight_kg);
            let Ok((dedicated_path, dedicated_distance)) = self.graph.shortest_path(drone.current_location_id, request.requester_location_id) else {
                continue;
            };
            if dedicated_path.is_empty() {
                continue;
            }
            let baseline = baseline_existing + energy::calculate_drone_energy(dedicated_distance, request.payload_weight_kg);

            let other_flights = self.planner_flights_excluding(drone_id);
            let destination = *flight.route.last().unwrap_or(&drone.current_location_id);
            let Ok(mut route) = self
                .planner
                .plan_path_with_traffic_rules(&self.graph, drone.current_location_id, destination, drone_id, false, &other_flights)
            else {
                continue;
            };
            if !route.contains(&request.requester_location_id) {
                self.insert_nearest(&mut route, request.requester_location_id);
            }
            let combined_distance = self.route_distance(&route);
            let combined_payload = flight.payload_weight_kg + request.payload_weight_kg;
            let combined_energy = energy::calculate_drone_energy(combined_distance, combined_payload);

            let battery_available = drone.battery_level_kwh - self.config.min_battery_reserve_kwh;
            if combined_energy > battery_available {
                continue;
            }
            if combined_energy > baseline * self.config.interception_energy_tolerance {
                continue;
            }

            let savings = baseline - combined_energy;
            let better = match &best {
                None => true,
                Some((best_drone, best_savings, _, _)) => {
                    savings > best_savings + 1e-9 || ((savings - best_savings).abs() <= 1e-9 && drone_id < *best_drone)
                }
            };
            if better {
                best = Some((drone_id, savings, route, combined_payload));
            }
        }

        let (drone_id, _, route, combined_payload) = best?;
        let is_emergency = request.emergency || request.priority.is_emergency();
        let new_speed = self.speed_for(is_emergency, request.priority);
        let distance_to_stop = self.route_distance_prefix(&route, request.requester_location_id);

        let drone = self.drones.get_mut(&drone_id)?;
        drone.delivery_route = route.clone();
        drone.current_payload_weight_kg = combined_payload;
        drone.current_speed_m_per_sec = new_speed;

        let flight = self.active_flights.get_mut(&drone_id)?;
        flight.route = route;
        flight.payload_weight_kg = combined_payload;
        flight.speed_m_per_sec = new_speed;
        flight.request_ids.push(request_id);

        let request = self.requests.get_mut(&request_id)?;
        request.status = RequestStatus::Assigned;
        request.assigned_drone_id = Some(drone_id);

        let eta = distance_to_stop / new_speed + self.config.completion_slack_seconds;
        tracing::info!(request_id, drone_id, "intercepted request onto in-flight drone");
        Some(vec![Timer::Completion { request_id, delay_seconds: eta }])
    }

    /// §4.5 step 8 / §4.8: every drone heads to charging once its flight ends, either
    /// immediately (already at a station) or via a return trip.
    fn begin_send_to_charging(&mut self, drone_id: DroneId) -> Vec<Timer> {
        let Some(drone) = self.drones.get(&drone_id) else { return Vec::new() };
        if self.config.charging_station_locations.contains(&drone.current_location_id) {
            return self.begin_charging(drone_id);
        }

        let Ok(Some(station)) = self.graph.nearest_of_set(drone.current_location_id, &self.config.charging_station_locations) else {
            tracing::warn!(drone_id, "no reachable charging station; drone left idle");
            return Vec::new();
        };
        let Ok((path, distance)) = self.graph.shortest_path(drone.current_location_id, station) else {
            return Vec::new();
        };
        if path.is_empty() {
            return Vec::new();
        }

        let speed = self.config.normal_speed_m_per_sec;
        let now = Utc::now();

        let drone = self.drones.get_mut(&drone_id).unwrap();
        drone.status = DroneStatus::ReturningToCharging;
        drone.delivery_route = path.clone();
        drone.current_payload_weight_kg = 0.0;
        drone.current_speed_m_per_sec = speed;
        drone.flight_start_time = Some(now);

        self.active_flights.insert(
            drone_id,
            ActiveFlight {
                route: path,
                payload_weight_kg: 0.0,
                start_time: now,
                request_ids: Vec::new(),
                speed_m_per_sec: speed,
                is_emergency: false,
                distance_traveled_meters: distance,
                is_return_trip: true,
            },
        );

        let eta = distance / speed + self.config.charging_arrival_slack_seconds;
        tracing::info!(drone_id, station, eta, "drone returning to charging station");
        vec![Timer::ChargingArrival { drone_id, delay_seconds: eta }]
    }

    fn arrive_at_charging_station(&mut self, drone_id: DroneId) -> Vec<Timer> {
        let Some(flight) = self.active_flights.remove(&drone_id) else { return Vec::new() };
        let Some(drone) = self.drones.get_mut(&drone_id) else { return Vec::new() };
        let consumed = energy::calculate_drone_energy(flight.distance_traveled_meters, 0.0);
        drone.battery_level_kwh = (drone.battery_level_kwh - consumed).max(0.0);
        if let Some(&last) = flight.route.last() {
            drone.current_location_id = last;
        }
        drone.delivery_route.clear();
        drone.flight_start_time = None;
        self.begin_charging(drone_id)
    }

    fn begin_charging(&mut self, drone_id: DroneId) -> Vec<Timer> {
        let Some(drone) = self.drones.get_mut(&drone_id) else { return Vec::new() };
        drone.status = DroneStatus::Charging;
        drone.is_charging = true;
        drone.current_speed_m_per_sec = 0.0;
        let target = drone.battery_capacity_kwh * self.config.charge_target_fraction;
        let energy_needed = (target - drone.battery_level_kwh).max(0.0);
        let delay = if energy_needed <= 0.0 { 0.0 } else { energy_needed / self.config.charge_rate_kwh_per_sec };
        tracing::info!(drone_id, delay, "drone charging");
        vec![Timer::ChargingComplete { drone_id, delay_seconds: delay }]
    }

    fn complete_charging(&mut self, drone_id: DroneId) -> Vec<Timer> {
        let Some(drone) = self.drones.get_mut(&drone_id) else { return Vec::new() };
        drone.battery_level_kwh = drone.battery_capacity_kwh * self.config.charge_target_fraction;
        drone.is_charging = false;
        drone.status = DroneStatus::Available;
        tracing::info!(drone_id, "drone finished charging, available again");
        self.process_pending_requests()
    }

    /// §4.5 completion: accounts for distance/energy/CO2/path-efficiency against `method`,
    /// depletes the drone's battery, and frees the drone to charging once every request on
    /// its flight has completed (a shared flight from an interception keeps going until its
    /// last request finishes).
    fn complete_request(
        &mut self,
        request_id: RequestId,
        final_location_id: LocationId,
        method: energy::TraditionalMethod,
        payload_weight_override: Option<f64>,
    ) -> Result<Vec<Timer>, DispatchError> {
        let status = self.requests.get(&request_id).ok_or(DispatchError::UnknownRequest(request_id))?.status;
        if status != RequestStatus::Assigned {
            tracing::debug!(request_id, ?status, "completion skipped: request not assigned");
            return Ok(Vec::new());
        }
        let drone_id = self.requests[&request_id]
            .assigned_drone_id
            .ok_or(DispatchError::UnknownDrone(0))?;
        let payload_weight = payload_weight_override.unwrap_or(self.requests[&request_id].payload_weight_kg);
        let requester_location_id = self.requests[&request_id].requester_location_id;

        let (route, flight_present) = match self.active_flights.get(&drone_id) {
            Some(f) => (f.route.clone(), true),
            None => (vec![requester_location_id], false),
        };
        let mut distance = self.route_distance(&route);
        let mut full_route = route.clone();
        if route.last() != Some(&final_location_id) {
            if let (Some(last), Some(dest)) = (route.last().and_then(|&id| self.graph.location(id)), self.graph.location(final_location_id)) {
                distance += self.graph.euclidean_distance(last, dest);
            }
            full_route.push(final_location_id);
        }

        // §4.5 step 3: per-leg payload profile rather than a flat single-weight calculation,
        // so a shared (post-interception) flight is charged only for what it's actually
        // carrying on each leg, not the combined payload for the whole route.
        let request_ids_for_energy: Vec<RequestId> = if flight_present {
            self.active_flights.get(&drone_id).map(|f| f.request_ids.clone()).unwrap_or_else(|| vec![request_id])
        } else {
            vec![request_id]
        };
        let drone_energy = self.per_leg_drone_energy(&full_route, &request_ids_for_energy, request_id, payload_weight);
        let traditional_energy = energy::calculate_traditional_energy(distance, method);
        let energy_saved = traditional_energy - drone_energy;
        let co2_saved = energy::calculate_co2_savings_drone_vs_van(drone_energy, traditional_energy);

        let (_, shortest_distance) = self.graph.shortest_path(requester_location_id, final_location_id)?;
        let path_efficiency_ratio = if shortest_distance.is_finite() && shortest_distance > 0.0 {
            distance / shortest_distance
        } else {
            1.0
        };
        let path_efficiency_percentage = if shortest_distance.is_finite() && shortest_distance > 0.0 {
            (distance - shortest_distance) / shortest_distance * 100.0
        } else {
            0.0
        };
        let speed = self.active_flights.get(&drone_id).map(|f| f.speed_m_per_sec).unwrap_or(self.config.normal_speed_m_per_sec);
        let time_saved = if speed > 0.0 && shortest_distance.is_finite() {
            (distance - shortest_distance) / speed
        } else {
            0.0
        };

        let now = Utc::now();
        let request = self.requests.get_mut(&request_id).unwrap();
        request.status = RequestStatus::Completed;
        request.completed_at = Some(now);
        request.distance_traveled_meters = Some(distance);
        request.drone_energy_kwh = Some(drone_energy);
        request.traditional_energy_kwh = Some(traditional_energy);
        request.energy_saved_kwh = Some(energy_saved);
        request.co2_saved_kg = Some(co2_saved);
        request.traditional_method = Some(method.as_str().to_string());
        request.chosen_path_distance_meters = Some(distance);
        request.alternative_path_distance_meters = Some(shortest_distance);
        request.path_efficiency_percentage = Some(path_efficiency_percentage);
        request.path_efficiency_ratio = Some(path_efficiency_ratio);
        request.time_saved_vs_alternative_seconds = Some(time_saved);

        self.stats.completed_count += 1;
        self.stats.total_distance_meters += distance;
        self.stats.total_energy_saved_kwh += energy_saved.max(0.0);
        self.stats.total_co2_saved_kg += co2_saved;
        tracing::info!(request_id, drone_id, distance, energy_saved, "request completed");

        let mut timers = Vec::new();
        if flight_present {
            let flight_done = {
                let flight = self.active_flights.get_mut(&drone_id).unwrap();
                flight.request_ids.retain(|&id| id != request_id);
                flight.request_ids.is_empty()
            };
            if flight_done {
                self.active_flights.remove(&drone_id);
                if let Some(drone) = self.drones.get_mut(&drone_id) {
                    drone.battery_level_kwh = (drone.battery_level_kwh - drone_energy).max(0.0);
                    drone.current_location_id = final_location_id;
                    drone.status = DroneStatus::Available;
                    drone.assigned_request_id = None;
                    drone.delivery_route.clear();
                    drone.current_payload_weight_kg = 0.0;
                    drone.current_speed_m_per_sec = 0.0;
                    drone.flight_start_time = None;
                }
                timers.extend(self.begin_send_to_charging(drone_id));
            }
        }
        timers.extend(self.process_pending_requests());
        Ok(timers)
    }

    fn energy_report(&self, request_id: RequestId) -> Option<energy::EnergyReport> {
        let request = self.requests.get(&request_id)?;
        Some(energy::format_energy_report(
            request.drone_energy_kwh?,
            request.traditional_energy_kwh?,
            request.energy_saved_kwh?,
            request.distance_traveled_meters.unwrap_or(0.0),
            request.co2_saved_kg,
            None,
        ))
    }
}

fn life_years_estimate(age: u32) -> f64 {
    let age = age as f64;
    if age < 25.0 {
        (65.0 - age).max(0.0)
    } else if age < 65.0 {
        (80.0 - age).max(0.0)
    } else {
        (90.0 - age).max(0.0)
    }
}

fn quality_of_life(patient: &patients::Patient, age: Option<u32>) -> f64 {
    let base = match patient.current_status {
        patients::CurrentStatus::Improving => 0.8,
        patients::CurrentStatus::Stable => 0.6,
        patients::CurrentStatus::Monitoring => 0.5,
        patients::CurrentStatus::Deteriorating => 0.3,
        patients::CurrentStatus::Critical => 0.1,
    };
    let age_factor = age.map(|a| (1.0 - a as f64 / 100.0).max(0.5)).unwrap_or(1.0);
    base * age_factor
}

fn lifestyle_label(count: usize) -> String {
    match count {
        0 => "responsible",
        1 => "moderate",
        _ => "irresponsible",
    }
    .to_string()
}

/// The public handle to the dispatch engine. Cloning shares the same underlying state
/// (an `Arc<Mutex<_>>`), so it can be handed to multiple timer tasks and callers alike.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<DispatcherState>>,
}

impl Dispatcher {
    pub fn new(graph: graph::Graph, config: DispatcherConfig, patients: PatientStore) -> Self {
        let state = DispatcherState {
            graph,
            config,
            planner: Planner::new(planner::PlannerConfig::default()),
            patients,
            drones: HashMap::new(),
            requests: HashMap::new(),
            active_flights: HashMap::new(),
            stats: Statistics::default(),
            next_drone_id: 1,
            next_request_id: 1,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub async fn add_drone(&self, location_id: LocationId, is_emergency: bool) -> Result<DroneId, DispatchError> {
        self.state.lock().await.add_drone(location_id, is_emergency)
    }

    pub async fn create_request(&self, input: CreateRequestInput) -> Result<RequestId, DispatchError> {
        let (request_id, timers) = {
            let mut state = self.state.lock().await;
            state.create_request(input)?
        };
        self.schedule_timers(timers);
        Ok(request_id)
    }

    pub async fn complete_request(
        &self,
        request_id: RequestId,
        final_location_id: LocationId,
        method: energy::TraditionalMethod,
        payload_weight_kg: Option<f64>,
    ) -> Result<(), DispatchError> {
        let timers = {
            let mut state = self.state.lock().await;
            state.complete_request(request_id, final_location_id, method, payload_weight_kg)?
        };
        self.schedule_timers(timers);
        Ok(())
    }

    pub async fn cancel_request(&self, request_id: RequestId) -> Result<(), DispatchError> {
        self.state.lock().await.cancel_request(request_id)
    }

    pub async fn get_request_status(&self, request_id: RequestId) -> Option<Request> {
        self.state.lock().await.requests.get(&request_id).cloned()
    }

    pub async fn get_drone_status(&self, drone_id: DroneId) -> Option<Drone> {
        self.state.lock().await.drones.get(&drone_id).cloned()
    }

    pub async fn get_all_pending_requests(&self) -> Vec<Request> {
        let state = self.state.lock().await;
        let mut pending: Vec<Request> = state.requests.values().filter(|r| r.status == RequestStatus::Pending).cloned().collect();
        pending.sort_by(|a, b| b.cmp(a));
        pending
    }

    pub async fn get_statistics(&self) -> Statistics {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.pending_count = state.requests.values().filter(|r| r.status == RequestStatus::Pending).count();
        stats
    }

    pub async fn get_energy_report(&self, request_id: RequestId) -> Option<energy::EnergyReport> {
        self.state.lock().await.energy_report(request_id)
    }

    fn schedule_timers(&self, timers: Vec<Timer>) {
        for timer in timers {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.run_timer(timer).await });
        }
    }

    async fn run_timer(&self, timer: Timer) {
        match timer {
            Timer::Completion { request_id, delay_seconds } => {
                tokio::time::sleep(StdDuration::from_secs_f64(delay_seconds.max(0.0))).await;
                self.auto_complete_request(request_id).await;
            }
            Timer::ChargingArrival { drone_id, delay_seconds } => {
                tokio::time::sleep(StdDuration::from_secs_f64(delay_seconds.max(0.0))).await;
                let timers = self.state.lock().await.arrive_at_charging_station(drone_id);
                self.schedule_timers(timers);
            }
            Timer::ChargingComplete { drone_id, delay_seconds } => {
                tokio::time::sleep(StdDuration::from_secs_f64(delay_seconds.max(0.0))).await;
                let timers = self.state.lock().await.complete_charging(drone_id);
                self.schedule_timers(timers);
            }
        }
    }

    /// Fires when a completion timer elapses. Re-checks the request is still `Assigned`
    /// (it may already have been completed manually) before closing it out against the
    /// default baseline (vehicle, at the request's own delivery location).
    async fn auto_complete_request(&self, request_id: RequestId) {
        let mut state = self.state.lock().await;
        let still_assigned = matches!(state.requests.get(&request_id), Some(r) if r.status == RequestStatus::Assigned);
        if !still_assigned {
            return;
        }
        let (final_location_id, payload_weight) = {
            let request = &state.requests[&request_id];
            (request.requester_location_id, request.payload_weight_kg)
        };
        match state.complete_request(request_id, final_location_id, energy::TraditionalMethod::Vehicle, Some(payload_weight)) {
            Ok(timers) => {
                drop(state);
                self.schedule_timers(timers);
            }
            Err(err) => tracing::warn!(request_id, %err, "auto-complete failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use items::ItemQuantities;

    fn floor_plan() -> graph::Graph {
        let mut g = graph::Graph::new();
        g.add_location(model::Location::new(1, 0.0, 0.0, 0));
        g.add_location(model::Location::new(2, 10.0, 0.0, 0));
        g.add_location(model::Location::new(3, 20.0, 0.0, 0));
        g.add_location(model::Location::new(4, 30.0, 0.0, 0));
        g.add_edge(1, 2, 10.0, true);
        g.add_edge(2, 3, 10.0, true);
        g.add_edge(3, 4, 10.0, true);
        g
    }

    fn dispatcher() -> Dispatcher {
        let config = DispatcherConfig::from_env(vec![1]);
        Dispatcher::new(floor_plan(), config, PatientStore::seeded())
    }

    fn payload(item_id: &str, qty: u32) -> ItemQuantities {
        let mut q = ItemQuantities::new();
        q.insert(item_id.to_string(), qty);
        q
    }

    #[tokio::test]
    async fn emergency_request_gets_assigned_to_an_emergency_drone() {
        let dispatcher = dispatcher();
        let emergency_drone = dispatcher.add_drone(1, true).await.unwrap();
        dispatcher.add_drone(1, false).await.unwrap();

        let request_id = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-a".into(),
                requester_name: "Ward A".into(),
                requester_location_id: 4,
                priority: Ctas::CtasI,
                description: "epinephrine".into(),
                emergency: true,
                payload_items: payload("med_epinephrine", 1),
                ..Default::default()
            })
            .await
            .unwrap();

        let request = dispatcher.get_request_status(request_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Assigned);
        assert_eq!(request.assigned_drone_id, Some(emergency_drone));
    }

    #[tokio::test]
    async fn payload_over_capacity_splits_into_multiple_requests_sharing_a_parent() {
        let dispatcher = dispatcher();
        dispatcher.add_drone(1, false).await.unwrap();

        let mut items_payload = ItemQuantities::new();
        items_payload.insert("food_meal".to_string(), 5);
        items_payload.insert("med_insulin".to_string(), 4);

        let first_id = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "kitchen".into(),
                requester_name: "Kitchen".into(),
                requester_location_id: 2,
                priority: Ctas::CtasIV,
                description: "meals and insulin".into(),
                payload_items: items_payload,
                ..Default::default()
            })
            .await
            .unwrap();

        let first = dispatcher.get_request_status(first_id).await.unwrap();
        assert_eq!(first.total_deliveries, 2);
        assert_eq!(first.parent_request_id, Some(first_id));

        let second = dispatcher.get_request_status(first_id + 1).await.unwrap();
        assert_eq!(second.parent_request_id, Some(first_id));
        assert_eq!(second.delivery_sequence, 2);
    }

    #[tokio::test]
    async fn unknown_patient_id_is_rejected() {
        let dispatcher = dispatcher();
        dispatcher.add_drone(1, false).await.unwrap();
        let result = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-b".into(),
                requester_name: "Ward B".into(),
                requester_location_id: 2,
                priority: Ctas::CtasIII,
                description: "meds".into(),
                patient_id: Some("P999".into()),
                payload_items: payload("med_insulin", 1),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(DispatchError::UnknownPatient(_))));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-c".into(),
                requester_name: "Ward C".into(),
                requester_location_id: 2,
                priority: Ctas::CtasIII,
                description: "nothing".into(),
                payload_items: ItemQuantities::new(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(DispatchError::EmptyPayload)));
    }

    #[tokio::test]
    async fn no_eligible_drone_leaves_request_pending() {
        let dispatcher = dispatcher();
        // No drones registered at all.
        let request_id = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-d".into(),
                requester_name: "Ward D".into(),
                requester_location_id: 2,
                priority: Ctas::CtasIII,
                description: "meds".into(),
                payload_items: payload("med_insulin", 1),
                ..Default::default()
            })
            .await
            .unwrap();
        let request = dispatcher.get_request_status(request_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn completing_a_request_updates_statistics_and_frees_the_drone() {
        let dispatcher = dispatcher();
        dispatcher.add_drone(1, false).await.unwrap();

        let request_id = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-e".into(),
                requester_name: "Ward E".into(),
                requester_location_id: 3,
                priority: Ctas::CtasIII,
                description: "meds".into(),
                payload_items: payload("med_insulin", 1),
                ..Default::default()
            })
            .await
            .unwrap();

        let assigned = dispatcher.get_request_status(request_id).await.unwrap();
        let drone_id = assigned.assigned_drone_id.expect("should have been assigned to the only drone");

        dispatcher
            .complete_request(request_id, 3, energy::TraditionalMethod::Vehicle, None)
            .await
            .unwrap();

        let completed = dispatcher.get_request_status(request_id).await.unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
        assert!(completed.energy_saved_kwh.unwrap() != 0.0 || completed.drone_energy_kwh.unwrap() > 0.0);

        let stats = dispatcher.get_statistics().await;
        assert_eq!(stats.completed_count, 1);

        let drone = dispatcher.get_drone_status(drone_id).await.unwrap();
        assert_ne!(drone.status, DroneStatus::Assigned);
    }

    #[tokio::test]
    async fn cancelling_a_pending_request_marks_it_cancelled() {
        let dispatcher = dispatcher();
        let request_id = dispatcher
            .create_request(CreateRequestInput {
                requester_id: "ward-f".into(),
                requester_name: "Ward F".into(),
                requester_location_id: 2,
                priority: Ctas::CtasIII,
                description: "meds".into(),
                payload_items: payload("med_insulin", 1),
                ..Default::default()
            })
            .await
            .unwrap();
        dispatcher.cancel_request(request_id).await.unwrap();
        let request = dispatcher.get_request_status(request_id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);
    }
}
