//! RRT*-style sampling path planner with traffic rules for in-flight collision avoidance.
//! Grounded on `original_source/rrt_pathfinding.py`. Falls back to the graph's own shortest
//! path whenever the sampling search fails to reach the goal within its iteration budget.

use graph::Graph;
use model::{DroneId, LocationId};
use rand::Rng;

type Point = [f64; 3];

fn distance(a: Point, b: Point) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Where another drone is expected to be at a given moment, for collision checking.
#[derive(Debug, Clone, Copy)]
pub struct DronePosition {
    pub drone_id: DroneId,
    pub location_id: LocationId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: f64,
    pub is_emergency: bool,
    pub speed: f64,
}

impl DronePosition {
    fn point(self) -> Point {
        [self.x, self.y, self.z]
    }
}

/// A drone currently in flight, used to derive predicted trajectories for other traffic.
#[derive(Debug, Clone)]
pub struct ActiveFlight {
    pub drone_id: DroneId,
    pub route: Vec<LocationId>,
    pub speed_m_per_sec: f64,
    pub is_emergency: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    pub obstacle_radius_m: f64,
    pub search_bounds_x: (f64, f64),
    pub search_bounds_y: (f64, f64),
    pub step_size_m: f64,
    pub goal_radius_m: f64,
    pub emergency_max_iterations: u32,
    pub normal_max_iterations: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            obstacle_radius_m: 1.5,
            search_bounds_x: (-5.0, 35.0),
            search_bounds_y: (-5.0, 15.0),
            step_size_m: 2.0,
            goal_radius_m: 3.0,
            emergency_max_iterations: 300,
            normal_max_iterations: 500,
        }
    }
}

struct TreeNode {
    point: Point,
    location_id: LocationId,
    parent: Option<usize>,
    cost: f64,
}

pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Builds predicted trajectories for every other in-flight drone from its assigned route,
    /// estimating arrival time at each waypoint from leg distance and that drone's speed.
    fn estimate_other_drone_positions(
        &self,
        graph: &Graph,
        current_drone_id: DroneId,
        active_flights: &[ActiveFlight],
    ) -> Vec<(DroneId, Vec<DronePosition>)> {
        let mut result = Vec::new();
        for flight in active_flights {
            if flight.drone_id == current_drone_id || flight.route.is_empty() {
                continue;
            }
            let mut positions = Vec::new();
            let mut current_time = 0.0_f64;
            for (i, &loc_id) in flight.route.iter().enumerate() {
                let Some(loc) = graph.location(loc_id) else { continue };
                if i > 0 {
                    if let Some(prev_loc) = graph.location(flight.route[i - 1]) {
                        let leg_distance = graph.euclidean_distance(prev_loc, loc);
                        current_time += leg_distance / flight.speed_m_per_sec;
                    }
                }
                positions.push(DronePosition {
                    drone_id: flight.drone_id,
                    location_id: loc_id,
                    x: loc.x,
                    y: loc.y,
                    z: 0.0,
                    timestamp: current_time,
                    is_emergency: flight.is_emergency,
                    speed: flight.speed_m_per_sec,
                });
            }
            if !positions.is_empty() {
                result.push((flight.drone_id, positions));
            }
        }
        result
    }

    /// Emergency drones get a 3x safety radius and right-of-way; normal drones yield to them
    /// within a time-to-collision window of 5 seconds.
    fn is_collision_free(
        &self,
        point: Point,
        other_drones: &[(DroneId, Vec<DronePosition>)],
        current_drone_id: DroneId,
        is_emergency: bool,
        timestamp: f64,
        current_speed: f64,
    ) -> bool {
        for (drone_id, trajectory) in other_drones {
            if *drone_id == current_drone_id {
                continue;
            }
            for (i, other_pos) in trajectory.iter().enumerate() {
                let time_delta = (timestamp - other_pos.timestamp).abs();
                let mut predicted = other_pos.point();
                if let Some(next_pos) = trajectory.get(i + 1) {
                    let span = (next_pos.timestamp - other_pos.timestamp).abs().max(0.1);
                    let progress = (time_delta / span).min(1.0);
                    let next = next_pos.point();
                    predicted = [
                        other_pos.x + (next[0] - other_pos.x) * progress,
                        other_pos.y + (next[1] - other_pos.y) * progress,
                        other_pos.z + (next[2] - other_pos.z) * progress,
                    ];
                }

                if other_pos.is_emergency && !is_emergency {
                    let dist = distance(point, predicted);
                    let emergency_safety_radius = self.config.obstacle_radius_m * 3.0;
                    if dist < emergency_safety_radius {
                        return false;
                    }
                    if other_pos.speed > current_speed && dist < emergency_safety_radius * 1.5 {
                        return false;
                    }
                    let relative_speed = (other_pos.speed - current_speed).abs();
                    if relative_speed > 0.0 {
                        let time_to_collision = dist / relative_speed;
                        if time_to_collision > 0.0 && time_to_collision < 5.0 {
                            return false;
                        }
                    }
                }

                let dist = distance(point, predicted);
                if dist < self.config.obstacle_radius_m {
                    return false;
                }
                if other_pos.is_emergency && !is_emergency && dist < self.config.obstacle_radius_m * 2.5 {
                    return false;
                }
            }
        }
        true
    }

    fn steer(from: Point, to: Point, step_size: f64) -> Point {
        let d = distance(from, to);
        if d <= step_size {
            return to;
        }
        let ratio = step_size / d;
        [
            from[0] + (to[0] - from[0]) * ratio,
            from[1] + (to[1] - from[1]) * ratio,
            from[2] + (to[2] - from[2]) * ratio,
        ]
    }

    fn nearest_node(tree: &[TreeNode], point: Point) -> usize {
        tree.iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                distance(a.point, point)
                    .partial_cmp(&distance(b.point, point))
                    .unwrap()
            })
            .map(|(idx, _)| idx)
            .expect("tree always has at least the start node")
    }

    fn near_nodes(tree: &[TreeNode], point: Point, radius: f64) -> Vec<usize> {
        tree.iter()
            .enumerate()
            .filter(|(_, node)| distance(node.point, point) <= radius)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// RRT* search for a collision-free path. Falls back to the graph's shortest path if the
    /// goal isn't reached within `max_iterations`.
    fn plan_path_with_avoidance(
        &self,
        graph: &Graph,
        start: LocationId,
        goal: LocationId,
        current_drone_id: DroneId,
        is_emergency: bool,
        other_drones: &[(DroneId, Vec<DronePosition>)],
        max_iterations: u32,
    ) -> Result<Vec<LocationId>, graph::GraphError> {
        let Some(start_loc) = graph.location(start) else {
            return graph.shortest_path(start, goal).map(|(p, _)| p);
        };
        let Some(goal_loc) = graph.location(goal) else {
            return graph.shortest_path(start, goal).map(|(p, _)| p);
        };

        let start_point: Point = [start_loc.x, start_loc.y, 0.0];
        let goal_point: Point = [goal_loc.x, goal_loc.y, 0.0];

        let mut tree = vec![TreeNode { point: start_point, location_id: start, parent: None, cost: 0.0 }];
        let mut rng = rand::thread_rng();
        let mut goal_node: Option<usize> = None;

        let default_speed = other_drones
            .iter()
            .find(|(_, traj)| traj.len() > 1)
            .and_then(|(_, traj)| traj.first())
            .map(|pos| pos.speed)
            .unwrap_or(2.5);

        for i in 0..max_iterations {
            let rand_point = if rng.gen::<f64>() < 0.1 {
                goal_point
            } else {
                [
                    rng.gen_range(self.config.search_bounds_x.0..=self.config.search_bounds_x.1),
                    rng.gen_range(self.config.search_bounds_y.0..=self.config.search_bounds_y.1),
                    rng.gen_range(0.0..=5.0),
                ]
            };

            let nearest_idx = Self::nearest_node(&tree, rand_point);
            let nearest_point = tree[nearest_idx].point;
            let new_point = Self::steer(nearest_point, rand_point, self.config.step_size_m);

            let timestamp = i as f64 * 0.1;
            if !self.is_collision_free(new_point, other_drones, current_drone_id, is_emergency, timestamp, default_speed) {
                continue;
            }

            let near_indices = Self::near_nodes(&tree, new_point, self.config.step_size_m * 2.0);
            let mut best_parent = nearest_idx;
            let mut min_cost = tree[nearest_idx].cost + distance(nearest_point, new_point);
            for &near_idx in &near_indices {
                if self.is_collision_free(new_point, other_drones, current_drone_id, is_emergency, timestamp, default_speed) {
                    let candidate_cost = tree[near_idx].cost + distance(tree[near_idx].point, new_point);
                    if candidate_cost < min_cost {
                        min_cost = candidate_cost;
                        best_parent = near_idx;
                    }
                }
            }

            let new_idx = tree.len();
            tree.push(TreeNode {
                point: new_point,
                location_id: tree[nearest_idx].location_id,
                parent: Some(best_parent),
                cost: min_cost,
            });

            for &near_idx in &near_indices {
                if near_idx == best_parent {
                    continue;
                }
                let new_cost = min_cost + distance(tree[near_idx].point, new_point);
                if new_cost < tree[near_idx].cost
                    && self.is_collision_free(tree[near_idx].point, other_drones, current_drone_id, is_emergency, timestamp, default_speed)
                {
                    tree[near_idx].parent = Some(new_idx);
                    tree[near_idx].cost = new_cost;
                }
            }

            if distance(new_point, goal_point) <= self.config.goal_radius_m {
                goal_node = Some(new_idx);
                break;
            }
        }

        let Some(mut current) = goal_node else {
            return graph.shortest_path(start, goal).map(|(p, _)| p);
        };

        let mut path_points = Vec::new();
        loop {
            path_points.push(tree[current].point);
            match tree[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path_points.reverse();

        let mut path_locations = vec![start];
        for point in path_points.into_iter().skip(1) {
            if let Some(closest) = graph
                .locations()
                .min_by(|a, b| {
                    distance([a.x, a.y, 0.0], point)
                        .partial_cmp(&distance([b.x, b.y, 0.0], point))
                        .unwrap()
                })
                .map(|loc| loc.id)
            {
                if Some(&closest) != path_locations.last() {
                    path_locations.push(closest);
                }
            }
        }
        if path_locations.last() != Some(&goal) {
            path_locations.push(goal);
        }

        Ok(path_locations)
    }

    /// High-level entry point: plans a collision-aware route between two locations, taking
    /// every other in-flight drone's projected trajectory into account. Emergency drones get
    /// a tighter iteration budget (300 vs. 500) since their planning must complete faster.
    pub fn plan_path_with_traffic_rules(
        &self,
        graph: &Graph,
        start: LocationId,
        goal: LocationId,
        current_drone_id: DroneId,
        is_emergency: bool,
        active_flights: &[ActiveFlight],
    ) -> Result<Vec<LocationId>, graph::GraphError> {
        let other_drones = self.estimate_other_drone_positions(graph, current_drone_id, active_flights);
        let max_iterations = if is_emergency {
            self.config.emergency_max_iterations
        } else {
            self.config.normal_max_iterations
        };

        let path = self.plan_path_with_avoidance(
            graph,
            start,
            goal,
            current_drone_id,
            is_emergency,
            &other_drones,
            max_iterations,
        )?;

        if path.len() < 2 {
            return graph.shortest_path(start, goal).map(|(p, _)| p);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Location;

    fn small_graph() -> Graph {
        let mut g = Graph::new();
        g.add_location(Location::new(1, 0.0, 0.0, 0));
        g.add_location(Location::new(2, 5.0, 0.0, 0));
        g.add_location(Location::new(3, 10.0, 0.0, 0));
        g.add_edge(1, 2, 5.0, true);
        g.add_edge(2, 3, 5.0, true);
        g
    }

    #[test]
    fn plans_a_path_between_connected_locations() {
        let graph = small_graph();
        let planner = Planner::new(PlannerConfig::default());
        let path = planner
            .plan_path_with_traffic_rules(&graph, 1, 3, 99, false, &[])
            .unwrap();
        assert_eq!(path.first(), Some(&1));
        assert_eq!(path.last(), Some(&3));
    }

    #[test]
    fn emergency_planning_uses_a_smaller_iteration_budget() {
        let graph = small_graph();
        let planner = Planner::new(PlannerConfig::default());
        assert_eq!(planner.config.emergency_max_iterations, 300);
        assert_eq!(planner.config.normal_max_iterations, 500);
        let path = planner
            .plan_path_with_traffic_rules(&graph, 1, 3, 99, true, &[])
            .unwrap();
        assert!(path.len() >= 2);
    }

    #[test]
    fn unknown_start_propagates_as_graph_error() {
        let graph = small_graph();
        let planner = Planner::new(PlannerConfig::default());
        let result = planner.plan_path_with_traffic_rules(&graph, 42, 3, 1, false, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn yields_to_an_emergency_drone_blocking_the_direct_path() {
        let graph = small_graph();
        let planner = Planner::new(PlannerConfig::default());
        let blocking_flight = ActiveFlight {
            drone_id: 2,
            route: vec![1, 2, 3],
            speed_m_per_sec: 4.0,
            is_emergency: true,
        };
        // Should still produce a valid path (possibly via fallback) rather than panicking.
        let path = planner
            .plan_path_with_traffic_rules(&graph, 1, 3, 1, false, &[blocking_flight])
            .unwrap();
        assert!(!path.is_empty());
    }
}
