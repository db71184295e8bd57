use anyhow::Result;
use dispatcher::{CreateRequestInput, Dispatcher, DispatcherConfig};
use graph::Graph;
use model::{Ctas, Location};
use patients::PatientStore;
use shared::init_logging;
use tracing::info;

/// Builds the example floor plan: 8 rooms in a 2x4 grid plus a charging station at the
/// midpoint of every pathway between adjacent rooms.
fn build_floor_plan() -> (Graph, Vec<model::LocationId>) {
    let mut graph = Graph::new();

    let rooms = [
        Location::new(1, 0.0, 0.0, 1),   // Emergency Room
        Location::new(2, 10.0, 0.0, 1),  // ICU
        Location::new(3, 20.0, 0.0, 1),  // Pharmacy
        Location::new(4, 30.0, 0.0, 1),  // Lab
        Location::new(5, 0.0, 10.0, 1),  // Cafeteria
        Location::new(6, 10.0, 10.0, 1), // Ward A
        Location::new(7, 20.0, 10.0, 1), // Ward B
        Location::new(8, 30.0, 10.0, 1), // Surgery
    ];
    let charging_stations = [
        Location::new(9, 5.0, 0.0, 1),   // ER <-> ICU
        Location::new(10, 15.0, 0.0, 1), // ICU <-> Pharmacy
        Location::new(11, 25.0, 0.0, 1), // Pharmacy <-> Lab
        Location::new(12, 0.0, 5.0, 1),  // ER <-> Cafeteria
        Location::new(13, 10.0, 5.0, 1), // ICU <-> Ward A
        Location::new(14, 20.0, 5.0, 1), // Pharmacy <-> Ward B
        Location::new(15, 30.0, 5.0, 1), // Lab <-> Surgery
        Location::new(16, 5.0, 10.0, 1), // Cafeteria <-> Ward A
        Location::new(17, 15.0, 10.0, 1),// Ward A <-> Ward B
        Location::new(18, 25.0, 10.0, 1),// Ward B <-> Surgery
    ];

    for room in rooms {
        graph.add_location(room);
    }
    for station in charging_stations {
        graph.add_location(station);
    }

    let pathways = [
        (1, 2, 10.0), (2, 3, 10.0), (3, 4, 10.0),
        (1, 5, 14.1), (2, 6, 10.0), (3, 7, 10.0), (4, 8, 10.0),
        (5, 6, 10.0), (6, 7, 10.0), (7, 8, 10.0),
    ];
    let charging_pathways = [
        (1, 9, 5.0), (9, 2, 5.0),
        (2, 10, 5.0), (10, 3, 5.0),
        (3, 11, 5.0), (11, 4, 5.0),
        (1, 12, 5.0), (12, 5, 5.0),
        (2, 13, 5.0), (13, 6, 5.0),
        (3, 14, 5.0), (14, 7, 5.0),
        (4, 15, 5.0), (15, 8, 5.0),
        (5, 16, 5.0), (16, 6, 5.0),
        (6, 17, 5.0), (17, 7, 5.0),
        (7, 18, 5.0), (18, 8, 5.0),
    ];
    for (from, to, weight) in pathways {
        graph.add_edge(from, to, weight, true);
    }
    for (from, to, weight) in charging_pathways {
        graph.add_edge(from, to, weight, true);
    }

    let charging_station_ids = charging_stations.iter().map(|loc| loc.id).collect();
    (graph, charging_station_ids)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    info!("starting hospital drone dispatch demo");

    let (graph, charging_station_ids) = build_floor_plan();
    let config = DispatcherConfig::from_env(charging_station_ids);
    let patients = PatientStore::seeded();
    let dispatcher = Dispatcher::new(graph, config, patients);

    // Six drones reserved for emergencies, fourteen for routine requests - same fleet mix
    // the original floor plan shipped with.
    for location_id in [1, 2, 1, 2, 8, 1] {
        dispatcher.add_drone(location_id, true).await?;
    }
    for i in 0..14u32 {
        let location_id = (i % 8 + 1) as model::LocationId;
        dispatcher.add_drone(location_id, false).await?;
    }

    info!("CTAS I - cardiac arrest, emergency medication needed from the pharmacy");
    let request1 = dispatcher
        .create_request(CreateRequestInput {
            requester_id: "DR001".into(),
            requester_name: "Dr. Smith".into(),
            requester_location_id: 2,
            priority: Ctas::CtasI,
            description: "Cardiac arrest, need emergency medication from pharmacy".into(),
            emergency: true,
            payload_items: [("med_epinephrine".to_string(), 2)].into_iter().collect(),
            ..Default::default()
        })
        .await?;
    if let Some(status) = dispatcher.get_request_status(request1).await {
        info!(request_id = request1, status = ?status.status, assigned_drone = ?status.assigned_drone_id, "request 1 dispatched");
    }

    info!("CTAS V - non-urgent food delivery");
    let request2 = dispatcher
        .create_request(CreateRequestInput {
            requester_id: "NU001".into(),
            requester_name: "Nurse Johnson".into(),
            requester_location_id: 6,
            priority: Ctas::CtasV,
            description: "Patient requesting food from cafeteria".into(),
            emergency: false,
            payload_items: [("food_meal".to_string(), 1)].into_iter().collect(),
            ..Default::default()
        })
        .await?;
    if let Some(status) = dispatcher.get_request_status(request2).await {
        info!(request_id = request2, status = ?status.status, assigned_drone = ?status.assigned_drone_id, "request 2 dispatched");
    }

    info!("completing request 1, drone lands at the pharmacy");
    dispatcher
        .complete_request(request1, 3, energy::TraditionalMethod::Vehicle, Some(0.5))
        .await?;

    if let Some(report) = dispatcher.get_energy_report(request1).await {
        info!(
            distance_m = report.distance_meters,
            drone_kwh = report.drone_energy_kwh,
            traditional_kwh = report.traditional_energy_kwh,
            saved_kwh = report.energy_saved_kwh,
            savings_pct = report.energy_savings_percentage,
            "energy savings for request 1"
        );
    }

    let stats = dispatcher.get_statistics().await;
    info!(?stats, "final statistics");

    Ok(())
}
