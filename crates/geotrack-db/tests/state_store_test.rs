//! Integration tests for the row-locked state stores and latest positions.
//!
//! These tests require a migrated PostgreSQL database with PostGIS
//! (`DATABASE_URL`, falling back to the test fixture default).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Barrier;
use uuid::Uuid;

use geotrack_db::test_fixtures::{connect_test_database, unique_subject};
use geotrack_db::{
    Database, GeoEvent, GeoEventRepository, GeoEventType, GeofenceState, GeofenceStateRepository,
    LatestPosition, LatestPositionRepository, RouteDeviationState,
    RouteDeviationStateRepository,
};

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_latest_position_ignores_older_timestamp() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("latest");
    let now = Utc::now();

    let newer = LatestPosition {
        subject_id: subject.clone(),
        latitude: 52.5,
        longitude: 13.4,
        accuracy: 5.0,
        ts: now,
    };
    let older = LatestPosition {
        latitude: 48.1,
        ts: now - Duration::minutes(10),
        ..newer.clone()
    };

    assert!(db.latest_positions.upsert(&newer).await.unwrap());
    assert!(!db.latest_positions.upsert(&older).await.unwrap());

    let stored = db.latest_positions.get(&subject).await.unwrap().unwrap();
    assert_eq!(stored.latitude, 52.5);
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_geofence_tx_commit_persists_state_and_event() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("fence");
    let area_id = Uuid::now_v7();
    let ts = Utc::now();

    let mut tx = db.geofence_states.begin().await.unwrap();
    let fresh = tx.lock_state(&subject, area_id).await.unwrap();
    assert!(fresh.map_or(true, |s| !s.inside && s.last_point_ts.is_none()));

    let event = GeoEvent {
        id: Uuid::now_v7(),
        subject_id: subject.clone(),
        area_id,
        event_type: GeoEventType::Dwell,
        ts,
        confidence: 0.9,
        point_id: None,
    };
    tx.insert_geo_event(&event).await.unwrap();
    assert!(tx
        .dwell_exists_since(&subject, area_id, ts - Duration::seconds(1))
        .await
        .unwrap());

    let mut state = GeofenceState::outside(subject.clone(), area_id);
    state.inside = true;
    state.enter_ts = Some(ts - Duration::minutes(5));
    state.last_point_ts = Some(ts);
    tx.upsert_state(&state).await.unwrap();
    tx.commit().await.unwrap();

    let stored = db.geofence_states.get(&subject, area_id).await.unwrap().unwrap();
    assert!(stored.inside);
    assert_eq!(
        stored.last_point_ts.map(|t| t.timestamp_millis()),
        Some(ts.timestamp_millis())
    );

    let events = db.geo_events.list_for_subject(&subject, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeoEventType::Dwell);

    db.geofence_states.delete_by_subject(&subject).await.unwrap();
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_geofence_tx_dropped_without_commit_rolls_back() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("rollback");
    let area_id = Uuid::now_v7();

    {
        let mut tx = db.geofence_states.begin().await.unwrap();
        tx.upsert_state(&GeofenceState::outside(subject.clone(), area_id))
            .await
            .unwrap();
    }

    assert!(db
        .geofence_states
        .get(&subject, area_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_route_deviation_state_upsert_and_delete_by_route() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("route");
    let route_id = Uuid::now_v7();

    let mut tx = db.route_deviation_states.begin().await.unwrap();
    let mut state = RouteDeviationState::on_route(subject.clone(), route_id);
    state.consecutive_off_route = 2;
    state.last_point_ts = Some(Utc::now());
    tx.upsert_state(&state).await.unwrap();
    tx.commit().await.unwrap();

    let stored = db
        .route_deviation_states
        .get(&subject, route_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.consecutive_off_route, 2);
    assert!(!stored.deviated);

    assert_eq!(db.route_deviation_states.delete_by_route(route_id).await.unwrap(), 1);
    assert!(db
        .route_deviation_states
        .get(&subject, route_id)
        .await
        .unwrap()
        .is_none());
}

fn enter_event(subject: &str, area_id: Uuid, ts: DateTime<Utc>) -> GeoEvent {
    GeoEvent {
        id: Uuid::now_v7(),
        subject_id: subject.to_string(),
        area_id,
        event_type: GeoEventType::Enter,
        ts,
        confidence: 0.9,
        point_id: None,
    }
}

/// One OUTSIDE -> INSIDE evaluation. Returns whether this worker entered.
async fn enter_if_outside(
    db: Database,
    barrier: Arc<Barrier>,
    subject: String,
    area_id: Uuid,
    ts: DateTime<Utc>,
) -> bool {
    let mut tx = db.geofence_states.begin().await.unwrap();
    barrier.wait().await;
    let mut state = tx
        .lock_state(&subject, area_id)
        .await
        .unwrap()
        .unwrap_or_else(|| GeofenceState::outside(subject.clone(), area_id));
    if state.inside {
        return false;
    }
    tx.insert_geo_event(&enter_event(&subject, area_id, ts))
        .await
        .unwrap();
    state.inside = true;
    state.enter_ts = Some(ts);
    state.last_point_ts = Some(ts);
    tx.upsert_state(&state).await.unwrap();
    tx.commit().await.unwrap();
    true
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_fresh_geofence_pair_serializes_concurrent_workers() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("race");
    let area_id = Uuid::now_v7();
    let ts = Utc::now();
    let barrier = Arc::new(Barrier::new(3));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            tokio::spawn(enter_if_outside(
                db.clone(),
                barrier.clone(),
                subject.clone(),
                area_id,
                ts,
            ))
        })
        .collect();
    let mut entered = 0;
    for worker in workers {
        if worker.await.unwrap() {
            entered += 1;
        }
    }

    assert_eq!(entered, 1);
    let events = db.geo_events.list_for_subject(&subject, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeoEventType::Enter);

    db.geofence_states.delete_by_subject(&subject).await.unwrap();
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_fresh_route_pair_counts_every_concurrent_worker() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("race");
    let route_id = Uuid::now_v7();
    let barrier = Arc::new(Barrier::new(3));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let db = db.clone();
            let barrier = barrier.clone();
            let subject = subject.clone();
            tokio::spawn(async move {
                let mut tx = db.route_deviation_states.begin().await.unwrap();
                barrier.wait().await;
                let mut state = tx
                    .lock_state(&subject, route_id)
                    .await
                    .unwrap()
                    .unwrap_or_else(|| RouteDeviationState::on_route(subject.clone(), route_id));
                state.consecutive_off_route += 1;
                tx.upsert_state(&state).await.unwrap();
                tx.commit().await.unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    let stored = db
        .route_deviation_states
        .get(&subject, route_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.consecutive_off_route, 3);

    db.route_deviation_states.delete_by_subject(&subject).await.unwrap();
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_failed_event_insert_keeps_transaction_usable() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("savepoint");
    let area_id = Uuid::now_v7();
    let ts = Utc::now();
    let event = enter_event(&subject, area_id, ts);

    let mut tx = db.geofence_states.begin().await.unwrap();
    tx.lock_state(&subject, area_id).await.unwrap();
    tx.insert_geo_event(&event).await.unwrap();
    // Duplicate primary key
    assert!(tx.insert_geo_event(&event).await.is_err());

    let mut state = GeofenceState::outside(subject.clone(), area_id);
    state.last_point_ts = Some(ts);
    tx.upsert_state(&state).await.unwrap();
    tx.commit().await.unwrap();

    let stored = db.geofence_states.get(&subject, area_id).await.unwrap().unwrap();
    assert!(stored.last_point_ts.is_some());
    assert_eq!(
        db.geo_events.list_for_subject(&subject, 10).await.unwrap().len(),
        1
    );

    db.geofence_states.delete_by_subject(&subject).await.unwrap();
}
