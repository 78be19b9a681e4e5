//! Integration tests for PostGIS area/route queries, the catch-up query and
//! retention.

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use geotrack_db::test_fixtures::{connect_test_database, unique_subject};
use geotrack_db::{
    AreaRepository, AreaType, CreateAreaRequest, CreateRouteRequest, LatestPosition,
    LatestPositionRepository, LocationPoint, LocationPointRepository, LocationSource,
    RetentionRepository, RouteRepository,
};

const SQUARE: &str = r#"{"type":"Polygon","coordinates":[[[13.0,52.0],[13.1,52.0],[13.1,52.1],[13.0,52.1],[13.0,52.0]]]}"#;
const LINE: &str = r#"{"type":"LineString","coordinates":[[13.0,52.0],[13.1,52.0]]}"#;

fn point(subject: &str, ts: chrono::DateTime<Utc>) -> LocationPoint {
    LocationPoint {
        id: Uuid::now_v7(),
        subject_id: subject.to_string(),
        ts,
        ingested_at: Utc::now(),
        latitude: 52.05,
        longitude: 13.05,
        accuracy: 8.0,
        altitude: None,
        speed: Some(1.2),
        bearing: None,
        source: LocationSource::Gps,
        extras: json!({"battery": 80}),
    }
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_area_candidates_and_containment() {
    let db = connect_test_database().await.expect("connect");
    let area = db
        .areas
        .create(CreateAreaRequest {
            owner_id: "owner-test".into(),
            name: "square".into(),
            description: None,
            area_type: AreaType::Zone,
            geometry_geojson: SQUARE.into(),
        })
        .await
        .unwrap();
    assert!(area.area_m2.unwrap_or_default() > 0.0);

    let candidates = db.areas.candidates_for_point(52.05, 13.05, 100).await.unwrap();
    assert!(candidates.iter().any(|a| a.id == area.id));
    assert!(db.areas.contains_point(area.id, 52.05, 13.05).await.unwrap());
    assert!(!db.areas.contains_point(area.id, 52.2, 13.05).await.unwrap());

    db.areas.mark_deleted(area.id).await.unwrap();
    let candidates = db.areas.candidates_for_point(52.05, 13.05, 100).await.unwrap();
    assert!(candidates.iter().all(|a| a.id != area.id));
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_invalid_area_geometry_rejected() {
    let db = connect_test_database().await.expect("connect");
    let result = db
        .areas
        .create(CreateAreaRequest {
            owner_id: "owner-test".into(),
            name: "line".into(),
            description: None,
            area_type: AreaType::Zone,
            geometry_geojson: LINE.into(),
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_route_assignment_and_distance() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("assign");
    let route = db
        .routes
        .create(CreateRouteRequest {
            owner_id: "owner-test".into(),
            name: "east-west".into(),
            geometry_geojson: LINE.into(),
            deviation_threshold_m: Some(50.0),
            ..Default::default()
        })
        .await
        .unwrap();
    db.routes
        .create_assignment(&subject, route.id, None, None)
        .await
        .unwrap();

    let assigned = db
        .routes
        .active_assignments_for_subject(&subject, Utc::now())
        .await
        .unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].route.id, route.id);

    let distance = db.routes.distance_to_route(route.id, 52.001, 13.05).await.unwrap();
    assert!((distance - 111.0).abs() < 5.0, "distance was {distance}");

    assert_eq!(db.routes.delete_assignments_by_route(route.id).await.unwrap(), 1);
    assert!(db
        .routes
        .active_assignments_for_subject(&subject, Utc::now())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_catch_up_query_skips_processed_subjects() {
    let db = connect_test_database().await.expect("connect");
    let behind = unique_subject("behind");
    let current = unique_subject("current");
    let now = Utc::now();

    let old = point(&behind, now - Duration::minutes(3));
    let newest = point(&behind, now - Duration::minutes(1));
    let done = point(&current, now - Duration::minutes(2));
    db.location_points
        .insert_batch(&[old, newest.clone(), done.clone()])
        .await
        .unwrap();
    db.latest_positions
        .upsert(&LatestPosition {
            subject_id: current.clone(),
            latitude: done.latitude,
            longitude: done.longitude,
            accuracy: done.accuracy,
            ts: done.ts,
        })
        .await
        .unwrap();

    let rows = db
        .location_points
        .find_unprocessed(now - Duration::hours(1), 10_000)
        .await
        .unwrap();
    let mine: Vec<_> = rows
        .iter()
        .filter(|r| r.subject_id == behind || r.subject_id == current)
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].point_id, newest.id);
}

#[tokio::test]
#[ignore = "requires migrated database with PostGIS"]
async fn test_retention_deletes_in_batches_and_partitions_idempotent() {
    let db = connect_test_database().await.expect("connect");
    let subject = unique_subject("retention");
    let now = Utc::now();

    let mut stale: Vec<LocationPoint> = (0..3).map(|_| point(&subject, now)).collect();
    for p in &mut stale {
        p.ingested_at = now - Duration::days(400);
    }
    db.location_points.insert_batch(&stale).await.unwrap();

    let cutoff = now - Duration::days(365);
    let mut total = 0;
    loop {
        let deleted = db
            .retention
            .delete_location_points_before(cutoff, 2)
            .await
            .unwrap();
        total += deleted;
        if deleted < 2 {
            break;
        }
    }
    assert!(total >= 3);
    for p in &stale {
        assert!(db.location_points.get(p.id).await.unwrap().is_none());
    }

    db.retention.ensure_partitions(3).await.unwrap();
    db.retention.ensure_partitions(3).await.unwrap();
}
