//! Route-deviation scenarios on the in-memory store.

mod common;

use chrono::Duration;

use common::{base_time, east_west, fix, Harness, OFF_ROUTE, ON_ROUTE};
use geotrack_core::{DeviationEventKind, RouteDeviationStateRepository};

fn kinds(h: &Harness) -> Vec<DeviationEventKind> {
    h.publisher
        .deviations()
        .into_iter()
        .map(|d| d.event_type)
        .collect()
}

#[tokio::test]
async fn test_deviation_requires_consecutive_pings() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(3), Some(300))
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    for i in 0..2 {
        h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(i * 10)))
            .await;
    }
    assert!(kinds(&h).is_empty());
    let state = h.store.get("device-1", route.id).await.unwrap().unwrap();
    assert_eq!(state.consecutive_off_route, 2);
    assert!(!state.deviated);

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(20)))
        .await;
    assert_eq!(kinds(&h), vec![DeviationEventKind::Deviated]);

    let detected = &h.publisher.deviations()[0];
    assert_eq!(detected.route_id, route.id);
    assert!((detected.distance_meters - 111.2).abs() < 2.0);
}

#[tokio::test]
async fn test_cooldown_gates_repeat_deviation() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(3), Some(300))
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    for secs in [0, 10, 20, 100, 200, 319] {
        h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(secs)))
            .await;
    }
    assert_eq!(kinds(&h), vec![DeviationEventKind::Deviated]);

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(320)))
        .await;
    assert_eq!(
        kinds(&h),
        vec![DeviationEventKind::Deviated, DeviationEventKind::Deviated]
    );
}

#[tokio::test]
async fn test_back_on_route() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(1), Some(300))
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0)).await;
    h.process(&fix("device-1", ON_ROUTE.0, ON_ROUTE.1, 5.0, t0 + Duration::seconds(10)))
        .await;
    h.process(&fix("device-1", ON_ROUTE.0, ON_ROUTE.1, 5.0, t0 + Duration::seconds(20)))
        .await;

    assert_eq!(
        kinds(&h),
        vec![DeviationEventKind::Deviated, DeviationEventKind::BackOnRoute]
    );
    let state = h.store.get("device-1", route.id).await.unwrap().unwrap();
    assert!(!state.deviated);
    assert_eq!(state.consecutive_off_route, 0);
}

#[tokio::test]
async fn test_threshold_only_route_uses_default_count() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), None, None)
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    for i in 0..2 {
        h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(i)))
            .await;
    }
    assert!(kinds(&h).is_empty());
    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(2)))
        .await;
    assert_eq!(kinds(&h), vec![DeviationEventKind::Deviated]);
}

#[tokio::test]
async fn test_unconfigured_route_skipped() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), None, None, None)
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, base_time()))
        .await;

    assert!(h.store.get("device-1", route.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_assignment_not_evaluated() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(1), None)
        .await;
    let t0 = base_time();
    h.store
        .assign_route(
            "device-1",
            route.id,
            Some(t0 - Duration::days(2)),
            Some(t0 - Duration::days(1)),
        )
        .await;

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0)).await;

    assert!(kinds(&h).is_empty());
    assert_eq!(h.store.deviation_state_count().await, 0);
}

#[tokio::test]
async fn test_replay_does_not_double_count() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(3), None)
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    let late = fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(30));
    let early = fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0);
    h.process(&late).await;
    h.process(&early).await;
    h.process(&early).await;

    let state = h.store.get("device-1", route.id).await.unwrap().unwrap();
    assert_eq!(state.consecutive_off_route, 1);
}

#[tokio::test]
async fn test_redelivered_latest_point_does_not_count_twice() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(3), None)
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;
    let t0 = base_time();

    let first = fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0);
    let second = fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(10));
    h.process(&first).await;
    h.process(&second).await;
    h.process(&second).await;

    assert!(h.publisher.deviations().is_empty());
    let state = h.store.get("device-1", route.id).await.unwrap().unwrap();
    assert_eq!(state.consecutive_off_route, 2);
    assert!(!state.deviated);

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, t0 + Duration::seconds(20)))
        .await;
    assert_eq!(h.publisher.deviations().len(), 1);
}

#[tokio::test]
async fn test_failing_route_isolated() {
    let h = Harness::new();
    let broken = h
        .store
        .insert_route("owner-1", "broken", east_west(), Some(50.0), Some(1), None)
        .await;
    let healthy = h
        .store
        .insert_route("owner-1", "healthy", east_west(), Some(50.0), Some(1), None)
        .await;
    h.store.assign_route("device-1", broken.id, None, None).await;
    h.store.assign_route("device-1", healthy.id, None, None).await;
    h.store.fail_route(broken.id).await;

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 5.0, base_time()))
        .await;

    let detected = h.publisher.deviations();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].route_id, healthy.id);
}

#[tokio::test]
async fn test_inaccurate_fix_not_evaluated() {
    let h = Harness::new();
    let route = h
        .store
        .insert_route("owner-1", "east-west", east_west(), Some(50.0), Some(1), None)
        .await;
    h.store.assign_route("device-1", route.id, None, None).await;

    h.process(&fix("device-1", OFF_ROUTE.0, OFF_ROUTE.1, 800.0, base_time()))
        .await;

    assert!(kinds(&h).is_empty());
    assert!(h.store.get("device-1", route.id).await.unwrap().is_none());
}
