//! Integration tests for the long-poll endpoint.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum_test::TestServer;

use notify_api::broker::{BrokerConfig, DeliveryPolicy, EventType};

// =========================================================================
// GET /api/v1/poll — identity contract
// =========================================================================

#[tokio::test]
async fn poll_requires_identity_headers() {
    let (app, _) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/api/v1/poll").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"].as_str(), Some("UNAUTHORIZED"));
}

// =========================================================================
// GET /api/v1/poll — immediate reply from the backlog
// =========================================================================

#[tokio::test]
async fn backlogged_event_is_returned_immediately_as_an_object() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let id = state.broker.publish(
        EventType::NewMessage,
        "t1",
        serde_json::json!({ "body": "hello" }),
        &["u1".to_string()],
        DeliveryPolicy::Queued,
    );

    let started = Instant::now();
    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1,t2")
        .await;

    resp.assert_status(StatusCode::OK);
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "backlogged events must not wait for the deadline"
    );

    // Exactly one pending event serializes as a bare object.
    let body: serde_json::Value = resp.json();
    assert!(body.is_object());
    assert_eq!(body["id"].as_i64(), Some(id));
    assert_eq!(body["type"].as_str(), Some("new_message"));
    assert_eq!(body["team_id"].as_str(), Some("t1"));
    assert_eq!(body["payload"]["body"].as_str(), Some("hello"));
    assert!(body["created_at"].as_str().is_some());
}

#[tokio::test]
async fn multiple_backlogged_events_are_returned_as_an_ordered_array() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let mut published = Vec::new();
    for n in 0..3 {
        published.push(state.broker.publish(
            EventType::NewMessage,
            "t1",
            serde_json::json!({ "n": n }),
            &["u1".to_string()],
            DeliveryPolicy::Queued,
        ));
    }

    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1")
        .await;

    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let events = body.as_array().expect("array for multiple events");
    let ids: Vec<i64> = events.iter().filter_map(|e| e["id"].as_i64()).collect();
    assert_eq!(ids, published, "publish order, no gaps");
}

// =========================================================================
// GET /api/v1/poll — timeout
// =========================================================================

#[tokio::test]
async fn poll_times_out_with_no_content() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let started = Instant::now();
    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1")
        .await;

    resp.assert_status(StatusCode::NO_CONTENT);
    assert!(
        started.elapsed() >= Duration::from_millis(200),
        "must hold the request until the deadline"
    );
    assert_eq!(state.broker.connection_count(), 0);
}

// =========================================================================
// GET /api/v1/poll — resume cursor
// =========================================================================

#[tokio::test]
async fn resume_cursor_skips_already_seen_events() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let mut published = Vec::new();
    for n in 0..3 {
        published.push(state.broker.publish(
            EventType::ScheduleUpdated,
            "t1",
            serde_json::json!({ "n": n }),
            &["u1".to_string()],
            DeliveryPolicy::Queued,
        ));
    }

    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1")
        .add_query_param("last_event_id", published[1])
        .await;

    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(
        body["id"].as_i64(),
        Some(published[2]),
        "only events after the cursor"
    );
}

// =========================================================================
// GET /api/v1/poll — publish resolves a parked request
// =========================================================================

#[tokio::test]
async fn publish_resolves_a_parked_poll() {
    let (app, state) = common::test_app_with(
        BrokerConfig {
            poll_timeout: Duration::from_secs(5),
            ..BrokerConfig::default()
        },
        None,
    );
    let server = Arc::new(TestServer::new(app).unwrap());

    let poller = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .get("/api/v1/poll")
                .add_header("x-user-id", "u1")
                .add_header("x-team-ids", "t1")
                .await
        })
    };

    while state.broker.connection_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let id = state.broker.publish(
        EventType::ScheduleCreated,
        "t1",
        serde_json::json!({ "title": "standup" }),
        &["u1".to_string()],
        DeliveryPolicy::Queued,
    );

    let resp = poller.await.unwrap();
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["id"].as_i64(), Some(id));
}

// =========================================================================
// GET /api/v1/poll — team filter
// =========================================================================

#[tokio::test]
async fn team_filter_excludes_other_teams() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    state.broker.publish(
        EventType::NewMessage,
        "t1",
        serde_json::json!({}),
        &["u1".to_string()],
        DeliveryPolicy::Queued,
    );

    // Subscribed to t2 only: the t1 backlog stays queued and the poll
    // times out.
    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1,t2")
        .add_query_param("team_id", "t2")
        .await;
    resp.assert_status(StatusCode::NO_CONTENT);

    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1,t2")
        .add_query_param("team_id", "t1")
        .await;
    resp.assert_status(StatusCode::OK);
}

// =========================================================================
// GET /api/v1/poll — capacity ceilings
// =========================================================================

#[tokio::test]
async fn per_user_ceiling_rejects_with_429_and_leaves_the_parked_poll_alone() {
    let (app, state) = common::test_app_with(
        BrokerConfig {
            poll_timeout: Duration::from_secs(5),
            max_connections_per_user: 1,
            ..BrokerConfig::default()
        },
        None,
    );
    let server = Arc::new(TestServer::new(app).unwrap());

    let poller = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .get("/api/v1/poll")
                .add_header("x-user-id", "u1")
                .add_header("x-team-ids", "t1")
                .await
        })
    };
    while state.broker.connection_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u1")
        .add_header("x-team-ids", "t1")
        .await;
    resp.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = resp.json();
    assert_eq!(
        body["error"]["code"].as_str(),
        Some("USER_CAPACITY_EXCEEDED")
    );

    // The rejection must not have disturbed the original poll.
    assert_eq!(state.broker.connection_count(), 1);
    state.broker.publish(
        EventType::NewMessage,
        "t1",
        serde_json::json!({}),
        &["u1".to_string()],
        DeliveryPolicy::Queued,
    );
    poller.await.unwrap().assert_status(StatusCode::OK);
}

#[tokio::test]
async fn global_ceiling_rejects_with_429() {
    let (app, state) = common::test_app_with(
        BrokerConfig {
            poll_timeout: Duration::from_secs(5),
            max_connections: 1,
            ..BrokerConfig::default()
        },
        None,
    );
    let server = Arc::new(TestServer::new(app).unwrap());

    let poller = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .get("/api/v1/poll")
                .add_header("x-user-id", "u1")
                .add_header("x-team-ids", "t1")
                .await
        })
    };
    while state.broker.connection_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resp = server
        .get("/api/v1/poll")
        .add_header("x-user-id", "u2")
        .add_header("x-team-ids", "t1")
        .await;
    resp.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = resp.json();
    assert_eq!(
        body["error"]["code"].as_str(),
        Some("GLOBAL_CAPACITY_EXCEEDED")
    );

    state.broker.publish(
        EventType::NewMessage,
        "t1",
        serde_json::json!({}),
        &["u1".to_string()],
        DeliveryPolicy::Queued,
    );
    poller.await.unwrap().assert_status(StatusCode::OK);
}
