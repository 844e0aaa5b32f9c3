use super::common::*;
use crate::sequences::enrollments::router::enrollment_router;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    enrollment_router(Arc::clone(&h.engine))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request builds"))
        .await
        .expect("router responds");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is JSON")
    };
    (status, value)
}

fn create_body(n: u32) -> Value {
    json!({
        "sequenceId": sequence_id().0,
        "jobApplicationId": application(n).0,
    })
}

#[tokio::test]
async fn create_returns_201_with_camel_case_body() {
    let h = harness();
    let router = router(&h);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/sequence-enrollments/enrollments",
        Some(create_body(1)),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sequenceId"], sequence_id().0);
    assert_eq!(body["jobApplicationId"], application(1).0);
    assert_eq!(body["status"], "active");
    assert_eq!(body["enrollmentTrigger"], "manual");
    assert_eq!(body["currentStepOrder"], 0);
    assert!(body["nextExecutionAt"].is_string());
    assert!(body.get("completedAt").is_none());
}

#[tokio::test]
async fn duplicate_create_maps_to_409_with_error_payload() {
    let h = harness();
    let router = router(&h);
    send(
        &router,
        Method::POST,
        "/api/v1/sequence-enrollments/enrollments",
        Some(create_body(1)),
    )
    .await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/sequence-enrollments/enrollments",
        Some(create_body(1)),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("already exists"));
}

#[tokio::test]
async fn pause_and_resume_round_trip_over_patch() {
    let h = harness();
    let router = router(&h);
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");
    let base = format!(
        "/api/v1/sequence-enrollments/enrollments/{}",
        enrollment.id
    );

    let (status, body) = send(&router, Method::PATCH, &format!("{base}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    // Pausing a paused enrollment is a state-machine violation.
    let (status, body) = send(&router, Method::PATCH, &format!("{base}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().expect("error message").contains("paused"));

    let (status, body) = send(&router, Method::PATCH, &format!("{base}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert!(body["nextExecutionAt"].is_string());
}

#[tokio::test]
async fn delete_is_204_and_stays_204_on_repeat() {
    let h = harness();
    let router = router(&h);
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");
    let uri = format!(
        "/api/v1/sequence-enrollments/enrollments/{}",
        enrollment.id
    );

    let (status, _) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_enrollment_is_404() {
    let h = harness();
    let router = router(&h);
    let (status, body) = send(
        &router,
        Method::GET,
        "/api/v1/sequence-enrollments/enrollments/enr-missing",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().expect("error message").contains("not found"));
}

#[tokio::test]
async fn listing_carries_pagination_metadata() {
    let h = harness();
    let router = router(&h);
    for n in 1..=3 {
        h.engine.enroll(manual_request(n)).expect("enrolls");
    }

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/v1/sequence-enrollments/enrollments?limit=2&page=1",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().expect("items").len(), 2);
    assert_eq!(body["total"], 3);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["limit"], 2);
}

#[tokio::test]
async fn sequence_scoped_listing_pins_the_sequence_filter() {
    let h = harness();
    let router = router(&h);
    h.engine.enroll(manual_request(1)).expect("enrolls");

    let uri = format!(
        "/api/v1/sequence-enrollments/sequences/{}/enrollments",
        sequence_id()
    );
    let (status, body) = send(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/v1/sequence-enrollments/sequences/seq-other/enrollments",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn overlapping_auto_config_is_422_and_missing_config_404() {
    let h = harness();
    let router = router(&h);
    let uri = format!(
        "/api/v1/sequence-enrollments/sequences/{}/auto-enrollment",
        sequence_id()
    );

    let (status, body) = send(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("no auto-enrollment config"));

    let (status, body) = send(
        &router,
        Method::POST,
        &uri,
        Some(json!({
            "autoEnrollEnabled": true,
            "triggerStages": ["offer"],
            "excludeStages": ["offer"],
            "includeExistingCandidates": false,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .contains("both trigger and exclude"));

    let (status, body) = send(
        &router,
        Method::POST,
        &uri,
        Some(json!({
            "autoEnrollEnabled": true,
            "triggerStages": ["phone-screen"],
            "excludeStages": ["rejected"],
            "includeExistingCandidates": false,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["autoEnrollEnabled"], true);
}

#[tokio::test]
async fn bulk_endpoint_returns_itemized_buckets() {
    let h = harness();
    let router = router(&h);
    h.engine.enroll(manual_request(1)).expect("pre-enrolls");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/sequence-enrollments/enrollments/bulk",
        Some(json!({
            "sequenceId": sequence_id().0,
            "jobApplicationIds": [application(1).0, application(2).0, "app-999"],
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"].as_array().expect("created").len(), 1);
    assert_eq!(body["skipped"], json!([application(1).0]));
    assert_eq!(body["failed"].as_array().expect("failed").len(), 1);
    assert_eq!(body["failed"][0]["jobApplicationId"], "app-999");
}

#[tokio::test]
async fn stage_change_endpoint_reports_outcomes() {
    let h = harness();
    let router = router(&h);
    h.engine
        .set_auto_config(
            &sequence_id(),
            crate::sequences::enrollments::AutoEnrollmentConfig {
                auto_enroll_enabled: true,
                trigger_stages: stages(&["phone-screen"]),
                exclude_stages: stages(&["rejected"]),
                include_existing_candidates: false,
            },
        )
        .await
        .expect("stores config");
    let event = h
        .pipeline
        .move_to_stage(&application(1), stage("phone-screen"))
        .expect("application exists");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/sequence-enrollments/events/stage-change",
        Some(serde_json::to_value(&event).expect("event serializes")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let outcomes = body["outcomes"].as_array().expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["outcome"], "enrolled");
    assert_eq!(
        outcomes[0]["enrollment"]["enrollmentTrigger"],
        "pipeline_stage"
    );
}
