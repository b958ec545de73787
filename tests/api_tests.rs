//! Router tests: requests go through the full axum stack against the
//! in-memory store.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use rust_crm_api::config::Config;
use rust_crm_api::email::LogMailer;
use rust_crm_api::handlers::{AppState, ACTOR_HEADER};
use rust_crm_api::memory_store::MemoryStore;
use rust_crm_api::routes::router;

fn app() -> Router {
    let config = Config::for_tests();
    let mailer = Arc::new(LogMailer::new(
        config.smtp_from_email.clone(),
        config.smtp_from_name.clone(),
    ));
    let state = AppState::new(Arc::new(MemoryStore::new()), None, config, mailer);
    router(Arc::new(state)).expect("router")
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        // Public routes key their rate limit on the client IP.
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create_contact(app: &Router) -> String {
    let (status, contact) = send(
        app,
        json_request(
            Method::POST,
            "/api/v1/contacts",
            json!({"first_name": "Anna", "last_name": "Huber", "email": "anna@huber-bau.at"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    contact["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoints_answer() {
    let app = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, get("/health/db")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "in-memory");
}

#[tokio::test]
async fn unknown_lead_is_404_with_error_body() {
    let app = app();
    let (status, body) = send(
        &app,
        get("/api/v1/leads/7f1c1a47-0c0e-4a6e-9d59-1b3f4a1d2e3f"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn conversion_flow_over_http() {
    let app = app();
    let contact_id = create_contact(&app).await;

    let (status, lead) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/leads",
            json!({"contact_id": contact_id, "status": "warm"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let lead_id = lead["id"].as_str().unwrap().to_string();
    let convert_uri = format!("/api/v1/leads/{}/convert", lead_id);

    let (status, _) = send(
        &app,
        json_request(Method::POST, &convert_uri, json!({"name": "Dach"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/v1/leads/{}", lead_id),
            json!({"status": "hot"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, opportunity) = send(
        &app,
        json_request(Method::POST, &convert_uri, json!({"name": "Dach", "expected_value": "1000"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(opportunity["stage"], "qualification");
    assert_eq!(opportunity["probability"], 10);

    let (status, body) = send(
        &app,
        json_request(Method::POST, &convert_uri, json!({"name": "Dach"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already been converted"));

    let (status, stats) = send(&app, get("/api/v1/opportunities/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_opportunities"], 1);
}

#[tokio::test]
async fn task_completion_over_http() {
    let app = app();
    let (status, task) = send(
        &app,
        json_request(Method::POST, "/api/v1/tasks", json!({"title": "Rückruf", "priority": "high"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let complete_uri = format!("/api/v1/tasks/{}/complete", task["id"].as_str().unwrap());

    let (status, completion) = send(
        &app,
        json_request(
            Method::POST,
            &complete_uri,
            json!({"create_follow_up": true, "follow_up_title": "Nachfassen"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completion["task"]["status"], "completed");
    assert_eq!(completion["follow_up_task"]["parent_task_id"], task["id"]);

    let (status, _) = send(&app, json_request(Method::POST, &complete_uri, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listing) = send(&app, get("/api/v1/tasks?status=open")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["title"], "Nachfassen");
    assert_eq!(listing["items"][0]["is_overdue"], false);
}

#[tokio::test]
async fn actor_header_is_recorded_on_notes() {
    let app = app();
    let contact_id = create_contact(&app).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/v1/contacts/{}/notes", contact_id))
        .header(header::CONTENT_TYPE, "application/json")
        .header(ACTOR_HEADER, "markus")
        .body(Body::from(json!({"content": "Messe Graz"}).to_string()))
        .unwrap();
    let (status, entry) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["created_by"], "markus");

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            &format!("/api/v1/contacts/{}/calls", contact_id),
            json!({"content": "Kurz besprochen", "duration_minutes": 5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, timeline) = send(
        &app,
        get(&format!("/api/v1/contacts/{}/history", contact_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(timeline["total"], 2);
    assert_eq!(timeline["page_size"], 50);
    assert_eq!(timeline["items"][0]["created_by"], "system");
    assert_eq!(timeline["items"][1]["created_by"], "markus");
}

#[tokio::test]
async fn public_lead_form() {
    let app = app();
    let form = json!({
        "first_name": "Eva",
        "last_name": "Berger",
        "email": "eva@berger.at",
        "company_name": "Berger KG"
    });
    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/v1/public/leads", form),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["message"],
        "Vielen Dank für Ihre Anfrage! Wir werden uns in Kürze bei Ihnen melden."
    );

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/public/leads",
            json!({"first_name": "Eva", "last_name": "Berger", "email": "kaputt"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Ungültige E-Mail-Adresse");

    let (_, leads) = send(&app, get("/api/v1/leads?status=cold")).await;
    assert_eq!(leads["total"], 1);
    assert_eq!(leads["items"][0]["source"], "landing_page");
}

#[tokio::test]
async fn inactive_campaigns_are_hidden_from_public() {
    let app = app();
    let (status, campaign) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/campaigns",
            json!({"name": "Frühjahr", "type": "landing_page", "is_active": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["type"], "landing_page");

    let uri = format!("/api/v1/public/campaigns/{}", campaign["id"].as_str().unwrap());
    let (status, _) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn csv_upload_imports_leads() {
    let app = app();
    let boundary = "crm-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"leads.csv\"\r\nContent-Type: text/csv\r\n\r\nVorname,Nachname,Firma\nAnna,Huber,Huber Bau\nMax,,\n\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/leads/import")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, result) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["total_rows"], 2);
    assert_eq!(result["imported"], 1);
    assert_eq!(result["failed"], 1);
    assert_eq!(result["errors"][0], "Zeile 3: Vorname oder Nachname fehlt");
}

#[tokio::test]
async fn upload_without_file_is_rejected() {
    let app = app();
    let boundary = "crm-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nnothing\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/leads/import")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file uploaded");
}

#[tokio::test]
async fn settings_and_lookups() {
    let app = app();
    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/settings",
            json!({"key": "company.name", "category": "general", "value": "Huber Bau"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/settings",
            json!({"key": "company.name", "category": "general"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, get("/api/v1/settings/missing.key")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/v1/settings/company.name",
            json!({"value": "nicht-zahl", "value_type": "number"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut ids = Vec::new();
    for (value, order) in [("messe", 0), ("web", 1)] {
        let (status, lookup) = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/settings/lookups",
                json!({"category": "lead_source", "value": value, "label": value, "sort_order": order}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(lookup["id"].as_str().unwrap().to_string());
    }

    let (status, reordered) = send(
        &app,
        json_request(
            Method::POST,
            "/api/v1/settings/lookups/lead_source/reorder",
            json!({"ordered_ids": [ids[1], ids[0]]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reordered[0]["value"], "web");

    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/v1/settings/lookups/id/{}", ids[0]))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, active) = send(&app, get("/api/v1/settings/lookups/lead_source")).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
    let (_, all) = send(
        &app,
        get("/api/v1/settings/lookups/lead_source?include_inactive=true"),
    )
    .await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}
