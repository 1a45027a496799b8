use crate::models::AppState;
use axum::Router;
use chrono::NaiveDateTime;

pub mod appointment_routes;
pub mod calendar_routes;
pub mod dashboard_routes;
pub mod doctor_routes;
pub mod invoice_routes;
pub mod patient_routes;
pub mod reminder_routes;
pub mod treatment_routes;

/// Wall-clock time at the clinic; appointments are stored in local time.
pub(crate) fn clinic_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(appointment_routes::router())
        .merge(calendar_routes::router())
        .merge(doctor_routes::router())
        .merge(treatment_routes::router())
        .merge(patient_routes::router())
        .merge(invoice_routes::router())
        .merge(reminder_routes::router())
        .merge(dashboard_routes::router());

    Router::new().nest("/api/v1", api).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::hash_access_token;
    use crate::store::memory::MemoryStore;

    fn state_with_token(token: Option<&str>) -> AppState {
        AppState {
            store: Arc::new(MemoryStore::new()),
            api_token_hash: token.map(hash_access_token),
            default_page_limit: 50,
            default_tax_rate: 22,
        }
    }

    fn make_request(method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        match body {
            Some(v) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(make_request(method, uri, body, None))
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn seed(app: &Router) -> (String, String, String) {
        let (s, patient) = call(
            app,
            "POST",
            "/api/v1/patients",
            Some(json!({ "first_name": "Maria", "last_name": "Rossi", "phone": "123" })),
        )
        .await;
        assert_eq!(s, StatusCode::OK, "{patient}");
        let (_, doctor) = call(
            app,
            "POST",
            "/api/v1/doctors",
            Some(json!({ "name": "Dr. Bianchi", "specialization": "Hygiene", "color": "#112233" })),
        )
        .await;
        let (_, treatment) = call(
            app,
            "POST",
            "/api/v1/treatments",
            Some(json!({ "name": "Cleaning", "duration_min": 30, "price_cents": 8000, "category": "Hygiene" })),
        )
        .await;
        (
            patient["data"]["patient_id"].as_str().unwrap().to_string(),
            doctor["data"]["doctor_id"].as_str().unwrap().to_string(),
            treatment["data"]["treatment_id"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn double_booking_returns_409_with_code() {
        let app = router(state_with_token(None));
        let (patient, doctor, treatment) = seed(&app).await;
        let booking = |start: &str| {
            json!({
                "patient_id": patient,
                "doctor_id": doctor,
                "treatment_id": treatment,
                "date": "2024-05-06",
                "start_time": start,
            })
        };

        let (s, first) = call(&app, "POST", "/api/v1/appointments", Some(booking("10:00"))).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(first["data"]["end_time"], "10:30");
        assert_eq!(first["data"]["status"], "pending");
        assert_eq!(first["data"]["doctor"]["name"], "Dr. Bianchi");

        let (s, err) = call(&app, "POST", "/api/v1/appointments", Some(booking("10:15"))).await;
        assert_eq!(s, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "TIME_CONFLICT");
        assert_eq!(
            err["error"]["message"],
            "Doctor already has an appointment from 10:00 to 10:30"
        );

        let (s, _) = call(&app, "POST", "/api/v1/appointments", Some(booking("10:30"))).await;
        assert_eq!(s, StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_cancels_and_list_is_paginated() {
        let app = router(state_with_token(None));
        let (patient, doctor, treatment) = seed(&app).await;
        let (_, created) = call(
            &app,
            "POST",
            "/api/v1/appointments",
            Some(json!({
                "patient_id": patient,
                "doctor_id": doctor,
                "treatment_id": treatment,
                "date": "2024-05-06",
                "start_time": "09:00",
            })),
        )
        .await;
        let id = created["data"]["appointment_id"].as_str().unwrap();

        let (s, cancelled) = call(&app, "DELETE", &format!("/api/v1/appointments/{id}"), None).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(cancelled["data"]["status"], "cancelled");

        let (s, page) = call(&app, "GET", "/api/v1/appointments?status=cancelled&limit=10", None).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(page["pagination"]["total"], 1);
        assert_eq!(page["pagination"]["limit"], 10);
        assert_eq!(page["pagination"]["totalPages"], 1);
        assert_eq!(page["records"][0]["appointment_id"], id);
    }

    #[tokio::test]
    async fn extreme_inputs_are_rejected_without_panicking() {
        let app = router(state_with_token(None));

        let (s, page) = call(&app, "GET", "/api/v1/appointments?page=9223372036854775807&limit=200", None).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(page["pagination"]["page"], i64::MAX / 200);
        assert_eq!(page["records"].as_array().map(Vec::len), Some(0));

        let (s, body) = call(
            &app,
            "GET",
            "/api/v1/invoices/calculate?subtotal_cents=9223372036854775807&tax_rate=22",
            None,
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (s, _) = call(&app, "GET", "/api/v1/calendar/-262143/1", None).await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_rows_are_404() {
        let app = router(state_with_token(None));
        let id = uuid::Uuid::new_v4();
        let (s, err) = call(&app, "GET", &format!("/api/v1/doctors/{id}"), None).await;
        assert_eq!(s, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn doctor_with_appointments_cannot_be_deleted() {
        let app = router(state_with_token(None));
        let (patient, doctor, treatment) = seed(&app).await;
        call(
            &app,
            "POST",
            "/api/v1/appointments",
            Some(json!({
                "patient_id": patient,
                "doctor_id": doctor,
                "treatment_id": treatment,
                "date": "2024-05-06",
                "start_time": "09:00",
            })),
        )
        .await;

        let (_, check) = call(&app, "GET", &format!("/api/v1/doctors/{doctor}/can_delete"), None).await;
        assert_eq!(check["data"]["canDelete"], false);
        assert_eq!(check["data"]["appointmentCount"], 1);

        let (s, err) = call(&app, "DELETE", &format!("/api/v1/doctors/{doctor}"), None).await;
        assert_eq!(s, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "HAS_APPOINTMENTS");
    }

    #[tokio::test]
    async fn calendar_returns_forty_two_cells() {
        let app = router(state_with_token(None));
        let (s, body) = call(&app, "GET", "/api/v1/calendar/2024/6", None).await;
        assert_eq!(s, StatusCode::OK);
        let cells = body["data"]["cells"].as_array().unwrap();
        assert_eq!(cells.len(), 42);
        assert_eq!(cells[0]["date"], "2024-05-26");
        assert_eq!(cells[6]["is_current_month"], true);

        let (s, err) = call(&app, "GET", "/api/v1/calendar/2024/13", None).await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn configured_token_is_enforced() {
        let app = router(state_with_token(Some("s3cret-token")));

        let response = app
            .clone()
            .oneshot(make_request("GET", "/api/v1/doctors", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(make_request("GET", "/api/v1/doctors", None, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(make_request("GET", "/api/v1/doctors", None, Some("s3cret-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invoice_totals_are_computed_server_side() {
        let app = router(state_with_token(None));
        let (patient, _, _) = seed(&app).await;
        let (s, inv) = call(
            &app,
            "POST",
            "/api/v1/invoices",
            Some(json!({
                "patient_id": patient,
                "issue_date": "2024-03-01",
                "due_date": "2024-03-31",
                "subtotal_cents": 10000,
                "description": "Cleaning",
            })),
        )
        .await;
        assert_eq!(s, StatusCode::OK, "{inv}");
        assert_eq!(inv["data"]["invoice_number"], "INV-2024-001");
        assert_eq!(inv["data"]["tax_amount_cents"], 2200);
        assert_eq!(inv["data"]["total_cents"], 12200);
        assert_eq!(inv["data"]["status"], "draft");
    }
}
