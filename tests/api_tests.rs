//! HTTP surface: routing, bearer auth and error mapping

mod common;

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use microlend_server::auth::AuthService;
    use microlend_server::models::{Actor, UserRole};
    use microlend_server::state::AppState;
    use microlend_server::websocket::WsState;

    use crate::common::Harness;

    struct TestApp {
        harness: Harness,
        auth: Arc<AuthService>,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let harness = Harness::new();
            let auth = Arc::new(AuthService::new("test-secret".to_string(), 900));
            let state = AppState::new(
                Arc::new(harness.engine.clone()),
                Arc::new(harness.reports.clone()),
                auth.clone(),
                WsState::new(harness.engine.events().clone()),
                None,
            );
            Self {
                harness,
                auth,
                router: microlend_server::app(state),
            }
        }

        fn token(&self, actor: Actor) -> String {
            self.auth.issue_token(actor.user_id, actor.role).unwrap()
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            actor: Option<Actor>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(actor) = actor {
                builder = builder.header("authorization", format!("Bearer {}", self.token(actor)));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn create_body() -> Value {
        json!({
            "amount": "10000",
            "purpose": "Inventory for grocery stall",
            "duration_days": 30
        })
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let app = TestApp::new();
        let (status, body) = app.send(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "not_configured");
        assert!(body["database_latency_ms"].is_null());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_tokens() {
        let app = TestApp::new();
        let (status, body) = app.send(Method::GET, "/api/loans", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "MISSING_TOKEN");

        let request = Request::builder()
            .uri("/api/loans")
            .header("authorization", "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_loan_flow_over_http() {
        let app = TestApp::new();
        let borrower = app.harness.user(UserRole::Borrower).await;
        let lender = app.harness.user(UserRole::Lender).await;

        let (status, body) = app
            .send(Method::POST, "/api/loans", Some(borrower), Some(create_body()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "pending");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .send(Method::GET, "/api/loans/pending", Some(lender), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 1);

        let (status, body) = app
            .send(Method::POST, &format!("/api/loans/{}/accept", id), Some(lender), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "accepted");

        let (status, body) = app
            .send(Method::POST, &format!("/api/loans/{}/cancel", id), Some(borrower), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ILLEGAL_TRANSITION");

        let (status, _) = app
            .send(Method::POST, &format!("/api/loans/{}/fulfill", id), Some(lender), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/loans/{}/repayments", id),
                Some(lender),
                Some(json!({ "amount": "11000", "payment_method": "upi" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "completed");

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/loans/{}/repayment", id),
                Some(lender),
                Some(json!({ "amount": "1", "payment_method": "cash" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_STATE");

        let (status, body) = app
            .send(Method::GET, &format!("/api/loans/{}/balance", id), Some(borrower), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let outstanding: Decimal = body["data"]["outstanding_balance"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(outstanding, Decimal::ZERO);

        let (status, _) = app
            .send(
                Method::POST,
                &format!("/api/loans/{}/rate", id),
                Some(borrower),
                Some(json!({ "rating": 5, "review": "Flexible and fair" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app
            .send(Method::GET, &format!("/api/loans/{}/activity", id), Some(borrower), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_validation_and_gate_errors() {
        let app = TestApp::new();
        let borrower = app.harness.user(UserRole::Borrower).await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/loans",
                Some(borrower),
                Some(json!({ "amount": "10000", "purpose": "", "duration_days": 30 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let stranger = Actor::new(Uuid::new_v4(), UserRole::Borrower);
        let (status, body) = app
            .send(Method::POST, "/api/loans", Some(stranger), Some(create_body()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, body) = app
            .send(
                Method::GET,
                &format!("/api/loans/{}", Uuid::new_v4()),
                Some(borrower),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let app = TestApp::new();
        let borrower = app.harness.user(UserRole::Borrower).await;
        let admin = app.harness.admin();
        let loan = app
            .harness
            .pending_loan(borrower, crate::common::PRINCIPAL)
            .await;

        let uri = format!("/api/admin/loans/{}/reject", loan.id);
        let (status, body) = app.send(Method::POST, &uri, Some(borrower), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, body) = app
            .send(
                Method::POST,
                &uri,
                Some(admin),
                Some(json!({ "reason": "Purpose not permitted" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "rejected");

        let (status, body) = app
            .send(
                Method::PUT,
                &format!("/api/admin/users/{}/verification", borrower.user_id),
                Some(admin),
                Some(json!({ "status": "rejected" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "rejected");

        let (status, body) = app
            .send(Method::POST, "/api/loans", Some(borrower), Some(create_body()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "NOT_VERIFIED");
    }

    #[tokio::test]
    async fn test_dispute_over_http() {
        let app = TestApp::new();
        let borrower = app.harness.user(UserRole::Borrower).await;
        let lender = app.harness.user(UserRole::Lender).await;
        let admin = app.harness.admin();
        let loan = app
            .harness
            .accepted_loan(borrower, lender, crate::common::PRINCIPAL)
            .await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/disputes",
                Some(borrower),
                Some(json!({
                    "loan_request_id": loan.id,
                    "against_user_id": lender.user_id,
                    "dispute_type": "terms_violation",
                    "description": "Lender asked for a higher rate after acceptance"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let dispute_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/loans/{}/fulfill", loan.id),
                Some(lender),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "LOAN_DISPUTED");

        let (status, body) = app.send(Method::GET, "/api/disputes", Some(lender), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = app
            .send(
                Method::PUT,
                &format!("/api/admin/disputes/{}", dispute_id),
                Some(admin),
                Some(json!({ "status": "resolved", "outcome": "continue" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/loans/{}/fulfill", loan.id),
                Some(lender),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "fulfilled");
    }
}
