//! Manual job triggers

use axum::{extract::State, Json};

use crate::{error::AppResult, jobs::JobReport, AppState};

/// Run the overdue reminder job now and return its report.
///
/// Safe to call while the scheduled run is active; the dedup ledger keeps
/// reminders to one per loan per day.
pub async fn run_overdue_reminders(State(state): State<AppState>) -> AppResult<Json<JobReport>> {
    tracing::info!("Overdue reminder run requested");
    let report = state.services.reminders.trigger().await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use crate::{
        api::create_router,
        config::AppConfig,
        jobs::testing::{loan, seeded_store},
        services::{ledger::InMemoryLedger, notification::LogChannel, Services},
        AppState,
    };

    fn app() -> axum::Router {
        let config = AppConfig::default();
        let today = Utc::now().date_naive();
        let store = seeded_store();
        store.put_loan(loan(1, 1, Some(today - Duration::days(4)), false));
        store.put_loan(loan(2, 2, Some(today), false));

        let (services, _pending) = Services::new(
            store,
            Arc::new(InMemoryLedger::new()),
            Arc::new(LogChannel),
            &config,
        );
        create_router(AppState {
            config: Arc::new(config),
            services: Arc::new(services),
        })
    }

    async fn post_json(app: axum::Router) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/jobs/overdue-reminders")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_trigger_returns_report() {
        let app = app();

        let (status, body) = post_json(app.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed"], 1);
        assert_eq!(body["skipped"], 0);
        assert_eq!(body["date"], Utc::now().date_naive().to_string());

        let (_, body) = post_json(app).await;
        assert_eq!(body["processed"], 0);
        assert_eq!(body["skipped"], 1);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        for uri in ["/api/v1/health", "/api/v1/ready"] {
            let response = app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
