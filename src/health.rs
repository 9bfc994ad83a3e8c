//! # Health Endpoint
//!
//! `GET /health` and `GET /api/v1/health` report liveness, session load and the
//! conversation counters.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let active = state.registry.active_count();
    let limit = state.registry.capacity();

    // Still healthy when full; new connections just get a 503.
    let load = if state.registry.is_full() {
        "saturated"
    } else {
        "normal"
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "sessions": {
            "active": active,
            "limit": limit,
            "load": load,
        },
        "metrics": {
            "sessions_opened": metrics.sessions_opened,
            "sessions_rejected": metrics.sessions_rejected,
            "utterances": metrics.utterances,
            "turns_completed": metrics.turns_completed,
            "turns_failed": metrics.turns_failed,
            "malformed_frames": metrics.malformed_frames,
        },
        "memory": get_memory_info(),
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };
            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn reports_sessions_and_counters() {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 2;
        let state = test_state(config);
        state.registry.register(None).unwrap();
        state.record(|m| {
            m.sessions_opened += 1;
            m.turns_completed += 3;
            m.turns_failed += 1;
        });

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/health", web::get().to(health_check))
                .service(web::scope("/api/v1").route("/health", web::get().to(health_check))),
        )
        .await;

        for uri in ["/health", "/api/v1/health"] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

            assert_eq!(body["status"], "healthy");
            assert_eq!(body["sessions"]["active"], 1);
            assert_eq!(body["sessions"]["limit"], 2);
            assert_eq!(body["sessions"]["load"], "normal");
            assert_eq!(body["metrics"]["sessions_opened"], 1);
            assert_eq!(body["metrics"]["turns_completed"], 3);
            assert_eq!(body["metrics"]["turns_failed"], 1);
        }
    }

    #[actix_web::test]
    async fn full_registry_is_saturated() {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 1;
        let state = test_state(config);
        state.registry.register(None).unwrap();

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["sessions"]["load"], "saturated");
    }
}
