//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the health endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use resurgent::api::create_app;
use resurgent::{HealthCheckConfig, RegistrationOptions, ResilientService, ServiceRegistry, UnitKey};

struct Worker {
    fail: bool,
}

#[async_trait]
impl ResilientService for Worker {
    fn name(&self) -> &str {
        "Worker"
    }

    async fn perform_iteration(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

fn options() -> RegistrationOptions {
    RegistrationOptions {
        loop_delay: Duration::from_secs(1),
        exception_window: Duration::from_secs(60),
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(start_paused = true)]
async fn health_reflects_running_units() {
    let registry = Arc::new(ServiceRegistry::with_system_clock());
    registry
        .register("ok", Arc::new(Worker { fail: false }), options())
        .unwrap();
    registry
        .register("broken", Arc::new(Worker { fail: true }), options())
        .unwrap();
    registry
        .add_health_check("ok", HealthCheckConfig::default(), Some("ok".into()), &[])
        .unwrap();
    registry
        .add_health_check("broken", HealthCheckConfig::default(), Some("broken".into()), &[])
        .unwrap();

    registry.start(&CancellationToken::new());
    let mut rx = registry.subscribe(&UnitKey::new("broken")).unwrap();
    rx.wait_for(|s| s.iterations >= 2).await.unwrap();

    let app = create_app(registry.clone());

    let (status, json) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Degraded");
    assert_eq!(json["checks"]["ok"]["status"], "Healthy");
    assert_eq!(json["checks"]["broken"]["data"]["exceptionsInWindow"], 2);
    assert_eq!(json["loops"]["broken"]["failures"], 2);

    let (status, json) = get(app.clone(), "/health/broken").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["exceptionSubStatus"], "Degraded");
    assert_eq!(
        json["data"]["lastHeartbeat"]["error"],
        "disk full"
    );

    rx.wait_for(|s| s.iterations >= 5).await.unwrap();
    let (status, json) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "Unhealthy");

    registry.stop(&CancellationToken::new()).await;
}
