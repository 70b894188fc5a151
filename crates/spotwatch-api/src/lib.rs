//! spotwatch-api — the exporter's HTTP surface.
//!
//! Two routes: the configured metrics path runs a full scrape and renders
//! it as Prometheus text, and `/` serves a small landing page pointing at
//! it. Scrapes are driven entirely by the monitoring system's pulls; the
//! exporter never collects in the background.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;

use spotwatch_collector::{TerminationCollector, render};
use spotwatch_metadata::MetadataSource;

/// Shared state for the exporter routes.
pub struct ApiState<M> {
    collector: Arc<TerminationCollector<M>>,
    metrics_path: String,
}

impl<M> Clone for ApiState<M> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
            metrics_path: self.metrics_path.clone(),
        }
    }
}

/// Build the exporter router: the metrics path plus a landing page.
pub fn build_router<M>(collector: Arc<TerminationCollector<M>>, metrics_path: &str) -> Router
where
    M: MetadataSource + Send + Sync + 'static,
{
    let state = ApiState {
        collector,
        metrics_path: metrics_path.to_string(),
    };

    Router::new()
        .route(metrics_path, get(serve_metrics::<M>))
        .route("/", get(landing_page::<M>))
        .with_state(state)
}

/// GET on the metrics path: run one scrape and render it.
async fn serve_metrics<M>(State(state): State<ApiState<M>>) -> impl IntoResponse
where
    M: MetadataSource + Send + Sync + 'static,
{
    let readings = state.collector.collect().await;
    let body = render(state.collector.descriptors(), &readings);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /: landing page for humans who hit the exporter directly.
async fn landing_page<M>(State(state): State<ApiState<M>>) -> Html<String>
where
    M: MetadataSource + Send + Sync + 'static,
{
    Html(format!(
        "<html>\n<head><title>spotwatch</title></head>\n<body>\n\
         <h1>spotwatch</h1>\n<p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>",
        state.metrics_path
    ))
}
