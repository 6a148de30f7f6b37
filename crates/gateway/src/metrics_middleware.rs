//! Request counters and latency per route template.

use std::time::Instant;

use {
    axum::{
        extract::{MatchedPath, Request},
        middleware::Next,
        response::Response,
    },
    kennel_metrics::{counter, gauge, histogram, http as http_metrics, labels},
};

/// Records `kennel_http_*` series. The endpoint label is the matched route
/// template (`/api/projects/{id}`), never the raw path.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let in_flight = gauge!(
        http_metrics::REQUESTS_IN_FLIGHT,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone()
    );
    in_flight.increment(1.0);

    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();

    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status.clone()
    )
    .increment(1);
    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint,
        labels::METHOD => method,
        labels::STATUS => status
    )
    .record(start.elapsed().as_secs_f64());
    in_flight.decrement(1.0);

    response
}
