// ABOUTME: GET /metrics — Prometheus text exposition of the counters and gauges the gateway
// ABOUTME: records: agents registered/evicted, requests routed/failed, ledger writes, SSE streams.

use metrics_exporter_prometheus::PrometheusHandle;

pub async fn render(handle: PrometheusHandle) -> String {
    handle.render()
}
