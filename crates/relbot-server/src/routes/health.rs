/// GET /healthz: liveness check.
pub async fn healthz() -> &'static str {
    "ok"
}
