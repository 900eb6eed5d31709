use axum::response::IntoResponse;

// axum handler for the bare root, undocumented on purpose
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
