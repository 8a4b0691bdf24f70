use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

/// Serve a fixed manifest document on an ephemeral port and return its URL.
pub async fn spawn_manifest_server(yaml: &'static str) -> String {
    let app = Router::new().route("/manifest.yml", get(move || async move { yaml }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/manifest.yml")
}

/// A URL on a port nothing listens on, for fetch-failure tests.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/manifest.yml")
}
