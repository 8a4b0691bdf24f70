use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use gondola::config::{Config, StorageBackend};
use gondola::startup::build_app;

/// A full gondola instance serving on an ephemeral port, backed by a
/// local-directory bucket and a temp data directory. Dropping it tears
/// everything down.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    bucket_dir: tempfile::TempDir,
    _data_dir: tempfile::TempDir,
    _shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> TestApp {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a config tweak applied after the local-backend defaults.
    pub async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
        let bucket_dir = tempfile::TempDir::new().unwrap();
        let data_dir = tempfile::TempDir::new().unwrap();

        let mut config = Config::default();
        config.storage.backend = StorageBackend::Local;
        config.storage.bucket = bucket_dir.path().to_string_lossy().to_string();
        config.storage.prefix = None;
        config.catalog.data_dir = data_dir.path().to_path_buf();
        config.catalog.batch_size = 100;
        tweak(&mut config);

        let (app, shutdown_tx) = build_app(config).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestApp {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            bucket_dir,
            _data_dir: data_dir,
            _shutdown: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Seed the local bucket with files; nested names create directories.
    pub fn seed_bucket(&self, names: &[&str]) {
        for name in names {
            let path = self.bucket_dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, b"data").unwrap();
        }
    }

    /// Start a fetch, wait for it to finish, and return the snapshot name.
    pub async fn fetch_snapshot(&self) -> String {
        let resp = self
            .client
            .post(self.url("/v1/fetches"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202, "start fetch was not accepted");
        let body: serde_json::Value = resp.json().await.unwrap();
        let snapshot = body["snapshot"].as_str().unwrap().to_string();
        self.wait_for_idle().await;
        snapshot
    }

    /// Poll the status endpoint until no fetch is running.
    pub async fn wait_for_idle(&self) {
        for _ in 0..500 {
            let status: serde_json::Value = self
                .client
                .get(self.url("/v1/fetches/status"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["running"] == serde_json::Value::Bool(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fetch did not finish in time");
    }
}
