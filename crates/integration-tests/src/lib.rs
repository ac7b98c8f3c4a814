//! Harness for end-to-end tests: a real server on an ephemeral port and a client for it.

pub mod app;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use config::Config;
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Test client for making HTTP requests to the test server
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Start building a request to the given path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Ask the forward-auth endpoint about a request, as a reverse proxy would.
    pub async fn forward_auth(&self, uri: &str, client_ip: &str, user: Option<&str>) -> reqwest::Response {
        let mut request = self
            .request(reqwest::Method::GET, "/auth")
            .header("x-forwarded-uri", uri)
            .header("x-forwarded-for", client_ip);

        if let Some(user) = user {
            request = request.header("x-authenticated-user", user);
        }

        request.send().await.unwrap()
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with the given TOML configuration and the demo application routes.
    pub async fn start(config_toml: &str) -> Self {
        Self::start_with_app(config_toml, app::router()).await
    }

    /// Start a server with the given TOML configuration and application routes.
    pub async fn start_with_app(config_toml: &str, app: Router) -> Self {
        let config: Config = toml::from_str(config_toml).unwrap();

        if let Err(e) = config.validate() {
            unreachable!("invalid test configuration: {e}");
        }

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            app,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Ok(Err(e)) = rx.try_recv() {
            eprintln!("Server failed to start: {e}");
            std::process::exit(1);
        }

        let client = TestClient::new(format!("http://{address}"));

        // Verify the server is actually running by making a simple request
        let mut retries = 10;
        while retries > 0 {
            let probe = client.request(reqwest::Method::GET, "/").send();

            if let Ok(Ok(_)) = timeout(Duration::from_millis(100), probe).await {
                break;
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client,
            address,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
