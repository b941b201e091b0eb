//! In-process server harness.

use relay_server::{build_router, ServerState};
use std::net::SocketAddr;
use std::time::Duration;

/// An axum server bound to an ephemeral port, serving a [`ServerState`].
pub struct TestServer {
    addr: SocketAddr,
    root: String,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Bind `127.0.0.1:0` and serve the state in a background task.
    pub async fn start(state: ServerState) -> TestServer {
        let root = state.config.root_path.clone();
        let router = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test server");
        let addr = listener.local_addr().expect("listener address");
        let accept_task = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("server error");
        });
        // Give the server a moment to start accepting connections.
        tokio::time::sleep(Duration::from_millis(20)).await;
        TestServer {
            addr,
            root,
            accept_task,
        }
    }

    /// Stop accepting new connections (the listener closes; connections
    /// already established keep their own tasks).
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://…/{root}` — the canonical invocation path.
    pub fn http_url(&self) -> String {
        format!("http://{}/{}", self.addr, self.root)
    }

    /// `ws://…/{root}` — the bidirectional endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/{}", self.addr, self.root)
    }

    /// `http://…/{root}/{name}` — a discovery document.
    pub fn doc_url(&self, name: &str) -> String {
        format!("http://{}/{}/{}", self.addr, self.root, name)
    }
}
