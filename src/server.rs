use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::{RawQuery, State},
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::relay::{RedirectRequest, RelayResponse, RelayResult, handle_redirect};
use crate::{RelayConfig, RelayError, RelayPages};

type SharedResultSender = Arc<Mutex<Option<oneshot::Sender<RelayResult>>>>;

/// Short-lived HTTP listener that captures one provider redirect and relays
/// the result to the caller holding the [`RelayHandle`].
#[derive(Debug, Clone)]
pub struct RelayServer {
    config: RelayConfig,
    pages: RelayPages,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let pages = RelayPages::new(config.target_origin.clone());
        Self { config, pages }
    }

    /// Relay on `127.0.0.1` with the given port and callback path. Port 0
    /// binds an ephemeral port, reported by [`RelayHandle::local_addr`].
    pub fn loopback(port: u16, path: impl Into<String>) -> Self {
        Self::new(RelayConfig::new("127.0.0.1", port, path))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn with_failure_html(mut self, html: impl Into<String>) -> Self {
        self.pages = self.pages.with_failure_html(html);
        self
    }

    pub fn with_completed_html(mut self, html: impl Into<String>) -> Self {
        self.pages = self.pages.with_completed_html(html);
        self
    }

    /// Bind the configured endpoint and start serving.
    ///
    /// Binding happens on the calling task so an occupied port surfaces here
    /// as [`RelayError::Bind`] instead of inside the server task.
    pub async fn start(&self) -> Result<RelayHandle, RelayError> {
        let path = self.config.path.clone();
        if path.contains(['{', '}']) {
            return Err(RelayError::InvalidCallbackPath(path));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let listener = TokioTcpListener::from_std(listener)?;

        let (result_tx, result_rx) = oneshot::channel::<RelayResult>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = RelayState {
            callback_path: Arc::from(path.as_str()),
            pages: Arc::new(self.pages.clone()),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        };

        // The browser may also reach the relay via fetch from the opener's
        // page rather than only by top-level redirect, so CORS stays open.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route(&path, get(callback_handler))
            .fallback(fallback_handler)
            .with_state(state)
            .layer(cors);

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let server = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "relay server terminated with an error");
            }
        });

        info!("redirect relay listening at http://{local_addr}{path}");

        Ok(RelayHandle {
            local_addr,
            callback_path: path,
            timeout: self.config.timeout,
            result_rx: Some(result_rx),
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }
}

/// Owner side of one relay session: the listening socket, the pending result,
/// and shutdown. Dropping the handle also shuts the server down.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    callback_path: String,
    timeout: Option<Duration>,
    result_rx: Option<oneshot::Receiver<RelayResult>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address to register with the identity provider as redirect URI.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}{}", self.local_addr, self.callback_path)
    }

    /// Wait for the first authoritative redirect. Honors the configured
    /// timeout. A second call returns [`RelayError::ChannelClosed`]; the
    /// result was already consumed.
    pub async fn wait(&mut self) -> Result<RelayResult, RelayError> {
        let result_rx = self.result_rx.take().ok_or(RelayError::ChannelClosed)?;
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, result_rx).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(_)) => Err(RelayError::ChannelClosed),
                Err(_) => Err(RelayError::Timeout { timeout }),
            },
            None => result_rx.await.map_err(|_| RelayError::ChannelClosed),
        }
    }

    /// Release the listening socket. Idempotent: calling it again is a no-op.
    /// In-flight requests are not drained; anything arriving afterwards is
    /// refused at the transport level.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
    }
}

#[derive(Clone)]
struct RelayState {
    callback_path: Arc<str>,
    pages: Arc<RelayPages>,
    result_tx: SharedResultSender,
}

/// First in-flight request to take the sender wins; everyone after that is a
/// late duplicate.
fn deliver(result_tx: &SharedResultSender, result: RelayResult) -> bool {
    match result_tx.lock() {
        Ok(mut guard) => match guard.take() {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        },
        Err(_) => false,
    }
}

async fn callback_handler(
    State(state): State<RelayState>,
    RawQuery(query): RawQuery,
) -> Response {
    let request = RedirectRequest::new(state.callback_path.as_ref(), query.unwrap_or_default());
    let (result, response) = handle_redirect(&request, &state.callback_path, &state.pages);

    let Some(result) = result else {
        return page_response(response);
    };

    if !deliver(&state.result_tx, result.clone()) {
        debug!("redirect after the exchange completed, serving the already-completed page");
        return (
            StatusCode::OK,
            Html(state.pages.completed().to_string()),
        )
            .into_response();
    }

    match &result {
        RelayResult::Success { .. } => info!("authorization code received"),
        RelayResult::Failure { error } => {
            warn!(%error, "provider reported an authorization error");
        }
        RelayResult::Malformed { reason } => warn!(%reason, "malformed provider redirect"),
    }

    page_response(response)
}

async fn fallback_handler(State(state): State<RelayState>, uri: Uri) -> Response {
    debug!(path = %uri.path(), "request outside the callback path");
    (
        StatusCode::NOT_FOUND,
        Html(state.pages.not_found().to_string()),
    )
        .into_response()
}

fn page_response(response: RelayResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Html(response.body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RelayHandle, RelayServer};
    use crate::{RelayConfig, RelayError, RelayResult};

    async fn start_loopback() -> RelayHandle {
        RelayServer::loopback(0, "/").start().await.unwrap()
    }

    async fn get(url: String) -> (u16, String) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    fn success_code(result: RelayResult) -> String {
        match result {
            RelayResult::Success { code, .. } => code,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_code_to_the_waiting_caller() {
        let mut handle = start_loopback().await;

        let (status, body) = get(format!("http://{}/?code=abc123", handle.local_addr())).await;
        assert_eq!(status, 200);
        assert!(body.contains(r#""code":"abc123""#));
        assert!(body.contains(r#""type":"auth""#));
        assert!(body.contains("window.close()"));

        assert_eq!(success_code(handle.wait().await.unwrap()), "abc123");
        handle.stop().await;
    }

    #[tokio::test]
    async fn bare_redirect_renders_failure_page_without_script() {
        let mut handle = start_loopback().await;

        let (status, body) = get(format!("http://{}/", handle.local_addr())).await;
        assert_eq!(status, 200);
        assert!(body.contains("No auth code received"));
        assert!(!body.contains("postMessage"));

        assert!(matches!(
            handle.wait().await.unwrap(),
            RelayResult::Malformed { .. }
        ));
        handle.stop().await;
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_the_relay_keeps_listening() {
        let mut handle = start_loopback().await;

        let (status, _) = get(format!("http://{}/favicon.ico", handle.local_addr())).await;
        assert_eq!(status, 404);

        let (status, _) = get(format!("http://{}/?code=zzz", handle.local_addr())).await;
        assert_eq!(status, 200);
        assert_eq!(success_code(handle.wait().await.unwrap()), "zzz");
        handle.stop().await;
    }

    #[tokio::test]
    async fn callback_on_custom_path_only() {
        let mut handle = RelayServer::loopback(0, "callback").start().await.unwrap();
        assert!(handle.redirect_uri().ends_with("/callback"));

        let (status, _) = get(format!("http://{}/", handle.local_addr())).await;
        assert_eq!(status, 404);

        let (status, _) = get(format!("http://{}/callback?code=abc", handle.local_addr())).await;
        assert_eq!(status, 200);
        assert_eq!(success_code(handle.wait().await.unwrap()), "abc");
        handle.stop().await;
    }

    #[tokio::test]
    async fn duplicate_redirect_gets_the_completed_page() {
        let mut handle = start_loopback().await;
        let addr = handle.local_addr();

        let (_, first) = get(format!("http://{addr}/?code=first")).await;
        assert!(first.contains("postMessage"));

        let (status, second) = get(format!("http://{addr}/?code=second")).await;
        assert_eq!(status, 200);
        assert!(second.contains("Login already completed"));
        assert!(!second.contains("postMessage"));

        assert_eq!(success_code(handle.wait().await.unwrap()), "first");
        handle.stop().await;
    }

    #[tokio::test]
    async fn concurrent_redirects_yield_exactly_one_success() {
        let mut handle = start_loopback().await;
        let addr = handle.local_addr();

        let left = get(format!("http://{addr}/?code=left"));
        let right = get(format!("http://{addr}/?code=right"));
        let ((_, left), (_, right)) = tokio::join!(left, right);

        let winners = [&left, &right]
            .iter()
            .filter(|body| body.contains("postMessage"))
            .count();
        assert_eq!(winners, 1);

        let code = success_code(handle.wait().await.unwrap());
        let winner = if left.contains("postMessage") { &left } else { &right };
        assert!(winner.contains(&format!(r#""code":"{code}""#)));
        handle.stop().await;
    }

    #[tokio::test]
    async fn second_start_on_a_busy_port_is_a_bind_error() {
        let mut handle = start_loopback().await;
        let port = handle.local_addr().port();

        let err = RelayServer::loopback(port, "/").start().await.unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }));
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_frees_the_port() {
        let mut handle = start_loopback().await;
        let port = handle.local_addr().port();
        handle.stop().await;
        handle.stop().await;

        let mut handle = RelayServer::loopback(port, "/").start().await.unwrap();
        handle.stop().await;
    }

    #[tokio::test]
    async fn wait_times_out_when_the_provider_never_redirects() {
        let config =
            RelayConfig::new("127.0.0.1", 0, "/").with_timeout(Duration::from_millis(50));
        let mut handle = RelayServer::new(config).start().await.unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }));
        handle.stop().await;
    }
}
