pub(crate) mod messages;
pub(crate) mod remote_config;

pub use messages::{
    CollectedMessage, Payload, ProfileAttachment, SpanRecord, TelemetryMessage, TelemetryPayload,
    TracePayload,
};
pub use remote_config::RemoteConfigFile;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::{AgentConfig, DEFAULT_ASSERTION_TIMEOUT};
use crate::error::MockAgentError;
use crate::server::{AgentState, build_router};
use remote_config::StoredConfigFile;

/// A mock trace agent for testing.
///
/// Accepts the ingestion endpoints of a real trace agent (msgpack trace
/// submissions, JSON telemetry, multipart profiling uploads, remote
/// configuration polls, and OTLP exports) and re-emits each decoded payload
/// to the assertions registered on its [`AgentHandle`].
pub struct MockAgent {
    config: AgentConfig,
}

impl MockAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Starts the agent and returns a handle for interacting with it.
    ///
    /// Binds within the configured startup timeout and resolves once the
    /// listener is accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or exceeds the startup timeout.
    pub async fn start(self) -> Result<AgentHandle, MockAgentError> {
        let (messages_tx, _) = broadcast::channel(self.config.channel_capacity);
        let (telemetry_tx, _) = broadcast::channel(self.config.channel_capacity);
        let remote_config = Arc::new(RwLock::new(Vec::new()));

        let app = build_router(AgentState {
            messages: messages_tx.clone(),
            telemetry: telemetry_tx.clone(),
            remote_config: Arc::clone(&remote_config),
        });

        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = tokio::time::timeout(self.config.start_timeout, TcpListener::bind(addr))
            .await
            .map_err(|_| MockAgentError::StartTimeout {
                limit: self.config.start_timeout,
            })?
            .map_err(|source| MockAgentError::Bind { addr, source })?;
        let bound_addr = listener
            .local_addr()
            .map_err(|source| MockAgentError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .map_err(|e| MockAgentError::Server(e.to_string()))
        });

        Ok(AgentHandle {
            addr: bound_addr,
            messages: messages_tx,
            telemetry: telemetry_tx,
            remote_config,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

/// A handle to a running mock agent.
///
/// Use this to register assertions, manage remote configuration, and shut
/// the agent down. Dropping the handle shuts the server down best-effort;
/// call [`AgentHandle::stop`] to wait for it.
pub struct AgentHandle {
    addr: SocketAddr,
    messages: broadcast::Sender<CollectedMessage>,
    telemetry: broadcast::Sender<TelemetryMessage>,
    remote_config: Arc<RwLock<Vec<StoredConfigFile>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), MockAgentError>>>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("addr", &self.addr)
            .field("stopped", &self.task.is_none())
            .finish()
    }
}

impl AgentHandle {
    /// Returns the actual bound address of the agent.
    ///
    /// This is useful when using port 0 for OS-assigned ports.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the base URL instrumented applications should be pointed at.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Subscribes to the raw message channel.
    ///
    /// Receives every trace, profiling, and OTLP message emitted after the
    /// call, in emission order.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<CollectedMessage> {
        self.messages.subscribe()
    }

    /// Subscribes to the raw telemetry channel.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryMessage> {
        self.telemetry.subscribe()
    }

    /// Adds a config file to be returned by the remote configuration endpoint.
    pub async fn add_remote_config(&self, file: RemoteConfigFile) {
        self.remote_config.write().await.push(file.into());
    }

    /// Removes any config added by calls to [`AgentHandle::add_remote_config`].
    pub async fn reset_remote_config(&self) {
        self.remote_config.write().await.clear();
    }

    /// Waits until `expected_count` messages satisfying `predicate` have been
    /// observed.
    ///
    /// The subscription starts at the call itself, so the returned future
    /// sees every message emitted after this method returns, in receipt
    /// order. A predicate returning `Err` records the failure and keeps
    /// listening; late-arriving messages still get their chance to satisfy
    /// the expectation. If the deadline elapses first, the future rejects
    /// with [`MockAgentError::AssertionTimeout`] carrying every recorded
    /// predicate failure.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mock_agent::MockAgent;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let agent = MockAgent::default().start().await?;
    /// agent
    ///     .assert_message_received(
    ///         |msg| {
    ///             let traces = msg.traces().ok_or("expected a trace payload")?;
    ///             if traces[0][0].name == "web.request" {
    ///                 Ok(())
    ///             } else {
    ///                 Err(format!("unexpected span name {}", traces[0][0].name))
    ///             }
    ///         },
    ///         None,
    ///         1,
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn assert_message_received<F>(
        &self,
        mut predicate: F,
        timeout: Option<Duration>,
        expected_count: usize,
    ) -> impl Future<Output = Result<(), MockAgentError>> + Send + use<F>
    where
        F: FnMut(&CollectedMessage) -> Result<(), String> + Send,
    {
        let rx = self.messages.subscribe();
        let timeout = timeout.unwrap_or(DEFAULT_ASSERTION_TIMEOUT);
        correlate(rx, move |msg| Some(predicate(msg)), timeout, expected_count)
    }

    /// Waits until `expected_count` telemetry messages of the given
    /// `request_type` satisfying `predicate` have been observed.
    ///
    /// Telemetry with a different `request_type` is skipped before the
    /// predicate runs and does not count toward the expectation.
    pub fn assert_telemetry_received<F, R>(
        &self,
        mut predicate: F,
        timeout: Option<Duration>,
        request_type: R,
        expected_count: usize,
    ) -> impl Future<Output = Result<(), MockAgentError>> + Send + use<F, R>
    where
        F: FnMut(&TelemetryMessage) -> Result<(), String> + Send,
        R: Into<String>,
    {
        let rx = self.telemetry.subscribe();
        let timeout = timeout.unwrap_or(DEFAULT_ASSERTION_TIMEOUT);
        let request_type = request_type.into();
        correlate(
            rx,
            move |msg| {
                if msg.payload.request_type != request_type {
                    return None;
                }
                Some(predicate(msg))
            },
            timeout,
            expected_count,
        )
    }

    /// Shuts the agent down and waits for the server task to finish.
    ///
    /// Idempotent: calling `stop` on an already-stopped agent does nothing.
    /// Once it returns, no further messages can be emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task panicked or failed.
    pub async fn stop(&mut self) -> Result<(), MockAgentError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?
        } else {
            Ok(())
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Drains a subscription, applying `accept` to each message in receipt
/// order. `None` skips the message entirely; `Some(Ok)` counts one success;
/// `Some(Err)` records the failure for the timeout report.
async fn correlate<T, F>(
    mut rx: broadcast::Receiver<T>,
    mut accept: F,
    timeout: Duration,
    expected_count: usize,
) -> Result<(), MockAgentError>
where
    T: Clone,
    F: FnMut(&T) -> Option<Result<(), String>>,
{
    if expected_count == 0 {
        return Ok(());
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut errors = Vec::new();
    let mut matched = 0usize;

    loop {
        let msg = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => {
                return Err(MockAgentError::AssertionTimeout {
                    waited: timeout,
                    errors,
                });
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                return Err(MockAgentError::AgentStopped { errors });
            }
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "assertion fell behind the agent event channel");
                continue;
            }
            Ok(Ok(msg)) => msg,
        };

        match accept(&msg) {
            None => continue,
            Some(Ok(())) => {
                matched += 1;
                if matched >= expected_count {
                    return Ok(());
                }
            }
            Some(Err(error)) => errors.push(error),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(name: &str) -> CollectedMessage {
        CollectedMessage {
            headers: std::collections::HashMap::new(),
            payload: Payload::Traces(vec![vec![SpanRecord {
                trace_id: 1,
                span_id: 1,
                parent_id: 0,
                name: name.to_string(),
                resource: "res".to_string(),
                service: "svc".to_string(),
                span_type: None,
                error: 0,
                start: 0,
                duration: 1,
                meta: Default::default(),
                metrics: Default::default(),
            }]]),
            files: Vec::new(),
        }
    }

    fn match_name(expected: &'static str) -> impl FnMut(&CollectedMessage) -> Option<Result<(), String>> {
        move |msg| {
            let name = &msg.traces()?[0][0].name;
            Some(if name == expected {
                Ok(())
            } else {
                Err(format!("unexpected span name {name}"))
            })
        }
    }

    #[tokio::test]
    async fn test_correlate_resolves_on_match() {
        let (tx, rx) = broadcast::channel(8);
        let assertion = correlate(rx, match_name("a"), Duration::from_secs(1), 1);
        tx.send(message("a")).unwrap();
        assertion.await.unwrap();
    }

    #[tokio::test]
    async fn test_correlate_counts_successes_not_messages() {
        let (tx, rx) = broadcast::channel(8);
        let assertion = correlate(rx, match_name("a"), Duration::from_secs(1), 2);
        tx.send(message("wrong")).unwrap();
        tx.send(message("a")).unwrap();
        tx.send(message("a")).unwrap();
        assertion.await.unwrap();
    }

    #[tokio::test]
    async fn test_correlate_times_out_with_recorded_errors() {
        let (tx, rx) = broadcast::channel(8);
        let assertion = correlate(rx, match_name("a"), Duration::from_millis(100), 1);
        tx.send(message("wrong")).unwrap();
        let err = assertion.await.unwrap_err();
        match err {
            MockAgentError::AssertionTimeout { errors, .. } => {
                assert_eq!(errors, vec!["unexpected span name wrong".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_correlate_rejects_when_channel_closes() {
        let (tx, rx) = broadcast::channel(8);
        let assertion = correlate(rx, match_name("a"), Duration::from_secs(5), 1);
        drop(tx);
        let err = assertion.await.unwrap_err();
        assert!(matches!(err, MockAgentError::AgentStopped { .. }));
    }

    #[tokio::test]
    async fn test_correlate_zero_count_resolves_immediately() {
        let (_tx, rx) = broadcast::channel::<CollectedMessage>(8);
        correlate(rx, |_| Some(Ok(())), Duration::from_millis(10), 0)
            .await
            .unwrap();
    }
}
