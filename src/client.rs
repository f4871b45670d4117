//! HTTP helpers for driving spawned applications.

use std::time::Duration;

use crate::agent::{AgentHandle, CollectedMessage};
use crate::error::MockAgentError;

/// Issues a GET request and returns the response status and body.
pub async fn fetch(url: &str) -> Result<(reqwest::StatusCode, String), MockAgentError> {
    let response = reqwest::get(url).await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// Registers a message assertion, then issues a GET request expected to make
/// the instrumented application flush toward the agent.
///
/// The assertion is registered before the request goes out, so a flush
/// triggered by the request cannot be missed.
///
/// # Example
///
/// ```no_run
/// # use mock_agent::{MockAgent, request_and_assert_message};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let agent = MockAgent::default().start().await?;
/// # let app_url = "http://localhost:3000";
/// request_and_assert_message(
///     &agent,
///     app_url,
///     |msg| {
///         msg.traces()
///             .map(|_| ())
///             .ok_or_else(|| "expected a trace payload".to_string())
///     },
///     None,
///     1,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn request_and_assert_message<F>(
    agent: &AgentHandle,
    url: &str,
    predicate: F,
    timeout: Option<Duration>,
    expected_count: usize,
) -> Result<(), MockAgentError>
where
    F: FnMut(&CollectedMessage) -> Result<(), String> + Send,
{
    let assertion = agent.assert_message_received(predicate, timeout, expected_count);
    fetch(url).await?;
    assertion.await
}
