//! A mock APM trace agent and assertion harness for integration-testing
//! tracing clients.
//!
//! This library provides a fake trace agent that accepts the ingestion
//! endpoints of a real one — msgpack trace submissions, JSON telemetry,
//! multipart profiling uploads, remote configuration polls, and OTLP trace
//! exports — and an assertion API for awaiting the payloads an instrumented
//! application sends to it. It also ships the collaborators integration
//! tests need around the agent: a sandbox provisioner and a child-process
//! spawner with a typed readiness handshake.
//!
//! # Features
//!
//! - **Full ingestion surface**: `/v0.4/traces`, telemetry, profiling,
//!   remote config, and OTLP (`/v1/traces`, JSON or protobuf)
//! - **Assertion correlator**: "eventually N messages match this predicate",
//!   with every predicate failure reported if the deadline elapses
//! - **Per-test isolation**: each agent carries its own configuration, port,
//!   and lifecycle handle
//! - **Channel-based fan-out**: assertions drain a broadcast subscription in
//!   strict receipt order
//! - **Process spawning**: readiness handshake, exit-code reporting,
//!   expected-exit runs
//! - **Graceful shutdown**: idempotent `stop()`, nothing emits afterwards
//!
//! # Quick Start
//!
//! ```no_run
//! use mock_agent::MockAgent;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut agent = MockAgent::default().start().await?;
//!
//!     // Point the instrumented application at agent.url() and exercise it...
//!
//!     agent
//!         .assert_message_received(
//!             |msg| {
//!                 let traces = msg.traces().ok_or("expected a trace payload")?;
//!                 let span = &traces[0][0];
//!                 if span.name == "web.request" {
//!                     Ok(())
//!                 } else {
//!                     Err(format!("unexpected span name {}", span.name))
//!                 }
//!             },
//!             Some(Duration::from_secs(10)),
//!             1,
//!         )
//!         .await?;
//!
//!     agent.stop().await?;
//!     Ok(())
//! }
//! ```

mod agent;
mod client;
mod config;
mod error;
mod sandbox;
mod server;
mod spawn;

pub use agent::{
    AgentHandle, CollectedMessage, MockAgent, Payload, ProfileAttachment, RemoteConfigFile,
    SpanRecord, TelemetryMessage, TelemetryPayload, TracePayload,
};
pub use client::{fetch, request_and_assert_message};
pub use config::{
    AgentConfig, AgentConfigBuilder, DEFAULT_ASSERTION_TIMEOUT, DEFAULT_START_TIMEOUT,
};
pub use error::MockAgentError;
pub use sandbox::{Sandbox, SandboxBuilder};
pub use spawn::{DEFAULT_READY_TIMEOUT, Handshake, ProcessHandle, run_to_exit};
