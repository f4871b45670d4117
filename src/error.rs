use std::net::SocketAddr;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MockAgentError {
    #[error("failed to bind to address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("agent timed out starting up after {limit:?}")]
    StartTimeout { limit: Duration },

    #[error("server task panicked")]
    TaskPanic(#[from] tokio::task::JoinError),

    #[error("server error: {0}")]
    Server(String),

    #[error("timed out after {waited:?} waiting for a matching message{}", predicate_errors(.errors))]
    AssertionTimeout {
        waited: Duration,
        errors: Vec<String>,
    },

    #[error("agent stopped before the assertion was satisfied{}", predicate_errors(.errors))]
    AgentStopped { errors: Vec<String> },

    #[error("failed to decode msgpack trace payload: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("failed to decode JSON payload: {0}")]
    JsonDecode(#[from] serde_json::Error),

    #[error("failed to decode protobuf payload: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("failed to encode response: {0}")]
    Encode(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("child process stdio was not captured")]
    ChildStdioUnavailable,

    #[error("child process exited with {} before signalling readiness", exit_code(.code))]
    ExitedBeforeReady { code: Option<i32> },

    #[error("child process reported a startup error: {reason}")]
    ChildFailed { reason: String },

    #[error("child process did not signal readiness within {limit:?}")]
    ReadyTimeout { limit: Duration },

    #[error("child process exited with {}", exit_code(.code))]
    UnexpectedExit { code: Option<i32> },

    #[error("sandbox install command failed with {status}: {stderr}")]
    InstallFailed { status: ExitStatus, stderr: String },

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn predicate_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(", additionally:\n{}\n===", errors.join("\n"))
    }
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
