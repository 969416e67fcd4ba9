//! On-demand producer source
//!
//! Instead of polling a persisted artifact, the deployment runs the upstream
//! recommendation producer per request. [`CommandProducer`] runs it as an
//! external program: the caller request goes to stdin as JSON, the result is
//! read from stdout.

use async_trait::async_trait;
use recsync_common::{CallerRequest, RawResult};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{SourceError, SourceReader};

/// Upstream computation that turns caller inputs into a raw result
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    async fn produce(&self, request: &CallerRequest) -> Result<RawResult, SourceError>;
}

/// Adapts a [`Producer`] to the [`SourceReader`] capability
pub struct ProducerSource<P> {
    producer: P,
}

impl<P: Producer> ProducerSource<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl<P: Producer> SourceReader for ProducerSource<P> {
    fn mode(&self) -> &'static str {
        "producer"
    }

    async fn read_latest(&self, request: &CallerRequest) -> Result<RawResult, SourceError> {
        debug!(producer = %self.producer.name(), user_id = %request.user_id(), "Invoking producer");
        self.producer.produce(request).await
    }
}

/// Runs an external producer program per request
///
/// The child is killed if the read is dropped (caller timeout or cancel).
#[derive(Debug, Clone)]
pub struct CommandProducer {
    program: String,
    args: Vec<String>,
}

impl CommandProducer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Producer for CommandProducer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn produce(&self, request: &CallerRequest) -> Result<RawResult, SourceError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| SourceError::Unavailable(format!("Failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SourceError::Unavailable(format!("Producer program not found: {}", self.program))
                }
                _ => SourceError::Unavailable(format!("Failed to start producer: {}", e)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A producer that ignores stdin may exit before we finish writing
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(SourceError::Unavailable(format!(
                        "Failed to write producer input: {}",
                        e
                    )));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SourceError::Unavailable(format!("Producer did not complete: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Unavailable(format!(
                "Producer exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        parse_output(&output.stdout)
    }
}

/// Interpret producer stdout
///
/// JSON objects become mappings, other JSON values become scalars, and
/// non-JSON text is kept as a string scalar.
pub fn parse_output(stdout: &[u8]) -> Result<RawResult, SourceError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| SourceError::Corrupt(format!("Producer output is not UTF-8: {}", e)))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Empty("Producer returned no output".to_string()));
    }

    Ok(match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => RawResult::from(value),
        Err(_) => RawResult::Scalar(Value::String(trimmed.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_is_mapping() {
        let raw = parse_output(br#"{"temp": 80, "humidity": 45}"#).unwrap();
        assert_eq!(raw, RawResult::from(json!({"temp": 80, "humidity": 45})));
    }

    #[test]
    fn test_parse_plain_text_is_scalar() {
        let raw = parse_output(b"Take a 15 minute sauna\n").unwrap();
        assert_eq!(raw, RawResult::Scalar(json!("Take a 15 minute sauna")));
    }

    #[test]
    fn test_parse_number_is_scalar() {
        assert_eq!(parse_output(b"42").unwrap(), RawResult::Scalar(json!(42)));
    }

    #[test]
    fn test_parse_empty_is_empty() {
        assert!(matches!(parse_output(b"  \n"), Err(SourceError::Empty(_))));
    }

    #[test]
    fn test_parse_non_utf8_is_corrupt() {
        assert!(matches!(parse_output(&[0xff, 0xfe, 0x00]), Err(SourceError::Corrupt(_))));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str) -> ProducerSource<CommandProducer> {
            ProducerSource::new(CommandProducer::new(
                "sh",
                vec!["-c".to_string(), script.to_string()],
            ))
        }

        fn caller() -> CallerRequest {
            CallerRequest::new("alice", Some(1200), Some(64.0)).unwrap()
        }

        #[tokio::test]
        async fn test_request_is_passed_on_stdin() {
            let raw = sh("cat").read_latest(&caller()).await.unwrap();
            let RawResult::Mapping(map) = raw else {
                panic!("expected mapping");
            };
            assert_eq!(map["user_id"], json!("alice"));
            assert_eq!(map["steps"], json!(1200));
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_unavailable() {
            let err = sh("echo boom >&2; exit 3").read_latest(&caller()).await.unwrap_err();
            match err {
                SourceError::Unavailable(msg) => assert!(msg.contains("boom"), "{}", msg),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_silent_producer_is_empty() {
            let err = sh("true").read_latest(&caller()).await.unwrap_err();
            assert!(matches!(err, SourceError::Empty(_)));
        }

        #[tokio::test]
        async fn test_missing_program_is_unavailable() {
            let source = ProducerSource::new(CommandProducer::new(
                "/nonexistent/recsync-producer",
                Vec::new(),
            ));
            let err = source.read_latest(&caller()).await.unwrap_err();
            assert!(matches!(err, SourceError::Unavailable(_)));
        }
    }
}
