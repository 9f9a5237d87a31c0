//! Pipe handler: spawn a local executable and feed it the event.
//!
//! The event is serialized to JSON and written to the child's stdin.
//! The child is spawned with `kill_on_drop`, so an expired deadline or
//! a cancelled dispatch terminates the process instead of leaking it.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::DispatchError;
use crate::event::Event;

pub(crate) async fn dispatch(
    handler: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    event: &Event,
) -> Result<(), DispatchError> {
    let payload = serde_json::to_vec(event).map_err(|e| DispatchError::Io {
        handler: handler.to_string(),
        message: format!("event serialization: {}", e),
    })?;

    let mut child = Command::new(command)
        .args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DispatchError::Io {
            handler: handler.to_string(),
            message: format!("spawn '{}': {}", command, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&payload).await.map_err(|e| DispatchError::Io {
            handler: handler.to_string(),
            message: format!("write to stdin: {}", e),
        })?;
        // Closing stdin lets line-oriented children see EOF and exit.
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| DispatchError::Io {
            handler: handler.to_string(),
            message: format!("wait for child: {}", e),
        })?;

    if output.status.success() {
        tracing::debug!(
            handler = %handler,
            command = %command,
            stdout_bytes = output.stdout.len(),
            "Pipe handler completed"
        );
        Ok(())
    } else {
        let status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(DispatchError::NonZeroExit {
            handler: handler.to_string(),
            status,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_ok() {
        let event = Event::fixture("server-01", "check_cpu");
        let result = dispatch("cat", "cat", &[], &HashMap::new(), &event).await;
        assert!(result.is_ok(), "cat should consume stdin: {:?}", result);
    }

    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let event = Event::fixture("server-01", "check_cpu");
        let args = vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()];
        let result = dispatch("failing", "sh", &args, &HashMap::new(), &event).await;

        match result {
            Err(DispatchError::NonZeroExit {
                handler,
                status,
                stderr,
            }) => {
                assert_eq!(handler, "failing");
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_an_io_error() {
        let event = Event::fixture("server-01", "check_cpu");
        let result = dispatch(
            "ghost",
            "/nonexistent/handler-binary",
            &[],
            &HashMap::new(),
            &event,
        )
        .await;
        assert!(matches!(result, Err(DispatchError::Io { .. })));
    }

    #[tokio::test]
    async fn child_receives_event_json_on_stdin() {
        let event = Event::fixture("server-01", "check_cpu");
        // grep -q exits 0 only when the pattern is found on stdin.
        let args = vec!["-q".to_string(), "server-01".to_string()];
        let result = dispatch("grep", "grep", &args, &HashMap::new(), &event).await;
        assert!(result.is_ok(), "event JSON should reach stdin: {:?}", result);
    }
}
