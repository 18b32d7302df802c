//! Line-delimited JSON request/response over a pair of byte streams.
//!
//! The channel is half-duplex: the client writes one request line and reads
//! exactly one response line before sending the next. Both sides flush after
//! every line. Logs must never go to the server's stdout.

use std::ffi::OsStr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CommandHandler, StdioRequest, StdioResponse, UNKNOWN_ID};
use crate::error::TransportError;

/// How long a server gets to exit after its stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Serve requests from `reader` until it reaches end of input.
///
/// Malformed lines are answered with an error response; the loop only ends
/// when the input closes or the output can no longer be written.
pub async fn serve<R, W>(
    handler: &dyn CommandHandler,
    reader: R,
    mut writer: W,
) -> Result<(), TransportError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();
    info!("stdio server listening");

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let response = match std::str::from_utf8(&buf) {
            Ok(line) => handle_line(handler, line.trim_end_matches(['\n', '\r'])).await,
            Err(e) => {
                warn!(error = %e, "request line is not valid UTF-8");
                StdioResponse::error(UNKNOWN_ID, "invalid UTF-8 request")
            }
        };

        let mut encoded = serde_json::to_string(&response)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        debug!(id = %response.id, status = ?response.status, "response sent");
    }

    info!("input closed, stdio server shutting down");
    Ok(())
}

/// Turn one request line into its response.
pub async fn handle_line(handler: &dyn CommandHandler, line: &str) -> StdioResponse {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(line = %line.trim(), error = %e, "could not parse request line");
            return StdioResponse::error(UNKNOWN_ID, "invalid JSON request");
        }
    };

    let command = match request.command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => command,
        _ => {
            warn!(id = %request.id, "request has no command");
            return StdioResponse::error(request.id, "request is missing 'command'");
        }
    };

    info!(id = %request.id, %command, "request received");
    match handler
        .handle(command, request.session.as_deref(), None)
        .await
    {
        Ok(answer) => StdioResponse::success(request.id, answer),
        Err(e) => {
            warn!(id = %request.id, error = %e, "command failed");
            StdioResponse::error(request.id, e.to_string())
        }
    }
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Client side of the stdio protocol.
pub struct StdioClient {
    child: Option<Child>,
    reader: Option<BoxedReader>,
    writer: Option<BoxedWriter>,
    stderr: Option<JoinHandle<String>>,
}

impl StdioClient {
    /// Start `program` as a server process and wait `settle` before use.
    pub async fn spawn<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
        settle: Duration,
    ) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |what: &str| {
            TransportError::Io(std::io::Error::other(format!("failed to capture {}", what)))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        // Drain diagnostics continuously so a chatty server never blocks on a
        // full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        info!(pid = ?child.id(), "server process started");
        tokio::time::sleep(settle).await;

        let mut client = Self::connect(stdout, stdin);
        client.child = Some(child);
        client.stderr = Some(stderr_task);
        Ok(client)
    }

    /// Use an already-connected pair of streams.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            child: None,
            reader: Some(BufReader::new(Box::new(reader))),
            writer: Some(Box::new(writer)),
            stderr: None,
        }
    }

    /// Send a command under a fresh id.
    pub async fn send(&mut self, command: &str) -> Result<StdioResponse, TransportError> {
        self.send_request(&StdioRequest::new(command)).await
    }

    /// Send one request and wait for its response.
    ///
    /// If the server closes the connection the client shuts down and
    /// [`TransportError::ConnectionAborted`] is returned.
    pub async fn send_request(
        &mut self,
        request: &StdioRequest,
    ) -> Result<StdioResponse, TransportError> {
        let (Some(writer), Some(reader)) = (self.writer.as_mut(), self.reader.as_mut()) else {
            return Err(TransportError::NotStarted);
        };

        let mut line = serde_json::to_string(request)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        line.push('\n');
        debug!(id = %request.id, "sending request");

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "write to server failed");
            self.shutdown().await?;
            return Err(TransportError::ConnectionAborted);
        }

        let mut reply = Vec::new();
        let read = match reader.read_until(b'\n', &mut reply).await {
            Ok(read) => read,
            Err(e) => {
                warn!(error = %e, "read from server failed");
                self.shutdown().await?;
                return Err(e.into());
            }
        };
        if read == 0 {
            warn!("server closed the connection");
            self.shutdown().await?;
            return Err(TransportError::ConnectionAborted);
        }

        // A reply we cannot decode leaves the channel out of step; stop here.
        let response: StdioResponse = match serde_json::from_slice(&reply) {
            Ok(response) => response,
            Err(e) => {
                let raw = String::from_utf8_lossy(&reply).trim().to_string();
                warn!(error = %e, reply = %raw, "malformed response from server");
                self.shutdown().await?;
                return Err(TransportError::MalformedResponse(format!("{}: {}", e, raw)));
            }
        };
        if response.id != request.id {
            warn!(sent = %request.id, received = %response.id, "response id does not match request");
        }
        Ok(response)
    }

    /// Close the server's input, wait for it to exit (killing it after a grace
    /// period) and return whatever it wrote to stderr.
    pub async fn shutdown(&mut self) -> Result<String, TransportError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(?status, "server process exited");
                }
                Err(_) => {
                    warn!("server did not exit after input closed, terminating");
                    child.kill().await?;
                }
            }
        }

        let diagnostics = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !diagnostics.trim().is_empty() {
            info!(stderr = %diagnostics.trim_end(), "server diagnostics");
        }
        Ok(diagnostics)
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::EchoHandler;
    use crate::transport::ResponseStatus;
    use tokio::io::duplex;

    /// A client wired to an in-memory server running [`EchoHandler`].
    fn pair() -> (StdioClient, JoinHandle<Result<(), TransportError>>) {
        let (client_end, server_end) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let server = tokio::spawn(async move {
            serve(&EchoHandler, BufReader::new(server_read), server_write).await
        });
        let (client_read, client_write) = tokio::io::split(client_end);
        (StdioClient::connect(client_read, client_write), server)
    }

    #[tokio::test]
    async fn test_ping_round_trip_echoes_id() {
        let (mut client, _server) = pair();
        let request = StdioRequest {
            id: "abc".to_string(),
            command: Some("ping".to_string()),
            session: None,
        };
        let response = client.send_request(&request).await.unwrap();
        assert_eq!(response.id, "abc");
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.payload, "pong");
    }

    #[tokio::test]
    async fn test_non_json_line_gets_error_and_server_survives() {
        let (client_end, server_end) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let server = tokio::spawn(async move {
            serve(&EchoHandler, BufReader::new(server_read), server_write).await
        });

        let (client_read, mut client_write) = tokio::io::split(client_end);
        let mut replies = BufReader::new(client_read).lines();

        client_write.write_all(b"this is not json\n").await.unwrap();
        let line = replies.next_line().await.unwrap().unwrap();
        let response: StdioResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, UNKNOWN_ID);
        assert_eq!(response.status, ResponseStatus::Error);

        client_write
            .write_all(b"{\"id\":\"abc\",\"command\":\"ping\"}\n")
            .await
            .unwrap();
        let line = replies.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"id":"abc","status":"success","payload":"pong"}"#);

        client_write.shutdown().await.unwrap();
        assert!(replies.next_line().await.unwrap().is_none());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_gets_error_and_server_survives() {
        let (client_end, server_end) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let server = tokio::spawn(async move {
            serve(&EchoHandler, BufReader::new(server_read), server_write).await
        });

        let (client_read, mut client_write) = tokio::io::split(client_end);
        let mut replies = BufReader::new(client_read).lines();

        client_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        let line = replies.next_line().await.unwrap().unwrap();
        let response: StdioResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, UNKNOWN_ID);
        assert_eq!(response.status, ResponseStatus::Error);

        client_write
            .write_all(b"{\"id\":\"abc\",\"command\":\"ping\"}\r\n")
            .await
            .unwrap();
        let line = replies.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"id":"abc","status":"success","payload":"pong"}"#);

        client_write.shutdown().await.unwrap();
        assert!(replies.next_line().await.unwrap().is_none());
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_garbled_reply_shuts_client_down() {
        let (client_end, server_end) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_end);
        let mut client = StdioClient::connect(client_read, client_write);

        let server = tokio::spawn(async move {
            let (server_read, mut server_write) = tokio::io::split(server_end);
            let mut lines = BufReader::new(server_read).lines();
            let _ = lines.next_line().await;
            server_write.write_all(b"\xff not json\n").await.unwrap();
            server_write.flush().await.unwrap();
            // Hold the pipe open until the client hangs up.
            let _ = lines.next_line().await;
        });

        let result = client.send("ping").await;
        assert!(matches!(result, Err(TransportError::MalformedResponse(_))));
        assert!(!client.is_connected());
        assert!(matches!(client.send("ping").await, Err(TransportError::NotStarted)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_command_and_handler_failure_are_error_responses() {
        let (mut client, _server) = pair();
        let empty = StdioRequest {
            id: "x1".to_string(),
            command: None,
            session: None,
        };
        let response = client.send_request(&empty).await.unwrap();
        assert_eq!(response.id, "x1");
        assert!(!response.is_success());

        let response = client.send("fail").await.unwrap();
        assert!(!response.is_success());
        assert!(response.payload.as_str().unwrap().contains("requested failure"));

        // Still serving afterwards.
        assert!(client.send("ping").await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_session_is_forwarded() {
        let (mut client, _server) = pair();
        let response = client
            .send_request(&StdioRequest::new("hello").in_session("s9"))
            .await
            .unwrap();
        assert_eq!(response.payload, "[s9] hello");
    }

    #[tokio::test]
    async fn test_closed_server_is_connection_aborted() {
        let (client_end, server_end) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_end);
        let mut client = StdioClient::connect(client_read, client_write);

        // The server reads the request, then goes away without answering.
        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_end).lines();
            let _ = lines.next_line().await;
        });
        let reply = client.send("ping");
        let (result, _) = tokio::join!(reply, server);
        assert!(matches!(result, Err(TransportError::ConnectionAborted)));
        assert!(!client.is_connected());
        assert!(matches!(client.send("ping").await, Err(TransportError::NotStarted)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_round_trip_and_stderr_drained() {
        // A shell stand-in that answers one request and logs to stderr.
        let script = r#"read line; echo 'server log' >&2; printf '{"id":"abc","status":"success","payload":"pong"}\n'"#;
        let mut client = StdioClient::spawn("sh", ["-c", script], Duration::from_millis(10))
            .await
            .unwrap();
        let request = StdioRequest {
            id: "abc".to_string(),
            command: Some("ping".to_string()),
            session: None,
        };
        let response = client.send_request(&request).await.unwrap();
        assert_eq!(response.payload, "pong");

        let diagnostics = client.shutdown().await.unwrap();
        assert!(diagnostics.contains("server log"));
    }
}
