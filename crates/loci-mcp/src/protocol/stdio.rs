//! stdio transport: one JSON-RPC message per line, in and out.

use std::io::{self, BufRead, BufReader, Write};
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// Line-framed stdio transport.
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Serve requests from stdin until EOF or shutdown.
    pub async fn run(self, mut server: McpServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    break;
                }
            };

            if line.is_empty() {
                continue;
            }

            debug!("Received: {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    let error_response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut stdout, &error_response)?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response)?;
            }

            if server.shutting_down() {
                break;
            }
        }

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn write_response(stdout: &mut impl Write, response: &JsonRpcResponse) -> io::Result<()> {
    match serde_json::to_string(response) {
        Ok(response_json) => {
            debug!("Sending: {} bytes", response_json.len());
            writeln!(stdout, "{}", response_json)?;
            stdout.flush()
        }
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            // Send a minimal error response so the client doesn't hang.
            let fallback = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;
            writeln!(stdout, "{}", fallback)?;
            stdout.flush()
        }
    }
}
