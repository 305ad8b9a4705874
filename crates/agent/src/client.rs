//! Client side of the control channel, used by the CLI.

use {
    serde_json::Value,
    tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    tracing::debug,
    warden_protocol::{Request, encode},
};

use crate::error::{Context, Error, Result};

/// Send one request over `stream` and read its response line.
pub async fn exchange<S>(stream: S, request: &Request) -> Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);

    let mut payload = encode(request)?;
    payload.push('\n');
    write.write_all(payload.as_bytes()).await?;
    write.flush().await?;

    let mut line = String::new();
    let n = BufReader::new(read).read_line(&mut line).await?;
    if n == 0 {
        return Err(Error::message("agent closed the connection without replying"));
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Connect to the agent at `endpoint` and send one request.
pub async fn send(endpoint: &str, request: &Request) -> Result<Value> {
    debug!(endpoint, kind = request.kind(), "sending request");
    let stream = connect(endpoint)
        .await
        .with_context(|| format!("connecting to agent at {endpoint}"))?;
    exchange(stream, request).await
}

#[cfg(unix)]
async fn connect(endpoint: &str) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(endpoint).await
}

#[cfg(windows)]
async fn connect(
    endpoint: &str,
) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint)
}
