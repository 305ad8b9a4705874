//! Newline-delimited JSON control channel.
//!
//! One request per line, one response per line, any number of requests per
//! connection. Unix hosts listen on a domain socket, Windows on a named pipe.

use std::sync::Arc;

use {
    tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    warden_protocol::{ErrorResponse, MAX_REQUEST_BYTES, Response, encode},
};

use crate::{dispatch::Dispatcher, error::Result};

/// Serve requests on one connection until the peer hangs up.
///
/// A line longer than [`MAX_REQUEST_BYTES`] gets an error response and the
/// connection is closed, since the rest of the stream can no longer be framed.
/// A line that is not valid UTF-8 gets an error response and the connection
/// stays open.
pub async fn serve_connection<S>(stream: S, dispatcher: &Dispatcher) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() > MAX_REQUEST_BYTES {
            warn!(limit = MAX_REQUEST_BYTES, "request line too large, closing connection");
            let response = Response::Error(ErrorResponse::new(format!(
                "request exceeds {MAX_REQUEST_BYTES} bytes"
            )));
            write_response(&mut write, &response).await?;
            return Ok(());
        }

        match std::str::from_utf8(&buf) {
            Ok(line) => {
                let request = line.trim();
                if !request.is_empty() {
                    let response = dispatcher.handle_line(request).await;
                    write_response(&mut write, &response).await?;
                }
            },
            Err(e) => {
                debug!(error = %e, "rejecting request that is not UTF-8");
                let response =
                    Response::Error(ErrorResponse::new("malformed request: invalid UTF-8"));
                write_response(&mut write, &response).await?;
            },
        }
        if !terminated {
            return Ok(());
        }
    }
}

async fn write_response<W>(write: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = encode(response)?;
    payload.push('\n');
    write.write_all(payload.as_bytes()).await?;
    write.flush().await?;
    Ok(())
}

async fn handle<S>(stream: S, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        () = shutdown.cancelled() => debug!("closing client connection for shutdown"),
        result = serve_connection(stream, &dispatcher) => {
            if let Err(e) = result {
                debug!(error = %e, "client connection ended with error");
            }
        },
    }
}

/// Accept clients on the Unix domain socket at `endpoint` until `shutdown` fires.
///
/// A stale socket file left by a crashed agent is replaced. If another agent
/// still answers on it, startup fails instead.
#[cfg(unix)]
pub async fn listen(
    endpoint: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    use {
        std::{os::unix::fs::PermissionsExt, path::Path},
        tokio::net::{UnixListener, UnixStream},
    };

    use crate::error::{Context, Error};

    let path = Path::new(endpoint);
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(Error::message(format!(
                "another agent is already listening on {endpoint}"
            )));
        }
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {endpoint}"))?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let listener =
        UnixListener::bind(path).with_context(|| format!("binding control socket {endpoint}"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    info!(endpoint, "control channel listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("client connected");
                    tokio::spawn(handle(stream, Arc::clone(&dispatcher), shutdown.child_token()));
                },
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(path) {
        debug!(error = %e, endpoint, "could not remove control socket");
    }
    info!(endpoint, "control channel closed");
    Ok(())
}

/// Accept clients on the named pipe `endpoint` until `shutdown` fires.
#[cfg(windows)]
pub async fn listen(
    endpoint: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    use tokio::net::windows::named_pipe::ServerOptions;

    use crate::error::Context;

    let mut server = ServerOptions::new()
        .first_pipe_instance(true)
        .create(endpoint)
        .with_context(|| format!("creating control pipe {endpoint}"))?;
    info!(endpoint, "control channel listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            connected = server.connect() => {
                if let Err(e) = connected {
                    warn!(error = %e, "pipe connect failed");
                    continue;
                }
                let client = std::mem::replace(&mut server, ServerOptions::new().create(endpoint)?);
                debug!("client connected");
                tokio::spawn(handle(client, Arc::clone(&dispatcher), shutdown.child_token()));
            },
        }
    }

    info!(endpoint, "control channel closed");
    Ok(())
}
