use crate::node::NodeInner;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-read timeout; unresponsive clients are abandoned
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// The description server
///
/// A deliberately tiny HTTP/1.1 responder: one resource per connection,
/// `connection: close`, 200 or 404, nothing else. It exists because the
/// LOCATION URL in alive and response messages has to resolve somewhere;
/// it is not a general web server.
pub(crate) struct DescriptionServer {
    accept_task: JoinHandle<()>,
}

impl DescriptionServer {
    /// Bind the listener and start accepting
    pub(crate) async fn bind(
        port: u16,
        node: Arc<NodeInner>,
    ) -> std::io::Result<Self> {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let accept_task = tokio::spawn(accept_loop(listener, node));
        Ok(Self { accept_task })
    }

    /// Stop accepting; connections in flight finish on their own
    pub(crate) fn close(&self) {
        self.accept_task.abort();
    }
}

impl Drop for DescriptionServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, node: Arc<NodeInner>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_request(stream, node).await {
                        debug!("description request failed: {e}");
                    }
                });
            }
            Err(e) => warn!("description server accept: {e}"),
        }
    }
}

async fn handle_request(
    mut stream: TcpStream,
    node: Arc<NodeInner>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();
    let mut page: Option<String> = None;
    loop {
        let line =
            match tokio::time::timeout(READ_TIMEOUT, lines.next_line()).await
            {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => return Ok(()), // abandon slow client
            };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if line.starts_with("GET ") && line.ends_with("HTTP/1.1") {
            page = Some(line[4..line.len() - 8].trim().to_string());
        }
    }

    if let Some(page) = page {
        let name = page.trim_start_matches('/');
        if let Some(body) = node.description_for(name).await {
            writer
                .write_all(
                    format!(
                        "HTTP/1.1 200 OK\r\n\
                         connection: close\r\n\
                         content-type: text/xml\r\n\
                         content-length: {}\r\n\r\n",
                        body.len()
                    )
                    .as_bytes(),
                )
                .await?;
            writer.write_all(&body).await?;
            return Ok(());
        }
    }
    writer
        .write_all(
            b"HTTP/1.1 404 NOT FOUND\r\n\
              connection: close\r\n\
              content-length: 0\r\n\r\n",
        )
        .await?;
    Ok(())
}
