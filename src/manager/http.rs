//! HTTP introspection listener. Deliberately minimal: a hand-rolled GET-only request line
//! parser and a synchronously rendered HTML page. This listener is advisory; any I/O failure here
//! is logged and dropped, never allowed to disturb the control-link accept loop.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::state::ManagerState;

pub async fn run(state: Arc<ManagerState>, host: String, port: u16) {
    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(error = %err, "HTTP introspection listener failed to bind, introspection disabled");
            return;
        },
    };
    info!(%host, port, "HTTP introspection listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_one(state, stream).await {
                        debug!(%peer, error = %err, "HTTP introspection request failed");
                    }
                });
            },
            Err(err) => {
                warn!(error = %err, "HTTP introspection accept failed");
            },
        }
    }
}

async fn serve_one(state: Arc<ManagerState>, stream: TcpStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if !request_line.starts_with("GET ") {
        let stream = reader.into_inner();
        return respond(stream, 405, "Method Not Allowed", "Only GET is supported").await;
    }

    // Drain remaining header lines; we never look at them.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let body = render_page(&state).await;
    let stream = reader.into_inner();
    respond(stream, 200, "OK", &body).await
}

async fn respond(mut stream: TcpStream, status: u16, reason: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await
}

async fn render_page(state: &Arc<ManagerState>) -> String {
    let registry = state.registry.lock().await;

    let mut connections_rows = String::new();
    for (id, record) in &registry.connections {
        connections_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            id,
            record.id,
            record.peer_addr,
            record.created_at.to_rfc3339(),
        ));
    }

    let mut channel_rows = String::new();
    for channel in registry.channels.values() {
        channel_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}:{}</td><td>{}</td><td>{}/{}</td><td>{}</td><td>{}</td></tr>\n",
            channel.name,
            channel.owner,
            channel.owner_addr,
            channel.owner_port,
            channel.clients.len(),
            channel.buffered_queue.len(),
            channel.max_buffered,
            channel.notify_on_death,
            channel.created_at.to_rfc3339(),
        ));
    }

    format!(
        "<html><head><title>messip manager</title></head><body>\n\
         <h1>Connections</h1>\n\
         <table border=\"1\"><tr><th>id</th><th>process id</th><th>peer</th><th>since</th></tr>\n{}</table>\n\
         <h1>Channels</h1>\n\
         <table border=\"1\"><tr><th>name</th><th>owner</th><th>owner addr</th><th>clients</th><th>queue</th><th>notify_on_death</th><th>since</th></tr>\n{}</table>\n\
         </body></html>\n",
        connections_rows, channel_rows,
    )
}
