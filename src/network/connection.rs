//! Connection - drives one client socket.
//!
//! ```text
//! accept ─▶ admission ─▶ TLS handshake ─▶ session
//!                                         │
//!            reader (FramedRead, lines) ──┼──▶ handlers ──▶ outbound queue
//!                                         │                      │
//!                                         └── writer task ◀──────┘
//! ```
//!
//! The reader runs on the connection task; outbound lines go through the
//! session's unbounded queue to a separate writer task, so handlers never
//! wait on a slow peer.

use crate::network::listener::ListenerSettings;
use crate::network::tls;
use crate::proto::{Message, numeric};
use crate::security::AdmissionDecision;
use crate::server::Server;
use crate::state::session::{Outbound, Session, SessionInfo};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Tags plus a 512-byte message.
const MAX_LINE_LENGTH: usize = 8191 + 512;

/// Admission, TLS handshake, then the session loop. Returns once the
/// connection is closed.
pub async fn accept(
    server: Arc<Server>,
    mut stream: TcpStream,
    peer: SocketAddr,
    listener: String,
    settings: Arc<ListenerSettings>,
) {
    if let AdmissionDecision::Reject(message) = server.admit(peer.ip(), settings.tor) {
        info!(%peer, reason = %message, "Connection rejected");
        let line = format!("ERROR :{message}\r\n");
        let _ = stream.write_all(line.as_bytes()).await;
        let _ = stream.shutdown().await;
        return;
    }

    let mut info = SessionInfo {
        ip: Some(peer.ip()),
        listener,
        is_tls: settings.tls.is_some(),
        is_tor: settings.tor,
        sts_only: settings.sts_only,
        certfp: None,
    };

    match &settings.tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                info.certfp = tls_stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map(|cert| tls::certfp(cert.as_ref()));
                run(Arc::clone(&server), tls_stream, info).await;
            }
            Err(e) => {
                debug!(%peer, error = %e, "TLS handshake failed");
                server.admission.release(peer.ip(), settings.tor);
            }
        },
        None => run(Arc::clone(&server), stream, info).await,
    }
}

/// Run a session over an established stream.
pub async fn run<S>(server: Arc<Server>, stream: S, info: SessionInfo)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(info, tx);
    server.session_opened(&session);
    let writer_task = tokio::spawn(write_loop(writer, rx, Arc::clone(&server), session.id));

    let config = server.config();
    let deadline = tokio::time::Instant::now() + config.server.idle_timeouts.registration;
    let shutdown = server.shutdown_token();
    let mut quit_reason = String::from("Connection closed");

    loop {
        let registered = session.client().is_some_and(|c| c.is_registered());
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                quit_reason = "Server shutting down".to_string();
                break;
            }
            _ = tokio::time::sleep_until(deadline), if !registered => {
                quit_reason = "Registration timed out".to_string();
                session.quit(&quit_reason);
                break;
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => {
                if line.is_empty() {
                    continue;
                }
                server.logging().log_input(session.id, &line);
                let message = match Message::parse(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(session = session.id, error = %e, "Unparseable line");
                        continue;
                    }
                };
                if let Some(reason) = server.handle_message(&session, &message).await {
                    quit_reason = reason;
                    break;
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                session.send(Message::new(
                    Some(&server.config().server.name),
                    numeric::ERR_INPUTTOOLONG,
                    [session.nick_or_star(), "Input line was too long".to_string()],
                ));
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(session = session.id, error = %e, "Read error");
                quit_reason = format!("Read error: {e}");
                break;
            }
            None => break,
        }
    }

    server.disconnect(&session, &quit_reason);
    session.close();
    if let Err(e) = writer_task.await {
        warn!(session = session.id, error = %e, "Writer task failed");
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    server: Arc<Server>,
    session_id: u64,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Line(message) => {
                let line = message.to_string();
                server.logging().log_output(session_id, &line);
                let mut bytes = line.into_bytes();
                bytes.extend_from_slice(b"\r\n");
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!(session = session_id, error = %e, "Write error");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}
