use crate::cv::compose;
use crate::session::SessionController;
use anyhow::{Result, bail};
use log::{debug, error, info};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::VectorToVec;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tokio::time::interval;

pub const DEFAULT_JPEG_QUALITY: i32 = 70;

/// Fixed inter-chunk delay, pacing the outbound feed at roughly 20 FPS.
const CHUNK_INTERVAL: Duration = Duration::from_millis(50);

const STREAM_HEADER: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n";

/// Wraps one encoded frame in the multipart boundary contract.
pub fn frame_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(jpeg.len() + 64);
    chunk.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n\r\n");
    chunk
}

fn encode_jpeg(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf = Vector::<u8>::new();

    if !imgcodecs::imencode(".jpg", frame, &mut buf, &params)? {
        bail!("JPEG encoder refused the frame");
    }
    Ok(buf.to_vec())
}

fn render_jpeg(session: &SessionController, quality: i32) -> Result<Vec<u8>> {
    let frame = if session.is_running() {
        match session.latest_frame() {
            Some(frame) => {
                compose::compose(&frame, &session.latest_results(), session.fps())?
            }
            None => compose::placeholder("No camera feed")?,
        }
    } else {
        compose::placeholder("Camera not active")?
    };

    encode_jpeg(&frame, quality)
}

/// Produces the next outbound chunk. Encode failures substitute a captioned
/// placeholder so a single bad frame never terminates the stream.
pub fn render_chunk(session: &SessionController, quality: i32) -> Vec<u8> {
    let jpeg = render_jpeg(session, quality).unwrap_or_else(|e| {
        error!("Video feed error: {e:#}");
        compose::placeholder("Encoding error")
            .and_then(|frame| encode_jpeg(&frame, quality))
            .unwrap_or_default()
    });

    frame_chunk(&jpeg)
}

/// Accept loop for stream viewers and status pollers.
pub async fn serve(
    listener: TcpListener,
    session: Arc<SessionController>,
    quality: i32,
) -> Result<()> {
    info!("Stream server listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!("Viewer connected from {peer}");

        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, session, quality).await {
                debug!("Viewer from {peer} disconnected: {e}");
            }
        });
    }
}

async fn handle_client(
    mut socket: TcpStream,
    session: Arc<SessionController>,
    quality: i32,
) -> Result<()> {
    let mut request = [0u8; 1024];
    let read = socket.read(&mut request).await?;
    let head = String::from_utf8_lossy(&request[..read]);

    if head.starts_with("GET /status") {
        let body = serde_json::to_string(&session.status())?;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    socket.write_all(STREAM_HEADER).await?;

    // Indefinite, non-restartable per connection; ends only when the viewer
    // hangs up.
    let mut pacing = interval(CHUNK_INTERVAL);
    loop {
        pacing.tick().await;

        let renderer = session.clone();
        let chunk = task::spawn_blocking(move || render_chunk(&renderer, quality)).await?;
        socket.write_all(&chunk).await?;
    }
}
