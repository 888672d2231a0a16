//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Extension, Json,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;

use crate::presenter::{DisplaySize, FrameStats, SessionChannels};

/// Largest display size accepted from the page.
const MAX_DISPLAY_SIDE: u32 = 8192;

/// Static text of the page.
#[derive(Clone, Debug)]
pub struct PageInfo {
    pub title: String,
    pub subtitle: String,
}

impl Default for PageInfo {
    fn default() -> Self {
        Self {
            title: "Real-Time Object Detection (COCO-SSD)".to_owned(),
            subtitle: "80 classes".to_owned(),
        }
    }
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// The page with video, overlay and FPS readout.
pub async fn index(
    Extension(channels): Extension<Arc<SessionChannels>>,
    Extension(page): Extension<Arc<PageInfo>>,
) -> Html<String> {
    Html(render_index(&page, channels.display()))
}

/// Endpoint of the composed video stream.
///
/// The stream ends on shutdown, otherwise open viewers would keep the server alive.
pub async fn video_stream(
    Extension(channels): Extension<Arc<SessionChannels>>,
    Extension(shutdown): Extension<CancellationToken>,
) -> impl IntoResponse {
    log::info!("Video stream requested");

    // Subscribe to the broadcasted composed frames, lagging viewers skip frames.
    let rx = channels.subscribe_frames();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(bytes) => Some(Ok::<_, std::io::Error>(bytes)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log::debug!("Viewer lagging, skipped {} frames", skipped);
                None
            }
        }
    });
    let stream = stream.take_until(async move { shutdown.cancelled().await });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Statistics for the FPS readout.
pub async fn stats(Extension(channels): Extension<Arc<SessionChannels>>) -> Json<FrameStats> {
    Json(channels.stats())
}

/// Display size reported by the page.
#[derive(Debug, Deserialize)]
pub struct DisplayParams {
    width: u32,
    height: u32,
}

/// Update the size of the video box.
///
/// Zero sizes are accepted, they mean the video is hidden and frames are skipped.
pub async fn set_display(
    Extension(channels): Extension<Arc<SessionChannels>>,
    Query(params): Query<DisplayParams>,
) -> StatusCode {
    if params.width > MAX_DISPLAY_SIDE || params.height > MAX_DISPLAY_SIDE {
        log::warn!("Rejecting display size {}x{}", params.width, params.height);
        return StatusCode::BAD_REQUEST;
    }

    channels.set_display(DisplaySize {
        width: params.width,
        height: params.height,
    });

    StatusCode::NO_CONTENT
}

fn render_index(page: &PageInfo, display: DisplaySize) -> String {
    INDEX_TEMPLATE
        .replace("{title}", &page.title)
        .replace("{subtitle}", &page.subtitle)
        .replace("{width}", &display.width.to_string())
        .replace("{height}", &display.height.to_string())
}

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body { text-align: center; font-family: sans-serif; }
        #fps { font-size: 18px; font-weight: bold; color: #00FFFF; margin-bottom: 10px; }
        #status { color: #c00; margin-bottom: 10px; }
        #video { border-radius: 10px; box-shadow: 0 0 10px #ccc; background: #000; }
    </style>
</head>
<body>
    <h1>{title}</h1>
    <h3>{subtitle}</h3>
    <div id="fps">FPS: --</div>
    <div id="status"></div>
    <img id="video" src="/stream" width="{width}" height="{height}">
    <script>
        const video = document.getElementById("video");
        const fps = document.getElementById("fps");
        const status = document.getElementById("status");

        function reportDisplay() {
            fetch(`/display?width=${video.clientWidth}&height=${video.clientHeight}`, { method: "POST" });
        }
        new ResizeObserver(reportDisplay).observe(video);

        async function poll() {
            try {
                const stats = await (await fetch("/stats")).json();
                fps.innerText = `FPS: ${stats.fps_text}`;
                status.innerText = stats.status.state === "failed" ? `Error: ${stats.status.reason}` : "";
            } catch (e) {
                status.innerText = "Server not reachable";
            }
            setTimeout(poll, 500);
        }
        poll();
    </script>
</body>
</html>
"#;
