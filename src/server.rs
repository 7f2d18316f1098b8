//! Web operator console
//!
//! Serves the live camera view the operator clicks on, the frame currently
//! sent to the projector, and the current instruction. Pointer events posted
//! by the page are forwarded to the calibrator's event channel.

use anyhow::Result;
use arc_swap::ArcSwapOption;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::calibration::{CalibrationView, PointerEvent};
use crate::error::Result as MappingResult;
use crate::frame::{Dimensions, Frame};
use crate::pipeline::{DisplaySink, StopSignal};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

const PREVIEW_QUALITY: u8 = 70;

/// Shared console state
pub struct AppState {
    camera_frame: ArcSwapOption<Frame>,
    projector_frame: ArcSwapOption<Frame>,
    prompt: RwLock<String>,
    /// Calibrator's event channel while a session is running
    pointer_tx: Mutex<Option<Sender<PointerEvent>>>,
    finish: StopSignal,
    calibration_file: PathBuf,
    projector: Dimensions,
}

impl AppState {
    pub fn new(calibration_file: PathBuf, projector: Dimensions) -> Self {
        Self {
            camera_frame: ArcSwapOption::empty(),
            projector_frame: ArcSwapOption::empty(),
            prompt: RwLock::new(String::new()),
            pointer_tx: Mutex::new(None),
            finish: StopSignal::new(),
            calibration_file,
            projector,
        }
    }

    /// Route pointer events to `tx` until [`AppState::detach_pointer`]
    pub fn attach_pointer(&self, tx: Sender<PointerEvent>) {
        *self.pointer_tx.lock() = Some(tx);
    }

    pub fn detach_pointer(&self) {
        *self.pointer_tx.lock() = None;
    }

    /// Signal set by the console's "finish" button
    pub fn finish_signal(&self) -> StopSignal {
        self.finish.clone()
    }

    pub fn current_prompt(&self) -> String {
        self.prompt.read().clone()
    }

    /// Forward an event; false when no session is listening
    pub fn forward_pointer(&self, event: PointerEvent) -> bool {
        let mut tx = self.pointer_tx.lock();
        match tx.as_ref().map(|tx| tx.send(event)) {
            Some(Ok(())) => true,
            Some(Err(_)) => {
                // Receiver dropped: the session ended
                *tx = None;
                false
            }
            None => false,
        }
    }

    pub fn camera_jpeg(&self) -> Option<Vec<u8>> {
        encode_latest(&self.camera_frame)
    }

    pub fn projector_jpeg(&self) -> Option<Vec<u8>> {
        encode_latest(&self.projector_frame)
    }

    pub fn camera_dimensions(&self) -> Option<Dimensions> {
        self.camera_frame.load().as_ref().map(|f| f.dimensions())
    }
}

impl CalibrationView for AppState {
    fn show_camera(&self, frame: &Frame) {
        self.camera_frame.store(Some(Arc::new(frame.clone())));
    }

    fn show_projector(&self, frame: &Frame) {
        self.projector_frame.store(Some(Arc::new(frame.clone())));
    }

    fn prompt(&self, text: &str) {
        info!("{}", text);
        *self.prompt.write() = text.to_string();
    }
}

/// Display sink that also publishes every presented frame to the console
pub struct MirroredDisplay<D> {
    inner: D,
    state: Arc<AppState>,
}

impl<D: DisplaySink> MirroredDisplay<D> {
    pub fn new(inner: D, state: Arc<AppState>) -> Self {
        Self { inner, state }
    }
}

impl<D: DisplaySink> DisplaySink for MirroredDisplay<D> {
    fn dimensions(&self) -> Dimensions {
        self.inner.dimensions()
    }

    fn present(&mut self, frame: &Frame) -> MappingResult<()> {
        self.inner.present(frame)?;
        self.state.show_projector(frame);
        Ok(())
    }
}

fn encode_latest(slot: &ArcSwapOption<Frame>) -> Option<Vec<u8>> {
    let frame = slot.load_full()?;
    match encode_jpeg(&frame, PREVIEW_QUALITY) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            debug!("Preview encode failed: {}", e);
            None
        }
    }
}

/// Encode a frame as JPEG
fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    use image::ColorType;

    let dims = frame.dimensions();
    let color = match frame {
        Frame::Gray(_) => ColorType::L8,
        Frame::Rgb(_) => ColorType::Rgb8,
    };

    let mut jpeg_data = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_data, quality).encode(frame.as_raw(), dims.width, dims.height, color)?;
    Ok(jpeg_data)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Operator console listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/static/*path", get(static_handler))
        .route("/api/pointer", post(post_pointer))
        .route("/api/prompt", get(get_prompt))
        .route("/api/calibration", get(get_calibration))
        .route("/api/calibration/finish", post(finish_calibration))
        .route("/api/preview/camera", get(get_camera_preview))
        .route("/api/preview/camera/stream", get(camera_stream))
        .route("/api/preview/projector", get(get_projector_preview))
        .route("/api/info", get(get_info))
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(axum::http::header::CONTENT_TYPE, mime.as_ref())], content.data.to_vec()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn post_pointer(State(state): State<Arc<AppState>>, Json(event): Json<PointerEvent>) -> StatusCode {
    if state.forward_pointer(event) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

#[derive(Serialize)]
struct PromptResponse {
    prompt: String,
    session_active: bool,
}

async fn get_prompt(State(state): State<Arc<AppState>>) -> Json<PromptResponse> {
    Json(PromptResponse {
        prompt: state.current_prompt(),
        session_active: state.pointer_tx.lock().is_some(),
    })
}

/// The saved calibration document, verbatim
async fn get_calibration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::fs::read_to_string(&state.calibration_file).await {
        Ok(document) => ([(axum::http::header::CONTENT_TYPE, "application/json")], document).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, format!("No calibration saved: {}", e)).into_response(),
    }
}

async fn finish_calibration(State(state): State<Arc<AppState>>) -> StatusCode {
    info!("Operator requested end of calibration session");
    state.finish.trigger();
    StatusCode::OK
}

fn jpeg_response(jpeg: Option<Vec<u8>>) -> axum::response::Response {
    match jpeg {
        Some(frame) => ([(axum::http::header::CONTENT_TYPE, "image/jpeg")], frame).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response(),
    }
}

async fn get_camera_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    jpeg_response(state.camera_jpeg())
}

async fn get_projector_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    jpeg_response(state.projector_jpeg())
}

/// MJPEG stream of the camera view
async fn camera_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(100),
    ))
    .map(move |_| {
        let Some(frame) = state.camera_jpeg() else {
            return Ok::<_, std::convert::Infallible>(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec());
        };

        let mut response = Vec::with_capacity(frame.len() + 64);
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        response.extend_from_slice(frame.len().to_string().as_bytes());
        response.extend_from_slice(b"\r\n\r\n");
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\r\n");
        Ok(response)
    });

    (
        [(axum::http::header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(stream),
    )
}

#[derive(Serialize)]
struct InfoResponse {
    version: String,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    projector_width: u32,
    projector_height: u32,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let camera = state.camera_dimensions();
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        camera_width: camera.map(|d| d.width),
        camera_height: camera.map(|d| d.height),
        projector_width: state.projector.width,
        projector_height: state.projector.height,
    })
}
