use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::{stream, Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::save_video_field;
use crate::modules::video::dto::*;
use crate::modules::video::service::{output_filename, PipelineError, UPLOAD_FILENAME};
use crate::modules::video::progress::StreamError;
use crate::state::AppState;

const BUSY: &str = "A video is already being processed";

/// Upload Video
/// Stores the `video` form field under the fixed upload name
#[utoipa::path(
    post,
    path = "/api/v1/upload",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Video stored", body = ApiResponse<UploadResponse>),
        (status = 400, description = "Missing field, empty filename or not a video"),
        (status = 409, description = "A session is running")
    ),
    tag = "Video"
)]
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiSuccess<ApiResponse<UploadResponse>>, ApiError> {
    let _session = state
        .session
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::conflict(BUSY))?;

    let stored = save_video_field(&mut multipart, &state.upload_path()).await?;

    Ok(ApiSuccess(
        ApiResponse::success(
            UploadResponse {
                filename: stored.original_name,
                size_bytes: stored.size_bytes,
                progress_url: "/api/v1/progress".to_string(),
            },
            "Video uploaded successfully",
        ),
        StatusCode::CREATED,
    ))
}

/// Line breaks inside a payload would otherwise be read as field separators.
fn sse_safe(payload: &str) -> String {
    payload.replace("\r\n", "\n").replace('\r', "\n")
}

/// Stream Progress
/// Processes the uploaded video and pushes progress as server-sent events:
/// one integer percent per frame, then `done`, the caption and the story
/// (or `error` and the reason)
#[utoipa::path(
    get,
    path = "/api/v1/progress",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Nothing uploaded yet"),
        (status = 409, description = "A session is running")
    ),
    tag = "Video"
)]
pub async fn stream_progress(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let input = state.upload_path();
    if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
        return Err(ApiError::not_found("No uploaded video to process"));
    }

    let guard = state
        .session
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::conflict(BUSY))?;

    let (tx, rx) = async_channel::bounded(1);
    let pipeline = state.pipeline.clone();
    let output = state.output_path();
    let session = Uuid::new_v4();

    tokio::spawn(
        async move {
            let _guard = guard;
            info!("Session started");
            if pipeline.run(input, output, tx).await.is_ok() {
                info!("Session complete");
            }
        }
        .instrument(info_span!("pipeline", %session)),
    );

    let events = rx.flat_map(|event| {
        stream::iter(
            event
                .payloads()
                .into_iter()
                .map(|payload| Ok::<_, Infallible>(Event::default().data(sse_safe(&payload)))),
        )
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match &e {
        PipelineError::Probe(_) | PipelineError::Transform(StreamError::Decode { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::Story(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError(e.to_string(), status)
}

/// Process Video
/// Upload and run the whole pipeline in one request, without progress events
#[utoipa::path(
    post,
    path = "/api/v1/process",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Caption, story and download link", body = ApiResponse<ProcessResponse>),
        (status = 400, description = "Bad upload"),
        (status = 409, description = "A session is running"),
        (status = 422, description = "Video could not be decoded"),
        (status = 502, description = "Story generation failed")
    ),
    tag = "Video"
)]
pub async fn process_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiSuccess<ApiResponse<ProcessResponse>>, ApiError> {
    let _session = state
        .session
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::conflict(BUSY))?;

    let stored = save_video_field(&mut multipart, &state.upload_path()).await?;

    let outcome = state
        .pipeline
        .run_to_completion(stored.path, state.output_path())
        .instrument(info_span!("pipeline", session = %Uuid::new_v4()))
        .await
        .map_err(pipeline_error)?;

    Ok(ApiSuccess(
        ApiResponse::success(
            ProcessResponse {
                caption: outcome.caption.text,
                story: outcome.story,
                frames_processed: outcome.summary.processed,
                download_url: download_url(&output_filename(UPLOAD_FILENAME)),
            },
            "Video processed successfully",
        ),
        StatusCode::OK,
    ))
}

/// Download Processed Video
#[utoipa::path(
    get,
    path = "/api/v1/download/{filename}",
    params(("filename" = String, Path, description = "Processed file name")),
    responses(
        (status = 200, description = "Video file"),
        (status = 400, description = "Invalid file name"),
        (status = 404, description = "Not Found")
    ),
    tag = "Video"
)]
pub async fn download_video(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if filename.is_empty()
        || filename.contains(['/', '\\'])
        || filename.contains("..")
    {
        return Err(ApiError::bad_request("Invalid file name"));
    }

    let path = state.config.output_dir.join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            return Err(ApiError::internal("Could not read file"));
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            mime_guess::from_path(&path).first_or_octet_stream().to_string(),
        )
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );
    if let Ok(meta) = file.metadata().await {
        builder = builder.header(header::CONTENT_LENGTH, meta.len());
    }

    let body = Body::from_stream(ReaderStream::new(file));
    builder
        .body(body)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Show Result
/// Echoes caption and story handed over in the query string
#[utoipa::path(
    get,
    path = "/api/v1/result",
    params(ResultQuery),
    responses((status = 200, description = "Result", body = ApiResponse<ResultResponse>)),
    tag = "Video"
)]
pub async fn show_result(Query(query): Query<ResultQuery>) -> impl IntoResponse {
    ApiSuccess(
        ApiResponse::success(
            ResultResponse {
                caption: query.caption.unwrap_or_default(),
                story: query.story.unwrap_or_default(),
                download_url: download_url(&output_filename(UPLOAD_FILENAME)),
            },
            "Result",
        ),
        StatusCode::OK,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::caption::client::tests::{ok_caption, ScriptedTransport};
    use crate::modules::video::service::tests::FixedStory;
    use crate::modules::video::testing::SyntheticBackend;
    use axum::body::to_bytes;
    use axum::http::Request;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARYX";

    async fn app_with(frames: usize) -> (Router, AppState) {
        let state = AppState::for_tests(
            SyntheticBackend::new(16, 16, frames),
            Arc::new(ScriptedTransport::new(vec![ok_caption("a quiet street")])),
            Arc::new(FixedStory::ok("Nobody came home.")),
        );
        (crate::app::create_app(state.clone()).await, state)
    }

    fn multipart(field: &str, filename: &str, content_type: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\nFAKEVIDEO\r\n--{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/v1/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_without_video_field() {
        let (app, _) = app_with(3).await;
        let resp = app.oneshot(multipart("other", "a.mp4", "video/mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("No video uploaded"));
    }

    #[tokio::test]
    async fn test_upload_with_empty_filename() {
        let (app, _) = app_with(3).await;
        let resp = app.oneshot(multipart("video", "", "video/mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(resp).await.contains("Empty filename"));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_video() {
        let (app, _) = app_with(3).await;
        let resp = app.oneshot(multipart("video", "a.png", "image/png")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_stores_fixed_name() {
        let (app, state) = app_with(3).await;
        let resp = app.oneshot(multipart("video", "holiday.mov", "video/quicktime")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(std::fs::read(state.upload_path()).unwrap(), b"FAKEVIDEO");
    }

    #[tokio::test]
    async fn test_progress_without_upload() {
        let (app, _) = app_with(3).await;
        let resp = app.oneshot(get("/api/v1/progress")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_progress_streams_percent_then_results() {
        let (app, state) = app_with(4).await;
        std::fs::write(state.upload_path(), b"FAKEVIDEO").unwrap();

        let resp = app.oneshot(get("/api/v1/progress")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");

        let text = body_text(resp).await;
        assert_eq!(
            text,
            "data: 25\n\ndata: 50\n\ndata: 75\n\ndata: 100\n\n\
             data: done\n\ndata: a quiet street\n\ndata: Nobody came home. (a quiet street)\n\n"
        );
    }

    #[tokio::test]
    async fn test_progress_busy_session() {
        let (app, state) = app_with(3).await;
        std::fs::write(state.upload_path(), b"FAKEVIDEO").unwrap();
        let _held = state.session.clone().try_lock_owned().unwrap();

        let resp = app.oneshot(get("/api/v1/progress")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_process_returns_results() {
        let (app, _) = app_with(2).await;
        let mut req = multipart("video", "clip.mp4", "video/mp4");
        *req.uri_mut() = "/api/v1/process".parse().unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["data"]["caption"], "a quiet street");
        assert_eq!(json["data"]["frames_processed"], 2);
        assert_eq!(json["data"]["download_url"], "/api/v1/download/bgsub_uploaded_video.mp4");
    }

    #[tokio::test]
    async fn test_download_guards_and_serves() {
        let (app, state) = app_with(1).await;

        let resp = app.clone().oneshot(get("/api/v1/download/..%2Fsecret")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.clone().oneshot(get("/api/v1/download/missing.mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        std::fs::write(state.output_path(), b"MASKVIDEO").unwrap();
        let resp = app.oneshot(get("/api/v1/download/bgsub_uploaded_video.mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(body_text(resp).await, "MASKVIDEO");
    }

    #[tokio::test]
    async fn test_result_echoes_query() {
        let (app, _) = app_with(1).await;
        let resp = app
            .oneshot(get("/api/v1/result?caption=a%20cat&story=it%20left"))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["data"]["caption"], "a cat");
        assert_eq!(json["data"]["story"], "it left");
    }

    #[test]
    fn test_sse_safe_normalises_line_breaks() {
        assert_eq!(sse_safe("a\r\nb\rc"), "a\nb\nc");
    }
}
