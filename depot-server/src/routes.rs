use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use depot_core::retrieval::CACHE_CONTROL;
use depot_core::{
    FileStore, IncomingFile, RetrievalPipeline, RetrieveError, ServerConfig, UploadError,
    UploadPipeline,
};
use tracing::{debug, error};

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub uploads: UploadPipeline,
    pub retrieval: RetrievalPipeline,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, store: FileStore) -> Self {
        Self {
            uploads: UploadPipeline::new(config.clone(), store.clone()),
            retrieval: RetrievalPipeline::new(store),
            config,
        }
    }
}

pub fn depot_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/health", get(health))
        .route("/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/files/:filename", get(serve_file))
        .with_state(state)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn upload_error_to_response(err: UploadError) -> Response {
    match err {
        UploadError::NoFile => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        UploadError::TooLarge { .. } => json_error(StatusCode::PAYLOAD_TOO_LARGE, &err.to_string()),
        UploadError::Malformed(msg) => json_error(StatusCode::BAD_REQUEST, &msg),
        UploadError::Storage(e) => {
            error!("Upload failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")
        }
    }
}

async fn landing(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <title>depot</title>
    <style>
      body {{ font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }}
      .endpoint {{ background: #f5f5f5; padding: 15px; margin: 10px 0; border-radius: 5px; }}
      code {{ background: #e0e0e0; padding: 2px 6px; border-radius: 3px; }}
    </style>
  </head>
  <body>
    <h1>depot</h1>
    <p>Server running on port {port}</p>
    <h2>Endpoints</h2>
    <div class="endpoint">
      <h3>POST /upload</h3>
      <p>Upload a file. Images are stored as WebP.</p>
      <p><strong>Form data:</strong> <code>file</code> (max {max_mb}MB)</p>
    </div>
    <div class="endpoint">
      <h3>GET /files/:filename</h3>
      <p>Fetch a stored file.</p>
      <p><strong>Query params (images):</strong> <code>?width=800</code> (downscale on the fly)</p>
    </div>
  </body>
</html>
"#,
        port = state.config.port,
        max_mb = state.config.max_file_size_mb,
    ))
}

async fn health() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            debug!("Upload without multipart body: {rejection}");
            return upload_error_to_response(UploadError::NoFile);
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_error_to_response(UploadError::Malformed(e.body_text())),
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        // Browsers send an empty filename when no file was chosen.
        let Some(original_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        let incoming = IncomingFile {
            original_name,
            declared_type: field.content_type().map(str::to_string),
            body: field,
        };
        return match state.uploads.upload(Some(incoming)).await {
            Ok(descriptor) => (StatusCode::OK, Json(descriptor)).into_response(),
            Err(e) => upload_error_to_response(e),
        };
    }

    upload_error_to_response(UploadError::NoFile)
}

async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let width = params.get("width").and_then(|w| w.trim().parse::<u32>().ok());

    match state.retrieval.retrieve(&filename, width).await {
        Ok(retrieved) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, retrieved.content_type.to_string()),
                (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
            ],
            retrieved.bytes,
        )
            .into_response(),
        Err(RetrieveError::NotFound(_)) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(RetrieveError::Storage(e)) => {
            error!("Error retrieving {filename}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error retrieving file").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cors::cors_layer;
    use axum::body::Body;
    use axum::http::Request;
    use depot_core::Mode;
    use http_body_util::BodyExt;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "depot-test-boundary";

    /// Initialize tracing for tests
    fn tracing_init() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_line_number(true)
            .with_target(false)
            .with_file(true)
            .try_init();
    }

    async fn test_app(max_mb: u64) -> (TempDir, FileStore, Router) {
        tracing_init();
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(3001, None, dir.path(), max_mb, Mode::Development).unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let state = Arc::new(AppState::new(Arc::new(config), store.clone()));
        (dir, store, depot_router(state))
    }

    fn multipart_body(field: &str, filename: Option<&str>, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut disposition = format!("form-data; name=\"{field}\"");
        if let Some(filename) = filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([200, 40, 90]),
        ))
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_png_upload_is_served_as_resized_webp() {
        let (_dir, _store, app) = test_app(50).await;

        let response = app
            .clone()
            .oneshot(upload_request(multipart_body(
                "file",
                Some("photo.png"),
                "image/png",
                &png(2000, 1000),
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let descriptor = body_json(response).await;
        assert_eq!(descriptor["mediaType"], "image/webp");
        assert_eq!(descriptor["originalName"], "photo.png");
        let filename = descriptor["filename"].as_str().unwrap().to_string();
        assert!(filename.ends_with(".webp"));
        assert_eq!(
            descriptor["url"],
            format!("http://localhost:3001/files/{filename}")
        );

        let response = app
            .oneshot(get_request(&format!("/files/{filename}?width=500")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        assert_eq!(response.headers()[header::CACHE_CONTROL], CACHE_CONTROL);
        let resized = image::load_from_memory(&body_bytes(response).await).unwrap();
        assert_eq!((resized.width(), resized.height()), (500, 250));
    }

    #[tokio::test]
    async fn test_invalid_width_serves_stored_bytes() {
        let (_dir, store, app) = test_app(50).await;
        let stored = png(64, 32);
        store.write_bytes("1-plain.png", &stored).await.unwrap();

        for uri in [
            "/files/1-plain.png",
            "/files/1-plain.png?width=abc",
            "/files/1-plain.png?width=0",
            "/files/1-plain.png?width=9000",
        ] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
            assert_eq!(body_bytes(response).await, stored, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let (_dir, store, app) = test_app(50).await;

        let response = app
            .clone()
            .oneshot(upload_request(multipart_body("note", None, "text/plain", b"hi")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "No file provided" })
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No file provided");

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_filename_counts_as_no_file() {
        let (_dir, store, app) = test_app(50).await;

        let response = app
            .oneshot(upload_request(multipart_body(
                "file",
                Some(""),
                "application/octet-stream",
                b"",
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "No file provided" })
        );
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let (_dir, store, app) = test_app(1).await;
        let payload = vec![0u8; 1024 * 1024 + 4096];

        let response = app
            .oneshot(upload_request(multipart_body(
                "file",
                Some("big.bin"),
                "application/octet-stream",
                &payload,
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "File too large. Maximum size is 1MB" })
        );
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (_dir, _store, app) = test_app(50).await;

        let response = app
            .clone()
            .oneshot(get_request("/files/nonexistent.webp"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(response).await, b"File not found");

        let response = app.oneshot(get_request("/files/..%2FCargo.toml")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let (_dir, _store, app) = test_app(50).await;

        let response = app
            .clone()
            .oneshot(upload_request(multipart_body(
                "file",
                Some("notes.txt"),
                "text/plain",
                b"hello depot",
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let descriptor = body_json(response).await;
        assert_eq!(descriptor["mediaType"], "text/plain");
        assert_eq!(descriptor["size"], 11);

        let filename = descriptor["filename"].as_str().unwrap();
        let response = app
            .oneshot(get_request(&format!("/files/{filename}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"hello depot");
    }

    #[tokio::test]
    async fn test_health_and_landing() {
        let (_dir, _store, app) = test_app(50).await;

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(html.contains("POST /upload"));
        assert!(html.contains("port 3001"));
    }

    #[tokio::test]
    async fn test_production_cors_allows_subdomains_only() {
        let (_dir, _store, app) = test_app(50).await;
        let app = app.layer(cors_layer(Mode::Production, vec!["example.com".to_string()]));

        let with_origin = |origin: &str| {
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(with_origin("https://cdn.example.com"))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://cdn.example.com"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );

        let response = app
            .oneshot(with_origin("https://evil.net"))
            .await
            .unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_development_cors_mirrors_any_origin() {
        let (_dir, _store, app) = test_app(50).await;
        let app = app.layer(cors_layer(Mode::Development, Vec::new()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }
}
