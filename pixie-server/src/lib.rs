//! The HTTP surface: a welcome route and the multipart edit endpoint.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pixie_core::{EditError, EditService};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const WELCOME_MESSAGE: &str =
    "Welcome to the Image Editor. Use the /edit-image/ endpoint to upload an image and an instruction.";
const MISSING_INSTRUCTION: &str = "An editing instruction is required.";
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

// Application state containing the edit service.
#[derive(Clone)]
pub struct AppState(pub Arc<EditService>);

pub fn build_router(state: AppState, front_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(front_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/", get(welcome_handler))
        .route("/edit-image/", post(edit_image_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn welcome_handler() -> impl IntoResponse {
    Json(json!({ "message": WELCOME_MESSAGE }))
}

#[derive(Default)]
struct EditForm {
    instruction: Option<String>,
    file: Option<Vec<u8>>,
    url: Option<String>,
}

impl EditForm {
    async fn read(mut multipart: Multipart) -> Result<Self, EditError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "instruction" => {
                    form.instruction = Some(field.text().await.map_err(invalid_form)?)
                }
                "file" => form.file = Some(field.bytes().await.map_err(invalid_form)?.to_vec()),
                "url" => form.url = Some(field.text().await.map_err(invalid_form)?),
                _ => {}
            }
        }
        Ok(form)
    }
}

fn invalid_form(error: MultipartError) -> EditError {
    EditError::Validation(format!("Invalid multipart form: {error}"))
}

async fn edit_image_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match EditForm::read(multipart).await {
        Ok(form) => form,
        Err(error) => return error_response(error),
    };
    let Some(instruction) = form.instruction else {
        return error_response(EditError::Validation(MISSING_INSTRUCTION.to_string()));
    };
    let path = match state.0.handle(instruction, form.file, form.url).await {
        Ok(path) => path,
        Err(error) => return error_response(error),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(error) => error_response(
            anyhow::Error::new(error)
                .context(format!("failed to read {}", path.display()))
                .into(),
        ),
    }
}

/// Client mistakes get a 400 carrying the real reason; everything else is
/// logged server-side and collapsed into the generic 500 payload.
fn error_response(error: EditError) -> Response {
    if error.is_client_error() {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": error.to_string() })),
        )
            .into_response()
    } else {
        tracing::error!(error = ?error, "image edit failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "Cannot identify image file" })),
        )
            .into_response()
    }
}
