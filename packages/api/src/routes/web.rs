use super::{classify, record};
use crate::error::ApiError;
use crate::state::AppState;
use axum::Form;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{
    Router,
    routing::{get, post},
};
use mien_serving::{InputSpec, PredictionResult, RawInput};
use serde::Deserialize;

/// Form field carrying the delimited feature string
pub const INPUT_FIELD: &str = "input_data";

/// Multipart field carrying the uploaded photo
pub const IMAGE_FIELD: &str = "image";

/// Browser form, its submission and the upload page
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/web", get(index))
        .route("/predict_web", post(predict_web))
        .route("/predict_image", post(predict_image))
}

#[derive(Deserialize, Debug)]
pub struct WebForm {
    pub input_data: String,
}

/// HTML page, or an HTML error page with the failure's status
pub struct WebPage(Result<String, (StatusCode, String)>);

impl IntoResponse for WebPage {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(body) => Html(body).into_response(),
            Err((status, body)) => (status, Html(body)).into_response(),
        }
    }
}

fn render(state: &AppState, name: &str, ctx: minijinja::Value) -> Result<String, ApiError> {
    state
        .templates
        .get_template(name)
        .and_then(|t| t.render(ctx))
        .map_err(|e| ApiError::internal(format!("failed to render {name}: {e}")))
}

fn page(state: &AppState, result: Result<PredictionResult, ApiError>) -> WebPage {
    let rendered = match result {
        Ok(result) => render(state, "result.html", minijinja::context! { result => result }),
        Err(e) => Err(e),
    };

    match rendered {
        Ok(body) => WebPage(Ok(body)),
        Err(e) => {
            let body = render(
                state,
                "error.html",
                minijinja::context! { message => e.message() },
            )
            .unwrap_or_else(|_| format!("<p>Error: {}</p>", e.status()));
            WebPage(Err((e.status(), body)))
        }
    }
}

#[tracing::instrument(name = "GET /web", skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let spec = state.classifier.input_spec();
    let feature_width = match spec {
        InputSpec::Features { width } => Some(width),
        InputSpec::Image { .. } => None,
    };
    let body = render(
        &state,
        "index.html",
        minijinja::context! { feature_width => feature_width, input => spec.to_string() },
    )?;
    Ok(Html(body))
}

#[tracing::instrument(name = "POST /predict_web", skip(state, form))]
pub async fn predict_web(
    State(state): State<AppState>,
    form: Result<Form<WebForm>, FormRejection>,
) -> WebPage {
    let result = match form {
        Ok(Form(form)) => {
            classify(&state, "predict_web", RawInput::Delimited(form.input_data)).await
        }
        Err(rejection) => {
            let err = ApiError::from(rejection);
            record("predict_web", err.outcome());
            Err(err)
        }
    };
    page(&state, result)
}

#[tracing::instrument(name = "POST /predict_image", skip(state, multipart))]
pub async fn predict_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> WebPage {
    let result = match read_image(multipart).await {
        Ok(bytes) => classify(&state, "predict_image", RawInput::Image(bytes)).await,
        Err(err) => {
            record("predict_image", err.outcome());
            Err(err)
        }
    };
    page(&state, result)
}

async fn read_image(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<bytes::Bytes, ApiError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field.bytes().await?;
            tracing::debug!(size = bytes.len(), "received image upload");
            return Ok(bytes);
        }
    }
    Err(ApiError::bad_request(format!(
        "missing multipart field '{IMAGE_FIELD}'"
    )))
}
