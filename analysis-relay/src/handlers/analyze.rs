use crate::models::{InboundFile, SPREADSHEET_CONTENT_TYPE};
use crate::startup::AppState;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

const FILE_FIELD: &str = "file";

/// `POST /analyze`: relay the uploaded `file` field to the analysis server
/// and return the spreadsheet it produces as a download.
pub async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let multipart = multipart.map_err(|e| {
        AppError::UnprocessableEntity(format!("Expected a multipart form: {}", e.body_text()))
    })?;
    let upload = read_upload(multipart).await?;
    let filename = upload.filename.clone();

    tracing::info!(
        filename = %filename,
        size = upload.size(),
        content_type = %upload.content_type,
        "File received"
    );

    let result = state.relay.relay(upload).await.map_err(|e| {
        tracing::error!(filename = %filename, error = %e, "Analysis relay failed");
        AppError::from(e)
    })?;

    let disposition = HeaderValue::from_str(&result.content_disposition()).map_err(|e| {
        tracing::error!(filename = %filename, error = %e, "Filename cannot be used in a header");
        AppError::InternalError(anyhow::anyhow!("Invalid filename for download: {}", e))
    })?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(SPREADSHEET_CONTENT_TYPE),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        result.bytes,
    )
        .into_response())
}

/// Pulls the `file` field out of the form, buffering it in memory. Other
/// fields are skipped.
async fn read_upload(mut multipart: Multipart) -> Result<InboundFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error("Failed to read multipart form", e))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| {
                tracing::error!(filename = %filename, error = %e, "Failed to read upload bytes");
                form_error("Failed to read file bytes", e)
            })?
            .to_vec();

        return Ok(InboundFile::new(filename, content_type, bytes));
    }

    Err(AppError::UnprocessableEntity(format!(
        "Field '{}' is required",
        FILE_FIELD
    )))
}

fn form_error(context: &str, err: MultipartError) -> AppError {
    let message = format!("{}: {}", context, err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(message)
    } else {
        AppError::UnprocessableEntity(message)
    }
}
