//! Video upload and processing endpoint

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::SharedState;

/// Multipart field holding the video.
const FILE_FIELD: &str = "file";

#[derive(Serialize, Debug)]
pub struct ProcessResponse {
    pub message: String,
    pub input_filename: String,
    pub output_filename: String,
    pub output_path: String,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
}

/// Keep only the final path component of a client-supplied name.
fn sanitize_filename(name: Option<&str>) -> String {
    name.and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// POST /process-video/ - Glow every detection in the uploaded video
pub async fn process_video(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let (input_filename, output_filename, input_path, output_path, bytes) = loop {
        let mut field = multipart
            .next_field()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?
            .ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    format!("missing multipart field '{FILE_FIELD}'"),
                )
            })?;
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let original_name = sanitize_filename(field.file_name());
        info!(file = %original_name, "received video upload");

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("video/") {
            warn!(content_type = %content_type, "unsupported file type uploaded");
            return Err(api_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported file type. Please upload a video.",
            ));
        }

        let unique_id = Uuid::new_v4();
        let input_filename = format!("{unique_id}_{original_name}");
        let output_filename = format!("{unique_id}_processed.mp4");
        let input_path = state.config.uploads_dir.join(&input_filename);
        let output_path = state.config.outputs_dir.join(&output_filename);

        let bytes = store_upload(&mut field, &input_path).await?;
        break (input_filename, output_filename, input_path, output_path, bytes);
    };

    info!(input = %input_filename, bytes, "processing video");
    let job_state = Arc::clone(&state);
    let job_output = output_path.clone();
    let result = tokio::task::spawn_blocking(move || {
        glowball_core::process(
            &input_path,
            &job_output,
            job_state.session.as_ref(),
            &job_state.pipeline,
        )
    })
    .await;

    let processed_path = match result {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            error!(input = %input_filename, "failed to process video: {:#}", anyhow::Error::from(e));
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process video.",
            ));
        }
        Err(join) => {
            error!(input = %input_filename, "processing task aborted: {join}");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process video.",
            ));
        }
    };

    info!(
        input = %input_filename,
        output = %processed_path.display(),
        "successfully processed video"
    );
    Ok(Json(ProcessResponse {
        message: "Video processed successfully".to_string(),
        input_filename,
        output_filename,
        output_path: processed_path.display().to_string(),
    }))
}

/// Stream `field` into a new file at `path`. A failed upload leaves no file.
async fn store_upload(field: &mut Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let stored = write_chunks(field, path).await;
    if stored.is_err() {
        if let Err(e) = fs::remove_file(path).await {
            debug!(path = %path.display(), "could not remove partial upload: {e}");
        }
    }
    stored
}

async fn write_chunks(field: &mut Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let store_failed = |e: std::io::Error| {
        error!(path = %path.display(), "failed to store upload: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload.")
    };

    let mut file = fs::File::create(path).await.map_err(store_failed)?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        file.write_all(&chunk).await.map_err(store_failed)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(store_failed)?;
    Ok(written)
}
