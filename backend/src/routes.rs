use std::path::PathBuf;
use std::time::Duration;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use shared::{ImageMode, MediaKind, RequestId};

use crate::adapters::{predict_image_response, predict_video_response};
use crate::error::PipelineError;
use crate::pipeline::{Analysis, AnalysisRequest, Orchestrator};

/// Shared by every worker through `web::Data`.
pub struct ApiState {
    pub orchestrator: Orchestrator,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    num_frames: Option<usize>,
    generate_gradcam: Option<bool>,
}

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    num_frames: Option<usize>,
    generate_gradcam: Option<bool>,
}

impl UploadForm {
    /// Form fields win over query parameters.
    fn merge(mut self, query: &AnalyzeQuery) -> Self {
        self.num_frames = self.num_frames.or(query.num_frames);
        self.generate_gradcam = self.generate_gradcam.or(query.generate_gradcam);
        self
    }

    fn take_file(&mut self) -> Result<Vec<u8>, PipelineError> {
        self.file
            .take()
            .ok_or_else(|| PipelineError::InvalidRequest("multipart field `file` is required".into()))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, results_dir: PathBuf) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api")
                .route("/analyze/image", web::post().to(analyze_image))
                .route("/analyze/video", web::post().to(analyze_video))
                .route("/predict/image", web::post().to(predict_image))
                .route("/predict/video", web::post().to(predict_video))
                .route("/cleanup/{request_id}", web::delete().to(cleanup)),
        )
        .service(Files::new("/results", results_dir));
}

async fn root(state: web::Data<ApiState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "DeepTrust deepfake detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "device": state.orchestrator.context().classifier.device(),
    }))
}

async fn health(state: web::Data<ApiState>) -> HttpResponse {
    let context = state.orchestrator.context();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "device": context.classifier.device(),
        "saliency": context.saliency_name(),
    }))
}

fn parse_field<T: std::str::FromStr>(name: &str, data: &[u8]) -> Result<T, PipelineError> {
    let text = String::from_utf8_lossy(data);
    text.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| PipelineError::InvalidRequest(format!("invalid value {:?} for `{}`", text, name)))
}

async fn read_upload(mut payload: Multipart, limit: usize) -> Result<UploadForm, PipelineError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;
            if data.len() + chunk.len() > limit {
                return Err(PipelineError::UploadTooLarge {
                    size: data.len() + chunk.len(),
                    limit,
                });
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "file" => form.file = Some(data),
            "num_frames" => form.num_frames = Some(parse_field(&name, &data)?),
            "generate_gradcam" => form.generate_gradcam = Some(parse_field(&name, &data)?),
            other => log::debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(form)
}

/// Runs the pipeline on the blocking pool. On timeout the job keeps running
/// and its uncommitted artifacts are removed when it finishes.
async fn run(state: &web::Data<ApiState>, request: AnalysisRequest) -> Result<Analysis, PipelineError> {
    let job_state = state.clone();
    let job = web::block(move || job_state.orchestrator.analyze(request));

    match tokio::time::timeout(state.request_timeout, job).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Analysis worker failed: {}", e);
            Err(PipelineError::Io(std::io::Error::other(e.to_string())))
        }
        Err(_) => {
            error!("Analysis timed out after {:?}", state.request_timeout);
            Err(PipelineError::Timeout(state.request_timeout.as_secs()))
        }
    }
}

async fn analyze_image(
    state: web::Data<ApiState>,
    query: web::Query<AnalyzeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    let mut form = read_upload(payload, state.max_upload_bytes).await?.merge(&query);
    let request = AnalysisRequest::image(form.take_file()?, ImageMode::FaceRequired)
        .with_explain(form.generate_gradcam.unwrap_or(true));
    let analysis = run(&state, request).await?.commit();
    Ok(HttpResponse::Ok().json(&analysis.record))
}

async fn analyze_video(
    state: web::Data<ApiState>,
    query: web::Query<AnalyzeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    let mut form = read_upload(payload, state.max_upload_bytes).await?.merge(&query);
    let request = AnalysisRequest::video(form.take_file()?, form.num_frames)
        .with_explain(form.generate_gradcam.unwrap_or(true));
    let analysis = run(&state, request).await?.commit();
    Ok(HttpResponse::Ok().json(&analysis.record))
}

/// Legacy shape. Saliency images travel inline, so nothing is kept on disk.
async fn predict_image(
    state: web::Data<ApiState>,
    query: web::Query<AnalyzeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    let mut form = read_upload(payload, state.max_upload_bytes).await?.merge(&query);
    let request = AnalysisRequest::image(form.take_file()?, ImageMode::Direct)
        .with_explain(form.generate_gradcam.unwrap_or(true));
    let analysis = run(&state, request).await?;
    Ok(HttpResponse::Ok().json(predict_image_response(&analysis)))
}

async fn predict_video(
    state: web::Data<ApiState>,
    query: web::Query<AnalyzeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    let mut form = read_upload(payload, state.max_upload_bytes).await?.merge(&query);
    let request = AnalysisRequest::video(form.take_file()?, form.num_frames).with_explain(false);
    let analysis = match run(&state, request).await {
        Ok(analysis) => analysis,
        // The legacy endpoint answered a faceless video with a plain 400.
        Err(e @ PipelineError::NoFaceDetected(MediaKind::Video)) => {
            return Ok(HttpResponse::BadRequest().json(json!({
                "error": e.code(),
                "detail": "No faces detected in video",
            })));
        }
        Err(e) => return Err(e),
    };
    Ok(HttpResponse::Ok().json(predict_video_response(&analysis.record)))
}

async fn cleanup(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PipelineError> {
    let raw = path.into_inner();
    let request_id = RequestId::parse(&raw)
        .ok_or_else(|| PipelineError::InvalidRequest(format!("{:?} is not a request id", raw)))?;
    let deleted = state.orchestrator.store().cleanup(&request_id)?;
    info!("Cleanup of {}: deleted={}", request_id, deleted);
    Ok(HttpResponse::Ok().json(json!({
        "request_id": request_id,
        "deleted": deleted,
    })))
}
