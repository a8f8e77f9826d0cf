use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::jobs::PollResponse;
use crate::api::AppState;
use crate::bio::ranking::{sort_entries, SortKey};
use crate::data_types::{AlleleRecord, AnalysisResult, ExportFile, MhcClass, RankingEntry};
use crate::error::{MatchError, MatchResult};
use crate::export::{decode_csv, decode_excel};
use crate::input::{parse_submission, Submission, UploadedFile};
use crate::types::{AlleleId, EpletId};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let message = self.to_string();

        match self {
            MatchError::Validation(_) => {
                (StatusCode::BAD_REQUEST,
                 Json(json!({ "status": "error", "error": message }))).into_response()
            },
            MatchError::Capacity(_) => {
                (StatusCode::SERVICE_UNAVAILABLE,
                 Json(json!({ "status": "error", "error": message, "busy": true })))
                    .into_response()
            },
            MatchError::NotFound(_) => {
                (StatusCode::NOT_FOUND,
                 Json(json!({ "status": "error", "error": message }))).into_response()
            },
            MatchError::Processing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR,
                 Json(json!({ "status": "error", "error": message }))).into_response()
            },
        }
    }
}

#[derive(Default)]
struct SubmissionForm {
    file: Option<UploadedFile>,
    created_data: Option<String>,
    rsa: Option<String>,
}

fn form_error(err: impl std::fmt::Display) -> MatchError {
    MatchError::validation(format!("Invalid form data: {}", err))
}

async fn read_form(mut multipart: Multipart) -> MatchResult<SubmissionForm> {
    let mut form = SubmissionForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let field_name = field.name().unwrap_or("").to_owned();

        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_owned();
                let contents = field.bytes().await.map_err(form_error)?;
                // browsers send an empty file part when no file was chosen
                if !file_name.is_empty() || !contents.is_empty() {
                    form.file = Some(UploadedFile { file_name, contents });
                }
            },
            "created_data" => form.created_data = Some(field.text().await.map_err(form_error)?),
            "rsa" => form.rsa = Some(field.text().await.map_err(form_error)?),
            _ => (),
        }
    }

    Ok(form)
}

async fn read_submission(state: &AppState, multipart: Multipart) -> MatchResult<Submission> {
    let form = read_form(multipart).await?;

    parse_submission(form.file.as_ref(), form.created_data.as_deref(), form.rsa.as_deref(),
                     &state.config.analysis)
}

async fn submit_job(State(state): State<Arc<AppState>>, multipart: Multipart)
    -> MatchResult<Json<Value>>
{
    let submission = read_submission(&state, multipart).await?;
    let job_id = state.jobs.submit(submission)?;

    Ok(Json(json!({ "status": "queued", "id": job_id })))
}

// run the analysis while the client waits
async fn compare(State(state): State<Arc<AppState>>, multipart: Multipart)
    -> MatchResult<Json<AnalysisResult>>
{
    let submission = read_submission(&state, multipart).await?;
    let slot = state.jobs.try_reserve()?;

    let runner = state.runner.clone();
    let job_id = Uuid::new_v4().to_string();
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    // the slot goes with the analysis so it's held until the work stops,
    // even after a timeout
    let task = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        runner(&submission, &job_id)
    });

    let join_result = tokio::time::timeout(timeout, task).await
        .map_err(|_| MatchError::Processing("The analysis took too long".to_owned()))?;
    let result = join_result
        .map_err(|_| MatchError::Processing("The analysis failed unexpectedly".to_owned()))??;

    Ok(Json(result))
}

async fn poll_results(Path(job_id): Path<String>, State(state): State<Arc<AppState>>)
    -> MatchResult<(StatusCode, Json<PollResponse>)>
{
    let response = state.jobs.poll(&job_id)?;

    let status =
        if matches!(response, PollResponse::Error { .. }) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::OK
        };

    Ok((status, Json(response)))
}

async fn get_allele_ids(State(state): State<Arc<AppState>>) -> Json<Vec<AlleleId>> {
    Json(state.reference.all_allele_ids().into_iter().cloned().collect())
}

async fn get_allele(Path(allele_id): Path<String>, State(state): State<Arc<AppState>>)
    -> MatchResult<Json<AlleleRecord>>
{
    state.reference.get_allele(&allele_id)
        .map(|record| Json(record.clone()))
        .ok_or_else(|| MatchError::not_found(format!("Allele not found: {}", allele_id)))
}

async fn get_allele_eplets(Path(allele_id): Path<String>, State(state): State<Arc<AppState>>)
    -> MatchResult<Json<Vec<EpletId>>>
{
    state.reference.eplets_of_allele(&allele_id)
        .map(Json)
        .ok_or_else(|| MatchError::not_found(format!("Allele not found: {}", allele_id)))
}

fn parse_class(allele_class: &str) -> MatchResult<MhcClass> {
    MhcClass::try_from(allele_class).map_err(MatchError::Validation)
}

async fn get_consensus_seq(Path(allele_class): Path<String>, State(state): State<Arc<AppState>>)
    -> MatchResult<Json<String>>
{
    let class = parse_class(&allele_class)?;

    let consensus_seq = tokio::task::spawn_blocking(move || {
        state.reference.consensus(class).to_owned()
    }).await.map_err(|_| MatchError::Processing("Failed to build the consensus".to_owned()))?;

    Ok(Json(consensus_seq))
}

async fn get_consensus_distribution(Path(allele_class): Path<String>,
                                    State(state): State<Arc<AppState>>)
    -> MatchResult<Json<Value>>
{
    let class = parse_class(&allele_class)?;

    let distribution = tokio::task::spawn_blocking(move || {
        state.reference.consensus_distribution(class)
            .map(|distribution| json!(distribution))
            .unwrap_or_else(|| json!({}))
    }).await.map_err(|_| MatchError::Processing("Failed to build the consensus".to_owned()))?;

    Ok(Json(distribution))
}

fn export_file<'a>(result: &'a AnalysisResult, category: &str)
    -> MatchResult<&'a ExportFile>
{
    result.output_files.get(category)
        .ok_or_else(|| MatchError::not_found(format!("Unknown export category: {}", category)))
}

async fn get_export(Path((job_id, category)): Path<(String, String)>,
                    State(state): State<Arc<AppState>>)
    -> MatchResult<Response>
{
    let result = state.jobs.result(&job_id)?;
    let xlsx = decode_excel(export_file(&result, &category)?)?;

    let headers = [
        (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_owned()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}.xlsx\"", category)),
    ];

    Ok((StatusCode::OK, headers, xlsx).into_response())
}

async fn get_export_sheet(Path((job_id, category, sheet)): Path<(String, String, String)>,
                          State(state): State<Arc<AppState>>)
    -> MatchResult<Response>
{
    let result = state.jobs.result(&job_id)?;
    let csv_text = decode_csv(export_file(&result, &category)?, &sheet)?
        .ok_or_else(|| MatchError::not_found(format!("No sheet {} in {}", sheet, category)))?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv".to_owned()),
        (header::CONTENT_DISPOSITION,
         format!("attachment; filename=\"{}_{}.csv\"", category, sheet)),
    ];

    Ok((StatusCode::OK, headers, csv_text).into_response())
}

async fn get_ranking(Path((job_id, recipient_id, allele_class, sort_key)):
                         Path<(String, String, String, String)>,
                     State(state): State<Arc<AppState>>)
    -> MatchResult<Json<Vec<RankingEntry>>>
{
    let class = parse_class(&allele_class)?;
    let sort_key = SortKey::try_from(sort_key.as_str()).map_err(MatchError::Validation)?;

    let result = state.jobs.result(&job_id)?;

    let recipient_ranking = result.ranking.get(&recipient_id)
        .ok_or_else(|| MatchError::not_found(format!("Recipient not found: {}", recipient_id)))?;

    let mut entries = recipient_ranking.scores.get(&class)
        .cloned()
        .ok_or_else(|| MatchError::not_found(format!("No ranking for class {}", class)))?;

    sort_entries(&mut entries, sort_key);

    Ok(Json(entries))
}

async fn ping() -> String {
    String::from("OK") + " " + PKG_NAME + " " + VERSION
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND,
     Json(json!({
         "status": "error",
         "error": "Resource was not found."
     })))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/job_submission", post(submit_job))
        .route("/api/compare", post(compare))
        .route("/poll_results/{job_id}", get(poll_results))
        .route("/api/allele_ids", get(get_allele_ids))
        .route("/api/allele/{allele_id}", get(get_allele))
        .route("/api/eplets/{allele_id}", get(get_allele_eplets))
        .route("/api/consensus_seq/{allele_class}", get(get_consensus_seq))
        .route("/api/consensus_distribution/{allele_class}", get(get_consensus_distribution))
        .route("/api/export/{job_id}/{category}", get(get_export))
        .route("/api/export/{job_id}/{category}/{sheet}", get(get_export_sheet))
        .route("/api/ranking/{job_id}/{recipient_id}/{allele_class}/{sort_key}",
               get(get_ranking))
        .route("/ping", get(ping))
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}
