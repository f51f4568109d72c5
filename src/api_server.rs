// Axum API Server Module
//
// Purpose: REST API over the recipe solver and composition evaluator, plus an
// interactive analyzer session that forwards images to the vision backend.
//
// Stateless endpoints (solve, batch, evaluate, target edit, share link,
// one-shot analyze) can be called by any client. The /api/session endpoints
// drive a single in-memory session through the SessionState reducer.

use axum::{
    extract::{DefaultBodyLimit, Multipart, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};

use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};

use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServerConfig;
use crate::evaluator::{CompositionEvaluator, MassScoreSet};
use crate::filler_policy::{complement_filler, update_target, TargetEdit, TargetField};
use crate::profile::{TargetProfile, DEFAULT_NUTRIENT_PCT, DEFAULT_TOTAL_WEIGHT};
use crate::session::{CropQuad, SessionEvent, SessionState, ShareLink, DEFAULT_THRESHOLD};
use crate::solver::{NpkTarget, RecipeError, RecipePlan, RecipeSolver};
use crate::vision::{AnalysisRequest, Debouncer, VisionClient, VisionError};

/// Upload limit for analysis images
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Image currently loaded into the analyzer session
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct AppState {
    pub solver: RecipeSolver,
    pub evaluator: CompositionEvaluator,
    pub vision: VisionClient,
    pub cache: Cache<String, serde_json::Value>,
    pub session: Arc<Mutex<SessionState>>,
    pub image: Arc<RwLock<Option<UploadedImage>>>,
    pub debouncer: Debouncer,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        config.tolerances.validate()?;

        tracing::info!("Initializing recipe solver and evaluator...");
        let solver = RecipeSolver::with_tolerances(config.tolerances);
        let evaluator = CompositionEvaluator::new(config.tolerances);

        let vision = VisionClient::new(config.vision_url.clone(), config.vision_timeout)?;
        tracing::info!("Vision client ready for {}", vision.endpoint());

        tracing::info!("Initializing Moka cache...");
        let cache = Cache::builder()
            .max_capacity(10_000) // 10K entries
            .time_to_live(Duration::from_secs(300)) // 5 min TTL
            .build();

        Ok(Self {
            solver,
            evaluator,
            vision,
            cache,
            session: Arc::new(Mutex::new(SessionState::default())),
            image: Arc::new(RwLock::new(None)),
            debouncer: Debouncer::new(config.debounce),
        })
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Recipe endpoints
        .route("/api/recipe/solve", post(solve_recipe))
        .route("/api/recipe/batch", post(solve_recipe_batch))

        // Evaluation endpoints
        .route("/api/composition/evaluate", post(evaluate_composition))
        .route("/api/target/edit", post(edit_target))
        .route("/api/share", get(share_link))
        .route("/api/analyze", post(analyze_image))

        // Analyzer session
        .route("/api/session", get(get_session))
        .route("/api/session/seed", post(seed_session))
        .route("/api/session/target", post(session_edit_target))
        .route("/api/session/weight", post(session_set_weight))
        .route("/api/session/threshold", post(session_set_threshold))
        .route("/api/session/crop", post(session_set_crop))
        .route("/api/session/image", post(session_upload_image))

        // Middleware (applied in reverse order)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CompressionLayer::new()) // gzip + brotli compression
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()) // Request logging
        .with_state(state)
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Target N, P, K percentages and batch weight
#[derive(Debug, Clone, Copy, Deserialize)]
struct SolveRequest {
    n: f64,
    p: f64,
    k: f64,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    DEFAULT_TOTAL_WEIGHT
}

impl SolveRequest {
    fn target(&self) -> NpkTarget {
        NpkTarget::new(self.n, self.p, self.k)
    }

    fn cache_key(&self) -> String {
        format!("solve:{}:{}:{}:{}", self.n, self.p, self.k, self.weight)
    }
}

async fn solve_recipe(
    State(state): State<AppState>,
    Json(request): Json<SolveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cache_key = request.cache_key();

    if let Some(cached) = state.cache.get(&cache_key).await {
        tracing::debug!("Cache hit for {}", cache_key);
        return Ok(Json(cached));
    }

    let plan = state.solver.solve(&request.target(), request.weight)?;
    let result = plan_json(&state.solver, &request, &plan);

    tracing::info!(
        "Solved {}-{}-{} for {} kg",
        request.n, request.p, request.k, request.weight
    );

    state.cache.insert(cache_key, result.clone()).await;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct BatchSolveRequest {
    targets: Vec<SolveRequest>,
}

async fn solve_recipe_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchSolveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let start = std::time::Instant::now();
    let solver = state.solver;
    let targets = request.targets;

    // Rayon runs on a blocking thread so the async workers stay free
    let (targets, results) = tokio::task::spawn_blocking(move || {
        let inputs: Vec<(NpkTarget, f64)> = targets.iter().map(|t| (t.target(), t.weight)).collect();
        let results = solver.solve_batch(&inputs);
        (targets, results)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Rayon task failed: {}", e)))?;

    let data: Vec<serde_json::Value> = targets
        .iter()
        .zip(results.iter())
        .map(|(request, result)| match result {
            Ok(plan) => plan_json(&solver, request, plan),
            Err(e) => recipe_error_json(e),
        })
        .collect();

    let feasible = results.iter().filter(|r| r.is_ok()).count();
    tracing::info!(
        "Batch solved {} targets ({} feasible) in {:?}",
        data.len(), feasible, start.elapsed()
    );

    Ok(Json(serde_json::json!({
        "count": data.len(),
        "feasible": feasible,
        "results": data,
    })))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    scores: MassScoreSet,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    target: TargetProfile,
}

async fn evaluate_composition(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_weight(request.weight)?;
    validate_scores(&request.scores)?;
    Ok(Json(evaluation_json(&state, &request.scores, request.weight, &request.target)))
}

#[derive(Debug, Deserialize)]
struct EditTargetRequest {
    #[serde(default)]
    target: TargetProfile,
    field: TargetField,
    value: f64,
}

async fn edit_target(
    Json(request): Json<EditTargetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_percentage(request.value)?;
    let updated = update_target(&request.target, TargetEdit::new(request.field, request.value));

    Ok(Json(serde_json::json!({
        "target": updated,
        "total": updated.total(),
        "grade": updated.grade(),
    })))
}

async fn share_link(RawQuery(query): RawQuery) -> Json<serde_json::Value> {
    let link = ShareLink::parse(query.as_deref().unwrap_or(""));

    Json(serde_json::json!({
        "target": link.target,
        "weight": link.total_weight,
        "query": link.to_query(),
        "href": link.href("/"),
    }))
}

/// Fields of the one-shot analyze form
#[derive(Debug, Default)]
struct AnalyzeForm {
    image: Option<UploadedImage>,
    threshold: Option<u8>,
    crop: Option<CropQuad>,
    n: Option<f64>,
    p: Option<f64>,
    k: Option<f64>,
    filler: Option<f64>,
    weight: Option<f64>,
}

impl AnalyzeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = AnalyzeForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                let file_name = field.file_name().unwrap_or("image.jpg").to_string();
                let content_type = field.content_type().unwrap_or("image/jpeg").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read image: {}", e)))?;
                form.image = Some(UploadedImage { bytes: bytes.to_vec(), file_name, content_type });
                continue;
            }

            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read field '{}': {}", name, e)))?;

            match name.as_str() {
                "threshold" => form.threshold = Some(parse_field(&name, &text)?),
                "points" => form.crop = parse_points(&text)?,
                "n" => form.n = Some(parse_field(&name, &text)?),
                "p" => form.p = Some(parse_field(&name, &text)?),
                "k" => form.k = Some(parse_field(&name, &text)?),
                "filler" => form.filler = Some(parse_field(&name, &text)?),
                "weight" => form.weight = Some(parse_field(&name, &text)?),
                _ => tracing::debug!("Ignoring multipart field '{}'", name),
            }
        }

        Ok(form)
    }

    fn target(&self) -> TargetProfile {
        let n = self.n.unwrap_or(DEFAULT_NUTRIENT_PCT);
        let p = self.p.unwrap_or(DEFAULT_NUTRIENT_PCT);
        let k = self.k.unwrap_or(DEFAULT_NUTRIENT_PCT);
        TargetProfile {
            n,
            p,
            k,
            filler: self.filler.unwrap_or_else(|| complement_filler(n, p, k)),
        }
    }
}

async fn analyze_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = AnalyzeForm::read(multipart).await?;
    let target = form.target();
    let weight = form.weight.unwrap_or(DEFAULT_TOTAL_WEIGHT);
    validate_weight(weight)?;

    let image = form
        .image
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;
    let threshold = form.threshold.unwrap_or(DEFAULT_THRESHOLD);

    let request = AnalysisRequest::new(image.bytes.clone(), threshold)
        .with_file(&image.file_name, &image.content_type)
        .with_crop(form.crop);
    let response = state.vision.analyze(request).await?;
    let scores = response.scores();

    tracing::info!("Analyzed image '{}' at threshold {}", image.file_name, threshold);

    Ok(Json(serde_json::json!({
        "image_b64": response.image_b64,
        "raw_cropped_b64": response.raw_cropped_b64,
        "scores": scores,
        "histogram": response.histogram,
        "auto_threshold": response.auto_threshold,
        "result": evaluation_json(&state, &scores, weight, &target),
    })))
}

// ============================================================================
// Session Handlers
// ============================================================================

async fn get_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.session.lock().await.clone();
    Json(session_view(&state, &session))
}

/// Replace the session with one seeded from share-link query parameters
async fn seed_session(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Json<serde_json::Value> {
    let link = ShareLink::parse(query.as_deref().unwrap_or(""));
    state.debouncer.cancel();
    *state.image.write().await = None;

    let session = apply_event(&state, SessionEvent::Seed(link)).await;

    tracing::info!("Session seeded with {} at {} kg", link.target.grade(), link.total_weight);
    Json(session_view(&state, &session))
}

#[derive(Debug, Deserialize)]
struct SessionEditRequest {
    field: TargetField,
    value: f64,
}

async fn session_edit_target(
    State(state): State<AppState>,
    Json(request): Json<SessionEditRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_percentage(request.value)?;
    let event = SessionEvent::EditTarget(TargetEdit::new(request.field, request.value));
    let session = apply_event(&state, event).await;
    Ok(Json(session_view(&state, &session)))
}

#[derive(Debug, Deserialize)]
struct WeightRequest {
    weight: f64,
}

async fn session_set_weight(
    State(state): State<AppState>,
    Json(request): Json<WeightRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_weight(request.weight)?;
    let session = apply_event(&state, SessionEvent::SetTotalWeight(request.weight)).await;
    Ok(Json(session_view(&state, &session)))
}

#[derive(Debug, Deserialize)]
struct ThresholdRequest {
    threshold: u8,
}

/// Threshold changes re-run the analysis after the debounce period
async fn session_set_threshold(
    State(state): State<AppState>,
    Json(request): Json<ThresholdRequest>,
) -> impl IntoResponse {
    let session = apply_event(&state, SessionEvent::SetThreshold(request.threshold)).await;

    if state.image.read().await.is_some() {
        tracing::debug!("Re-analysis at threshold {} in {:?}", request.threshold, state.debouncer.delay());
        let task_state = state.clone();
        tokio::spawn(async move {
            if task_state.debouncer.settle().await {
                run_session_analysis(&task_state, false).await;
            }
        });
    }

    (StatusCode::ACCEPTED, Json(session_view(&state, &session)))
}

#[derive(Debug, Deserialize)]
struct CropRequest {
    points: Option<CropQuad>,
}

async fn session_set_crop(
    State(state): State<AppState>,
    Json(request): Json<CropRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.image.read().await.is_none() {
        return Err(AppError::BadRequest("No image loaded".to_string()));
    }
    if let Some(points) = &request.points {
        validate_points(points)?;
    }

    state.debouncer.cancel();
    apply_event(&state, SessionEvent::SetCrop(request.points)).await;
    let session = run_session_analysis(&state, true).await;
    Ok(Json(session_view(&state, &session)))
}

/// Load a new image (multipart `file`, optional `points`) and analyze it
async fn session_upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = AnalyzeForm::read(multipart).await?;
    let image = form
        .image
        .ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;
    if image.bytes.is_empty() {
        return Err(AppError::BadRequest("Image is empty".to_string()));
    }

    tracing::info!("Session image '{}' ({} bytes)", image.file_name, image.bytes.len());

    state.debouncer.cancel();
    *state.image.write().await = Some(image);
    apply_event(&state, SessionEvent::ImageSelected).await;
    apply_event(&state, SessionEvent::SetCrop(form.crop)).await;

    let session = run_session_analysis(&state, true).await;
    Ok(Json(session_view(&state, &session)))
}

async fn apply_event(state: &AppState, event: SessionEvent) -> SessionState {
    let mut session = state.session.lock().await;
    *session = session.apply(event);
    session.clone()
}

/// Issue one sequence-tagged analysis of the session image and fold the
/// response back into the session. Returns the session afterwards.
async fn run_session_analysis(state: &AppState, first_load: bool) -> SessionState {
    let image = state.image.read().await.clone();
    let Some(image) = image else {
        return state.session.lock().await.clone();
    };

    let ticket = {
        let mut session = state.session.lock().await;
        let (next, ticket) = session.request_analysis(first_load);
        *session = next;
        ticket
    };

    let request = AnalysisRequest::from_ticket(image.bytes, &ticket)
        .with_file(&image.file_name, &image.content_type);

    let event = match state.vision.analyze(request).await {
        Ok(response) => SessionEvent::AnalysisSucceeded {
            sequence: ticket.sequence,
            first_load,
            snapshot: response.into_snapshot(),
        },
        Err(e) => SessionEvent::AnalysisFailed {
            sequence: ticket.sequence,
            message: e.to_string(),
        },
    };

    apply_event(state, event).await
}

// ============================================================================
// Helper Functions
// ============================================================================

fn plan_json(solver: &RecipeSolver, request: &SolveRequest, plan: &RecipePlan) -> serde_json::Value {
    let materials = solver.materials();
    serde_json::json!({
        "ok": true,
        "target": request.target(),
        "weight": request.weight,
        "plan": plan,
        "rows": plan.rows(materials),
        "delivered": plan.nutrient_content(materials),
    })
}

fn recipe_error_json(error: &RecipeError) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "error": error.user_message(),
        "kind": error.kind(),
    })
}

fn evaluation_json(
    state: &AppState,
    scores: &MassScoreSet,
    weight: f64,
    target: &TargetProfile,
) -> serde_json::Value {
    let evaluation = state.evaluator.evaluate(scores, weight, target);
    serde_json::json!({
        "target": target,
        "weight": weight,
        "evaluation": evaluation,
        "report": evaluation.report(target),
        "all_within_tolerance": evaluation.all_within_tolerance(),
    })
}

fn session_view(state: &AppState, session: &SessionState) -> serde_json::Value {
    let recipe = match session.recipe(&state.solver) {
        Ok(plan) => serde_json::json!({
            "ok": true,
            "plan": plan,
            "rows": plan.rows(state.solver.materials()),
        }),
        Err(e) => recipe_error_json(&e),
    };

    let evaluation = session
        .analysis
        .as_ref()
        .map(|_| evaluation_json(state, &session.scores(), session.total_weight, &session.target));

    serde_json::json!({
        "session": session,
        "recipe": recipe,
        "evaluation": evaluation,
        "share_query": session.share_link().to_query(),
    })
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid value for '{}': {:?}", name, raw)))
}

fn parse_points(raw: &str) -> Result<Option<CropQuad>, AppError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let points: CropQuad = serde_json::from_str(raw)
        .map_err(|e| AppError::BadRequest(format!("Invalid crop points: {}", e)))?;
    validate_points(&points)?;
    Ok(Some(points))
}

fn validate_points(points: &CropQuad) -> Result<(), AppError> {
    if points.iter().all(|p| p.is_normalized()) {
        Ok(())
    } else {
        Err(AppError::BadRequest("Crop points must lie within [0, 1]".to_string()))
    }
}

fn validate_weight(weight: f64) -> Result<(), AppError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid batch weight: {}", weight)))
    }
}

fn validate_scores(scores: &MassScoreSet) -> Result<(), AppError> {
    match scores.iter().find(|(_, score)| !score.is_finite() || *score < 0.0) {
        Some((category, score)) => Err(AppError::BadRequest(format!(
            "Invalid mass score for {}: {}",
            category.display_label(),
            score
        ))),
        None => Ok(()),
    }
}

fn validate_percentage(value: f64) -> Result<(), AppError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid percentage: {}", value)))
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
enum AppError {
    Recipe(RecipeError),
    Vision(VisionError),
    BadRequest(String),
    Internal(String),
}

impl From<RecipeError> for AppError {
    fn from(error: RecipeError) -> Self {
        match error {
            RecipeError::InvalidInput { .. } => AppError::BadRequest(error.user_message()),
            other => AppError::Recipe(other),
        }
    }
}

impl From<VisionError> for AppError {
    fn from(error: VisionError) -> Self {
        AppError::Vision(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::Recipe(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": e.user_message(), "kind": e.kind() }),
            ),
            AppError::Vision(VisionError::InvalidRequest { reason }) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": reason }))
            }
            AppError::Vision(e) => {
                tracing::warn!("Vision backend failure: {}", e);
                (StatusCode::BAD_GATEWAY, serde_json::json!({ "error": e.user_message() }))
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg })),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}
