use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use shared::{
    ActivityAction, DashboardStats, ImageDetail, Label, ModelsResponse, ReportRequest,
    ReportUpdate, UploadResponse, UserStatusUpdate,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::{AuthenticatedUser, RequestOrigin};
use crate::auth::models::{AuthUser, Claims};
use crate::auth::policy::{Capability, allows};
use crate::db::Repository;
use crate::db::models::{ReportDocument, UploadedImage, User, UserActivity};
use crate::detection::DetectionOrchestrator;
use crate::error::ApiError;
use crate::inference::config::ModelConfig;
use crate::report::ReportService;
use crate::storage::adapter::StorageAdapter;
use crate::validation::{self, MAX_UPLOAD_BYTES, ValidationError};

const RECENT_IMAGES: usize = 5;
const DEFAULT_ACTIVITY_LIMIT: usize = 50;
const MAX_ACTIVITY_LIMIT: usize = 200;

pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub storage: Arc<StorageAdapter>,
    pub detection: Arc<DetectionOrchestrator>,
    pub reports: Arc<ReportService>,
    pub models: Arc<ModelConfig>,
    pub auto_detect: bool,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/auth/me").route(web::get().to(me)))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/images")
                        .route(web::post().to(upload_image))
                        .route(web::get().to(list_images)),
                )
                .service(
                    web::resource("/images/{id}")
                        .route(web::get().to(get_image))
                        .route(web::delete().to(delete_image)),
                )
                .service(web::resource("/images/{id}/file").route(web::get().to(image_file)))
                .service(web::resource("/images/{id}/detect").route(web::post().to(detect)))
                .service(
                    web::resource("/images/{id}/report").route(web::post().to(generate_report)),
                )
                .service(web::resource("/reports").route(web::get().to(list_reports)))
                .service(web::resource("/reports/{id}").route(web::patch().to(update_report)))
                .service(
                    web::resource("/reports/{id}/download").route(web::get().to(download_report)),
                )
                .service(web::resource("/dashboard").route(web::get().to(dashboard)))
                .service(web::resource("/models").route(web::get().to(models)))
                .service(web::resource("/activity").route(web::get().to(list_activity)))
                .service(
                    web::resource("/users/{id}")
                        .route(web::patch().to(set_user_status))
                        .route(web::delete().to(delete_user)),
                ),
        );
}

/// Loads the caller's row, creating or refreshing it from the token claims.
/// A deactivated row is refused before anything is written, so a token that
/// outlives its account cannot bring it back.
async fn current_user(state: &AppState, claims: &Claims) -> Result<User, ApiError> {
    let id = claims
        .user_id()
        .ok_or_else(|| ApiError::BadRequest("Invalid token subject".to_string()))?;

    let existing = state.repo.get_user(id).await?;
    if let Some(user) = &existing {
        if !user.is_active {
            log::warn!("Rejected token for deactivated user {}", id);
            return Err(ApiError::Forbidden("Account is disabled".to_string()));
        }
        if !claims.differs_from(user) {
            return Ok(user.clone());
        }
    }

    let created = existing.is_none();
    let mut user = existing.unwrap_or_else(|| {
        User::new(
            id,
            claims.email.clone(),
            claims.name.clone(),
            claims.role,
            claims.institution.clone(),
        )
    });
    user.email = claims.email.clone();
    user.name = claims.name.clone();
    user.role = claims.role;
    user.institution = claims.institution.clone();
    user.updated_at = Utc::now();
    state.repo.upsert_user(&user).await?;
    log::info!("Synced user {} ({}) from token", user.id, user.role);

    let description = if created {
        "Account created from identity token"
    } else {
        "Profile refreshed from identity token"
    };
    record(
        state,
        UserActivity::new(user.id, ActivityAction::AccountSynced, description),
    )
    .await;
    Ok(user)
}

/// Audit writes never fail the request they describe.
async fn record(state: &AppState, activity: UserActivity) {
    if let Err(e) = state.repo.record_activity(&activity).await {
        log::warn!(
            "Could not record {} for user {}: {}",
            activity.action,
            activity.user_id,
            e
        );
    }
}

async fn audit(
    state: &AppState,
    origin: &RequestOrigin,
    user_id: Uuid,
    action: ActivityAction,
    description: impl Into<String>,
) {
    let mut activity = UserActivity::new(user_id, action, description);
    activity.ip_address = origin.ip_address.clone();
    activity.user_agent = origin.user_agent.clone();
    record(state, activity).await;
}

fn require(user: &User, capability: Capability, action: &str) -> Result<(), ApiError> {
    if allows(user.role, capability) {
        Ok(())
    } else {
        log::warn!("User {} ({}) denied: {}", user.id, user.role, action);
        Err(ApiError::forbidden(action))
    }
}

fn can_see(user: &User, owner_id: Uuid) -> bool {
    owner_id == user.id || allows(user.role, Capability::ViewAllRecords)
}

/// Another user's image is reported as missing rather than forbidden.
async fn visible_image(state: &AppState, user: &User, id: Uuid) -> Result<UploadedImage, ApiError> {
    match state.repo.get_image(id).await? {
        Some(image) if can_see(user, image.user_id) => Ok(image),
        _ => Err(ApiError::NotFound(format!("Image {} not found", id))),
    }
}

async fn image_detail(state: &AppState, image: &UploadedImage) -> Result<ImageDetail, ApiError> {
    let predictions = state
        .repo
        .list_predictions_for_image(image.id)
        .await?
        .iter()
        .map(|p| p.to_summary())
        .collect();
    Ok(ImageDetail {
        image: image.to_summary(),
        predictions,
    })
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let registry = state.detection.predictor().registry();
    let loaded: Vec<String> = shared::ModelName::ALL
        .iter()
        .filter(|m| registry.is_loaded(**m))
        .map(|m| m.to_string())
        .collect();
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "remote_storage": state.storage.has_remote(),
        "models_loaded": loaded,
    }))
}

async fn me(auth: AuthenticatedUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    Ok(HttpResponse::Ok().json(AuthUser::from(user)))
}

struct UploadedFile {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

async fn read_image_field(payload: &mut Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload")
            .to_string();
        let declared = field.content_type().map(|m| m.essence_str().to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?
        {
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(ValidationError::FileTooLarge {
                    size: data.len() + chunk.len(),
                    max: MAX_UPLOAD_BYTES,
                }
                .into());
            }
            data.extend_from_slice(&chunk);
        }

        let content_type = validation::resolve_content_type(declared.as_deref(), &name);
        return Ok(UploadedFile {
            name,
            content_type,
            data,
        });
    }
    Err(ValidationError::MissingFile.into())
}

async fn upload_image(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::UploadImages, "upload images")?;

    let file = read_image_field(&mut payload).await?;
    validation::validate_upload(&file.content_type, file.data.len())?;

    let image = state
        .detection
        .ingest(user.id, &file.name, &file.content_type, &file.data)
        .await?;
    audit(
        &state,
        &origin,
        user.id,
        ActivityAction::ImageUploaded,
        format!("Uploaded {} ({} bytes)", image.filename, image.file_size),
    )
    .await;

    let mut predictions = Vec::new();
    let mut error = None;
    if state.auto_detect && allows(user.role, Capability::RunDetection) {
        match state.detection.process(image.id, user.id).await {
            Ok(records) => {
                audit(
                    &state,
                    &origin,
                    user.id,
                    ActivityAction::DetectionRun,
                    format!("Automatic detection on image {}", image.id),
                )
                .await;
                predictions = records.iter().map(|r| r.to_summary()).collect();
            }
            Err(e) => {
                log::warn!("Automatic detection failed for image {}: {}", image.id, e);
                audit(
                    &state,
                    &origin,
                    user.id,
                    ActivityAction::DetectionFailed,
                    format!("Automatic detection on image {} failed: {}", image.id, e),
                )
                .await;
                error = Some(e.to_string());
            }
        }
    }

    let image = state.repo.get_image(image.id).await?.unwrap_or(image);
    Ok(HttpResponse::Created().json(UploadResponse {
        image: image.to_summary(),
        predictions,
        error,
    }))
}

async fn list_images(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let images: Vec<_> = state
        .repo
        .list_images(user.id)
        .await?
        .iter()
        .map(|i| i.to_summary())
        .collect();
    Ok(HttpResponse::Ok().json(images))
}

async fn get_image(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let image = visible_image(&state, &user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(image_detail(&state, &image).await?))
}

async fn image_file(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let image = visible_image(&state, &user, path.into_inner()).await?;
    let bytes = state.storage.download(&image.storage_path).await?;
    Ok(HttpResponse::Ok()
        .content_type(image.content_type.as_str())
        .body(bytes))
}

async fn detect(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::RunDetection, "run detection")?;
    let image = visible_image(&state, &user, path.into_inner()).await?;

    match state.detection.process(image.id, user.id).await {
        Ok(_) => {
            audit(
                &state,
                &origin,
                user.id,
                ActivityAction::DetectionRun,
                format!("Detection on image {}", image.id),
            )
            .await
        }
        Err(e) => {
            audit(
                &state,
                &origin,
                user.id,
                ActivityAction::DetectionFailed,
                format!("Detection on image {} failed: {}", image.id, e),
            )
            .await;
            return Err(e.into());
        }
    }

    let image = state
        .repo
        .get_image(image.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Image {} not found", image.id)))?;
    Ok(HttpResponse::Ok().json(image_detail(&state, &image).await?))
}

async fn delete_image(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let image = visible_image(&state, &user, path.into_inner()).await?;

    if !state.storage.delete(&image.storage_path).await {
        log::warn!("Stored file for image {} was already gone", image.id);
    }
    state.repo.delete_image(image.id).await?;
    log::info!("User {} deleted image {}", user.id, image.id);
    audit(
        &state,
        &origin,
        user.id,
        ActivityAction::ImageDeleted,
        format!("Deleted {}", image.filename),
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

async fn generate_report(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::GenerateReports, "generate reports")?;
    let image = visible_image(&state, &user, path.into_inner()).await?;
    let (patient, notes) = validation::validate_report_request(body.into_inner())?;

    let report = state
        .reports
        .generate(image.id, &user, patient, notes)
        .await?;
    audit(
        &state,
        &origin,
        user.id,
        ActivityAction::ReportGenerated,
        format!("Report {} for image {}", report.document.id, image.id),
    )
    .await;

    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", report.file_name()),
        ))
        .insert_header(("X-Report-Id", report.document.id.to_string()))
        .body(report.pdf))
}

async fn list_reports(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let reports: Vec<_> = state
        .repo
        .list_reports(user.id)
        .await?
        .iter()
        .map(|r| r.to_summary())
        .collect();
    Ok(HttpResponse::Ok().json(reports))
}

async fn visible_report(
    state: &AppState,
    user: &User,
    id: Uuid,
) -> Result<ReportDocument, ApiError> {
    match state.repo.get_report(id).await? {
        Some(report) if can_see(user, report.user_id) => Ok(report),
        _ => Err(ApiError::NotFound(format!("Report {} not found", id))),
    }
}

async fn update_report(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ReportUpdate>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::GenerateReports, "edit reports")?;
    let report = visible_report(&state, &user, path.into_inner()).await?;

    let update = body.into_inner();
    let report = state.reports.amend(report, &update).await?;
    let action = if report.is_finalized {
        ActivityAction::ReportFinalized
    } else {
        ActivityAction::ReportUpdated
    };
    audit(
        &state,
        &origin,
        user.id,
        action,
        format!("Report {}", report.id),
    )
    .await;
    Ok(HttpResponse::Ok().json(report.to_summary()))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

async fn list_activity(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
    query: web::Query<ActivityQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    let activities: Vec<_> = state
        .repo
        .list_activities(user.id, limit)
        .await?
        .iter()
        .map(|a| a.to_summary())
        .collect();
    Ok(HttpResponse::Ok().json(activities))
}

async fn download_report(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let report = visible_report(&state, &user, path.into_inner()).await?;

    let pdf = state.reports.download(&report).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"oral_cancer_report_{}.pdf\"", report.id),
        ))
        .body(pdf))
}

async fn dashboard(
    auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    let images = state.repo.list_images(user.id).await?;
    let predictions = state.repo.list_predictions_for_user(user.id).await?;
    let reports = state.repo.list_reports(user.id).await?;

    Ok(HttpResponse::Ok().json(DashboardStats {
        total_images: images.len(),
        processed_images: images
            .iter()
            .filter(|i| i.status == shared::ImageStatus::Processed)
            .count(),
        cancer_detections: predictions
            .iter()
            .filter(|p| p.prediction == Label::Cancer)
            .count(),
        total_reports: reports.len(),
        recent_images: images
            .iter()
            .take(RECENT_IMAGES)
            .map(|i| i.to_summary())
            .collect(),
    }))
}

async fn models(
    _auth: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(ModelsResponse {
        models: state.models.model_info(),
        device: state.detection.predictor().registry().device(),
    }))
}

async fn set_user_status(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UserStatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::ManageUsers, "manage users")?;
    let target = path.into_inner();
    if target == user.id {
        return Err(ApiError::BadRequest(
            "You cannot change the status of your own account".to_string(),
        ));
    }

    let mut account = state
        .repo
        .get_user(target)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", target)))?;
    account.is_active = body.is_active;
    account.updated_at = Utc::now();
    state.repo.upsert_user(&account).await?;

    let verb = if account.is_active { "Reactivated" } else { "Deactivated" };
    log::info!("Admin {} {} user {}", user.id, verb.to_lowercase(), target);
    audit(
        &state,
        &origin,
        user.id,
        ActivityAction::UserStatusChanged,
        format!("{} {}", verb, account.email),
    )
    .await;
    Ok(HttpResponse::Ok().json(account.to_summary()))
}

async fn delete_user(
    auth: AuthenticatedUser,
    origin: RequestOrigin,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&state, &auth.0).await?;
    require(&user, Capability::ManageUsers, "delete users")?;
    let target = path.into_inner();
    if target == user.id {
        return Err(ApiError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    // Stored files first; the rows cascade in one call afterwards.
    for image in state.repo.list_images(target).await? {
        state.storage.delete(&image.storage_path).await;
    }
    for report in state.repo.list_reports(target).await? {
        state.storage.delete(&report.storage_path).await;
    }

    if !state.repo.delete_user(target).await? {
        return Err(ApiError::NotFound(format!("User {} not found", target)));
    }
    log::info!("Admin {} deleted user {}", user.id, target);
    audit(
        &state,
        &origin,
        user.id,
        ActivityAction::UserDeleted,
        format!("Deleted user {}", target),
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtService;
    use crate::auth::middleware::AuthMiddleware;
    use crate::db::InMemoryRepository;
    use crate::inference::predictor::DualModelPredictor;
    use crate::inference::preprocess::tests::sample_jpeg;
    use crate::inference::registry::ModelRegistry;
    use crate::inference::registry::tests::FakeLoader;
    use crate::report::fetch::HttpImageFetcher;
    use crate::storage::adapter::tests::adapter_with;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use shared::{ActivitySummary, ImageStatus, ImageSummary, ReportSummary, Role, UserSummary};
    use std::time::Duration;
    use tempfile::TempDir;

    const SECRET: &str = "test-secret";

    fn state(loader: FakeLoader, temp: &TempDir) -> web::Data<AppState> {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let storage = Arc::new(adapter_with(None, temp));
        let config = ModelConfig::default();
        let registry = Arc::new(ModelRegistry::new(Arc::new(loader)));
        let predictor = Arc::new(DualModelPredictor::new(registry, Duration::from_secs(5)));
        let detection = Arc::new(DetectionOrchestrator::new(
            repo.clone(),
            storage.clone(),
            predictor,
            &config,
        ));
        let fetcher = Arc::new(
            HttpImageFetcher::new(storage.clone(), Duration::from_secs(1)).unwrap(),
        );
        let reports = Arc::new(ReportService::new(repo.clone(), storage.clone(), fetcher));
        web::Data::new(AppState {
            repo,
            storage,
            detection,
            reports,
            models: Arc::new(config),
            auto_detect: true,
        })
    }

    fn token(role: Role) -> (Uuid, String) {
        let id = Uuid::new_v4();
        let user = AuthUser {
            id,
            email: format!("{}@example.com", role),
            name: format!("Test {}", role),
            role,
            institution: Some("General Hospital".into()),
        };
        let token = JwtService::new(SECRET).generate_token(&user).unwrap();
        (id, format!("Bearer {}", token))
    }

    fn multipart(content_type: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "oralcare-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; \
             filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    fn upload_request(auth: &str, content_type: &str, data: &[u8]) -> test::TestRequest {
        let (header, body) = multipart(content_type, "lesion.jpg", data);
        test::TestRequest::post()
            .uri("/api/images")
            .insert_header(("Authorization", auth.to_string()))
            .insert_header(("Content-Type", header))
            .set_payload(body)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .wrap(AuthMiddleware::new(JwtService::new(SECRET)))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn health_is_public_and_api_is_not() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.9, 0.9), &temp));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/images").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn upload_runs_detection_and_shows_on_dashboard() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.9, 0.2), &temp));
        let (_, auth) = token(Role::Doctor);

        let resp = test::call_service(
            &app,
            upload_request(&auth, "image/jpeg", &sample_jpeg(120, 90)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: UploadResponse = test::read_body_json(resp).await;
        assert_eq!(body.image.status, ImageStatus::Processed);
        assert_eq!(body.predictions.len(), 2);
        assert!(body.error.is_none());

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/dashboard")
                .insert_header(("Authorization", auth.clone()))
                .to_request(),
        )
        .await;
        let stats: DashboardStats = test::read_body_json(resp).await;
        assert_eq!(stats.total_images, 1);
        assert_eq!(stats.processed_images, 1);
        assert_eq!(stats.cancer_detections, 1);
        assert_eq!(stats.recent_images[0].id, body.image.id);
    }

    #[actix_web::test]
    async fn rejects_unsupported_types_before_storing() {
        let temp = TempDir::new().unwrap();
        let data = state(FakeLoader::with_outputs(0.9, 0.9), &temp);
        let app = app!(data);
        let (_, auth) = token(Role::Doctor);

        let resp = test::call_service(
            &app,
            upload_request(&auth, "image/gif", b"GIF89a").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/images")
                .insert_header(("Authorization", auth.clone()))
                .to_request(),
        )
        .await;
        let images: Vec<ImageSummary> = test::read_body_json(resp).await;
        assert!(images.is_empty());
    }

    #[actix_web::test]
    async fn report_flow_respects_roles_and_ownership() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.1, 0.2), &temp));
        let (_, doctor) = token(Role::Doctor);
        let (_, student) = token(Role::Student);

        let resp = test::call_service(
            &app,
            upload_request(&doctor, "image/jpeg", &sample_jpeg(64, 64)).to_request(),
        )
        .await;
        let uploaded: UploadResponse = test::read_body_json(resp).await;
        let report_uri = format!("/api/images/{}/report", uploaded.image.id);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&report_uri)
                .insert_header(("Authorization", student.clone()))
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&report_uri)
                .insert_header(("Authorization", doctor.clone()))
                .set_json(json!({"patient_name": "Jane Roe", "patient_age": 200}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&report_uri)
                .insert_header(("Authorization", doctor.clone()))
                .set_json(json!({"patient_name": "Jane Roe", "patient_age": 61}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/pdf"
        );
        let pdf = test::read_body(resp).await;
        assert!(pdf.starts_with(b"%PDF"));

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/reports")
                .insert_header(("Authorization", doctor.clone()))
                .to_request(),
        )
        .await;
        let reports: Vec<ReportSummary> = test::read_body_json(resp).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].patient_name.as_deref(), Some("Jane Roe"));

        // The student is a different user and cannot see the doctor's image.
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/images/{}", uploaded.image.id))
                .insert_header(("Authorization", student))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn only_admins_delete_users() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.1, 0.2), &temp));
        let (doctor_id, doctor) = token(Role::Doctor);
        let (_, admin) = token(Role::Admin);

        let resp = test::call_service(
            &app,
            upload_request(&doctor, "image/jpeg", &sample_jpeg(32, 32)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let uri = format!("/api/users/{}", doctor_id);
        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri(&uri)
                .insert_header(("Authorization", doctor.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri(&uri)
                .insert_header(("Authorization", admin.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        // The deleted user's token is still valid but must not recreate them.
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/images")
                .insert_header(("Authorization", doctor.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri(&format!("/api/users/{}", Uuid::new_v4()))
                .insert_header(("Authorization", admin.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(
            &app,
            test::TestRequest::patch()
                .uri(&uri)
                .insert_header(("Authorization", admin))
                .set_json(json!({"is_active": true}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let restored: UserSummary = test::read_body_json(resp).await;
        assert!(restored.is_active);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/images")
                .insert_header(("Authorization", doctor))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let images: Vec<ImageSummary> = test::read_body_json(resp).await;
        assert!(images.is_empty());
    }

    #[actix_web::test]
    async fn deactivated_accounts_are_refused_until_restored() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.1, 0.2), &temp));
        let (student_id, student) = token(Role::Student);
        let (admin_id, admin) = token(Role::Admin);

        let me = |auth: &str| {
            test::TestRequest::get()
                .uri("/auth/me")
                .insert_header(("Authorization", auth.to_string()))
                .to_request()
        };
        assert_eq!(test::call_service(&app, me(&student)).await.status(), StatusCode::OK);

        let status = |target: Uuid, active: bool| {
            test::TestRequest::patch()
                .uri(&format!("/api/users/{}", target))
                .insert_header(("Authorization", admin.clone()))
                .set_json(json!({"is_active": active}))
                .to_request()
        };
        let resp = test::call_service(&app, status(student_id, false)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            test::call_service(&app, me(&student)).await.status(),
            StatusCode::FORBIDDEN
        );

        let resp = test::call_service(&app, status(admin_id, false)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        test::call_service(&app, status(student_id, true)).await;
        assert_eq!(test::call_service(&app, me(&student)).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected_and_nothing_is_stored() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.9, 0.9), &temp));
        let (_, auth) = token(Role::Doctor);

        let oversized = vec![0xffu8; 15 * 1024 * 1024];
        let resp = test::call_service(
            &app,
            upload_request(&auth, "image/jpeg", &oversized).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/images")
                .insert_header(("Authorization", auth.clone()))
                .to_request(),
        )
        .await;
        let images: Vec<ImageSummary> = test::read_body_json(resp).await;
        assert!(images.is_empty());
        assert!(
            std::fs::read_dir(temp.path()).unwrap().next().is_none(),
            "no file may be written for a rejected upload"
        );
    }

    #[actix_web::test]
    async fn reports_can_be_annotated_until_finalized_and_are_audited() {
        let temp = TempDir::new().unwrap();
        let app = app!(state(FakeLoader::with_outputs(0.8, 0.9), &temp));
        let (_, doctor) = token(Role::Doctor);

        let resp = test::call_service(
            &app,
            upload_request(&doctor, "image/jpeg", &sample_jpeg(48, 48)).to_request(),
        )
        .await;
        let uploaded: UploadResponse = test::read_body_json(resp).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/api/images/{}/report", uploaded.image.id))
                .insert_header(("Authorization", doctor.clone()))
                .set_json(json!({"patient_name": "Jan Kowalski"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let report_id = resp
            .headers()
            .get("X-Report-Id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let edit = |body: serde_json::Value| {
            test::TestRequest::patch()
                .uri(&format!("/api/reports/{}", report_id))
                .insert_header(("Authorization", doctor.clone()))
                .set_json(body)
                .to_request()
        };

        let resp = test::call_service(
            &app,
            edit(json!({"doctor_notes": "Indurated margin", "finalize": true})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let summary: ReportSummary = test::read_body_json(resp).await;
        assert!(summary.is_finalized);
        assert_eq!(summary.doctor_notes.as_deref(), Some("Indurated margin"));

        let resp = test::call_service(&app, edit(json!({"recommendations": "None"}))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/activity")
                .insert_header(("Authorization", doctor.clone()))
                .to_request(),
        )
        .await;
        let activity: Vec<ActivitySummary> = test::read_body_json(resp).await;
        let actions: Vec<ActivityAction> = activity.iter().map(|a| a.action).collect();
        for expected in [
            ActivityAction::AccountSynced,
            ActivityAction::ImageUploaded,
            ActivityAction::DetectionRun,
            ActivityAction::ReportGenerated,
            ActivityAction::ReportFinalized,
        ] {
            assert!(actions.contains(&expected), "missing {}", expected);
        }
        assert!(!actions.contains(&ActivityAction::ReportUpdated));
        assert!(activity.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/activity?limit=2")
                .insert_header(("Authorization", doctor))
                .to_request(),
        )
        .await;
        let limited: Vec<ActivitySummary> = test::read_body_json(resp).await;
        assert_eq!(limited.len(), 2);
    }
}
