use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// The two classifiers every upload is run through, in inference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ModelName {
    #[serde(rename = "RegNetY320")]
    #[strum(serialize = "RegNetY320")]
    RegNetY320,
    #[serde(rename = "VGG16")]
    #[strum(serialize = "VGG16")]
    Vgg16,
}

impl ModelName {
    pub const ALL: [ModelName; 2] = [ModelName::RegNetY320, ModelName::Vgg16];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Label {
    #[serde(rename = "Cancer")]
    #[strum(serialize = "Cancer")]
    Cancer,
    #[serde(rename = "Non-Cancer")]
    #[strum(serialize = "Non-Cancer")]
    NonCancer,
}

impl Label {
    pub const POSITIVE_THRESHOLD: f32 = 0.5;

    /// Label for a positive-class probability.
    pub fn from_probability(probability: f32) -> Self {
        if probability >= Self::POSITIVE_THRESHOLD {
            Label::Cancer
        } else {
            Label::NonCancer
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Label::Cancer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ImageStatus {
    /// `Failed -> Processing` is the retry edge; nothing ever leaves `Processed`.
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (ImageStatus::Pending, ImageStatus::Processing)
                | (ImageStatus::Failed, ImageStatus::Processing)
                | (ImageStatus::Processing, ImageStatus::Processed)
                | (ImageStatus::Processing, ImageStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Doctor,
    Researcher,
    Student,
}

/// Audited user actions, newest first in the activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityAction {
    AccountSynced,
    ImageUploaded,
    DetectionRun,
    DetectionFailed,
    ImageDeleted,
    ReportGenerated,
    ReportUpdated,
    ReportFinalized,
    UserDeleted,
    UserStatusChanged,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionSummary {
    pub id: Uuid,
    pub model_name: ModelName,
    pub prediction: Label,
    pub confidence: f32,
    pub confidence_percentage: f32,
    pub processing_time: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageSummary {
    pub id: Uuid,
    pub filename: String,
    pub file_url: Option<String>,
    pub file_size: i64,
    pub status: ImageStatus,
    pub upload_date: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageDetail {
    pub image: ImageSummary,
    pub predictions: Vec<PredictionSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    pub image: ImageSummary,
    pub predictions: Vec<PredictionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReportRequest {
    pub patient_name: Option<String>,
    pub patient_age: Option<i32>,
    pub patient_gender: Option<String>,
    pub patient_id: Option<String>,
    pub clinical_notes: Option<String>,
    pub doctor_notes: Option<String>,
    pub recommendations: Option<String>,
}

/// Clinician edits to a stored report. `None` leaves a field unchanged and a
/// blank string clears it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReportUpdate {
    pub doctor_notes: Option<String>,
    pub recommendations: Option<String>,
    #[serde(default)]
    pub finalize: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReportSummary {
    pub id: Uuid,
    pub detection_result: Option<Uuid>,
    pub patient_name: Option<String>,
    pub doctor_notes: Option<String>,
    pub recommendations: Option<String>,
    pub is_finalized: bool,
    pub report_pdf_url: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActivitySummary {
    pub id: Uuid,
    pub action: ActivityAction,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub institution: Option<String>,
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserStatusUpdate {
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DashboardStats {
    pub total_images: usize,
    pub processed_images: usize,
    pub cancer_detections: usize,
    pub total_reports: usize,
    pub recent_images: Vec<ImageSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelInfo {
    pub model_name: ModelName,
    pub path: String,
    pub exists: bool,
    pub size_mb: f64,
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub device: String,
}
