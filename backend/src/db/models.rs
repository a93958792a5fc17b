use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    ActivityAction, ActivitySummary, ImageStatus, ImageSummary, Label, ModelName,
    PredictionSummary, ReportSummary, ReportUpdate, Role, UserSummary,
};
use uuid::Uuid;

use crate::inference::predictor::ModelPrediction;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EntityError {
    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: ImageStatus, to: ImageStatus },
    #[error("Confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),
    #[error("Report {0} is finalized and can no longer be edited")]
    ReportFinalized(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub institution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl User {
    pub fn new(id: Uuid, email: String, name: String, role: Role, institution: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            name,
            role,
            institution,
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }

    pub fn to_summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            institution: self.institution.clone(),
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedImage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub storage_path: String,
    /// `None` when the file only exists in local fallback storage.
    pub file_url: Option<String>,
    pub file_size: i64,
    pub content_type: String,
    pub content_hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub status: ImageStatus,
    pub upload_date: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl UploadedImage {
    pub fn new(
        user_id: Uuid,
        filename: String,
        storage_path: String,
        file_url: Option<String>,
        file_size: i64,
        content_type: String,
        content_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            filename,
            storage_path,
            file_url,
            file_size,
            content_type,
            content_hash,
            width: None,
            height: None,
            format: None,
            status: ImageStatus::Pending,
            upload_date: Utc::now(),
            processed_at: None,
        }
    }

    pub fn transition(&mut self, next: ImageStatus) -> Result<(), EntityError> {
        if !self.status.can_transition_to(next) {
            return Err(EntityError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            ImageStatus::Processed => self.processed_at = Some(Utc::now()),
            ImageStatus::Processing => self.processed_at = None,
            _ => {}
        }
        Ok(())
    }

    pub fn to_summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.id,
            filename: self.filename.clone(),
            file_url: self.file_url.clone(),
            file_size: self.file_size,
            status: self.status,
            upload_date: self.upload_date,
            processed_at: self.processed_at,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub image_id: Uuid,
    pub user_id: Uuid,
    pub model_name: ModelName,
    pub prediction: Label,
    pub confidence_score: f32,
    /// Seconds.
    pub processing_time: f64,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn from_prediction(
        image_id: Uuid,
        user_id: Uuid,
        prediction: &ModelPrediction,
        model_version: Option<String>,
    ) -> Result<Self, EntityError> {
        if !(0.0..=1.0).contains(&prediction.confidence) {
            return Err(EntityError::ConfidenceOutOfRange(prediction.confidence));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            image_id,
            user_id,
            model_name: prediction.model,
            prediction: prediction.label,
            confidence_score: prediction.confidence,
            processing_time: prediction.elapsed.as_secs_f64(),
            model_version,
            created_at: Utc::now(),
        })
    }

    pub fn confidence_percentage(&self) -> f32 {
        (self.confidence_score * 10000.0).round() / 100.0
    }

    pub fn to_summary(&self) -> PredictionSummary {
        PredictionSummary {
            id: self.id,
            model_name: self.model_name,
            prediction: self.prediction,
            confidence: self.confidence_score,
            confidence_percentage: self.confidence_percentage(),
            processing_time: self.processing_time,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<String>,
    pub record_number: Option<String>,
}

impl PatientInfo {
    pub fn is_present(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Free-text fields a clinician supplies with a report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClinicianNotes {
    pub clinical_notes: Option<String>,
    pub doctor_notes: Option<String>,
    pub recommendations: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Nulled when the referenced prediction is deleted.
    pub detection_result: Option<Uuid>,
    pub patient: PatientInfo,
    pub clinical_notes: Option<String>,
    pub doctor_notes: Option<String>,
    pub recommendations: Option<String>,
    pub storage_path: String,
    pub report_pdf_url: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_finalized: bool,
}

fn edited(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl ReportDocument {
    /// Applies clinician edits. The rendered PDF is not touched; only the
    /// annotation fields and the finalized flag change.
    pub fn amend(&mut self, update: &ReportUpdate) -> Result<(), EntityError> {
        if self.is_finalized {
            return Err(EntityError::ReportFinalized(self.id));
        }
        if let Some(notes) = &update.doctor_notes {
            self.doctor_notes = edited(notes);
        }
        if let Some(recommendations) = &update.recommendations {
            self.recommendations = edited(recommendations);
        }
        self.is_finalized = update.finalize;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn to_summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id,
            detection_result: self.detection_result,
            patient_name: self.patient.name.clone(),
            doctor_notes: self.doctor_notes.clone(),
            recommendations: self.recommendations.clone(),
            is_finalized: self.is_finalized,
            report_pdf_url: self.report_pdf_url.clone(),
            generated_at: self.generated_at,
            updated_at: self.updated_at,
        }
    }
}

/// One entry in a user's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: ActivityAction,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UserActivity {
    pub fn new(user_id: Uuid, action: ActivityAction, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            description: Some(description.into()),
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn to_summary(&self) -> ActivitySummary {
        ActivitySummary {
            id: self.id,
            action: self.action,
            description: self.description.clone(),
            ip_address: self.ip_address.clone(),
            timestamp: self.timestamp,
        }
    }
}
