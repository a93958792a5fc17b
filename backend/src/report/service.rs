use shared::ReportUpdate;
use std::sync::Arc;
use uuid::Uuid;

use super::content::{self, REPORT_TITLE};
use super::data::{ReportData, latest_per_model};
use super::fetch::ImageFetcher;
use super::render::{self, ImageBlock, RenderError};
use crate::db::models::{ClinicianNotes, EntityError, PatientInfo, ReportDocument, User};
use crate::db::{Repository, RepositoryError};
use crate::storage::StorageError;
use crate::storage::adapter::StorageAdapter;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Image {0} not found")]
    ImageNotFound(Uuid),
    #[error("Image {0} has no predictions to report on")]
    NoPredictions(Uuid),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("Render task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Finalized(#[from] EntityError),
}

pub struct GeneratedReport {
    pub document: ReportDocument,
    pub pdf: Vec<u8>,
}

impl GeneratedReport {
    pub fn file_name(&self) -> String {
        format!("oral_cancer_report_{}.pdf", self.document.id)
    }
}

pub struct ReportService {
    repo: Arc<dyn Repository>,
    storage: Arc<StorageAdapter>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl ReportService {
    pub fn new(
        repo: Arc<dyn Repository>,
        storage: Arc<StorageAdapter>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            repo,
            storage,
            fetcher,
        }
    }

    /// Renders the report for `image_id`, stores the PDF and persists the
    /// document row. Nothing is persisted if any step fails.
    pub async fn generate(
        &self,
        image_id: Uuid,
        provider: &User,
        patient: PatientInfo,
        notes: ClinicianNotes,
    ) -> Result<GeneratedReport, ReportError> {
        let image = self
            .repo
            .get_image(image_id)
            .await?
            .ok_or(ReportError::ImageNotFound(image_id))?;

        let records = latest_per_model(&self.repo.list_predictions_for_image(image_id).await?);
        if records.is_empty() {
            return Err(ReportError::NoPredictions(image_id));
        }

        let data = ReportData::new(&image, &records, provider, patient, notes);
        let sections = content::build_sections(&data);
        let picture = self
            .fetcher
            .fetch(data.image_url.as_deref(), &data.image_path)
            .await;

        let pdf = tokio::task::spawn_blocking(move || {
            render::render(REPORT_TITLE, &sections, ImageBlock::from_bytes(picture.as_deref()))
        })
        .await
        .map_err(|e| ReportError::Task(e.to_string()))??;
        log::info!(
            "Rendered report {} for image {} ({} bytes)",
            data.report_id,
            image_id,
            pdf.len()
        );

        let stored = self
            .storage
            .upload(
                &pdf,
                provider.id,
                &format!("report_{}.pdf", data.report_id),
                "application/pdf",
            )
            .await?;

        let document = ReportDocument {
            id: data.report_id,
            user_id: provider.id,
            detection_result: records.first().map(|r| r.id),
            patient: data.patient,
            clinical_notes: data.notes.clinical_notes,
            doctor_notes: data.notes.doctor_notes,
            recommendations: data.notes.recommendations,
            storage_path: stored.path,
            report_pdf_url: stored.url,
            generated_at: data.generated_at,
            updated_at: data.generated_at,
            is_finalized: false,
        };
        if let Err(e) = self.repo.create_report(&document).await {
            log::error!("Could not persist report {}: {}", document.id, e);
            if !self.storage.delete(&document.storage_path).await {
                log::warn!(
                    "Report PDF {} may be orphaned after a failed save",
                    document.storage_path
                );
            }
            return Err(e.into());
        }

        Ok(GeneratedReport { document, pdf })
    }

    /// Applies clinician edits to a stored report. The PDF stays the
    /// snapshot taken at generation time.
    pub async fn amend(
        &self,
        mut report: ReportDocument,
        update: &ReportUpdate,
    ) -> Result<ReportDocument, ReportError> {
        report.amend(update)?;
        self.repo.update_report(&report).await?;
        log::info!(
            "Updated report {} (finalized: {})",
            report.id,
            report.is_finalized
        );
        Ok(report)
    }

    /// Stored PDF bytes for a previously generated report.
    pub async fn download(&self, report: &ReportDocument) -> Result<Vec<u8>, ReportError> {
        Ok(self.storage.download(&report.storage_path).await?)
    }
}
