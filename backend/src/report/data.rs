use chrono::{DateTime, Utc};
use shared::{Label, ModelName};
use uuid::Uuid;

use crate::db::models::{ClinicianNotes, PatientInfo, PredictionRecord, UploadedImage, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    Agreed(Label),
    NoConsensus,
}

impl Consensus {
    /// Agreement needs at least two labels and all of them equal.
    pub fn from_labels(labels: &[Label]) -> Self {
        match labels {
            [first, rest @ ..] if !rest.is_empty() && rest.iter().all(|l| l == first) => {
                Consensus::Agreed(*first)
            }
            _ => Consensus::NoConsensus,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResult {
    pub model: ModelName,
    pub label: Label,
    pub confidence: f32,
    pub processing_time: f64,
}

impl From<&PredictionRecord> for ModelResult {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            model: record.model_name,
            label: record.prediction,
            confidence: record.confidence_score,
            processing_time: record.processing_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportData {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub patient: PatientInfo,
    pub notes: ClinicianNotes,
    pub image_filename: String,
    pub image_url: Option<String>,
    pub image_path: String,
    pub results: Vec<ModelResult>,
    pub consensus: Consensus,
    pub provider_name: String,
    pub institution: Option<String>,
}

impl ReportData {
    pub fn new(
        image: &UploadedImage,
        records: &[PredictionRecord],
        provider: &User,
        patient: PatientInfo,
        notes: ClinicianNotes,
    ) -> Self {
        let filled = |text: Option<String>| text.filter(|t| !t.trim().is_empty());
        let results: Vec<ModelResult> = records.iter().map(ModelResult::from).collect();
        let labels: Vec<Label> = results.iter().map(|r| r.label).collect();
        Self {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            patient,
            notes: ClinicianNotes {
                clinical_notes: filled(notes.clinical_notes),
                doctor_notes: filled(notes.doctor_notes),
                recommendations: filled(notes.recommendations),
            },
            image_filename: image.filename.clone(),
            image_url: image.file_url.clone(),
            image_path: image.storage_path.clone(),
            consensus: Consensus::from_labels(&labels),
            results,
            provider_name: provider.display_name().to_string(),
            institution: provider.institution.clone(),
        }
    }

    pub fn any_positive(&self) -> bool {
        self.results.iter().any(|r| r.label.is_positive())
    }
}

/// Latest record per model, in fixed model order.
pub fn latest_per_model(records: &[PredictionRecord]) -> Vec<PredictionRecord> {
    ModelName::ALL
        .iter()
        .filter_map(|model| {
            records
                .iter()
                .filter(|r| r.model_name == *model)
                .max_by_key(|r| r.created_at)
                .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_requires_two_matching_labels() {
        assert_eq!(
            Consensus::from_labels(&[Label::NonCancer, Label::NonCancer]),
            Consensus::Agreed(Label::NonCancer)
        );
        assert_eq!(
            Consensus::from_labels(&[Label::Cancer, Label::Cancer]),
            Consensus::Agreed(Label::Cancer)
        );
        assert_eq!(
            Consensus::from_labels(&[Label::Cancer, Label::NonCancer]),
            Consensus::NoConsensus
        );
        assert_eq!(Consensus::from_labels(&[Label::Cancer]), Consensus::NoConsensus);
        assert_eq!(Consensus::from_labels(&[]), Consensus::NoConsensus);
    }

    #[test]
    fn latest_record_wins_per_model() {
        let image_id = Uuid::new_v4();
        let record = |model, label, age_secs: i64| PredictionRecord {
            id: Uuid::new_v4(),
            image_id,
            user_id: Uuid::new_v4(),
            model_name: model,
            prediction: label,
            confidence_score: 0.5,
            processing_time: 0.1,
            model_version: None,
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        };
        let records = vec![
            record(ModelName::Vgg16, Label::Cancer, 100),
            record(ModelName::Vgg16, Label::NonCancer, 1),
            record(ModelName::RegNetY320, Label::NonCancer, 50),
        ];
        let latest = latest_per_model(&records);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].model_name, ModelName::RegNetY320);
        assert_eq!(latest[1].prediction, Label::NonCancer);
    }
}
