use shared::ReportRequest;

use crate::db::models::{ClinicianNotes, PatientInfo};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_PATIENT_AGE: i32 = 150;

const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("No image file was provided")]
    MissingFile,
    #[error("The uploaded file is empty")]
    EmptyFile,
    #[error("File is {size} bytes; the limit is {max} bytes")]
    FileTooLarge { size: usize, max: usize },
    #[error("Unsupported file type '{0}'; only JPEG and PNG images are accepted")]
    UnsupportedContentType(String),
    #[error("Patient age {0} is outside 0-150")]
    PatientAgeOutOfRange(i32),
}

/// Content type from the multipart header, or from the file extension when the
/// client did not send one.
pub fn resolve_content_type(declared: Option<&str>, file_name: &str) -> String {
    if let Some(declared) = declared.filter(|d| !d.is_empty() && *d != "application/octet-stream")
    {
        return declared.to_ascii_lowercase();
    }
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

pub fn validate_upload(content_type: &str, size: usize) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::FileTooLarge {
            size,
            max: MAX_UPLOAD_BYTES,
        });
    }
    if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
        return Err(ValidationError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Checks the report form and splits it into the patient block and notes.
pub fn validate_report_request(
    request: ReportRequest,
) -> Result<(PatientInfo, ClinicianNotes), ValidationError> {
    let age = match request.patient_age {
        Some(age) if !(0..=MAX_PATIENT_AGE).contains(&age) => {
            return Err(ValidationError::PatientAgeOutOfRange(age));
        }
        Some(age) => Some(age as u8),
        None => None,
    };
    let patient = PatientInfo {
        name: non_blank(request.patient_name),
        age,
        gender: non_blank(request.patient_gender),
        record_number: non_blank(request.patient_id),
    };
    let notes = ClinicianNotes {
        clinical_notes: non_blank(request.clinical_notes),
        doctor_notes: non_blank(request.doctor_notes),
        recommendations: non_blank(request.recommendations),
    };
    Ok((patient, notes))
}
