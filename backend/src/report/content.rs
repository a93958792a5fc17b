use super::data::{Consensus, ReportData};

pub const REPORT_TITLE: &str = "Oral Cancer Detection Report";

pub const POSITIVE_RECOMMENDATION: &str = "At least one model classified the lesion as \
potentially cancerous. Prompt referral to an oral medicine specialist or oral and \
maxillofacial surgeon is recommended, and a biopsy should be considered to confirm \
the finding.";

pub const NEGATIVE_RECOMMENDATION: &str = "The models classified the lesion as \
non-cancerous. Continue routine monitoring and re-examine the site at the next visit. \
Seek specialist review if the lesion persists for more than two weeks or changes in \
size or appearance.";

pub const DISCLAIMER: &str = "This report was produced by an automated screening tool \
and is intended to support, not replace, professional clinical judgement. The \
predictions are not a diagnosis. All findings must be confirmed by a qualified \
healthcare professional through clinical examination and, where indicated, \
histopathological analysis.";

pub const IMAGE_UNAVAILABLE_NOTE: &str = "[Source image unavailable]";

/// Renderer-independent building blocks of a report, in page order.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Title {
        title: String,
        subtitle: String,
    },
    KeyValues {
        heading: String,
        rows: Vec<(String, String)>,
    },
    Paragraph {
        heading: String,
        text: String,
    },
    /// Placeholder for the embedded source image; the renderer substitutes
    /// `IMAGE_UNAVAILABLE_NOTE` when the bytes are missing or undecodable.
    SourceImage {
        caption: String,
    },
    Table {
        heading: String,
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Footer {
        lines: Vec<String>,
    },
}

pub fn recommendation(data: &ReportData) -> &'static str {
    if data.any_positive() {
        POSITIVE_RECOMMENDATION
    } else {
        NEGATIVE_RECOMMENDATION
    }
}

pub fn consensus_statement(consensus: Consensus) -> String {
    match consensus {
        Consensus::Agreed(label) => format!("Both models agree: {}.", label),
        Consensus::NoConsensus => {
            "The models disagree and no consensus was reached. Clinical review is advised."
                .to_string()
        }
    }
}

fn patient_rows(data: &ReportData) -> Option<Vec<(String, String)>> {
    if !data.patient.is_present() {
        return None;
    }
    let patient = &data.patient;
    let mut rows = vec![(
        "Name".to_string(),
        patient.name.clone().unwrap_or_default(),
    )];
    if let Some(age) = patient.age {
        rows.push(("Age".to_string(), age.to_string()));
    }
    if let Some(gender) = patient.gender.as_ref().filter(|g| !g.trim().is_empty()) {
        rows.push(("Gender".to_string(), gender.clone()));
    }
    if let Some(record) = patient
        .record_number
        .as_ref()
        .filter(|r| !r.trim().is_empty())
    {
        rows.push(("Patient ID".to_string(), record.clone()));
    }
    Some(rows)
}

pub fn build_sections(data: &ReportData) -> Vec<Section> {
    let mut sections = vec![Section::Title {
        title: REPORT_TITLE.to_string(),
        subtitle: format!(
            "Generated {}",
            data.generated_at.format("%Y-%m-%d %H:%M UTC")
        ),
    }];

    if let Some(rows) = patient_rows(data) {
        sections.push(Section::KeyValues {
            heading: "Patient Information".to_string(),
            rows,
        });
    }

    if let Some(notes) = &data.notes.clinical_notes {
        sections.push(Section::Paragraph {
            heading: "Clinical Notes".to_string(),
            text: notes.clone(),
        });
    }

    sections.push(Section::SourceImage {
        caption: data.image_filename.clone(),
    });

    sections.push(Section::Table {
        heading: "Detection Results".to_string(),
        columns: vec![
            "Model".to_string(),
            "Prediction".to_string(),
            "Confidence".to_string(),
            "Processing Time".to_string(),
        ],
        rows: data
            .results
            .iter()
            .map(|r| {
                vec![
                    r.model.to_string(),
                    r.label.to_string(),
                    format!("{:.2}%", r.confidence * 100.0),
                    format!("{:.2}s", r.processing_time),
                ]
            })
            .collect(),
    });

    sections.push(Section::Paragraph {
        heading: "Consensus".to_string(),
        text: consensus_statement(data.consensus),
    });
    sections.push(Section::Paragraph {
        heading: "Recommendation".to_string(),
        text: recommendation(data).to_string(),
    });
    if let Some(recommendations) = &data.notes.recommendations {
        sections.push(Section::Paragraph {
            heading: "Clinician Recommendations".to_string(),
            text: recommendations.clone(),
        });
    }
    if let Some(notes) = &data.notes.doctor_notes {
        sections.push(Section::Paragraph {
            heading: "Doctor's Notes".to_string(),
            text: notes.clone(),
        });
    }
    sections.push(Section::Paragraph {
        heading: "Disclaimer".to_string(),
        text: DISCLAIMER.to_string(),
    });

    let mut footer = vec![format!("Healthcare provider: {}", data.provider_name)];
    if let Some(institution) = &data.institution {
        footer.push(format!("Institution: {}", institution));
    }
    footer.push(format!("Report ID: {}", data.report_id));
    footer.push("OralCare AI".to_string());
    sections.push(Section::Footer { lines: footer });

    sections
}
