use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::models::{
    PatientInfo, PredictionRecord, ReportDocument, UploadedImage, User, UserActivity,
};
use super::repository::{Repository, RepositoryError};

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    users_table: String,
    images_table: String,
    predictions_table: String,
    reports_table: String,
    activities_table: String,
}

impl DynamoDbRepository {
    pub fn new(
        client: Client,
        users_table: String,
        images_table: String,
        predictions_table: String,
        reports_table: String,
        activities_table: String,
    ) -> Self {
        Self {
            client,
            users_table,
            images_table,
            predictions_table,
            reports_table,
            activities_table,
        }
    }

    /// Fails early when a table is missing so startup does not hide it.
    pub async fn verify_tables(&self) -> Result<(), RepositoryError> {
        for table in [
            &self.users_table,
            &self.images_table,
            &self.predictions_table,
            &self.reports_table,
            &self.activities_table,
        ] {
            match self.client.describe_table().table_name(table).send().await {
                Ok(response) => {
                    log::info!(
                        "DynamoDB table '{}' exists with status: {:?}",
                        table,
                        response.table().and_then(|t| t.table_status())
                    );
                }
                Err(e) => {
                    log::error!("DynamoDB table '{}' is not accessible: {:?}", table, e);
                    return Err(RepositoryError::DynamoDb(format!(
                        "Table '{}' not accessible: {}",
                        table, e
                    )));
                }
            }
        }
        Ok(())
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(())
    }

    /// Put that only succeeds when the row already exists.
    async fn replace(&self, table: &str, id: Uuid, item: Item) -> Result<(), RepositoryError> {
        let result = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .condition_expression("attribute_exists(id)")
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception())
                {
                    Err(RepositoryError::NotFound)
                } else {
                    log::error!("DynamoDB put_item failed for {} in '{}': {:?}", id, table, e);
                    Err(RepositoryError::DynamoDb(e.to_string()))
                }
            }
        }
    }

    async fn get(&self, table: &str, id: Uuid) -> Result<Option<Item>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.item)
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<bool, RepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(table)
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.attributes.is_some_and(|a| !a.is_empty()))
    }

    /// Scans `table` for items whose `attribute` equals `value`, following
    /// pagination to the end.
    async fn scan_eq(
        &self,
        table: &str,
        attribute: &str,
        value: String,
    ) -> Result<Vec<Item>, RepositoryError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let result = self
                .client
                .scan()
                .table_name(table)
                .filter_expression("#attr = :value")
                .expression_attribute_names("#attr", attribute)
                .expression_attribute_values(":value", AttributeValue::S(value.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            items.extend(result.items.unwrap_or_default());
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn delete_image_cascade(&self, image_id: Uuid) -> Result<bool, RepositoryError> {
        let predictions = self
            .scan_eq(&self.predictions_table, "image_id", image_id.to_string())
            .await?;
        for item in predictions {
            let prediction = parse_prediction(&item)?;
            self.clear_report_references(prediction.id).await?;
            self.delete(&self.predictions_table, prediction.id).await?;
        }
        self.delete(&self.images_table, image_id).await
    }

    async fn clear_report_references(&self, prediction_id: Uuid) -> Result<(), RepositoryError> {
        let reports = self
            .scan_eq(
                &self.reports_table,
                "detection_result",
                prediction_id.to_string(),
            )
            .await?;
        for item in reports {
            let id = get_uuid(&item, "id")?;
            self.client
                .update_item()
                .table_name(&self.reports_table)
                .key("id", AttributeValue::S(id.to_string()))
                .update_expression("REMOVE detection_result")
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
            log::debug!("Cleared prediction reference on report {}", id);
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for DynamoDbRepository {
    async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError> {
        log::info!(
            "Writing user to DynamoDB table '{}': {}",
            self.users_table,
            user.email
        );
        self.put(&self.users_table, user_item(user)).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        self.get(&self.users_table, id)
            .await?
            .map(|item| parse_user(&item))
            .transpose()
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, RepositoryError> {
        if self.get(&self.users_table, id).await?.is_none() {
            return Ok(false);
        }

        let images = self
            .scan_eq(&self.images_table, "user_id", id.to_string())
            .await?;
        for item in images {
            self.delete_image_cascade(get_uuid(&item, "id")?).await?;
        }

        let predictions = self
            .scan_eq(&self.predictions_table, "user_id", id.to_string())
            .await?;
        for item in predictions {
            let prediction_id = get_uuid(&item, "id")?;
            self.clear_report_references(prediction_id).await?;
            self.delete(&self.predictions_table, prediction_id).await?;
        }

        let reports = self
            .scan_eq(&self.reports_table, "user_id", id.to_string())
            .await?;
        for item in reports {
            self.delete(&self.reports_table, get_uuid(&item, "id")?)
                .await?;
        }

        let activities = self
            .scan_eq(&self.activities_table, "user_id", id.to_string())
            .await?;
        for item in activities {
            self.delete(&self.activities_table, get_uuid(&item, "id")?)
                .await?;
        }

        self.client
            .update_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(id.to_string()))
            .update_expression("SET is_active = :inactive, updated_at = :now")
            .expression_attribute_values(":inactive", AttributeValue::Bool(false))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        log::info!("Deactivated user {} after removing their records", id);
        Ok(true)
    }

    async fn create_image(&self, image: &UploadedImage) -> Result<(), RepositoryError> {
        if self.get(&self.users_table, image.user_id).await?.is_none() {
            return Err(RepositoryError::InvalidData(format!(
                "image owner {} does not exist",
                image.user_id
            )));
        }
        self.put(&self.images_table, image_item(image)).await
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<UploadedImage>, RepositoryError> {
        self.get(&self.images_table, id)
            .await?
            .map(|item| parse_image(&item))
            .transpose()
    }

    async fn list_images(&self, user_id: Uuid) -> Result<Vec<UploadedImage>, RepositoryError> {
        let mut images = self
            .scan_eq(&self.images_table, "user_id", user_id.to_string())
            .await?
            .iter()
            .map(parse_image)
            .collect::<Result<Vec<_>, _>>()?;
        images.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(images)
    }

    async fn update_image(&self, image: &UploadedImage) -> Result<(), RepositoryError> {
        self.replace(&self.images_table, image.id, image_item(image))
            .await
    }

    async fn delete_image(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.delete_image_cascade(id).await
    }

    async fn create_predictions(&self, records: &[PredictionRecord]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let put = Put::builder()
                .table_name(&self.predictions_table)
                .set_item(Some(prediction_item(record)))
                .build()
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
            items.push(TransactWriteItem::builder().put(put).build());
        }

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| {
                log::error!("Prediction transaction failed: {:?}", e);
                RepositoryError::DynamoDb(e.to_string())
            })?;
        Ok(())
    }

    async fn list_predictions_for_image(
        &self,
        image_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let mut records = self
            .scan_eq(&self.predictions_table, "image_id", image_id.to_string())
            .await?
            .iter()
            .map(parse_prediction)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let mut records = self
            .scan_eq(&self.predictions_table, "user_id", user_id.to_string())
            .await?
            .iter()
            .map(parse_prediction)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn create_report(&self, report: &ReportDocument) -> Result<(), RepositoryError> {
        self.put(&self.reports_table, report_item(report)).await
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportDocument>, RepositoryError> {
        self.get(&self.reports_table, id)
            .await?
            .map(|item| parse_report(&item))
            .transpose()
    }

    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<ReportDocument>, RepositoryError> {
        let mut reports = self
            .scan_eq(&self.reports_table, "user_id", user_id.to_string())
            .await?
            .iter()
            .map(parse_report)
            .collect::<Result<Vec<_>, _>>()?;
        reports.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        Ok(reports)
    }

    async fn update_report(&self, report: &ReportDocument) -> Result<(), RepositoryError> {
        self.replace(&self.reports_table, report.id, report_item(report))
            .await
    }

    async fn record_activity(&self, activity: &UserActivity) -> Result<(), RepositoryError> {
        self.put(&self.activities_table, activity_item(activity))
            .await
    }

    async fn list_activities(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UserActivity>, RepositoryError> {
        let mut activities = self
            .scan_eq(&self.activities_table, "user_id", user_id.to_string())
            .await?
            .iter()
            .map(parse_activity)
            .collect::<Result<Vec<_>, _>>()?;
        activities.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        activities.truncate(limit);
        Ok(activities)
    }
}

fn put_s(item: &mut Item, key: &str, value: impl Into<String>) {
    item.insert(key.to_string(), AttributeValue::S(value.into()));
}

fn put_opt_s(item: &mut Item, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        put_s(item, key, value.clone());
    }
}

fn put_n(item: &mut Item, key: &str, value: impl ToString) {
    item.insert(key.to_string(), AttributeValue::N(value.to_string()));
}

fn user_item(user: &User) -> Item {
    let mut item = HashMap::new();
    put_s(&mut item, "id", user.id.to_string());
    put_s(&mut item, "email", user.email.clone());
    put_s(&mut item, "name", user.name.clone());
    put_s(&mut item, "role", user.role.to_string());
    put_opt_s(&mut item, "institution", user.institution.as_ref());
    put_s(&mut item, "created_at", user.created_at.to_rfc3339());
    put_s(&mut item, "updated_at", user.updated_at.to_rfc3339());
    item.insert("is_active".to_string(), AttributeValue::Bool(user.is_active));
    item
}

fn image_item(image: &UploadedImage) -> Item {
    let mut item = HashMap::new();
    put_s(&mut item, "id", image.id.to_string());
    put_s(&mut item, "user_id", image.user_id.to_string());
    put_s(&mut item, "filename", image.filename.clone());
    put_s(&mut item, "storage_path", image.storage_path.clone());
    put_opt_s(&mut item, "file_url", image.file_url.as_ref());
    put_n(&mut item, "file_size", image.file_size);
    put_s(&mut item, "content_type", image.content_type.clone());
    put_s(&mut item, "content_hash", image.content_hash.clone());
    if let Some(width) = image.width {
        put_n(&mut item, "width", width);
    }
    if let Some(height) = image.height {
        put_n(&mut item, "height", height);
    }
    put_opt_s(&mut item, "format", image.format.as_ref());
    put_s(&mut item, "status", image.status.to_string());
    put_s(&mut item, "upload_date", image.upload_date.to_rfc3339());
    if let Some(processed_at) = image.processed_at {
        put_s(&mut item, "processed_at", processed_at.to_rfc3339());
    }
    item
}

fn prediction_item(record: &PredictionRecord) -> Item {
    let mut item = HashMap::new();
    put_s(&mut item, "id", record.id.to_string());
    put_s(&mut item, "image_id", record.image_id.to_string());
    put_s(&mut item, "user_id", record.user_id.to_string());
    put_s(&mut item, "model_name", record.model_name.to_string());
    put_s(&mut item, "prediction", record.prediction.to_string());
    put_n(&mut item, "confidence_score", record.confidence_score);
    put_n(&mut item, "processing_time", record.processing_time);
    put_opt_s(&mut item, "model_version", record.model_version.as_ref());
    put_s(&mut item, "created_at", record.created_at.to_rfc3339());
    item
}

fn report_item(report: &ReportDocument) -> Item {
    let mut item = HashMap::new();
    put_s(&mut item, "id", report.id.to_string());
    put_s(&mut item, "user_id", report.user_id.to_string());
    if let Some(prediction_id) = report.detection_result {
        put_s(&mut item, "detection_result", prediction_id.to_string());
    }
    put_opt_s(&mut item, "patient_name", report.patient.name.as_ref());
    if let Some(age) = report.patient.age {
        put_n(&mut item, "patient_age", age);
    }
    put_opt_s(&mut item, "patient_gender", report.patient.gender.as_ref());
    put_opt_s(&mut item, "patient_id", report.patient.record_number.as_ref());
    put_opt_s(&mut item, "clinical_notes", report.clinical_notes.as_ref());
    put_opt_s(&mut item, "doctor_notes", report.doctor_notes.as_ref());
    put_opt_s(&mut item, "recommendations", report.recommendations.as_ref());
    put_s(&mut item, "storage_path", report.storage_path.clone());
    put_opt_s(&mut item, "report_pdf_url", report.report_pdf_url.as_ref());
    put_s(&mut item, "generated_at", report.generated_at.to_rfc3339());
    put_s(&mut item, "updated_at", report.updated_at.to_rfc3339());
    item.insert(
        "is_finalized".to_string(),
        AttributeValue::Bool(report.is_finalized),
    );
    item
}

fn activity_item(activity: &UserActivity) -> Item {
    let mut item = HashMap::new();
    put_s(&mut item, "id", activity.id.to_string());
    put_s(&mut item, "user_id", activity.user_id.to_string());
    put_s(&mut item, "action", activity.action.to_string());
    put_opt_s(&mut item, "description", activity.description.as_ref());
    put_opt_s(&mut item, "ip_address", activity.ip_address.as_ref());
    put_opt_s(&mut item, "user_agent", activity.user_agent.as_ref());
    put_s(&mut item, "timestamp", activity.timestamp.to_rfc3339());
    item
}

fn get_bool(item: &Item, key: &str, default: bool) -> bool {
    item.get(key)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(default)
}

fn get_opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn get_s(item: &Item, key: &str) -> Result<String, RepositoryError> {
    get_opt_s(item, key).ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn get_uuid(item: &Item, key: &str) -> Result<Uuid, RepositoryError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn get_opt_n<T: FromStr>(item: &Item, key: &str) -> Option<T> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<T>().ok())
}

fn get_n<T: FromStr>(item: &Item, key: &str) -> Result<T, RepositoryError> {
    get_opt_n(item, key).ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn get_opt_dt(item: &Item, key: &str) -> Option<DateTime<Utc>> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn get_dt(item: &Item, key: &str) -> Result<DateTime<Utc>, RepositoryError> {
    get_opt_dt(item, key).ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn get_enum<T: FromStr>(item: &Item, key: &str) -> Result<T, RepositoryError> {
    let raw = get_s(item, key)?;
    raw.parse::<T>()
        .map_err(|_| RepositoryError::InvalidData(format!("Invalid {}: {}", key, raw)))
}

fn parse_user(item: &Item) -> Result<User, RepositoryError> {
    let created_at = get_dt(item, "created_at")?;
    Ok(User {
        id: get_uuid(item, "id")?,
        email: get_s(item, "email")?,
        name: get_s(item, "name")?,
        role: get_enum(item, "role").unwrap_or_default(),
        institution: get_opt_s(item, "institution"),
        created_at,
        updated_at: get_opt_dt(item, "updated_at").unwrap_or(created_at),
        is_active: get_bool(item, "is_active", true),
    })
}

fn parse_image(item: &Item) -> Result<UploadedImage, RepositoryError> {
    Ok(UploadedImage {
        id: get_uuid(item, "id")?,
        user_id: get_uuid(item, "user_id")?,
        filename: get_s(item, "filename")?,
        storage_path: get_s(item, "storage_path")?,
        file_url: get_opt_s(item, "file_url"),
        file_size: get_n(item, "file_size")?,
        content_type: get_s(item, "content_type")?,
        content_hash: get_s(item, "content_hash")?,
        width: get_opt_n(item, "width"),
        height: get_opt_n(item, "height"),
        format: get_opt_s(item, "format"),
        status: get_enum(item, "status")?,
        upload_date: get_dt(item, "upload_date")?,
        processed_at: get_opt_dt(item, "processed_at"),
    })
}

fn parse_prediction(item: &Item) -> Result<PredictionRecord, RepositoryError> {
    Ok(PredictionRecord {
        id: get_uuid(item, "id")?,
        image_id: get_uuid(item, "image_id")?,
        user_id: get_uuid(item, "user_id")?,
        model_name: get_enum(item, "model_name")?,
        prediction: get_enum(item, "prediction")?,
        confidence_score: get_n(item, "confidence_score")?,
        processing_time: get_n(item, "processing_time")?,
        model_version: get_opt_s(item, "model_version"),
        created_at: get_dt(item, "created_at")?,
    })
}

fn parse_report(item: &Item) -> Result<ReportDocument, RepositoryError> {
    let generated_at = get_dt(item, "generated_at")?;
    Ok(ReportDocument {
        id: get_uuid(item, "id")?,
        user_id: get_uuid(item, "user_id")?,
        detection_result: get_uuid(item, "detection_result").ok(),
        patient: PatientInfo {
            name: get_opt_s(item, "patient_name"),
            age: get_opt_n(item, "patient_age"),
            gender: get_opt_s(item, "patient_gender"),
            record_number: get_opt_s(item, "patient_id"),
        },
        clinical_notes: get_opt_s(item, "clinical_notes"),
        doctor_notes: get_opt_s(item, "doctor_notes"),
        recommendations: get_opt_s(item, "recommendations"),
        storage_path: get_s(item, "storage_path")?,
        report_pdf_url: get_opt_s(item, "report_pdf_url"),
        generated_at,
        updated_at: get_opt_dt(item, "updated_at").unwrap_or(generated_at),
        is_finalized: get_bool(item, "is_finalized", false),
    })
}

fn parse_activity(item: &Item) -> Result<UserActivity, RepositoryError> {
    Ok(UserActivity {
        id: get_uuid(item, "id")?,
        user_id: get_uuid(item, "user_id")?,
        action: get_enum(item, "action")?,
        description: get_opt_s(item, "description"),
        ip_address: get_opt_s(item, "ip_address"),
        user_agent: get_opt_s(item, "user_agent"),
        timestamp: get_dt(item, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::tests::{image_for, report_for};
    use shared::{ActivityAction, ImageStatus, Label, ModelName, Role};

    #[test]
    fn image_items_keep_optional_fields_absent() {
        let image = image_for(Uuid::new_v4());
        let item = image_item(&image);
        assert!(!item.contains_key("file_url"));
        assert!(!item.contains_key("processed_at"));
        assert_eq!(item.get("status").unwrap().as_s().unwrap(), "pending");

        let parsed = parse_image(&item).unwrap();
        assert_eq!(parsed.id, image.id);
        assert_eq!(parsed.status, ImageStatus::Pending);
        assert_eq!(parsed.file_url, None);
    }

    #[test]
    fn prediction_items_use_wire_names_for_enums() {
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            model_name: ModelName::Vgg16,
            prediction: Label::NonCancer,
            confidence_score: 0.25,
            processing_time: 1.25,
            model_version: Some("v1.0".into()),
            created_at: Utc::now(),
        };
        let item = prediction_item(&record);
        assert_eq!(item.get("model_name").unwrap().as_s().unwrap(), "VGG16");
        assert_eq!(item.get("prediction").unwrap().as_s().unwrap(), "Non-Cancer");

        let parsed = parse_prediction(&item).unwrap();
        assert_eq!(parsed.model_name, ModelName::Vgg16);
        assert_eq!(parsed.confidence_score, 0.25);
    }

    #[test]
    fn user_with_unknown_role_falls_back_to_default() {
        let user = User::new(
            Uuid::new_v4(),
            "a@b.c".into(),
            "A".into(),
            Role::Admin,
            None,
        );
        let mut item = user_item(&user);
        put_s(&mut item, "role", "superuser");
        assert_eq!(parse_user(&item).unwrap().role, Role::Doctor);
    }

    #[test]
    fn missing_required_field_is_invalid_data() {
        let mut item = image_item(&image_for(Uuid::new_v4()));
        item.remove("storage_path");
        assert!(matches!(
            parse_image(&item),
            Err(RepositoryError::InvalidData(msg)) if msg.contains("storage_path")
        ));
    }

    #[test]
    fn reports_written_before_annotations_parse_as_open_drafts() {
        let report = report_for(Uuid::new_v4(), None);
        let mut item = report_item(&report);
        assert_eq!(item.get("is_finalized").unwrap().as_bool().unwrap(), &false);
        item.remove("is_finalized");
        item.remove("updated_at");

        let parsed = parse_report(&item).unwrap();
        assert!(!parsed.is_finalized);
        assert_eq!(parsed.updated_at, parsed.generated_at);
        assert_eq!(parsed.doctor_notes, None);
    }

    #[test]
    fn activity_items_store_action_wire_names() {
        let activity = UserActivity::new(
            Uuid::new_v4(),
            ActivityAction::ReportFinalized,
            "Report finalized",
        );
        let item = activity_item(&activity);
        assert_eq!(item.get("action").unwrap().as_s().unwrap(), "report_finalized");
        assert!(!item.contains_key("ip_address"));

        let parsed = parse_activity(&item).unwrap();
        assert_eq!(parsed.action, ActivityAction::ReportFinalized);
        assert_eq!(parsed.description.as_deref(), Some("Report finalized"));
    }
}
