//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! For SQLite, operations are wrapped via `SyncConnectionWrapper` since
//! diesel-async only natively supports Postgres/MySQL.

use diesel::prelude::*;

use crate::schema;

/// Project record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::projects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProjectRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New project for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::projects)]
pub struct NewProject<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub name: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Drawing version record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::drawing_versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DrawingVersionRecord {
    pub id: String,
    pub project_id: String,
    pub storage_ref: String,
    pub page_count: i32,
    pub created_at: String,
}

/// New drawing version for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::drawing_versions)]
pub struct NewDrawingVersion<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub storage_ref: &'a str,
    pub page_count: i32,
    pub created_at: &'a str,
}

/// Job record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub id: String,
    pub project_id: String,
    pub old_version_id: String,
    pub new_version_id: String,
    pub created_by: String,
    pub status: String,
    pub unmatched_old_names: String,
    pub unmatched_new_names: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

/// New job for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::jobs)]
pub struct NewJob<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub old_version_id: &'a str,
    pub new_version_id: &'a str,
    pub created_by: &'a str,
    pub status: &'a str,
    pub unmatched_old_names: &'a str,
    pub unmatched_new_names: &'a str,
    pub created_at: &'a str,
    pub started_at: Option<&'a str>,
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
}

/// Job stage record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_stages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobStageRecord {
    pub id: String,
    pub job_id: String,
    pub kind: String,
    pub status: String,
    pub expected_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// New job stage for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::job_stages)]
pub struct NewJobStage<'a> {
    pub id: &'a str,
    pub job_id: &'a str,
    pub kind: &'a str,
    pub status: &'a str,
    pub expected_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Page task record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::page_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageTaskRecord {
    pub id: String,
    pub job_id: String,
    pub stage_kind: String,
    pub drawing_version_id: Option<String>,
    pub page_index: Option<i32>,
    pub old_page_index: Option<i32>,
    pub new_page_index: Option<i32>,
    pub drawing_name: Option<String>,
    pub attempt_count: i32,
    pub status: String,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New page task for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::page_tasks)]
pub struct NewPageTask<'a> {
    pub id: &'a str,
    pub job_id: &'a str,
    pub stage_kind: &'a str,
    pub drawing_version_id: Option<&'a str>,
    pub page_index: Option<i32>,
    pub old_page_index: Option<i32>,
    pub new_page_index: Option<i32>,
    pub drawing_name: Option<&'a str>,
    pub attempt_count: i32,
    pub status: &'a str,
    pub error_kind: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub next_retry_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Page result record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::page_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageResultRecord {
    pub id: String,
    pub job_id: String,
    pub drawing_version_id: String,
    pub page_index: i32,
    pub image_ref: String,
    pub drawing_name: Option<String>,
    pub extracted_metadata: String,
    pub created_at: String,
}

/// New page result for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::page_results)]
pub struct NewPageResult<'a> {
    pub id: &'a str,
    pub job_id: &'a str,
    pub drawing_version_id: &'a str,
    pub page_index: i32,
    pub image_ref: &'a str,
    pub drawing_name: Option<&'a str>,
    pub extracted_metadata: &'a str,
    pub created_at: &'a str,
}

/// Diff result record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::diff_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DiffResultRecord {
    pub id: String,
    pub job_id: String,
    pub drawing_name: String,
    pub old_image_ref: String,
    pub new_image_ref: String,
    pub overlay_ref: String,
    pub alignment_score: f64,
    pub change_detected: i32,
    pub change_count: Option<i64>,
    pub created_at: String,
}

/// New diff result for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::diff_results)]
pub struct NewDiffResult<'a> {
    pub id: &'a str,
    pub job_id: &'a str,
    pub drawing_name: &'a str,
    pub old_image_ref: &'a str,
    pub new_image_ref: &'a str,
    pub overlay_ref: &'a str,
    pub alignment_score: f64,
    pub change_detected: i32,
    pub change_count: Option<i64>,
    pub created_at: &'a str,
}

/// Change summary record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::change_summaries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChangeSummaryRecord {
    pub id: String,
    pub diff_result_id: String,
    pub overall_summary: String,
    pub changes: String,
    pub critical_change: Option<String>,
    pub recommendations: Option<String>,
    pub total_changes: i32,
    pub free_text: String,
    pub model_tag: String,
    pub source: String,
    pub created_at: String,
}

/// New change summary for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::change_summaries)]
pub struct NewChangeSummary<'a> {
    pub id: &'a str,
    pub diff_result_id: &'a str,
    pub overall_summary: &'a str,
    pub changes: &'a str,
    pub critical_change: Option<&'a str>,
    pub recommendations: Option<&'a str>,
    pub total_changes: i32,
    pub free_text: &'a str,
    pub model_tag: &'a str,
    pub source: &'a str,
    pub created_at: &'a str,
}

/// Manual overlay record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::manual_overlays)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ManualOverlayRecord {
    pub id: String,
    pub diff_result_id: String,
    pub overlay_ref: String,
    pub uploaded_by: String,
    pub created_at: String,
}

/// New manual overlay for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::manual_overlays)]
pub struct NewManualOverlay<'a> {
    pub id: &'a str,
    pub diff_result_id: &'a str,
    pub overlay_ref: &'a str,
    pub uploaded_by: &'a str,
    pub created_at: &'a str,
}

/// Config history record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::configuration_history)]
#[diesel(primary_key(uuid))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConfigHistoryRecord {
    pub uuid: String,
    pub created_at: String,
    pub data: String,
    pub format: String,
    pub hash: String,
}

/// New config history entry for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::configuration_history)]
pub struct NewConfigHistory<'a> {
    pub uuid: &'a str,
    pub created_at: &'a str,
    pub data: &'a str,
    pub format: &'a str,
    pub hash: &'a str,
}
