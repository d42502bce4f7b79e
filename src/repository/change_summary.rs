//! Diesel-based change summary repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{ChangeSummaryRecord, NewChangeSummary};
use super::pool::DbPool;
use super::{parse_datetime, Result};
use crate::models::{ChangeSummary, SummarySource};
use crate::schema::change_summaries;
use crate::with_conn;

impl From<ChangeSummaryRecord> for ChangeSummary {
    fn from(record: ChangeSummaryRecord) -> Self {
        ChangeSummary {
            id: record.id,
            diff_result_id: record.diff_result_id,
            overall_summary: record.overall_summary,
            changes: serde_json::from_str(&record.changes).unwrap_or_default(),
            critical_change: record.critical_change,
            recommendations: record.recommendations,
            total_changes: record.total_changes,
            free_text: record.free_text,
            model_tag: record.model_tag,
            source: SummarySource::from_str(&record.source).unwrap_or(SummarySource::Machine),
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based repository for the `change_summaries` table.
///
/// `regenerate_summary` (spec §6) appends a new row for the same
/// `diff_result_id` rather than overwriting the prior one, so the latest
/// row by `created_at` is always authoritative while history is retained.
#[derive(Clone)]
pub struct ChangeSummaryRepository {
    pool: DbPool,
}

impl ChangeSummaryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, summary: &ChangeSummary) -> Result<()> {
        let changes = serde_json::to_string(&summary.changes)?;
        let created_at = summary.created_at.to_rfc3339();

        let new_summary = NewChangeSummary {
            id: &summary.id,
            diff_result_id: &summary.diff_result_id,
            overall_summary: &summary.overall_summary,
            changes: &changes,
            critical_change: summary.critical_change.as_deref(),
            recommendations: summary.recommendations.as_deref(),
            total_changes: summary.total_changes,
            free_text: &summary.free_text,
            model_tag: &summary.model_tag,
            source: summary.source.as_str(),
            created_at: &created_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(change_summaries::table)
                .values(&new_summary)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// The most recently produced summary for a diff result, if any.
    pub async fn get_latest_for_diff_result(&self, diff_result_id: &str) -> Result<Option<ChangeSummary>> {
        let record: Option<ChangeSummaryRecord> = with_conn!(self.pool, conn => {
            change_summaries::table
                .filter(change_summaries::diff_result_id.eq(diff_result_id))
                .order(change_summaries::created_at.desc())
                .first::<ChangeSummaryRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(ChangeSummary::from))
    }

    /// Every summary ever produced for a diff result, oldest first.
    pub async fn list_for_diff_result(&self, diff_result_id: &str) -> Result<Vec<ChangeSummary>> {
        let records: Vec<ChangeSummaryRecord> = with_conn!(self.pool, conn => {
            change_summaries::table
                .filter(change_summaries::diff_result_id.eq(diff_result_id))
                .order(change_summaries::created_at.asc())
                .load::<ChangeSummaryRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(ChangeSummary::from).collect())
    }
}
