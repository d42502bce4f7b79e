//! Diesel-based manual overlay repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{ManualOverlayRecord, NewManualOverlay};
use super::pool::DbPool;
use super::{parse_datetime, Result};
use crate::models::ManualOverlay;
use crate::schema::manual_overlays;
use crate::with_conn;

impl From<ManualOverlayRecord> for ManualOverlay {
    fn from(record: ManualOverlayRecord) -> Self {
        ManualOverlay {
            id: record.id,
            diff_result_id: record.diff_result_id,
            overlay_ref: record.overlay_ref,
            uploaded_by: record.uploaded_by,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based repository for the `manual_overlays` table.
///
/// Presence of a row for a `diff_result_id` triggers a new Summary task for
/// that pair (spec §3/§6).
#[derive(Clone)]
pub struct ManualOverlayRepository {
    pool: DbPool,
}

impl ManualOverlayRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, overlay: &ManualOverlay) -> Result<()> {
        let created_at = overlay.created_at.to_rfc3339();

        let new_overlay = NewManualOverlay {
            id: &overlay.id,
            diff_result_id: &overlay.diff_result_id,
            overlay_ref: &overlay.overlay_ref,
            uploaded_by: &overlay.uploaded_by,
            created_at: &created_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(manual_overlays::table)
                .values(&new_overlay)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// The most recently uploaded override overlay for a diff result, if any.
    pub async fn get_latest_for_diff_result(&self, diff_result_id: &str) -> Result<Option<ManualOverlay>> {
        let record: Option<ManualOverlayRecord> = with_conn!(self.pool, conn => {
            manual_overlays::table
                .filter(manual_overlays::diff_result_id.eq(diff_result_id))
                .order(manual_overlays::created_at.desc())
                .first::<ManualOverlayRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(ManualOverlay::from))
    }
}
