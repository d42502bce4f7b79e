//! Project: container owned by a user; owns DrawingVersions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A container owned by a user. Immutable once created except for `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: String, owner_id: String, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            name,
            created_at: now,
            updated_at: now,
        }
    }
}
