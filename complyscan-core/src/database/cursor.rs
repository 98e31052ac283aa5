//! Opaque continuation tokens for scan listings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use complyscan_model::{ScanId, ScanJob};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Position of the last item handed out. Listings are ordered by
/// `(started_at, id)` descending, so the next page holds strictly smaller keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    #[serde(rename = "s")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "i")]
    pub id: ScanId,
}

impl ScanCursor {
    pub fn after(job: &ScanJob) -> Self {
        Self {
            started_at: job.started_at,
            id: job.id,
        }
    }

    /// Whether `job` sorts after this cursor (i.e. belongs to the next page).
    pub fn precedes(&self, job: &ScanJob) -> bool {
        (job.started_at, job.id) < (self.started_at, self.id)
    }

    pub fn encode(&self) -> Result<String> {
        let raw = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| {
            ScanError::Validation("malformed continuation token".to_string())
        })?;
        serde_json::from_slice(&raw).map_err(|_| {
            ScanError::Validation("malformed continuation token".to_string())
        })
    }
}
