//! Typed view over a [`StageCache`].
//!
//! Every cached stage result is a [`CacheEntry`]: either the stage output or
//! a failure sentinel, so "failed" can be told apart from "never attempted".

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheResult;
use crate::traits::cache::StageCache;
use crate::types::company::CompanyKey;
use crate::types::stage::{Stage, StageStatus};

/// Persisted outcome of one stage for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheEntry<T> {
    /// Work finished; never redone.
    Done { value: T },

    /// Last attempt failed.
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl<T> CacheEntry<T> {
    pub fn done(value: T) -> Self {
        Self::Done { value }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn status(&self) -> StageStatus {
        match self {
            Self::Done { .. } => StageStatus::Done,
            Self::Failed { .. } => StageStatus::Failed,
        }
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Self::Done { value } => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Read a typed entry.
///
/// A stored value that no longer matches `T` is logged and reported as
/// absent, so the stage recomputes it.
pub async fn read_entry<T: DeserializeOwned>(
    cache: &dyn StageCache,
    stage: Stage,
    key: &CompanyKey,
) -> CacheResult<Option<CacheEntry<T>>> {
    let Some(raw) = cache.get(stage.as_str(), key.as_str()).await? else {
        return Ok(None);
    };

    match serde_json::from_value(raw) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(
                stage = %stage,
                company = %key,
                error = %e,
                "Ignoring unreadable cache entry"
            );
            Ok(None)
        }
    }
}

/// Write a typed entry, overwriting any previous one.
pub async fn write_entry<T: Serialize>(
    cache: &dyn StageCache,
    stage: Stage,
    key: &CompanyKey,
    entry: &CacheEntry<T>,
) -> CacheResult<()> {
    let value = serde_json::to_value(entry)?;
    cache.put(stage.as_str(), key.as_str(), &value).await
}

/// Lifecycle status without deserializing the stage output.
pub async fn entry_status(
    cache: &dyn StageCache,
    stage: Stage,
    key: &CompanyKey,
) -> CacheResult<StageStatus> {
    let raw = cache.get(stage.as_str(), key.as_str()).await?;
    let status = match raw.as_ref().and_then(|v| v.get("status")).and_then(|s| s.as_str()) {
        Some("done") => StageStatus::Done,
        Some("failed") => StageStatus::Failed,
        _ => StageStatus::NotStarted,
    };
    Ok(status)
}
