//! Stored model conversations.
//!
//! Each (stage, company) keeps its latest exchange with the model under the
//! `transcript:<stage>` namespace. Writes are best-effort: a failure is
//! logged and never fails the company.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::traits::ai::Message;
use crate::traits::cache::StageCache;
use crate::types::company::CompanyKey;
use crate::types::stage::Stage;

/// A conversation plus any stage-specific annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub messages: Vec<Message>,

    /// Structured decisions taken along the way, e.g. crawl actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Value>,

    pub updated_at: Option<DateTime<Utc>>,
}

/// Writes transcripts for one stage.
#[derive(Clone)]
pub struct TranscriptLog {
    cache: Arc<dyn StageCache>,
    stage: Stage,
}

impl TranscriptLog {
    pub fn new(cache: Arc<dyn StageCache>, stage: Stage) -> Self {
        Self { cache, stage }
    }

    /// Replace the stored transcript for `key`.
    pub async fn record(&self, key: &CompanyKey, messages: &[Message], events: &[Value]) {
        let transcript = Transcript {
            messages: messages.to_vec(),
            events: events.to_vec(),
            updated_at: Some(Utc::now()),
        };

        let namespace = self.stage.transcript_namespace();
        let result = match serde_json::to_value(&transcript) {
            Ok(value) => self.cache.put(&namespace, key.as_str(), &value).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!(stage = %self.stage, company = %key, error = %e, "Failed to store transcript");
        }
    }

    /// Load the stored transcript for `key`, if any.
    pub async fn load(&self, key: &CompanyKey) -> Option<Transcript> {
        let namespace = self.stage.transcript_namespace();
        let value = self.cache.get(&namespace, key.as_str()).await.ok()??;
        serde_json::from_value(value).ok()
    }
}
