//! classify-nace: assign a NACE Rev. 2 code from the activity description.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{StageError, StageResult};
use crate::pipeline::prompts;
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::pipeline::structured::infer_structured;
use crate::pipeline::transcript::TranscriptLog;
use crate::traits::ai::{Generator, InferenceRequest, Message, ModelTier};
use crate::traits::cache::StageCache;
use crate::types::company::CompanyRecord;
use crate::types::nace::{DivisionAnswer, NaceCode, NaceTaxonomy, SectionAnswer};
use crate::types::stage::Stage;

/// Two-step classifier: section letter, then division within it.
///
/// The section must exist in the taxonomy. A failed second step keeps the
/// section-only code.
pub struct NaceClassifier {
    generator: Arc<dyn Generator>,
    taxonomy: Arc<NaceTaxonomy>,
    transcripts: TranscriptLog,
}

impl NaceClassifier {
    pub fn new(generator: Arc<dyn Generator>, taxonomy: Arc<NaceTaxonomy>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            generator,
            taxonomy,
            transcripts: TranscriptLog::new(cache, Stage::ClassifyNace),
        }
    }

    async fn classify(&self, record: &CompanyRecord, messages: &mut Vec<Message>) -> StageResult<NaceCode> {
        let description = record
            .financials
            .as_ref()
            .and_then(|f| f.main_activity_description.as_deref())
            .ok_or_else(|| StageError::NotFound("no main activity description".into()))?;

        let level1 = serde_json::to_value(&self.taxonomy.level1).unwrap_or(Value::Null);
        messages.push(Message::user(prompts::nace_section(&record.name, &level1, description)));

        let request = InferenceRequest::new(messages.clone()).with_tier(ModelTier::Flash);
        let (answer, raw) = infer_structured::<SectionAnswer>(self.generator.as_ref(), request).await?;
        messages.push(Message::model(raw));

        let section = answer.classification.trim().to_string();
        let divisions = match self.taxonomy.divisions(&section) {
            Some(divisions) if self.taxonomy.has_section(&section) => divisions.clone(),
            _ => {
                return Err(StageError::Invalid(format!(
                    "section {:?} is not in the taxonomy",
                    section
                )))
            }
        };

        let code = NaceCode::section(section);
        match self.classify_division(record, &code, &divisions, messages).await {
            Ok(division) => Ok(code.with_division(division)),
            Err(e) => {
                warn!(company = %record.key, error = %e, "Division classification failed, keeping section");
                Ok(code)
            }
        }
    }

    async fn classify_division(
        &self,
        record: &CompanyRecord,
        code: &NaceCode,
        divisions: &Value,
        messages: &mut Vec<Message>,
    ) -> StageResult<String> {
        messages.push(Message::user(prompts::nace_division(&record.name, divisions)));

        let request = InferenceRequest::new(messages.clone()).with_tier(ModelTier::Flash);
        let (answer, raw) = infer_structured::<DivisionAnswer>(self.generator.as_ref(), request).await?;
        messages.push(Message::model(raw));

        let answer = answer.classification.trim();
        let division = answer.strip_prefix(code.section.as_str()).unwrap_or(answer);
        if !self.taxonomy.has_division(&code.section, division) {
            return Err(StageError::Invalid(format!(
                "division {:?} is not under section {}",
                division, code.section
            )));
        }
        Ok(division.to_string())
    }
}

#[async_trait]
impl StageWorker for NaceClassifier {
    type Output = NaceCode;

    fn stage(&self) -> Stage {
        Stage::ClassifyNace
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        record
            .financials
            .as_ref()
            .and_then(|f| f.main_activity_description.as_deref())
            .is_some_and(|d| !d.trim().is_empty())
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<NaceCode> {
        let mut messages = Vec::new();
        let result = self.classify(record, &mut messages).await;
        self.transcripts.record(&record.key, &messages, &[]).await;

        if let Ok(code) = &result {
            info!(company = %record.key, nace = %code, "Company classified");
        }
        result
    }

    fn apply(&self, record: &mut CompanyRecord, output: NaceCode) {
        output.apply(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCache;
    use crate::testing::MockGenerator;
    use crate::types::financials::AnnualReportInfo;
    use serde_json::json;

    fn taxonomy() -> Arc<NaceTaxonomy> {
        Arc::new(NaceTaxonomy::from_maps(
            serde_json::from_value(json!({"C": "Manufacturing", "N": "Administrative and support"})).unwrap(),
            serde_json::from_value(json!({
                "C": {"25": "Fabricated metal products"},
                "N": {"78": "Employment activities"}
            }))
            .unwrap(),
        ))
    }

    fn staffing_company() -> CompanyRecord {
        let mut record = CompanyRecord::new("Adecco");
        record.financials = Some(AnnualReportInfo {
            main_activity_description: Some("Temporary staffing and recruitment.".into()),
            ..Default::default()
        });
        record
    }

    fn classifier(generator: &MockGenerator) -> NaceClassifier {
        NaceClassifier::new(Arc::new(generator.clone()), taxonomy(), Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn test_two_level_code() {
        let generator = MockGenerator::new()
            .with_rule("level 1", r#"{"classification": "N"}"#)
            .with_rule("level 2", r#"{"classification": "N78"}"#);

        let code = classifier(&generator).run(&staffing_company()).await.unwrap();

        assert_eq!(code.code(), "N78");
        // the second step continues the first conversation
        assert_eq!(generator.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_division_failure_keeps_section() {
        let generator = MockGenerator::new()
            .with_rule("level 1", r#"{"classification": "N"}"#)
            .with_rule("level 2", r#"{"classification": "99"}"#);

        let code = classifier(&generator).run(&staffing_company()).await.unwrap();
        assert_eq!(code, NaceCode::section("N"));
    }

    #[tokio::test]
    async fn test_unknown_section_fails() {
        let generator = MockGenerator::new().with_rule("level 1", r#"{"classification": "Z"}"#);

        let err = classifier(&generator).run(&staffing_company()).await.unwrap_err();
        assert!(matches!(err, StageError::Invalid(_)));
        assert_eq!(generator.call_count(), 1);
    }

    #[test]
    fn test_requires_activity_description() {
        let classifier = classifier(&MockGenerator::new());
        assert!(!classifier.is_ready(&CompanyRecord::new("Adecco")));
        assert!(classifier.is_ready(&staffing_company()));
    }
}
