//! Typed model calls.

use crate::error::{GenerationError, GenerationResult};
use crate::schema::StructuredOutput;
use crate::traits::ai::{Generator, InferenceRequest};
use crate::types::Validate;

/// Ask for a `T`, parse the answer and validate it.
///
/// The response schema is attached unless the request uses a grounding
/// tool, in which case the model answers in plain text and the JSON is
/// pulled out of the reply. Returns the value and the raw reply text.
pub async fn infer_structured<T>(
    generator: &dyn Generator,
    mut request: InferenceRequest,
) -> GenerationResult<(T, String)>
where
    T: StructuredOutput + Validate,
{
    if !request.web_search && !request.url_context {
        request.response_schema = Some(T::response_schema());
    }

    let inference = generator.infer(&request).await?;
    let value = parse_structured::<T>(&inference.text)?;
    Ok((value, inference.text))
}

/// Parse model text into `T` and validate it.
pub fn parse_structured<T>(text: &str) -> GenerationResult<T>
where
    T: StructuredOutput + Validate,
{
    let json = strip_code_fences(text);
    let value: T = serde_json::from_str(json)
        .map_err(|e| GenerationError::Malformed(format!("{}: {}", e, truncate(json, 200))))?;
    value.validate().map_err(GenerationError::Invalid)?;
    Ok(value)
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // drop the info string (e.g. "json") on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGenerator;
    use crate::traits::ai::Message;
    use crate::types::financials::AnnualReportInfo;
    use crate::types::nace::SectionAnswer;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[]\n```\n"), "[]");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let err = parse_structured::<AnnualReportInfo>(r#"{"country_code": "Germany"}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Invalid(_)));

        let err = parse_structured::<AnnualReportInfo>("I could not find the report").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_schema_attached_only_without_tools() {
        let generator = MockGenerator::new()
            .push_response(r#"{"classification": "C"}"#)
            .push_response("```json\n{\"classification\": \"N\"}\n```");

        let (plain, _) = infer_structured::<SectionAnswer>(
            &generator,
            InferenceRequest::new(vec![Message::user("classify")]),
        )
        .await
        .unwrap();
        let (grounded, raw) = infer_structured::<SectionAnswer>(
            &generator,
            InferenceRequest::new(vec![Message::user("classify")]).with_url_context(),
        )
        .await
        .unwrap();

        assert_eq!(plain.classification, "C");
        assert_eq!(grounded.classification, "N");
        assert!(raw.starts_with("```json"));

        let requests = generator.requests();
        assert!(requests[0].response_schema.is_some());
        assert!(requests[1].response_schema.is_none());
    }
}
