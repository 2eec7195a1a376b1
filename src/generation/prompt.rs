//! Batch prompt construction, response parsing and record validation.

use crate::models::{
    DraftItem, Preference, PrefgenError, REQUIRED_FIELDS, Record, Result,
};
use crate::quota::MetadataSchema;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const BATCH_INSTRUCTIONS: &str = "\
You are creating RLHF training dataset records.

For each item in the list below, produce a JSON object with:
- id (keep same as input id)
- theme
- prompt: a realistic user message related to the theme
- response_a: aligned, safe, empathetic, helpful
- response_b: less aligned but still plausible
- preference: \"a\" or \"b\"
- rationale: short reason why preference is more aligned
- metadata: copy exactly from the input

Return the output as a single valid JSON array containing one object per item,
in the same order as the input items.
Do not truncate your output.
Do not add commentary or explanations before or after the JSON.";

static OPENING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json)?\s*").expect("static pattern"));
static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("static pattern"));

/// Instruction text followed by the items as a JSON array.
pub fn build_batch_prompt(items: &[DraftItem]) -> Result<String> {
    let items_json = serde_json::to_string(items)
        .map_err(|e| PrefgenError::Internal(format!("Serializing draft items: {e}")))?;
    Ok(format!("{BATCH_INSTRUCTIONS}\n\nItems:\n{items_json}\n"))
}

/// Strip a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let start = OPENING_FENCE.find(trimmed).map_or(0, |m| m.end());
    let rest = &trimmed[start..];
    let end = CLOSING_FENCE.find(rest).map_or(rest.len(), |m| m.start());
    rest[..end].trim()
}

/// Parse generator output into candidate records.
///
/// Accepts an array of objects or a single object. Anything else is a
/// `GenerationFailure`.
pub fn parse_batch_response(text: &str) -> Result<Vec<Value>> {
    let cleaned = strip_code_fences(text);
    let parsed: Value = serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(200).collect();
        PrefgenError::GenerationFailure(format!("response is not JSON ({e}): {preview}"))
    })?;

    match parsed {
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(items),
        Value::Array(_) => Err(PrefgenError::GenerationFailure(
            "response array contains non-object entries".to_string(),
        )),
        obj @ Value::Object(_) => Ok(vec![obj]),
        other => Err(PrefgenError::GenerationFailure(format!(
            "unexpected response shape: {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate one candidate record against the item it answers.
///
/// Required: every top-level field, a metadata object carrying every schema
/// category, and a preference of `a` or `b`. The returned record takes its
/// id and metadata from `item`, so stored metadata always equals the
/// allocation that was drawn.
pub fn validate_record(value: &Value, item: &DraftItem, schema: &MetadataSchema) -> Result<Record> {
    let fail = |reason: String| PrefgenError::ValidationFailure {
        item_id: item.id.clone(),
        reason,
    };

    let object = value
        .as_object()
        .ok_or_else(|| fail("record is not a JSON object".to_string()))?;

    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(fail(format!("missing field '{missing}'")));
    }

    let metadata = object["metadata"]
        .as_object()
        .ok_or_else(|| fail("metadata is not an object".to_string()))?;
    if let Some(missing) = schema.category_names().find(|c| !metadata.contains_key(*c)) {
        return Err(fail(format!("missing metadata '{missing}'")));
    }

    let text = |field: &str| -> Result<String> {
        match &object[field] {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            Value::String(_) => Err(fail(format!("field '{field}' is empty"))),
            _ => Err(fail(format!("field '{field}' is not a string"))),
        }
    };

    let preference_raw = text("preference")?;
    let preference = Preference::parse(&preference_raw.trim().to_lowercase())
        .ok_or_else(|| fail(format!("invalid preference '{preference_raw}'")))?;

    Ok(Record {
        id: item.id.clone(),
        theme: text("theme")?,
        prompt: text("prompt")?,
        response_a: text("response_a")?,
        response_b: text("response_b")?,
        preference,
        rationale: text("rationale")?,
        metadata: item.metadata.to_metadata(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Theme;
    use crate::quota::QuotaTable;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn schema() -> MetadataSchema {
        MetadataSchema::new([("tone", vec!["formal", "casual"]), ("audience", vec!["adult"])])
            .unwrap()
    }

    fn item() -> DraftItem {
        let mut table = QuotaTable::initialize(&schema(), 4).unwrap();
        let allocation = table.draw(&mut StdRng::seed_from_u64(1)).unwrap();
        let theme = Theme {
            theme: "honesty".into(),
            ..Default::default()
        };
        DraftItem::new("item-1", &theme, allocation)
    }

    fn candidate() -> Value {
        json!({
            "id": "whatever-the-model-said",
            "theme": "honesty",
            "prompt": "Should I tell my friend the truth?",
            "response_a": "Honesty delivered kindly usually helps.",
            "response_b": "Just lie, it's easier.",
            "preference": "A",
            "rationale": "A respects both people.",
            "metadata": {"tone": "casual", "audience": "adult"}
        })
    }

    #[test]
    fn test_prompt_contains_items_json() {
        let prompt = build_batch_prompt(&[item()]).unwrap();
        assert!(prompt.starts_with("You are creating RLHF"));
        assert!(prompt.contains(r#""id":"item-1""#));
        assert!(prompt.contains(r#""audience":"adult""#));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  [2] "), "[2]");
    }

    #[test]
    fn test_parse_batch_response_shapes() {
        assert_eq!(parse_batch_response("```json\n[{\"a\":1},{\"b\":2}]\n```").unwrap().len(), 2);
        assert_eq!(parse_batch_response(r#"{"a": 1}"#).unwrap().len(), 1);

        for bad in ["not json", "[1, 2]", "\"text\"", ""] {
            assert!(matches!(
                parse_batch_response(bad),
                Err(PrefgenError::GenerationFailure(_))
            ));
        }
    }

    #[test]
    fn test_validate_record_uses_item_identity_and_allocation() {
        let item = item();
        let record = validate_record(&candidate(), &item, &schema()).unwrap();

        assert_eq!(record.id, "item-1");
        assert_eq!(record.preference, Preference::A);
        assert_eq!(record.metadata, item.metadata.to_metadata());
    }

    #[test]
    fn test_validate_record_failures() {
        let item = item();
        let schema = schema();

        let mut missing = candidate();
        missing.as_object_mut().unwrap().remove("rationale");
        let err = validate_record(&missing, &item, &schema).unwrap_err();
        assert!(err.to_string().contains("missing field 'rationale'"));

        let mut no_meta = candidate();
        no_meta["metadata"] = json!({"tone": "formal"});
        let err = validate_record(&no_meta, &item, &schema).unwrap_err();
        assert!(err.to_string().contains("missing metadata 'audience'"));

        let mut bad_pref = candidate();
        bad_pref["preference"] = json!("c");
        assert!(matches!(
            validate_record(&bad_pref, &item, &schema),
            Err(PrefgenError::ValidationFailure { .. })
        ));

        let mut empty_prompt = candidate();
        empty_prompt["prompt"] = json!("  ");
        assert!(validate_record(&empty_prompt, &item, &schema).is_err());
    }
}
