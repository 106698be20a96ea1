//! Per-service usage accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub request_count: u64,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub estimated_tokens: u64,
}

impl ApiUsage {
    pub fn record(&mut self, tokens: u64, at: DateTime<Utc>) {
        self.request_count += 1;
        self.first_used.get_or_insert(at);
        self.last_used = Some(at);
        self.estimated_tokens = self.estimated_tokens.saturating_add(tokens);
    }
}

fn usage_field(response: &Value, field: &str) -> Option<u64> {
    response.get("usage")?.get(field)?.as_u64()
}

/// Token estimate for one call.
///
/// `usage.total_tokens` if reported, else prompt plus completion tokens,
/// else a quarter of the characters of request and response, rounded up.
pub fn estimate_tokens(request: &Value, response: &Value) -> u64 {
    if let Some(total) = usage_field(response, "total_tokens") {
        return total;
    }
    let prompt = usage_field(response, "prompt_tokens");
    let completion = usage_field(response, "completion_tokens");
    if prompt.is_some() || completion.is_some() {
        return prompt.unwrap_or(0) + completion.unwrap_or(0);
    }

    let chars = text_len(request) + text_len(response);
    chars.div_ceil(4)
}

fn text_len(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count() as u64,
        other => other.to_string().chars().count() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_reported_total() {
        let response = json!({"usage": {"total_tokens": 42, "prompt_tokens": 1}});
        assert_eq!(estimate_tokens(&json!({}), &response), 42);
    }

    #[test]
    fn sums_prompt_and_completion() {
        let response = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5}});
        assert_eq!(estimate_tokens(&json!({}), &response), 15);
    }

    #[test]
    fn falls_back_to_character_count() {
        // 5 + 6 chars -> ceil(11 / 4)
        assert_eq!(estimate_tokens(&json!("hello"), &json!("world!")), 3);
    }

    #[test]
    fn record_keeps_first_use() {
        let mut usage = ApiUsage::default();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(1);
        usage.record(10, t1);
        usage.record(5, t2);
        assert_eq!(usage.request_count, 2);
        assert_eq!(usage.first_used, Some(t1));
        assert_eq!(usage.last_used, Some(t2));
        assert_eq!(usage.estimated_tokens, 15);
    }
}
