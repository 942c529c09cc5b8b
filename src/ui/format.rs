//! Display helpers for model names, durations and ranking text

use std::collections::BTreeMap;
use std::time::Duration;

/// `"3.4s"`, truncated to one decimal place
pub fn format_elapsed(elapsed: Duration) -> String {
    let tenths = elapsed.as_millis() / 100;
    format!("{}.{}s", tenths / 10, tenths % 10)
}

/// Drop the provider prefix: `openai/gpt-4o` and `ollama:llama3` become
/// `gpt-4o` and `llama3`.
pub fn short_model_name(model: &str) -> &str {
    if let Some(rest) = model.split('/').nth(1) {
        return rest;
    }
    model.split(':').nth(1).unwrap_or(model)
}

/// Replace anonymized `Response X` labels with short model names.
///
/// Longer labels go first so `Response AA` is never rewritten through its
/// `Response A` prefix.
pub fn deanonymize(text: &str, label_to_model: &BTreeMap<String, String>) -> String {
    let mut labels: Vec<(&String, &String)> = label_to_model.iter().collect();
    labels.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut out = text.to_string();
    for (label, model) in labels {
        if label.is_empty() {
            continue;
        }
        out = out.replace(label.as_str(), short_model_name(model));
    }
    out
}
