// Logging utilities
// Structured logging with JSON and human-readable formats, plus secret masking for field maps.

use log::Level;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

const SECRET_KEY_MARKERS: [&str; 5] = ["password", "pass", "secret", "token", "key"];

/// Mask a sensitive value, keeping the first/last four characters of long values.
pub fn mask_sensitive(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", start, end)
}

/// True when a submitted field name looks like it carries a secret.
pub fn is_secret_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS.iter().any(|m| k.contains(m))
}

/// Render a submitted field map for the log: secrets become `***`, the rest stay readable.
pub fn mask_field_map(fields: &HashMap<String, String>) -> String {
    let ordered: BTreeMap<&str, String> = fields
        .iter()
        .map(|(k, v)| {
            let shown = if is_secret_key(k) {
                if v.is_empty() {
                    String::new()
                } else {
                    "***".to_string()
                }
            } else {
                v.clone()
            };
            (k.as_str(), shown)
        })
        .collect();
    ordered
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn extract_tag(message: &str, tag: &str) -> (Option<String>, String) {
    let open = format!("[{}:", tag);
    let Some(start) = message.find(&open) else {
        return (None, message.to_string());
    };
    let Some(len) = message[start..].find(']') else {
        return (None, message.to_string());
    };
    let value = message[start + open.len()..start + len].trim().to_string();
    let rest = format!("{} {}", &message[..start], &message[start + len + 1..])
        .trim()
        .to_string();
    (Some(value), rest)
}

/// Split `[PHASE: ...]` and `[STEP: ...]` tags off a log message.
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let (phase, rest) = extract_tag(message, "PHASE");
    let (step, rest) = extract_tag(&rest, "STEP");
    (phase, step, rest)
}

/// One JSON object per line for the structured log file.
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });
    if let Some(phase) = phase {
        entry["phase"] = json!(phase);
    }
    if let Some(step) = step {
        entry["step"] = json!(step);
    }
    serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut line = format!("[{}] [{}]", timestamp, level.as_str());
    if let Some(phase) = phase {
        line.push_str(&format!(" [PHASE: {}]", phase));
    }
    if let Some(step) = step {
        line.push_str(&format!(" [STEP: {}]", step));
    }
    line.push_str(&format!(" [{}] {}", target, message));
    line
}
