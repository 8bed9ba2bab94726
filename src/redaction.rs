use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)\b(key|api[_-]?key|token|secret|password)\s*[:=]\s*["']?([A-Za-z0-9_\-\.]{6,})["']?"#)
            .expect("valid regex"),
        Regex::new(r"\b(AIza[0-9A-Za-z_\-]{35})\b").expect("valid regex"),
        Regex::new(r"\b(sk-[A-Za-z0-9]{20,})\b").expect("valid regex"),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Masks credentials in text headed for logs or error messages.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    known_secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also mask this exact value wherever it appears.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.trim().is_empty() {
            self.known_secrets.push(secret);
        }
        self
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for secret in &self.known_secrets {
            let matches = result.matches(secret.as_str()).count();
            if matches > 0 {
                redaction_count += matches;
                result = result.replace(secret.as_str(), "[REDACTED]");
            }
        }

        for pattern in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }

            redaction_count += matches;
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    if caps.len() > 2 {
                        let key = caps
                            .get(1)
                            .map(|m| m.as_str())
                            .unwrap_or("secret")
                            .to_ascii_lowercase();
                        format!("{}=[REDACTED]", key)
                    } else {
                        "[REDACTED]".to_string()
                    }
                })
                .to_string();
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}
