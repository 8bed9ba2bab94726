use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;

static LEADING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+\-]*[ \t]*\r?\n?").expect("valid leading fence regex"));
static TRAILING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?[ \t]*```\s*$").expect("valid trailing fence regex"));
static CONCAT_ARTIFACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[ \t]*\+[ \t]*\r?\n?[ \t]*""#).expect("valid concatenation regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationReason {
    Empty,
    UnterminatedString,
    EndsMidToken(char),
    MissingClose { expected: char, found: char },
    Unbalanced { open: usize },
}

impl fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "response is empty"),
            Self::UnterminatedString => write!(f, "response ends inside a string"),
            Self::EndsMidToken(found) => write!(f, "response ends mid-token at '{}'", found),
            Self::MissingClose { expected, found } => {
                write!(f, "response ends with '{}' instead of closing '{}'", found, expected)
            }
            Self::Unbalanced { open } => write!(f, "response has {} unclosed bracket(s)", open),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizedResponse {
    Text(String),
    Truncated(TruncationReason),
}

impl SanitizedResponse {
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated(_))
    }
}

/// Cleans raw generator output and rejects it when it was cut short.
pub fn sanitize_response(raw: &str) -> SanitizedResponse {
    let unfenced = strip_code_fences(raw);
    let started = strip_leading_prose(&unfenced);
    let joined = join_concatenated_strings(started);
    let trimmed = joined.trim();
    let text = strip_trailing_prose(trimmed);

    match detect_truncation(text) {
        Some(reason) => SanitizedResponse::Truncated(reason),
        None => SanitizedResponse::Text(text.to_string()),
    }
}

pub fn is_truncated(text: &str) -> bool {
    detect_truncation(text).is_some()
}

pub fn detect_truncation(text: &str) -> Option<TruncationReason> {
    let text = text.trim();
    let (Some(first), Some(last)) = (text.chars().next(), text.chars().next_back()) else {
        return Some(TruncationReason::Empty);
    };

    let Some(expected) = closer_for(first) else {
        // Not a structured payload; only a dangling word is detectable here.
        if ends_mid_token(last) {
            return Some(TruncationReason::EndsMidToken(last));
        }
        return None;
    };

    let scan = scan_structure(text);
    if scan.in_string {
        return Some(TruncationReason::UnterminatedString);
    }
    if ends_mid_token(last) {
        return Some(TruncationReason::EndsMidToken(last));
    }
    if last != expected {
        return Some(TruncationReason::MissingClose {
            expected,
            found: last,
        });
    }
    if scan.mismatched || !scan.open.is_empty() {
        return Some(TruncationReason::Unbalanced {
            open: scan.open.len().max(1),
        });
    }
    None
}

fn strip_code_fences(raw: &str) -> String {
    let without_leading = LEADING_FENCE_RE.replace(raw, "");
    TRAILING_FENCE_RE.replace(&without_leading, "").into_owned()
}

/// A bracket that opens a line wins over one embedded in a sentence such as
/// `Plan [v1]: {...}`. Failing that, the first `{` is taken, then the first `[`.
fn strip_leading_prose(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let body = line.trim_start();
        if body.starts_with(['{', '[']) {
            return &text[offset + line.len() - body.len()..];
        }
        offset += line.len();
    }
    match text.find('{').or_else(|| text.find('[')) {
        Some(start) => &text[start..],
        None => text,
    }
}

/// Splices `"a" + "b"` into `"ab"`. Only a `+` between a closing quote and the
/// next opening quote counts; a `+` inside a string value is left alone.
fn join_concatenated_strings(text: &str) -> Cow<'_, str> {
    if !CONCAT_ARTIFACT_RE.is_match(text) {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    let mut joined = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if !in_string {
            in_string = byte == b'"';
        } else if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            if let Some(resume) = continuation_after(bytes, index + 1) {
                joined.push_str(&text[copied_to..index]);
                copied_to = resume;
                index = resume;
                continue;
            }
            in_string = false;
        }
        index += 1;
    }

    joined.push_str(&text[copied_to..]);
    Cow::Owned(joined)
}

/// Offset just past the opening quote when `from` begins `<ws> + <ws> "`.
fn continuation_after(bytes: &[u8], from: usize) -> Option<usize> {
    let skip_whitespace = |mut at: usize| {
        while at < bytes.len() && bytes[at].is_ascii_whitespace() {
            at += 1;
        }
        at
    };
    let plus = skip_whitespace(from);
    if bytes.get(plus) != Some(&b'+') {
        return None;
    }
    let quote = skip_whitespace(plus + 1);
    (bytes.get(quote) == Some(&b'"')).then_some(quote + 1)
}

fn strip_trailing_prose(text: &str) -> &str {
    match scan_structure(text).top_level_end {
        Some(end) => text[..end].trim_end(),
        None => text,
    }
}

fn closer_for(open: char) -> Option<char> {
    match open {
        '{' => Some('}'),
        '[' => Some(']'),
        _ => None,
    }
}

fn ends_mid_token(last: char) -> bool {
    last.is_alphanumeric() || matches!(last, ',' | ':' | '"' | '\\' | '-' | '.')
}

#[derive(Debug, Default)]
struct StructureScan {
    open: Vec<char>,
    in_string: bool,
    mismatched: bool,
    /// Byte offset just past the close of the first top-level value.
    top_level_end: Option<usize>,
}

fn scan_structure(text: &str) -> StructureScan {
    let mut scan = StructureScan::default();
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if scan.in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                scan.in_string = false;
            }
            continue;
        }

        match ch {
            '"' => scan.in_string = true,
            '{' | '[' => {
                if let Some(closer) = closer_for(ch) {
                    scan.open.push(closer);
                }
            }
            '}' | ']' => {
                if scan.open.pop() != Some(ch) {
                    scan.mismatched = true;
                    break;
                }
                if scan.open.is_empty() && scan.top_level_end.is_none() {
                    scan.top_level_end = Some(index + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    scan
}
