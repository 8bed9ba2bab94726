pub mod sanitizer;
pub mod structured_output;

pub use sanitizer::{detect_truncation, is_truncated, sanitize_response, SanitizedResponse, TruncationReason};
pub use structured_output::{audit_depth, validate_plan, DepthAudit, QuarterDepth, ValidatedPlan};
