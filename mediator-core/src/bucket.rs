//! Bucket name validation and sanitization (S3 naming rules).

use regex::Regex;
use std::sync::LazyLock;

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 63;

static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$").expect("static regex"));
static IPV4_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("static regex"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9.-]+").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name {name:?} must be between 3 and 63 characters")]
    Length { name: String },
    #[error("bucket name {name:?} may only contain lowercase letters, digits, '.' and '-', and must start and end with a letter or digit")]
    Characters { name: String },
    #[error("bucket name {name:?} must not contain consecutive dots")]
    ConsecutiveDots { name: String },
    #[error("bucket name {name:?} must not look like an IP address")]
    IpAddress { name: String },
}

/// Checks `name` against the S3 bucket naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), BucketNameError> {
    if name.len() < MIN_LEN || name.len() > MAX_LEN {
        return Err(BucketNameError::Length { name: name.into() });
    }
    if !VALID_NAME.is_match(name) {
        return Err(BucketNameError::Characters { name: name.into() });
    }
    if name.contains("..") {
        return Err(BucketNameError::ConsecutiveDots { name: name.into() });
    }
    if IPV4_LIKE.is_match(name) {
        return Err(BucketNameError::IpAddress { name: name.into() });
    }
    Ok(())
}

/// Turns an arbitrary label into a valid bucket name, or `None` when nothing
/// usable is left.
///
/// Lowercases, collapses runs of disallowed characters into `-`, squeezes
/// repeated dots, trims separators from both ends and truncates to 63 chars.
/// Short results are padded with `-bucket`.
pub fn sanitize_bucket_name(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut name = DISALLOWED.replace_all(&lowered, "-").into_owned();
    while name.contains("..") {
        name = name.replace("..", ".");
    }
    let mut name = name
        .trim_matches(|c| c == '-' || c == '.')
        .to_string();
    if name.is_empty() {
        return None;
    }
    if name.len() < MIN_LEN {
        name.push_str("-bucket");
    }
    if name.len() > MAX_LEN {
        name.truncate(MAX_LEN);
        name = name.trim_end_matches(|c| c == '-' || c == '.').to_string();
    }
    validate_bucket_name(&name).ok().map(|_| name)
}
