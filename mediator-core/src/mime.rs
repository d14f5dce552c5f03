//! File name → content-type classification.

/// Content type used when nothing better can be derived from the name.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Best-effort content type for `file_name`, derived from its extension.
///
/// Matching is case-insensitive. A name without an extension, or with an
/// extension nobody knows, resolves to [`OCTET_STREAM`]. Only the last path
/// segment is considered, so object keys like `reports/2024/q1.csv` work.
pub fn classify(file_name: &str) -> String {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    let Some((stem, ext)) = base.rsplit_once('.') else {
        return OCTET_STREAM.to_owned();
    };
    // Dotfiles like `.env` have no extension.
    if stem.is_empty() || ext.is_empty() {
        return OCTET_STREAM.to_owned();
    }

    let ext = ext.to_ascii_lowercase();
    match ext.as_str() {
        // Data formats mime_guess leaves out or classifies differently.
        "parquet" => "application/vnd.apache.parquet".to_owned(),
        "avro" => "application/avro".to_owned(),
        "ndjson" | "jsonl" => "application/x-ndjson".to_owned(),
        _ => mime_guess::from_ext(&ext)
            .first()
            .map(|m| m.essence_str().to_owned())
            .unwrap_or_else(|| OCTET_STREAM.to_owned()),
    }
}
