//! Processors shipped with the mediator.
//!
//! - [`ChecksumProcessor`]: logs a SHA-256 digest of every file.
//! - [`JsonValidationProcessor`]: rejects JSON files that do not parse.
//! - [`MirrorProcessor`]: copies every file into a local directory tree.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::contract::{FileProcessor, ProcessingContext, ProcessorError};

/// Hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub struct ChecksumProcessor;

#[async_trait]
impl FileProcessor for ChecksumProcessor {
    fn name(&self) -> &str {
        "checksum"
    }

    fn can_process(&self, _file_name: &str, _mime_type: &str) -> bool {
        true
    }

    async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
        let digest = sha256_hex(&ctx.content);
        info!(
            bucket = %ctx.bucket,
            file = %ctx.file,
            size = ctx.content.len(),
            sha256 = %digest,
            "[PROCESS] Computed checksum"
        );
        Ok(())
    }
}

pub struct JsonValidationProcessor;

#[async_trait]
impl FileProcessor for JsonValidationProcessor {
    fn name(&self) -> &str {
        "json-validation"
    }

    fn can_process(&self, _file_name: &str, mime_type: &str) -> bool {
        mime_type == "application/json"
    }

    async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
        match serde_json::from_slice::<serde_json::Value>(&ctx.content) {
            Ok(value) => {
                let kind = match value {
                    serde_json::Value::Object(_) => "object",
                    serde_json::Value::Array(_) => "array",
                    _ => "scalar",
                };
                debug!(file = %ctx.file, kind, "[PROCESS] JSON document is valid");
                Ok(())
            }
            Err(e) => Err(ProcessorError::Rejected {
                file: ctx.file.clone(),
                reason: format!("invalid JSON: {e}"),
            }),
        }
    }
}

/// Copies files to `<root>/<bucket>/<key>`.
pub struct MirrorProcessor {
    root: PathBuf,
}

impl MirrorProcessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Target path for a file, or `None` when the key would escape the root.
    pub fn target_path(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        safe.then(|| self.root.join(bucket).join(relative))
    }
}

#[async_trait]
impl FileProcessor for MirrorProcessor {
    fn name(&self) -> &str {
        "mirror"
    }

    fn can_process(&self, _file_name: &str, _mime_type: &str) -> bool {
        true
    }

    async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
        let target = self
            .target_path(&ctx.bucket, &ctx.file)
            .ok_or_else(|| ProcessorError::Rejected {
                file: ctx.file.clone(),
                reason: "key escapes mirror directory".into(),
            })?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &ctx.content).await?;
        info!(file = %ctx.file, target = %target.display(), "[PROCESS] Mirrored file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;

    fn ctx(file: &str, mime: &str, content: &'static [u8]) -> ProcessingContext {
        ProcessingContext {
            bucket: "incoming".into(),
            file: file.into(),
            content: Bytes::from_static(content),
            mime_type: mime.into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn json_validation_accepts_and_rejects() {
        let p = JsonValidationProcessor;
        assert!(p.can_process("a.json", "application/json"));
        assert!(!p.can_process("a.txt", "text/plain"));
        assert!(p.process(&ctx("a.json", "application/json", b"{\"a\":1}")).await.is_ok());
        let err = p
            .process(&ctx("b.json", "application/json", b"{not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Rejected { ref file, .. } if file == "b.json"));
    }

    #[tokio::test]
    async fn mirror_writes_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let p = MirrorProcessor::new(dir.path());
        p.process(&ctx("x/y/z.txt", "text/plain", b"hello"))
            .await
            .unwrap();
        let copied = std::fs::read(dir.path().join("incoming/x/y/z.txt")).unwrap();
        assert_eq!(copied, b"hello");
    }

    #[test]
    fn mirror_refuses_escaping_keys() {
        let p = MirrorProcessor::new("/tmp/mirror");
        assert!(p.target_path("b", "../etc/passwd").is_none());
        assert!(p.target_path("b", "/abs").is_none());
        assert!(p.target_path("b", "ok/file").is_some());
    }
}
