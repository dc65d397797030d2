//! Block blob target over a local container directory
//!
//! Blocks are staged under `<container>/.blocks/<blob>/` and only become
//! visible as `<container>/<blob>` on commit.
//!
//! The container is named either by `ContainerPath` or by a
//! `ConnectionString` of the form `BlobEndpoint=<dir>;AccountKey=<key>`.
//! The first keyed write records a SHA-256 digest of the key in the
//! container; later writes must present the same key.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::extension::{ByteTarget, Extension};
use crate::pipeline::{BlockStore, upload_chunked};
use crate::settings::{
    ExtensionSettings, FieldSpec, SettingsSchema, ValidationReport, Violation, check_typed,
};

const STAGING_DIR: &str = ".blocks";
const ACCOUNT_KEY_FILE: &str = ".account-key";
const MAX_BLOCK_SIZE_KB: u64 = 100 * 1024;

fn default_block_size() -> u64 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobSettings {
    #[serde(default)]
    container_path: Option<String>,
    #[serde(default)]
    connection_string: Option<String>,
    blob_name: String,
    #[serde(rename = "MaxBlockSizeInKB", default = "default_block_size")]
    max_block_size_in_kb: u64,
}

impl SettingsSchema for BlobSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::string("ContainerPath"),
            FieldSpec::string("ConnectionString").sensitive(),
            FieldSpec::string("BlobName").required(),
            FieldSpec::int("MaxBlockSizeInKB").default_value(default_block_size()),
        ]
    }

    fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if let Err((setting, message)) = self.container() {
            violations.push(Violation::new(setting, message));
        }
        if !(1..=MAX_BLOCK_SIZE_KB).contains(&self.max_block_size_in_kb) {
            violations.push(Violation::new(
                "MaxBlockSizeInKB",
                format!("must be between 1 and {}", MAX_BLOCK_SIZE_KB),
            ));
        }
        if let Some(message) = blob_name_problem(&self.blob_name) {
            violations.push(Violation::new("BlobName", message));
        }
        violations
    }
}

impl BlobSettings {
    /// Store for the configured container
    ///
    /// Errors name the offending setting; messages never echo its value.
    fn container(&self) -> std::result::Result<LocalBlockStore, (&'static str, &'static str)> {
        match (&self.container_path, &self.connection_string) {
            (Some(path), None) if !path.trim().is_empty() => Ok(LocalBlockStore::new(path)),
            (Some(_), None) => Err(("ContainerPath", "must not be empty")),
            (None, Some(text)) => {
                parse_connection_string(text).map_err(|message| ("ConnectionString", message))
            }
            (Some(_), Some(_)) => Err((
                "ConnectionString",
                "set either ContainerPath or ConnectionString, not both",
            )),
            (None, None) => Err((
                "ContainerPath",
                "either ContainerPath or ConnectionString is required",
            )),
        }
    }

    fn chunk_size(&self) -> usize {
        (self.max_block_size_in_kb.clamp(1, MAX_BLOCK_SIZE_KB) * 1024) as usize
    }
}

fn parse_connection_string(text: &str) -> std::result::Result<LocalBlockStore, &'static str> {
    let mut endpoint = None;
    let mut account_key = None;
    for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or("every part must look like Key=Value")?;
        let value = value.trim();
        match key.trim() {
            k if k.eq_ignore_ascii_case("BlobEndpoint") => {
                endpoint = Some(value.strip_prefix("file://").unwrap_or(value))
            }
            k if k.eq_ignore_ascii_case("AccountKey") => account_key = Some(value),
            _ => return Err("only BlobEndpoint and AccountKey are supported"),
        }
    }

    let endpoint = endpoint
        .filter(|e| !e.is_empty())
        .ok_or("BlobEndpoint is required")?;
    let store = LocalBlockStore::new(endpoint);
    match account_key {
        Some("") => Err("AccountKey must not be empty"),
        Some(key) => Ok(store.with_account_key(key)),
        None => Ok(store),
    }
}

fn blob_name_problem(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        return Some("must not be empty");
    }
    let path = Path::new(name);
    if path.is_absolute() || name.starts_with('/') || name.starts_with('\\') {
        return Some("must be relative to the container");
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Some("must not leave the container");
    }
    if path.starts_with(STAGING_DIR) || path.starts_with(ACCOUNT_KEY_FILE) {
        return Some("must not use a reserved name");
    }
    None
}

/// [`BlockStore`] backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalBlockStore {
    root: PathBuf,
    key_digest: Option<String>,
}

impl LocalBlockStore {
    /// Store rooted at the container directory `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key_digest: None,
        }
    }

    /// Present `key` when writing; only its digest is kept
    pub fn with_account_key(mut self, key: &str) -> Self {
        self.key_digest = Some(hex::encode(Sha256::digest(key.as_bytes())));
        self
    }

    /// Container directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check the presented key against the container's
    ///
    /// A keyed store claims an unclaimed container; an unkeyed store may
    /// only write to unclaimed containers.
    pub async fn authorize(&self) -> Result<()> {
        let path = self.root.join(ACCOUNT_KEY_FILE);
        let recorded = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        match (recorded, &self.key_digest) {
            (None, None) => Ok(()),
            (None, Some(digest)) => {
                tokio::fs::create_dir_all(&self.root).await?;
                tokio::fs::write(&path, digest).await?;
                Ok(())
            }
            (Some(recorded), Some(digest)) if recorded == *digest => Ok(()),
            (Some(_), Some(_)) => Err(denied("container rejected the account key")),
            (Some(_), None) => Err(denied("container requires an account key")),
        }
    }

    fn staging(&self, object: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(object)
    }

    /// Drop everything staged for `object`
    pub async fn discard(&self, object: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.staging(object)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl BlockStore for LocalBlockStore {
    async fn stage_block(&self, object: &str, block_id: &str, data: Vec<u8>) -> Result<()> {
        let dir = self.staging(object);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(block_id), data).await?;
        Ok(())
    }

    async fn commit_blocks(&self, object: &str, block_ids: &[String]) -> Result<()> {
        let staging = self.staging(object);
        let target = self.root.join(object);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".commit");
        let assembling = target.with_file_name(name);
        if let Err(err) = assemble(&staging, object, block_ids, &assembling).await {
            let _ = tokio::fs::remove_file(&assembling).await;
            return Err(err);
        }
        tokio::fs::rename(&assembling, &target).await?;
        self.discard(object).await
    }
}

fn denied(reason: &'static str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        reason,
    ))
}

async fn assemble(staging: &Path, object: &str, block_ids: &[String], out: &Path) -> Result<()> {
    let mut out = tokio::fs::File::create(out).await?;
    for id in block_ids {
        let block = tokio::fs::read(staging.join(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("block {} of {} was never staged", id, object),
                ))
            } else {
                Error::Io(e)
            }
        })?;
        out.write_all(&block).await?;
    }
    out.flush().await?;
    Ok(())
}

/// Uploads the payload to a blob in blocks of at most `MaxBlockSizeInKB`
pub struct BlobTarget;

impl Extension for BlobTarget {
    fn name(&self) -> &str {
        "Blob"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        BlobSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<BlobSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl ByteTarget for BlobTarget {
    async fn store(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let settings: BlobSettings = settings.bind()?;
        let store = settings.container().map_err(|(setting, message)| {
            let mut report = ValidationReport::new();
            report.push(setting, message);
            Error::Validation(report)
        })?;
        store.authorize().await?;

        let blob = settings.blob_name.as_str();
        match upload_chunked(&store, blob, input, settings.chunk_size(), cancel).await {
            Ok(upload) => {
                tracing::debug!(
                    blob,
                    blocks = upload.block_ids.len(),
                    "blob committed"
                );
                Ok(upload.bytes)
            }
            Err(err) => {
                if let Err(cleanup) = store.discard(blob).await {
                    tracing::warn!(blob, error = %cleanup, "failed to discard staged blocks");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::block_id;
    use rstest::rstest;

    fn settings(dir: &Path, blob: &str, kb: u64) -> ExtensionSettings {
        ExtensionSettings::new()
            .with("ContainerPath", dir.display().to_string())
            .with("BlobName", blob)
            .with("MaxBlockSizeInKB", kb)
    }

    #[tokio::test]
    async fn test_upload_assembles_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        let bytes = BlobTarget
            .store(
                &mut payload.as_slice(),
                &settings(dir.path(), "exports/data.bin", 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 5000);
        assert_eq!(std::fs::read(dir.path().join("exports/data.bin")).unwrap(), payload);
        assert!(!dir.path().join(STAGING_DIR).join("exports/data.bin").exists());
    }

    #[tokio::test]
    async fn test_empty_payload_commits_empty_blob() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = BlobTarget
            .store(&mut &b""[..], &settings(dir.path(), "empty.json", 4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bytes, 0);
        assert_eq!(std::fs::read(dir.path().join("empty.json")).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_cancel_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = BlobTarget
            .store(&mut &b"[1,2]"[..], &settings(dir.path(), "out.json", 1), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!dir.path().join("out.json").exists());
        assert!(!dir.path().join(STAGING_DIR).join("out.json").exists());
    }

    #[tokio::test]
    async fn test_commit_with_missing_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlockStore::new(dir.path());
        store.stage_block("a.bin", &block_id(0), b"abc".to_vec()).await.unwrap();

        let err = store
            .commit_blocks("a.bin", &[block_id(0), block_id(1)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("never staged"));
        assert!(!dir.path().join("a.bin").exists());
        assert!(!dir.path().join("a.bin.commit").exists());
    }

    #[rstest]
    #[case("data.json", 1024, true)]
    #[case("nested/data.json", 1, true)]
    #[case("data.json", 0, false)]
    #[case("data.json", 102_401, false)]
    #[case("", 1024, false)]
    #[case("/etc/passwd", 1024, false)]
    #[case("../escape.json", 1024, false)]
    #[case(".blocks/x", 1024, false)]
    #[case(".account-key", 1024, false)]
    fn test_check(#[case] blob: &str, #[case] kb: u64, #[case] valid: bool) {
        let violations = BlobTarget.check(&settings(Path::new("/tmp/container"), blob, kb));
        assert_eq!(violations.is_empty(), valid, "{violations:?}");
    }

    fn keyed(dir: &Path, key: &str) -> ExtensionSettings {
        ExtensionSettings::new()
            .with(
                "ConnectionString",
                format!("BlobEndpoint={};AccountKey={}", dir.display(), key),
            )
            .with("BlobName", "out.json")
    }

    async fn store_with(settings: &ExtensionSettings) -> Result<u64> {
        BlobTarget
            .store(&mut &b"[1]"[..], settings, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_account_key_guards_the_container() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(store_with(&keyed(dir.path(), "k3y-one")).await.unwrap(), 3);
        assert_eq!(std::fs::read(dir.path().join("out.json")).unwrap(), b"[1]");
        let recorded = std::fs::read_to_string(dir.path().join(ACCOUNT_KEY_FILE)).unwrap();
        assert!(!recorded.contains("k3y-one"));

        // same key again
        store_with(&keyed(dir.path(), "k3y-one")).await.unwrap();

        let err = store_with(&keyed(dir.path(), "k3y-two")).await.unwrap_err();
        assert!(err.to_string().contains("rejected the account key"));
        assert!(!err.to_string().contains("k3y"));

        let err = store_with(&settings(dir.path(), "out.json", 1)).await.unwrap_err();
        assert!(err.to_string().contains("requires an account key"));
    }

    #[tokio::test]
    async fn test_oversized_block_setting_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = store_with(&settings(dir.path(), "out.json", u64::MAX))
            .await
            .unwrap();
        assert_eq!(bytes, 3);
    }

    #[rstest]
    #[case::endpoint_only("BlobEndpoint=/tmp/c", true)]
    #[case::file_scheme_and_key("BlobEndpoint=file:///tmp/c; AccountKey=s3cret", true)]
    #[case::missing_endpoint("AccountKey=s3cret", false)]
    #[case::empty_key("BlobEndpoint=/tmp/c;AccountKey=", false)]
    #[case::unknown_part("BlobEndpoint=/tmp/c;Password=s3cret", false)]
    #[case::not_a_pair("s3cret", false)]
    fn test_check_connection_string(#[case] text: &str, #[case] valid: bool) {
        let settings = ExtensionSettings::new()
            .with("ConnectionString", text)
            .with("BlobName", "out.json");
        let violations = BlobTarget.check(&settings);
        assert_eq!(violations.is_empty(), valid, "{violations:?}");
        assert!(violations.iter().all(|v| !v.message.contains("s3cret")));
    }

    #[test]
    fn test_check_requires_exactly_one_container_setting() {
        let neither = ExtensionSettings::new().with("BlobName", "out.json");
        let violations = BlobTarget.check(&neither);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].setting, "ContainerPath");

        let both = settings(Path::new("/tmp/c"), "out.json", 1)
            .with("ConnectionString", "BlobEndpoint=/tmp/c");
        let violations = BlobTarget.check(&both);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].setting, "ConnectionString");
    }
}
