//! Local file connectors

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::extension::{ByteSource, ByteTarget, Extension, Payload, PayloadStream};
use crate::settings::{ExtensionSettings, FieldSpec, SettingsSchema, Violation, check_typed};

/// Settings shared by the file source and target
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSettings {
    /// File to read or write; for a source, a directory reads every file in it
    pub file_path: String,
}

impl SettingsSchema for FileSettings {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::string("FilePath").required()]
    }
}

/// Reads one file, or every file in a directory sorted by name
pub struct FileByteSource;

impl Extension for FileByteSource {
    fn name(&self) -> &str {
        "File"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        FileSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<FileSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl ByteSource for FileByteSource {
    async fn open(
        &self,
        settings: &ExtensionSettings,
        _cancel: &CancellationToken,
    ) -> Result<PayloadStream> {
        let settings: FileSettings = settings.bind()?;
        let paths = list_files(Path::new(&settings.file_path))?;
        tracing::debug!(path = %settings.file_path, files = paths.len(), "opening file source");

        let payloads = stream::iter(paths)
            .then(|path| async move {
                let file = tokio::fs::File::open(&path).await?;
                Ok::<_, Error>(Payload {
                    name: path.display().to_string(),
                    reader: Box::new(file),
                })
            })
            .boxed();
        Ok(payloads)
    }
}

fn list_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Writes the payload to a single file
///
/// The payload goes to a sibling `.partial` file that is renamed into place
/// only after a clean end of stream.
pub struct FileTarget;

impl Extension for FileTarget {
    fn name(&self) -> &str {
        "File"
    }

    fn settings(&self) -> Vec<FieldSpec> {
        FileSettings::fields()
    }

    fn check(&self, settings: &ExtensionSettings) -> Vec<Violation> {
        check_typed::<FileSettings>(settings)
    }

    fn module_ref(&self) -> Option<String> {
        Some(module_path!().to_string())
    }
}

#[async_trait]
impl ByteTarget for FileTarget {
    async fn store(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        settings: &ExtensionSettings,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let settings: FileSettings = settings.bind()?;
        let path = PathBuf::from(&settings.file_path);
        let partial = partial_path(&path);

        match write_partial(input, &partial, cancel).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial, &path).await?;
                tracing::debug!(path = %path.display(), bytes, "file written");
                Ok(bytes)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}

async fn write_partial(
    input: &mut (dyn AsyncRead + Send + Unpin),
    partial: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    if let Some(parent) = partial.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut writer = BufWriter::new(tokio::fs::File::create(partial).await?);
    let bytes = tokio::io::copy(input, &mut writer).await?;
    writer.flush().await?;

    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }
    Ok(bytes)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}
