//! Job definitions, one per document operation

use dmt_core::{ExtensionSettings, MigrationDocument};
use serde::{Deserialize, Serialize};

/// Job to run one operation of a migration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Operation label (its name, or 1-based position)
    pub label: String,

    /// Source extension name
    pub source: String,

    /// Sink extension name
    pub sink: String,

    /// Source settings after merging the operation's overrides
    pub source_settings: ExtensionSettings,

    /// Sink settings after merging the operation's overrides
    pub sink_settings: ExtensionSettings,

    /// Where the job came from
    pub metadata: JobMetadata,
}

/// Job metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobMetadata {
    /// Document file the job was loaded from
    pub document: Option<String>,

    /// Position of the operation within its document, 0-based
    pub index: usize,

    /// Number of operations in the document
    pub total: usize,
}

impl MigrationJob {
    /// One job per operation of `document`, in order
    pub fn from_document(document: &MigrationDocument) -> Vec<Self> {
        let operations = document.resolved_operations();
        let total = operations.len();
        operations
            .into_iter()
            .enumerate()
            .map(|(index, operation)| Self {
                label: operation.label,
                source: document.source.clone(),
                sink: document.sink.clone(),
                source_settings: operation.source_settings,
                sink_settings: operation.sink_settings,
                metadata: JobMetadata {
                    document: None,
                    index,
                    total,
                },
            })
            .collect()
    }

    /// Record the document the job came from
    pub fn with_document(mut self, path: impl Into<String>) -> Self {
        self.metadata.document = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmt_core::{Operation, build_document};
    use serde_json::json;

    fn document() -> MigrationDocument {
        build_document(
            "JSON-File",
            "SQLite",
            ExtensionSettings::new().with("FilePath", "a.json"),
            ExtensionSettings::new()
                .with("DatabasePath", "out.db")
                .with("Table", "items"),
        )
    }

    #[test]
    fn test_job_metadata_default() {
        let metadata = JobMetadata::default();
        assert!(metadata.document.is_none());
        assert_eq!(metadata.index, 0);
        assert_eq!(metadata.total, 0);
    }

    #[test]
    fn test_document_without_operations_is_one_job() {
        let jobs = MigrationJob::from_document(&document());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].label, "1");
        assert_eq!(jobs[0].metadata.total, 1);
        assert_eq!(jobs[0].source_settings.get("FilePath"), Some(&json!("a.json")));
    }

    #[test]
    fn test_operations_merge_overrides() {
        let document = document()
            .with_operation(Operation {
                name: Some("first".to_string()),
                ..Default::default()
            })
            .with_operation(Operation {
                name: None,
                source_settings: ExtensionSettings::new().with("FilePath", "b.json"),
                sink_settings: ExtensionSettings::new().with("Table", "other"),
            });

        let jobs = MigrationJob::from_document(&document);
        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "2"]);
        assert_eq!(jobs[1].metadata.index, 1);
        assert_eq!(jobs[1].metadata.total, 2);
        assert_eq!(jobs[1].source_settings.get("FilePath"), Some(&json!("b.json")));
        assert_eq!(jobs[1].sink_settings.get("Table"), Some(&json!("other")));
        assert_eq!(jobs[1].sink_settings.get("DatabasePath"), Some(&json!("out.db")));
    }

    #[test]
    fn test_with_document_tags_every_job() {
        let document = document().with_operation(Operation::default()).with_operation(
            Operation {
                name: Some("second".to_string()),
                ..Default::default()
            },
        );

        let jobs: Vec<_> = MigrationJob::from_document(&document)
            .into_iter()
            .map(|job| job.with_document("migrations/items.yaml"))
            .collect();

        assert_eq!(jobs.len(), 2);
        assert!(
            jobs.iter()
                .all(|job| job.metadata.document.as_deref() == Some("migrations/items.yaml"))
        );
        assert_eq!(jobs[1].label, "second");
    }

    #[test]
    fn test_migration_job_serialization() {
        let job = MigrationJob::from_document(&document())
            .remove(0)
            .with_document("m.json");

        let serialized = serde_json::to_string(&job).unwrap();
        let deserialized: MigrationJob = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, job);
    }
}
