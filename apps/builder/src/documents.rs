use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::BuildError;

const DOCUMENT_EXTENSION: &str = ".json";

/// A resume document on disk. Read-only input.
///
/// `name` is the file name without `.json` and groups every artifact built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeDocument {
    pub path: PathBuf,
    pub name: String,
}

impl ResumeDocument {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(DOCUMENT_EXTENSION)
            .unwrap_or(&file_name)
            .to_string();
        Self { path, name }
    }
}

/// Lists the `.json` documents directly inside `dir`, sorted by file name.
///
/// Fails with `DirectoryNotFound` when `dir` is missing or is not a directory.
pub async fn discover_documents(dir: &Path) -> Result<Vec<ResumeDocument>, BuildError> {
    let is_dir = tokio::fs::metadata(dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(BuildError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut documents = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.ends_with(DOCUMENT_EXTENSION) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        documents.push(ResumeDocument::from_path(entry.path()));
    }

    documents.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_strips_json_extension() {
        let doc = ResumeDocument::from_path("/cv/src/alice.json");
        assert_eq!(doc.name, "alice");
        assert_eq!(doc.path, PathBuf::from("/cv/src/alice.json"));
    }

    #[test]
    fn test_name_keeps_inner_dots() {
        let doc = ResumeDocument::from_path("jane.doe.json");
        assert_eq!(doc.name, "jane.doe");
    }

    #[tokio::test]
    async fn test_discovers_only_json_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["bob.json", "alice.json", "notes.md", "draft.json.bak"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let docs = discover_documents(dir.path()).await.unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"], "directories and non-json files are skipped");
    }

    #[tokio::test]
    async fn test_empty_directory_yields_no_documents() {
        let dir = tempfile::tempdir().unwrap();
        let docs = discover_documents(dir.path()).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_directory_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("src");

        let err = discover_documents(&missing).await.unwrap_err();
        assert!(
            matches!(err, BuildError::DirectoryNotFound(ref p) if p == &missing),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_file_in_place_of_directory_is_directory_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src");
        std::fs::write(&file, "").unwrap();

        let err = discover_documents(&file).await.unwrap_err();
        assert!(matches!(err, BuildError::DirectoryNotFound(_)));
    }
}
