//! Document loading.
//!
//! Turns a [`DocumentSource`] into [`RawDocument`]s:
//!
//! - **Directory**: recursive walk with include/exclude globs. Default
//!   excludes skip `.git`, `target` and `node_modules`. Files whose
//!   extension has no extractor are skipped; a supported file that cannot
//!   be decoded fails the whole load.
//! - **Uploads**: in-memory byte streams with a declared file name and
//!   optional MIME type. Every upload must be readable.
//! - **Documents**: already-normalized documents handed over by an
//!   external adapter (Notion, Google Docs, Confluence, ...).
//! - **Export**: the same, read from a JSON-lines file.
//!
//! Output is always sorted by `source_uri`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use walkdir::WalkDir;

use askdocs_core::models::{DocumentMetadata, RawDocument};
use askdocs_core::{QaError, Result};

use crate::config::LoaderConfig;
use crate::extract::{extract_text, Format};

/// A file received over the upload API or CLI.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original file name; its extension selects the extractor.
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Directory(PathBuf),
    Uploads(Vec<UploadedFile>),
    Documents(Vec<RawDocument>),
    Export(PathBuf),
}

impl DocumentSource {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentSource::Directory(_) => "directory",
            DocumentSource::Uploads(_) => "uploads",
            DocumentSource::Documents(_) => "documents",
            DocumentSource::Export(_) => "export",
        }
    }
}

/// One line of a JSON-lines export produced by a source adapter.
#[derive(Debug, Deserialize)]
struct ExportRecord {
    #[serde(default)]
    id: Option<String>,
    source_uri: String,
    #[serde(alias = "text")]
    full_text: String,
    metadata: DocumentMetadata,
}

/// Load every document from `source`.
pub fn load(source: &DocumentSource, config: &LoaderConfig) -> Result<Vec<RawDocument>> {
    let mut docs = match source {
        DocumentSource::Directory(root) => load_directory(root, config)?,
        DocumentSource::Uploads(files) => files.iter().map(load_upload).collect::<Result<_>>()?,
        DocumentSource::Documents(docs) => docs.clone(),
        DocumentSource::Export(path) => load_export(path)?,
    };

    docs.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));

    let mut seen = HashSet::new();
    for doc in &docs {
        if !seen.insert(doc.id.as_str()) {
            return Err(QaError::invalid(format!(
                "duplicate document '{}'",
                doc.source_uri
            )));
        }
    }

    tracing::debug!(source = source.kind(), documents = docs.len(), "loaded documents");
    Ok(docs)
}

fn load_directory(root: &Path, config: &LoaderConfig) -> Result<Vec<RawDocument>> {
    if !root.is_dir() {
        return Err(QaError::invalid(format!(
            "directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(|e| QaError::Storage(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let format = match Format::detect(&rel_str, None) {
            Ok(format) => format,
            Err(_) => {
                tracing::debug!(path = %rel_str, "skipping file with unsupported extension");
                continue;
            }
        };

        docs.push(file_to_document(path, &rel_str, format)?);
    }

    Ok(docs)
}

fn file_to_document(path: &Path, relative_path: &str, format: Format) -> Result<RawDocument> {
    let bytes = std::fs::read(path)?;
    let text = extract_text(&bytes, format).map_err(|e| with_file(e, relative_path))?;

    let modified: DateTime<Utc> = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let metadata = DocumentMetadata {
        source_type: "filesystem".to_string(),
        title: path.file_name().map(|n| n.to_string_lossy().to_string()),
        path: Some(relative_path.to_string()),
        author: None,
        timestamp: modified,
        content_type: format.mime().to_string(),
    };

    Ok(RawDocument::new(
        format!("file://{}", absolute.display()),
        text,
        metadata,
    ))
}

fn load_upload(file: &UploadedFile) -> Result<RawDocument> {
    let name = file.name.trim();
    if name.is_empty() {
        return Err(QaError::invalid("uploaded file has no name"));
    }

    let format = Format::detect(name, file.mime.as_deref())?;
    let text = extract_text(&file.bytes, format).map_err(|e| with_file(e, name))?;

    let metadata = DocumentMetadata {
        source_type: "upload".to_string(),
        title: Some(
            Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| name.to_string()),
        ),
        path: Some(name.to_string()),
        author: None,
        timestamp: Utc::now(),
        content_type: format.mime().to_string(),
    };

    Ok(RawDocument::new(format!("upload://{}", name), text, metadata))
}

fn load_export(path: &Path) -> Result<Vec<RawDocument>> {
    let content = std::fs::read_to_string(path)?;
    let mut docs = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ExportRecord = serde_json::from_str(line).map_err(|e| {
            QaError::invalid(format!("{}:{}: {}", path.display(), lineno + 1, e))
        })?;

        let mut doc = RawDocument::new(record.source_uri, record.full_text, record.metadata);
        if let Some(id) = record.id.filter(|id| !id.is_empty()) {
            doc.id = id;
        }
        docs.push(doc);
    }

    Ok(docs)
}

/// Prefix an extraction error's reason with the file it came from.
fn with_file(err: QaError, file: &str) -> QaError {
    match err {
        QaError::UnsupportedFormat { format, reason } => QaError::UnsupportedFormat {
            format,
            reason: format!("{}: {}", file, reason),
        },
        other => other,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| QaError::invalid(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| QaError::invalid(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn upload(name: &str, body: &str) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            bytes: body.as_bytes().to_vec(),
            mime: None,
        }
    }

    #[test]
    fn test_directory_walk_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("b.md"), "# B").unwrap();
        fs::write(root.join("sub/a.txt"), "A").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "dep").unwrap();

        let docs = load(
            &DocumentSource::Directory(root.to_path_buf()),
            &LoaderConfig::default(),
        )
        .unwrap();

        let paths: Vec<&str> = docs
            .iter()
            .map(|d| d.metadata.path.as_deref().unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert!(paths.contains(&"b.md"));
        assert!(paths.contains(&"sub/a.txt"));
        assert!(docs.windows(2).all(|w| w[0].source_uri <= w[1].source_uri));
        assert_eq!(docs[0].metadata.source_type, "filesystem");
    }

    #[test]
    fn test_directory_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.txt"), "keep").unwrap();
        fs::write(tmp.path().join("drop.txt"), "drop").unwrap();
        let config = LoaderConfig {
            exclude_globs: vec!["drop.*".to_string()],
            ..LoaderConfig::default()
        };
        let docs = load(&DocumentSource::Directory(tmp.path().to_path_buf()), &config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].full_text, "keep");
    }

    #[test]
    fn test_missing_directory() {
        let err = load(
            &DocumentSource::Directory(PathBuf::from("/definitely/not/here")),
            &LoaderConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QaError::InvalidInput(_)));
    }

    #[test]
    fn test_uploads_keep_file_name_for_citation() {
        let docs = load(
            &DocumentSource::Uploads(vec![upload("reports/q1.md", "# Q1\n\nRevenue grew.")]),
            &LoaderConfig::default(),
        )
        .unwrap();
        assert_eq!(docs[0].metadata.title.as_deref(), Some("q1.md"));
        assert_eq!(docs[0].metadata.path.as_deref(), Some("reports/q1.md"));
        assert_eq!(docs[0].source_uri, "upload://reports/q1.md");
        assert_eq!(docs[0].metadata.content_type, "text/markdown");
    }

    #[test]
    fn test_unsupported_upload_fails() {
        let err = load(
            &DocumentSource::Uploads(vec![upload("a.txt", "ok"), upload("tool.exe", "MZ")]),
            &LoaderConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QaError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_undecodable_upload_names_the_file() {
        let file = UploadedFile {
            name: "broken.docx".to_string(),
            bytes: b"not a zip".to_vec(),
            mime: None,
        };
        let err = load(&DocumentSource::Uploads(vec![file]), &LoaderConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("broken.docx"));
    }

    #[test]
    fn test_duplicate_uploads_rejected() {
        let err = load(
            &DocumentSource::Uploads(vec![upload("a.txt", "one"), upload("a.txt", "two")]),
            &LoaderConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QaError::InvalidInput(_)));
    }

    #[test]
    fn test_export_jsonl() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("export.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"source_uri":"notion://page/2","text":"Second","metadata":{"source_type":"notion","title":"Two","path":null,"author":"ann","timestamp":"2024-01-02T00:00:00Z"}}"#,
                "\n\n",
                r#"{"id":"gdoc-1","source_uri":"gdoc://1","full_text":"First","metadata":{"source_type":"google","title":"One","path":null,"author":null,"timestamp":"2024-01-01T00:00:00Z"}}"#,
                "\n"
            ),
        )
        .unwrap();

        let docs = load(&DocumentSource::Export(path), &LoaderConfig::default()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source_uri, "gdoc://1");
        assert_eq!(docs[0].id, "gdoc-1");
        assert_eq!(docs[1].full_text, "Second");
        assert_eq!(docs[1].metadata.author.as_deref(), Some("ann"));
    }

    #[test]
    fn test_export_bad_line_reports_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("export.jsonl");
        fs::write(&path, "{\"broken\": true}\n").unwrap();
        let err = load(&DocumentSource::Export(path), &LoaderConfig::default()).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
