//! Corpus directory loader.
//!
//! Reads every matching file under the configured corpus directory into a
//! [`Document`]. Plain files must be valid UTF-8 and are kept byte-for-byte;
//! `.docx` files are converted through [`crate::extract::docx_to_text`].
//! Files that cannot be decoded are skipped with a warning so a single
//! stray binary does not abort the whole load.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{Corpus, Document};

/// Something that can produce the current corpus on demand.
///
/// The index handle calls [`load`](CorpusSource::load) on first use and on
/// every rebuild.
pub trait CorpusSource: Send + Sync {
    fn load(&self) -> Result<Corpus>;

    /// Human-readable description for logs (e.g. the directory path).
    fn describe(&self) -> String;
}

/// A fixed, already-loaded corpus.
impl CorpusSource for Corpus {
    fn load(&self) -> Result<Corpus> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory corpus ({} documents)", self.len())
    }
}

/// Loads the corpus from a directory on every call.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    options: CorpusConfig,
}

impl DirectorySource {
    pub fn new(options: CorpusConfig) -> Self {
        Self { options }
    }
}

impl CorpusSource for DirectorySource {
    fn load(&self) -> Result<Corpus> {
        load_corpus(&self.options)
    }

    fn describe(&self) -> String {
        self.options.dir.display().to_string()
    }
}

/// Read all matching files in `options.dir` into a [`Corpus`].
///
/// # Errors
///
/// [`Error::NotFound`] if the directory does not exist, [`Error::Config`]
/// for malformed glob patterns. Per-file decode failures are logged and
/// skipped.
pub fn load_corpus(options: &CorpusConfig) -> Result<Corpus> {
    let root = &options.dir;
    if !root.is_dir() {
        return Err(Error::NotFound { path: root.clone() });
    }

    let include_set = build_globset(&options.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut walker = WalkDir::new(root).follow_links(options.follow_symlinks);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut documents = Vec::new();

    for entry in walker
        .into_iter()
        .filter_entry(|e| !(options.exclude_hidden && e.depth() > 0 && is_hidden(e.path())))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_document(path, &rel_str) {
            Ok(doc) => {
                debug!(document = %doc.id, bytes = doc.text.len(), "loaded document");
                documents.push(doc);
            }
            Err(e) => warn!(file = %path.display(), error = %e, "skipping document"),
        }
    }

    Ok(Corpus::new(documents))
}

fn read_document(path: &Path, relative_path: &str) -> Result<Document> {
    let bytes = std::fs::read(path)?;

    let text = if extract::is_docx(path) {
        extract::docx_to_text(&bytes, path)?
    } else {
        String::from_utf8(bytes).map_err(|_| Error::unsupported(path, "not valid UTF-8 text"))?
    };

    Ok(Document {
        id: relative_path.to_string(),
        path: PathBuf::from(path),
        text,
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n.starts_with("~$"))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {}", e)))
}
