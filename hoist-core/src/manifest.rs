//! Run manifest and its text codec
//!
//! A manifest enumerates the staged files that make up one run:
//!
//! ```text
//! l continuation-ce89ba3b.bin
//! c lib1.jar
//! c lib2.jar
//! f other-file.txt
//! ```
//!
//! One entry per line, a one-character kind followed by a space and the file
//! name. `l` is the continuation entry point (the last one wins if several
//! are declared), `c` is a dependency placed on the workload's load path,
//! `f` is fetched but not loaded.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const CONTINUATION: char = 'l';
const CLASSPATH_FILE: char = 'c';
const REGULAR_FILE: char = 'f';

/// Result type alias for manifest codec operations
pub type Result<T> = std::result::Result<T, ManifestError>;

/// Errors produced by the manifest codec
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A line could not be split into a kind character and a payload
    #[error("malformed manifest line '{line}'")]
    MalformedLine {
        /// The offending line, verbatim
        line: String,
    },

    /// The manifest declared no continuation entry
    #[error("manifest declares no continuation entry")]
    MissingContinuation,
}

/// The set of staged files that make up one run
///
/// Created once per submission and discarded after the run completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Name of the entry-point blob
    continuation: String,
    /// Dependency files placed on the workload's load path, in input order
    classpath_files: Vec<String>,
    /// Files fetched to the workload but not loaded, in input order
    aux_files: Vec<String>,
}

impl RunManifest {
    pub fn new(
        continuation: impl Into<String>,
        classpath_files: Vec<String>,
        aux_files: Vec<String>,
    ) -> Self {
        Self {
            continuation: continuation.into(),
            classpath_files,
            aux_files,
        }
    }

    pub fn continuation(&self) -> &str {
        &self.continuation
    }

    pub fn classpath_files(&self) -> &[String] {
        &self.classpath_files
    }

    pub fn aux_files(&self) -> &[String] {
        &self.aux_files
    }

    /// All file names referenced by this manifest, continuation first,
    /// in manifest order
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.continuation.as_str())
            .chain(self.classpath_files.iter().map(String::as_str))
            .chain(self.aux_files.iter().map(String::as_str))
    }

    /// Parses the text form of a manifest
    ///
    /// Blank lines are skipped. Lines with an unrecognized kind character
    /// are logged and skipped. A line without a separating space is a fatal
    /// parse error. If several continuation lines are present, the last one
    /// wins.
    pub fn parse(text: &str) -> Result<Self> {
        let mut continuation = None;
        let mut classpath_files = Vec::new();
        let mut aux_files = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (kind, name) = line
                .split_once(' ')
                .ok_or_else(|| ManifestError::MalformedLine {
                    line: line.to_string(),
                })?;

            match kind.chars().next() {
                Some(CONTINUATION) => continuation = Some(name.to_string()),
                Some(CLASSPATH_FILE) => classpath_files.push(name.to_string()),
                Some(REGULAR_FILE) => aux_files.push(name.to_string()),
                _ => warn!("Unrecognized manifest entry '{}'", line),
            }
        }

        let continuation = continuation.ok_or(ManifestError::MissingContinuation)?;

        Ok(Self {
            continuation,
            classpath_files,
            aux_files,
        })
    }

    /// Serializes this manifest to its text form
    ///
    /// Emits the continuation line first, then classpath lines in input
    /// order, then aux-file lines in input order. This ordering is part of
    /// the wire contract.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} {}\n", CONTINUATION, self.continuation));
        for file in &self.classpath_files {
            out.push_str(&format!("{} {}\n", CLASSPATH_FILE, file));
        }
        for file in &self.aux_files {
            out.push_str(&format!("{} {}\n", REGULAR_FILE, file));
        }
        out
    }
}
