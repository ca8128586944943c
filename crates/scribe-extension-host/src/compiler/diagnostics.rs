//! Structured compiler diagnostics.
//!
//! The default backend drives `cargo build --message-format=json`; the
//! parsing here turns its `compiler-message` records into host-owned
//! diagnostics and locates the emitted module from `compiler-artifact`
//! records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Note,
}

impl std::fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// One structured compiler message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// A location-less error, for failures of the build process itself.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            column: None,
            severity: DiagnosticSeverity::Error,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                write!(f, "{}: {file}:{line}:{column}: {}", self.severity, self.message)
            }
            _ => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Parses one line of `cargo --message-format=json` output into a
/// diagnostic. Returns `None` for anything that is not a compiler message.
pub fn parse_cargo_message(line: &str) -> Option<Diagnostic> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    if value.get("reason")?.as_str()? != "compiler-message" {
        return None;
    }
    let message = value.get("message")?;

    let severity = match message.get("level").and_then(|l| l.as_str()) {
        Some("error") | Some("error: internal compiler error") => DiagnosticSeverity::Error,
        Some("warning") => DiagnosticSeverity::Warning,
        _ => DiagnosticSeverity::Note,
    };

    let code = message
        .get("code")
        .and_then(|c| c.get("code"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let spans = message.get("spans").and_then(|s| s.as_array());
    let span = spans.and_then(|spans| {
        spans
            .iter()
            .find(|s| s.get("is_primary").and_then(|p| p.as_bool()).unwrap_or(false))
            .or_else(|| spans.first())
    });

    Some(Diagnostic {
        file: span
            .and_then(|s| s.get("file_name"))
            .and_then(|f| f.as_str())
            .map(str::to_string),
        line: span
            .and_then(|s| s.get("line_start"))
            .and_then(|l| l.as_u64())
            .map(|l| l as u32),
        column: span
            .and_then(|s| s.get("column_start"))
            .and_then(|c| c.as_u64())
            .map(|c| c as u32),
        severity,
        code,
        message: message
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Extracts the emitted dynamic-library path from a `compiler-artifact`
/// record, if the record describes one.
pub fn parse_artifact_message(line: &str) -> Option<PathBuf> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    if value.get("reason")?.as_str()? != "compiler-artifact" {
        return None;
    }
    let kinds = value.get("target")?.get("kind")?.as_array()?;
    if !kinds.iter().any(|k| k.as_str() == Some("cdylib")) {
        return None;
    }
    let filenames = value.get("filenames")?.as_array()?;
    filenames
        .iter()
        .filter_map(|f| f.as_str())
        .map(PathBuf::from)
        .find(|p| {
            p.extension()
                .map(|e| e == std::env::consts::DLL_EXTENSION)
                .unwrap_or(false)
        })
        .or_else(|| filenames.first().and_then(|f| f.as_str()).map(PathBuf::from))
}
