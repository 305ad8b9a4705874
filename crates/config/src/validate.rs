//! Configuration validation.
//!
//! Flags unknown (likely misspelled) keys, type errors and semantic problems.
//! Errors abort daemon startup; warnings and info are logged.

use std::path::{Path, PathBuf};

use warden_common::limits::{DEBOUNCE_MAX_MS, DEBOUNCE_MIN_MS, debounce_in_range};

use crate::schema::{MEMORY_BACKEND, WardenConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "watch.debounce_ms"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, category: &'static str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message,
        });
    }
}

/// Known keys per section.
const SECTIONS: &[(&str, &[&str])] = &[
    ("ipc", &["endpoint"]),
    ("watch", &["policy_path", "debounce_ms", "resubscribe_secs"]),
    ("engine", &["backend", "apply_timeout_secs"]),
];

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path.map(Path::to_path_buf).or_else(crate::loader::find_config_file) else {
        let mut result = ValidationResult::default();
        result.push(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults".into(),
        );
        return result;
    };

    let mut result = match crate::loader::load_config_value(&path) {
        Ok(value) => validate_value(&value),
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(Severity::Error, "syntax", "", e.to_string());
            result
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate an already parsed document.
#[must_use]
pub fn validate_value(value: &serde_json::Value) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_unknown_fields(value, &mut result);

    match serde_json::from_value::<WardenConfig>(value.clone()) {
        Ok(config) => result
            .diagnostics
            .extend(validate_config(&config).diagnostics),
        Err(e) => result.push(Severity::Error, "type-error", "", format!("type error: {e}")),
    }
    result
}

/// Semantic checks on a typed config.
#[must_use]
pub fn validate_config(config: &WardenConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !debounce_in_range(config.watch.debounce_ms) {
        result.push(
            Severity::Error,
            "range",
            "watch.debounce_ms",
            format!(
                "{} is outside {DEBOUNCE_MIN_MS}..={DEBOUNCE_MAX_MS}",
                config.watch.debounce_ms
            ),
        );
    }
    if config.watch.resubscribe_secs == 0 {
        result.push(
            Severity::Error,
            "range",
            "watch.resubscribe_secs",
            "must be at least 1".into(),
        );
    }
    match config.watch.policy_path.as_deref() {
        Some(p) if p.as_os_str().is_empty() => result.push(
            Severity::Error,
            "file-ref",
            "watch.policy_path",
            "must not be empty".into(),
        ),
        Some(p) if !p.exists() => result.push(
            Severity::Warning,
            "file-ref",
            "watch.policy_path",
            format!("{} does not exist yet; applies will fail until it does", p.display()),
        ),
        _ => {},
    }
    if config.engine.backend != MEMORY_BACKEND {
        result.push(
            Severity::Error,
            "unknown-field",
            "engine.backend",
            format!(
                "unknown backend \"{}\" (available: \"{MEMORY_BACKEND}\")",
                config.engine.backend
            ),
        );
    }
    if config.engine.apply_timeout_secs == 0 {
        result.push(
            Severity::Info,
            "range",
            "engine.apply_timeout_secs",
            "apply timeout disabled; a hung engine call blocks later applies".into(),
        );
    }
    if config.ipc.endpoint.as_deref() == Some("") {
        result.push(
            Severity::Error,
            "file-ref",
            "ipc.endpoint",
            "must not be empty".into(),
        );
    }
    result
}

fn check_unknown_fields(value: &serde_json::Value, result: &mut ValidationResult) {
    let Some(root) = value.as_object() else {
        if !value.is_null() {
            result.push(
                Severity::Error,
                "syntax",
                "",
                "config root must be a table".into(),
            );
        }
        return;
    };

    let section_names: Vec<&str> = SECTIONS.iter().map(|(name, _)| *name).collect();
    for (key, child) in root {
        let Some((_, fields)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            result.push(
                Severity::Error,
                "unknown-field",
                key,
                unknown_message(key, &section_names),
            );
            continue;
        };
        let Some(table) = child.as_object() else {
            continue;
        };
        for field in table.keys() {
            if !fields.contains(&field.as_str()) {
                result.push(
                    Severity::Error,
                    "unknown-field",
                    &format!("{key}.{field}"),
                    unknown_message(field, fields),
                );
            }
        }
    }
}

fn unknown_message(key: &str, candidates: &[&str]) -> String {
    match closest(key, candidates) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".into(),
    }
}

/// Closest candidate within an edit distance of 3.
fn closest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, edit_distance(needle, c)))
        .filter(|(_, d)| (1..=3).contains(d))
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (diagonal + usize::from(ca != *cb))
                .min(above + 1)
                .min(row[j] + 1);
            diagonal = above;
        }
    }
    row[b.len()]
}
