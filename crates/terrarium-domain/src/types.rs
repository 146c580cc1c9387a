use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerrariumId(pub String);

impl TerrariumId {
    pub fn new(s: impl Into<String>) -> Self {
        TerrariumId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id names a directory, so it must be a single plain path segment.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.0.trim().is_empty() {
            return Err(DomainError::MissingId);
        }
        if !is_path_segment(&self.0) {
            return Err(DomainError::InvalidId(self.0.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Display for TerrariumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied (or generated) id of one API request. Names the run log file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(s: impl Into<String>) -> Self {
        RequestId(s.into())
    }

    /// A fresh random request id, used when the caller did not send one.
    pub fn generate() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id names a log file, so it must be a single plain path segment.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !is_path_segment(&self.0) {
            return Err(DomainError::InvalidRequestId(self.0.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

/// Relative path made of plain segments only: no root, no `.` or `..`.
fn is_relative_subpath(s: &str) -> bool {
    !s.contains(['\\', '\0'])
        && Path::new(s)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        && !s.split('/').any(|seg| seg == ".")
}

// ── Run status ────────────────────────────────────────────────────────────────

/// Status of the last (or current) provisioning command of a terrarium.
///
/// An absent status key means no command has ever run for the terrarium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Success => write!(f, "Success"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

// ── Terrarium record ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrariumInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub id: TerrariumId,
    /// Resource template this terrarium was initialized for, e.g. `sql-db`
    /// or `vpn/site-to-site`. Empty until an environment is set up.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub enrichments: String,
    /// Participating providers in declaration order, without duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
}

impl TerrariumInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            description: String::new(),
            id: TerrariumId(id),
            enrichments: String::new(),
            providers: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        self.id.validate()
    }

    pub fn has_enrichments(&self) -> bool {
        !self.enrichments.is_empty()
    }

    /// Bind this terrarium to an enrichment kind.
    ///
    /// Re-setting the current kind is a no-op. A terrarium already bound to a
    /// different kind is left untouched and an error is returned.
    pub fn set_enrichments(&mut self, kind: &str) -> Result<(), DomainError> {
        if kind.is_empty() {
            return Err(DomainError::EmptyEnrichments(self.id.0.clone()));
        }
        if !is_relative_subpath(kind) {
            return Err(DomainError::InvalidEnrichments {
                id: self.id.0.clone(),
                value: kind.to_string(),
            });
        }
        if self.has_enrichments() && self.enrichments != kind {
            return Err(DomainError::EnrichmentConflict {
                id: self.id.0.clone(),
                current: self.enrichments.clone(),
                requested: kind.to_string(),
            });
        }
        self.enrichments = kind.to_string();
        Ok(())
    }

    /// Replace the provider list, keeping first-seen order and dropping repeats.
    pub fn set_providers<I, S>(&mut self, providers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for p in providers {
            let p = p.into();
            if !p.is_empty() && !ordered.contains(&p) {
                ordered.push(p);
            }
        }
        self.providers = ordered;
    }
}
