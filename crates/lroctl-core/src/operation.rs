//! Operation references and poll snapshots
//!
//! An [`OperationRef`] is the client-side handle used to re-issue polls. It is
//! created once by the originating service call and never changes. Each poll
//! returns a [`Snapshot`]; the engine only reads snapshots through the
//! [`SnapshotView`] accessors, so services with their own message types can
//! implement that trait instead of converting into [`Snapshot`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WaitError;

/// Where an operation lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Scope {
    Global,
    Region(String),
    Zone(String),
    Location(String),
}

impl Scope {
    fn path_segments(&self) -> (&'static str, Option<&str>) {
        match self {
            Scope::Global => ("global", None),
            Scope::Region(r) => ("regions", Some(r)),
            Scope::Zone(z) => ("zones", Some(z)),
            Scope::Location(l) => ("locations", Some(l)),
        }
    }
}

/// Handle to a long-running operation
///
/// Accepts relative names such as `projects/p/zones/us-central1-a/operations/op-1`
/// and full self-links such as
/// `https://compute.example.com/compute/v1/projects/p/global/operations/op-1`.
///
/// ```rust
/// use lroctl_core::{OperationRef, Scope};
///
/// let op: OperationRef = "projects/demo/regions/us-east1/operations/op-42".parse().unwrap();
/// assert_eq!(op.project, "demo");
/// assert_eq!(op.scope, Scope::Region("us-east1".to_string()));
/// assert_eq!(op.id, "op-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationRef {
    /// Scheme, host and API path prefix (`https://host/api/v1`), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    pub project: String,
    pub scope: Scope,
    pub id: String,
}

impl OperationRef {
    pub fn new(project: impl Into<String>, scope: Scope, id: impl Into<String>) -> Self {
        Self {
            base: None,
            project: project.into(),
            scope,
            id: id.into(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    /// Relative resource name (`projects/P/.../operations/ID`)
    pub fn relative_name(&self) -> String {
        let (collection, name) = self.scope.path_segments();
        match name {
            Some(name) => format!(
                "projects/{}/{}/{}/operations/{}",
                self.project, collection, name, self.id
            ),
            None => format!(
                "projects/{}/{}/operations/{}",
                self.project, collection, self.id
            ),
        }
    }

    /// Full URL when the base is known, otherwise the relative name
    pub fn self_link(&self) -> String {
        match &self.base {
            Some(base) => format!("{}/{}", base, self.relative_name()),
            None => self.relative_name(),
        }
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_name())
    }
}

impl FromStr for OperationRef {
    type Err = WaitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| WaitError::InvalidReference {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }

        // Split off "https://host/api/v1/" when a full link is given
        let (base, relative) = match trimmed.find("projects/") {
            Some(0) => (None, trimmed),
            Some(idx) if trimmed.contains("://") => (
                Some(trimmed[..idx].trim_end_matches('/').to_string()),
                &trimmed[idx..],
            ),
            _ => return Err(invalid("expected a name starting with 'projects/'")),
        };

        let parts: Vec<&str> = relative.split('/').collect();
        let (project, scope, rest) = match parts.as_slice() {
            ["projects", project, "global", rest @ ..] => (*project, Scope::Global, rest),
            ["projects", project, "regions", region, rest @ ..] => {
                (*project, Scope::Region(region.to_string()), rest)
            }
            ["projects", project, "zones", zone, rest @ ..] => {
                (*project, Scope::Zone(zone.to_string()), rest)
            }
            ["projects", project, "locations", location, rest @ ..] => {
                (*project, Scope::Location(location.to_string()), rest)
            }
            _ => {
                return Err(invalid(
                    "expected global, regions/R, zones/Z or locations/L after the project",
                ));
            }
        };

        let id = match rest {
            ["operations", id] if !id.is_empty() => *id,
            _ => return Err(invalid("expected 'operations/ID' at the end")),
        };
        if project.is_empty() {
            return Err(invalid("project is empty"));
        }

        Ok(OperationRef {
            base,
            project: project.to_string(),
            scope,
            id: id.to_string(),
        })
    }
}

/// Error reported by the server in a finished operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationErrorInfo {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Value>,
}

impl fmt::Display for OperationErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        for detail in &self.details {
            write!(f, "\n  - {}", detail)?;
        }
        Ok(())
    }
}

/// Non-fatal notice attached to an operation (deprecated zone, ignored field, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationWarning {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl OperationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{} [{}]", self.message, self.code)
        }
    }
}

/// The server's reply to one poll
///
/// Only `done` is monotonic (false → true); every other field may change
/// between polls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<OperationWarning>,
}

impl Snapshot {
    /// An unfinished snapshot
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A finished snapshot carrying a response payload
    pub fn succeeded(name: impl Into<String>, response: Value) -> Self {
        Self {
            name: name.into(),
            done: true,
            response: Some(response),
            ..Default::default()
        }
    }

    /// A finished snapshot carrying a server error
    pub fn failed(name: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            error: Some(OperationErrorInfo {
                code,
                message: message.into(),
                details: vec![],
            }),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_target_link(mut self, link: impl Into<String>) -> Self {
        self.target_link = Some(link.into());
        self
    }

    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(OperationWarning::new(code, message));
        self
    }
}

/// The accessors the engine and adapters need from a snapshot
pub trait SnapshotView {
    /// Whether the server considers the operation finished
    fn is_done(&self) -> bool;

    /// Current step reported in the operation metadata
    fn step(&self) -> Option<&str> {
        None
    }

    /// Link to the resource the operation produced or modified
    fn response_link(&self) -> Option<&str> {
        None
    }

    /// Server-reported error, if any
    fn error(&self) -> Option<&OperationErrorInfo> {
        None
    }

    /// Warnings the server attached to the operation
    fn warnings(&self) -> &[OperationWarning] {
        &[]
    }
}

impl SnapshotView for Snapshot {
    fn is_done(&self) -> bool {
        self.done
    }

    fn step(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("step")?.as_str()
    }

    fn response_link(&self) -> Option<&str> {
        self.target_link.as_deref().or_else(|| {
            let response = self.response.as_ref()?;
            response
                .get("selfLink")
                .or_else(|| response.get("name"))
                .and_then(Value::as_str)
        })
    }

    fn error(&self) -> Option<&OperationErrorInfo> {
        self.error
            .as_ref()
            .filter(|e| e.code != 0 || !e.message.is_empty() || !e.details.is_empty())
    }

    fn warnings(&self) -> &[OperationWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_relative_names() {
        let global: OperationRef = "projects/p1/global/operations/op-1".parse().unwrap();
        assert_eq!(global.scope, Scope::Global);
        assert_eq!(global.id, "op-1");
        assert!(global.base.is_none());

        let zonal: OperationRef = "projects/p1/zones/us-central1-a/operations/op-2"
            .parse()
            .unwrap();
        assert_eq!(zonal.scope, Scope::Zone("us-central1-a".to_string()));

        let located: OperationRef = "projects/p1/locations/europe-west1/operations/op-3"
            .parse()
            .unwrap();
        assert_eq!(located.scope, Scope::Location("europe-west1".to_string()));
    }

    #[test]
    fn test_parse_self_link_keeps_base() {
        let op: OperationRef =
            "https://compute.example.com/compute/v1/projects/p1/regions/us-east1/operations/op-9"
                .parse()
                .unwrap();
        assert_eq!(
            op.base.as_deref(),
            Some("https://compute.example.com/compute/v1")
        );
        assert_eq!(op.scope, Scope::Region("us-east1".to_string()));
        assert_eq!(
            op.self_link(),
            "https://compute.example.com/compute/v1/projects/p1/regions/us-east1/operations/op-9"
        );
    }

    #[test]
    fn test_display_round_trips_relative_name() {
        let name = "projects/p1/zones/z1/operations/op-7";
        let op: OperationRef = name.parse().unwrap();
        assert_eq!(op.to_string(), name);
        assert_eq!(op.self_link(), name);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "operations/op-1",
            "projects/p1/operations/op-1",
            "projects/p1/zones/z1/instances/i-1",
            "projects/p1/global/operations/",
            "projects//global/operations/op-1",
            "projects/p1/global/operations/op-1/extra",
        ] {
            let result = bad.parse::<OperationRef>();
            assert!(result.is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_parse_error_is_invalid_reference() {
        let err = "nope".parse::<OperationRef>().unwrap_err();
        assert!(matches!(err, WaitError::InvalidReference { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_snapshot_deserialize_camel_case() {
        let snap: Snapshot = serde_json::from_value(json!({
            "name": "op-1",
            "done": true,
            "targetLink": "projects/p1/global/networks/n1",
            "metadata": {"step": "APPLYING"}
        }))
        .unwrap();
        assert!(snap.is_done());
        assert_eq!(snap.step(), Some("APPLYING"));
        assert_eq!(snap.response_link(), Some("projects/p1/global/networks/n1"));
        assert!(SnapshotView::error(&snap).is_none());
    }

    #[test]
    fn test_snapshot_defaults_when_fields_missing() {
        let snap: Snapshot = serde_json::from_value(json!({"name": "op-2"})).unwrap();
        assert!(!snap.done);
        assert!(snap.step().is_none());
        assert!(snap.response_link().is_none());
    }

    #[test]
    fn test_response_link_falls_back_to_response() {
        let snap = Snapshot::succeeded("op", json!({"selfLink": "https://x/projects/p/r"}));
        assert_eq!(snap.response_link(), Some("https://x/projects/p/r"));

        let snap = Snapshot::succeeded("op", json!({"name": "resultX"}));
        assert_eq!(snap.response_link(), Some("resultX"));
    }

    #[test]
    fn test_empty_error_is_not_an_error() {
        let mut snap = Snapshot::succeeded("op", json!({}));
        snap.error = Some(OperationErrorInfo {
            code: 0,
            message: String::new(),
            details: vec![],
        });
        assert!(SnapshotView::error(&snap).is_none());

        let failed = Snapshot::failed("op", 9, "Something happened");
        assert_eq!(
            SnapshotView::error(&failed).map(|e| e.message.as_str()),
            Some("Something happened")
        );
    }

    #[test]
    fn test_snapshot_warnings_deserialize() {
        let snap: Snapshot = serde_json::from_value(json!({
            "name": "op-1",
            "done": true,
            "warnings": [
                {"code": "DEPRECATED_RESOURCE_USED", "message": "us-central1-a is deprecated"},
                {"message": "no code"}
            ]
        }))
        .unwrap();
        assert_eq!(
            snap.warnings(),
            &[
                OperationWarning::new("DEPRECATED_RESOURCE_USED", "us-central1-a is deprecated"),
                OperationWarning::new("", "no code"),
            ]
        );
        assert_eq!(
            snap.warnings()[0].to_string(),
            "us-central1-a is deprecated [DEPRECATED_RESOURCE_USED]"
        );
        assert_eq!(snap.warnings()[1].to_string(), "no code");

        let plain = Snapshot::pending("op-2");
        assert!(plain.warnings().is_empty());
        assert!(!serde_json::to_string(&plain).unwrap().contains("warnings"));
    }

    #[test]
    fn test_error_info_display_lists_details() {
        let info = OperationErrorInfo {
            code: 3,
            message: "bad field".to_string(),
            details: vec![json!({"field": "size"})],
        };
        let text = info.to_string();
        assert!(text.starts_with("bad field (code 3)"));
        assert!(text.contains("size"));
    }
}
