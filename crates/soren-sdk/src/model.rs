//! Plugin declarations and protocol payloads.
//!
//! Form layouts, schemas and detail blobs are opaque [`Value`]s; the SDK
//! only passes them through.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::handler::SharedHandler;

/// Icon shown next to an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    #[serde(rename = "ref")]
    pub reference: String,
    pub icon: String,
}

impl Icon {
    pub fn new(reference: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            icon: icon.into(),
        }
    }
}

/// Secondary configuration form the plugin asks the host to collect.
#[derive(Debug, Clone)]
pub struct Requirements {
    pub reply_to: String,
    pub jsonui: Value,
    pub jsonschema: Value,
    pub handler: Option<SharedHandler>,
}

impl Requirements {
    pub fn new(reply_to: impl Into<String>, jsonui: Value, jsonschema: Value) -> Self {
        Self {
            reply_to: reply_to.into(),
            jsonui,
            jsonschema,
            handler: None,
        }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// Identity the plugin announces on its intro subject.
#[derive(Debug, Clone)]
pub struct PluginIntro {
    pub name: String,
    pub author: String,
    pub version: String,
    pub requirements: Option<Requirements>,
}

impl PluginIntro {
    pub fn new(
        name: impl Into<String>,
        author: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            version: version.into(),
            requirements: None,
        }
    }

    #[must_use]
    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }
}

/// The plugin's main configuration form.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jsonui: Value,
    pub jsonschema: Value,
    /// Current values, shown pre-filled by the host.
    pub data: Option<Value>,
    /// Submit subject suffix. Unset or empty selects the default.
    pub reply_to: Option<String>,
    pub handler: Option<SharedHandler>,
}

impl Settings {
    pub fn new(jsonui: Value, jsonschema: Value) -> Self {
        Self {
            jsonui,
            jsonschema,
            data: None,
            reply_to: None,
            handler: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Submit subject suffix with the default applied.
    pub fn resolved_reply_to(&self) -> &str {
        crate::subject::settings_reply_to(self.reply_to.as_deref())
    }
}

/// Input form of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionForm {
    pub jsonui: Value,
    pub jsonschema: Value,
}

impl ActionForm {
    pub fn new(jsonui: Value, jsonschema: Value) -> Self {
        Self { jsonui, jsonschema }
    }
}

/// A named capability the host can invoke.
#[derive(Debug, Clone)]
pub struct Action {
    pub method: String,
    pub title: String,
    pub description: String,
    pub icon: Icon,
    pub form: Option<ActionForm>,
    pub request_handler: Option<SharedHandler>,
}

impl Action {
    pub fn new(method: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            title: title.into(),
            description: String::new(),
            icon: Icon::default(),
            form: None,
            request_handler: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = icon;
        self
    }

    #[must_use]
    pub fn with_form(mut self, form: ActionForm) -> Self {
        self.form = Some(form);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.request_handler = Some(handler);
        self
    }

    pub fn summary(&self) -> ActionSummary {
        ActionSummary {
            method: self.method.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
        }
    }
}

/// One entry of the actions list as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub method: String,
    pub title: String,
    pub description: String,
    pub icon: Icon,
}

/// Job command, the last token of a job subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Progress,
    Stop,
    ContextCurrent,
    ContextPath,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Stop => "stop",
            Self::ContextCurrent => "context/current",
            Self::ContextPath => "context/path",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub title: String,
    pub content: String,
}

impl Frame {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// A single progress update for a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub progress: u8,
    pub frame: Frame,
    #[serde(default, skip_serializing_if = "details_are_empty")]
    pub details: Option<Value>,
}

impl JobProgress {
    /// `progress` is clamped to 100.
    pub fn new(progress: u8, frame: Frame) -> Self {
        Self {
            progress: progress.min(100),
            frame,
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The final update sent by `done`.
    pub fn completed(details: Option<Value>) -> Self {
        Self {
            progress: 100,
            frame: Frame::new("Completed", "Job completed successfully"),
            details,
        }
    }
}

/// Body the host attaches to job messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBodyContent {
    pub job_id: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_on: Option<String>,
}

/// Envelope of an action invocation sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequestContent {
    #[serde(rename = "_registry", default)]
    pub registry: Value,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Log,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured log record delivered to the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEvent {
    pub event: EventType,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    /// Unix seconds.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "details_are_empty")]
    pub details: Option<Value>,
}

/// Absent, null, or an empty object or array.
fn details_are_empty(details: &Option<Value>) -> bool {
    match details {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_progress_omits_missing_details() {
        let progress = JobProgress::new(50, Frame::new("T", "C"));
        assert_eq!(
            serde_json::to_string(&progress).unwrap(),
            r#"{"progress":50,"frame":{"title":"T","content":"C"}}"#
        );
        assert_eq!(JobProgress::new(250, Frame::new("T", "C")).progress, 100);

        let empty = JobProgress::completed(Some(json!({})));
        assert!(serde_json::to_value(&empty).unwrap().get("details").is_none());
        let kept = JobProgress::completed(Some(json!({"k": 1})));
        assert_eq!(serde_json::to_value(&kept).unwrap()["details"], json!({"k": 1}));
    }

    #[test]
    fn commands_render_wire_tokens() {
        assert_eq!(Command::Progress.to_string(), "progress");
        assert_eq!(Command::Stop.as_str(), "stop");
        assert_eq!(Command::ContextCurrent.as_str(), "context/current");
        assert_eq!(Command::ContextPath.as_str(), "context/path");
    }

    #[test]
    fn event_serializes_lowercase_tags() {
        let event = PluginEvent {
            event: EventType::Log,
            level: LogLevel::Warn,
            source: "abc - scanner".into(),
            message: "slow".into(),
            timestamp: 1,
            details: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "log",
                "level": "warn",
                "source": "abc - scanner",
                "message": "slow",
                "timestamp": 1
            })
        );

        let with_empty_details = PluginEvent {
            details: Some(json!({})),
            ..event
        };
        assert!(serde_json::to_value(&with_empty_details)
            .unwrap()
            .get("details")
            .is_none());
    }

    #[test]
    fn action_request_envelope_decodes() {
        let content: ActionRequestContent =
            serde_json::from_value(json!({"_registry": {"id": 7}, "body": {"repo": "x"}})).unwrap();
        assert_eq!(content.registry, json!({"id": 7}));
        assert_eq!(content.body, json!({"repo": "x"}));

        let job: JobBodyContent = serde_json::from_value(json!({
            "jobId": "j1",
            "progress": 10,
            "commitOn": "done"
        }))
        .unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.commit_on.as_deref(), Some("done"));
    }

    #[test]
    fn settings_reply_to_defaults() {
        let settings = Settings::new(json!({}), json!({}));
        assert_eq!(settings.resolved_reply_to(), "_settings.config.submit");
        let settings = settings.with_reply_to("");
        assert_eq!(settings.resolved_reply_to(), "_settings.config.submit");
    }
}
