//! Plugin registration with the host.
//!
//! A [`Plugin`] collects its intro, settings form and actions, then binds one
//! subscription per protocol role on [`Plugin::start`]:
//!
//! | Role | Subject |
//! |---|---|
//! | intro | `soren.v2.<id>.@intro` |
//! | requirements submit | `soren.v2.<id>.<requirements.reply_to>` |
//! | settings show | `soren.v2.<id>.@settings` |
//! | settings submit | `soren.v2.<id>.<settings.reply_to>` |
//! | actions list | `soren.v2.<id>.@actions` |
//! | action form | `soren.v2.<id>.<method>.@form` |
//! | action execute | `soren.cpu.<id>.<method>` |

mod dispatch;

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::events::EventLogger;
use crate::model::{Action, Command, JobProgress, PluginIntro, Settings};
use crate::progress::{JobReporter, ProgressError};
use crate::session::Session;
use crate::subject;
use crate::transport::{Message, TransportError};

pub use dispatch::{DispatchError, Role, NOT_IMPLEMENTED};
use dispatch::{Declarations, Dispatcher};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginState {
    /// Nothing declared yet.
    Unconfigured,
    /// At least one declaration made, not started.
    Registered,
    Running,
}

/// A subscription that could not be established during start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFailure {
    pub role: Role,
    pub subject: String,
    pub error: TransportError,
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin is already running")]
    AlreadyRunning,
    #[error("failed to bind {} subscription(s): {}", .0.len(), describe(.0))]
    Bind(Vec<BindFailure>),
}

fn describe(failures: &[BindFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.role.name(), f.subject, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A Soren plugin bound to one [`Session`].
pub struct Plugin {
    session: Arc<Session>,
    intro: Option<PluginIntro>,
    settings: Option<Settings>,
    actions: Vec<Action>,
    state: PluginState,
    reporter: JobReporter,
    tasks: Vec<JoinHandle<()>>,
}

impl Plugin {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            reporter: JobReporter::new(session.clone()),
            session,
            intro: None,
            settings: None,
            actions: Vec::new(),
            state: PluginState::Unconfigured,
            tasks: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn intro(&self) -> Option<&PluginIntro> {
        self.intro.as_ref()
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn declare(&mut self) -> Result<(), PluginError> {
        if self.state == PluginState::Running {
            return Err(PluginError::AlreadyRunning);
        }
        self.state = PluginState::Registered;
        Ok(())
    }

    pub fn set_intro(&mut self, intro: PluginIntro) -> Result<(), PluginError> {
        self.declare()?;
        self.intro = Some(intro);
        Ok(())
    }

    pub fn set_settings(&mut self, settings: Settings) -> Result<(), PluginError> {
        self.declare()?;
        self.settings = Some(settings);
        Ok(())
    }

    /// Replace the declared actions.
    pub fn set_actions(&mut self, actions: Vec<Action>) -> Result<(), PluginError> {
        self.declare()?;
        self.actions = actions;
        Ok(())
    }

    pub fn add_actions(
        &mut self,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<(), PluginError> {
        self.declare()?;
        self.actions.extend(actions);
        Ok(())
    }

    /// Bind every protocol subscription and start serving.
    ///
    /// Binds intro, then settings, then the actions list and per-action
    /// subjects. Every bind is attempted even when an earlier one fails; the
    /// failures are reported together in [`PluginError::Bind`]. The plugin is
    /// running afterwards in both cases.
    pub async fn start(&mut self) -> Result<(), PluginError> {
        if self.state == PluginState::Running {
            return Err(PluginError::AlreadyRunning);
        }

        let declarations = Arc::new(Declarations {
            intro: self.intro.clone(),
            settings: self.settings.clone(),
            actions: self.actions.clone(),
        });
        let dispatcher = Dispatcher::new(self.session.clone(), declarations);
        let plugin_id = self.session.plugin_id().to_string();

        let mut bindings = Vec::new();
        if let Some(intro) = &self.intro {
            bindings.push((subject::intro(&plugin_id), Role::Intro));
            let requirements = intro
                .requirements
                .as_ref()
                .filter(|r| !r.reply_to.is_empty());
            if let Some(requirements) = requirements {
                bindings.push((
                    subject::custom(&plugin_id, &requirements.reply_to),
                    Role::Requirements,
                ));
            }
        }
        bindings.push((subject::settings(&plugin_id), Role::SettingsShow));
        if let Some(settings) = &self.settings {
            bindings.push((
                subject::custom(&plugin_id, settings.resolved_reply_to()),
                Role::SettingsSubmit,
            ));
        }
        bindings.push((subject::actions_list(&plugin_id), Role::ActionsList));
        for (index, action) in self.actions.iter().enumerate() {
            bindings.push((
                subject::form(&plugin_id, &action.method),
                Role::ActionForm(index),
            ));
            bindings.push((
                subject::execute(&plugin_id, &action.method),
                Role::ActionExecute(index),
            ));
        }

        let mut failures = Vec::new();
        for (subject, role) in bindings {
            match dispatcher.bind(subject.clone(), role).await {
                Ok(task) => self.tasks.push(task),
                Err(error) => {
                    tracing::error!(
                        %subject,
                        role = role.name(),
                        error = %error,
                        "failed to subscribe"
                    );
                    failures.push(BindFailure {
                        role,
                        subject,
                        error,
                    });
                }
            }
        }

        self.state = PluginState::Running;
        let name = self.intro.as_ref().map_or("Unknown", |intro| intro.name.as_str());
        if failures.is_empty() {
            tracing::info!(plugin = name, "plugin started");
            Ok(())
        } else {
            tracing::warn!(
                plugin = name,
                failed = failures.len(),
                "plugin started with failed subscriptions"
            );
            Err(PluginError::Bind(failures))
        }
    }

    pub fn reporter(&self) -> &JobReporter {
        &self.reporter
    }

    /// Event logger sharing this plugin's session.
    pub fn events(&self) -> EventLogger {
        EventLogger::new(self.session.clone())
    }

    /// See [`JobReporter::progress`].
    pub async fn progress(
        &self,
        job_id: &str,
        command: Command,
        data: &JobProgress,
    ) -> Result<Message, ProgressError> {
        self.reporter.progress(job_id, command, data).await
    }

    /// See [`JobReporter::done`].
    pub async fn done(
        &self,
        job_id: &str,
        details: Option<Value>,
    ) -> Result<Message, ProgressError> {
        self.reporter.done(job_id, details).await
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("state", &self.state)
            .field("intro", &self.intro)
            .field("actions", &self.actions.len())
            .field("subscriptions", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::MemoryTransport;
    use serde_json::json;

    fn plugin() -> (Plugin, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let config = Config::builder()
            .agent_uri("localhost")
            .plugin_id("abc")
            .build_with_env(|_| None)
            .unwrap();
        let session = Arc::new(Session::with_transport(config, transport.clone()));
        (Plugin::new(session), transport)
    }

    #[tokio::test]
    async fn declarations_move_state_forward() {
        let (mut plugin, _transport) = plugin();
        assert_eq!(plugin.state(), PluginState::Unconfigured);

        plugin
            .set_intro(PluginIntro::new("Scanner", "Soren Team", "1.0.0"))
            .unwrap();
        assert_eq!(plugin.state(), PluginState::Registered);

        plugin.start().await.unwrap();
        assert_eq!(plugin.state(), PluginState::Running);

        let err = plugin.add_actions([Action::new("scan", "Scan")]).unwrap_err();
        assert!(matches!(err, PluginError::AlreadyRunning));
        assert!(matches!(plugin.start().await, Err(PluginError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn start_binds_roles_in_order() {
        let (mut plugin, transport) = plugin();
        plugin
            .set_intro(PluginIntro::new("Scanner", "Soren Team", "1.0.0").with_requirements(
                crate::model::Requirements::new("req.submit", json!({}), json!({})),
            ))
            .unwrap();
        plugin.set_settings(Settings::new(json!({}), json!({}))).unwrap();
        plugin
            .set_actions(vec![Action::new("prepare", "Prepare"), Action::new("scan", "Scan")])
            .unwrap();
        plugin.start().await.unwrap();

        assert_eq!(
            transport.subscribed_subjects(),
            vec![
                "soren.v2.abc.@intro",
                "soren.v2.abc.req.submit",
                "soren.v2.abc.@settings",
                "soren.v2.abc._settings.config.submit",
                "soren.v2.abc.@actions",
                "soren.v2.abc.prepare.@form",
                "soren.cpu.abc.prepare",
                "soren.v2.abc.scan.@form",
                "soren.cpu.abc.scan",
            ]
        );
    }

    #[tokio::test]
    async fn start_without_declarations_binds_settings_and_actions_list() {
        let (mut plugin, transport) = plugin();
        plugin.start().await.unwrap();
        assert_eq!(
            transport.subscribed_subjects(),
            vec!["soren.v2.abc.@settings", "soren.v2.abc.@actions"]
        );
    }

    #[tokio::test]
    async fn bind_failures_are_aggregated() {
        let transport = Arc::new(MemoryTransport::new());
        let config = Config::builder()
            .agent_uri("localhost")
            .plugin_id("abc")
            .build_with_env(|_| None)
            .unwrap();
        let session = Arc::new(Session::with_transport(config, transport));
        session.close().await;

        let mut plugin = Plugin::new(session);
        plugin.set_actions(vec![Action::new("scan", "Scan")]).unwrap();
        let err = plugin.start().await.unwrap_err();
        let PluginError::Bind(failures) = err else {
            panic!("expected bind failure, got {err:?}");
        };
        assert_eq!(failures.len(), 4);
        assert!(failures.iter().all(|f| f.error == TransportError::NotConnected));
        assert_eq!(plugin.state(), PluginState::Running);
    }
}
