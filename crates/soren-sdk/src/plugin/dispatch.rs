//! Per-role message dispatch.
//!
//! Each subscription bound by [`super::Plugin::start`] is served by one task
//! that hands every inbound message to [`Dispatcher::dispatch`] on a task of
//! its own. Errors surface at that task boundary and are logged there.

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::handler::{HandlerError, SharedHandler};
use crate::model::{Action, ActionSummary, PluginIntro, Settings};
use crate::session::Session;
use crate::transport::{respond, Message, RespondError, Transport, TransportError};

/// Reply sent when a submit subject has no handler.
pub const NOT_IMPLEMENTED: &[u8] = br#"{"status":"not implemented"}"#;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
    #[error("encode reply failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Respond(#[from] RespondError),
}

/// Protocol role served by one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Intro,
    Requirements,
    SettingsShow,
    SettingsSubmit,
    ActionsList,
    /// Index into the registered actions.
    ActionForm(usize),
    ActionExecute(usize),
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Requirements => "requirements",
            Self::SettingsShow => "settings",
            Self::SettingsSubmit => "settings submit",
            Self::ActionsList => "actions list",
            Self::ActionForm(_) => "action form",
            Self::ActionExecute(_) => "action",
        }
    }
}

/// Declarations frozen at start and shared by every dispatch.
#[derive(Debug, Default)]
pub(crate) struct Declarations {
    pub intro: Option<PluginIntro>,
    pub settings: Option<Settings>,
    pub actions: Vec<Action>,
}

#[derive(Serialize)]
struct IntroReply<'a> {
    name: &'a str,
    author: &'a str,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    requirements: Option<RequirementsReply<'a>>,
}

#[derive(Serialize)]
struct RequirementsReply<'a> {
    #[serde(rename = "replyTo")]
    reply_to: &'a str,
    jsonui: &'a Value,
    jsonschema: &'a Value,
}

#[derive(Serialize)]
struct SettingsReply<'a> {
    #[serde(rename = "replyTo")]
    reply_to: &'a str,
    jsonui: &'a Value,
    jsonschema: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

#[derive(Clone)]
pub(crate) struct Dispatcher {
    session: Arc<Session>,
    declarations: Arc<Declarations>,
}

impl Dispatcher {
    pub(crate) fn new(session: Arc<Session>, declarations: Arc<Declarations>) -> Self {
        Self {
            session,
            declarations,
        }
    }

    /// Subscribe to `subject` and spawn the task serving it.
    ///
    /// The subscription is live once this returns.
    pub(crate) async fn bind(
        &self,
        subject: String,
        role: Role,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut messages = self.session.subscribe(&subject).await?;
        tracing::info!(%subject, role = role.name(), "subscribed");

        let dispatcher = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let dispatcher = dispatcher.clone();
                let subject = subject.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(role, message).await {
                        tracing::error!(
                            %subject,
                            role = role.name(),
                            error = %e,
                            "plugin dispatch failed"
                        );
                    }
                });
            }
            tracing::debug!(%subject, "subscription closed");
        }))
    }

    pub(crate) async fn dispatch(&self, role: Role, message: Message) -> Result<(), DispatchError> {
        let declarations = &self.declarations;
        match role {
            Role::Intro => {
                let Some(intro) = &declarations.intro else {
                    return Ok(());
                };
                self.reply(&message, serde_json::to_vec(&intro_reply(intro))?.into())
                    .await
            }
            Role::Requirements => {
                let handler = declarations
                    .intro
                    .as_ref()
                    .and_then(|intro| intro.requirements.as_ref())
                    .and_then(|requirements| requirements.handler.clone());
                self.submit(handler, message).await
            }
            Role::SettingsShow => {
                tracing::info!("settings requested");
                let body = match &declarations.settings {
                    Some(settings) => serde_json::to_vec(&settings_reply(settings))?.into(),
                    None => Bytes::from_static(b"null"),
                };
                self.reply(&message, body).await
            }
            Role::SettingsSubmit => {
                let handler = declarations
                    .settings
                    .as_ref()
                    .and_then(|settings| settings.handler.clone());
                self.submit(handler, message).await
            }
            Role::ActionsList => {
                let summaries: Vec<ActionSummary> =
                    declarations.actions.iter().map(Action::summary).collect();
                self.reply(&message, serde_json::to_vec(&summaries)?.into())
                    .await
            }
            Role::ActionForm(index) => {
                let body = match declarations.actions.get(index).and_then(|a| a.form.as_ref()) {
                    Some(form) => serde_json::to_vec(form)?.into(),
                    None => Bytes::from_static(b"{}"),
                };
                self.reply(&message, body).await
            }
            Role::ActionExecute(index) => {
                let Some(action) = declarations.actions.get(index) else {
                    return Ok(());
                };
                let Some(handler) = action.request_handler.clone() else {
                    tracing::debug!(method = %action.method, "action has no request handler");
                    return Ok(());
                };
                self.invoke(handler, message).await
            }
        }
    }

    /// Submit subjects answer "not implemented" when no handler is set.
    async fn submit(
        &self,
        handler: Option<SharedHandler>,
        message: Message,
    ) -> Result<(), DispatchError> {
        match handler {
            Some(handler) => self.invoke(handler, message).await,
            None => self.reply(&message, Bytes::from_static(NOT_IMPLEMENTED)).await,
        }
    }

    async fn invoke(&self, handler: SharedHandler, message: Message) -> Result<(), DispatchError> {
        let reply_to = message.clone();
        let reply = handler
            .handle(message)
            .await
            .map_err(DispatchError::Handler)?;
        match reply {
            Some(reply) => self.reply(&reply_to, reply.into_bytes()?).await,
            None => Ok(()),
        }
    }

    async fn reply(&self, message: &Message, body: Bytes) -> Result<(), DispatchError> {
        respond(self.session.as_ref(), message, body).await?;
        Ok(())
    }
}

fn intro_reply(intro: &PluginIntro) -> IntroReply<'_> {
    IntroReply {
        name: &intro.name,
        author: &intro.author,
        version: &intro.version,
        requirements: intro.requirements.as_ref().map(|r| RequirementsReply {
            reply_to: &r.reply_to,
            jsonui: &r.jsonui,
            jsonschema: &r.jsonschema,
        }),
    }
}

fn settings_reply(settings: &Settings) -> SettingsReply<'_> {
    SettingsReply {
        reply_to: settings.resolved_reply_to(),
        jsonui: &settings.jsonui,
        jsonschema: &settings.jsonschema,
        data: settings.data.as_ref(),
    }
}
