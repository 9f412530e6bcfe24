//! Chat commands.
//!
//! A message whose first token starts with the configured prefix becomes a
//! `CommandInvocation`. The dispatcher looks the name up in the
//! `CommandRegistry`, runs the command's preconditions, then its handler.
//! Handlers return `CommandError` instead of replying with failures
//! themselves; the dispatcher renders errors into the room.

pub mod builtin;
pub mod parse;
pub mod registry;

pub use builtin::register_builtin_commands;
pub use parse::{parse_command, ParsedCommand};
pub use registry::{BotCommand, CommandRegistry};

use crate::calls::CallOrchestrator;
use crate::errors::CommandError;
use crate::homeserver::{HomeserverApi, OutgoingMessage, RoomEvent};
use crate::room::RoomRef;
use async_trait::async_trait;
use common::types::UserId;
use std::collections::HashSet;

/// One parsed command occurrence.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub name: String,
    /// Everything after the command token, verbatim.
    pub argument: String,
    pub room: RoomRef,
    pub event: RoomEvent,
}

impl CommandInvocation {
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.event.sender
    }
}

/// What a handler may touch while it runs.
pub struct CommandContext<'a> {
    pub homeserver: &'a dyn HomeserverApi,
    pub calls: &'a mut CallOrchestrator,
    pub registry: &'a CommandRegistry,
    pub prefix: &'a str,
}

impl CommandContext<'_> {
    /// Reply to the invoking event.
    pub async fn reply(
        &self,
        invocation: &CommandInvocation,
        text: &str,
    ) -> Result<(), CommandError> {
        let message = OutgoingMessage::reply(&invocation.room.id, &invocation.event, text);
        self.homeserver
            .send_message(&invocation.room.id, &message)
            .await?;
        Ok(())
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError>;
}

/// Capability check evaluated before a command's handler.
pub trait Precondition: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn check(&self, invocation: &CommandInvocation) -> Result<(), CommandError>;
}

/// Only listed senders may run the command.
#[derive(Debug, Clone)]
pub struct AllowedSenders {
    allowed: HashSet<UserId>,
}

impl AllowedSenders {
    pub fn new(allowed: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl Precondition for AllowedSenders {
    fn name(&self) -> &str {
        "allowed_senders"
    }

    fn check(&self, invocation: &CommandInvocation) -> Result<(), CommandError> {
        if self.allowed.contains(&UserId::from(invocation.sender())) {
            Ok(())
        } else {
            Err(CommandError::PreconditionFailed(format!(
                "{} may not use the {} command",
                invocation.sender(),
                invocation.name
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::RoomId;

    fn invocation(sender: &str) -> CommandInvocation {
        CommandInvocation {
            name: "join".to_string(),
            argument: String::new(),
            room: RoomRef::bare(RoomId::from("!r:example.org")),
            event: RoomEvent {
                event_type: "m.room.message".to_string(),
                sender: sender.to_string(),
                event_id: "$1".to_string(),
                state_key: None,
                content: serde_json::json!({"body": "!join"}),
            },
        }
    }

    #[test]
    fn test_allowed_senders() {
        let check = AllowedSenders::new([UserId::from("@alice:example.org")]);

        assert!(check.check(&invocation("@alice:example.org")).is_ok());

        let err = check.check(&invocation("@mallory:example.org")).unwrap_err();
        assert!(matches!(err, CommandError::PreconditionFailed(_)));
        assert!(err.to_string().contains("@mallory:example.org"));
    }
}
