//! Built-in commands.

use super::{
    AllowedSenders, BotCommand, CommandContext, CommandHandler, CommandInvocation,
    CommandRegistry, Precondition,
};
use crate::calls::JoinOutcome;
use crate::errors::{CallError, CommandError};
use crate::rtc::audio::{decode_file, AudioError};
use async_trait::async_trait;
use common::types::UserId;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Options for the built-in command set.
#[derive(Debug, Clone)]
pub struct BuiltinOptions {
    /// When set, call-control commands are limited to these senders.
    pub allowed_senders: Option<Vec<UserId>>,
    /// Root that `play` paths are resolved against.
    pub media_dir: PathBuf,
}

/// Register `help`, `ping`, `join`, `leave`, `play`, `calls` and
/// `hangup-all`.
pub fn register_builtin_commands(registry: &mut CommandRegistry, options: &BuiltinOptions) {
    let call_control: Vec<Arc<dyn Precondition>> = options
        .allowed_senders
        .as_ref()
        .map(|senders| {
            vec![Arc::new(AllowedSenders::new(senders.iter().cloned())) as Arc<dyn Precondition>]
        })
        .unwrap_or_default();

    registry.register(BotCommand::new("help", HelpCommand).with_help("List available commands"));
    registry.register(BotCommand::new("ping", PingCommand).with_help("Check that the bot is alive"));
    registry.register(
        BotCommand::new("join", JoinCommand)
            .with_help("Join the call in this room")
            .with_dependencies(call_control.clone()),
    );
    registry.register(
        BotCommand::new("leave", LeaveCommand)
            .with_help("Leave the call in this room")
            .with_dependencies(call_control.clone()),
    );
    registry.register(
        BotCommand::new(
            "play",
            PlayCommand {
                media_dir: options.media_dir.clone(),
            },
        )
        .with_help("Play an audio file into this room's call: play <file>")
        .with_dependencies(call_control.clone()),
    );
    registry.register(BotCommand::new("calls", CallsCommand).with_help("List active calls"));
    registry.register(
        BotCommand::new("hangup-all", HangupAllCommand)
            .with_help("Leave every call this bot is in")
            .with_dependencies(call_control),
    );
}

pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let mut text = String::from("Commands:");
        for command in ctx.registry.sorted() {
            let _ = write!(text, "\n{}{}", ctx.prefix, command.name);
            if let Some(help) = &command.help {
                let _ = write!(text, " - {help}");
            }
        }
        ctx.reply(invocation, &text).await
    }
}

pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let text = if invocation.argument.is_empty() {
            "pong".to_string()
        } else {
            format!("pong: {}", invocation.argument)
        };
        ctx.reply(invocation, &text).await
    }
}

pub struct JoinCommand;

#[async_trait]
impl CommandHandler for JoinCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let text = match ctx.calls.join(&invocation.room).await? {
            JoinOutcome::Joined => format!("Joined the call in {}", invocation.room.name),
            JoinOutcome::AlreadyJoined => "Already in this call".to_string(),
        };
        ctx.reply(invocation, &text).await
    }
}

pub struct LeaveCommand;

#[async_trait]
impl CommandHandler for LeaveCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        ctx.calls.leave(&invocation.room.id).await?;
        ctx.reply(invocation, "Left the call").await
    }
}

pub struct PlayCommand {
    media_dir: PathBuf,
}

impl PlayCommand {
    /// Resolve `argument` inside the media directory. Absolute paths and
    /// parent components are rejected, and so is any symlink whose target
    /// lies outside the directory.
    async fn resolve(&self, argument: &str) -> Result<PathBuf, CommandError> {
        let outside = || {
            CommandError::InvalidArguments(format!(
                "'{argument}' must be a path inside the media directory"
            ))
        };

        let relative = Path::new(argument);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(outside());
        }

        let joined = self.media_dir.join(relative);
        let not_found = |_| CallError::from(AudioError::FileNotFound(joined.clone()));
        let root = tokio::fs::canonicalize(&self.media_dir)
            .await
            .map_err(not_found)?;
        let resolved = tokio::fs::canonicalize(&joined).await.map_err(not_found)?;
        if !resolved.starts_with(&root) {
            return Err(outside());
        }
        Ok(resolved)
    }
}

#[async_trait]
impl CommandHandler for PlayCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let argument = invocation.argument.trim();
        if argument.is_empty() {
            return Err(CommandError::InvalidArguments(
                "usage: play <file>".to_string(),
            ));
        }

        let room_id = &invocation.room.id;
        if !ctx.calls.is_in_call(room_id) {
            return Err(CallError::NoActiveCall(room_id.clone()).into());
        }

        let path = self.resolve(argument).await?;
        let clip = decode_file(&path).await.map_err(CallError::from)?;
        let text = format!(
            "Queued {} ({:.1}s)",
            clip.name,
            clip.duration().as_secs_f64()
        );

        ctx.calls.play(room_id, clip)?;
        ctx.reply(invocation, &text).await
    }
}

pub struct CallsCommand;

#[async_trait]
impl CommandHandler for CallsCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let calls = ctx.calls.active_calls();
        let text = if calls.is_empty() {
            "No active calls".to_string()
        } else {
            let mut text = format!("Active calls ({}):", calls.len());
            for call in calls {
                let _ = write!(
                    text,
                    "\n{} ({}) since {}",
                    call.room_name,
                    call.room_id,
                    call.joined_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            text
        };
        ctx.reply(invocation, &text).await
    }
}

pub struct HangupAllCommand;

#[async_trait]
impl CommandHandler for HangupAllCommand {
    async fn handle(
        &self,
        ctx: &mut CommandContext<'_>,
        invocation: &CommandInvocation,
    ) -> Result<(), CommandError> {
        let left = ctx.calls.disconnect_all().await?;
        let text = match left.len() {
            0 => "Not in any calls".to_string(),
            1 => "Left 1 call".to_string(),
            n => format!("Left {n} calls"),
        };
        ctx.reply(invocation, &text).await
    }
}
