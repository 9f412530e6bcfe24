//! Sync loop and event dispatcher.
//!
//! One task runs the loop: long-poll, dispatch every command in the batch in
//! delivered order, then persist the batch's cursor. Handlers run inline, so
//! a slow handler delays the next poll and polls never overlap.
//!
//! The cursor is committed only after the whole batch was dispatched. A
//! crash mid-batch redelivers it on restart, so handlers may see the same
//! invocation twice.

use crate::calls::CallOrchestrator;
use crate::commands::{
    parse_command, BotCommand, CommandContext, CommandInvocation, CommandRegistry,
};
use crate::config::Config;
use crate::cursor::CursorStore;
use crate::errors::{BotError, CommandError, HomeserverError};
use crate::homeserver::{HomeserverApi, OutgoingMessage, SyncBatch};
use crate::observability::metrics;
use crate::room::RoomRef;
use common::retry::Backoff;
use common::types::RoomId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Server-side wait of the catch-up sync.
const CATCH_UP_TIMEOUT_MS: u64 = 0;

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub command_prefix: String,
    pub timeout_ms: u64,
    /// Consecutive transient failures tolerated before the loop stops.
    pub max_failures: u32,
    pub backoff: Backoff,
    /// Run disconnect-all once before polling.
    pub disconnect_on_startup: bool,
}

impl SyncSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            command_prefix: config.command_prefix.clone(),
            timeout_ms: config.sync_timeout_ms,
            max_failures: config.sync_max_failures,
            backoff: Backoff::default(),
            disconnect_on_startup: config.disconnect_on_startup,
        }
    }
}

/// The session/event engine.
pub struct Bot {
    homeserver: Arc<dyn HomeserverApi>,
    calls: CallOrchestrator,
    registry: CommandRegistry,
    cursor: CursorStore,
    settings: SyncSettings,
}

impl Bot {
    pub fn new(
        homeserver: Arc<dyn HomeserverApi>,
        calls: CallOrchestrator,
        registry: CommandRegistry,
        cursor: CursorStore,
        settings: SyncSettings,
    ) -> Self {
        Self {
            homeserver,
            calls,
            registry,
            cursor,
            settings,
        }
    }

    /// Run until `cancel` fires or a terminal error occurs.
    ///
    /// On every exit path active calls are left and the homeserver client
    /// is closed exactly once. Cancellation is a clean shutdown and returns
    /// `Ok(())`.
    ///
    /// # Errors
    ///
    /// - `BotError::Homeserver` for non-transient sync failures (e.g. a
    ///   revoked access token)
    /// - `BotError::SyncExhausted` when transient failures exceed the budget
    /// - `BotError::Cursor` when the cursor cannot be read or written
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BotError> {
        let result = self.run_until_stopped(&cancel).await;

        let left = self.calls.leave_all_active().await;
        if !left.is_empty() {
            info!(target: "bot.sync", calls = left.len(), "Left active calls");
        }
        self.homeserver.close().await;

        match &result {
            Ok(()) => info!(target: "bot.sync", "Sync loop stopped"),
            Err(e) => error!(target: "bot.sync", error = %e, "Sync loop failed"),
        }
        result
    }

    async fn run_until_stopped(&mut self, cancel: &CancellationToken) -> Result<(), BotError> {
        if self.settings.disconnect_on_startup {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = self.startup_sweep() => {}
            }
        }

        let mut since = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            since = self.initial_cursor() => since?,
        };

        info!(target: "bot.sync", commands = self.registry.len(), "Bot starting");

        let mut failures: u32 = 0;
        loop {
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(target: "bot.sync", "Shutdown requested");
                    return Ok(());
                }
                response = self.homeserver.sync(since.as_deref(), self.settings.timeout_ms) => response,
            };

            let outcome = match response {
                Ok(batch) => {
                    metrics::record_sync("success");
                    metrics::record_sync_events(batch.event_count());
                    self.process_batch(&batch).await.map(|()| batch)
                }
                Err(e) => {
                    metrics::record_sync("error");
                    Err(e)
                }
            };

            match outcome {
                Ok(batch) => {
                    failures = 0;
                    if let Some(next) = batch.next_batch {
                        self.cursor.save(&next).await?;
                        since = Some(next);
                    } else {
                        warn!(target: "bot.sync", "Sync response had no next_batch, keeping cursor");
                    }
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures > self.settings.max_failures {
                        return Err(BotError::SyncExhausted {
                            attempts: failures,
                            last: e,
                        });
                    }

                    let delay = self.settings.backoff.delay_for_attempt(failures - 1);
                    warn!(
                        target: "bot.sync",
                        error = %e,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Sync failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            info!(target: "bot.sync", "Shutdown requested during backoff");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn startup_sweep(&mut self) {
        match self.calls.disconnect_all().await {
            Ok(left) if left.is_empty() => {
                debug!(target: "bot.sync", "No stale call memberships");
            }
            Ok(left) => {
                info!(target: "bot.sync", rooms = left.len(), "Cleared stale call memberships");
            }
            Err(e) => {
                warn!(target: "bot.sync", error = %e, "Startup call sweep failed");
            }
        }
    }

    /// Load the persisted cursor, or catch up with a zero-timeout sync so
    /// history is not replayed.
    async fn initial_cursor(&self) -> Result<Option<String>, BotError> {
        if let Some(cursor) = self.cursor.load().await? {
            info!(target: "bot.sync", "Resuming from persisted cursor");
            return Ok(Some(cursor));
        }

        info!(target: "bot.sync", "No sync cursor found, catching up to present");
        let batch = self.homeserver.sync(None, CATCH_UP_TIMEOUT_MS).await?;
        match batch.next_batch {
            Some(next) => {
                self.cursor.save(&next).await?;
                Ok(Some(next))
            }
            None => {
                warn!(target: "bot.sync", "Catch-up sync returned no cursor");
                Ok(None)
            }
        }
    }

    /// Dispatch every command in `batch` in delivered order.
    ///
    /// Only a transient failure to read room state aborts the batch; handler
    /// errors are reported to the room.
    #[instrument(skip_all, fields(rooms = batch.rooms.join.0.len()))]
    async fn process_batch(&mut self, batch: &SyncBatch) -> Result<(), HomeserverError> {
        let Self {
            homeserver,
            calls,
            registry,
            settings,
            ..
        } = self;
        let homeserver: &dyn HomeserverApi = homeserver.as_ref();
        let registry: &CommandRegistry = registry;
        let settings: &SyncSettings = settings;
        let own_user = calls.session().user_id.clone();

        for (room_id, room) in &batch.rooms.join.0 {
            for event in &room.timeline.events {
                if event.sender == own_user.as_str() {
                    continue;
                }
                let Some(body) = event.message_body() else {
                    continue;
                };
                let Some(parsed) = parse_command(body, &settings.command_prefix) else {
                    continue;
                };

                let room_ref = room_snapshot(homeserver, room_id).await?;
                info!(
                    target: "bot.commands",
                    room = %room_ref.name,
                    sender = %event.sender,
                    command = %parsed.name,
                    "Command received"
                );

                let Some(command) = registry.lookup(parsed.name) else {
                    debug!(target: "bot.commands", command = %parsed.name, "Unknown command");
                    metrics::record_command("unknown");
                    continue;
                };

                let invocation = CommandInvocation {
                    name: parsed.name.to_string(),
                    argument: parsed.argument.to_string(),
                    room: room_ref,
                    event: event.clone(),
                };

                let mut ctx = CommandContext {
                    homeserver,
                    calls: &mut *calls,
                    registry,
                    prefix: &settings.command_prefix,
                };
                dispatch(&mut ctx, command, &invocation).await;
            }
        }

        Ok(())
    }
}

async fn room_snapshot(
    homeserver: &dyn HomeserverApi,
    room_id: &RoomId,
) -> Result<RoomRef, HomeserverError> {
    match homeserver.room_state(room_id).await {
        Ok(state) => Ok(RoomRef::from_state_events(room_id.clone(), &state)),
        Err(e) if e.is_transient() => Err(e),
        Err(e) => {
            warn!(target: "bot.commands", room_id = %room_id, error = %e, "Room state unavailable");
            Ok(RoomRef::bare(room_id.clone()))
        }
    }
}

/// Run preconditions then the handler; report any error into the room.
async fn dispatch(
    ctx: &mut CommandContext<'_>,
    command: &BotCommand,
    invocation: &CommandInvocation,
) {
    let result = run_command(ctx, command, invocation).await;

    let error = match result {
        Ok(()) => {
            metrics::record_command("ok");
            return;
        }
        Err(e @ CommandError::PreconditionFailed(_)) => {
            metrics::record_command("rejected");
            e
        }
        Err(e) => {
            metrics::record_command("error");
            e
        }
    };

    warn!(target: "bot.commands", command = %invocation.name, error = %error, "Command failed");

    let reply = OutgoingMessage::plain(format!("COMMAND ERROR:\n{error}"));
    if let Err(e) = ctx.homeserver.send_message(&invocation.room.id, &reply).await {
        warn!(target: "bot.commands", room_id = %invocation.room.id, error = %e, "Failed to deliver error reply");
    }
}

async fn run_command(
    ctx: &mut CommandContext<'_>,
    command: &BotCommand,
    invocation: &CommandInvocation,
) -> Result<(), CommandError> {
    for check in &command.dependencies {
        if let Err(e) = check.check(invocation) {
            debug!(target: "bot.commands", check = check.name(), "Precondition rejected command");
            return Err(e);
        }
    }
    command.handler.handle(ctx, invocation).await
}
