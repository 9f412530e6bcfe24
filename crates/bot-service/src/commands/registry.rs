//! Command registry.
//!
//! Populated before the sync loop starts and only read afterwards.

use super::{CommandHandler, Precondition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A registered command.
pub struct BotCommand {
    pub name: String,
    pub help: Option<String>,
    pub handler: Box<dyn CommandHandler>,
    /// Checked in order before the handler runs.
    pub dependencies: Vec<Arc<dyn Precondition>>,
}

impl BotCommand {
    pub fn new(name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: name.into(),
            help: None,
            handler: Box::new(handler),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, check: Arc<dyn Precondition>) -> Self {
        self.dependencies.push(check);
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, checks: impl IntoIterator<Item = Arc<dyn Precondition>>) -> Self {
        self.dependencies.extend(checks);
        self
    }
}

/// Name to command mapping.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, BotCommand>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command. A command already registered under the same name is
    /// replaced and returned.
    pub fn register(&mut self, command: BotCommand) -> Option<BotCommand> {
        let name = command.name.clone();
        let previous = self.commands.insert(name.clone(), command);
        if previous.is_some() {
            warn!(target: "bot.commands", command = %name, "Command registered twice, keeping the later one");
        } else {
            debug!(target: "bot.commands", command = %name, "Command registered");
        }
        previous
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&BotCommand> {
        self.commands.get(name)
    }

    /// Commands ordered by name.
    #[must_use]
    pub fn sorted(&self) -> Vec<&BotCommand> {
        let mut commands: Vec<&BotCommand> = self.commands.values().collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
