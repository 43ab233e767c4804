//! Named command handlers.
//!
//! Most commands go straight to the firmware. A few are answered (or
//! post-processed) on the host: those are registered here once, when the
//! session is built, and looked up by exact name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::focus::Focus;

/// Plain function handler.
pub type DirectHandler = fn(&Focus, &[&str]) -> Result<Option<String>>;

/// A host-side extension that answers one or more commands.
pub trait CommandPlugin: Send + Sync {
    /// Run the command on `session`.
    fn focus(&self, session: &Focus, args: &[&str]) -> Result<Option<String>>;
}

/// Handler bound to a command name.
#[derive(Clone)]
pub enum CommandHandler {
    /// A free function.
    Direct(DirectHandler),
    /// A plugin object.
    Plugin(Arc<dyn CommandPlugin>),
}

impl CommandHandler {
    pub(crate) fn call(&self, session: &Focus, args: &[&str]) -> Result<Option<String>> {
        match self {
            Self::Direct(handler) => handler(session, args),
            Self::Plugin(plugin) => plugin.focus(session, args),
        }
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("Direct"),
            Self::Plugin(_) => f.write_str("Plugin"),
        }
    }
}

/// Command name to handler map.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    /// Registry with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("help", CommandHandler::Direct(help));
        registry
    }

    /// Bind `name` to `handler`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, handler: CommandHandler) {
        self.handlers
            .insert(name.into(), handler);
    }

    /// Look up a handler.
    pub fn get(&self, name: &str) -> Option<&CommandHandler> {
        self.handlers.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .handlers
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

/// `help`: the cached command list, one per line.
fn help(session: &Focus, _args: &[&str]) -> Result<Option<String>> {
    let commands = session.supported_commands()?;
    if commands.is_empty() {
        return Ok(None);
    }
    Ok(Some(commands.join("\n")))
}
