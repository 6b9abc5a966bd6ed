//! Command Table
//!
//! Fabricated commands grouped by what an intruder checks for: identity,
//! system tables, the filesystem, hardware and the network.

pub mod fs;
pub mod hardware;
pub mod identity;
pub mod net;
pub mod system;

use once_cell::sync::Lazy;

use super::Command;

// Re-export static command instances
pub use fs::{CAT_CMD, CD_CMD, ECHO_CMD, FIND_CMD, GREP_CMD, LS_CMD, PWD_CMD};
pub use hardware::{DETECT_VIRT_CMD, DMESG_CMD, DMIDECODE_CMD, LSPCI_CMD};
pub use identity::{ID_CMD, SUDO_CMD, WHOAMI_CMD};
pub use net::{CURL_CMD, IFCONFIG_CMD, IP_CMD, NETSTAT_CMD, PING_CMD, SS_CMD, WGET_CMD};
pub use system::{
    CHMOD_CMD, CLEAR_CMD, CP_CMD, DF_CMD, ENV_CMD, EXIT_CMD, EXPORT_CMD, FREE_CMD, HELP_CMD,
    HISTORY_CMD, HOSTNAME_CMD, KILL_CMD, MKDIR_CMD, MV_CMD, PS_CMD, RM_CMD, SH_CMD, TOP_CMD,
    TOUCH_CMD, UNAME_CMD, UPTIME_CMD, WHICH_CMD,
};

/// The command table shared by every session
pub static REGISTRY: Lazy<CommandRegistry> = Lazy::new(create_default_registry);

// ============================================================================
// Command Registry
// ============================================================================

/// Registry of available commands
pub struct CommandRegistry {
    commands: Vec<&'static dyn Command>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Create a new empty registry
    pub const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Register a command
    pub fn register(&mut self, command: &'static dyn Command) {
        self.commands.push(command);
    }

    /// Find a command by name or alias (exact, lowercase)
    pub fn find(&self, name: &str) -> Option<&'static dyn Command> {
        self.commands
            .iter()
            .find(|cmd| cmd.name() == name || cmd.aliases().contains(&name))
            .copied()
    }

    /// Get all registered commands
    pub fn commands(&self) -> &[&'static dyn Command] {
        &self.commands
    }
}

/// Create and populate the default command registry
pub fn create_default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    // Identity and privilege
    registry.register(&WHOAMI_CMD);
    registry.register(&ID_CMD);
    registry.register(&SUDO_CMD);

    // System information
    registry.register(&UNAME_CMD);
    registry.register(&HOSTNAME_CMD);
    registry.register(&UPTIME_CMD);
    registry.register(&FREE_CMD);
    registry.register(&TOP_CMD);
    registry.register(&DF_CMD);
    registry.register(&PS_CMD);

    // Shell builtins
    registry.register(&HELP_CMD);
    registry.register(&CLEAR_CMD);
    registry.register(&HISTORY_CMD);
    registry.register(&ENV_CMD);
    registry.register(&EXPORT_CMD);
    registry.register(&WHICH_CMD);
    registry.register(&SH_CMD);
    registry.register(&EXIT_CMD);

    // Accepted and forgotten
    registry.register(&CHMOD_CMD);
    registry.register(&RM_CMD);
    registry.register(&MKDIR_CMD);
    registry.register(&TOUCH_CMD);
    registry.register(&CP_CMD);
    registry.register(&MV_CMD);
    registry.register(&KILL_CMD);

    // Filesystem commands
    registry.register(&PWD_CMD);
    registry.register(&CD_CMD);
    registry.register(&LS_CMD);
    registry.register(&CAT_CMD);
    registry.register(&ECHO_CMD);
    registry.register(&FIND_CMD);
    registry.register(&GREP_CMD);

    // Hardware inspection
    registry.register(&DETECT_VIRT_CMD);
    registry.register(&DMIDECODE_CMD);
    registry.register(&LSPCI_CMD);
    registry.register(&DMESG_CMD);

    // Network commands
    registry.register(&IFCONFIG_CMD);
    registry.register(&IP_CMD);
    registry.register(&NETSTAT_CMD);
    registry.register(&SS_CMD);
    registry.register(&PING_CMD);
    registry.register(&WGET_CMD);
    registry.register(&CURL_CMD);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_and_aliases_are_unique() {
        let mut seen = HashSet::new();
        for cmd in REGISTRY.commands() {
            assert!(seen.insert(cmd.name()), "duplicate {}", cmd.name());
            for alias in cmd.aliases() {
                assert!(seen.insert(*alias), "duplicate alias {}", alias);
            }
        }
    }

    #[test]
    fn lookup_by_alias() {
        assert_eq!(REGISTRY.find("logout").unwrap().name(), "exit");
        assert_eq!(REGISTRY.find("printenv").unwrap().name(), "env");
        assert!(REGISTRY.find("zzz").is_none());
    }
}
