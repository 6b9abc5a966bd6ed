//! Identity Commands
//!
//! whoami, id, sudo

use crate::shell::{Command, Invocation, Output, ShellContext, ShellError};

// ============================================================================
// Whoami Command
// ============================================================================

/// Whoami command - prints the login name
pub struct WhoamiCommand;

impl Command for WhoamiCommand {
    fn name(&self) -> &'static str {
        "whoami"
    }
    fn description(&self) -> &'static str {
        "Print effective user name"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        Ok(Output::ok(ctx.username.clone()))
    }
}

/// Static instance
pub static WHOAMI_CMD: WhoamiCommand = WhoamiCommand;

// ============================================================================
// Id Command
// ============================================================================

/// Id command - prints uid, gid and groups
pub struct IdCommand;

impl Command for IdCommand {
    fn name(&self) -> &'static str {
        "id"
    }
    fn description(&self) -> &'static str {
        "Print user and group IDs"
    }
    fn usage(&self) -> &'static str {
        "id [OPTION]... [USER]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let uid = ctx.uid();
        let name = ctx.username.clone();
        let by_name = inv.has_short('n');

        if inv.has_short('u') || inv.has_short('g') {
            return Ok(Output::ok(if by_name { name } else { uid.to_string() }));
        }
        if inv.has_short('G') {
            let groups = if uid == 0 {
                if by_name { "root".to_string() } else { "0".to_string() }
            } else if by_name {
                format!("{} adm sudo", name)
            } else {
                "1000 4 27".to_string()
            };
            return Ok(Output::ok(groups));
        }

        let text = if uid == 0 {
            String::from("uid=0(root) gid=0(root) groups=0(root)")
        } else {
            format!(
                "uid={0}({1}) gid={0}({1}) groups={0}({1}),4(adm),27(sudo)",
                uid, name
            )
        };
        Ok(Output::ok(text))
    }
}

/// Static instance
pub static ID_CMD: IdCommand = IdCommand;

// ============================================================================
// Sudo Command
// ============================================================================

/// Sudo command - only reached for `sudo -l` and bare `sudo`; prefixed
/// commands are unwrapped by the interpreter before lookup
pub struct SudoCommand;

impl Command for SudoCommand {
    fn name(&self) -> &'static str {
        "sudo"
    }
    fn description(&self) -> &'static str {
        "Execute a command as another user"
    }
    fn usage(&self) -> &'static str {
        "sudo -h | -K | -k | -V\nusage: sudo -v [-AknS] [-g group] [-h host] [-p prompt] [-u user]\nusage: sudo -l [-AknS] [-g group] [-h host] [-p prompt] [-U user] [-u user] [command]\nusage: sudo [-AbEHknPS] [-C num] [-g group] [-h host] [-p prompt] [-T timeout] [-u user] [VAR=value] [-i|-s] [<command>]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.has_short('l') {
            let host = ctx.persona().hostname;
            return Ok(Output::ok(format!(
                "Matching Defaults entries for {user} on {host}:\n    \
                 env_reset, mail_badpass,\n    \
                 secure_path=/usr/local/sbin\\:/usr/local/bin\\:/usr/sbin\\:/usr/bin\\:/sbin\\:/bin\n\n\
                 User {user} may run the following commands on {host}:\n    \
                 (ALL : ALL) NOPASSWD: ALL",
                user = ctx.username,
                host = host,
            )));
        }
        if inv.has_short('i') || inv.has_short('s') {
            // login shell as root for the rest of the session
            ctx.username = String::from("root");
            ctx.env.insert("USER".to_string(), "root".to_string());
            ctx.env.insert("LOGNAME".to_string(), "root".to_string());
            return Ok(Output::empty());
        }
        if inv.has_short('v') || inv.has_short('k') || inv.has_short('K') {
            return Ok(Output::empty());
        }
        if inv.has_short('V') {
            return Ok(Output::ok(
                "Sudo version 1.9.5p2\nSudoers policy plugin version 1.9.5p2\nSudoers file grammar version 48",
            ));
        }
        Ok(Output::fail(format!("usage: {}", self.usage())))
    }
}

/// Static instance
pub static SUDO_CMD: SudoCommand = SudoCommand;
