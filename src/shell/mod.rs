//! Shell Module
//!
//! Fabricates shell output for attacker command lines. Commands implement the
//! `Command` trait and are registered in a `CommandRegistry`; none of them
//! runs anything real.
//!
//! Supports:
//! - Pipeline execution via the `|` operator
//! - Command chaining via `;`, `&`, `&&` and `||`
//! - Output redirection via `>`, `>>` and `2>&1` (parsed, then discarded)

pub mod commands;

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::events::EventContext;
use crate::persona::Persona;
use crate::vfs::{self, FsError, VirtualFs};

pub use commands::{CommandRegistry, REGISTRY, create_default_registry};

/// Exit status for success
pub const STATUS_OK: i32 = 0;
/// Exit status for generic failure
pub const STATUS_FAILURE: i32 = 1;
/// Exit status for a path that exists but cannot be run
pub const STATUS_NOT_EXECUTABLE: i32 = 126;
/// Exit status for an unknown command
pub const STATUS_NOT_FOUND: i32 = 127;

// ============================================================================
// Shell Context (per-session state)
// ============================================================================

/// Per-session shell state: identity, working directory, environment, history
pub struct ShellContext {
    /// Name the attacker authenticated with
    pub username: String,
    pub fs: VirtualFs,
    pub env: BTreeMap<String, String>,
    pub history: Vec<String>,
    pub rng: StdRng,
    pub events: EventContext,
    /// Status of the last command, for `$?`
    pub last_status: i32,
    /// PID of the login shell, for `$$` and `ps`
    pub pid: u32,
}

impl ShellContext {
    pub fn new(username: &str, fs: VirtualFs, events: EventContext, mut rng: StdRng) -> Self {
        let persona = fs.persona();
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), fs.home().to_string());
        env.insert("USER".to_string(), username.to_string());
        env.insert("LOGNAME".to_string(), username.to_string());
        env.insert("SHELL".to_string(), "/bin/bash".to_string());
        env.insert(
            "PATH".to_string(),
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        );
        env.insert("PWD".to_string(), fs.cwd().to_string());
        env.insert("HOSTNAME".to_string(), persona.hostname.to_string());
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
        env.insert("SHLVL".to_string(), "1".to_string());
        let pid = rng.gen_range(1800..3200);
        Self {
            username: username.to_string(),
            fs,
            env,
            history: Vec::new(),
            rng,
            events,
            last_status: STATUS_OK,
            pid,
        }
    }

    pub fn persona(&self) -> &'static Persona {
        self.fs.persona()
    }

    pub fn is_root(&self) -> bool {
        self.username == "root"
    }

    pub fn uid(&self) -> u32 {
        if self.is_root() { 0 } else { 1000 }
    }

    pub fn cwd(&self) -> &str {
        self.fs.cwd()
    }

    /// Resolve a path relative to the current working directory
    pub fn resolve_path(&self, path: &str) -> String {
        self.fs.normalize(path)
    }

    /// Working directory with the home prefix shortened to `~`
    pub fn display_cwd(&self) -> String {
        let cwd = self.fs.cwd();
        let home = self.fs.home();
        if cwd == home {
            String::from("~")
        } else if let Some(rest) = cwd.strip_prefix(home).filter(|r| r.starts_with('/')) {
            format!("~{}", rest)
        } else {
            cwd.to_string()
        }
    }

    /// `user@host:cwd# ` for root, `$ ` otherwise
    pub fn prompt(&self) -> String {
        format!(
            "{}@{}:{}{} ",
            self.username,
            self.persona().hostname,
            self.display_cwd(),
            if self.is_root() { '#' } else { '$' }
        )
    }

    /// Substitute `$VAR`, `${VAR}`, `$?` and `$$`
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('?') => {
                    chars.next();
                    out.push_str(&self.last_status.to_string());
                }
                Some('$') => {
                    chars.next();
                    out.push_str(&self.pid.to_string());
                }
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if closed {
                        out.push_str(self.env.get(&name).map(String::as_str).unwrap_or(""));
                    } else {
                        out.push_str("${");
                        out.push_str(&name);
                    }
                }
                Some(n) if n.is_ascii_alphabetic() || n == '_' => {
                    let mut name = String::new();
                    while let Some(&n) = chars.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(self.env.get(&name).map(String::as_str).unwrap_or(""));
                }
                _ => out.push('$'),
            }
        }
        out
    }
}

// ============================================================================
// Shell Error Types
// ============================================================================

/// Errors that can occur while running a command
#[derive(Debug, Error)]
pub enum ShellError {
    /// No such command; rendered as command-not-found
    #[error("{0}: command not found")]
    UnknownCommand(String),
    /// Internal failure; never shown to the peer verbatim
    #[error("internal fault: {0}")]
    Fault(String),
}

impl From<FsError> for ShellError {
    fn from(e: FsError) -> Self {
        ShellError::Fault(format!("unhandled filesystem error: {}", e))
    }
}

// ============================================================================
// Invocation & Output
// ============================================================================

/// One parsed simple command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The stage text the invocation was parsed from
    pub raw: String,
    /// Command token as typed
    pub command: String,
    /// Non-flag arguments in order
    pub args: Vec<String>,
    /// Tokens starting with `-`
    pub flags: BTreeSet<String>,
    /// Every token after the command, in order
    pub words: Vec<String>,
}

/// Drop one pair of matching surrounding quotes
fn unquote(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &token[1..token.len() - 1];
        }
    }
    token
}

impl Invocation {
    /// Split on whitespace; `None` for a blank line
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().map(unquote);
        let command = tokens.next()?.to_string();
        let words: Vec<String> = tokens.map(String::from).collect();

        let mut args = Vec::new();
        let mut flags = BTreeSet::new();
        for word in &words {
            if word.len() > 1 && word.starts_with('-') {
                flags.insert(word.clone());
            } else {
                args.push(word.clone());
            }
        }

        Some(Self {
            raw: line.trim().to_string(),
            command,
            args,
            flags,
            words,
        })
    }

    /// Lookup key: the command token lowercased
    pub fn name(&self) -> String {
        self.command.to_lowercase()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// True if a single-dash flag cluster contains `c` (`-la` has `l`)
    pub fn has_short(&self, c: char) -> bool {
        self.short_flags().any(|f| f == c)
    }

    /// Every character of every single-dash flag
    pub fn short_flags(&self) -> impl Iterator<Item = char> + '_ {
        self.flags
            .iter()
            .filter(|f| !f.starts_with("--"))
            .flat_map(|f| f.chars().skip(1))
    }

    /// The word following `flag`, e.g. the count in `-c 3`
    pub fn value_after(&self, flag: &str) -> Option<&str> {
        let idx = self.words.iter().position(|w| w == flag)?;
        self.words.get(idx + 1).map(String::as_str)
    }

    /// Positional args minus those consumed as values of the given flags
    pub fn operands(&self, valued: &[&str]) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip = false;
        for word in &self.words {
            if skip {
                skip = false;
                continue;
            }
            if valued.contains(&word.as_str()) {
                skip = true;
                continue;
            }
            if word.len() > 1 && word.starts_with('-') {
                continue;
            }
            out.push(word.as_str());
        }
        out
    }
}

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Text { text: String, status: i32 },
    /// The session should log out
    Exit,
}

impl Output {
    pub fn ok(text: impl Into<String>) -> Self {
        Output::Text { text: text.into(), status: STATUS_OK }
    }

    pub fn empty() -> Self {
        Self::ok(String::new())
    }

    pub fn fail(text: impl Into<String>) -> Self {
        Output::Text { text: text.into(), status: STATUS_FAILURE }
    }

    pub fn with_status(text: impl Into<String>, status: i32) -> Self {
        Output::Text { text: text.into(), status }
    }
}

// ============================================================================
// Command Trait
// ============================================================================

/// A command that can be executed by the shell
///
/// Commands are stateless and should be implemented as unit structs. All
/// per-session state lives on the `ShellContext`.
pub trait Command: Sync {
    /// The primary name of the command
    fn name(&self) -> &'static str;

    /// Alternative names for the command (aliases)
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// One-line description for help text
    fn description(&self) -> &'static str;

    /// Usage line shown for `--help`
    fn usage(&self) -> &'static str {
        ""
    }

    /// Execute the command
    ///
    /// - `inv`: the parsed command line
    /// - `stdin`: output of the previous pipeline stage, if any
    /// - `ctx`: shell context with per-session state
    fn execute(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError>;
}

// ============================================================================
// Pipeline Parsing
// ============================================================================

/// Split a command into pipeline stages on `|`, trimming each stage
pub fn parse_pipeline(line: &str) -> Vec<&str> {
    line.split('|')
        .map(str::trim)
        .filter(|stage| !stage.is_empty())
        .collect()
}

/// Remove redirections from a stage
///
/// Returns the remaining text and whether stdout was sent elsewhere.
pub fn strip_redirections(stage: &str) -> (String, bool) {
    let mut kept: Vec<&str> = Vec::new();
    let mut stdout_redirected = false;
    let mut tokens = stage.split_whitespace();

    while let Some(token) = tokens.next() {
        let fd_len = token
            .find(|c: char| !(c.is_ascii_digit() || c == '&'))
            .unwrap_or(token.len());
        let (fd, rest) = token.split_at(fd_len);
        let op_len = if rest.starts_with(">>") {
            2
        } else if rest.starts_with('>') || rest.starts_with('<') {
            1
        } else {
            kept.push(token);
            continue;
        };
        let (op, target) = rest.split_at(op_len);

        if target.starts_with('&') {
            // fd duplication such as 2>&1 or >&2
            continue;
        }
        let target = if target.is_empty() {
            tokens.next().unwrap_or("")
        } else {
            target
        };
        let to_stdout_fd = fd.is_empty() || fd == "1" || fd == "&";
        if op.starts_with('>') && to_stdout_fd && target != "/dev/stdout" && target != "/dev/tty" {
            stdout_redirected = true;
        }
    }

    (kept.join(" "), stdout_redirected)
}

// ============================================================================
// Command Chain Parsing
// ============================================================================

/// Operator between chained commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOperator {
    /// `;` or `&` - run the next command regardless
    Sequence,
    /// `&&` - run the next command only if this one succeeded
    And,
    /// `||` - run the next command only if this one failed
    Or,
}

/// A command in a chain, with the operator that follows it
#[derive(Debug, PartialEq, Eq)]
pub struct ChainedCommand<'a> {
    /// The command (may be a pipeline with |, >, >>)
    pub command: &'a str,
    /// The operator that follows this command (None for the last command)
    pub next_operator: Option<ChainOperator>,
}

/// Parse a command line into chained commands
pub fn parse_command_chain(line: &str) -> Vec<ChainedCommand<'_>> {
    let bytes = line.as_bytes();
    let mut commands = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        let prev = if i > 0 { Some(bytes[i - 1]) } else { None };
        let (op, width) = match (bytes[i], next) {
            (b'&', Some(b'&')) => (ChainOperator::And, 2),
            (b'|', Some(b'|')) => (ChainOperator::Or, 2),
            (b';', _) => (ChainOperator::Sequence, 1),
            // `&` inside a redirection (2>&1, &>file) is not a separator
            (b'&', _) if prev != Some(b'>') && next != Some(b'>') => (ChainOperator::Sequence, 1),
            _ => {
                i += 1;
                continue;
            }
        };
        push_chained(&mut commands, &line[start..i], Some(op));
        i += width;
        start = i;
    }
    push_chained(&mut commands, &line[start..], None);

    // A trailing `;` or `&` has nothing after it
    if line[start..].trim().is_empty() {
        if let Some(last) = commands.last_mut() {
            last.next_operator = None;
        }
    }
    commands
}

fn push_chained<'a>(commands: &mut Vec<ChainedCommand<'a>>, text: &'a str, op: Option<ChainOperator>) {
    let command = text.trim();
    if !command.is_empty() {
        commands.push(ChainedCommand {
            command,
            next_operator: op,
        });
    }
}

// ============================================================================
// Interpreter
// ============================================================================

/// What a submitted line produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub output: String,
    pub status: i32,
    /// The line ended the session (`exit`, `logout`)
    pub exit: bool,
}

/// Dispatches command lines to the registry
pub struct Interpreter {
    registry: &'static CommandRegistry,
    delay: Duration,
}

impl Interpreter {
    /// Interpreter over the default command table
    pub fn new(delay: Duration) -> Self {
        Self {
            registry: &REGISTRY,
            delay,
        }
    }

    pub fn registry(&self) -> &'static CommandRegistry {
        self.registry
    }

    /// Run a submitted line after the configured reply delay
    pub async fn execute(&self, line: &str, ctx: &mut ShellContext) -> Outcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.run_line(line, ctx)
    }

    /// Run a line synchronously: chains, then pipelines, then single commands
    pub fn run_line(&self, line: &str, ctx: &mut ShellContext) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome {
                output: String::new(),
                status: ctx.last_status,
                exit: false,
            };
        }
        ctx.history.push(line.to_string());

        let mut outputs: Vec<String> = Vec::new();
        let mut status = ctx.last_status;
        let mut previous: Option<ChainOperator> = None;

        for chained in parse_command_chain(line) {
            let run = match previous {
                None | Some(ChainOperator::Sequence) => true,
                Some(ChainOperator::And) => status == STATUS_OK,
                Some(ChainOperator::Or) => status != STATUS_OK,
            };
            previous = chained.next_operator;
            if !run {
                continue;
            }

            let (text, code, exit) = self.run_pipeline(chained.command, ctx);
            status = code;
            ctx.last_status = code;
            let text = text.strip_suffix('\n').unwrap_or(&text);
            if !text.is_empty() {
                outputs.push(text.to_string());
            }
            if exit {
                return Outcome {
                    output: outputs.join("\n"),
                    status,
                    exit: true,
                };
            }
        }

        Outcome {
            output: outputs.join("\n"),
            status,
            exit: false,
        }
    }

    fn run_pipeline(&self, pipeline: &str, ctx: &mut ShellContext) -> (String, i32, bool) {
        let stages = parse_pipeline(pipeline);
        let single = stages.len() == 1;
        let mut carried: Option<String> = None;
        let mut status = STATUS_OK;

        for stage in stages {
            let (cleaned, redirected) = strip_redirections(stage);
            let expanded = ctx.expand(&cleaned);
            let Some(inv) = Invocation::parse(&expanded) else {
                carried = Some(String::new());
                continue;
            };

            let (text, code) = match self.run_guarded(&inv, carried.as_deref(), ctx) {
                Output::Text { text, status } => (text, status),
                // exit inside a pipeline only leaves the subshell
                Output::Exit if single => return (String::new(), STATUS_OK, true),
                Output::Exit => (String::new(), STATUS_OK),
            };
            status = code;
            carried = Some(if redirected { String::new() } else { text });
        }

        (carried.unwrap_or_default(), status, false)
    }

    /// Dispatch with faults and panics contained to this command
    fn run_guarded(&self, inv: &Invocation, stdin: Option<&str>, ctx: &mut ShellContext) -> Output {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(inv, stdin, ctx)));
        match result {
            Ok(Ok(output)) => output,
            Ok(Err(ShellError::UnknownCommand(name))) => {
                Output::with_status(format!("bash: {}: command not found", name), STATUS_NOT_FOUND)
            }
            Ok(Err(ShellError::Fault(reason))) => {
                tracing::error!(
                    session = %ctx.events.session(),
                    command = %inv.raw,
                    %reason,
                    "command fault"
                );
                io_error(inv)
            }
            Err(_) => {
                tracing::error!(
                    session = %ctx.events.session(),
                    command = %inv.raw,
                    "command panicked"
                );
                io_error(inv)
            }
        }
    }

    /// Look up and run one command
    pub fn dispatch(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let name = inv.name();

        if name == "sudo" {
            if let Some(inner) = strip_sudo(inv) {
                let saved = std::mem::replace(&mut ctx.username, String::from("root"));
                let result = self.dispatch(&inner, stdin, ctx);
                ctx.username = saved;
                return result;
            }
        }

        if inv.command.contains('/') {
            return self.dispatch_path(inv, stdin, ctx);
        }

        let command = self
            .registry
            .find(&name)
            // not-found text keeps the name as typed
            .ok_or_else(|| ShellError::UnknownCommand(inv.command.clone()))?;

        if inv.has_flag("--help") && !command.usage().is_empty() {
            return Ok(Output::ok(format!("Usage: {}", command.usage())));
        }
        command.execute(inv, stdin, ctx)
    }

    /// A command token with a slash names a file in the VFS
    fn dispatch_path(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let path = ctx.resolve_path(&inv.command);
        let node = match ctx.fs.get(&path) {
            Ok(node) => node,
            Err(_) => {
                return Ok(Output::with_status(
                    format!("bash: {}: No such file or directory", inv.command),
                    STATUS_NOT_FOUND,
                ));
            }
        };
        if node.is_dir() {
            return Ok(Output::with_status(
                format!("bash: {}: Is a directory", inv.command),
                STATUS_NOT_EXECUTABLE,
            ));
        }
        let base = vfs::basename(&path).to_string();
        if node.is_executable() && self.registry.find(&base).is_some() {
            let mut rebased = inv.clone();
            rebased.command = base;
            return self.dispatch(&rebased, stdin, ctx);
        }
        Ok(Output::with_status(
            format!("bash: {}: Permission denied", inv.command),
            STATUS_NOT_EXECUTABLE,
        ))
    }
}

fn io_error(inv: &Invocation) -> Output {
    Output::fail(format!("-bash: {}: Input/output error", inv.command))
}

/// `sudo [-flags] cmd args` becomes `cmd args`; `None` when nothing follows
fn strip_sudo(inv: &Invocation) -> Option<Invocation> {
    const VALUED: &[&str] = &["-u", "-g", "-C", "-p", "-h", "-U"];
    let mut words = inv.words.iter();
    let mut rest: Vec<&str> = Vec::new();
    while let Some(word) = words.next() {
        if VALUED.contains(&word.as_str()) {
            words.next();
            continue;
        }
        if word.starts_with('-') {
            continue;
        }
        rest.push(word);
        rest.extend(words.map(String::as_str));
        break;
    }
    if rest.is_empty() {
        return None;
    }
    Invocation::parse(&rest.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invocation() {
        let inv = Invocation::parse("  LS -la /tmp  ").unwrap();
        assert_eq!(inv.command, "LS");
        assert_eq!(inv.name(), "ls");
        assert_eq!(inv.args, vec!["/tmp"]);
        assert!(inv.has_flag("-la"));
        assert!(inv.has_short('l') && inv.has_short('a'));
        assert!(Invocation::parse("   ").is_none());
    }

    #[test]
    fn test_parse_strips_matching_quotes() {
        let inv = Invocation::parse("echo \"hi\" 'there' it's").unwrap();
        assert_eq!(inv.args, vec!["hi", "there", "it's"]);
    }

    #[test]
    fn test_quotes_do_not_group_words() {
        let inv = Invocation::parse("echo \"a b\" 'c'").unwrap();
        assert_eq!(inv.args, vec!["\"a", "b\"", "c"]);
    }

    #[test]
    fn test_value_after_and_operands() {
        let inv = Invocation::parse("find / -name *.sh -type f").unwrap();
        assert_eq!(inv.value_after("-name"), Some("*.sh"));
        assert_eq!(inv.operands(&["-name", "-type"]), vec!["/"]);
    }

    #[test]
    fn test_parse_pipeline() {
        assert_eq!(parse_pipeline("cat x | grep y |  wc"), vec!["cat x", "grep y", "wc"]);
        assert_eq!(parse_pipeline("ls"), vec!["ls"]);
    }

    #[test]
    fn test_parse_command_chain() {
        let chain = parse_command_chain("cd /tmp;wget http://a/b && chmod +x b || echo no & id");
        let cmds: Vec<_> = chain.iter().map(|c| (c.command, c.next_operator)).collect();
        assert_eq!(
            cmds,
            vec![
                ("cd /tmp", Some(ChainOperator::Sequence)),
                ("wget http://a/b", Some(ChainOperator::And)),
                ("chmod +x b", Some(ChainOperator::Or)),
                ("echo no", Some(ChainOperator::Sequence)),
                ("id", None),
            ]
        );
    }

    #[test]
    fn test_chain_keeps_redirect_ampersands() {
        let chain = parse_command_chain("wget x >/dev/null 2>&1 &");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].command, "wget x >/dev/null 2>&1");
        assert_eq!(chain[0].next_operator, None);
    }

    #[test]
    fn test_strip_redirections() {
        assert_eq!(strip_redirections("echo hi > /tmp/x"), ("echo hi".to_string(), true));
        assert_eq!(strip_redirections("echo hi >>/tmp/x"), ("echo hi".to_string(), true));
        assert_eq!(strip_redirections("ls /nope 2>/dev/null"), ("ls /nope".to_string(), false));
        assert_eq!(strip_redirections("id 2>&1"), ("id".to_string(), false));
        assert_eq!(strip_redirections("cat < /etc/passwd"), ("cat".to_string(), false));
        assert_eq!(strip_redirections("uname -a"), ("uname -a".to_string(), false));
    }

    #[test]
    fn test_strip_sudo() {
        let inv = Invocation::parse("sudo -u root -n whoami").unwrap();
        assert_eq!(strip_sudo(&inv).unwrap().raw, "whoami");
        let inv = Invocation::parse("sudo -l").unwrap();
        assert!(strip_sudo(&inv).is_none());
    }
}
