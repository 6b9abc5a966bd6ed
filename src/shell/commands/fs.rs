//! Filesystem Commands
//!
//! Commands for walking the virtual filesystem: pwd, cd, ls, cat, echo,
//! find, grep

use crate::shell::{Command, Invocation, Output, ShellContext, ShellError, STATUS_FAILURE, STATUS_OK};
use crate::vfs::{self, FsError, IMAGE_MTIME, Node};

/// Whether the session user may read `node` at `path`
///
/// Everything under the home root is readable; elsewhere non-root users
/// need the world-read bit.
fn can_read(ctx: &ShellContext, path: &str, node: &Node) -> bool {
    ctx.is_root()
        || node.mode & 0o004 != 0
        || path == ctx.fs.home()
        || path.starts_with(&format!("{}/", ctx.fs.home()))
}

/// `ls` ordering: case-insensitive, ignoring leading dots
fn sort_key(name: &str) -> String {
    name.trim_start_matches('.').to_lowercase()
}

// ============================================================================
// Pwd Command
// ============================================================================

/// Pwd command - print working directory
pub struct PwdCommand;

impl Command for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }
    fn description(&self) -> &'static str {
        "Print working directory"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        Ok(Output::ok(ctx.cwd()))
    }
}

/// Static instance
pub static PWD_CMD: PwdCommand = PwdCommand;

// ============================================================================
// Cd Command
// ============================================================================

/// Cd command - change working directory
pub struct CdCommand;

impl Command for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }
    fn description(&self) -> &'static str {
        "Change working directory"
    }
    fn usage(&self) -> &'static str {
        "cd [dir]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let previous = ctx.cwd().to_string();
        let (target, announce) = match inv.args.first().map(String::as_str) {
            None => (ctx.fs.home().to_string(), false),
            Some("-") => match ctx.env.get("OLDPWD") {
                Some(old) => (old.clone(), true),
                None => return Ok(Output::fail("bash: cd: OLDPWD not set")),
            },
            Some(dir) => (dir.to_string(), false),
        };

        match ctx.fs.change_directory(&target) {
            Ok(now) => {
                ctx.env.insert("OLDPWD".to_string(), previous);
                ctx.env.insert("PWD".to_string(), now.clone());
                Ok(Output::ok(if announce { now } else { String::new() }))
            }
            Err(e) => Ok(Output::fail(format!("bash: cd: {}: {}", target, e))),
        }
    }
}

/// Static instance
pub static CD_CMD: CdCommand = CdCommand;

// ============================================================================
// Ls Command
// ============================================================================

/// Ls command - list directory contents
pub struct LsCommand;

impl LsCommand {
    fn long_entry(ctx: &ShellContext, path: &str, shown: &str, size_width: usize) -> String {
        let Ok(node) = ctx.fs.get(path) else {
            return String::new();
        };
        let links = if node.is_dir() {
            2 + ctx
                .fs
                .list(path)
                .map(|children| {
                    children
                        .iter()
                        .filter(|c| ctx.fs.get(&format!("{}/{}", path, c)).is_ok_and(Node::is_dir))
                        .count()
                })
                .unwrap_or(0)
        } else {
            1
        };
        let size = ctx.fs.size_of(path).unwrap_or(0);
        let date = if node.volatile {
            chrono::Local::now().format("%b %e %H:%M").to_string()
        } else {
            IMAGE_MTIME.to_string()
        };
        format!(
            "{} {:>2} {} {} {:>width$} {} {}",
            node.mode_string(),
            links,
            node.owner,
            node.owner,
            size,
            date,
            shown,
            width = size_width
        )
    }

    fn list_directory(ctx: &ShellContext, inv: &Invocation, path: &str) -> Result<String, FsError> {
        let mut names = ctx.fs.list(path)?;
        let show_hidden = inv.has_short('a') || inv.has_short('A');
        names.retain(|n| show_hidden || !n.starts_with('.'));
        names.sort_by_key(|n| sort_key(n));
        if inv.has_short('r') {
            names.reverse();
        }

        let mut entries: Vec<(String, String)> = names
            .into_iter()
            .map(|n| (format!("{}/{}", path.trim_end_matches('/'), n), n))
            .collect();
        if inv.has_short('a') {
            entries.insert(0, (ctx.fs.normalize(&format!("{}/..", path)), "..".to_string()));
            entries.insert(0, (path.to_string(), ".".to_string()));
        }

        if !inv.has_short('l') {
            let names: Vec<&str> = entries.iter().map(|(_, n)| n.as_str()).collect();
            return Ok(names.join("  "));
        }

        let sizes: Vec<usize> = entries
            .iter()
            .map(|(p, _)| ctx.fs.size_of(p).unwrap_or(0))
            .collect();
        let width = sizes.iter().map(|s| s.to_string().len()).max().unwrap_or(1);
        let blocks: usize = sizes.iter().map(|s| s.div_ceil(4096) * 4).sum();

        let mut lines = vec![format!("total {}", blocks)];
        for (p, name) in &entries {
            lines.push(Self::long_entry(ctx, p, name, width));
        }
        Ok(lines.join("\n"))
    }
}

impl Command for LsCommand {
    fn name(&self) -> &'static str {
        "ls"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["dir", "ll"]
    }
    fn description(&self) -> &'static str {
        "List directory contents"
    }
    fn usage(&self) -> &'static str {
        "ls [OPTION]... [FILE]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mut inv = inv.clone();
        if inv.name() == "ll" {
            inv.flags.insert("-alF".to_string());
        }
        let targets: Vec<String> = if inv.args.is_empty() {
            vec![String::from(".")]
        } else {
            inv.args.clone()
        };

        let mut sections = Vec::new();
        let mut status = STATUS_OK;
        for target in &targets {
            let path = ctx.resolve_path(target);
            let node = match ctx.fs.get(&path) {
                Ok(node) => node,
                Err(_) => {
                    sections.push(format!("ls: cannot access '{}': No such file or directory", target));
                    status = 2;
                    continue;
                }
            };
            if !node.is_dir() {
                sections.push(if inv.has_short('l') {
                    Self::long_entry(ctx, &path, target, 1)
                } else {
                    target.clone()
                });
                continue;
            }
            if !can_read(ctx, &path, node) {
                sections.push(format!("ls: cannot open directory '{}': Permission denied", target));
                status = 2;
                continue;
            }
            let body = Self::list_directory(ctx, &inv, &path)?;
            if targets.len() > 1 {
                sections.push(format!("{}:\n{}", target, body));
            } else {
                sections.push(body);
            }
        }

        let separator = if targets.len() > 1 { "\n\n" } else { "\n" };
        Ok(Output::with_status(sections.join(separator), status))
    }
}

/// Static instance
pub static LS_CMD: LsCommand = LsCommand;

// ============================================================================
// Cat Command
// ============================================================================

/// Cat command - display file contents
pub struct CatCommand;

impl Command for CatCommand {
    fn name(&self) -> &'static str {
        "cat"
    }
    fn description(&self) -> &'static str {
        "Display file contents"
    }
    fn usage(&self) -> &'static str {
        "cat [FILE]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.args.is_empty() {
            return Ok(Output::ok(stdin.unwrap_or("")));
        }

        let mut out = String::new();
        let mut status = STATUS_OK;
        for arg in &inv.args {
            if arg == "-" {
                out.push_str(stdin.unwrap_or(""));
                continue;
            }
            let path = ctx.resolve_path(arg);
            let message = match ctx.fs.get(&path) {
                Err(e) => Some(e.to_string()),
                Ok(node) if node.is_dir() => Some(FsError::NotAFile.to_string()),
                Ok(node) if !can_read(ctx, &path, node) => Some("Permission denied".to_string()),
                Ok(_) => None,
            };
            match message {
                Some(message) => {
                    out.push_str(&format!("cat: {}: {}\n", arg, message));
                    status = STATUS_FAILURE;
                }
                None => out.push_str(&ctx.fs.read(&path, &mut ctx.rng)?),
            }
        }
        Ok(Output::with_status(out, status))
    }
}

/// Static instance
pub static CAT_CMD: CatCommand = CatCommand;

// ============================================================================
// Echo Command
// ============================================================================

/// Echo command - echoes text back, with variables already expanded
pub struct EchoCommand;

impl Command for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn description(&self) -> &'static str {
        "Echo back text"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        _ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mut escapes = false;
        let mut words = inv.words.iter().peekable();
        while let Some(word) = words.peek() {
            match word.as_str() {
                "-n" | "-E" => {}
                "-e" | "-ne" | "-en" => escapes = true,
                _ => break,
            }
            words.next();
        }
        let text = words.map(String::as_str).collect::<Vec<_>>().join(" ");
        if escapes {
            return Ok(Output::ok(text.replace("\\n", "\n").replace("\\t", "\t")));
        }
        Ok(Output::ok(text))
    }
}

/// Static instance
pub static ECHO_CMD: EchoCommand = EchoCommand;

// ============================================================================
// Find Command
// ============================================================================

/// Shell-style wildcard match supporting `*` and `?`
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Find command - search the tree by name and type
pub struct FindCommand;

impl Command for FindCommand {
    fn name(&self) -> &'static str {
        "find"
    }
    fn description(&self) -> &'static str {
        "Search for files in a directory hierarchy"
    }
    fn usage(&self) -> &'static str {
        "find [path...] [-name PATTERN] [-iname PATTERN] [-type f|d] [-maxdepth N]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mut roots: Vec<&str> = inv
            .words
            .iter()
            .take_while(|w| !w.starts_with('-') && *w != "!" && *w != "(")
            .map(String::as_str)
            .collect();
        if roots.is_empty() {
            roots.push(".");
        }

        let name = inv.value_after("-name");
        let iname = inv.value_after("-iname").map(str::to_lowercase);
        let kind = inv.value_after("-type");
        let max_depth = inv.value_after("-maxdepth").and_then(|d| d.parse::<usize>().ok());

        let mut lines = Vec::new();
        let mut status = STATUS_OK;
        for root in roots {
            let start = ctx.resolve_path(root);
            let paths = match ctx.fs.walk(&start) {
                Ok(paths) => paths,
                Err(_) => {
                    lines.push(format!("find: '{}': No such file or directory", root));
                    status = STATUS_FAILURE;
                    continue;
                }
            };
            for path in paths {
                let rel = path
                    .strip_prefix(start.as_str())
                    .unwrap_or(&path)
                    .trim_start_matches('/');
                let depth = if rel.is_empty() { 0 } else { rel.split('/').count() };
                if max_depth.is_some_and(|max| depth > max) {
                    continue;
                }
                let Ok(node) = ctx.fs.get(&path) else {
                    continue;
                };
                let base = vfs::basename(&path);
                if name.is_some_and(|pattern| !wildcard_match(pattern, base)) {
                    continue;
                }
                if iname
                    .as_deref()
                    .is_some_and(|pattern| !wildcard_match(pattern, &base.to_lowercase()))
                {
                    continue;
                }
                match kind {
                    Some("f") if node.is_dir() => continue,
                    Some("d") if !node.is_dir() => continue,
                    _ => {}
                }
                let shown = if rel.is_empty() {
                    root.to_string()
                } else if root.ends_with('/') {
                    format!("{}{}", root, rel)
                } else {
                    format!("{}/{}", root, rel)
                };
                lines.push(shown);
            }
        }
        Ok(Output::with_status(lines.join("\n"), status))
    }
}

/// Static instance
pub static FIND_CMD: FindCommand = FindCommand;

// ============================================================================
// Grep Command
// ============================================================================

/// A literal pattern with optional `^`/`$` anchors
struct LinePattern {
    needle: String,
    start: bool,
    end: bool,
    ignore_case: bool,
}

impl LinePattern {
    fn new(pattern: &str, ignore_case: bool) -> Self {
        let start = pattern.starts_with('^');
        let end = pattern.len() > 1 && pattern.ends_with('$');
        let mut needle = pattern.trim_start_matches('^');
        if end {
            needle = &needle[..needle.len() - 1];
        }
        let needle = if ignore_case {
            needle.to_lowercase()
        } else {
            needle.to_string()
        };
        Self {
            needle,
            start,
            end,
            ignore_case,
        }
    }

    fn matches(&self, line: &str) -> bool {
        let folded;
        let line = if self.ignore_case {
            folded = line.to_lowercase();
            folded.as_str()
        } else {
            line
        };
        match (self.start, self.end) {
            (true, true) => line == self.needle,
            (true, false) => line.starts_with(&self.needle),
            (false, true) => line.ends_with(&self.needle),
            (false, false) => line.contains(&self.needle),
        }
    }
}

/// Grep command - search for patterns in files or stdin
pub struct GrepCommand;

impl Command for GrepCommand {
    fn name(&self) -> &'static str {
        "grep"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["egrep", "fgrep"]
    }
    fn description(&self) -> &'static str {
        "Search for patterns in files or stdin"
    }
    fn usage(&self) -> &'static str {
        "grep [-i] [-v] [-c] [-n] [-q] PATTERN [FILE]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mut operands = inv.operands(&["-e", "-m", "-A", "-B", "-C"]);
        let pattern = match inv.value_after("-e") {
            Some(p) => p.to_string(),
            None if !operands.is_empty() => operands.remove(0).to_string(),
            None => {
                return Ok(Output::with_status(
                    "Usage: grep [OPTION]... PATTERNS [FILE]...\nTry 'grep --help' for more information.",
                    2,
                ));
            }
        };
        let matcher = LinePattern::new(&pattern, inv.has_short('i'));
        let invert = inv.has_short('v');
        let count_only = inv.has_short('c');
        let numbered = inv.has_short('n');
        let quiet = inv.has_short('q');

        let mut sources: Vec<(String, Result<String, String>)> = Vec::new();
        if operands.is_empty() {
            sources.push((String::from("(standard input)"), Ok(stdin.unwrap_or("").to_string())));
        }
        for file in &operands {
            let path = ctx.resolve_path(file);
            let content = match ctx.fs.get(&path) {
                Err(e) => Err(e.to_string()),
                Ok(node) if node.is_dir() => Err(FsError::NotAFile.to_string()),
                Ok(node) if !can_read(ctx, &path, node) => Err("Permission denied".to_string()),
                Ok(_) => Ok(ctx.fs.read(&path, &mut ctx.rng)?),
            };
            sources.push((file.to_string(), content));
        }

        let label = operands.len() > 1;
        let mut out = Vec::new();
        let mut matched = false;
        let mut errored = false;
        for (name, content) in sources {
            let content = match content {
                Ok(text) => text,
                Err(message) => {
                    out.push(format!("grep: {}: {}", name, message));
                    errored = true;
                    continue;
                }
            };
            let mut count = 0;
            for (idx, line) in content.lines().enumerate() {
                if matcher.matches(line) == invert {
                    continue;
                }
                count += 1;
                if count_only || quiet {
                    continue;
                }
                let mut shown = String::new();
                if label {
                    shown.push_str(&format!("{}:", name));
                }
                if numbered {
                    shown.push_str(&format!("{}:", idx + 1));
                }
                shown.push_str(line);
                out.push(shown);
            }
            matched |= count > 0;
            if count_only && !quiet {
                out.push(if label { format!("{}:{}", name, count) } else { count.to_string() });
            }
        }

        let status = if matched {
            STATUS_OK
        } else if errored {
            2
        } else {
            STATUS_FAILURE
        };
        Ok(Output::with_status(out.join("\n"), status))
    }
}

/// Static instance
pub static GREP_CMD: GrepCommand = GrepCommand;
