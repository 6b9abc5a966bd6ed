//! System Commands
//!
//! System information tables (uname, hostname, uptime, free, top, df, ps),
//! shell builtins, and file mutators that report success without changing
//! anything.

use chrono::{Duration as ChronoDuration, Local};
use rand::Rng;

use crate::persona::{Arch, Persona};
use crate::shell::{
    Command, Invocation, Output, STATUS_FAILURE, STATUS_NOT_FOUND, ShellContext, ShellError,
};
use crate::vfs::{self, load_average, memory_snapshot};

use super::REGISTRY;

// ============================================================================
// Shared Fabrication Helpers
// ============================================================================

/// ` 3 days,  4:05` style span used by uptime and top
fn uptime_span(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let mins = (secs % 3600) / 60;
    match days {
        0 => format!("{:>2}:{:02}", hours, mins),
        1 => format!("1 day, {:>2}:{:02}", hours, mins),
        d => format!("{} days, {:>2}:{:02}", d, hours, mins),
    }
}

/// `free -h` style size from KiB
fn human_kib(kb: u64) -> String {
    if kb == 0 {
        return String::from("0B");
    }
    let mib = kb as f64 / 1024.0;
    if mib < 1.0 {
        format!("{}Ki", kb)
    } else if mib < 10.0 {
        format!("{:.1}Mi", mib)
    } else if mib < 1024.0 {
        format!("{:.0}Mi", mib)
    } else {
        format!("{:.1}Gi", mib / 1024.0)
    }
}

/// `df -h` style size from 1K blocks
fn human_blocks(kb: u64) -> String {
    if kb == 0 {
        return String::from("0");
    }
    let mut value = kb as f64;
    let mut unit = 0;
    const UNITS: [char; 4] = ['K', 'M', 'G', 'T'];
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{:.1}{}", value, UNITS[unit])
    } else {
        format!("{:.0}{}", value, UNITS[unit])
    }
}

/// A fabricated process table row
struct Process {
    pid: u32,
    ppid: u32,
    user: String,
    vsz: u64,
    rss: u64,
    tty: &'static str,
    stat: &'static str,
    session: bool,
    command: String,
}

fn daemons(persona: &Persona) -> &'static [(u32, &'static str, u64, u64, &'static str)] {
    match persona.arch {
        Arch::Armv7l => &[
            (1, "/sbin/init splash", 33_700, 8_020, "Ss"),
            (2, "[kthreadd]", 0, 0, "S"),
            (9, "[ksoftirqd/0]", 0, 0, "S"),
            (118, "/lib/systemd/systemd-journald", 35_852, 7_412, "Ss"),
            (152, "/lib/systemd/systemd-udevd", 18_636, 3_932, "Ss"),
            (341, "/usr/sbin/cron -f", 7_752, 2_208, "Ss"),
            (349, "avahi-daemon: running [raspberrypi.local]", 6_064, 2_628, "Ss"),
            (362, "/usr/sbin/rsyslogd -n -iNONE", 27_808, 3_360, "Ssl"),
            (412, "/sbin/dhcpcd -q -w", 3_284, 1_740, "Ss"),
            (421, "/sbin/wpa_supplicant -u -s -O /run/wpa_supplicant", 10_508, 3_608, "Ss"),
            (498, "sshd: /usr/sbin/sshd -D [listener] 0 of 10-100 startups", 12_164, 5_760, "Ss"),
        ],
        Arch::X86_64 => &[
            (1, "/sbin/init maybe-ubiquity", 169_520, 13_112, "Ss"),
            (2, "[kthreadd]", 0, 0, "S"),
            (10, "[ksoftirqd/0]", 0, 0, "S"),
            (386, "/lib/systemd/systemd-journald", 51_412, 17_600, "S<s"),
            (417, "/lib/systemd/systemd-udevd", 21_868, 5_632, "Ss"),
            (571, "/sbin/multipathd -d -s", 280_180, 18_000, "SLsl"),
            (612, "/lib/systemd/systemd-networkd", 26_732, 7_680, "Ss"),
            (614, "/lib/systemd/systemd-resolved", 24_028, 12_672, "Ss"),
            (702, "/usr/sbin/cron -f", 8_536, 3_012, "Ss"),
            (709, "/usr/sbin/rsyslogd -n -iNONE", 224_344, 4_632, "Ssl"),
            (718, "/usr/lib/snapd/snapd", 1_317_676, 35_104, "Ssl"),
            (801, "sshd: /usr/sbin/sshd -D [listener] 0 of 10-100 startups", 12_184, 7_468, "Ss"),
        ],
        Arch::Mips => &[
            (1, "/sbin/procd", 1_544, 960, "S"),
            (2, "[kthreadd]", 0, 0, "SW"),
            (448, "/sbin/ubusd", 1_184, 664, "S"),
            (617, "/sbin/logd -S 64", 1_260, 700, "S"),
            (664, "/sbin/netifd", 1_700, 1_112, "S"),
            (1024, "/usr/sbin/dropbear -F -P /var/run/dropbear.1.pid -p 22 -K 300 -T 3", 1_048, 556, "S"),
            (1203, "/usr/sbin/uhttpd -f -h /www -r camera01 -p 0.0.0.0:80", 1_540, 824, "S"),
            (1388, "/usr/sbin/dnsmasq -C /var/etc/dnsmasq.conf.cfg01411c", 1_320, 788, "S"),
        ],
    }
}

fn process_table(ctx: &mut ShellContext, own: &str) -> Vec<Process> {
    let persona = ctx.persona();
    let listener = daemons(persona)
        .iter()
        .find(|d| d.1.contains("sshd") || d.1.contains("dropbear"))
        .map(|d| d.0)
        .unwrap_or(1);

    let mut rows: Vec<Process> = daemons(persona)
        .iter()
        .map(|&(pid, command, vsz, rss, stat)| Process {
            pid,
            ppid: if pid <= 2 { 0 } else if command.starts_with('[') { 2 } else { 1 },
            user: "root".to_string(),
            vsz,
            rss,
            tty: "?",
            stat,
            session: false,
            command: command.to_string(),
        })
        .collect();

    let shell = ctx.pid;
    let sshd = shell - ctx.rng.gen_range(5..12);
    rows.push(Process {
        pid: sshd,
        ppid: listener,
        user: "root".to_string(),
        vsz: 13_900,
        rss: 8_200,
        tty: "?",
        stat: "Ss",
        session: true,
        command: format!("sshd: {}@pts/0", ctx.username),
    });
    rows.push(Process {
        pid: shell,
        ppid: sshd,
        user: ctx.username.clone(),
        vsz: 8_660,
        rss: 4_980,
        tty: "pts/0",
        stat: "Ss",
        session: true,
        command: "-bash".to_string(),
    });
    rows.push(Process {
        pid: shell + ctx.rng.gen_range(20..400),
        ppid: shell,
        user: ctx.username.clone(),
        vsz: 10_700,
        rss: 3_150,
        tty: "pts/0",
        stat: "R+",
        session: true,
        command: own.to_string(),
    });
    rows
}

// ============================================================================
// Uname Command
// ============================================================================

/// Uname command - print system information
pub struct UnameCommand;

impl Command for UnameCommand {
    fn name(&self) -> &'static str {
        "uname"
    }
    fn description(&self) -> &'static str {
        "Print system information"
    }
    fn usage(&self) -> &'static str {
        "uname [OPTION]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        if inv.has_short('a') || inv.has_flag("--all") {
            return Ok(Output::ok(persona.kernel));
        }

        for c in inv.short_flags() {
            if !"snrvmpio".contains(c) {
                return Ok(Output::fail(format!(
                    "uname: invalid option -- '{}'\nTry 'uname --help' for more information.",
                    c
                )));
            }
        }

        let processor = if persona.arch == Arch::X86_64 {
            persona.arch.as_str()
        } else {
            "unknown"
        };
        let fields = [
            ('s', "Linux"),
            ('n', persona.hostname),
            ('r', persona.kernel_release()),
            ('v', persona.kernel_build),
            ('m', persona.arch.as_str()),
            ('p', processor),
            ('i', processor),
            ('o', "GNU/Linux"),
        ];
        let selected: Vec<&str> = fields
            .iter()
            .filter(|(flag, _)| inv.has_short(*flag))
            .map(|(_, value)| *value)
            .collect();
        if selected.is_empty() {
            return Ok(Output::ok("Linux"));
        }
        Ok(Output::ok(selected.join(" ")))
    }
}

/// Static instance
pub static UNAME_CMD: UnameCommand = UnameCommand;

// ============================================================================
// Hostname Command
// ============================================================================

/// Hostname command - show the system host name
pub struct HostnameCommand;

impl Command for HostnameCommand {
    fn name(&self) -> &'static str {
        "hostname"
    }
    fn description(&self) -> &'static str {
        "Show the system host name"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        if inv.has_short('I') {
            return Ok(Output::ok(format!("{} ", persona.ip_address)));
        }
        if inv.has_short('i') {
            return Ok(Output::ok("127.0.1.1"));
        }
        if !inv.args.is_empty() {
            return Ok(Output::fail(
                "hostname: you must be root to change the host name",
            ));
        }
        Ok(Output::ok(persona.hostname))
    }
}

/// Static instance
pub static HOSTNAME_CMD: HostnameCommand = HostnameCommand;

// ============================================================================
// Uptime Command
// ============================================================================

/// Uptime command - show how long the system has been running
pub struct UptimeCommand;

impl Command for UptimeCommand {
    fn name(&self) -> &'static str {
        "uptime"
    }
    fn description(&self) -> &'static str {
        "Tell how long the system has been running"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let up = vfs::system_uptime(ctx.persona()).as_secs();
        let now = Local::now();

        if inv.has_short('s') {
            let boot = now - ChronoDuration::seconds(up as i64);
            return Ok(Output::ok(boot.format("%Y-%m-%d %H:%M:%S").to_string()));
        }
        if inv.has_short('p') {
            let days = up / 86_400;
            let hours = (up % 86_400) / 3600;
            let mins = (up % 3600) / 60;
            let plural = |n: u64, unit: &str| format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" });
            let mut parts = Vec::new();
            if days > 0 {
                parts.push(plural(days, "day"));
            }
            if hours > 0 {
                parts.push(plural(hours, "hour"));
            }
            parts.push(plural(mins, "minute"));
            return Ok(Output::ok(format!("up {}", parts.join(", "))));
        }

        let (a, b, c) = load_average(&mut ctx.rng);
        Ok(Output::ok(format!(
            " {} up {},  1 user,  load average: {:.2}, {:.2}, {:.2}",
            now.format("%H:%M:%S"),
            uptime_span(up),
            a,
            b,
            c
        )))
    }
}

/// Static instance
pub static UPTIME_CMD: UptimeCommand = UptimeCommand;

// ============================================================================
// Free Command
// ============================================================================

/// Free command - display memory usage
pub struct FreeCommand;

impl Command for FreeCommand {
    fn name(&self) -> &'static str {
        "free"
    }
    fn description(&self) -> &'static str {
        "Display amount of free and used memory"
    }
    fn usage(&self) -> &'static str {
        "free [options]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mem = memory_snapshot(ctx.persona(), &mut ctx.rng);
        let render = |kb: u64| -> String {
            if inv.has_short('h') {
                human_kib(kb)
            } else if inv.has_short('g') {
                (kb / 1_048_576).to_string()
            } else if inv.has_short('m') {
                (kb / 1024).to_string()
            } else {
                kb.to_string()
            }
        };

        let mut lines = vec![format!(
            "{:>19}{:>12}{:>12}{:>12}{:>12}{:>12}",
            "total", "used", "free", "shared", "buff/cache", "available"
        )];
        lines.push(format!(
            "{:<7}{:>12}{:>12}{:>12}{:>12}{:>12}{:>12}",
            "Mem:",
            render(mem.total),
            render(mem.used),
            render(mem.free),
            render(mem.shared),
            render(mem.buff_cache),
            render(mem.available)
        ));
        lines.push(format!(
            "{:<7}{:>12}{:>12}{:>12}",
            "Swap:",
            render(mem.swap_total),
            render(0),
            render(mem.swap_total)
        ));
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static FREE_CMD: FreeCommand = FreeCommand;

// ============================================================================
// Top Command
// ============================================================================

/// Top command - one batch-mode snapshot
pub struct TopCommand;

impl Command for TopCommand {
    fn name(&self) -> &'static str {
        "top"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["htop"]
    }
    fn description(&self) -> &'static str {
        "Display Linux processes"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        let up = vfs::system_uptime(persona).as_secs();
        let (a, b, c) = load_average(&mut ctx.rng);
        let mem = memory_snapshot(persona, &mut ctx.rng);
        let user_cpu: f64 = ctx.rng.gen_range(0.5..4.0);
        let sys_cpu: f64 = ctx.rng.gen_range(0.2..1.5);
        let wait: f64 = ctx.rng.gen_range(0.0..0.4);
        let idle = 100.0 - user_cpu - sys_cpu - wait;
        let procs = process_table(ctx, "top");
        let tasks = procs.len() + ctx.rng.gen_range(60..90);
        let mib = |kb: u64| kb as f64 / 1024.0;

        let mut lines = vec![
            format!(
                "top - {} up {},  1 user,  load average: {:.2}, {:.2}, {:.2}",
                Local::now().format("%H:%M:%S"),
                uptime_span(up),
                a,
                b,
                c
            ),
            format!(
                "Tasks: {:>3} total,   1 running, {:>3} sleeping,   0 stopped,   0 zombie",
                tasks,
                tasks - 1
            ),
            format!(
                "%Cpu(s): {:>4.1} us, {:>4.1} sy,  0.0 ni, {:>4.1} id, {:>4.1} wa,  0.0 hi,  0.0 si,  0.0 st",
                user_cpu, sys_cpu, idle, wait
            ),
            format!(
                "MiB Mem : {:>8.1} total, {:>8.1} free, {:>8.1} used, {:>8.1} buff/cache",
                mib(mem.total),
                mib(mem.free),
                mib(mem.used),
                mib(mem.buff_cache)
            ),
            format!(
                "MiB Swap: {:>8.1} total, {:>8.1} free, {:>8.1} used. {:>8.1} avail Mem",
                mib(mem.swap_total),
                mib(mem.swap_total),
                0.0,
                mib(mem.available)
            ),
            String::new(),
            String::from("    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND"),
        ];
        for p in procs.iter().rev().filter(|p| p.vsz > 0).take(10) {
            let name = p
                .command
                .split_whitespace()
                .next()
                .map(|c| c.rsplit('/').next().unwrap_or(c))
                .unwrap_or("")
                .trim_end_matches(':')
                .trim_start_matches('-');
            lines.push(format!(
                "{:>7} {:<9} 20   0 {:>7} {:>6} {:>6} {} {:>5.1} {:>5.1} {:>9} {}",
                p.pid,
                p.user,
                p.vsz,
                p.rss,
                p.rss * 3 / 4,
                if p.stat.starts_with('R') { 'R' } else { 'S' },
                if p.stat.starts_with('R') { 0.7 } else { 0.0 },
                p.rss as f64 * 100.0 / mem.total as f64,
                "0:00.41",
                name
            ));
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static TOP_CMD: TopCommand = TopCommand;

// ============================================================================
// Df Command
// ============================================================================

/// Df command - report filesystem disk space usage
pub struct DfCommand;

impl Command for DfCommand {
    fn name(&self) -> &'static str {
        "df"
    }
    fn description(&self) -> &'static str {
        "Report file system disk space usage"
    }
    fn usage(&self) -> &'static str {
        "df [OPTION]... [FILE]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        let human = inv.has_short('h');
        let mem = persona.mem_total_kb;

        let mut rows: Vec<(String, u64, u64, String)> = Vec::new();
        for mount in persona.mounts {
            let (lo, hi) = mount.used_percent;
            let pct = u64::from(ctx.rng.gen_range(lo..=hi));
            let used = mount.size_kb * pct / 100 + ctx.rng.gen_range(0..512);
            rows.push((
                mount.device.to_string(),
                mount.size_kb,
                used.min(mount.size_kb),
                mount.mount_point.to_string(),
            ));
        }
        let tmpfs_rows: Vec<(&str, u64, &str)> = match persona.arch {
            Arch::Mips => vec![("tmpfs", mem / 2, "/tmp"), ("tmpfs", 512, "/dev")],
            _ => vec![
                ("devtmpfs", mem * 4 / 10, "/dev"),
                ("tmpfs", mem / 2, "/dev/shm"),
                ("tmpfs", mem / 5, "/run"),
            ],
        };
        for (device, size, mount_point) in tmpfs_rows {
            let used = if mount_point == "/run" || mount_point == "/tmp" {
                ctx.rng.gen_range(100..2_000)
            } else {
                0
            };
            rows.push((device.to_string(), size, used, mount_point.to_string()));
        }

        let mut lines = vec![if human {
            String::from("Filesystem      Size  Used Avail Use% Mounted on")
        } else {
            String::from("Filesystem     1K-blocks     Used Available Use% Mounted on")
        }];
        for (device, size, used, mount_point) in rows {
            let avail = size - used;
            let pct = if size == 0 { 0 } else { (used * 100).div_ceil(size) };
            if human {
                lines.push(format!(
                    "{:<15}{:>5} {:>5} {:>5} {:>3}% {}",
                    device,
                    human_blocks(size),
                    human_blocks(used),
                    human_blocks(avail),
                    pct,
                    mount_point
                ));
            } else {
                lines.push(format!(
                    "{:<14} {:>9} {:>8} {:>9} {:>3}% {}",
                    device, size, used, avail, pct, mount_point
                ));
            }
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static DF_CMD: DfCommand = DfCommand;

// ============================================================================
// Ps Command
// ============================================================================

/// Ps command - report a snapshot of processes
pub struct PsCommand;

impl Command for PsCommand {
    fn name(&self) -> &'static str {
        "ps"
    }
    fn description(&self) -> &'static str {
        "Report a snapshot of the current processes"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let bsd = inv.args.iter().any(|a| a.contains('a') && a.contains('x'))
            || inv.has_flag("-aux");
        let full = inv.has_short('e') || inv.has_short('A') || inv.has_short('f');
        let own = format!("ps {}", inv.words.join(" ")).trim_end().to_string();
        let procs = process_table(ctx, &own);
        let mem_total = ctx.persona().mem_total_kb as f64;

        let up = vfs::system_uptime(ctx.persona()).as_secs();
        let now = Local::now();
        let boot = now - ChronoDuration::seconds(up as i64);
        let boot_start = boot.format("%b%d").to_string();
        let session_start = now.format("%H:%M").to_string();

        let mut lines = Vec::new();
        if bsd {
            lines.push(String::from(
                "USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND",
            ));
            for p in &procs {
                lines.push(format!(
                    "{:<10} {:>6} {:>4.1} {:>4.1} {:>6} {:>5} {:<8} {:<4} {:>5} {:>6} {}",
                    p.user,
                    p.pid,
                    0.0,
                    p.rss as f64 * 100.0 / mem_total,
                    p.vsz,
                    p.rss,
                    p.tty,
                    p.stat,
                    if p.session { &session_start } else { &boot_start },
                    "0:00",
                    p.command
                ));
            }
        } else if full {
            lines.push(String::from("UID          PID    PPID  C STIME TTY          TIME CMD"));
            for p in &procs {
                lines.push(format!(
                    "{:<8} {:>7} {:>7}  0 {:<5} {:<8} 00:00:00 {}",
                    p.user,
                    p.pid,
                    p.ppid,
                    if p.session { &session_start } else { &boot_start },
                    p.tty,
                    p.command
                ));
            }
        } else {
            lines.push(String::from("    PID TTY          TIME CMD"));
            for p in procs.iter().filter(|p| p.tty == "pts/0") {
                let cmd = p.command.split_whitespace().next().unwrap_or("").trim_start_matches('-');
                lines.push(format!("{:>7} {:<8} 00:00:00 {}", p.pid, p.tty, cmd));
            }
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static PS_CMD: PsCommand = PsCommand;

// ============================================================================
// Help Command
// ============================================================================

/// Builtins listed by `help`
const BUILTINS: &[&str] = &["cd", "echo", "exit", "export", "help", "history", "kill", "pwd"];

/// Help command - list shell builtins
pub struct HelpCommand;

impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn description(&self) -> &'static str {
        "Display information about builtin commands"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let triple = match ctx.persona().arch {
            Arch::Armv7l => "arm-unknown-linux-gnueabihf",
            Arch::X86_64 => "x86_64-pc-linux-gnu",
            Arch::Mips => "mips-openwrt-linux-gnu",
        };
        let mut lines = vec![
            format!("GNU bash, version 5.1.4(1)-release ({})", triple),
            String::from("These shell commands are defined internally.  Type `help' to see this list."),
            String::new(),
        ];
        for name in BUILTINS {
            if let Some(cmd) = REGISTRY.find(name) {
                let usage = if cmd.usage().is_empty() { cmd.name() } else { cmd.usage() };
                lines.push(format!(" {:<36}{}", usage, cmd.description()));
            }
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static HELP_CMD: HelpCommand = HelpCommand;

// ============================================================================
// Clear Command
// ============================================================================

/// Clear command - clear the terminal screen
pub struct ClearCommand;

impl Command for ClearCommand {
    fn name(&self) -> &'static str {
        "clear"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["reset"]
    }
    fn description(&self) -> &'static str {
        "Clear the terminal screen"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        _ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        Ok(Output::ok("\x1b[H\x1b[2J\x1b[3J"))
    }
}

/// Static instance
pub static CLEAR_CMD: ClearCommand = ClearCommand;

// ============================================================================
// History Command
// ============================================================================

/// History command - list this session's command lines
pub struct HistoryCommand;

impl Command for HistoryCommand {
    fn name(&self) -> &'static str {
        "history"
    }
    fn description(&self) -> &'static str {
        "Display the command history list"
    }
    fn usage(&self) -> &'static str {
        "history [-c] [n]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.has_short('c') {
            ctx.history.clear();
            return Ok(Output::empty());
        }
        let skip = match inv.args.first().and_then(|n| n.parse::<usize>().ok()) {
            Some(n) => ctx.history.len().saturating_sub(n),
            None => 0,
        };
        let lines: Vec<String> = ctx
            .history
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, line)| format!("{:>5}  {}", i + 1, line))
            .collect();
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static HISTORY_CMD: HistoryCommand = HistoryCommand;

// ============================================================================
// Env Command
// ============================================================================

/// Env command - print the environment (also `printenv`)
pub struct EnvCommand;

impl Command for EnvCommand {
    fn name(&self) -> &'static str {
        "env"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["printenv"]
    }
    fn description(&self) -> &'static str {
        "Print the environment"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.name() == "printenv" && !inv.args.is_empty() {
            let values: Vec<&str> = inv
                .args
                .iter()
                .filter_map(|k| ctx.env.get(k).map(String::as_str))
                .collect();
            let status = if values.len() == inv.args.len() { 0 } else { STATUS_FAILURE };
            return Ok(Output::with_status(values.join("\n"), status));
        }
        let lines: Vec<String> = ctx.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static ENV_CMD: EnvCommand = EnvCommand;

// ============================================================================
// Export Command
// ============================================================================

/// Export command - set environment variables for this session
pub struct ExportCommand;

impl Command for ExportCommand {
    fn name(&self) -> &'static str {
        "export"
    }
    fn description(&self) -> &'static str {
        "Set export attribute for shell variables"
    }
    fn usage(&self) -> &'static str {
        "export [-fn] [name[=value] ...] or export -p"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.args.is_empty() {
            let lines: Vec<String> = ctx
                .env
                .iter()
                .map(|(k, v)| format!("declare -x {}=\"{}\"", k, v))
                .collect();
            return Ok(Output::ok(lines.join("\n")));
        }
        for arg in &inv.args {
            if let Some((key, value)) = arg.split_once('=') {
                if !key.is_empty() {
                    ctx.env.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(Output::empty())
    }
}

/// Static instance
pub static EXPORT_CMD: ExportCommand = ExportCommand;

// ============================================================================
// Which Command
// ============================================================================

const SEARCH_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Which command - locate a command on the search path
pub struct WhichCommand;

impl Command for WhichCommand {
    fn name(&self) -> &'static str {
        "which"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["command", "type"]
    }
    fn description(&self) -> &'static str {
        "Locate a command"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let mut found = Vec::new();
        let mut status = 0;
        for name in &inv.args {
            let hit = SEARCH_PATH
                .iter()
                .map(|dir| format!("{}/{}", dir, name))
                .find(|path| ctx.fs.get(path).is_ok_and(|n| n.is_executable()));
            match hit {
                Some(path) if inv.name() == "type" => found.push(format!("{} is {}", name, path)),
                Some(path) => found.push(path),
                None if inv.name() == "type" => {
                    found.push(format!("bash: type: {}: not found", name));
                    status = STATUS_FAILURE;
                }
                None => status = STATUS_FAILURE,
            }
        }
        Ok(Output::with_status(found.join("\n"), status))
    }
}

/// Static instance
pub static WHICH_CMD: WhichCommand = WhichCommand;

// ============================================================================
// Sh Command
// ============================================================================

/// Sh command - swallows piped scripts and script paths
pub struct ShCommand;

impl Command for ShCommand {
    fn name(&self) -> &'static str {
        "sh"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["bash", "ash", "dash"]
    }
    fn description(&self) -> &'static str {
        "Command interpreter"
    }

    fn execute(
        &self,
        inv: &Invocation,
        stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if stdin.is_some() || inv.has_short('c') {
            return Ok(Output::empty());
        }
        let Some(script) = inv.args.first() else {
            return Ok(Output::empty());
        };
        match ctx.fs.get(script) {
            Ok(node) if !node.is_dir() => Ok(Output::empty()),
            Ok(_) => Ok(Output::with_status(
                format!("{}: {}: Is a directory", inv.name(), script),
                126,
            )),
            Err(e) => Ok(Output::with_status(
                format!("{}: {}: {}", inv.name(), script, e),
                STATUS_NOT_FOUND,
            )),
        }
    }
}

/// Static instance
pub static SH_CMD: ShCommand = ShCommand;

// ============================================================================
// Exit Command
// ============================================================================

/// Exit command - end the session
pub struct ExitCommand;

impl Command for ExitCommand {
    fn name(&self) -> &'static str {
        "exit"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["logout", "quit"]
    }
    fn description(&self) -> &'static str {
        "Exit the shell"
    }
    fn usage(&self) -> &'static str {
        "exit [n]"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        _ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        Ok(Output::Exit)
    }
}

/// Static instance
pub static EXIT_CMD: ExitCommand = ExitCommand;

// ============================================================================
// Accepting Mutators
// ============================================================================

/// A mutating command that validates its operands and then does nothing
pub struct AcceptCommand {
    name: &'static str,
    description: &'static str,
    usage: &'static str,
    /// Operands needed before the command reports success
    min_operands: usize,
    /// Printed when operands are missing
    missing: &'static str,
    missing_status: i32,
}

impl Command for AcceptCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn description(&self) -> &'static str {
        self.description
    }
    fn usage(&self) -> &'static str {
        self.usage
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        _ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.args.len() < self.min_operands {
            return Ok(Output::with_status(self.missing, self.missing_status));
        }
        Ok(Output::empty())
    }
}

pub static CHMOD_CMD: AcceptCommand = AcceptCommand {
    name: "chmod",
    description: "Change file mode bits",
    usage: "chmod [OPTION]... MODE[,MODE]... FILE...",
    min_operands: 2,
    missing: "chmod: missing operand\nTry 'chmod --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static RM_CMD: AcceptCommand = AcceptCommand {
    name: "rm",
    description: "Remove files or directories",
    usage: "rm [OPTION]... [FILE]...",
    min_operands: 1,
    missing: "rm: missing operand\nTry 'rm --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static MKDIR_CMD: AcceptCommand = AcceptCommand {
    name: "mkdir",
    description: "Make directories",
    usage: "mkdir [OPTION]... DIRECTORY...",
    min_operands: 1,
    missing: "mkdir: missing operand\nTry 'mkdir --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static TOUCH_CMD: AcceptCommand = AcceptCommand {
    name: "touch",
    description: "Change file timestamps",
    usage: "touch [OPTION]... FILE...",
    min_operands: 1,
    missing: "touch: missing file operand\nTry 'touch --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static CP_CMD: AcceptCommand = AcceptCommand {
    name: "cp",
    description: "Copy files and directories",
    usage: "cp [OPTION]... SOURCE DEST",
    min_operands: 2,
    missing: "cp: missing file operand\nTry 'cp --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static MV_CMD: AcceptCommand = AcceptCommand {
    name: "mv",
    description: "Move (rename) files",
    usage: "mv [OPTION]... SOURCE DEST",
    min_operands: 2,
    missing: "mv: missing file operand\nTry 'mv --help' for more information.",
    missing_status: STATUS_FAILURE,
};

pub static KILL_CMD: AcceptCommand = AcceptCommand {
    name: "kill",
    description: "Send a signal to a job",
    usage: "kill [-s sigspec | -n signum | -sigspec] pid | jobspec ... or kill -l [sigspec]",
    min_operands: 1,
    missing: "kill: usage: kill [-s sigspec | -n signum | -sigspec] pid | jobspec ... or kill -l [sigspec]",
    missing_status: 2,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_span() {
        assert_eq!(uptime_span(5 * 60), " 0:05");
        assert_eq!(uptime_span(86_400 + 3600), "1 day,  1:00");
        assert_eq!(uptime_span(3 * 86_400 + 4 * 3600 + 5 * 60), "3 days,  4:05");
    }

    #[test]
    fn test_human_sizes() {
        assert_eq!(human_kib(949_248), "927Mi");
        assert_eq!(human_kib(0), "0B");
        assert_eq!(human_kib(8_038_196), "7.7Gi");
        assert_eq!(human_blocks(30_185_472), "29G");
        assert_eq!(human_blocks(258_095), "252M");
    }
}
