//! Network Commands
//!
//! Interface and socket tables derived from the persona, plus the two
//! download tools. `wget` and `curl` never touch the network: they report a
//! `malware-download` event for every URL and print a believable transcript.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::Local;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::events::EventKind;
use crate::persona::{Arch, Persona};
use crate::shell::{Command, Invocation, Output, ShellContext, ShellError};

// ============================================================================
// Helpers
// ============================================================================

/// Parts of an http(s) URL needed for transcripts
#[derive(Debug, PartialEq, Eq)]
struct UrlParts<'a> {
    host: &'a str,
    port: u16,
    file: &'a str,
}

fn is_download_url(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn split_url(url: &str) -> UrlParts<'_> {
    let (rest, default_port) = match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => (rest, 443),
        Some((_, rest)) => (rest, 80),
        None => (url, 80),
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h, p.parse().unwrap_or(default_port)),
        None => (authority, default_port),
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let file = match path.rsplit('/').next() {
        Some("") | None => "index.html",
        Some(name) => name,
    };
    UrlParts { host, port, file }
}

/// Public-looking address a hostname "resolves" to; stable per name
fn fake_address(host: &str) -> Ipv4Addr {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return ip;
    }
    let digest = Sha256::digest(host.as_bytes());
    let mut first = 23 + digest[0] % 180;
    if matches!(first, 100 | 127 | 169 | 172 | 192) {
        first += 1;
    }
    Ipv4Addr::new(first, digest[1], digest[2], digest[3].max(1))
}

fn human_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b < 1024.0 {
        format!("{} B", bytes)
    } else if b < 1024.0 * 1024.0 {
        format!("{:.1} KiB", b / 1024.0)
    } else if b < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MiB", b / 1024.0 / 1024.0)
    } else {
        format!("{:.1} GiB", b / 1024.0 / 1024.0 / 1024.0)
    }
}

/// Report every URL on the line and return them
fn record_downloads<'a>(inv: &'a Invocation, ctx: &ShellContext) -> Vec<&'a str> {
    let urls: Vec<&str> = inv
        .args
        .iter()
        .map(String::as_str)
        .filter(|w| is_download_url(w))
        .collect();
    for url in &urls {
        tracing::debug!(session = %ctx.events.session(), url = *url, "download attempt");
        ctx.events.emit(EventKind::MalwareDownload {
            url: url.to_string(),
            command: inv.raw.clone(),
        });
    }
    urls
}

/// A socket shown by netstat and ss
struct Socket {
    local: SocketAddr,
    peer: Option<SocketAddr>,
    pid: u32,
    program: String,
}

fn listeners(persona: &Persona) -> Vec<(SocketAddr, u32, &'static str)> {
    let any = |port| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    match persona.arch {
        Arch::Armv7l => vec![(any(22), 498, "sshd")],
        Arch::X86_64 => vec![
            (
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 53)), 53),
                614,
                "systemd-resolve",
            ),
            (any(22), 801, "sshd"),
        ],
        Arch::Mips => vec![
            (any(22), 1024, "dropbear"),
            (any(53), 1388, "dnsmasq"),
            (any(80), 1203, "uhttpd"),
        ],
    }
}

fn sockets(ctx: &ShellContext) -> Vec<Socket> {
    let persona = ctx.persona();
    let mut out: Vec<Socket> = listeners(persona)
        .into_iter()
        .map(|(local, pid, program)| Socket {
            local,
            peer: None,
            pid,
            program: program.to_string(),
        })
        .collect();
    let program = if persona.arch == Arch::Mips {
        String::from("dropbear")
    } else {
        format!("sshd: {}", ctx.username)
    };
    out.push(Socket {
        local: SocketAddr::new(IpAddr::V4(persona.ip_address), 22),
        peer: Some(ctx.events.peer()),
        pid: ctx.pid.saturating_sub(7),
        program,
    });
    out
}

fn service_name(port: u16) -> Option<&'static str> {
    match port {
        22 => Some("ssh"),
        53 => Some("domain"),
        80 => Some("http"),
        _ => None,
    }
}

fn render_addr(addr: SocketAddr, numeric: bool) -> String {
    let port = match service_name(addr.port()) {
        Some(name) if !numeric => name.to_string(),
        _ => addr.port().to_string(),
    };
    format!("{}:{}", addr.ip(), port)
}

// ============================================================================
// Ifconfig Command
// ============================================================================

/// Ifconfig command - interface configuration (net-tools style)
pub struct IfconfigCommand;

impl Command for IfconfigCommand {
    fn name(&self) -> &'static str {
        "ifconfig"
    }
    fn description(&self) -> &'static str {
        "Configure a network interface"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        let rx_packets: u64 = ctx.rng.gen_range(180_000..900_000);
        let tx_packets: u64 = rx_packets * ctx.rng.gen_range(40..70) / 100;
        let rx_bytes = rx_packets * ctx.rng.gen_range(600..1100);
        let tx_bytes = tx_packets * ctx.rng.gen_range(150..400);
        let lo_packets: u64 = ctx.rng.gen_range(200..4_000);
        let lo_bytes = lo_packets * ctx.rng.gen_range(60..120);

        let primary = format!(
            "{iface}: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500
        inet {ip}  netmask 255.255.255.0  broadcast {brd}
        inet6 {v6}  prefixlen 64  scopeid 0x20<link>
        ether {mac}  txqueuelen 1000  (Ethernet)
        RX packets {rxp}  bytes {rxb} ({rxh})
        RX errors 0  dropped 0  overruns 0  frame 0
        TX packets {txp}  bytes {txb} ({txh})
        TX errors 0  dropped 0 overruns 0  carrier 0  collisions 0
",
            iface = persona.interface,
            ip = persona.ip_address,
            brd = persona.broadcast(),
            v6 = persona.link_local_v6(),
            mac = persona.mac_address,
            rxp = rx_packets,
            rxb = rx_bytes,
            rxh = human_bytes(rx_bytes),
            txp = tx_packets,
            txb = tx_bytes,
            txh = human_bytes(tx_bytes),
        );
        let loopback = format!(
            "lo: flags=73<UP,LOOPBACK,RUNNING>  mtu 65536
        inet 127.0.0.1  netmask 255.0.0.0
        inet6 ::1  prefixlen 128  scopeid 0x10<host>
        loop  txqueuelen 1000  (Local Loopback)
        RX packets {p}  bytes {b} ({h})
        RX errors 0  dropped 0  overruns 0  frame 0
        TX packets {p}  bytes {b} ({h})
        TX errors 0  dropped 0 overruns 0  carrier 0  collisions 0
",
            p = lo_packets,
            b = lo_bytes,
            h = human_bytes(lo_bytes),
        );

        match inv.args.first().map(String::as_str) {
            None => Ok(Output::ok(format!("{}\n{}", primary, loopback))),
            Some(name) if name == persona.interface => Ok(Output::ok(primary)),
            Some("lo") => Ok(Output::ok(loopback)),
            Some(name) => Ok(Output::fail(format!("{}: error fetching interface information: Device not found", name))),
        }
    }
}

/// Static instance
pub static IFCONFIG_CMD: IfconfigCommand = IfconfigCommand;

// ============================================================================
// Ip Command
// ============================================================================

/// Ip command - iproute2 address, route and link views
pub struct IpCommand;

impl IpCommand {
    fn link_lines(persona: &Persona) -> [String; 4] {
        [
            String::from("1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000"),
            String::from("    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00"),
            format!(
                "2: {}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP mode DEFAULT group default qlen 1000",
                persona.interface
            ),
            format!("    link/ether {} brd ff:ff:ff:ff:ff:ff", persona.mac_address),
        ]
    }

    fn addresses(persona: &Persona, lease: u32) -> String {
        format!(
            "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever
    inet6 ::1/128 scope host
       valid_lft forever preferred_lft forever
2: {iface}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP group default qlen 1000
    link/ether {mac} brd ff:ff:ff:ff:ff:ff
    inet {ip}/24 brd {brd} scope global dynamic {iface}
       valid_lft {lease}sec preferred_lft {lease}sec
    inet6 {v6}/64 scope link
       valid_lft forever preferred_lft forever",
            iface = persona.interface,
            mac = persona.mac_address,
            ip = persona.ip_address,
            brd = persona.broadcast(),
            v6 = persona.link_local_v6(),
            lease = lease,
        )
    }
}

impl Command for IpCommand {
    fn name(&self) -> &'static str {
        "ip"
    }
    fn description(&self) -> &'static str {
        "Show routing, devices and addresses"
    }
    fn usage(&self) -> &'static str {
        "ip [ OPTIONS ] OBJECT { COMMAND | help }"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        let object = inv.args.first().map(String::as_str).unwrap_or("");
        let text = match object {
            "a" | "addr" | "address" => Self::addresses(persona, ctx.rng.gen_range(40_000..86_400)),
            "r" | "ro" | "route" => {
                let [a, b, c, _] = persona.ip_address.octets();
                format!(
                    "default via {gw} dev {iface} proto dhcp src {ip} metric 202\n\
                     {a}.{b}.{c}.0/24 dev {iface} proto dhcp scope link src {ip} metric 202",
                    gw = persona.gateway,
                    iface = persona.interface,
                    ip = persona.ip_address,
                    a = a,
                    b = b,
                    c = c,
                )
            }
            "l" | "link" => Self::link_lines(persona).join("\n"),
            _ => {
                return Ok(Output::with_status(
                    format!(
                        "Usage: {}\nwhere  OBJECT := {{ link | address | route | neigh | rule }}\n       OPTIONS := {{ -V[ersion] | -s[tatistics] | -d[etails] | -4 | -6 }}",
                        self.usage()
                    ),
                    255,
                ));
            }
        };
        Ok(Output::ok(text))
    }
}

/// Static instance
pub static IP_CMD: IpCommand = IpCommand;

// ============================================================================
// Netstat Command
// ============================================================================

/// Netstat command - TCP socket table including the attacker's own session
pub struct NetstatCommand;

impl Command for NetstatCommand {
    fn name(&self) -> &'static str {
        "netstat"
    }
    fn description(&self) -> &'static str {
        "Print network connections"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let listening = inv.has_short('l');
        let all = inv.has_short('a');
        let numeric = inv.has_short('n');
        let programs = inv.has_short('p');

        let header = match (listening, all) {
            (_, true) => "Active Internet connections (servers and established)",
            (true, false) => "Active Internet connections (only servers)",
            _ => "Active Internet connections (w/o servers)",
        };
        let mut lines = vec![header.to_string()];
        let mut columns = String::from(
            "Proto Recv-Q Send-Q Local Address           Foreign Address         State      ",
        );
        if programs {
            columns.push_str(" PID/Program name");
        }
        lines.push(columns.trim_end().to_string());

        let is_root = ctx.is_root();
        for socket in sockets(ctx) {
            let shown = match socket.peer {
                None => listening || all,
                Some(_) => !listening || all,
            };
            if !shown {
                continue;
            }
            let (foreign, state, send_q) = match socket.peer {
                Some(peer) => (render_addr(peer, numeric), "ESTABLISHED", 36),
                None => (String::from("0.0.0.0:*"), "LISTEN", 0),
            };
            let mut row = format!(
                "tcp        0 {:>6} {:<23} {:<23} {:<11}",
                send_q,
                render_addr(socket.local, numeric),
                foreign,
                state
            );
            if programs {
                if is_root {
                    row.push_str(&format!("{}/{}", socket.pid, socket.program));
                } else {
                    row.push('-');
                }
            }
            lines.push(row.trim_end().to_string());
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static NETSTAT_CMD: NetstatCommand = NetstatCommand;

// ============================================================================
// Ss Command
// ============================================================================

/// Ss command - socket statistics
pub struct SsCommand;

impl Command for SsCommand {
    fn name(&self) -> &'static str {
        "ss"
    }
    fn description(&self) -> &'static str {
        "Investigate sockets"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let listening = inv.has_short('l');
        let all = inv.has_short('a');
        let numeric = inv.has_short('n');
        let programs = inv.has_short('p');

        let mut lines = vec![String::from(
            "State    Recv-Q   Send-Q     Local Address:Port      Peer Address:Port   Process",
        )];
        for socket in sockets(ctx) {
            let shown = match socket.peer {
                None => listening || all,
                Some(_) => !listening || all,
            };
            if !shown {
                continue;
            }
            let (state, send_q, backlog, peer) = match socket.peer {
                Some(peer) => ("ESTAB", 36, 0, render_addr(peer, numeric)),
                None => ("LISTEN", 128, 0, String::from("0.0.0.0:*")),
            };
            let mut row = format!(
                "{:<8} {:<8} {:<6} {:>22} {:>21}",
                state,
                backlog,
                send_q,
                render_addr(socket.local, numeric),
                peer
            );
            if programs {
                row.push_str(&format!(
                    "   users:((\"{}\",pid={},fd=3))",
                    socket.program.split(':').next().unwrap_or("sshd"),
                    socket.pid
                ));
            }
            lines.push(row);
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static SS_CMD: SsCommand = SsCommand;

// ============================================================================
// Ping Command
// ============================================================================

const PING_MAX_COUNT: u32 = 10;

/// Ping command - fabricated echo replies
pub struct PingCommand;

impl Command for PingCommand {
    fn name(&self) -> &'static str {
        "ping"
    }
    fn description(&self) -> &'static str {
        "Send ICMP ECHO_REQUEST to network hosts"
    }
    fn usage(&self) -> &'static str {
        "ping [-c count] [-i interval] [-W timeout] destination"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let Some(target) = inv
            .operands(&["-c", "-i", "-W", "-w", "-s", "-I", "-t"])
            .first()
            .map(|s| s.to_string())
        else {
            return Ok(Output::with_status(
                "ping: usage error: Destination address required",
                2,
            ));
        };
        let count = inv
            .value_after("-c")
            .and_then(|c| c.parse::<u32>().ok())
            .unwrap_or(4)
            .clamp(1, PING_MAX_COUNT);
        let addr = fake_address(&target);
        let base: f64 = ctx.rng.gen_range(8.0..60.0);
        let ttl = if addr.is_private() { 64 } else { ctx.rng.gen_range(50..120) };

        let mut lines = vec![format!("PING {} ({}) 56(84) bytes of data.", target, addr)];
        let mut times = Vec::with_capacity(count as usize);
        for seq in 1..=count {
            let time = base + ctx.rng.gen_range(-1.5..1.5);
            times.push(time);
            lines.push(format!(
                "64 bytes from {}: icmp_seq={} ttl={} time={:.1} ms",
                addr, seq, ttl, time
            ));
        }
        let min = times.iter().cloned().fold(f64::MAX, f64::min);
        let max = times.iter().cloned().fold(f64::MIN, f64::max);
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let mdev = (times.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / times.len() as f64).sqrt();
        lines.push(String::new());
        lines.push(format!("--- {} ping statistics ---", target));
        lines.push(format!(
            "{0} packets transmitted, {0} received, 0% packet loss, time {1}ms",
            count,
            (count - 1) * 1000 + ctx.rng.gen_range(1..9)
        ));
        lines.push(format!(
            "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            min, avg, max, mdev
        ));
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static PING_CMD: PingCommand = PingCommand;

// ============================================================================
// Wget Command
// ============================================================================

/// Wget command - records the URL and prints a successful transfer
pub struct WgetCommand;

impl Command for WgetCommand {
    fn name(&self) -> &'static str {
        "wget"
    }
    fn description(&self) -> &'static str {
        "The non-interactive network downloader"
    }
    fn usage(&self) -> &'static str {
        "wget [OPTION]... [URL]..."
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let urls = record_downloads(inv, ctx);
        if urls.is_empty() {
            return Ok(Output::fail(
                "wget: missing URL\nUsage: wget [OPTION]... [URL]...\n\nTry `wget --help' for more options.",
            ));
        }

        let to_stdout = inv.value_after("-O") == Some("-")
            || inv.flags.iter().any(|f| !f.starts_with("--") && f.ends_with("O-"));
        if inv.has_short('q') || to_stdout {
            return Ok(Output::empty());
        }

        let output_name = inv.value_after("-O");
        let mut lines = Vec::new();
        for url in urls {
            let parts = split_url(url);
            let addr = fake_address(parts.host);
            let size: u64 = ctx.rng.gen_range(18_000..420_000);
            let rate: f64 = ctx.rng.gen_range(0.8..9.5);
            let file = output_name.unwrap_or(parts.file);
            let now = Local::now();
            lines.push(format!("--{}--  {}", now.format("%Y-%m-%d %H:%M:%S"), url));
            lines.push(format!("Resolving {0} ({0})... {1}", parts.host, addr));
            lines.push(format!(
                "Connecting to {0} ({0})|{1}|:{2}... connected.",
                parts.host, addr, parts.port
            ));
            lines.push(String::from("HTTP request sent, awaiting response... 200 OK"));
            lines.push(format!(
                "Length: {} ({}K) [application/octet-stream]",
                size,
                size / 1024
            ));
            lines.push(format!("Saving to: ‘{}’", file));
            lines.push(String::new());
            lines.push(format!(
                "{:<20}100%[===================>] {:>7.2}K  --.-KB/s    in {:.2}s",
                file,
                size as f64 / 1024.0,
                size as f64 / (rate * 1_048_576.0)
            ));
            lines.push(String::new());
            lines.push(format!(
                "{} ({:.2} MB/s) - ‘{}’ saved [{}/{}]",
                now.format("%Y-%m-%d %H:%M:%S"),
                rate,
                file,
                size,
                size
            ));
            lines.push(String::new());
        }
        Ok(Output::ok(lines.join("\n").trim_end().to_string()))
    }
}

/// Static instance
pub static WGET_CMD: WgetCommand = WgetCommand;

// ============================================================================
// Curl Command
// ============================================================================

/// Curl command - records the URL; the fetched body is always empty
pub struct CurlCommand;

impl Command for CurlCommand {
    fn name(&self) -> &'static str {
        "curl"
    }
    fn description(&self) -> &'static str {
        "Transfer a URL"
    }
    fn usage(&self) -> &'static str {
        "curl [options...] <url>"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let urls = record_downloads(inv, ctx);
        if urls.is_empty() {
            return Ok(Output::with_status(
                "curl: try 'curl --help' or 'curl --manual' for more information",
                2,
            ));
        }

        let saving = inv.has_short('o') || inv.has_short('O') || inv.has_flag("--output");
        if !saving || inv.has_short('s') || inv.has_flag("--silent") {
            return Ok(Output::empty());
        }

        let mut lines = vec![
            String::from("  % Total    % Received % Xferd  Average Speed   Time    Time     Time  Current"),
            String::from("                                 Dload  Upload   Total   Spent    Left  Speed"),
        ];
        for _ in urls {
            let size: u64 = ctx.rng.gen_range(18_000..420_000);
            let speed = ctx.rng.gen_range(300..4_000);
            lines.push(format!(
                "100 {:>5}k  100 {:>5}k    0     0  {:>5}k      0 --:--:-- --:--:-- --:--:-- {:>5}k",
                size / 1024,
                size / 1024,
                speed,
                speed
            ));
        }
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static CURL_CMD: CurlCommand = CurlCommand;
