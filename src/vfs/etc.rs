//! Static image content: `/etc`, home directories, binaries and logs.

use sha2::{Digest, Sha256};

use super::FsTree;
use crate::persona::{Arch, Persona};

/// Top-level directories present on every image
const ROOT_DIRS: &[&str] = &[
    "bin", "boot", "dev", "etc", "home", "lib", "media", "mnt", "opt", "proc", "root", "run",
    "sbin", "srv", "sys", "tmp", "usr", "var",
];

const BIN: &[&str] = &[
    "bash", "cat", "chmod", "cp", "date", "dmesg", "echo", "grep", "hostname", "kill", "ls",
    "mkdir", "mv", "netstat", "ping", "ps", "pwd", "rm", "sh", "touch", "uname",
];

const USR_BIN: &[&str] = &[
    "clear", "curl", "df", "env", "find", "free", "id", "printenv", "ss", "sudo", "systemd-detect-virt",
    "top", "uptime", "wget", "which", "whoami",
];

const SBIN: &[&str] = &["ifconfig", "ip"];

/// Only present where a PCI bus and DMI tables exist
const X86_SBIN: &[&str] = &["dmidecode", "lspci"];

/// Non-root account whose home exists under `/home`
pub fn login_user(persona: &Persona) -> &'static str {
    if persona.default_user == "root" {
        "pi"
    } else {
        persona.default_user
    }
}

pub fn populate(tree: &mut FsTree) {
    for dir in ROOT_DIRS {
        tree.add_dir(&format!("/{}", dir), 0o755, "root");
    }
    tree.add_dir("/root", 0o700, "root");
    tree.add_dir("/tmp", 0o1777, "root");
    tree.add_dir("/var/tmp", 0o1777, "root");

    for name in BIN {
        tree.add_file(&format!("/bin/{}", name), 0o755, "root", "");
    }
    for name in USR_BIN {
        tree.add_file(&format!("/usr/bin/{}", name), 0o755, "root", "");
    }
    for name in SBIN {
        tree.add_file(&format!("/sbin/{}", name), 0o755, "root", "");
    }
    let persona = tree.persona();
    if persona.has_pci_bus() {
        for name in X86_SBIN {
            tree.add_file(&format!("/usr/sbin/{}", name), 0o755, "root", "");
        }
        populate_dmi(tree);
    }
    tree.add_dir("/usr/local/bin", 0o755, "root");
    tree.add_dir("/usr/sbin", 0o755, "root");

    tree.add_generated("/etc/passwd", 0o644, false, passwd);
    tree.add_generated("/etc/shadow", 0o640, false, shadow);
    tree.add_generated("/etc/group", 0o644, false, group);
    tree.add_generated("/etc/hosts", 0o644, false, hosts);
    tree.add_generated("/etc/hostname", 0o644, false, |p| format!("{}\n", p.hostname));
    tree.add_generated("/etc/os-release", 0o644, false, |p| p.os_release.to_string());
    tree.add_generated("/etc/issue", 0o644, false, |p| {
        format!("{} \\n \\l\n\n", p.os_pretty_name)
    });
    tree.add_generated("/etc/resolv.conf", 0o644, false, |p| {
        format!("nameserver {}\nnameserver 8.8.8.8\n", p.gateway)
    });
    tree.add_generated("/etc/machine-id", 0o444, false, |p| format!("{}\n", p.machine_id()));
    tree.add_file(
        "/etc/ssh/sshd_config",
        0o644,
        "root",
        "Include /etc/ssh/sshd_config.d/*.conf\n\
         PermitRootLogin yes\n\
         ChallengeResponseAuthentication no\n\
         UsePAM yes\n\
         X11Forwarding yes\n\
         PrintMotd no\n\
         AcceptEnv LANG LC_*\n\
         Subsystem sftp /usr/lib/openssh/sftp-server\n",
    );
    tree.add_file(
        "/etc/network/interfaces",
        0o644,
        "root",
        "# interfaces(5) file used by ifup(8) and ifdown(8)\n\
         source /etc/network/interfaces.d/*\n",
    );

    tree.add_generated("/root/.bashrc", 0o644, false, bashrc);
    tree.add_file("/root/.profile", 0o644, "root", PROFILE);
    tree.add_dir("/root/.ssh", 0o700, "root");
    tree.add_file("/root/.ssh/authorized_keys", 0o600, "root", "");

    let user = login_user(persona);
    let home = format!("/home/{}", user);
    tree.add_dir(&home, 0o755, user);
    tree.add_generated(&format!("{}/.bashrc", home), 0o644, false, bashrc);
    tree.add_file(&format!("{}/.profile", home), 0o644, user, PROFILE);
    tree.add_dir(&format!("{}/Documents", home), 0o755, user);
    tree.add_dir(&format!("{}/Downloads", home), 0o755, user);

    tree.add_dir("/var/www", 0o755, "root");
    tree.add_generated("/var/log/syslog", 0o640, false, syslog);
    tree.add_generated("/var/log/auth.log", 0o640, false, auth_log);
    tree.add_file("/var/log/messages", 0o640, "root", "");
}

fn populate_dmi(tree: &mut FsTree) {
    tree.add_generated("/sys/class/dmi/id/sys_vendor", 0o444, false, |p| format!("{}\n", p.vendor));
    tree.add_generated("/sys/class/dmi/id/product_name", 0o444, false, |p| format!("{}\n", p.model));
    tree.add_generated("/sys/class/dmi/id/board_vendor", 0o444, false, |p| format!("{}\n", p.vendor));
    tree.add_generated("/sys/class/dmi/id/bios_vendor", 0o444, false, |p| format!("{}\n", p.vendor));
}

const PROFILE: &str = "# ~/.profile: executed by the command interpreter for login shells.\n\
if [ -n \"$BASH_VERSION\" ]; then\n    if [ -f \"$HOME/.bashrc\" ]; then\n        . \"$HOME/.bashrc\"\n    fi\nfi\n\
if [ -d \"$HOME/bin\" ] ; then\n    PATH=\"$HOME/bin:$PATH\"\nfi\n";

fn passwd(persona: &Persona) -> String {
    let user = login_user(persona);
    let mut out = String::from(
        "root:x:0:0:root:/root:/bin/bash\n\
         daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
         bin:x:2:2:bin:/bin:/usr/sbin/nologin\n\
         sys:x:3:3:sys:/dev:/usr/sbin/nologin\n\
         sync:x:4:65534:sync:/bin:/bin/sync\n\
         games:x:5:60:games:/usr/games:/usr/sbin/nologin\n\
         man:x:6:12:man:/var/cache/man:/usr/sbin/nologin\n\
         lp:x:7:7:lp:/var/spool/lpd:/usr/sbin/nologin\n\
         mail:x:8:8:mail:/var/mail:/usr/sbin/nologin\n\
         news:x:9:9:news:/var/spool/news:/usr/sbin/nologin\n",
    );
    out.push_str(&format!("{0}:x:1000:1000:,,,:/home/{0}:/bin/bash\n", user));
    out.push_str("sshd:x:109:65534::/run/sshd:/usr/sbin/nologin\n");
    out
}

/// A `$6$` entry whose salt and digest are stable for this host
fn crypt_entry(persona: &Persona, user: &str) -> String {
    const ALPHABET: &[u8] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut hasher = Sha256::new();
    hasher.update(persona.machine_id().as_bytes());
    hasher.update(user.as_bytes());
    let seed = hasher.finalize();

    let encode = |len: usize, offset: usize| -> String {
        (0..len)
            .map(|i| {
                let b = seed[(i + offset) % seed.len()].wrapping_mul(i as u8 | 1);
                ALPHABET[b as usize % ALPHABET.len()] as char
            })
            .collect()
    };
    format!("$6${}${}", encode(16, 0), encode(86, 7))
}

fn shadow(persona: &Persona) -> String {
    let user = login_user(persona);
    format!(
        "root:{}:18921:0:99999:7:::\n\
         daemon:*:18921:0:99999:7:::\n\
         bin:*:18921:0:99999:7:::\n\
         sys:*:18921:0:99999:7:::\n\
         {}:{}:18921:0:99999:7:::\n\
         sshd:*:18921:0:99999:7:::\n",
        crypt_entry(persona, "root"),
        user,
        crypt_entry(persona, user),
    )
}

fn group(persona: &Persona) -> String {
    let user = login_user(persona);
    format!(
        "root:x:0:\ndaemon:x:1:\nbin:x:2:\nsys:x:3:\nadm:x:4:{0}\ntty:x:5:\ndisk:x:6:\n\
         lp:x:7:\nmail:x:8:\nnews:x:9:\nsudo:x:27:{0}\n{0}:x:1000:\n",
        user
    )
}

fn hosts(persona: &Persona) -> String {
    format!(
        "127.0.0.1       localhost\n\
         ::1             localhost ip6-localhost ip6-loopback\n\
         ff02::1         ip6-allnodes\n\
         ff02::2         ip6-allrouters\n\n\
         127.0.1.1       {}\n",
        persona.hostname
    )
}

fn bashrc(persona: &Persona) -> String {
    format!(
        "# ~/.bashrc: executed by bash(1) for non-login shells.\n\n\
         # If not running interactively, don't do anything\n\
         case $- in\n    *i*) ;;\n      *) return;;\nesac\n\n\
         HISTCONTROL=ignoreboth\nHISTSIZE=1000\nHISTFILESIZE=2000\n\n\
         PS1='${{debian_chroot:+($debian_chroot)}}\\u@{}:\\w\\$ '\n\n\
         alias ll='ls -alF'\nalias la='ls -A'\nalias l='ls -CF'\n",
        persona.hostname
    )
}

fn syslog(persona: &Persona) -> String {
    let dhcp = match persona.arch {
        Arch::X86_64 => "systemd-networkd",
        Arch::Armv7l | Arch::Mips => "dhcpcd[412]",
    };
    format!(
        "Oct  6 16:42:03 {host} kernel: [    0.000000] Booting Linux on physical CPU 0x0\n\
         Oct  6 16:42:09 {host} {dhcp}: {iface}: leased {ip} for 86400 seconds\n\
         Oct  6 16:42:11 {host} systemd[1]: Started OpenBSD Secure Shell server.\n\
         Oct  6 16:45:00 {host} CRON[611]: (root) CMD (   cd / && run-parts --report /etc/cron.hourly)\n",
        host = persona.hostname,
        dhcp = dhcp,
        iface = persona.interface,
        ip = persona.ip_address,
    )
}

fn auth_log(persona: &Persona) -> String {
    format!(
        "Oct  6 16:42:11 {host} sshd[498]: Server listening on 0.0.0.0 port 22.\n\
         Oct  6 16:42:11 {host} sshd[498]: Server listening on :: port 22.\n\
         Oct  6 17:03:52 {host} sshd[702]: Accepted password for {user} from {gw} port 52144 ssh2\n\
         Oct  6 17:03:52 {host} sshd[702]: pam_unix(sshd:session): session opened for user {user} by (uid=0)\n",
        host = persona.hostname,
        user = persona.default_user,
        gw = persona.gateway,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona;

    #[test]
    fn shadow_hashes_look_real() {
        let text = shadow(persona::default_persona());
        let root = text.lines().next().unwrap();
        let hash = root.split(':').nth(1).unwrap();
        assert!(hash.starts_with("$6$"));
        assert_eq!(hash.split('$').nth(3).unwrap().len(), 86);
        assert!(!text.contains("fake"));
    }

    #[test]
    fn login_user_defaults_to_pi_for_root_personas() {
        assert_eq!(login_user(persona::find("raspberry-pi").unwrap()), "pi");
        assert_eq!(login_user(persona::find("ubuntu-server").unwrap()), "admin");
    }
}
