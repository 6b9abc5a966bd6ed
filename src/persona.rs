//! Device Personas
//!
//! Static table of the device identities the emulator can present. A persona
//! is selected once at startup and every command, generated file and network
//! table reads from it, so the fake host stays self-consistent.

use std::net::Ipv4Addr;

use sha2::{Digest, Sha256};

// ============================================================================
// Architecture
// ============================================================================

/// CPU architecture reported by `uname -m`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Armv7l,
    X86_64,
    Mips,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Armv7l => "armv7l",
            Arch::X86_64 => "x86_64",
            Arch::Mips => "mips",
        }
    }
}

// ============================================================================
// Storage Layout
// ============================================================================

/// One mounted block device as shown by `df`
#[derive(Debug, Clone, Copy)]
pub struct Mount {
    pub device: &'static str,
    pub mount_point: &'static str,
    /// Size in 1K blocks
    pub size_kb: u64,
    /// Lower/upper bound for the used fraction, in percent
    pub used_percent: (u8, u8),
}

// ============================================================================
// Persona
// ============================================================================

/// A static bundle of device identity facts
#[derive(Debug)]
pub struct Persona {
    /// Registry key (`raspberry-pi`, ...)
    pub name: &'static str,
    pub hostname: &'static str,
    pub default_user: &'static str,
    pub arch: Arch,
    /// Full `uname -a` line
    pub kernel: &'static str,
    /// Build string (`#1459 SMP ...`) as shown by `uname -v`
    pub kernel_build: &'static str,
    pub os_pretty_name: &'static str,
    pub os_release: &'static str,
    /// SoC or chipset identifier
    pub hardware: &'static str,
    /// Board or system product name
    pub model: &'static str,
    pub vendor: &'static str,
    pub cpu_info: &'static str,
    pub interface: &'static str,
    pub ip_address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac_address: &'static str,
    pub mem_total_kb: u64,
    pub mounts: &'static [Mount],
    pub motd: &'static str,
}

impl Persona {
    /// Release token of the kernel string (`uname -r`)
    pub fn kernel_release(&self) -> &'static str {
        self.kernel.split_whitespace().nth(2).unwrap_or("")
    }

    /// Only x86 boards carry a PCI bus and DMI tables
    pub fn has_pci_bus(&self) -> bool {
        self.arch == Arch::X86_64
    }

    /// Swap size; the router image runs without swap
    pub fn swap_total_kb(&self) -> u64 {
        match self.arch {
            Arch::Armv7l => 102_396,
            Arch::X86_64 => 2_097_148,
            Arch::Mips => 0,
        }
    }

    /// Stable `/etc/machine-id` derived from hostname and MAC
    pub fn machine_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hostname.as_bytes());
        hasher.update(b"/");
        hasher.update(self.mac_address.as_bytes());
        let digest = hasher.finalize();
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// /24 broadcast address of the primary interface
    pub fn broadcast(&self) -> Ipv4Addr {
        let [a, b, c, _] = self.ip_address.octets();
        Ipv4Addr::new(a, b, c, 255)
    }

    /// EUI-64 link-local IPv6 address for the interface MAC
    pub fn link_local_v6(&self) -> String {
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(self.mac_address.split(':')) {
            *slot = u8::from_str_radix(part, 16).unwrap_or(0);
        }
        let groups = [
            u16::from_be_bytes([octets[0] ^ 0x02, octets[1]]),
            u16::from_be_bytes([octets[2], 0xff]),
            u16::from_be_bytes([0xfe, octets[3]]),
            u16::from_be_bytes([octets[4], octets[5]]),
        ];
        format!(
            "fe80::{:x}:{:x}:{:x}:{:x}",
            groups[0], groups[1], groups[2], groups[3]
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

const RPI_CPUINFO: &str = "\
processor       : 0
model name      : ARMv7 Processor rev 4 (v7l)
BogoMIPS        : 38.40
Features        : half thumb fastmult vfp edsp neon vfpv3 tls vfpv4 idiva idivt vfpd32 lpae evtstrm crc32
CPU implementer : 0x41
CPU architecture: 7
CPU variant     : 0x0
CPU part        : 0xd03
CPU revision    : 4

processor       : 1
model name      : ARMv7 Processor rev 4 (v7l)
BogoMIPS        : 38.40
Features        : half thumb fastmult vfp edsp neon vfpv3 tls vfpv4 idiva idivt vfpd32 lpae evtstrm crc32
CPU implementer : 0x41
CPU architecture: 7
CPU variant     : 0x0
CPU part        : 0xd03
CPU revision    : 4

Hardware        : BCM2835
Revision        : a02082
Serial          : 00000000a1b2c3d4
Model           : Raspberry Pi 3 Model B Rev 1.2
";

const X86_CPUINFO: &str = "\
processor       : 0
vendor_id       : GenuineIntel
cpu family      : 6
model           : 158
model name      : Intel(R) Core(TM) i5-8500 CPU @ 3.00GHz
stepping        : 10
microcode       : 0xf0
cpu MHz         : 3000.000
cache size      : 9216 KB
physical id     : 0
siblings        : 6
core id         : 0
cpu cores       : 6
fpu             : yes
flags           : fpu vme de pse tsc msr pae mce cx8 apic sep mtrr pge mca cmov pat pse36 clflush dts acpi mmx fxsr sse sse2 ss ht tm pbe syscall nx pdpe1gb rdtscp lm constant_tsc art arch_perfmon pebs bts rep_good nopl xtopology nonstop_tsc cpuid aperfmperf pni pclmulqdq dtes64 monitor ds_cpl vmx smx est tm2 ssse3 sdbg fma cx16 xtpr pdcm pcid sse4_1 sse4_2 x2apic movbe popcnt aes xsave avx f16c rdrand lahf_lm abm 3dnowprefetch cpuid_fault epb invpcid_single ssbd ibrs ibpb stibp fsgsbase tsc_adjust bmi1 avx2 smep bmi2 erms invpcid mpx rdseed adx smap clflushopt intel_pt xsaveopt xsavec xgetbv1 xsaves dtherm ida arat pln pts md_clear flush_l1d
bogomips        : 6000.00
address sizes   : 39 bits physical, 48 bits virtual
";

const MIPS_CPUINFO: &str = "\
system type             : MediaTek MT7621 ver:1 eco:3
machine                 : Generic IoT Device
processor               : 0
cpu model               : MIPS 1004Kc V2.15
BogoMIPS                : 586.13
wait instruction        : yes
microsecond timers      : yes
tlb_entries             : 32
isa                     : mips1 mips2 mips32r1 mips32r2
ASEs implemented        : mips16 dsp mt
Options implemented     : tlb 4kex 4k_cache prefetch mcheck ejtag llsc pindexed_dcache userlocal vint perf_cntr_intr_bit cdmm perf
";

static PERSONAS: [Persona; 3] = [
    Persona {
        name: "raspberry-pi",
        hostname: "raspberrypi",
        default_user: "root",
        arch: Arch::Armv7l,
        kernel: "Linux raspberrypi 5.10.63-v7l+ #1459 SMP Wed Oct 6 16:41:57 BST 2021 armv7l GNU/Linux",
        kernel_build: "#1459 SMP Wed Oct 6 16:41:57 BST 2021",
        os_pretty_name: "Raspbian GNU/Linux 11 (bullseye)",
        os_release: "PRETTY_NAME=\"Raspbian GNU/Linux 11 (bullseye)\"
NAME=\"Raspbian GNU/Linux\"
VERSION_ID=\"11\"
VERSION=\"11 (bullseye)\"
VERSION_CODENAME=bullseye
ID=raspbian
ID_LIKE=debian
HOME_URL=\"http://www.raspbian.org/\"
SUPPORT_URL=\"http://www.raspbian.org/RaspbianForums\"
BUG_REPORT_URL=\"http://www.raspbian.org/RaspbianBugs\"
",
        hardware: "BCM2835",
        model: "Raspberry Pi 3 Model B Rev 1.2",
        vendor: "Raspberry Pi Foundation",
        cpu_info: RPI_CPUINFO,
        interface: "eth0",
        ip_address: Ipv4Addr::new(192, 168, 1, 47),
        gateway: Ipv4Addr::new(192, 168, 1, 1),
        mac_address: "b8:27:eb:3a:12:34",
        mem_total_kb: 949_248,
        mounts: &[
            Mount { device: "/dev/root", mount_point: "/", size_kb: 30_185_472, used_percent: (12, 18) },
            Mount { device: "/dev/mmcblk0p1", mount_point: "/boot", size_kb: 258_095, used_percent: (18, 21) },
        ],
        motd: "Linux raspberrypi 5.10.63-v7l+ #1459 SMP Wed Oct 6 16:41:57 BST 2021 armv7l

The programs included with the Debian GNU/Linux system are free software;
the exact distribution terms for each program are described in the
individual files in /usr/share/doc/*/copyright.

Debian GNU/Linux comes with ABSOLUTELY NO WARRANTY, to the extent
permitted by applicable law.",
    },
    Persona {
        name: "ubuntu-server",
        hostname: "ubuntu-server",
        default_user: "admin",
        arch: Arch::X86_64,
        kernel: "Linux ubuntu-server 5.4.0-84-generic #94-Ubuntu SMP Thu Aug 26 20:27:37 UTC 2021 x86_64 x86_64 x86_64 GNU/Linux",
        kernel_build: "#94-Ubuntu SMP Thu Aug 26 20:27:37 UTC 2021",
        os_pretty_name: "Ubuntu 20.04.3 LTS",
        os_release: "NAME=\"Ubuntu\"
VERSION=\"20.04.3 LTS (Focal Fossa)\"
ID=ubuntu
ID_LIKE=debian
PRETTY_NAME=\"Ubuntu 20.04.3 LTS\"
VERSION_ID=\"20.04\"
HOME_URL=\"https://www.ubuntu.com/\"
SUPPORT_URL=\"https://help.ubuntu.com/\"
BUG_REPORT_URL=\"https://bugs.launchpad.net/ubuntu/\"
",
        hardware: "Intel Q370",
        model: "OptiPlex 7060",
        vendor: "Dell Inc.",
        cpu_info: X86_CPUINFO,
        interface: "eno1",
        ip_address: Ipv4Addr::new(192, 168, 1, 152),
        gateway: Ipv4Addr::new(192, 168, 1, 1),
        mac_address: "d8:9e:f3:1a:2b:3c",
        mem_total_kb: 8_038_196,
        mounts: &[
            Mount { device: "/dev/sda2", mount_point: "/", size_kb: 239_313_084, used_percent: (22, 31) },
            Mount { device: "/dev/sda1", mount_point: "/boot/efi", size_kb: 523_248, used_percent: (1, 2) },
        ],
        motd: "Welcome to Ubuntu 20.04.3 LTS (GNU/Linux 5.4.0-84-generic x86_64)

 * Documentation:  https://help.ubuntu.com
 * Management:     https://landscape.canonical.com
 * Support:        https://ubuntu.com/advantage

0 updates can be applied immediately.",
    },
    Persona {
        name: "generic-iot",
        hostname: "camera01",
        default_user: "admin",
        arch: Arch::Mips,
        kernel: "Linux camera01 4.9.140 #1 SMP PREEMPT Mon Jul 15 10:23:45 CST 2019 mips GNU/Linux",
        kernel_build: "#1 SMP PREEMPT Mon Jul 15 10:23:45 CST 2019",
        os_pretty_name: "OpenWrt 19.07.7",
        os_release: "NAME=\"OpenWrt\"
VERSION=\"19.07.7\"
ID=\"openwrt\"
PRETTY_NAME=\"OpenWrt 19.07.7\"
",
        hardware: "MediaTek MT7621",
        model: "Generic IoT Device",
        vendor: "MediaTek",
        cpu_info: MIPS_CPUINFO,
        interface: "eth0",
        ip_address: Ipv4Addr::new(192, 168, 1, 198),
        gateway: Ipv4Addr::new(192, 168, 1, 1),
        mac_address: "00:0c:43:2a:5e:71",
        mem_total_kb: 124_016,
        mounts: &[
            Mount { device: "/dev/root", mount_point: "/rom", size_kb: 12_800, used_percent: (100, 100) },
            Mount { device: "overlayfs:/overlay", mount_point: "/", size_kb: 18_432, used_percent: (4, 9) },
        ],
        motd: "BusyBox v1.30.1 () built-in shell (ash)",
    },
];

/// Look up a persona by registry key
pub fn find(name: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.name == name)
}

/// All registry keys, in table order
pub fn names() -> impl Iterator<Item = &'static str> {
    PERSONAS.iter().map(|p| p.name)
}

/// The persona used when none is configured
pub fn default_persona() -> &'static Persona {
    &PERSONAS[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// OUIs assigned to hypervisor NICs; a persona MAC must avoid all of them
    const HYPERVISOR_OUIS: &[&str] = &[
        "08:00:27", "52:54:00", "00:0c:29", "00:50:56", "00:05:69", "00:15:5d", "00:16:3e",
    ];

    #[test]
    fn release_token_matches_kernel_string() {
        assert_eq!(find("raspberry-pi").unwrap().kernel_release(), "5.10.63-v7l+");
        assert_eq!(find("ubuntu-server").unwrap().kernel_release(), "5.4.0-84-generic");
        assert_eq!(find("generic-iot").unwrap().kernel_release(), "4.9.140");
    }

    #[test]
    fn kernel_string_is_self_consistent() {
        for persona in &PERSONAS {
            assert!(persona.kernel.contains(persona.hostname), "{}", persona.name);
            assert!(persona.kernel.contains(persona.kernel_build), "{}", persona.name);
            assert!(persona.kernel.contains(persona.arch.as_str()), "{}", persona.name);
        }
    }

    #[test]
    fn no_hypervisor_mac_prefixes() {
        for persona in &PERSONAS {
            let mac = persona.mac_address.to_lowercase();
            assert!(
                HYPERVISOR_OUIS.iter().all(|oui| !mac.starts_with(oui)),
                "{} uses a hypervisor OUI",
                persona.name
            );
        }
    }

    #[test]
    fn cpuinfo_never_mentions_hypervisor() {
        for persona in &PERSONAS {
            assert!(!persona.cpu_info.contains("hypervisor"), "{}", persona.name);
        }
    }

    #[test]
    fn link_local_follows_eui64() {
        let pi = find("raspberry-pi").unwrap();
        assert_eq!(pi.link_local_v6(), "fe80::ba27:ebff:fe3a:1234");
    }

    #[test]
    fn machine_id_is_stable_hex() {
        let pi = default_persona();
        let id = pi.machine_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, pi.machine_id());
    }

    #[test]
    fn pci_only_on_x86() {
        assert!(!find("raspberry-pi").unwrap().has_pci_bus());
        assert!(!find("generic-iot").unwrap().has_pci_bus());
        assert!(find("ubuntu-server").unwrap().has_pci_bus());
    }

    #[test]
    fn unknown_persona_is_none() {
        assert!(find("amiga").is_none());
        assert_eq!(names().count(), 3);
    }
}
