//! Hardware Inspection Commands
//!
//! The tools malware runs to decide whether it landed in a sandbox. Every
//! answer describes bare metal matching the persona; boards without a PCI
//! bus do not have `lspci` or `dmidecode` at all.

use crate::persona::{Arch, Persona};
use crate::shell::{Command, Invocation, Output, STATUS_FAILURE, ShellContext, ShellError};

/// Serial number printed by the DMI tables
fn system_serial(persona: &Persona) -> String {
    persona.machine_id()[..7].to_uppercase()
}

// ============================================================================
// systemd-detect-virt
// ============================================================================

/// systemd-detect-virt - always reports no virtualization
pub struct DetectVirtCommand;

impl Command for DetectVirtCommand {
    fn name(&self) -> &'static str {
        "systemd-detect-virt"
    }
    fn aliases(&self) -> &'static [&'static str] {
        &["virt-what"]
    }
    fn description(&self) -> &'static str {
        "Detect execution in a virtualized environment"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        _ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if inv.name() == "virt-what" || inv.has_short('q') || inv.has_flag("--quiet") {
            return Ok(Output::with_status("", STATUS_FAILURE));
        }
        // systemd exits non-zero when nothing is detected
        Ok(Output::with_status("none", STATUS_FAILURE))
    }
}

/// Static instance
pub static DETECT_VIRT_CMD: DetectVirtCommand = DetectVirtCommand;

// ============================================================================
// dmidecode
// ============================================================================

/// dmidecode - SMBIOS tables for x86 personas
pub struct DmidecodeCommand;

impl Command for DmidecodeCommand {
    fn name(&self) -> &'static str {
        "dmidecode"
    }
    fn description(&self) -> &'static str {
        "DMI table decoder"
    }
    fn usage(&self) -> &'static str {
        "dmidecode [OPTIONS]"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        let persona = ctx.persona();
        if !persona.has_pci_bus() {
            return Err(ShellError::UnknownCommand(inv.command.clone()));
        }
        if !ctx.is_root() {
            return Ok(Output::fail(
                "# dmidecode 3.2\n/sys/firmware/dmi/tables/smbios_entry_point: Permission denied\nScanning /dev/mem for entry point.\n/dev/mem: Permission denied",
            ));
        }

        let serial = system_serial(persona);
        if let Some(keyword) = inv.value_after("-s").or_else(|| inv.value_after("--string")) {
            let value = match keyword {
                "system-manufacturer" | "baseboard-manufacturer" => persona.vendor.to_string(),
                "system-product-name" => persona.model.to_string(),
                "system-serial-number" | "chassis-serial-number" => serial,
                "bios-vendor" => persona.vendor.to_string(),
                "bios-version" => String::from("1.10.2"),
                "baseboard-product-name" => String::from("0C96W1"),
                "processor-family" => String::from("Core i5"),
                _ => {
                    return Ok(Output::fail(format!(
                        "dmidecode: invalid argument to -s: '{}'",
                        keyword
                    )));
                }
            };
            return Ok(Output::ok(value));
        }

        let uuid = {
            let id = persona.machine_id().to_uppercase();
            format!("{}-{}-{}-{}-{}", &id[..8], &id[8..12], &id[12..16], &id[16..20], &id[20..32])
        };
        let text = format!(
            "# dmidecode 3.2
Getting SMBIOS data from sysfs.
SMBIOS 3.1.1 present.
Table at 0x8C8CD000.

Handle 0x0000, DMI type 0, 26 bytes
BIOS Information
\tVendor: {vendor}
\tVersion: 1.10.2
\tRelease Date: 03/24/2020
\tROM Size: 16 MB
\tCharacteristics:
\t\tPCI is supported
\t\tBIOS is upgradeable
\t\tBoot from CD is supported
\t\tUEFI is supported
\tBIOS Revision: 1.10

Handle 0x0001, DMI type 1, 27 bytes
System Information
\tManufacturer: {vendor}
\tProduct Name: {model}
\tVersion: Not Specified
\tSerial Number: {serial}
\tUUID: {uuid}
\tWake-up Type: Power Switch
\tSKU Number: 085A
\tFamily: OptiPlex

Handle 0x0002, DMI type 2, 15 bytes
Base Board Information
\tManufacturer: {vendor}
\tProduct Name: 0C96W1
\tVersion: A00
\tSerial Number: /{serial}/CNCMK0094A0123/
\tFeatures:
\t\tBoard is a hosting board
\t\tBoard is replaceable

Handle 0x0003, DMI type 3, 22 bytes
Chassis Information
\tManufacturer: {vendor}
\tType: Mini Tower
\tLock: Not Present
\tSerial Number: {serial}

Handle 0x0004, DMI type 4, 48 bytes
Processor Information
\tSocket Designation: CPU 1
\tType: Central Processor
\tFamily: Core i5
\tManufacturer: Intel(R) Corporation
\tVersion: Intel(R) Core(TM) i5-8500 CPU @ 3.00GHz
\tMax Speed: 4100 MHz
\tCurrent Speed: 3000 MHz
\tCore Count: 6
\tThread Count: 6",
            vendor = persona.vendor,
            model = persona.model,
            serial = serial,
            uuid = uuid,
        );
        Ok(Output::ok(text))
    }
}

/// Static instance
pub static DMIDECODE_CMD: DmidecodeCommand = DmidecodeCommand;

// ============================================================================
// lspci
// ============================================================================

const PCI_DEVICES: &[(&str, &str, &str)] = &[
    ("00:00.0", "Host bridge", "Intel Corporation 8th Gen Core Processor Host Bridge/DRAM Registers (rev 07)"),
    ("00:02.0", "VGA compatible controller", "Intel Corporation UHD Graphics 630 (Desktop 9 Series) (rev 02)"),
    ("00:12.0", "Signal processing controller", "Intel Corporation Cannon Lake PCH Thermal Controller (rev 10)"),
    ("00:14.0", "USB controller", "Intel Corporation Cannon Lake PCH USB 3.1 xHCI Host Controller (rev 10)"),
    ("00:14.2", "RAM memory", "Intel Corporation Cannon Lake PCH Shared SRAM (rev 10)"),
    ("00:16.0", "Communication controller", "Intel Corporation Cannon Lake PCH HECI Controller (rev 10)"),
    ("00:17.0", "SATA controller", "Intel Corporation Cannon Lake PCH SATA AHCI Controller (rev 10)"),
    ("00:1f.0", "ISA bridge", "Intel Corporation Q370 Chipset LPC/eSPI Controller (rev 10)"),
    ("00:1f.3", "Audio device", "Intel Corporation Cannon Lake PCH cAVS (rev 10)"),
    ("00:1f.4", "SMBus", "Intel Corporation Cannon Lake PCH SMBus Controller (rev 10)"),
    ("00:1f.5", "Serial bus controller [0c80]", "Intel Corporation Cannon Lake PCH SPI Controller (rev 10)"),
    ("00:1f.6", "Ethernet controller", "Intel Corporation Ethernet Connection (7) I219-LM (rev 10)"),
];

/// lspci - PCI device list for x86 personas
pub struct LspciCommand;

impl Command for LspciCommand {
    fn name(&self) -> &'static str {
        "lspci"
    }
    fn description(&self) -> &'static str {
        "List all PCI devices"
    }

    fn execute(
        &self,
        inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if !ctx.persona().has_pci_bus() {
            return Err(ShellError::UnknownCommand(inv.command.clone()));
        }
        let lines: Vec<String> = PCI_DEVICES
            .iter()
            .map(|(slot, class, device)| format!("{} {}: {}", slot, class, device))
            .collect();
        Ok(Output::ok(lines.join("\n")))
    }
}

/// Static instance
pub static LSPCI_CMD: LspciCommand = LspciCommand;

// ============================================================================
// dmesg
// ============================================================================

/// dmesg - kernel ring buffer, root only
pub struct DmesgCommand;

impl Command for DmesgCommand {
    fn name(&self) -> &'static str {
        "dmesg"
    }
    fn description(&self) -> &'static str {
        "Print the kernel ring buffer"
    }

    fn execute(
        &self,
        _inv: &Invocation,
        _stdin: Option<&str>,
        ctx: &mut ShellContext,
    ) -> Result<Output, ShellError> {
        if !ctx.is_root() {
            return Ok(Output::fail(
                "dmesg: read kernel buffer failed: Operation not permitted",
            ));
        }
        let persona = ctx.persona();
        let banner = format!(
            "[    0.000000] Linux version {} {}",
            persona.kernel_release(),
            persona.kernel_build
        );
        let mac = persona.mac_address;
        let iface = persona.interface;
        let body = match persona.arch {
            Arch::Armv7l => format!(
                "[    0.000000] CPU: ARMv7 Processor [410fd034] revision 4 (ARMv7), cr=10c5383d
[    0.000000] OF: fdt: Machine model: {model}
[    0.000000] Memory policy: Data cache writealloc
[    0.000000] Kernel command line: coherent_pool=1M 8250.nr_uarts=0 bcm2708_fb.fbwidth=656 smsc95xx.macaddr={mac_upper} console=tty1 root=PARTUUID=5e3da3da-02 rootfstype=ext4 fsck.repair=yes rootwait
[    0.000312] Calibrating delay loop (skipped), value calculated using timer frequency.. 38.40 BogoMIPS (lpj=192000)
[    1.214873] mmc0: host does not support reading read-only switch, assuming write-enable
[    1.392157] mmcblk0: mmc0:aaaa SC32G 29.7 GiB
[    2.875312] EXT4-fs (mmcblk0p2): mounted filesystem with ordered data mode. Opts: (null)
[    5.123001] smsc95xx 1-1.1:1.0 {iface}: register 'smsc95xx' at usb-3f980000.usb-1.1, smsc95xx USB 2.0 Ethernet, {mac}
[    8.447120] smsc95xx 1-1.1:1.0 {iface}: link up, 100Mbps, full-duplex, lpa 0xC5E1",
                model = persona.model,
                mac_upper = mac.to_uppercase(),
                mac = mac,
                iface = iface,
            ),
            Arch::X86_64 => format!(
                "[    0.000000] Command line: BOOT_IMAGE=/boot/vmlinuz-{release} root=UUID=3c0e8e6b-2f1d-4c8a-9d1e-4b2f6e1a7c90 ro quiet splash
[    0.000000] x86/fpu: Supporting XSAVE feature 0x001: 'x87 floating point registers'
[    0.000000] DMI: {vendor} {model}/0C96W1, BIOS 1.10.2 03/24/2020
[    0.000000] tsc: Detected 3000.000 MHz processor
[    0.031845] smpboot: CPU0: Intel(R) Core(TM) i5-8500 CPU @ 3.00GHz (family: 0x6, model: 0x9e, stepping: 0xa)
[    0.196311] smp: Brought up 1 node, 6 CPUs
[    1.204581] ahci 0000:00:17.0: AHCI 0001.0301 32 slots 4 ports 6 Gbps 0x3 impl SATA mode
[    1.533987] sd 0:0:0:0: [sda] 500118192 512-byte logical blocks: (256 GB/238 GiB)
[    2.011452] e1000e 0000:00:1f.6 eth0: {mac}
[    2.011460] e1000e 0000:00:1f.6 eth0: Intel(R) PRO/1000 Network Connection
[    2.190773] e1000e 0000:00:1f.6 {iface}: renamed from eth0
[    6.422180] e1000e 0000:00:1f.6 {iface}: NIC Link is Up 1000 Mbps Full Duplex, Flow Control: Rx/Tx",
                release = persona.kernel_release(),
                vendor = persona.vendor,
                model = persona.model,
                mac = mac,
                iface = iface,
            ),
            Arch::Mips => format!(
                "[    0.000000] SoC Type: MediaTek MT7621 ver:1 eco:3
[    0.000000] bootconsole [early0] enabled
[    0.000000] CPU0 revision is: 0001992f (MIPS 1004Kc)
[    0.000000] MIPS: machine is {model}
[    0.000000] Determined physical RAM map:
[    0.000000]  memory: 08000000 @ 00000000 (usable)
[    0.412008] spi-mt7621 1e000b00.spi: sys_freq: 220000000
[    1.022416] mtk_soc_eth 1e100000.ethernet: loaded mt7530 driver
[    1.031551] mtk_soc_eth 1e100000.ethernet {iface}: mediatek frame engine at 0xbe100000, irq 21
[    9.883214] mtk_soc_eth 1e100000.ethernet {iface}: port 4 link up, address {mac}",
                model = persona.model,
                mac = mac,
                iface = iface,
            ),
        };
        Ok(Output::ok(format!("{}\n{}", banner, body)))
    }
}

/// Static instance
pub static DMESG_CMD: DmesgCommand = DmesgCommand;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona;

    #[test]
    fn test_serial_is_stable() {
        let x86 = persona::find("ubuntu-server").unwrap();
        assert_eq!(system_serial(x86), system_serial(x86));
        assert_eq!(system_serial(x86).len(), 7);
    }

    #[test]
    fn test_pci_devices_are_physical() {
        for (_, _, device) in PCI_DEVICES {
            assert!(!device.contains("VirtualBox"));
            assert!(!device.contains("QEMU"));
            assert!(!device.contains("Red Hat"));
            assert!(!device.contains("VMware"));
        }
    }
}
