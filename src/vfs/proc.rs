//! Process Filesystem (procfs)
//!
//! Generated files under `/proc`. Every read recomputes its content:
//! - /proc/cpuinfo - persona CPU description
//! - /proc/meminfo - persona memory total with fluctuating free counts
//! - /proc/version - kernel build banner
//! - /proc/uptime  - seconds since the fake boot, advancing in real time
//! - /proc/loadavg - small idle load averages
//!
//! The fluctuating numbers come from the reading session's rng. `free`, `top`
//! and `uptime` sample through the same helpers.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rand::Rng;
use rand::rngs::StdRng;

use super::FsTree;
use crate::persona::{Arch, Persona};

/// Process start, used as the reference point for the fake boot clock
static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

pub fn populate(tree: &mut FsTree) {
    Lazy::force(&STARTED);
    tree.add_dir("/proc", 0o555, "root");
    tree.add_generated("/proc/cpuinfo", 0o444, true, |p| p.cpu_info.to_string());
    tree.add_sampled("/proc/meminfo", 0o444, meminfo);
    tree.add_generated("/proc/version", 0o444, true, version);
    tree.add_generated("/proc/uptime", 0o444, true, uptime);
    tree.add_sampled("/proc/loadavg", 0o444, loadavg);
}

// ============================================================================
// Sampling
// ============================================================================

/// One memory reading in kB; recomputed on every call
pub struct MemSnapshot {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub shared: u64,
    pub buff_cache: u64,
    pub available: u64,
    pub swap_total: u64,
}

pub fn memory_snapshot(persona: &Persona, rng: &mut StdRng) -> MemSnapshot {
    let total = persona.mem_total_kb;
    let used = total * rng.gen_range(14..24) / 100;
    let buff_cache = total * rng.gen_range(20..30) / 100;
    let shared = total * rng.gen_range(1..3) / 100;
    let free = total - used - buff_cache;
    MemSnapshot {
        total,
        used,
        free,
        shared,
        buff_cache,
        available: free + buff_cache * 4 / 5,
        swap_total: persona.swap_total_kb(),
    }
}

/// 1, 5 and 15 minute load of a mostly idle box
pub fn load_average(rng: &mut StdRng) -> (f64, f64, f64) {
    (
        rng.gen_range(0.0..0.5),
        rng.gen_range(0.0..0.3),
        rng.gen_range(0.0..0.2),
    )
}

/// How long the fake host has been up
///
/// Each persona boots a stable number of hours before the process started,
/// derived from its machine id, so every session sees the same boot time.
pub fn system_uptime(persona: &Persona) -> Duration {
    let id = persona.machine_id();
    let seed = u64::from_str_radix(&id[..8], 16).unwrap_or(0);
    let base_hours = 50 + seed % (40 * 24);
    Duration::from_secs(base_hours * 3600 + seed % 3600) + STARTED.elapsed()
}

fn meminfo(persona: &Persona, rng: &mut StdRng) -> String {
    let mem = memory_snapshot(persona, rng);
    let buffers = mem.buff_cache / 6;
    let cached = mem.buff_cache - buffers;
    format!(
        "MemTotal:       {:>8} kB\n\
         MemFree:        {:>8} kB\n\
         MemAvailable:   {:>8} kB\n\
         Buffers:        {:>8} kB\n\
         Cached:         {:>8} kB\n\
         SwapCached:     {:>8} kB\n\
         SwapTotal:      {:>8} kB\n\
         SwapFree:       {:>8} kB\n",
        mem.total, mem.free, mem.available, buffers, cached, 0, mem.swap_total, mem.swap_total
    )
}

fn loadavg(_persona: &Persona, rng: &mut StdRng) -> String {
    let (one, five, fifteen) = load_average(rng);
    format!(
        "{:.2} {:.2} {:.2} 1/{} {}\n",
        one,
        five,
        fifteen,
        rng.gen_range(70..90),
        rng.gen_range(1800..2400),
    )
}

fn version(persona: &Persona) -> String {
    let toolchain = match persona.arch {
        Arch::Armv7l => "(dom@buildbot) (arm-linux-gnueabihf-gcc-8 (Ubuntu/Linaro 8.4.0-3ubuntu1) 8.4.0, GNU ld (GNU Binutils for Ubuntu) 2.34)",
        Arch::X86_64 => "(buildd@lgw01-amd64-038) (gcc version 9.3.0 (Ubuntu 9.3.0-17ubuntu1~20.04))",
        Arch::Mips => "(builder@buildhost) (gcc version 7.5.0 (OpenWrt GCC 7.5.0 r11306-c4a6851c72))",
    };
    format!(
        "Linux version {} {} {}\n",
        persona.kernel_release(),
        toolchain,
        persona.kernel_build
    )
}

fn uptime(persona: &Persona) -> String {
    let up = system_uptime(persona).as_secs_f64();
    // idle time accrues on every core
    let idle = up * 1.8;
    format!("{:.2} {:.2}\n", up, idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona;
    use rand::SeedableRng;

    #[test]
    fn meminfo_total_matches_persona() {
        let pi = persona::default_persona();
        let text = meminfo(pi, &mut StdRng::seed_from_u64(1));
        assert!(text.starts_with("MemTotal:         949248 kB"));
    }

    #[test]
    fn meminfo_agrees_with_snapshot() {
        let pi = persona::default_persona();
        let mem = memory_snapshot(pi, &mut StdRng::seed_from_u64(5));
        let text = meminfo(pi, &mut StdRng::seed_from_u64(5));
        assert!(text.contains(&format!("MemFree:        {:>8} kB", mem.free)));
        assert!(text.contains(&format!("MemAvailable:   {:>8} kB", mem.available)));
    }

    #[test]
    fn equal_seeds_sample_equal_files() {
        let pi = persona::default_persona();
        let (mut a, mut b) = (StdRng::seed_from_u64(11), StdRng::seed_from_u64(11));
        assert_eq!(meminfo(pi, &mut a), meminfo(pi, &mut b));
        assert_eq!(loadavg(pi, &mut a), loadavg(pi, &mut b));
    }

    #[test]
    fn loadavg_has_five_fields() {
        let pi = persona::default_persona();
        let text = loadavg(pi, &mut StdRng::seed_from_u64(3));
        let fields: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(fields.len(), 5);
        assert!(fields[3].starts_with("1/"));
    }

    #[test]
    fn uptime_is_stable_per_persona() {
        let pi = persona::default_persona();
        let a = system_uptime(pi).as_secs();
        let b = system_uptime(pi).as_secs();
        assert!(b >= a && b - a < 2);
        assert!(a >= 50 * 3600);
    }

    #[test]
    fn version_contains_build_string() {
        let pi = persona::default_persona();
        assert!(version(pi).contains("#1459 SMP"));
    }
}
