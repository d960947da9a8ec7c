//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//! Syscall filter installed when the guest libc is mapped.
//!
//! The filter never kills: syscalls issued from untrusted code are turned
//! into SIGSYS traps so a user-space handler can emulate or reject them.
//! Code running below the main-program text limit or inside the trusted
//! loader/guest window is exempt.

mod bpf;

use std::ops::Range;

use cfg_if::cfg_if;
use libc::{c_long, sock_filter, sock_fprog};
use log::debug;
use nix::errno::Errno;

use crate::linker_maps::{LinkerMaps, LOW_TEXT_LIMIT, PRELINKER_ADDR};
use crate::seccomp::bpf::{FilterBuilder, Label, Target};

// Offsets into struct seccomp_data (little-endian targets only).
const SECCOMP_DATA_NR: u32 = 0;
const SECCOMP_DATA_ARCH: u32 = 4;
const SECCOMP_DATA_IP_LO: u32 = 8;
#[cfg(target_pointer_width = "64")]
const SECCOMP_DATA_IP_HI: u32 = 12;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_TRAP: u32 = 0x0003_0000;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        const AUDIT_ARCH_CURRENT: u32 = 0xc000_003e;
    } else if #[cfg(target_arch = "aarch64")] {
        const AUDIT_ARCH_CURRENT: u32 = 0xc000_00b7;
    } else if #[cfg(target_arch = "arm")] {
        const AUDIT_ARCH_CURRENT: u32 = 0x4000_0028;
    } else if #[cfg(target_arch = "x86")] {
        const AUDIT_ARCH_CURRENT: u32 = 0x4000_0003;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Allow,
    Trap,
}

/// Ordered syscall rules plus the instruction-pointer window they do not
/// apply to. Rules are evaluated first-match-wins; unmatched syscalls are
/// allowed.
pub struct SyscallPolicy {
    pub rules: Vec<(c_long, Action)>,
    pub trusted: Range<usize>,
}

impl SyscallPolicy {
    /// The filter guarding a guest process: traps the filesystem, process
    /// and clock syscalls the guest runtime must emulate, everywhere
    /// except the trusted loader/guest window recorded in the registry.
    pub fn guest_default(maps: &LinkerMaps) -> Self {
        let rules = trapped_syscalls()
            .iter()
            .map(|nr| (*nr, Action::Trap))
            .collect();
        Self {
            rules,
            trusted: PRELINKER_ADDR..maps.trusted_end(),
        }
    }
}

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        fn trapped_syscalls() -> &'static [c_long] {
            use libc::*;
            &[
                SYS_openat,
                SYS_readlinkat,
                SYS_faccessat,
                SYS_unlinkat,
                SYS_connect,
                SYS_execve,
                SYS_inotify_add_watch,
                SYS_mkdirat,
                SYS_getdents64,
                SYS_ptrace,
                SYS_clock_settime,
                SYS_clock_gettime,
                SYS_gettimeofday,
                SYS_settimeofday,
                SYS_newfstatat,
                SYS_getuid,
                SYS_getgid,
                SYS_geteuid,
                SYS_getegid,
                SYS_getresuid,
                SYS_getresgid,
            ]
        }
    } else {
        fn trapped_syscalls() -> &'static [c_long] {
            use libc::*;
            &[
                SYS_openat,
                SYS_readlinkat,
                SYS_faccessat,
                SYS_unlinkat,
                SYS_connect,
                SYS_execve,
                SYS_inotify_add_watch,
                SYS_mkdirat,
                SYS_getdents64,
                SYS_ptrace,
                SYS_clock_settime,
                SYS_clock_gettime,
                SYS_gettimeofday,
                SYS_settimeofday,
                // Legacy variants still issued by 32-bit guest code.
                SYS_open,
                SYS_readlink,
                SYS_access,
                SYS_stat64,
                SYS_lstat64,
                SYS_fstat64,
                SYS_fstatat64,
                SYS_uname,
                SYS_ioprio_set,
                SYS_sysinfo,
                SYS_socket,
                SYS_ioctl,
                SYS_prctl,
                SYS_getuid32,
                SYS_geteuid32,
                SYS_getgid32,
                SYS_getegid32,
                SYS_getresuid32,
                SYS_getresgid32,
            ]
        }
    }
}

/// Lowers a policy to a classic-BPF program.
///
/// Stage A allows foreign architectures, the low main-program text and the
/// trusted window outright; stage B applies the syscall rules to
/// everything else.
pub fn build_filter(policy: &SyscallPolicy) -> Vec<sock_filter> {
    let mut b = FilterBuilder::new();
    let allow = b.label();
    let trap = b.label();
    let stage_b = b.label();

    b.load_abs(SECCOMP_DATA_ARCH);
    b.jeq(AUDIT_ARCH_CURRENT, Target::Next, Target::To(allow));

    let not_low = b.label();
    emit_ip_below(&mut b, LOW_TEXT_LIMIT as u64, allow, not_low);
    b.bind(not_low);

    let maybe_trusted = b.label();
    emit_ip_below(&mut b, policy.trusted.start as u64, stage_b, maybe_trusted);
    b.bind(maybe_trusted);
    emit_ip_below(&mut b, policy.trusted.end as u64, allow, stage_b);

    b.bind(stage_b);
    b.load_abs(SECCOMP_DATA_NR);
    for (nr, action) in &policy.rules {
        let target = match action {
            Action::Allow => allow,
            Action::Trap => trap,
        };
        b.jeq(*nr as u32, Target::To(target), Target::Next);
    }
    b.ret(SECCOMP_RET_ALLOW);

    b.bind(trap);
    b.ret(SECCOMP_RET_TRAP);
    b.bind(allow);
    b.ret(SECCOMP_RET_ALLOW);

    b.build()
}

// BPF operates on 32-bit words; on 64-bit targets an instruction-pointer
// compare is a high-word compare followed by a low-word compare.
#[cfg(target_pointer_width = "64")]
fn emit_ip_below(b: &mut FilterBuilder, limit: u64, lt: Label, ge: Label) {
    let hi = (limit >> 32) as u32;
    let lo = limit as u32;
    let cmp_lo = b.label();
    b.load_abs(SECCOMP_DATA_IP_HI);
    b.jgt(hi, Target::To(ge), Target::Next);
    b.jeq(hi, Target::To(cmp_lo), Target::To(lt));
    b.bind(cmp_lo);
    b.load_abs(SECCOMP_DATA_IP_LO);
    b.jge(lo, Target::To(ge), Target::To(lt));
}

#[cfg(target_pointer_width = "32")]
fn emit_ip_below(b: &mut FilterBuilder, limit: u64, lt: Label, ge: Label) {
    b.load_abs(SECCOMP_DATA_IP_LO);
    b.jge(limit as u32, Target::To(ge), Target::To(lt));
}

/// Installs the policy with `PR_SET_SECCOMP`/`SECCOMP_MODE_FILTER`.
/// Affects the whole process from this point on; the caller decides what a
/// failure means (for the loader it is fatal).
pub fn install(policy: &SyscallPolicy) -> Result<(), Errno> {
    let insns = build_filter(policy);
    debug!(
        "installing seccomp filter: {} instructions, trusted window 0x{:x}..0x{:x}",
        insns.len(),
        policy.trusted.start,
        policy.trusted.end
    );
    let prog = sock_fprog {
        len: insns.len() as libc::c_ushort,
        filter: insns.as_ptr() as *mut sock_filter,
    };
    let rc = unsafe {
        libc::prctl(
            libc::PR_SET_SECCOMP,
            libc::SECCOMP_MODE_FILTER as libc::c_ulong,
            &prog as *const sock_fprog as libc::c_ulong,
        )
    };
    if rc != 0 {
        return Err(Errno::last());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::bpf::interp;
    use super::*;

    fn policy() -> SyscallPolicy {
        let mut maps = LinkerMaps::default();
        maps.record_guest_libc(PRELINKER_ADDR + 0x10_0000, 0x40_000);
        SyscallPolicy::guest_default(&maps)
    }

    fn seccomp_data(nr: c_long, arch: u32, ip: u64) -> [u8; 16] {
        let mut data = [0u8; 16];
        data[0..4].copy_from_slice(&(nr as u32).to_le_bytes());
        data[4..8].copy_from_slice(&arch.to_le_bytes());
        data[8..16].copy_from_slice(&ip.to_le_bytes());
        data
    }

    fn verdict(nr: c_long, arch: u32, ip: u64) -> u32 {
        interp::run(&build_filter(&policy()), &seccomp_data(nr, arch, ip))
    }

    #[test]
    fn test_foreign_arch_is_allowed() {
        assert_eq!(
            verdict(libc::SYS_openat, 0xdead_beef, 0x60_0000),
            SECCOMP_RET_ALLOW
        );
    }

    #[rstest]
    // Untrusted text above the low limit: filtered syscalls trap.
    #[case(libc::SYS_openat, 0x60_0000, SECCOMP_RET_TRAP)]
    #[case(libc::SYS_ptrace, 0x60_0000, SECCOMP_RET_TRAP)]
    // Unlisted syscalls are always allowed.
    #[case(libc::SYS_write, 0x60_0000, SECCOMP_RET_ALLOW)]
    // Main-program text below the limit is exempt.
    #[case(libc::SYS_openat, 0x30_0000, SECCOMP_RET_ALLOW)]
    fn test_stage_b_rules(#[case] nr: c_long, #[case] ip: u64, #[case] expected: u32) {
        assert_eq!(verdict(nr, AUDIT_ARCH_CURRENT, ip), expected);
    }

    #[test]
    fn test_trusted_window_boundaries() {
        let p = policy();
        let start = p.trusted.start as u64;
        let end = p.trusted.end as u64;

        assert_eq!(
            verdict(libc::SYS_openat, AUDIT_ARCH_CURRENT, start),
            SECCOMP_RET_ALLOW
        );
        assert_eq!(
            verdict(libc::SYS_openat, AUDIT_ARCH_CURRENT, end - 1),
            SECCOMP_RET_ALLOW
        );
        // The window is half-open.
        assert_eq!(
            verdict(libc::SYS_openat, AUDIT_ARCH_CURRENT, end),
            SECCOMP_RET_TRAP
        );
        assert_eq!(
            verdict(libc::SYS_openat, AUDIT_ARCH_CURRENT, start - 1),
            SECCOMP_RET_TRAP
        );
    }

    #[test]
    fn test_verdicts_are_only_allow_or_trap() {
        for insn in build_filter(&policy()) {
            if insn.code == 0x06 {
                assert!(insn.k == SECCOMP_RET_ALLOW || insn.k == SECCOMP_RET_TRAP);
            }
        }
    }
}
