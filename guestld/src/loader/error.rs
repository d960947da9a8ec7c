//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use nix::errno::Errno;
use thiserror::Error;

use crate::elf::header::{ELFCLASS32, ELFCLASS64};

pub type Result<T> = std::result::Result<T, LoadError>;

/// Everything a load can fail with. Each variant maps to a single log
/// line of the form `"<name>" <reason>` at the load entry point.
#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("{op} failed: {errno}")]
    Io { op: &'static str, errno: Errno },
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("has bad ELF magic")]
    BadMagic,
    #[error("{}", class_diagnostic(.got))]
    BadClass { got: u8 },
    #[error("is not little-endian")]
    BadEndianness,
    #[error("is not a shared object")]
    BadType,
    #[error("has unexpected ELF version")]
    BadVersion,
    #[error("has unexpected e_machine: {got}")]
    BadMachine { got: u16 },
    #[error("has invalid program header count: {n}")]
    BadPhdrCount { n: usize },
    #[error("has no loadable segments")]
    NoLoadable,
    #[error("reserved address space too small: need {need:#x}, have {have:#x}")]
    ReservationTooSmall { have: usize, need: usize },
    #[error("could not map segment {segment_index}: {errno}")]
    MapFailed { segment_index: usize, errno: Errno },
    #[error("program header table not reachable in a loaded segment")]
    PhdrNotLocatable,
    #[error("has no dynamic section")]
    NoDynamic,
    #[error("has invalid dynamic section sh_link")]
    BadDynamicLink,
    #[error("dynamic string table has wrong section type")]
    BadStrtabType,
    #[error("could not install seccomp filter: {errno}")]
    SeccompInstallFailed { errno: Errno },
}

fn class_diagnostic(got: &u8) -> String {
    let host = if cfg!(target_pointer_width = "64") {
        64
    } else {
        32
    };
    match *got {
        ELFCLASS32 => format!("is 32-bit instead of {}-bit", host),
        ELFCLASS64 => format!("is 64-bit instead of {}-bit", host),
        other => format!("has unknown ELF class {}", other),
    }
}
