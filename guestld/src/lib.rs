//
// Copyright (c) Memfault, Inc.
// See License.txt for details
pub mod linker_maps;
pub mod loader;
pub mod seccomp;
pub mod util;

#[cfg(target_pointer_width = "64")]
pub use goblin::elf64 as elf;

#[cfg(target_pointer_width = "64")]
pub type ElfPtrSize = u64;

#[cfg(target_pointer_width = "32")]
pub use goblin::elf32 as elf;

#[cfg(target_pointer_width = "32")]
pub type ElfPtrSize = u32;

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// e_machine value accepted for objects loaded into this process.
        pub const EM_HOST: u16 = elf::header::EM_X86_64;
    } else if #[cfg(target_arch = "aarch64")] {
        pub const EM_HOST: u16 = elf::header::EM_AARCH64;
    } else if #[cfg(target_arch = "arm")] {
        pub const EM_HOST: u16 = elf::header::EM_ARM;
    } else if #[cfg(target_arch = "x86")] {
        pub const EM_HOST: u16 = elf::header::EM_386;
    }
}

pub use loader::{
    DynamicView, ElfReader, ImageView, LoadError, ReservationPolicy, Result,
};
