//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//! Loads a position-independent ELF shared object into the process.
//!
//! [`ElfReader`] drives the core sequence (header, program header table,
//! reservation, segment mapping, phdr self-locate) and hands the result
//! to the relocation collaborator as an [`ImageView`]. The optional
//! dynamic-section read may be interleaved between the phdr read and the
//! reservation, never after mapping has begun.

mod dynamic;
mod error;
mod file_window;
mod find_phdr;
mod header;
mod layout;
mod phdr_table;
mod protect;
mod reservation;
mod segments;
#[cfg(test)]
mod test_utils;

use std::ffi::CStr;
use std::os::unix::io::RawFd;
use std::slice::from_raw_parts;

use log::{debug, error};
use nix::sys::stat::fstat;

pub use self::dynamic::{DynamicView, DynamicWindows};
pub use self::error::{LoadError, Result};
pub use self::file_window::FileWindow;
pub use self::protect::{
    phdr_map_relro, phdr_protect_relro, phdr_protect_segments, phdr_serialize_relro,
    phdr_unprotect_segments,
};
pub use self::reservation::{Reservation, ReservationPolicy};

use self::find_phdr::find_loaded_phdr;
use self::layout::compute_load_range;
use self::phdr_table::PhdrTable;
use self::reservation::reserve_address_space;
use self::segments::load_segments;
use crate::elf::dynamic::Dyn;
use crate::elf::header::Header;
use crate::elf::program_header::{ProgramHeader, PT_DYNAMIC};
use crate::linker_maps::LoaderContext;
use crate::util::page::apply_bias;

#[cfg(target_arch = "arm")]
const PT_ARM_EXIDX: u32 = 0x7000_0001;

/// Reads one shared object out of `fd`, starting at `file_offset` so
/// objects can be loaded from container files.
pub struct ElfReader {
    name: String,
    fd: RawFd,
    file_offset: u64,
    file_size: u64,
    header: Option<Header>,
    phdr_table: Option<PhdrTable>,
    dynamic_windows: Option<DynamicWindows>,
    dynamic: Option<DynamicView>,
}

impl ElfReader {
    pub fn new(name: &str, fd: RawFd, file_offset: u64) -> Self {
        Self {
            name: name.to_owned(),
            fd,
            file_offset,
            file_size: 0,
            header: None,
            phdr_table: None,
            dynamic_windows: None,
            dynamic: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maps the `.dynamic` section and its string table ahead of the full
    /// load, for callers that need dependency information first.
    pub fn read_dynamic(&mut self) -> Result<DynamicView> {
        if let Some(view) = self.dynamic {
            return Ok(view);
        }
        let header = self.ensure_header()?;
        let (windows, view) = dynamic::read_dynamic(self.fd, self.file_offset, &header)?;
        self.dynamic_windows = Some(windows);
        self.dynamic = Some(view);
        Ok(view)
    }

    /// Looks up a name in the dynamic string table. Panics when the index
    /// is outside the table or the dynamic section was never read.
    pub fn get_string(&self, index: usize) -> &str {
        match &self.dynamic {
            Some(view) => string_at(view, index),
            None => panic!("dynamic section not read"),
        }
    }

    /// Runs the full load sequence and transfers ownership of the mapped
    /// image. Every failure is reported as a single log line and releases
    /// all partially acquired state.
    pub fn load(
        mut self,
        ctx: &mut LoaderContext,
        policy: ReservationPolicy,
    ) -> Result<ImageView> {
        match self.try_load(ctx, &policy) {
            Ok(view) => Ok(view),
            Err(err) => {
                error!("\"{}\" {}", self.name, err);
                Err(err)
            }
        }
    }

    fn try_load(
        &mut self,
        ctx: &mut LoaderContext,
        policy: &ReservationPolicy,
    ) -> Result<ImageView> {
        self.ensure_header()?;
        self.ensure_phdrs()?;
        let phdrs = match &self.phdr_table {
            Some(table) => table.entries(),
            None => unreachable!(),
        };

        let range = compute_load_range(phdrs);
        let reservation = reserve_address_space(&self.name, policy, range.size(), ctx)?;
        let load_bias = reservation.base().wrapping_sub(range.min_vaddr) as isize;

        load_segments(self.fd, self.file_offset, phdrs, load_bias)?;
        let loaded_phdr = find_loaded_phdr(phdrs, load_bias)?;
        let phnum = phdrs.len();
        debug!(
            "\"{}\" loaded at 0x{:x}, bias 0x{:x}",
            self.name,
            reservation.base(),
            load_bias
        );

        // The file-backed phdr window served its purpose; from here on the
        // in-segment copy is authoritative.
        self.phdr_table = None;
        Ok(ImageView {
            name: std::mem::take(&mut self.name),
            reservation,
            load_bias,
            phdr: loaded_phdr,
            phnum,
            dynamic: self.dynamic.take(),
            dynamic_windows: self.dynamic_windows.take(),
        })
    }

    fn ensure_header(&mut self) -> Result<Header> {
        if let Some(header) = self.header {
            return Ok(header);
        }
        let stat = fstat(self.fd).map_err(|errno| LoadError::Io { op: "fstat", errno })?;
        self.file_size = stat.st_size as u64;
        let header = header::read_ehdr(self.fd, self.file_offset)?;
        header::verify_ehdr(&header)?;
        debug!(
            "\"{}\" header ok at file offset 0x{:x}, file size 0x{:x}",
            self.name, self.file_offset, self.file_size
        );
        self.header = Some(header);
        Ok(header)
    }

    fn ensure_phdrs(&mut self) -> Result<()> {
        if self.phdr_table.is_none() {
            let header = self.ensure_header()?;
            self.phdr_table = Some(PhdrTable::read(self.fd, self.file_offset, &header)?);
        }
        Ok(())
    }
}

/// A loaded image: the reservation, the located in-segment phdr table and
/// any dynamic-section windows carried over from the reader. Dropping the
/// view unmaps the whole reservation in one operation.
#[derive(Debug)]
pub struct ImageView {
    name: String,
    reservation: Reservation,
    load_bias: isize,
    phdr: *const ProgramHeader,
    phnum: usize,
    dynamic: Option<DynamicView>,
    dynamic_windows: Option<DynamicWindows>,
}

impl ImageView {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> usize {
        self.reservation.base()
    }

    pub fn size(&self) -> usize {
        self.reservation.size()
    }

    pub fn load_bias(&self) -> isize {
        self.load_bias
    }

    pub fn phdr(&self) -> *const ProgramHeader {
        self.phdr
    }

    pub fn phdr_count(&self) -> usize {
        self.phnum
    }

    pub fn dynamic(&self) -> Option<&DynamicView> {
        self.dynamic.as_ref()
    }

    /// Restores link-time protections on the read-only segments.
    pub fn protect_segments(&self) -> Result<()> {
        phdr_protect_segments(self.phdrs(), self.load_bias)
    }

    /// Opens the read-only segments for relocation writes.
    pub fn unprotect_segments(&self) -> Result<()> {
        phdr_unprotect_segments(self.phdrs(), self.load_bias)
    }

    pub fn protect_relro(&self) -> Result<()> {
        phdr_protect_relro(self.phdrs(), self.load_bias)
    }

    pub fn serialize_relro(&self, fd: RawFd) -> Result<()> {
        phdr_serialize_relro(self.phdrs(), self.load_bias, fd)
    }

    pub fn map_relro(&self, fd: RawFd) -> Result<()> {
        phdr_map_relro(self.phdrs(), self.load_bias, fd)
    }

    /// Runtime address of the PT_DYNAMIC table and the segment's flags.
    pub fn get_dynamic_section(&self) -> Option<(*const Dyn, u32)> {
        self.phdrs()
            .iter()
            .find(|phdr| phdr.p_type == PT_DYNAMIC)
            .map(|phdr| {
                (
                    apply_bias(phdr.p_vaddr, self.load_bias) as *const Dyn,
                    phdr.p_flags,
                )
            })
    }

    /// Runtime address and entry count of the exception index table.
    #[cfg(target_arch = "arm")]
    pub fn get_arm_exidx(&self) -> Option<(*const u32, usize)> {
        self.phdrs()
            .iter()
            .find(|phdr| phdr.p_type == PT_ARM_EXIDX)
            .map(|phdr| {
                (
                    apply_bias(phdr.p_vaddr, self.load_bias) as *const u32,
                    phdr.p_memsz as usize / 8,
                )
            })
    }

    /// Looks up a name in the dynamic string table. Panics when the index
    /// is outside the table or the image has no dynamic view.
    pub fn get_string(&self, index: usize) -> &str {
        match &self.dynamic {
            Some(view) => string_at(view, index),
            None => panic!("dynamic section not read"),
        }
    }

    fn phdrs(&self) -> &[ProgramHeader] {
        unsafe { from_raw_parts(self.phdr, self.phnum) }
    }
}

fn string_at(view: &DynamicView, index: usize) -> &str {
    assert!(
        index < view.strtab_size,
        "string table index {} out of range",
        index
    );
    let cstr = unsafe { CStr::from_ptr(view.strtab_ptr.add(index).cast()) };
    cstr.to_str().unwrap_or("")
}
