//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use log::trace;

use crate::elf::header::Header;
use crate::elf::program_header::{ProgramHeader, PT_LOAD, PT_PHDR, SIZEOF_PHDR};
use crate::loader::error::{LoadError, Result};
use crate::util::page::apply_bias;

/// Locates the copy of the program header table that is reachable inside
/// a loaded segment. The temporary file-backed phdr window can be dropped
/// once this pointer is known.
pub fn find_loaded_phdr(phdrs: &[ProgramHeader], bias: isize) -> Result<*const ProgramHeader> {
    // A PT_PHDR entry names the table directly.
    if let Some(phdr) = phdrs.iter().find(|phdr| phdr.p_type == PT_PHDR) {
        return check_phdr(apply_bias(phdr.p_vaddr, bias), phdrs, bias);
    }

    // Otherwise, if the first loadable segment starts at file offset 0 it
    // begins with the ELF header, whose e_phoff leads to the table.
    if let Some(first_load) = phdrs.iter().find(|phdr| phdr.p_type == PT_LOAD) {
        if first_load.p_offset == 0 {
            let ehdr = unsafe { &*(apply_bias(first_load.p_vaddr, bias) as *const Header) };
            let candidate = apply_bias(first_load.p_vaddr, bias) + ehdr.e_phoff as usize;
            return check_phdr(candidate, phdrs, bias);
        }
    }

    Err(LoadError::PhdrNotLocatable)
}

// The candidate table must lie entirely within the file-backed portion of
// some loadable segment; phdrs materialised in bss mean a malformed
// object.
fn check_phdr(
    candidate: usize,
    phdrs: &[ProgramHeader],
    bias: isize,
) -> Result<*const ProgramHeader> {
    let table_size = phdrs.len() * SIZEOF_PHDR;
    for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
        let seg_start = apply_bias(phdr.p_vaddr, bias);
        let seg_file_end = seg_start + phdr.p_filesz as usize;
        if candidate >= seg_start && candidate + table_size <= seg_file_end {
            trace!("located in-segment phdr table at 0x{:x}", candidate);
            return Ok(candidate as *const ProgramHeader);
        }
    }
    Err(LoadError::PhdrNotLocatable)
}
