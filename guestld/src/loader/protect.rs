//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//! Page-protection operations over a loaded phdr table.
//!
//! These are free functions so the relocation collaborator can drive them
//! from a raw phdr view without holding an image borrow. When two
//! segments share a page, the later segment's protection sticks: it is the
//! one whose mapping was written on top during loading.

use std::os::unix::io::RawFd;
use std::slice::from_raw_parts;

use log::trace;
use nix::errno::Errno;
use nix::sys::stat::fstat;

use crate::elf::program_header::{ProgramHeader, PF_W, PT_GNU_RELRO, PT_LOAD};
use crate::loader::error::{LoadError, Result};
use crate::loader::file_window::FileWindow;
use crate::loader::segments::prot_flags;
use crate::util::io::write_all;
use crate::util::page::{apply_bias, page_end, page_start, PAGE_SIZE};

/// Restores the link-time protection of every read-only PT_LOAD segment.
pub fn phdr_protect_segments(phdrs: &[ProgramHeader], bias: isize) -> Result<()> {
    set_load_prot(phdrs, bias, 0)
}

/// Makes every read-only PT_LOAD segment writable so relocations can be
/// applied.
pub fn phdr_unprotect_segments(phdrs: &[ProgramHeader], bias: isize) -> Result<()> {
    set_load_prot(phdrs, bias, libc::PROT_WRITE)
}

fn set_load_prot(phdrs: &[ProgramHeader], bias: isize, extra_prot: libc::c_int) -> Result<()> {
    for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
        // Segments that are writable anyway are never touched.
        if phdr.p_flags & PF_W != 0 {
            continue;
        }
        let (start, len) = segment_page_range(phdr, bias);
        mprotect(start, len, prot_flags(phdr.p_flags) | extra_prot)?;
    }
    Ok(())
}

/// Makes every PT_GNU_RELRO range read-only. Unaligned ranges are widened
/// to whole pages.
pub fn phdr_protect_relro(phdrs: &[ProgramHeader], bias: isize) -> Result<()> {
    for phdr in relro_entries(phdrs) {
        let (start, len) = segment_page_range(phdr, bias);
        mprotect(start, len, libc::PROT_READ)?;
    }
    Ok(())
}

/// Writes every RELRO page range to `fd` and remaps the pages read-only
/// from it, so sibling processes loading the same object can share them.
pub fn phdr_serialize_relro(phdrs: &[ProgramHeader], bias: isize, fd: RawFd) -> Result<()> {
    let mut file_offset: usize = 0;
    for phdr in relro_entries(phdrs) {
        let (start, len) = segment_page_range(phdr, bias);
        let bytes = unsafe { from_raw_parts(start as *const u8, len) };
        write_all(fd, bytes).map_err(|errno| LoadError::Io { op: "write", errno })?;

        let map = unsafe {
            libc::mmap64(
                start as *mut libc::c_void,
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE | libc::MAP_FIXED,
                fd,
                file_offset as libc::off64_t,
            )
        };
        if map == libc::MAP_FAILED {
            return Err(LoadError::Io {
                op: "mmap",
                errno: Errno::last(),
            });
        }
        trace!(
            "serialized relro 0x{:x}..0x{:x} at file offset 0x{:x}",
            start,
            start + len,
            file_offset
        );
        file_offset += len;
    }
    Ok(())
}

/// Replaces RELRO pages that are byte-identical to the serialized copy in
/// `fd` with private mappings of the file, deduplicating them across
/// sibling processes. Pages that differ stay as-is; a file shorter than
/// the current segment stops the walk.
pub fn phdr_map_relro(phdrs: &[ProgramHeader], bias: isize, fd: RawFd) -> Result<()> {
    let stat = fstat(fd).map_err(|errno| LoadError::Io { op: "fstat", errno })?;
    let file_size = stat.st_size as usize;
    if file_size == 0 {
        return Ok(());
    }
    // Temporary comparison window over the whole file; dropped on every
    // exit path.
    let file = FileWindow::map(fd, 0, file_size)?;

    let mut file_offset: usize = 0;
    for phdr in relro_entries(phdrs) {
        let (start, len) = segment_page_range(phdr, bias);
        if file_size - file_offset < len {
            break;
        }

        let mem = start as *const u8;
        let disk = unsafe { file.ptr().add(file_offset) };
        let mut match_offset = 0;
        while match_offset < len {
            // Skip dissimilar pages.
            while match_offset < len && !pages_equal(mem, disk, match_offset) {
                match_offset += PAGE_SIZE;
            }
            // Count the run of identical pages.
            let mut mismatch_offset = match_offset;
            while mismatch_offset < len && pages_equal(mem, disk, mismatch_offset) {
                mismatch_offset += PAGE_SIZE;
            }
            if mismatch_offset > match_offset {
                let map = unsafe {
                    libc::mmap64(
                        (start + match_offset) as *mut libc::c_void,
                        mismatch_offset - match_offset,
                        libc::PROT_READ,
                        libc::MAP_PRIVATE | libc::MAP_FIXED,
                        fd,
                        (file_offset + match_offset) as libc::off64_t,
                    )
                };
                if map == libc::MAP_FAILED {
                    return Err(LoadError::Io {
                        op: "mmap",
                        errno: Errno::last(),
                    });
                }
                trace!(
                    "relro pages 0x{:x}..0x{:x} now backed by fd {}",
                    start + match_offset,
                    start + mismatch_offset,
                    fd
                );
            }
            match_offset = mismatch_offset;
        }
        file_offset += len;
    }
    Ok(())
}

fn relro_entries(phdrs: &[ProgramHeader]) -> impl Iterator<Item = &ProgramHeader> {
    phdrs.iter().filter(|phdr| phdr.p_type == PT_GNU_RELRO)
}

fn segment_page_range(phdr: &ProgramHeader, bias: isize) -> (usize, usize) {
    let start = page_start(apply_bias(phdr.p_vaddr, bias));
    let end = page_end(apply_bias(phdr.p_vaddr + phdr.p_memsz, bias));
    (start, end - start)
}

fn pages_equal(mem: *const u8, disk: *const u8, offset: usize) -> bool {
    let a = unsafe { from_raw_parts(mem.add(offset), PAGE_SIZE) };
    let b = unsafe { from_raw_parts(disk.add(offset), PAGE_SIZE) };
    a == b
}

fn mprotect(start: usize, len: usize, prot: libc::c_int) -> Result<()> {
    let rc = unsafe { libc::mprotect(start as *mut libc::c_void, len, prot) };
    if rc != 0 {
        return Err(LoadError::Io {
            op: "mprotect",
            errno: Errno::last(),
        });
    }
    Ok(())
}
