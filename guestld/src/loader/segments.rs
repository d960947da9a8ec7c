//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;

use log::trace;
use nix::errno::Errno;

use crate::elf::program_header::{ProgramHeader, PF_R, PF_W, PF_X, PT_LOAD};
use crate::loader::error::{LoadError, Result};
use crate::util::page::{apply_bias, page_end, page_offset, page_start, PAGE_SIZE};

pub fn prot_flags(p_flags: u32) -> libc::c_int {
    let mut prot = 0;
    if p_flags & PF_R != 0 {
        prot |= libc::PROT_READ;
    }
    if p_flags & PF_W != 0 {
        prot |= libc::PROT_WRITE;
    }
    if p_flags & PF_X != 0 {
        prot |= libc::PROT_EXEC;
    }
    prot
}

/// Maps every PT_LOAD segment at its biased address inside the
/// reservation: the file-backed pages first, then a zero-filled tail for
/// writable segments whose file image ends mid-page, then anonymous pages
/// for the remaining bss.
pub fn load_segments(
    fd: RawFd,
    file_offset: u64,
    phdrs: &[ProgramHeader],
    bias: isize,
) -> Result<()> {
    for (segment_index, phdr) in phdrs.iter().enumerate() {
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let seg_start = apply_bias(phdr.p_vaddr, bias);
        let seg_end = seg_start + phdr.p_memsz as usize;
        let seg_page_start = page_start(seg_start);
        let seg_page_end = page_end(seg_end);
        let mut seg_file_end = seg_start + phdr.p_filesz as usize;

        let file_start = phdr.p_offset as usize;
        let file_end = file_start + phdr.p_filesz as usize;
        let file_page_start = page_start(file_start);

        if phdr.p_filesz != 0 {
            let map = unsafe {
                libc::mmap64(
                    seg_page_start as *mut libc::c_void,
                    file_end - file_page_start,
                    prot_flags(phdr.p_flags),
                    libc::MAP_FIXED | libc::MAP_PRIVATE,
                    fd,
                    (file_offset + file_page_start as u64) as libc::off64_t,
                )
            };
            if map == libc::MAP_FAILED {
                return Err(LoadError::MapFailed {
                    segment_index,
                    errno: Errno::last(),
                });
            }
            trace!(
                "segment {}: mapped 0x{:x}..0x{:x} from file offset 0x{:x}",
                segment_index,
                seg_page_start,
                seg_page_start + (file_end - file_page_start),
                file_offset + file_page_start as u64
            );

            // The tail of the last file page belongs to bss and must read
            // as zero. The stores are valid: the page is part of the
            // private writable mapping created above.
            if phdr.p_flags & PF_W != 0 && page_offset(seg_file_end) > 0 {
                unsafe {
                    std::ptr::write_bytes(
                        seg_file_end as *mut u8,
                        0,
                        PAGE_SIZE - page_offset(seg_file_end),
                    );
                }
            }
        }

        seg_file_end = page_end(seg_file_end);
        if seg_page_end > seg_file_end {
            let map = unsafe {
                libc::mmap64(
                    seg_file_end as *mut libc::c_void,
                    seg_page_end - seg_file_end,
                    prot_flags(phdr.p_flags),
                    libc::MAP_FIXED | libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                    -1,
                    0,
                )
            };
            if map == libc::MAP_FAILED {
                return Err(LoadError::MapFailed {
                    segment_index,
                    errno: Errno::last(),
                });
            }
            trace!(
                "segment {}: anonymous bss 0x{:x}..0x{:x}",
                segment_index,
                seg_file_end,
                seg_page_end
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(PF_R, libc::PROT_READ)]
    #[case(PF_R | PF_X, libc::PROT_READ | libc::PROT_EXEC)]
    #[case(PF_R | PF_W, libc::PROT_READ | libc::PROT_WRITE)]
    #[case(
        PF_R | PF_W | PF_X,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
    )]
    fn test_prot_flags(#[case] p_flags: u32, #[case] expected: libc::c_int) {
        assert_eq!(prot_flags(p_flags), expected);
    }

    // Mapping behaviour is exercised end-to-end through `ElfReader::load`
    // in the loader tests; the fixtures there cover zero-fill, pure-bss
    // and exactly-page-aligned segments.
}
