//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use crate::elf::program_header::{ProgramHeader, PT_LOAD};
use crate::util::page::{page_end, page_start};
use crate::ElfPtrSize;

/// Page-aligned virtual-address extent of all PT_LOAD segments. The size
/// is what the reservation must cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRange {
    pub min_vaddr: usize,
    pub max_vaddr: usize,
}

impl LoadRange {
    pub fn size(&self) -> usize {
        self.max_vaddr - self.min_vaddr
    }
}

pub fn compute_load_range(phdrs: &[ProgramHeader]) -> LoadRange {
    let mut min_vaddr = ElfPtrSize::MAX;
    let mut max_vaddr: ElfPtrSize = 0;
    let mut found = false;
    for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
        found = true;
        if phdr.p_vaddr < min_vaddr {
            min_vaddr = phdr.p_vaddr;
        }
        if phdr.p_vaddr + phdr.p_memsz > max_vaddr {
            max_vaddr = phdr.p_vaddr + phdr.p_memsz;
        }
    }
    if !found {
        min_vaddr = 0;
    }
    LoadRange {
        min_vaddr: page_start(min_vaddr as usize),
        max_vaddr: page_end(max_vaddr as usize),
    }
}
