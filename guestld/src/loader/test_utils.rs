//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::fs::File;
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};

use scroll::Pwrite;

use crate::elf::dynamic::{Dyn, SIZEOF_DYN};
use crate::elf::header::{
    Header, ELFCLASS, ELFDATA2LSB, ELFMAG, EI_CLASS, EI_DATA, EI_VERSION, ET_DYN, EV_CURRENT,
    SELFMAG, SIZEOF_EHDR,
};
use crate::elf::program_header::{
    ProgramHeader, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_GNU_RELRO, PT_LOAD, PT_PHDR, SIZEOF_PHDR,
};
use crate::elf::section_header::{
    SectionHeader, SHT_DYNAMIC, SHT_STRTAB, SIZEOF_SHDR,
};
use crate::{ElfPtrSize, EM_HOST};

/// Byte that fills the loadable file content of fixture objects, so tests
/// can tell file-backed bytes from bss.
pub const FILL: u8 = 0xaa;

/// A header that passes every validation check on the host.
pub fn valid_ehdr() -> Header {
    let mut e_ident = [0u8; 16];
    e_ident[..SELFMAG].copy_from_slice(ELFMAG);
    e_ident[EI_CLASS] = ELFCLASS;
    e_ident[EI_DATA] = ELFDATA2LSB;
    e_ident[EI_VERSION] = EV_CURRENT;

    Header {
        e_ident,
        e_type: ET_DYN,
        e_machine: EM_HOST,
        e_version: EV_CURRENT as u32,
        e_phoff: SIZEOF_EHDR as ElfPtrSize,
        e_ehsize: SIZEOF_EHDR as u16,
        e_phentsize: SIZEOF_PHDR as u16,
        e_shentsize: SIZEOF_SHDR as u16,
        ..Default::default()
    }
}

/// Shorthand for a loadable segment description:
/// `(p_offset, p_vaddr, p_filesz, p_memsz, p_flags)`.
pub type SegmentDesc = (ElfPtrSize, ElfPtrSize, ElfPtrSize, ElfPtrSize, u32);

/// A synthetic ET_DYN object written to an unlinked temp file. The
/// default shape is the two-segment object from the loader scenarios:
/// an RX segment at vaddr 0x1000 backed by file offset 0 (so the ELF
/// header itself is mapped) and an RW segment with bss behind it.
pub struct TestImage {
    file: File,
    header: Header,
}

impl TestImage {
    pub fn builder() -> TestImageBuilder {
        TestImageBuilder::default()
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn header(&self) -> Header {
        self.header
    }

    /// A zero-filled scratch file of the given size.
    pub fn raw_file(size: usize) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0u8; size]).unwrap();
        file
    }
}

pub struct TestImageBuilder {
    loads: Vec<SegmentDesc>,
    relro: Option<(ElfPtrSize, ElfPtrSize)>,
    pt_phdr: bool,
    pt_dynamic: Option<ElfPtrSize>,
    dynamic: Option<(Vec<(ElfPtrSize, ElfPtrSize)>, Vec<u8>)>,
    corrupt_dynamic_link: Option<u32>,
}

impl Default for TestImageBuilder {
    fn default() -> Self {
        Self {
            loads: vec![
                (0, 0x1000, 0x4000, 0x4000, PF_R | PF_X),
                (0x4000, 0x5000, 0x2000, 0x8000, PF_R | PF_W),
            ],
            relro: None,
            pt_phdr: false,
            pt_dynamic: None,
            dynamic: None,
            corrupt_dynamic_link: None,
        }
    }
}

impl TestImageBuilder {
    pub fn loads(mut self, loads: Vec<SegmentDesc>) -> Self {
        self.loads = loads;
        self
    }

    pub fn relro(mut self, vaddr: ElfPtrSize, memsz: ElfPtrSize) -> Self {
        self.relro = Some((vaddr, memsz));
        self
    }

    pub fn pt_phdr(mut self) -> Self {
        self.pt_phdr = true;
        self
    }

    pub fn pt_dynamic(mut self, vaddr: ElfPtrSize) -> Self {
        self.pt_dynamic = Some(vaddr);
        self
    }

    pub fn dynamic(mut self, tags: &[(ElfPtrSize, ElfPtrSize)], strtab: &[u8]) -> Self {
        self.dynamic = Some((tags.to_vec(), strtab.to_vec()));
        self
    }

    pub fn corrupt_dynamic_link(mut self, link: u32) -> Self {
        self.corrupt_dynamic_link = Some(link);
        self
    }

    pub fn build(self) -> TestImage {
        let phnum = self.loads.len()
            + usize::from(self.pt_phdr)
            + usize::from(self.pt_dynamic.is_some())
            + usize::from(self.relro.is_some());

        let mut phdrs: Vec<ProgramHeader> = Vec::with_capacity(phnum);
        if self.pt_phdr {
            // The table lives right after the ELF header inside the first
            // segment, which maps file offset 0.
            let first_vaddr = self.loads[0].1;
            phdrs.push(ProgramHeader {
                p_type: PT_PHDR,
                p_offset: SIZEOF_EHDR as ElfPtrSize,
                p_vaddr: first_vaddr + SIZEOF_EHDR as ElfPtrSize,
                p_filesz: (phnum * SIZEOF_PHDR) as ElfPtrSize,
                p_memsz: (phnum * SIZEOF_PHDR) as ElfPtrSize,
                p_flags: PF_R,
                ..Default::default()
            });
        }
        for (p_offset, p_vaddr, p_filesz, p_memsz, p_flags) in &self.loads {
            phdrs.push(ProgramHeader {
                p_type: PT_LOAD,
                p_offset: *p_offset,
                p_vaddr: *p_vaddr,
                p_filesz: *p_filesz,
                p_memsz: *p_memsz,
                p_flags: *p_flags,
                p_align: 0x1000,
                ..Default::default()
            });
        }
        if let Some(vaddr) = self.pt_dynamic {
            phdrs.push(ProgramHeader {
                p_type: PT_DYNAMIC,
                p_vaddr: vaddr,
                p_filesz: SIZEOF_DYN as ElfPtrSize,
                p_memsz: SIZEOF_DYN as ElfPtrSize,
                p_flags: PF_R | PF_W,
                ..Default::default()
            });
        }
        if let Some((vaddr, memsz)) = self.relro {
            phdrs.push(ProgramHeader {
                p_type: PT_GNU_RELRO,
                p_vaddr: vaddr,
                p_memsz: memsz,
                p_flags: PF_R,
                ..Default::default()
            });
        }

        let content_end = self
            .loads
            .iter()
            .map(|(offset, _, filesz, _, _)| (offset + filesz) as usize)
            .max()
            .unwrap_or(SIZEOF_EHDR + phnum * SIZEOF_PHDR);

        // Extra (non-loaded) file structure behind the segment content.
        let (tags, strtab) = self
            .dynamic
            .clone()
            .unwrap_or((Vec::new(), Vec::new()));
        let dyn_offset = align8(content_end);
        let strtab_offset = dyn_offset + tags.len() * SIZEOF_DYN;
        let shdr_offset = align8(strtab_offset + strtab.len());
        let shnum = if self.dynamic.is_some() { 3 } else { 1 };
        let total = shdr_offset + shnum * SIZEOF_SHDR;

        let mut header = valid_ehdr();
        header.e_phnum = phnum as u16;
        header.e_shoff = shdr_offset as ElfPtrSize;
        header.e_shnum = shnum as u16;

        let mut contents = vec![FILL; total];
        contents[content_end..].fill(0);
        contents
            .pwrite_with(header, 0, scroll::NATIVE)
            .unwrap();
        for (i, phdr) in phdrs.iter().enumerate() {
            contents
                .pwrite_with(*phdr, SIZEOF_EHDR + i * SIZEOF_PHDR, scroll::NATIVE)
                .unwrap();
        }

        // Section header table: a null entry, then .dynamic linked to
        // .dynstr when the fixture has one.
        let mut shdrs = vec![SectionHeader::default()];
        if self.dynamic.is_some() {
            for (i, (d_tag, d_val)) in tags.iter().enumerate() {
                contents
                    .pwrite_with(
                        Dyn {
                            d_tag: *d_tag,
                            d_val: *d_val,
                        },
                        dyn_offset + i * SIZEOF_DYN,
                        scroll::NATIVE,
                    )
                    .unwrap();
            }
            contents[strtab_offset..strtab_offset + strtab.len()].copy_from_slice(&strtab);
            shdrs.push(SectionHeader {
                sh_type: SHT_DYNAMIC,
                sh_offset: dyn_offset as ElfPtrSize,
                sh_size: (tags.len() * SIZEOF_DYN) as ElfPtrSize,
                sh_link: self.corrupt_dynamic_link.unwrap_or(2),
                ..Default::default()
            });
            shdrs.push(SectionHeader {
                sh_type: SHT_STRTAB,
                sh_offset: strtab_offset as ElfPtrSize,
                sh_size: strtab.len() as ElfPtrSize,
                ..Default::default()
            });
        }
        for (i, shdr) in shdrs.iter().enumerate() {
            contents
                .pwrite_with(*shdr, shdr_offset + i * SIZEOF_SHDR, scroll::NATIVE)
                .unwrap();
        }

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&contents).unwrap();
        TestImage { file, header }
    }
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}
