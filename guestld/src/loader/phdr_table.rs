//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;
use std::slice::from_raw_parts;

use log::trace;

use crate::elf::header::Header;
use crate::elf::program_header::{ProgramHeader, SIZEOF_PHDR};
use crate::loader::error::{LoadError, Result};
use crate::loader::file_window::FileWindow;

// Like the kernel, accept only program header tables up to 64 KiB.
const MAX_PHDR_TABLE_BYTES: usize = 64 * 1024;

/// The program header table, mapped privately from the file.
pub struct PhdrTable {
    window: FileWindow,
    count: usize,
}

impl PhdrTable {
    pub fn read(fd: RawFd, file_offset: u64, header: &Header) -> Result<Self> {
        let count = header.e_phnum as usize;
        if count < 1 || count * SIZEOF_PHDR > MAX_PHDR_TABLE_BYTES {
            return Err(LoadError::BadPhdrCount { n: count });
        }

        let window = FileWindow::map(fd, file_offset + header.e_phoff as u64, count * SIZEOF_PHDR)?;
        trace!(
            "mapped {} program headers at file offset 0x{:x}",
            count,
            header.e_phoff
        );
        Ok(Self { window, count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn entries(&self) -> &[ProgramHeader] {
        unsafe { from_raw_parts(self.window.ptr().cast::<ProgramHeader>(), self.count) }
    }
}
