//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;

use crate::elf::header::{
    Header, ELFDATA2LSB, ELFMAG, ELFCLASS, EI_CLASS, EI_DATA, ET_DYN, EV_CURRENT, SELFMAG,
    SIZEOF_EHDR,
};
use crate::loader::error::{LoadError, Result};
use crate::util::io::pread;
use crate::util::mem::struct_bytes_mut;
use crate::EM_HOST;

/// Reads the fixed ELF header at `file_offset`.
pub fn read_ehdr(fd: RawFd, file_offset: u64) -> Result<Header> {
    let mut header = Header::default();
    let buf = unsafe { struct_bytes_mut(&mut header) };
    let got = pread(fd, buf, file_offset).map_err(|errno| LoadError::Io {
        op: "pread",
        errno,
    })?;
    if got != SIZEOF_EHDR {
        return Err(LoadError::ShortRead {
            expected: SIZEOF_EHDR,
            got,
        });
    }
    Ok(header)
}

/// Validates the header for loading into this process. Checks run in a
/// fixed order and each failure carries its own diagnostic.
pub fn verify_ehdr(header: &Header) -> Result<()> {
    if &header.e_ident[..SELFMAG] != ELFMAG {
        return Err(LoadError::BadMagic);
    }
    if header.e_ident[EI_CLASS] != ELFCLASS {
        return Err(LoadError::BadClass {
            got: header.e_ident[EI_CLASS],
        });
    }
    if header.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(LoadError::BadEndianness);
    }
    if header.e_type != ET_DYN {
        return Err(LoadError::BadType);
    }
    if header.e_version != EV_CURRENT as u32 {
        return Err(LoadError::BadVersion);
    }
    if header.e_machine != EM_HOST {
        return Err(LoadError::BadMachine {
            got: header.e_machine,
        });
    }
    Ok(())
}
