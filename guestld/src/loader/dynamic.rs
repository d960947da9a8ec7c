//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::os::unix::io::RawFd;
use std::slice::from_raw_parts;

use log::trace;

use crate::elf::dynamic::{Dyn, SIZEOF_DYN};
use crate::elf::header::Header;
use crate::elf::section_header::{SectionHeader, SHT_DYNAMIC, SHT_STRTAB, SIZEOF_SHDR};
use crate::loader::error::{LoadError, Result};
use crate::loader::file_window::FileWindow;

/// Borrowed view over the `.dynamic` section and its string table. The
/// windows backing the pointers are owned by the reader/image.
#[derive(Clone, Copy, Debug)]
pub struct DynamicView {
    pub dyn_ptr: *const Dyn,
    pub dyn_count: usize,
    pub strtab_ptr: *const u8,
    pub strtab_size: usize,
}

/// The file windows behind a [`DynamicView`], owned by the image for its
/// whole lifetime.
#[derive(Debug)]
pub struct DynamicWindows {
    pub shdr: FileWindow,
    pub dynamic: FileWindow,
    pub strtab: FileWindow,
}

/// Locates SHT_DYNAMIC through the section header table and maps it
/// together with the string table it links to.
///
/// An object with `e_shnum == 0` is a legal shared object that simply has
/// no section headers; it reports `NoDynamic` and callers treat the
/// dynamic section as unavailable.
pub fn read_dynamic(
    fd: RawFd,
    file_offset: u64,
    header: &Header,
) -> Result<(DynamicWindows, DynamicView)> {
    let shnum = header.e_shnum as usize;
    if shnum == 0 {
        return Err(LoadError::NoDynamic);
    }

    let shdr_window = FileWindow::map(fd, file_offset + header.e_shoff as u64, shnum * SIZEOF_SHDR)?;
    let shdrs = unsafe { from_raw_parts(shdr_window.ptr().cast::<SectionHeader>(), shnum) };

    let dynamic_shdr = *shdrs
        .iter()
        .find(|shdr| shdr.sh_type == SHT_DYNAMIC)
        .ok_or(LoadError::NoDynamic)?;
    let link = dynamic_shdr.sh_link as usize;
    if link >= shnum {
        return Err(LoadError::BadDynamicLink);
    }
    let strtab_shdr = shdrs[link];
    if strtab_shdr.sh_type != SHT_STRTAB {
        return Err(LoadError::BadStrtabType);
    }

    let dynamic_window = FileWindow::map(
        fd,
        file_offset + dynamic_shdr.sh_offset as u64,
        dynamic_shdr.sh_size as usize,
    )?;
    let strtab_window = FileWindow::map(
        fd,
        file_offset + strtab_shdr.sh_offset as u64,
        strtab_shdr.sh_size as usize,
    )?;
    trace!(
        "dynamic section: {} tags, string table {} bytes",
        dynamic_shdr.sh_size as usize / SIZEOF_DYN,
        strtab_shdr.sh_size
    );

    let view = DynamicView {
        dyn_ptr: dynamic_window.ptr().cast::<Dyn>(),
        dyn_count: dynamic_shdr.sh_size as usize / SIZEOF_DYN,
        strtab_ptr: strtab_window.ptr(),
        strtab_size: strtab_shdr.sh_size as usize,
    };
    let windows = DynamicWindows {
        shdr: shdr_window,
        dynamic: dynamic_window,
        strtab: strtab_window,
    };
    Ok((windows, view))
}
