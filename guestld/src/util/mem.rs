//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use std::mem::size_of;
use std::slice::from_raw_parts_mut;

/// Views a plain struct as its raw bytes so a positional read can fill it
/// in place.
/// # Safety
/// `T` must be a plain-old-data type: any bit pattern the read produces
/// must be a valid `T`.
pub unsafe fn struct_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    from_raw_parts_mut((val as *mut T).cast::<u8>(), size_of::<T>())
}
