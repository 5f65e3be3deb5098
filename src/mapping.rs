//! Named file-mapping sections shared across processes.

use std::ffi::c_void;
use std::ptr::null;

use windows_sys::Win32::Foundation::FALSE;
use windows_sys::Win32::System::Memory::{
    FILE_MAP_ALL_ACCESS, MapViewOfFileNuma2, OpenFileMappingW,
};

use crate::error::{Error, OsKind, Result};
use crate::os::{self, Handle};

const NUMA_NO_PREFERRED_NODE: u32 = u32::MAX;

/// Opens an existing named section for full access.
pub fn open_file_mapping(name: &str) -> Result<Handle> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "mapping name cannot be empty".to_string(),
        ));
    }

    let wide_name = os::utf16_str(name);
    let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
    if handle.is_null() {
        Err(os::last_error(OsKind::Open, "OpenFileMappingW"))
    } else {
        Ok(Handle::from_raw(handle))
    }
}

/// Maps a view of the section into the target's address space and returns the
/// OS-chosen base. A `view_size` of zero maps from `offset` to the section's
/// end. No host-side mirror of the mapping is retained.
pub fn map_view_of_file(
    process_handle: Handle,
    section_handle: Handle,
    offset: u64,
    view_size: usize,
    page_protection: u32,
) -> Result<u64> {
    if process_handle.is_invalid() || section_handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }

    let view = unsafe {
        MapViewOfFileNuma2(
            section_handle.raw(),
            process_handle.raw(),
            offset,
            null::<c_void>(),
            view_size,
            0,
            page_protection,
            NUMA_NO_PREFERRED_NODE,
        )
    };
    if view.Value.is_null() {
        Err(os::last_error(OsKind::Alloc, "MapViewOfFileNuma2"))
    } else {
        Ok(view.Value as usize as u64)
    }
}
