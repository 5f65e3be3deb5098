//! Virtual-memory region enumeration and queries.

use windows_sys::Win32::System::Memory::MEM_COMMIT;

use crate::os::{self, Handle};
use crate::error::Result;

/// A maximal run of pages sharing state, protection, and mapping type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Region {
    pub base_address: u64,
    pub allocation_base: u64,
    pub allocation_protect: u32,
    pub size: usize,
    /// Page state: free, reserved, or committed (`MEM_*` constants).
    pub state: u32,
    pub protect: u32,
    /// Mapping type: image, mapped, or private (`MEM_*` constants).
    pub kind: u32,
    /// Executable file backing the allocation base, where the OS knows one.
    pub image_file: Option<String>,
}

impl Region {
    pub fn is_committed(&self) -> bool {
        self.state == MEM_COMMIT
    }
}

/// Describes the region containing `address`.
pub fn virtual_query_ex(handle: Handle, address: u64) -> Result<Region> {
    let info = os::virtual_query(handle, address)?;
    let allocation_base = info.AllocationBase as usize as u64;
    Ok(Region {
        base_address: info.BaseAddress as usize as u64,
        allocation_base,
        allocation_protect: info.AllocationProtect,
        size: info.RegionSize,
        state: info.State,
        protect: info.Protect,
        kind: info.Type,
        image_file: os::mapped_file_name(handle, allocation_base),
    })
}

/// Walks the target's address space from the bottom up, one region per
/// `VirtualQueryEx` step, until the OS stops answering.
pub fn get_regions(handle: Handle) -> Result<Vec<Region>> {
    let mut regions = Vec::new();
    let mut address = 0u64;

    while let Ok(info) = os::virtual_query(handle, address) {
        let base = info.BaseAddress as usize as u64;
        let allocation_base = info.AllocationBase as usize as u64;
        regions.push(Region {
            base_address: base,
            allocation_base,
            allocation_protect: info.AllocationProtect,
            size: info.RegionSize,
            state: info.State,
            protect: info.Protect,
            kind: info.Type,
            image_file: if allocation_base != 0 {
                os::mapped_file_name(handle, allocation_base)
            } else {
                None
            },
        });

        let next = base.saturating_add(info.RegionSize as u64);
        if next <= address {
            break;
        }
        address = next;
    }

    Ok(regions)
}
