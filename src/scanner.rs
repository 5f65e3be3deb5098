//! Pattern-scan surfaces over modules and memory regions.
//!
//! Each candidate (a module or a committed region) is read into a host buffer
//! once, matched against the compiled pattern, and post-processed per the scan
//! flags: READ dereferences a pointer-sized little-endian word at the hit,
//! SUBTRACT rebases the result against the candidate's own base. The order is
//! fixed: READ, then SUBTRACT.

use crate::error::{Error, Result};
use crate::module::{self, ModuleInfo};
use crate::os::{self, Handle};
use crate::pattern::{Pattern, ScanFlags};
use crate::region;
use crate::{debug, info};

/// A scannable byte range of the target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Candidate {
    base: u64,
    size: usize,
}

/// Applies READ/SUBTRACT post-processing to a raw hit address.
fn finish_hit(handle: Handle, base: u64, raw_address: u64, flags: ScanFlags) -> Result<u64> {
    let mut address = raw_address;

    if flags.reads() {
        let mut word = [0u8; size_of::<usize>()];
        os::read_exact(handle, address, &mut word)?;
        address = usize::from_le_bytes(word) as u64;
    }
    if flags.subtracts() {
        address = address.wrapping_sub(base);
    }
    Ok(address)
}

/// Matches the pattern inside an already-read window starting at `base`.
fn scan_window(
    handle: Handle,
    base: u64,
    window: &[u8],
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<Option<u64>> {
    match pattern.find(window) {
        Some(index) => {
            let raw = base + index as u64 + pattern_offset as u64;
            finish_hit(handle, base, raw, flags).map(Some)
        }
        None => Ok(None),
    }
}

/// Scans one candidate, treating an unreadable candidate as "no hit".
fn scan_candidate(
    handle: Handle,
    candidate: Candidate,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<Option<u64>> {
    if candidate.size < pattern.len() {
        return Ok(None);
    }

    let mut window = vec![0u8; candidate.size];
    if os::read_exact(handle, candidate.base, &mut window).is_err() {
        debug!("skipping unreadable candidate at {:#x}", candidate.base);
        return Ok(None);
    }

    scan_window(handle, candidate.base, &window, pattern, flags, pattern_offset)
}

fn committed_candidates(handle: Handle) -> Result<Vec<Candidate>> {
    Ok(region::get_regions(handle)?
        .into_iter()
        .filter(|r| r.is_committed())
        .map(|r| Candidate {
            base: r.base_address,
            size: r.size,
        })
        .collect())
}

fn module_candidates(handle: Handle) -> Result<Vec<Candidate>> {
    let pid = os::process_id_of(handle)?;
    Ok(module::get_modules(pid)?
        .into_iter()
        .map(|m| Candidate {
            base: m.base_address,
            size: m.size as usize,
        })
        .collect())
}

/// Scans every module of the target in enumeration order, then every
/// committed region; the first hit across the combined sequence wins.
pub fn find_pattern(
    handle: Handle,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<u64> {
    let mut candidates = module_candidates(handle)?;
    candidates.extend(committed_candidates(handle)?);

    info!(
        "scanning {} candidates for a {}-byte pattern",
        candidates.len(),
        pattern.len()
    );

    for candidate in candidates {
        if let Some(address) = scan_candidate(handle, candidate, pattern, flags, pattern_offset)? {
            return Ok(address);
        }
    }
    Err(Error::NotFound("pattern".to_string()))
}

/// Scans a single module's full image range.
pub fn scan_module(
    handle: Handle,
    module: &ModuleInfo,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<u64> {
    let mut window = vec![0u8; module.size as usize];
    os::read_exact(handle, module.base_address, &mut window)?;

    scan_window(
        handle,
        module.base_address,
        &window,
        pattern,
        flags,
        pattern_offset,
    )?
    .ok_or_else(|| Error::NotFound(format!("pattern in module '{}'", module.name)))
}

/// Resolves `module_name` in the target and scans that module.
pub fn find_pattern_by_module(
    handle: Handle,
    module_name: &str,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<u64> {
    let pid = os::process_id_of(handle)?;
    let module = module::find_module(module_name, pid)?;
    scan_module(handle, &module, pattern, flags, pattern_offset)
}

/// Scans the module+region candidate list filtered down to the candidate
/// whose base equals `search_address`; zero names no candidate and scans the
/// whole list.
pub fn find_pattern_by_address(
    handle: Handle,
    search_address: u64,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<u64> {
    if search_address == 0 {
        return find_pattern(handle, pattern, flags, pattern_offset);
    }

    let mut candidates = module_candidates(handle)?;
    candidates.extend(committed_candidates(handle)?);

    for candidate in candidates {
        if candidate.base != search_address {
            continue;
        }
        if let Some(address) = scan_candidate(handle, candidate, pattern, flags, pattern_offset)? {
            return Ok(address);
        }
    }
    Err(Error::NotFound(format!(
        "pattern at candidate base {search_address:#x}"
    )))
}

/// Scans an arbitrary `scan_size`-byte window at `base_address`.
///
/// Unlike the list-driven surfaces, an unreadable window here is an error,
/// not a silent skip: the caller named this exact range.
pub fn find_pattern_in_region(
    handle: Handle,
    base_address: u64,
    scan_size: usize,
    pattern: &Pattern,
    flags: ScanFlags,
    pattern_offset: u32,
) -> Result<u64> {
    let mut window = vec![0u8; scan_size];
    os::read_exact(handle, base_address, &mut window)?;

    scan_window(handle, base_address, &window, pattern, flags, pattern_offset)?
        .ok_or_else(|| Error::NotFound(format!("pattern in region {base_address:#x}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: [u8; 8] = [0x48, 0x8B, 0x05, 0x11, 0x22, 0x33, 0x44, 0xC3];

    fn handle() -> Handle {
        // NORMAL and SUBTRACT post-processing never dereference the target,
        // so a dummy handle is enough to exercise the hit arithmetic.
        Handle::from_raw(0x1234 as *mut core::ffi::c_void)
    }

    #[test]
    fn hit_address_is_base_plus_index_plus_offset() {
        let pattern = Pattern::parse("48 8B 05 ?? ?? ?? ?? C3").unwrap();
        let hit = scan_window(handle(), 0x1000, &WINDOW, &pattern, ScanFlags::NORMAL, 3).unwrap();
        assert_eq!(hit, Some(0x1003));
    }

    #[test]
    fn subtract_rebases_against_the_candidate_base() {
        let pattern = Pattern::parse("48 8B 05 ?? ?? ?? ?? C3").unwrap();
        let hit =
            scan_window(handle(), 0x1000, &WINDOW, &pattern, ScanFlags::SUBTRACT, 3).unwrap();
        assert_eq!(hit, Some(3));
    }

    #[test]
    fn interior_match_keeps_its_window_offset() {
        let mut window = vec![0u8; 16];
        window.extend_from_slice(&WINDOW);
        let pattern = Pattern::parse("48 8B 05").unwrap();
        let hit = scan_window(handle(), 0x2000, &window, &pattern, ScanFlags::NORMAL, 0).unwrap();
        assert_eq!(hit, Some(0x2010));
    }

    #[test]
    fn a_miss_is_none_not_an_error() {
        let pattern = Pattern::parse("DE AD BE EF").unwrap();
        let hit = scan_window(handle(), 0x1000, &WINDOW, &pattern, ScanFlags::NORMAL, 0).unwrap();
        assert_eq!(hit, None);
    }
}
