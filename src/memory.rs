//! Typed cross-process memory access with strict partial-I/O discipline.
//!
//! Every operation transfers exactly the requested byte count or fails; no
//! partial success is surfaced. Scalars use the target's native (little-endian)
//! layout, dispatched through [`TypeTag`]/[`Value`].

use crate::error::{Error, OsKind, Result};
use crate::os::{self, Handle};
use crate::types::{TypeTag, Value};

/// Strings are collected from the target in fixed batches of this many bytes.
const STRING_BATCH: usize = 256;
/// Hard cap on batches scanned for a terminator (~1 MiB).
const STRING_MAX_BATCHES: usize = 4096;

fn check_target(handle: Handle, address: u64) -> Result<()> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }
    if address == 0 {
        return Err(Error::InvalidArgument(
            "address cannot be zero".to_string(),
        ));
    }
    Ok(())
}

/// Reads a value of the given shape from the target's address space.
///
/// `string` follows the batched terminator protocol of [`read_string`]; every
/// other tag reads exactly `tag.size()` bytes.
pub fn read(handle: Handle, address: u64, tag: TypeTag) -> Result<Value> {
    check_target(handle, address)?;

    if tag == TypeTag::String {
        return read_string(handle, address).map(Value::String);
    }

    let size = tag.size().expect("fixed-size tag");
    let mut buffer = vec![0u8; size];
    os::read_exact(handle, address, &mut buffer)?;
    Value::decode(tag, &buffer)
}

/// Writes a value into the target's address space.
///
/// Strings are written with a trailing NUL byte.
pub fn write(handle: Handle, address: u64, value: &Value) -> Result<()> {
    check_target(handle, address)?;
    os::write_exact(handle, address, &value.encode())
}

/// Reads exactly `size` bytes; a short read is a failure.
pub fn read_buffer(handle: Handle, address: u64, size: usize) -> Result<Vec<u8>> {
    check_target(handle, address)?;
    if size == 0 {
        return Err(Error::InvalidArgument(
            "buffer size must be positive".to_string(),
        ));
    }
    let mut buffer = vec![0u8; size];
    os::read_exact(handle, address, &mut buffer)?;
    Ok(buffer)
}

/// Writes the whole buffer; a short write is a failure.
pub fn write_buffer(handle: Handle, address: u64, data: &[u8]) -> Result<()> {
    check_target(handle, address)?;
    if data.is_empty() {
        return Err(Error::InvalidArgument(
            "buffer cannot be empty".to_string(),
        ));
    }
    os::write_exact(handle, address, data)
}

/// Collects a NUL-terminated byte sequence starting at `address`.
///
/// The target is read in [`STRING_BATCH`]-byte steps. The scan succeeds when a
/// NUL is found (excluded from the result), or when the readable range ends
/// after at least one byte was collected. It fails when the very first batch
/// is unreadable, or when [`STRING_MAX_BATCHES`] batches pass without a
/// terminator.
pub fn read_string(handle: Handle, address: u64) -> Result<String> {
    check_target(handle, address)?;

    let mut collected: Vec<u8> = Vec::new();
    let mut current = address;

    for _ in 0..STRING_MAX_BATCHES {
        let mut batch = [0u8; STRING_BATCH];
        let read = os::read_batch(handle, current, &mut batch);

        if read == 0 {
            return if collected.is_empty() {
                Err(os::last_error(OsKind::Read, "ReadProcessMemory"))
            } else {
                Ok(String::from_utf8_lossy(&collected).into_owned())
            };
        }

        if let Some(terminator) = batch[..read].iter().position(|&b| b == 0) {
            collected.extend_from_slice(&batch[..terminator]);
            return Ok(String::from_utf8_lossy(&collected).into_owned());
        }

        collected.extend_from_slice(&batch[..read]);
        current += read as u64;

        // A short batch marks the end of the readable range.
        if read < STRING_BATCH {
            return if collected.is_empty() {
                Err(os::last_error(OsKind::Read, "ReadProcessMemory"))
            } else {
                Ok(String::from_utf8_lossy(&collected).into_owned())
            };
        }
    }

    Err(Error::NotFound(format!(
        "string terminator within {} bytes of {address:#x}",
        STRING_BATCH * STRING_MAX_BATCHES
    )))
}

/// Allocates memory in the target's virtual address space.
pub fn virtual_alloc_ex(
    handle: Handle,
    address: Option<u64>,
    size: usize,
    allocation_type: u32,
    protection: u32,
) -> Result<u64> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }
    if size == 0 {
        return Err(Error::InvalidArgument(
            "allocation size must be positive".to_string(),
        ));
    }
    os::virtual_alloc(handle, address, size, allocation_type, protection)
}

/// Changes the protection of a region in the target; returns the previous
/// protection value.
pub fn virtual_protect_ex(
    handle: Handle,
    address: u64,
    size: usize,
    protection: u32,
) -> Result<u32> {
    check_target(handle, address)?;
    if size == 0 {
        return Err(Error::InvalidArgument(
            "region size must be positive".to_string(),
        ));
    }
    os::virtual_protect(handle, address, size, protection)
}
