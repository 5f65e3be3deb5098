//! Argument-validating, result-marshalling surface over every subsystem.
//!
//! The gateway validates inputs and fails fast before any OS state is
//! touched: handles must be live, ids non-zero, names and patterns non-empty,
//! sizes positive. Addresses and 64-bit payloads are widened through
//! [`IntoAddress`], which makes float precision loss an explicit error.
//!
//! Every operation also exists in a `*_cb` completion-callback form. The two
//! shapes are semantically identical and share one core implementation: the
//! callback form merely hands the same `Result` to a continuation instead of
//! returning it.

use std::path::Path;

use crate::call::{self, CallResult};
use crate::debugger::{self, DebugEvent, SessionState};
use crate::error::{Error, Result};
use crate::hwbp::{HwRegister, Trigger, WatchLength};
use crate::inject::{self, ModuleRef};
use crate::mapping;
use crate::memory;
use crate::module::{self, ModuleInfo};
use crate::os::Handle;
use crate::pattern::{Pattern, ScanFlags};
use crate::process::{self, ProcessEntry, ProcessRef, ThreadInfo};
use crate::region::{self, Region};
use crate::scanner;
use crate::types::{IntoAddress, ReturnTag, TypeTag, Value};

/// Selects the target of an `open_process` request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ProcessSelector<'a> {
    Name(&'a str),
    Pid(u32),
}

fn check_handle(handle: Handle) -> Result<()> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }
    Ok(())
}

fn check_pid(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(Error::InvalidArgument(
            "process id cannot be zero".to_string(),
        ));
    }
    Ok(())
}

fn parse_pattern(pattern: &str) -> Result<Pattern> {
    if pattern.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "pattern cannot be empty".to_string(),
        ));
    }
    Pattern::parse(pattern)
}

// ==============================================================================================
// Enumeration and handles

pub fn open_process(selector: ProcessSelector<'_>) -> Result<ProcessRef> {
    match selector {
        ProcessSelector::Name(name) => {
            if name.trim().is_empty() {
                return Err(Error::InvalidArgument(
                    "process name cannot be empty".to_string(),
                ));
            }
            process::open_by_name(name)
        }
        ProcessSelector::Pid(pid) => {
            check_pid(pid)?;
            process::open_by_pid(pid)
        }
    }
}

pub fn close_handle(handle: Handle) -> Result<bool> {
    check_handle(handle)?;
    Ok(process::close_handle(handle))
}

pub fn get_processes() -> Result<Vec<ProcessEntry>> {
    process::get_processes()
}

pub fn get_modules(pid: u32) -> Result<Vec<ModuleInfo>> {
    check_pid(pid)?;
    module::get_modules(pid)
}

pub fn find_module(name: &str, pid: u32) -> Result<ModuleInfo> {
    check_pid(pid)?;
    module::find_module(name, pid)
}

pub fn get_threads(pid: u32) -> Result<Vec<ThreadInfo>> {
    check_pid(pid)?;
    process::get_threads(pid)
}

pub fn get_regions(handle: Handle) -> Result<Vec<Region>> {
    check_handle(handle)?;
    region::get_regions(handle)
}

pub fn virtual_query_ex(handle: Handle, address: impl IntoAddress) -> Result<Region> {
    check_handle(handle)?;
    region::virtual_query_ex(handle, address.into_address()?)
}

// ==============================================================================================
// Virtual memory management

pub fn virtual_alloc_ex(
    handle: Handle,
    address: Option<u64>,
    size: usize,
    allocation_type: u32,
    protection: u32,
) -> Result<u64> {
    check_handle(handle)?;
    memory::virtual_alloc_ex(handle, address, size, allocation_type, protection)
}

pub fn virtual_protect_ex(
    handle: Handle,
    address: impl IntoAddress,
    size: usize,
    protection: u32,
) -> Result<u32> {
    check_handle(handle)?;
    memory::virtual_protect_ex(handle, address.into_address()?, size, protection)
}

// ==============================================================================================
// Typed memory I/O

pub fn read_memory(handle: Handle, address: impl IntoAddress, data_type: &str) -> Result<Value> {
    check_handle(handle)?;
    let tag = TypeTag::parse(data_type)?;
    memory::read(handle, address.into_address()?, tag)
}

pub fn write_memory(handle: Handle, address: impl IntoAddress, value: &Value) -> Result<()> {
    check_handle(handle)?;
    memory::write(handle, address.into_address()?, value)
}

pub fn read_buffer(handle: Handle, address: impl IntoAddress, size: usize) -> Result<Vec<u8>> {
    check_handle(handle)?;
    memory::read_buffer(handle, address.into_address()?, size)
}

pub fn write_buffer(handle: Handle, address: impl IntoAddress, data: &[u8]) -> Result<()> {
    check_handle(handle)?;
    memory::write_buffer(handle, address.into_address()?, data)
}

/// Big-endian read for the fixed-width numeric tags, layered over
/// [`read_buffer`] the way the little-endian core never is.
pub fn read_memory_be(handle: Handle, address: impl IntoAddress, data_type: &str) -> Result<Value> {
    let tag = TypeTag::parse(data_type)?;
    let size = be_width(tag)?;
    let mut bytes = read_buffer(handle, address, size)?;
    bytes.reverse();
    Value::decode(tag, &bytes)
}

/// Big-endian write counterpart of [`read_memory_be`].
pub fn write_memory_be(handle: Handle, address: impl IntoAddress, value: &Value) -> Result<()> {
    be_width(value.tag())?;
    let mut bytes = value.encode();
    bytes.reverse();
    write_buffer(handle, address, &bytes)
}

fn be_width(tag: TypeTag) -> Result<usize> {
    match tag {
        TypeTag::I16
        | TypeTag::U16
        | TypeTag::I32
        | TypeTag::U32
        | TypeTag::I64
        | TypeTag::U64
        | TypeTag::F32
        | TypeTag::F64 => Ok(tag.size().expect("fixed-size tag")),
        _ => Err(Error::InvalidArgument(format!(
            "type tag {tag:?} has no big-endian form"
        ))),
    }
}

// ==============================================================================================
// Pattern scanning

pub fn find_pattern(handle: Handle, pattern: &str, flags: u16, pattern_offset: u32) -> Result<u64> {
    check_handle(handle)?;
    let compiled = parse_pattern(pattern)?;
    scanner::find_pattern(handle, &compiled, ScanFlags::from_bits(flags)?, pattern_offset)
}

pub fn find_pattern_by_module(
    handle: Handle,
    module_name: &str,
    pattern: &str,
    flags: u16,
    pattern_offset: u32,
) -> Result<u64> {
    check_handle(handle)?;
    if module_name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "module name cannot be empty".to_string(),
        ));
    }
    let compiled = parse_pattern(pattern)?;
    scanner::find_pattern_by_module(
        handle,
        module_name,
        &compiled,
        ScanFlags::from_bits(flags)?,
        pattern_offset,
    )
}

pub fn find_pattern_by_address(
    handle: Handle,
    search_address: impl IntoAddress,
    pattern: &str,
    flags: u16,
    pattern_offset: u32,
) -> Result<u64> {
    check_handle(handle)?;
    let compiled = parse_pattern(pattern)?;
    scanner::find_pattern_by_address(
        handle,
        search_address.into_address()?,
        &compiled,
        ScanFlags::from_bits(flags)?,
        pattern_offset,
    )
}

pub fn find_pattern_in_region(
    handle: Handle,
    base_address: impl IntoAddress,
    scan_size: usize,
    pattern: &str,
    flags: u16,
    pattern_offset: u32,
) -> Result<u64> {
    check_handle(handle)?;
    let base = base_address.into_address()?;
    if base == 0 {
        return Err(Error::InvalidArgument(
            "base address cannot be zero".to_string(),
        ));
    }
    if scan_size == 0 {
        return Err(Error::InvalidArgument(
            "scan size must be positive".to_string(),
        ));
    }
    let compiled = parse_pattern(pattern)?;
    scanner::find_pattern_in_region(
        handle,
        base,
        scan_size,
        &compiled,
        ScanFlags::from_bits(flags)?,
        pattern_offset,
    )
}

// ==============================================================================================
// Remote invocation and DLL lifecycle

pub fn call_function(
    handle: Handle,
    args: &[Value],
    return_type: &str,
    address: impl IntoAddress,
) -> Result<CallResult> {
    check_handle(handle)?;
    let return_tag = ReturnTag::parse(return_type)?;
    call::call_function(handle, args, return_tag, address.into_address()?)
}

pub fn inject_dll(handle: Handle, dll_path: &Path) -> Result<bool> {
    check_handle(handle)?;
    if !dll_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
    {
        return Err(Error::InvalidArgument(format!(
            "file is not of type '.dll': {}",
            dll_path.display()
        )));
    }
    if !dll_path.exists() {
        return Err(Error::InvalidArgument(format!(
            "file does not exist: {}",
            dll_path.display()
        )));
    }
    inject::inject_dll(handle, dll_path).map(|base| base != 0)
}

pub fn unload_dll(handle: Handle, module_ref: ModuleRef) -> Result<bool> {
    check_handle(handle)?;
    if let ModuleRef::Name(name) = &module_ref {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "module name cannot be empty".to_string(),
            ));
        }
    }
    inject::unload_dll(handle, &module_ref)
}

// ==============================================================================================
// Debugger

pub fn attach_debugger(pid: u32, kill_on_exit: bool) -> Result<bool> {
    check_pid(pid)?;
    debugger::attach(pid, kill_on_exit).map(|_| true)
}

pub fn detach_debugger(pid: u32) -> Result<bool> {
    check_pid(pid)?;
    debugger::detach(pid).map(|_| true)
}

pub fn debugger_state(pid: u32) -> SessionState {
    debugger::session_state(pid)
}

pub fn set_hardware_breakpoint(
    pid: u32,
    address: impl IntoAddress,
    register: u8,
    trigger: u8,
    length: u8,
) -> Result<bool> {
    check_pid(pid)?;
    let address = address.into_address()?;
    if address == 0 {
        return Err(Error::InvalidArgument(
            "breakpoint address cannot be zero; use remove_hardware_breakpoint".to_string(),
        ));
    }
    debugger::set_hardware_breakpoint(
        pid,
        address,
        HwRegister::from_index(register)?,
        Trigger::from_raw(trigger)?,
        WatchLength::from_raw(length)?,
    )
    .map(|_| true)
}

pub fn remove_hardware_breakpoint(pid: u32, register: u8) -> Result<bool> {
    check_pid(pid)?;
    debugger::remove_hardware_breakpoint(pid, HwRegister::from_index(register)?).map(|_| true)
}

pub fn await_debug_event(register: u8, timeout_ms: u32) -> Result<Option<DebugEvent>> {
    debugger::await_debug_event(HwRegister::from_index(register)?, timeout_ms)
}

pub fn handle_debug_event(pid: u32, tid: u32) -> Result<bool> {
    check_pid(pid)?;
    debugger::handle_debug_event(pid, tid).map(|_| true)
}

// ==============================================================================================
// File mappings

pub fn open_file_mapping(name: &str) -> Result<Handle> {
    mapping::open_file_mapping(name)
}

pub fn map_view_of_file(
    process_handle: Handle,
    section_handle: Handle,
    offset: u64,
    view_size: usize,
    page_protection: u32,
) -> Result<u64> {
    mapping::map_view_of_file(
        process_handle,
        section_handle,
        offset,
        view_size,
        page_protection,
    )
}

// ==============================================================================================
// Completion-callback forms
//
// Thin continuation wrappers over the functions above; the core logic is not
// forked. Errors arrive through the same `Result` the sync form returns.

pub fn open_process_cb<F>(selector: ProcessSelector<'_>, callback: F)
where
    F: FnOnce(Result<ProcessRef>),
{
    callback(open_process(selector));
}

pub fn close_handle_cb<F>(handle: Handle, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(close_handle(handle));
}

pub fn get_processes_cb<F>(callback: F)
where
    F: FnOnce(Result<Vec<ProcessEntry>>),
{
    callback(get_processes());
}

pub fn get_modules_cb<F>(pid: u32, callback: F)
where
    F: FnOnce(Result<Vec<ModuleInfo>>),
{
    callback(get_modules(pid));
}

pub fn find_module_cb<F>(name: &str, pid: u32, callback: F)
where
    F: FnOnce(Result<ModuleInfo>),
{
    callback(find_module(name, pid));
}

pub fn get_threads_cb<F>(pid: u32, callback: F)
where
    F: FnOnce(Result<Vec<ThreadInfo>>),
{
    callback(get_threads(pid));
}

pub fn get_regions_cb<F>(handle: Handle, callback: F)
where
    F: FnOnce(Result<Vec<Region>>),
{
    callback(get_regions(handle));
}

pub fn read_memory_cb<F>(handle: Handle, address: impl IntoAddress, data_type: &str, callback: F)
where
    F: FnOnce(Result<Value>),
{
    callback(read_memory(handle, address, data_type));
}

pub fn write_memory_cb<F>(handle: Handle, address: impl IntoAddress, value: &Value, callback: F)
where
    F: FnOnce(Result<()>),
{
    callback(write_memory(handle, address, value));
}

pub fn read_buffer_cb<F>(handle: Handle, address: impl IntoAddress, size: usize, callback: F)
where
    F: FnOnce(Result<Vec<u8>>),
{
    callback(read_buffer(handle, address, size));
}

pub fn write_buffer_cb<F>(handle: Handle, address: impl IntoAddress, data: &[u8], callback: F)
where
    F: FnOnce(Result<()>),
{
    callback(write_buffer(handle, address, data));
}

pub fn find_pattern_cb<F>(handle: Handle, pattern: &str, flags: u16, offset: u32, callback: F)
where
    F: FnOnce(Result<u64>),
{
    callback(find_pattern(handle, pattern, flags, offset));
}

pub fn call_function_cb<F>(
    handle: Handle,
    args: &[Value],
    return_type: &str,
    address: impl IntoAddress,
    callback: F,
) where
    F: FnOnce(Result<CallResult>),
{
    callback(call_function(handle, args, return_type, address));
}

pub fn inject_dll_cb<F>(handle: Handle, dll_path: &Path, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(inject_dll(handle, dll_path));
}

pub fn unload_dll_cb<F>(handle: Handle, module_ref: ModuleRef, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(unload_dll(handle, module_ref));
}

pub fn await_debug_event_cb<F>(register: u8, timeout_ms: u32, callback: F)
where
    F: FnOnce(Result<Option<DebugEvent>>),
{
    callback(await_debug_event(register, timeout_ms));
}

pub fn virtual_query_ex_cb<F>(handle: Handle, address: impl IntoAddress, callback: F)
where
    F: FnOnce(Result<Region>),
{
    callback(virtual_query_ex(handle, address));
}

pub fn virtual_alloc_ex_cb<F>(
    handle: Handle,
    address: Option<u64>,
    size: usize,
    allocation_type: u32,
    protection: u32,
    callback: F,
) where
    F: FnOnce(Result<u64>),
{
    callback(virtual_alloc_ex(handle, address, size, allocation_type, protection));
}

pub fn virtual_protect_ex_cb<F>(
    handle: Handle,
    address: impl IntoAddress,
    size: usize,
    protection: u32,
    callback: F,
) where
    F: FnOnce(Result<u32>),
{
    callback(virtual_protect_ex(handle, address, size, protection));
}

pub fn read_memory_be_cb<F>(handle: Handle, address: impl IntoAddress, data_type: &str, callback: F)
where
    F: FnOnce(Result<Value>),
{
    callback(read_memory_be(handle, address, data_type));
}

pub fn write_memory_be_cb<F>(handle: Handle, address: impl IntoAddress, value: &Value, callback: F)
where
    F: FnOnce(Result<()>),
{
    callback(write_memory_be(handle, address, value));
}

pub fn find_pattern_by_module_cb<F>(
    handle: Handle,
    module_name: &str,
    pattern: &str,
    flags: u16,
    offset: u32,
    callback: F,
) where
    F: FnOnce(Result<u64>),
{
    callback(find_pattern_by_module(handle, module_name, pattern, flags, offset));
}

pub fn find_pattern_by_address_cb<F>(
    handle: Handle,
    search_address: impl IntoAddress,
    pattern: &str,
    flags: u16,
    offset: u32,
    callback: F,
) where
    F: FnOnce(Result<u64>),
{
    callback(find_pattern_by_address(handle, search_address, pattern, flags, offset));
}

pub fn find_pattern_in_region_cb<F>(
    handle: Handle,
    base_address: impl IntoAddress,
    scan_size: usize,
    pattern: &str,
    flags: u16,
    offset: u32,
    callback: F,
) where
    F: FnOnce(Result<u64>),
{
    callback(find_pattern_in_region(
        handle,
        base_address,
        scan_size,
        pattern,
        flags,
        offset,
    ));
}

pub fn attach_debugger_cb<F>(pid: u32, kill_on_exit: bool, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(attach_debugger(pid, kill_on_exit));
}

pub fn detach_debugger_cb<F>(pid: u32, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(detach_debugger(pid));
}

pub fn set_hardware_breakpoint_cb<F>(
    pid: u32,
    address: impl IntoAddress,
    register: u8,
    trigger: u8,
    length: u8,
    callback: F,
) where
    F: FnOnce(Result<bool>),
{
    callback(set_hardware_breakpoint(pid, address, register, trigger, length));
}

pub fn remove_hardware_breakpoint_cb<F>(pid: u32, register: u8, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(remove_hardware_breakpoint(pid, register));
}

pub fn handle_debug_event_cb<F>(pid: u32, tid: u32, callback: F)
where
    F: FnOnce(Result<bool>),
{
    callback(handle_debug_event(pid, tid));
}

pub fn open_file_mapping_cb<F>(name: &str, callback: F)
where
    F: FnOnce(Result<Handle>),
{
    callback(open_file_mapping(name));
}

pub fn map_view_of_file_cb<F>(
    process_handle: Handle,
    section_handle: Handle,
    offset: u64,
    view_size: usize,
    page_protection: u32,
    callback: F,
) where
    F: FnOnce(Result<u64>),
{
    callback(map_view_of_file(
        process_handle,
        section_handle,
        offset,
        view_size,
        page_protection,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::ptr::null_mut;

    fn bogus_handle() -> Handle {
        // Looks live to the validator; every test below must fail before any
        // OS call could dereference it.
        Handle::from_raw(0x1234 as *mut core::ffi::c_void)
    }

    #[test]
    fn null_handles_are_rejected_up_front() {
        let null = Handle::from_raw(null_mut());
        assert!(matches!(
            read_memory(null, 0x1000u64, "u32"),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(
            find_pattern(null, "48 8B", 0, 0),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(close_handle(null), Err(Error::InvalidHandle)));
    }

    #[test]
    fn unknown_type_tags_fail_before_the_read() {
        assert!(matches!(
            read_memory(bogus_handle(), 0x1000u64, "dword"),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn float_addresses_widen_or_fail_explicitly() {
        assert!(matches!(
            read_memory(bogus_handle(), 0.5f64, "u32"),
            Err(Error::PrecisionLoss(_))
        ));
        assert!(read_memory(bogus_handle(), -4.0f64, "u32").is_err());
    }

    #[test]
    fn empty_and_malformed_patterns_are_distinguished() {
        assert!(matches!(
            find_pattern(bogus_handle(), "  ", 0, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            find_pattern(bogus_handle(), "XY", 0, 0),
            Err(Error::PatternSyntax(_))
        ));
        assert!(matches!(
            find_pattern(bogus_handle(), "48 8B", 0x8, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn region_scan_rejects_degenerate_windows() {
        assert!(matches!(
            find_pattern_in_region(bogus_handle(), 0u64, 16, "48", 0, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            find_pattern_in_region(bogus_handle(), 0x1000u64, 0, "48", 0, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn inject_validates_the_path_shape() {
        assert!(matches!(
            inject_dll(bogus_handle(), &PathBuf::from("payload.exe")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            inject_dll(bogus_handle(), &PathBuf::from("C:\\does\\not\\exist.dll")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn breakpoint_arguments_are_validated_at_the_gate() {
        assert!(matches!(
            set_hardware_breakpoint(4321, 0u64, 0, 0, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(set_hardware_breakpoint(4321, 0x1000u64, 4, 0, 1).is_err());
        assert!(set_hardware_breakpoint(4321, 0x1000u64, 0, 2, 1).is_err());
        assert!(set_hardware_breakpoint(4321, 0x1000u64, 0, 0, 3).is_err());
        assert!(matches!(
            handle_debug_event(0, 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn big_endian_accessors_cover_numeric_tags_only() {
        assert!(matches!(
            read_memory_be(bogus_handle(), 0x1000u64, "u8"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            write_memory_be(bogus_handle(), 0x1000u64, &Value::Bool(true)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn callback_form_delivers_the_same_result() {
        let mut seen = None;
        read_memory_cb(
            Handle::from_raw(null_mut()),
            0x1000u64,
            "u32",
            |result| seen = Some(result),
        );
        assert!(matches!(seen, Some(Err(Error::InvalidHandle))));
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(matches!(
            open_process(ProcessSelector::Name("  ")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            open_process(ProcessSelector::Pid(0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            open_file_mapping(""),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            find_module("", 1234),
            Err(Error::InvalidArgument(_))
        ));
    }
}
