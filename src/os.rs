//! Thin safe wrappers over the Win32 process, memory, thread, and snapshot APIs.
//!
//! Every other module goes through this facade: raw handles stay behind
//! [`Handle`] (caller-released) or [`HandleGuard`] (RAII for short-lived
//! snapshot/thread handles), and every failing call surfaces the API name
//! together with its `GetLastError` code.

use std::ffi::{CStr, c_void};
use std::mem::transmute;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::ptr::{null, null_mut};

use windows_sys::{
    Win32::{
        Foundation::{
            CloseHandle, FALSE, GetLastError, HANDLE, INVALID_HANDLE_VALUE, MAX_PATH,
            WAIT_OBJECT_0, WAIT_TIMEOUT,
        },
        System::{
            Diagnostics::{
                Debug::{
                    CONTEXT, GetThreadContext, ReadProcessMemory, SetThreadContext,
                    WriteProcessMemory,
                },
                ToolHelp::CreateToolhelp32Snapshot,
            },
            LibraryLoader::{GetModuleHandleW, GetProcAddress},
            Memory::{
                MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, VirtualAllocEx,
                VirtualFreeEx, VirtualProtectEx, VirtualQueryEx,
            },
            ProcessStatus::K32GetMappedFileNameW,
            Threading::{
                CreateRemoteThread, GetExitCodeThread, GetProcessId, LPTHREAD_START_ROUTINE,
                OpenProcess, OpenThread, ResumeThread, SuspendThread, WaitForSingleObject,
            },
        },
    },
    core::PCSTR,
    w,
};

#[cfg(target_arch = "x86_64")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_DEBUG_REGISTERS_AMD64 as CONTEXT_DEBUG_REGISTERS;
#[cfg(target_arch = "x86")]
use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_DEBUG_REGISTERS_X86 as CONTEXT_DEBUG_REGISTERS;

use crate::error::{Error, OsKind, Result};

/// An opaque process handle as handed to callers.
///
/// The toolkit never releases these implicitly; a handle returned from
/// `open_process` lives until an explicit `close_handle` call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn from_raw(raw: HANDLE) -> Self {
        Self(raw as usize as u64)
    }

    pub(crate) fn raw(self) -> HANDLE {
        self.0 as usize as HANDLE
    }

    /// Numeric form of the handle, stable for the handle's lifetime.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the handle is null or the OS sentinel invalid handle.
    pub fn is_invalid(self) -> bool {
        self.raw().is_null() || self.raw() == INVALID_HANDLE_VALUE
    }
}

/// Wrapper to ensure short-lived handles are closed when they go out of scope.
pub(crate) struct HandleGuard(HANDLE);

impl HandleGuard {
    pub(crate) fn new(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.0.is_null() && self.0 != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// A target-side allocation released when its owning operation unwinds.
///
/// Operations that stage data in the target (remote calls, DLL paths) hold
/// their allocations through this guard so that every exit path, including
/// failures and timeouts, frees what it allocated.
pub(crate) struct RemoteAlloc {
    handle: Handle,
    pub(crate) address: u64,
}

impl RemoteAlloc {
    pub(crate) fn new(handle: Handle, size: usize, protection: u32) -> Result<Self> {
        let address = virtual_alloc(handle, None, size, MEM_COMMIT | MEM_RESERVE, protection)?;
        Ok(Self { handle, address })
    }

    pub(crate) fn write(&self, data: &[u8]) -> Result<()> {
        write_exact(self.handle, self.address, data)
    }
}

impl Drop for RemoteAlloc {
    fn drop(&mut self) {
        let _ = virtual_free(self.handle, self.address);
    }
}

/// Builds an [`Error::Os`] from the calling thread's last-error code.
pub(crate) fn last_error(kind: OsKind, api: &'static str) -> Error {
    Error::Os {
        kind,
        api,
        code: unsafe { GetLastError() },
    }
}

pub(crate) fn open_process(process_id: u32, access_rights: u32) -> Result<Handle> {
    let handle = unsafe { OpenProcess(access_rights, FALSE, process_id) };
    if handle.is_null() {
        Err(last_error(OsKind::Open, "OpenProcess"))
    } else {
        Ok(Handle::from_raw(handle))
    }
}

pub(crate) fn close_handle(handle: Handle) -> bool {
    unsafe { CloseHandle(handle.raw()) != 0 }
}

pub(crate) fn process_id_of(handle: Handle) -> Result<u32> {
    let pid = unsafe { GetProcessId(handle.raw()) };
    if pid == 0 {
        Err(last_error(OsKind::Query, "GetProcessId"))
    } else {
        Ok(pid)
    }
}

pub(crate) fn snapshot(flags: u32, process_id: u32) -> Result<HandleGuard> {
    let handle = unsafe { CreateToolhelp32Snapshot(flags, process_id) };
    if handle == INVALID_HANDLE_VALUE {
        Err(last_error(OsKind::Snapshot, "CreateToolhelp32Snapshot"))
    } else {
        Ok(HandleGuard::new(handle))
    }
}

/// Reads exactly `buffer.len()` bytes; any shortfall is a failure.
pub(crate) fn read_exact(handle: Handle, address: u64, buffer: &mut [u8]) -> Result<()> {
    let mut read = 0usize;
    let success = unsafe {
        ReadProcessMemory(
            handle.raw(),
            address as *const c_void,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len(),
            &mut read,
        )
    };
    if success == 0 {
        Err(last_error(OsKind::Read, "ReadProcessMemory"))
    } else if read != buffer.len() {
        Err(Error::PartialTransfer {
            expected: buffer.len(),
            actual: read,
        })
    } else {
        Ok(())
    }
}

/// Reads up to `buffer.len()` bytes, tolerating the unreadable tail of a
/// range. Returns the byte count actually copied, zero included.
pub(crate) fn read_batch(handle: Handle, address: u64, buffer: &mut [u8]) -> usize {
    let mut read = 0usize;
    unsafe {
        ReadProcessMemory(
            handle.raw(),
            address as *const c_void,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len(),
            &mut read,
        );
    }
    read
}

/// Writes exactly `data.len()` bytes; any shortfall is a failure.
pub(crate) fn write_exact(handle: Handle, address: u64, data: &[u8]) -> Result<()> {
    let mut written = 0usize;
    let success = unsafe {
        WriteProcessMemory(
            handle.raw(),
            address as *mut c_void,
            data.as_ptr() as *const c_void,
            data.len(),
            &mut written,
        )
    };
    if success == 0 {
        Err(last_error(OsKind::Write, "WriteProcessMemory"))
    } else if written != data.len() {
        Err(Error::PartialTransfer {
            expected: data.len(),
            actual: written,
        })
    } else {
        Ok(())
    }
}

pub(crate) fn virtual_alloc(
    handle: Handle,
    address: Option<u64>,
    size: usize,
    allocation_type: u32,
    protection: u32,
) -> Result<u64> {
    let wanted = address.map_or(null(), |a| a as *const c_void);
    let base = unsafe {
        VirtualAllocEx(handle.raw(), wanted, size, allocation_type, protection)
    };
    if base.is_null() {
        Err(last_error(OsKind::Alloc, "VirtualAllocEx"))
    } else {
        Ok(base as usize as u64)
    }
}

pub(crate) fn virtual_free(handle: Handle, address: u64) -> Result<()> {
    let success =
        unsafe { VirtualFreeEx(handle.raw(), address as *mut c_void, 0, MEM_RELEASE) };
    if success == 0 {
        Err(last_error(OsKind::Alloc, "VirtualFreeEx"))
    } else {
        Ok(())
    }
}

/// Returns the region's previous protection value.
pub(crate) fn virtual_protect(
    handle: Handle,
    address: u64,
    size: usize,
    protection: u32,
) -> Result<u32> {
    let mut old_protection = 0u32;
    let success = unsafe {
        VirtualProtectEx(
            handle.raw(),
            address as *const c_void,
            size,
            protection,
            &mut old_protection,
        )
    };
    if success == 0 {
        Err(last_error(OsKind::Protect, "VirtualProtectEx"))
    } else {
        Ok(old_protection)
    }
}

pub(crate) fn virtual_query(handle: Handle, address: u64) -> Result<MEMORY_BASIC_INFORMATION> {
    let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
    let filled = unsafe {
        VirtualQueryEx(
            handle.raw(),
            address as *const c_void,
            &mut info,
            size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    if filled == 0 {
        Err(last_error(OsKind::Query, "VirtualQueryEx"))
    } else {
        Ok(info)
    }
}

/// Executable file backing the allocation at `address`, if the OS knows one.
pub(crate) fn mapped_file_name(handle: Handle, address: u64) -> Option<String> {
    let mut buffer = [0u16; MAX_PATH as usize];
    let length = unsafe {
        K32GetMappedFileNameW(
            handle.raw(),
            address as *const c_void,
            buffer.as_mut_ptr(),
            buffer.len() as u32,
        )
    };
    if length == 0 {
        None
    } else {
        Some(String::from_utf16_lossy(&buffer[..length as usize]))
    }
}

pub(crate) fn create_remote_thread(
    handle: Handle,
    start_address: u64,
    parameter: u64,
) -> Result<HandleGuard> {
    let routine: LPTHREAD_START_ROUTINE = unsafe { transmute(start_address as usize) };
    let thread = unsafe {
        CreateRemoteThread(
            handle.raw(),
            null(),
            0,
            routine,
            parameter as *const c_void,
            0,
            null_mut(),
        )
    };
    if thread.is_null() {
        Err(last_error(OsKind::ThreadCreate, "CreateRemoteThread"))
    } else {
        Ok(HandleGuard::new(thread))
    }
}

pub(crate) fn wait_for_thread(thread: &HandleGuard, timeout_ms: u32) -> Result<()> {
    match unsafe { WaitForSingleObject(thread.raw(), timeout_ms) } {
        WAIT_OBJECT_0 => Ok(()),
        WAIT_TIMEOUT => Err(Error::Timeout(timeout_ms)),
        _ => Err(last_error(OsKind::Wait, "WaitForSingleObject")),
    }
}

pub(crate) fn thread_exit_code(thread: &HandleGuard) -> Result<u32> {
    let mut exit_code = 0u32;
    let success = unsafe { GetExitCodeThread(thread.raw(), &mut exit_code) };
    if success == 0 {
        Err(last_error(OsKind::Wait, "GetExitCodeThread"))
    } else {
        Ok(exit_code)
    }
}

pub(crate) fn open_thread(thread_id: u32, access_rights: u32) -> Result<HandleGuard> {
    let handle = unsafe { OpenThread(access_rights, FALSE, thread_id) };
    if handle.is_null() {
        Err(last_error(OsKind::Open, "OpenThread"))
    } else {
        Ok(HandleGuard::new(handle))
    }
}

pub(crate) fn suspend_thread(thread: &HandleGuard) -> Result<u32> {
    let count = unsafe { SuspendThread(thread.raw()) };
    if count == u32::MAX {
        Err(last_error(OsKind::Debug, "SuspendThread"))
    } else {
        Ok(count)
    }
}

pub(crate) fn resume_thread(thread: &HandleGuard) -> Result<u32> {
    let count = unsafe { ResumeThread(thread.raw()) };
    if count == u32::MAX {
        Err(last_error(OsKind::Debug, "ResumeThread"))
    } else {
        Ok(count)
    }
}

/// Fetches the thread's context with the debug registers selected.
pub(crate) fn debug_register_context(thread: &HandleGuard) -> Result<CONTEXT> {
    let mut context = CONTEXT {
        ContextFlags: CONTEXT_DEBUG_REGISTERS,
        ..unsafe { std::mem::zeroed() }
    };
    let success = unsafe { GetThreadContext(thread.raw(), &mut context) };
    if success == 0 {
        Err(last_error(OsKind::Debug, "GetThreadContext"))
    } else {
        Ok(context)
    }
}

pub(crate) fn set_thread_context(thread: &HandleGuard, context: &CONTEXT) -> Result<()> {
    let success = unsafe { SetThreadContext(thread.raw(), context) };
    if success == 0 {
        Err(last_error(OsKind::Debug, "SetThreadContext"))
    } else {
        Ok(())
    }
}

/// Resolves an export of the injector's own `kernel32.dll`.
///
/// System DLL load addresses are shared across processes of one session, so
/// the local address is valid inside the target as well.
pub(crate) fn kernel32_export(name: &CStr) -> Result<u64> {
    let module = unsafe { GetModuleHandleW(w!("kernel32.dll")) };
    if module.is_null() {
        return Err(last_error(OsKind::Open, "GetModuleHandleW"));
    }
    match unsafe { GetProcAddress(module, name.as_ptr() as PCSTR) } {
        Some(function) => Ok(function as usize as u64),
        None => Err(last_error(OsKind::Open, "GetProcAddress")),
    }
}

pub(crate) fn to_utf16_null_terminated(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain([0]).collect()
}

pub(crate) fn utf16_str(text: &str) -> Vec<u16> {
    text.encode_utf16().chain([0]).collect()
}

/// Converts a fixed NUL-padded UTF-16 field into an owned string.
pub(crate) fn from_wide(field: &[u16]) -> String {
    let length = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    std::ffi::OsString::from_wide(&field[..length])
        .to_string_lossy()
        .into_owned()
}
