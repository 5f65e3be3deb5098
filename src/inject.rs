//! Dynamic-library injection and unload.
//!
//! Injection forces the target to load a DLL from disk: the path is staged in
//! target memory and a remote thread runs `LoadLibraryW` over it. Unload spins
//! the same machinery around `FreeLibrary`. Loader entry points are resolved
//! in the injector's own `kernel32`, relying on system-DLL address parity
//! across processes.

use std::path::Path;

use windows_sys::Win32::System::Memory::PAGE_READWRITE;

use crate::error::{Error, Result};
use crate::info;
use crate::module;
use crate::os::{self, Handle, RemoteAlloc};

/// Bounded wait applied to loader threads.
pub const INJECT_TIMEOUT_MS: u32 = 10_000;

/// Identifies a loaded module either by base address or by name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ModuleRef {
    Base(u64),
    Name(String),
}

/// Loads `dll_path` into the target and returns the injected module's base
/// address.
pub fn inject_dll(handle: Handle, dll_path: &Path) -> Result<u64> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }

    // 1. Stage the path as a NUL-terminated UTF-16 string in the target.
    let path_utf16 = os::to_utf16_null_terminated(dll_path);
    let path_bytes: Vec<u8> = path_utf16.iter().flat_map(|c| c.to_le_bytes()).collect();

    info!("injecting {:?}", dll_path);

    let path_buffer = RemoteAlloc::new(handle, path_bytes.len(), PAGE_READWRITE)?;
    path_buffer.write(&path_bytes)?;

    // 2. Run LoadLibraryW over the staged path.
    let load_library = os::kernel32_export(c"LoadLibraryW")?;
    let thread = os::create_remote_thread(handle, load_library, path_buffer.address)?;
    os::wait_for_thread(&thread, INJECT_TIMEOUT_MS)?;
    let exit_code = os::thread_exit_code(&thread)?;

    // 3. The exit code only carries a truncated module handle; resolve the
    //    real base through enumeration.
    let file_name = dll_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pid = os::process_id_of(handle)?;

    match module::find_module(&file_name, pid) {
        Ok(module) => {
            info!("module '{}' loaded at {:#x}", module.name, module.base_address);
            Ok(module.base_address)
        }
        Err(_) if exit_code == 0 => Err(Error::NotFound(format!(
            "injected module '{file_name}' (LoadLibraryW returned NULL)"
        ))),
        Err(err) => Err(err),
    }
}

/// Unloads a module from the target; reports the loader thread's verdict.
pub fn unload_dll(handle: Handle, module_ref: &ModuleRef) -> Result<bool> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }

    let base_address = match module_ref {
        ModuleRef::Base(base) => {
            if *base == 0 {
                return Err(Error::InvalidArgument(
                    "module base cannot be zero".to_string(),
                ));
            }
            *base
        }
        ModuleRef::Name(name) => {
            let pid = os::process_id_of(handle)?;
            module::find_module(name, pid)?.base_address
        }
    };

    info!("unloading module at {base_address:#x}");

    let free_library = os::kernel32_export(c"FreeLibrary")?;
    let thread = os::create_remote_thread(handle, free_library, base_address)?;
    os::wait_for_thread(&thread, INJECT_TIMEOUT_MS)?;
    Ok(os::thread_exit_code(&thread)? != 0)
}
