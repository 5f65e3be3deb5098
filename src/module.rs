//! Module enumeration for a target process.

use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    MODULEENTRY32W, Module32FirstW, Module32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
};

use crate::error::{Error, OsKind, Result};
use crate::os;

/// An immutable snapshot of one loaded module.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleInfo {
    pub base_address: u64,
    pub size: u32,
    pub name: String,
    pub path: String,
    pub pid: u32,
}

/// Enumerates the modules loaded into `pid`, main executable first.
pub fn get_modules(pid: u32) -> Result<Vec<ModuleInfo>> {
    if pid == 0 {
        return Err(Error::InvalidArgument(
            "process id cannot be zero".to_string(),
        ));
    }

    let snapshot = os::snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)?;

    let mut entry = MODULEENTRY32W {
        dwSize: size_of::<MODULEENTRY32W>() as u32,
        ..unsafe { std::mem::zeroed() }
    };

    if unsafe { Module32FirstW(snapshot.raw(), &mut entry) } == 0 {
        return Err(os::last_error(OsKind::Snapshot, "Module32FirstW"));
    }

    let mut modules = Vec::new();
    loop {
        modules.push(ModuleInfo {
            base_address: entry.modBaseAddr as usize as u64,
            size: entry.modBaseSize,
            name: os::from_wide(&entry.szModule),
            path: os::from_wide(&entry.szExePath),
            pid: entry.th32ProcessID,
        });
        if unsafe { Module32NextW(snapshot.raw(), &mut entry) } == 0 {
            break;
        }
    }
    Ok(modules)
}

/// Locates a module of `pid` by name (case-insensitive).
pub fn find_module(name: &str, pid: u32) -> Result<ModuleInfo> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "module name cannot be empty".to_string(),
        ));
    }

    get_modules(pid)?
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::NotFound(format!("module '{name}' in process {pid}")))
}
