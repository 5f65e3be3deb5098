//! Process enumeration and handle acquisition via the toolhelp snapshot API.

use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS, TH32CS_SNAPTHREAD,
    THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::Threading::PROCESS_ALL_ACCESS;

use crate::error::{Error, OsKind, Result};
use crate::module;
use crate::os::{self, Handle};

/// A snapshot entry describing one running process.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent_pid: u32,
    pub thread_count: u32,
    pub base_priority: i32,
    pub exe_file: String,
}

/// An opened target process: its identifying snapshot plus an OS handle.
///
/// The handle is owned by the caller and must be released through
/// `close_handle`; dropping a `ProcessRef` does not close it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProcessRef {
    pub handle: Handle,
    pub pid: u32,
    pub parent_pid: u32,
    pub thread_count: u32,
    pub base_priority: i32,
    pub exe_file: String,
    /// Base address of the primary module, zero if it could not be resolved.
    pub base_address: u64,
}

/// A snapshot entry describing one thread of a process.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ThreadInfo {
    pub tid: u32,
    pub pid: u32,
    pub base_priority: i32,
}

/// Enumerates every process visible in a toolhelp snapshot.
pub fn get_processes() -> Result<Vec<ProcessEntry>> {
    let snapshot = os::snapshot(TH32CS_SNAPPROCESS, 0)?;

    let mut entry = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..unsafe { std::mem::zeroed() }
    };

    if unsafe { Process32FirstW(snapshot.raw(), &mut entry) } == 0 {
        return Err(os::last_error(OsKind::Snapshot, "Process32FirstW"));
    }

    let mut processes = Vec::new();
    loop {
        processes.push(ProcessEntry {
            pid: entry.th32ProcessID,
            parent_pid: entry.th32ParentProcessID,
            thread_count: entry.cntThreads,
            base_priority: entry.pcPriClassBase,
            exe_file: os::from_wide(&entry.szExeFile),
        });
        if unsafe { Process32NextW(snapshot.raw(), &mut entry) } == 0 {
            break;
        }
    }
    Ok(processes)
}

/// Opens a process by executable name (case-insensitive).
pub fn open_by_name(name: &str) -> Result<ProcessRef> {
    let entry = get_processes()?
        .into_iter()
        .find(|p| p.exe_file.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::NotFound(format!("process '{name}'")))?;
    open_entry(entry)
}

/// Opens a process by id.
pub fn open_by_pid(pid: u32) -> Result<ProcessRef> {
    let entry = get_processes()?
        .into_iter()
        .find(|p| p.pid == pid)
        .ok_or_else(|| Error::NotFound(format!("process {pid}")))?;
    open_entry(entry)
}

fn open_entry(entry: ProcessEntry) -> Result<ProcessRef> {
    let handle = os::open_process(entry.pid, PROCESS_ALL_ACCESS)?;

    // Best effort: the primary module shares the executable's name.
    let base_address = module::find_module(&entry.exe_file, entry.pid)
        .map(|m| m.base_address)
        .unwrap_or(0);

    Ok(ProcessRef {
        handle,
        pid: entry.pid,
        parent_pid: entry.parent_pid,
        thread_count: entry.thread_count,
        base_priority: entry.base_priority,
        exe_file: entry.exe_file,
        base_address,
    })
}

/// Releases a process handle previously returned by an open call.
pub fn close_handle(handle: Handle) -> bool {
    os::close_handle(handle)
}

/// Enumerates the threads owned by `pid`.
///
/// The toolhelp thread snapshot is system-wide; filtering by owner is done
/// here, as the OS ignores the pid argument for thread snapshots.
pub fn get_threads(pid: u32) -> Result<Vec<ThreadInfo>> {
    let snapshot = os::snapshot(TH32CS_SNAPTHREAD, pid)?;

    let mut entry = THREADENTRY32 {
        dwSize: size_of::<THREADENTRY32>() as u32,
        ..unsafe { std::mem::zeroed() }
    };

    if unsafe { Thread32First(snapshot.raw(), &mut entry) } == 0 {
        return Err(os::last_error(OsKind::Snapshot, "Thread32First"));
    }

    let mut threads = Vec::new();
    loop {
        if entry.th32OwnerProcessID == pid {
            threads.push(ThreadInfo {
                tid: entry.th32ThreadID,
                pid: entry.th32OwnerProcessID,
                base_priority: entry.tpBasePri,
            });
        }
        if unsafe { Thread32Next(snapshot.raw(), &mut entry) } == 0 {
            break;
        }
    }
    Ok(threads)
}
