//! Hardware-breakpoint debugger: attach/detach lifecycle, per-thread
//! debug-register programming, and the blocking debug-event loop.
//!
//! A process-wide map owns one [`DebugSession`] per attached target. All
//! session mutations take the map's lock, so attach/detach/arm/disarm/await
//! for one pid are mutually exclusive. The caller that attached is expected
//! to run `await_debug_event` on the same thread, as the OS ties the debugger
//! role to the attaching thread.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use windows_sys::Win32::Foundation::{
    DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, ERROR_SEM_TIMEOUT, GetLastError,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    CONTEXT, ContinueDebugEvent, DEBUG_EVENT, DebugActiveProcess, DebugActiveProcessStop,
    DebugSetProcessKillOnExit, EXCEPTION_DEBUG_EVENT, WaitForDebugEvent,
};
use windows_sys::Win32::System::Threading::{
    PROCESS_ALL_ACCESS, THREAD_GET_CONTEXT, THREAD_QUERY_INFORMATION, THREAD_SET_CONTEXT,
    THREAD_SUSPEND_RESUME,
};

use crate::error::{Error, OsKind, Result};
use crate::hwbp::{self, Breakpoint, HwRegister, Trigger, WatchLength};
use crate::memory;
use crate::os::{self, HandleGuard};
use crate::process;
use crate::types::TypeTag;
use crate::{info, warn};

/// Lifecycle of a per-target debug session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

/// A debug-event delivery, enriched with the armed register that raised it.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DebugEvent {
    pub process_id: u32,
    pub thread_id: u32,
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_address: u64,
    pub register: Option<HwRegister>,
}

#[derive(Debug)]
struct DebugSession {
    state: SessionState,
    kill_on_exit: bool,
    breakpoints: [Option<Breakpoint>; 4],
}

static SESSIONS: Lazy<Mutex<HashMap<u32, DebugSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn sessions() -> MutexGuard<'static, HashMap<u32, DebugSession>> {
    SESSIONS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Current lifecycle state for `pid`; `Detached` if no session exists.
pub fn session_state(pid: u32) -> SessionState {
    sessions().get(&pid).map_or(SessionState::Detached, |s| s.state)
}

/// Registers this process as the debugger of `pid`.
///
/// Fails if a session is already attached. `kill_on_exit` decides whether the
/// target dies with its debugger.
pub fn attach(pid: u32, kill_on_exit: bool) -> Result<()> {
    let mut sessions = sessions();
    if sessions
        .get(&pid)
        .is_some_and(|s| s.state != SessionState::Detached)
    {
        return Err(Error::InvalidArgument(format!(
            "a debug session for process {pid} is already active"
        )));
    }

    sessions.insert(
        pid,
        DebugSession {
            state: SessionState::Attaching,
            kill_on_exit,
            breakpoints: [None; 4],
        },
    );

    if unsafe { DebugActiveProcess(pid) } == 0 {
        sessions.remove(&pid);
        return Err(os::last_error(OsKind::Debug, "DebugActiveProcess"));
    }
    if unsafe { DebugSetProcessKillOnExit(kill_on_exit as i32) } == 0 {
        warn!("DebugSetProcessKillOnExit failed; default exit policy stays");
    }

    if let Some(session) = sessions.get_mut(&pid) {
        session.state = SessionState::Attached;
    }
    info!("attached to process {pid} (kill_on_exit={kill_on_exit})");
    Ok(())
}

/// Clears every armed breakpoint of `pid`, then detaches.
pub fn detach(pid: u32) -> Result<()> {
    let mut sessions = sessions();
    let session = sessions
        .get_mut(&pid)
        .filter(|s| s.state == SessionState::Attached)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("no attached debug session for process {pid}"))
        })?;

    session.state = SessionState::Detaching;
    for register in HwRegister::ALL {
        if session.breakpoints[register.index()].is_some() {
            if let Err(err) = program_threads(pid, register, 0, Trigger::Execute, WatchLength::One)
            {
                warn!("clearing {register:?} during detach failed: {err}");
            }
            session.breakpoints[register.index()] = None;
        }
    }

    if unsafe { DebugActiveProcessStop(pid) } == 0 {
        session.state = SessionState::Attached;
        return Err(os::last_error(OsKind::Debug, "DebugActiveProcessStop"));
    }

    sessions.remove(&pid);
    info!("detached from process {pid}");
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn write_slot(context: &mut CONTEXT, register: HwRegister, address: u64) {
    match register {
        HwRegister::Dr0 => context.Dr0 = address,
        HwRegister::Dr1 => context.Dr1 = address,
        HwRegister::Dr2 => context.Dr2 = address,
        HwRegister::Dr3 => context.Dr3 = address,
    }
}

#[cfg(target_arch = "x86")]
fn write_slot(context: &mut CONTEXT, register: HwRegister, address: u64) {
    match register {
        HwRegister::Dr0 => context.Dr0 = address as u32,
        HwRegister::Dr1 => context.Dr1 = address as u32,
        HwRegister::Dr2 => context.Dr2 = address as u32,
        HwRegister::Dr3 => context.Dr3 = address as u32,
    }
}

#[cfg(target_arch = "x86_64")]
fn control_word(context: &CONTEXT) -> u64 {
    context.Dr7
}

#[cfg(target_arch = "x86")]
fn control_word(context: &CONTEXT) -> u64 {
    context.Dr7 as u64
}

#[cfg(target_arch = "x86_64")]
fn set_control_word(context: &mut CONTEXT, dr7: u64) {
    context.Dr7 = dr7;
}

#[cfg(target_arch = "x86")]
fn set_control_word(context: &mut CONTEXT, dr7: u64) {
    context.Dr7 = dr7 as u32;
}

/// Programs one slot on a single suspended thread.
fn program_thread(
    thread: &HandleGuard,
    register: HwRegister,
    address: u64,
    trigger: Trigger,
    length: WatchLength,
) -> Result<()> {
    let mut context = os::debug_register_context(thread)?;

    write_slot(&mut context, register, address);
    let dr7 = if address == 0 {
        hwbp::disarm(control_word(&context), register)
    } else {
        hwbp::arm(control_word(&context), register, trigger, length)
    };
    set_control_word(&mut context, dr7);

    os::set_thread_context(thread, &context)
}

/// Walks every thread of `pid`, programming the slot on each.
///
/// A failure on one thread does not abort the batch; the operation succeeds
/// iff at least one thread was updated.
fn program_threads(
    pid: u32,
    register: HwRegister,
    address: u64,
    trigger: Trigger,
    length: WatchLength,
) -> Result<()> {
    let mut updated = 0usize;
    let mut last_error = None;

    for thread_info in process::get_threads(pid)? {
        let outcome = os::open_thread(
            thread_info.tid,
            THREAD_SUSPEND_RESUME
                | THREAD_GET_CONTEXT
                | THREAD_SET_CONTEXT
                | THREAD_QUERY_INFORMATION,
        )
        .and_then(|thread| {
            os::suspend_thread(&thread)?;
            let programmed = program_thread(&thread, register, address, trigger, length);
            let _ = os::resume_thread(&thread);
            programmed
        });

        match outcome {
            Ok(()) => updated += 1,
            Err(err) => {
                warn!("thread {}: programming {register:?} failed: {err}", thread_info.tid);
                last_error = Some(err);
            }
        }
    }

    if updated == 0 {
        Err(last_error.unwrap_or_else(|| Error::NotFound(format!("threads of process {pid}"))))
    } else {
        Ok(())
    }
}

/// Arms (or, with `address == 0`, clears) a hardware breakpoint slot across
/// every running thread of `pid`.
pub fn set_hardware_breakpoint(
    pid: u32,
    address: u64,
    register: HwRegister,
    trigger: Trigger,
    length: WatchLength,
) -> Result<()> {
    let mut sessions = sessions();
    let session = sessions
        .get_mut(&pid)
        .filter(|s| s.state == SessionState::Attached)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("no attached debug session for process {pid}"))
        })?;

    program_threads(pid, register, address, trigger, length)?;

    session.breakpoints[register.index()] = if address == 0 {
        None
    } else {
        Some(Breakpoint {
            register,
            address,
            trigger,
            length,
        })
    };
    Ok(())
}

/// Clears the slot on every thread of `pid`.
pub fn remove_hardware_breakpoint(pid: u32, register: HwRegister) -> Result<()> {
    set_hardware_breakpoint(pid, 0, register, Trigger::Execute, WatchLength::One)
}

/// Arms a breakpoint on the first free slot, deriving the watch length from
/// the value shape at `address`; returns the chosen slot.
///
/// For `string`, the watched length is measured by reading the NUL-terminated
/// sequence from the target, rounded down to a legal DR length.
pub fn set_hardware_breakpoint_auto(
    pid: u32,
    address: u64,
    trigger: Trigger,
    tag: TypeTag,
) -> Result<HwRegister> {
    let length = if tag == TypeTag::String {
        let handle = os::open_process(pid, PROCESS_ALL_ACCESS)?;
        let guard = HandleGuard::new(handle.raw());
        let text = memory::read_string(handle, address)?;
        drop(guard);
        WatchLength::covering(text.len())
    } else {
        WatchLength::covering(tag.size().unwrap_or(1))
    };

    let free = {
        let sessions = sessions();
        let session = sessions
            .get(&pid)
            .filter(|s| s.state == SessionState::Attached)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("no attached debug session for process {pid}"))
            })?;
        HwRegister::ALL
            .into_iter()
            .find(|r| session.breakpoints[r.index()].is_none())
            .ok_or_else(|| {
                Error::InvalidArgument("all four debug registers are armed".to_string())
            })?
    };

    set_hardware_breakpoint(pid, address, free, trigger, length)?;
    Ok(free)
}

/// Matches a faulting address against the armed slots of the event's session.
fn match_armed_register(pid: u32, fault: u64, data: Option<u64>) -> Option<HwRegister> {
    let sessions = sessions();
    let session = sessions.get(&pid)?;
    session
        .breakpoints
        .iter()
        .flatten()
        .find(|bp| bp.address == fault || Some(bp.address) == data)
        .map(|bp| bp.register)
}

/// Blocks up to `timeout_ms` for a debug event raised by `expected`.
///
/// Events raised by other slots (or non-exception events) are continued
/// unhandled and the wait resumes. A matching event is returned *without*
/// continuing the target; the caller must follow up with
/// [`handle_debug_event`]. A timeout yields `Ok(None)`.
pub fn await_debug_event(expected: HwRegister, timeout_ms: u32) -> Result<Option<DebugEvent>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

    loop {
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u32;

        let mut raw: DEBUG_EVENT = unsafe { std::mem::zeroed() };
        if unsafe { WaitForDebugEvent(&mut raw, remaining.max(1)) } == 0 {
            let code = unsafe { GetLastError() };
            if code == ERROR_SEM_TIMEOUT {
                return Ok(None);
            }
            return Err(Error::Os {
                kind: OsKind::Debug,
                api: "WaitForDebugEvent",
                code,
            });
        }

        if raw.dwDebugEventCode == EXCEPTION_DEBUG_EVENT {
            let record = unsafe { raw.u.Exception.ExceptionRecord };
            let fault_address = record.ExceptionAddress as usize as u64;
            let data_address = (record.NumberParameters >= 2)
                .then(|| record.ExceptionInformation[1] as u64);

            let register = match_armed_register(raw.dwProcessId, fault_address, data_address);
            if register == Some(expected) {
                return Ok(Some(DebugEvent {
                    process_id: raw.dwProcessId,
                    thread_id: raw.dwThreadId,
                    exception_code: record.ExceptionCode as u32,
                    exception_flags: record.ExceptionFlags,
                    exception_address: fault_address,
                    register,
                }));
            }
        }

        // Not ours: let the target carry on and keep waiting.
        let status = if raw.dwDebugEventCode == EXCEPTION_DEBUG_EVENT {
            DBG_EXCEPTION_NOT_HANDLED
        } else {
            DBG_CONTINUE
        };
        unsafe { ContinueDebugEvent(raw.dwProcessId, raw.dwThreadId, status as u32) };

        if Instant::now() >= deadline {
            return Ok(None);
        }
    }
}

/// Resumes the target after a delivered event.
pub fn handle_debug_event(pid: u32, tid: u32) -> Result<()> {
    if unsafe { ContinueDebugEvent(pid, tid, DBG_CONTINUE as u32) } == 0 {
        Err(os::last_error(OsKind::Debug, "ContinueDebugEvent"))
    } else {
        Ok(())
    }
}
