//! # Procscope
//!
//! **Procscope** is a cross-process memory and debugging toolkit for Windows.
//! It enumerates processes, modules, threads and memory regions of a target;
//! reads and writes typed values in another process's address space; scans for
//! binary signatures with wildcards and relocation semantics; invokes
//! functions and loads libraries inside the target; services hardware
//! breakpoints through the OS debug interface; and maps named file-backed
//! sections across processes.
//!
//! ## Core Architecture
//!
//! Callers enter through the [`gateway`], which validates every argument and
//! fails fast before OS state is touched. Beneath it, each subsystem is a
//! focused module over one shared Win32 facade:
//!
//! - **Typed I/O** ([`memory`]) — `read`/`write` dispatched by [`TypeTag`],
//!   with strict partial-transfer discipline.
//! - **Pattern scanner** ([`pattern`], [`scanner`]) — compiled wildcard
//!   signatures matched over module and region snapshots, with READ/SUBTRACT
//!   post-processing.
//! - **Remote invocation** ([`call`]) — a parameter block and generated
//!   trampoline in the target, executed on a remote thread under a bounded
//!   wait.
//! - **Debugger** ([`debugger`], [`hwbp`]) — attach/detach lifecycle,
//!   per-thread DR0–DR7 programming, and a blocking event loop filtered by
//!   the register that fired.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use procscope::gateway::{self, ProcessSelector};
//!
//! fn main() -> procscope::Result<()> {
//!     // 1. Open the target
//!     let target = gateway::open_process(ProcessSelector::Name("game.exe"))?;
//!
//!     // 2. Locate a pointer through a signature
//!     let address = gateway::find_pattern_by_module(
//!         target.handle,
//!         "game.exe",
//!         "48 8B 05 ?? ?? ?? ?? C3",
//!         procscope::ScanFlags::READ.bits(),
//!         3,
//!     )?;
//!
//!     // 3. Read through it
//!     let health = gateway::read_memory(target.handle, address, "f32")?;
//!     println!("health = {health:?}");
//!
//!     gateway::close_handle(target.handle)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! ```toml
//! [features]
//! default = []
//! tracing = [] # Enable structured logging via the `tracing` crate
//! ```
//!
//! The OS-facing modules compile on Windows only; the type system, signature
//! grammar, debug-register layout, and trampoline emitter are portable and
//! carry the crate's unit tests.

pub mod error;
pub mod hwbp;
pub mod pattern;
pub mod types;

#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) mod shim;

#[cfg(windows)]
pub mod call;
#[cfg(windows)]
pub mod debugger;
#[cfg(windows)]
pub mod gateway;
#[cfg(windows)]
pub mod inject;
#[cfg(windows)]
pub mod mapping;
#[cfg(windows)]
pub mod memory;
#[cfg(windows)]
pub mod module;
#[cfg(windows)]
pub(crate) mod os;
#[cfg(windows)]
pub mod process;
#[cfg(windows)]
pub mod region;
#[cfg(windows)]
pub mod scanner;

// Core API (Root Namespace)
pub use error::{Error, OsKind, Result};
pub use hwbp::{Breakpoint, HwRegister, Trigger, WatchLength};
pub use pattern::{Pattern, ScanFlags};
pub use types::{IntoAddress, ReturnTag, TypeTag, Value, Vec3, Vec4};

#[cfg(windows)]
pub use call::CallResult;
#[cfg(windows)]
pub use debugger::{DebugEvent, SessionState};
#[cfg(windows)]
pub use gateway::ProcessSelector;
#[cfg(windows)]
pub use inject::ModuleRef;
#[cfg(windows)]
pub use module::ModuleInfo;
#[cfg(windows)]
pub use os::Handle;
#[cfg(windows)]
pub use process::{ProcessEntry, ProcessRef, ThreadInfo};
#[cfg(windows)]
pub use region::Region;

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

// Stub macros to allow compiling without the 'tracing' feature
#[cfg(not(feature = "tracing"))]
mod quiet {
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }
}
