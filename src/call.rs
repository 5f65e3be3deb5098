//! Remote function invocation.
//!
//! A call is staged in four steps: argument cells are pinned on this
//! operation's heap, oversized payloads and a parameter block are written into
//! the target, a trampoline is emitted and made executable, and a remote
//! thread runs it under a bounded wait. Every target allocation is released on
//! every exit path, success and failure alike; the host cells outlive the
//! remote thread by construction.

use windows_sys::Win32::System::Memory::{PAGE_EXECUTE_READ, PAGE_READWRITE};

use crate::error::{Error, Result};
use crate::os::{self, Handle, RemoteAlloc};
use crate::shim::{self, ArgClass, MAX_ARGS, RetClass};
use crate::types::{ReturnTag, TypeTag, Value};
use crate::{info, memory};

/// Bounded wait applied to the remote thread.
pub const CALL_TIMEOUT_MS: u32 = 10_000;

/// Outcome of a remote invocation: the decoded return value (absent for
/// `void-return`) and the remote thread's unmodified exit code.
#[derive(Clone, PartialEq, Debug)]
pub struct CallResult {
    pub return_value: Option<Value>,
    pub exit_code: u32,
}

fn classify_argument(tag: TypeTag) -> ArgClass {
    match tag {
        TypeTag::F32 => ArgClass::Float,
        TypeTag::F64 => ArgClass::Double,
        TypeTag::I64 | TypeTag::U64 => ArgClass::Wide,
        _ => ArgClass::Word,
    }
}

fn classify_return(tag: ReturnTag) -> Result<RetClass> {
    Ok(match tag {
        ReturnTag::Void | ReturnTag::String => RetClass::Word,
        ReturnTag::Scalar(TypeTag::F32) => RetClass::Float,
        ReturnTag::Scalar(TypeTag::F64) => RetClass::Double,
        ReturnTag::Scalar(TypeTag::I64) | ReturnTag::Scalar(TypeTag::U64) => RetClass::Wide,
        ReturnTag::Scalar(TypeTag::Vec3) | ReturnTag::Scalar(TypeTag::Vec4) => {
            return Err(Error::InvalidArgument(
                "aggregate return values are not supported".to_string(),
            ));
        }
        ReturnTag::Scalar(TypeTag::String) => {
            return Err(Error::InvalidArgument(
                "string-returning functions use ReturnTag::String".to_string(),
            ));
        }
        ReturnTag::Scalar(_) => RetClass::Word,
    })
}

/// Calls `function_address` inside the target with the given typed arguments.
pub fn call_function(
    handle: Handle,
    args: &[Value],
    return_tag: ReturnTag,
    function_address: u64,
) -> Result<CallResult> {
    if handle.is_invalid() {
        return Err(Error::InvalidHandle);
    }
    if function_address == 0 {
        return Err(Error::InvalidArgument(
            "function address cannot be zero".to_string(),
        ));
    }
    if args.len() > MAX_ARGS {
        return Err(Error::InvalidArgument(format!(
            "at most {MAX_ARGS} arguments are supported, got {}",
            args.len()
        )));
    }
    let ret_class = classify_return(return_tag)?;

    // 1. Pin each argument's byte image on this call's heap. The cells (and
    //    every target allocation below) stay alive until the remote thread
    //    has been joined.
    let cells: Vec<Vec<u8>> = args.iter().map(Value::encode).collect();

    let mut payloads: Vec<RemoteAlloc> = Vec::new();
    let mut slots: Vec<u64> = Vec::with_capacity(args.len());
    let mut classes: Vec<ArgClass> = Vec::with_capacity(args.len());

    for (argument, cell) in args.iter().zip(&cells) {
        classes.push(classify_argument(argument.tag()));
        match argument.tag() {
            // Oversized payloads travel by pointer to a target-side copy.
            TypeTag::String | TypeTag::Vec3 | TypeTag::Vec4 => {
                let payload = RemoteAlloc::new(handle, cell.len(), PAGE_READWRITE)?;
                payload.write(cell)?;
                slots.push(payload.address);
                payloads.push(payload);
            }
            _ => {
                let mut raw = [0u8; 8];
                raw[..cell.len()].copy_from_slice(cell);
                slots.push(u64::from_le_bytes(raw));
            }
        }
    }

    // 2. Parameter block: return slot first, then one 8-byte cell per argument.
    let block_image_size = 8 * (1 + args.len());
    let block = RemoteAlloc::new(handle, block_image_size, PAGE_READWRITE)?;
    let mut block_image = vec![0u8; block_image_size];
    for (i, slot) in slots.iter().enumerate() {
        block_image[8 + 8 * i..16 + 8 * i].copy_from_slice(&slot.to_le_bytes());
    }
    block.write(&block_image)?;

    // 3. Trampoline, written RW and flipped to RX before execution.
    #[cfg(target_arch = "x86_64")]
    let code = shim::emit_x64(block.address, function_address, &classes, ret_class);
    #[cfg(target_arch = "x86")]
    let code = shim::emit_x86(block.address, function_address, &classes, ret_class);

    let trampoline = RemoteAlloc::new(handle, code.len(), PAGE_READWRITE)?;
    trampoline.write(&code)?;
    os::virtual_protect(handle, trampoline.address, code.len(), PAGE_EXECUTE_READ)?;

    info!(
        "invoking {:#x} with {} argument(s) via trampoline at {:#x}",
        function_address,
        args.len(),
        trampoline.address
    );

    // 4. Execute and join.
    let thread = os::create_remote_thread(handle, trampoline.address, 0)?;
    os::wait_for_thread(&thread, CALL_TIMEOUT_MS)?;
    let exit_code = os::thread_exit_code(&thread)?;

    // 5. Recover the captured return value.
    let mut captured = [0u8; 8];
    os::read_exact(handle, block.address, &mut captured)?;

    let return_value = match return_tag {
        ReturnTag::Void => None,
        ReturnTag::String => {
            let pointer = u64::from_le_bytes(captured);
            let text = if pointer == 0 {
                String::new()
            } else {
                memory::read_string(handle, pointer)?
            };
            Some(Value::String(text))
        }
        ReturnTag::Scalar(tag) => {
            // classify_return filtered out the unsized tag already
            let size = tag.size().unwrap_or(8);
            Some(Value::decode(tag, &captured[..size])?)
        }
    };

    Ok(CallResult {
        return_value,
        exit_code,
    })
}
