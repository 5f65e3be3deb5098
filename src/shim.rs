//! Trampoline code generation for remote function invocation.
//!
//! The trampoline is a small routine emitted into the target process. It
//! unpacks a parameter block, loads each argument per the target's calling
//! convention, calls the real function, and stores the captured return value
//! back into the block before the remote thread exits.
//!
//! Parameter-block layout (8-byte cells, little-endian):
//!
//! ```text
//! block + 0x00          return slot
//! block + 0x08 + 8*i    argument slot i
//! ```
//!
//! Emission is pure byte-building; the caller supplies the absolute addresses
//! of the block and the function after allocating both in the target.

/// Register/stack classification of one argument slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ArgClass {
    /// Pointer-width integer (includes pointers to oversized payloads).
    Word,
    /// 64-bit integer, two stack cells on 32-bit targets.
    Wide,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
}

/// Classification of the captured return value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RetClass {
    Word,
    Wide,
    Float,
    Double,
}

/// Upper bound on argument count; keeps every block displacement within an
/// 8-bit signed offset in the emitted code.
pub(crate) const MAX_ARGS: usize = 12;

const RET_SLOT: u8 = 0x00;

fn arg_slot(index: usize) -> u8 {
    (0x08 + 8 * index) as u8
}

/// Emits the x86-64 (Microsoft x64 convention) trampoline.
///
/// The first four arguments ride in RCX/RDX/R8/R9 (XMM0–XMM3 for floats),
/// the rest in stack cells above the 32-byte shadow space. The frame size
/// keeps RSP 16-byte aligned at the call site.
pub(crate) fn emit_x64(block: u64, function: u64, args: &[ArgClass], ret: RetClass) -> Vec<u8> {
    assert!(args.len() <= MAX_ARGS);

    let stack_args = args.len().saturating_sub(4);
    let frame = (0x28 + 8 * (stack_args + (stack_args & 1))) as u8;

    let mut code = Vec::new();

    // SUB RSP, frame
    code.extend_from_slice(&[0x48, 0x83, 0xEC, frame]);

    // MOV RAX, <block>
    code.extend_from_slice(&[0x48, 0xB8]);
    code.extend_from_slice(&block.to_le_bytes());

    // Register arguments: MOV reg, [RAX + slot]
    const GP_LOADS: [[u8; 3]; 4] = [
        [0x48, 0x8B, 0x48], // MOV RCX, [RAX+disp8]
        [0x48, 0x8B, 0x50], // MOV RDX, [RAX+disp8]
        [0x4C, 0x8B, 0x40], // MOV R8,  [RAX+disp8]
        [0x4C, 0x8B, 0x48], // MOV R9,  [RAX+disp8]
    ];
    // MOVQ XMMn, <matching GP register>
    const XMM_MOVES: [[u8; 5]; 4] = [
        [0x66, 0x48, 0x0F, 0x6E, 0xC1], // MOVQ XMM0, RCX
        [0x66, 0x48, 0x0F, 0x6E, 0xCA], // MOVQ XMM1, RDX
        [0x66, 0x49, 0x0F, 0x6E, 0xD0], // MOVQ XMM2, R8
        [0x66, 0x49, 0x0F, 0x6E, 0xD9], // MOVQ XMM3, R9
    ];

    for (i, class) in args.iter().enumerate().take(4) {
        code.extend_from_slice(&GP_LOADS[i]);
        code.push(arg_slot(i));
        if matches!(class, ArgClass::Float | ArgClass::Double) {
            code.extend_from_slice(&XMM_MOVES[i]);
        }
    }

    // Stack arguments: MOV R10, [RAX + slot]; MOV [RSP + 0x20 + 8*(i-4)], R10
    for i in 4..args.len() {
        code.extend_from_slice(&[0x4C, 0x8B, 0x50, arg_slot(i)]);
        code.extend_from_slice(&[0x4C, 0x89, 0x54, 0x24, (0x20 + 8 * (i - 4)) as u8]);
    }

    // MOV RAX, <function>; CALL RAX
    code.extend_from_slice(&[0x48, 0xB8]);
    code.extend_from_slice(&function.to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]);

    // MOV RCX, <block>
    code.extend_from_slice(&[0x48, 0xB9]);
    code.extend_from_slice(&block.to_le_bytes());

    match ret {
        // MOV [RCX], RAX
        RetClass::Word | RetClass::Wide => code.extend_from_slice(&[0x48, 0x89, 0x01]),
        // MOVSS [RCX], XMM0
        RetClass::Float => code.extend_from_slice(&[0xF3, 0x0F, 0x11, 0x01]),
        // MOVSD [RCX], XMM0
        RetClass::Double => code.extend_from_slice(&[0xF2, 0x0F, 0x11, 0x01]),
    }

    // ADD RSP, frame; RET
    code.extend_from_slice(&[0x48, 0x83, 0xC4, frame]);
    code.push(0xC3);
    code
}

/// Emits the x86 (cdecl) trampoline.
///
/// Arguments are pushed right-to-left, 8-byte payloads as two dwords, high
/// half first. Integer returns land in EAX (EDX:EAX for 64-bit), floats on
/// the x87 stack. The thread routine itself is stdcall with one parameter,
/// hence the trailing `RET 4`.
pub(crate) fn emit_x86(block: u64, function: u64, args: &[ArgClass], ret: RetClass) -> Vec<u8> {
    assert!(args.len() <= MAX_ARGS);

    let block32 = block as u32;
    let function32 = function as u32;
    let mut pushed: u8 = 0;
    let mut code = Vec::new();

    // MOV EAX, <block>
    code.push(0xB8);
    code.extend_from_slice(&block32.to_le_bytes());

    for (i, class) in args.iter().enumerate().rev() {
        let low = arg_slot(i);
        if matches!(class, ArgClass::Wide | ArgClass::Double) {
            // PUSH dword [EAX + slot + 4]
            code.extend_from_slice(&[0xFF, 0x70, low + 4]);
            pushed += 4;
        }
        // PUSH dword [EAX + slot]
        code.extend_from_slice(&[0xFF, 0x70, low]);
        pushed += 4;
    }

    // MOV EAX, <function>; CALL EAX
    code.push(0xB8);
    code.extend_from_slice(&function32.to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]);

    // MOV ECX, <block>
    code.push(0xB9);
    code.extend_from_slice(&block32.to_le_bytes());

    match ret {
        // MOV [ECX], EAX
        RetClass::Word => code.extend_from_slice(&[0x89, 0x01]),
        // MOV [ECX], EAX; MOV [ECX+4], EDX
        RetClass::Wide => code.extend_from_slice(&[0x89, 0x01, 0x89, 0x51, 0x04]),
        // FSTP dword [ECX]
        RetClass::Float => code.extend_from_slice(&[0xD9, 0x19]),
        // FSTP qword [ECX]
        RetClass::Double => code.extend_from_slice(&[0xDD, 0x19]),
    }

    if pushed > 0 {
        // ADD ESP, pushed (caller cleanup)
        code.extend_from_slice(&[0x83, 0xC4, pushed]);
    }

    // RET 4
    code.extend_from_slice(&[0xC2, 0x04, 0x00]);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u64 = 0x0000_7FFE_1234_0000;
    const FUNC: u64 = 0x0000_7FFD_AABB_0000;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn x64_shim_frames_and_returns() {
        let code = emit_x64(BLOCK, FUNC, &[ArgClass::Word], RetClass::Word);
        assert_eq!(&code[0..4], &[0x48, 0x83, 0xEC, 0x28], "aligned frame");
        assert_eq!(*code.last().unwrap(), 0xC3);
        assert!(contains(&code, &BLOCK.to_le_bytes()));
        assert!(contains(&code, &FUNC.to_le_bytes()));
        assert!(contains(&code, &[0xFF, 0xD0]), "CALL RAX");
        assert!(contains(&code, &[0x48, 0x89, 0x01]), "store RAX to slot");
    }

    #[test]
    fn x64_shim_loads_first_slot_into_rcx() {
        let code = emit_x64(BLOCK, FUNC, &[ArgClass::Word, ArgClass::Word], RetClass::Word);
        assert!(contains(&code, &[0x48, 0x8B, 0x48, 0x08]), "MOV RCX,[RAX+8]");
        assert!(contains(&code, &[0x48, 0x8B, 0x50, 0x10]), "MOV RDX,[RAX+16]");
    }

    #[test]
    fn x64_shim_routes_float_args_through_xmm() {
        let code = emit_x64(
            BLOCK,
            FUNC,
            &[ArgClass::Double, ArgClass::Word],
            RetClass::Word,
        );
        assert!(contains(&code, &[0x66, 0x48, 0x0F, 0x6E, 0xC1]), "MOVQ XMM0");

        let without = emit_x64(BLOCK, FUNC, &[ArgClass::Word, ArgClass::Word], RetClass::Word);
        assert!(!contains(&without, &[0x0F, 0x6E]));
    }

    #[test]
    fn x64_shim_spills_fifth_argument_to_stack() {
        let args = [ArgClass::Word; 5];
        let code = emit_x64(BLOCK, FUNC, &args, RetClass::Word);
        assert!(
            contains(&code, &[0x4C, 0x89, 0x54, 0x24, 0x20]),
            "stack cell above shadow space"
        );
        // one stack arg rounds the frame up to keep 16-byte alignment
        assert_eq!(code[3], 0x38);
    }

    #[test]
    fn x64_shim_captures_float_returns_from_xmm0() {
        let f32_ret = emit_x64(BLOCK, FUNC, &[], RetClass::Float);
        assert!(contains(&f32_ret, &[0xF3, 0x0F, 0x11, 0x01]), "MOVSS");
        let f64_ret = emit_x64(BLOCK, FUNC, &[], RetClass::Double);
        assert!(contains(&f64_ret, &[0xF2, 0x0F, 0x11, 0x01]), "MOVSD");
    }

    #[test]
    fn x86_shim_pushes_args_and_cleans_stack() {
        let code = emit_x86(BLOCK, FUNC, &[ArgClass::Word, ArgClass::Word], RetClass::Word);
        assert!(contains(&code, &[0xFF, 0x70, 0x08]), "push slot 0");
        assert!(contains(&code, &[0xFF, 0x70, 0x10]), "push slot 1");
        assert!(contains(&code, &[0x83, 0xC4, 0x08]), "cdecl cleanup");
        assert_eq!(&code[code.len() - 3..], &[0xC2, 0x04, 0x00], "RET 4");
    }

    #[test]
    fn x86_shim_pushes_wide_args_high_half_first() {
        let code = emit_x86(BLOCK, FUNC, &[ArgClass::Wide], RetClass::Word);
        let high = [0xFF, 0x70, 0x0C];
        let low = [0xFF, 0x70, 0x08];
        let high_at = code.windows(3).position(|w| w == high).unwrap();
        let low_at = code.windows(3).position(|w| w == low).unwrap();
        assert!(high_at < low_at);
        assert!(contains(&code, &[0x83, 0xC4, 0x08]));
    }

    #[test]
    fn x86_shim_captures_wide_and_float_returns() {
        let wide = emit_x86(BLOCK, FUNC, &[], RetClass::Wide);
        assert!(contains(&wide, &[0x89, 0x01, 0x89, 0x51, 0x04]), "EDX:EAX");
        let double = emit_x86(BLOCK, FUNC, &[], RetClass::Double);
        assert!(contains(&double, &[0xDD, 0x19]), "FSTP qword");
    }
}
