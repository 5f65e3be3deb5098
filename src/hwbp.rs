//! Debug-register bookkeeping: DR0–DR3 slots and the DR7 control layout.
//!
//! The bit math here is the x86/x64 contract shared by every thread of a
//! debugged target. Each slot owns one global-enable bit, two condition bits,
//! and two length bits in DR7:
//!
//! ```text
//! enable(slot)    = bit  2*slot + 1
//! condition(slot) = bits 16 + 4*slot .. 17 + 4*slot
//! length(slot)    = bits 18 + 4*slot .. 19 + 4*slot
//! ```

use crate::error::{Error, Result};
use crate::types::TypeTag;

/// One of the four hardware debug-address registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum HwRegister {
    Dr0 = 0,
    Dr1 = 1,
    Dr2 = 2,
    Dr3 = 3,
}

impl HwRegister {
    pub const ALL: [Self; 4] = [Self::Dr0, Self::Dr1, Self::Dr2, Self::Dr3];

    /// Maps a raw slot index (0..=3) onto a register.
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::Dr0),
            1 => Ok(Self::Dr1),
            2 => Ok(Self::Dr2),
            3 => Ok(Self::Dr3),
            _ => Err(Error::InvalidArgument(format!(
                "debug register index must be 0..=3, got {index}"
            ))),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Condition under which an armed slot raises an exception.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Trigger {
    Execute = 0,
    Write = 1,
    ReadWrite = 3,
}

impl Trigger {
    /// Maps the wire encoding (0 execute, 1 write, 3 read-write) onto a trigger.
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Execute),
            1 => Ok(Self::Write),
            3 => Ok(Self::ReadWrite),
            _ => Err(Error::InvalidArgument(format!(
                "breakpoint trigger must be 0, 1 or 3, got {raw}"
            ))),
        }
    }

    fn condition_bits(self) -> u64 {
        self as u64
    }
}

/// Number of bytes watched by a slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WatchLength {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl WatchLength {
    /// Maps a byte count onto a watch length; only 1, 2, 4 and 8 are legal.
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(Error::InvalidArgument(format!(
                "breakpoint length must be 1, 2, 4 or 8 bytes, got {raw}"
            ))),
        }
    }

    /// Derives the watch length from a fixed-size type tag.
    pub fn for_tag(tag: TypeTag) -> Result<Self> {
        let size = tag.size().ok_or_else(|| {
            Error::InvalidArgument("string watch length must be measured from the target".into())
        })?;
        Self::from_raw(size.min(8) as u8)
    }

    /// Largest legal watch length not exceeding `len` bytes (minimum 1).
    pub fn covering(len: usize) -> Self {
        match len {
            8.. => Self::Eight,
            4..=7 => Self::Four,
            2..=3 => Self::Two,
            _ => Self::One,
        }
    }

    // DR7 length encoding: 00=1, 01=2, 10=8, 11=4.
    fn length_bits(self) -> u64 {
        match self {
            Self::One => 0b00,
            Self::Two => 0b01,
            Self::Eight => 0b10,
            Self::Four => 0b11,
        }
    }
}

/// An armed breakpoint as recorded in a debug session.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Breakpoint {
    pub register: HwRegister,
    pub address: u64,
    pub trigger: Trigger,
    pub length: WatchLength,
}

/// Returns `dr7` with the slot armed for the given trigger and length.
pub fn arm(dr7: u64, slot: HwRegister, trigger: Trigger, length: WatchLength) -> u64 {
    let i = slot.index() as u64;
    let mut dr7 = dr7;
    dr7 |= 1 << (2 * i + 1);
    dr7 &= !(0b1111 << (16 + 4 * i));
    dr7 |= trigger.condition_bits() << (16 + 4 * i);
    dr7 |= length.length_bits() << (18 + 4 * i);
    dr7
}

/// Returns `dr7` with the slot's enable and control bits cleared.
pub fn disarm(dr7: u64, slot: HwRegister) -> u64 {
    let i = slot.index() as u64;
    dr7 & !(1 << (2 * i + 1)) & !(0b1111 << (16 + 4 * i))
}

/// Whether the slot's enable bit is set in `dr7`.
pub fn is_armed(dr7: u64, slot: HwRegister) -> bool {
    dr7 & (1 << (2 * slot.index() as u64 + 1)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_dr0_sets_enable_condition_and_length() {
        let dr7 = arm(0, HwRegister::Dr0, Trigger::Write, WatchLength::Four);
        assert_eq!(dr7 & 0b10, 0b10, "global enable for DR0");
        assert_eq!((dr7 >> 16) & 0b11, 0b01, "write condition");
        assert_eq!((dr7 >> 18) & 0b11, 0b11, "4-byte length");
    }

    #[test]
    fn slots_do_not_interfere() {
        let mut dr7 = arm(0, HwRegister::Dr0, Trigger::Execute, WatchLength::One);
        dr7 = arm(dr7, HwRegister::Dr3, Trigger::ReadWrite, WatchLength::Eight);

        assert!(is_armed(dr7, HwRegister::Dr0));
        assert!(is_armed(dr7, HwRegister::Dr3));
        assert!(!is_armed(dr7, HwRegister::Dr1));

        assert_eq!((dr7 >> 16) & 0b1111, 0b0000, "execute, 1 byte");
        assert_eq!((dr7 >> 28) & 0b11, 0b11, "read-write condition");
        assert_eq!((dr7 >> 30) & 0b11, 0b10, "8-byte length");
    }

    #[test]
    fn disarming_clears_enable_and_control_bits() {
        let armed = arm(0, HwRegister::Dr2, Trigger::Write, WatchLength::Two);
        let cleared = disarm(armed, HwRegister::Dr2);
        assert_eq!(cleared, 0);
        assert!(!is_armed(cleared, HwRegister::Dr2));
    }

    #[test]
    fn disarming_one_slot_preserves_the_others() {
        let mut dr7 = arm(0, HwRegister::Dr0, Trigger::Execute, WatchLength::One);
        dr7 = arm(dr7, HwRegister::Dr1, Trigger::Write, WatchLength::Four);
        let dr7 = disarm(dr7, HwRegister::Dr0);
        assert!(!is_armed(dr7, HwRegister::Dr0));
        assert!(is_armed(dr7, HwRegister::Dr1));
        assert_eq!((dr7 >> 20) & 0b11, 0b01, "DR1 condition untouched");
    }

    #[test]
    fn length_encoding_is_the_dr7_table() {
        assert_eq!(WatchLength::One.length_bits(), 0b00);
        assert_eq!(WatchLength::Two.length_bits(), 0b01);
        assert_eq!(WatchLength::Eight.length_bits(), 0b10);
        assert_eq!(WatchLength::Four.length_bits(), 0b11);
    }

    #[test]
    fn rejects_illegal_triggers_and_lengths() {
        assert!(Trigger::from_raw(2).is_err());
        assert!(Trigger::from_raw(4).is_err());
        assert!(WatchLength::from_raw(0).is_err());
        assert!(WatchLength::from_raw(3).is_err());
        assert!(WatchLength::from_raw(16).is_err());
        assert!(HwRegister::from_index(4).is_err());
    }

    #[test]
    fn covering_rounds_down_to_a_legal_length() {
        assert_eq!(WatchLength::covering(0), WatchLength::One);
        assert_eq!(WatchLength::covering(1), WatchLength::One);
        assert_eq!(WatchLength::covering(3), WatchLength::Two);
        assert_eq!(WatchLength::covering(7), WatchLength::Four);
        assert_eq!(WatchLength::covering(64), WatchLength::Eight);
    }

    #[test]
    fn watch_length_follows_tag_width() {
        assert_eq!(WatchLength::for_tag(TypeTag::U8).unwrap(), WatchLength::One);
        assert_eq!(
            WatchLength::for_tag(TypeTag::F64).unwrap(),
            WatchLength::Eight
        );
        assert!(WatchLength::for_tag(TypeTag::String).is_err());
    }
}
