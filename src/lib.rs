//! Unwind plans: a per-function table of how to recover the caller's registers
//! and frame address at every instruction, plus a DWARF CFI decoder that
//! produces them.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate tracing;

pub mod dwarf;
pub mod plan;

pub use plan::{
    FrameAddressValue, LazyBool, NumericRegisterNames, RegisterKind, RegisterNames, RegisterRule,
    Row, UnwindPlan,
};

/// A register number in the numbering scheme of the owning plan's
/// [`RegisterKind`].
pub type RegNum = u32;

/// The "no register" value returned by register accessors that don't apply.
pub const INVALID_REGNUM: RegNum = u32::MAX;
