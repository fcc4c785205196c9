//! Human readable rendering of plans, for logs and debugging.

use core::fmt;

use super::{LazyBool, RegisterKind, UnwindPlan};
use crate::RegNum;

/// Resolves register numbers to architecture specific names.
pub trait RegisterNames {
    fn register_name(&self, kind: RegisterKind, reg: RegNum) -> Option<&str>;
}

/// Names every register `reg(N)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericRegisterNames;

impl RegisterNames for NumericRegisterNames {
    fn register_name(&self, _kind: RegisterKind, _reg: RegNum) -> Option<&str> {
        None
    }
}

pub(super) fn register_name(
    out: &mut dyn fmt::Write,
    plan: Option<&UnwindPlan<'_>>,
    names: &dyn RegisterNames,
    reg: RegNum,
) -> fmt::Result {
    let name = plan.and_then(|plan| names.register_name(plan.register_kind(), reg));
    match name {
        Some(name) => out.write_str(name),
        None => write!(out, "reg({reg})"),
    }
}

pub(super) fn lazy_bool(b: LazyBool) -> &'static str {
    match b {
        LazyBool::True => "yes.",
        LazyBool::False => "no.",
        LazyBool::Calculate => "not specified.",
    }
}

pub(super) fn register_kind(kind: RegisterKind) -> &'static str {
    match kind {
        RegisterKind::EhFrame => "eh_frame",
        RegisterKind::Dwarf => "DWARF",
        RegisterKind::Generic => "Generic",
        RegisterKind::ProcessPlugin => "Process plugin",
        RegisterKind::Native => "native",
    }
}
