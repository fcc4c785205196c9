use core::fmt;

use super::{dump::RegisterNames, UnwindPlan};
use crate::{RegNum, INVALID_REGNUM};

/// How to compute a frame address (the CFA, or the AFA of a realigned frame)
/// for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameAddressValue<'a> {
    #[default]
    Unspecified,
    /// `FA = reg + offset`
    RegisterPlusOffset { reg: RegNum, offset: i32 },
    /// `FA = [reg]`
    RegisterDereferenced(RegNum),
    /// `FA = eval(expr)`
    Expression(&'a [u8]),
    /// Search for a return address somewhere around `SP + offset`.
    ReturnAddressSearch(i32),
    /// `FA = constant`
    Constant(u64),
}

impl<'a> FrameAddressValue<'a> {
    pub fn set_unspecified(&mut self) {
        *self = FrameAddressValue::Unspecified;
    }

    pub fn set_register_plus_offset(&mut self, reg: RegNum, offset: i32) {
        *self = FrameAddressValue::RegisterPlusOffset { reg, offset };
    }

    pub fn set_register_dereferenced(&mut self, reg: RegNum) {
        *self = FrameAddressValue::RegisterDereferenced(reg);
    }

    pub fn set_expression(&mut self, expr: &'a [u8]) {
        *self = FrameAddressValue::Expression(expr);
    }

    pub fn set_ra_search(&mut self, offset: i32) {
        *self = FrameAddressValue::ReturnAddressSearch(offset);
    }

    pub fn set_constant(&mut self, value: u64) {
        *self = FrameAddressValue::Constant(value);
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, FrameAddressValue::Unspecified)
    }

    pub fn is_register_plus_offset(&self) -> bool {
        matches!(self, FrameAddressValue::RegisterPlusOffset { .. })
    }

    pub fn is_register_dereferenced(&self) -> bool {
        matches!(self, FrameAddressValue::RegisterDereferenced(_))
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, FrameAddressValue::Expression(_))
    }

    pub fn is_ra_search(&self) -> bool {
        matches!(self, FrameAddressValue::ReturnAddressSearch(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, FrameAddressValue::Constant(_))
    }

    /// The base register for register based values, [`INVALID_REGNUM`]
    /// otherwise.
    pub fn register_number(&self) -> RegNum {
        match *self {
            FrameAddressValue::RegisterPlusOffset { reg, .. }
            | FrameAddressValue::RegisterDereferenced(reg) => reg,
            _ => INVALID_REGNUM,
        }
    }

    /// The offset of a `RegisterPlusOffset` or `ReturnAddressSearch` value, 0
    /// for anything else.
    pub fn offset(&self) -> i32 {
        match *self {
            FrameAddressValue::RegisterPlusOffset { offset, .. }
            | FrameAddressValue::ReturnAddressSearch(offset) => offset,
            _ => 0,
        }
    }

    /// Adds `delta` to the offset. Does nothing unless this is
    /// `RegisterPlusOffset`.
    pub fn inc_offset(&mut self, delta: i32) {
        if let FrameAddressValue::RegisterPlusOffset { offset, .. } = self {
            *offset = offset.wrapping_add(delta);
        }
    }

    /// Replaces the offset. Does nothing unless this is `RegisterPlusOffset`.
    pub fn set_offset(&mut self, new_offset: i32) {
        if let FrameAddressValue::RegisterPlusOffset { offset, .. } = self {
            *offset = new_offset;
        }
    }

    pub fn constant(&self) -> u64 {
        match *self {
            FrameAddressValue::Constant(value) => value,
            _ => 0,
        }
    }

    pub fn expression_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            FrameAddressValue::Expression(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn expression_len(&self) -> usize {
        self.expression_bytes().map_or(0, <[u8]>::len)
    }

    pub fn dump(
        &self,
        out: &mut dyn fmt::Write,
        plan: Option<&UnwindPlan<'_>>,
        names: &dyn RegisterNames,
    ) -> fmt::Result {
        match *self {
            FrameAddressValue::Unspecified => out.write_str("unspecified"),
            FrameAddressValue::RegisterPlusOffset { reg, offset } => {
                super::dump::register_name(out, plan, names, reg)?;
                write!(out, "{offset:+3}")
            }
            FrameAddressValue::RegisterDereferenced(reg) => {
                out.write_char('[')?;
                super::dump::register_name(out, plan, names, reg)?;
                out.write_char(']')
            }
            FrameAddressValue::Expression(_) => out.write_str("dwarf-expr"),
            FrameAddressValue::ReturnAddressSearch(offset) => write!(out, "RaSearch@SP{offset:+}"),
            FrameAddressValue::Constant(value) => write!(out, "0x{value:x}"),
        }
    }
}
