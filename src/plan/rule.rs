use core::fmt;

use super::{dump::RegisterNames, UnwindPlan};
use crate::{RegNum, INVALID_REGNUM};

/// How to recover the caller's value of one register at a given row.
///
/// Expression bytes are borrowed from whatever the plan was decoded from
/// (usually the `.eh_frame` section of a loaded module), so that backing
/// storage has to outlive the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterRule<'a> {
    /// Nothing is known. We may be able to assume the register is unchanged,
    /// but that is only a convention (gcc doesn't specify all initial values).
    #[default]
    Unspecified,
    /// The previous value is not recoverable, e.g. a volatile register.
    Undefined,
    /// The register has not been modified from the previous frame.
    Same,
    /// `reg = [CFA + offset]`
    AtCfaPlusOffset(i32),
    /// `reg = CFA + offset`
    IsCfaPlusOffset(i32),
    /// `reg = [AFA + offset]`
    AtAfaPlusOffset(i32),
    /// `reg = AFA + offset`
    IsAfaPlusOffset(i32),
    /// `reg = other reg`
    InOtherRegister(RegNum),
    /// `reg = [eval(expr)]`
    AtExpression(&'a [u8]),
    /// `reg = eval(expr)`
    IsExpression(&'a [u8]),
    /// `reg = constant`
    IsConstant(u64),
}

impl<'a> RegisterRule<'a> {
    pub fn set_unspecified(&mut self) {
        *self = RegisterRule::Unspecified;
    }

    pub fn set_undefined(&mut self) {
        *self = RegisterRule::Undefined;
    }

    pub fn set_same(&mut self) {
        *self = RegisterRule::Same;
    }

    pub fn set_at_cfa_plus_offset(&mut self, offset: i32) {
        *self = RegisterRule::AtCfaPlusOffset(offset);
    }

    pub fn set_is_cfa_plus_offset(&mut self, offset: i32) {
        *self = RegisterRule::IsCfaPlusOffset(offset);
    }

    pub fn set_at_afa_plus_offset(&mut self, offset: i32) {
        *self = RegisterRule::AtAfaPlusOffset(offset);
    }

    pub fn set_is_afa_plus_offset(&mut self, offset: i32) {
        *self = RegisterRule::IsAfaPlusOffset(offset);
    }

    pub fn set_in_register(&mut self, reg: RegNum) {
        *self = RegisterRule::InOtherRegister(reg);
    }

    pub fn set_at_expression(&mut self, expr: &'a [u8]) {
        *self = RegisterRule::AtExpression(expr);
    }

    pub fn set_is_expression(&mut self, expr: &'a [u8]) {
        *self = RegisterRule::IsExpression(expr);
    }

    pub fn set_is_constant(&mut self, value: u64) {
        *self = RegisterRule::IsConstant(value);
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, RegisterRule::Unspecified)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, RegisterRule::Undefined)
    }

    pub fn is_same(&self) -> bool {
        matches!(self, RegisterRule::Same)
    }

    pub fn is_at_cfa_plus_offset(&self) -> bool {
        matches!(self, RegisterRule::AtCfaPlusOffset(_))
    }

    pub fn is_cfa_plus_offset(&self) -> bool {
        matches!(self, RegisterRule::IsCfaPlusOffset(_))
    }

    pub fn is_at_afa_plus_offset(&self) -> bool {
        matches!(self, RegisterRule::AtAfaPlusOffset(_))
    }

    pub fn is_afa_plus_offset(&self) -> bool {
        matches!(self, RegisterRule::IsAfaPlusOffset(_))
    }

    pub fn is_in_other_register(&self) -> bool {
        matches!(self, RegisterRule::InOtherRegister(_))
    }

    pub fn is_at_expression(&self) -> bool {
        matches!(self, RegisterRule::AtExpression(_))
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, RegisterRule::IsExpression(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, RegisterRule::IsConstant(_))
    }

    /// The CFA/AFA offset of this rule.
    ///
    /// Returns 0 for every rule that isn't one of the four offset rules, so a
    /// 0 here doesn't mean the rule actually has an offset.
    pub fn offset(&self) -> i32 {
        match *self {
            RegisterRule::AtCfaPlusOffset(offset)
            | RegisterRule::IsCfaPlusOffset(offset)
            | RegisterRule::AtAfaPlusOffset(offset)
            | RegisterRule::IsAfaPlusOffset(offset) => offset,
            _ => 0,
        }
    }

    /// The register holding the value, or [`INVALID_REGNUM`] unless this is
    /// [`RegisterRule::InOtherRegister`].
    pub fn register_number(&self) -> RegNum {
        match *self {
            RegisterRule::InOtherRegister(reg) => reg,
            _ => INVALID_REGNUM,
        }
    }

    /// The constant value, or 0 unless this is [`RegisterRule::IsConstant`].
    pub fn constant(&self) -> u64 {
        match *self {
            RegisterRule::IsConstant(value) => value,
            _ => 0,
        }
    }

    pub fn expression_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            RegisterRule::AtExpression(expr) | RegisterRule::IsExpression(expr) => Some(expr),
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
        verbose: bool,
    ) -> fmt::Result {
        match *self {
            RegisterRule::Unspecified => out.write_str(if verbose { "=<unspec>" } else { "=!" }),
            RegisterRule::Undefined => out.write_str(if verbose { "=<undef>" } else { "=?" }),
            RegisterRule::Same => out.write_str("= <same>"),
            RegisterRule::AtCfaPlusOffset(offset) => write!(out, "=[CFA{offset:+}]"),
            RegisterRule::IsCfaPlusOffset(offset) => write!(out, "=CFA{offset:+}"),
            RegisterRule::AtAfaPlusOffset(offset) => write!(out, "=[AFA{offset:+}]"),
            RegisterRule::IsAfaPlusOffset(offset) => write!(out, "=AFA{offset:+}"),
            RegisterRule::InOtherRegister(reg) => {
                out.write_char('=')?;
                super::dump::register_name(out, plan, names, reg)
            }
            RegisterRule::AtExpression(_) => out.write_str("=[dwarf-expr]"),
            RegisterRule::IsExpression(_) => out.write_str("=dwarf-expr"),
            RegisterRule::IsConstant(value) => write!(out, "=0x{value:x}"),
        }
    }
}
