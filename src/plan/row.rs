use alloc::vec::Vec;
use core::fmt;

use super::{dump::RegisterNames, FrameAddressValue, RegisterRule, UnwindPlan};
use crate::RegNum;

/// The register rules of a row, kept sorted by register number.
///
/// Rows usually mention a handful of registers, so a flat vector with binary
/// search beats a tree here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RegisterRuleMap<'a> {
    rules: Vec<(RegNum, RegisterRule<'a>)>,
}

impl<'a> RegisterRuleMap<'a> {
    fn position(&self, reg: RegNum) -> Result<usize, usize> {
        self.rules.binary_search_by_key(&reg, |&(r, _)| r)
    }

    fn get(&self, reg: RegNum) -> Option<&RegisterRule<'a>> {
        self.position(reg).ok().map(|idx| &self.rules[idx].1)
    }

    fn contains(&self, reg: RegNum) -> bool {
        self.position(reg).is_ok()
    }

    fn set(&mut self, reg: RegNum, rule: RegisterRule<'a>) {
        match self.position(reg) {
            Ok(idx) => self.rules[idx].1 = rule,
            Err(idx) => self.rules.insert(idx, (reg, rule)),
        }
    }

    fn remove(&mut self, reg: RegNum) {
        if let Ok(idx) = self.position(reg) {
            self.rules.remove(idx);
        }
    }

    fn clear(&mut self) {
        self.rules.clear();
    }
}

/// The unwind rules that apply from `offset` bytes into the function until
/// the next row of the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row<'a> {
    offset: i64,
    cfa_value: FrameAddressValue<'a>,
    afa_value: FrameAddressValue<'a>,
    register_locations: RegisterRuleMap<'a>,
    unspecified_registers_are_undefined: bool,
}

impl<'a> Row<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset;
    }

    pub fn slide_offset(&mut self, delta: i64) {
        self.offset = self.offset.wrapping_add(delta);
    }

    pub fn cfa_value(&self) -> &FrameAddressValue<'a> {
        &self.cfa_value
    }

    pub fn cfa_value_mut(&mut self) -> &mut FrameAddressValue<'a> {
        &mut self.cfa_value
    }

    pub fn afa_value(&self) -> &FrameAddressValue<'a> {
        &self.afa_value
    }

    pub fn afa_value_mut(&mut self) -> &mut FrameAddressValue<'a> {
        &mut self.afa_value
    }

    /// The rule this row states for `reg`.
    ///
    /// `None` means the row says nothing about the register, which is not the
    /// same as an explicit [`RegisterRule::Unspecified`]. See
    /// [`Row::unspecified_registers_are_undefined`] for how readers should
    /// treat absent registers.
    pub fn register_info(&self, reg: RegNum) -> Option<RegisterRule<'a>> {
        self.register_locations.get(reg).copied()
    }

    pub fn set_register_info(&mut self, reg: RegNum, rule: RegisterRule<'a>) {
        self.register_locations.set(reg, rule);
    }

    pub fn remove_register_info(&mut self, reg: RegNum) {
        self.register_locations.remove(reg);
    }

    /// All `(register, rule)` pairs of this row, in ascending register order.
    pub fn registers(&self) -> impl Iterator<Item = (RegNum, RegisterRule<'a>)> + '_ {
        self.register_locations.rules.iter().copied()
    }

    fn set_guarded(&mut self, reg: RegNum, rule: RegisterRule<'a>, can_replace: bool) -> bool {
        if !can_replace && self.register_locations.contains(reg) {
            return false;
        }
        self.register_locations.set(reg, rule);
        true
    }

    pub fn set_register_location_to_at_cfa_plus_offset(
        &mut self,
        reg: RegNum,
        offset: i32,
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::AtCfaPlusOffset(offset), can_replace)
    }

    pub fn set_register_location_to_is_cfa_plus_offset(
        &mut self,
        reg: RegNum,
        offset: i32,
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::IsCfaPlusOffset(offset), can_replace)
    }

    /// With `can_replace_only_if_unspecified`, an existing rule is only
    /// overwritten when it is [`RegisterRule::Unspecified`].
    pub fn set_register_location_to_undefined(
        &mut self,
        reg: RegNum,
        can_replace: bool,
        can_replace_only_if_unspecified: bool,
    ) -> bool {
        if let Some(existing) = self.register_locations.get(reg) {
            if !can_replace {
                return false;
            }
            if can_replace_only_if_unspecified && !existing.is_unspecified() {
                return false;
            }
        }
        self.register_locations.set(reg, RegisterRule::Undefined);
        true
    }

    pub fn set_register_location_to_unspecified(&mut self, reg: RegNum, can_replace: bool) -> bool {
        self.set_guarded(reg, RegisterRule::Unspecified, can_replace)
    }

    pub fn set_register_location_to_register(
        &mut self,
        reg: RegNum,
        other_reg: RegNum,
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::InOtherRegister(other_reg), can_replace)
    }

    /// Unlike the other setters, the flag here is inverted: with
    /// `must_replace` the register has to have a rule already, otherwise
    /// nothing happens and `false` is returned.
    pub fn set_register_location_to_same(&mut self, reg: RegNum, must_replace: bool) -> bool {
        if must_replace && !self.register_locations.contains(reg) {
            return false;
        }
        self.register_locations.set(reg, RegisterRule::Same);
        true
    }

    pub fn set_register_location_to_at_expression(
        &mut self,
        reg: RegNum,
        expr: &'a [u8],
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::AtExpression(expr), can_replace)
    }

    pub fn set_register_location_to_is_expression(
        &mut self,
        reg: RegNum,
        expr: &'a [u8],
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::IsExpression(expr), can_replace)
    }

    pub fn set_register_location_to_is_constant(
        &mut self,
        reg: RegNum,
        value: u64,
        can_replace: bool,
    ) -> bool {
        self.set_guarded(reg, RegisterRule::IsConstant(value), can_replace)
    }

    /// When set, any register this row doesn't mention must be read as
    /// [`RegisterRule::Undefined`] instead of being looked up in a newer frame.
    ///
    /// This is for rows where spilled registers can't be tracked, like a
    /// jitted frame with no unwind info or start address: registers MAY have
    /// been spilled and overwritten, so the value from a newer frame could be
    /// wrong.
    pub fn set_unspecified_registers_are_undefined(&mut self, unspec_is_undef: bool) {
        self.unspecified_registers_are_undefined = unspec_is_undef;
    }

    pub fn unspecified_registers_are_undefined(&self) -> bool {
        self.unspecified_registers_are_undefined
    }

    pub fn clear(&mut self) {
        self.offset = 0;
        self.cfa_value.set_unspecified();
        self.afa_value.set_unspecified();
        self.register_locations.clear();
        self.unspecified_registers_are_undefined = false;
    }

    pub fn dump(
        &self,
        out: &mut dyn fmt::Write,
        plan: Option<&UnwindPlan<'_>>,
        names: &dyn RegisterNames,
        base_addr: Option<u64>,
    ) -> fmt::Result {
        match base_addr {
            Some(base) => write!(out, "0x{:016x}: CFA=", base.wrapping_add_signed(self.offset))?,
            None => write!(out, "{:4}: CFA=", self.offset)?,
        }
        self.cfa_value.dump(out, plan, names)?;
        if !self.afa_value.is_unspecified() {
            out.write_str(" AFA=")?;
            self.afa_value.dump(out, plan, names)?;
        }
        out.write_str(" => ")?;
        for (reg, rule) in self.registers() {
            super::dump::register_name(out, plan, names, reg)?;
            rule.dump(out, plan, names, false)?;
            out.write_char(' ')?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
