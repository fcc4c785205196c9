//! Executes call frame instructions into an [`UnwindPlan`].

use alloc::{format, vec::Vec};

use super::parse::{Cie, EhFrame, Error, Fde, InstrIter, Instruction, Result};
use crate::{LazyBool, RegNum, RegisterKind, Row, UnwindPlan, INVALID_REGNUM};

pub(super) const SOURCE_NAME: &str = "eh_frame CFI";

fn register(reg: u64) -> Result<RegNum> {
    match RegNum::try_from(reg) {
        Ok(reg) if reg != INVALID_REGNUM => Ok(reg),
        _ => Err(Error(format!("register number out of range: {reg}"))),
    }
}

fn offset(offset: i64) -> Result<i32> {
    i32::try_from(offset).map_err(|_| Error(format!("offset out of range: {offset}")))
}

struct Interpreter<'a, 'c> {
    cie: &'c Cie<'a>,
    pc_begin: u64,
    row: Row<'a>,
    /// The row after the CIE's initial instructions, for `DW_CFA_restore`.
    initial: Option<Row<'a>>,
    remembered: Vec<Row<'a>>,
    plan: UnwindPlan<'a>,
}

impl<'a, 'c> Interpreter<'a, 'c> {
    fn factored(&self, factored_offset: i64) -> Result<i32> {
        let value = factored_offset
            .checked_mul(self.cie.data_alignment_factor)
            .ok_or_else(|| Error(format!("factored offset overflows: {factored_offset}")))?;
        offset(value)
    }

    fn unsigned_factored(&self, factored_offset: u64) -> Result<i32> {
        let factored_offset = i64::try_from(factored_offset)
            .map_err(|_| Error(format!("factored offset out of range: {factored_offset}")))?;
        self.factored(factored_offset)
    }

    fn advance(&mut self, delta: u64) -> Result<()> {
        let delta = delta
            .checked_mul(self.cie.code_alignment_factor)
            .and_then(|delta| i64::try_from(delta).ok())
            .and_then(|delta| self.row.offset().checked_add(delta))
            .ok_or_else(|| Error(format!("location advance overflows: {delta}")))?;
        self.new_row(delta)
    }

    fn new_row(&mut self, offset: i64) -> Result<()> {
        if offset < self.row.offset() {
            return Err(Error(format!(
                "location moves backwards from {} to {offset}",
                self.row.offset()
            )));
        }
        self.plan.append_row(self.row.clone());
        self.row.set_offset(offset);
        Ok(())
    }

    fn restore(&mut self, reg: u64) -> Result<()> {
        let reg = register(reg)?;
        let initial = self
            .initial
            .as_ref()
            .ok_or_else(|| Error("DW_CFA_restore in the CIE initial instructions".into()))?;
        match initial.register_info(reg) {
            Some(rule) => self.row.set_register_info(reg, rule),
            None => self.row.remove_register_info(reg),
        }
        Ok(())
    }

    fn execute(&mut self, instr: Instruction<'a>) -> Result<()> {
        trace!(offset = self.row.offset(), ?instr, "executing");
        match instr {
            Instruction::SetLoc(addr) => {
                let offset = addr
                    .checked_sub(self.pc_begin)
                    .and_then(|offset| i64::try_from(offset).ok())
                    .ok_or_else(|| Error(format!("DW_CFA_set_loc {addr:#x} before the function")))?;
                self.new_row(offset)?;
            }
            Instruction::AdvanceLoc(delta) | Instruction::AdvanceLoc1(delta) => {
                self.advance(delta.into())?
            }
            Instruction::AdvanceLoc2(delta) => self.advance(delta.into())?,
            Instruction::AdvanceLoc4(delta) => self.advance(delta.into())?,

            Instruction::DefCfa { register: reg, offset: off } => {
                let off = offset(i64::try_from(off).unwrap_or(i64::MAX))?;
                self.row
                    .cfa_value_mut()
                    .set_register_plus_offset(register(reg)?, off);
            }
            Instruction::DefCfaSf {
                register: reg,
                factored_offset,
            } => {
                let off = self.factored(factored_offset)?;
                self.row
                    .cfa_value_mut()
                    .set_register_plus_offset(register(reg)?, off);
            }
            Instruction::DefCfaRegister(reg) => {
                let off = self.row.cfa_value().offset();
                self.row
                    .cfa_value_mut()
                    .set_register_plus_offset(register(reg)?, off);
            }
            Instruction::DefCfaOffset(off) => {
                let off = offset(i64::try_from(off).unwrap_or(i64::MAX))?;
                self.row.cfa_value_mut().set_offset(off);
            }
            Instruction::DefCfaOffsetSf(factored_offset) => {
                let off = self.factored(factored_offset)?;
                self.row.cfa_value_mut().set_offset(off);
            }
            Instruction::DefCfaExpression(expr) => self.row.cfa_value_mut().set_expression(expr),

            Instruction::Undefined(reg) => {
                self.row
                    .set_register_location_to_undefined(register(reg)?, true, false);
            }
            Instruction::SameValue(reg) => {
                self.row.set_register_location_to_same(register(reg)?, false);
            }
            Instruction::Offset {
                register: reg,
                factored_offset,
            }
            | Instruction::OffsetExtended {
                register: reg,
                factored_offset,
            } => {
                let off = self.unsigned_factored(factored_offset)?;
                self.row
                    .set_register_location_to_at_cfa_plus_offset(register(reg)?, off, true);
            }
            Instruction::OffsetExtendedSf {
                register: reg,
                factored_offset,
            } => {
                let off = self.factored(factored_offset)?;
                self.row
                    .set_register_location_to_at_cfa_plus_offset(register(reg)?, off, true);
            }
            Instruction::GnuNegativeOffsetExtended {
                register: reg,
                factored_offset,
            } => {
                let off = self.unsigned_factored(factored_offset)?;
                let off = off
                    .checked_neg()
                    .ok_or_else(|| Error(format!("offset out of range: {off}")))?;
                self.row
                    .set_register_location_to_at_cfa_plus_offset(register(reg)?, off, true);
            }
            Instruction::ValOffset {
                register: reg,
                factored_offset,
            } => {
                let off = self.unsigned_factored(factored_offset)?;
                self.row
                    .set_register_location_to_is_cfa_plus_offset(register(reg)?, off, true);
            }
            Instruction::ValOffsetSf {
                register: reg,
                factored_offset,
            } => {
                let off = self.factored(factored_offset)?;
                self.row
                    .set_register_location_to_is_cfa_plus_offset(register(reg)?, off, true);
            }
            Instruction::Register {
                target_register,
                from_register,
            } => {
                self.row.set_register_location_to_register(
                    register(target_register)?,
                    register(from_register)?,
                    true,
                );
            }
            Instruction::Expression { register: reg, expr } => {
                self.row
                    .set_register_location_to_at_expression(register(reg)?, expr, true);
            }
            Instruction::ValExpression { register: reg, expr } => {
                self.row
                    .set_register_location_to_is_expression(register(reg)?, expr, true);
            }
            Instruction::Restore(reg) | Instruction::RestoreExtended(reg) => self.restore(reg)?,

            Instruction::RememberState => self.remembered.push(self.row.clone()),
            Instruction::RestoreState => {
                let offset = self.row.offset();
                self.row = self
                    .remembered
                    .pop()
                    .ok_or_else(|| Error("DW_CFA_restore_state without remembered state".into()))?;
                self.row.set_offset(offset);
            }

            Instruction::GnuArgsSize(_) | Instruction::Nop => {}
        }
        Ok(())
    }

    fn run(&mut self, instructions: &'a [u8], addr: u64, eh_frame: &EhFrame<'a>) -> Result<()> {
        let iter = InstrIter::new(
            instructions,
            addr,
            self.cie.pointer_encoding(),
            eh_frame.pointers,
        );
        for instr in iter {
            self.execute(instr?)?;
        }
        Ok(())
    }
}

/// Where `bytes` (a subslice of the section) is loaded.
fn address_of(eh_frame: &EhFrame<'_>, bytes: &[u8]) -> u64 {
    let offset = (bytes.as_ptr() as usize).wrapping_sub(eh_frame.data.as_ptr() as usize);
    eh_frame.address.wrapping_add(offset as u64)
}

/// Builds the plan for `fde`. Row offsets are relative to `fde.pc_begin`.
///
/// Expression rules of the plan point into `eh_frame`.
#[instrument(skip_all, fields(fde = fde.offset, pc_begin = fde.pc_begin))]
pub fn unwind_plan<'a>(
    eh_frame: &EhFrame<'a>,
    cie: &Cie<'a>,
    fde: &Fde<'a>,
) -> Result<UnwindPlan<'a>> {
    let mut plan = UnwindPlan::new(RegisterKind::EhFrame);
    let return_address_register = register(cie.return_address_register)?;
    plan.set_return_address_register(return_address_register);
    plan.set_source_name(SOURCE_NAME);
    plan.set_sourced_from_compiler(LazyBool::True);
    plan.set_valid_at_all_instructions(LazyBool::False);
    plan.set_for_signal_trap(cie.is_signal_frame().into());
    plan.set_plan_valid_address_ranges(alloc::vec![
        fde.pc_begin..fde.pc_begin.saturating_add(fde.pc_range)
    ]);

    let mut interpreter = Interpreter {
        cie,
        pc_begin: fde.pc_begin,
        row: Row::new(),
        initial: None,
        remembered: Vec::new(),
        plan,
    };

    interpreter.run(
        cie.initial_instructions,
        address_of(eh_frame, cie.initial_instructions),
        eh_frame,
    )?;
    interpreter.initial = Some(interpreter.row.clone());
    interpreter.run(fde.instructions, address_of(eh_frame, fde.instructions), eh_frame)?;

    let Interpreter { row, mut plan, .. } = interpreter;
    plan.append_row(row);

    debug!(rows = plan.row_count(), "built unwind plan");
    Ok(plan)
}
