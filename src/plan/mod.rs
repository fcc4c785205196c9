//! The unwind plan: how to unwind out of a function.
//!
//! A plan says, for every location in a function, where the caller's register
//! values were saved and how to compute this frame's Canonical Frame Address
//! (CFA) or Aligned Frame Address (AFA).
//!
//! The CFA is DWARF's Canonical Frame Address, the starting address of the
//! function's stack frame. It doesn't change during the lifetime of the
//! function, and most saved registers live at some offset from it.
//!
//! The AFA is only used for frames that realign the stack (e.g. when a local
//! needs a higher alignment than the stack has right after the call). Registers
//! saved after the realignment cannot be found through the CFA, they are found
//! relative to the AFA instead, which is usually the stack pointer right after
//! realigning.
//!
//! Internally a plan is a table, just like the expanded form of DWARF CFI:
//! ```text
//! OFFSET CFA    AFA R0 R1 ... RN
//! 0      rsp+8  -   ...
//! 1      rsp+16 -   ...
//! ...
//! ```
//! Every unwind source (eh_frame FDEs, debug_frame FDEs, prologue analysis) is
//! converted into this form, and the stack walker only ever reads plans.
//!
//! Plans are built once by a decoder and never mutated after being handed out,
//! so sharing them between threads that walk stacks needs no locking.

mod dump;
mod fa;
mod row;
mod rule;

#[cfg(test)]
mod tests;

use alloc::{string::String, vec::Vec};
use core::{fmt, ops::Range};

pub use dump::{NumericRegisterNames, RegisterNames};
pub use fa::FrameAddressValue;
pub use row::Row;
pub use rule::RegisterRule;

use crate::{RegNum, INVALID_REGNUM};

/// The numbering scheme register numbers of a plan are expressed in. They
/// need to be translated to native numbers at unwind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegisterKind {
    EhFrame,
    #[default]
    Dwarf,
    Generic,
    ProcessPlugin,
    Native,
}

/// A boolean that may not have been computed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LazyBool {
    True,
    False,
    #[default]
    Calculate,
}

impl LazyBool {
    /// `None` while the value is still to be calculated.
    pub fn resolved(self) -> Option<bool> {
        match self {
            LazyBool::True => Some(true),
            LazyBool::False => Some(false),
            LazyBool::Calculate => None,
        }
    }
}

impl From<bool> for LazyBool {
    fn from(b: bool) -> Self {
        if b {
            LazyBool::True
        } else {
            LazyBool::False
        }
    }
}

/// The rows for one function from one unwind source, sorted by offset.
///
/// Cloning copies the rows but not the expression bytes they point into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindPlan<'a> {
    rows: Vec<Row<'a>>,
    valid_ranges: Vec<Range<u64>>,
    register_kind: RegisterKind,
    /// The register holding the return address for the caller, e.g. lr on arm.
    return_addr_register: RegNum,
    /// Where this plan came from, for logging.
    source_name: Option<String>,
    sourced_from_compiler: LazyBool,
    valid_at_all_instruction_locations: LazyBool,
    for_signal_trap: LazyBool,
}

impl<'a> UnwindPlan<'a> {
    pub fn new(register_kind: RegisterKind) -> Self {
        Self {
            rows: Vec::new(),
            valid_ranges: Vec::new(),
            register_kind,
            return_addr_register: INVALID_REGNUM,
            source_name: None,
            sourced_from_compiler: LazyBool::Calculate,
            valid_at_all_instruction_locations: LazyBool::Calculate,
            for_signal_trap: LazyBool::Calculate,
        }
    }

    /// Adds a row at the end. Rows have to be appended in offset order. A row
    /// with the same offset as the last row replaces it.
    pub fn append_row(&mut self, row: Row<'a>) {
        if let Some(last) = self.rows.last_mut() {
            if last.offset() == row.offset() {
                trace!(offset = row.offset(), "replacing last row");
                *last = row;
                return;
            }
            if last.offset() > row.offset() {
                warn!(
                    last = last.offset(),
                    new = row.offset(),
                    "row appended out of order"
                );
            }
        }
        trace!(offset = row.offset(), "appending row");
        self.rows.push(row);
    }

    /// Inserts a row in offset order. If there already is a row at that
    /// offset, it is only replaced with `replace_existing`, otherwise the new
    /// row is dropped.
    pub fn insert_row(&mut self, row: Row<'a>, replace_existing: bool) {
        let idx = self.rows.partition_point(|r| r.offset() < row.offset());
        let exists = self
            .rows
            .get(idx)
            .is_some_and(|existing| existing.offset() == row.offset());
        if !exists {
            trace!(offset = row.offset(), idx, "inserting row");
            self.rows.insert(idx, row);
        } else if replace_existing {
            trace!(offset = row.offset(), "replacing row");
            self.rows[idx] = row;
        } else {
            trace!(offset = row.offset(), "keeping existing row");
        }
    }

    /// The row with the greatest offset that is `<= offset`.
    ///
    /// An offset of `None` means the function start is unknown, in which case
    /// the last row is used since we're most likely past the prologue. Returns
    /// `None` when the plan is empty or `offset` lies before the first row.
    pub fn row_for_function_offset(&self, offset: Option<i64>) -> Option<&Row<'a>> {
        let end = match offset {
            Some(offset) => self.rows.partition_point(|row| row.offset() <= offset),
            None => self.rows.len(),
        };
        end.checked_sub(1).map(|idx| &self.rows[idx])
    }

    pub fn is_valid_row_index(&self, idx: usize) -> bool {
        idx < self.rows.len()
    }

    pub fn row_at_index(&self, idx: usize) -> Option<&Row<'a>> {
        self.rows.get(idx)
    }

    pub fn last_row(&self) -> Option<&Row<'a>> {
        self.rows.last()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row<'a>] {
        &self.rows
    }

    pub fn register_kind(&self) -> RegisterKind {
        self.register_kind
    }

    pub fn set_register_kind(&mut self, kind: RegisterKind) {
        self.register_kind = kind;
    }

    pub fn return_address_register(&self) -> RegNum {
        self.return_addr_register
    }

    pub fn set_return_address_register(&mut self, reg: RegNum) {
        self.return_addr_register = reg;
    }

    /// The register the first row computes the CFA from, or
    /// [`INVALID_REGNUM`] if there are no rows or that CFA isn't register
    /// based.
    pub fn initial_cfa_register(&self) -> RegNum {
        self.rows
            .first()
            .map_or(INVALID_REGNUM, |row| row.cfa_value().register_number())
    }

    /// Restricts the addresses this plan can be used at. For instance a fast
    /// plan is not valid in the prologue, only in the body of the function.
    pub fn set_plan_valid_address_ranges(&mut self, ranges: Vec<Range<u64>>) {
        self.valid_ranges = ranges;
    }

    pub fn plan_valid_address_ranges(&self) -> &[Range<u64>] {
        &self.valid_ranges
    }

    pub fn plan_valid_at_address(&self, addr: u64) -> bool {
        self.valid_ranges.is_empty() || self.valid_ranges.iter().any(|r| r.contains(&addr))
    }

    /// A plan without rows, or whose first row doesn't say how to find the
    /// CFA, can't be used to unwind.
    pub fn is_well_formed(&self) -> bool {
        let Some(row0) = self.rows.first() else {
            debug!(source = ?self.source_name, "unwind plan is invalid, it has no rows");
            return false;
        };
        if row0.cfa_value().is_unspecified() {
            debug!(
                source = ?self.source_name,
                "unwind plan is invalid, the first row has no CFA"
            );
            return false;
        }
        true
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn set_source_name(&mut self, name: &str) {
        self.source_name = Some(name.into());
    }

    /// Was this plan emitted by a compiler?
    pub fn sourced_from_compiler(&self) -> LazyBool {
        self.sourced_from_compiler
    }

    pub fn set_sourced_from_compiler(&mut self, from_compiler: LazyBool) {
        self.sourced_from_compiler = from_compiler;
    }

    /// Is this plan valid at all instructions? If not, it is assumed to be
    /// valid at call sites, e.g. for exception handling.
    pub fn valid_at_all_instructions(&self) -> LazyBool {
        self.valid_at_all_instruction_locations
    }

    pub fn set_valid_at_all_instructions(&mut self, valid: LazyBool) {
        self.valid_at_all_instruction_locations = valid;
    }

    /// Is this plan for a signal trap frame? Then the saved pc may have been
    /// set by the signal dispatch code and doesn't have to follow a call.
    pub fn for_signal_trap(&self) -> LazyBool {
        self.for_signal_trap
    }

    pub fn set_for_signal_trap(&mut self, is_for_signal_trap: LazyBool) {
        self.for_signal_trap = is_for_signal_trap;
    }

    /// Resets the plan to an empty [`RegisterKind::Dwarf`] plan. The return
    /// address register is kept.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.valid_ranges.clear();
        self.register_kind = RegisterKind::Dwarf;
        self.source_name = None;
        self.sourced_from_compiler = LazyBool::Calculate;
        self.valid_at_all_instruction_locations = LazyBool::Calculate;
        self.for_signal_trap = LazyBool::Calculate;
    }

    pub fn dump(
        &self,
        out: &mut dyn fmt::Write,
        names: &dyn RegisterNames,
        base_addr: Option<u64>,
    ) -> fmt::Result {
        if let Some(name) = &self.source_name {
            writeln!(out, "This UnwindPlan originally sourced from {name}")?;
        }
        writeln!(
            out,
            "This UnwindPlan is sourced from the compiler: {}",
            dump::lazy_bool(self.sourced_from_compiler)
        )?;
        writeln!(
            out,
            "This UnwindPlan is valid at all instruction locations: {}",
            dump::lazy_bool(self.valid_at_all_instruction_locations)
        )?;
        writeln!(
            out,
            "This UnwindPlan is for a trap handler function: {}",
            dump::lazy_bool(self.for_signal_trap)
        )?;
        for range in &self.valid_ranges {
            writeln!(
                out,
                "Address range of this UnwindPlan: [0x{:x}-0x{:x})",
                range.start, range.end
            )?;
        }
        writeln!(
            out,
            "UnwindPlan register kind: {}",
            dump::register_kind(self.register_kind)
        )?;
        for (idx, row) in self.rows.iter().enumerate() {
            write!(out, "row[{idx}]: ")?;
            row.dump(out, Some(self), names, base_addr)?;
            out.write_char('\n')?;
        }
        Ok(())
    }
}

impl Default for UnwindPlan<'_> {
    fn default() -> Self {
        Self::new(RegisterKind::Dwarf)
    }
}
