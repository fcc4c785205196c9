//! this turns `.eh_frame` call frame information into unwind plans
//!
//! # how it works
//! the `.eh_frame` section is parsed as beautiful DWARF call frame information,
//! as god (or rather, the x86-64 psABI) intended. then the CIE's initial
//! instructions and the FDE's instructions are executed, which builds the table
//! row by row (yes, that shit is basically a programming language).
//! See https://dwarfstd.org/doc/DWARF5.pdf for more information if more
//! information is desired.
//!
//! expressions are not evaluated here, the plan just points at their bytes in
//! the section.

mod interpret;
pub mod parse;


pub use interpret::unwind_plan;
pub use parse::{Cie, EhFrame, Error, Fde, Result};

use crate::UnwindPlan;

/// Finds the FDE covering `addr` and builds its plan.
#[instrument(skip(eh_frame))]
pub fn unwind_plan_for_address<'a>(
    eh_frame: &EhFrame<'a>,
    addr: u64,
) -> Result<Option<UnwindPlan<'a>>> {
    let Some((cie, fde)) = eh_frame.find_fde(addr)? else {
        trace!("no FDE covers the address");
        return Ok(None);
    };
    unwind_plan(eh_frame, &cie, &fde).map(Some)
}
