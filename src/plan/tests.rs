use alloc::{string::String, vec};

use super::{LazyBool, NumericRegisterNames, RegisterKind, RegisterNames, Row, UnwindPlan};
use crate::{RegNum, RegisterRule, INVALID_REGNUM};

const SP: RegNum = 31;
const FP: RegNum = 29;
const LR: RegNum = 30;

fn row_at(offset: i64) -> Row<'static> {
    let mut row = Row::new();
    row.set_offset(offset);
    row
}

/// Rows at {0, 4, 10}, an aarch64-ish prologue.
fn example_plan() -> UnwindPlan<'static> {
    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);

    let mut row = row_at(0);
    row.cfa_value_mut().set_register_plus_offset(SP, 0);
    plan.append_row(row.clone());

    row.set_offset(4);
    row.cfa_value_mut().set_register_plus_offset(FP, 16);
    row.set_register_location_to_at_cfa_plus_offset(FP, -16, true);
    plan.append_row(row.clone());

    row.set_offset(10);
    row.set_register_location_to_same(LR, false);
    plan.append_row(row);

    plan
}

#[test]
fn row_lookup_by_offset() {
    let plan = example_plan();

    assert_eq!(plan.row_for_function_offset(Some(7)).map(Row::offset), Some(4));
    assert_eq!(plan.row_for_function_offset(Some(0)).map(Row::offset), Some(0));
    assert_eq!(plan.row_for_function_offset(Some(3)).map(Row::offset), Some(0));
    assert_eq!(plan.row_for_function_offset(Some(4)).map(Row::offset), Some(4));
    assert_eq!(plan.row_for_function_offset(Some(10)).map(Row::offset), Some(10));
    assert_eq!(plan.row_for_function_offset(Some(1000)).map(Row::offset), Some(10));

    let row = plan.row_for_function_offset(Some(7)).unwrap();
    assert_eq!(row.cfa_value().register_number(), FP);
    assert_eq!(row.cfa_value().offset(), 16);
    assert_eq!(row.register_info(FP), Some(RegisterRule::AtCfaPlusOffset(-16)));
    assert_eq!(row.register_info(LR), None);
}

#[test]
fn no_row_before_first_offset() {
    let plan = example_plan();
    assert!(plan.row_for_function_offset(Some(-1)).is_none());
    assert!(plan.row_for_function_offset(Some(i64::MIN)).is_none());
}

#[test]
fn unknown_offset_uses_last_row() {
    let plan = example_plan();
    assert_eq!(plan.row_for_function_offset(None), plan.last_row());
    assert_eq!(plan.last_row().map(Row::offset), Some(10));

    let empty = UnwindPlan::new(RegisterKind::Dwarf);
    assert!(empty.row_for_function_offset(None).is_none());
    assert!(empty.row_for_function_offset(Some(0)).is_none());
    assert!(empty.last_row().is_none());
}

#[test]
fn lookup_matches_linear_scan() {
    let offsets = [0, 1, 1, 5, 9, 9, 9, 20, 64];
    let mut plan = UnwindPlan::new(RegisterKind::Generic);
    for (i, &offset) in offsets.iter().enumerate() {
        let mut row = row_at(offset);
        row.cfa_value_mut().set_register_plus_offset(SP, i as i32);
        plan.append_row(row);
    }
    // duplicate offsets collapse into the last appended row
    assert_eq!(plan.row_count(), 6);

    for o in -3..70 {
        let expected = plan.rows().iter().filter(|r| r.offset() <= o).last();
        assert_eq!(plan.row_for_function_offset(Some(o)), expected, "offset {o}");
    }
    assert_eq!(plan.row_for_function_offset(Some(9)).unwrap().cfa_value().offset(), 6);
}

#[test]
fn insert_row_keeps_order() {
    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);
    for offset in [12, 3, 40, 0, 7, 25, 3] {
        plan.insert_row(row_at(offset), false);
    }
    let offsets: Vec<i64> = plan.rows().iter().map(Row::offset).collect();
    assert_eq!(offsets, vec![0, 3, 7, 12, 25, 40]);
}

#[test]
fn insert_row_replace_policy() {
    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);

    let mut first = row_at(8);
    first.cfa_value_mut().set_register_plus_offset(SP, 16);
    plan.insert_row(first.clone(), false);

    let mut second = row_at(8);
    second.cfa_value_mut().set_register_plus_offset(FP, 32);

    plan.insert_row(second.clone(), false);
    assert_eq!(plan.row_count(), 1);
    assert_eq!(plan.row_at_index(0), Some(&first));

    plan.insert_row(second.clone(), true);
    assert_eq!(plan.row_count(), 1);
    assert_eq!(plan.row_at_index(0), Some(&second));
}

#[test]
fn row_index_access() {
    let plan = example_plan();
    assert_eq!(plan.row_count(), 3);
    assert!(plan.is_valid_row_index(0));
    assert!(plan.is_valid_row_index(2));
    assert!(!plan.is_valid_row_index(3));
    assert_eq!(plan.row_at_index(1).map(Row::offset), Some(4));
    assert!(plan.row_at_index(3).is_none());
    assert!(plan.row_at_index(usize::MAX).is_none());
}

#[test]
fn valid_address_ranges() {
    let mut plan = example_plan();
    for addr in [0, 1, 0x1000, u64::MAX] {
        assert!(plan.plan_valid_at_address(addr));
    }

    plan.set_plan_valid_address_ranges(vec![0x1000..0x1040]);
    assert!(!plan.plan_valid_at_address(0xfff));
    assert!(plan.plan_valid_at_address(0x1000));
    assert!(plan.plan_valid_at_address(0x103f));
    assert!(!plan.plan_valid_at_address(0x1040));

    plan.set_plan_valid_address_ranges(vec![0x1000..0x1040, 0x2000..0x2010]);
    assert!(plan.plan_valid_at_address(0x2008));
    assert!(!plan.plan_valid_at_address(0x1800));
}

#[test]
fn append_out_of_order_keeps_both_rows() {
    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);
    plan.append_row(row_at(8));
    plan.append_row(row_at(4));

    assert_eq!(plan.row_count(), 2);
    let offsets: Vec<i64> = plan.rows().iter().map(Row::offset).collect();
    assert_eq!(offsets, [8, 4]);

    assert!(plan.row_for_function_offset(Some(8)).is_some());
    assert!(plan.row_for_function_offset(Some(100)).is_some());
    assert_eq!(plan.row_for_function_offset(None).map(Row::offset), Some(4));
}

#[test]
fn initial_cfa_register() {
    assert_eq!(example_plan().initial_cfa_register(), SP);
    assert_eq!(UnwindPlan::new(RegisterKind::Dwarf).initial_cfa_register(), INVALID_REGNUM);

    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);
    let mut row = row_at(0);
    row.cfa_value_mut().set_ra_search(8);
    plan.append_row(row);
    assert_eq!(plan.initial_cfa_register(), INVALID_REGNUM);

    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);
    let mut row = row_at(0);
    row.cfa_value_mut().set_register_dereferenced(FP);
    plan.append_row(row);
    assert_eq!(plan.initial_cfa_register(), FP);
}

#[test]
fn well_formed_needs_initial_cfa() {
    assert!(example_plan().is_well_formed());
    assert!(!UnwindPlan::new(RegisterKind::Dwarf).is_well_formed());

    let mut plan = UnwindPlan::new(RegisterKind::Dwarf);
    plan.append_row(row_at(0));
    assert!(!plan.is_well_formed());
}

#[test]
fn provenance_flags_start_uncalculated() {
    let mut plan = UnwindPlan::new(RegisterKind::EhFrame);
    assert_eq!(plan.sourced_from_compiler(), LazyBool::Calculate);
    assert_eq!(plan.valid_at_all_instructions(), LazyBool::Calculate);
    assert_eq!(plan.for_signal_trap(), LazyBool::Calculate);
    assert_eq!(plan.for_signal_trap().resolved(), None);

    plan.set_sourced_from_compiler(true.into());
    plan.set_valid_at_all_instructions(LazyBool::False);
    plan.set_for_signal_trap(LazyBool::True);
    assert_eq!(plan.sourced_from_compiler().resolved(), Some(true));
    assert_eq!(plan.valid_at_all_instructions().resolved(), Some(false));
    assert_eq!(plan.for_signal_trap(), LazyBool::True);
}

#[test]
fn clear_resets_to_empty_plan() {
    let mut plan = example_plan();
    plan.set_register_kind(RegisterKind::EhFrame);
    plan.set_return_address_register(LR);
    plan.set_source_name("assembly insn profiling");
    plan.set_plan_valid_address_ranges(vec![0..16]);
    plan.set_sourced_from_compiler(LazyBool::False);
    plan.set_valid_at_all_instructions(LazyBool::True);
    plan.set_for_signal_trap(LazyBool::False);

    plan.clear();

    let mut fresh = UnwindPlan::new(RegisterKind::Dwarf);
    fresh.set_return_address_register(LR);
    assert_eq!(plan, fresh);
    assert_eq!(plan.register_kind(), RegisterKind::Dwarf);
    assert_eq!(plan.source_name(), None);
    assert!(plan.plan_valid_address_ranges().is_empty());
}

#[test]
fn clone_is_deep_for_rows() {
    let plan = example_plan();
    let mut copy = plan.clone();
    copy.insert_row(row_at(2), false);
    assert_eq!(plan.row_count(), 3);
    assert_eq!(copy.row_count(), 4);
}

#[test]
fn slide_rows_for_splicing() {
    let plan = example_plan();
    let mut spliced = UnwindPlan::new(plan.register_kind());
    for row in plan.rows() {
        let mut row = row.clone();
        row.slide_offset(3);
        row.cfa_value_mut().inc_offset(8);
        spliced.append_row(row);
    }
    let row = spliced.row_for_function_offset(Some(7)).unwrap();
    assert_eq!(row.offset(), 7);
    assert_eq!(row.cfa_value().offset(), 24);
    assert!(spliced.row_for_function_offset(Some(2)).is_none());
}

struct Aarch64Names;

impl RegisterNames for Aarch64Names {
    fn register_name(&self, _kind: RegisterKind, reg: RegNum) -> Option<&str> {
        match reg {
            SP => Some("sp"),
            FP => Some("fp"),
            LR => Some("lr"),
            _ => None,
        }
    }
}

#[test]
fn dump_plan() {
    let mut plan = example_plan();
    plan.set_source_name("test");
    plan.set_sourced_from_compiler(LazyBool::True);
    plan.set_plan_valid_address_ranges(vec![0x1000..0x1020]);

    let mut out = String::new();
    plan.dump(&mut out, &Aarch64Names, None).unwrap();

    assert_eq!(
        out,
        "This UnwindPlan originally sourced from test\n\
         This UnwindPlan is sourced from the compiler: yes.\n\
         This UnwindPlan is valid at all instruction locations: not specified.\n\
         This UnwindPlan is for a trap handler function: not specified.\n\
         Address range of this UnwindPlan: [0x1000-0x1020)\n\
         UnwindPlan register kind: DWARF\n\
         row[0]:    0: CFA=sp +0 => \n\
         row[1]:    4: CFA=fp+16 => fp=[CFA-16] \n\
         row[2]:   10: CFA=fp+16 => fp=[CFA-16] lr= <same> \n"
    );
}

#[test]
fn dump_row_with_base_address() {
    let mut row = row_at(4);
    row.cfa_value_mut().set_register_dereferenced(5);
    row.afa_value_mut().set_register_plus_offset(7, -32);
    row.set_register_info(3, RegisterRule::InOtherRegister(9));
    row.set_register_info(4, RegisterRule::IsConstant(0xff));
    row.set_register_info(8, RegisterRule::Unspecified);

    let mut out = String::new();
    row.dump(&mut out, None, &NumericRegisterNames, Some(0x4000)).unwrap();
    assert_eq!(
        out,
        "0x0000000000004004: CFA=[reg(5)] AFA=reg(7)-32 => reg(3)=reg(9) reg(4)=0xff reg(8)=! "
    );
}
