use crate::plan::{FrameAddressValue, RegisterRule, Row};
use crate::INVALID_REGNUM;

const RSP: u32 = 7;
const RBP: u32 = 6;
const RIP: u32 = 16;

#[test]
fn absent_register_is_none() {
    let mut row = Row::new();
    assert_eq!(row.register_info(RBP), None);

    row.set_register_info(RBP, RegisterRule::Unspecified);
    assert_eq!(row.register_info(RBP), Some(RegisterRule::Unspecified));

    row.remove_register_info(RBP);
    assert_eq!(row.register_info(RBP), None);
    // removing twice is fine
    row.remove_register_info(RBP);
}

#[test]
fn set_register_info_replaces() {
    let mut row = Row::new();
    row.set_register_info(RBP, RegisterRule::Same);
    row.set_register_info(RBP, RegisterRule::AtCfaPlusOffset(-16));
    assert_eq!(row.register_info(RBP), Some(RegisterRule::AtCfaPlusOffset(-16)));
    assert_eq!(row.registers().count(), 1);
}

#[test]
fn every_rule_kind_reads_back() {
    static EXPR: [u8; 3] = [0x77, 0x08, 0x06];

    let rules = [
        RegisterRule::Unspecified,
        RegisterRule::Undefined,
        RegisterRule::Same,
        RegisterRule::AtCfaPlusOffset(0),
        RegisterRule::AtCfaPlusOffset(i32::MIN),
        RegisterRule::IsCfaPlusOffset(i32::MAX),
        RegisterRule::AtAfaPlusOffset(i32::MIN),
        RegisterRule::IsAfaPlusOffset(i32::MAX),
        RegisterRule::InOtherRegister(3),
        RegisterRule::AtExpression(&EXPR),
        RegisterRule::IsExpression(&EXPR[..1]),
        RegisterRule::IsConstant(0),
        RegisterRule::IsConstant(u64::MAX),
    ];

    let mut row = Row::new();
    // insert in reverse so the map has to keep itself sorted
    for (reg, rule) in rules.iter().enumerate().rev() {
        row.set_register_info(reg as u32, *rule);
    }

    for (reg, rule) in rules.iter().enumerate() {
        assert_eq!(row.register_info(reg as u32).as_ref(), Some(rule), "reg {reg}");
    }

    let regs: Vec<u32> = row.registers().map(|(reg, _)| reg).collect();
    assert_eq!(regs, (0..rules.len() as u32).collect::<Vec<_>>());
}

#[test]
fn rule_setters_replace_tag_and_payload() {
    static EXPR: [u8; 2] = [0x76, 0x10];

    let mut rule = RegisterRule::default();
    assert!(rule.is_unspecified());

    rule.set_undefined();
    assert!(rule.is_undefined());
    rule.set_same();
    assert!(rule.is_same());

    rule.set_at_cfa_plus_offset(-16);
    assert!(rule.is_at_cfa_plus_offset());
    assert_eq!(rule.offset(), -16);
    rule.set_is_cfa_plus_offset(i32::MAX);
    assert_eq!(rule, RegisterRule::IsCfaPlusOffset(i32::MAX));
    assert!(!rule.is_at_cfa_plus_offset());
    rule.set_at_afa_plus_offset(8);
    assert_eq!(rule, RegisterRule::AtAfaPlusOffset(8));
    rule.set_is_afa_plus_offset(i32::MIN);
    assert!(rule.is_afa_plus_offset());
    assert_eq!(rule.offset(), i32::MIN);

    rule.set_in_register(9);
    assert!(rule.is_in_other_register());
    assert_eq!(rule.register_number(), 9);
    assert_eq!(rule.offset(), 0);

    rule.set_at_expression(&EXPR);
    assert!(rule.is_at_expression());
    assert_eq!(rule.expression_bytes(), Some(&EXPR[..]));
    assert_eq!(rule.register_number(), INVALID_REGNUM);
    rule.set_is_expression(&EXPR[1..]);
    assert!(rule.is_expression());
    assert_eq!(rule.expression_len(), 1);

    rule.set_is_constant(0xdead_beef);
    assert!(rule.is_constant());
    assert_eq!(rule.constant(), 0xdead_beef);
    assert_eq!(rule.expression_bytes(), None);

    rule.set_unspecified();
    assert_eq!(rule, RegisterRule::Unspecified);
}

#[test]
fn rule_accessors_are_permissive() {
    static EXPR: [u8; 2] = [0x70, 0x00];

    let rule = RegisterRule::IsCfaPlusOffset(-8);
    assert_eq!(rule.offset(), -8);
    assert_eq!(rule.register_number(), INVALID_REGNUM);
    assert_eq!(rule.expression_bytes(), None);
    assert_eq!(rule.expression_len(), 0);
    assert_eq!(rule.constant(), 0);

    let rule = RegisterRule::InOtherRegister(12);
    assert_eq!(rule.offset(), 0);
    assert_eq!(rule.register_number(), 12);

    let rule = RegisterRule::AtExpression(&EXPR);
    assert_eq!(rule.expression_bytes(), Some(&EXPR[..]));
    assert_eq!(rule.expression_len(), 2);
    assert_eq!(rule.offset(), 0);

    let mut rule = RegisterRule::IsConstant(42);
    assert_eq!(rule.constant(), 42);
    rule.set_at_afa_plus_offset(32);
    assert!(rule.is_at_afa_plus_offset());
    assert_eq!(rule.constant(), 0);
    assert_eq!(rule.offset(), 32);
}

#[test]
fn rule_equality_ignores_inactive_payload() {
    assert_eq!(RegisterRule::AtCfaPlusOffset(8), RegisterRule::AtCfaPlusOffset(8));
    assert_ne!(RegisterRule::AtCfaPlusOffset(8), RegisterRule::IsCfaPlusOffset(8));
    assert_ne!(RegisterRule::AtCfaPlusOffset(8), RegisterRule::AtCfaPlusOffset(16));

    // expressions compare by content, not by where they live
    let a = [1u8, 2, 3];
    let b = [1u8, 2, 3];
    assert_eq!(RegisterRule::IsExpression(&a), RegisterRule::IsExpression(&b));
    assert_ne!(RegisterRule::IsExpression(&a), RegisterRule::AtExpression(&b));
}

#[test]
fn guarded_setters_do_not_clobber() {
    let mut row = Row::new();

    assert!(row.set_register_location_to_same(RBP, false));
    assert_eq!(row.register_info(RBP), Some(RegisterRule::Same));

    assert!(!row.set_register_location_to_at_cfa_plus_offset(RBP, -16, false));
    assert!(!row.set_register_location_to_is_cfa_plus_offset(RBP, -16, false));
    assert!(!row.set_register_location_to_register(RBP, 3, false));
    assert!(!row.set_register_location_to_is_constant(RBP, 1, false));
    assert!(!row.set_register_location_to_at_expression(RBP, &[0x50], false));
    assert!(!row.set_register_location_to_is_expression(RBP, &[0x50], false));
    assert!(!row.set_register_location_to_unspecified(RBP, false));
    assert!(!row.set_register_location_to_undefined(RBP, false, false));
    assert_eq!(row.register_info(RBP), Some(RegisterRule::Same));

    assert!(row.set_register_location_to_at_cfa_plus_offset(RBP, -16, true));
    assert_eq!(row.register_info(RBP), Some(RegisterRule::AtCfaPlusOffset(-16)));
}

#[test]
fn guarded_setters_set_absent_registers() {
    let mut row = Row::new();
    assert!(row.set_register_location_to_at_cfa_plus_offset(0, -8, false));
    assert!(row.set_register_location_to_is_cfa_plus_offset(1, 0, false));
    assert!(row.set_register_location_to_register(2, 5, false));
    assert!(row.set_register_location_to_is_constant(3, 7, false));
    assert!(row.set_register_location_to_unspecified(4, false));
    assert!(row.set_register_location_to_undefined(5, false, false));

    assert_eq!(row.register_info(0), Some(RegisterRule::AtCfaPlusOffset(-8)));
    assert_eq!(row.register_info(1), Some(RegisterRule::IsCfaPlusOffset(0)));
    assert_eq!(row.register_info(2), Some(RegisterRule::InOtherRegister(5)));
    assert_eq!(row.register_info(3), Some(RegisterRule::IsConstant(7)));
    assert_eq!(row.register_info(4), Some(RegisterRule::Unspecified));
    assert_eq!(row.register_info(5), Some(RegisterRule::Undefined));
}

#[test]
fn undefined_only_replaces_unspecified() {
    let mut row = Row::new();
    row.set_register_info(1, RegisterRule::Unspecified);
    row.set_register_info(2, RegisterRule::AtCfaPlusOffset(-24));

    assert!(row.set_register_location_to_undefined(1, true, true));
    assert_eq!(row.register_info(1), Some(RegisterRule::Undefined));

    assert!(!row.set_register_location_to_undefined(2, true, true));
    assert_eq!(row.register_info(2), Some(RegisterRule::AtCfaPlusOffset(-24)));

    assert!(row.set_register_location_to_undefined(2, true, false));
    assert_eq!(row.register_info(2), Some(RegisterRule::Undefined));
}

#[test]
fn same_with_must_replace_needs_existing_rule() {
    let mut row = Row::new();
    assert!(!row.set_register_location_to_same(RIP, true));
    assert_eq!(row.register_info(RIP), None);

    row.set_register_info(RIP, RegisterRule::AtCfaPlusOffset(-8));
    assert!(row.set_register_location_to_same(RIP, true));
    assert_eq!(row.register_info(RIP), Some(RegisterRule::Same));
}

#[test]
fn fa_offset_mutation_only_for_register_plus_offset() {
    let mut fa = FrameAddressValue::RegisterPlusOffset { reg: RSP, offset: 8 };
    fa.inc_offset(8);
    assert_eq!(fa.offset(), 16);
    fa.set_offset(-4);
    assert_eq!(fa, FrameAddressValue::RegisterPlusOffset { reg: RSP, offset: -4 });

    let mut fa = FrameAddressValue::ReturnAddressSearch(24);
    fa.inc_offset(8);
    fa.set_offset(0);
    assert_eq!(fa, FrameAddressValue::ReturnAddressSearch(24));
    assert_eq!(fa.offset(), 24);

    for mut fa in [
        FrameAddressValue::Unspecified,
        FrameAddressValue::RegisterDereferenced(RBP),
        FrameAddressValue::Expression(&[0x77, 0x00]),
        FrameAddressValue::Constant(0x1000),
    ] {
        let before = fa;
        fa.inc_offset(8);
        fa.set_offset(100);
        assert_eq!(fa, before);
        assert_eq!(fa.offset(), 0);
    }
}

#[test]
fn fa_accessors() {
    let fa = FrameAddressValue::RegisterDereferenced(RBP);
    assert_eq!(fa.register_number(), RBP);
    assert_eq!(FrameAddressValue::Constant(5).register_number(), INVALID_REGNUM);
    assert_eq!(FrameAddressValue::Constant(5).constant(), 5);
    assert_eq!(FrameAddressValue::Unspecified.expression_bytes(), None);
    assert_eq!(FrameAddressValue::Expression(&[1, 2]).expression_len(), 2);
    assert_eq!(FrameAddressValue::ReturnAddressSearch(8).register_number(), INVALID_REGNUM);
}

#[test]
fn row_equality() {
    let mut a = Row::new();
    a.set_offset(4);
    a.cfa_value_mut().set_register_plus_offset(RBP, 16);
    a.set_register_location_to_at_cfa_plus_offset(RBP, -16, true);

    let mut b = a.clone();
    assert_eq!(a, b);

    b.set_unspecified_registers_are_undefined(true);
    assert_ne!(a, b);
    b.set_unspecified_registers_are_undefined(false);

    b.afa_value_mut().set_register_plus_offset(RSP, 0);
    assert_ne!(a, b);
    b.afa_value_mut().set_unspecified();
    assert_eq!(a, b);

    b.slide_offset(1);
    assert_ne!(a, b);
    b.slide_offset(-1);

    b.set_register_info(RIP, RegisterRule::Same);
    assert_ne!(a, b);
}

#[test]
fn clear_resets_row() {
    let mut row = Row::new();
    row.set_offset(10);
    row.cfa_value_mut().set_constant(1);
    row.afa_value_mut().set_ra_search(8);
    row.set_register_info(RBP, RegisterRule::Undefined);
    row.set_unspecified_registers_are_undefined(true);

    row.clear();
    assert_eq!(row, Row::new());
}
