use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uwuplan::{dwarf::EhFrame, RegNum, RegisterKind, RegisterNames};

/// `.eh_frame` of a function at 0x1000 doing `push rbp; mov rbp, rsp; ...; pop rbp; ret`,
/// loaded at 0x2000.
#[rustfmt::skip]
const SAMPLE: [u8; 60] = [
    0x14, 0, 0, 0, 0, 0, 0, 0, 1, 0x7a, 0x52, 0, 1, 0x78, 0x10, 1,
    0x1b, 0xc, 7, 8, 0x90, 1, 0, 0,
    0x1c, 0, 0, 0, 0x1c, 0, 0, 0, 0xe0, 0xef, 0xff, 0xff, 0x21, 0, 0, 0,
    0, 0x41, 0x0e, 0x10, 0x86, 0x02, 0x43, 0x0d, 0x06, 0x5c, 0x0c, 0x07, 0x08, 0xc6, 0, 0,
    0, 0, 0, 0,
];

/// DWARF register numbers from the x86-64 psABI.
struct X86_64;

impl RegisterNames for X86_64 {
    fn register_name(&self, kind: RegisterKind, reg: RegNum) -> Option<&str> {
        if !matches!(kind, RegisterKind::EhFrame | RegisterKind::Dwarf) {
            return None;
        }
        const NAMES: [&str; 17] = [
            "rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15", "rip",
        ];
        NAMES.get(reg as usize).copied()
    }
}

fn parse_addr(s: &str) -> u64 {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.unwrap_or_else(|_| panic!("invalid address: {s}"))
}

/// usage: `test-program [<eh_frame.bin> <section address> <pc>...]`
///
/// get a section dump with `objcopy -O binary --only-section=.eh_frame`.
fn main() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::TRACE.into())
            .from_env()
            .unwrap(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    registry.with(tree_layer).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (data, address, pcs) = match args.as_slice() {
        [path, address, pcs @ ..] => (
            std::fs::read(path).expect("reading section dump"),
            parse_addr(address),
            pcs.iter().map(|pc| parse_addr(pc)).collect(),
        ),
        _ => (SAMPLE.to_vec(), 0x2000, vec![0x1000, 0x1002, 0x1010, 0x1020, 0x1021]),
    };

    let eh_frame = EhFrame::new(&data, address);
    for pc in pcs {
        let plan = match uwuplan::dwarf::unwind_plan_for_address(&eh_frame, pc) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                println!("{pc:#x}: no unwind info");
                continue;
            }
            Err(err) => {
                println!("{pc:#x}: broken unwind info: {err}");
                continue;
            }
        };

        let mut out = String::new();
        plan.dump(&mut out, &X86_64, None).unwrap();
        println!("{pc:#x}:\n{out}");

        let func_start = plan.plan_valid_address_ranges()[0].start;
        let offset = (pc - func_start) as i64;
        if let Some(row) = plan.row_for_function_offset(Some(offset)) {
            let mut out = String::new();
            row.dump(&mut out, Some(&plan), &X86_64, Some(func_start)).unwrap();
            println!("active row: {out}\n");
        }
    }
}
