#![no_main]

use libfuzzer_sys::fuzz_target;

use formula_calc::{CellValue, Engine, ErrorKind, MemoryEnvironment};

const MAX_EVAL_FORMULA_CHARS: usize = 2_048;
const MAX_INPUT_BYTES: usize = MAX_EVAL_FORMULA_CHARS * 4;

const SHEETS: [&str; 3] = ["Sheet1", "Sheet2", "Weird Sheet"];

fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A few sheets of deterministic values, with some non-numeric cells near the origin.
fn environment() -> MemoryEnvironment {
    let mut env = MemoryEnvironment::new();
    for (sheet_id, sheet) in SHEETS.iter().enumerate() {
        env.add_sheet(*sheet);
        for row in 0..32u32 {
            for col in 0..8u32 {
                let mut x = (sheet_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                x ^= u64::from(row).wrapping_mul(0xbf58_476d_1ce4_e5b9);
                x ^= u64::from(col).wrapping_mul(0x94d0_49bb_1331_11eb);
                x ^= x >> 27;
                env.set_value(sheet, row, col, ((x % 10_000) as f64) / 10.0);
            }
        }
        env.set_value(sheet, 0, 0, "hello");
        env.set_value(sheet, 0, 1, true);
        env.set_value(sheet, 0, 2, ErrorKind::Div0);
    }
    env
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let selector = data[0];

    let input = String::from_utf8_lossy(&data[1..]);
    let text = truncate_to_chars(&input, MAX_EVAL_FORMULA_CHARS);

    let mut engine = Engine::new(environment());
    let sheet = SHEETS[usize::from(selector) % SHEETS.len()];
    let _subscription = engine.attach_sheet(sheet);
    let row = u32::from(selector >> 2) % 40;
    let col = u32::from(selector) % 10;

    let formula = engine.parse_formula(text);
    let unresolved = engine.evaluate(sheet, &formula, false);
    let resolved = engine.evaluate(sheet, &formula, true);
    assert!(!matches!(resolved, CellValue::Reference(_)), "{unresolved:?}");

    // Placing the formula and recalculating must terminate, including self-references.
    if engine.set_formula(sheet, row, col, formula).is_ok() {
        let _ = engine.calculate_sheet(sheet);
    }
});
