#![no_main]

use libfuzzer_sys::fuzz_target;

use formula_calc::{CellFormula, FunctionRegistry};

const MAX_FUZZ_FORMULA_CHARS: usize = 4_096;
const MAX_INPUT_BYTES: usize = MAX_FUZZ_FORMULA_CHARS * 4; // max UTF-8 bytes per char

fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];
    let input = String::from_utf8_lossy(data);
    let text = truncate_to_chars(&input, MAX_FUZZ_FORMULA_CHARS);

    let functions = FunctionRegistry::with_builtins();
    let formula = CellFormula::parse(text, &functions);

    // A rendered formula must parse back without new diagnostics and render identically.
    if formula.has_errors() {
        return;
    }
    let rendered = formula.to_formula_string();
    let reparsed = CellFormula::parse(&rendered, &functions);
    assert!(
        !reparsed.has_errors(),
        "{text:?} rendered as {rendered:?}: {:?}",
        reparsed.errors()
    );
    assert_eq!(reparsed.to_formula_string(), rendered);
});
