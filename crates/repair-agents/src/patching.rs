//! Rule-based application of textual fixes to source code.
//!
//! Each rule fires when the code still has the known defect and the fix
//! text names the matching remedy. Unrecognized fixes leave the code as is.

use std::sync::LazyLock;

use regex::Regex;
use repair_coordination::PatchApplier;

static OFF_BY_ONE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"range\(len\((\w+)\)\+1\)").expect("OFF_BY_ONE_RANGE regex should compile")
});

static PROCESS_DATA_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)def process_data\(data\):\s*\n\s*result = data\.get\('value'\)\s*\n\s*return result \* 2.*")
        .expect("PROCESS_DATA_FN regex should compile")
});

static DIVIDE_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"def divide\(a, b\):\s*\n\s*return a / b").expect("DIVIDE_FN regex should compile")
});

static ADD_NUMBERS_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"def add_numbers\(a, b\):\s*\n\s*return a \+ b")
        .expect("ADD_NUMBERS_FN regex should compile")
});

const GUARDED_PROCESS_DATA: &str = "def process_data(data):
    if data is None:
        return None
    result = data.get('value')
    return result * 2 if result is not None else None";

const GUARDED_DIVIDE: &str = "def divide(a, b):
    if b == 0:
        return None
    return a / b";

const COERCING_ADD_NUMBERS: &str = "def add_numbers(a, b):
    def _to_num(x):
        if isinstance(x, str):
            try:
                return int(x)
            except ValueError:
                try:
                    return float(x)
                except ValueError:
                    raise TypeError('unconvertible type')
        return x
    a2, b2 = _to_num(a), _to_num(b)
    return a2 + b2";

fn mentions_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Apply every rule whose defect and remedy both match.
pub fn apply_patch(code: &str, fix: &str) -> String {
    let mut patched = code.to_string();

    if patched.contains("range(len(arr)+1)") && mentions_any(fix, &["range(len(arr))", "Replace"]) {
        patched = OFF_BY_ONE_RANGE
            .replace_all(&patched, "range(len($1))")
            .into_owned();
    }

    if patched.contains("process_data") && mentions_any(fix, &["data is None", ".get"]) {
        patched = PROCESS_DATA_FN
            .replace(&patched, GUARDED_PROCESS_DATA)
            .into_owned();
    }

    if patched.contains("return a / b") && mentions_any(fix, &["b == 0", "exception"]) {
        patched = DIVIDE_FN.replace(&patched, GUARDED_DIVIDE).into_owned();
    }

    if patched.contains("def add_numbers(a, b):") && mentions_any(fix, &["int", "try", "types"]) {
        patched = ADD_NUMBERS_FN
            .replace(&patched, COERCING_ADD_NUMBERS)
            .into_owned();
    }

    if patched.contains("print(i)") && mentions_any(fix, &["print(n)", "printing n"]) {
        patched = patched.replace("print(i)", "print(n)");
    }

    patched
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RulePatcher;

impl PatchApplier for RulePatcher {
    fn apply_patch(&self, code: &str, fix: &str) -> String {
        apply_patch(code, fix)
    }
}
