//! Keyword-driven stand-in for a language model.
//!
//! Recognizes the five catalogue bug shapes by pattern, proposes up to five
//! textual fixes per diagnosis, and reviews a fix by keyword score plus a
//! seeded coin. Fully offline and deterministic for a given seed.

use std::sync::LazyLock;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use repair_coordination::{CodeAnalyzer, CollaboratorError, FixReviewer, FixSuggester, Verdict};

/// Upper bound on candidates returned per diagnosis.
pub const MAX_SUGGESTIONS: usize = 5;

/// Score (keywords + uniform draw) a fix must exceed to be approved.
const APPROVAL_THRESHOLD: f64 = 1.2;

/// Review keywords, matched as whole words so "adding" or "printing" do not count.
static REVIEW_KEYWORDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\breplace\b",
        r"\badd\b",
        r"\bcheck\b",
        r"\btry\b",
        r"\bexception\b",
        r"\bint\b",
        r"\brange\b",
        r"\bprint\(n\)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("REVIEW_KEYWORDS regex should compile"))
    .collect()
});

pub fn find_issues(code: &str) -> String {
    let report = if code.contains("len(arr)+1") {
        "Index out of bounds in loop range(len(arr)+1)."
    } else if code.contains("data.get") && code.contains("process_data") {
        "Possible None input: data may be None before calling .get."
    } else if code.contains("return a / b") {
        "Division by zero is not handled: b may be 0."
    } else if code.contains("add_numbers") && code.contains("return a + b") {
        "Adding a string and a number raises TypeError: type conversion needed."
    } else if code.contains("print(i)") && code.contains("count_down") {
        "Uninitialized variable i is used: probably meant to print n."
    } else {
        "No issues recognized. Check edge cases and types."
    };
    report.to_string()
}

pub fn suggest_fixes(report: &str) -> Vec<String> {
    let mut suggestions: Vec<&str> = Vec::new();

    if report.contains("out of bounds") || report.contains("range(len(arr)+1)") {
        suggestions.extend([
            "Replace range(len(arr)+1) with range(len(arr)).",
            "Iterate over the elements: for x in arr: s += x.",
        ]);
    }
    if report.contains("None") {
        suggestions.extend([
            "Add a check if data is None: return None before .get.",
            "Safe logic: if data and 'value' in data: ... else: return None.",
        ]);
    }
    if report.contains("Division by zero") || report.contains("b may be 0") {
        suggestions.extend([
            "Add a check if b == 0: return None.",
            "Raise an exception when b == 0.",
        ]);
    }
    if report.contains("TypeError") {
        suggestions.extend([
            "Try converting numeric strings to int before adding.",
            "Handle types with try/except and convert to numbers.",
        ]);
    }
    if report.contains("Uninitialized") {
        suggestions.extend([
            "Replace print(i) with print(n) inside the loop.",
            "Introduce a local i = n, though printing n makes more sense.",
        ]);
    }
    if suggestions.is_empty() {
        suggestions.push("Add input validation and edge-case tests.");
    }

    suggestions
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(String::from)
        .collect()
}

/// Distinct keywords present in `fix`, case-insensitive.
pub fn review_score(fix: &str) -> usize {
    let lowered = fix.to_lowercase();
    REVIEW_KEYWORDS
        .iter()
        .filter(|kw| kw.is_match(&lowered))
        .count()
}

pub fn review_fix(fix: &str, seed: u64) -> Verdict {
    let draw: f64 = StdRng::seed_from_u64(seed).gen();
    if review_score(fix) as f64 + draw > APPROVAL_THRESHOLD {
        Verdict::Approve
    } else {
        Verdict::RequestChanges
    }
}

/// The heuristic model behind all three model-backed collaborator seams.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicModel;

#[async_trait]
impl CodeAnalyzer for HeuristicModel {
    async fn find_issues(&self, code: &str) -> Result<String, CollaboratorError> {
        Ok(find_issues(code))
    }
}

#[async_trait]
impl FixSuggester for HeuristicModel {
    async fn suggest_fixes(&self, report: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(suggest_fixes(report))
    }
}

#[async_trait]
impl FixReviewer for HeuristicModel {
    async fn review_fix(&self, candidate: &str, seed: u64) -> Result<Verdict, CollaboratorError> {
        Ok(review_fix(candidate, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::builtin_cases;

    #[test]
    fn test_every_catalogue_case_is_recognized() {
        for case in builtin_cases() {
            let report = find_issues(&case.code);
            assert!(
                !report.starts_with("No issues"),
                "bug {} not recognized",
                case.bug_id
            );
            let fixes = suggest_fixes(&report);
            assert!((1..=MAX_SUGGESTIONS).contains(&fixes.len()));
        }
    }

    #[test]
    fn test_unknown_code_gets_generic_advice() {
        let report = find_issues("def ok():\n    return 1");
        assert_eq!(
            suggest_fixes(&report),
            vec!["Add input validation and edge-case tests."]
        );
    }

    #[test]
    fn test_off_by_one_diagnosis_and_fixes() {
        let report = find_issues("for i in range(len(arr)+1):");
        assert!(report.contains("range(len(arr)+1)"));
        let fixes = suggest_fixes(&report);
        assert_eq!(fixes[0], "Replace range(len(arr)+1) with range(len(arr)).");
    }

    #[test]
    fn test_review_is_seeded() {
        for seed in 0..50 {
            assert_eq!(review_fix("Add a check", seed), review_fix("Add a check", seed));
        }
    }

    #[test]
    fn test_review_score_thresholds() {
        // Two or more keywords always clear the threshold.
        assert!(review_score("Replace range(len(arr)+1) with range(len(arr)).") >= 2);
        for seed in 0..50 {
            assert_eq!(
                review_fix("Replace range(len(arr)+1) with range(len(arr)).", seed),
                Verdict::Approve
            );
        }
        // No keyword never clears it.
        assert_eq!(review_score("Iterate over the elements: for x in arr: s += x."), 0);
        for seed in 0..50 {
            assert_eq!(
                review_fix("Iterate over the elements: for x in arr: s += x.", seed),
                Verdict::RequestChanges
            );
        }
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let fallback = "Introduce a local i = n, though printing n makes more sense.";
        assert_eq!(review_score(fallback), 0);
        for seed in 0..50 {
            assert_eq!(review_fix(fallback, seed), Verdict::RequestChanges);
        }
        assert_eq!(review_score("Try converting numeric strings to int before adding."), 2);
        assert_eq!(review_score("Replace print(i) with print(n) inside the loop."), 2);
        assert_eq!(review_score("Handle types with try/except and convert to numbers."), 1);
    }
}
