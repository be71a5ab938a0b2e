//! Test oracles: per-bug checks that decide whether a patch fixed the bug.
//!
//! [`StaticOracle`] inspects the patched source for the repaired shape and
//! never executes anything; its logs say so. [`SandboxOracle`] runs the code under a Python
//! interpreter in a child process with a wall-clock timeout, inside a
//! throwaway directory, and reads a JSON verdict from its stdout.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use repair_coordination::{TestOracle, TestReport};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the oracle asserts for each catalogue bug.
pub fn describe(bug_id: u32) -> &'static str {
    match bug_id {
        1 => "calculate_sum([1, 2, 3]) == 6",
        2 => "process_data(None) is None and process_data({'value': 3}) == 6",
        3 => "divide(4, 2) == 2 and divide(4, 0) is None",
        4 => "add_numbers('2', 3) == 5",
        5 => "count_down(2) runs without NameError",
        _ => "no tests; counted as passed",
    }
}

const NO_TESTS: &str = "No tests for this case; counted as passed.";

static SUM_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"for\s+(\w+)\s+in\s+(range\(\s*len\(\s*arr\s*\)\s*\)|arr\s*:)")
        .expect("SUM_LOOP regex should compile")
});

static SUM_OVERRUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"range\(\s*len\(\s*arr\s*\)\s*\+\s*1\s*\)").expect("SUM_OVERRUN regex should compile")
});

static NONE_GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"if\s+(data\s+is\s+None|not\s+data)\b").expect("NONE_GUARD regex should compile")
});

static ZERO_GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"if\s+(b\s*==\s*0|not\s+b)\b").expect("ZERO_GUARD regex should compile")
});

static NUMERIC_COERCION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(int|float)\(").expect("NUMERIC_COERCION regex should compile")
});

static PRINT_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprint\(\s*n\s*\)").expect("PRINT_N regex should compile")
});

static PRINT_I: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprint\(\s*i\s*\)").expect("PRINT_I regex should compile")
});

/// Body of the top-level `def name(...)`, up to the next unindented line.
fn function_body<'a>(code: &'a str, name: &str) -> Option<&'a str> {
    let header = format!("def {name}(");
    let start = code
        .match_indices(&header)
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || code[..idx].ends_with('\n'))?;
    let body_start = start + code[start..].find('\n')? + 1;
    let mut end = body_start;
    for line in code[body_start..].split_inclusive('\n') {
        if !line.trim().is_empty() && !line.starts_with([' ', '\t']) {
            break;
        }
        end += line.len();
    }
    let body = &code[body_start..end];
    (!body.trim().is_empty()).then_some(body)
}

/// Whether the first `guard` match comes before the first `use_site`.
fn guarded(body: &str, guard: &Regex, use_site: &str) -> bool {
    match (guard.find(body), body.find(use_site)) {
        (Some(g), Some(u)) => g.start() < u,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Pattern-based oracle. Offline and instant, never executes the code.
///
/// Each check looks for the repaired shape inside the function under test;
/// a missing or emptied function fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticOracle;

impl StaticOracle {
    pub fn check(code: &str, bug_id: u32) -> TestReport {
        let failure = match bug_id {
            1 => match function_body(code, "calculate_sum") {
                None => Some("calculate_sum is not defined"),
                Some(body) if SUM_OVERRUN.is_match(body) => {
                    Some("loop still runs to range(len(arr)+1), expect IndexError")
                }
                Some(body) if !SUM_LOOP.is_match(body) => {
                    Some("no loop bounded by the list length")
                }
                Some(_) => None,
            },
            2 => match function_body(code, "process_data") {
                None => Some("process_data is not defined"),
                Some(body) if !guarded(body, &NONE_GUARD, ".get(") => {
                    Some("data.get runs before any None check, expect AttributeError")
                }
                Some(_) => None,
            },
            3 => match function_body(code, "divide") {
                None => Some("divide is not defined"),
                Some(body) if !guarded(body, &ZERO_GUARD, "/ b") => {
                    Some("a / b runs before any zero check, expect ZeroDivisionError")
                }
                Some(_) => None,
            },
            4 => match function_body(code, "add_numbers") {
                None => Some("add_numbers is not defined"),
                Some(body) if !NUMERIC_COERCION.is_match(body) => {
                    Some("operands are never converted, expect TypeError")
                }
                Some(_) => None,
            },
            5 => match function_body(code, "count_down") {
                None => Some("count_down is not defined"),
                Some(body) if PRINT_I.is_match(body) => {
                    Some("print(i) uses an undefined name, expect NameError")
                }
                Some(body) if !PRINT_N.is_match(body) => Some("count_down never prints n"),
                Some(_) => None,
            },
            _ => return TestReport::pass(NO_TESTS),
        };

        match failure {
            None => TestReport::pass(format!("pattern check passed: {}", describe(bug_id))),
            Some(reason) => TestReport::fail(format!("TEST FAILED: pattern check: {reason}")),
        }
    }
}

#[async_trait]
impl TestOracle for StaticOracle {
    async fn run_tests(&self, code: &str, bug_id: u32) -> TestReport {
        Self::check(code, bug_id)
    }
}

/// Interpreter and limits for [`SandboxOracle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub timeout_secs: f64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox setup failed: {0}")]
    Setup(#[from] std::io::Error),

    #[error("failed to launch '{interpreter}': {source}")]
    Launch {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TIMEOUT: execution exceeded {secs}s")]
    Timeout { secs: f64 },

    #[error("harness exited with {status} and no verdict; stderr: {stderr}")]
    NoVerdict { status: String, stderr: String },
}

/// Harness executed by the interpreter: `harness.py <code-file> <bug-id>`.
const HARNESS: &str = r#"import contextlib
import io
import json
import sys

with open(sys.argv[1], encoding="utf-8") as f:
    code = f.read()
bug_id = int(sys.argv[2])
env = {}
out = io.StringIO()
try:
    with contextlib.redirect_stdout(out):
        exec(code, env, env)
        if bug_id == 1:
            res = env["calculate_sum"]([1, 2, 3])
            assert res == 6, f"calculate_sum([1, 2, 3]) = {res}"
            print(f"calculate_sum([1, 2, 3]) = {res}")
        elif bug_id == 2:
            assert env["process_data"](None) is None
            assert env["process_data"]({"value": 3}) == 6
        elif bug_id == 3:
            assert env["divide"](4, 2) == 2
            assert env["divide"](4, 0) is None
        elif bug_id == 4:
            res = env["add_numbers"]("2", 3)
            assert res == 5, f"add_numbers('2', 3) = {res!r}"
        elif bug_id == 5:
            env["count_down"](2)
        else:
            print("No tests for this case; counted as passed.")
    print(json.dumps({"passed": True, "output": out.getvalue()}))
except Exception as e:
    print(json.dumps({
        "passed": False,
        "output": out.getvalue(),
        "error": f"{type(e).__name__}: {e}",
    }))
"#;

#[derive(Debug, Deserialize)]
struct HarnessVerdict {
    passed: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// Runs the per-bug harness in a child interpreter.
#[derive(Debug, Clone)]
pub struct SandboxOracle {
    interpreter: String,
    timeout: Duration,
}

impl SandboxOracle {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::try_from_secs_f64(config.timeout_secs)
                .unwrap_or(Duration::from_secs(5)),
        }
    }

    async fn execute(&self, code: &str, bug_id: u32) -> Result<TestReport, SandboxError> {
        let dir = tempfile::tempdir()?;
        let code_path = dir.path().join("code_under_test.py");
        let harness_path = dir.path().join("harness.py");
        tokio::fs::write(&code_path, code).await?;
        tokio::fs::write(&harness_path, HARNESS).await?;

        let mut cmd = tokio::process::Command::new(&self.interpreter);
        cmd.arg(&harness_path)
            .arg(&code_path)
            .arg(bug_id.to_string())
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SandboxError::Launch {
            interpreter: self.interpreter.clone(),
            source,
        })?;
        // Anything the code spawned shares the child's group and dies with it.
        let _group = ProcessGroup(child.id());

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SandboxError::Timeout {
                    secs: self.timeout.as_secs_f64(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bug_id, status = %output.status, "Sandbox finished");
        parse_verdict(&stdout).ok_or_else(|| SandboxError::NoVerdict {
            status: output.status.to_string(),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr), 2000),
        })
    }
}

/// SIGKILLs a process group when dropped.
#[cfg_attr(not(unix), allow(dead_code))]
struct ProcessGroup(Option<u32>);

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: killpg takes plain integers; a group that is already gone yields ESRCH.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc == 0 {
                debug!(pgid, "Killed sandbox process group");
            }
        }
    }
}

fn parse_verdict(stdout: &str) -> Option<TestReport> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let verdict: HarnessVerdict = serde_json::from_str(line.trim()).ok()?;
    Some(match (verdict.passed, verdict.error) {
        (true, _) => TestReport::pass(verdict.output),
        (false, Some(error)) => TestReport::fail(format!(
            "TEST FAILED: {error}\n--- Output ---\n{}",
            verdict.output
        )),
        (false, None) => TestReport::fail(format!("TEST FAILED\n--- Output ---\n{}", verdict.output)),
    })
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl TestOracle for SandboxOracle {
    async fn run_tests(&self, code: &str, bug_id: u32) -> TestReport {
        match self.execute(code, bug_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(bug_id, error = %e, "Sandbox run failed");
                TestReport::fail(e.to_string())
            }
        }
    }
}

/// Whether `interpreter` can be launched at all.
pub fn interpreter_available(interpreter: &str) -> bool {
    std::process::Command::new(interpreter)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::builtin_case;
    use crate::patching::apply_patch;

    #[test]
    fn test_static_oracle_rejects_unpatched_catalogue() {
        for bug_id in 1..=5 {
            let code = builtin_case(bug_id).unwrap().code;
            let report = StaticOracle::check(&code, bug_id);
            assert!(!report.passed, "bug {bug_id} passed unpatched");
            assert!(report.log.starts_with("TEST FAILED"));
        }
    }

    #[test]
    fn test_static_oracle_accepts_patched_catalogue() {
        let fixes = [
            "Replace range(len(arr)+1) with range(len(arr)).",
            "Add a check if data is None: return None before .get.",
            "Add a check if b == 0: return None.",
            "Try converting numeric strings to int before adding.",
            "Replace print(i) with print(n) inside the loop.",
        ];
        for (bug_id, fix) in (1..=5).zip(fixes) {
            let patched = apply_patch(&builtin_case(bug_id).unwrap().code, fix);
            let report = StaticOracle::check(&patched, bug_id);
            assert!(report.passed, "bug {bug_id}: {}", report.log);
            assert!(report.log.starts_with("pattern check passed"));
        }
    }

    #[test]
    fn test_static_oracle_matches_tokens_not_substrings() {
        // `print(` contains `int(` but converts nothing.
        let printing = "def add_numbers(a, b):\n    print(a)\n    return a + b\n\nx = add_numbers('2', 3)";
        let report = StaticOracle::check(printing, 4);
        assert!(!report.passed);
        assert!(report.log.contains("never converted"));

        // Conversion outside the function does not repair it.
        let outside = "def add_numbers(a, b):\n    return a + b\n\nx = add_numbers(int('2'), 3)";
        assert!(!StaticOracle::check(outside, 4).passed);
    }

    #[test]
    fn test_static_oracle_rejects_gutted_functions() {
        let report = StaticOracle::check("def count_down(n):\n    pass", 5);
        assert!(!report.passed);
        assert!(report.log.contains("never prints n"));

        assert!(!StaticOracle::check("def count_down(n):", 5).passed);
        assert!(!StaticOracle::check("x = 1", 3).passed);

        // Guard placed after the division is no guard.
        let late = "def divide(a, b):\n    r = a / b\n    if b == 0:\n        return None\n    return r";
        assert!(!StaticOracle::check(late, 3).passed);
    }

    #[test]
    fn test_static_oracle_accepts_patched_sum() {
        let code = builtin_case(1).unwrap().code;
        let patched = apply_patch(&code, "Replace range(len(arr)+1) with range(len(arr)).");
        let report = StaticOracle::check(&patched, 1);
        assert!(report.passed);
        assert_eq!(
            report.log,
            "pattern check passed: calculate_sum([1, 2, 3]) == 6"
        );

        let iterating = "def calculate_sum(arr):\n    s = 0\n    for x in arr:\n        s += x\n    return s";
        assert!(StaticOracle::check(iterating, 1).passed);
    }

    #[test]
    fn test_unknown_bug_counts_as_passed() {
        let report = StaticOracle::check("anything", 42);
        assert!(report.passed);
        assert_eq!(describe(42), "no tests; counted as passed");
    }

    #[test]
    fn test_parse_verdict_uses_last_line() {
        let stdout = "noise\n{\"passed\": false, \"output\": \"x\", \"error\": \"AssertionError: \"}\n";
        let report = parse_verdict(stdout).unwrap();
        assert!(!report.passed);
        assert!(report.log.contains("AssertionError"));
        assert!(parse_verdict("garbage").is_none());
    }

    fn python() -> Option<SandboxOracle> {
        let config = SandboxConfig::default();
        interpreter_available(&config.interpreter).then(|| SandboxOracle::new(&config))
    }

    #[tokio::test]
    async fn test_sandbox_runs_patched_code() {
        let Some(oracle) = python() else {
            eprintln!("python3 not on PATH, skipping");
            return;
        };
        let code = builtin_case(1).unwrap().code;
        assert!(!oracle.run_tests(&code, 1).await.passed);

        let patched = apply_patch(&code, "Replace range(len(arr)+1) with range(len(arr)).");
        let report = oracle.run_tests(&patched, 1).await;
        assert!(report.passed, "{}", report.log);
        assert!(report.log.contains("calculate_sum([1, 2, 3]) = 6"));
    }

    #[tokio::test]
    async fn test_sandbox_times_out_runaway_code() {
        let Some(_) = python() else {
            eprintln!("python3 not on PATH, skipping");
            return;
        };
        let oracle = SandboxOracle::new(&SandboxConfig {
            timeout_secs: 0.5,
            ..Default::default()
        });
        let report = oracle.run_tests("while True:\n    pass\n", 1).await;
        assert!(!report.passed);
        assert!(report.log.starts_with("TIMEOUT"));
    }

    /// Dead or zombie (killed, not yet reaped by init).
    #[cfg(target_os = "linux")]
    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_spawned_processes() {
        let Some(_) = python() else {
            eprintln!("python3 not on PATH, skipping");
            return;
        };
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("grandchild.pid");
        let code = format!(
            "import subprocess, sys\n\
             p = subprocess.Popen([sys.executable, '-c', 'import time; time.sleep(30)'])\n\
             with open(r'{}', 'w') as f:\n    f.write(str(p.pid))\n\
             while True:\n    pass\n",
            pid_file.display()
        );
        let oracle = SandboxOracle::new(&SandboxConfig {
            timeout_secs: 1.5,
            ..Default::default()
        });

        let report = oracle.run_tests(&code, 1).await;
        assert!(report.log.starts_with("TIMEOUT"), "{}", report.log);

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..40 {
            if process_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "grandchild {pid} outlived the sandbox timeout");
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_cleanly() {
        let oracle = SandboxOracle::new(&SandboxConfig {
            interpreter: "definitely-not-a-python-binary".into(),
            ..Default::default()
        });
        let report = oracle.run_tests("x = 1", 1).await;
        assert!(!report.passed);
        assert!(report.log.contains("failed to launch"));
    }
}
