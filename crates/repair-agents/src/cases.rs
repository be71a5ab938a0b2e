//! Bug catalogue: the five built-in cases plus cases loaded from JSON.

use std::path::Path;

use repair_coordination::{Case, CorrelationId};
use serde::{Deserialize, Serialize};

/// A catalogue entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugCase {
    #[serde(rename = "id")]
    pub bug_id: u32,
    pub description: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CasesError {
    #[error("failed to read cases file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cases file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown case id {0}")]
    UnknownCase(u32),
}

pub fn builtin_cases() -> Vec<BugCase> {
    vec![
        BugCase {
            bug_id: 1,
            description: "Index out of bounds".into(),
            code: "def calculate_sum(arr):\n    s = 0\n    for i in range(len(arr)+1):  # bug: index runs past the end\n        s += arr[i]\n    return s".into(),
        },
        BugCase {
            bug_id: 2,
            description: "None access".into(),
            code: "def process_data(data):\n    result = data.get('value')\n    return result * 2  # bug: data may be None".into(),
        },
        BugCase {
            bug_id: 3,
            description: "Division by zero".into(),
            code: "def divide(a, b):\n    return a / b  # bug: zero divisor not checked".into(),
        },
        BugCase {
            bug_id: 4,
            description: "Type mismatch (string + number)".into(),
            code: "def add_numbers(a, b):\n    return a + b\n\nx = add_numbers('2', 3)  # bug: adds a string and a number".into(),
        },
        BugCase {
            bug_id: 5,
            description: "Uninitialized variable".into(),
            code: "def count_down(n):\n    while n >= 0:\n        print(i)  # bug: i is never defined\n        n -= 1".into(),
        },
    ]
}

pub fn builtin_case(bug_id: u32) -> Option<BugCase> {
    builtin_cases().into_iter().find(|c| c.bug_id == bug_id)
}

/// Read a JSON array of `{id, description, code}` objects.
pub fn load_cases(path: &Path) -> Result<Vec<BugCase>, CasesError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| CasesError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CasesError::Parse {
        path: display,
        source,
    })
}

/// Keep only the cases named in `ids`, in the order given. Empty `ids` keeps all.
pub fn select(catalogue: Vec<BugCase>, ids: &[u32]) -> Result<Vec<BugCase>, CasesError> {
    if ids.is_empty() {
        return Ok(catalogue);
    }
    ids.iter()
        .map(|id| {
            catalogue
                .iter()
                .find(|c| c.bug_id == *id)
                .cloned()
                .ok_or(CasesError::UnknownCase(*id))
        })
        .collect()
}

/// Assign sequential correlation ids (`cid-0001`, ...) and build run cases.
pub fn to_cases(catalogue: &[BugCase]) -> Vec<Case> {
    catalogue
        .iter()
        .enumerate()
        .map(|(i, bug)| {
            Case::new(bug.bug_id, bug.code.clone(), CorrelationId::for_index(i + 1))
                .with_description(bug.description.clone())
        })
        .collect()
}
