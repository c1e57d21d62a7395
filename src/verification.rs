//! Verification results shared by the Verify and Fix phases.
//!
//! `VerificationStatus::passed` is the only signal the retry loop consumes.

use serde::{Deserialize, Serialize};

/// One named pass/fail check with its captured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
}

/// The `verification-status.json` format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationStatus {
    #[serde(default)]
    pub milestone: usize,
    pub passed: bool,
    #[serde(default)]
    pub checks: Vec<VerificationCheck>,
    #[serde(default)]
    pub failures: Vec<String>,
}

impl VerificationStatus {
    pub fn from_checks(milestone: usize, checks: Vec<VerificationCheck>) -> Self {
        Self {
            milestone,
            passed: true,
            checks,
            failures: Vec::new(),
        }
        .normalized(milestone)
    }

    /// Enforce the status invariants regardless of what the verifier wrote:
    /// `passed` holds only if every check passed and the verifier agreed, and
    /// every failing check is named in `failures`.
    pub fn normalized(mut self, milestone: usize) -> Self {
        self.milestone = milestone;
        let all_checks_pass = self.checks.iter().all(|c| c.passed);
        self.passed = self.passed && all_checks_pass;

        for check in self.checks.iter().filter(|c| !c.passed) {
            if !self.failures.contains(&check.name) {
                self.failures.push(check.name.clone());
            }
        }
        if !self.passed && self.failures.is_empty() {
            self.failures
                .push("verification reported failure without naming a check".to_string());
        }
        if self.passed {
            self.failures.clear();
        }
        self
    }

    pub fn failing_checks(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
