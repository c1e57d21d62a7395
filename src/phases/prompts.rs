//! Instruction text sent to the agent for each phase.
//!
//! Prompts name absolute artifact paths so the worker writes files directly;
//! every prompt also asks for the artifact content in the final answer so
//! the phase can materialize it when the worker did not write the file.

use std::path::Path;

use crate::milestone::{Manifest, Milestone};
use crate::verification::VerificationStatus;

pub const PARSE_PROMPT: &str = r#"You are splitting a requirements document into an ordered list of build milestones.

Each milestone must:
- Be independently verifiable (it builds and its tests pass on its own)
- Deliver a coherent slice of features
- Depend only on earlier milestones

Output the manifest as JSON in this exact format:
{
  "project": {"name": "project-name", "language": "rust"},
  "milestones": [
    {
      "id": 0,
      "version": "0.1.0",
      "name": "Milestone Name",
      "features": ["feature"],
      "tests": ["what must be tested"],
      "docs": ["what must be documented"],
      "dependencies": []
    }
  ]
}

Guidelines:
- Number milestones from 0 in execution order; ids equal their position
- `dependencies` lists ids of earlier milestones only
- Keep the first milestone small: project scaffold and core types
- Cover every feature in the requirements"#;

pub const RESEARCHER_PERSONA: &str = "You investigate the codebase and the ecosystem before any code is written. \
Report facts with file paths and links; never modify files.";

pub const VERIFIER_PERSONA: &str = "You run build, test and lint commands and report each as a named pass/fail check \
with its captured output. Never edit source files.";

fn milestone_summary(milestone: &Milestone) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "  - (none)\n".to_string()
        } else {
            items.iter().map(|i| format!("  - {}\n", i)).collect()
        }
    };
    format!(
        "Milestone {} ({}): {}\nFeatures:\n{}Tests:\n{}Docs:\n{}",
        milestone.id,
        milestone.version,
        milestone.name,
        list(&milestone.features),
        list(&milestone.tests),
        list(&milestone.docs),
    )
}

pub fn parse_prompt(requirements: &str, manifest_path: &Path) -> String {
    format!(
        "{}\n\nWrite the manifest to {} and also print it as your final answer.\n\n## Requirements\n\n{}",
        PARSE_PROMPT,
        manifest_path.display(),
        requirements
    )
}

pub fn research_prompt(manifest: &Manifest, milestone: &Milestone, research_path: &Path) -> String {
    let deps = if milestone.dependencies.is_empty() {
        "none".to_string()
    } else {
        milestone
            .dependencies
            .iter()
            .filter_map(|d| manifest.get(*d))
            .map(|m| format!("{} ({})", m.name, m.id))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Project: {} ({})\n\n{}\nBuilds on: {}\n\n\
Research what this milestone needs: existing code it touches, libraries to use, \
conventions to follow, and risks. Use the researcher agent for deep dives.\n\n\
Give your findings as markdown in your final answer; it is saved to {}.",
        manifest.project.name,
        manifest.project.language,
        milestone_summary(milestone),
        deps,
        research_path.display()
    )
}

pub fn architect_prompt(
    milestone: &Milestone,
    research_path: &Path,
    plan_path: &Path,
    steps_path: &Path,
) -> String {
    format!(
        "{}\nRead the research at {}.\n\n\
Design the implementation. Write the plan as markdown to {}.\n\
Write the ordered steps to {} in this format:\n\
{{\"steps\": [{{\"id\": 1, \"title\": \"...\", \"description\": \"...\", \"files\": [\"path\"], \"validation\": [\"command\"]}}]}}\n\n\
Every step needs at least one validation command that proves it works. \
End your answer with the plan followed by the steps JSON.",
        milestone_summary(milestone),
        research_path.display(),
        plan_path.display(),
        steps_path.display()
    )
}

pub fn execute_prompt(
    milestone: &Milestone,
    plan_path: &Path,
    steps_path: &Path,
    results_path: &Path,
) -> String {
    format!(
        "{}\nImplement the plan at {} following the steps in {}.\n\n\
Work through the steps in order. After each step run its validation commands and do not \
start the next step until they pass.\n\n\
Summarize what you changed and the validation results per step in {} and print the summary \
as your final answer.",
        milestone_summary(milestone),
        plan_path.display(),
        steps_path.display(),
        results_path.display()
    )
}

pub fn fix_prompt(
    milestone: &Milestone,
    attempt: u32,
    status: &VerificationStatus,
    verification_results_path: &Path,
    plan_path: &Path,
    results_path: &Path,
) -> String {
    let failing: String = status
        .failing_checks()
        .map(|c| format!("- {}\n```\n{}\n```\n", c.name, c.output.trim()))
        .collect();
    let named = if failing.is_empty() {
        status
            .failures
            .iter()
            .map(|f| format!("- {}\n", f))
            .collect()
    } else {
        failing
    };
    format!(
        "{}\nAttempt {}: verification failed.\n\n## Failing checks\n\n{}\n\
Full results are in {}. The plan is at {}.\n\n\
Fix only what these checks need. Do not refactor unrelated code. Re-run the failing checks \
before you finish. Append a section describing the fix to {} and print it as your final answer.",
        milestone_summary(milestone),
        attempt,
        named,
        verification_results_path.display(),
        plan_path.display(),
        results_path.display()
    )
}

pub fn verify_prompt(
    milestone: &Milestone,
    index: usize,
    validation_path: &Path,
    results_path: &Path,
    status_path: &Path,
) -> String {
    format!(
        "{}\nVerify the milestone. Use the verifier agent to run:\n\
1. Baseline checks: the project builds, the full test suite passes, lints are clean\n\
2. Milestone checks: every listed test exists and passes\n\
3. Step checks: every command in {}\n\n\
Write a detailed markdown report to {}.\n\
Write the status to {} in this format:\n\
{{\"milestone\": {}, \"passed\": true, \"checks\": [{{\"name\": \"...\", \"passed\": true, \"output\": \"...\"}}], \"failures\": []}}\n\n\
`passed` is true only if every check passed. End your answer with the status JSON.",
        milestone_summary(milestone),
        validation_path.display(),
        results_path.display(),
        status_path.display(),
        index
    )
}

pub fn report_prompt(
    milestone: &Milestone,
    outcome: &str,
    attempts: u32,
    artifacts: &[&Path],
    report_path: &Path,
) -> String {
    let files: String = artifacts
        .iter()
        .map(|p| format!("- {}\n", p.display()))
        .collect();
    format!(
        "{}\nOutcome: {} after {} attempt(s).\n\nArtifacts:\n{}\n\
Write a milestone report: what was built, how it was verified, open issues. \
Do not change any code. Your final answer is saved to {}.",
        milestone_summary(milestone),
        outcome,
        attempts,
        files,
        report_path.display()
    )
}

pub fn final_report_prompt(
    project_name: &str,
    checkpoint: &str,
    reports: &[&Path],
    report_path: &Path,
) -> String {
    let files: String = if reports.is_empty() {
        "- (no milestone reports)\n".to_string()
    } else {
        reports
            .iter()
            .map(|p| format!("- {}\n", p.display()))
            .collect()
    };
    format!(
        "Project: {}\n\nPipeline checkpoint:\n```json\n{}\n```\n\nMilestone reports:\n{}\n\
Write the final pipeline report: milestones completed, failures and why, total cost, \
next steps. Do not change any code. Your final answer is saved to {}.",
        project_name,
        checkpoint,
        files,
        report_path.display()
    )
}
