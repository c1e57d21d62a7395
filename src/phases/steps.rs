//! The `steps.json` plan format produced by Architect.

use serde::{Deserialize, Serialize};

/// One ordered implementation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Files this step is expected to touch
    #[serde(default)]
    pub files: Vec<String>,
    /// Commands that must succeed before the next step starts
    #[serde(default)]
    pub validation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepsFile {
    pub steps: Vec<Step>,
}

impl StepsFile {
    /// Steps must be non-empty with strictly increasing ids.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("steps.json defines no steps".to_string());
        }
        for pair in self.steps.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(format!(
                    "step ids must increase: {} follows {}",
                    pair[1].id, pair[0].id
                ));
            }
        }
        Ok(())
    }
}

/// Render the per-step validation checklist used as `validation.md`.
pub fn render_validation_md(steps: &StepsFile) -> String {
    let mut out = String::from("# Validation\n");
    for step in &steps.steps {
        out.push_str(&format!("\n## Step {}: {}\n\n", step.id, step.title));
        if step.validation.is_empty() {
            out.push_str("- (no commands)\n");
        }
        for command in &step.validation {
            out.push_str(&format!("- `{}`\n", command));
        }
        if !step.files.is_empty() {
            out.push_str(&format!("\nFiles: {}\n", step.files.join(", ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: u32, validation: &[&str]) -> Step {
        Step {
            id,
            title: format!("Step {id}"),
            description: String::new(),
            files: vec!["src/lib.rs".to_string()],
            validation: validation.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_validate_ordering() {
        let ok = StepsFile {
            steps: vec![step(1, &[]), step(2, &[])],
        };
        assert!(ok.validate().is_ok());

        let bad = StepsFile {
            steps: vec![step(2, &[]), step(1, &[])],
        };
        assert!(bad.validate().unwrap_err().contains("must increase"));

        assert!(StepsFile { steps: vec![] }.validate().is_err());
    }

    #[test]
    fn test_render_validation_md() {
        let steps = StepsFile {
            steps: vec![step(1, &["cargo build"]), step(2, &[])],
        };
        let md = render_validation_md(&steps);
        assert!(md.starts_with("# Validation"));
        assert!(md.contains("## Step 1: Step 1\n\n- `cargo build`"));
        assert!(md.contains("## Step 2: Step 2\n\n- (no commands)"));
        assert!(md.contains("Files: src/lib.rs"));
    }

    #[test]
    fn test_deserialize_minimal_step() {
        let steps: StepsFile =
            serde_json::from_str(r#"{"steps": [{"id": 1, "title": "Only"}]}"#).unwrap();
        assert!(steps.steps[0].validation.is_empty());
    }
}
