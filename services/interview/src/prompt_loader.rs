use anyhow::{Context, Result};
use interview_core::conversation::PromptTemplates;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// Builds the interview prompts, letting `interviewer.md` and `analysis.md` in
/// `dir_path` replace the built-in ones. A missing directory means no overrides.
pub fn load_templates(dir_path: &Path) -> Result<PromptTemplates> {
    let mut templates = PromptTemplates::default();
    if !dir_path.is_dir() {
        tracing::debug!("No prompt overrides at {}", dir_path.display());
        return Ok(templates);
    }

    let mut prompts = load_prompts(dir_path)?;
    if let Some(interviewer) = prompts.remove("interviewer") {
        tracing::info!("Using interviewer prompt override");
        templates.interviewer = interviewer;
    }
    if let Some(analysis) = prompts.remove("analysis") {
        if !analysis.contains("{TRANSCRIPT}") {
            anyhow::bail!("analysis.md must contain the {{TRANSCRIPT}} placeholder");
        }
        tracing::info!("Using analysis prompt override");
        templates.analysis = analysis;
    }
    for unused in prompts.keys() {
        tracing::warn!("Ignoring unknown prompt file: {}.md", unused);
    }

    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_prompts_successfully() -> Result<()> {
        // 1. Arrange: Create a temporary directory and some prompt files.
        let dir = tempdir()?;
        let dir_path = dir.path();

        // The `{{...}}` in `writeln!` escapes the braces, so `{ROLE}` is written to the file.
        let mut file1 = File::create(dir_path.join("interviewer.md"))?;
        writeln!(file1, "Interview for {{ROLE}}.")?;

        let mut ignored_file = File::create(dir_path.join("notes.txt"))?;
        writeln!(ignored_file, "some notes")?;

        std::fs::create_dir(dir_path.join("subdir"))?;

        // 2. Act
        let prompts = load_prompts(dir_path)?;

        // 3. Assert
        assert_eq!(prompts.len(), 1, "Should only load .md files");
        assert_eq!(prompts.get("interviewer").unwrap(), "Interview for {ROLE}.\n");
        assert!(prompts.get("notes").is_none());

        Ok(())
    }

    #[test]
    fn test_load_prompts_from_nonexistent_dir() {
        let dir_path = Path::new("nonexistent_dir_for_testing_prompts");
        assert!(load_prompts(dir_path).is_err());
    }

    #[test]
    fn test_overrides_replace_builtin_templates() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("interviewer.md"),
            "Interview the {ROLE} with {LIMIT} questions.",
        )?;

        let templates = load_templates(dir.path())?;

        assert_eq!(
            templates.interviewer_instruction("Pilot", 4),
            "Interview the Pilot with 4 questions."
        );
        assert_eq!(templates.analysis, PromptTemplates::default().analysis);
        Ok(())
    }

    #[test]
    fn test_missing_dir_uses_builtin_templates() -> Result<()> {
        let templates = load_templates(Path::new("nonexistent_dir_for_testing_prompts"))?;
        assert_eq!(templates, PromptTemplates::default());
        Ok(())
    }

    #[test]
    fn test_analysis_override_requires_transcript_placeholder() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("analysis.md"), "Grade the interview.")?;

        assert!(load_templates(dir.path()).is_err());
        Ok(())
    }
}
