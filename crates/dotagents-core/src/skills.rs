use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use crate::mappings::SKILLS_DIR;

pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Missing front matter delimiter")]
    MissingFrontMatter,
    #[error("Missing closing --- for front matter")]
    MissingFrontMatterEnd,
    #[error("Invalid front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Skill metadata is missing a non-empty `{0}`")]
    MissingField(&'static str),
    #[error("Failed to read skill: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillSummary {
    pub dir_name: String,
    pub path: PathBuf,
    pub name: String,
    pub description: String,
}

pub fn skills_dir(canonical_root: &Path) -> PathBuf {
    canonical_root.join(SKILLS_DIR)
}

pub fn split_front_matter(text: &str) -> Result<(String, String), SkillError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || lines[0].trim() != "---" {
        return Err(SkillError::MissingFrontMatter);
    }
    let end_idx = lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, line)| line.trim() == "---")
        .map(|(idx, _)| idx)
        .ok_or(SkillError::MissingFrontMatterEnd)?;
    let front = lines[1..end_idx].join("\n");
    let body = lines[end_idx + 1..].join("\n");
    Ok((front, body))
}

pub fn parse_skill_metadata(text: &str) -> Result<SkillMetadata, SkillError> {
    let (front, _) = split_front_matter(text)?;
    let value: Value = serde_yaml::from_str(&front)?;
    let name = string_field(&value, "name").ok_or(SkillError::MissingField("name"))?;
    let description =
        string_field(&value, "description").ok_or(SkillError::MissingField("description"))?;
    Ok(SkillMetadata { name, description })
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn read_skill_metadata(dir: &Path) -> Result<SkillMetadata, SkillError> {
    let text = fs::read_to_string(dir.join(SKILL_FILE))?;
    parse_skill_metadata(&text)
}

/// A skill directory is installable when its SKILL.md carries a non-empty
/// `name` and `description`.
pub fn is_valid_skill_dir(dir: &Path) -> bool {
    dir.is_dir() && read_skill_metadata(dir).is_ok()
}

/// Valid skills under `skills_dir`, sorted by directory name. Invalid or
/// unreadable entries are left out.
pub fn list_skills(skills_dir: &Path) -> Vec<SkillSummary> {
    let Ok(entries) = fs::read_dir(skills_dir) else {
        return Vec::new();
    };
    let mut skills: Vec<SkillSummary> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let path = entry.path();
            let metadata = read_skill_metadata(&path).ok()?;
            Some(SkillSummary {
                dir_name: entry.file_name().to_string_lossy().to_string(),
                path,
                name: metadata.name,
                description: metadata.description,
            })
        })
        .collect();
    skills.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
    skills
}
