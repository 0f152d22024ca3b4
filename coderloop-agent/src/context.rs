//! Static context for the system prompt
//!
//! Markdown files directly under the context directory are always included;
//! skills are opt-in files under `<context_dir>/skills/<name>.md`.

use coderloop_runtime::error;
use coderloop_runtime::Result;
use std::path::Path;

/// Skill always merged in front of the caller's selection
pub const BASE_SKILL: &str = "coder";

const MAX_SLUG_LEN: usize = 64;

/// All `*.md` files directly under `dir`, sorted by name
pub fn load_context(dir: &Path) -> Result<String> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "no context directory");
        return Ok(String::new());
    }

    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| error::io_failed(dir.display().to_string(), e))?;
    for entry in entries {
        let path = entry.map_err(|e| error::io_failed(dir.display().to_string(), e))?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();

    let mut sections = Vec::new();
    for path in files {
        let text = std::fs::read_to_string(&path).map_err(|e| error::io_failed(path.display().to_string(), e))?;
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let title = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        sections.push(format!("## {}\n\n{}", title, text));
    }
    Ok(sections.join("\n\n"))
}

/// Named skills from `skills_root`; missing skills are skipped with a warning
pub fn load_skills(skills_root: &Path, skills: &[String]) -> Result<String> {
    let mut sections = Vec::new();
    for name in skills {
        let path = skills_root.join(format!("{}.md", name));
        if !path.is_file() {
            tracing::warn!(skill = %name, path = %path.display(), "skill not found, skipping");
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| error::io_failed(path.display().to_string(), e))?;
        let text = text.trim();
        if !text.is_empty() {
            sections.push(format!("## Skill: {}\n\n{}", name, text));
        }
    }
    Ok(sections.join("\n\n"))
}

/// Base skill first, then the caller's skills, without duplicates
pub fn merge_skills(requested: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for skill in std::iter::once(BASE_SKILL.to_string()).chain(requested.iter().cloned()) {
        if !merged.contains(&skill) {
            merged.push(skill);
        }
    }
    merged
}

/// Base instruction naming the project directory, followed by reference material
pub fn system_prompt(project_path: &Path, context_dir: &Path, skills: &[String]) -> Result<String> {
    let context = load_context(context_dir)?;
    let skills = load_skills(&context_dir.join("skills"), skills)?;

    let combined = [context, skills]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let combined = if combined.trim().is_empty() {
        "No extra context provided.".to_string()
    } else {
        combined
    };

    Ok(format!(
        "You are a focused software engineer.\n\
         Build a small but complete project inside '{}'.\n\
         \n\
         - Follow the brief precisely and avoid hidden fallbacks.\n\
         - Use the available tools to plan, create files, and run shell commands when needed.\n\
         - Paths are relative to the project directory; you cannot leave it.\n\
         - Prefer minimal dependencies and a clear, runnable structure.\n\
         - Provide a concise summary at the end with run instructions.\n\
         \n\
         Reference material and skills:\n\
         {}",
        project_path.display(),
        combined
    ))
}

/// Lowercase ASCII alphanumerics joined by single dashes; never empty
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}
