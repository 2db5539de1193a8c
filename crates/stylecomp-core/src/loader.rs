use crate::ast::Stylesheet;
use crate::error::{ComposeError, Result};
use crate::parser;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Load a stylesheet file with recursive imports inlined.
pub fn load_with_imports(path: &Path) -> Result<String> {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    load_recursive(path, &mut visited, &mut stack)
}

/// Load, inline and parse each entry file, layering later files over earlier ones.
pub fn load_stylesheet<P: AsRef<Path>>(paths: &[P]) -> Result<Stylesheet> {
    let mut sheet = Stylesheet::default();
    for path in paths {
        let source = load_with_imports(path.as_ref())?;
        sheet.extend_layer(parser::parse(&source)?);
    }
    Ok(sheet)
}

fn load_recursive(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    stack: &mut HashSet<PathBuf>,
) -> Result<String> {
    let canonical = path.canonicalize().map_err(|source| ComposeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if stack.contains(&canonical) {
        return Err(ComposeError::RecursiveImport { path: canonical });
    }

    if visited.contains(&canonical) {
        trace!(path = %canonical.display(), "skipping already imported file");
        return Ok(String::new());
    }

    stack.insert(canonical.clone());
    debug!(path = %canonical.display(), "loading stylesheet");

    let data = fs::read_to_string(&canonical).map_err(|source| ComposeError::Io {
        path: canonical.clone(),
        source,
    })?;

    let base = canonical.parent().unwrap_or_else(|| Path::new("."));
    let mut out = String::new();
    for line in data.lines() {
        if let Some(target) = parse_import_line(line) {
            let imported = load_recursive(&locate_partial(base, target), visited, stack)?;
            out.push_str(&imported);
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    stack.remove(&canonical);
    visited.insert(canonical);
    Ok(out)
}

/// `@import "footer";` may name `footer`, `footer.scss` or the partial `_footer.scss`.
fn locate_partial(base: &Path, target: &str) -> PathBuf {
    let literal = base.join(target);
    if literal.is_file() {
        return literal;
    }

    let file_name = literal
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = literal.parent().unwrap_or(base);
    let with_ext = if file_name.ends_with(".scss") {
        file_name.clone()
    } else {
        format!("{file_name}.scss")
    };

    [dir.join(&with_ext), dir.join(format!("_{with_ext}"))]
        .into_iter()
        .find(|candidate| candidate.is_file())
        .unwrap_or(literal)
}

fn parse_import_line(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("@import")?.trim_start();
    let path_literal = rest.strip_suffix(';')?.trim();
    if path_literal.len() < 2 {
        return None;
    }

    let first = path_literal.chars().next()?;
    let last = path_literal.chars().last()?;
    if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
        Some(&path_literal[1..path_literal.len() - 1])
    } else {
        None
    }
}
