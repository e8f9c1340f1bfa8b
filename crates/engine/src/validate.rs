use crate::error::{EngineError, Result};

/// Strip Markdown code fences or inline backticks from a submitted
/// snippet, returning the bare code.
pub fn extract_code_block(raw: &str) -> String {
    let content = raw.trim();
    if let Some(inner) = content
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
    {
        let inner = inner
            .strip_prefix("python\n")
            .or_else(|| inner.strip_prefix("py\n"))
            .unwrap_or(inner);
        return inner.trim().to_string();
    }
    if content.len() >= 2
        && let Some(inner) = content
            .strip_prefix('`')
            .and_then(|s| s.strip_suffix('`'))
    {
        return inner.trim().to_string();
    }
    content.to_string()
}

/// A code payload must be non-empty after fence stripping.
pub fn code(raw: &str) -> Result<String> {
    let extracted = extract_code_block(raw);
    if extracted.is_empty() {
        return Err(EngineError::InvalidRequest("empty code payload".into()));
    }
    Ok(extracted)
}

/// File paths supplied to write/remove must be non-empty.
pub fn rel_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(EngineError::InvalidRequest("empty path".into()));
    }
    Ok(())
}

/// Package names pass a strict character allow-list covering pip
/// requirement specifiers (name, extras, version pins) and nothing
/// shell-sensitive.
pub fn packages(packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Err(EngineError::InvalidRequest(
            "provide at least one package name".into(),
        ));
    }
    for pkg in packages {
        if pkg.is_empty() {
            return Err(EngineError::InvalidRequest("empty package name".into()));
        }
        let ok = pkg.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '_' | '.' | '[' | ']' | '=' | '<' | '>' | '!' | '~' | ',' | '+')
        });
        if !ok {
            return Err(EngineError::InvalidRequest(format!(
                "invalid package name: {pkg}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_code_passes_through() {
        assert_eq!(extract_code_block("print(1)"), "print(1)");
    }

    #[test]
    fn triple_fence_with_language_hint() {
        assert_eq!(extract_code_block("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(extract_code_block("```py\nprint(2)\n```"), "print(2)");
    }

    #[test]
    fn triple_fence_without_hint() {
        assert_eq!(extract_code_block("```\n1+1\n```"), "1+1");
    }

    #[test]
    fn inline_backticks() {
        assert_eq!(extract_code_block("`1+1`"), "1+1");
    }

    #[test]
    fn empty_code_rejected() {
        assert!(code("``````").is_err());
        assert!(code("   ").is_err());
    }

    #[test]
    fn valid_packages_accepted() {
        let pkgs = vec![
            "requests".to_string(),
            "numpy==1.26.0".to_string(),
            "uvicorn[standard]".to_string(),
            "Django>=4.2,<5".to_string(),
        ];
        packages(&pkgs).unwrap();
    }

    #[test]
    fn shell_metacharacters_rejected() {
        for bad in ["foo;rm -rf /", "a b", "$(whoami)", "pkg|cat", "../x"] {
            let err = packages(&[bad.to_string()]).unwrap_err();
            assert!(matches!(err, EngineError::InvalidRequest(_)), "{bad}");
        }
    }

    #[test]
    fn empty_package_list_rejected() {
        assert!(packages(&[]).is_err());
    }

    #[test]
    fn empty_rel_path_rejected() {
        assert!(rel_path("  ").is_err());
        rel_path("a.txt").unwrap();
    }
}
