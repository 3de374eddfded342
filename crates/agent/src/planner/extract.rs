//! Code extraction and validation for planner output.
//!
//! Extraction order:
//! 1. the first fenced block tagged `python`, `py`, or `python3`
//! 2. the first fenced block of any kind
//! 3. the whole reply
//!
//! The result is normalized (leading blank lines dropped, common indentation
//! removed, trailing whitespace trimmed), which makes extraction idempotent.

use regex_lite::Regex;
use std::sync::OnceLock;

const PYTHON_TAGS: &[&str] = &["python", "py", "python3"];

struct Fence<'a> {
    tag: String,
    body: Vec<&'a str>,
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn fences(text: &str) -> Vec<Fence<'_>> {
    let mut out = Vec::new();
    let mut current: Option<Fence<'_>> = None;

    for line in text.lines() {
        match current.take() {
            None => {
                if is_fence(line) {
                    let tag = line.trim_start().trim_start_matches('`').trim().to_lowercase();
                    current = Some(Fence { tag, body: Vec::new() });
                }
            }
            Some(mut fence) => {
                if is_fence(line) {
                    out.push(fence);
                } else {
                    fence.body.push(line);
                    current = Some(fence);
                }
            }
        }
    }
    // An unterminated fence runs to the end of the reply
    if let Some(fence) = current {
        out.push(fence);
    }
    out
}

fn normalize(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let lines = &lines[start..];

    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let dedented: Vec<&str> = lines
        .iter()
        .map(|l| if l.trim().is_empty() { "" } else { l.get(indent..).unwrap_or(l.trim_start()) })
        .collect();

    dedented.join("\n").trim_end().to_string()
}

/// Extract the code candidate from a planner reply.
pub fn extract_code(text: &str) -> String {
    let fences = fences(text);

    let chosen = fences
        .iter()
        .find(|f| PYTHON_TAGS.contains(&f.tag.as_str()))
        .or_else(|| fences.first());

    match chosen {
        Some(fence) => normalize(&fence.body),
        None => normalize(&text.lines().collect::<Vec<_>>()),
    }
}

fn solve_def() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:async[ \t]+)?def[ \t]+solve[ \t]*\(").ok())
        .as_ref()
}

/// The text between the parentheses opened just before `from`, honouring
/// nested brackets and string literals.
fn parameter_list(code: &str, from: usize) -> Option<&str> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in code[from..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&code[from..from + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas at nesting depth zero.
fn split_parameters(params: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for c in params.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out.into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parameter_is_optional(param: &str) -> bool {
    // *args, **kwargs, the bare `*` separator, and the positional-only `/`
    if param.starts_with('*') || param == "/" {
        return true;
    }
    // `name=default` or `name: type = default`
    param.contains('=')
}

/// Check that `code` defines a top-level `solve` callable with no arguments.
pub fn validate(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("reply contained no code".into());
    }

    let m = solve_def()
        .and_then(|re| re.find(code))
        .ok_or_else(|| "no top-level `def solve(` or `async def solve(` found".to_string())?;

    let params = parameter_list(code, m.end())
        .ok_or_else(|| "unterminated parameter list in solve()".to_string())?;

    if let Some(required) = split_parameters(params)
        .into_iter()
        .find(|p| !parameter_is_optional(p))
    {
        return Err(format!("solve() parameter `{required}` has no default"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLVE: &str = "async def solve():\n    return 'FINAL_ANSWER: 7'";

    #[test]
    fn extracts_tagged_python_fence_with_prose() {
        let reply = format!("Here is the plan:\n```python\n{SOLVE}\n```\nThis returns 7.");
        assert_eq!(extract_code(&reply), SOLVE);
    }

    #[test]
    fn prefers_python_fence_over_earlier_fence() {
        let reply = format!("```text\nnot code\n```\n```py\n{SOLVE}\n```");
        assert_eq!(extract_code(&reply), SOLVE);
    }

    #[test]
    fn falls_back_to_first_fence() {
        let reply = format!("```\n{SOLVE}\n```");
        assert_eq!(extract_code(&reply), SOLVE);
    }

    #[test]
    fn falls_back_to_whole_text() {
        assert_eq!(extract_code(&format!("\n\n{SOLVE}\n\n")), SOLVE);
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let reply = format!("```python\n{SOLVE}\n");
        assert_eq!(extract_code(&reply), SOLVE);
    }

    #[test]
    fn indented_fence_body_is_dedented() {
        let reply = "```python\n    def solve():\n        return 'FINAL_ANSWER: 1'\n```";
        assert_eq!(extract_code(reply), "def solve():\n    return 'FINAL_ANSWER: 1'");
    }

    #[test]
    fn extraction_is_idempotent() {
        let replies = [
            format!("Prose\n```python\n{SOLVE}\n```\nmore prose"),
            format!("```\n\n  {SOLVE}\n```"),
            "just some words".to_string(),
            format!("```python3\n{SOLVE}"),
            String::new(),
        ];
        for reply in replies {
            let once = extract_code(&reply);
            assert_eq!(extract_code(&once), once, "not idempotent for {reply:?}");
        }
    }

    #[test]
    fn validates_async_and_sync_solve() {
        assert!(validate(SOLVE).is_ok());
        assert!(validate("import json\n\ndef solve():\n    return 'FINAL_ANSWER: x'").is_ok());
    }

    #[test]
    fn defaults_and_varargs_are_accepted() {
        assert!(validate("async def solve(limit=5, *args, **kwargs):\n    pass").is_ok());
        assert!(validate("def solve(q: str = 'a,b', opts={'k': (1, 2)}):\n    pass").is_ok());
        assert!(validate("def solve(*, flag=False):\n    pass").is_ok());
    }

    #[test]
    fn required_parameter_is_rejected() {
        let err = validate("async def solve(query):\n    pass").unwrap_err();
        assert!(err.contains("query"));
        assert!(validate("def solve(a=1, b):\n    pass").is_err());
    }

    #[test]
    fn missing_or_nested_solve_is_rejected() {
        assert!(validate("def main():\n    pass").is_err());
        assert!(validate("class X:\n    def solve(self):\n        pass").is_err());
        assert!(validate("").is_err());
    }
}
