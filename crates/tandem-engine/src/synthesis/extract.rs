use std::sync::LazyLock;

use regex::Regex;

const FENCE: &str = "```";

static DEF_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bdef\s+([A-Za-z0-9_]+)\s*\(").unwrap());

static TOOL_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z0-9_]+)_tool\s*=\s*[A-Za-z_][A-Za-z0-9_.]*\s*\(").unwrap());

/// Body of the first fenced block in a model reply.
///
/// The opening fence may carry a language tag. The closing fence is a line
/// holding only the three backticks, so backticks inside string literals
/// never end the block. An unclosed fence runs to the end of the text and
/// a reply without any fence is returned as is.
pub fn extract_code(text: &str) -> String {
    let mut offset = 0;
    let mut body_start = None;

    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();
        match body_start {
            None if line.trim_start().starts_with(FENCE) => body_start = Some(line_end),
            Some(start) if line.trim() == FENCE => {
                // Drop the newline that precedes the closing fence.
                let body = &text[start..offset];
                return body
                    .strip_suffix('\n')
                    .map(|b| b.strip_suffix('\r').unwrap_or(b))
                    .unwrap_or(body)
                    .to_string();
            }
            _ => {}
        }
        offset = line_end;
    }

    match body_start {
        Some(start) => text[start..].to_string(),
        None => text.to_string(),
    }
}

/// The tool's function name: the first `def`, else the prefix of the first
/// `<name>_tool = Ctor(` assignment.
pub fn extract_function_name(code: &str) -> Option<String> {
    DEF_NAME
        .captures(code)
        .or_else(|| TOOL_ASSIGNMENT.captures(code))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_exact_body() {
        let body = "def add(a, b):\n    return a + b";
        assert_eq!(extract_code(&format!("```python\n{body}\n```")), body);
        assert_eq!(extract_code(&format!("Here it is:\n```\n{body}\n```\nEnjoy.")), body);
    }

    #[test]
    fn inline_backticks_do_not_close_the_block() {
        let body = "def fence():\n    return \"```\"\nx = '``` inline'";
        assert_eq!(extract_code(&format!("```python\n{body}\n```")), body);
    }

    #[test]
    fn unclosed_fence_runs_to_end() {
        assert_eq!(extract_code("```python\ndef f():\n    pass\n"), "def f():\n    pass\n");
    }

    #[test]
    fn no_fence_is_verbatim() {
        let raw = "  def f():\n    pass  ";
        assert_eq!(extract_code(raw), raw);
    }

    #[test]
    fn first_block_wins() {
        assert_eq!(extract_code("```\nfirst\n```\n```\nsecond\n```"), "first");
    }

    #[test]
    fn crlf_fences() {
        assert_eq!(extract_code("```python\r\nx = 1\r\n```\r\n"), "x = 1");
    }

    #[test]
    fn function_name_prefers_def() {
        let code = "def count_words(text: str):\n    pass\n\ncount_words_tool = BaseTool(name='x')";
        assert_eq!(extract_function_name(code).as_deref(), Some("count_words"));
    }

    #[test]
    fn function_name_from_tool_assignment() {
        let code = "lookup_tool = tools.BaseTool(name='lookup')";
        assert_eq!(extract_function_name(code).as_deref(), Some("lookup"));
    }

    #[test]
    fn no_function_name() {
        assert_eq!(extract_function_name("print('hello')"), None);
        assert_eq!(extract_function_name("undefined(x)"), None);
    }
}
