//! Just enough Python source scanning to read a tool descriptor without
//! running anything.

use serde_json::Value;

/// Byte offsets and characters of `text` that sit outside string literals
/// and comments.
pub(crate) fn code_chars(text: &str) -> Vec<(usize, char)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '\'' | '"' => {
                let triple = text[pos..].starts_with(&quote_run(c, 3));
                i = skip_string(&chars, i, c, triple);
            }
            '#' => {
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            _ => {
                out.push((pos, c));
                i += 1;
            }
        }
    }
    out
}

/// Offset of the bracket closing the one at `open`.
pub(crate) fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (pos, c) in code_chars(&text[open..]) {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + pos);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested in brackets or strings.
pub(crate) fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (pos, c) in code_chars(text) {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(text[start..pos].trim());
                start = pos + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Convert a Python literal (strings, numbers, lists, tuples, dicts,
/// `True`/`False`/`None`) into JSON. Anything else is rejected.
pub(crate) fn literal_to_json(source: &str) -> Result<Value, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                let (content, next) = read_string(&chars, i, c, triple)?;
                out.push_str(&serde_json::to_string(&content).map_err(|e| e.to_string())?);
                i = next;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                out.push('[');
                i += 1;
            }
            ')' | ']' | '}' => {
                close(&mut out, if c == ')' { ']' } else { c });
                i += 1;
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '.' | '_')) {
                    if chars[i] != '_' {
                        out.push(chars[i]);
                    }
                    i += 1;
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => return Err(format!("unsupported expression `{other}`")),
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    serde_json::from_str(&out).map_err(|e| format!("not a literal: {e}"))
}

/// Read the string literal whose opening quote is at `start`.
/// Returns its decoded content and the index just past the closing quote.
pub(crate) fn read_string(chars: &[char], start: usize, quote: char, triple: bool) -> Result<(String, usize), String> {
    let width = if triple { 3 } else { 1 };
    let mut i = start + width;
    let mut content = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let escaped = *chars.get(i + 1).ok_or("dangling escape")?;
            match escaped {
                'n' => content.push('\n'),
                't' => content.push('\t'),
                'r' => content.push('\r'),
                '\\' | '\'' | '"' => content.push(escaped),
                '\n' => {}
                other => {
                    content.push('\\');
                    content.push(other);
                }
            }
            i += 2;
            continue;
        }
        let closes = c == quote && (!triple || (chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)));
        if closes {
            return Ok((content, i + width));
        }
        if c == '\n' && !triple {
            return Err("unterminated string".into());
        }
        content.push(c);
        i += 1;
    }
    Err("unterminated string".into())
}

fn skip_string(chars: &[(usize, char)], start: usize, quote: char, triple: bool) -> usize {
    let plain: Vec<char> = chars.iter().map(|(_, c)| *c).collect();
    match read_string(&plain, start, quote, triple) {
        Ok((_, next)) => next,
        Err(_) => chars.len(),
    }
}

fn quote_run(c: char, n: usize) -> String {
    std::iter::repeat(c).take(n).collect()
}

/// Drop a trailing comma before a closing bracket.
fn close(out: &mut String, bracket: char) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(',') {
        out.pop();
    }
    out.push(bracket);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn python_literals_to_json() {
        let src = "{'city': {'type': 'str', 'description': \"City name\",}, 'days': {'type': 'int'}}";
        assert_eq!(
            literal_to_json(src).unwrap(),
            json!({"city": {"type": "str", "description": "City name"}, "days": {"type": "int"}})
        );
        assert_eq!(literal_to_json("('a', 'b',)").unwrap(), json!(["a", "b"]));
        assert_eq!(literal_to_json("[True, None, 1_000, 2.5]").unwrap(), json!([true, null, 1000, 2.5]));
        assert_eq!(literal_to_json("'it\\'s'").unwrap(), json!("it's"));
        assert_eq!(literal_to_json("\"\"\"multi\nline\"\"\"").unwrap(), json!("multi\nline"));
    }

    #[test]
    fn rejects_expressions() {
        assert!(literal_to_json("os.getcwd()").is_err());
        assert!(literal_to_json("'a' + 'b'").is_err());
    }

    #[test]
    fn bracket_matching_ignores_strings_and_comments() {
        let text = "f(a, ')', [1, 2]  # )\n, {'k': '('})";
        assert_eq!(matching_close(text, 1), Some(text.len() - 1));
    }

    #[test]
    fn splits_only_top_level_commas() {
        let parts = split_top_level("name='a,b', parameters={'x': 1, 'y': 2}, required=['x', 'y'],");
        assert_eq!(parts, vec!["name='a,b'", "parameters={'x': 1, 'y': 2}", "required=['x', 'y']"]);
    }
}
