//! Literal matching of arbitrary path segments inside glob patterns.

const ESCAPE: char = '\\';

fn is_magic(ch: char) -> bool {
    matches!(ch, '*' | '?' | '[' | ']')
}

/// Escapes the glob metacharacters `*`, `?`, `[` and `]` so that they are
/// not included in any match expressions.
///
/// Every metacharacter not immediately preceded by a backslash is rewritten
/// into a single-character class (`*` becomes `[*]`), which makes the result
/// match the original path literally.
pub fn escape(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    let mut prev = None;

    for ch in path.chars() {
        if prev != Some(ESCAPE) && is_magic(ch) {
            escaped.push('[');
            escaped.push(ch);
            escaped.push(']');
        } else {
            escaped.push(ch);
        }
        prev = Some(ch);
    }

    escaped
}
