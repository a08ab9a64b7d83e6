//! Line-level YAML lexing helpers.

use serde_yaml::Value;

/// Characters that cannot start a plain scalar.
const INDICATORS: &[char] = &[
    '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@', '`',
];

/// YAML 1.1 booleans still honoured by many consumers.
const LEGACY_BOOLS: &[&str] = &[
    "y", "Y", "yes", "Yes", "YES", "n", "N", "no", "No", "NO", "on", "On", "ON", "off", "Off",
    "OFF",
];

pub fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Blank and comment-only lines carry no structure.
pub fn is_trivia(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// `- item` (or a bare `-`) sequence entry.
pub fn is_sequence_item(content: &str) -> bool {
    content == "-" || content.starts_with("- ")
}

/// Document start (`---`) or end (`...`) marker.
pub fn is_document_marker(line: &str) -> bool {
    ["---", "..."].iter().any(|marker| {
        line.strip_prefix(marker)
            .map(|rest| rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t'))
            .unwrap_or(false)
    })
}

/// Splits a mapping entry line (without indentation) into its unquoted key
/// and the byte length of `key:`. Returns `None` if the line is not a
/// `key: value` entry.
pub fn split_key(content: &str) -> Option<(String, usize)> {
    let first = content.chars().next()?;

    if first == '"' || first == '\'' {
        let (key, len) = quoted_prefix(content)?;
        let after = content[len..].trim_start_matches(' ');
        let spaces = content.len() - len - after.len();
        if !after.starts_with(':') {
            return None;
        }
        let rest = &after[1..];
        if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')) {
            return None;
        }
        return Some((key, len + spaces + 1));
    }

    if INDICATORS.contains(&first) && !indicator_starts_plain(content) {
        return None;
    }

    let bytes = content.as_bytes();
    for (idx, c) in content.char_indices() {
        match c {
            '#' if idx > 0 && bytes[idx - 1] == b' ' => return None,
            ':' => {
                let next = bytes.get(idx + 1);
                if next.is_none() || next == Some(&b' ') || next == Some(&b'\t') {
                    let key = content[..idx].trim_end();
                    if key.is_empty() {
                        return None;
                    }
                    return Some((key.to_string(), idx + 1));
                }
            }
            _ => {}
        }
    }

    None
}

/// `-`, `?` and `:` start a plain scalar when a non-space character follows.
fn indicator_starts_plain(content: &str) -> bool {
    let mut chars = content.chars();
    matches!(chars.next(), Some('-' | '?' | ':'))
        && matches!(chars.next(), Some(c) if !c.is_whitespace())
}

/// Parses a quoted scalar at the start of `content`; returns its value and
/// the byte length including quotes.
fn quoted_prefix(content: &str) -> Option<(String, usize)> {
    let quote = content.chars().next()?;
    let mut value = String::new();
    let mut chars = content.char_indices().skip(1).peekable();

    while let Some((idx, c)) = chars.next() {
        if quote == '\'' {
            if c == '\'' {
                if let Some((_, '\'')) = chars.peek() {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                return Some((value, idx + 1));
            }
            value.push(c);
            continue;
        }

        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '0' => '\0',
                    other => other,
                });
            }
            '"' => return Some((value, idx + 1)),
            c => value.push(c),
        }
    }

    None
}

/// Splits text after `key:` into value and trailing comment (with its
/// leading whitespace). Quote-aware.
pub fn split_comment(rest: &str) -> (&str, &str) {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut prev_space = true;

    for (idx, c) in rest.char_indices() {
        if in_double {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_double = false;
            }
        } else if in_single {
            if c == '\'' {
                in_single = false;
            }
        } else {
            match c {
                '"' if prev_space => in_double = true,
                '\'' if prev_space => in_single = true,
                '#' if prev_space => {
                    let value = &rest[..idx];
                    let trimmed = value.trim_end();
                    return (trimmed, &rest[trimmed.len()..]);
                }
                _ => {}
            }
        }
        prev_space = c == ' ' || c == '\t';
    }

    (rest.trim_end(), "")
}

/// Whether a value is only node properties (anchors, tags), which may be
/// followed by a block collection on the next lines.
pub fn is_node_properties(value: &str) -> bool {
    !value.is_empty()
        && value
            .split_whitespace()
            .all(|token| token.starts_with('&') || token.starts_with('!'))
}

/// Anchors and tags leading an inline value that still hold once the value
/// becomes a string. Core tags other than `!!str` are dropped.
pub fn string_properties(value: &str) -> Vec<&str> {
    value
        .split_whitespace()
        .take_while(|token| token.starts_with('&') || token.starts_with('!'))
        .filter(|token| !token.starts_with("!!") || *token == "!!str")
        .collect()
}

/// Renders a string as a YAML scalar that reads back as the same string:
/// plain when unambiguous, double-quoted otherwise.
pub fn format_scalar(value: &str) -> String {
    if is_plain_safe(value) {
        value.to_string()
    } else {
        serde_json::Value::String(value.to_string()).to_string()
    }
}

fn is_plain_safe(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return false;
    };

    if INDICATORS.contains(&first)
        || value != value.trim()
        || value.ends_with(':')
        || value.contains(": ")
        || value.contains(" #")
        || value.chars().any(char::is_control)
        || LEGACY_BOOLS.contains(&value)
        || looks_numeric(value)
    {
        return false;
    }

    matches!(serde_yaml::from_str::<Value>(value), Ok(Value::String(s)) if s == value)
}

/// Numbers in any YAML version's sense (`1_000`, `1:30`, `0x1f`, `.5`, `+1`).
fn looks_numeric(value: &str) -> bool {
    let body = value.trim_start_matches(['+', '-']);
    let Some(first) = body.chars().next() else {
        return false;
    };

    (first.is_ascii_digit() || (first == '.' && body.len() > 1))
        && body
            .chars()
            .all(|c| c.is_ascii_hexdigit() || matches!(c, '_' | '.' | ':' | 'x' | 'o' | 'e' | 'E' | '+' | '-'))
}
