//! Line-based model of a block-style YAML document.
//!
//! Only the structure needed to walk mapping keys is parsed; every other
//! line (comments, blank lines, sequences, block scalars, later documents)
//! is carried verbatim, so rendering an untouched document reproduces it.

use std::fmt;

use super::scalar::{
    format_scalar, indent_of, is_document_marker, is_node_properties, is_sequence_item,
    is_trivia, split_comment, split_key, string_properties,
};
use super::{Result, YamlPatchError};

const DEFAULT_INDENT_STEP: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    /// Inline value (possibly empty) plus any continuation lines.
    Scalar(Vec<String>),
    Mapping(Mapping),
    /// Block collection that is not a mapping, e.g. a sequence.
    Nested(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    leading: Vec<String>,
    indent: usize,
    /// Indentation, key and colon.
    head: String,
    key: String,
    /// Everything after the colon on the key line.
    rest: String,
    value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mapping {
    indent: usize,
    entries: Vec<Entry>,
    trailing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Root {
    Empty(Vec<String>),
    Mapping(Mapping),
    Other(Vec<String>),
}

/// First document of a YAML file, plus whatever surrounds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlDocument {
    preamble: Vec<String>,
    root: Root,
    epilogue: Vec<String>,
    indent_step: usize,
}

impl YamlDocument {
    /// Builds the line model. The input is expected to be valid YAML.
    pub(crate) fn from_lines(input: &str) -> Self {
        let lines: Vec<String> = input
            .lines()
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();

        let mut preamble = Vec::new();
        let mut start = 0;
        let mut seen_marker = false;
        while start < lines.len() {
            let line = &lines[start];
            if is_trivia(line) || line.starts_with('%') {
                preamble.push(line.clone());
            } else if line.starts_with("---") && is_document_marker(line) && !seen_marker {
                let (_, after) = line.split_at(3);
                if !is_trivia(after) {
                    break;
                }
                seen_marker = true;
                preamble.push(line.clone());
            } else {
                break;
            }
            start += 1;
        }

        // A bare marker here opens the second document: the first is empty.
        let search_from = match lines.get(start) {
            Some(line) if is_document_marker(line) && is_trivia(&line[3..]) => start,
            _ => start + 1,
        };
        let end = (search_from..lines.len())
            .find(|&i| is_document_marker(&lines[i]))
            .unwrap_or(lines.len())
            .max(start);

        let body = lines[start..end].to_vec();
        let epilogue = lines[end..].to_vec();

        let root = if body.iter().all(|l| is_trivia(l)) {
            Root::Empty(body)
        } else {
            match parse_mapping(&body) {
                Some(mapping) => Root::Mapping(mapping),
                None => Root::Other(body),
            }
        };

        let indent_step = match &root {
            Root::Mapping(mapping) => mapping.indent_step().unwrap_or(DEFAULT_INDENT_STEP),
            _ => DEFAULT_INDENT_STEP,
        };

        Self {
            preamble,
            root,
            epilogue,
            indent_step,
        }
    }

    /// Sets the value at `path` to the string `value`, creating missing
    /// mappings and replacing non-mapping nodes on the way. A mapping whose
    /// layout the line model cannot walk is never replaced: that is an
    /// [`YamlPatchError::Unsupported`] error and the document is unchanged.
    pub(crate) fn set(&mut self, path: &[&str], value: &str) -> Result<()> {
        if let Root::Other(lines) = &self.root {
            if holds_unwalked_mapping(lines) {
                return Err(YamlPatchError::Unsupported(path.join("/")));
            }
        }

        let mut mapping = match std::mem::replace(&mut self.root, Root::Empty(Vec::new())) {
            Root::Mapping(mapping) => mapping,
            Root::Empty(lines) => Mapping {
                indent: 0,
                entries: Vec::new(),
                trailing: lines,
            },
            Root::Other(lines) => {
                flow_to_block(&lines.join("\n"), 0).unwrap_or_else(|| Mapping::empty(0))
            }
        };
        let result = mapping.set(path, value, self.indent_step);
        self.root = Root::Mapping(mapping);
        result
    }
}

impl fmt::Display for YamlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::new();
        out.extend(self.preamble.iter().cloned());
        match &self.root {
            Root::Empty(lines) | Root::Other(lines) => out.extend(lines.iter().cloned()),
            Root::Mapping(mapping) => mapping.render(&mut out),
        }
        out.extend(self.epilogue.iter().cloned());

        for line in out {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

impl Mapping {
    fn empty(indent: usize) -> Self {
        Self {
            indent,
            entries: Vec::new(),
            trailing: Vec::new(),
        }
    }

    fn position_or_insert(&mut self, key: &str, step: usize) -> usize {
        if let Some(idx) = self.entries.iter().position(|e| e.key == key) {
            return idx;
        }

        self.entries.push(Entry {
            leading: Vec::new(),
            indent: self.indent,
            head: format!("{}{}:", " ".repeat(self.indent), format_scalar(key)),
            key: key.to_string(),
            rest: String::new(),
            value: Value::Mapping(Mapping::empty(self.indent + step)),
        });
        self.entries.len() - 1
    }

    fn set(&mut self, path: &[&str], value: &str, step: usize) -> Result<()> {
        let Some((key, rest)) = path.split_first() else {
            return Ok(());
        };

        let idx = self.position_or_insert(key, step);
        let entry = &mut self.entries[idx];
        if rest.is_empty() {
            entry.set_scalar(value);
            return Ok(());
        }

        let mut child = entry.take_mapping(step, path)?;
        let result = child.set(rest, value, step);
        entry.value = Value::Mapping(child);
        result
    }

    fn indent_step(&self) -> Option<usize> {
        self.entries.iter().find_map(|entry| match &entry.value {
            Value::Mapping(child) if child.indent > entry.indent && !child.entries.is_empty() => {
                Some(child.indent - entry.indent)
            }
            Value::Mapping(child) => child.indent_step(),
            _ => None,
        })
    }

    fn render(&self, out: &mut Vec<String>) {
        for entry in &self.entries {
            out.extend(entry.leading.iter().cloned());
            out.push(format!("{}{}", entry.head, entry.rest));
            match &entry.value {
                Value::Scalar(lines) | Value::Nested(lines) => out.extend(lines.iter().cloned()),
                Value::Mapping(child) => child.render(out),
            }
        }
        out.extend(self.trailing.iter().cloned());
    }
}

impl Entry {
    fn comment(&self) -> String {
        split_comment(&self.rest).1.to_string()
    }

    /// Replaces the value with `value`, keeping its anchor, tag and comment.
    fn set_scalar(&mut self, value: &str) {
        let (inline, comment) = split_comment(&self.rest);

        let mut rest = String::new();
        for property in string_properties(inline.trim()) {
            rest.push(' ');
            rest.push_str(property);
        }
        rest.push(' ');
        rest.push_str(&format_scalar(value));
        rest.push_str(comment);

        self.rest = rest;
        self.value = Value::Scalar(Vec::new());
    }

    /// Takes the value as a mapping, converting flow mappings and replacing
    /// anything else with an empty one. Fails, leaving the entry untouched,
    /// when the value is a mapping the line model cannot walk.
    fn take_mapping(&mut self, step: usize, path: &[&str]) -> Result<Mapping> {
        let child_indent = self.indent + step;
        let (inline, comment) = split_comment(&self.rest);
        let inline = inline.trim().to_string();
        let comment = comment.to_string();

        let converted = match &self.value {
            Value::Mapping(_) => None,
            Value::Scalar(lines) => {
                let mut text = inline.clone();
                for line in lines {
                    text.push('\n');
                    text.push_str(line);
                }
                let converted = if inline.starts_with('{') {
                    flow_to_block(&text, child_indent)
                } else {
                    None
                };
                if converted.is_none() && holds_mapping_text(&text) {
                    return Err(YamlPatchError::Unsupported(path.join("/")));
                }
                converted
            }
            Value::Nested(lines) => {
                if holds_unwalked_mapping(lines) {
                    return Err(YamlPatchError::Unsupported(path.join("/")));
                }
                None
            }
        };

        let mapping = match std::mem::replace(&mut self.value, Value::Scalar(Vec::new())) {
            Value::Mapping(mapping) => return Ok(mapping),
            _ => converted,
        };

        let properties = if is_node_properties(&inline) {
            format!(" {}", inline)
        } else {
            String::new()
        };
        self.rest = format!("{}{}", properties, comment);
        Ok(mapping.unwrap_or_else(|| Mapping::empty(child_indent)))
    }
}

/// Whether block lines the line model did not parse still hold a mapping.
fn holds_unwalked_mapping(lines: &[String]) -> bool {
    let flow = lines
        .iter()
        .find(|l| !is_trivia(l))
        .is_some_and(|l| l.trim_start().starts_with('{'));
    !flow && holds_mapping_text(&lines.join("\n"))
}

fn holds_mapping_text(text: &str) -> bool {
    fn is_mapping(value: &serde_yaml::Value) -> bool {
        match value {
            serde_yaml::Value::Mapping(_) => true,
            serde_yaml::Value::Tagged(tagged) => is_mapping(&tagged.value),
            _ => false,
        }
    }

    serde_yaml::from_str::<serde_yaml::Value>(text)
        .map(|value| is_mapping(&value))
        .unwrap_or(false)
}

/// Re-renders a flow mapping (`{a: 1}`) as block lines at `indent`.
fn flow_to_block(text: &str, indent: usize) -> Option<Mapping> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => return None,
    };
    if mapping.is_empty() {
        return Some(Mapping::empty(indent));
    }

    let block = serde_yaml::to_string(&mapping).ok()?;
    let pad = " ".repeat(indent);
    let lines: Vec<String> = block
        .lines()
        .filter(|l| !is_document_marker(l))
        .map(|l| format!("{}{}", pad, l))
        .collect();
    parse_mapping(&lines)
}

/// Parses lines as a block mapping. `None` if they are anything else.
fn parse_mapping(lines: &[String]) -> Option<Mapping> {
    let indent = indent_of(lines.iter().find(|l| !is_trivia(l))?);

    let mut entries = Vec::new();
    let mut pending = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if is_trivia(line) {
            pending.push(line.clone());
            i += 1;
            continue;
        }

        if indent_of(line) != indent {
            return None;
        }
        let (key, key_len) = split_key(&line[indent..])?;
        let split = indent + key_len;
        let (head, rest) = line.split_at(split);
        let inline = split_comment(rest).0.trim();
        let opens_block = inline.is_empty() || is_node_properties(inline);

        let mut next = i + 1;
        while next < lines.len() {
            let candidate = &lines[next];
            if !is_trivia(candidate) {
                let candidate_indent = indent_of(candidate);
                let same_level_item =
                    candidate_indent == indent && is_sequence_item(&candidate[indent..]);
                if candidate_indent <= indent && !(opens_block && same_level_item) {
                    break;
                }
            }
            next += 1;
        }

        // Trailing trivia belongs to whatever follows.
        let mut end = next;
        while end > i + 1 && is_trivia(&lines[end - 1]) {
            end -= 1;
        }
        let children = &lines[i + 1..end];

        let value = if !opens_block || children.iter().all(|l| is_trivia(l)) {
            Value::Scalar(children.to_vec())
        } else {
            match parse_mapping(children) {
                Some(child) if child.indent > indent => Value::Mapping(child),
                _ => Value::Nested(children.to_vec()),
            }
        };

        entries.push(Entry {
            leading: std::mem::take(&mut pending),
            indent,
            head: head.to_string(),
            key,
            rest: rest.to_string(),
            value,
        });
        i = end;
    }

    Some(Mapping {
        indent,
        entries,
        trailing: pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(input: &str, path: &str, value: &str) -> String {
        let mut doc = YamlDocument::from_lines(input);
        let path: Vec<&str> = path.split('/').collect();
        doc.set(&path, value).unwrap();
        doc.to_string()
    }

    #[test]
    fn test_untouched_document_round_trips() {
        let input = "# header\n---\na: 1 # one\n\nb:\n  - x\n  - y\nc: |\n  text\n\n  more\n...\n";
        assert_eq!(YamlDocument::from_lines(input).to_string(), input);
    }

    #[test]
    fn test_parse_structure() {
        let doc = YamlDocument::from_lines("a:\n  b: 1\nlist:\n- x\n");
        let Root::Mapping(root) = &doc.root else {
            panic!("expected mapping root");
        };
        assert_eq!(root.entries.len(), 2);
        assert!(matches!(root.entries[0].value, Value::Mapping(_)));
        assert!(matches!(root.entries[1].value, Value::Nested(_)));
    }

    #[test]
    fn test_set_replaces_existing_value() {
        assert_eq!(
            set("a:\n  b: \"old-value\"\n", "a/b", "new"),
            "a:\n  b: new\n"
        );
    }

    #[test]
    fn test_set_appends_nested_path() {
        assert_eq!(
            set("a:\n  b: \"old-value\"\n", "a/c/d", "new"),
            "a:\n  b: \"old-value\"\n  c:\n    d: new\n"
        );
    }

    #[test]
    fn test_set_keeps_inline_comment() {
        assert_eq!(
            set("image:\n  tag: v1 # current\n", "image/tag", "v2"),
            "image:\n  tag: v2 # current\n"
        );
    }

    #[test]
    fn test_set_follows_document_indentation() {
        assert_eq!(
            set("a:\n    b: 1\n", "a/c/d", "x"),
            "a:\n    b: 1\n    c:\n        d: x\n"
        );
    }

    #[test]
    fn test_set_on_empty_document() {
        assert_eq!(set("", "a/b", "v"), "a:\n  b: v\n");
        assert_eq!(set("# only a comment\n", "a", "v"), "# only a comment\na: v\n");
    }

    #[test]
    fn test_set_replaces_bare_scalar_root() {
        assert_eq!(set("just text\n", "a", "v"), "a: v\n");
    }

    #[test]
    fn test_set_through_scalar_replaces_it() {
        assert_eq!(set("a: 1\nb: 2\n", "a/x", "v"), "a:\n  x: v\nb: 2\n");
    }

    #[test]
    fn test_set_through_flow_mapping() {
        assert_eq!(
            set("a: {b: 1, c: 2}\n", "a/c", "v"),
            "a:\n  b: 1\n  c: v\n"
        );
    }

    #[test]
    fn test_sequence_at_key_indent_is_kept() {
        assert_eq!(
            set("items:\n- one\n- two\nimage: old\n", "image", "new"),
            "items:\n- one\n- two\nimage: new\n"
        );
    }

    #[test]
    fn test_later_documents_are_kept() {
        assert_eq!(
            set("a: 1\n---\na: 2\n", "a", "3"),
            "a: \"3\"\n---\na: 2\n"
        );
    }

    #[test]
    fn test_keys_led_by_indicators_are_kept() {
        assert_eq!(
            set("a:\n  -x: 1\n  b: old\n", "a/b", "new"),
            "a:\n  -x: 1\n  b: new\n"
        );
        assert_eq!(
            set("# keep me\n-x: 1\nb: old # inline\n", "b", "new"),
            "# keep me\n-x: 1\nb: new # inline\n"
        );
    }

    #[test]
    fn test_unwalkable_mapping_is_refused() {
        let input = "a:\n  ? complex\n  : 1\n  b: old\n";
        let mut doc = YamlDocument::from_lines(input);
        assert!(matches!(
            doc.set(&["a", "b"], "new"),
            Err(YamlPatchError::Unsupported(ref path)) if path == "a/b"
        ));
        assert_eq!(doc.to_string(), input);

        let input = "? complex\n: 1\nb: old\n";
        let mut doc = YamlDocument::from_lines(input);
        assert!(doc.set(&["b"], "new").is_err());
        assert_eq!(doc.to_string(), input);
    }

    #[test]
    fn test_set_keeps_anchor_and_tag() {
        assert_eq!(
            set("base: &t old # shared\nother: *t\n", "base", "new"),
            "base: &t new # shared\nother: *t\n"
        );
        assert_eq!(set("n: !!int 5\n", "n", "v2"), "n: v2\n");
        assert_eq!(set("s: !vault &k old\n", "s", "v2"), "s: !vault &k v2\n");
    }

    #[test]
    fn test_missing_final_newline_is_added() {
        assert_eq!(set("a: 1", "a", "x"), "a: x\n");
    }
}
