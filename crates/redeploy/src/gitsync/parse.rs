//! Git output parsing helpers.

use std::collections::HashMap;

/// Length of an abbreviated commit hash.
pub const SHORT_HASH_LEN: usize = 7;

/// `for-each-ref` format understood by [`parse_tag_refs`].
pub const TAG_REF_FORMAT: &str = "%(objectname)|%(objecttype)|%(*objectname)|%(refname:short)";

/// Individual entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Relative file path.
    pub path: String,
    /// Status code: 'M' (modified), 'A' (added), 'D' (deleted), '?' (untracked), 'R' (renamed).
    pub status: char,
}

/// A tag as listed by `git for-each-ref refs/tags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    pub name: String,
    /// Object type the ref points at (`tag` for annotated tags, `commit` otherwise).
    pub object_type: String,
    /// Commit the tag ultimately designates.
    pub commit: String,
}

impl TagRef {
    pub fn is_annotated(&self) -> bool {
        self.object_type == "tag"
    }
}

/// Abbreviates a commit hash.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(SHORT_HASH_LEN) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

/// Parses `git status --porcelain` (v1) output.
pub fn parse_status_porcelain(text: &str) -> Vec<FileStatus> {
    let mut files = Vec::new();

    for line in text.lines() {
        if line.len() < 4 || line.starts_with("##") {
            continue;
        }

        let index_status = line.chars().next().unwrap_or(' ');
        let worktree_status = line.chars().nth(1).unwrap_or(' ');
        let file_path = line[3..].trim();

        // Handle renamed files (format: "R  old -> new")
        let path = file_path
            .rsplit(" -> ")
            .next()
            .unwrap_or(file_path)
            .trim_matches('"')
            .to_string();

        let status = if worktree_status == 'D' || index_status == 'D' {
            'D'
        } else if index_status == '?' {
            '?'
        } else if index_status != ' ' {
            index_status
        } else {
            worktree_status
        };

        files.push(FileStatus { path, status });
    }

    files
}

/// Parses `git for-each-ref --format=TAG_REF_FORMAT refs/tags` output.
pub fn parse_tag_refs(text: &str) -> Vec<TagRef> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '|');
            let object = parts.next()?.trim();
            let object_type = parts.next()?.trim();
            let peeled = parts.next()?.trim();
            let name = parts.next()?.trim();

            if object.is_empty() || name.is_empty() {
                return None;
            }

            let commit = if peeled.is_empty() { object } else { peeled };

            Some(TagRef {
                name: name.to_string(),
                object_type: object_type.to_string(),
                commit: commit.to_string(),
            })
        })
        .collect()
}

/// Maps each tagged commit to its greatest tag name.
pub fn tags_by_commit(tags: &[TagRef]) -> HashMap<String, String> {
    let mut by_commit: HashMap<String, String> = HashMap::new();

    for tag in tags {
        match by_commit.get(&tag.commit) {
            Some(prev) if prev.as_str() >= tag.name.as_str() => {}
            _ => {
                by_commit.insert(tag.commit.clone(), tag.name.clone());
            }
        }
    }

    by_commit
}

/// Greatest annotated tag name designating exactly `commit`.
pub fn exact_annotated_tag(tags: &[TagRef], commit: &str) -> Option<String> {
    tags.iter()
        .filter(|t| t.is_annotated() && t.commit == commit)
        .map(|t| t.name.clone())
        .max()
}

/// Formats a describe string for `tip`, walking `history` (tip first, in
/// committer-time order) until the first tagged commit.
pub fn describe_from<'a, I>(tip: &str, history: I, tags: &HashMap<String, String>) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let short = short_hash(tip);

    for (depth, commit) in history.into_iter().enumerate() {
        if let Some(tag) = tags.get(commit) {
            return if depth == 0 {
                tag.clone()
            } else {
                format!("{}-{}-g{}", tag, depth, short)
            };
        }
    }

    short.to_string()
}

/// First line of a commit message.
pub fn subject_line(message: &str) -> &str {
    message.lines().next().unwrap_or("").trim()
}
