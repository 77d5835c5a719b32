//! The `contents.lr` field format.
//!
//! A content file is a sequence of field blocks separated by lines of exactly
//! three dashes:
//!
//! ```text
//! _model: blog-post
//! ---
//! title: Hello World
//! ---
//! body:
//!
//! First paragraph.
//!
//! ----
//! Dash lines inside a value carry one extra dash.
//! ```
//!
//! Single-line values sit after `key: `. Multi-line values start on the line
//! after `key:`, preceded by one blank line. A value line consisting only of
//! three or more dashes is written with one extra dash so it cannot be
//! mistaken for a separator.
//!
//! [`ContentFile`] keeps the original text of every block, so editing one
//! field rewrites that block only and every other byte of the file survives
//! untouched.

use std::fmt;

/// One block of a content file: its text and the separator line after it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    text: String,
    /// The `---` line ending this block, empty for the last block.
    separator: String,
}

impl Block {
    fn key(&self) -> Option<&str> {
        let first = self.text.lines().find(|l| !l.trim().is_empty())?;
        let (key, _) = first.split_once(':')?;
        let key = key.trim();
        crate::slug::is_valid_field_name(key).then_some(key)
    }

    fn value(&self) -> Option<String> {
        let text = self.text.trim_start_matches(['\n', '\r']);
        let (_, rest) = text.split_once(':')?;
        let (first_line, tail) = match rest.split_once('\n') {
            Some((line, tail)) => (line, tail),
            None => (rest, ""),
        };
        let inline = first_line.trim();
        let raw = if inline.is_empty() {
            // Block form: one optional blank line, then the value.
            tail.strip_prefix("\r\n")
                .or_else(|| tail.strip_prefix('\n'))
                .unwrap_or(tail)
                .to_string()
        } else if tail.trim().is_empty() {
            inline.to_string()
        } else {
            format!("{inline}\n{tail}")
        };
        let raw = raw.trim_end_matches(['\n', '\r']);
        Some(unescape(raw))
    }
}

/// A parsed content file that round-trips byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFile {
    blocks: Vec<Block>,
}

impl ContentFile {
    /// Parse content text. Parsing never fails: unrecognized blocks are kept
    /// verbatim and simply expose no field.
    pub fn parse(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut current = String::new();
        for line in text.split_inclusive('\n') {
            if is_separator(line) {
                blocks.push(Block {
                    text: std::mem::take(&mut current),
                    separator: line.to_string(),
                });
            } else {
                current.push_str(line);
            }
        }
        if !current.is_empty() {
            blocks.push(Block {
                text: current,
                separator: String::new(),
            });
        }
        Self { blocks }
    }

    /// Build a new file from fields in the given order.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut file = Self::default();
        for (key, value) in fields {
            file.set(key, value);
        }
        file
    }

    /// Value of a field, if present. The last block wins on duplicates.
    pub fn get(&self, key: &str) -> Option<String> {
        self.blocks
            .iter()
            .rev()
            .find(|b| b.key() == Some(key))
            .and_then(Block::value)
    }

    /// Whether the file declares `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.blocks.iter().any(|b| b.key() == Some(key))
    }

    /// All fields in file order.
    pub fn fields(&self) -> Vec<(String, String)> {
        self.blocks
            .iter()
            .filter_map(|b| Some((b.key()?.to_string(), b.value()?)))
            .collect()
    }

    /// Set a field, rewriting only its block. New fields are appended.
    pub fn set(&mut self, key: &str, value: &str) {
        let encoded = encode_field(key, value);
        if let Some(block) = self.blocks.iter_mut().rev().find(|b| b.key() == Some(key)) {
            block.text = encoded;
            return;
        }
        if let Some(last) = self.blocks.last_mut()
            && last.separator.is_empty()
        {
            if !last.text.ends_with('\n') {
                last.text.push('\n');
            }
            last.separator = "---\n".to_string();
        }
        self.blocks.push(Block {
            text: encoded,
            separator: String::new(),
        });
    }

    /// Remove every block declaring `key`. Returns whether anything changed.
    pub fn remove(&mut self, key: &str) -> bool {
        let mut removed = false;
        while let Some(idx) = self.blocks.iter().position(|b| b.key() == Some(key)) {
            let block = self.blocks.remove(idx);
            // The last block carries no separator; take the one before it.
            if block.separator.is_empty()
                && idx == self.blocks.len()
                && let Some(prev) = self.blocks.last_mut()
            {
                prev.separator.clear();
            }
            removed = true;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

impl fmt::Display for ContentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            f.write_str(&block.text)?;
            f.write_str(&block.separator)?;
        }
        Ok(())
    }
}

fn is_separator(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']) == "---"
}

fn is_dash_line(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

/// Encode a single field block, including its trailing newline.
pub fn encode_field(key: &str, value: &str) -> String {
    let multiline = value.contains('\n') || value.trim() != value || is_dash_line(value);
    if !multiline {
        return format!("{key}: {value}\n");
    }
    let escaped: Vec<String> = value
        .split('\n')
        .map(|line| {
            if is_dash_line(line.trim_end_matches('\r')) {
                format!("-{line}")
            } else {
                line.to_string()
            }
        })
        .collect();
    format!("{key}:\n\n{}\n", escaped.join("\n"))
}

fn unescape(raw: &str) -> String {
    raw.split('\n')
        .map(|line| {
            let bare = line.trim_end_matches('\r');
            if bare.len() > 3 && is_dash_line(bare) {
                &line[1..]
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
