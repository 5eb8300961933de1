//! INI-style settings files
//!
//! ```ini
//! [__root__]
//! retries = 3
//!
//! [database]
//! max_retries = 5
//! ```
//!
//! Single-segment keys live in the reserved `__root__` section; longer keys
//! use their first segment as the section and the remaining segments joined
//! by the join character as the entry name. Values that would not survive a
//! plain `name = value` line (surrounding whitespace, line breaks, a leading
//! quote) are written as JSON string literals and unquoted on load.

use std::path::Path;

use crate::backends::{read_to_string, Backend, RawMap};
use crate::error::{StorageError, StorageResult};
use crate::keys::{KeyPath, KeySyntax};
use crate::types::ConfigFormat;

/// Section holding single-segment keys
pub const ROOT_SECTION: &str = "__root__";

/// An ordered INI document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

/// One `[name]` section with its entries in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl IniDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse document text; `path` labels errors
    pub fn parse(text: &str, path: &Path) -> StorageResult<Self> {
        let mut doc = IniDocument::new();
        let mut current: Option<usize> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(inner) = line.strip_prefix('[') {
                let name = inner.strip_suffix(']').ok_or_else(|| {
                    StorageError::parse_error(
                        path,
                        "INI",
                        format!("line {}: unterminated section header", idx + 1),
                    )
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(StorageError::parse_error(
                        path,
                        "INI",
                        format!("line {}: empty section name", idx + 1),
                    ));
                }
                current = Some(doc.section_index(name));
                continue;
            }

            let split_at = line.find('=').or_else(|| line.find(':')).ok_or_else(|| {
                StorageError::parse_error(
                    path,
                    "INI",
                    format!("line {}: expected 'name = value'", idx + 1),
                )
            })?;
            let name = line[..split_at].trim();
            let value = line[split_at + 1..].trim();
            if name.is_empty() {
                return Err(StorageError::parse_error(
                    path,
                    "INI",
                    format!("line {}: entry without a name", idx + 1),
                ));
            }
            let section = current.ok_or_else(|| {
                StorageError::parse_error(
                    path,
                    "INI",
                    format!("line {}: entry outside of any section", idx + 1),
                )
            })?;
            let value = decode_value(value).map_err(|message| {
                StorageError::parse_error(path, "INI", format!("line {}: {}", idx + 1, message))
            })?;
            doc.sections[section].set(name, value);
        }

        Ok(doc)
    }

    /// Render to text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (name, value) in &section.entries {
                out.push_str(name);
                out.push_str(" = ");
                out.push_str(&encode_value(value));
                out.push('\n');
            }
        }
        out
    }

    /// Sections in order
    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    /// Look up a section
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Append an entry, creating the section when needed
    pub fn set(&mut self, section: &str, name: &str, value: impl Into<String>) {
        let idx = self.section_index(section);
        self.sections[idx].set(name, value.into());
    }

    /// Ensure a section exists, even if empty
    pub fn ensure_section(&mut self, name: &str) {
        self.section_index(name);
    }

    fn section_index(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(IniSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        }
    }
}

impl IniSection {
    /// Look up an entry
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, name: &str, value: String) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }
}

fn needs_quoting(value: &str) -> bool {
    value.trim() != value || value.contains(['\n', '\r']) || value.starts_with('"')
}

fn encode_value(value: &str) -> String {
    if needs_quoting(value) {
        // Serializing a &str to JSON cannot fail
        serde_json::to_string(value).unwrap_or_default()
    } else {
        value.to_string()
    }
}

fn decode_value(value: &str) -> Result<String, String> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        serde_json::from_str::<String>(value).map_err(|e| format!("bad quoted value: {}", e))
    } else {
        Ok(value.to_string())
    }
}

/// Backend for `.ini` settings files
pub struct IniBackend {
    syntax: KeySyntax,
}

impl IniBackend {
    pub fn new(syntax: KeySyntax) -> Self {
        Self { syntax }
    }

    fn build_document(&self, data: &RawMap) -> IniDocument {
        let mut doc = IniDocument::new();
        // Root entries first, then sections in key order
        for (key, value) in data.iter().filter(|(k, _)| k.len() == 1) {
            doc.set(ROOT_SECTION, key.head(), value.clone());
        }
        for (key, value) in data.iter().filter(|(k, _)| k.len() > 1) {
            doc.set(key.head(), &self.syntax.join(key.tail()), value.clone());
        }
        doc
    }

    fn collect_entries(&self, doc: &IniDocument, path: &Path) -> StorageResult<RawMap> {
        let mut data = RawMap::new();
        for section in doc.sections() {
            for (name, value) in &section.entries {
                let key = if section.name == ROOT_SECTION {
                    self.syntax.parse(name)
                } else {
                    self.syntax
                        .parse(&section.name)
                        .and_then(|prefix| self.syntax.parse_under(prefix.segments(), name))
                };
                let key: KeyPath = key.map_err(|e| {
                    StorageError::parse_error(path, "INI", format!("[{}] {}: {}", section.name, name, e))
                })?;
                data.insert(key, value.clone());
            }
        }
        Ok(data)
    }
}

impl Backend for IniBackend {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Ini
    }

    fn load(&self, path: &Path) -> StorageResult<RawMap> {
        match read_to_string(path)? {
            Some(text) => self.collect_entries(&IniDocument::parse(&text, path)?, path),
            None => Ok(RawMap::new()),
        }
    }

    fn render(&self, data: &RawMap) -> StorageResult<String> {
        Ok(self.build_document(data).render())
    }
}
