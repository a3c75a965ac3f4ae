/*!
 libapp_parser parses the key-value configuration files libapp uses to
 describe application interfaces.

 A file is a sequence of `[section]` headers and `key=value` entries.
 Lines starting with `#` or `;` are comments. Entries appearing before the
 first header belong to the unnamed section `""`.

 # Examples

 ```rust
 use libapp_parser::Config;
 let config = Config::from_string("
 service=Calculator

 ## Adds two numbers
 [call::add]
 ret=INT32
 arg1=INT32,a
 arg2=INT32,b
 ").unwrap();
 assert_eq!(config.get("", "service"), Some("Calculator"));
 assert_eq!(config.get("call::add", "arg2"), Some("INT32,b"));
 ```
!*/

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

mod config_grammar;
mod format;


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("syntax error at line {line}, column {column}: expected {expected}")]
    Parse {
        line: usize,
        column: usize,
        expected: String,
    },
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One logical line of a configuration file, as produced by the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Blank,
    Section(&'a str),
    Entry(&'a str, &'a str),
}

/// A named group of `key=value` entries.
///
/// Keys keep the order in which they first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    entries: BTreeMap<String, String>,
    keys: Vec<String>,
}

impl Section {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Section {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Set `key` to `value`, replacing any previous value but keeping the
    /// key's original position.
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.entries.insert(key, value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .filter_map(move |k| self.entries.get(k).map(|v| (k.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    sections: BTreeMap<String, Section>,
    section_keys: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_string(s: &str) -> Result<Self> {
        let lines = config_grammar::config(s).map_err(|e| Error::Parse {
            line: e.location.line,
            column: e.location.column,
            expected: e.expected.to_string(),
        })?;

        let mut config = Config::new();
        let mut current = String::new();

        for line in lines {
            match line {
                Line::Blank => {}
                Line::Section(name) => {
                    current = name.to_string();
                    config.section_mut(&current);
                }
                Line::Entry(key, value) => config.set(&current, key, value),
            }
        }

        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buffer = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_string(&buffer)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn set<V: Into<String>>(&mut self, section: &str, key: &str, value: V) {
        self.section_mut(section).set(key, value);
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        if !self.sections.contains_key(name) {
            self.section_keys.push(name.to_string());
        }
        self.sections
            .entry(name.to_string())
            .or_insert_with(|| Section::new(name))
    }

    /// All sections in the order they first appeared.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.section_keys
            .iter()
            .filter_map(move |k| self.sections.get(k))
    }

    /// Sections whose name starts with `prefix`, paired with the remainder
    /// of the name.
    ///
    /// ```rust
    /// # use libapp_parser::Config;
    /// let config = Config::from_string("[call::ping]\n[callback::pong]\n").unwrap();
    /// let calls: Vec<_> = config.sections_with_prefix("call::").map(|(n, _)| n).collect();
    /// assert_eq!(calls, vec!["ping"]);
    /// ```
    pub fn sections_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Section)> + 'a {
        self.sections()
            .filter_map(move |s| s.name.strip_prefix(prefix).map(|rest| (rest, s)))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(Section::is_empty)
    }
}

impl TryFrom<&str> for Config {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Config::from_string(value)
    }
}
