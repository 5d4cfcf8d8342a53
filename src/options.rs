//! Textual `module:key=value` options.
//!
//! Filters and formats accept tuning knobs as a comma-separated option
//! string, for example:
//!
//! ```text
//! gzip:compression-level=9,tar:format=ustar,!timestamp
//! ```
//!
//! Each item is `[module:]key[=value]`. A bare `key` means `true` and `!key`
//! means `false`. Items without a module apply to every module.
//!
//! Modules silently ignore keys they do not know, unless they validate
//! strictly; a strict module rejects unknown keys addressed to it with
//! [`Error::InvalidOption`].
//!
//! ```rust
//! use arcstream::options::{OptionSet, OptionValue};
//!
//! let opts = OptionSet::parse("gzip:compression-level=9,!timestamp").unwrap();
//! let gzip = opts.for_module("gzip");
//! assert_eq!(gzip.get("compression-level"), Some(&OptionValue::Text("9".into())));
//! assert_eq!(gzip.get("timestamp"), Some(&OptionValue::Flag(false)));
//! assert_eq!(opts.for_module("bzip2").get("compression-level"), None);
//! ```

use std::fmt;

use crate::{Error, Result};

/// The value of one option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// `key` (true) or `!key` (false).
    Flag(bool),
    /// `key=value`.
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Flag(b) => write!(f, "{}", b),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// One parsed option item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionEntry {
    /// Target module, or `None` for every module.
    pub module: Option<String>,
    /// Option key.
    pub key: String,
    /// Option value.
    pub value: OptionValue,
}

/// An ordered collection of options. Later items override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    entries: Vec<OptionEntry>,
}

impl OptionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-separated option string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for items with an empty module or key.
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = Self::new();
        set.extend_from_str(text)?;
        Ok(set)
    }

    /// Parses `text` and appends its items.
    pub fn extend_from_str(&mut self, text: &str) -> Result<()> {
        for item in text.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            self.entries.push(parse_item(item)?);
        }
        Ok(())
    }

    /// Adds one option. `module = None` addresses every module.
    pub fn set(&mut self, module: Option<&str>, key: &str, value: OptionValue) {
        self.entries.push(OptionEntry {
            module: module.map(str::to_string),
            key: key.to_string(),
            value,
        });
    }

    /// Returns all items in order.
    pub fn entries(&self) -> &[OptionEntry] {
        &self.entries
    }

    /// Returns true if no options are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the view of the options that apply to `module`.
    pub fn for_module<'a>(&'a self, module: &'a str) -> ModuleOptions<'a> {
        ModuleOptions { set: self, module }
    }
}

fn parse_item(item: &str) -> Result<OptionEntry> {
    let invalid = |module: &str, key: &str, reason: &str| Error::InvalidOption {
        module: module.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let (module, rest) = match item.split_once(':') {
        Some((m, r)) => {
            let m = m.trim();
            if m.is_empty() {
                return Err(invalid("", r, "empty module name"));
            }
            (Some(m.to_string()), r.trim())
        }
        None => (None, item),
    };
    let module_label = module.clone().unwrap_or_else(|| "*".to_string());

    let (key, value) = if let Some(key) = rest.strip_prefix('!') {
        if key.contains('=') {
            return Err(invalid(&module_label, key, "negated option cannot take a value"));
        }
        (key.trim(), OptionValue::Flag(false))
    } else {
        match rest.split_once('=') {
            Some((k, v)) => (k.trim(), OptionValue::Text(v.trim().to_string())),
            None => (rest, OptionValue::Flag(true)),
        }
    };
    if key.is_empty() {
        return Err(invalid(&module_label, key, "empty option key"));
    }
    Ok(OptionEntry {
        module,
        key: key.to_string(),
        value,
    })
}

/// The options of an [`OptionSet`] that apply to one module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleOptions<'a> {
    set: &'a OptionSet,
    module: &'a str,
}

impl<'a> ModuleOptions<'a> {
    fn applicable(&self) -> impl Iterator<Item = &'a OptionEntry> + 'a {
        let module = self.module;
        self.set
            .entries
            .iter()
            .filter(move |e| e.module.as_deref().is_none_or(|m| m == module))
    }

    /// Returns the module name.
    pub fn module(&self) -> &str {
        self.module
    }

    /// Returns the last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&'a OptionValue> {
        self.applicable()
            .filter(|e| e.key == key)
            .last()
            .map(|e| &e.value)
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> Error {
        Error::InvalidOption {
            module: self.module.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns a boolean option.
    ///
    /// Accepts `key`, `!key` and `key=1|0|true|false|yes|no|on|off`.
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Flag(b)) => Ok(Some(*b)),
            Some(OptionValue::Text(v)) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(self.invalid(key, format!("'{}' is not a boolean", v))),
            },
        }
    }

    /// Returns a text option. A bare `key` or `!key` is rejected.
    pub fn text(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Text(v)) => Ok(Some(v.as_str())),
            Some(OptionValue::Flag(_)) => Err(self.invalid(key, "a value is required")),
        }
    }

    /// Returns an integer option within `min..=max`.
    pub fn uint(&self, key: &str, min: u32, max: u32) -> Result<Option<u32>> {
        let Some(text) = self.text(key)? else {
            return Ok(None);
        };
        let value: u32 = text
            .parse()
            .map_err(|_| self.invalid(key, format!("'{}' is not a number", text)))?;
        if value < min || value > max {
            return Err(self.invalid(
                key,
                format!("{} is outside the range {}..={}", value, min, max),
            ));
        }
        Ok(Some(value))
    }

    /// Rejects options addressed explicitly to this module whose key is not in `known`.
    ///
    /// Options without a module are not checked; other modules may claim them.
    pub fn reject_unknown(&self, known: &[&str]) -> Result<()> {
        for entry in &self.set.entries {
            if entry.module.as_deref() == Some(self.module) && !known.contains(&entry.key.as_str())
            {
                return Err(self.invalid(&entry.key, "unknown option"));
            }
        }
        Ok(())
    }
}
