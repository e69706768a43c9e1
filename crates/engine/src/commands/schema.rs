//! Declared argument schema of a terminal command and the validator that
//! checks raw tokens against it.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

use tk_domain::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
    Choice(Vec<String>),
}

/// A positional argument or a `--option`.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    pub description: String,
    pub pattern: Option<Regex>,
}

impl ArgSpec {
    pub fn required(name: &str, kind: ArgKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            required: true,
            description: String::new(),
            pattern: None,
        }
    }

    pub fn optional(name: &str, kind: ArgKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Values must match `pattern` in full.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        let re = Regex::new(&anchored)
            .map_err(|e| Error::Config(format!("argument {}: bad pattern: {e}", self.name)))?;
        self.pattern = Some(re);
        Ok(self)
    }

    fn check(&self, raw: &str) -> std::result::Result<ArgValue, String> {
        let value = match &self.kind {
            ArgKind::String => ArgValue::String(raw.to_owned()),
            ArgKind::Integer => raw
                .parse::<i64>()
                .map(ArgValue::Integer)
                .map_err(|_| format!("{}: expected integer, got '{raw}'", self.name))?,
            ArgKind::Boolean => match raw {
                "true" | "yes" | "1" => ArgValue::Boolean(true),
                "false" | "no" | "0" => ArgValue::Boolean(false),
                _ => return Err(format!("{}: expected boolean, got '{raw}'", self.name)),
            },
            ArgKind::Choice(choices) => {
                if !choices.iter().any(|c| c == raw) {
                    return Err(format!(
                        "{}: expected one of {}, got '{raw}'",
                        self.name,
                        choices.join("|")
                    ));
                }
                ArgValue::String(raw.to_owned())
            }
        };
        if let Some(re) = &self.pattern {
            if !re.is_match(raw) {
                return Err(format!("{}: '{raw}' does not match {}", self.name, re.as_str()));
            }
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

/// Validated arguments keyed by declared name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedArgs {
    values: HashMap<String, ArgValue>,
}

impl ParsedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            ArgValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Boolean(true)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Check raw tokens against positional `args` and `--options`.
///
/// Options take `--name=value` or `--name value`; a boolean option given
/// bare (`--force`) is `true`.  Every problem is collected, not just the
/// first.
pub fn validate_args(
    args: &[ArgSpec],
    options: &[ArgSpec],
    tokens: &[String],
) -> std::result::Result<ParsedArgs, Vec<String>> {
    let mut failures = Vec::new();
    let mut parsed = ParsedArgs::default();
    let mut positionals = Vec::new();

    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        let Some(flag) = token.strip_prefix("--") else {
            positionals.push(token.as_str());
            continue;
        };
        let (name, inline) = match flag.split_once('=') {
            Some((n, v)) => (n, Some(v.to_owned())),
            None => (flag, None),
        };
        let Some(spec) = options.iter().find(|o| o.name == name) else {
            failures.push(format!("unknown option --{name}"));
            continue;
        };
        let raw = match inline {
            Some(v) => v,
            None if spec.kind == ArgKind::Boolean => "true".to_owned(),
            None => match iter.next_if(|t| !t.starts_with("--")) {
                Some(v) => v.clone(),
                None => {
                    failures.push(format!("--{name}: missing value"));
                    continue;
                }
            },
        };
        match spec.check(&raw) {
            Ok(v) => {
                parsed.values.insert(spec.name.clone(), v);
            }
            Err(e) => failures.push(e),
        }
    }

    for (i, spec) in args.iter().enumerate() {
        match positionals.get(i) {
            Some(raw) => match spec.check(raw) {
                Ok(v) => {
                    parsed.values.insert(spec.name.clone(), v);
                }
                Err(e) => failures.push(e),
            },
            None if spec.required => failures.push(format!("missing required argument <{}>", spec.name)),
            None => {}
        }
    }
    if positionals.len() > args.len() {
        failures.push(format!(
            "unexpected argument(s): {}",
            positionals[args.len()..].join(" ")
        ));
    }

    for spec in options {
        if spec.required && !parsed.values.contains_key(&spec.name) {
            failures.push(format!("missing required option --{}", spec.name));
        }
    }

    if failures.is_empty() {
        Ok(parsed)
    } else {
        Err(failures)
    }
}
