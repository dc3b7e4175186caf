//! Plugin option schemas and command-line parsing against them.
//!
//! A plugin declares the flags it accepts as a list of [`PluginOption`]s. At
//! invocation time the schema is turned into a `clap::Command` and the
//! effective argument vector is parsed into [`ParsedOptions`].

use std::collections::{HashMap, HashSet};

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("option declares neither a short nor a long name")]
    Unnamed,
    #[error("option name '{0}' is declared more than once")]
    DuplicateName(String),
    #[error("{0}")]
    Parse(String),
}

/// One accepted flag of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOption {
    pub short: Option<char>,
    pub long: Option<String>,
    pub description: String,
    pub has_argument: bool,
    pub required: bool,
    /// The flag may appear without its argument
    pub argument_optional: bool,
    pub argument_count: usize,
    pub value_separator: Option<char>,
}

impl PluginOption {
    fn unnamed() -> Self {
        Self {
            short: None,
            long: None,
            description: String::new(),
            has_argument: false,
            required: false,
            argument_optional: false,
            argument_count: 1,
            value_separator: None,
        }
    }

    pub fn long(name: impl Into<String>) -> Self {
        Self {
            long: Some(name.into()),
            ..Self::unnamed()
        }
    }

    pub fn short_only(name: char) -> Self {
        Self {
            short: Some(name),
            ..Self::unnamed()
        }
    }

    pub fn short(mut self, name: char) -> Self {
        self.short = Some(name);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn takes_value(mut self) -> Self {
        self.has_argument = true;
        self
    }

    pub fn optional_value(mut self) -> Self {
        self.has_argument = true;
        self.argument_optional = true;
        self
    }

    pub fn values(mut self, count: usize) -> Self {
        self.has_argument = true;
        self.argument_count = count.max(1);
        self
    }

    pub fn separator(mut self, separator: char) -> Self {
        self.value_separator = Some(separator);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Key under which the option is looked up: the long name, else the short one.
    pub fn id(&self) -> Option<String> {
        self.long
            .clone()
            .or_else(|| self.short.map(|c| c.to_string()))
    }

    fn to_arg(&self) -> Result<Arg, OptionsError> {
        let id = self.id().ok_or(OptionsError::Unnamed)?;
        let mut arg = Arg::new(id).help(self.description.clone());

        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        if let Some(long) = &self.long {
            arg = arg.long(long.clone());
        }

        if !self.has_argument {
            return Ok(arg.action(ArgAction::SetTrue).required(self.required));
        }

        let min = if self.argument_optional { 0 } else { 1 };
        arg = arg
            .action(ArgAction::Append)
            .num_args(min..=self.argument_count)
            .allow_hyphen_values(true)
            .required(self.required);
        if let Some(separator) = self.value_separator {
            arg = arg.value_delimiter(separator);
        }
        Ok(arg)
    }
}

/// Check that every option can be looked up by name and that no short or
/// long name belongs to two options.
pub fn validate_schema(schema: &[PluginOption]) -> Result<(), OptionsError> {
    let mut seen = HashSet::new();
    for option in schema {
        option.id().ok_or(OptionsError::Unnamed)?;

        let mut names: Vec<String> = option.short.iter().map(char::to_string).collect();
        names.extend(option.long.iter().cloned());
        names.dedup();
        for name in names {
            if !seen.insert(name.clone()) {
                return Err(OptionsError::DuplicateName(name));
            }
        }
    }
    Ok(())
}

/// Parse `argv` against `schema`.
pub fn parse(
    plugin: &str,
    schema: &[PluginOption],
    argv: &[String],
) -> Result<ParsedOptions, OptionsError> {
    let args = schema
        .iter()
        .map(PluginOption::to_arg)
        .collect::<Result<Vec<_>, _>>()?;

    let command = Command::new(plugin.to_string())
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args(args);

    let matches = command
        .try_get_matches_from(argv)
        .map_err(|e| OptionsError::Parse(summarize(&e.to_string())))?;

    let mut names = HashMap::new();
    for option in schema {
        let Some(id) = option.id() else { continue };
        if let Some(short) = option.short {
            names.insert(short.to_string(), (id.clone(), option.has_argument));
        }
        if let Some(long) = &option.long {
            names.insert(long.clone(), (id.clone(), option.has_argument));
        }
    }

    Ok(ParsedOptions { matches, names })
}

/// Collapse clap's multi-line error report into one line, without usage or tips.
fn summarize(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .take_while(|line| !line.starts_with("Usage:"))
        .filter(|line| !line.is_empty() && !line.starts_with("tip:"))
        .map(|line| line.strip_prefix("error: ").unwrap_or(line))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Options parsed from a command line, queried by short or long name.
#[derive(Debug, Clone)]
pub struct ParsedOptions {
    matches: ArgMatches,
    /// name -> (clap id, takes a value)
    names: HashMap<String, (String, bool)>,
}

impl ParsedOptions {
    pub fn has_option(&self, name: &str) -> bool {
        match self.names.get(name) {
            Some((id, _)) => self.matches.value_source(id) == Some(ValueSource::CommandLine),
            None => false,
        }
    }

    /// First value given for `name`, if the option takes values and has one.
    pub fn option_value(&self, name: &str) -> Option<String> {
        self.option_values(name).into_iter().next()
    }

    pub fn option_value_or(&self, name: &str, default: &str) -> String {
        self.option_value(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Every value given for `name`, in command-line order.
    pub fn option_values(&self, name: &str) -> Vec<String> {
        match self.names.get(name) {
            Some((id, true)) => self
                .matches
                .get_many::<String>(id)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
