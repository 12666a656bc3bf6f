//! Typed plugin parameters and the ordered dictionary that validates
//! `name=value` argument lists against them.
//!
//! Parameter values are kept as [`serde_json::Value`] so a parsed record
//! can be stored in the history table and replayed unchanged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::suggest::similar_names;

/// A parsed plugin configuration: parameter name → value.
pub type ConfigRecord = Map<String, Value>;

const TRUE_WORDS: &[&str] = &["true", "t", "yes", "y", "on", "1"];
const FALSE_WORDS: &[&str] = &["false", "f", "no", "n", "off", "0"];

/// Semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    Long,
    Float,
    #[serde(alias = "boolean")]
    Bool,
    File,
    Directory,
    InputDirectory,
    Date,
    Range,
    SolrField,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Long => "long",
            ParameterType::Float => "float",
            ParameterType::Bool => "bool",
            ParameterType::File => "file",
            ParameterType::Directory => "directory",
            ParameterType::InputDirectory => "input_directory",
            ParameterType::Date => "date",
            ParameterType::Range => "range",
            ParameterType::SolrField => "solr_field",
        }
    }
}

/// What changing a parameter affects. Only `AffectsValues` parameters
/// take part in similar-run detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    #[default]
    AffectsValues,
    AffectsPlots,
    NoEffects,
}

impl Impact {
    pub fn as_i64(self) -> i64 {
        match self {
            Impact::AffectsValues => 0,
            Impact::AffectsPlots => 5,
            Impact::NoEffects => 9,
        }
    }
}

fn one() -> usize {
    1
}

fn comma() -> String {
    ",".to_string()
}

/// A declared plugin parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default = "one")]
    pub max_items: usize,
    #[serde(default = "comma")]
    pub item_separator: String,
    #[serde(default)]
    pub print_format: Option<String>,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub help: String,
    /// Index field name, for `SolrField` parameters.
    #[serde(default)]
    pub facet: Option<String>,
}

impl Parameter {
    pub fn new(name: &str, kind: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mandatory: false,
            default: None,
            regex: None,
            max_items: 1,
            item_separator: comma(),
            print_format: None,
            impact: Impact::default(),
            help: String::new(),
            facet: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_regex(mut self, regex: &str) -> Self {
        self.regex = Some(regex.to_string());
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn with_impact(mut self, impact: Impact) -> Self {
        self.impact = impact;
        self
    }

    pub fn is_list(&self) -> bool {
        self.max_items > 1
    }

    /// Parse a raw value into this parameter's type.
    ///
    /// Strings for list parameters are split on `item_separator`; arrays
    /// are parsed item by item. A list that is longer than `max_items` is
    /// rejected, and a scalar parameter only accepts a one-element list.
    pub fn parse(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                if !self.is_list() {
                    return match items.as_slice() {
                        [single] => self.parse_item(single),
                        _ => Err(self.too_many(items.len())),
                    };
                }
                if items.len() > self.max_items {
                    return Err(self.too_many(items.len()));
                }
                items
                    .iter()
                    .map(|item| self.parse_item(item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            Value::String(s) if self.is_list() => {
                let items: Vec<&str> = s
                    .split(self.item_separator.as_str())
                    .map(str::trim)
                    .filter(|i| !i.is_empty())
                    .collect();
                if items.len() > self.max_items {
                    return Err(self.too_many(items.len()));
                }
                items
                    .into_iter()
                    .map(|i| self.parse_str(i))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            other => self.parse_item(other),
        }
    }

    fn parse_item(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.parse_str(s),
            Value::Null => Ok(Value::Null),
            Value::Array(_) | Value::Object(_) => Err(Error::Validation(format!(
                "Parameter '{}' expects a single {} value",
                self.name,
                self.kind.as_str()
            ))),
            other => self.parse_str(&other.to_string()),
        }
    }

    /// Coerce one string item, then apply the regex to its string form.
    pub fn parse_str(&self, raw: &str) -> Result<Value> {
        let raw = raw.trim();
        let invalid = || {
            Error::Validation(format!(
                "Invalid value '{}' for parameter '{}' of type {}",
                raw,
                self.name,
                self.kind.as_str()
            ))
        };

        let value = match self.kind {
            ParameterType::Integer => Value::from(raw.parse::<i32>().map_err(|_| invalid())?),
            ParameterType::Long => Value::from(raw.parse::<i64>().map_err(|_| invalid())?),
            ParameterType::Float => {
                let f = raw.parse::<f64>().map_err(|_| invalid())?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(invalid)?
            }
            ParameterType::Bool => {
                let lower = raw.to_lowercase();
                if TRUE_WORDS.contains(&lower.as_str()) {
                    Value::Bool(true)
                } else if FALSE_WORDS.contains(&lower.as_str()) {
                    Value::Bool(false)
                } else {
                    return Err(invalid());
                }
            }
            ParameterType::Date => {
                crate::history::fill_timestamp(raw).map_err(|_| invalid())?;
                Value::String(raw.to_string())
            }
            ParameterType::Range => {
                if !is_range(raw) {
                    return Err(invalid());
                }
                Value::String(raw.to_string())
            }
            _ => Value::String(raw.to_string()),
        };

        if let Some(pattern) = &self.regex {
            let re = Regex::new(&format!("^(?:{})", pattern))?;
            let form = value_to_string(&value);
            if !re.is_match(&form) {
                return Err(Error::Validation(format!(
                    "Value '{}' of parameter '{}' does not match /{}/",
                    form, self.name, pattern
                )));
            }
        }
        Ok(value)
    }

    /// String form used on the command line and in saved configs.
    pub fn format(&self, value: &Value) -> String {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|v| self.format(v))
                .collect::<Vec<_>>()
                .join(&self.item_separator),
            Value::Number(n) if self.kind == ParameterType::Float => {
                match (self.print_format.as_deref().and_then(float_precision), n.as_f64()) {
                    (Some(prec), Some(f)) => format!("{:.*}", prec, f),
                    _ => n.to_string(),
                }
            }
            other => value_to_string(other),
        }
    }

    fn too_many(&self, got: usize) -> Error {
        Error::Validation(format!(
            "Parameter '{}' accepts at most {} item(s), got {}",
            self.name, self.max_items, got
        ))
    }
}

/// `start:stop`, `start:step:stop` or a comma separated list of numbers.
fn is_range(raw: &str) -> bool {
    let number = |s: &str| s.trim().parse::<f64>().is_ok_and(f64::is_finite);
    if raw.contains(':') {
        let parts: Vec<&str> = raw.split(':').collect();
        matches!(parts.len(), 2 | 3) && parts.into_iter().all(number)
    } else {
        raw.split(',').all(number)
    }
}

/// `%.3f` → 3
fn float_precision(fmt: &str) -> Option<usize> {
    fmt.strip_prefix("%.")?.strip_suffix('f')?.parse().ok()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Problems found by [`ParameterDictionary::validate_errors`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub missing: Vec<String>,
    pub too_many_items: Vec<(String, usize)>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.too_many_items.is_empty()
    }

    pub fn into_error(self) -> Error {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!(
                "Missing required configuration for: {}",
                self.missing.join(", ")
            ));
        }
        for (name, max) in &self.too_many_items {
            parts.push(format!("'{}' accepts at most {} item(s)", name, max));
        }
        Error::Validation(parts.join("; "))
    }
}

/// Insertion-ordered set of parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterDictionary {
    params: Vec<Parameter>,
}

impl ParameterDictionary {
    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        for (i, p) in params.iter().enumerate() {
            if params[..i].iter().any(|q| q.name == p.name) {
                return Err(Error::Configuration(format!(
                    "duplicate parameter '{}'",
                    p.name
                )));
            }
            if p.max_items == 0 {
                return Err(Error::Configuration(format!(
                    "parameter '{}' must allow at least one item",
                    p.name
                )));
            }
            if let Some(re) = &p.regex {
                Regex::new(re)?;
            }
        }
        Ok(Self { params })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn get_parameter(&self, name: &str) -> Result<&Parameter> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::ParameterNotFound {
                name: name.to_string(),
                suggestions: similar_names(name, self.names()),
            })
    }

    /// Parse `name=value` tokens into a record.
    ///
    /// A token without `=` sets the parameter to `true`. Repeated names
    /// collect into a list.
    pub fn parse_arguments<I, S>(
        &self,
        tokens: I,
        use_defaults: bool,
        complete_defaults: bool,
        check_errors: bool,
    ) -> Result<ConfigRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw: Vec<(&Parameter, Vec<String>)> = Vec::new();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token.split_once('=').unwrap_or((token, "true"));
            let param = self
                .get_parameter(key.trim())
                .map_err(|e| Error::Validation(e.to_string()))?;
            match raw.iter_mut().find(|(p, _)| p.name == param.name) {
                Some((_, values)) => values.push(value.to_string()),
                None => raw.push((param, vec![value.to_string()])),
            }
        }

        let mut record = ConfigRecord::new();
        for (param, mut values) in raw {
            let value = if values.len() == 1 {
                Value::String(values.remove(0))
            } else {
                Value::Array(values.into_iter().map(Value::String).collect())
            };
            record.insert(param.name.clone(), param.parse(&value)?);
        }

        if use_defaults || complete_defaults {
            self.complete(&mut record, complete_defaults);
        }
        if check_errors {
            let errors = self.validate_errors(&record);
            if !errors.is_empty() {
                return Err(errors.into_error());
            }
        }
        Ok(record)
    }

    /// Missing mandatory values and over-long lists.
    pub fn validate_errors(&self, record: &ConfigRecord) -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        for p in &self.params {
            match record.get(&p.name) {
                None | Some(Value::Null) if p.mandatory => errors.missing.push(p.name.clone()),
                Some(Value::Array(items)) if items.len() > p.max_items => {
                    errors.too_many_items.push((p.name.clone(), p.max_items))
                }
                _ => {}
            }
        }
        errors
    }

    /// Fill defaults for absent parameters; with `add_missing_defaults`
    /// parameters without a default are added as null.
    pub fn complete(&self, record: &mut ConfigRecord, add_missing_defaults: bool) {
        for p in &self.params {
            if record.contains_key(&p.name) {
                continue;
            }
            match &p.default {
                Some(default) => {
                    record.insert(p.name.clone(), default.clone());
                }
                None if add_missing_defaults => {
                    record.insert(p.name.clone(), Value::Null);
                }
                None => {}
            }
        }
    }

    /// Render a record back into `name=value` tokens, in declaration order.
    pub fn to_tokens(&self, record: &ConfigRecord) -> Vec<String> {
        self.params
            .iter()
            .filter_map(|p| match record.get(&p.name) {
                None | Some(Value::Null) => None,
                Some(v) => Some(format!("{}={}", p.name, p.format(v))),
            })
            .collect()
    }

    /// Help text, one block per parameter, wrapped at `width` columns.
    pub fn get_help_string(&self, width: usize) -> String {
        let indent = self.names().map(str::len).max().unwrap_or(0) + 2;
        let text_width = width.saturating_sub(indent).max(20);
        let mut out = String::new();

        for p in &self.params {
            let mut help = p.help.trim().to_string();
            if p.mandatory {
                help.push_str(" (mandatory)");
            } else if let Some(default) = p.default.as_ref().filter(|d| !d.is_null()) {
                let _ = write!(help, " (default: {})", p.format(default));
            }
            let lines = wrap(help.trim(), text_width);
            let _ = write!(out, "{:<width$}", p.name, width = indent);
            match lines.split_first() {
                Some((first, rest)) => {
                    out.push_str(first);
                    out.push('\n');
                    for line in rest {
                        let _ = writeln!(out, "{}{}", " ".repeat(indent), line);
                    }
                }
                None => out.push('\n'),
            }
        }
        out
    }

    /// Render a saved-configuration file for `section`.
    ///
    /// Every parameter gets its help as `#: ` comment lines; mandatory
    /// parameters without a value are written as `#name=<mandatory>`.
    pub fn render_config(&self, section: &str, record: &ConfigRecord, width: usize) -> String {
        let mut out = format!("[{}]\n", section);
        for p in &self.params {
            out.push('\n');
            for line in wrap(p.help.trim(), width.saturating_sub(3).max(20)) {
                let _ = writeln!(out, "#: {}", line);
            }
            match record.get(&p.name) {
                Some(v) if !v.is_null() => {
                    let _ = writeln!(out, "{}={}", p.name, p.format(v));
                }
                _ if p.mandatory => {
                    let _ = writeln!(out, "#{}=<mandatory>", p.name);
                }
                _ => {
                    let _ = writeln!(out, "#{}=", p.name);
                }
            }
        }
        out
    }
}

/// Greedy word wrap.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dummy() -> ParameterDictionary {
        ParameterDictionary::new(vec![
            Parameter::new("the_number", ParameterType::Integer)
                .mandatory()
                .with_help("This is the main parameter."),
            Parameter::new("number", ParameterType::Integer),
            Parameter::new("something", ParameterType::String).with_default("test"),
            Parameter::new("other", ParameterType::Float).with_default(1.4),
            Parameter::new("variable", ParameterType::SolrField).with_max_items(3),
            Parameter::new("flag", ParameterType::Bool).with_default(false),
        ])
        .unwrap()
    }

    #[test]
    fn parses_typed_values_with_defaults() {
        let rec = dummy()
            .parse_arguments(["the_number=42"], true, false, true)
            .unwrap();
        assert_eq!(rec["the_number"], json!(42));
        assert_eq!(rec["something"], json!("test"));
        assert_eq!(rec["other"], json!(1.4));
        assert!(!rec.contains_key("number"));
    }

    #[test]
    fn complete_defaults_adds_nulls() {
        let rec = dummy()
            .parse_arguments(["the_number=1"], true, true, true)
            .unwrap();
        assert_eq!(rec["number"], Value::Null);
    }

    #[test]
    fn missing_rhs_means_true() {
        let rec = dummy()
            .parse_arguments(["the_number=1", "flag"], false, false, false)
            .unwrap();
        assert_eq!(rec["flag"], json!(true));
    }

    #[test]
    fn bool_words_are_case_insensitive() {
        let p = Parameter::new("b", ParameterType::Bool);
        for w in ["YES", "on", "T", "1"] {
            assert_eq!(p.parse_str(w).unwrap(), json!(true));
        }
        for w in ["No", "off", "F", "0"] {
            assert_eq!(p.parse_str(w).unwrap(), json!(false));
        }
        assert!(p.parse_str("maybe").is_err());
    }

    #[test]
    fn list_values_split_and_repeat() {
        let d = dummy();
        let rec = d
            .parse_arguments(["the_number=1", "variable=ua,tauu"], false, false, true)
            .unwrap();
        assert_eq!(rec["variable"], json!(["ua", "tauu"]));

        let rec = d
            .parse_arguments(["the_number=1", "variable=ua", "variable=va"], false, false, true)
            .unwrap();
        assert_eq!(rec["variable"], json!(["ua", "va"]));

        let err = d
            .parse_arguments(["variable=a,b,c,d"], false, false, false)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn scalar_rejects_longer_list() {
        let p = Parameter::new("n", ParameterType::Integer);
        assert_eq!(p.parse(&json!(["3"])).unwrap(), json!(3));
        assert!(p.parse(&json!(["3", "4"])).is_err());
    }

    #[test]
    fn regex_applies_to_string_form() {
        let p = Parameter::new("year", ParameterType::Integer).with_regex(r"\d{4}$");
        assert_eq!(p.parse_str("2001").unwrap(), json!(2001));
        assert!(p.parse_str("201").is_err());
    }

    #[test]
    fn integer_overflow_is_invalid() {
        let p = Parameter::new("n", ParameterType::Integer);
        assert!(p.parse_str("3000000000").is_err());
        let l = Parameter::new("n", ParameterType::Long);
        assert_eq!(l.parse_str("3000000000").unwrap(), json!(3_000_000_000i64));
    }

    #[test]
    fn dates_accept_prefixes_only() {
        let p = Parameter::new("start", ParameterType::Date);
        assert_eq!(p.parse_str("1990").unwrap(), json!("1990"));
        assert_eq!(p.parse_str(" 1990-01-15T12 ").unwrap(), json!("1990-01-15T12"));
        for bad in ["19900115", "1990-13", "yesterday", ""] {
            assert!(
                matches!(p.parse_str(bad), Err(Error::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn ranges_need_numeric_bounds() {
        let p = Parameter::new("years", ParameterType::Range);
        for good in ["1950:2000", "1950:5:2000", "0.5:1.5", "1,2,5", "7"] {
            assert_eq!(p.parse_str(good).unwrap(), json!(good));
        }
        for bad in ["", "1950:", ":2000", "1:2:3:4", "a:b", "1,x", "1:2,3"] {
            assert!(
                matches!(p.parse_str(bad), Err(Error::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn unknown_key_suggests() {
        let err = dummy()
            .parse_arguments(["the_numbr=1"], false, false, false)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("the_number"), "{}", err);
    }

    #[test]
    fn get_parameter_not_found() {
        let err = dummy().get_parameter("nmber").unwrap_err();
        match err {
            Error::ParameterNotFound { suggestions, .. } => {
                assert!(suggestions.contains(&"number".to_string()))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validate_reports_missing_mandatory() {
        let d = dummy();
        let errors = d.validate_errors(&ConfigRecord::new());
        assert_eq!(errors.missing, vec!["the_number".to_string()]);
        assert!(d.parse_arguments(Vec::<String>::new(), true, false, true).is_err());
    }

    #[test]
    fn tokens_round_trip() {
        let d = dummy();
        let rec = d
            .parse_arguments(
                ["the_number=7", "variable=ua,va", "other=2.5", "flag=yes"],
                true,
                false,
                true,
            )
            .unwrap();
        let again = d.parse_arguments(d.to_tokens(&rec), true, false, true).unwrap();
        assert_eq!(rec, again);
    }

    #[test]
    fn help_string_is_indented() {
        let help = dummy().get_help_string(80);
        assert!(help.starts_with("the_number  This is the main parameter. (mandatory)"));
        assert!(help.contains("something   (default: test)"));
    }

    #[test]
    fn saved_config_marks_mandatory() {
        let d = dummy();
        let rec = d
            .parse_arguments(Vec::<String>::new(), true, false, false)
            .unwrap();
        let text = d.render_config("DummyPlugin", &rec, 80);
        assert!(text.starts_with("[DummyPlugin]\n"));
        assert!(text.contains("#: This is the main parameter.\n#the_number=<mandatory>"));
        assert!(text.contains("\nsomething=test\n"));
        assert!(text.contains("\n#number=\n"));
    }

    #[test]
    fn deserializes_from_toml() {
        let p: Parameter = toml::from_str(
            "name = \"n\"\ntype = \"int\"\nmandatory = true\nimpact = \"affects_plots\"\n",
        )
        .unwrap();
        assert_eq!(p.kind, ParameterType::Integer);
        assert_eq!(p.max_items, 1);
        assert_eq!(p.impact, Impact::AffectsPlots);
    }
}
