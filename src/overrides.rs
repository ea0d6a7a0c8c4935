//! Dotted-path overrides applied to a freshly loaded [`Configuration`]
//!
//! An override maps a path such as `Test.Cases.[100TPS].Values.TPS` to a
//! replacement value. Paths walk the typed configuration explicitly; free-form
//! value maps (`GlobalValues`, unit and case `Values`) are walked as JSON and
//! missing keys are created on the way down.
//!
//! Rules:
//! - a leading `.` is ignored, and the path must start at `Test`
//! - `[name]` picks a unit or case by `Name`, or any list element by index
//! - on lists, an index equal to the length appends
//! - a replacement of a different representation than the existing leaf is
//!   coerced (string, integer, float, bool) or rejected
//!
//! Every error carries the complete original path.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::config::{Configuration, PipelineSection, TestSection, ValueMap};

/// Errors from resolving or applying an override
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    #[error("override [{0}] must have the form <path>=<value>")]
    Assignment(String),

    #[error("override path [{path}] is malformed: {reason}")]
    Malformed { path: String, reason: String },

    #[error("override path [{path}] does not resolve: {reason}")]
    Unresolved { path: String, reason: String },

    #[error("override path [{path}] index {index} is out of range for a list of length {len}")]
    OutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("override path [{path}] cannot convert {from} value to {to}")]
    Coercion {
        path: String,
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Selector(String),
}

impl Segment {
    fn key(&self) -> &str {
        match self {
            Segment::Field(k) | Segment::Selector(k) => k,
        }
    }
}

/// Apply every override, in key order
pub fn apply_overrides(
    config: &mut Configuration,
    overrides: &BTreeMap<String, Value>,
) -> Result<(), OverrideError> {
    for (path, value) in overrides {
        apply_override(config, path, value.clone())?;
    }
    Ok(())
}

/// Apply a single override
pub fn apply_override(
    config: &mut Configuration,
    path: &str,
    value: Value,
) -> Result<(), OverrideError> {
    let at = At { path };
    let segments = tokenize(path)?;

    match segments.split_first() {
        Some((Segment::Field(root), rest)) if root == "Test" => {
            set_test(&mut config.test, &at, rest, value)
        }
        _ => Err(at.unresolved("path must begin with Test")),
    }
}

/// Parse a `path=value` assignment as given on the command line.
///
/// The value is kept as the exact text given. It is converted when applied,
/// to the representation of the leaf it replaces.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), OverrideError> {
    let (path, text) = raw
        .split_once('=')
        .ok_or_else(|| OverrideError::Assignment(raw.to_string()))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(OverrideError::Assignment(raw.to_string()));
    }

    Ok((path.to_string(), Value::String(text.to_string())))
}

/// Read override text for a slot with no existing representation.
///
/// YAML scalars and flow collections are honoured, except numbers whose
/// text would not survive the conversion (`1.10`, `007`), which stay text.
fn parse_text(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Null) | Err(_) => Value::String(text.to_string()),
        Ok(Value::Number(n)) if n.to_string() != text.trim() => Value::String(text.to_string()),
        Ok(parsed) => parsed,
    }
}

/// Text handed to a map or list slot is read as YAML.
fn structured(value: Value) -> Value {
    match value {
        Value::String(text) => parse_text(&text),
        other => other,
    }
}

/// Error context: the full path being applied
struct At<'a> {
    path: &'a str,
}

impl At<'_> {
    fn malformed(&self, reason: impl Into<String>) -> OverrideError {
        OverrideError::Malformed {
            path: self.path.to_string(),
            reason: reason.into(),
        }
    }

    fn unresolved(&self, reason: impl Into<String>) -> OverrideError {
        OverrideError::Unresolved {
            path: self.path.to_string(),
            reason: reason.into(),
        }
    }

    fn out_of_range(&self, index: usize, len: usize) -> OverrideError {
        OverrideError::OutOfRange {
            path: self.path.to_string(),
            index,
            len,
        }
    }

    fn coercion(&self, from: &Value, to: &'static str) -> OverrideError {
        OverrideError::Coercion {
            path: self.path.to_string(),
            from: kind_name(from),
            to,
        }
    }

    fn unknown_field(&self, field: &str, parent: &str) -> OverrideError {
        self.unresolved(format!("{parent} has no field [{field}]"))
    }

    fn leaf(&self, rest: &[Segment], field: &str) -> Result<(), OverrideError> {
        match rest.first() {
            None => Ok(()),
            Some(next) => Err(self.unresolved(format!(
                "{field} is a scalar and has no member [{}]",
                next.key()
            ))),
        }
    }

    fn index(&self, selector: &str) -> Result<usize, OverrideError> {
        selector
            .parse()
            .map_err(|_| self.malformed(format!("[{selector}] is not a list index")))
    }
}

fn tokenize(path: &str) -> Result<Vec<Segment>, OverrideError> {
    let at = At { path };
    let trimmed = path.strip_prefix('.').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(at.malformed("path is empty"));
    }

    let mut segments = Vec::new();
    let mut chars = trimmed.chars().peekable();

    loop {
        if chars.peek() == Some(&'[') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(']') => break,
                    Some(c) => name.push(c),
                    None => return Err(at.malformed("unterminated [")),
                }
            }
            if name.is_empty() {
                return Err(at.malformed("empty []"));
            }
            segments.push(Segment::Selector(name));
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '.' || c == '[' {
                    break;
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(at.malformed("empty path segment"));
            }
            segments.push(Segment::Field(name));
        }

        match chars.peek() {
            None => break,
            Some('.') => {
                chars.next();
                if chars.peek().is_none() {
                    return Err(at.malformed("trailing ."));
                }
            }
            Some('[') => {}
            Some(c) => return Err(at.malformed(format!("unexpected [{c}] after ]"))),
        }
    }

    Ok(segments)
}

fn set_test(
    test: &mut TestSection,
    at: &At<'_>,
    segments: &[Segment],
    value: Value,
) -> Result<(), OverrideError> {
    let Some((first, rest)) = segments.split_first() else {
        return Err(at.unresolved("the Test section cannot be replaced as a whole"));
    };
    let Segment::Field(field) = first else {
        return Err(at.unresolved("Test is not a list"));
    };

    match field.as_str() {
        "AssetArchive" => match rest.split_first() {
            Some((Segment::Field(f), rest)) if f == "FilePath" => {
                at.leaf(rest, f)?;
                set_string(&mut test.asset_archive.file_path, at, value)
            }
            Some((other, _)) => Err(at.unknown_field(other.key(), "AssetArchive")),
            None => Err(at.unresolved("AssetArchive must be set field by field")),
        },
        "DefaultNamespace" => match rest.split_first() {
            Some((Segment::Field(f), rest)) if f == "Basename" => {
                at.leaf(rest, f)?;
                set_string(&mut test.default_namespace.basename, at, value)
            }
            Some((other, _)) => Err(at.unknown_field(other.key(), "DefaultNamespace")),
            None => Err(at.unresolved("DefaultNamespace must be set field by field")),
        },
        "GlobalValues" => set_value_map(&mut test.global_values, at, rest, value),
        "Pipeline" => set_pipeline(&mut test.pipeline, at, rest, value),
        "Cases" => {
            let case = select_named(&mut test.cases, |c| &c.name, at, rest.first())?;
            match rest[1..].split_first() {
                None => replace_with(case, at, value),
                Some((Segment::Field(f), rest)) if f == "Name" => {
                    at.leaf(rest, f)?;
                    set_string(&mut case.name, at, value)
                }
                Some((Segment::Field(f), rest)) if f == "Values" => {
                    set_value_map(&mut case.values, at, rest, value)
                }
                Some((other, _)) => Err(at.unknown_field(other.key(), "a case")),
            }
        }
        "Units" => {
            let unit = select_named(&mut test.units, |u| &u.name, at, rest.first())?;
            match rest[1..].split_first() {
                None => replace_with(unit, at, value),
                Some((Segment::Field(f), rest)) if f == "Name" => {
                    at.leaf(rest, f)?;
                    set_string(&mut unit.name, at, value)
                }
                Some((Segment::Field(f), rest)) if f == "Values" => {
                    set_value_map(&mut unit.values, at, rest, value)
                }
                Some((other, _)) => Err(at.unknown_field(other.key(), "a unit")),
            }
        }
        other => Err(at.unknown_field(other, "Test")),
    }
}

fn set_pipeline(
    pipeline: &mut PipelineSection,
    at: &At<'_>,
    segments: &[Segment],
    value: Value,
) -> Result<(), OverrideError> {
    let Some((first, rest)) = segments.split_first() else {
        return replace_with(pipeline, at, value);
    };
    let Segment::Field(field) = first else {
        return Err(at.unresolved("Pipeline is not a list"));
    };

    match field.as_str() {
        "ActionDefinitionsRootDirectory" => {
            at.leaf(rest, field)?;
            set_string(&mut pipeline.action_definitions_root_directory, at, value)
        }
        "JobCompletionTimeoutSeconds" => {
            at.leaf(rest, field)?;
            let current = Value::from(pipeline.job_completion_timeout_seconds.unwrap_or(0));
            let coerced = coerce(&current, value.clone(), at)?;
            let seconds = coerced
                .as_u64()
                .ok_or_else(|| at.coercion(&value, "non-negative integer"))?;
            pipeline.job_completion_timeout_seconds = Some(seconds);
            Ok(())
        }
        "ExecutionEnvironment" => match rest.split_first() {
            None => replace_with(&mut pipeline.execution_environment, at, value),
            Some((name, rest)) => {
                at.leaf(rest, name.key())?;
                let mut current = Value::String(
                    pipeline
                        .execution_environment
                        .get(name.key())
                        .cloned()
                        .unwrap_or_default(),
                );
                set_string_value(&mut current, at, value)?;
                if let Value::String(s) = current {
                    pipeline.execution_environment.insert(name.key().to_string(), s);
                }
                Ok(())
            }
        },
        "ActionsInOrder" => match rest.split_first() {
            None => replace_with(&mut pipeline.actions_in_order, at, value),
            Some((Segment::Selector(selector), rest)) => {
                at.leaf(rest, "an ActionsInOrder entry")?;
                let index = at.index(selector)?;
                let actions = &mut pipeline.actions_in_order;
                let len = actions.len();
                if index > len {
                    return Err(at.out_of_range(index, len));
                }
                if index == len {
                    actions.push(String::new());
                }
                set_string(&mut actions[index], at, value)
            }
            Some((Segment::Field(f), _)) => {
                Err(at.malformed(format!("ActionsInOrder takes [index], not {f}")))
            }
        },
        other => Err(at.unknown_field(other, "Pipeline")),
    }
}

fn select_named<'a, T>(
    items: &'a mut [T],
    name_of: impl Fn(&T) -> &String,
    at: &At<'_>,
    selector: Option<&Segment>,
) -> Result<&'a mut T, OverrideError> {
    let Some(Segment::Selector(selector)) = selector else {
        return Err(at.malformed("expected [name] after the list"));
    };

    if let Some(position) = items.iter().position(|item| name_of(item) == selector) {
        return Ok(&mut items[position]);
    }

    match selector.parse::<usize>() {
        Ok(index) if index < items.len() => Ok(&mut items[index]),
        Ok(index) => Err(at.out_of_range(index, items.len())),
        Err(_) => Err(at.unresolved(format!("no entry named [{selector}]"))),
    }
}

fn replace_with<T: serde::de::DeserializeOwned>(
    target: &mut T,
    at: &At<'_>,
    value: Value,
) -> Result<(), OverrideError> {
    *target = serde_json::from_value(structured(value))
        .map_err(|e| at.unresolved(format!("replacement has the wrong shape: {e}")))?;
    Ok(())
}

fn set_string(target: &mut String, at: &At<'_>, value: Value) -> Result<(), OverrideError> {
    let mut current = Value::String(std::mem::take(target));
    let result = set_string_value(&mut current, at, value);
    if let Value::String(s) = current {
        *target = s;
    }
    result
}

fn set_string_value(current: &mut Value, at: &At<'_>, value: Value) -> Result<(), OverrideError> {
    let coerced = coerce(current, value, at)?;
    if !coerced.is_string() {
        return Err(at.coercion(&coerced, "string"));
    }
    *current = coerced;
    Ok(())
}

fn set_value_map(
    map: &mut ValueMap,
    at: &At<'_>,
    segments: &[Segment],
    value: Value,
) -> Result<(), OverrideError> {
    let Some((first, rest)) = segments.split_first() else {
        return match structured(value) {
            Value::Object(replacement) => {
                *map = replacement;
                Ok(())
            }
            other => Err(at.coercion(&other, "map")),
        };
    };

    let slot = map.entry(first.key().to_string()).or_insert(Value::Null);
    set_in_value(slot, at, rest, value)
}

fn set_in_value(
    target: &mut Value,
    at: &At<'_>,
    segments: &[Segment],
    value: Value,
) -> Result<(), OverrideError> {
    let Some((first, rest)) = segments.split_first() else {
        *target = coerce(target, value, at)?;
        return Ok(());
    };

    if target.is_null() {
        *target = Value::Object(ValueMap::new());
    }

    match target {
        Value::Object(map) => {
            let slot = map.entry(first.key().to_string()).or_insert(Value::Null);
            set_in_value(slot, at, rest, value)
        }
        Value::Array(items) => {
            let index = at.index(first.key())?;
            let len = items.len();
            if index > len {
                return Err(at.out_of_range(index, len));
            }
            if index == len {
                items.push(Value::Null);
            }
            set_in_value(&mut items[index], at, rest, value)
        }
        scalar => Err(at.unresolved(format!(
            "cannot descend into a {} with [{}]",
            kind_name(scalar),
            first.key()
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Convert `replacement` to the representation of `existing`.
///
/// | existing \ replacement | string      | integer/float      | bool    |
/// |------------------------|-------------|--------------------|---------|
/// | string                 | as is       | decimal text       | text    |
/// | integer                | parsed      | whole floats only  | 0 / 1   |
/// | float                  | parsed      | as is              | 0 / 1   |
/// | bool                   | true/false, yes/no, 1/0 | 0 / 1 only | as is |
///
/// Maps and lists only accept maps and lists, or text holding one. A null
/// existing value accepts anything; text is read as YAML.
fn coerce(existing: &Value, replacement: Value, at: &At<'_>) -> Result<Value, OverrideError> {
    let fail = |r: &Value, to| Err(at.coercion(r, to));

    match (existing, &replacement) {
        (Value::Null, Value::String(text)) => Ok(parse_text(text)),
        (Value::Null, _) => Ok(replacement),
        (Value::String(_), Value::String(_)) => Ok(replacement),
        (Value::String(_), Value::Number(n)) => Ok(Value::String(n.to_string())),
        (Value::String(_), Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (Value::Number(n), Value::Number(r)) => {
            if n.is_f64() || !r.is_f64() {
                return Ok(replacement);
            }
            match r.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => fail(&replacement, "integer"),
            }
        }
        (Value::Number(n), Value::String(s)) => {
            let s = s.trim();
            if n.is_f64() {
                match s.parse::<f64>().ok().and_then(Number::from_f64) {
                    Some(f) => Ok(Value::Number(f)),
                    None => fail(&replacement, "float"),
                }
            } else if let Ok(i) = s.parse::<i64>() {
                Ok(Value::from(i))
            } else if let Ok(u) = s.parse::<u64>() {
                Ok(Value::from(u))
            } else {
                fail(&replacement, "integer")
            }
        }
        (Value::Number(_), Value::Bool(b)) => Ok(Value::from(u8::from(*b))),

        (Value::Bool(_), Value::Bool(_)) => Ok(replacement),
        (Value::Bool(_), Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => fail(&replacement, "bool"),
        },
        (Value::Bool(_), Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => fail(&replacement, "bool"),
        },

        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => {
            Ok(replacement)
        }
        (Value::Object(_) | Value::Array(_), Value::String(text)) => {
            match (existing, parse_text(text)) {
                (Value::Object(_), parsed @ Value::Object(_))
                | (Value::Array(_), parsed @ Value::Array(_)) => Ok(parsed),
                _ if existing.is_object() => fail(&replacement, "map"),
                _ => fail(&replacement, "list"),
            }
        }
        (Value::Object(_), _) => fail(&replacement, "map"),
        (Value::Array(_), _) => fail(&replacement, "list"),
        (Value::String(_), _) => fail(&replacement, "string"),
        (Value::Number(n), _) if n.is_f64() => fail(&replacement, "float"),
        (Value::Number(_), _) => fail(&replacement, "integer"),
        (Value::Bool(_), _) => fail(&replacement, "bool"),
    }
}
