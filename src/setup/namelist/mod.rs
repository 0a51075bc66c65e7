/*
Copyright 2021 Jakub Lewandowski

This file is part of WRF Preparation System (WRFPREP).

WRF Preparation System (WRFPREP) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

WRF Preparation System (WRFPREP) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with WRF Preparation System (WRFPREP). If not, see https://www.gnu.org/licenses/.
*/

//! Module responsible for reading, editing and writing Fortran
//! namelist documents.
//!
//! WPS and WRF are configured through namelist files which this
//! program has to read, cross-check and rewrite per job. Only the
//! subset of the namelist format those tools actually use is
//! supported: flat groups of `name = value` entries where a value is
//! a scalar or a comma-separated sequence of scalars.

pub mod validate;

use crate::errors::NamelistError;
use std::fmt;
use std::fs;
use std::path::Path;

/// A single namelist value element.
///
/// Fortran namelists are dynamically typed, an entry holds integers,
/// reals, logicals or quoted strings. The variants mirror what the WPS
/// and WRF namelists contain.
#[derive(Clone, Debug)]
pub enum Scalar {
    Int(i64),
    Real(f64),
    Logical(bool),
    Text(String),
}

impl Scalar {
    /// Numeric view of the scalar, used by the derived grid-spacing
    /// reconstruction.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(value) => Some(*value as f64),
            Scalar::Real(value) => Some(*value),
            _ => None,
        }
    }
}

/// Scalars compare loosely across the numeric variants: the namelists
/// write `30000` and `30000.0` interchangeably and the two must be
/// treated as the same value.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Real(a), Scalar::Real(b)) => a == b,
            (Scalar::Int(a), Scalar::Real(b)) | (Scalar::Real(b), Scalar::Int(a)) => {
                (*a as f64) == *b
            }
            (Scalar::Logical(a), Scalar::Logical(b)) => a == b,
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{}", value),
            // keep the decimal point so the value stays a real on re-parse
            Scalar::Real(value) if value.fract() == 0.0 && value.is_finite() => {
                write!(f, "{:.1}", value)
            }
            Scalar::Real(value) => write!(f, "{}", value),
            Scalar::Logical(true) => write!(f, ".true."),
            Scalar::Logical(false) => write!(f, ".false."),
            Scalar::Text(value) => write!(f, "'{}'", value),
        }
    }
}

/// A namelist entry value: either a single scalar or an ordered
/// sequence, one element per domain for the domain-indexed variables.
///
/// The distinction is meaningful and checked at validation time, a
/// sequence of length one is not the same as a scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
}

impl Value {
    pub fn int(value: i64) -> Value {
        Value::Scalar(Scalar::Int(value))
    }

    pub fn text(value: impl Into<String>) -> Value {
        Value::Scalar(Scalar::Text(value.into()))
    }

    pub fn logical(value: bool) -> Value {
        Value::Scalar(Scalar::Logical(value))
    }

    /// The same integer repeated for every domain.
    pub fn int_per_domain(value: i64, ndom: usize) -> Value {
        Value::Sequence(vec![Scalar::Int(value); ndom])
    }

    /// The same string repeated for every domain.
    pub fn text_per_domain(value: &str, ndom: usize) -> Value {
        Value::Sequence(vec![Scalar::Text(value.to_string()); ndom])
    }

    pub fn text_sequence<S: Into<String>>(values: Vec<S>) -> Value {
        Value::Sequence(values.into_iter().map(|v| Scalar::Text(v.into())).collect())
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(scalar) => Some(scalar),
            Value::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Scalar]> {
        match self {
            Value::Scalar(_) => None,
            Value::Sequence(seq) => Some(seq),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(scalar) => write!(f, "{}", scalar),
            Value::Sequence(seq) => {
                let rendered: Vec<String> = seq.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", rendered.join(", "))
            }
        }
    }
}

/// One `&name ... /` group of the document, with its entries in file
/// order so the document can be written back the way it was read.
#[derive(Clone, Debug, PartialEq)]
struct Group {
    name: String,
    entries: Vec<(String, Value)>,
}

/// A namelist document: an ordered list of groups.
#[derive(Clone, Debug, PartialEq)]
pub struct Namelist {
    groups: Vec<Group>,
}

impl Namelist {
    /// Reads and parses a namelist file.
    pub fn from_file(path: &Path) -> Result<Namelist, NamelistError> {
        let text = fs::read_to_string(path)?;
        Namelist::parse(&text)
    }

    /// Parses a namelist document from text.
    ///
    /// Group and variable names are folded to lowercase, matching the
    /// case-insensitive reading the Fortran tools apply. A value line
    /// without a `name =` part continues the previous entry.
    pub fn parse(text: &str) -> Result<Namelist, NamelistError> {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let malformed = || NamelistError::Malformed {
                line: index + 1,
                text: raw_line.trim().to_string(),
            };

            let line = strip_comment(raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = line.strip_prefix('&') {
                if current.is_some() {
                    return Err(malformed());
                }
                current = Some(Group {
                    name: name.trim().to_lowercase(),
                    entries: Vec::new(),
                });
                continue;
            }

            if line == "/" {
                groups.push(current.take().ok_or_else(malformed)?);
                continue;
            }

            let group = current.as_mut().ok_or_else(malformed)?;

            if let Some((name, rest)) = line.split_once('=') {
                let scalars = parse_scalars(rest);
                if scalars.is_empty() {
                    return Err(malformed());
                }
                group
                    .entries
                    .push((name.trim().to_lowercase(), collapse(scalars)));
            } else {
                // continuation of the previous entry onto a new line
                let scalars = parse_scalars(line);
                let (_, value) = group.entries.last_mut().ok_or_else(malformed)?;
                extend(value, scalars);
            }
        }

        if current.is_some() {
            return Err(NamelistError::Malformed {
                line: text.lines().count(),
                text: "unterminated group".to_string(),
            });
        }

        Ok(Namelist { groups })
    }

    /// Renders and writes the document to `path`, replacing any
    /// existing file.
    pub fn write_to(&self, path: &Path) -> Result<(), NamelistError> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Fetches the value of `variable` inside `group`.
    pub fn get(&self, group: &str, variable: &str) -> Result<&Value, NamelistError> {
        let entries = &self
            .groups
            .iter()
            .find(|g| g.name == group)
            .ok_or_else(|| NamelistError::MissingGroup(group.to_string()))?
            .entries;

        entries
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, value)| value)
            .ok_or_else(|| NamelistError::MissingVariable {
                group: group.to_string(),
                variable: variable.to_string(),
            })
    }

    /// Fetches a scalar integer, the type the domain-count and similar
    /// control variables must have.
    pub fn get_int(&self, group: &str, variable: &str) -> Result<i64, NamelistError> {
        match self.get(group, variable)? {
            Value::Scalar(Scalar::Int(value)) => Ok(*value),
            _ => Err(NamelistError::UnexpectedType {
                group: group.to_string(),
                variable: variable.to_string(),
            }),
        }
    }

    /// Replaces the value of `variable` inside `group`, appending the
    /// entry (and the group) when not present yet.
    pub fn set(&mut self, group: &str, variable: &str, value: Value) {
        let index = match self.groups.iter().position(|g| g.name == group) {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    name: group.to_string(),
                    entries: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];

        match group.entries.iter_mut().find(|(name, _)| name == variable) {
            Some((_, existing)) => *existing = value,
            None => group.entries.push((variable.to_string(), value)),
        }
    }
}

impl fmt::Display for Namelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.groups {
            writeln!(f, "&{}", group.name)?;
            for (name, value) in &group.entries {
                writeln!(f, "    {} = {},", name, value)?;
            }
            writeln!(f, "/")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Removes an `!` comment, honouring quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;

    for (index, character) in line.char_indices() {
        match quote {
            Some(open) if character == open => quote = None,
            Some(_) => {}
            None => match character {
                '\'' | '"' => quote = Some(character),
                '!' => return &line[..index],
                _ => {}
            },
        }
    }

    line
}

/// Splits a value list on commas outside quotes and parses each token.
fn parse_scalars(text: &str) -> Vec<Scalar> {
    let mut tokens: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;

    for character in text.chars() {
        match quote {
            Some(open) if character == open => {
                quote = None;
                token.push(character);
            }
            Some(_) => token.push(character),
            None => match character {
                '\'' | '"' => {
                    quote = Some(character);
                    token.push(character);
                }
                ',' => {
                    tokens.push(std::mem::take(&mut token));
                }
                _ => token.push(character),
            },
        }
    }
    tokens.push(token);

    tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(parse_scalar)
        .collect()
}

fn parse_scalar(token: &str) -> Scalar {
    if (token.starts_with('\'') && token.ends_with('\'') && token.len() >= 2)
        || (token.starts_with('"') && token.ends_with('"') && token.len() >= 2)
    {
        return Scalar::Text(token[1..token.len() - 1].to_string());
    }

    match token.to_lowercase().as_str() {
        ".true." | ".t." => return Scalar::Logical(true),
        ".false." | ".f." => return Scalar::Logical(false),
        _ => {}
    }

    if let Ok(value) = token.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = token.parse::<f64>() {
        return Scalar::Real(value);
    }

    Scalar::Text(token.to_string())
}

fn collapse(mut scalars: Vec<Scalar>) -> Value {
    if scalars.len() == 1 {
        Value::Scalar(scalars.remove(0))
    } else {
        Value::Sequence(scalars)
    }
}

fn extend(value: &mut Value, more: Vec<Scalar>) {
    if more.is_empty() {
        return;
    }

    let mut seq = match std::mem::replace(value, Value::Sequence(Vec::new())) {
        Value::Scalar(scalar) => vec![scalar],
        Value::Sequence(seq) => seq,
    };
    seq.extend(more);
    *value = Value::Sequence(seq);
}
