//! lib/attributes/convert.rs
//!
//! This module contains the value model of the attribute system, and the coercion engine that
//! shapes every value written to a store. A value carries its own variant, and the store carries
//! the declared type and flavor of each attribute; on every write the value is first shaped to
//! the declared flavor (scalar, vector or dict) and then each scalar inside is converted to the
//! declared type. Coercion is idempotent: shaping an already well-shaped value is a no-op.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::error::Error;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;


//-------------------------------------------------------------------------------------------- TYPES


/// The declared type of an attribute. Conversions to these types wrap the language-native
/// coercions and fail with `BadParameter` (or `IncorrectUrl` for urls) when a value cannot be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Any,
    Url,
    Int,
    Float,
    String,
    Bool,
    Enum,
    Time,
}

/// The declared shape of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Any,
    Scalar,
    Vector,
    Dict,
}

/// A dynamically typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Url(Url),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Time(DateTime<Utc>),
    Vector(Vec<AttributeValue>),
    Dict(BTreeMap<String, AttributeValue>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttributeValue::Url(u) => write!(f, "{}", u),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            AttributeValue::Vector(v) => {
                let rendered: Vec<String> = v.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", rendered.join(" "))
            }
            AttributeValue::Dict(d) => {
                let rendered: Vec<String> = d.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> AttributeValue {
        AttributeValue::Int(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}


//----------------------------------------------------------------------------------------- COERCION


/// Shapes a value to the given flavor, then converts every scalar inside to the given type.
/// Returns `Ok(None)` when the shaping leaves nothing to store (an empty vector coerced to a
/// scalar).
pub fn coerce(
    value: AttributeValue,
    typ: AttributeType,
    flavor: Flavor,
) -> Result<Option<AttributeValue>, Error> {
    match flavor {
        Flavor::Any => Ok(Some(value)),
        Flavor::Vector => {
            let elements = match value {
                AttributeValue::Vector(v) => v
                    .into_iter()
                    .map(|e| to_type(e, typ))
                    .collect::<Result<Vec<_>, Error>>()?,
                AttributeValue::String(s) => s
                    .split_whitespace()
                    .map(|t| to_type(AttributeValue::String(t.to_owned()), typ))
                    .collect::<Result<Vec<_>, Error>>()?,
                other => vec![to_type(other, typ)?],
            };
            Ok(Some(AttributeValue::Vector(elements)))
        }
        Flavor::Dict => match value {
            AttributeValue::Dict(d) => Ok(Some(AttributeValue::Dict(d))),
            AttributeValue::Vector(v) => {
                let mut map = BTreeMap::new();
                for element in v {
                    let (key, val) = split_pair(&element.to_string())?;
                    map.insert(key, to_type(AttributeValue::String(val), typ)?);
                }
                Ok(Some(AttributeValue::Dict(map)))
            }
            AttributeValue::String(s) => {
                let separator = if s.contains(':') { ':' } else { ',' };
                let mut map = BTreeMap::new();
                for segment in s.split(separator).filter(|seg| !seg.trim().is_empty()) {
                    let (key, val) = split_pair(segment)?;
                    map.insert(key, to_type(AttributeValue::String(val), typ)?);
                }
                Ok(Some(AttributeValue::Dict(map)))
            }
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be shaped into a dict",
                other
            ))),
        },
        Flavor::Scalar => match value {
            // Joining a multi-element vector into one string is a weak, lossy conversion; it is
            // kept because the api documents it.
            AttributeValue::Vector(v) if v.len() > 1 => {
                let joined = v
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<String>>()
                    .join(" ");
                Ok(Some(to_type(AttributeValue::String(joined), typ)?))
            }
            AttributeValue::Vector(mut v) => match v.pop() {
                Some(element) => Ok(Some(to_type(element, typ)?)),
                None => Ok(None),
            },
            other => Ok(Some(to_type(other, typ)?)),
        },
    }
}

// Splits a "k=v" segment.
fn split_pair(segment: &str) -> Result<(String, String), Error> {
    let mut parts = segment.splitn(2, '=');
    match (parts.next(), parts.next()) {
        (Some(k), Some(v)) => Ok((k.trim().to_owned(), v.trim().to_owned())),
        _ => Err(Error::BadParameter(format!(
            "The segment {:?} is not of the k=v form",
            segment
        ))),
    }
}

/// Converts a single scalar value to the given type.
pub fn to_type(value: AttributeValue, typ: AttributeType) -> Result<AttributeValue, Error> {
    match typ {
        AttributeType::Any => Ok(value),
        AttributeType::String | AttributeType::Enum => {
            Ok(AttributeValue::String(value.to_string()))
        }
        AttributeType::Int => match value {
            AttributeValue::Int(i) => Ok(AttributeValue::Int(i)),
            AttributeValue::Float(x) => Ok(AttributeValue::Int(x as i64)),
            AttributeValue::Bool(b) => Ok(AttributeValue::Int(b as i64)),
            AttributeValue::Time(t) => Ok(AttributeValue::Int(t.timestamp())),
            AttributeValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|_| Error::BadParameter(format!("The value {:?} is not an int", s))),
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be converted to an int",
                other
            ))),
        },
        AttributeType::Float => match value {
            AttributeValue::Float(x) => Ok(AttributeValue::Float(x)),
            AttributeValue::Int(i) => Ok(AttributeValue::Float(i as f64)),
            AttributeValue::Bool(b) => Ok(AttributeValue::Float(b as i64 as f64)),
            AttributeValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map(AttributeValue::Float)
                .map_err(|_| Error::BadParameter(format!("The value {:?} is not a float", s))),
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be converted to a float",
                other
            ))),
        },
        AttributeType::Bool => match value {
            AttributeValue::Bool(b) => Ok(AttributeValue::Bool(b)),
            AttributeValue::Int(i) => Ok(AttributeValue::Bool(i != 0)),
            AttributeValue::Float(x) => Ok(AttributeValue::Bool(x != 0.0)),
            AttributeValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(AttributeValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(AttributeValue::Bool(false)),
                _ => Err(Error::BadParameter(format!(
                    "The value {:?} is not a bool",
                    s
                ))),
            },
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be converted to a bool",
                other
            ))),
        },
        AttributeType::Url => match value {
            AttributeValue::Url(u) => Ok(AttributeValue::Url(u)),
            AttributeValue::String(s) => Url::parse(s.trim())
                .map(AttributeValue::Url)
                .map_err(|e| Error::IncorrectUrl(format!("{:?}: {}", s, e))),
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be converted to a url",
                other
            ))),
        },
        AttributeType::Time => match value {
            AttributeValue::Time(t) => Ok(AttributeValue::Time(t)),
            AttributeValue::Int(i) => Utc
                .timestamp_opt(i, 0)
                .single()
                .map(AttributeValue::Time)
                .ok_or_else(|| {
                    Error::BadParameter(format!("The value {} is not a valid timestamp", i))
                }),
            AttributeValue::String(s) => {
                let trimmed = s.trim();
                if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
                    return Ok(AttributeValue::Time(t.with_timezone(&Utc)));
                }
                chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                    .map(|n| AttributeValue::Time(Utc.from_utc_datetime(&n)))
                    .map_err(|_| Error::BadParameter(format!("The value {:?} is not a time", s)))
            }
            other => Err(Error::BadParameter(format!(
                "The value {} cannot be converted to a time",
                other
            ))),
        },
    }
}


//-------------------------------------------------------------------------------------------- TESTS
