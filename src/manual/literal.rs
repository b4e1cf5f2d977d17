//! Parsing of list literals returned by the generation provider.
//!
//! Models are asked for output such as `['hw4.json', 'lab8.json']` or
//! `[1, 2, 3]`. Replies are parsed as JSON5 (single or double quotes,
//! trailing commas) after isolating the outermost bracketed span, which also
//! tolerates code fences and surrounding prose.

use crate::error::LiteralError;
use serde_json::Value;

fn list_span(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

pub fn parse_list(raw: &str) -> Result<Vec<Value>, LiteralError> {
    let span = list_span(raw).ok_or(LiteralError::NoList)?;
    json5::from_str::<Vec<Value>>(span).map_err(|err| LiteralError::Syntax(err.to_string()))
}

pub fn parse_string_list(raw: &str) -> Result<Vec<String>, LiteralError> {
    parse_list(raw)?
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(s) => Ok(s),
            _ => Err(LiteralError::ItemType { index }),
        })
        .collect()
}

fn as_natural(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= usize::MAX as f64 {
        return Some(f as usize);
    }
    None
}

pub fn parse_index_list(raw: &str) -> Result<Vec<usize>, LiteralError> {
    parse_list(raw)?
        .iter()
        .enumerate()
        .map(|(index, item)| as_natural(item).ok_or(LiteralError::ItemType { index }))
        .collect()
}
