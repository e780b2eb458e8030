//! Parser for the `param_str` of Python layers.
//!
//! The string is a small mapping literal:
//!
//! ```text
//! mapping := '{'? (pair (',' pair)* ','?)? '}'?
//! pair    := key ':' value
//! key     := identifier | quoted
//! value   := number | 'True' | 'False' | 'true' | 'false' | quoted | list
//! list    := '[' (value (',' value)* ','?)? ']' | '(' ... ')'
//! ```
//!
//! Nothing in it is evaluated.

use std::collections::BTreeMap;

use thiserror::Error;

/// A parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            ParamValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Numbers of a list, or a single number as a one-element list.
    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::List(items) => items.iter().map(ParamValue::as_f64).collect(),
            other => other.as_f64().map(|v| vec![v]),
        }
    }
}

/// Syntax error with the byte offset it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("param_str syntax error at offset {position}: {message}")]
pub struct ParamStrError {
    pub position: usize,
    pub message: String,
}

/// Parsed key/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap(BTreeMap<String, ParamValue>);

impl ParamMap {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Parses a `param_str`. An empty or blank string yields an empty map.
pub fn parse(text: &str) -> Result<ParamMap, ParamStrError> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.mapping()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParamStrError> {
        Err(ParamStrError {
            position: self.pos,
            message: message.into(),
        })
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParamStrError> {
        if self.eat(byte) {
            Ok(())
        } else {
            self.error(format!("expected `{}`", byte as char))
        }
    }

    fn mapping(&mut self) -> Result<ParamMap, ParamStrError> {
        let braced = self.eat(b'{');
        let mut map = BTreeMap::new();
        loop {
            match self.peek() {
                None if !braced => break,
                Some(b'}') if braced => {
                    self.pos += 1;
                    break;
                }
                None => return self.error("missing closing `}`"),
                Some(_) => {}
            }
            let key = self.key()?;
            self.expect(b':')?;
            let value = self.value()?;
            map.insert(key, value);

            if !self.eat(b',') {
                if braced {
                    self.expect(b'}')?;
                }
                break;
            }
        }
        if self.peek().is_some() {
            return self.error("trailing characters");
        }
        Ok(ParamMap(map))
    }

    fn key(&mut self) -> Result<String, ParamStrError> {
        match self.peek() {
            Some(b'\'' | b'"') => self.quoted(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => Ok(self.word()),
            _ => self.error("expected a key"),
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn quoted(&mut self) -> Result<String, ParamStrError> {
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let start = self.pos;
        while let Some(&c) = self.bytes.get(self.pos) {
            if c == quote {
                let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(text);
            }
            self.pos += 1;
        }
        self.error("unterminated string")
    }

    fn value(&mut self) -> Result<ParamValue, ParamStrError> {
        match self.peek() {
            Some(b'\'' | b'"') => self.quoted().map(ParamValue::Str),
            Some(b'[') => self.list(b']'),
            Some(b'(') => self.list(b')'),
            Some(c) if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.') => self.number(),
            Some(c) if c.is_ascii_alphabetic() => match self.word().as_str() {
                "True" | "true" => Ok(ParamValue::Bool(true)),
                "False" | "false" => Ok(ParamValue::Bool(false)),
                other => self.error(format!("unexpected word `{other}`")),
            },
            _ => self.error("expected a value"),
        }
    }

    fn list(&mut self, close: u8) -> Result<ParamValue, ParamStrError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                break;
            }
            items.push(self.value()?);
            if !self.eat(b',') {
                self.expect(close)?;
                break;
            }
        }
        Ok(ParamValue::List(items))
    }

    fn number(&mut self) -> Result<ParamValue, ParamStrError> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'+' | b'.'))
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]);
        if let Ok(v) = text.parse::<i64>() {
            return Ok(ParamValue::Int(v));
        }
        match text.parse::<f64>() {
            Ok(v) => Ok(ParamValue::Float(v)),
            Err(_) => {
                self.pos = start;
                self.error(format!("invalid number `{text}`"))
            }
        }
    }
}
