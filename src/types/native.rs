//! Native storage-engine type strings.
//!
//! Columns carry their storage type as a ClickHouse type string such as
//! `Nullable(String)`, `Array(Tuple(id Int64, label String))` or
//! `DateTime64(3, 'UTC')`. This module parses those strings into a small
//! tree so the registry can look at the base type and the catalog can
//! discover nested elements.

use std::fmt;

use sqlparser::dialect::ClickHouseDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

/// Wrappers that change nullability or encoding but not the value type.
const MODIFIERS: &[&str] = &["Nullable", "LowCardinality"];

/// Types the storage engine refuses to wrap in `Nullable(...)`.
const COMPOSITES: &[&str] = &["Array", "Map", "Tuple", "Nested"];

/// Semi-structured types that are stored as JSON documents.
const DOCUMENTS: &[&str] = &["JSON", "Object"];

/// Error raised when a native type string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid native type '{input}': {reason}")]
pub struct NativeTypeError {
    pub input: String,
    pub reason: String,
}

impl NativeTypeError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// One argument inside a parameterised type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeArg {
    /// A positional type, e.g. the `String` in `Array(String)`.
    Type(NativeType),
    /// A named element, e.g. `id Int64` in `Tuple(id Int64)`.
    Named { name: String, ty: NativeType },
    /// A numeric parameter such as a precision.
    Number(String),
    /// A quoted literal, kept in its rendered form (`'UTC'`, `'a' = 1`).
    Literal(String),
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArg::Type(ty) => write!(f, "{}", ty),
            TypeArg::Named { name, ty } => {
                if is_plain_identifier(name) {
                    write!(f, "{} {}", name, ty)
                } else {
                    write!(f, "`{}` {}", name.replace('`', "\\`"), ty)
                }
            }
            TypeArg::Number(n) => write!(f, "{}", n),
            TypeArg::Literal(l) => write!(f, "{}", l),
        }
    }
}

/// A parsed native type: a name plus optional parenthesised arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    name: String,
    args: Vec<TypeArg>,
}

impl NativeType {
    /// A type wrapping a single positional type, such as `Array(String)`.
    pub fn wrapping(name: impl Into<String>, inner: NativeType) -> Self {
        Self {
            name: name.into(),
            args: vec![TypeArg::Type(inner)],
        }
    }

    /// Parse a native type string.
    pub fn parse(input: &str) -> Result<Self, NativeTypeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(NativeTypeError::new(input, "empty type"));
        }

        let dialect = ClickHouseDialect {};
        let tokens = Tokenizer::new(&dialect, trimmed)
            .tokenize()
            .map_err(|e| NativeTypeError::new(input, e.to_string()))?
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        let mut parser = TypeParser {
            input,
            tokens,
            pos: 0,
        };
        let ty = parser.parse_type()?;
        if let Some(extra) = parser.peek() {
            return Err(NativeTypeError::new(
                input,
                format!("unexpected trailing token '{}'", extra),
            ));
        }
        Ok(ty)
    }

    /// The outermost type name, e.g. `Nullable` for `Nullable(String)`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The arguments of the outermost type.
    pub fn args(&self) -> &[TypeArg] {
        &self.args
    }

    /// Strip `Nullable(...)` and `LowCardinality(...)` wrappers.
    pub fn unwrap_modifiers(&self) -> &NativeType {
        let mut current = self;
        while MODIFIERS.contains(&current.name.as_str()) {
            match current.args.as_slice() {
                [TypeArg::Type(inner)] => current = inner,
                _ => break,
            }
        }
        current
    }

    /// The name of the value type once modifiers are removed.
    pub fn base_name(&self) -> &str {
        self.unwrap_modifiers().name()
    }

    /// Whether the type already admits NULL.
    pub fn is_nullable(&self) -> bool {
        let mut current = self;
        loop {
            if current.name == "Nullable" {
                return true;
            }
            match (current.name.as_str(), current.args.as_slice()) {
                ("LowCardinality", [TypeArg::Type(inner)]) => current = inner,
                _ => return false,
            }
        }
    }

    /// Whether the value type is a container (array, map, tuple, nested).
    pub fn is_composite(&self) -> bool {
        COMPOSITES.contains(&self.base_name())
    }

    /// Whether the value type is a semi-structured document.
    pub fn is_document(&self) -> bool {
        DOCUMENTS.contains(&self.base_name())
    }

    /// The nullable form of this type.
    ///
    /// Composite types and types that are already nullable come back
    /// unchanged, because the storage engine rejects `Nullable(Array(..))`.
    /// `LowCardinality(T)` becomes `LowCardinality(Nullable(T))`.
    pub fn nullable(self) -> NativeType {
        if self.is_nullable() || self.is_composite() {
            return self;
        }
        if self.name == "LowCardinality" {
            if let [TypeArg::Type(inner)] = self.args.as_slice() {
                return NativeType::wrapping("LowCardinality", inner.clone().nullable());
            }
        }
        NativeType::wrapping("Nullable", self)
    }

    /// Named elements reachable from this type.
    ///
    /// `Tuple(a T, b U)` and `Nested(a T, b U)` expose their elements;
    /// arrays expose the elements of their item type. Unnamed tuples have
    /// no elements.
    pub fn named_elements(&self) -> Vec<(&str, &NativeType)> {
        let base = self.unwrap_modifiers();
        match base.name.as_str() {
            "Tuple" | "Nested" => base
                .args
                .iter()
                .filter_map(|arg| match arg {
                    TypeArg::Named { name, ty } => Some((name.as_str(), ty)),
                    _ => None,
                })
                .collect(),
            "Array" => match base.args.as_slice() {
                [TypeArg::Type(item)] => item.named_elements(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            let rendered: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
            write!(f, "({})", rendered.join(", "))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for NativeType {
    type Err = NativeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NativeType::parse(s)
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Recursive descent over the token stream.
struct TypeParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> TypeParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> NativeTypeError {
        NativeTypeError::new(self.input, reason)
    }

    fn parse_type(&mut self) -> Result<NativeType, NativeTypeError> {
        let name = match self.next() {
            Some(Token::Word(word)) => word.value,
            Some(other) => return Err(self.error(format!("expected a type name, found '{}'", other))),
            None => return Err(self.error("expected a type name, found end of input")),
        };

        let mut args = Vec::new();
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
                return Ok(NativeType { name, args });
            }
            loop {
                args.push(self.parse_arg()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    Some(other) => {
                        return Err(self.error(format!("expected ',' or ')', found '{}'", other)))
                    }
                    None => return Err(self.error(format!("unclosed argument list for {}", name))),
                }
            }
        }

        Ok(NativeType { name, args })
    }

    fn parse_arg(&mut self) -> Result<TypeArg, NativeTypeError> {
        match self.peek() {
            Some(Token::Word(_)) => {
                // `name Type` inside tuples and nested structures
                if matches!(self.peek_at(1), Some(Token::Word(_))) {
                    let name = match self.next() {
                        Some(Token::Word(word)) => word.value,
                        _ => return Err(self.error("expected an element name")),
                    };
                    let ty = self.parse_type()?;
                    Ok(TypeArg::Named { name, ty })
                } else {
                    Ok(TypeArg::Type(self.parse_type()?))
                }
            }
            Some(Token::Number(_, _)) | Some(Token::Minus) => Ok(TypeArg::Number(self.parse_number()?)),
            Some(Token::SingleQuotedString(_)) => {
                let text = match self.next() {
                    Some(Token::SingleQuotedString(s)) => format!("'{}'", s.replace('\'', "\\'")),
                    _ => return Err(self.error("expected a string literal")),
                };
                // enum members: 'label' = 1
                if self.peek() == Some(&Token::Eq) {
                    self.pos += 1;
                    let value = self.parse_number()?;
                    return Ok(TypeArg::Literal(format!("{} = {}", text, value)));
                }
                Ok(TypeArg::Literal(text))
            }
            Some(other) => Err(self.error(format!("unexpected token '{}'", other))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_number(&mut self) -> Result<String, NativeTypeError> {
        let negative = if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            true
        } else {
            false
        };
        match self.next() {
            Some(Token::Number(n, _)) if negative => Ok(format!("-{}", n)),
            Some(Token::Number(n, _)) => Ok(n),
            Some(other) => Err(self.error(format!("expected a number, found '{}'", other))),
            None => Err(self.error("expected a number, found end of input")),
        }
    }
}
