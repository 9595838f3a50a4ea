//! PDF value model and the recursive value parser

use std::collections::BTreeMap;

use crate::error::{PDFImportError, PDFImportResult};

use super::lexer::Lexer;

/// Dictionary mapping name tokens (with leading `/`) to values.
///
/// A `BTreeMap` keeps iteration deterministic, which makes serialized output
/// and output-id assignment reproducible across runs.
pub type Dictionary = BTreeMap<String, Value>;

/// A parsed PDF value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null object
    Null,
    /// `true` or `false`
    Boolean(bool),
    /// Numeric literal without a decimal point
    Integer(i64),
    /// Numeric literal with a decimal point
    Real(f64),
    /// Name token, stored with its leading `/`
    Name(String),
    /// Literal string; backslash escapes are kept verbatim
    StringLit(Vec<u8>),
    /// Hex string; raw hex text between `<` and `>`
    HexString(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Dictionary of values
    Dictionary(Dictionary),
    /// Indirect reference (`id gen R`)
    IndirectRef { id: i64, gen: i64 },
    /// Object declaration (`id gen obj`); transient while parsing
    ObjectDecl { id: i64, gen: i64 },
    /// A materialized indirect object
    Object {
        id: i64,
        gen: i64,
        value: Box<Value>,
    },
    /// Stream: its dictionary plus raw (undecoded) payload bytes
    Stream { dict: Box<Value>, bytes: Vec<u8> },
    /// Any other bare keyword (`obj`, `R`, `endstream`, ...)
    Token(String),
}

impl Value {
    /// Read either numeric variant as `f64`; box math goes through this
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Integer value, if this is an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Name text (including the leading `/`), if this is a name
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Dictionary view of this value, unwrapping a materialized object
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(d) => Some(d),
            Value::Object { value, .. } => value.as_dict(),
            Value::Stream { dict, .. } => dict.as_dict(),
            _ => None,
        }
    }

    /// Dictionary entry lookup through `as_dict`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Unwrap a materialized object to its inner value
    pub fn unwrap_object(&self) -> &Value {
        match self {
            Value::Object { value, .. } => value,
            other => other,
        }
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+'))
}

fn parse_int(token: &str) -> PDFImportResult<i64> {
    token
        .parse::<i64>()
        .map_err(|_| PDFImportError::parse(format!("invalid object number: {token}")))
}

/// Parse one value given its leading token
pub fn parse_value(lexer: &mut Lexer, token: &str) -> PDFImportResult<Value> {
    match token {
        "<" => {
            // Hex string: raw hex text up to '>'.
            let mut hex = Vec::new();
            loop {
                match lexer.read_byte() {
                    Some(b'>') => break,
                    Some(b) => hex.push(b),
                    None => return Err(PDFImportError::parse("unterminated hex string")),
                }
            }
            Ok(Value::HexString(hex))
        }

        "<<" => {
            let mut dict = Dictionary::new();
            loop {
                let key = lexer.read_token();
                if key.is_empty() {
                    return Err(PDFImportError::parse("unexpected end of input in dictionary"));
                }
                if key == ">>" {
                    break;
                }

                let value_token = lexer.read_token();
                if value_token.is_empty() {
                    return Err(PDFImportError::parse("unexpected end of input in dictionary"));
                }
                let value = parse_value(lexer, &value_token)
                    .map_err(|e| PDFImportError::parse(format!("bad value for key {key}: {e}")))?;

                // A dictionary close in value position means the value is
                // missing; record null for the key and terminate.
                if matches!(&value, Value::Token(t) if t == ">>") {
                    dict.insert(key, Value::Null);
                    break;
                }

                dict.insert(key, value);
            }
            Ok(Value::Dictionary(dict))
        }

        "[" => {
            let mut array = Vec::new();
            loop {
                let item_token = lexer.read_token();
                if item_token.is_empty() {
                    return Err(PDFImportError::parse("unexpected end of input in array"));
                }
                if item_token == "]" {
                    break;
                }
                array.push(parse_value(lexer, &item_token)?);
            }
            Ok(Value::Array(array))
        }

        "(" => {
            // Literal string with balanced parentheses. A backslash and the
            // byte it escapes are both kept; consumers treat the bytes as
            // opaque.
            let mut buf = Vec::new();
            let mut open = 1;
            while open > 0 {
                let b = lexer
                    .read_byte()
                    .ok_or_else(|| PDFImportError::parse("unterminated literal string"))?;
                match b {
                    b'(' => open += 1,
                    b')' => open -= 1,
                    b'\\' => {
                        let escaped = lexer
                            .read_byte()
                            .ok_or_else(|| PDFImportError::parse("unterminated literal string"))?;
                        buf.push(b);
                        buf.push(escaped);
                        continue;
                    }
                    _ => {}
                }
                if open > 0 {
                    buf.push(b);
                }
            }
            Ok(Value::StringLit(buf))
        }

        "stream" => Err(PDFImportError::parse(
            "stream keyword is not valid in value position",
        )),

        _ => {
            if is_numeric(token) {
                // A numeric token may be the head of `id gen R` or
                // `id gen obj`; look ahead two tokens to decide.
                let t2 = lexer.read_token();
                if !t2.is_empty() {
                    if is_numeric(&t2) {
                        let t3 = lexer.read_token();
                        if !t3.is_empty() {
                            match t3.as_str() {
                                "obj" => {
                                    return Ok(Value::ObjectDecl {
                                        id: parse_int(token)?,
                                        gen: parse_int(&t2)?,
                                    });
                                }
                                "R" => {
                                    return Ok(Value::IndirectRef {
                                        id: parse_int(token)?,
                                        gen: parse_int(&t2)?,
                                    });
                                }
                                _ => lexer.push_token(t3),
                            }
                        }
                    }
                    lexer.push_token(t2);
                }

                if let Ok(n) = token.parse::<i64>() {
                    Ok(Value::Integer(n))
                } else {
                    token
                        .parse::<f64>()
                        .map(Value::Real)
                        .map_err(|_| PDFImportError::parse(format!("invalid number: {token}")))
                }
            } else if token == "true" || token == "false" {
                Ok(Value::Boolean(token == "true"))
            } else if token == "null" {
                Ok(Value::Null)
            } else if token.starts_with('/') {
                Ok(Value::Name(token.to_string()))
            } else {
                Ok(Value::Token(token.to_string()))
            }
        }
    }
}

/// Read the next token and parse one value from it
pub fn read_value(lexer: &mut Lexer) -> PDFImportResult<Value> {
    let token = lexer.read_token();
    if token.is_empty() {
        return Err(PDFImportError::parse("unexpected end of input"));
    }
    parse_value(lexer, &token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Value {
        let mut lexer = Lexer::new(data);
        read_value(&mut lexer).unwrap()
    }

    #[test]
    fn test_dictionary_parsing() {
        let value = parse(b"<< /Type /Page /Count 3 /Scale 1.5 >>");
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get("/Type").unwrap().as_name(), Some("/Page"));
        assert_eq!(dict.get("/Count").unwrap().as_integer(), Some(3));
        assert_eq!(dict.get("/Scale").unwrap().as_real(), Some(1.5));
    }

    #[test]
    fn test_nested_dictionary() {
        let value = parse(b"<</Outer<</Inner 7>>>>");
        let inner = value.get("/Outer").unwrap().get("/Inner").unwrap();
        assert_eq!(inner.as_integer(), Some(7));
    }

    #[test]
    fn test_array_parsing() {
        let value = parse(b"[0 0 612 792]");
        if let Value::Array(items) = value {
            assert_eq!(items.len(), 4);
            assert_eq!(items[2].as_real(), Some(612.0));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn test_indirect_reference() {
        let value = parse(b"<< /Parent 3 0 R >>");
        assert_eq!(
            value.get("/Parent"),
            Some(&Value::IndirectRef { id: 3, gen: 0 })
        );
    }

    #[test]
    fn test_object_declaration() {
        let value = parse(b"12 0 obj");
        assert_eq!(value, Value::ObjectDecl { id: 12, gen: 0 });
    }

    #[test]
    fn test_two_numbers_are_not_a_reference() {
        let mut lexer = Lexer::new(b"[1 2 3]");
        let value = read_value(&mut lexer).unwrap();
        if let Value::Array(items) = value {
            assert_eq!(items, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn test_literal_string_keeps_escapes() {
        let value = parse(b"(a\\(b) ");
        assert_eq!(value, Value::StringLit(b"a\\(b".to_vec()));

        let value = parse(b"(nested (parens) kept)");
        assert_eq!(value, Value::StringLit(b"nested (parens) kept".to_vec()));
    }

    #[test]
    fn test_hex_string() {
        let value = parse(b"<48656C6C6F>");
        assert_eq!(value, Value::HexString(b"48656C6C6F".to_vec()));
    }

    #[test]
    fn test_missing_value_becomes_null() {
        let value = parse(b"<< /Broken >>");
        assert_eq!(value.get("/Broken"), Some(&Value::Null));
    }

    #[test]
    fn test_booleans_and_null() {
        let value = parse(b"[true false null]");
        if let Value::Array(items) = value {
            assert_eq!(
                items,
                vec![Value::Boolean(true), Value::Boolean(false), Value::Null]
            );
        } else {
            panic!("expected array");
        }
    }
}
