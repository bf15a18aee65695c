//! Tolerant reader for JavaScript object literals embedded in page scripts.
//!
//! Only literal data is understood: objects, arrays, strings, numbers, booleans
//! and `null`/`undefined`. Any other expression (identifier, call, arithmetic)
//! in value position is skipped and read as `null`. Members that cannot be
//! read at all are skipped up to the next `,` of the same object. Nothing is
//! ever evaluated.

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 128;

/// Finds `marker(` in `script` and reads the object literal passed as first argument.
///
/// Returns `Ok(None)` when the marker is absent.
pub fn extract_call_argument(script: &str, marker: &str) -> Result<Option<Value>> {
    let start = match script.find(marker) {
        Some(idx) => idx + marker.len(),
        None => return Ok(None),
    };

    let mut parser = Parser::new(&script[start..]);
    parser.skip_trivia();
    if !parser.eat('(') {
        bail!("Expected `(` after {marker}");
    }
    parser.skip_trivia();
    if parser.peek() != Some('{') {
        bail!("Expected an object literal as first argument of {marker}");
    }
    parser.parse_value(0).map(Some)
}

/// Reads a single object literal, trailing content is ignored.
pub fn parse_object_literal(src: &str) -> Result<Value> {
    let mut parser = Parser::new(src);
    parser.skip_trivia();
    if parser.peek() != Some('{') {
        bail!("Expected an object literal");
    }
    parser.parse_value(0)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skips whitespace and comments.
    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                match trimmed.find('\n') {
                    Some(end) => self.pos += end + 1,
                    None => self.pos = self.src.len(),
                }
            } else if let Some(body) = trimmed.strip_prefix("/*") {
                match body.find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => self.pos = self.src.len(),
                }
            } else {
                return;
            }
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            bail!("Object literal nested too deep");
        }
        self.skip_trivia();
        match self.peek() {
            Some('{') => self.parse_object(depth),
            Some('[') => self.parse_array(depth),
            Some(q @ ('"' | '\'' | '`')) => {
                self.bump();
                self.parse_string(q).map(Value::String)
            }
            Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => Ok(self.parse_number()),
            Some(c) if is_ident_char(c) => {
                let word = self.parse_word();
                match word {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" | "undefined" | "NaN" | "Infinity" => Ok(Value::Null),
                    _ => {
                        self.skip_expression();
                        Ok(Value::Null)
                    }
                }
            }
            Some(_) => {
                self.skip_expression();
                Ok(Value::Null)
            }
            None => Err(anyhow!("Unexpected end of script")),
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<Value> {
        self.bump(); // {
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(']') => bail!("Unbalanced `]` in object literal"),
                None => bail!("Unterminated object literal"),
                _ => {}
            }

            match self.parse_key()? {
                Some(key) => {
                    self.skip_trivia();
                    if self.eat(':') {
                        let value = self.parse_value(depth + 1)?;
                        map.insert(key, value);
                    } else {
                        // shorthand property or method, not data
                        self.skip_expression();
                    }
                }
                None => self.skip_expression(),
            }

            self.skip_trivia();
            match self.peek() {
                Some(',') | Some('}') => {}
                None => bail!("Unterminated object literal"),
                Some(_) => self.skip_expression(),
            }
        }
    }

    fn parse_key(&mut self) -> Result<Option<String>> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.parse_string(q).map(Some)
            }
            Some(c) if is_ident_char(c) => Ok(Some(self.parse_word().to_string())),
            _ => Ok(None),
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value> {
        self.bump(); // [
        let mut values = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(values));
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some('}') => bail!("Unbalanced `}}` in array literal"),
                None => bail!("Unterminated array literal"),
                _ => {}
            }

            values.push(self.parse_value(depth + 1)?);

            self.skip_trivia();
            match self.peek() {
                Some(',') | Some(']') => {}
                None => bail!("Unterminated array literal"),
                Some(_) => self.skip_expression(),
            }
        }
    }

    /// Reads a string body, the opening quote is already consumed.
    fn parse_string(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => bail!("Unterminated string literal"),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    None => bail!("Unterminated string literal"),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('0') => out.push('\0'),
                    Some('u') => out.push(self.parse_unicode_escape()?),
                    Some('\n') => {} // line continuation
                    Some(other) => out.push(other),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char> {
        let code = self.parse_hex4()?;
        if (0xD800..0xDC00).contains(&code) && self.rest().starts_with("\\u") {
            let save = self.pos;
            self.pos += 2;
            let low = self.parse_hex4()?;
            if (0xDC00..0xE000).contains(&low) {
                let c = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                return Ok(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            self.pos = save;
        }
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn parse_hex4(&mut self) -> Result<u32> {
        let hex = self
            .rest()
            .get(..4)
            .ok_or_else(|| anyhow!("Truncated unicode escape"))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| anyhow!("Invalid unicode escape: {hex}"))?;
        self.pos += 4;
        Ok(code)
    }

    fn parse_number(&mut self) -> Value {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let literal = &rest[..len];
        self.pos += len;

        if let Ok(n) = literal.parse::<u64>() {
            return Value::Number(n.into());
        }
        if let Ok(n) = literal.parse::<i64>() {
            return Value::Number(n.into());
        }
        literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }

    fn parse_word(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    /// Skips anything up to the next `,`, `}` or `]` that closes the current level.
    fn skip_expression(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ',' | '}' | ']' if depth == 0 => return,
                '{' | '[' | '(' => depth += 1,
                '}' | ']' | ')' => depth = depth.saturating_sub(1),
                '"' | '\'' | '`' => {
                    self.bump();
                    if self.parse_string(c).is_err() {
                        return;
                    }
                    continue;
                }
                _ => {}
            }
            self.bump();
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_plain_json() {
        let v = parse_object_literal(r#"{"a": 1, "b": [true, null, "x"], "c": {"d": -2.5}}"#)
            .unwrap();
        assert_eq!(v, json!({"a": 1, "b": [true, null, "x"], "c": {"d": -2.5}}));
    }

    #[test]
    fn reads_js_literal() {
        let v = parse_object_literal(
            "{ name: 'Кофта', count: 3, nested: { ok: false, list: [1, 2,], }, }",
        )
        .unwrap();
        assert_eq!(
            v,
            json!({"name": "Кофта", "count": 3, "nested": {"ok": false, "list": [1, 2]}})
        );
    }

    #[test]
    fn expressions_become_null() {
        let v = parse_object_literal(
            "{routes: routes, routesDictionary: routesDictionary, when: new Date(2020, 1), fn: f(1, {a: 2}), n: 1}",
        )
        .unwrap();
        assert_eq!(
            v,
            json!({"routes": null, "routesDictionary": null, "when": null, "fn": null, "n": 1})
        );
    }

    #[test]
    fn skips_unreadable_members() {
        let v = parse_object_literal(r#"{...rest, "nomenclatures": {"12345": {"ordersCount": 42}}}"#)
            .unwrap();
        assert_eq!(v, json!({"nomenclatures": {"12345": {"ordersCount": 42}}}));
    }

    #[test]
    fn string_escapes_and_comments() {
        let v = parse_object_literal(
            "{ /* c */ s: \"a\\\"b\\u0041\", // line\n t: 'it\\'s', u: \"}\" }",
        )
        .unwrap();
        assert_eq!(v, json!({"s": "a\"bA", "t": "it's", "u": "}"}));
    }

    #[test]
    fn call_argument() {
        let script = "var x = 1; wb.spa.init({router: {ssrModel: {selectedNomenclature: {ordersCount: 7}}}});";
        let v = extract_call_argument(script, "wb.spa.init").unwrap().unwrap();
        assert_eq!(v["router"]["ssrModel"]["selectedNomenclature"]["ordersCount"], json!(7));

        assert!(extract_call_argument(script, "wb.product.DomReady.init")
            .unwrap()
            .is_none());
    }

    #[test]
    fn broken_call_argument_is_an_error() {
        assert!(extract_call_argument("wb.spa.init(config);", "wb.spa.init").is_err());
        assert!(extract_call_argument("wb.spa.init({a: 1", "wb.spa.init").is_err());
    }

    #[test]
    fn mismatched_closers_are_errors() {
        assert!(parse_object_literal("{a: 1 ]}").is_err());
        assert!(parse_object_literal("{a: [1 }]}").is_err());
        assert!(parse_object_literal("{a: ]}").is_err());
        assert!(parse_object_literal("{a: [}]}").is_err());
        assert!(extract_call_argument("wb.spa.init({router: [1, 2}});", "wb.spa.init").is_err());
    }
}
