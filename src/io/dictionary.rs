//! Field dictionary text: `key value;` entries and `key { ... }` blocks.
//!
//! The grammar is the small subset field headers use: words, numbers,
//! quoted strings, `( ) [ ]` punctuation inside values, `//` and `/* */`
//! comments. Entry order is preserved on write.

use crate::io::field_data::FieldDataEntry;
use crate::mesh_error::CoherentMeshError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Compound list types that may hold coherent data, with their component count.
static COMPOUNDS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        ("List<scalar>", 1),
        ("List<vector>", 3),
        ("List<sphericalTensor>", 1),
        ("List<symmTensor>", 6),
        ("List<tensor>", 9),
    ])
});

/// Components per element of a registered compound type.
pub fn compound_components(name: &str) -> Option<usize> {
    COMPOUNDS.get(name).copied()
}

/// Canonical compound type for `n` components.
pub fn compound_for_components(n: usize) -> Option<&'static str> {
    match n {
        1 => Some("List<scalar>"),
        3 => Some("List<vector>"),
        6 => Some("List<symmTensor>"),
        9 => Some("List<tensor>"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Label(i64),
    Scalar(f64),
    Str(String),
    /// One of `( ) [ ]`.
    Punct(char),
}

impl Token {
    pub fn as_word(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<i64> {
        match self {
            Token::Label(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Token::Label(v) => Some(*v as f64),
            Token::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    fn classify(raw: &str) -> Token {
        let b = raw.as_bytes();
        let numeric = b[0].is_ascii_digit()
            || (matches!(b[0], b'-' | b'+' | b'.') && b.get(1).is_some_and(|c| c.is_ascii_digit() || *c == b'.'));
        if numeric {
            if let Ok(v) = raw.parse::<i64>() {
                return Token::Label(v);
            }
            if let Ok(v) = raw.parse::<f64>() {
                return Token::Scalar(v);
            }
        }
        Token::Word(raw.to_string())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Label(v) => write!(f, "{v}"),
            // Debug keeps the decimal point and switches to exponents for extremes
            Token::Scalar(v) => write!(f, "{v:?}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Punct(c) => write!(f, "{c}"),
        }
    }
}

/// Tokens joined the way they are written in a header.
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_open = true;
    for t in tokens {
        let closing = matches!(t, Token::Punct(')' | ']'));
        if !prev_open && !closing {
            out.push(' ');
        }
        out.push_str(&t.to_string());
        prev_open = matches!(t, Token::Punct('(' | '['));
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Primitive(Vec<Token>),
    Dict(Dictionary),
    Field(FieldDataEntry),
}

/// Ordered keyword -> entry map. The name is the scoped path of the
/// dictionary (`p/boundaryField/inlet`) and seeds field data ids.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary {
    name: String,
    entries: Vec<(String, Entry)>,
}

impl Dictionary {
    pub fn new(name: impl Into<String>) -> Self {
        Dictionary {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scoped path of `key` inside this dictionary.
    pub fn scoped(&self, key: &str) -> String {
        if self.name.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.name)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Entry)> {
        self.entries.iter_mut().map(|(k, e)| (k.as_str(), e))
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// Replace `key` in place, or append it.
    pub fn set(&mut self, key: impl Into<String>, entry: Entry) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = entry,
            None => self.entries.push((key, entry)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let i = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(i).1)
    }

    fn missing(&self, key: &str) -> CoherentMeshError {
        CoherentMeshError::MissingEntry {
            dict: self.name.clone(),
            key: key.to_string(),
        }
    }

    pub fn sub_dict(&self, key: &str) -> Result<&Dictionary, CoherentMeshError> {
        match self.get(key) {
            Some(Entry::Dict(d)) => Ok(d),
            _ => Err(self.missing(key)),
        }
    }

    pub fn sub_dict_mut(&mut self, key: &str) -> Result<&mut Dictionary, CoherentMeshError> {
        let err = self.missing(key);
        match self.get_mut(key) {
            Some(Entry::Dict(d)) => Ok(d),
            _ => Err(err),
        }
    }

    pub fn primitive(&self, key: &str) -> Result<&[Token], CoherentMeshError> {
        match self.get(key) {
            Some(Entry::Primitive(t)) => Ok(t),
            _ => Err(self.missing(key)),
        }
    }

    /// The single word of a `key word;` entry.
    pub fn word(&self, key: &str) -> Result<&str, CoherentMeshError> {
        match self.primitive(key)? {
            [Token::Word(w)] => Ok(w),
            other => Err(CoherentMeshError::UnexpectedToken {
                context: self.scoped(key),
                expected: "a single word".into(),
                found: join_tokens(other),
            }),
        }
    }

    pub fn field(&self, key: &str) -> Result<&FieldDataEntry, CoherentMeshError> {
        match self.get(key) {
            Some(Entry::Field(f)) => Ok(f),
            _ => Err(self.missing(key)),
        }
    }

    /// Every field data entry, depth first in entry order.
    pub fn field_entries_mut(&mut self) -> Vec<&mut FieldDataEntry> {
        let mut out = Vec::new();
        for (_, e) in self.entries.iter_mut() {
            match e {
                Entry::Field(f) => out.push(f),
                Entry::Dict(d) => out.extend(d.field_entries_mut()),
                Entry::Primitive(_) => {}
            }
        }
        out
    }

    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, CoherentMeshError> {
        let mut dict = Dictionary::new(name);
        let mut lx = Lexer::new(text);
        parse_entries(&mut lx, &mut dict, false)?;
        Ok(dict)
    }

    fn fmt_entries(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "    ".repeat(depth);
        for (key, e) in &self.entries {
            match e {
                Entry::Primitive(t) if t.is_empty() => writeln!(f, "{pad}{key};")?,
                Entry::Primitive(t) => writeln!(f, "{pad}{key:<15} {};", join_tokens(t))?,
                Entry::Dict(d) => {
                    writeln!(f, "{pad}{key}")?;
                    writeln!(f, "{pad}{{")?;
                    d.fmt_entries(f, depth + 1)?;
                    writeln!(f, "{pad}}}")?;
                }
                Entry::Field(fd) => writeln!(f, "{pad}{key:<15} {fd};")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_entries(f, 0)
    }
}

#[derive(Debug)]
enum Lexeme {
    Token(Token),
    Open,
    Close,
    End,
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { text, pos: 0, line: 1 }
    }

    fn peek_at(&self, k: usize) -> Option<u8> {
        self.text.as_bytes().get(self.pos + k).copied()
    }

    fn error(&self, reason: impl Into<String>) -> CoherentMeshError {
        CoherentMeshError::DictParse {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), CoherentMeshError> {
        loop {
            match (self.peek_at(0), self.peek_at(1)) {
                (Some(b'\n'), _) => {
                    self.line += 1;
                    self.pos += 1;
                }
                (Some(c), _) if c.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while self.peek_at(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.line;
                    self.pos += 2;
                    loop {
                        match (self.peek_at(0), self.peek_at(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(c), _) => {
                                if c == b'\n' {
                                    self.line += 1;
                                }
                                self.pos += 1;
                            }
                            (None, _) => {
                                return Err(self.error(format!("comment opened on line {start} never closes")));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next(&mut self) -> Result<Option<Lexeme>, CoherentMeshError> {
        self.skip_trivia()?;
        let Some(c) = self.peek_at(0) else {
            return Ok(None);
        };
        let lexeme = match c {
            b'{' => Lexeme::Open,
            b'}' => Lexeme::Close,
            b';' => Lexeme::End,
            b'(' | b')' | b'[' | b']' => Lexeme::Token(Token::Punct(c as char)),
            b'"' => {
                let start = self.pos + 1;
                let len = self.text[start..]
                    .find('"')
                    .ok_or_else(|| self.error("unterminated string"))?;
                let s = self.text[start..start + len].to_string();
                self.line += s.matches('\n').count();
                self.pos = start + len + 1;
                return Ok(Some(Lexeme::Token(Token::Str(s))));
            }
            _ => {
                let start = self.pos;
                while self
                    .peek_at(0)
                    .is_some_and(|c| !c.is_ascii_whitespace() && !b"{};()[]\"".contains(&c))
                {
                    self.pos += 1;
                }
                return Ok(Some(Lexeme::Token(Token::classify(&self.text[start..self.pos]))));
            }
        };
        self.pos += 1;
        Ok(Some(lexeme))
    }
}

fn parse_entries(lx: &mut Lexer<'_>, dict: &mut Dictionary, nested: bool) -> Result<(), CoherentMeshError> {
    loop {
        let key = match lx.next()? {
            None if nested => return Err(lx.error(format!("block `{}` is not closed", dict.name()))),
            None => return Ok(()),
            Some(Lexeme::Close) if nested => return Ok(()),
            Some(Lexeme::Close) => return Err(lx.error("unbalanced `}`")),
            Some(Lexeme::End) => continue,
            Some(Lexeme::Token(Token::Word(k) | Token::Str(k))) => k,
            Some(other) => return Err(lx.error(format!("expected a keyword, found {other:?}"))),
        };
        match lx.next()? {
            Some(Lexeme::Open) => {
                let mut sub = Dictionary::new(dict.scoped(&key));
                parse_entries(lx, &mut sub, true)?;
                dict.set(key, Entry::Dict(sub));
            }
            Some(Lexeme::End) => dict.set(key, Entry::Primitive(Vec::new())),
            Some(Lexeme::Token(first)) => {
                let mut tokens = vec![first];
                loop {
                    match lx.next()? {
                        Some(Lexeme::Token(t)) => tokens.push(t),
                        Some(Lexeme::End) => break,
                        other => {
                            return Err(lx.error(format!("expected `;` after `{key}`, found {other:?}")));
                        }
                    }
                }
                dict.set(key, Entry::Primitive(tokens));
            }
            other => return Err(lx.error(format!("expected a value for `{key}`, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"
FoamFile
{
    version     2.0;
    class       volScalarField;
    object      p;
}
/* pressure */
dimensions      [0 2 -2 0 0 0 0];

internalField   nonuniform List<scalar> 8 p/internalField;

boundaryField
{
    inlet
    {
        type            fixedValue;   // Dirichlet
        value           uniform 1.5;
    }
    walls
    {
        type            noSlip;
        value           uniform (1 0 -2.5e-3);
    }
    empty;
}
"#;

    #[test]
    fn parses_nested_blocks_and_values() {
        let d = Dictionary::parse("p", HEADER).unwrap();
        assert_eq!(d.sub_dict("FoamFile").unwrap().word("class").unwrap(), "volScalarField");
        let internal = d.primitive("internalField").unwrap();
        assert_eq!(internal[0], Token::Word("nonuniform".into()));
        assert_eq!(internal[2], Token::Label(8));
        assert_eq!(internal[3], Token::Word("p/internalField".into()));

        let bf = d.sub_dict("boundaryField").unwrap();
        assert_eq!(bf.name(), "p/boundaryField");
        assert_eq!(bf.keys().collect::<Vec<_>>(), vec!["inlet", "walls", "empty"]);
        let walls = bf.sub_dict("walls").unwrap().primitive("value").unwrap();
        assert_eq!(walls.last(), Some(&Token::Punct(')')));
        assert_eq!(walls[4].as_f64(), Some(-2.5e-3));
    }

    #[test]
    fn written_text_parses_back_to_the_same_dictionary() {
        let d = Dictionary::parse("p", HEADER).unwrap();
        let text = d.to_string();
        assert!(text.contains(" [0 2 -2 0 0 0 0];"));
        assert!(text.contains(" uniform (1 0 -0.0025);"));
        let again = Dictionary::parse("p", &text).unwrap();
        assert_eq!(again.sub_dict("boundaryField").unwrap().len(), 3);
        assert_eq!(again.primitive("internalField").unwrap(), d.primitive("internalField").unwrap());
    }

    #[test]
    fn parse_errors_carry_the_line() {
        let err = Dictionary::parse("x", "a 1;\nb { c 2;\n").unwrap_err();
        assert!(matches!(err, CoherentMeshError::DictParse { line: 3, .. }));
        let err = Dictionary::parse("x", "a 1\n}").unwrap_err();
        assert!(matches!(err, CoherentMeshError::DictParse { line: 2, .. }));
        assert!(Dictionary::parse("x", "/* open").is_err());
    }

    #[test]
    fn compound_registry() {
        assert_eq!(compound_components("List<vector>"), Some(3));
        assert_eq!(compound_components("List<label>"), None);
        assert_eq!(compound_for_components(6), Some("List<symmTensor>"));
    }
}
