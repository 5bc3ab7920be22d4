//! Field value entries: `uniform v` inline, or `nonuniform List<T> N id`
//! pointing at a coherent block.

use crate::io::dictionary::{Token, compound_components, join_tokens};
use crate::io::field_tag::{FieldTag, Uniformity};
use crate::mesh_error::CoherentMeshError;
use std::fmt;

/// A parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `uniform 1.5` or `uniform (1 0 0)`.
    Uniform(Vec<f64>),
    /// `nonuniform List<vector> 1200 U/internalField`: data in block `id`.
    Coherent {
        compound: String,
        n_components: usize,
        global_size: usize,
        id: String,
    },
}

impl FieldValue {
    /// Interpret the tokens of a primitive entry; `context` names it in errors.
    pub fn parse(context: &str, tokens: &[Token]) -> Result<Self, CoherentMeshError> {
        let unexpected = |expected: &str| CoherentMeshError::UnexpectedToken {
            context: context.to_string(),
            expected: expected.to_string(),
            found: join_tokens(tokens),
        };
        match tokens.first().and_then(Token::as_word) {
            Some("uniform") => parse_uniform(&tokens[1..])
                .map(FieldValue::Uniform)
                .ok_or_else(|| unexpected("a number or a parenthesised tuple")),
            Some("nonuniform") => match &tokens[1..] {
                [Token::Word(compound), Token::Label(n), Token::Word(id)] => {
                    let n_components = compound_components(compound)
                        .ok_or_else(|| unexpected("a registered compound list type"))?;
                    let global_size =
                        usize::try_from(*n).map_err(|_| unexpected("a non-negative element count"))?;
                    Ok(FieldValue::Coherent {
                        compound: compound.clone(),
                        n_components,
                        global_size,
                        id: id.clone(),
                    })
                }
                _ => Err(unexpected("`nonuniform List<T> N id`")),
            },
            _ => Err(unexpected("`uniform` or `nonuniform`")),
        }
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, FieldValue::Uniform(_))
    }
}

fn parse_uniform(tokens: &[Token]) -> Option<Vec<f64>> {
    match tokens {
        [single] => single.as_f64().map(|v| vec![v]),
        [Token::Punct('('), inner @ .., Token::Punct(')')] => inner.iter().map(Token::as_f64).collect(),
        _ => None,
    }
}

/// Tokens of a uniform value: a bare number for one component, a tuple otherwise.
pub fn uniform_tokens(values: &[f64]) -> Vec<Token> {
    match values {
        [v] => vec![Token::Scalar(*v)],
        _ => {
            let mut t = Vec::with_capacity(values.len() + 2);
            t.push(Token::Punct('('));
            t.extend(values.iter().map(|&v| Token::Scalar(v)));
            t.push(Token::Punct(')'));
            t
        }
    }
}

/// Local values of one coherent field entry plus what the writer decided
/// about them.
///
/// `id` is the scoped dictionary path of the entry (`p/internalField`,
/// `p/boundaryField/inlet/value`) and doubles as the storage block name.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDataEntry {
    id: String,
    compound: String,
    n_components: usize,
    values: Vec<f64>,
    n_global: usize,
    tag: FieldTag,
}

impl FieldDataEntry {
    pub fn new(
        id: impl Into<String>,
        compound: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, CoherentMeshError> {
        let id = id.into();
        let compound = compound.into();
        let n_components = compound_components(&compound).ok_or_else(|| CoherentMeshError::UnexpectedToken {
            context: id.clone(),
            expected: "a registered compound list type".into(),
            found: compound.clone(),
        })?;
        if values.len() % n_components != 0 {
            return Err(CoherentMeshError::SizeMismatch {
                context: format!("{id}: values of {compound}"),
                expected: values.len() / n_components * n_components,
                found: values.len(),
            });
        }
        let n_global = values.len() / n_components;
        let tag = FieldTag::of_values(&values, n_components);
        Ok(FieldDataEntry {
            id,
            compound,
            n_components,
            values,
            n_global,
            tag,
        })
    }

    /// Entry with the canonical compound type for `n_components`.
    pub fn from_values(
        id: impl Into<String>,
        n_components: usize,
        values: Vec<f64>,
    ) -> Result<Self, CoherentMeshError> {
        let id = id.into();
        let compound = crate::io::dictionary::compound_for_components(n_components).ok_or_else(|| {
            CoherentMeshError::UnexpectedToken {
                context: id.clone(),
                expected: "1, 3, 6 or 9 components".into(),
                found: n_components.to_string(),
            }
        })?;
        Self::new(id, compound, values)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn compound(&self) -> &str {
        &self.compound
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Replace the local values; the tag follows them.
    pub fn set_values(&mut self, values: Vec<f64>) -> Result<(), CoherentMeshError> {
        if values.len() % self.n_components != 0 {
            return Err(CoherentMeshError::SizeMismatch {
                context: format!("{}: values of {}", self.id, self.compound),
                expected: values.len() / self.n_components * self.n_components,
                found: values.len(),
            });
        }
        self.tag = FieldTag::of_values(&values, self.n_components);
        self.values = values;
        Ok(())
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Local element count.
    pub fn n_elems(&self) -> usize {
        self.values.len() / self.n_components
    }

    /// Element count over all ranks, as written in the header.
    pub fn n_global(&self) -> usize {
        self.n_global
    }

    pub fn set_n_global(&mut self, n: usize) {
        self.n_global = n;
    }

    pub fn tag(&self) -> &FieldTag {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: FieldTag) {
        self.tag = tag;
    }

    pub fn is_uniform(&self) -> bool {
        self.tag.is_uniform()
    }
}

impl fmt::Display for FieldDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.uniformity() == Uniformity::Uniform {
            write!(f, "uniform {}", join_tokens(&uniform_tokens(self.tag.first_element())))
        } else {
            write!(f, "nonuniform {} {} {}", self.compound, self.n_global, self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::dictionary::Dictionary;

    fn tokens(text: &str) -> Vec<Token> {
        let d = Dictionary::parse("", &format!("v {text};")).unwrap();
        d.primitive("v").unwrap().to_vec()
    }

    #[test]
    fn parses_both_value_forms() {
        assert_eq!(
            FieldValue::parse("v", &tokens("uniform 2")).unwrap(),
            FieldValue::Uniform(vec![2.0])
        );
        assert_eq!(
            FieldValue::parse("v", &tokens("uniform (1 0 0.5)")).unwrap(),
            FieldValue::Uniform(vec![1.0, 0.0, 0.5])
        );
        assert_eq!(
            FieldValue::parse("v", &tokens("nonuniform List<vector> 12 U/internalField")).unwrap(),
            FieldValue::Coherent {
                compound: "List<vector>".into(),
                n_components: 3,
                global_size: 12,
                id: "U/internalField".into(),
            }
        );
    }

    #[test]
    fn rejects_malformed_values() {
        for bad in ["nonuniform List<label> 3 x", "uniform", "calculated", "nonuniform List<scalar> x"] {
            assert!(
                matches!(
                    FieldValue::parse("v", &tokens(bad)),
                    Err(CoherentMeshError::UnexpectedToken { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn display_follows_the_tag() {
        let mut e = FieldDataEntry::from_values("U/internalField", 3, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(e.n_elems(), 2);
        assert!(e.is_uniform());
        assert_eq!(e.to_string(), "uniform (1.0 0.0 0.0)");

        e.set_values(vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0]).unwrap();
        e.set_n_global(8);
        assert_eq!(e.to_string(), "nonuniform List<vector> 8 U/internalField");
        assert!(e.set_values(vec![1.0]).is_err());
    }
}
