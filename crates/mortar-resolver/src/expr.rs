//! Manifest expression evaluation.
//!
//! `enable` and `accept` conditions and `prefer`/`require`/`reflect`
//! assignment blocks are kept as text in the manifest and evaluated here
//! against a [`VariableSet`].
//!
//! Condition grammar:
//!
//! ```text
//! expr    := and { '||' and }
//! and     := unary { '&&' unary }
//! unary   := '!' unary | primary
//! primary := '(' expr ')' | operand [ ('==' | '!=') operand ]
//! operand := 'true' | 'false' | quoted string | variable name
//! ```
//!
//! An undefined variable evaluates to `false`. Assignment blocks are
//! `name = literal` entries separated by `;` or newlines.

use mortar_core::{Value, VariableSet};
use thiserror::Error;

/// Error produced for a malformed expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid expression '{text}': {reason}")]
pub struct ExprError {
    /// The expression text.
    pub text: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ExprError {
    fn new(text: &str, reason: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

/// Evaluate a condition to its truth value.
pub fn evaluate_condition(text: &str, vars: &VariableSet) -> Result<bool, ExprError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens: &tokens,
        pos: 0,
        vars,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::new(text, "trailing tokens"));
    }
    Ok(value.truthy())
}

/// Parse an assignment block into `(name, value)` pairs.
pub fn parse_assignments(text: &str) -> Result<Vec<(String, Value)>, ExprError> {
    let mut out = Vec::new();
    for entry in text.split(['\n', ';']) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| ExprError::new(text, format!("expected assignment, got '{entry}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ExprError::new(text, "empty variable name"));
        }
        out.push((name.to_string(), Value::parse(value)));
    }
    Ok(out)
}

/// Apply an assignment block to a variable set.
pub fn apply_assignments(text: &str, vars: &mut VariableSet) -> Result<(), ExprError> {
    for (name, value) in parse_assignments(text)? {
        vars.set(name, value);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    True,
    False,
    Str(String),
    Var(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '&' => match chars.next() {
                Some((_, '&')) => tokens.push(Token::And),
                _ => return Err(ExprError::new(text, "expected '&&'")),
            },
            '|' => match chars.next() {
                Some((_, '|')) => tokens.push(Token::Or),
                _ => return Err(ExprError::new(text, "expected '||'")),
            },
            '=' => match chars.next() {
                Some((_, '=')) => tokens.push(Token::Eq),
                _ => return Err(ExprError::new(text, "expected '=='")),
            },
            '!' => {
                if chars.peek().is_some_and(|&(_, c)| c == '=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = None;
                for (j, c) in chars.by_ref() {
                    if c == quote {
                        end = Some(j);
                        break;
                    }
                }
                let end = end.ok_or_else(|| ExprError::new(text, "unterminated string"))?;
                tokens.push(Token::Str(text[start..end].to_string()));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                let mut end = text.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                        chars.next();
                    } else {
                        end = j;
                        break;
                    }
                }
                let word = &text[start..end];
                tokens.push(match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Var(word.to_string()),
                });
            }
            _ => return Err(ExprError::new(text, format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    pos: usize,
    vars: &'a VariableSet,
}

impl<'a> Parser<'a> {
    // Tokens borrow from the token slice, not the parser, so arms can
    // keep using the parser while holding one.
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Value, ExprError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.and()?;
            lhs = Value::Bool(lhs.truthy() || rhs.truthy());
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Value, ExprError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.unary()?;
            lhs = Value::Bool(lhs.truthy() && rhs.truthy());
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Value, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            let v = self.unary()?;
            return Ok(Value::Bool(!v.truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, ExprError> {
        if self.peek() == Some(&Token::LParen) {
            self.bump();
            let v = self.expr()?;
            if self.bump() != Some(&Token::RParen) {
                return Err(ExprError::new(self.text, "expected ')'"));
            }
            return Ok(v);
        }

        let lhs = self.operand()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.bump();
                let rhs = self.operand()?;
                Ok(Value::Bool(values_equal(&lhs, &rhs)))
            }
            Some(Token::Ne) => {
                self.bump();
                let rhs = self.operand()?;
                Ok(Value::Bool(!values_equal(&lhs, &rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn operand(&mut self) -> Result<Value, ExprError> {
        match self.bump() {
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::Var(name)) => Ok(self
                .vars
                .get(name)
                .cloned()
                .unwrap_or(Value::Bool(false))),
            other => Err(ExprError::new(
                self.text,
                format!("expected operand, got {other:?}"),
            )),
        }
    }
}

/// Compare values; a bool and the strings `true`/`false` compare equal so
/// that `config.x == 'true'` behaves as written.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s == if *x { "true" } else { "false" }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn vars(pairs: &[(&str, Value)]) -> VariableSet {
        let mut set = VariableSet::new();
        for (k, v) in pairs {
            set.set((*k).to_string(), v.clone());
        }
        set
    }

    #[test_case("true", true)]
    #[test_case("false", false)]
    #[test_case("!false", true)]
    #[test_case("true && false", false)]
    #[test_case("true || false", true)]
    #[test_case("(true || false) && true", true)]
    fn test_boolean_algebra(expr: &str, expected: bool) {
        assert_eq!(
            evaluate_condition(expr, &VariableSet::new()).unwrap(),
            expected
        );
    }

    #[test]
    fn test_variable_lookup() {
        let vars = vars(&[("config.libfoo.shared", Value::Bool(true))]);
        assert!(evaluate_condition("config.libfoo.shared", &vars).unwrap());
        assert!(!evaluate_condition("config.libfoo.other", &vars).unwrap());
    }

    #[test]
    fn test_comparison() {
        let vars = vars(&[("config.libfoo.backend", Value::String("ssl".to_string()))]);
        assert!(evaluate_condition("config.libfoo.backend == 'ssl'", &vars).unwrap());
        assert!(evaluate_condition("config.libfoo.backend != 'gnutls'", &vars).unwrap());
    }

    #[test]
    fn test_bool_string_comparison() {
        let vars = vars(&[("config.x", Value::Bool(true))]);
        assert!(evaluate_condition("config.x == 'true'", &vars).unwrap());
    }

    #[test]
    fn test_malformed() {
        assert!(evaluate_condition("&& true", &VariableSet::new()).is_err());
        assert!(evaluate_condition("(true", &VariableSet::new()).is_err());
        assert!(evaluate_condition("'unterminated", &VariableSet::new()).is_err());
    }

    #[test]
    fn test_assignments() {
        let parsed = parse_assignments("config.a = true; config.b = 'x'").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], ("config.a".to_string(), Value::Bool(true)));
        assert_eq!(
            parsed[1],
            ("config.b".to_string(), Value::String("x".to_string()))
        );
    }

    #[test]
    fn test_apply_assignments() {
        let mut set = VariableSet::new();
        apply_assignments("config.a = true", &mut set).unwrap();
        assert_eq!(set.get("config.a"), Some(&Value::Bool(true)));
    }
}
