//! Tokenizer and recursive-descent parser for the property syntax.

use crate::{ParseError, Props, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
}

fn tokenize(raw: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // comments
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(ParseError {
                        line: start_line,
                        message: "unterminated block comment".to_string(),
                    });
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(ParseError {
                        line: start_line,
                        message: "unterminated string".to_string(),
                    });
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    if let Some(&escaped) = chars.get(i) {
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 1;
                    }
                    continue;
                }
                if ch == '\n' {
                    line += 1;
                }
                text.push(ch);
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                line: start_line,
            });
            continue;
        }

        if matches!(c, '=' | ';' | '{' | '}' | '[' | ']' | ',') {
            tokens.push(Spanned {
                token: Token::Punct(c),
                line,
            });
            i += 1;
            continue;
        }

        let starts_number = c.is_ascii_digit()
            || ((c == '-' || c == '+' || c == '.')
                && chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_digit() || *n == '.'));
        if starts_number {
            let start = i;
            i += 1;
            while i < chars.len() {
                let ch = chars[i];
                let exponent_sign =
                    (ch == '-' || ch == '+') && matches!(chars[i - 1], 'e' | 'E');
                if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| ParseError {
                line,
                message: format!("invalid number '{text}'"),
            })?;
            tokens.push(Spanned {
                token: Token::Number(value),
                line,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() {
                let ch = chars[i];
                if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Spanned {
                token: Token::Ident(chars[start..i].iter().collect()),
                line,
            });
            continue;
        }

        return Err(ParseError {
            line,
            message: format!("unexpected character '{c}'"),
        });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect_punct(&mut self, want: char) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::Punct(c)) if c == want => Ok(()),
            Some(other) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{want}', found {other:?}")))
            }
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    /// Parses `key = value;` entries until `terminator` (or end of input).
    fn entries(&mut self, terminator: Option<char>) -> Result<Props, ParseError> {
        let mut props = Props::new();
        loop {
            match self.peek() {
                None => {
                    if let Some(t) = terminator {
                        return Err(self.error(format!("missing '{t}'")));
                    }
                    return Ok(props);
                }
                Some(Token::Punct(c)) if Some(*c) == terminator => {
                    self.pos += 1;
                    return Ok(props);
                }
                Some(Token::Punct(';')) => {
                    self.pos += 1;
                }
                Some(Token::Ident(_)) => {
                    let line = self.line();
                    let Some(Token::Ident(key)) = self.next() else {
                        return Err(self.error("expected a property name"));
                    };
                    self.expect_punct('=')?;
                    let value = self.value()?;
                    props.set(&key, value).map_err(|err| ParseError {
                        line,
                        message: err.to_string(),
                    })?;
                }
                Some(other) => {
                    let msg = format!("expected a property name, found {other:?}");
                    return Err(self.error(msg));
                }
            }
        }
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.next() {
            Some(Token::Number(x)) => Ok(Value::Number(x)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Str(word),
            }),
            Some(Token::Punct('[')) => {
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(&Token::Punct(']')) {
                        self.pos += 1;
                        break;
                    }
                    items.push(self.value()?);
                    match self.next() {
                        Some(Token::Punct(',')) => continue,
                        Some(Token::Punct(']')) => break,
                        _ => return Err(self.error("expected ',' or ']' in array")),
                    }
                }
                Ok(Value::Array(items))
            }
            Some(Token::Punct('{')) => Ok(Value::Table(self.entries(Some('}'))?)),
            Some(other) => {
                self.pos -= 1;
                Err(self.error(format!("expected a value, found {other:?}")))
            }
            None => Err(self.error("expected a value, found end of input")),
        }
    }
}

pub(crate) fn parse_props(raw: &str) -> Result<Props, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(raw)?,
        pos: 0,
    };
    parser.entries(None)
}

/// Parses a single value, e.g. the right-hand side of an override.
pub fn parse_value(raw: &str) -> Result<Value, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(raw)?,
        pos: 0,
    };
    let value = parser.value()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after value"));
    }
    Ok(value)
}
