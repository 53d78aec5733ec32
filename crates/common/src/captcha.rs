//! Math CAPTCHA solver
//!
//! Challenges render as text such as `2 + 3 =`. The grammar is limited to
//! integer literals, `+`, `-`, `*` (or `×`), unary minus and parentheses:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor ('*' factor)*
//! factor := NUMBER | '-' factor | '(' expr ')'
//! ```
//!
//! Anything outside it is rejected.

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Num(i64),
    Plus,
    Minus,
    Star,
    LParen,
    RParen,
}

/// Evaluate a challenge such as `"3 + 4 ="`
pub fn solve(challenge: &str) -> Result<i64> {
    let expr = challenge.trim();
    let expr = expr.strip_suffix('=').unwrap_or(expr);

    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(Error::Captcha(format!("empty challenge: {:?}", challenge)));
    }

    let mut parser = Parser { tokens: &tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(Error::Captcha(format!("trailing input in {:?}", challenge)));
    }
    Ok(value)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' | '\u{2212}' => Token::Minus,
            '*' | '\u{00d7}' => Token::Star,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '0'..='9' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let digits = &input[start..end];
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| Error::Captcha(format!("number out of range: {}", digits)))?;
                Token::Num(value)
            }
            other => return Err(Error::Captcha(format!("unexpected character {:?}", other))),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<i64> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = match op {
                Token::Plus => value.checked_add(rhs),
                _ => value.checked_sub(rhs),
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64> {
        let mut value = self.factor()?;
        while let Some(Token::Star) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            value = value.checked_mul(rhs).ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Captcha("expression nested too deeply".to_string()));
        }

        let value = match self.next() {
            Some(Token::Num(n)) => n,
            Some(Token::Minus) => self.factor()?.checked_neg().ok_or_else(overflow)?,
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => inner,
                    _ => return Err(Error::Captcha("missing closing parenthesis".to_string())),
                }
            }
            Some(other) => return Err(Error::Captcha(format!("unexpected token {:?}", other))),
            None => return Err(Error::Captcha("unexpected end of expression".to_string())),
        };

        self.depth -= 1;
        Ok(value)
    }
}

fn overflow() -> Error {
    Error::Captcha("arithmetic overflow".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("3 + 4 =", 7 ; "addition")]
    #[test_case("10 - 2 =", 8 ; "subtraction")]
    #[test_case("6 * 7 =", 42 ; "multiplication")]
    #[test_case("2 + 3 * 4", 14 ; "precedence")]
    #[test_case("(2 + 3) * 4 =", 20 ; "parentheses")]
    #[test_case("  1 - 5 =  ", -4 ; "negative result")]
    #[test_case("-3 + 10 =", 7 ; "unary minus")]
    #[test_case("4 × 2 =", 8 ; "multiplication sign")]
    fn test_solves(challenge: &str, expected: i64) {
        assert_eq!(solve(challenge).unwrap(), expected);
    }

    #[test_case("alert(1)" ; "code")]
    #[test_case("process.exit()" ; "identifier")]
    #[test_case("2 / 1 =" ; "division")]
    #[test_case("=" ; "empty")]
    #[test_case("2 + =" ; "dangling operator")]
    #[test_case("(1 + 2 =" ; "unbalanced")]
    #[test_case("1 2 =" ; "adjacent numbers")]
    #[test_case("99999999999999999999 + 1" ; "literal overflow")]
    #[test_case("0x10 =" ; "hex literal")]
    #[test_case("2 x 3 =" ; "letter x")]
    fn test_rejects(challenge: &str) {
        assert!(matches!(solve(challenge), Err(Error::Captcha(_))));
    }

    #[test]
    fn test_multiplication_overflow() {
        assert!(solve("9223372036854775807 * 2").is_err());
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let challenge = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(solve(&challenge).is_err());
    }
}
