//! Recursive-descent parser for the textual expression form.
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := '-' unary | atom
//! atom  := INT | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use crate::error::*;

use super::Expr;

pub(super) fn parse_expr(input: &str) -> Result<Expr> {
    let mut parser = Parser { input, bytes: input.as_bytes(), pos: 0 };
    let expr = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return parser.fail("trailing input");
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn fail<T>(&self, reason: &'static str) -> Result<T> {
        ExprParseSnafu { input: self.input, offset: self.pos, reason }.fail()
    }

    fn skip_ws(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
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

    fn expr(&mut self) -> Result<Expr> {
        let mut acc = self.term()?;
        loop {
            if self.eat(b'+') {
                acc = acc + self.term()?;
            } else if self.eat(b'-') {
                acc = acc - self.term()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut acc = self.unary()?;
        loop {
            if self.eat(b'*') {
                acc = acc * self.unary()?;
            } else if self.eat(b'/') {
                acc = Expr::floor_div(acc, self.unary()?);
            } else if self.eat(b'%') {
                acc = Expr::modulo(acc, self.unary()?);
            } else {
                return Ok(acc);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(b'-') { Ok(-self.unary()?) } else { self.atom() }
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if !self.eat(b')') {
                    return self.fail("expected `)`");
                }
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
                    self.pos += 1;
                }
                match self.input[start..self.pos].parse::<i64>() {
                    Ok(v) => Ok(Expr::Int(v)),
                    Err(_) => self.fail("integer literal out of range"),
                }
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let start = self.pos;
                while self.bytes.get(self.pos).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
                    self.pos += 1;
                }
                let input = self.input;
                let ident = &input[start..self.pos];
                if self.peek() == Some(b'(') {
                    self.call(ident)
                } else {
                    Ok(Expr::sym(ident))
                }
            }
            Some(_) => self.fail("unexpected character"),
            None => self.fail("unexpected end of input"),
        }
    }

    fn call(&mut self, ident: &str) -> Result<Expr> {
        let fold: fn(Expr, Expr) -> Expr = match ident {
            "min" | "Min" => Expr::min,
            "max" | "Max" => Expr::max,
            _ => return self.fail("unknown function"),
        };
        self.pos += 1;
        let mut acc = self.expr()?;
        let mut arity = 1;
        while self.eat(b',') {
            acc = fold(acc, self.expr()?);
            arity += 1;
        }
        if !self.eat(b')') {
            return self.fail("expected `)`");
        }
        if arity < 2 {
            return self.fail("min/max take at least two arguments");
        }
        Ok(acc)
    }
}
