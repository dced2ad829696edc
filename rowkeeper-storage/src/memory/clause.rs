//! Clause parsing and evaluation for the in-memory engine.
//!
//! Covers the subset of filter syntax the DAO layer and its callers emit:
//! comparisons, `LIKE`, `IN`, `IS [NOT] NULL`, boolean connectives,
//! parentheses, numeric literals and single-quoted strings whose escapes
//! match [`crate::sanitize`].

use rowkeeper_core::{RowkeeperResult, StorageError, Value, ValueMap};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Number(Value),
    Str(String),
    Op(CmpOp),
    LParen,
    RParen,
    Comma,
    Star,
    Minus,
    Keyword(Keyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    And,
    Or,
    Not,
    Is,
    Null,
    Like,
    In,
    As,
    Asc,
    Desc,
    Count,
    Offset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn invalid(clause: &str, reason: impl Into<String>) -> StorageError {
    StorageError::InvalidClause {
        clause: clause.to_string(),
        reason: reason.into(),
    }
}

impl Keyword {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Is => "is",
            Keyword::Null => "null",
            Keyword::Like => "like",
            Keyword::In => "in",
            Keyword::As => "as",
            Keyword::Asc => "asc",
            Keyword::Desc => "desc",
            Keyword::Count => "count",
            Keyword::Offset => "offset",
        }
    }
}

fn keyword(word: &str) -> Option<Keyword> {
    let keyword = match word.to_ascii_uppercase().as_str() {
        "AND" => Keyword::And,
        "OR" => Keyword::Or,
        "NOT" => Keyword::Not,
        "IS" => Keyword::Is,
        "NULL" => Keyword::Null,
        "LIKE" => Keyword::Like,
        "IN" => Keyword::In,
        "AS" => Keyword::As,
        "ASC" => Keyword::Asc,
        "DESC" => Keyword::Desc,
        "COUNT" => Keyword::Count,
        "OFFSET" => Keyword::Offset,
        _ => return None,
    };
    Some(keyword)
}

/// Split clause text into tokens.
pub(crate) fn tokenize(clause: &str) -> RowkeeperResult<Vec<Token>> {
    let chars: Vec<char> = clause.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let (text, next) = read_string(&chars, i + 1)
                    .ok_or_else(|| invalid(clause, "unterminated string literal"))?;
                tokens.push(Token::Str(text));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&text).ok_or_else(|| {
                    invalid(clause, format!("bad number {}", text))
                })?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match keyword(&word) {
                    Some(k) => tokens.push(Token::Keyword(k)),
                    None => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(invalid(clause, format!("unexpected character {:?}", other)).into()),
        }
    }

    Ok(tokens)
}

/// Read a quoted string body starting after the opening quote. Backslash
/// escapes the next character; a doubled quote is a literal quote.
fn read_string(chars: &[char], mut i: usize) -> Option<(String, usize)> {
    let mut text = String::new();
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                text.push(*chars.get(i + 1)?);
                i += 2;
            }
            '\'' if chars.get(i + 1) == Some(&'\'') => {
                text.push('\'');
                i += 2;
            }
            '\'' => return Some((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    None
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(Value::Long(v));
    }
    text.parse::<f64>().ok().map(Value::Double)
}

/// Bare column name for a possibly qualified identifier.
pub(crate) fn bare_name(ident: &str) -> &str {
    ident.rsplit('.').next().unwrap_or(ident)
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Column(String),
    Literal(Value),
    Count,
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Like {
        value: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    In {
        value: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        value: Box<Expr>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Row data an expression is evaluated against.
pub(crate) struct EvalContext<'a> {
    pub row: &'a ValueMap,
    /// Group size when evaluating against an aggregate row.
    pub group_size: Option<usize>,
}

impl Expr {
    /// Parse a full boolean clause.
    pub(crate) fn parse(clause: &str) -> RowkeeperResult<Expr> {
        let tokens = tokenize(clause)?;
        let mut parser = Parser {
            clause,
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.or()?;
        if parser.pos != tokens.len() {
            return Err(invalid(clause, "trailing tokens").into());
        }
        Ok(expr)
    }

    /// Whether the row satisfies this clause; unknown (NULL) is false.
    pub(crate) fn matches(&self, ctx: &EvalContext<'_>) -> RowkeeperResult<bool> {
        Ok(truthy(&self.eval(ctx)?).unwrap_or(false))
    }

    pub(crate) fn eval(&self, ctx: &EvalContext<'_>) -> RowkeeperResult<Value> {
        let value = match self {
            Expr::Column(name) => ctx.row.get(name).cloned().ok_or_else(|| {
                invalid(name, "no such column")
            })?,
            Expr::Literal(value) => value.clone(),
            Expr::Count => match ctx.group_size {
                Some(size) => Value::Long(size as i64),
                None => return Err(invalid("COUNT", "aggregate outside of a group").into()),
            },
            Expr::Compare(left, op, right) => {
                let ordering = compare(&left.eval(ctx)?, &right.eval(ctx)?);
                boolean(ordering.map(|ordering| match op {
                    CmpOp::Eq => ordering == Ordering::Equal,
                    CmpOp::Ne => ordering != Ordering::Equal,
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::Le => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    CmpOp::Ge => ordering != Ordering::Less,
                }))
            }
            Expr::Like {
                value,
                pattern,
                negated,
            } => {
                let value = value.eval(ctx)?;
                let pattern = pattern.eval(ctx)?;
                if value.is_null() || pattern.is_null() {
                    Value::Null
                } else {
                    let matched = like(&value.to_string(), &pattern.to_string());
                    boolean(Some(matched != *negated))
                }
            }
            Expr::In {
                value,
                list,
                negated,
            } => {
                let value = value.eval(ctx)?;
                if value.is_null() {
                    Value::Null
                } else {
                    let mut found = false;
                    for item in list {
                        if compare(&value, &item.eval(ctx)?) == Some(Ordering::Equal) {
                            found = true;
                            break;
                        }
                    }
                    boolean(Some(found != *negated))
                }
            }
            Expr::IsNull { value, negated } => {
                boolean(Some(value.eval(ctx)?.is_null() != *negated))
            }
            Expr::And(left, right) => {
                match (truthy(&left.eval(ctx)?), truthy(&right.eval(ctx)?)) {
                    (Some(false), _) | (_, Some(false)) => boolean(Some(false)),
                    (Some(true), Some(true)) => boolean(Some(true)),
                    _ => Value::Null,
                }
            }
            Expr::Or(left, right) => {
                match (truthy(&left.eval(ctx)?), truthy(&right.eval(ctx)?)) {
                    (Some(true), _) | (_, Some(true)) => boolean(Some(true)),
                    (Some(false), Some(false)) => boolean(Some(false)),
                    _ => Value::Null,
                }
            }
            Expr::Not(inner) => boolean(truthy(&inner.eval(ctx)?).map(|b| !b)),
        };
        Ok(value)
    }
}

fn boolean(value: Option<bool>) -> Value {
    match value {
        Some(true) => Value::Long(1),
        Some(false) => Value::Long(0),
        None => Value::Null,
    }
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.trim().parse::<f64>().is_ok_and(|v| v != 0.0)),
        other => other.as_f64().map(|v| v != 0.0),
    }
}

/// Order two values; `None` when either is NULL or they cannot be compared.
pub(crate) fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Text(text), number) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|a| a.partial_cmp(&number.as_f64()?)),
        (number, Value::Text(text)) => {
            let b = text.trim().parse::<f64>().ok()?;
            number.as_f64()?.partial_cmp(&b)
        }
        (Value::Integer(_) | Value::Long(_), Value::Integer(_) | Value::Long(_)) => {
            Some(integral(left)?.cmp(&integral(right)?))
        }
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(i64::from(*v)),
        Value::Long(v) => Some(*v),
        _ => None,
    }
}

/// Case-insensitive `LIKE` with `%` and `_` wildcards.
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut any = false;
                for j in 0..=text.len() {
                    any = any || dp[j];
                    next[j] = any;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

// ============================================================================
// PARSER
// ============================================================================

pub(crate) struct Parser<'a> {
    pub clause: &'a str,
    pub tokens: &'a [Token],
    pub pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek() == Some(&Token::Keyword(keyword)) {
            self.pos += 1;
            return true;
        }
        false
    }

    pub(crate) fn expect(&mut self, token: &Token) -> RowkeeperResult<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(invalid(
                self.clause,
                format!("expected {:?}, found {:?}", token, other),
            )
            .into()),
        }
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> StorageError {
        invalid(self.clause, reason)
    }

    fn or(&mut self) -> RowkeeperResult<Expr> {
        let mut left = self.and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> RowkeeperResult<Expr> {
        let mut left = self.not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> RowkeeperResult<Expr> {
        if self.eat_keyword(Keyword::Not) {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> RowkeeperResult<Expr> {
        let left = self.operand()?;

        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.operand()?;
                Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
            }
            Some(Token::Keyword(Keyword::Is)) => {
                self.pos += 1;
                let negated = self.eat_keyword(Keyword::Not);
                if !self.eat_keyword(Keyword::Null) {
                    return Err(self.error("expected NULL after IS").into());
                }
                Ok(Expr::IsNull {
                    value: Box::new(left),
                    negated,
                })
            }
            Some(Token::Keyword(Keyword::Like)) => {
                self.pos += 1;
                Ok(Expr::Like {
                    value: Box::new(left),
                    pattern: Box::new(self.operand()?),
                    negated: false,
                })
            }
            Some(Token::Keyword(Keyword::In)) => {
                self.pos += 1;
                self.in_list(left, false)
            }
            Some(Token::Keyword(Keyword::Not)) => {
                self.pos += 1;
                if self.eat_keyword(Keyword::Like) {
                    Ok(Expr::Like {
                        value: Box::new(left),
                        pattern: Box::new(self.operand()?),
                        negated: true,
                    })
                } else if self.eat_keyword(Keyword::In) {
                    self.in_list(left, true)
                } else {
                    Err(self.error("expected LIKE or IN after NOT").into())
                }
            }
            _ => Ok(left),
        }
    }

    fn in_list(&mut self, value: Expr, negated: bool) -> RowkeeperResult<Expr> {
        self.expect(&Token::LParen)?;
        let mut list = vec![self.operand()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            list.push(self.operand()?);
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::In {
            value: Box::new(value),
            list,
            negated,
        })
    }

    pub(crate) fn operand(&mut self) -> RowkeeperResult<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Number(value)) => Ok(Expr::Literal(value.clone())),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(Value::Long(v))) => Ok(Expr::Literal(Value::Long(-v))),
                Some(Token::Number(Value::Double(v))) => Ok(Expr::Literal(Value::Double(-v))),
                _ => Err(self.error("expected number after '-'").into()),
            },
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::Text(text.clone()))),
            Some(Token::Keyword(Keyword::Null)) => Ok(Expr::Literal(Value::Null)),
            // `count` doubles as the count pseudo-column's alias
            Some(Token::Keyword(Keyword::Count)) if self.peek() != Some(&Token::LParen) => {
                Ok(Expr::Column("count".to_string()))
            }
            Some(Token::Keyword(Keyword::Count)) => {
                self.expect(&Token::LParen)?;
                match self.next() {
                    Some(Token::Star) | Some(Token::Number(_)) => {}
                    _ => return Err(self.error("COUNT takes 1 or *").into()),
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::Count)
            }
            Some(Token::Ident(name)) => Ok(Expr::Column(bare_name(name).to_string())),
            other => Err(self.error(format!("unexpected token {:?}", other)).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ValueMap {
        let mut row = ValueMap::new();
        row.put("_id", 4i64);
        row.put("title", "it's done");
        row.put("importance", 2);
        row.put("estimate", 1.5);
        row.put("notes", Value::Null);
        row
    }

    fn check(clause: &str) -> bool {
        let row = row();
        let ctx = EvalContext {
            row: &row,
            group_size: None,
        };
        Expr::parse(clause).unwrap().matches(&ctx).unwrap()
    }

    #[test]
    fn test_comparisons() {
        assert!(check("_id=4"));
        assert!(check("tasks._id == 4"));
        assert!(check("importance <> 3"));
        assert!(check("estimate >= 1.5 AND estimate < 2"));
        assert!(!check("importance > 2"));
        assert!(check("importance = 2.0"));
    }

    #[test]
    fn test_escaped_strings() {
        assert!(check("title = 'it\\'s done'"));
        assert!(check("title = 'it''s done'"));
        assert!(!check("title = 'its done'"));
    }

    #[test]
    fn test_null_semantics() {
        assert!(check("notes IS NULL"));
        assert!(!check("notes IS NOT NULL"));
        assert!(!check("notes = 'x'"));
        assert!(!check("NOT (notes = 'x')"));
        assert!(check("notes = 'x' OR _id = 4"));
    }

    #[test]
    fn test_like_and_in() {
        assert!(check("title LIKE 'IT%'"));
        assert!(check("title LIKE '%s d_ne'"));
        assert!(check("title NOT LIKE 'x%'"));
        assert!(check("_id IN (1, 4, 9)"));
        assert!(check("_id NOT IN (1, 2)"));
        assert!(check("importance > -1"));
    }

    #[test]
    fn test_precedence_and_parens() {
        assert!(check("_id = 1 OR _id = 4 AND importance = 2"));
        assert!(!check("(_id = 1 OR _id = 4) AND importance = 3"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("_id =").is_err());
        assert!(Expr::parse("title = 'open").is_err());
        assert!(Expr::parse("_id = 1 2").is_err());
        assert!(Expr::parse("_id # 1").is_err());
    }

    #[test]
    fn test_unknown_column_is_error() {
        let row = row();
        let ctx = EvalContext {
            row: &row,
            group_size: None,
        };
        assert!(Expr::parse("missing = 1").unwrap().matches(&ctx).is_err());
    }

    #[test]
    fn test_count_in_group() {
        let row = row();
        let ctx = EvalContext {
            row: &row,
            group_size: Some(3),
        };
        assert!(Expr::parse("COUNT(1) > 2").unwrap().matches(&ctx).unwrap());
    }
}
