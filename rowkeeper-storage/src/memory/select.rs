//! Query planning and execution for the in-memory engine.

use super::clause::{bare_name, compare, tokenize, EvalContext, Expr, Keyword, Parser, Token};
use crate::Query;
use rowkeeper_core::{MaterializedRows, RowkeeperResult, StorageError, Value, ValueMap};
use std::cmp::Ordering;

#[derive(Debug)]
struct Selector {
    expr: Expr,
    alias: String,
}

#[derive(Debug)]
struct OrderKey {
    expr: Expr,
    descending: bool,
}

/// A parsed [`Query`] bound to one table's columns.
#[derive(Debug)]
pub(crate) struct SelectPlan {
    columns: Vec<String>,
    selectors: Vec<Selector>,
    filter: Option<Expr>,
    group_by: Vec<Expr>,
    having: Option<Expr>,
    order_by: Vec<OrderKey>,
    offset: usize,
    limit: Option<usize>,
    distinct: bool,
    aggregate: bool,
}

fn parser_over<'a>(clause: &'a str, tokens: &'a [Token]) -> Parser<'a> {
    Parser {
        clause,
        tokens,
        pos: 0,
    }
}

fn finished(parser: &Parser<'_>) -> RowkeeperResult<()> {
    match parser.peek() {
        None => Ok(()),
        Some(token) => Err(parser.error(format!("unexpected token {:?}", token)).into()),
    }
}

fn parse_selector(text: &str, columns: &[String]) -> RowkeeperResult<Vec<Selector>> {
    let tokens = tokenize(text)?;
    if let [Token::Star] = tokens.as_slice() {
        return Ok(columns
            .iter()
            .map(|c| Selector {
                expr: Expr::Column(c.clone()),
                alias: c.clone(),
            })
            .collect());
    }

    let mut parser = parser_over(text, &tokens);
    let expr = parser.operand()?;
    let alias = if parser.eat_keyword(Keyword::As) {
        match parser.next() {
            Some(Token::Ident(alias)) => alias.clone(),
            Some(Token::Keyword(keyword)) => keyword.as_str().to_string(),
            _ => return Err(parser.error("expected alias after AS").into()),
        }
    } else {
        match &expr {
            Expr::Column(name) => name.clone(),
            _ => text.trim().to_string(),
        }
    };
    finished(&parser)?;

    Ok(vec![Selector { expr, alias }])
}

/// Comma-separated list of expressions, each optionally followed by a
/// direction keyword.
fn parse_list(text: &str) -> RowkeeperResult<Vec<OrderKey>> {
    let tokens = tokenize(text)?;
    let mut parser = parser_over(text, &tokens);
    let mut keys = Vec::new();

    loop {
        let expr = parser.operand()?;
        let descending = if parser.eat_keyword(Keyword::Desc) {
            true
        } else {
            parser.eat_keyword(Keyword::Asc);
            false
        };
        keys.push(OrderKey { expr, descending });

        if parser.peek() == Some(&Token::Comma) {
            parser.next();
        } else {
            break;
        }
    }
    finished(&parser)?;
    Ok(keys)
}

fn parse_count(parser: &mut Parser<'_>) -> RowkeeperResult<usize> {
    match parser.next() {
        Some(Token::Number(Value::Long(n))) if *n >= 0 => Ok(*n as usize),
        _ => Err(parser.error("expected a non-negative integer").into()),
    }
}

/// `n`, `n OFFSET m` or `m, n`; returns `(offset, limit)`.
fn parse_limit(text: &str) -> RowkeeperResult<(usize, usize)> {
    let tokens = tokenize(text)?;
    let mut parser = parser_over(text, &tokens);
    let first = parse_count(&mut parser)?;

    let bounds = if parser.eat_keyword(Keyword::Offset) {
        (parse_count(&mut parser)?, first)
    } else if parser.peek() == Some(&Token::Comma) {
        parser.next();
        (first, parse_count(&mut parser)?)
    } else {
        (0, first)
    };
    finished(&parser)?;
    Ok(bounds)
}

fn has_count(expr: &Expr) -> bool {
    match expr {
        Expr::Count => true,
        Expr::Column(_) | Expr::Literal(_) => false,
        Expr::Compare(l, _, r) | Expr::And(l, r) | Expr::Or(l, r) => has_count(l) || has_count(r),
        Expr::Like { value, pattern, .. } => has_count(value) || has_count(pattern),
        Expr::In { value, list, .. } => has_count(value) || list.iter().any(has_count),
        Expr::IsNull { value, .. } | Expr::Not(value) => has_count(value),
    }
}

fn check_columns(expr: &Expr, table: &str, columns: &[String]) -> RowkeeperResult<()> {
    match expr {
        Expr::Column(name) if !columns.contains(name) => Err(StorageError::UnknownColumn {
            table: table.to_string(),
            column: name.clone(),
        }
        .into()),
        Expr::Column(_) | Expr::Literal(_) | Expr::Count => Ok(()),
        Expr::Compare(l, _, r) | Expr::And(l, r) | Expr::Or(l, r) => {
            check_columns(l, table, columns)?;
            check_columns(r, table, columns)
        }
        Expr::Like { value, pattern, .. } => {
            check_columns(value, table, columns)?;
            check_columns(pattern, table, columns)
        }
        Expr::In { value, list, .. } => {
            check_columns(value, table, columns)?;
            list.iter().try_for_each(|e| check_columns(e, table, columns))
        }
        Expr::IsNull { value, .. } | Expr::Not(value) => check_columns(value, table, columns),
    }
}

/// Order with NULL first, as relational stores sort ascending.
fn order_values(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
    }
}

struct OutputRow {
    /// Source values overlaid with projected aliases, for ORDER BY.
    context: ValueMap,
    group_size: Option<usize>,
    values: Vec<Value>,
}

impl SelectPlan {
    pub(crate) fn parse(query: &Query, columns: &[String]) -> RowkeeperResult<Self> {
        let table = query.table.as_str();

        let mut selectors = Vec::new();
        for text in &query.columns {
            selectors.extend(parse_selector(text, columns)?);
        }
        if selectors.is_empty() {
            selectors = parse_selector("*", columns)?;
        }
        for selector in &selectors {
            check_columns(&selector.expr, table, columns)?;
        }

        let filter = query.filter.as_deref().map(Expr::parse).transpose()?;
        if let Some(filter) = &filter {
            check_columns(filter, table, columns)?;
            if has_count(filter) {
                return Err(StorageError::InvalidClause {
                    clause: query.filter.clone().unwrap_or_default(),
                    reason: "aggregate in row filter".to_string(),
                }
                .into());
            }
        }

        let group_by: Vec<Expr> = match query.group_by.as_deref() {
            Some(text) => parse_list(text)?.into_iter().map(|k| k.expr).collect(),
            None => Vec::new(),
        };
        for expr in &group_by {
            check_columns(expr, table, columns)?;
        }

        let aggregate = !group_by.is_empty() || selectors.iter().any(|s| has_count(&s.expr));
        let having = query.having.as_deref().map(Expr::parse).transpose()?;
        if having.is_some() && !aggregate {
            return Err(StorageError::InvalidClause {
                clause: query.having.clone().unwrap_or_default(),
                reason: "HAVING requires GROUP BY".to_string(),
            }
            .into());
        }

        let order_by = match query.order_by.as_deref() {
            Some(text) => parse_list(text)?,
            None => Vec::new(),
        };

        let (offset, limit) = match query.limit.as_deref() {
            Some(text) => {
                let (offset, limit) = parse_limit(text)?;
                (offset, Some(limit))
            }
            None => (0, None),
        };

        Ok(Self {
            columns: columns.to_vec(),
            selectors,
            filter,
            group_by,
            having,
            order_by,
            offset,
            limit,
            distinct: query.distinct,
            aggregate,
        })
    }

    /// Result column names.
    pub(crate) fn aliases(&self) -> Vec<String> {
        self.selectors.iter().map(|s| bare_name(&s.alias).to_string()).collect()
    }

    pub(crate) fn execute<'r>(
        &self,
        rows: impl Iterator<Item = &'r ValueMap>,
    ) -> RowkeeperResult<MaterializedRows> {
        let mut matched = Vec::new();
        for row in rows {
            let keep = match &self.filter {
                Some(filter) => filter.matches(&EvalContext {
                    row,
                    group_size: None,
                })?,
                None => true,
            };
            if keep {
                matched.push(row);
            }
        }

        let mut output = if self.aggregate {
            self.aggregate_rows(&matched)?
        } else {
            matched
                .into_iter()
                .map(|row| self.project(row.clone(), None))
                .collect::<RowkeeperResult<Vec<_>>>()?
        };

        if !self.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(output.len());
            for row in output {
                let ctx = EvalContext {
                    row: &row.context,
                    group_size: row.group_size,
                };
                let keys = self
                    .order_by
                    .iter()
                    .map(|k| k.expr.eval(&ctx))
                    .collect::<RowkeeperResult<Vec<_>>>()?;
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((left, right), key) in a.iter().zip(b).zip(&self.order_by) {
                    let ordering = order_values(left, right);
                    let ordering = if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            output = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let mut values: Vec<Vec<Value>> = Vec::with_capacity(output.len());
        for row in output {
            if self.distinct && values.contains(&row.values) {
                continue;
            }
            values.push(row.values);
        }

        let values = values
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(MaterializedRows::new(self.aliases(), values))
    }

    fn project(&self, mut context: ValueMap, group_size: Option<usize>) -> RowkeeperResult<OutputRow> {
        let mut values = Vec::with_capacity(self.selectors.len());
        for selector in &self.selectors {
            let value = selector.expr.eval(&EvalContext {
                row: &context,
                group_size,
            })?;
            values.push(value);
        }
        for (selector, value) in self.selectors.iter().zip(&values) {
            context.put(bare_name(&selector.alias), value.clone());
        }
        Ok(OutputRow {
            context,
            group_size,
            values,
        })
    }

    fn aggregate_rows(&self, matched: &[&ValueMap]) -> RowkeeperResult<Vec<OutputRow>> {
        let mut groups: Vec<(Vec<Value>, Vec<&ValueMap>)> = Vec::new();
        if self.group_by.is_empty() {
            groups.push((Vec::new(), matched.to_vec()));
        } else {
            for row in matched {
                let ctx = EvalContext {
                    row,
                    group_size: None,
                };
                let key = self
                    .group_by
                    .iter()
                    .map(|e| e.eval(&ctx))
                    .collect::<RowkeeperResult<Vec<_>>>()?;
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![*row])),
                }
            }
        }

        let mut output = Vec::with_capacity(groups.len());
        for (_, members) in groups {
            let context = match members.first() {
                Some(first) => (*first).clone(),
                None => self
                    .columns
                    .iter()
                    .map(|c| (c.clone(), Value::Null))
                    .collect(),
            };
            let row = self.project(context, Some(members.len()))?;

            if let Some(having) = &self.having {
                let keep = having.matches(&EvalContext {
                    row: &row.context,
                    group_size: row.group_size,
                })?;
                if !keep {
                    continue;
                }
            }
            output.push(row);
        }
        Ok(output)
    }
}
