/*
 * Copyright 2020 Actyx AG
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
//! The statement shapes understood by the document store
//!
//! This is deliberately not a SQL engine. The recognized grammar is (keywords are
//! case-insensitive, `col` may be qualified as `alias.col`):
//!
//! ```text
//! INSERT INTO table (col, ...) VALUES (value, ...)
//! SELECT projection FROM table [alias]
//!     [LEFT JOIN table2 [alias2] ON col = col]
//!     [WHERE condition [AND condition]*]
//!     [ORDER BY col [ASC | DESC]]
//!     [LIMIT n | ? [OFFSET n | ?]]
//! UPDATE table SET col = value [, col = value]* WHERE condition [AND condition]*
//! DELETE FROM table WHERE condition [AND condition]*
//!
//! value      := ? | 'text' | "text" | number | NULL | TRUE | FALSE | datetime('now')
//! condition  := col IS NULL | col IS NOT NULL | col = value
//! projection := * | alias.* | col [AS label] (, ...)*
//! ```
//!
//! Anything else parses to `None`.

use serde_json::{Number, Value};

const RESERVED: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "INTO", "VALUES", "SET", "WHERE", "AND",
    "OR", "LEFT", "OUTER", "INNER", "JOIN", "ON", "ORDER", "BY", "ASC", "DESC", "LIMIT",
    "OFFSET", "AS", "IS", "NOT", "NULL", "TRUE", "FALSE", "GROUP",
];

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert(s) => &s.table,
            Statement::Select(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }
}

/// A value position: a placeholder consuming the next parameter, a literal, or the current instant
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Placeholder,
    Literal(Value),
    Now,
}

/// A column reference, optionally qualified by a table name or alias
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn bare(name: &str) -> Self {
        Self {
            qualifier: None,
            name: name.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
    Equals(ColumnRef, Operand),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    All,
    AllOf(String),
    Column {
        column: ColumnRef,
        label: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub projection: Vec<Projection>,
    pub table: String,
    pub alias: Option<String>,
    pub join: Option<Join>,
    pub conditions: Vec<Condition>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<Operand>,
    pub offset: Option<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Operand)>,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub table: String,
    pub conditions: Vec<Condition>,
}

/// Parse one statement, `None` if it is not one of the recognized shapes
pub fn parse(sql: &str) -> Option<Statement> {
    let tokens = tokenize(sql)?;
    let mut p = Parser { tokens, pos: 0 };
    let stmt = if p.keyword("INSERT") {
        Statement::Insert(p.insert()?)
    } else if p.keyword("SELECT") {
        Statement::Select(p.select()?)
    } else if p.keyword("UPDATE") {
        Statement::Update(p.update()?)
    } else if p.keyword("DELETE") {
        Statement::Delete(p.delete()?)
    } else {
        return None;
    };
    if p.at_end() {
        Some(stmt)
    } else {
        None
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Num(String),
    Placeholder,
    Comma,
    Dot,
    LParen,
    RParen,
    Eq,
    Star,
    Other(char),
}

fn tokenize(sql: &str) -> Option<Vec<Token>> {
    let mut tokens = vec![];
    let mut chars = sql.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            ';' if sql[start + 1..].trim().is_empty() => break,
            '?' => Token::Placeholder,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '=' => Token::Eq,
            '*' => Token::Star,
            '\'' | '"' => {
                let mut text = String::new();
                loop {
                    match chars.next() {
                        // a doubled quote stands for the quote itself
                        Some((_, q)) if q == c => {
                            if chars.peek().map(|(_, n)| *n == c).unwrap_or(false) {
                                chars.next();
                                text.push(c);
                            } else {
                                break;
                            }
                        }
                        Some((_, other)) => text.push(other),
                        None => return None,
                    }
                }
                Token::Str(text)
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.peek().map(|(_, n)| n.is_ascii_digit()).unwrap_or(false)) =>
            {
                let mut end = start + c.len_utf8();
                while let Some((i, n)) = chars.peek().copied() {
                    if n.is_ascii_digit() || n == '.' {
                        chars.next();
                        end = i + n.len_utf8();
                    } else {
                        break;
                    }
                }
                Token::Num(sql[start..end].to_owned())
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((i, n)) = chars.peek().copied() {
                    if n.is_alphanumeric() || n == '_' {
                        chars.next();
                        end = i + n.len_utf8();
                    } else {
                        break;
                    }
                }
                Token::Word(sql[start..end].to_owned())
            }
            other => Token::Other(other),
        };
        tokens.push(token);
    }
    Some(tokens)
}

fn number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    let f = text.parse::<f64>().ok()?;
    Number::from_f64(f).map(Value::Number)
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    /// consume the keyword if it is next
    fn keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Option<()> {
        if self.keyword(kw) {
            Some(())
        } else {
            None
        }
    }

    fn expect(&mut self, token: Token) -> Option<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn eat(&mut self, token: Token) -> bool {
        self.expect(token).is_some()
    }

    fn ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(w)) if !is_reserved(w) => {
                let w = w.clone();
                self.pos += 1;
                Some(w)
            }
            _ => None,
        }
    }

    fn column_ref(&mut self) -> Option<ColumnRef> {
        let first = self.ident()?;
        if self.eat(Token::Dot) {
            let name = self.ident()?;
            Some(ColumnRef {
                qualifier: Some(first),
                name,
            })
        } else {
            Some(ColumnRef::bare(&first))
        }
    }

    fn operand(&mut self) -> Option<Operand> {
        let operand = match self.advance()? {
            Token::Placeholder => Operand::Placeholder,
            Token::Str(s) => Operand::Literal(Value::String(s)),
            Token::Num(n) => Operand::Literal(number(&n)?),
            Token::Word(w) if w.eq_ignore_ascii_case("NULL") => Operand::Literal(Value::Null),
            Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => Operand::Literal(Value::Bool(true)),
            Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => {
                Operand::Literal(Value::Bool(false))
            }
            Token::Word(w) if w.eq_ignore_ascii_case("datetime") => {
                self.expect(Token::LParen)?;
                match self.advance()? {
                    Token::Str(arg) if arg.eq_ignore_ascii_case("now") => {}
                    _ => return None,
                }
                self.expect(Token::RParen)?;
                Operand::Now
            }
            _ => return None,
        };
        Some(operand)
    }

    fn conditions(&mut self) -> Option<Vec<Condition>> {
        let mut conditions = vec![self.condition()?];
        while self.keyword("AND") {
            conditions.push(self.condition()?);
        }
        Some(conditions)
    }

    fn condition(&mut self) -> Option<Condition> {
        let column = self.column_ref()?;
        if self.keyword("IS") {
            let negated = self.keyword("NOT");
            self.expect_keyword("NULL")?;
            Some(if negated {
                Condition::IsNotNull(column)
            } else {
                Condition::IsNull(column)
            })
        } else {
            self.expect(Token::Eq)?;
            Some(Condition::Equals(column, self.operand()?))
        }
    }

    fn insert(&mut self) -> Option<Insert> {
        self.expect_keyword("INTO")?;
        let table = self.ident()?;
        self.expect(Token::LParen)?;
        let mut columns = vec![self.ident()?];
        while self.eat(Token::Comma) {
            columns.push(self.ident()?);
        }
        self.expect(Token::RParen)?;
        self.expect_keyword("VALUES")?;
        self.expect(Token::LParen)?;
        let mut values = vec![self.operand()?];
        while self.eat(Token::Comma) {
            values.push(self.operand()?);
        }
        self.expect(Token::RParen)?;
        Some(Insert {
            table,
            columns,
            values,
        })
    }

    fn projection(&mut self) -> Option<Projection> {
        if self.eat(Token::Star) {
            return Some(Projection::All);
        }
        let all_of = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some(Token::Word(q)), Some(Token::Dot), Some(Token::Star)) => Some(q.clone()),
            _ => None,
        };
        if let Some(q) = all_of {
            self.pos += 3;
            return Some(Projection::AllOf(q));
        }
        let column = self.column_ref()?;
        let label = if self.keyword("AS") {
            Some(self.ident()?)
        } else {
            self.ident()
        };
        Some(Projection::Column { column, label })
    }

    fn select(&mut self) -> Option<Select> {
        let mut projection = vec![self.projection()?];
        while self.eat(Token::Comma) {
            projection.push(self.projection()?);
        }
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        let alias = if self.keyword("AS") {
            Some(self.ident()?)
        } else {
            self.ident()
        };

        let join = if self.keyword("LEFT") {
            self.keyword("OUTER");
            self.expect_keyword("JOIN")?;
            let join_table = self.ident()?;
            let join_alias = if self.keyword("AS") {
                self.ident()?
            } else {
                self.ident().unwrap_or_else(|| join_table.clone())
            };
            self.expect_keyword("ON")?;
            let left = self.column_ref()?;
            self.expect(Token::Eq)?;
            let right = self.column_ref()?;
            Some(Join {
                table: join_table,
                alias: join_alias,
                left,
                right,
            })
        } else {
            None
        };

        let conditions = if self.keyword("WHERE") {
            self.conditions()?
        } else {
            vec![]
        };

        let order_by = if self.keyword("ORDER") {
            self.expect_keyword("BY")?;
            let column = self.column_ref()?;
            let descending = if self.keyword("DESC") {
                true
            } else {
                self.keyword("ASC");
                false
            };
            Some(OrderBy { column, descending })
        } else {
            None
        };

        let mut limit = None;
        let mut offset = None;
        if self.keyword("LIMIT") {
            limit = Some(self.operand()?);
            if self.keyword("OFFSET") {
                offset = Some(self.operand()?);
            }
        }

        Some(Select {
            projection,
            table,
            alias,
            join,
            conditions,
            order_by,
            limit,
            offset,
        })
    }

    fn update(&mut self) -> Option<Update> {
        let table = self.ident()?;
        self.expect_keyword("SET")?;
        let mut assignments = vec![];
        loop {
            let column = self.ident()?;
            self.expect(Token::Eq)?;
            assignments.push((column, self.operand()?));
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect_keyword("WHERE")?;
        let conditions = self.conditions()?;
        Some(Update {
            table,
            assignments,
            conditions,
        })
    }

    fn delete(&mut self) -> Option<Delete> {
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        self.expect_keyword("WHERE")?;
        let conditions = self.conditions()?;
        Some(Delete { table, conditions })
    }
}
