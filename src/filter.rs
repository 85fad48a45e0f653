//! Boolean filter grammar for bit flag columns.
//!
//! Role, sex, status, inheritance, and variant type filters are given as free text:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := NAME | "(" expr ")" | ("any" | "all" | "eq") "(" NAME ("," NAME)* ")"
//! ```
//!
//! Keywords are case-insensitive.
//! The text is parsed into an [`Expr`] tree, which is then evaluated by a [`Visitor`].
//! [`BitmaskMatcher`] evaluates an expression against an in-memory bitmask, and the query builder lowers it to SQL.
//!
//! # Examples
//!
//! ```
//! use famvar_base::filter::{self, BitFlag};
//! use famvar_base::pedigree::Role;
//!
//! let expr = filter::parse("prb and not sib").unwrap();
//! let mask = Role::Proband.bit() | Role::Mother.bit();
//! assert_eq!(filter::matches::<Role>(&expr, mask), Ok(true));
//! ```

use std::fmt::{self, Display};
use std::iter::Peekable;
use std::marker::PhantomData;
use std::str::CharIndices;


//-----------------------------------------------------------------------------

/// A value that occupies a single bit in a bitmask column.
pub trait BitFlag: Copy + Sized {
    /// Returns the value with the given name.
    fn from_name(name: &str) -> Option<Self>;

    /// Returns the bit of the value.
    fn bit(self) -> u64;

    /// Returns the union of the bits of the named values, or the first unknown name.
    fn mask_of<S: AsRef<str>>(names: &[S]) -> Result<u64, String> {
        let mut result = 0;
        for name in names {
            let value = Self::from_name(name.as_ref()).ok_or(name.as_ref().to_string())?;
            result |= value.bit();
        }
        Ok(result)
    }
}

//-----------------------------------------------------------------------------

/// A parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// The bit of the named value is set.
    Name(String),
    /// Negation.
    Not(Box<Expr>),
    /// Conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// At least one of the bits is set.
    Any(Vec<String>),
    /// All of the bits are set.
    All(Vec<String>),
    /// Exactly the given bits are set.
    Eq(Vec<String>),
}

impl Expr {
    /// Returns an expression matching any of the given names.
    pub fn any_of<S: AsRef<str>>(names: &[S]) -> Self {
        Expr::Any(names.iter().map(|x| x.as_ref().to_string()).collect())
    }

    /// Evaluates the expression with the visitor, children first.
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> Result<V::Output, V::Error> {
        match self {
            Expr::Name(name) => visitor.name(name),
            Expr::Not(inner) => {
                let inner = inner.accept(visitor)?;
                visitor.not(inner)
            },
            Expr::And(left, right) => {
                let left = left.accept(visitor)?;
                let right = right.accept(visitor)?;
                visitor.and(left, right)
            },
            Expr::Or(left, right) => {
                let left = left.accept(visitor)?;
                let right = right.accept(visitor)?;
                visitor.or(left, right)
            },
            Expr::Any(names) => visitor.any(names),
            Expr::All(names) => visitor.all(names),
            Expr::Eq(names) => visitor.eq(names),
        }
    }

    /// Returns all names in the expression in the order they appear.
    pub fn names(&self) -> Vec<&str> {
        let mut result = Vec::new();
        self.collect_names(&mut result);
        result
    }

    fn collect_names<'a>(&'a self, result: &mut Vec<&'a str>) {
        match self {
            Expr::Name(name) => result.push(name),
            Expr::Not(inner) => inner.collect_names(result),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_names(result);
                right.collect_names(result);
            },
            Expr::Any(names) | Expr::All(names) | Expr::Eq(names) => {
                result.extend(names.iter().map(|x| x.as_str()));
            },
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, function: &str, names: &[String]) -> fmt::Result {
    write!(f, "{}({})", function, names.join(", "))
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Name(name) => write!(f, "{}", name),
            Expr::Not(inner) => write!(f, "not {}", inner),
            Expr::And(left, right) => write!(f, "({} and {})", left, right),
            Expr::Or(left, right) => write!(f, "({} or {})", left, right),
            Expr::Any(names) => write_list(f, "any", names),
            Expr::All(names) => write_list(f, "all", names),
            Expr::Eq(names) => write_list(f, "eq", names),
        }
    }
}

//-----------------------------------------------------------------------------

/// A post-order evaluator for [`Expr`] trees.
pub trait Visitor {
    type Output;
    type Error;

    fn name(&mut self, name: &str) -> Result<Self::Output, Self::Error>;
    fn not(&mut self, inner: Self::Output) -> Result<Self::Output, Self::Error>;
    fn and(&mut self, left: Self::Output, right: Self::Output) -> Result<Self::Output, Self::Error>;
    fn or(&mut self, left: Self::Output, right: Self::Output) -> Result<Self::Output, Self::Error>;
    fn any(&mut self, names: &[String]) -> Result<Self::Output, Self::Error>;
    fn all(&mut self, names: &[String]) -> Result<Self::Output, Self::Error>;
    fn eq(&mut self, names: &[String]) -> Result<Self::Output, Self::Error>;
}

/// Evaluates an expression against a bitmask of `F` values.
///
/// Unknown names are errors.
pub struct BitmaskMatcher<F: BitFlag> {
    mask: u64,
    _marker: PhantomData<F>,
}

impl<F: BitFlag> BitmaskMatcher<F> {
    /// Creates a matcher for the given bitmask.
    pub fn new(mask: u64) -> Self {
        BitmaskMatcher { mask, _marker: PhantomData }
    }

    fn bit(name: &str) -> Result<u64, String> {
        F::from_name(name).map(|x| x.bit()).ok_or(name.to_string())
    }
}

impl<F: BitFlag> Visitor for BitmaskMatcher<F> {
    type Output = bool;
    type Error = String;

    fn name(&mut self, name: &str) -> Result<bool, String> {
        Ok(self.mask & Self::bit(name)? != 0)
    }

    fn not(&mut self, inner: bool) -> Result<bool, String> {
        Ok(!inner)
    }

    fn and(&mut self, left: bool, right: bool) -> Result<bool, String> {
        Ok(left && right)
    }

    fn or(&mut self, left: bool, right: bool) -> Result<bool, String> {
        Ok(left || right)
    }

    fn any(&mut self, names: &[String]) -> Result<bool, String> {
        Ok(self.mask & F::mask_of(names)? != 0)
    }

    fn all(&mut self, names: &[String]) -> Result<bool, String> {
        let mask = F::mask_of(names)?;
        Ok(self.mask & mask == mask)
    }

    fn eq(&mut self, names: &[String]) -> Result<bool, String> {
        Ok(self.mask == F::mask_of(names)?)
    }
}

/// Returns `true` if the bitmask satisfies the expression.
///
/// Returns the unknown name as an error.
pub fn matches<F: BitFlag>(expr: &Expr, mask: u64) -> Result<bool, String> {
    expr.accept(&mut BitmaskMatcher::<F>::new(mask))
}

//-----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Name(String),
    Open,
    Close,
    Comma,
    And,
    Or,
    Not,
    Any,
    All,
    Eq,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.' | '\'' | ':')
}

struct Lexer<'a> {
    text: &'a str,
    iter: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { text, iter: text.char_indices().peekable() }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, String>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.iter.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let (start, c) = self.iter.next()?;
        let token = match c {
            '(' => Token::Open,
            ')' => Token::Close,
            ',' => Token::Comma,
            c if is_name_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some((offset, c)) = self.iter.next_if(|(_, c)| is_name_char(*c)) {
                    end = offset + c.len_utf8();
                }
                let word = &self.text[start..end];
                match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "any" => Token::Any,
                    "all" => Token::All,
                    "eq" => Token::Eq,
                    _ => Token::Name(word.to_string()),
                }
            },
            c => return Some(Err(format!("Unexpected character '{}' at offset {}", c, start))),
        };
        Some(Ok(token))
    }
}

//-----------------------------------------------------------------------------

/// Maximum nesting depth of parentheses and `not` in a filter.
pub const MAX_FILTER_DEPTH: usize = 256;

/// Maximum number of tokens in a filter.
pub const MAX_FILTER_TOKENS: usize = 4096;

struct Parser {
    tokens: Vec<Token>,
    offset: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.offset).cloned();
        if token.is_some() {
            self.offset += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("Expected {:?}, found {:?}", expected, token)),
            None => Err(format!("Expected {:?}, found end of filter", expected)),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut result = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and()?;
            result = Expr::Or(Box::new(result), Box::new(right));
        }
        Ok(result)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut result = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.unary()?;
            result = Expr::And(Box::new(result), Box::new(right));
        }
        Ok(result)
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(String::from("Filter nested too deeply"));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn name_list(&mut self) -> Result<Vec<String>, String> {
        self.expect(Token::Open)?;
        let mut names = Vec::new();
        loop {
            match self.advance() {
                Some(Token::Name(name)) => names.push(name),
                Some(token) => return Err(format!("Expected a name, found {:?}", token)),
                None => return Err(String::from("Expected a name, found end of filter")),
            }
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::Close) => break,
                Some(token) => return Err(format!("Expected ',' or ')', found {:?}", token)),
                None => return Err(String::from("Unclosed name list")),
            }
        }
        Ok(names)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Name(name)) => Ok(Expr::Name(name)),
            Some(Token::Open) => {
                self.enter()?;
                let inner = self.expr()?;
                self.expect(Token::Close)?;
                self.depth -= 1;
                Ok(inner)
            },
            Some(Token::Any) => Ok(Expr::Any(self.name_list()?)),
            Some(Token::All) => Ok(Expr::All(self.name_list()?)),
            Some(Token::Eq) => Ok(Expr::Eq(self.name_list()?)),
            Some(token) => Err(format!("Unexpected {:?}", token)),
            None => Err(String::from("Unexpected end of filter")),
        }
    }
}

/// Parses filter text into an expression.
///
/// Returns an error message if the text does not follow the grammar or exceeds [`MAX_FILTER_TOKENS`] or [`MAX_FILTER_DEPTH`].
pub fn parse(text: &str) -> Result<Expr, String> {
    let tokens = Lexer::new(text).collect::<Result<Vec<_>, _>>()?;
    if tokens.is_empty() {
        return Err(String::from("Empty filter"));
    }
    if tokens.len() > MAX_FILTER_TOKENS {
        return Err(format!("Filter has more than {} tokens", MAX_FILTER_TOKENS));
    }
    let mut parser = Parser { tokens, offset: 0, depth: 0 };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("Unexpected {:?} after the end of the expression", token));
    }
    Ok(expr)
}

//-----------------------------------------------------------------------------
