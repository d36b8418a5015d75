//! The host expression language.
//!
//! A small JavaScript-flavoured subset: literals, lists and maps, member and
//! index access, calls to built-in functions, arithmetic, comparison, logical
//! and conditional operators. Bare identifiers resolve against the invocation
//! context first and the store root second. `store` and `s` name the store
//! root, `@path` and `$path` read store paths directly.
//!
//! A leading `() =>` is accepted and the function is invoked right away.

use crate::value::Value;
use ariadne::{Config, Label, Report, ReportKind, Source};
use chumsky::{input::ValueInput, pratt::*, prelude::*};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

mod lexer;
pub use lexer::{Token, lexer, unescape_text};

mod evaluator;
pub use evaluator::{EvalError, Scope};

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    List(Vec<Spanned<Self>>),
    Map(Vec<(String, Spanned<Self>)>),
    Identifier(String),
    /// `@name` / `$name`, always resolved against the store.
    StoreReference(String),
    Member {
        object: Box<Spanned<Self>>,
        name: String,
    },
    Index {
        object: Box<Spanned<Self>>,
        index: Box<Spanned<Self>>,
    },
    Call {
        callee: Box<Spanned<Self>>,
        arguments: Vec<Spanned<Self>>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Spanned<Self>>,
    },
    Binary {
        operator: BinaryOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    Conditional {
        condition: Box<Spanned<Self>>,
        then: Box<Spanned<Self>>,
        otherwise: Box<Spanned<Self>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Multiply,
    Divide,
    Remainder,
    Add,
    Subtract,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    And,
    Or,
}

fn spanned(node: Expression, span: Span) -> Spanned<Expression> {
    Spanned { span, node }
}

fn binary(
    operand_a: Spanned<Expression>,
    operator: BinaryOperator,
    operand_b: Spanned<Expression>,
    span: Span,
) -> Spanned<Expression> {
    spanned(
        Expression::Binary {
            operator,
            operand_a: Box::new(operand_a),
            operand_b: Box::new(operand_b),
        },
        span,
    )
}

pub fn parser<'code, I>()
-> impl Parser<'code, I, Spanned<Expression>, extra::Err<ParseError<'code, Token<'code>>>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    let expression = recursive(|expression| {
        let comma = just(Token::Comma);
        let bracket_round_open = just(Token::BracketRoundOpen);
        let bracket_round_close = just(Token::BracketRoundClose);
        let bracket_curly_open = just(Token::BracketCurlyOpen);
        let bracket_curly_close = just(Token::BracketCurlyClose);
        let bracket_square_open = just(Token::BracketSquareOpen);
        let bracket_square_close = just(Token::BracketSquareClose);

        let identifier = select! { Token::Identifier(identifier) => identifier.to_owned() };

        let literal = select! {
            Token::Number(number) => Value::Number(number),
            Token::Text(text) => Value::Text(unescape_text(text)),
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Null => Value::Null,
            Token::Undefined => Value::Undefined,
        }
        .map(Expression::Literal);

        let list = expression
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
            .map(Expression::List);

        let key = select! {
            Token::Identifier(key) => key.to_owned(),
            Token::Text(key) => unescape_text(key),
        };
        let map = key
            .then_ignore(just(Token::Colon))
            .then(expression.clone())
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(bracket_curly_open, bracket_curly_close)
            .map(Expression::Map);

        let store_reference = just(Token::StoreSigil)
            .ignore_then(identifier.clone())
            .map(Expression::StoreReference);

        let nested = expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

        let atom = choice((
            literal,
            list,
            map,
            store_reference,
            identifier.clone().map(Expression::Identifier),
        ))
        .map_with(|node, extra| spanned(node, extra.span()))
        .or(nested);

        let arguments = expression
            .clone()
            .separated_by(comma)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(bracket_round_open, bracket_round_close);

        let operation = atom.pratt((
            postfix(10, just(Token::Dot).ignore_then(identifier), |object, name, extra| {
                spanned(
                    Expression::Member {
                        object: Box::new(object),
                        name,
                    },
                    extra.span(),
                )
            }),
            postfix(
                10,
                expression
                    .clone()
                    .delimited_by(bracket_square_open, bracket_square_close),
                |object, index, extra| {
                    spanned(
                        Expression::Index {
                            object: Box::new(object),
                            index: Box::new(index),
                        },
                        extra.span(),
                    )
                },
            ),
            postfix(10, arguments, |callee, arguments, extra| {
                spanned(
                    Expression::Call {
                        callee: Box::new(callee),
                        arguments,
                    },
                    extra.span(),
                )
            }),
            prefix(9, just(Token::Not), |_, operand, extra| {
                spanned(
                    Expression::Unary {
                        operator: UnaryOperator::Not,
                        operand: Box::new(operand),
                    },
                    extra.span(),
                )
            }),
            prefix(9, just(Token::Minus), |_, operand, extra| {
                spanned(
                    Expression::Unary {
                        operator: UnaryOperator::Negate,
                        operand: Box::new(operand),
                    },
                    extra.span(),
                )
            }),
            infix(
                left(7),
                choice((
                    just(Token::Asterisk).to(BinaryOperator::Multiply),
                    just(Token::Slash).to(BinaryOperator::Divide),
                    just(Token::Percent).to(BinaryOperator::Remainder),
                )),
                |l, operator, r, extra| binary(l, operator, r, extra.span()),
            ),
            infix(
                left(6),
                choice((
                    just(Token::Plus).to(BinaryOperator::Add),
                    just(Token::Minus).to(BinaryOperator::Subtract),
                )),
                |l, operator, r, extra| binary(l, operator, r, extra.span()),
            ),
            infix(
                left(5),
                choice((
                    just(Token::LessOrEqual).to(BinaryOperator::LessOrEqual),
                    just(Token::Less).to(BinaryOperator::Less),
                    just(Token::GreaterOrEqual).to(BinaryOperator::GreaterOrEqual),
                    just(Token::Greater).to(BinaryOperator::Greater),
                )),
                |l, operator, r, extra| binary(l, operator, r, extra.span()),
            ),
            infix(
                left(4),
                choice((
                    just(Token::StrictEqual).to(BinaryOperator::StrictEqual),
                    just(Token::StrictNotEqual).to(BinaryOperator::StrictNotEqual),
                    just(Token::Equal).to(BinaryOperator::Equal),
                    just(Token::NotEqual).to(BinaryOperator::NotEqual),
                )),
                |l, operator, r, extra| binary(l, operator, r, extra.span()),
            ),
            infix(left(3), just(Token::And).to(BinaryOperator::And), |l, operator, r, extra| {
                binary(l, operator, r, extra.span())
            }),
            infix(left(2), just(Token::Or).to(BinaryOperator::Or), |l, operator, r, extra| {
                binary(l, operator, r, extra.span())
            }),
        ));

        // Conditional operator, right-associative.
        operation
            .then(
                just(Token::Question)
                    .ignore_then(expression.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expression)
                    .or_not(),
            )
            .map_with(|(condition, branches), extra| match branches {
                None => condition,
                Some((then, otherwise)) => spanned(
                    Expression::Conditional {
                        condition: Box::new(condition),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    extra.span(),
                ),
            })
    });

    just(Token::BracketRoundOpen)
        .then(just(Token::BracketRoundClose))
        .then(just(Token::Implies))
        .or_not()
        .ignore_then(expression)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub span: Range<usize>,
    pub message: String,
    pub reason: String,
}

impl<T: fmt::Display> From<ParseError<'_, T>> for SyntaxError {
    fn from(error: ParseError<'_, T>) -> Self {
        Self {
            span: error.span().into_range(),
            message: error.to_string(),
            reason: error.reason().to_string(),
        }
    }
}

/// An expression that failed to lex or parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionError {
    pub source: String,
    pub errors: Vec<SyntaxError>,
}

impl ExpressionError {
    fn new<T: fmt::Display>(source: &str, errors: Vec<ParseError<'_, T>>) -> Self {
        Self {
            source: source.to_owned(),
            errors: errors.into_iter().map(SyntaxError::from).collect(),
        }
    }

    /// Human readable report with the offending spans underlined.
    pub fn report(&self, filename: &str) -> String {
        let mut report_bytes = Vec::new();
        for error in &self.errors {
            let written = Report::build(ReportKind::Error, (filename, error.span.clone()))
                .with_config(Config::default().with_color(false))
                .with_message(&error.message)
                .with_label(Label::new((filename, error.span.clone())).with_message(&error.reason))
                .finish()
                .write((filename, Source::from(self.source.as_str())), &mut report_bytes);
            if let Err(error) = written {
                log::error!("Failed to write expression report: {error}");
            }
        }
        String::from_utf8_lossy(&report_bytes).into_owned()
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid expression '{}'", self.source)?;
        if let Some(error) = self.errors.first() {
            write!(f, ": {}", error.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExpressionError {}

/// A parsed expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: Rc<str>,
    root: Rc<Spanned<Expression>>,
}

impl Script {
    pub fn parse(source_code: &str) -> Result<Self, ExpressionError> {
        let (tokens, errors) = lexer().parse(source_code).into_output_errors();
        if !errors.is_empty() {
            return Err(ExpressionError::new(source_code, errors));
        }
        let tokens = tokens.unwrap_or_default();
        let end = source_code.len();
        let (root, errors) = parser()
            .parse(tokens.map(Span::from(end..end), |Spanned { node, span }| (node, span)))
            .into_output_errors();
        match root {
            Some(root) if errors.is_empty() => Ok(Self {
                source: source_code.into(),
                root: Rc::new(root),
            }),
            _ => Err(ExpressionError::new(source_code, errors)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Spanned<Expression> {
        &self.root
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<Value, EvalError> {
        scope.evaluate(&self.root)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
