use super::{BinaryOperator, Expression, Spanned, UnaryOperator};
use crate::state::Store;
use crate::value::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnknownFunction(String),
    NotCallable,
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            Self::NotCallable => write!(f, "only named functions can be called"),
            Self::Arity {
                function,
                expected,
                found,
            } => write!(f, "'{function}' takes {expected} argument(s), got {found}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// What an expression can see: the store plus the enclosing invocation context.
#[derive(Clone, Copy)]
pub struct Scope<'scope> {
    pub store: &'scope Store,
    pub context: &'scope Map,
}

impl<'scope> Scope<'scope> {
    pub fn new(store: &'scope Store, context: &'scope Map) -> Self {
        Self { store, context }
    }

    pub fn evaluate(&self, expression: &Spanned<Expression>) -> Result<Value, EvalError> {
        match &expression.node {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::List(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expression::Map(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.evaluate(value)?)))
                .collect::<Result<Map, _>>()
                .map(Value::Map),
            Expression::Identifier(name) => Ok(self.identifier(name)),
            Expression::StoreReference(name) => Ok(self.store.get_path(name)),
            Expression::Member { object, name } => match self.store_path(&object.node) {
                Some(mut path) => {
                    path.push(name.as_str());
                    Ok(self.store.get_path(&path.join(".")))
                }
                None => Ok(self.evaluate(object)?.member(name)),
            },
            Expression::Index { object, index } => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                Ok(object.index(&index))
            }
            Expression::Call { callee, arguments } => {
                let name = callee_name(&callee.node).ok_or(EvalError::NotCallable)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.evaluate(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                call(&name, &arguments)
            }
            Expression::Unary { operator, operand } => {
                let operand = self.evaluate(operand)?;
                Ok(match operator {
                    UnaryOperator::Not => Value::Bool(!operand.is_truthy()),
                    UnaryOperator::Negate => Value::Number(-operand.to_number()),
                })
            }
            Expression::Binary {
                operator: BinaryOperator::And,
                operand_a,
                operand_b,
            } => {
                let left = self.evaluate(operand_a)?;
                if left.is_truthy() { self.evaluate(operand_b) } else { Ok(left) }
            }
            Expression::Binary {
                operator: BinaryOperator::Or,
                operand_a,
                operand_b,
            } => {
                let left = self.evaluate(operand_a)?;
                if left.is_truthy() { Ok(left) } else { self.evaluate(operand_b) }
            }
            Expression::Binary {
                operator,
                operand_a,
                operand_b,
            } => {
                let left = self.evaluate(operand_a)?;
                let right = self.evaluate(operand_b)?;
                Ok(apply_binary(*operator, &left, &right))
            }
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then)
                } else {
                    self.evaluate(otherwise)
                }
            }
        }
    }

    fn identifier(&self, name: &str) -> Value {
        if let Some(value) = self.context.get(name) {
            return value.clone();
        }
        match name {
            "store" | "s" => self.store.snapshot(),
            _ => self.store.get_path(name),
        }
    }

    /// Store path an expression denotes, if it reads straight from the store.
    ///
    /// Reading by path subscribes only to the cell at that path instead of the
    /// whole store.
    fn store_path<'expression>(&self, expression: &'expression Expression) -> Option<Vec<&'expression str>> {
        match expression {
            Expression::Identifier(name) if self.context.contains_key(name) => None,
            Expression::Identifier(name) if name == "store" || name == "s" => Some(Vec::new()),
            Expression::Identifier(name) | Expression::StoreReference(name) => {
                Some(vec![name.as_str()])
            }
            Expression::Member { object, name } => {
                let mut path = self.store_path(&object.node)?;
                path.push(name.as_str());
                Some(path)
            }
            _ => None,
        }
    }
}

fn callee_name(callee: &Expression) -> Option<String> {
    match callee {
        Expression::Identifier(name) => Some(name.clone()),
        Expression::Member { object, name } => match &object.node {
            Expression::Identifier(namespace) => Some(format!("{namespace}.{name}")),
            _ => None,
        },
        _ => None,
    }
}

fn apply_binary(operator: BinaryOperator, left: &Value, right: &Value) -> Value {
    let ordering = || left.compare(right);
    match operator {
        BinaryOperator::Add => match (left, right) {
            (Value::Text(_) | Value::List(_) | Value::Map(_), _)
            | (_, Value::Text(_) | Value::List(_) | Value::Map(_)) => {
                Value::Text(format!("{left}{right}"))
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOperator::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOperator::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOperator::Remainder => Value::Number(left.to_number() % right.to_number()),
        BinaryOperator::Less => Value::Bool(ordering() == Some(Ordering::Less)),
        BinaryOperator::LessOrEqual => {
            Value::Bool(matches!(ordering(), Some(Ordering::Less | Ordering::Equal)))
        }
        BinaryOperator::Greater => Value::Bool(ordering() == Some(Ordering::Greater)),
        BinaryOperator::GreaterOrEqual => {
            Value::Bool(matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)))
        }
        BinaryOperator::Equal => Value::Bool(left.loose_equals(right)),
        BinaryOperator::NotEqual => Value::Bool(!left.loose_equals(right)),
        BinaryOperator::StrictEqual => Value::Bool(left.strict_equals(right)),
        BinaryOperator::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
        // Short-circuiting operators are handled by the evaluator.
        BinaryOperator::And | BinaryOperator::Or => Value::Undefined,
    }
}

fn expect_arity(
    function: &'static str,
    arguments: &[Value],
    expected: usize,
) -> Result<(), EvalError> {
    if arguments.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Arity {
            function,
            expected,
            found: arguments.len(),
        })
    }
}

fn call(name: &str, arguments: &[Value]) -> Result<Value, EvalError> {
    let number = |index: usize| arguments.get(index).map_or(f64::NAN, Value::to_number);
    let unary = |function: &'static str, operation: fn(f64) -> f64| {
        expect_arity(function, arguments, 1).map(|()| Value::Number(operation(number(0))))
    };
    match name.strip_prefix("Math.").unwrap_or(name) {
        "abs" => unary("abs", f64::abs),
        "floor" => unary("floor", f64::floor),
        "ceil" => unary("ceil", f64::ceil),
        "round" => unary("round", |number| (number + 0.5).floor()),
        "sqrt" => unary("sqrt", f64::sqrt),
        "min" => Ok(Value::Number(
            arguments.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
        )),
        "max" => Ok(Value::Number(
            arguments.iter().map(Value::to_number).fold(f64::NEG_INFINITY, f64::max),
        )),
        "pow" => {
            expect_arity("pow", arguments, 2)?;
            Ok(Value::Number(number(0).powf(number(1))))
        }
        "len" => {
            expect_arity("len", arguments, 1)?;
            Ok(match &arguments[0] {
                Value::List(items) => Value::Number(items.len() as f64),
                Value::Map(map) => Value::Number(map.len() as f64),
                Value::Text(text) => Value::Number(text.chars().count() as f64),
                _ => Value::Undefined,
            })
        }
        "string" | "String" => {
            expect_arity("string", arguments, 1)?;
            Ok(Value::Text(arguments[0].to_display_string()))
        }
        "number" | "Number" => {
            expect_arity("number", arguments, 1)?;
            Ok(Value::Number(number(0)))
        }
        _ => Err(EvalError::UnknownFunction(name.to_owned())),
    }
}
