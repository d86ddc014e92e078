//! Expression compiler: source string → postfix → executable task plan.
//!
//! The pipeline is lex → shunting-yard → validate → schedule. Scheduling
//! walks the postfix stream with a stack whose entries are either literal
//! values or references to already-planned tasks; every operator becomes one
//! task whose operands are filled from the stack. The emission order is a
//! topological order of the resulting DAG (parents always precede children),
//! and the last planned task is the terminal one.

mod lexer;

pub use lexer::{lex, Token};

use thiserror::Error;
use uuid::Uuid;

use crate::store::models::TaskOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("invalid expression")]
    InvalidExpression,
}

/// A planned binary task. For each operand slot exactly one of the parent
/// reference and the literal value is set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub id: String,
    pub parent_task_1_id: Option<String>,
    pub parent_task_2_id: Option<String>,
    pub arg1: Option<f64>,
    pub arg2: Option<f64>,
    pub operation: TaskOperation,
}

/// Compile a source string into an ordered task plan.
pub fn compile(source: &str) -> Result<Vec<PlannedTask>, CompileError> {
    let tokens = lex(source)?;
    let postfix = to_postfix(tokens);
    validate_postfix(&postfix)?;
    schedule(&postfix)
}

/// Shunting-yard conversion to postfix.
///
/// Operators are left-associative with the usual precedence. Unmatched
/// parentheses are not an error here: a `(` left on the stack at end of
/// input, or a `)` that finds no opening partner, is emitted into the output
/// stream, where validation rejects it. This keeps both unbalanced cases on
/// one code path.
fn to_postfix(tokens: Vec<Token>) -> Vec<Token> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(_) => output.push(token),
            Token::LParen => stack.push(token),
            Token::RParen => {
                let mut matched = false;
                while let Some(top) = stack.pop() {
                    if top == Token::LParen {
                        matched = true;
                        break;
                    }
                    output.push(top);
                }
                if !matched {
                    output.push(Token::RParen);
                }
            }
            op => {
                let prec = op.precedence().unwrap_or(0);
                while let Some(&top) = stack.last() {
                    match top.precedence() {
                        Some(top_prec) if top_prec >= prec => {
                            stack.pop();
                            output.push(top);
                        }
                        _ => break,
                    }
                }
                stack.push(op);
            }
        }
    }

    while let Some(top) = stack.pop() {
        output.push(top);
    }
    output
}

/// Simulated postfix evaluation with a depth counter.
///
/// A literal pushes one entry; a binary operator needs two and nets minus
/// one. The stream is valid iff the counter never underflows, no paren
/// reached the stream, the final depth is exactly one, and at least one
/// operator was applied. The operator requirement rejects bare literals like
/// `"1"`, which compile to an empty plan and could never complete.
fn validate_postfix(postfix: &[Token]) -> Result<(), CompileError> {
    let mut depth: usize = 0;
    let mut operators: usize = 0;

    for token in postfix {
        match token {
            Token::Number(_) => depth += 1,
            Token::LParen | Token::RParen => return Err(CompileError::InvalidExpression),
            _ => {
                if depth < 2 {
                    return Err(CompileError::InvalidExpression);
                }
                depth -= 1;
                operators += 1;
            }
        }
    }

    if depth == 1 && operators >= 1 {
        Ok(())
    } else {
        Err(CompileError::InvalidExpression)
    }
}

#[derive(Debug, Clone)]
enum Operand {
    Literal(f64),
    TaskRef(String),
}

/// Translate a validated postfix stream into the task plan.
fn schedule(postfix: &[Token]) -> Result<Vec<PlannedTask>, CompileError> {
    let mut plan = Vec::new();
    let mut stack: Vec<Operand> = Vec::new();

    for token in postfix {
        let operation = match token {
            Token::Number(value) => {
                stack.push(Operand::Literal(*value));
                continue;
            }
            Token::Plus => TaskOperation::Addition,
            Token::Minus => TaskOperation::Subtraction,
            Token::Star => TaskOperation::Multiplication,
            Token::Slash => TaskOperation::Division,
            Token::LParen | Token::RParen => return Err(CompileError::InvalidExpression),
        };

        let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
            return Err(CompileError::InvalidExpression);
        };

        let mut task = PlannedTask {
            id: Uuid::now_v7().to_string(),
            parent_task_1_id: None,
            parent_task_2_id: None,
            arg1: None,
            arg2: None,
            operation,
        };
        match left {
            Operand::Literal(value) => task.arg1 = Some(value),
            Operand::TaskRef(id) => task.parent_task_1_id = Some(id),
        }
        match right {
            Operand::Literal(value) => task.arg2 = Some(value),
            Operand::TaskRef(id) => task.parent_task_2_id = Some(id),
        }

        stack.push(Operand::TaskRef(task.id.clone()));
        plan.push(task);
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(Operand::TaskRef(_)), true) => Ok(plan),
        _ => Err(CompileError::InvalidExpression),
    }
}
