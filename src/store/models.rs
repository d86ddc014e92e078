//! Row types and commands for the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of an expression. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ExpressionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExpressionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status of a task.
///
/// `Created` means at least one operand is still an unresolved parent
/// reference; `Pending` means both operands are known and the task is
/// claimable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum TaskStatus {
    Created,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One of the four binary operations a task can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum TaskOperation {
    #[sqlx(rename = "+")]
    #[serde(rename = "+")]
    Addition,
    #[sqlx(rename = "-")]
    #[serde(rename = "-")]
    Subtraction,
    #[sqlx(rename = "*")]
    #[serde(rename = "*")]
    Multiplication,
    #[sqlx(rename = "/")]
    #[serde(rename = "/")]
    Division,
}

impl TaskOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Addition => "+",
            Self::Subtraction => "-",
            Self::Multiplication => "*",
            Self::Division => "/",
        }
    }

    /// Apply the operation. Division by zero yields the NaN sentinel rather
    /// than an infinity so that downstream failure handling is uniform.
    pub fn apply(self, arg1: f64, arg2: f64) -> f64 {
        match self {
            Self::Addition => arg1 + arg2,
            Self::Subtraction => arg1 - arg2,
            Self::Multiplication => arg1 * arg2,
            Self::Division => {
                if arg2 == 0.0 {
                    f64::NAN
                } else {
                    arg1 / arg2
                }
            }
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub login: String,
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Expression {
    pub id: String,
    pub user_id: String,
    pub expression: String,
    pub status: ExpressionStatus,
    pub result: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id: String,
    pub expression_id: String,
    pub parent_task_1_id: Option<String>,
    pub parent_task_2_id: Option<String>,
    pub arg1: Option<f64>,
    pub arg2: Option<f64>,
    pub operation: TaskOperation,
    pub operation_time_ms: i64,
    pub status: TaskStatus,
    pub result: Option<f64>,
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task row at insertion time. For each operand slot exactly one of the
/// parent id and the literal argument is set.
#[derive(Debug, Clone)]
pub struct CreateTaskCmd {
    pub id: String,
    pub parent_task_1_id: Option<String>,
    pub parent_task_2_id: Option<String>,
    pub arg1: Option<f64>,
    pub arg2: Option<f64>,
    pub operation: TaskOperation,
    pub operation_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CreateExpressionCmd {
    pub expression: String,
    pub tasks: Vec<CreateTaskCmd>,
}

/// Worker-reported outcome for a claimed task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskOutcome {
    Completed(f64),
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_apply() {
        assert_eq!(TaskOperation::Addition.apply(1.0, 2.0), 3.0);
        assert_eq!(TaskOperation::Subtraction.apply(1.0, 2.0), -1.0);
        assert_eq!(TaskOperation::Multiplication.apply(3.0, 4.0), 12.0);
        assert_eq!(TaskOperation::Division.apply(8.0, 2.0), 4.0);
    }

    #[test]
    fn division_by_zero_is_nan() {
        assert!(TaskOperation::Division.apply(1.0, 0.0).is_nan());
        assert!(TaskOperation::Division.apply(0.0, 0.0).is_nan());
    }

    #[test]
    fn status_strings_match_wire_values() {
        assert_eq!(ExpressionStatus::InProgress.as_str(), "InProgress");
        assert_eq!(TaskStatus::Created.as_str(), "Created");
        assert_eq!(TaskOperation::Multiplication.as_str(), "*");
    }

    #[test]
    fn terminal_states() {
        assert!(ExpressionStatus::Completed.is_terminal());
        assert!(ExpressionStatus::Failed.is_terminal());
        assert!(!ExpressionStatus::InProgress.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
