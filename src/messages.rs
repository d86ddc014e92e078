//! Generated protobuf types and conversions from store rows.

use crate::store::models::{Expression, ExpressionStatus, Task, TaskOperation, TaskStatus};

/// Re-export generated protobuf types.
pub mod proto {
    tonic::include_proto!("tally.v1");
}

impl From<ExpressionStatus> for proto::ExpressionStatus {
    fn from(status: ExpressionStatus) -> Self {
        match status {
            ExpressionStatus::Pending => Self::Pending,
            ExpressionStatus::InProgress => Self::InProgress,
            ExpressionStatus::Completed => Self::Completed,
            ExpressionStatus::Failed => Self::Failed,
        }
    }
}

impl From<TaskStatus> for proto::TaskStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Created => Self::Created,
            TaskStatus::Pending => Self::Pending,
            TaskStatus::InProgress => Self::InProgress,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed,
        }
    }
}

impl From<TaskOperation> for proto::TaskOperation {
    fn from(operation: TaskOperation) -> Self {
        match operation {
            TaskOperation::Addition => Self::Addition,
            TaskOperation::Subtraction => Self::Subtraction,
            TaskOperation::Multiplication => Self::Multiplication,
            TaskOperation::Division => Self::Division,
        }
    }
}

impl TryFrom<proto::TaskOperation> for TaskOperation {
    type Error = ();

    fn try_from(operation: proto::TaskOperation) -> Result<Self, Self::Error> {
        match operation {
            proto::TaskOperation::Addition => Ok(Self::Addition),
            proto::TaskOperation::Subtraction => Ok(Self::Subtraction),
            proto::TaskOperation::Multiplication => Ok(Self::Multiplication),
            proto::TaskOperation::Division => Ok(Self::Division),
            proto::TaskOperation::Unspecified => Err(()),
        }
    }
}

pub fn expression_to_proto(expression: &Expression) -> proto::Expression {
    proto::Expression {
        id: expression.id.clone(),
        expression: expression.expression.clone(),
        status: proto::ExpressionStatus::from(expression.status) as i32,
        result: expression.result,
        error: expression.error.clone(),
        created_at_unix_ms: expression.created_at.timestamp_millis(),
        updated_at_unix_ms: expression.updated_at.timestamp_millis(),
    }
}

pub fn task_to_proto(task: &Task) -> proto::ExpressionTask {
    proto::ExpressionTask {
        id: task.id.clone(),
        expression_id: task.expression_id.clone(),
        parent_task_1_id: task.parent_task_1_id.clone(),
        parent_task_2_id: task.parent_task_2_id.clone(),
        arg1: task.arg1,
        arg2: task.arg2,
        operation: proto::TaskOperation::from(task.operation) as i32,
        operation_time_ms: task.operation_time_ms,
        status: proto::TaskStatus::from(task.status) as i32,
        result: task.result,
        created_at_unix_ms: task.created_at.timestamp_millis(),
        updated_at_unix_ms: task.updated_at.timestamp_millis(),
    }
}

/// Project a claimed task onto the worker surface. Both operands are known
/// for any claimable task; a violated invariant surfaces as a NaN operand
/// and therefore a failed task rather than a silent zero.
pub fn agent_task_to_proto(task: &Task) -> proto::AgentTask {
    proto::AgentTask {
        id: task.id.clone(),
        operation: proto::TaskOperation::from(task.operation) as i32,
        arg1: task.arg1.unwrap_or(f64::NAN),
        arg2: task.arg2.unwrap_or(f64::NAN),
        operation_time_ms: task.operation_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn operation_round_trip() {
        for operation in [
            TaskOperation::Addition,
            TaskOperation::Subtraction,
            TaskOperation::Multiplication,
            TaskOperation::Division,
        ] {
            let wire = proto::TaskOperation::from(operation);
            assert_eq!(TaskOperation::try_from(wire), Ok(operation));
        }
        assert!(TaskOperation::try_from(proto::TaskOperation::Unspecified).is_err());
    }

    #[test]
    fn agent_task_projection() {
        let now = Utc::now();
        let task = Task {
            id: "t1".into(),
            expression_id: "e1".into(),
            parent_task_1_id: None,
            parent_task_2_id: None,
            arg1: Some(2.0),
            arg2: Some(3.0),
            operation: TaskOperation::Multiplication,
            operation_time_ms: 250,
            status: TaskStatus::InProgress,
            result: None,
            expire_at: None,
            created_at: now,
            updated_at: now,
        };
        let wire = agent_task_to_proto(&task);
        assert_eq!(wire.id, "t1");
        assert_eq!(wire.arg1, 2.0);
        assert_eq!(wire.arg2, 3.0);
        assert_eq!(wire.operation_time_ms, 250);
        assert_eq!(
            wire.operation,
            proto::TaskOperation::Multiplication as i32
        );
    }
}
