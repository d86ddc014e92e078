//! SQLite-backed store for users, expressions and tasks.
//!
//! The store is the only shared mutable state in the system. Every mutating
//! operation runs as one transaction whose first statement is a write, so
//! concurrent callers serialize on the SQLite write lock and each operation
//! is observed atomically. Claiming compiles to a single
//! `UPDATE ... WHERE id = (SELECT ...) RETURNING ...` statement, which makes
//! it safe under any number of concurrent workers.

pub mod models;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use models::{
    CreateExpressionCmd, Expression, ExpressionStatus, Task, TaskOutcome, TaskStatus, User,
};

/// Slack added to the operation time when stamping a claim lease, in
/// milliseconds. An expired lease marks a task eligible for reclamation by a
/// future reaper.
const LEASE_SLACK_MS: i64 = 60_000;

const TASK_COLUMNS: &str = "id, expression_id, parent_task_1_id, parent_task_2_id, \
     arg1, arg2, operation, operation_time_ms, status, result, expire_at, \
     created_at, updated_at";

const EXPRESSION_COLUMNS: &str =
    "id, user_id, expression, status, result, error, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user already exists")]
    UserExists,
    #[error("user not found")]
    UserNotFound,
    #[error("expression not found")]
    ExpressionNotFound,
    #[error("task not found")]
    TaskNotFound,
    #[error("no pending tasks")]
    NoPendingTasks,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and run migrations.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(path))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a user. Uniqueness is on `login`.
    pub async fn create_user(&self, login: &str, password_digest: &str) -> StoreResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (id, login, password_digest, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(login)
        .bind(password_digest)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Err(StoreError::UserExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Exact credential-match lookup.
    pub async fn get_user(&self, login: &str, password_digest: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, login, password_digest, created_at, updated_at FROM users \
             WHERE login = ? AND password_digest = ?",
        )
        .bind(login)
        .bind(password_digest)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UserNotFound)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Persist an expression and its whole task plan in one transaction.
    ///
    /// Source tasks (no parent references) start `Pending`, everything else
    /// `Created`. Returns the new expression id.
    pub async fn create_expression(
        &self,
        user_id: &str,
        cmd: CreateExpressionCmd,
    ) -> StoreResult<String> {
        let now = Utc::now();
        let expression_id = Uuid::now_v7().to_string();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expressions (id, user_id, expression, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&expression_id)
        .bind(user_id)
        .bind(&cmd.expression)
        .bind(ExpressionStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if !cmd.tasks.is_empty() {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO tasks (id, expression_id, parent_task_1_id, parent_task_2_id, \
                 arg1, arg2, operation, operation_time_ms, status, created_at, updated_at) ",
            );
            builder.push_values(cmd.tasks.iter(), |mut row, task| {
                let status = if task.parent_task_1_id.is_none() && task.parent_task_2_id.is_none()
                {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Created
                };
                row.push_bind(&task.id)
                    .push_bind(&expression_id)
                    .push_bind(&task.parent_task_1_id)
                    .push_bind(&task.parent_task_2_id)
                    .push_bind(task.arg1)
                    .push_bind(task.arg2)
                    .push_bind(task.operation)
                    .push_bind(task.operation_time_ms)
                    .push_bind(status)
                    .push_bind(now)
                    .push_bind(now);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(expression_id = %expression_id, tasks = cmd.tasks.len(), "expression created");
        Ok(expression_id)
    }

    /// All expressions owned by the user, newest first.
    pub async fn list_expressions(&self, user_id: &str) -> StoreResult<Vec<Expression>> {
        let query = format!(
            "SELECT {EXPRESSION_COLUMNS} FROM expressions \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC"
        );
        Ok(sqlx::query_as::<_, Expression>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Ownership-scoped lookup.
    pub async fn get_expression(
        &self,
        user_id: &str,
        expression_id: &str,
    ) -> StoreResult<Expression> {
        let query = format!(
            "SELECT {EXPRESSION_COLUMNS} FROM expressions WHERE id = ? AND user_id = ?"
        );
        sqlx::query_as::<_, Expression>(&query)
            .bind(expression_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ExpressionNotFound)
    }

    /// All tasks of an owned expression, in creation order (topological).
    pub async fn list_expression_tasks(
        &self,
        user_id: &str,
        expression_id: &str,
    ) -> StoreResult<Vec<Task>> {
        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM expressions WHERE id = ? AND user_id = ?",
        )
        .bind(expression_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if owned == 0 {
            return Err(StoreError::ExpressionNotFound);
        }

        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE expression_id = ? \
             ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, Task>(&query)
            .bind(expression_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Task claiming and completion
    // ------------------------------------------------------------------

    /// Atomically claim the oldest pending task.
    ///
    /// The claim itself is one statement, so no two callers can observe the
    /// same row. The same transaction stamps the lease and promotes the
    /// owning expression on its first claim.
    pub async fn claim_pending_task(&self) -> StoreResult<Task> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claim = format!(
            "UPDATE tasks SET status = ?, updated_at = ? \
             WHERE id = (SELECT id FROM tasks WHERE status = ? ORDER BY created_at, id LIMIT 1) \
             RETURNING {TASK_COLUMNS}"
        );
        let Some(mut task) = sqlx::query_as::<_, Task>(&claim)
            .bind(TaskStatus::InProgress)
            .bind(now)
            .bind(TaskStatus::Pending)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Err(StoreError::NoPendingTasks);
        };

        let expire_at =
            now + chrono::Duration::milliseconds(2 * (task.operation_time_ms + LEASE_SLACK_MS));
        sqlx::query("UPDATE tasks SET expire_at = ? WHERE id = ?")
            .bind(expire_at)
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        task.expire_at = Some(expire_at);

        sqlx::query("UPDATE expressions SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(ExpressionStatus::InProgress)
            .bind(now)
            .bind(&task.expression_id)
            .bind(ExpressionStatus::Pending)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        metrics::counter!("tally_tasks_claimed_total").increment(1);
        Ok(task)
    }

    /// Record a task outcome and advance the expression state machine.
    ///
    /// Finishing a task that is already terminal is a no-op success, which
    /// makes at-least-once worker submissions safe: the terminal-status guard
    /// on the first update also prevents double propagation into children.
    pub async fn finish_task(&self, task_id: &str, outcome: TaskOutcome) -> StoreResult<()> {
        let now = Utc::now();
        let (status, result) = match outcome {
            TaskOutcome::Completed(value) => (TaskStatus::Completed, Some(value)),
            TaskOutcome::Failed => (TaskStatus::Failed, None),
        };

        let mut tx = self.pool.begin().await?;

        let update = format!(
            "UPDATE tasks SET status = ?, result = ?, updated_at = ?, expire_at = NULL \
             WHERE id = ? AND status NOT IN (?, ?) \
             RETURNING {TASK_COLUMNS}"
        );
        let Some(task) = sqlx::query_as::<_, Task>(&update)
            .bind(status)
            .bind(result)
            .bind(now)
            .bind(task_id)
            .bind(TaskStatus::Completed)
            .bind(TaskStatus::Failed)
            .fetch_optional(&mut *tx)
            .await?
        else {
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE id = ?")
                .bind(task_id)
                .fetch_one(&mut *tx)
                .await?;
            if exists == 0 {
                return Err(StoreError::TaskNotFound);
            }
            // Already terminal: a resubmitted result, nothing to do.
            return Ok(());
        };

        match outcome {
            TaskOutcome::Failed => self.fail_expression(&mut tx, &task).await?,
            TaskOutcome::Completed(value) => {
                let children: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM tasks WHERE parent_task_1_id = ? OR parent_task_2_id = ?",
                )
                .bind(&task.id)
                .bind(&task.id)
                .fetch_one(&mut *tx)
                .await?;

                if children == 0 {
                    self.complete_expression(&mut tx, &task, value).await?;
                } else {
                    self.propagate_to_child(&mut tx, &task, value).await?;
                }
            }
        }

        tx.commit().await?;
        metrics::counter!("tally_tasks_finished_total", "status" => status.as_str()).increment(1);
        Ok(())
    }

    /// Fail the owning expression and every task of it that is not yet
    /// terminal, all stamped with the failing task's `updated_at`.
    async fn fail_expression(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task: &Task,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE expressions SET status = ?, error = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN (?, ?)",
        )
        .bind(ExpressionStatus::Failed)
        .bind(format!("task {} failed", task.id))
        .bind(task.updated_at)
        .bind(&task.expression_id)
        .bind(ExpressionStatus::Completed)
        .bind(ExpressionStatus::Failed)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ? \
             WHERE expression_id = ? AND status NOT IN (?, ?)",
        )
        .bind(TaskStatus::Failed)
        .bind(task.updated_at)
        .bind(&task.expression_id)
        .bind(TaskStatus::Completed)
        .bind(TaskStatus::Failed)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// The terminal task completed: its result is the expression's result.
    async fn complete_expression(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task: &Task,
        value: f64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE expressions SET status = ?, result = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN (?, ?)",
        )
        .bind(ExpressionStatus::Completed)
        .bind(value)
        .bind(task.updated_at)
        .bind(&task.expression_id)
        .bind(ExpressionStatus::Completed)
        .bind(ExpressionStatus::Failed)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Write the completed task's value into the unique child's matching
    /// operand slot and promote the child once both operands are known.
    async fn propagate_to_child(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task: &Task,
        value: f64,
    ) -> StoreResult<()> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE parent_task_1_id = ? OR parent_task_2_id = ?"
        );
        let mut child = sqlx::query_as::<_, Task>(&query)
            .bind(&task.id)
            .bind(&task.id)
            .fetch_one(&mut **tx)
            .await?;

        if child.parent_task_1_id.as_deref() == Some(task.id.as_str()) {
            child.arg1 = Some(value);
        } else {
            child.arg2 = Some(value);
        }
        if child.arg1.is_some() && child.arg2.is_some() {
            child.status = TaskStatus::Pending;
        }

        sqlx::query("UPDATE tasks SET arg1 = ?, arg2 = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(child.arg1)
            .bind(child.arg2)
            .bind(child.status)
            .bind(task.updated_at)
            .bind(&child.id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
