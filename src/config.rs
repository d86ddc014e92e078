//! Environment-based configuration for both binaries.
//!
//! Values are read from the process environment, optionally seeded from a
//! local `.env` file. Every field has a default so a bare invocation works
//! against a local setup; parse failures are startup errors.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::store::models::TaskOperation;

/// Coordinator process configuration.
#[derive(Clone)]
pub struct CoordinatorConfig {
    pub log_level: String,
    pub mgmt_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub db_sqlite_path: String,
    pub auth_jwt_secret: String,
    pub auth_jwt_expiration: Duration,
    pub time_addition_ms: i64,
    pub time_subtraction_ms: i64,
    pub time_multiplication_ms: i64,
    pub time_division_ms: i64,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            log_level: env_or("LOG_LEVEL", "info"),
            mgmt_addr: parse_addr("MGMT_ADDR", "0.0.0.0:8081")?,
            grpc_addr: parse_addr("GRPC_ADDR", "0.0.0.0:50051")?,
            http_addr: parse_addr("HTTP_ADDR", "0.0.0.0:8080")?,
            db_sqlite_path: env_or("DB_SQLITE_PATH", ".data/db.sqlite"),
            auth_jwt_secret: env_or("AUTH_JWT_SECRET", "jwt-secret"),
            auth_jwt_expiration: Duration::from_secs(
                parse_int("AUTH_JWT_EXPIRATION", 86_400)? as u64
            ),
            time_addition_ms: parse_int("TIME_ADDITION_MS", 1000)?,
            time_subtraction_ms: parse_int("TIME_SUBTRACTION_MS", 1000)?,
            time_multiplication_ms: parse_int("TIME_MULTIPLICATIONS_MS", 1000)?,
            time_division_ms: parse_int("TIME_DIVISIONS_MS", 1000)?,
        })
    }

    /// Simulated compute duration attached to tasks of the given operation.
    pub fn operation_time_ms(&self, operation: TaskOperation) -> i64 {
        match operation {
            TaskOperation::Addition => self.time_addition_ms,
            TaskOperation::Subtraction => self.time_subtraction_ms,
            TaskOperation::Multiplication => self.time_multiplication_ms,
            TaskOperation::Division => self.time_division_ms,
        }
    }
}

impl std::fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("log_level", &self.log_level)
            .field("mgmt_addr", &self.mgmt_addr)
            .field("grpc_addr", &self.grpc_addr)
            .field("http_addr", &self.http_addr)
            .field("db_sqlite_path", &self.db_sqlite_path)
            .field("auth_jwt_secret", &"[SECRET]")
            .field("auth_jwt_expiration", &self.auth_jwt_expiration)
            .field("time_addition_ms", &self.time_addition_ms)
            .field("time_subtraction_ms", &self.time_subtraction_ms)
            .field("time_multiplication_ms", &self.time_multiplication_ms)
            .field("time_division_ms", &self.time_division_ms)
            .finish()
    }
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub log_level: String,
    pub mgmt_addr: SocketAddr,
    /// gRPC endpoint of the coordinator's agent surface.
    pub calculator_api_addr: String,
    pub computing_power: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let computing_power = parse_int("COMPUTING_POWER", 4)?;
        if computing_power < 1 {
            return Err(anyhow!("COMPUTING_POWER must be at least 1"));
        }

        Ok(Self {
            log_level: env_or("LOG_LEVEL", "info"),
            mgmt_addr: parse_addr("MGMT_ADDR", "0.0.0.0:8082")?,
            calculator_api_addr: env_or("CALCULATOR_API_ADDR", "http://localhost:50051"),
            computing_power: computing_power as usize,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr> {
    env_or(key, default)
        .parse()
        .with_context(|| format!("{key} is not a valid socket address"))
}

fn parse_int(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} is not a valid integer")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> CoordinatorConfig {
        CoordinatorConfig {
            log_level: "info".into(),
            mgmt_addr: "127.0.0.1:8081".parse().unwrap(),
            grpc_addr: "127.0.0.1:50051".parse().unwrap(),
            http_addr: "127.0.0.1:8080".parse().unwrap(),
            db_sqlite_path: ":memory:".into(),
            auth_jwt_secret: "hunter2".into(),
            auth_jwt_expiration: Duration::from_secs(60),
            time_addition_ms: 1,
            time_subtraction_ms: 2,
            time_multiplication_ms: 3,
            time_division_ms: 4,
        }
    }

    #[test]
    fn operation_times_map_per_operation() {
        let config = sample_config();
        assert_eq!(config.operation_time_ms(TaskOperation::Addition), 1);
        assert_eq!(config.operation_time_ms(TaskOperation::Subtraction), 2);
        assert_eq!(config.operation_time_ms(TaskOperation::Multiplication), 3);
        assert_eq!(config.operation_time_ms(TaskOperation::Division), 4);
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let rendered = format!("{:?}", sample_config());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[SECRET]"));
    }
}
