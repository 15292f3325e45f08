use rusqlite;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("数据库错误: {message}")]
    Database { message: String },

    #[error("记录未找到")]
    NotFound,

    #[error("记录冲突: {message}")]
    Conflict { message: String },

    #[error("状态不允许此操作: {message}")]
    InvalidState { message: String },

    #[error("配置错误: {message}")]
    Configuration { message: String },

    #[error("数据提供方不可用: {message}")]
    Provider { message: String },

    #[error("验证失败: {message}")]
    Validation { message: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn not_found() -> Self {
        warn!(target: "app::db", "resource not found");
        AppError::NotFound
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::state", %message, "invalid state transition");
        AppError::InvalidState { message }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::catalog", %message, "configuration error");
        AppError::Configuration { message }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::provider", %message, "provider error");
        AppError::Provider { message }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "validation error");
        AppError::Validation { message }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::conflict", %message, "conflict error");
        AppError::Conflict { message }
    }

    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::db", %message, "database error");
        AppError::Database { message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::Error::{QueryReturnedNoRows, SqliteFailure};
        use rusqlite::ErrorCode;

        match &error {
            QueryReturnedNoRows => AppError::not_found(),
            SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                AppError::conflict("违反唯一性或约束限制")
            }
            _ => {
                error!(target: "app::db", error = ?error, "sqlite error");
                AppError::database(error.to_string())
            }
        }
    }
}
