//! Error types for the calorie companion.

use thiserror::Error;

/// Errors that can occur when parsing user-supplied profile values.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown gender: {0}")]
    UnknownGender(String),

    #[error("unknown goal: {0}")]
    UnknownGoal(String),
}

/// Errors that can occur while reading or writing the database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

/// Errors that can occur when updating a user profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("weight must be between {min} and {max} kg: {value}")]
    WeightOutOfRange { value: f64, min: f64, max: f64 },

    #[error("height must be between {min} and {max} cm: {value}")]
    HeightOutOfRange { value: u32, min: u32, max: u32 },

    #[error("unknown time zone: {0}")]
    UnknownTimezone(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that can occur when searching the external food database.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("food database answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("search query is empty")]
    EmptyQuery,
}

impl LookupError {
    /// Returns true for failures worth retrying: transport errors and
    /// server-side statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            LookupError::Request(_) => true,
            LookupError::Status(status) => status.is_server_error() || status.as_u16() == 429,
            LookupError::InvalidResponse(_) | LookupError::EmptyQuery => false,
        }
    }
}

/// Rejected input during the add-food conversation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("product name cannot be empty")]
    EmptyProductName,

    #[error("product name is longer than {max} characters")]
    ProductNameTooLong { max: usize },

    #[error("weight must be a positive whole number of grams: {0}")]
    InvalidWeight(String),

    #[error("a portion can weigh at most {max} g")]
    WeightTooLarge { max: u32 },

    #[error("calories per 100 g must be a whole number, 0 or more: {0}")]
    InvalidCalories(String),

    #[error("calories per 100 g cannot exceed {max}")]
    CaloriesTooHigh { max: u32 },

    #[error("choose a number from 1 to {max}, or type manual")]
    InvalidChoice { max: usize },

    #[error("answer yes to log it or edit to enter calories yourself")]
    InvalidConfirmation,
}
