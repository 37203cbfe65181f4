use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Webhook queue is full")]
    QueueFull,

    #[error("Failed to decode event payload: {0}")]
    DecodeFailure(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected the request ({code}): {message}")]
    ProviderRejected { code: String, message: String },

    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("An active subscription already exists")]
    SubscriptionAlreadyActive,

    #[error("A payment method is required")]
    PaymentMethodRequired,

    #[error("Cancellation could not be confirmed with the payment provider")]
    CancellationNotConfirmed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Provider rejection code, when the provider supplied one.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            AppError::ProviderRejected { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    InvalidInput,
    InvalidSignature,
    Unauthorized,
    Forbidden,
    NotFound,
    QueueFull,
    DecodeFailure,
    ProviderUnavailable,
    ProviderRejected,
    DataInconsistency,
    SubscriptionAlreadyActive,
    PaymentMethodRequired,
    CancellationNotConfirmed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::DecodeFailure => "DECODE_FAILURE",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::ProviderRejected => "PROVIDER_REJECTED",
            ErrorCode::DataInconsistency => "DATA_INCONSISTENCY",
            ErrorCode::SubscriptionAlreadyActive => "SUBSCRIPTION_ALREADY_ACTIVE",
            ErrorCode::PaymentMethodRequired => "PAYMENT_METHOD_REQUIRED",
            ErrorCode::CancellationNotConfirmed => "CANCELLATION_NOT_CONFIRMED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
