use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use nano_payment_engine::{notifier::NotifierError, PaymentGatewayError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The payment stream for this invoice has not started yet")]
    StreamNotStarted,
    #[error("Too many live payment streams for this invoice")]
    TooManySubscribers,
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::StreamNotStarted => StatusCode::CONFLICT,
            Self::TooManySubscribers => StatusCode::TOO_MANY_REQUESTS,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<PaymentGatewayError> for ServerError {
    fn from(e: PaymentGatewayError) -> Self {
        match e {
            PaymentGatewayError::InvoiceNotFound(id) => Self::NoRecordFound(format!("Invoice {id}")),
            PaymentGatewayError::ServiceNotFound(id) => Self::NoRecordFound(format!("Service {id}")),
            other => Self::BackendError(other.to_string()),
        }
    }
}

impl From<NotifierError> for ServerError {
    fn from(e: NotifierError) -> Self {
        match e {
            NotifierError::NotStarted(_) => Self::StreamNotStarted,
            NotifierError::TooManySessions(_) => Self::TooManySubscribers,
            NotifierError::Database(e) => Self::BackendError(e.to_string()),
        }
    }
}
