use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lokifi_market_data::{ProviderError, ProviderErrorCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ProviderErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
}

/// HTTP status for a provider failure code.
pub fn status_for(code: ProviderErrorCode) -> StatusCode {
    match code {
        ProviderErrorCode::RateLimited | ProviderErrorCode::QuotaExceeded => {
            StatusCode::TOO_MANY_REQUESTS
        }
        ProviderErrorCode::SymbolNotFound => StatusCode::NOT_FOUND,
        ProviderErrorCode::InvalidTimeframe => StatusCode::BAD_REQUEST,
        ProviderErrorCode::NetworkError | ProviderErrorCode::ProviderUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProviderErrorCode::AuthenticationError | ProviderErrorCode::DataQualityError => {
            StatusCode::BAD_GATEWAY
        }
        ProviderErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, retry_after) = match self {
            ApiError::Provider(e) => {
                let status = status_for(e.code);
                let retry_after = e.retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS);
                let body = ErrorBody {
                    code: status.as_u16(),
                    message: e.message,
                    error_code: Some(e.code),
                    provider: Some(e.provider),
                };
                (status, body, retry_after)
            }
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                plain(StatusCode::BAD_REQUEST, reason),
                None,
            ),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn plain(status: StatusCode, message: String) -> ErrorBody {
    ErrorBody {
        code: status.as_u16(),
        message,
        error_code: None,
        provider: None,
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
