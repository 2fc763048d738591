//! Closed error taxonomy stored in `TileJob.error_code`. Every terminal
//! failure the processor records carries one of these; nothing outside
//! this set is ever written to the store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    MapboxTooManyRequests,
    MapboxServerError,
    MapboxClientError,
    MapboxBadRequest,
    MapboxTimeout,

    GoogleTooManyRequests,
    GoogleServerError,
    GoogleClientError,
    GoogleBadRequest,
    GoogleTimeout,

    OpenaiTooManyRequests,
    OpenaiServerError,
    OpenaiClientError,
    OpenaiBadResponse,
    OpenaiTimeout,

    S3PutFailed,
    S3GetFailed,

    SchemaInvalid,
    MessageParseError,

    DeadlineExceeded,
    RetryExhausted,
    ClaimFailed,
    UnknownError,
}

impl ErrorCode {
    /// The exact string persisted to DynamoDB's `error_code` attribute.
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            MapboxTooManyRequests => "MAPBOX_429",
            MapboxServerError => "MAPBOX_5XX",
            MapboxClientError => "MAPBOX_4XX",
            MapboxBadRequest => "MAPBOX_BAD_REQUEST",
            MapboxTimeout => "MAPBOX_TIMEOUT",
            GoogleTooManyRequests => "GOOGLE_429",
            GoogleServerError => "GOOGLE_5XX",
            GoogleClientError => "GOOGLE_4XX",
            GoogleBadRequest => "GOOGLE_BAD_REQUEST",
            GoogleTimeout => "GOOGLE_TIMEOUT",
            OpenaiTooManyRequests => "OPENAI_429",
            OpenaiServerError => "OPENAI_5XX",
            OpenaiClientError => "OPENAI_4XX",
            OpenaiBadResponse => "OPENAI_BAD_RESPONSE",
            OpenaiTimeout => "OPENAI_TIMEOUT",
            S3PutFailed => "S3_PUT_FAILED",
            S3GetFailed => "S3_GET_FAILED",
            SchemaInvalid => "SCHEMA_INVALID",
            MessageParseError => "MESSAGE_PARSE_ERROR",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            RetryExhausted => "RETRY_EXHAUSTED",
            ClaimFailed => "CLAIM_FAILED",
            UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known upstream providers an HTTP status can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Mapbox,
    Google,
    Openai,
}

/// Maps an HTTP status code to an [`ErrorCode`] for the given provider.
///
/// `429 -> _429`, `[500,600) -> _5XX`, `400 -> _BAD_REQUEST`,
/// `(400,500) -> _4XX`, anything else -> `UnknownError`. Openai's
/// "bad request" case is folded into `OpenaiClientError` rather than a
/// dedicated bad-request variant, since only the imagery providers
/// distinguish 400 from the rest of the 4xx range in the error taxonomy.
pub fn error_code_from_http_status(provider: Provider, status: u16) -> ErrorCode {
    use ErrorCode::*;
    use Provider::*;

    match (provider, status) {
        (Mapbox, 429) => MapboxTooManyRequests,
        (Google, 429) => GoogleTooManyRequests,
        (Openai, 429) => OpenaiTooManyRequests,

        (_, s) if (500..600).contains(&s) => match provider {
            Mapbox => MapboxServerError,
            Google => GoogleServerError,
            Openai => OpenaiServerError,
        },

        (Mapbox, 400) => MapboxBadRequest,
        (Google, 400) => GoogleBadRequest,

        (_, s) if (400..500).contains(&s) => match provider {
            Mapbox => MapboxClientError,
            Google => GoogleClientError,
            Openai => OpenaiClientError,
        },

        _ => UnknownError,
    }
}

/// The code for an upstream call that never produced an HTTP status at
/// all — a connection drop or a client-side timeout.
pub fn timeout_error_code(provider: Provider) -> ErrorCode {
    match provider {
        Provider::Mapbox => ErrorCode::MapboxTimeout,
        Provider::Google => ErrorCode::GoogleTimeout,
        Provider::Openai => ErrorCode::OpenaiTimeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rate_limit() {
        assert_eq!(error_code_from_http_status(Provider::Mapbox, 429), ErrorCode::MapboxTooManyRequests);
    }

    #[test]
    fn maps_server_error_range() {
        assert_eq!(error_code_from_http_status(Provider::Google, 503), ErrorCode::GoogleServerError);
        assert_eq!(error_code_from_http_status(Provider::Google, 599), ErrorCode::GoogleServerError);
    }

    #[test]
    fn maps_bad_request_distinctly_from_other_4xx() {
        assert_eq!(error_code_from_http_status(Provider::Mapbox, 400), ErrorCode::MapboxBadRequest);
        assert_eq!(error_code_from_http_status(Provider::Mapbox, 403), ErrorCode::MapboxClientError);
    }

    #[test]
    fn unmapped_status_is_unknown() {
        assert_eq!(error_code_from_http_status(Provider::Openai, 200), ErrorCode::UnknownError);
        assert_eq!(error_code_from_http_status(Provider::Openai, 301), ErrorCode::UnknownError);
    }

    #[test]
    fn error_code_serializes_to_its_wire_string() {
        assert_eq!(ErrorCode::DeadlineExceeded.as_str(), "DEADLINE_EXCEEDED");
    }

    #[test]
    fn timeout_error_code_is_per_provider() {
        assert_eq!(timeout_error_code(Provider::Mapbox), ErrorCode::MapboxTimeout);
        assert_eq!(timeout_error_code(Provider::Google), ErrorCode::GoogleTimeout);
        assert_eq!(timeout_error_code(Provider::Openai), ErrorCode::OpenaiTimeout);
    }
}
