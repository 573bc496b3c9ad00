//! HTTP status codes understood by the messaging layer.

/// Status codes the agent reacts to. Anything else maps to [`HttpStatusCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpStatusCode {
    NoHttpResponse,
    Ok,
    NoContent,
    MultiStatus,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    ProxyAuthenticationRequired,
    RequestTimeout,
    PayloadTooLarge,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    VersionNotSupported,
    VariantAlsoNegotiates,
    InsufficientStorage,
    LoopDetected,
    NotExtended,
    NetworkAuthenticationRequired,
    /// Unrecognised code, or a locally generated failure.
    Unknown,
    /// Locally generated: the connection is suspended.
    Suspend,
}

const NUMERIC_TABLE: &[(i32, HttpStatusCode)] = &[
    (200, HttpStatusCode::Ok),
    (204, HttpStatusCode::NoContent),
    (207, HttpStatusCode::MultiStatus),
    (400, HttpStatusCode::BadRequest),
    (401, HttpStatusCode::Unauthorized),
    (403, HttpStatusCode::Forbidden),
    (404, HttpStatusCode::NotFound),
    (405, HttpStatusCode::MethodNotAllowed),
    (407, HttpStatusCode::ProxyAuthenticationRequired),
    (408, HttpStatusCode::RequestTimeout),
    (413, HttpStatusCode::PayloadTooLarge),
    (429, HttpStatusCode::TooManyRequests),
    (500, HttpStatusCode::InternalServerError),
    (501, HttpStatusCode::NotImplemented),
    (502, HttpStatusCode::BadGateway),
    (503, HttpStatusCode::ServiceUnavailable),
    (504, HttpStatusCode::GatewayTimeout),
    (505, HttpStatusCode::VersionNotSupported),
    (506, HttpStatusCode::VariantAlsoNegotiates),
    (507, HttpStatusCode::InsufficientStorage),
    (508, HttpStatusCode::LoopDetected),
    (510, HttpStatusCode::NotExtended),
    (511, HttpStatusCode::NetworkAuthenticationRequired),
];

impl HttpStatusCode {
    /// Map a numeric code from a status line.
    pub fn from_code(code: u16) -> Self {
        NUMERIC_TABLE
            .iter()
            .find(|(num, _)| *num == i32::from(code))
            .map(|(_, status)| *status)
            .unwrap_or(HttpStatusCode::Unknown)
    }

    /// Numeric value; the local pseudo-codes are 0, -1 and -2.
    pub fn as_i32(&self) -> i32 {
        match self {
            HttpStatusCode::NoHttpResponse => 0,
            HttpStatusCode::Unknown => -1,
            HttpStatusCode::Suspend => -2,
            other => NUMERIC_TABLE
                .iter()
                .find(|(_, status)| status == other)
                .map(|(num, _)| *num)
                .unwrap_or(-1),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            HttpStatusCode::NoHttpResponse => "NO_HTTP_RESPONSE",
            HttpStatusCode::Ok => "HTTP_OK",
            HttpStatusCode::NoContent => "HTTP_NO_CONTENT",
            HttpStatusCode::MultiStatus => "HTTP_MULTI_STATUS",
            HttpStatusCode::BadRequest => "HTTP_BAD_REQUEST",
            HttpStatusCode::Unauthorized => "HTTP_UNAUTHORIZED",
            HttpStatusCode::Forbidden => "HTTP_FORBIDDEN",
            HttpStatusCode::NotFound => "HTTP_NOT_FOUND",
            HttpStatusCode::MethodNotAllowed => "HTTP_METHOD_NOT_ALLOWED",
            HttpStatusCode::ProxyAuthenticationRequired => "HTTP_PROXY_AUTHENTICATION_REQUIRED",
            HttpStatusCode::RequestTimeout => "HTTP_REQUEST_TIME_OUT",
            HttpStatusCode::PayloadTooLarge => "HTTP_PAYLOAD_TOO_LARGE",
            HttpStatusCode::TooManyRequests => "HTTP_TOO_MANY_REQUESTS",
            HttpStatusCode::InternalServerError => "HTTP_INTERNAL_SERVER_ERROR",
            HttpStatusCode::NotImplemented => "HTTP_NOT_IMPLEMENTED",
            HttpStatusCode::BadGateway => "HTTP_BAD_GATEWAY",
            HttpStatusCode::ServiceUnavailable => "HTTP_SERVICE_UNAVAILABLE",
            HttpStatusCode::GatewayTimeout => "HTTP_GATEWAY_TIMEOUT",
            HttpStatusCode::VersionNotSupported => "HTTP_VERSION_NOT_SUPPORTED",
            HttpStatusCode::VariantAlsoNegotiates => "HTTP_VARIANT_ALSO_NEGOTIATES",
            HttpStatusCode::InsufficientStorage => "HTTP_INSUFFICIENT_STORAGE",
            HttpStatusCode::LoopDetected => "HTTP_LOOP_DETECTED",
            HttpStatusCode::NotExtended => "HTTP_NOT_EXTENDED",
            HttpStatusCode::NetworkAuthenticationRequired => "HTTP_NETWORK_AUTHENTICATION_REQUIRED",
            HttpStatusCode::Unknown => "HTTP_UNKNOWN",
            HttpStatusCode::Suspend => "HTTP_SUSPEND",
        }
    }
}

impl std::fmt::Display for HttpStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.as_i32(), self.label())
    }
}
