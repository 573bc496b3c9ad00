//! HTTP/1.1 wire format.
//!
//! # Data Flow
//! ```text
//! method + uri + headers + body
//!     → request.rs (request line, auth and protocol headers, serialization)
//!     → connection (bytes on the wire)
//!     → parser.rs (incremental status line / headers / body decoding)
//!     → response.rs (status, headers, body)
//! ```

pub mod parser;
pub mod request;
pub mod response;
pub mod status;

pub use parser::{HttpResponseParser, ParserState};
pub use request::{HttpMethod, HttpRequest, RequestTarget};
pub use response::HttpResponse;
pub use status::HttpStatusCode;
