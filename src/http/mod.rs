pub mod cookie;
pub mod query;
pub mod request;
pub mod response;
pub mod types;

pub use cookie::{Cookie, SameSite};
pub use query::parse_query;
pub use request::{HttpReader, Request};
pub use response::{file_response, write_response, BodyValue, FileSource, Response, ResponseBody, DEFAULT_CHUNK_SIZE};
pub use types::{HeaderMap, HeaderMapView, Method, StatusCode, Version};
