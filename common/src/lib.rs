//! Conformance Common Types
//!
//! Wire-level pieces shared by the harness and its tests: the instance index
//! carried in application responses and the cookie jar that carries session
//! affinity between independent requests.

pub mod cookie;
pub mod index;

pub use self::cookie::{Cookie, CookieJar, RequestTarget};
pub use index::{
    extract_index, greeting, greeting_at, InstanceIndex, ParseError, INDEX_MARKER,
    INDEX_TERMINATOR,
};
