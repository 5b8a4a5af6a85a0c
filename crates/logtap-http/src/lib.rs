//! HTTP interface for logtap
//!
//! A deliberately small HTTP/1.1 responder written directly against TCP
//! byte streams. Each connection serves exactly one request and is closed.
//!
//! | Request      | Response                                   |
//! |--------------|--------------------------------------------|
//! | `GET /logs`  | `200` JSON `{logs, count, timestamp}`      |
//! | `GET /clear` | `200` JSON `{"status":"cleared"}`          |
//! | `OPTIONS`    | `200` empty body, CORS headers             |
//! | anything else| `404` `Not Found`                          |

mod connection;
mod error;
mod netinfo;
mod response;
mod server;

pub use connection::{
    ConnectionHandler, ConnectionId, ConnectionState, DEFAULT_READ_TIMEOUT, Route,
};
pub use error::ServerError;
pub use netinfo::{UNKNOWN_ADDRESS, local_address};
pub use response::{HttpResponse, StatusCode};
pub use server::{DEFAULT_HOST, DEFAULT_PORT, LogServer, ServerConfig};
