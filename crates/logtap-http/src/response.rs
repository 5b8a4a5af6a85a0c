use serde::Serialize;

/// CORS headers sent with every response
const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Status codes this server emits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    NotFound,
    InternalServerError,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// A complete response, ready to be written to the socket
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Omitted from the headers when `None`
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Compact JSON body; serialization failure degrades to a 500
    pub fn json<T: Serialize>(value: &T) -> Self {
        Self::from_json(serde_json::to_vec(value))
    }

    /// Pretty-printed JSON body; serialization failure degrades to a 500
    pub fn json_pretty<T: Serialize>(value: &T) -> Self {
        Self::from_json(serde_json::to_vec_pretty(value))
    }

    fn from_json(result: serde_json::Result<Vec<u8>>) -> Self {
        match result {
            Ok(body) => Self {
                status: StatusCode::Ok,
                content_type: Some(JSON),
                body,
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response body");
                Self::text(StatusCode::InternalServerError, "Failed to serialize logs")
            }
        }
    }

    pub fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: Some(TEXT),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NotFound, "Not Found")
    }

    /// CORS preflight reply: headers only
    pub fn preflight() -> Self {
        Self {
            status: StatusCode::Ok,
            content_type: None,
            body: Vec::new(),
        }
    }

    /// Serialize status line, headers and body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.reason()
        );
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        for (name, value) in CORS_HEADERS {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
