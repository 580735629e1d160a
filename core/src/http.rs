//! HTTP messages described as plain data.
//!
//! # Design
//! The codec builds `HttpRequest` values and parses `HttpResponse` values
//! without touching the network. A `Transport` executes the round trip in
//! between. Keeping the codec free of I/O makes every broker interaction
//! reproducible from a recorded response.
//!
//! `path` holds the absolute URL without a query string; query parameters
//! are kept as ordered pairs so that optional correlation fields can be
//! omitted entirely rather than sent empty.

/// HTTP methods used by the Open Service Broker API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
///
/// Produced by a `Transport` and handed back to the codec for
/// classification. `body` is empty when the broker sent no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: "http://broker/v2/catalog".to_string(),
            query: vec![("plan_id".to_string(), "p1".to_string())],
            headers: vec![("X-Broker-Api-Version".to_string(), "2.17".to_string())],
            body: None,
        }
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request();
        assert_eq!(req.header("x-broker-api-version"), Some("2.17"));
        assert_eq!(req.header("authorization"), None);
    }

    #[test]
    fn query_lookup_is_exact() {
        let req = request();
        assert_eq!(req.query_param("plan_id"), Some("p1"));
        assert_eq!(req.query_param("PLAN_ID"), None);
    }

    #[test]
    fn method_names() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Put.as_str(), "PUT");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }
}
