//! Intercepted request as seen by the agent.

use bytes::Bytes;
use reqwest::{Method, Url};

use crate::cache::entry::RequestKey;

/// Fetch mode of a request, as declared by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level navigation.
    Navigate,
    /// Any subresource request.
    #[default]
    Subresource,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` header value.
    pub fn from_header(value: &str) -> Self {
        if value.eq_ignore_ascii_case("navigate") {
            RequestMode::Navigate
        } else {
            RequestMode::Subresource
        }
    }
}

/// Declared destination of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    /// Not declared, or a destination the agent does not distinguish.
    #[default]
    Empty,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` header value.
    pub fn from_header(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            _ => Destination::Empty,
        }
    }
}

/// A request entering the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub destination: Destination,

    /// Raw `Accept` header, forwarded to the network.
    pub accept: Option<String>,

    /// Other end-to-end headers forwarded to the network, names lowercased.
    pub headers: Vec<(String, String)>,

    /// Request body. Empty for GET.
    pub body: Bytes,
}

impl AgentRequest {
    /// A plain GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Subresource,
            destination: Destination::Empty,
            accept: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A top-level navigation to `url`.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            accept: Some("text/html".to_string()),
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Forward an extra header. `Accept` goes through [`AgentRequest::with_accept`].
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of a forwarded header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Cache key of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::from_url(&self.url)
    }

    /// Whether the client declared it accepts HTML.
    pub fn accepts_html(&self) -> bool {
        self.accept
            .as_deref()
            .is_some_and(|accept| accept.contains("text/html"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parsing() {
        assert_eq!(RequestMode::from_header("navigate"), RequestMode::Navigate);
        assert_eq!(RequestMode::from_header("no-cors"), RequestMode::Subresource);
        assert_eq!(Destination::from_header("image"), Destination::Image);
        assert_eq!(Destination::from_header("iframe"), Destination::Document);
        assert_eq!(Destination::from_header("audio"), Destination::Empty);
    }

    #[test]
    fn test_navigate_builder() {
        let req = AgentRequest::navigate(Url::parse("https://app.example/feed#latest").unwrap());
        assert_eq!(req.method, Method::GET);
        assert!(req.accepts_html());
        assert_eq!(req.key().as_str(), "https://app.example/feed");
    }

    #[test]
    fn test_forwarded_headers_and_body() {
        let req = AgentRequest::get(Url::parse("https://app.example/api/messages").unwrap())
            .with_method(Method::POST)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"text":"hi"}"#);
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.headers[0].0, "content-type");
        assert_eq!(req.body, r#"{"text":"hi"}"#);
        // Navigations never carry a body.
        assert!(AgentRequest::navigate(req.url.clone()).body.is_empty());
    }
}
