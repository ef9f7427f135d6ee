//! Request classification.
//!
//! Every intercepted request is classified exactly once, by a pure function of
//! the request and the application origin. The dispatcher matches on the
//! result exhaustively.

use reqwest::{Method, Url};

use crate::cache::entry::NamespaceRole;
use crate::network::request::{AgentRequest, Destination, RequestMode};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "css"];
const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm"];
const API_PATH_PREFIXES: &[&str] = &["/api/", "/.netlify/functions"];

/// Resource class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Same-origin API calls. Network-first with a deadline, bounded namespace.
    Api,
    /// Top-level navigations and HTML documents. Network-first.
    Document,
    /// Scripts and stylesheets. Cache-first.
    Script,
    /// Images. Cache-first, bounded namespace.
    Image,
    /// Fonts. Cache-first.
    Font,
    /// Another origin. Passed through, never cached.
    CrossOrigin,
    /// Same origin but not cacheable (non-GET, unknown type). Passed through.
    Uncached,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Api => "api",
            ResourceClass::Document => "document",
            ResourceClass::Script => "script",
            ResourceClass::Image => "image",
            ResourceClass::Font => "font",
            ResourceClass::CrossOrigin => "cross_origin",
            ResourceClass::Uncached => "uncached",
        }
    }

    /// Namespace runtime responses of this class are written into.
    pub fn namespace(&self) -> Option<NamespaceRole> {
        match self {
            ResourceClass::Document | ResourceClass::Script => Some(NamespaceRole::Dynamic),
            ResourceClass::Image => Some(NamespaceRole::Images),
            ResourceClass::Font => Some(NamespaceRole::Fonts),
            ResourceClass::Api => Some(NamespaceRole::Api),
            ResourceClass::CrossOrigin | ResourceClass::Uncached => None,
        }
    }

    /// Namespaces searched on lookup: the class's own namespace, then the precache.
    pub fn lookup_order(&self) -> Vec<NamespaceRole> {
        match self.namespace() {
            Some(role) => vec![role, NamespaceRole::Static],
            None => Vec::new(),
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of the last path segment, if any.
fn extension(url: &Url) -> Option<String> {
    let segment = url.path().rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn has_extension(ext: Option<&str>, list: &[&str]) -> bool {
    ext.is_some_and(|e| list.contains(&e))
}

/// Classify a request against the application origin. First match wins.
pub fn classify(request: &AgentRequest, app_origin: &Url) -> ResourceClass {
    if request.url.origin() != app_origin.origin() {
        return ResourceClass::CrossOrigin;
    }
    if request.method != Method::GET {
        return ResourceClass::Uncached;
    }
    let path = request.url.path();
    if API_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return ResourceClass::Api;
    }
    if request.mode == RequestMode::Navigate || request.destination == Destination::Document {
        return ResourceClass::Document;
    }

    let ext = extension(&request.url);
    let ext = ext.as_deref();

    if request.destination == Destination::Image || has_extension(ext, IMAGE_EXTENSIONS) {
        ResourceClass::Image
    } else if request.destination == Destination::Font || has_extension(ext, FONT_EXTENSIONS) {
        ResourceClass::Font
    } else if matches!(request.destination, Destination::Script | Destination::Style)
        || has_extension(ext, SCRIPT_EXTENSIONS)
    {
        ResourceClass::Script
    } else if has_extension(ext, DOCUMENT_EXTENSIONS) || request.accepts_html() {
        ResourceClass::Document
    } else {
        ResourceClass::Uncached
    }
}
