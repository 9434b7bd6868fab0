use std::fmt;

use serde::Serialize;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://dataverse.harvard.edu";
pub const DEFAULT_HANDLE_PREFIX: &str = "hdl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Handle,
    Doi,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Handle => "hdl",
            Scheme::Doi => "doi",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Components of the identifier cell as parsed, kept for the output document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UriParts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub scheme: Scheme,
    pub id: String,
    pub lookup_url: String,
    pub uri: UriParts,
}

impl Identifier {
    pub fn persistent_id(&self) -> String {
        format!("{}:{}", self.scheme, self.id)
    }
}

/// Maps identifier cells onto Dataverse persistent-id lookups.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    base_url: String,
    handle_prefix: String,
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_HANDLE_PREFIX)
    }
}

impl IdentifierResolver {
    pub fn new(base_url: &str, handle_prefix: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            handle_prefix: handle_prefix.to_string(),
        }
    }

    /// Never fails: anything whose host does not start with the handle token,
    /// including unparseable input, is treated as a DOI.
    pub fn resolve(&self, value: &str) -> Identifier {
        let value = value.trim();
        let uri = match Url::parse(value) {
            Ok(url) => UriParts {
                scheme: Some(url.scheme().to_string()),
                host: url.host_str().map(str::to_string),
                path: raw_path(value).unwrap_or(url.path()).to_string(),
                query: url.query().map(str::to_string),
                value: value.to_string(),
            },
            Err(_) => UriParts {
                path: value.to_string(),
                value: value.to_string(),
                ..UriParts::default()
            },
        };

        let is_handle = uri
            .host
            .as_deref()
            .and_then(|host| host.split('.').next())
            .map(|segment| segment == self.handle_prefix)
            .unwrap_or(false);
        let scheme = if is_handle { Scheme::Handle } else { Scheme::Doi };
        let id = uri.path.strip_prefix('/').unwrap_or(&uri.path).to_string();

        Identifier {
            lookup_url: self.lookup_url(scheme, &id),
            scheme,
            id,
            uri,
        }
    }

    pub fn lookup_url(&self, scheme: Scheme, id: &str) -> String {
        format!(
            "{}/api/datasets/:persistentId?persistentId={}:{}",
            self.base_url, scheme, id
        )
    }
}

/// Path of a `scheme://authority/path` cell as written, without the percent
/// encoding and dot-segment removal `Url::path` applies.
fn raw_path(value: &str) -> Option<&str> {
    let (_, rest) = value.split_once("://")?;
    let start = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let path = &rest[start..];
    let end = path.find(['?', '#']).unwrap_or(path.len());
    Some(&path[..end])
}
