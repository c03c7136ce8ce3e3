//! Manifest locator resolution
//!
//! Turns a user-supplied locator into a concrete fetch plan. Web-view links
//! to hosted files are rewritten to their raw-content form; `file://` and
//! bare paths become local reads. Resolution never fails: anything that is
//! not recognized is fetched over HTTP(S) as-is.

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const RAW_CONTENT_HOST: &str = "raw.githubusercontent.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocator {
    Http(String),
    Https(String),
    File(PathBuf),
    BarePath(PathBuf),
}

impl ManifestLocator {
    /// Classify a locator string. Scheme matching is case-insensitive.
    pub fn parse(locator: &str) -> Self {
        let locator = locator.trim();
        if let Some(path) = strip_scheme(locator, "file://") {
            ManifestLocator::File(PathBuf::from(path))
        } else if strip_scheme(locator, "https://").is_some() {
            ManifestLocator::Https(locator.to_string())
        } else if strip_scheme(locator, "http://").is_some() || locator.contains("://") {
            // Unknown schemes are handed to the HTTP transport and fail there
            ManifestLocator::Http(locator.to_string())
        } else {
            ManifestLocator::BarePath(PathBuf::from(locator))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    Local(PathBuf),
    Remote(String),
}

impl FetchPlan {
    pub fn is_local(&self) -> bool {
        matches!(self, FetchPlan::Local(_))
    }
}

impl fmt::Display for FetchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPlan::Local(path) => write!(f, "local {}", path.display()),
            FetchPlan::Remote(url) => write!(f, "remote {}", url),
        }
    }
}

fn strip_scheme<'a>(locator: &'a str, scheme: &str) -> Option<&'a str> {
    if locator.len() >= scheme.len()
        && locator.is_char_boundary(scheme.len())
        && locator[..scheme.len()].eq_ignore_ascii_case(scheme)
    {
        Some(&locator[scheme.len()..])
    } else {
        None
    }
}

fn blob_view_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(https?)://(?:www\.)?github\.com/([^/]+)/([^/]+)/blob/(.+)$")
            .expect("blob view pattern is valid")
    })
}

/// Rewrite a web-view URL (`https://github.com/<owner>/<repo>/blob/<ref>/<path>`)
/// into its raw-content form. Other URLs, including already-raw ones, are
/// returned unchanged.
pub fn convert_to_raw_url(url: &str) -> String {
    match blob_view_pattern().captures(url) {
        Some(caps) => format!(
            "{}://{}/{}/{}/{}",
            caps[1].to_lowercase(),
            RAW_CONTENT_HOST,
            &caps[2],
            &caps[3],
            &caps[4]
        ),
        None => url.to_string(),
    }
}

/// Resolve a locator string into a fetch plan.
pub fn resolve(locator: &str) -> FetchPlan {
    let plan = match ManifestLocator::parse(locator) {
        ManifestLocator::File(path) | ManifestLocator::BarePath(path) => FetchPlan::Local(path),
        ManifestLocator::Http(url) | ManifestLocator::Https(url) => {
            FetchPlan::Remote(convert_to_raw_url(&url))
        }
    };
    tracing::debug!("Resolved manifest locator '{}' to {}", locator, plan);
    plan
}
