//! URL, origin and referrer rules shared by the session registry and the
//! speculation state machine.
//!
//! | Item | Rule |
//! |------|------|
//! | [`parse_navigable_url`] | Non-empty, parsable, `http` or `https` only |
//! | [`urls_match`] | Exact, or ignoring the fragment when the session asks for it |
//! | [`Origin`] | `scheme://host[:port]` of an http(s) URL |
//! | [`Referrer`] | Any absolute URL; `android-app://<package>/` for app referrers |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Scheme of referrers that name an application instead of a web page.
pub const ANDROID_APP_SCHEME: &str = "android-app";

/// Dotted Java-style package name, e.g. `com.example.app`.
static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\.[A-Za-z][A-Za-z0-9_]*)+$")
        .expect("package name pattern is valid")
});

// ============================================================================
// URL Validation
// ============================================================================

/// Parses a URL a client asked to speculate on or fetch.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] for empty input, unparsable input, or any
/// scheme other than `http`/`https` (`chrome://`, `intent://`, `file://`...).
pub fn parse_navigable_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_url(raw));
    }
    let url = Url::parse(trimmed).map_err(|_| Error::invalid_url(raw))?;
    if !is_http_scheme(&url) {
        return Err(Error::invalid_url(raw));
    }
    Ok(url)
}

/// Returns `true` for `http` and `https` URLs.
#[inline]
#[must_use]
pub fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Returns the comparison key of `url` under the given fragment policy.
#[must_use]
pub fn match_key(url: &Url, ignore_fragment: bool) -> String {
    if ignore_fragment && url.fragment().is_some() {
        let mut stripped = url.clone();
        stripped.set_fragment(None);
        stripped.into()
    } else {
        url.as_str().to_owned()
    }
}

/// Compares two URLs, optionally ignoring their fragments.
#[must_use]
pub fn urls_match(a: &Url, b: &Url, ignore_fragment: bool) -> bool {
    match_key(a, ignore_fragment) == match_key(b, ignore_fragment)
}

/// Returns `true` if `name` looks like an application package name.
#[inline]
#[must_use]
pub fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME.is_match(name)
}

// ============================================================================
// Origin
// ============================================================================

/// Web origin (`scheme://host[:port]`) of an http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parses an origin from any http(s) URL; path and query are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the input is not an http(s) URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = parse_navigable_url(raw)?;
        Self::from_url(&url).ok_or_else(|| Error::invalid_url(raw))
    }

    /// Returns the origin of `url`, or `None` for non-http(s) URLs.
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        if !is_http_scheme(url) {
            return None;
        }
        let origin = url.origin();
        origin
            .is_tuple()
            .then(|| Self(origin.ascii_serialization()))
    }

    /// Returns the serialized origin.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Referrer
// ============================================================================

/// Referrer attached to a speculative or real navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Referrer(Url);

impl Referrer {
    /// Parses an absolute referrer URL of any scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the input is not an absolute URL.
    pub fn parse(raw: &str) -> Result<Self> {
        Url::parse(raw.trim())
            .map(Self)
            .map_err(|_| Error::invalid_url(raw))
    }

    /// Builds the `android-app://<package>/` referrer of an application.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `package` is not a package name.
    pub fn for_package(package: &str) -> Result<Self> {
        if !is_valid_package_name(package) {
            return Err(Error::invalid_url(format!("{ANDROID_APP_SCHEME}://{package}/")));
        }
        Self::parse(&format!("{ANDROID_APP_SCHEME}://{package}/"))
    }

    /// Returns the package name of an `android-app://` referrer.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        (self.0.scheme() == ANDROID_APP_SCHEME)
            .then(|| self.0.host_str())
            .flatten()
    }

    /// Returns the web origin of an http(s) referrer.
    #[must_use]
    pub fn origin(&self) -> Option<Origin> {
        Origin::from_url(&self.0)
    }

    /// Returns the referrer text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
