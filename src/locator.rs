//! Locator parsing, composite splitting, and canonicalization
//!
//! A `Locator` is a parsed `scheme:rest` string. Hierarchical locators
//! (`scheme://authority/path?query#fragment`) are parsed and joined with
//! `url::Url`; everything else keeps an opaque path. Archive locators
//! (`its:`, `ms-its:`, `mk:@MSITStore:`) are never split on `?` or `#` here,
//! since the text after the composite delimiter belongs to the archive.

use crate::error::{BindError, Result};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Separator between a container path and the archive-relative inner path
pub const COMPOSITE_DELIMITER: &str = "::";

/// Schemes the built-in handler table serves
pub const KNOWN_SCHEMES: &[&str] = &[
    "http", "https", "ftp", "file", "mk", "its", "ms-its", "about", "res",
];

/// The three accepted spellings of the archive-composite outer scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveScheme {
    /// `its:`
    Its,
    /// `ms-its:`
    MsIts,
    /// `mk:@MSITStore:`
    MkStore,
}

impl ArchiveScheme {
    const ALL: [ArchiveScheme; 3] = [ArchiveScheme::Its, ArchiveScheme::MsIts, ArchiveScheme::MkStore];

    /// Prefix including the trailing colon
    pub fn prefix(self) -> &'static str {
        match self {
            ArchiveScheme::Its => "its:",
            ArchiveScheme::MsIts => "ms-its:",
            ArchiveScheme::MkStore => "mk:@MSITStore:",
        }
    }

    /// Match one of the archive prefixes at the start of `s`
    ///
    /// Case-insensitive. The colon that ends each prefix must be present, so
    /// `itsy:`, `ms-itsx:` and `mk:@MSITStoreX:` never match.
    pub fn detect(s: &str) -> Option<ArchiveScheme> {
        Self::ALL
            .into_iter()
            .find(|scheme| starts_with_ignore_case(s, scheme.prefix()))
    }

    /// Split `s` into the matched archive scheme and the text after its prefix
    pub fn strip(s: &str) -> Option<(ArchiveScheme, &str)> {
        let scheme = Self::detect(s)?;
        Some((scheme, &s[scheme.prefix().len()..]))
    }
}

/// Case-insensitive ASCII prefix test that never panics on char boundaries
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// `[userinfo@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub userinfo: Option<String>,
    pub host: String,
    /// Explicit port; a scheme's default port is not kept
    pub port: Option<u16>,
}

impl Authority {
    fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str().filter(|h| !h.is_empty())?;
        let userinfo = match (url.username(), url.password()) {
            ("", None) => None,
            (user, None) => Some(user.to_string()),
            (user, Some(password)) => Some(format!("{}:{}", user, password)),
        };
        Some(Self {
            userinfo,
            host: host.to_ascii_lowercase(),
            port: url.port(),
        })
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref userinfo) = self.userinfo {
            write!(f, "{}@", userinfo)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// A parsed locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    scheme: String,
    authority: Option<Authority>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
    archive: Option<ArchiveScheme>,
    url: Option<Url>,
}

/// Result of splitting a composite locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSplit<'a> {
    /// Outer scheme prefix including its colon(s), e.g. `its:` or `mk:@MSITStore:`
    pub prefix: &'a str,
    /// Container path between the prefix and the delimiter
    pub container: &'a str,
    /// Everything after the delimiter, verbatim
    pub inner: &'a str,
    /// Byte index of the delimiter in the original string
    pub delimiter_index: usize,
}

impl CompositeSplit<'_> {
    /// Reassemble the original locator text
    pub fn rejoin(&self) -> String {
        format!(
            "{}{}{}{}",
            self.prefix, self.container, COMPOSITE_DELIMITER, self.inner
        )
    }
}

impl Locator {
    /// Parse a locator string
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(BindError::InvalidArgument("Empty locator".to_string()));
        }

        let colon = input.find(':').ok_or_else(|| {
            BindError::InvalidArgument(format!("Locator '{}' has no scheme", input))
        })?;
        let scheme = &input[..colon];
        validate_scheme(scheme, input)?;
        let rest = &input[colon + 1..];

        let archive = ArchiveScheme::detect(input);
        let opaque = scheme.eq_ignore_ascii_case("mk") || scheme.eq_ignore_ascii_case("res");

        let mut locator = Self {
            raw: input.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            authority: None,
            path: String::new(),
            query: None,
            fragment: None,
            archive,
            url: None,
        };

        // Module paths in res: locators carry drive colons and backslashes
        if archive.is_some() || opaque {
            locator.path = rest.to_string();
            return Ok(locator);
        }

        let after = match rest.strip_prefix("//") {
            Some(after) => after,
            None => {
                let (hier, fragment) = match rest.split_once('#') {
                    Some((hier, fragment)) => (hier, Some(fragment.to_string())),
                    None => (rest, None),
                };
                let (path, query) = match hier.split_once('?') {
                    Some((path, query)) => (path, Some(query.to_string())),
                    None => (hier, None),
                };
                locator.path = path.to_string();
                locator.query = query;
                locator.fragment = fragment;
                return Ok(locator);
            }
        };

        // file:///path has an empty authority; keep it as "no host"
        let authority_empty = after
            .split(['/', '?', '#'])
            .next()
            .map_or(true, str::is_empty);
        if authority_empty && locator.scheme != "file" {
            return Err(BindError::InvalidArgument(format!(
                "Locator '{}' has an empty authority",
                input
            )));
        }

        let url = Url::parse(input).map_err(|e| {
            BindError::InvalidArgument(format!("Malformed locator '{}': {}", input, e))
        })?;
        locator.authority = Authority::from_url(&url);
        locator.path = url.path().to_string();
        locator.query = url.query().map(str::to_string);
        locator.fragment = url.fragment().map(str::to_string);
        locator.url = Some(url);
        Ok(locator)
    }

    /// Original, unmodified text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lowercased scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Case-insensitive scheme comparison
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    /// Lowercased host, if the locator is hierarchical and has one
    pub fn host(&self) -> Option<&str> {
        self.authority.as_ref().map(|a| a.host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.authority.as_ref().and_then(|a| a.port)
    }

    /// Path component (the whole post-scheme text for opaque/archive locators)
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Which archive spelling this locator uses, if any
    pub fn archive_scheme(&self) -> Option<ArchiveScheme> {
        self.archive
    }

    /// Whether the scheme is served by the built-in handler table
    pub fn is_known_scheme(&self) -> bool {
        KNOWN_SCHEMES.contains(&self.scheme.as_str())
    }

    /// Text after `scheme:`
    pub fn scheme_specific(&self) -> &str {
        &self.raw[self.scheme.len() + 1..]
    }

    /// Split at the first composite delimiter after the scheme prefix
    pub fn split_composite(&self) -> Option<CompositeSplit<'_>> {
        split_composite(&self.raw)
    }

    pub fn is_composite(&self) -> bool {
        self.split_composite().is_some()
    }

    /// Canonical text for this locator
    pub fn canonicalize(&self) -> String {
        canonicalize(self)
    }

    /// Resolve a possibly-relative reference (e.g. a redirect target) against this locator
    pub fn resolve_reference(&self, reference: &str) -> Result<Locator> {
        if reference.is_empty() {
            return Err(BindError::InvalidArgument(
                "Empty reference".to_string(),
            ));
        }
        if has_scheme(reference) {
            return Locator::parse(reference);
        }
        let base = self.url.as_ref().ok_or_else(|| {
            BindError::InvalidArgument(format!(
                "Cannot resolve '{}' against opaque locator '{}'",
                reference, self.raw
            ))
        })?;
        let joined = base.join(reference).map_err(|e| {
            BindError::InvalidArgument(format!(
                "Cannot resolve '{}' against '{}': {}",
                reference, self.raw, e
            ))
        })?;
        Locator::parse(joined.as_str())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Locator {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}

fn validate_scheme(scheme: &str, input: &str) -> Result<()> {
    let mut chars = scheme.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid_first && valid_rest {
        Ok(())
    } else {
        Err(BindError::InvalidArgument(format!(
            "Locator '{}' has an invalid scheme '{}'",
            input, scheme
        )))
    }
}

fn has_scheme(reference: &str) -> bool {
    match reference.find(':') {
        Some(colon) => {
            let candidate = &reference[..colon];
            !candidate.contains('/') && validate_scheme(candidate, reference).is_ok()
        }
        None => false,
    }
}

/// Length of the outer scheme prefix that precedes a container path
///
/// Archive spellings use their full prefix; `mk:@ProgId:` runs to the colon
/// after the ProgId; everything else is `scheme:`.
fn outer_prefix_len(raw: &str) -> Option<usize> {
    if let Some(archive) = ArchiveScheme::detect(raw) {
        return Some(archive.prefix().len());
    }
    let colon = raw.find(':')?;
    let rest = &raw[colon + 1..];
    if raw[..colon].eq_ignore_ascii_case("mk") && rest.starts_with('@') {
        let progid_end = rest.find(':')?;
        return Some(colon + 1 + progid_end + 1);
    }
    Some(colon + 1)
}

/// Find the first composite delimiter after the scheme prefix
///
/// Returns `None` when the locator is not composite.
pub fn split_composite(raw: &str) -> Option<CompositeSplit<'_>> {
    let prefix_len = outer_prefix_len(raw)?;
    let body = &raw[prefix_len..];
    // Hierarchical bodies may hold IPv6 literals; only opaque bodies compose
    if ArchiveScheme::detect(raw).is_none() && body.starts_with("//") {
        return None;
    }
    let at = body.find(COMPOSITE_DELIMITER)?;
    let delimiter_index = prefix_len + at;
    Some(CompositeSplit {
        prefix: &raw[..prefix_len],
        container: &body[..at],
        inner: &raw[delimiter_index + COMPOSITE_DELIMITER.len()..],
        delimiter_index,
    })
}

/// Canonical text: lowercase scheme, dot segments collapsed
///
/// For composite locators only the container path is normalized; the
/// delimiter and inner path are copied verbatim.
pub fn canonicalize(locator: &Locator) -> String {
    if let Some(split) = locator.split_composite() {
        let prefix = lowercase_scheme_of_prefix(split.prefix);
        return format!(
            "{}{}{}{}",
            prefix,
            remove_dot_segments(split.container),
            COMPOSITE_DELIMITER,
            split.inner
        );
    }

    if locator.has_scheme("res") {
        return format!("res:{}", locator.scheme_specific());
    }

    if locator.archive.is_some() || locator.has_scheme("mk") {
        let prefix_len = outer_prefix_len(&locator.raw).unwrap_or(locator.scheme.len() + 1);
        let prefix = lowercase_scheme_of_prefix(&locator.raw[..prefix_len]);
        return format!("{}{}", prefix, remove_dot_segments(&locator.raw[prefix_len..]));
    }

    if let Some(ref url) = locator.url {
        return url.as_str().to_string();
    }

    let mut out = String::with_capacity(locator.raw.len());
    out.push_str(&locator.scheme);
    out.push(':');
    out.push_str(&remove_dot_segments(&locator.path));
    if let Some(ref query) = locator.query {
        out.push('?');
        out.push_str(query);
    }
    if let Some(ref fragment) = locator.fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn lowercase_scheme_of_prefix(prefix: &str) -> String {
    match prefix.find(':') {
        Some(colon) => format!("{}{}", prefix[..colon].to_ascii_lowercase(), &prefix[colon..]),
        None => prefix.to_string(),
    }
}

/// Decode `%XX` escapes; invalid escapes are kept literally
pub fn percent_decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Collapse `.` and `..` segments of a `/`-separated path
pub fn remove_dot_segments(path: &str) -> String {
    if !path.contains('.') {
        return path.to_string();
    }

    let absolute = path.starts_with('/');
    let body = if absolute { &path[1..] } else { path };
    let segments: Vec<&str> = body.split('/').collect();
    let last = segments.len().saturating_sub(1);

    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    let mut trailing_slash = false;
    for (i, segment) in segments.iter().enumerate() {
        match *segment {
            "." => trailing_slash = i == last,
            ".." => {
                out.pop();
                trailing_slash = i == last;
            }
            other => {
                out.push(other);
                trailing_slash = false;
            }
        }
    }

    let mut result = String::with_capacity(path.len());
    if absolute {
        result.push('/');
    }
    result.push_str(&out.join("/"));
    if trailing_slash && !out.is_empty() {
        result.push('/');
    }
    result
}
