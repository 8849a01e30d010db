//! Log-safe rendering of credentials and presigned URLs
//!
//! Bearer tokens and the signature part of presigned URLs must never reach
//! the logs in clear text.

use std::fmt;

/// Masked token representation
///
/// Shows the first 6 characters followed by `***`.
#[derive(Clone, Debug)]
pub struct SensitiveToken<'a> {
    inner: &'a str,
}

impl<'a> SensitiveToken<'a> {
    /// # Example
    /// ```
    /// use catalyst_sdk::logging::SensitiveToken;
    ///
    /// let token = "eyJhbGciOiJIUzI1NiJ9.payload";
    /// assert_eq!(SensitiveToken::new(token).to_string(), "eyJhbG***");
    /// ```
    pub fn new(token: &'a str) -> Self {
        Self { inner: token }
    }
}

impl<'a> fmt::Display for SensitiveToken<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible_len = 6;
        match self.inner.get(..visible_len) {
            Some(prefix) if self.inner.len() > visible_len => write!(f, "{}***", prefix),
            _ => write!(f, "***"),
        }
    }
}

/// Drop the query string of a URL
///
/// Presigned URLs carry their signature in the query; scheme, host and path
/// are enough to diagnose an upload.
///
/// ```
/// use catalyst_sdk::logging::redact_url;
///
/// assert_eq!(
///     redact_url("https://acct.blob.core.windows.net/traces/a.json?sig=abc&se=2024"),
///     "https://acct.blob.core.windows.net/traces/a.json?***"
/// );
/// assert_eq!(redact_url("http://localhost/upload"), "http://localhost/upload");
/// ```
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            let had_query = parsed.query().is_some();
            parsed.set_query(None);
            parsed.set_fragment(None);
            if had_query {
                format!("{}?***", parsed)
            } else {
                parsed.to_string()
            }
        }
        Err(_) => match raw.split_once('?') {
            Some((base, _)) => format!("{}?***", base),
            None => raw.to_string(),
        },
    }
}

/// Mask an optional secret for display (`config show`)
pub fn mask_secret(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => SensitiveToken::new(v).to_string(),
        _ => "<unset>".to_string(),
    }
}
