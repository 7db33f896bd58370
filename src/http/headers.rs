//! Fixed request headers sent by every measured HTTP transaction.

use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use http::HeaderMap;
use std::str::FromStr;

pub const HTTP_HEADER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub const HTTP_HEADER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub const HTTP_HEADER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Builds Accept, Accept-Language and User-Agent.
///
/// The Host header is added by [`HttpStream::new_request`] because
/// HTTP/2 carries it in the URI instead.
///
/// [`HttpStream::new_request`]: crate::http::HttpStream::new_request
pub fn measurement_headers(user_agent: Option<&str>) -> Result<HeaderMap, NetError> {
    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(ACCEPT, HeaderValue::from_static(HTTP_HEADER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(HTTP_HEADER_ACCEPT_LANGUAGE),
    );
    headers.insert(
        USER_AGENT,
        header_value(user_agent.unwrap_or(HTTP_HEADER_USER_AGENT))?,
    );
    Ok(headers)
}

/// Appends a header, rejecting names or values that are not valid on the wire.
pub fn append_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), NetError> {
    let name = HeaderName::from_str(name).map_err(|_| NetError::InvalidUrl)?;
    headers.append(name, header_value(value)?);
    Ok(())
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, NetError> {
    HeaderValue::from_str(value).map_err(|_| NetError::InvalidUrl)
}
