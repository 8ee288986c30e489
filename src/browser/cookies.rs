//! Cookie bridge between browser sessions and the HTTP client.
//!
//! Anti-bot cookies are short-lived and domain-scoped, so the bridge runs
//! right after a browser navigation and right before the next HTTP request
//! to the same host.

use tracing::debug;

use super::{BrowserCookie, BrowserSession};
use crate::error::Result;
use crate::http_client::HttpClient;

/// Copy every cookie the browser holds for its current page into `client`.
///
/// Cookies with the same name, domain and path replace the client's copy;
/// others are merged in.
pub async fn sync_browser_to_client(
    session: &dyn BrowserSession,
    client: &HttpClient,
) -> Result<usize> {
    let cookies = session.cookies().await?;
    for cookie in &cookies {
        client.set_cookie(
            &cookie.name,
            &cookie.value,
            &cookie.domain,
            &cookie.path,
            cookie.secure,
        );
    }
    debug!("Bridged {} browser cookies into HTTP client", cookies.len());
    Ok(cookies.len())
}

/// Push the cookies `client` would send to `url` into the browser.
pub async fn sync_client_to_browser(
    client: &HttpClient,
    session: &dyn BrowserSession,
    url: &str,
) -> Result<usize> {
    let Some(header) = client.cookie_header(url) else {
        return Ok(0);
    };
    let Some(host) = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
    else {
        return Ok(0);
    };

    let cookies: Vec<BrowserCookie> = header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: host.clone(),
            path: "/".to_string(),
            secure: url.starts_with("https://"),
            http_only: false,
        })
        .collect();

    session.set_cookies(&cookies).await?;
    debug!("Bridged {} HTTP client cookies into browser", cookies.len());
    Ok(cookies.len())
}
