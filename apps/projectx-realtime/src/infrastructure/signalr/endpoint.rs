//! Hub endpoint resolution.

use url::Url;

/// Build the WebSocket URL for a hub connection attempt.
///
/// `https`/`http` map to `wss`/`ws`; `wss`/`ws` URLs pass through. The token
/// is percent-encoded into the `access_token` query parameter, after any
/// query the base URL already carries.
///
/// # Errors
///
/// Returns an error if `base_url` is not an absolute URL.
pub fn hub_endpoint(base_url: &str, token: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url.trim())?;
    let scheme = match url.scheme() {
        "https" => Some("wss"),
        "http" => Some("ws"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        // Special to special scheme changes always succeed.
        let _ = url.set_scheme(scheme);
    }
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url)
}
