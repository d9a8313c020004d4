use url::Url;

use crate::client::StoreError;

/// Converts an API address as the daemon reports it into an HTTP base URL.
///
/// Accepts multiaddresses such as `/ip4/127.0.0.1/tcp/5001` (optionally
/// suffixed with `/http`) and plain `http://` or `https://` URLs.
pub fn api_base_url(address: &str) -> Result<Url, StoreError> {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        return Ok(Url::parse(address)?);
    }

    let invalid = || StoreError::Address(address.to_string());
    let mut parts = address.strip_prefix('/').ok_or_else(invalid)?.split('/');
    let host = match (parts.next(), parts.next()) {
        (Some("ip4"), Some(ip)) => ip.to_string(),
        (Some("ip6"), Some(ip)) => format!("[{ip}]"),
        (Some("dns" | "dns4" | "dns6"), Some(name)) => name.to_string(),
        _ => return Err(invalid()),
    };
    let port = match (parts.next(), parts.next()) {
        (Some("tcp"), Some(port)) => port.parse::<u16>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    let scheme = match parts.next() {
        None | Some("") | Some("http") => "http",
        Some("https") => "https",
        Some(_) => return Err(invalid()),
    };
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(Url::parse(&format!("{scheme}://{host}:{port}/"))?)
}
