//! Authorization URL construction
//!
//! The user's browser is sent to this URL to approve the gateway. The `state`
//! value is opaque here; the provider echoes it back on the callback so the
//! caller can match the callback to the attempt it started.

use reqwest::Url;

/// Append the authorization-code parameters to the provider's authorize URL.
///
/// Values are form-urlencoded. Any query already present on `authorize_url`
/// is preserved ahead of the OAuth parameters.
pub fn build_authorization_url(
    authorize_url: &Url,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Url {
    let mut url = authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state);
    url
}
