//! Derivation of the per transport urls of a session.
//!
//! Both urls share the endpoint path and the configured connect params but
//! they differ in scheme, in the `transport` query value and in how the
//! session id is appended: the polling url always carries a `sid` parameter,
//! even while it is still empty during the handshake, whereas the websocket
//! url only carries one once the session id is known. Servers tolerate the
//! empty `sid=` on the handshake request, so the asymmetry is kept as is.

use url::Url;

use crate::config::EngineIoConfig;
use crate::sid::Sid;

/// The url used by the http long-polling transport
pub fn polling_url(base: &Url, config: &EngineIoConfig, sid: &Sid) -> Url {
    let scheme = if is_secure(base) { "https" } else { "http" };
    let mut url = prepare(base, scheme, config);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "3");
        query.append_pair("transport", "polling");
        query.append_pair("b64", "1");
        for (key, value) in &config.connect_params {
            query.append_pair(key, value);
        }
        query.append_pair("sid", sid.as_str());
    }
    url
}

/// The url used by the websocket transport
pub fn websocket_url(base: &Url, config: &EngineIoConfig, sid: &Sid) -> Url {
    let scheme = if is_secure(base) { "wss" } else { "ws" };
    let mut url = prepare(base, scheme, config);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "3");
        query.append_pair("transport", "websocket");
        for (key, value) in &config.connect_params {
            query.append_pair(key, value);
        }
        if !sid.is_empty() {
            query.append_pair("sid", sid.as_str());
        }
    }
    url
}

fn is_secure(base: &Url) -> bool {
    matches!(base.scheme(), "https" | "wss")
}

fn prepare(base: &Url, scheme: &str, config: &EngineIoConfig) -> Url {
    let mut url = base.clone();
    // swapping between the special http(s)/ws(s) schemes cannot fail, an
    // exotic base scheme is left as is and rejected by the transport instead
    let _ = url.set_scheme(scheme);
    url.set_path(&config.socket_path);
    url.set_query(None);
    url.set_fragment(None);
    url
}
