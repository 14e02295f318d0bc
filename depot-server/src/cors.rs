use axum::http::request::Parts as RequestParts;
use axum::http::{HeaderValue, Method};
use depot_core::Mode;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use url::Url;

/// Build the cross-origin layer for `mode`.
///
/// Development mirrors any origin back. Production accepts an origin only when
/// its host is one of `allowed_domains` or a subdomain of one.
pub fn cors_layer(mode: Mode, allowed_domains: Vec<String>) -> CorsLayer {
    let origin = match mode {
        Mode::Development => AllowOrigin::mirror_request(),
        Mode::Production => {
            let domains: Vec<String> = allowed_domains
                .into_iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
            AllowOrigin::predicate(move |origin: &HeaderValue, _: &RequestParts| {
                origin
                    .to_str()
                    .ok()
                    .and_then(origin_host)
                    .is_some_and(|host| host_allowed(&host, &domains))
            })
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Hostname of an `Origin` header value, lowercased and without port.
fn origin_host(origin: &str) -> Option<String> {
    let url = Url::parse(origin).ok()?;
    let host = url.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn host_allowed(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|domain| {
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
