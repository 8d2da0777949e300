//! Misskey transport: HTTP actions ([`api::MisskeyClient`]) and the
//! WebSocket event stream ([`streaming::MisskeyStreamConnector`]).

pub mod api;
pub mod streaming;

pub use api::MisskeyClient;
pub use streaming::MisskeyStreamConnector;

/// Normalise the configured instance URL to `scheme://host[:port]` with no
/// trailing slash. A bare host gets `https://`.
pub(crate) fn base_url(instance_url: &str) -> Option<String> {
    let trimmed = instance_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("https://{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_adds_scheme_and_strips_slash() {
        assert_eq!(base_url("misskey.example/").as_deref(), Some("https://misskey.example"));
        assert_eq!(
            base_url("http://127.0.0.1:3000").as_deref(),
            Some("http://127.0.0.1:3000")
        );
        assert_eq!(base_url("  "), None);
    }
}
