use std::time::Duration;

use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "KAIRELAY_DISABLE_SYSTEM_PROXY";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared builder for upstream HTTP clients.
///
/// Only the connect phase is bounded; streamed bodies may legitimately stay
/// open for minutes, so idle detection happens in the relay instead.
pub(crate) fn build_http_client() -> Client {
    let builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
    let builder = if should_disable_system_proxy() {
        builder.no_proxy()
    } else {
        builder
    };

    builder.build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Falling back to default reqwest client");
        Client::new()
    })
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
