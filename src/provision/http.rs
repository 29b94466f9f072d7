use serde::de::DeserializeOwned;

use crate::provision::error::ProviderError;

pub(crate) fn send_error(provider: &'static str) -> impl FnOnce(reqwest::Error) -> ProviderError {
    move |source| ProviderError::Http { provider, source }
}

/// Reads a JSON body, turning non-2xx responses into [`ProviderError::Api`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    let raw = response.text().await.map_err(send_error(provider))?;
    if !status.is_success() {
        return Err(ProviderError::Api {
            provider,
            status: status.as_u16(),
            message: parse_error_message(&raw).unwrap_or(raw),
        });
    }
    serde_json::from_str(&raw).map_err(|err| ProviderError::InvalidResponse {
        provider,
        message: err.to_string(),
    })
}

/// Pulls a human-readable message out of the common
/// `{"message": ..}` / `{"error": {"message": ..}}` error shapes.
pub(crate) fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| value.get("message"))?
        .as_str()?
        .to_owned();

    let details = value
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if details.is_empty() {
        Some(message)
    } else {
        Some(format!("{message}: {}", details.join("; ")))
    }
}
