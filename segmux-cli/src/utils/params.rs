use crate::error::AppError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error};

/// Parses a list of `key=value` strings into pairs.
///
/// Each string is split at the first `=`, so values may themselves contain
/// `=` (cookies, query strings). Surrounding whitespace on the key is dropped.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if a string has no `=` or an empty key.
pub fn parse_params(params: &[String]) -> Result<Vec<(String, String)>, AppError> {
    debug!("Parsing {} parameters", params.len());

    params
        .iter()
        .map(|param| {
            let (key, value) = param.split_once('=').ok_or_else(|| {
                error!("Invalid param format: {param}");
                AppError::InvalidInput(format!("Invalid param format: {param}"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "Missing key in param: {param}"
                )));
            }
            debug!("Added parameter: key='{key}'");
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Turns header pairs into a [`HeaderMap`]. Later pairs replace earlier ones.
pub fn build_header_map<'a, I>(pairs: I) -> Result<HeaderMap, AppError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = HeaderMap::new();
    for (key, value) in pairs {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::InvalidInput(format!("Invalid value for header '{key}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
