//! API key authentication for the protected routes.
//!
//! Keys come from `CORTEX_API_KEYS` (comma-separated) in production and from
//! `CORTEX_DEV_API_KEY` or a built-in default during development. Rejections
//! use the standard error envelope with the `unauthenticated` code.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::env;

use crate::errors::AppError;

/// Default API key for development when no key env vars are configured.
pub(crate) const DEFAULT_DEV_API_KEY: &str = "sk-cortex-dev-default";

/// Check if running in production mode
pub fn is_production_mode() -> bool {
    env::var("CORTEX_ENV")
        .map(|v| v.to_lowercase() == "production" || v.to_lowercase() == "prod")
        .unwrap_or(false)
}

/// Log security warnings at startup based on environment configuration
pub fn log_security_status() {
    let has_api_keys = env::var("CORTEX_API_KEYS")
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false);
    let has_dev_key = env::var("CORTEX_DEV_API_KEY")
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false);

    if is_production_mode() {
        if has_api_keys {
            tracing::info!("Running in PRODUCTION mode with API key authentication");
        } else {
            tracing::error!(
                "PRODUCTION mode but CORTEX_API_KEYS not set! Server will reject all authenticated requests."
            );
        }
    } else if has_dev_key {
        tracing::warn!("Development mode: using CORTEX_DEV_API_KEY for authentication");
    } else if !has_api_keys {
        tracing::warn!(
            "Development mode: no API keys configured, using the built-in dev key. \
             Set CORTEX_DEV_API_KEY or CORTEX_API_KEYS to override."
        );
    }
}

/// Constant-time string comparison to prevent timing attacks
///
/// Compares all bytes of both strings to prevent length-based timing leaks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let a_len = a_bytes.len();
    let b_len = b_bytes.len();
    let max_len = std::cmp::max(a_len, b_len);

    // u32 avoids truncation: lengths differing by a multiple of 256 would
    // falsely compare equal through a u8 accumulator
    let mut result: u32 = (a_len ^ b_len) as u32;

    for i in 0..max_len {
        let byte_a = if i < a_len { a_bytes[i] } else { 0 };
        let byte_b = if i < b_len { b_bytes[i] } else { 0 };
        result |= (byte_a ^ byte_b) as u32;
    }

    result == 0
}

/// Validate an API key against the configured set using constant-time
/// comparison.
pub fn validate_api_key(provided_key: &str) -> Result<(), AppError> {
    let valid_keys = match env::var("CORTEX_API_KEYS") {
        Ok(keys) if !keys.trim().is_empty() => keys,
        _ => {
            if is_production_mode() {
                tracing::error!("CORTEX_API_KEYS not set in production mode");
                return Err(AppError::Unavailable(
                    "API keys not configured".to_string(),
                ));
            }

            match env::var("CORTEX_DEV_API_KEY") {
                Ok(key) if !key.trim().is_empty() => key,
                _ => DEFAULT_DEV_API_KEY.to_string(),
            }
        }
    };

    let keys: Vec<&str> = valid_keys.split(',').map(|k| k.trim()).collect();

    // Check every key to keep the comparison time independent of position
    let mut found = false;
    for key in &keys {
        if constant_time_compare(key, provided_key) {
            found = true;
        }
    }

    if found {
        Ok(())
    } else {
        Err(AppError::Unauthenticated("Invalid API key".to_string()))
    }
}

/// Authentication middleware for the protected routes.
pub async fn auth_middleware(request: Request, next: Next) -> Response {
    // Extract API key: X-API-KEY header first, Authorization: Bearer fallback
    let api_key_value = match request
        .headers()
        .get("X-API-KEY")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.to_string())
        }) {
        Some(key) => key,
        None => {
            return AppError::Unauthenticated("Missing X-API-KEY header".to_string())
                .into_response()
        }
    };

    if let Err(e) = validate_api_key(&api_key_value) {
        return e.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Process-global lock for tests that manipulate environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_auth_env() {
        env::remove_var("CORTEX_API_KEYS");
        env::remove_var("CORTEX_DEV_API_KEY");
        env::remove_var("CORTEX_ENV");
    }

    #[test]
    fn constant_time_compare_basics() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("short", "a-longer-string"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn accepts_configured_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_auth_env();
        env::set_var("CORTEX_API_KEYS", "key-one, key-two");

        assert!(validate_api_key("key-one").is_ok());
        assert!(validate_api_key("key-two").is_ok());
        assert!(validate_api_key("key-three").is_err());

        clear_auth_env();
    }

    #[test]
    fn falls_back_to_default_dev_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_auth_env();

        assert!(validate_api_key(DEFAULT_DEV_API_KEY).is_ok());
        assert!(validate_api_key("wrong").is_err());
    }

    #[test]
    fn production_without_keys_is_unavailable() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_auth_env();
        env::set_var("CORTEX_ENV", "production");

        let err = validate_api_key("anything").unwrap_err();
        assert_eq!(err.code(), "unavailable");

        clear_auth_env();
    }
}
