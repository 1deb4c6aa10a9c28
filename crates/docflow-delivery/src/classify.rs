//! Response classification (spec §4.5 "Response classification").
//!
//! `2xx` succeeds; `4xx` other than `408`/`429` gives up permanently
//! (client error, retrying won't help); `408`, `429`, `5xx`, and
//! network/timeout failures are retryable. A `429` with `Retry-After` is
//! honored as a floor on the next attempt, not just a retry signal.

use std::time::Duration;

/// What an engine does next with a delivery after one HTTP attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    Retryable,
    GivingUp,
}

/// Classify an HTTP status code per §4.5.
pub fn classify_status(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Succeeded,
        408 | 429 => Disposition::Retryable,
        400..=499 => Disposition::GivingUp,
        500..=599 => Disposition::Retryable,
        _ => Disposition::Retryable,
    }
}

/// A network/timeout failure (no response at all) is always retryable.
pub fn classify_transport_error() -> Disposition {
    Disposition::Retryable
}

/// Parse a `Retry-After` header value into a duration — either delta
/// seconds or an HTTP-date. Unparseable values are ignored (the engine's
/// own backoff still applies).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let target = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = target.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_xx_succeeds() {
        assert_eq!(classify_status(200), Disposition::Succeeded);
        assert_eq!(classify_status(204), Disposition::Succeeded);
    }

    #[test]
    fn client_errors_give_up_except_408_and_429() {
        assert_eq!(classify_status(400), Disposition::GivingUp);
        assert_eq!(classify_status(404), Disposition::GivingUp);
        assert_eq!(classify_status(401), Disposition::GivingUp);
        assert_eq!(classify_status(408), Disposition::Retryable);
        assert_eq!(classify_status(429), Disposition::Retryable);
    }

    #[test]
    fn server_errors_are_retryable() {
        assert_eq!(classify_status(500), Disposition::Retryable);
        assert_eq!(classify_status(503), Disposition::Retryable);
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_ignores_garbage() {
        assert_eq!(parse_retry_after("not-a-duration"), None);
    }
}
