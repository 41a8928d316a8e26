//! Lifetimes and session rules.

use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

/// How sign-ins from the same user share session rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Reuse the user's newest active session across devices.
    #[default]
    Shared,
    /// Open a new session on every sign-in.
    PerDevice,
}

impl FromStr for SessionMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "per_device" | "per-device" => Ok(Self::PerDevice),
            other => Err(PolicyError::Invalid {
                key: "WARDEN_SESSION_MODE",
                value: other.to_string(),
            }),
        }
    }
}

/// Policy loading errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Token and session lifetimes plus the open policy switches.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime, further capped by the session's `not_after`.
    pub refresh_ttl: Duration,
    /// How long a freshly opened session stays active.
    pub session_window: Duration,
    /// Invitation lifetime.
    pub invitation_ttl: Duration,
    pub session_mode: SessionMode,
    /// Renewal also pushes `not_after` to now + `session_window`.
    pub sliding_sessions: bool,
    /// The gate re-resolves the user's current permissions instead of
    /// trusting the snapshot in the access token.
    pub fresh_permissions: bool,
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(7),
            session_window: Duration::days(30),
            invitation_ttl: Duration::days(7),
            session_mode: SessionMode::Shared,
            sliding_sessions: false,
            fresh_permissions: false,
            bcrypt_cost: 10,
        }
    }
}

impl AuthPolicy {
    /// Reads the policy from environment variables, falling back to defaults.
    ///
    /// | Variable                     | Default  | Allowed          |
    /// |------------------------------|----------|------------------|
    /// | `WARDEN_ACCESS_TTL_SECS`     | `300`    | 1..=86400        |
    /// | `WARDEN_REFRESH_TTL_SECS`    | `604800` | 1..=31536000     |
    /// | `WARDEN_SESSION_WINDOW_DAYS` | `30`     | 1..=3650         |
    /// | `WARDEN_INVITATION_TTL_DAYS` | `7`      | 1..=365          |
    /// | `WARDEN_SESSION_MODE`        | `shared` | shared, per_device |
    /// | `WARDEN_SLIDING_SESSIONS`    | `false`  | bool             |
    /// | `WARDEN_FRESH_PERMISSIONS`   | `false`  | bool             |
    /// | `WARDEN_BCRYPT_COST`         | `10`     | 4..=31           |
    pub fn from_env() -> Result<Self, PolicyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthPolicy::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PolicyError> {
        let mut policy = Self::default();

        if let Some(v) = lookup("WARDEN_ACCESS_TTL_SECS") {
            policy.access_ttl = parse_seconds("WARDEN_ACCESS_TTL_SECS", &v, MAX_ACCESS_TTL_SECS)?;
        }
        if let Some(v) = lookup("WARDEN_REFRESH_TTL_SECS") {
            policy.refresh_ttl = parse_seconds("WARDEN_REFRESH_TTL_SECS", &v, MAX_REFRESH_TTL_SECS)?;
        }
        if let Some(v) = lookup("WARDEN_SESSION_WINDOW_DAYS") {
            policy.session_window = parse_days("WARDEN_SESSION_WINDOW_DAYS", &v, MAX_SESSION_WINDOW_DAYS)?;
        }
        if let Some(v) = lookup("WARDEN_INVITATION_TTL_DAYS") {
            policy.invitation_ttl = parse_days("WARDEN_INVITATION_TTL_DAYS", &v, MAX_INVITATION_TTL_DAYS)?;
        }
        if let Some(v) = lookup("WARDEN_SESSION_MODE") {
            policy.session_mode = v.parse()?;
        }
        if let Some(v) = lookup("WARDEN_SLIDING_SESSIONS") {
            policy.sliding_sessions = parse_bool("WARDEN_SLIDING_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("WARDEN_FRESH_PERMISSIONS") {
            policy.fresh_permissions = parse_bool("WARDEN_FRESH_PERMISSIONS", &v)?;
        }
        if let Some(v) = lookup("WARDEN_BCRYPT_COST") {
            policy.bcrypt_cost = parse_in_range("WARDEN_BCRYPT_COST", &v, 4, 31)? as u32;
        }

        Ok(policy)
    }
}

const MAX_ACCESS_TTL_SECS: i64 = 24 * 60 * 60;
const MAX_REFRESH_TTL_SECS: i64 = 365 * 24 * 60 * 60;
const MAX_SESSION_WINDOW_DAYS: i64 = 3650;
const MAX_INVITATION_TTL_DAYS: i64 = 365;

fn invalid(key: &'static str, value: &str) -> PolicyError {
    PolicyError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_in_range(key: &'static str, value: &str, min: i64, max: i64) -> Result<i64, PolicyError> {
    match value.trim().parse::<i64>() {
        Ok(n) if (min..=max).contains(&n) => Ok(n),
        _ => Err(invalid(key, value)),
    }
}

fn parse_seconds(key: &'static str, value: &str, max: i64) -> Result<Duration, PolicyError> {
    let secs = parse_in_range(key, value, 1, max)?;
    Duration::try_seconds(secs).ok_or_else(|| invalid(key, value))
}

fn parse_days(key: &'static str, value: &str, max: i64) -> Result<Duration, PolicyError> {
    let days = parse_in_range(key, value, 1, max)?;
    Duration::try_days(days).ok_or_else(|| invalid(key, value))
}

/// Strict boolean env value: `1/true/yes/on` or `0/false/no/off`.
pub fn parse_bool(key: &'static str, value: &str) -> Result<bool, PolicyError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PolicyError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_lifetimes() {
        let policy = AuthPolicy::from_lookup(lookup(&[])).unwrap();
        assert_eq!(policy.access_ttl, Duration::minutes(5));
        assert_eq!(policy.refresh_ttl, Duration::days(7));
        assert_eq!(policy.session_window, Duration::days(30));
        assert_eq!(policy.session_mode, SessionMode::Shared);
        assert!(!policy.sliding_sessions);
        assert!(!policy.fresh_permissions);
    }

    #[test]
    fn reads_overrides() {
        let policy = AuthPolicy::from_lookup(lookup(&[
            ("WARDEN_SESSION_MODE", "per_device"),
            ("WARDEN_ACCESS_TTL_SECS", "60"),
            ("WARDEN_FRESH_PERMISSIONS", "true"),
        ]))
        .unwrap();
        assert_eq!(policy.session_mode, SessionMode::PerDevice);
        assert_eq!(policy.access_ttl, Duration::seconds(60));
        assert!(policy.fresh_permissions);
    }

    #[test]
    fn rejects_garbage() {
        assert!(AuthPolicy::from_lookup(lookup(&[("WARDEN_SESSION_MODE", "sometimes")])).is_err());
        assert!(AuthPolicy::from_lookup(lookup(&[("WARDEN_ACCESS_TTL_SECS", "-5")])).is_err());
        assert!(AuthPolicy::from_lookup(lookup(&[("WARDEN_BCRYPT_COST", "2")])).is_err());
    }

    #[test]
    fn rejects_lifetimes_beyond_their_bounds() {
        for (key, value) in [
            ("WARDEN_SESSION_WINDOW_DAYS", "100000000"),
            ("WARDEN_SESSION_WINDOW_DAYS", "3651"),
            ("WARDEN_INVITATION_TTL_DAYS", "366"),
            ("WARDEN_ACCESS_TTL_SECS", "9223372036854775807"),
            ("WARDEN_REFRESH_TTL_SECS", "31536001"),
        ] {
            let err = AuthPolicy::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, PolicyError::Invalid { key: k, .. } if k == key));
        }

        let policy = AuthPolicy::from_lookup(lookup(&[("WARDEN_SESSION_WINDOW_DAYS", "3650")])).unwrap();
        assert_eq!(policy.session_window, Duration::days(3650));
    }
}
