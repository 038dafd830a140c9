//! Request-boundary helpers around key verification. Nothing here depends on
//! a particular HTTP framework.

pub mod cors;
pub mod rate_limit;

pub use cors::OriginGuard;
pub use rate_limit::{rate_limit_key, RateDecision, TokenBucketLimiter};

use tracing::error;

use crate::record::OwnerId;
use crate::service::KeyService;
use crate::store::KeyStore;

/// Header the SDKs send the project key in.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Candidates longer than this are rejected without a lookup.
const MAX_CANDIDATE_LEN: usize = 256;

/// Why a request was turned away. `Unauthorized` never says which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Unauthorized,
    Unavailable,
}

impl AuthRejection {
    pub fn status(&self) -> u16 {
        match self {
            AuthRejection::Unauthorized => 401,
            AuthRejection::Unavailable => 500,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthRejection::Unauthorized => "Invalid API key",
            AuthRejection::Unavailable => "Authentication unavailable",
        }
    }
}

/// Authenticates the value of the [`API_KEY_HEADER`] header.
pub fn authenticate<S: KeyStore>(
    service: &KeyService<S>,
    header_value: Option<&str>,
) -> Result<OwnerId, AuthRejection> {
    let candidate = header_value.map(str::trim).unwrap_or_default();
    if candidate.is_empty() || candidate.len() > MAX_CANDIDATE_LEN {
        return Err(AuthRejection::Unauthorized);
    }

    match service.verify(candidate) {
        Ok(verdict) => verdict.owner_id().cloned().ok_or(AuthRejection::Unauthorized),
        Err(err) => {
            error!(error = %err, "project key verification failed");
            Err(AuthRejection::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretSource;
    use crate::store::MemoryKeyStore;

    #[test]
    fn accepts_issued_key_and_rejects_everything_else_uniformly() {
        let service = KeyService::new(
            MemoryKeyStore::new(),
            SecretSource::Inline("boundary-test-secret-0123456789abcdef".into()),
        );
        let issued = service.issue(OwnerId::new("proj_http"), "user").unwrap();

        assert_eq!(
            authenticate(&service, Some(issued.expose())),
            Ok(OwnerId::new("proj_http"))
        );
        assert_eq!(
            authenticate(&service, Some(format!("  {}  ", issued.expose()).as_str())),
            Ok(OwnerId::new("proj_http"))
        );

        let unknown = format!("{}x", issued.expose());
        let oversized = "a".repeat(MAX_CANDIDATE_LEN + 1);
        for header in [
            None,
            Some(""),
            Some("garbage"),
            Some(unknown.as_str()),
            Some(oversized.as_str()),
        ] {
            let rejection = authenticate(&service, header).unwrap_err();
            assert_eq!(rejection, AuthRejection::Unauthorized);
            assert_eq!(rejection.status(), 401);
            assert_eq!(rejection.message(), "Invalid API key");
        }
    }

    #[test]
    fn missing_secret_is_not_reported_as_bad_key() {
        let service = KeyService::new(
            MemoryKeyStore::new(),
            SecretSource::Env("FORPROMPT_KEYS_TEST_BOUNDARY_UNSET".into()),
        );
        assert_eq!(
            authenticate(&service, Some("fp_proj_whatever")),
            Err(AuthRejection::Unavailable)
        );
    }
}
