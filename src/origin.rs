//! Origin allow list for the read URL.
//!
//! Matching is byte-for-byte against operator supplied URLs. There is no
//! normalization, no wildcard and no prefix matching.

use crate::error::PermissionDenied;

const HTTPS_PREFIX: &str = "https://";

/// Accepts `target` only if it starts with a lowercase `https://` and is an
/// exact member of `allow`.
///
/// Any non-https scheme is reported as [`PermissionDenied::NotHttps`]. An
/// https URL with a differently cased scheme is never accepted, even if the
/// allow list spells it that way, and is reported as not allowed.
pub fn check(target: &str, allow: &[String]) -> Result<(), PermissionDenied> {
    let has_https_prefix = target
        .get(..HTTPS_PREFIX.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(HTTPS_PREFIX));
    if !has_https_prefix {
        return Err(PermissionDenied::NotHttps {
            url: target.to_string(),
        });
    }

    if target.starts_with(HTTPS_PREFIX) && allow.iter().any(|allowed| allowed == target) {
        Ok(())
    } else {
        Err(PermissionDenied::NotAllowed {
            url: target.to_string(),
        })
    }
}
