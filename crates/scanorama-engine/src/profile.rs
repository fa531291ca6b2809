//! OS-aware scan profile selection
//!
//! Scoring is a pure function so it can be exercised without a repository;
//! [`ProfileSelector`] layers candidate lookup and the `generic-default`
//! fallback on top.

use crate::repository::Repository;
use scanorama_core::types::{Host, OsFingerprint, ScanProfile};
use scanorama_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Profile id used when nothing else fits
pub const GENERIC_PROFILE_ID: &str = "generic-default";

/// Score a profile against an optional OS fingerprint.
///
/// With a fingerprint:
/// - +50 when the profile's `os_family` set contains the fingerprint family
///   (case-insensitive);
/// - +30 when any `os_pattern` matches the fingerprint name (first match
///   wins; malformed patterns score nothing and never raise);
/// - plus the profile priority;
/// - plus `confidence / 10` when confidence is above zero.
///
/// Without a fingerprint the only signal is genericness: 10 for profiles
/// with an empty `os_family` set, 0 for everything else.
pub fn score_profile(profile: &ScanProfile, fingerprint: Option<&OsFingerprint>) -> i32 {
    let Some(fp) = fingerprint else {
        return if profile.os_family.is_empty() { 10 } else { 0 };
    };

    let mut score = 0i32;

    let family = fp.family.to_lowercase();
    if profile
        .os_family
        .iter()
        .any(|f| f.to_lowercase() == family)
    {
        score += 50;
    }

    for pattern in &profile.os_pattern {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if re.is_match(&fp.name) {
                    score += 30;
                    break;
                }
            }
            Err(e) => {
                trace!("skipping malformed os_pattern {:?}: {}", pattern, e);
            }
        }
    }

    score += profile.priority;

    if fp.confidence > 0 {
        score += (fp.confidence / 10) as i32;
    }

    score
}

/// Chooses the best scan profile for a host
pub struct ProfileSelector {
    repository: Arc<dyn Repository>,
}

impl ProfileSelector {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Pick the highest-scoring profile for `host`.
    ///
    /// Candidates come from `get_profiles_by_os_family` when the host has a
    /// fingerprint with a known family, otherwise from the full profile
    /// list. Ties resolve to the lexicographically lowest id. With no
    /// candidates at all, `generic-default` is returned; if that is also
    /// missing, the selection fails.
    pub async fn select_best(&self, host: &Host) -> Result<ScanProfile> {
        let fingerprint = host.os.as_ref();

        let candidates = match fingerprint {
            Some(fp) if !fp.family.is_empty() => {
                self.repository.get_profiles_by_os_family(&fp.family).await?
            }
            _ => self.repository.list_profiles().await?,
        };

        let best = candidates.into_iter().max_by(|a, b| {
            let sa = score_profile(a, fingerprint);
            let sb = score_profile(b, fingerprint);
            // On equal scores the lexicographically lower id wins, so it
            // must compare as the "greater" candidate here.
            sa.cmp(&sb).then_with(|| b.id.cmp(&a.id))
        });

        if let Some(profile) = best {
            debug!(
                "selected profile {} for {} (score {})",
                profile.id,
                host.ip_address,
                score_profile(&profile, fingerprint)
            );
            return Ok(profile);
        }

        match self.repository.get_profile(GENERIC_PROFILE_ID).await? {
            Some(profile) => Ok(profile),
            None => Err(Error::NotFound(format!(
                "no scan profile applicable to {} and {} is missing",
                host.ip_address, GENERIC_PROFILE_ID
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanorama_core::types::{ScanType, TimingTemplate};

    fn profile(id: &str, os_family: &[&str], os_pattern: &[&str], priority: i32) -> ScanProfile {
        ScanProfile {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            os_family: os_family.iter().map(|s| s.to_string()).collect(),
            os_pattern: os_pattern.iter().map(|s| s.to_string()).collect(),
            ports: "22,80".to_string(),
            scan_type: ScanType::Connect,
            timing: TimingTemplate::Normal,
            scripts: Vec::new(),
            options: serde_json::json!({}),
            priority,
            built_in: false,
        }
    }

    fn fingerprint(family: &str, name: &str, confidence: u8) -> OsFingerprint {
        OsFingerprint::new(family, name, confidence)
    }

    #[test]
    fn test_score_worked_example() {
        // family match (50) + pattern match (30) + priority (5) + 90/10 (9)
        let p = profile("ubuntu", &["linux"], &["Ubuntu.*"], 5);
        let fp = fingerprint("Linux", "Ubuntu 20.04", 90);
        assert_eq!(score_profile(&p, Some(&fp)), 94);
    }

    #[test]
    fn test_score_family_match_is_case_insensitive() {
        let p = profile("lin", &["Linux"], &[], 0);
        let fp = fingerprint("LINUX", "something", 0);
        assert_eq!(score_profile(&p, Some(&fp)), 50);
    }

    #[test]
    fn test_score_first_pattern_match_wins_once() {
        let p = profile("multi", &[], &["Ubuntu.*", "Ubu.*", ".*"], 0);
        let fp = fingerprint("linux", "Ubuntu 22.04", 0);
        // Three matching patterns still only award 30 once.
        assert_eq!(score_profile(&p, Some(&fp)), 30);
    }

    #[test]
    fn test_score_malformed_pattern_is_ignored() {
        let p = profile("broken", &[], &["([", "Ubuntu.*"], 0);
        let fp = fingerprint("linux", "Ubuntu 22.04", 0);
        // The bad pattern contributes nothing; the next one still matches.
        assert_eq!(score_profile(&p, Some(&fp)), 30);
    }

    #[test]
    fn test_score_confidence_floor_division() {
        let p = profile("p", &[], &[], 0);
        assert_eq!(score_profile(&p, Some(&fingerprint("x", "y", 19))), 1);
        assert_eq!(score_profile(&p, Some(&fingerprint("x", "y", 20))), 2);
        // Zero confidence earns nothing.
        assert_eq!(score_profile(&p, Some(&fingerprint("x", "y", 0))), 0);
    }

    #[test]
    fn test_score_without_fingerprint_prefers_generic() {
        let generic = profile("generic", &[], &[], 25);
        let keyed = profile("keyed", &["windows"], &[], 25);
        assert_eq!(score_profile(&generic, None), 10);
        assert_eq!(score_profile(&keyed, None), 0);
    }

    #[test]
    fn test_score_monotone_in_priority_and_confidence() {
        let fp = fingerprint("linux", "Debian 12", 40);
        let base = score_profile(&profile("a", &["linux"], &[], 3), Some(&fp));
        let higher = score_profile(&profile("a", &["linux"], &[], 4), Some(&fp));
        assert!(higher > base);

        let p = profile("a", &["linux"], &[], 3);
        let low_conf = score_profile(&p, Some(&fingerprint("linux", "Debian 12", 40)));
        let high_conf = score_profile(&p, Some(&fingerprint("linux", "Debian 12", 90)));
        assert!(high_conf > low_conf);
    }

    #[test]
    fn test_tie_breaks_on_lowest_id() {
        let fp = fingerprint("linux", "Debian 12", 0);
        let a = profile("aaa", &["linux"], &[], 1);
        let b = profile("bbb", &["linux"], &[], 1);
        assert_eq!(
            score_profile(&a, Some(&fp)),
            score_profile(&b, Some(&fp))
        );

        let fingerprint = Some(fp);
        let best = vec![b.clone(), a.clone()].into_iter().max_by(|x, y| {
            score_profile(x, fingerprint.as_ref())
                .cmp(&score_profile(y, fingerprint.as_ref()))
                .then_with(|| y.id.cmp(&x.id))
        });
        assert_eq!(best.unwrap().id, "aaa");
    }
}
