//! Domain→zone rules and their precedence

use super::Zone;
use serde::{Deserialize, Serialize};

/// Maps a domain pattern (and optionally one scheme) to a zone
///
/// Pattern forms:
/// - `example.com` — the host itself and every subdomain
/// - `*.example.com` — subdomains only
/// - `*` — every host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRule {
    pub pattern: String,

    /// `None` (or `"*"` on the wire) matches every scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    pub zone: Zone,
}

impl ZoneRule {
    pub fn new(pattern: impl Into<String>, scheme: Option<&str>, zone: Zone) -> Self {
        let scheme = scheme
            .filter(|s| *s != "*")
            .map(|s| s.to_ascii_lowercase());
        Self {
            pattern: pattern.into().to_ascii_lowercase(),
            scheme,
            zone,
        }
    }

    /// Score this rule against a host and scheme; `None` when it does not apply
    pub fn match_score(&self, host: &str, scheme: &str) -> Option<MatchScore> {
        let scheme_exact = match self.scheme.as_deref() {
            None | Some("*") => false,
            Some(s) if s.eq_ignore_ascii_case(scheme) => true,
            Some(_) => return None,
        };

        let pattern = self.pattern.as_str();
        let host = host.trim_end_matches('.');

        let (labels, exact_host) = if pattern == "*" {
            (0, false)
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            if !is_proper_subdomain(host, suffix) {
                return None;
            }
            (label_count(suffix), false)
        } else if host.eq_ignore_ascii_case(pattern) {
            (label_count(pattern), true)
        } else if is_proper_subdomain(host, pattern) {
            (label_count(pattern), false)
        } else {
            return None;
        };

        Some(MatchScore {
            labels,
            exact_host,
            scheme_exact,
        })
    }
}

/// Specificity of a rule match; larger wins
///
/// Domain specificity dominates; scheme exactness only breaks ties
/// between equally specific domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchScore {
    pub labels: usize,
    pub exact_host: bool,
    pub scheme_exact: bool,
}

fn label_count(domain: &str) -> usize {
    domain.split('.').filter(|l| !l.is_empty()).count()
}

fn is_proper_subdomain(host: &str, domain: &str) -> bool {
    host.len() > domain.len() + 1
        && host.as_bytes()[..host.len() - domain.len()].ends_with(b".")
        && host.as_bytes()[host.len() - domain.len()..].eq_ignore_ascii_case(domain.as_bytes())
}

/// Pick the best matching rule; later rules win exact ties
pub fn best_match<'a>(rules: &'a [ZoneRule], host: &str, scheme: &str) -> Option<&'a ZoneRule> {
    let mut best: Option<(MatchScore, &ZoneRule)> = None;
    for rule in rules {
        if let Some(score) = rule.match_score(host, scheme) {
            if best.map_or(true, |(b, _)| score >= b) {
                best = Some((score, rule));
            }
        }
    }
    best.map(|(_, rule)| rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pattern_matches_host_and_subdomains() {
        let rule = ZoneRule::new("example.com", None, Zone::Trusted);
        assert!(rule.match_score("example.com", "http").unwrap().exact_host);
        assert!(!rule.match_score("a.example.com", "http").unwrap().exact_host);
        assert!(rule.match_score("badexample.com", "http").is_none());
        assert!(rule.match_score("example.org", "http").is_none());
    }

    #[test]
    fn test_wildcard_pattern_subdomains_only() {
        let rule = ZoneRule::new("*.example.com", None, Zone::Trusted);
        assert!(rule.match_score("example.com", "http").is_none());
        assert!(rule.match_score("sub.example.com", "https").is_some());
        assert!(rule.match_score("a.b.example.com", "https").is_some());
    }

    #[test]
    fn test_scheme_filter() {
        let rule = ZoneRule::new("example.com", Some("HTTP"), Zone::Trusted);
        assert!(rule.match_score("example.com", "http").unwrap().scheme_exact);
        assert!(rule.match_score("example.com", "https").is_none());

        let any = ZoneRule::new("example.com", Some("*"), Zone::Trusted);
        assert_eq!(any.scheme, None);
    }

    #[test]
    fn test_domain_specificity_beats_scheme_exactness() {
        let rules = vec![
            ZoneRule::new("example.com", Some("http"), Zone::Untrusted),
            ZoneRule::new("sub.example.com", None, Zone::Trusted),
        ];
        let best = best_match(&rules, "sub.example.com", "http").unwrap();
        assert_eq!(best.zone, Zone::Trusted);
    }

    #[test]
    fn test_exact_scheme_breaks_domain_tie() {
        let rules = vec![
            ZoneRule::new("example.com", Some("https"), Zone::Trusted),
            ZoneRule::new("example.com", None, Zone::Untrusted),
        ];
        assert_eq!(best_match(&rules, "example.com", "https").unwrap().zone, Zone::Trusted);
        assert_eq!(best_match(&rules, "example.com", "http").unwrap().zone, Zone::Untrusted);
    }

    #[test]
    fn test_later_rule_wins_exact_tie() {
        let rules = vec![
            ZoneRule::new("example.com", None, Zone::Trusted),
            ZoneRule::new("example.com", None, Zone::Untrusted),
        ];
        assert_eq!(best_match(&rules, "example.com", "http").unwrap().zone, Zone::Untrusted);
    }

    #[test]
    fn test_catch_all() {
        let rules = vec![ZoneRule::new("*", None, Zone::Untrusted)];
        assert_eq!(best_match(&rules, "anything.net", "ftp").unwrap().zone, Zone::Untrusted);
    }
}
