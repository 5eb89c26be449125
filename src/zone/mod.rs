//! Security zones and URL action policy
//!
//! `ZonePolicyEngine` classifies a locator into a `Zone` using domain rules
//! and per-scheme defaults, then maps (zone, action) to a `Verdict`.
//! Readers work against an immutable snapshot; reloads swap the snapshot
//! whole, so no reader ever sees a half-applied update.

pub mod policy;
pub mod rules;
pub mod store;

pub use policy::{default_verdict, PolicyOverride, PolicyTable, UrlAction, Verdict};
pub use rules::{MatchScore, ZoneRule};
pub use store::{FileZoneOverrideSource, MemoryZoneOverrideSource, ZoneOverrideSource, ZoneOverrides};

use crate::error::{BindError, Result};
use crate::locator::Locator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Trust classification; lower ids are more trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Zone {
    LocalMachine,
    Intranet,
    Trusted,
    Internet,
    Untrusted,
    /// User-defined zone; ids below 5 are reserved
    Custom(u32),
}

impl Zone {
    pub fn id(self) -> u32 {
        match self {
            Zone::LocalMachine => 0,
            Zone::Intranet => 1,
            Zone::Trusted => 2,
            Zone::Internet => 3,
            Zone::Untrusted => 4,
            Zone::Custom(id) => id.max(5),
        }
    }

    pub fn from_id(id: u32) -> Zone {
        match id {
            0 => Zone::LocalMachine,
            1 => Zone::Intranet,
            2 => Zone::Trusted,
            3 => Zone::Internet,
            4 => Zone::Untrusted,
            other => Zone::Custom(other),
        }
    }

    pub fn is_more_trusted_than(self, other: Zone) -> bool {
        self.id() < other.id()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::LocalMachine => f.write_str("Local Machine"),
            Zone::Intranet => f.write_str("Intranet"),
            Zone::Trusted => f.write_str("Trusted"),
            Zone::Internet => f.write_str("Internet"),
            Zone::Untrusted => f.write_str("Untrusted"),
            Zone::Custom(id) => write!(f, "Custom({})", id),
        }
    }
}

/// Extra information passed along with an action query
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Identifier of the object the action concerns (e.g. a control class id)
    pub object_id: Option<String>,

    /// No user is available to answer; `Query` resolves to `Disallow`
    pub no_ui: bool,
}

/// Caller-supplied zone classifier and policy responder
///
/// When present its answers are authoritative and the built-in tables are
/// not consulted.
pub trait SecurityResponder: Send + Sync {
    fn map_url_to_zone(&self, locator: &Locator) -> Result<Zone>;

    fn process_url_action(
        &self,
        locator: &Locator,
        action: u32,
        context: &ActionContext,
    ) -> Result<Verdict>;
}

/// Most (scheme, host) classifications one snapshot remembers
const CACHE_CAPACITY: usize = 1024;

/// Classifications computed against a single snapshot
///
/// Cloning yields an empty cache, so an edited snapshot never inherits
/// answers from the one it replaces.
#[derive(Debug, Default)]
struct ZoneCache {
    entries: RwLock<HashMap<(String, String), Zone>>,
}

impl ZoneCache {
    fn get(&self, key: &(String, String)) -> Option<Zone> {
        self.entries.read().ok()?.get(key).copied()
    }

    fn insert(&self, key: (String, String), zone: Zone) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= CACHE_CAPACITY && !entries.contains_key(&key) {
                tracing::debug!(capacity = CACHE_CAPACITY, "Zone cache full, flushing");
                entries.clear();
            }
            entries.insert(key, zone);
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl Clone for ZoneCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct PolicySnapshot {
    rules: Vec<ZoneRule>,
    policies: PolicyTable,
    scheme_defaults: HashMap<String, Zone>,
    cache: ZoneCache,
}

impl PolicySnapshot {
    fn from_overrides(overrides: &ZoneOverrides) -> Self {
        let mut scheme_defaults = builtin_scheme_defaults();
        for (scheme, zone) in &overrides.scheme_defaults {
            scheme_defaults.insert(scheme.to_ascii_lowercase(), *zone);
        }
        Self {
            rules: overrides.rules.clone(),
            policies: PolicyTable::from_overrides(&overrides.policies),
            scheme_defaults,
            cache: ZoneCache::default(),
        }
    }
}

fn builtin_scheme_defaults() -> HashMap<String, Zone> {
    [
        ("file", Zone::LocalMachine),
        ("res", Zone::LocalMachine),
        ("http", Zone::Internet),
        ("https", Zone::Internet),
        ("ftp", Zone::Internet),
        ("about", Zone::Internet),
    ]
    .into_iter()
    .map(|(s, z)| (s.to_string(), z))
    .collect()
}

/// Zone classification and action policy
pub struct ZonePolicyEngine {
    snapshot: RwLock<Arc<PolicySnapshot>>,
    source: Option<Arc<dyn ZoneOverrideSource>>,
    intranet_dotless_hosts: bool,
}

impl Default for ZonePolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ZonePolicyEngine {
    /// Engine with built-in defaults only
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PolicySnapshot::from_overrides(
                &ZoneOverrides::default(),
            ))),
            source: None,
            intranet_dotless_hosts: true,
        }
    }

    /// Engine backed by an override source, loaded immediately
    pub fn with_source(source: Arc<dyn ZoneOverrideSource>) -> Result<Self> {
        let mut engine = Self::new();
        engine.source = Some(source);
        engine.reload()?;
        Ok(engine)
    }

    /// Toggle the "dotless hosts are Intranet" heuristic
    pub fn with_intranet_dotless_hosts(mut self, enabled: bool) -> Self {
        self.intranet_dotless_hosts = enabled;
        self
    }

    /// Re-read the override source and swap in a fresh snapshot
    pub fn reload(&self) -> Result<()> {
        let overrides = match self.source {
            Some(ref source) => source.load()?,
            None => ZoneOverrides::default(),
        };
        self.install(PolicySnapshot::from_overrides(&overrides))?;
        tracing::info!(
            rules = overrides.rules.len(),
            policies = overrides.policies.len(),
            "Zone policy reloaded"
        );
        Ok(())
    }

    /// Replace all overrides and persist them to the source, if any
    pub fn replace_overrides(&self, overrides: ZoneOverrides) -> Result<()> {
        if let Some(ref source) = self.source {
            source.save(&overrides)?;
        }
        self.install(PolicySnapshot::from_overrides(&overrides))
    }

    /// Append a domain rule to the live snapshot
    pub fn add_rule(&self, rule: ZoneRule) -> Result<()> {
        self.update(|snapshot| snapshot.rules.push(rule))
    }

    /// Set an explicit verdict for a zone/action pair
    pub fn set_policy(&self, zone: Zone, action: u32, verdict: Verdict) -> Result<()> {
        self.update(|snapshot| snapshot.policies.set(zone, action, verdict))
    }

    fn update(&self, apply: impl FnOnce(&mut PolicySnapshot)) -> Result<()> {
        let mut guard = self.snapshot.write().map_err(|e| {
            BindError::Config(format!("Zone policy lock poisoned: {}", e))
        })?;
        let mut next = PolicySnapshot::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
        Ok(())
    }

    fn install(&self, snapshot: PolicySnapshot) -> Result<()> {
        let mut guard = self.snapshot.write().map_err(|e| {
            BindError::Config(format!("Zone policy lock poisoned: {}", e))
        })?;
        *guard = Arc::new(snapshot);
        Ok(())
    }

    fn current(&self) -> Result<Arc<PolicySnapshot>> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| BindError::Config(format!("Zone policy lock poisoned: {}", e)))
    }


    /// The locator whose origin decides the zone
    ///
    /// Composite archive locators are judged by their container: a local
    /// container path becomes a `file:` locator, a container that is itself a
    /// URL is classified as that URL.
    pub fn security_url(&self, locator: &Locator) -> Result<Locator> {
        if locator.archive_scheme().is_none() && !locator.has_scheme("mk") {
            return Ok(locator.clone());
        }
        let split = match locator.split_composite() {
            Some(split) => split,
            None => return Ok(locator.clone()),
        };
        let container = split.container;
        if container.is_empty() {
            return Err(BindError::InvalidArgument(format!(
                "Composite locator '{}' has an empty container",
                locator
            )));
        }

        let nested = container.find(':').is_some_and(|colon| colon > 1);
        if nested {
            if let Ok(inner) = Locator::parse(container) {
                if inner.split_composite().is_some() {
                    return self.security_url(&inner);
                }
                return Ok(inner);
            }
        }
        Locator::parse(&format!("file:{}", container))
    }

    /// Classify a locator string; malformed input is `InvalidArgument`
    pub fn classify_str(&self, locator: &str) -> Result<Zone> {
        let locator = Locator::parse(locator)?;
        self.classify(&locator)
    }

    /// Classify a locator into a zone
    pub fn classify(&self, locator: &Locator) -> Result<Zone> {
        self.classify_inner(locator, true)
    }

    fn classify_inner(&self, locator: &Locator, use_cache: bool) -> Result<Zone> {
        let target = self.security_url(locator)?;
        let snapshot = self.current()?;
        let key = target
            .host()
            .filter(|_| use_cache)
            .map(|host| (target.scheme().to_string(), host.to_string()));

        if let Some(zone) = key.as_ref().and_then(|key| snapshot.cache.get(key)) {
            return Ok(zone);
        }

        let zone = self.classify_with(&snapshot, target.scheme(), target.host());
        if let Some(key) = key {
            snapshot.cache.insert(key, zone);
        }

        tracing::debug!(locator = %locator, zone = %zone, "Locator classified");
        Ok(zone)
    }

    fn classify_with(&self, snapshot: &PolicySnapshot, scheme: &str, host: Option<&str>) -> Zone {
        if let Some(host) = host {
            if let Some(rule) = rules::best_match(&snapshot.rules, host, scheme) {
                return rule.zone;
            }
        }

        if scheme == "file" {
            return snapshot
                .scheme_defaults
                .get("file")
                .copied()
                .unwrap_or(Zone::LocalMachine);
        }

        if let Some(host) = host {
            let dotless = !host.contains('.') && !host.starts_with('[');
            if self.intranet_dotless_hosts && dotless {
                return Zone::Intranet;
            }
        }

        snapshot
            .scheme_defaults
            .get(scheme)
            .copied()
            .unwrap_or(Zone::Internet)
    }

    /// Zone for a locator, asking `responder` instead when one is supplied
    pub fn map_url_to_zone(
        &self,
        locator: &Locator,
        responder: Option<&dyn SecurityResponder>,
    ) -> Result<Zone> {
        match responder {
            Some(responder) => responder.map_url_to_zone(locator),
            None => self.classify(locator),
        }
    }

    /// Table lookup: explicit override first, then the documented default
    pub fn get_policy(&self, zone: Zone, action: u32) -> Result<Verdict> {
        self.current()?.policies.get(zone, action)
    }

    /// Classify then look up the policy, or defer entirely to `responder`
    pub fn evaluate_action(
        &self,
        locator: &Locator,
        action: u32,
        context: &ActionContext,
        responder: Option<&dyn SecurityResponder>,
    ) -> Result<Verdict> {
        let verdict = match responder {
            Some(responder) => responder.process_url_action(locator, action, context)?,
            None => {
                let zone = self.classify(locator)?;
                self.get_policy(zone, action)?
            }
        };

        let verdict = match verdict {
            Verdict::Query if context.no_ui => Verdict::Disallow,
            other => other,
        };
        tracing::debug!(
            locator = %locator,
            action = format_args!("{:#06x}", action),
            verdict = ?verdict,
            "URL action evaluated"
        );
        Ok(verdict)
    }

    /// May content from `from` navigate to `to`?
    ///
    /// Moving into a more trusted zone is governed by the zone-elevation
    /// policy of the source zone. Both sides are classified fresh on every
    /// call; results are never cached.
    pub fn check_zone_elevation(
        &self,
        from: &Locator,
        to: &Locator,
        responder: Option<&dyn SecurityResponder>,
    ) -> Result<Verdict> {
        let (from_zone, to_zone) = match responder {
            Some(responder) => (responder.map_url_to_zone(from)?, responder.map_url_to_zone(to)?),
            None => (self.classify_inner(from, false)?, self.classify_inner(to, false)?),
        };

        if !to_zone.is_more_trusted_than(from_zone) {
            return Ok(Verdict::Allow);
        }

        let action = UrlAction::FeatureZoneElevation.id();
        let verdict = match responder {
            Some(responder) => {
                responder.process_url_action(from, action, &ActionContext::default())?
            }
            None => self.get_policy(from_zone, action)?,
        };

        tracing::info!(
            from = %from,
            to = %to,
            from_zone = %from_zone,
            to_zone = %to_zone,
            verdict = ?verdict,
            "Zone elevation checked"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[test]
    fn test_default_classification() {
        let engine = ZonePolicyEngine::new();
        assert_eq!(engine.classify(&loc("http://example.com/")).unwrap(), Zone::Internet);
        assert_eq!(engine.classify(&loc("file:///tmp/a.txt")).unwrap(), Zone::LocalMachine);
        assert_eq!(engine.classify(&loc("http://intranet/")).unwrap(), Zone::Intranet);
        assert_eq!(engine.classify(&loc("about:blank")).unwrap(), Zone::Internet);
        assert_eq!(engine.classify(&loc("x-unknown:thing")).unwrap(), Zone::Internet);
    }

    #[test]
    fn test_dotless_heuristic_can_be_disabled() {
        let engine = ZonePolicyEngine::new().with_intranet_dotless_hosts(false);
        assert_eq!(engine.classify(&loc("http://intranet/")).unwrap(), Zone::Internet);
    }

    #[test]
    fn test_malformed_locator() {
        let engine = ZonePolicyEngine::new();
        assert!(matches!(
            engine.classify_str("not a url"),
            Err(BindError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_domain_specificity_precedence() {
        let engine = ZonePolicyEngine::new();
        engine
            .add_rule(ZoneRule::new("example.com", None, Zone::Untrusted))
            .unwrap();
        engine
            .add_rule(ZoneRule::new("sub.example.com", Some("http"), Zone::Trusted))
            .unwrap();

        assert_eq!(engine.classify(&loc("http://sub.example.com/")).unwrap(), Zone::Trusted);
        assert_eq!(engine.classify(&loc("https://sub.example.com/")).unwrap(), Zone::Untrusted);
        assert_eq!(engine.classify(&loc("http://example.com/")).unwrap(), Zone::Untrusted);
    }

    #[test]
    fn test_rule_change_invalidates_cache() {
        let engine = ZonePolicyEngine::new();
        let target = loc("http://cached.example.org/");
        assert_eq!(engine.classify(&target).unwrap(), Zone::Internet);
        engine
            .add_rule(ZoneRule::new("example.org", None, Zone::Trusted))
            .unwrap();
        assert_eq!(engine.classify(&target).unwrap(), Zone::Trusted);
    }

    #[test]
    fn test_security_url_for_archives() {
        let engine = ZonePolicyEngine::new();
        let local = engine.security_url(&loc("its:help/test.chm::/a.html")).unwrap();
        assert_eq!(local.scheme(), "file");
        assert_eq!(engine.classify(&loc("its:test.chm::/a.html")).unwrap(), Zone::LocalMachine);
        assert_eq!(
            engine.classify(&loc("mk:@MSITStore:C:\\help\\a.chm::/x.html")).unwrap(),
            Zone::LocalMachine
        );

        let remote = engine
            .security_url(&loc("its:http://host.example.net/a.chm::/x.html"))
            .unwrap();
        assert_eq!(remote.as_str(), "http://host.example.net/a.chm");
        assert_eq!(
            engine.classify(&loc("ms-its:http://host.example.net/a.chm::/x.html")).unwrap(),
            Zone::Internet
        );
    }

    #[test]
    fn test_get_policy_and_overrides() {
        let engine = ZonePolicyEngine::new();
        let script = UrlAction::ScriptRun.id();
        assert_eq!(engine.get_policy(Zone::Internet, script).unwrap(), Verdict::Allow);
        engine.set_policy(Zone::Internet, script, Verdict::Disallow).unwrap();
        assert_eq!(engine.get_policy(Zone::Internet, script).unwrap(), Verdict::Disallow);
        assert!(matches!(
            engine.get_policy(Zone::Internet, 0x7777),
            Err(BindError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_evaluate_action_query_without_ui() {
        let engine = ZonePolicyEngine::new();
        let action = UrlAction::DownloadSignedActiveX.id();
        let target = loc("http://example.com/control.cab");
        assert_eq!(
            engine
                .evaluate_action(&target, action, &ActionContext::default(), None)
                .unwrap(),
            Verdict::Query
        );
        let no_ui = ActionContext {
            no_ui: true,
            ..Default::default()
        };
        assert_eq!(
            engine.evaluate_action(&target, action, &no_ui, None).unwrap(),
            Verdict::Disallow
        );
    }

    struct AllowEverything;

    impl SecurityResponder for AllowEverything {
        fn map_url_to_zone(&self, _locator: &Locator) -> Result<Zone> {
            Ok(Zone::Untrusted)
        }

        fn process_url_action(&self, _: &Locator, _: u32, _: &ActionContext) -> Result<Verdict> {
            Ok(Verdict::Allow)
        }
    }

    #[test]
    fn test_responder_is_authoritative() {
        let engine = ZonePolicyEngine::new();
        let target = loc("http://example.com/");
        let action = UrlAction::DownloadUnsignedActiveX.id();
        assert_eq!(
            engine
                .evaluate_action(&target, action, &ActionContext::default(), None)
                .unwrap(),
            Verdict::Disallow
        );
        assert_eq!(
            engine
                .evaluate_action(&target, action, &ActionContext::default(), Some(&AllowEverything))
                .unwrap(),
            Verdict::Allow
        );
        assert_eq!(
            engine.map_url_to_zone(&target, Some(&AllowEverything)).unwrap(),
            Zone::Untrusted
        );
    }

    #[test]
    fn test_zone_elevation() {
        let engine = ZonePolicyEngine::new();
        let internet = loc("http://example.com/page.html");
        let local = loc("file:///etc/hosts");

        assert_eq!(
            engine.check_zone_elevation(&internet, &local, None).unwrap(),
            Verdict::Disallow
        );
        assert_eq!(
            engine.check_zone_elevation(&local, &internet, None).unwrap(),
            Verdict::Allow
        );
        assert_eq!(
            engine.check_zone_elevation(&internet, &internet, None).unwrap(),
            Verdict::Allow
        );

        engine
            .set_policy(Zone::Internet, UrlAction::FeatureZoneElevation.id(), Verdict::Allow)
            .unwrap();
        assert_eq!(
            engine.check_zone_elevation(&internet, &local, None).unwrap(),
            Verdict::Allow
        );
    }

    #[test]
    fn test_zone_elevation_not_cached() {
        let engine = ZonePolicyEngine::new();
        let from = loc("http://a.example.com/");
        let to = loc("http://b.example.com/");
        assert_eq!(engine.check_zone_elevation(&from, &to, None).unwrap(), Verdict::Allow);
        assert_eq!(engine.current().unwrap().cache.len(), 0);
    }

    #[test]
    fn test_cache_stays_with_its_snapshot() {
        let engine = ZonePolicyEngine::new();
        let target = loc("http://partner.example.net/");
        let stale = engine.current().unwrap();
        engine
            .add_rule(ZoneRule::new("example.net", None, Zone::Trusted))
            .unwrap();

        // A reader that classified against the old snapshot finishes late
        stale
            .cache
            .insert(("http".to_string(), "partner.example.net".to_string()), Zone::Internet);
        assert_eq!(engine.classify(&target).unwrap(), Zone::Trusted);
        assert_eq!(engine.current().unwrap().cache.len(), 1);
    }

    #[test]
    fn test_cache_is_bounded() {
        let engine = ZonePolicyEngine::new();
        for i in 0..CACHE_CAPACITY + 10 {
            let target = loc(&format!("http://host{}.example.com/", i));
            assert_eq!(engine.classify(&target).unwrap(), Zone::Internet);
        }
        let cached = engine.current().unwrap().cache.len();
        assert!(cached > 0 && cached <= CACHE_CAPACITY);
    }

    #[test]
    fn test_reload_from_source() {
        let source = Arc::new(MemoryZoneOverrideSource::default());
        let engine = ZonePolicyEngine::with_source(source.clone()).unwrap();
        let target = loc("http://partner.example.com/");
        assert_eq!(engine.classify(&target).unwrap(), Zone::Internet);

        source
            .save(&ZoneOverrides {
                rules: vec![ZoneRule::new("partner.example.com", None, Zone::Trusted)],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(engine.classify(&target).unwrap(), Zone::Internet);
        engine.reload().unwrap();
        assert_eq!(engine.classify(&target).unwrap(), Zone::Trusted);
    }

    #[test]
    fn test_replace_overrides_persists() {
        let source = Arc::new(MemoryZoneOverrideSource::default());
        let engine = ZonePolicyEngine::with_source(source.clone()).unwrap();
        let mut overrides = ZoneOverrides::default();
        overrides.scheme_defaults.insert("about".to_string(), Zone::Untrusted);
        engine.replace_overrides(overrides.clone()).unwrap();

        assert_eq!(engine.classify(&loc("about:blank")).unwrap(), Zone::Untrusted);
        assert_eq!(source.load().unwrap(), overrides);
    }

    #[test]
    fn test_zone_ids() {
        assert_eq!(Zone::from_id(3), Zone::Internet);
        assert_eq!(Zone::from_id(1000), Zone::Custom(1000));
        assert!(Zone::LocalMachine.is_more_trusted_than(Zone::Internet));
        assert!(!Zone::Untrusted.is_more_trusted_than(Zone::Internet));
        assert_eq!(Zone::Internet.to_string(), "Internet");
    }
}
