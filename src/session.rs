//! Process-wide entry point for binding URLs
//!
//! `InternetSession` owns the scheme registry, the zone policy engine, the
//! MIME filter registry, and the session configuration. Binds started from a
//! session share all of them.

use crate::binding::{BindEnv, BindingSession};
use crate::callback::BindStatusCallback;
use crate::config::SessionConfig;
use crate::container::{ContainerStore, EmptyContainerStore};
use crate::error::{BindError, Result};
use crate::filter::{FilterRef, MimeFilterRegistry};
use crate::locator::Locator;
use crate::registry::{FactoryRef, ProtocolContext, RegistrationHandle, SchemeRegistry};
use crate::transport::{Transport, UnavailableTransport};
use crate::zone::{
    ActionContext, SecurityResponder, UrlAction, Verdict, Zone, ZoneOverrideSource,
    ZonePolicyEngine,
};
use std::sync::Arc;

/// Builder for `InternetSession`
pub struct InternetSessionBuilder {
    config: SessionConfig,
    containers: Arc<dyn ContainerStore>,
    transport: Arc<dyn Transport>,
    zone_source: Option<Arc<dyn ZoneOverrideSource>>,
}

impl Default for InternetSessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            containers: Arc::new(EmptyContainerStore),
            transport: Arc::new(UnavailableTransport),
            zone_source: None,
        }
    }
}

impl InternetSessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Container store used by the archive, mk and res handlers
    pub fn containers(mut self, containers: Arc<dyn ContainerStore>) -> Self {
        self.containers = containers;
        self
    }

    /// Transport used by the network handler
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Persisted zone rules and policy overrides, loaded at build time
    pub fn zone_overrides(mut self, source: Arc<dyn ZoneOverrideSource>) -> Self {
        self.zone_source = Some(source);
        self
    }

    pub fn build(self) -> Result<InternetSession> {
        self.config.validate()?;

        let zones = match self.zone_source {
            Some(source) => ZonePolicyEngine::with_source(source)?,
            None => ZonePolicyEngine::new(),
        }
        .with_intranet_dotless_hosts(self.config.intranet_dotless_hosts);

        let context = ProtocolContext {
            containers: self.containers,
            transport: self.transport,
        };
        tracing::info!(
            transport = context.transport.name(),
            max_redirects = self.config.max_redirects,
            "Internet session created"
        );

        Ok(InternetSession {
            env: BindEnv {
                registry: Arc::new(SchemeRegistry::new(context)),
                zones: Arc::new(zones),
                filters: Arc::new(MimeFilterRegistry::new()),
                config: Arc::new(self.config),
            },
        })
    }
}

/// Shared owner of registries and policy; starts binds
pub struct InternetSession {
    env: BindEnv,
}

impl Default for InternetSession {
    fn default() -> Self {
        Self {
            env: BindEnv {
                registry: Arc::new(SchemeRegistry::default()),
                zones: Arc::new(ZonePolicyEngine::new()),
                filters: Arc::new(MimeFilterRegistry::new()),
                config: Arc::new(SessionConfig::default()),
            },
        }
    }
}

impl InternetSession {
    pub fn builder() -> InternetSessionBuilder {
        InternetSessionBuilder::default()
    }

    /// Register a handler factory for `scheme`; it shadows earlier ones
    pub fn register_namespace(&self, scheme: &str, factory: FactoryRef) -> Result<RegistrationHandle> {
        self.env.registry.register(scheme, factory)
    }

    /// Register for `scheme`, restricted to locators whose text after the
    /// scheme starts with one of `patterns`
    pub fn register_namespace_with_patterns(
        &self,
        scheme: &str,
        factory: FactoryRef,
        patterns: Vec<String>,
    ) -> Result<RegistrationHandle> {
        self.env
            .registry
            .register_with_patterns(scheme, factory, patterns)
    }

    /// Remove the most recent registration of `factory` for `scheme`
    pub fn unregister_namespace(&self, scheme: &str, factory: &FactoryRef) -> Result<()> {
        self.env.registry.unregister_factory(scheme, factory)
    }

    pub fn register_mime_filter(&self, content_type: &str, factory: FilterRef) -> Result<()> {
        self.env.filters.register(content_type, factory)
    }

    pub fn unregister_mime_filter(&self, content_type: &str, factory: &FilterRef) -> Result<()> {
        self.env.filters.unregister(content_type, factory)
    }

    pub fn registry(&self) -> &SchemeRegistry {
        &self.env.registry
    }

    pub fn zones(&self) -> &ZonePolicyEngine {
        &self.env.zones
    }

    pub fn filters(&self) -> &MimeFilterRegistry {
        &self.env.filters
    }

    pub fn config(&self) -> &SessionConfig {
        &self.env.config
    }

    /// Start binding `url`
    ///
    /// Fails synchronously only when the locator does not parse, no handler
    /// serves its scheme, or the referrer may not navigate to it. Every other
    /// failure is delivered through `callback` as the bind's final result.
    pub fn bind(
        &self,
        url: &str,
        callback: &Arc<dyn BindStatusCallback>,
    ) -> Result<BindingSession> {
        let locator = Locator::parse(url)?;
        let factory = self.env.registry.resolve_locator(&locator)?;
        let bind_info = callback.get_bind_info();

        if let Some(ref referrer) = bind_info.referrer {
            let from = Locator::parse(referrer)?;
            let responder = callback.security_responder();
            let verdict = self.env.zones.check_zone_elevation(&from, &locator, responder)?;
            if verdict != Verdict::Allow {
                let zone = self.env.zones.map_url_to_zone(&from, responder)?;
                tracing::info!(referrer = %from, locator = %locator, zone = %zone, "Navigation refused");
                return Err(BindError::PolicyDisallowed {
                    action: UrlAction::FeatureZoneElevation.id(),
                    zone: zone.to_string(),
                });
            }
        }

        Ok(BindingSession::start(
            self.env.clone(),
            locator,
            factory,
            Arc::clone(callback),
            bind_info,
        ))
    }

    /// Zone for `url`
    pub fn map_url_to_zone(&self, url: &str) -> Result<Zone> {
        let locator = Locator::parse(url)?;
        self.env.zones.map_url_to_zone(&locator, None)
    }

    /// Verdict for `action` on `url`, optionally deferring to `responder`
    pub fn process_url_action(
        &self,
        url: &str,
        action: u32,
        context: &ActionContext,
        responder: Option<&dyn SecurityResponder>,
    ) -> Result<Verdict> {
        let locator = Locator::parse(url)?;
        self.env
            .zones
            .evaluate_action(&locator, action, context, responder)
    }

    /// May content from `from` navigate to `to`?
    pub fn check_zone_elevation(&self, from: &str, to: &str) -> Result<Verdict> {
        let from = Locator::parse(from)?;
        let to = Locator::parse(to)?;
        self.env.zones.check_zone_elevation(&from, &to, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::RecordingCallback;
    use crate::error::ResultCode;
    use crate::protocol::BindInfo;
    use crate::zone::{MemoryZoneOverrideSource, ZoneOverrides, ZoneRule};

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = SessionConfig {
            read_chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            InternetSession::builder().config(config).build(),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_bind_unknown_scheme_fails_synchronously() {
        let session = InternetSession::default();
        let callback: Arc<dyn BindStatusCallback> = Arc::new(RecordingCallback::new());
        assert!(matches!(
            session.bind("x-nothing:foo", &callback),
            Err(BindError::NotFound(_))
        ));
    }

    #[test]
    fn test_zone_overrides_from_source() {
        let overrides = ZoneOverrides {
            rules: vec![ZoneRule::new("*.corp.example", None, Zone::Trusted)],
            ..Default::default()
        };
        let session = InternetSession::builder()
            .zone_overrides(Arc::new(MemoryZoneOverrideSource::new(overrides)))
            .build()
            .unwrap();
        assert_eq!(
            session.map_url_to_zone("https://wiki.corp.example/").unwrap(),
            Zone::Trusted
        );
        assert_eq!(
            session.map_url_to_zone("https://example.org/").unwrap(),
            Zone::Internet
        );
    }

    #[test]
    fn test_referrer_elevation_refused() {
        let session = InternetSession::default();
        let info = BindInfo {
            referrer: Some("http://example.com/".to_string()),
            ..Default::default()
        };
        let callback: Arc<dyn BindStatusCallback> =
            Arc::new(RecordingCallback::with_bind_info(info));
        let err = session.bind("file:///docs/a.html", &callback).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::PolicyDisallowed);
        assert_eq!(err.error_detail(), UrlAction::FeatureZoneElevation.id());

        assert_eq!(
            session
                .check_zone_elevation("file:///docs/a.html", "http://example.com/")
                .unwrap(),
            Verdict::Allow
        );
    }
}
