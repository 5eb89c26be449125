//! Scheme registry — scheme → protocol handler factory
//!
//! Runtime registrations form a stack per scheme: the most recent one wins
//! and unregistering it exposes the one beneath. When no runtime
//! registration matches, the built-in class table is consulted.

use crate::container::{ContainerStore, EmptyContainerStore};
use crate::error::{BindError, Result};
use crate::locator::{starts_with_ignore_case, Locator};
use crate::protocol::about::AboutHandler;
use crate::protocol::archive::ArchiveHandler;
use crate::protocol::file::FileHandler;
use crate::protocol::http::HttpHandler;
use crate::protocol::mk::MkHandler;
use crate::protocol::res::ResHandler;
use crate::protocol::ProtocolHandler;
use crate::transport::{Transport, UnavailableTransport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Creates a fresh handler instance per bind
pub trait ProtocolFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ProtocolHandler>>;

    /// Factory name for logs
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> ProtocolFactory for F
where
    F: Fn() -> Box<dyn ProtocolHandler> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn ProtocolHandler>> {
        Ok(self())
    }
}

/// Shared factory reference
pub type FactoryRef = Arc<dyn ProtocolFactory>;

/// Identifies one registration for `unregister`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(u64);

/// Built-in handler families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolClass {
    File,
    Http,
    Archive,
    Mk,
    About,
    Res,
}

/// Scheme → built-in class
pub const BUILTIN_SCHEMES: &[(&str, ProtocolClass)] = &[
    ("file", ProtocolClass::File),
    ("http", ProtocolClass::Http),
    ("https", ProtocolClass::Http),
    ("ftp", ProtocolClass::Http),
    ("its", ProtocolClass::Archive),
    ("ms-its", ProtocolClass::Archive),
    ("mk", ProtocolClass::Mk),
    ("about", ProtocolClass::About),
    ("res", ProtocolClass::Res),
];

/// Collaborators the built-in handlers are constructed with
#[derive(Clone)]
pub struct ProtocolContext {
    pub containers: Arc<dyn ContainerStore>,
    pub transport: Arc<dyn Transport>,
}

impl Default for ProtocolContext {
    fn default() -> Self {
        Self {
            containers: Arc::new(EmptyContainerStore),
            transport: Arc::new(UnavailableTransport),
        }
    }
}

/// Factory for one built-in class
pub struct BuiltinFactory {
    class: ProtocolClass,
    context: ProtocolContext,
}

impl BuiltinFactory {
    pub fn new(class: ProtocolClass, context: ProtocolContext) -> Self {
        Self { class, context }
    }

    pub fn class(&self) -> ProtocolClass {
        self.class
    }
}

impl ProtocolFactory for BuiltinFactory {
    fn create(&self) -> Result<Box<dyn ProtocolHandler>> {
        let handler: Box<dyn ProtocolHandler> = match self.class {
            ProtocolClass::File => Box::new(FileHandler::new()),
            ProtocolClass::Http => Box::new(HttpHandler::new(Arc::clone(&self.context.transport))),
            ProtocolClass::Archive => {
                Box::new(ArchiveHandler::new(Arc::clone(&self.context.containers)))
            }
            ProtocolClass::Mk => Box::new(MkHandler::new(Arc::clone(&self.context.containers))),
            ProtocolClass::About => Box::new(AboutHandler::new()),
            ProtocolClass::Res => Box::new(ResHandler::new(Arc::clone(&self.context.containers))),
        };
        Ok(handler)
    }

    fn name(&self) -> &str {
        match self.class {
            ProtocolClass::File => "builtin:file",
            ProtocolClass::Http => "builtin:http",
            ProtocolClass::Archive => "builtin:archive",
            ProtocolClass::Mk => "builtin:mk",
            ProtocolClass::About => "builtin:about",
            ProtocolClass::Res => "builtin:res",
        }
    }
}

struct SchemeRegistration {
    handle: RegistrationHandle,
    scheme: String,
    factory: FactoryRef,
    patterns: Vec<String>,
}

impl SchemeRegistration {
    fn applies_to(&self, locator: &Locator) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| starts_with_ignore_case(locator.scheme_specific(), p))
    }
}

/// Same factory object, ignoring vtable identity
pub fn same_factory(a: &FactoryRef, b: &FactoryRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Process-wide scheme → factory registry
pub struct SchemeRegistry {
    entries: RwLock<Vec<SchemeRegistration>>,
    builtins: HashMap<&'static str, FactoryRef>,
    next_handle: AtomicU64,
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new(ProtocolContext::default())
    }
}

impl SchemeRegistry {
    /// Registry whose built-in handlers use `context`
    pub fn new(context: ProtocolContext) -> Self {
        let builtins = BUILTIN_SCHEMES
            .iter()
            .map(|(scheme, class)| {
                let factory: FactoryRef = Arc::new(BuiltinFactory::new(*class, context.clone()));
                (*scheme, factory)
            })
            .collect();
        Self {
            entries: RwLock::new(Vec::new()),
            builtins,
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register `factory` for `scheme`; it shadows earlier registrations
    pub fn register(&self, scheme: &str, factory: FactoryRef) -> Result<RegistrationHandle> {
        self.register_with_patterns(scheme, factory, Vec::new())
    }

    /// Register for `scheme`, restricted to locators whose text after
    /// `scheme:` starts with one of `patterns` (all locators when empty)
    pub fn register_with_patterns(
        &self,
        scheme: &str,
        factory: FactoryRef,
        patterns: Vec<String>,
    ) -> Result<RegistrationHandle> {
        let scheme = normalize_scheme(scheme)?;
        let handle = RegistrationHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));

        let mut entries = self.entries.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;
        tracing::info!(
            scheme = %scheme,
            factory = factory.name(),
            patterns = patterns.len(),
            "Namespace registered"
        );
        entries.push(SchemeRegistration {
            handle,
            scheme,
            factory,
            patterns,
        });
        Ok(handle)
    }

    /// Remove a registration; removing one that is already gone succeeds
    pub fn unregister(&self, handle: RegistrationHandle) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;
        if let Some(index) = entries.iter().position(|e| e.handle == handle) {
            let removed = entries.remove(index);
            tracing::info!(scheme = %removed.scheme, "Namespace unregistered");
        }
        Ok(())
    }

    /// Remove the most recent registration of `factory` for `scheme`
    pub fn unregister_factory(&self, scheme: &str, factory: &FactoryRef) -> Result<()> {
        let scheme = normalize_scheme(scheme)?;
        let mut entries = self.entries.write().map_err(|e| {
            BindError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;
        if let Some(index) = entries
            .iter()
            .rposition(|e| e.scheme == scheme && same_factory(&e.factory, factory))
        {
            entries.remove(index);
            tracing::info!(scheme = %scheme, "Namespace unregistered");
        }
        Ok(())
    }

    /// Factory for a bare scheme: latest unrestricted registration, then built-ins
    pub fn resolve(&self, scheme: &str) -> Result<FactoryRef> {
        let scheme = normalize_scheme(scheme)?;
        {
            let entries = self.entries.read().map_err(|e| {
                BindError::Config(format!("Failed to acquire registry lock: {}", e))
            })?;
            if let Some(entry) = entries
                .iter()
                .rev()
                .find(|e| e.scheme == scheme && e.patterns.is_empty())
            {
                return Ok(Arc::clone(&entry.factory));
            }
        }
        self.builtin(&scheme)
            .ok_or_else(|| BindError::NotFound(format!("No handler for scheme '{}'", scheme)))
    }

    /// Factory for a locator, honoring pattern-restricted registrations
    pub fn resolve_locator(&self, locator: &Locator) -> Result<FactoryRef> {
        {
            let entries = self.entries.read().map_err(|e| {
                BindError::Config(format!("Failed to acquire registry lock: {}", e))
            })?;
            if let Some(entry) = entries
                .iter()
                .rev()
                .find(|e| e.scheme == locator.scheme() && e.applies_to(locator))
            {
                return Ok(Arc::clone(&entry.factory));
            }
        }
        self.builtin(locator.scheme()).ok_or_else(|| {
            BindError::NotFound(format!("No handler for scheme '{}'", locator.scheme()))
        })
    }

    /// Built-in factory for `scheme`, if the class table has one
    pub fn builtin(&self, scheme: &str) -> Option<FactoryRef> {
        let scheme = scheme.to_ascii_lowercase();
        self.builtins.get(scheme.as_str()).cloned()
    }

    /// Whether `factory` is one of this registry's built-ins
    pub fn is_builtin(&self, factory: &FactoryRef) -> bool {
        self.builtins.values().any(|b| same_factory(b, factory))
    }

    /// Schemes with at least one runtime registration
    pub fn registered_schemes(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|e| {
            BindError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;
        let mut schemes: Vec<String> = entries.iter().map(|e| e.scheme.clone()).collect();
        schemes.sort();
        schemes.dedup();
        Ok(schemes)
    }
}

fn normalize_scheme(scheme: &str) -> Result<String> {
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(BindError::InvalidArgument(format!(
            "Invalid scheme '{}'",
            scheme
        )));
    }
    Ok(scheme.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        BindInfoSource, ProtocolSink, ReadStatus, TerminateOptions,
    };

    struct Named(&'static str);

    impl ProtocolHandler for Named {
        fn start(
            &mut self,
            _: &Locator,
            _: Arc<dyn ProtocolSink>,
            _: &dyn BindInfoSource,
        ) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, _: &mut [u8]) -> Result<(usize, ReadStatus)> {
            Ok((0, ReadStatus::Complete))
        }

        fn lock(&mut self) -> Result<()> {
            Ok(())
        }

        fn unlock(&mut self) -> Result<()> {
            Ok(())
        }

        fn terminate(&mut self, _: TerminateOptions) -> Result<()> {
            Ok(())
        }

        fn abort(&mut self, _: &str) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn factory(name: &'static str) -> FactoryRef {
        Arc::new(move || -> Box<dyn ProtocolHandler> { Box::new(Named(name)) })
    }

    fn created_name(factory: &FactoryRef) -> String {
        factory.create().unwrap().name().to_string()
    }

    #[test]
    fn test_last_registered_wins_and_unregister_is_idempotent() {
        let registry = SchemeRegistry::default();
        let f1 = factory("f1");
        let f2 = factory("f2");
        let _h1 = registry.register("x-app", f1).unwrap();
        let h2 = registry.register("X-App", f2).unwrap();

        assert_eq!(created_name(&registry.resolve("x-app").unwrap()), "f2");
        registry.unregister(h2).unwrap();
        assert_eq!(created_name(&registry.resolve("x-app").unwrap()), "f1");
        registry.unregister(h2).unwrap();
        assert_eq!(created_name(&registry.resolve("x-app").unwrap()), "f1");
    }

    #[test]
    fn test_invalid_scheme() {
        let registry = SchemeRegistry::default();
        assert!(matches!(
            registry.register("", factory("f")),
            Err(BindError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.register("bad scheme", factory("f")),
            Err(BindError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builtin_fallback() {
        let registry = SchemeRegistry::default();
        let http = registry.resolve("HTTP").unwrap();
        assert!(registry.is_builtin(&http));
        assert_eq!(http.name(), "builtin:http");
        assert_eq!(created_name(&http), "http");
        assert_eq!(registry.resolve("its").unwrap().name(), "builtin:archive");
        assert!(matches!(
            registry.resolve("x-unknown"),
            Err(BindError::NotFound(_))
        ));
    }

    #[test]
    fn test_registration_shadows_builtin() {
        let registry = SchemeRegistry::default();
        let custom = factory("custom-http");
        let handle = registry.register("http", custom.clone()).unwrap();
        let resolved = registry.resolve("http").unwrap();
        assert!(same_factory(&resolved, &custom));
        assert!(!registry.is_builtin(&resolved));

        registry.unregister(handle).unwrap();
        assert!(registry.is_builtin(&registry.resolve("http").unwrap()));
    }

    #[test]
    fn test_unregister_by_factory() {
        let registry = SchemeRegistry::default();
        let f1 = factory("f1");
        let f2 = factory("f2");
        registry.register("x-app", f1.clone()).unwrap();
        registry.register("x-app", f2.clone()).unwrap();

        registry.unregister_factory("x-app", &f1).unwrap();
        assert_eq!(created_name(&registry.resolve("x-app").unwrap()), "f2");
        registry.unregister_factory("x-app", &f2).unwrap();
        registry.unregister_factory("x-app", &f2).unwrap();
        assert!(registry.resolve("x-app").is_err());
        assert!(registry.registered_schemes().unwrap().is_empty());
    }

    #[test]
    fn test_pattern_restricted_registration() {
        let registry = SchemeRegistry::default();
        let cdn = factory("cdn");
        registry
            .register_with_patterns("http", cdn, vec!["//cdn.example.com/".to_string()])
            .unwrap();

        let hit = Locator::parse("http://CDN.example.com/lib.js").unwrap();
        let miss = Locator::parse("http://www.example.com/").unwrap();
        assert_eq!(created_name(&registry.resolve_locator(&hit).unwrap()), "cdn");
        assert_eq!(created_name(&registry.resolve_locator(&miss).unwrap()), "http");
        // bare scheme lookups ignore restricted registrations
        assert_eq!(registry.resolve("http").unwrap().name(), "builtin:http");
    }
}
