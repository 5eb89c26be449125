//! # a3s-bind
//!
//! Pluggable URL protocol resolution, binding, and zone security for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bind` turns a URL into bytes. A scheme registry maps each URL scheme
//! to a protocol handler factory, a binding session drives one handler
//! through its lifecycle and reports progress, data and the final result to
//! a caller-supplied callback, and a zone policy engine decides what content
//! from each security zone may do.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_bind::{BindStatusCallback, InternetSession, MemoryContainerStore, ReadStatus, RecordingCallback};
//!
//! # fn example() -> a3s_bind::Result<()> {
//! let containers = Arc::new(MemoryContainerStore::new());
//! containers.insert("help.chm", "/index.html", "<html></html>")?;
//!
//! let session = InternetSession::builder().containers(containers).build()?;
//! let callback: Arc<dyn BindStatusCallback> = Arc::new(RecordingCallback::new());
//!
//! // Archive entries are served synchronously
//! let bind = session.bind("its:help.chm::/index.html", &callback)?;
//! let (body, status) = bind.read_available()?;
//! assert_eq!(body, b"<html></html>");
//! assert_eq!(status, ReadStatus::Complete);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Built-in schemes
//!
//! - **file** — local files
//! - **http / https / ftp** — network fetch through a pluggable `Transport`
//! - **its / ms-its / mk:@MSITStore** — entries inside archive containers
//! - **mk** — generic `mk:@ProgId:display` composites
//! - **about** — `about:blank` and inline documents
//! - **res** — resources inside modules
//!
//! ## Architecture
//!
//! - **ProtocolHandler** trait — the core abstraction all scheme backends implement
//! - **SchemeRegistry** — scheme → handler factory, runtime registrations over built-ins
//! - **BindingSession** — per-bind state machine, notification ordering, redirects
//! - **ZonePolicyEngine** — locator → zone classification and action policy
//! - **MimeFilterRegistry** — content-type filters interposed on a bind's body

pub mod binding;
pub mod callback;
pub mod config;
pub mod container;
pub mod error;
pub mod filter;
pub mod locator;
pub mod mime;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod zone;

// Re-export core types
pub use binding::{BindOutcome, BindPhase, BindingSession};
pub use callback::{BindStatusCallback, CallbackEvent, RecordingCallback, RedirectApprover};
pub use config::SessionConfig;
pub use error::{BindError, Result, ResultCode};
pub use filter::{FilterRef, FilteredHandler, MimeFilter, MimeFilterFactory, MimeFilterRegistry, TransformFilter};
pub use locator::{ArchiveScheme, Locator};
pub use protocol::{
    BindInfo, BindInfoSource, BindStatus, BindStringKind, BindVerb, DataFlags, ProtocolData,
    ProtocolHandler, ProtocolSink, ReadStatus, TerminateOptions,
};
pub use registry::{FactoryRef, ProtocolClass, ProtocolFactory, RegistrationHandle, SchemeRegistry};
pub use session::{InternetSession, InternetSessionBuilder};
pub use zone::{
    ActionContext, FileZoneOverrideSource, MemoryZoneOverrideSource, SecurityResponder,
    UrlAction, Verdict, Zone, ZoneOverrideSource, ZoneOverrides, ZonePolicyEngine, ZoneRule,
};

// Re-export collaborators for convenience
pub use container::{Container, ContainerStore, DirectoryContainerStore, MemoryContainerStore};
pub use protocol::http::HttpNegotiate;
pub use transport::{MockRoute, MockTransport, Transport, TransportRequest, TransportResponse};
