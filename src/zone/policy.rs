//! URL actions, verdicts, and the (zone, action) → verdict table

use super::Zone;
use crate::error::{BindError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of evaluating an action in a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Allow,
    Query,
    Disallow,
}

/// Actions the built-in table has defaults for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum UrlAction {
    DownloadSignedActiveX = 0x1001,
    DownloadUnsignedActiveX = 0x1004,
    ActiveXRun = 0x1200,
    ScriptRun = 0x1400,
    ScriptSafeActiveX = 0x1405,
    CrossDomainData = 0x1406,
    HtmlSubmitForms = 0x1601,
    HtmlMetaRefresh = 0x1608,
    ShellFileDownload = 0x1803,
    FeatureMimeSniffing = 0x2100,
    FeatureZoneElevation = 0x2101,
}

impl UrlAction {
    pub const ALL: [UrlAction; 11] = [
        UrlAction::DownloadSignedActiveX,
        UrlAction::DownloadUnsignedActiveX,
        UrlAction::ActiveXRun,
        UrlAction::ScriptRun,
        UrlAction::ScriptSafeActiveX,
        UrlAction::CrossDomainData,
        UrlAction::HtmlSubmitForms,
        UrlAction::HtmlMetaRefresh,
        UrlAction::ShellFileDownload,
        UrlAction::FeatureMimeSniffing,
        UrlAction::FeatureZoneElevation,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<UrlAction> {
        Self::ALL.into_iter().find(|a| a.id() == id)
    }
}

impl From<UrlAction> for u32 {
    fn from(action: UrlAction) -> u32 {
        action.id()
    }
}

/// Documented default verdict for a zone/action pair
pub fn default_verdict(zone: Zone, action: UrlAction) -> Verdict {
    use UrlAction::*;

    if action == FeatureZoneElevation {
        return Verdict::Disallow;
    }

    match zone {
        Zone::LocalMachine => Verdict::Allow,
        Zone::Intranet => match action {
            DownloadSignedActiveX => Verdict::Query,
            DownloadUnsignedActiveX => Verdict::Disallow,
            _ => Verdict::Allow,
        },
        Zone::Trusted => match action {
            DownloadUnsignedActiveX => Verdict::Query,
            _ => Verdict::Allow,
        },
        Zone::Internet | Zone::Custom(_) => match action {
            DownloadSignedActiveX => Verdict::Query,
            DownloadUnsignedActiveX | CrossDomainData => Verdict::Disallow,
            _ => Verdict::Allow,
        },
        Zone::Untrusted => Verdict::Disallow,
    }
}

/// One explicit (zone, action) override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverride {
    pub zone: Zone,
    pub action: u32,
    pub verdict: Verdict,
}

/// Override-then-default policy lookup
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    overrides: HashMap<(Zone, u32), Verdict>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_overrides(overrides: &[PolicyOverride]) -> Self {
        let mut table = Self::new();
        for o in overrides {
            table.set(o.zone, o.action, o.verdict);
        }
        table
    }

    pub fn set(&mut self, zone: Zone, action: u32, verdict: Verdict) {
        self.overrides.insert((zone, action), verdict);
    }

    /// An action id is recognized if it has a built-in default or any override
    pub fn is_recognized(&self, action: u32) -> bool {
        UrlAction::from_id(action).is_some() || self.overrides.keys().any(|(_, a)| *a == action)
    }

    pub fn get(&self, zone: Zone, action: u32) -> Result<Verdict> {
        if let Some(verdict) = self.overrides.get(&(zone, action)) {
            return Ok(*verdict);
        }
        match UrlAction::from_id(action) {
            Some(known) => Ok(default_verdict(zone, known)),
            // Custom actions only have the zones they were configured for
            None if self.is_recognized(action) => Ok(Verdict::Disallow),
            None => Err(BindError::UnknownAction(action)),
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}
