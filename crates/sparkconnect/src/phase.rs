//! Lifecycle phases of a notebook's cluster connection.
//!
//! Each phase owns only the data it renders and exposes at most one
//! outbound event, produced when the user presses the phase's action button.
//! Leaving a phase drops its data, including any [`RefreshTicker`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sparkconn_protocol::{ConfigPage, SessionInfo};
use ts_rs::TS;

use crate::bundles::{BundleCatalog, CatalogError, OptionBundle, OptionCatalog};
use crate::logs::{DisplayPolicy, LogView, RefreshTicker};
use crate::metadata::ConnectionConfig;

/// Cluster context shown alongside the configuration and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ClusterInfo {
    pub spark_version: Option<String>,
    pub cluster: Option<String>,
    pub max_memory: Option<String>,
}

impl From<&ConfigPage> for ClusterInfo {
    fn from(page: &ConfigPage) -> Self {
        Self {
            spark_version: page.spark_version.clone(),
            cluster: page.cluster.clone(),
            max_memory: page.max_memory.clone(),
        }
    }
}

impl From<&SessionInfo> for ClusterInfo {
    fn from(info: &SessionInfo) -> Self {
        Self {
            spark_version: info.spark_version.clone(),
            cluster: info.cluster.clone(),
            max_memory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    NotAttached,
    Loading,
    Configuring,
    Connecting,
    Connected,
    ConnectFailed,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PhaseKind::NotAttached => "not_attached",
            PhaseKind::Loading => "loading",
            PhaseKind::Configuring => "configuring",
            PhaseKind::Connecting => "connecting",
            PhaseKind::Connected => "connected",
            PhaseKind::ConnectFailed => "connect_failed",
        };
        f.write_str(name)
    }
}

/// Outbound event emitted by a phase on user action.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    /// Configuring: start a cluster session with these merged options.
    ConnectRequested {
        options: BTreeMap<String, String>,
        config: ConnectionConfig,
        cluster: ClusterInfo,
    },
    /// Connected: tear the session down and go back to configuration.
    ReconfigureRequested,
    /// ConnectFailed: tear down, restart the kernel and try again.
    RetryRequested,
}

/// The active phase of one notebook.
#[derive(Debug, Default)]
pub enum Phase {
    #[default]
    NotAttached,
    Loading,
    Configuring(Configuring),
    Connecting(Connecting),
    Connected(Connected),
    ConnectFailed(ConnectFailed),
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::NotAttached => PhaseKind::NotAttached,
            Phase::Loading => PhaseKind::Loading,
            Phase::Configuring(_) => PhaseKind::Configuring,
            Phase::Connecting(_) => PhaseKind::Connecting,
            Phase::Connected(_) => PhaseKind::Connected,
            Phase::ConnectFailed(_) => PhaseKind::ConnectFailed,
        }
    }

    /// The phase's single user action, if it has one.
    pub fn trigger(&self) -> Option<PhaseEvent> {
        match self {
            Phase::Configuring(c) => Some(c.connect()),
            Phase::Connected(c) => Some(c.reconfigure()),
            Phase::ConnectFailed(c) => Some(c.retry()),
            Phase::NotAttached | Phase::Loading | Phase::Connecting(_) => None,
        }
    }

    /// Append backend log lines. Returns false when the phase shows no log.
    pub fn append_logs(&mut self, lines: Vec<String>) -> bool {
        match self.logs_mut() {
            Some(logs) => {
                logs.append(lines);
                true
            }
            None => false,
        }
    }

    /// Refresh the log display if `ticker` is this phase's live ticker.
    /// Returns whether the display changed.
    pub fn refresh_logs(&mut self, ticker: u64) -> bool {
        let (logs, live) = match self {
            Phase::Connecting(c) => (&mut c.logs, c.ticker.as_ref()),
            Phase::Connected(c) => (&mut c.logs, c.ticker.as_ref()),
            _ => return false,
        };
        match live {
            Some(t) if t.id() == ticker => logs.refresh(),
            _ => false,
        }
    }

    /// Refresh the log display regardless of ticker.
    pub fn refresh_logs_now(&mut self) -> bool {
        self.logs_mut().is_some_and(LogView::refresh)
    }

    /// Attach the periodic refresh. Ignored by phases without a log.
    pub fn attach_ticker(&mut self, ticker: RefreshTicker) {
        match self {
            Phase::Connecting(c) => c.ticker = Some(ticker),
            Phase::Connected(c) => c.ticker = Some(ticker),
            _ => {}
        }
    }

    pub fn ticker_id(&self) -> Option<u64> {
        match self {
            Phase::Connecting(c) => c.ticker.as_ref().map(RefreshTicker::id),
            Phase::Connected(c) => c.ticker.as_ref().map(RefreshTicker::id),
            _ => None,
        }
    }

    pub fn logs(&self) -> Option<&LogView> {
        match self {
            Phase::Connecting(c) => Some(&c.logs),
            Phase::Connected(c) => Some(&c.logs),
            _ => None,
        }
    }

    fn logs_mut(&mut self) -> Option<&mut LogView> {
        match self {
            Phase::Connecting(c) => Some(&mut c.logs),
            Phase::Connected(c) => Some(&mut c.logs),
            _ => None,
        }
    }
}

// ── Configuring ─────────────────────────────────────────────────────

/// Editing the connection configuration before connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuring {
    cluster: ClusterInfo,
    config: ConnectionConfig,
    options: OptionCatalog,
    bundles: BundleCatalog,
}

impl Configuring {
    /// Build from the backend's open reply and the stored configuration.
    ///
    /// Fails when the reply's catalogs are malformed.
    pub fn from_page(page: &ConfigPage, config: ConnectionConfig) -> Result<Self, CatalogError> {
        Ok(Self {
            cluster: ClusterInfo::from(page),
            config,
            options: OptionCatalog::from_value(page.available_options.as_ref())?,
            bundles: BundleCatalog::from_value(page.available_bundles.as_ref())?,
        })
    }

    pub fn new(
        cluster: ClusterInfo,
        config: ConnectionConfig,
        options: OptionCatalog,
        bundles: BundleCatalog,
    ) -> Self {
        Self {
            cluster,
            config,
            options,
            bundles,
        }
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn option_catalog(&self) -> &OptionCatalog {
        &self.options
    }

    pub fn bundle_catalog(&self) -> &BundleCatalog {
        &self.bundles
    }

    /// Set an option, replacing any entry with the same name.
    ///
    /// Empty names are rejected.
    pub fn add_option(&mut self, name: &str, value: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.config.set_option(name, value);
        true
    }

    pub fn remove_option(&mut self, name: &str) -> bool {
        self.config.remove_option(name)
    }

    /// Choose a bundle offered by the backend.
    /// Choose a bundle offered for this cluster. Returns false for bundles
    /// the catalog lacks or filters out, and for ones already chosen.
    pub fn add_bundle(&mut self, name: &str) -> bool {
        let offered = self.bundles.get(name).is_some_and(|bundle| {
            bundle.applies_to(
                self.cluster.spark_version.as_deref(),
                self.cluster.cluster.as_deref(),
            )
        });
        if !offered {
            return false;
        }
        self.config.add_bundle(name)
    }

    pub fn remove_bundle(&mut self, name: &str) -> bool {
        self.config.remove_bundle(name)
    }

    /// Choose or unchoose a bundle. Returns whether it is now chosen.
    pub fn toggle_bundle(&mut self, name: &str) -> bool {
        if self.config.has_bundle(name) {
            self.config.remove_bundle(name);
            false
        } else {
            self.add_bundle(name)
        }
    }

    /// Bundles offered for this cluster's spark version and cluster name.
    pub fn available_bundles(&self) -> Vec<(&str, &OptionBundle)> {
        self.bundles
            .available_for(
                self.cluster.spark_version.as_deref(),
                self.cluster.cluster.as_deref(),
            )
            .collect()
    }

    pub fn suggestions(&self, query: &str) -> Vec<&str> {
        self.options.suggestions(query)
    }

    pub fn option_groups(&self) -> BTreeMap<&str, Vec<&str>> {
        self.options.groups()
    }

    /// The options that would be sent on connect.
    pub fn merged_options(&self) -> BTreeMap<String, String> {
        crate::bundles::merge_options(
            &self.config.list_of_options,
            &self.config.bundled_options,
            &self.bundles,
        )
    }

    pub fn connect(&self) -> PhaseEvent {
        PhaseEvent::ConnectRequested {
            options: self.merged_options(),
            config: self.config.clone(),
            cluster: self.cluster.clone(),
        }
    }
}

// ── Connecting ──────────────────────────────────────────────────────

/// Waiting for the cluster session to start, following its log.
#[derive(Debug)]
pub struct Connecting {
    pub cluster: ClusterInfo,
    pub logs: LogView,
    ticker: Option<RefreshTicker>,
}

impl Connecting {
    pub fn new(cluster: ClusterInfo, policy: DisplayPolicy, banner: &str) -> Self {
        Self {
            cluster,
            logs: LogView::seeded(policy, [banner.to_string()]),
            ticker: None,
        }
    }
}

// ── Connected ───────────────────────────────────────────────────────

/// A link to a cluster resource (Spark UI, history server, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ResourceLink {
    pub name: String,
    pub url: String,
}

/// A running cluster session.
#[derive(Debug)]
pub struct Connected {
    pub cluster: ClusterInfo,
    pub session: SessionInfo,
    pub links: Vec<ResourceLink>,
    pub logs: LogView,
    ticker: Option<RefreshTicker>,
}

impl Connected {
    pub fn new(session: SessionInfo, policy: DisplayPolicy) -> Self {
        Self {
            cluster: ClusterInfo::from(&session),
            links: resource_links(session.session.as_ref()),
            session,
            logs: LogView::new(policy),
            ticker: None,
        }
    }

    pub fn reconfigure(&self) -> PhaseEvent {
        PhaseEvent::ReconfigureRequested
    }
}

/// String fields of the backend's session object that hold web URLs.
fn resource_links(session: Option<&Value>) -> Vec<ResourceLink> {
    let Some(Value::Object(fields)) = session else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|(name, value)| {
            let url = value.as_str()?;
            (url.starts_with("http://") || url.starts_with("https://")).then(|| ResourceLink {
                name: name.clone(),
                url: url.to_string(),
            })
        })
        .collect()
}

// ── ConnectFailed ───────────────────────────────────────────────────

/// The backend reported that the session could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailed {
    pub error: String,
}

impl ConnectFailed {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    pub fn retry(&self) -> PhaseEvent {
        PhaseEvent::RetryRequested
    }
}
