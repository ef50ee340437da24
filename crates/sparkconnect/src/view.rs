//! What the view layer renders for the active phase.
//!
//! [`project`] is a pure function of the phase; the controller republishes
//! its result whenever the phase changes or the log display refreshes.

use std::collections::BTreeMap;

use serde::Serialize;
use ts_rs::TS;

use crate::bundles::{BundleOption, CatalogOption};
use crate::metadata::SparkOpt;
use crate::phase::{ClusterInfo, Phase, PhaseKind, ResourceLink};

/// The button a phase offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ViewAction {
    Connect,
    Reconfigure,
    TryAgain,
}

/// A bundle offered in the configuration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct BundleView {
    pub name: String,
    pub chosen: bool,
    pub options: Vec<BundleOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct ConfiguringView {
    pub title: String,
    pub cluster: ClusterInfo,
    pub options: Vec<SparkOpt>,
    pub bundles: Vec<BundleView>,
    pub suggestions: Vec<CatalogOption>,
    /// Options that would be sent on connect.
    pub merged: BTreeMap<String, String>,
    pub action: ViewAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct ConnectingView {
    pub title: String,
    pub cluster: ClusterInfo,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct ConnectedView {
    pub title: String,
    pub cluster: ClusterInfo,
    pub links: Vec<ResourceLink>,
    pub logs: Vec<String>,
    pub action: ViewAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct ConnectFailedView {
    pub title: String,
    pub error: String,
    pub action: ViewAction,
}

/// The panel contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "phase", rename_all = "snake_case")]
#[ts(export)]
pub enum View {
    #[default]
    NotAttached,
    Loading {
        title: String,
    },
    Configuring(ConfiguringView),
    Connecting(ConnectingView),
    Connected(ConnectedView),
    ConnectFailed(ConnectFailedView),
}

impl View {
    pub fn kind(&self) -> PhaseKind {
        match self {
            View::NotAttached => PhaseKind::NotAttached,
            View::Loading { .. } => PhaseKind::Loading,
            View::Configuring(_) => PhaseKind::Configuring,
            View::Connecting(_) => PhaseKind::Connecting,
            View::Connected(_) => PhaseKind::Connected,
            View::ConnectFailed(_) => PhaseKind::ConnectFailed,
        }
    }

    pub fn action(&self) -> Option<ViewAction> {
        match self {
            View::Configuring(v) => Some(v.action),
            View::Connected(v) => Some(v.action),
            View::ConnectFailed(v) => Some(v.action),
            View::NotAttached | View::Loading { .. } | View::Connecting(_) => None,
        }
    }

    /// Displayed log lines, for phases that show a log.
    pub fn logs(&self) -> Option<&[String]> {
        match self {
            View::Connecting(v) => Some(&v.logs),
            View::Connected(v) => Some(&v.logs),
            _ => None,
        }
    }
}

/// Project a notebook's phase onto the panel.
pub fn project(title: &str, phase: &Phase) -> View {
    let title = title.to_string();
    match phase {
        Phase::NotAttached => View::NotAttached,
        Phase::Loading => View::Loading { title },
        Phase::Configuring(c) => {
            let config = c.config();
            View::Configuring(ConfiguringView {
                title,
                cluster: c.cluster().clone(),
                options: config.list_of_options.clone(),
                bundles: c
                    .available_bundles()
                    .into_iter()
                    .map(|(name, bundle)| BundleView {
                        name: name.to_string(),
                        chosen: config.has_bundle(name),
                        options: bundle.options.clone(),
                    })
                    .collect(),
                suggestions: c.option_catalog().iter().cloned().collect(),
                merged: c.merged_options(),
                action: ViewAction::Connect,
            })
        }
        Phase::Connecting(c) => View::Connecting(ConnectingView {
            title,
            cluster: c.cluster.clone(),
            logs: c.logs.displayed().to_vec(),
        }),
        Phase::Connected(c) => View::Connected(ConnectedView {
            title,
            cluster: c.cluster.clone(),
            links: c.links.clone(),
            logs: c.logs.displayed().to_vec(),
            action: ViewAction::Reconfigure,
        }),
        Phase::ConnectFailed(c) => View::ConnectFailed(ConnectFailedView {
            title,
            error: c.error.clone(),
            action: ViewAction::TryAgain,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::{BundleCatalog, OptionBundle, OptionCatalog};
    use crate::logs::DisplayPolicy;
    use crate::metadata::ConnectionConfig;
    use crate::phase::{ConnectFailed, Configuring, Connecting};
    use serde_json::json;

    #[test]
    fn test_projection_per_phase() {
        assert_eq!(project("nb", &Phase::NotAttached), View::NotAttached);
        assert_eq!(
            project("nb", &Phase::Loading),
            View::Loading {
                title: "nb".to_string()
            }
        );

        let failed = project("nb", &Phase::ConnectFailed(ConnectFailed::new("no quota")));
        assert_eq!(failed.kind(), PhaseKind::ConnectFailed);
        assert_eq!(failed.action(), Some(ViewAction::TryAgain));

        let connecting = project(
            "nb",
            &Phase::Connecting(Connecting::new(
                ClusterInfo::default(),
                DisplayPolicy::default(),
                "Waiting for spark context to start",
            )),
        );
        assert_eq!(connecting.action(), None);
        assert_eq!(
            connecting.logs(),
            Some(&["Waiting for spark context to start".to_string()][..])
        );
    }

    #[test]
    fn test_configuring_projection_marks_chosen_bundles() {
        let mut bundles = BundleCatalog::default();
        bundles.insert(
            "Memory",
            OptionBundle {
                options: vec![BundleOption {
                    name: "spark.executor.memory".to_string(),
                    value: "4g".to_string(),
                    concatenate: None,
                }],
                ..OptionBundle::default()
            },
        );
        bundles.insert("Other", OptionBundle::default());
        let config = ConnectionConfig {
            bundled_options: vec!["Memory".to_string()],
            list_of_options: vec![SparkOpt::new("spark.app.name", "demo")],
        };
        let phase = Phase::Configuring(Configuring::new(
            ClusterInfo::default(),
            config,
            OptionCatalog::default(),
            bundles,
        ));

        let View::Configuring(view) = project("analysis.ipynb", &phase) else {
            panic!("expected configuring view");
        };
        assert_eq!(view.title, "analysis.ipynb");
        assert_eq!(view.bundles.len(), 2);
        assert!(view.bundles.iter().any(|b| b.name == "Memory" && b.chosen));
        assert!(view.bundles.iter().any(|b| b.name == "Other" && !b.chosen));
        assert_eq!(view.merged["spark.executor.memory"], "4g");
        assert_eq!(view.merged["spark.app.name"], "demo");
    }

    #[test]
    fn test_view_wire_format() {
        let view = View::ConnectFailed(ConnectFailedView {
            title: "nb".to_string(),
            error: "boom".to_string(),
            action: ViewAction::TryAgain,
        });
        assert_eq!(
            serde_json::to_value(&view).unwrap(),
            json!({"phase": "connect_failed", "title": "nb", "error": "boom", "action": "try_again"})
        );
        assert_eq!(
            serde_json::to_value(View::NotAttached).unwrap(),
            json!({"phase": "not_attached"})
        );
    }
}
