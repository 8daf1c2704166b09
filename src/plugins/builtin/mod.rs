//! Plugins bundled with the agent.

mod changelog;
mod git;
mod notes;
mod organizer;
mod syswhisper;
mod usage_report;
mod weather;

pub use changelog::ChangelogPlugin;
pub use git::{GitStatusPlugin, WorkingTree, find_repos, parse_ahead_behind, parse_porcelain};
pub use notes::NotesPlugin;
pub use organizer::{OrganizerPlugin, category_for};
pub use syswhisper::SysWhisperPlugin;
pub use usage_report::{UsageQuery, UsageReportPlugin};
pub use weather::WeatherPlugin;

use std::sync::Arc;

use crate::activity::{ChangeLog, HealthJournal};
use crate::config::{SkillsConfig, UsageConfig};
use crate::llm::ProviderRouter;
use crate::plugins::Plugin;
use crate::tools::WebSearch;
use crate::usage::UsageTracker;

/// Long-lived services some bundled plugins hold on to.
#[derive(Clone)]
pub struct PluginDeps {
    pub tracker: Arc<UsageTracker>,
    pub changelog: Arc<ChangeLog>,
    pub journal: Arc<HealthJournal>,
    /// Lets SYSWHISPER explain its history in prose.
    pub router: Option<Arc<ProviderRouter>>,
}

/// The bundled plugins, in registration order.
///
/// Order matters: when trigger phrases overlap, the earlier plugin wins.
pub fn all(skills: &SkillsConfig, usage: &UsageConfig, deps: PluginDeps) -> Vec<Arc<dyn Plugin>> {
    let mut syswhisper = SysWhisperPlugin::new(deps.journal);
    if let Some(router) = deps.router {
        syswhisper = syswhisper.with_router(router);
    }

    vec![
        Arc::new(NotesPlugin::new(skills.notes_path.clone())),
        Arc::new(UsageReportPlugin::new(
            deps.tracker,
            usage.limits.clone(),
            usage.warn_ratio,
        )),
        Arc::new(ChangelogPlugin::new(deps.changelog)),
        Arc::new(syswhisper),
        Arc::new(
            GitStatusPlugin::new(skills.git_roots.clone(), skills.git_max_depth)
                .with_timeout(skills.command_timeout),
        ),
        Arc::new(OrganizerPlugin),
        Arc::new(WeatherPlugin::new(WebSearch::new(
            skills.search_base_url.clone(),
        ))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{Lookup, PluginRegistry};

    #[test]
    fn test_bundled_plugins_register_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let skills = SkillsConfig::in_dir(dir.path());
        let usage = UsageConfig::in_dir(dir.path());
        let deps = PluginDeps {
            tracker: Arc::new(UsageTracker::open_in_memory().unwrap()),
            changelog: Arc::new(ChangeLog::open_in_memory(&[]).unwrap()),
            journal: Arc::new(HealthJournal::open_in_memory().unwrap()),
            router: None,
        };

        let registry = PluginRegistry::from_plugins(all(&skills, &usage, deps)).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "NOTES",
                "API_TRACKER",
                "CHANGELOG",
                "SYSWHISPER",
                "GIT_STATUS",
                "ORGANIZE_FOLDER",
                "WEATHER"
            ]
        );
        let routed = |text: &str| {
            registry
                .lookup(Lookup::Text(text))
                .map(|p| p.name().to_string())
        };
        assert_eq!(routed("note: organize my desk").as_deref(), Some("NOTES"));
        assert_eq!(routed("show my notes").as_deref(), Some("NOTES"));
        assert_eq!(routed("what did i work on today").as_deref(), Some("CHANGELOG"));
        assert_eq!(routed("why is my pc slow").as_deref(), Some("SYSWHISPER"));
        assert_eq!(routed("organize my downloads").as_deref(), Some("ORGANIZE_FOLDER"));
        assert_eq!(routed("Any tips on how I should organize my downloads folder?"), None);
    }
}
