//! Maps plugin ids to instances.

use seekpilot_core::config::DEFAULT_PLUGIN_ORDER;
use seekpilot_core::{AppConfig, Plugin, PluginMeta, Registration};

use crate::chat::{ChatInjector, NewChatOpener};
use crate::diagnostics::{LlmPing, Snapshot};
use crate::exporters::DeepSeekDomExport;
use crate::extractors::{HistoryRecord, TotalLinks};
use crate::maintenance::ClearHistory;

/// Every built-in id, in default run order.
pub fn all_ids() -> &'static [&'static str] {
    DEFAULT_PLUGIN_ORDER
}

/// A fresh plugin for `id`, or `None` if the id is unknown.
pub fn build(id: &str) -> Option<Box<dyn Plugin>> {
    let plugin: Box<dyn Plugin> = match id {
        NewChatOpener::ID => Box::new(NewChatOpener::new()),
        ChatInjector::ID => Box::new(ChatInjector::new()),
        ClearHistory::ID => Box::new(ClearHistory::new()),
        TotalLinks::ID => Box::new(TotalLinks::new()),
        Snapshot::ID => Box::new(Snapshot::new()),
        LlmPing::ID => Box::new(LlmPing::new()),
        HistoryRecord::ID => Box::new(HistoryRecord::new()),
        DeepSeekDomExport::ID => Box::new(DeepSeekDomExport::new()),
        _ => return None,
    };
    Some(plugin)
}

/// The plugin for `id` together with its registration from `config`.
pub fn build_configured(id: &str, config: &AppConfig) -> Option<(Box<dyn Plugin>, Registration)> {
    let plugin = build(id)?;
    let toggle = config.toggle(id);
    Some((
        plugin,
        Registration {
            enabled: toggle.enabled,
            order: Some(toggle.order),
        },
    ))
}

/// Metadata of every built-in plugin with its configured flags applied.
pub fn describe(config: &AppConfig) -> Vec<PluginMeta> {
    all_ids()
        .iter()
        .filter_map(|id| build(id))
        .map(|p| {
            let toggle = config.toggle(&p.meta().id);
            p.meta()
                .clone()
                .with_enabled(toggle.enabled)
                .with_order(toggle.order)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_id_builds() {
        for id in all_ids() {
            let plugin = build(id).unwrap_or_else(|| panic!("{} not in catalog", id));
            assert_eq!(plugin.meta().id, *id);
        }
        assert!(build("conversationThread").is_none());
    }

    #[test]
    fn test_configured_registration() {
        let mut config = AppConfig::default();
        if let Some(t) = config.plugins.get_mut("snapshot") {
            t.enabled = true;
            t.order = 7;
        }
        let (_, reg) = build_configured("snapshot", &config).unwrap();
        assert!(reg.enabled);
        assert_eq!(reg.order, Some(7));

        let (_, reg) = build_configured("llmPing", &config).unwrap();
        assert!(!reg.enabled);
    }

    #[test]
    fn test_describe_applies_toggles() {
        let mut config = AppConfig::default();
        if let Some(t) = config.plugins.get_mut("totalLinks") {
            t.enabled = true;
        }
        let metas = describe(&config);
        assert_eq!(metas.len(), all_ids().len());
        let links = metas.iter().find(|m| m.id == "totalLinks").unwrap();
        assert!(links.enabled);
        assert_eq!(links.order, Some(4));
    }
}
