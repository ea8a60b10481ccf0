//! Channel annotations.
//!
//! Hosts often want a human label and the object classes a feed is expected
//! to show next to the picture. The renderer asks a [`ChannelCatalog`] once
//! per `connect`; a miss is not an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Config;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTag {
    pub label: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

pub trait ChannelCatalog: Send + Sync {
    fn lookup(&self, channel: &str) -> Option<ChannelTag>;
}

/// In-memory catalog. Channel ids are matched case-insensitively since the
/// config layer lowercases keys.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tags: HashMap<String, ChannelTag>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::new();
        for (channel, tag) in &config.catalog {
            catalog.insert(channel, tag.clone());
        }
        catalog
    }

    pub fn insert(&mut self, channel: &str, tag: ChannelTag) -> Option<ChannelTag> {
        self.tags.insert(channel.to_lowercase(), tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl ChannelCatalog for StaticCatalog {
    fn lookup(&self, channel: &str) -> Option<ChannelTag> {
        self.tags.get(&channel.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut catalog = StaticCatalog::new();
        catalog.insert(
            "Gate-North",
            ChannelTag {
                label: "North gate".into(),
                classes: vec!["vehicle".into()],
            },
        );

        assert_eq!(catalog.lookup("gate-north").unwrap().label, "North gate");
        assert_eq!(catalog.lookup("GATE-NORTH").unwrap().classes, vec!["vehicle"]);
        assert!(catalog.lookup("gate-south").is_none());
    }

    #[test]
    fn built_from_config() {
        let config = Config::from_toml(
            r#"
            [catalog.lobby]
            label = "Lobby"
            "#,
        )
        .unwrap();
        let catalog = StaticCatalog::from_config(&config);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.lookup("lobby").unwrap().classes.is_empty());
    }
}
