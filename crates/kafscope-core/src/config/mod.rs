//! Operator configuration.
//!
//! The configuration document is a list of [`ClusterProfile`]s plus UI
//! preferences. Exactly one profile is active whenever the list is
//! non-empty. Persistence goes through the [`ConfigIo`] trait; the
//! default implementation is the YAML file store in [`store`].

mod profile;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub use profile::{
    ClusterProfile, KafkaConnectConfig, SaslConfig, SaslMechanism, SaslSecurityProtocol,
    SchemaRegistryConfig, SecurityProtocol, TlsConfig, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_REGISTRY_TIMEOUT,
};
pub use store::{ConfigIo, YamlConfigStore};

/// The persisted configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Known clusters.
    #[serde(default)]
    pub clusters: Vec<ClusterProfile>,
    /// Render without nerd-font glyphs.
    #[serde(default)]
    pub plain_fonts: bool,
}

impl AppConfig {
    /// Returns the active profile, if any.
    #[must_use]
    pub fn active_cluster(&self) -> Option<&ClusterProfile> {
        self.clusters.iter().find(|c| c.active)
    }

    /// Looks up a profile by name.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterProfile> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Marks `name` as the only active profile.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if no profile has that name.
    pub fn set_active(&mut self, name: &str) -> Result<(), ClientError> {
        if self.cluster(name).is_none() {
            return Err(ClientError::NotFound(format!("cluster '{name}'")));
        }
        for cluster in &mut self.clusters {
            cluster.active = cluster.name == name;
        }
        Ok(())
    }

    /// Inserts a profile or replaces the one with the same name.
    ///
    /// The first profile added becomes active. A replaced profile keeps
    /// its active flag.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the profile is invalid.
    pub fn upsert_cluster(&mut self, mut profile: ClusterProfile) -> Result<(), ClientError> {
        profile.validate()?;
        if let Some(existing) = self.clusters.iter_mut().find(|c| c.name == profile.name) {
            profile.active = existing.active;
            *existing = profile;
            return Ok(());
        }
        profile.active = self.clusters.is_empty();
        self.clusters.push(profile);
        Ok(())
    }

    /// Removes a profile. If it was active, the first remaining profile
    /// becomes active.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if no profile has that name.
    pub fn remove_cluster(&mut self, name: &str) -> Result<ClusterProfile, ClientError> {
        let idx = self
            .clusters
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ClientError::NotFound(format!("cluster '{name}'")))?;
        let removed = self.clusters.remove(idx);
        if removed.active {
            if let Some(first) = self.clusters.first_mut() {
                first.active = true;
            }
        }
        Ok(removed)
    }

    /// Validates every profile, name uniqueness and the active flag.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the document is invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        let mut names = std::collections::HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !names.insert(cluster.name.as_str()) {
                return Err(ClientError::Configuration(format!(
                    "duplicate cluster name '{}'",
                    cluster.name
                )));
            }
        }
        let active = self.clusters.iter().filter(|c| c.active).count();
        if !self.clusters.is_empty() && active != 1 {
            return Err(ClientError::Configuration(format!(
                "exactly one cluster must be active, found {active}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> ClusterProfile {
        ClusterProfile::new(name, vec![format!("{name}:9092")])
    }

    #[test]
    fn test_first_cluster_becomes_active() {
        let mut config = AppConfig::default();
        config.upsert_cluster(profile("a")).unwrap();
        config.upsert_cluster(profile("b")).unwrap();
        assert_eq!(config.active_cluster().unwrap().name, "a");
        config.validate().unwrap();
    }

    #[test]
    fn test_set_active() {
        let mut config = AppConfig::default();
        config.upsert_cluster(profile("a")).unwrap();
        config.upsert_cluster(profile("b")).unwrap();
        config.set_active("b").unwrap();
        assert_eq!(config.active_cluster().unwrap().name, "b");
        assert_eq!(config.clusters.iter().filter(|c| c.active).count(), 1);
        assert!(config.set_active("missing").is_err());
    }

    #[test]
    fn test_upsert_replaces_and_keeps_active() {
        let mut config = AppConfig::default();
        config.upsert_cluster(profile("a")).unwrap();
        let mut updated = profile("a");
        updated.color = "red".into();
        config.upsert_cluster(updated).unwrap();
        assert_eq!(config.clusters.len(), 1);
        assert!(config.clusters[0].active);
        assert_eq!(config.clusters[0].color, "red");
    }

    #[test]
    fn test_remove_active_promotes_next() {
        let mut config = AppConfig::default();
        config.upsert_cluster(profile("a")).unwrap();
        config.upsert_cluster(profile("b")).unwrap();
        let removed = config.remove_cluster("a").unwrap();
        assert!(removed.active);
        assert_eq!(config.active_cluster().unwrap().name, "b");
    }

    #[test]
    fn test_validate_rejects_two_active() {
        let mut a = profile("a");
        a.active = true;
        let mut b = profile("b");
        b.active = true;
        let config = AppConfig {
            clusters: vec![a, b],
            plain_fonts: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut a = profile("a");
        a.active = true;
        let config = AppConfig {
            clusters: vec![a, profile("a")],
            plain_fonts: false,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }
}
