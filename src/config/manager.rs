//! Active-variant management and hot reload
//!
//! The active variant lives behind an atomic snapshot pointer: request paths
//! clone one `Arc` at entry and never observe a mid-flight swap. File
//! changes flow through a watcher channel; a reload validates the new
//! document, writes a timestamped backup of the previous file to a versions
//! folder, and only then swaps the pointer. Invalid updates are ignored with
//! a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::variant::{ConfigError, ConfigResult, ConfigVariant, RulesFile};

/// Folder (next to the rules file) that receives timestamped backups.
const VERSIONS_DIR: &str = "versions";

/// Variant registry with an atomic active pointer.
pub struct ConfigManager {
    variants: RwLock<BTreeMap<String, Arc<ConfigVariant>>>,
    active: RwLock<Arc<ConfigVariant>>,
    config_path: RwLock<Option<PathBuf>>,
}

impl ConfigManager {
    /// Manager holding a single baked-in variant.
    pub fn with_variant(variant: ConfigVariant) -> ConfigResult<Self> {
        variant.validate()?;
        let active = Arc::new(variant);
        let mut variants = BTreeMap::new();
        variants.insert(active.name.clone(), Arc::clone(&active));
        Ok(Self {
            variants: RwLock::new(variants),
            active: RwLock::new(active),
            config_path: RwLock::new(None),
        })
    }

    /// Load a rules file from disk.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {e}", path.display())))?;
        let file = RulesFile::parse(&raw)?;
        let manager = Self::from_rules(file)?;
        *manager.config_path.write() = Some(path.to_path_buf());
        Ok(manager)
    }

    fn from_rules(file: RulesFile) -> ConfigResult<Self> {
        let variants: BTreeMap<String, Arc<ConfigVariant>> = file
            .rules
            .rule_sets
            .into_iter()
            .map(|(name, variant)| (name, Arc::new(variant)))
            .collect();
        let active = Arc::clone(
            variants
                .get(&file.active_variant)
                .ok_or_else(|| ConfigError::UnknownVariant(file.active_variant.clone()))?,
        );
        Ok(Self {
            variants: RwLock::new(variants),
            active: RwLock::new(active),
            config_path: RwLock::new(None),
        })
    }

    /// Snapshot of the active variant. Requests call this exactly once at
    /// entry.
    pub fn active(&self) -> Arc<ConfigVariant> {
        Arc::clone(&self.active.read())
    }

    /// Names of all loaded variants.
    pub fn variant_names(&self) -> Vec<String> {
        self.variants.read().keys().cloned().collect()
    }

    /// Switch the active variant for A/B rollouts.
    pub fn switch_variant(&self, name: &str) -> ConfigResult<Arc<ConfigVariant>> {
        let variants = self.variants.read();
        let variant = variants
            .get(name)
            .ok_or_else(|| ConfigError::UnknownVariant(name.to_string()))?;
        *self.active.write() = Arc::clone(variant);
        info!(variant = name, "active variant switched");
        Ok(Arc::clone(variant))
    }

    /// Re-read the rules file, back up the previous content, and swap.
    /// Invalid documents leave the running configuration untouched.
    pub fn reload(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .read()
            .clone()
            .ok_or_else(|| ConfigError::FileError("no rules file configured".to_string()))?;

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::FileError(format!("{}: {e}", path.display())))?;
        let file = RulesFile::parse(&raw)?;

        self.backup_previous(&path);

        let variants: BTreeMap<String, Arc<ConfigVariant>> = file
            .rules
            .rule_sets
            .into_iter()
            .map(|(name, variant)| (name, Arc::new(variant)))
            .collect();
        let active = Arc::clone(
            variants
                .get(&file.active_variant)
                .ok_or_else(|| ConfigError::UnknownVariant(file.active_variant.clone()))?,
        );

        *self.variants.write() = variants;
        *self.active.write() = active;
        info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }

    /// Copy the currently-running config into the versions folder before a
    /// swap, named by timestamp.
    fn backup_previous(&self, path: &Path) {
        let versions = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(VERSIONS_DIR);
        if let Err(e) = std::fs::create_dir_all(&versions) {
            warn!(error = %e, "could not create config versions folder");
            return;
        }
        let current = self.serialized_current();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "rules.json".to_string());
        let backup = versions.join(format!("{stamp}-{file_name}"));
        if let Err(e) = std::fs::write(&backup, current) {
            warn!(error = %e, "config backup failed");
        }
    }

    fn serialized_current(&self) -> String {
        let variants = self.variants.read();
        let rule_sets: BTreeMap<String, ConfigVariant> = variants
            .iter()
            .map(|(name, variant)| (name.clone(), (**variant).clone()))
            .collect();
        let file = RulesFile {
            active_variant: self.active.read().name.clone(),
            rules: super::variant::RulesSection { rule_sets },
        };
        serde_json::to_string_pretty(&file).unwrap_or_default()
    }
}

/// File watcher driving hot reloads. The notify handle lives inside the
/// spawned reload task; the watch runs for the life of the process.
pub struct ConfigWatcher;

impl ConfigWatcher {
    /// Watch the manager's rules file and reload on modification events.
    pub fn spawn(manager: Arc<ConfigManager>) -> ConfigResult<()> {
        let path = manager
            .config_path
            .read()
            .clone()
            .ok_or_else(|| ConfigError::FileError("no rules file to watch".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<()>(8);
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(
            move |event: Result<notify::Event, notify::Error>| {
                if let Ok(event) = event {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = tx.blocking_send(());
                    }
                }
            },
        )
        .map_err(|e| ConfigError::FileError(e.to_string()))?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::FileError(e.to_string()))?;

        tokio::spawn(async move {
            // Dropping the watcher would end the watch; it rides along with
            // the reload loop.
            let _watcher = watcher;
            while rx.recv().await.is_some() {
                // Editors fire bursts of events; coalesce before reloading.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}
                if let Err(e) = manager.reload() {
                    warn!(error = %e, "invalid configuration update ignored");
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_variant_rules() -> String {
        r#"{
            "active_variant": "a",
            "rules": {"rule_sets": {
                "a": {"name": "a", "kw_weight": 0.6, "emb_weight": 0.4,
                      "priority_threshold": 0.85, "confidence_threshold": 0.6,
                      "gap_threshold": 0.15, "use_embedding": true,
                      "use_llm": true, "llm_model": "gpt-4o-mini"},
                "b": {"name": "b", "kw_weight": 0.8, "emb_weight": 0.2,
                      "priority_threshold": 0.8, "confidence_threshold": 0.65,
                      "gap_threshold": 0.1, "use_embedding": true,
                      "use_llm": true, "llm_model": "gpt-4o-mini"}
            }}
        }"#
        .to_string()
    }

    #[test]
    fn test_switch_variant() {
        let manager = ConfigManager::from_rules(RulesFile::parse(&two_variant_rules()).unwrap())
            .unwrap();
        assert_eq!(manager.active().name, "a");
        manager.switch_variant("b").unwrap();
        assert_eq!(manager.active().name, "b");
        assert!(manager.switch_variant("missing").is_err());
    }

    #[test]
    fn test_snapshot_survives_switch() {
        let manager = ConfigManager::from_rules(RulesFile::parse(&two_variant_rules()).unwrap())
            .unwrap();
        let snapshot = manager.active();
        manager.switch_variant("b").unwrap();
        // The request that took the snapshot still sees variant a.
        assert_eq!(snapshot.name, "a");
        assert!((snapshot.kw_weight - 0.6).abs() < 1e-9);
        assert_eq!(manager.active().name, "b");
    }

    #[test]
    fn test_reload_backs_up_and_swaps() {
        let dir = std::env::temp_dir().join(format!("shopintent-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.json");
        std::fs::write(&path, two_variant_rules()).unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        assert_eq!(manager.active().name, "a");

        let updated = two_variant_rules().replace("\"active_variant\": \"a\"", "\"active_variant\": \"b\"");
        std::fs::write(&path, updated).unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.active().name, "b");

        let versions: Vec<_> = std::fs::read_dir(dir.join(VERSIONS_DIR))
            .unwrap()
            .collect();
        assert!(!versions.is_empty());
    }

    #[test]
    fn test_invalid_reload_keeps_previous() {
        let dir = std::env::temp_dir().join(format!("shopintent-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.json");
        std::fs::write(&path, two_variant_rules()).unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(manager.reload().is_err());
        assert_eq!(manager.active().name, "a");
    }

    #[test]
    fn test_invalid_variant_rejected_at_load() {
        let manager = ConfigManager::with_variant(ConfigVariant {
            kw_weight: 0.9,
            ..ConfigVariant::baseline()
        });
        assert!(manager.is_err());
    }
}
