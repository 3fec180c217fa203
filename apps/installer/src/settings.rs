//! Deployment settings file.
//!
//! ```yaml
//! auto_deploy: false
//! verbose: true
//! log_file: /var/log/osf/install.log
//! package_manager: apt
//! service_manager: update-rc.d
//! init_system: sysvinit
//! ```
//!
//! Every key is optional. Profile facets left out are detected on the host.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deploy_core::config::DEFAULT_LOG_FILE;
use deploy_core::{
    DeployConfig, DeploymentMode, DistroProfile, InitSystem, PackageManager, ServiceManager,
};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub auto_deploy: Option<bool>,
    pub verbose: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub package_manager: Option<PackageManager>,
    pub service_manager: Option<ServiceManager>,
    pub init_system: Option<InitSystem>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a map
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Layer `other` on top of `self`; keys set in `other` win.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            auto_deploy: other.auto_deploy.or(self.auto_deploy),
            verbose: other.verbose.or(self.verbose),
            log_file: other.log_file.or(self.log_file),
            package_manager: other.package_manager.or(self.package_manager),
            service_manager: other.service_manager.or(self.service_manager),
            init_system: other.init_system.or(self.init_system),
        }
    }

    fn is_profile_complete(&self) -> bool {
        self.package_manager.is_some() && self.service_manager.is_some() && self.init_system.is_some()
    }

    /// Resolve into the immutable run configuration, detecting missing facets.
    pub fn resolve(self) -> DeployConfig {
        let detected = if self.is_profile_complete() {
            DistroProfile::default()
        } else {
            DistroProfile::detect()
        };
        self.resolve_with(detected)
    }

    fn resolve_with(self, detected: DistroProfile) -> DeployConfig {
        let profile = DistroProfile::new(
            self.package_manager.unwrap_or(detected.package_manager),
            self.service_manager.unwrap_or(detected.service_manager),
            self.init_system.unwrap_or(detected.init_system),
        );

        DeployConfig::new(profile)
            .with_mode(DeploymentMode {
                auto_deploy: self.auto_deploy.unwrap_or(true),
            })
            .with_verbose(self.verbose.unwrap_or(false))
            .with_log_file(
                self.log_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> DistroProfile {
        DistroProfile::new(PackageManager::Yum, ServiceManager::Chkconfig, InitSystem::SysVInit)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Settings::parse("").unwrap().resolve_with(detected());

        assert_eq!(config.profile, detected());
        assert_eq!(config.mode, DeploymentMode::UNATTENDED);
        assert!(!config.verbose);
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn file_facets_override_detection() {
        let settings = Settings::parse(
            "auto_deploy: false\nverbose: true\nlog_file: /tmp/deploy.log\npackage_manager: apt\n",
        )
        .unwrap();
        let config = settings.resolve_with(detected());

        assert_eq!(config.profile.package_manager, PackageManager::Apt);
        assert_eq!(config.profile.service_manager, ServiceManager::Chkconfig);
        assert_eq!(config.mode, DeploymentMode::INTERACTIVE);
        assert!(config.verbose);
        assert_eq!(config.log_file, PathBuf::from("/tmp/deploy.log"));
    }

    #[test]
    fn unknown_facet_names_become_unknown() {
        let settings = Settings::parse("package_manager: pacman\nservice_manager: runit\n").unwrap();
        assert_eq!(settings.package_manager, Some(PackageManager::Unknown));
        assert_eq!(settings.service_manager, Some(ServiceManager::Unknown));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::parse("autodeploy: true\n").is_err());
    }

    #[test]
    fn merge_prefers_the_overlay() {
        let file = Settings {
            verbose: Some(false),
            init_system: Some(InitSystem::SysVInit),
            ..Settings::default()
        };
        let flags = Settings {
            verbose: Some(true),
            ..Settings::default()
        };

        let merged = file.merge(flags);
        assert_eq!(merged.verbose, Some(true));
        assert_eq!(merged.init_system, Some(InitSystem::SysVInit));
    }

    #[test]
    fn load_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Settings::load(&tmp.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn load_reads_yaml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deploy.yaml");
        fs::write(&path, "init_system: systemd\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.init_system, Some(InitSystem::Systemd));
    }
}
