//! Target platform description.
//!
//! A [`DistroProfile`] names the three independent facets that decide which
//! command syntax a host needs: the package manager, the boot-time service
//! manager and the runtime init system.

use std::fmt;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

/// Package management system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Yum,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Mechanism enabling or disabling services at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceManager {
    #[serde(rename = "update-rc.d")]
    UpdateRcD,
    #[serde(rename = "chkconfig")]
    Chkconfig,
    #[serde(rename = "systemd")]
    Systemd,
    #[default]
    #[serde(other, rename = "unknown")]
    Unknown,
}

/// Mechanism driving the runtime lifecycle of services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    #[serde(rename = "sysvinit")]
    SysVInit,
    Systemd,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Yum => "yum",
            PackageManager::Unknown => "unknown",
        }
    }
}

impl ServiceManager {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceManager::UpdateRcD => "update-rc.d",
            ServiceManager::Chkconfig => "chkconfig",
            ServiceManager::Systemd => "systemd",
            ServiceManager::Unknown => "unknown",
        }
    }
}

impl InitSystem {
    pub fn name(&self) -> &'static str {
        match self {
            InitSystem::SysVInit => "sysvinit",
            InitSystem::Systemd => "systemd",
            InitSystem::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable description of a target host.
///
/// The facets are independent: a host may well combine `apt` packages with
/// `systemd` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DistroProfile {
    #[serde(default)]
    pub package_manager: PackageManager,
    #[serde(default)]
    pub service_manager: ServiceManager,
    #[serde(default)]
    pub init_system: InitSystem,
}

impl DistroProfile {
    pub fn new(
        package_manager: PackageManager,
        service_manager: ServiceManager,
        init_system: InitSystem,
    ) -> Self {
        Self {
            package_manager,
            service_manager,
            init_system,
        }
    }

    /// Probe the running host for its package, service and init tooling.
    ///
    /// Facets whose tools cannot be found stay [`Unknown`](PackageManager::Unknown).
    pub fn detect() -> Self {
        let package_manager = if command_exists("apt-get") {
            PackageManager::Apt
        } else if command_exists("yum") {
            PackageManager::Yum
        } else {
            PackageManager::Unknown
        };

        let systemd =
            command_exists("systemctl") && Path::new("/run/systemd/system").exists();

        let service_manager = if systemd {
            ServiceManager::Systemd
        } else if command_exists("chkconfig") {
            ServiceManager::Chkconfig
        } else if command_exists("update-rc.d") {
            ServiceManager::UpdateRcD
        } else {
            ServiceManager::Unknown
        };

        let init_system = if systemd {
            InitSystem::Systemd
        } else if command_exists("service") {
            InitSystem::SysVInit
        } else {
            InitSystem::Unknown
        };

        let profile = Self::new(package_manager, service_manager, init_system);
        tracing::debug!(%profile, "detected distro profile");
        profile
    }
}

impl fmt::Display for DistroProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pms={} srvconf={} initd={}",
            self.package_manager, self.service_manager, self.init_system
        )
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_facet_identifiers() {
        let managers: Vec<ServiceManager> =
            serde_yaml::from_str("[update-rc.d, chkconfig, systemd]").unwrap();
        assert_eq!(
            managers,
            vec![ServiceManager::UpdateRcD, ServiceManager::Chkconfig, ServiceManager::Systemd]
        );
        assert_eq!(serde_yaml::from_str::<PackageManager>("yum").unwrap(), PackageManager::Yum);
        assert_eq!(serde_yaml::from_str::<InitSystem>("sysvinit").unwrap(), InitSystem::SysVInit);
    }

    #[test]
    fn unrecognised_identifiers_are_unknown() {
        assert_eq!(serde_yaml::from_str::<PackageManager>("pacman").unwrap(), PackageManager::Unknown);
        assert_eq!(serde_yaml::from_str::<ServiceManager>("openrc").unwrap(), ServiceManager::Unknown);
        assert_eq!(serde_yaml::from_str::<InitSystem>("runit").unwrap(), InitSystem::Unknown);
    }

    #[test]
    fn facets_are_independent_in_yaml() {
        let profile: DistroProfile = serde_yaml::from_str(
            "package_manager: apt\nservice_manager: systemd\ninit_system: sysvinit\n",
        )
        .unwrap();
        assert_eq!(
            profile,
            DistroProfile::new(
                PackageManager::Apt,
                ServiceManager::Systemd,
                InitSystem::SysVInit
            )
        );
    }

    #[test]
    fn yaml_accepts_unknown_and_missing_facets() {
        let profile: DistroProfile =
            serde_yaml::from_str("package_manager: pacman\nservice_manager: update-rc.d\n")
                .unwrap();
        assert_eq!(profile.package_manager, PackageManager::Unknown);
        assert_eq!(profile.service_manager, ServiceManager::UpdateRcD);
        assert_eq!(profile.init_system, InitSystem::Unknown);
    }

    #[test]
    fn display_uses_identifiers() {
        let profile = DistroProfile::new(
            PackageManager::Yum,
            ServiceManager::Chkconfig,
            InitSystem::SysVInit,
        );
        assert_eq!(profile.to_string(), "pms=yum srvconf=chkconfig initd=sysvinit");
    }
}
