//! Command synthesis for package and service actions.
//!
//! Every supported (facet, action) pair maps to exactly one template. Pairs
//! without a template are reported as [`BuildError::UnsupportedProfile`]; no
//! code path produces an empty or partial command.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{DistroProfile, InitSystem, PackageManager, ServiceManager};

/// Placeholder substituted by the service name in service templates.
const SERVICE: &str = "{service}";

/// PMS-wide actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmsAction {
    /// Refresh repository caches
    Refresh,
    /// Clear repository caches
    Clear,
    /// Upgrade installed packages
    Upgrade,
}

/// Actions applied to a list of packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    Install,
    Reinstall,
    Uninstall,
}

/// Boot-time enablement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceConfigAction {
    Enable,
    Disable,
}

/// Runtime lifecycle actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Status,
    Reload,
    Start,
    Restart,
    Stop,
}

impl PmsAction {
    pub fn name(&self) -> &'static str {
        match self {
            PmsAction::Refresh => "refresh",
            PmsAction::Clear => "clear",
            PmsAction::Upgrade => "upgrade",
        }
    }
}

impl PackageAction {
    pub fn name(&self) -> &'static str {
        match self {
            PackageAction::Install => "install",
            PackageAction::Reinstall => "reinstall",
            PackageAction::Uninstall => "uninstall",
        }
    }
}

impl ServiceConfigAction {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceConfigAction::Enable => "enable",
            ServiceConfigAction::Disable => "disable",
        }
    }
}

impl ServiceAction {
    pub const ALL: [ServiceAction; 5] = [
        ServiceAction::Status,
        ServiceAction::Reload,
        ServiceAction::Start,
        ServiceAction::Restart,
        ServiceAction::Stop,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceAction::Status => "status",
            ServiceAction::Reload => "reload",
            ServiceAction::Start => "start",
            ServiceAction::Restart => "restart",
            ServiceAction::Stop => "stop",
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })+
    };
}

display_by_name!(PmsAction, PackageAction, ServiceConfigAction, ServiceAction);

/// Reasons a package or service command cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unsupported profile: {facet} '{value}' has no command for '{action}'")]
    UnsupportedProfile {
        facet: &'static str,
        value: String,
        action: String,
    },
    #[error("no packages given for action '{0}'")]
    NoPackages(String),
}

impl BuildError {
    fn unsupported(
        facet: &'static str,
        value: impl fmt::Display,
        action: impl fmt::Display,
    ) -> Self {
        BuildError::UnsupportedProfile {
            facet,
            value: value.to_string(),
            action: action.to_string(),
        }
    }
}

fn pms_template(pm: PackageManager, action: PmsAction) -> Option<&'static str> {
    use PackageManager::*;
    use PmsAction::*;

    match (pm, action) {
        (Apt, Refresh) => Some("apt-get update"),
        (Apt, Clear) => Some("apt-get clean"),
        (Apt, Upgrade) => Some("apt-get upgrade -y"),
        (Yum, Refresh) => Some("yum makecache"),
        (Yum, Clear) => Some("yum clean all"),
        (Yum, Upgrade) => Some("yum update -y"),
        (Unknown, _) => None,
    }
}

fn package_template(pm: PackageManager, action: PackageAction) -> Option<&'static str> {
    use PackageAction::*;
    use PackageManager::*;

    match (pm, action) {
        (Apt, Install) => Some("apt-get install -y"),
        (Apt, Reinstall) => Some("apt-get install --reinstall -y"),
        (Apt, Uninstall) => Some("apt-get remove --purge -y"),
        (Yum, Install) => Some("yum install -y"),
        (Yum, Reinstall) => Some("yum reinstall -y"),
        (Yum, Uninstall) => Some("yum remove -y"),
        (Unknown, _) => None,
    }
}

fn service_config_template(
    sm: ServiceManager,
    action: ServiceConfigAction,
) -> Option<&'static str> {
    use ServiceConfigAction::*;
    use ServiceManager::*;

    match (sm, action) {
        (UpdateRcD, Enable) => Some("update-rc.d {service} enable"),
        (UpdateRcD, Disable) => Some("update-rc.d {service} disable"),
        (Chkconfig, Enable) => Some("chkconfig {service} on"),
        (Chkconfig, Disable) => Some("chkconfig {service} off"),
        (Systemd, Enable) => Some("systemctl enable {service}"),
        (Systemd, Disable) => Some("systemctl disable {service}"),
        (Unknown, _) => None,
    }
}

fn service_action_template(init: InitSystem, action: ServiceAction) -> &'static str {
    use InitSystem::*;
    use ServiceAction::*;

    match (init, action) {
        (SysVInit, Status) => "service {service} status",
        (SysVInit, Reload) => "service {service} reload",
        (SysVInit, Start) => "service {service} start",
        (SysVInit, Restart) => "service {service} restart",
        (SysVInit, Stop) => "service {service} stop",
        (Systemd, Status) => "systemctl status {service}",
        (Systemd, Reload) => "systemctl reload {service}",
        (Systemd, Start) => "systemctl start {service}",
        (Systemd, Restart) => "systemctl restart {service}",
        (Systemd, Stop) => "systemctl stop {service}",
        // Direct init script invocation works without knowing the init system
        (Unknown, Status) => "/etc/init.d/{service} status",
        (Unknown, Reload) => "/etc/init.d/{service} reload",
        (Unknown, Start) => "/etc/init.d/{service} start",
        (Unknown, Restart) => "/etc/init.d/{service} restart",
        (Unknown, Stop) => "/etc/init.d/{service} stop",
    }
}

fn render_service(template: &str, service: &str) -> String {
    template.replacen(SERVICE, service, 1)
}

/// Build the command applying a PMS-wide action.
pub fn build_pms_command(profile: &DistroProfile, action: PmsAction) -> Result<String, BuildError> {
    pms_template(profile.package_manager, action)
        .map(str::to_string)
        .ok_or_else(|| BuildError::unsupported("package manager", profile.package_manager, action))
}

/// Build the command applying `action` to `packages`.
///
/// Package names are joined with single spaces in the given order.
pub fn build_package_command<S: AsRef<str>>(
    profile: &DistroProfile,
    action: PackageAction,
    packages: &[S],
) -> Result<String, BuildError> {
    let template = package_template(profile.package_manager, action)
        .ok_or_else(|| BuildError::unsupported("package manager", profile.package_manager, action))?;

    let packages: Vec<&str> = packages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect();
    if packages.is_empty() {
        return Err(BuildError::NoPackages(action.to_string()));
    }

    Ok(format!("{} {}", template, packages.join(" ")))
}

/// Build the command enabling or disabling `service` at boot.
pub fn build_service_config_command(
    profile: &DistroProfile,
    action: ServiceConfigAction,
    service: &str,
) -> Result<String, BuildError> {
    service_config_template(profile.service_manager, action)
        .map(|template| render_service(template, service))
        .ok_or_else(|| BuildError::unsupported("service manager", profile.service_manager, action))
}

/// Build the command applying a lifecycle action to `service`.
///
/// An unrecognised init system falls back to calling the init script directly.
pub fn build_service_action_command(
    profile: &DistroProfile,
    action: ServiceAction,
    service: &str,
) -> Result<String, BuildError> {
    Ok(render_service(
        service_action_template(profile.init_system, action),
        service,
    ))
}

/// Wrap a shell argument in double quotes, escaping the characters the shell
/// still interprets inside them.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Delimiter of the `s` expression built by [`sed_replace_command`].
pub const SED_DELIMITER: char = '>';

/// Escape a sed operand placed inside a double-quoted `s>..>..>` expression.
///
/// `\`, `"`, `$` and backticks are escaped for the shell, which hands sed the
/// operand byte for byte; the delimiter is escaped for sed, so it can never
/// appear unescaped inside the operand.
pub fn escape_sed_operand(operand: &str) -> String {
    let mut escaped = String::with_capacity(operand.len());
    for c in operand.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') || c == SED_DELIMITER {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `sed -i "s>FIND>REPLACE>MODIFIERS" "FILE"`
pub fn sed_replace_command(find: &str, replace: &str, file: &str, modifiers: &str) -> String {
    format!(
        "sed -i \"s{d}{}{d}{}{d}{}\" {}",
        escape_sed_operand(find),
        escape_sed_operand(replace),
        modifiers,
        quote(file),
        d = SED_DELIMITER
    )
}

/// Escape an ini value for the replacement side of a single-quoted `s/../../`.
///
/// `\`, `&` and `/` are special to sed there; `'` would close the shell quote.
pub fn escape_ini_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '&' | '/' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\'' => escaped.push_str("'\\''"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Substitute `option`'s value, scoped to the lines of one `[section]`.
pub fn set_ini_command(section: &str, option: &str, value: &str, file: &str) -> String {
    format!(
        "sed -i -e '/^\\[{section}\\]/,/^\\[.*\\]/s/^\\({option}[ \\t]*=[ \\t]*\\).*$/\\1{}/' {}",
        escape_ini_value(value),
        quote(file)
    )
}
