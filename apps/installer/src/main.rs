//! Stack installer
//!
//! Runs deployment operations (packages, services, files, downloads) on the
//! local host, with command syntax picked for its distribution.

mod plan;
mod settings;

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deploy_core::command::{
    build_package_command, build_pms_command, build_service_action_command,
    build_service_config_command,
};
use deploy_core::{
    DeployConfig, InitSystem, OperationError, Operations, PackageAction, PackageManager,
    PmsAction, ServiceAction, ServiceConfigAction, ServiceManager, Severity,
};
use tracing_subscriber::EnvFilter;

use crate::plan::{Plan, StepStatus};
use crate::settings::Settings;

/// Stack installer - distribution-aware deployment operations
#[derive(Parser)]
#[command(name = "stack-installer")]
#[command(version)]
#[command(about = "Run deployment operations with distribution-aware command syntax", long_about = None)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deployment log file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Ask before aborting on errors instead of exiting
    #[arg(long, global = true)]
    interactive: bool,

    /// Echo command output on the terminal
    #[arg(long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Package manager
    #[arg(long, global = true, value_enum, ignore_case = true)]
    package_manager: Option<CliPackageManager>,

    /// Boot-time service manager
    #[arg(long, global = true, value_enum, ignore_case = true)]
    service_manager: Option<CliServiceManager>,

    /// Init system
    #[arg(long, global = true, value_enum, ignore_case = true)]
    init_system: Option<CliInitSystem>,

    /// Response to a failed operation
    #[arg(long, global = true, value_enum, ignore_case = true, default_value = "error")]
    severity: CliSeverity,

    /// Print the command of pms, package, service-config or service instead of running it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration as JSON
    Profile,
    /// Package manager maintenance
    Pms {
        #[arg(value_enum)]
        action: CliPmsAction,
    },
    /// Install, reinstall or uninstall packages
    Package {
        #[arg(value_enum)]
        action: CliPackageAction,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Enable or disable a service at boot
    ServiceConfig {
        #[arg(value_enum)]
        action: CliServiceConfigAction,
        service: String,
    },
    /// Control a running service
    Service {
        #[arg(value_enum)]
        action: CliServiceAction,
        service: String,
    },
    /// Run a raw shell command
    Exec { command: String },
    /// Download a file
    Download {
        url: String,

        /// Target directory (wget) or file (curl)
        #[arg(long)]
        dest: Option<String>,

        /// Use curl instead of wget
        #[arg(long)]
        curl: bool,

        /// Do not retry failed transfers
        #[arg(long)]
        no_retry: bool,
    },
    /// Find and replace within a file
    Replace {
        #[arg(long)]
        find: String,

        #[arg(long)]
        replace: String,

        #[arg(long)]
        file: String,

        /// sed modifiers, e.g. g
        #[arg(long, default_value = "")]
        modifiers: String,
    },
    /// Set an option within an ini file section
    SetIni {
        file: String,
        section: String,
        option: String,
        value: String,
    },
    /// Run a YAML deployment plan
    Run { plan: PathBuf },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliPackageManager {
    Apt,
    Yum,
}

impl From<CliPackageManager> for PackageManager {
    fn from(pm: CliPackageManager) -> Self {
        match pm {
            CliPackageManager::Apt => PackageManager::Apt,
            CliPackageManager::Yum => PackageManager::Yum,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliServiceManager {
    #[value(name = "update-rc.d")]
    UpdateRcD,
    Chkconfig,
    Systemd,
}

impl From<CliServiceManager> for ServiceManager {
    fn from(sm: CliServiceManager) -> Self {
        match sm {
            CliServiceManager::UpdateRcD => ServiceManager::UpdateRcD,
            CliServiceManager::Chkconfig => ServiceManager::Chkconfig,
            CliServiceManager::Systemd => ServiceManager::Systemd,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliInitSystem {
    #[value(name = "sysvinit")]
    SysVInit,
    Systemd,
}

impl From<CliInitSystem> for InitSystem {
    fn from(init: CliInitSystem) -> Self {
        match init {
            CliInitSystem::SysVInit => InitSystem::SysVInit,
            CliInitSystem::Systemd => InitSystem::Systemd,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliSeverity {
    Ignore,
    Notice,
    #[value(alias = "warn")]
    Warning,
    Error,
}

impl From<CliSeverity> for Severity {
    fn from(severity: CliSeverity) -> Self {
        match severity {
            CliSeverity::Ignore => Severity::Ignore,
            CliSeverity::Notice => Severity::Notice,
            CliSeverity::Warning => Severity::Warning,
            CliSeverity::Error => Severity::Error,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliPmsAction {
    Refresh,
    Clear,
    Upgrade,
}

impl From<CliPmsAction> for PmsAction {
    fn from(action: CliPmsAction) -> Self {
        match action {
            CliPmsAction::Refresh => PmsAction::Refresh,
            CliPmsAction::Clear => PmsAction::Clear,
            CliPmsAction::Upgrade => PmsAction::Upgrade,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliPackageAction {
    Install,
    Reinstall,
    Uninstall,
}

impl From<CliPackageAction> for PackageAction {
    fn from(action: CliPackageAction) -> Self {
        match action {
            CliPackageAction::Install => PackageAction::Install,
            CliPackageAction::Reinstall => PackageAction::Reinstall,
            CliPackageAction::Uninstall => PackageAction::Uninstall,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliServiceConfigAction {
    Enable,
    Disable,
}

impl From<CliServiceConfigAction> for ServiceConfigAction {
    fn from(action: CliServiceConfigAction) -> Self {
        match action {
            CliServiceConfigAction::Enable => ServiceConfigAction::Enable,
            CliServiceConfigAction::Disable => ServiceConfigAction::Disable,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
enum CliServiceAction {
    Status,
    Reload,
    Start,
    Restart,
    Stop,
}

impl From<CliServiceAction> for ServiceAction {
    fn from(action: CliServiceAction) -> Self {
        match action {
            CliServiceAction::Status => ServiceAction::Status,
            CliServiceAction::Reload => ServiceAction::Reload,
            CliServiceAction::Start => ServiceAction::Start,
            CliServiceAction::Restart => ServiceAction::Restart,
            CliServiceAction::Stop => ServiceAction::Stop,
        }
    }
}

impl Cli {
    fn resolve_config(&self) -> Result<DeployConfig> {
        let file = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        let flags = Settings {
            auto_deploy: self.interactive.then_some(false),
            verbose: self.verbose.then_some(true),
            log_file: self.log_file.clone(),
            package_manager: self.package_manager.map(Into::into),
            service_manager: self.service_manager.map(Into::into),
            init_system: self.init_system.map(Into::into),
        };
        Ok(file.merge(flags).resolve())
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if let Err(err) = run(cli) {
        let code = match err.downcast_ref::<OperationError>() {
            Some(op) => op.exit_code(),
            None => 1,
        };
        tracing::error!("{err:#}");
        process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.resolve_config()?;
    tracing::debug!(profile = %config.profile, log_file = %config.log_file.display(), "resolved configuration");

    if let Commands::Profile = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if cli.dry_run {
        if let Some(command) = preview(&config, &cli.command)? {
            println!("{command}");
            return Ok(());
        }
        anyhow::bail!("--dry-run only applies to pms, package, service-config and service");
    }

    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("not running as root; privileged operations will likely fail");
    }

    let mut ops = Operations::open(config.clone()).with_context(|| {
        format!("Failed to open deployment log {}", config.log_file.display())
    })?;
    let severity = Severity::from(cli.severity);

    let ok = match cli.command {
        Commands::Profile => true,
        Commands::Pms { action } => ops.pms_action(action.into(), severity)?,
        Commands::Package { action, packages } => {
            ops.package_action(action.into(), packages.as_slice(), severity)?
        }
        Commands::ServiceConfig { action, service } => {
            ops.service_config(action.into(), &service, severity)?
        }
        Commands::Service { action, service } => {
            ops.service_action(action.into(), &service, severity)?
        }
        Commands::Exec { command } => ops.exec(&command, severity)?,
        Commands::Download {
            url,
            dest,
            curl,
            no_retry,
        } => {
            if curl {
                ops.curl(&url, dest.as_deref(), !no_retry, severity)?
            } else {
                ops.wget(&url, dest.as_deref(), !no_retry, severity)?
            }
        }
        Commands::Replace {
            find,
            replace,
            file,
            modifiers,
        } => ops.sed(&find, &replace, &file, &modifiers, severity)?,
        Commands::SetIni {
            file,
            section,
            option,
            value,
        } => ops.set_ini(&section, &option, &value, &file, severity)?,
        Commands::Run { plan } => {
            let plan = Plan::load(&plan)?;
            let summary = plan::run_plan(&mut ops, &plan, severity)?;
            for step in &summary.steps {
                let mark = match step.status {
                    StepStatus::Ok => "ok",
                    StepStatus::Failed => "FAILED",
                };
                println!("{:>3}. [{mark:^6}] {} ({})", step.index + 1, step.label, step.severity);
            }
            summary.failed() == 0
        }
    };

    if !ok {
        tracing::warn!(log = %ops.log().location(), "completed with recoverable failures");
    }
    Ok(())
}

/// Render the command a package or service subcommand would run.
fn preview(config: &DeployConfig, command: &Commands) -> Result<Option<String>> {
    let profile = &config.profile;
    let rendered = match command {
        Commands::Pms { action } => build_pms_command(profile, (*action).into())?,
        Commands::Package { action, packages } => {
            build_package_command(profile, (*action).into(), packages.as_slice())?
        }
        Commands::ServiceConfig { action, service } => {
            build_service_config_command(profile, (*action).into(), service)?
        }
        Commands::Service { action, service } => {
            build_service_action_command(profile, (*action).into(), service)?
        }
        _ => return Ok(None),
    };
    Ok(Some(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::DeploymentMode;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stack-installer").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn flags_override_settings() {
        let cli = parse(&[
            "--interactive",
            "--package-manager",
            "apt",
            "--service-manager",
            "update-rc.d",
            "--init-system",
            "sysvinit",
            "--log-file",
            "/tmp/x.log",
            "profile",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.mode, DeploymentMode::INTERACTIVE);
        assert_eq!(config.profile.package_manager, PackageManager::Apt);
        assert_eq!(config.profile.service_manager, ServiceManager::UpdateRcD);
        assert_eq!(config.profile.init_system, InitSystem::SysVInit);
        assert_eq!(config.log_file, PathBuf::from("/tmp/x.log"));
    }

    #[test]
    fn settings_file_fills_unset_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deploy.yaml");
        std::fs::write(
            &path,
            "verbose: true\npackage_manager: yum\nservice_manager: chkconfig\ninit_system: sysvinit\n",
        )
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--init-system", "systemd", "profile"]);
        let config = cli.resolve_config().unwrap();

        assert!(config.verbose);
        assert_eq!(config.mode, DeploymentMode::UNATTENDED);
        assert_eq!(config.profile.package_manager, PackageManager::Yum);
        assert_eq!(config.profile.init_system, InitSystem::Systemd);
    }

    #[test]
    fn severity_flag_parses_names() {
        let cli = parse(&["exec", "true", "--severity", "warn"]);
        assert_eq!(Severity::from(cli.severity), Severity::Warning);
        let cli = parse(&["exec", "true", "--severity", "NOTICE"]);
        assert_eq!(Severity::from(cli.severity), Severity::Notice);
        assert_eq!(Severity::from(parse(&["exec", "true"]).severity), Severity::Error);
    }

    #[test]
    fn preview_renders_package_commands() {
        let cli = parse(&[
            "--package-manager",
            "yum",
            "--service-manager",
            "systemd",
            "--init-system",
            "systemd",
            "package",
            "uninstall",
            "httpd",
            "mod_ssl",
        ]);
        let config = cli.resolve_config().unwrap();

        let command = preview(&config, &cli.command).unwrap();
        assert_eq!(command.as_deref(), Some("yum remove -y httpd mod_ssl"));
    }

    #[test]
    fn preview_reports_unsupported_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deploy.yaml");
        std::fs::write(
            &path,
            "package_manager: pacman\nservice_manager: systemd\ninit_system: systemd\n",
        )
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "pms", "refresh"]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.profile.package_manager, PackageManager::Unknown);
        assert!(preview(&config, &cli.command).is_err());
    }

    #[test]
    fn unknown_cli_values_list_the_choices() {
        let err = Cli::try_parse_from(["stack-installer", "--package-manager", "pacman", "profile"])
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("apt"));
        assert!(message.contains("yum"));

        assert!(Cli::try_parse_from(["stack-installer", "service", "bounce", "nginx"]).is_err());
    }

    #[test]
    fn cli_values_use_facet_identifiers() {
        let cli = parse(&[
            "--service-manager",
            "update-rc.d",
            "--init-system",
            "sysvinit",
            "service",
            "restart",
            "nginx",
        ]);
        assert_eq!(cli.service_manager, Some(CliServiceManager::UpdateRcD));
        assert_eq!(cli.init_system, Some(CliInitSystem::SysVInit));
        assert!(matches!(
            cli.command,
            Commands::Service {
                action: CliServiceAction::Restart,
                ..
            }
        ));
    }

    #[test]
    fn preview_skips_file_operations() {
        let cli = parse(&["exec", "ls"]);
        let config = DeployConfig::default();
        assert_eq!(preview(&config, &cli.command).unwrap(), None);
    }

    #[test]
    fn package_requires_names() {
        assert!(Cli::try_parse_from(["stack-installer", "package", "install"]).is_err());
    }
}
