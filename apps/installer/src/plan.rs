//! YAML deployment plans.
//!
//! A plan is an ordered list of steps, each one facade operation:
//!
//! ```yaml
//! severity: warning          # default for steps without their own
//! steps:
//!   - op: pms
//!     action: refresh
//!   - op: package
//!     action: install
//!     packages: [nginx, php-fpm]
//!     severity: error
//!   - op: wget
//!     url: https://example.org/osf.zip
//!     dest: /tmp
//!   - op: service
//!     action: restart
//!     service: nginx
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use deploy_core::{
    OpResult, OperationCode, OperationError, Operations, PackageAction, PmsAction, ServiceAction,
    ServiceConfigAction, Severity,
};
use serde::{Deserialize, Deserializer};

fn yes() -> bool {
    true
}

/// Accepts `mode: 755` and `owner: 1000` as well as quoted strings.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(u64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Number(number) => number.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Exec {
        command: String,
    },
    Chdir {
        dir: String,
    },
    Sed {
        find: String,
        replace: String,
        file: String,
        #[serde(default)]
        modifiers: String,
    },
    Append {
        data: String,
        file: String,
    },
    SetIni {
        section: String,
        option: String,
        value: String,
        file: String,
    },
    Mkdir {
        path: String,
    },
    Rm {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
    Chown {
        path: String,
        #[serde(deserialize_with = "scalar_string")]
        owner: String,
        #[serde(default)]
        recursive: bool,
    },
    Chgrp {
        path: String,
        #[serde(deserialize_with = "scalar_string")]
        group: String,
        #[serde(default)]
        recursive: bool,
    },
    Chmod {
        path: String,
        #[serde(deserialize_with = "scalar_string")]
        mode: String,
        #[serde(default)]
        recursive: bool,
    },
    Ln {
        src: String,
        dest: Option<String>,
    },
    Cp {
        src: String,
        dest: String,
        #[serde(default)]
        recursive: bool,
    },
    Mv {
        src: String,
        dest: String,
    },
    Unzip {
        archive: String,
        dest: Option<String>,
    },
    Wget {
        url: String,
        dest: Option<String>,
        #[serde(default = "yes")]
        retry: bool,
    },
    Curl {
        url: String,
        dest: Option<String>,
        #[serde(default = "yes")]
        retry: bool,
    },
    Pms {
        action: PmsAction,
    },
    Package {
        action: PackageAction,
        packages: Vec<String>,
    },
    ServiceConfig {
        action: ServiceConfigAction,
        service: String,
    },
    Service {
        action: ServiceAction,
        service: String,
    },
}

impl Step {
    pub fn code(&self) -> OperationCode {
        match self {
            Step::Exec { .. } => OperationCode::Exec,
            Step::Chdir { .. } => OperationCode::Chdir,
            Step::Sed { .. } => OperationCode::Sed,
            Step::Append { .. } => OperationCode::Append,
            Step::SetIni { .. } => OperationCode::SetIni,
            Step::Mkdir { .. } => OperationCode::Mkdir,
            Step::Rm { .. } => OperationCode::Rm,
            Step::Chown { .. } => OperationCode::Chown,
            Step::Chgrp { .. } => OperationCode::Chgrp,
            Step::Chmod { .. } => OperationCode::Chmod,
            Step::Ln { .. } => OperationCode::Ln,
            Step::Cp { .. } => OperationCode::Cp,
            Step::Mv { .. } => OperationCode::Mv,
            Step::Unzip { .. } => OperationCode::Unzip,
            Step::Wget { .. } => OperationCode::Wget,
            Step::Curl { .. } => OperationCode::Curl,
            Step::Pms { .. } => OperationCode::PmsAction,
            Step::Package { .. } => OperationCode::PackageAction,
            Step::ServiceConfig { .. } => OperationCode::ServiceConfig,
            Step::Service { .. } => OperationCode::ServiceAction,
        }
    }

    /// Short human label for summaries.
    pub fn describe(&self) -> String {
        let name = self.code().name();
        match self {
            Step::Exec { command } => format!("{name} {command}"),
            Step::Chdir { dir } => format!("{name} {dir}"),
            Step::Sed { file, .. } | Step::Append { file, .. } => format!("{name} {file}"),
            Step::SetIni {
                section,
                option,
                file,
                ..
            } => format!("{name} [{section}] {option} in {file}"),
            Step::Mkdir { path }
            | Step::Rm { path, .. }
            | Step::Chown { path, .. }
            | Step::Chgrp { path, .. }
            | Step::Chmod { path, .. } => format!("{name} {path}"),
            Step::Ln { src, .. } | Step::Cp { src, .. } | Step::Mv { src, .. } => {
                format!("{name} {src}")
            }
            Step::Unzip { archive, .. } => format!("{name} {archive}"),
            Step::Wget { url, .. } | Step::Curl { url, .. } => format!("{name} {url}"),
            Step::Pms { action } => format!("{name} {}", action.name()),
            Step::Package { action, packages } => {
                format!("{name} {} {}", action.name(), packages.join(" "))
            }
            Step::ServiceConfig { action, service } => {
                format!("{name} {} {service}", action.name())
            }
            Step::Service { action, service } => format!("{name} {} {service}", action.name()),
        }
    }

    pub fn run(&self, ops: &mut Operations, severity: Severity) -> OpResult {
        match self {
            Step::Exec { command } => ops.exec(command, severity),
            Step::Chdir { dir } => ops.chdir(dir, severity),
            Step::Sed {
                find,
                replace,
                file,
                modifiers,
            } => ops.sed(find, replace, file, modifiers, severity),
            Step::Append { data, file } => ops.append(data, file, severity),
            Step::SetIni {
                section,
                option,
                value,
                file,
            } => ops.set_ini(section, option, value, file, severity),
            Step::Mkdir { path } => ops.mkdir(path, severity),
            Step::Rm { path, recursive } => ops.rm(path, *recursive, severity),
            Step::Chown {
                path,
                owner,
                recursive,
            } => ops.chown(path, owner, *recursive, severity),
            Step::Chgrp {
                path,
                group,
                recursive,
            } => ops.chgrp(path, group, *recursive, severity),
            Step::Chmod {
                path,
                mode,
                recursive,
            } => ops.chmod(path, mode, *recursive, severity),
            Step::Ln { src, dest } => ops.ln(src, dest.as_deref(), severity),
            Step::Cp {
                src,
                dest,
                recursive,
            } => ops.cp(src, dest, *recursive, severity),
            Step::Mv { src, dest } => ops.mv(src, dest, severity),
            Step::Unzip { archive, dest } => ops.unzip(archive, dest.as_deref(), severity),
            Step::Wget { url, dest, retry } => ops.wget(url, dest.as_deref(), *retry, severity),
            Step::Curl { url, dest, retry } => ops.curl(url, dest.as_deref(), *retry, severity),
            Step::Pms { action } => ops.pms_action(*action, severity),
            Step::Package { action, packages } => {
                ops.package_action(*action, packages.as_slice(), severity)
            }
            Step::ServiceConfig { action, service } => ops.service_config(*action, service, severity),
            Step::Service { action, service } => ops.service_action(*action, service, severity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanStep {
    #[serde(flatten)]
    pub step: Step,
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Plan {
    pub severity: Option<Severity>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid plan {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub label: String,
    pub severity: Severity,
    pub status: StepStatus,
}

/// Outcome of a plan that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub steps: Vec<StepReport>,
}

impl PlanSummary {
    pub fn failed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }
}

/// Run every step in order; a fatal step stops the plan.
///
/// Step severity falls back to the plan's, then to `default_severity`.
pub fn run_plan(
    ops: &mut Operations,
    plan: &Plan,
    default_severity: Severity,
) -> Result<PlanSummary, OperationError> {
    let mut summary = PlanSummary::default();
    let total = plan.steps.len();

    for (index, planned) in plan.steps.iter().enumerate() {
        let severity = planned
            .severity
            .or(plan.severity)
            .unwrap_or(default_severity);
        let label = planned.step.describe();
        tracing::info!(step = index + 1, total, %severity, "{label}");

        let status = match planned.step.run(ops, severity) {
            Ok(true) => StepStatus::Ok,
            Ok(false) => StepStatus::Failed,
            Err(err) => {
                tracing::error!(step = index + 1, total, "{label}: {err}");
                return Err(err);
            }
        };

        summary.steps.push(StepReport {
            index,
            label,
            severity,
            status,
        });
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;
    use std::sync::Arc;

    use deploy_core::exec::Runner;
    use deploy_core::log::MemoryLog;
    use deploy_core::prompt::ScriptedPrompt;
    use deploy_core::{DeployConfig, DistroProfile, InitSystem, PackageManager, ServiceManager};

    use super::*;

    #[derive(Clone, Default)]
    struct FakeRunner {
        statuses: Rc<RefCell<VecDeque<i32>>>,
        commands: Rc<RefCell<Vec<String>>>,
    }

    impl Runner for FakeRunner {
        fn run(
            &self,
            command: &str,
            _cwd: &Path,
            _on_line: &mut dyn FnMut(&str),
        ) -> io::Result<i32> {
            self.commands.borrow_mut().push(command.to_string());
            Ok(self.statuses.borrow_mut().pop_front().unwrap_or(0))
        }
    }

    fn operations(statuses: &[i32]) -> (Operations, FakeRunner) {
        let runner = FakeRunner::default();
        runner.statuses.borrow_mut().extend(statuses);
        let profile = DistroProfile::new(
            PackageManager::Yum,
            ServiceManager::Chkconfig,
            InitSystem::SysVInit,
        );
        let ops = Operations::new(
            DeployConfig::new(profile),
            Box::new(runner.clone()),
            Arc::new(MemoryLog::new()),
            Box::new(ScriptedPrompt::new(Vec::<String>::new())),
        );
        (ops, runner)
    }

    const PLAN: &str = r#"
severity: warning
steps:
  - op: pms
    action: refresh
  - op: package
    action: install
    packages: [httpd, php]
    severity: error
  - op: wget
    url: https://example.org/osf.zip
    dest: /tmp
  - op: service-config
    action: enable
    service: httpd
  - op: service
    action: start
    service: httpd
"#;

    #[test]
    fn parses_steps_and_defaults() {
        let plan = Plan::parse(PLAN).unwrap();

        assert_eq!(plan.severity, Some(Severity::Warning));
        assert_eq!(plan.steps.len(), 5);
        assert_eq!(plan.steps[1].severity, Some(Severity::Error));
        assert_eq!(
            plan.steps[2].step,
            Step::Wget {
                url: "https://example.org/osf.zip".into(),
                dest: Some("/tmp".into()),
                retry: true,
            }
        );
        assert_eq!(plan.steps[4].step.code(), OperationCode::ServiceAction);
    }

    #[test]
    fn runs_steps_in_order() {
        let plan = Plan::parse(PLAN).unwrap();
        let (mut ops, runner) = operations(&[]);

        let summary = run_plan(&mut ops, &plan, Severity::Error).unwrap();

        assert_eq!(summary.failed(), 0);
        assert_eq!(
            *runner.commands.borrow(),
            vec![
                "yum makecache",
                "yum install -y httpd php",
                "wget -q --timestamping --tries=3 --directory-prefix=\"/tmp\" \"https://example.org/osf.zip\"",
                "chkconfig httpd on",
                "service httpd start",
            ]
        );
    }

    #[test]
    fn recoverable_failures_are_summarised() {
        let plan = Plan::parse(PLAN).unwrap();
        let (mut ops, _) = operations(&[1]);

        let summary = run_plan(&mut ops, &plan, Severity::Error).unwrap();

        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.steps[0].status, StepStatus::Failed);
        assert_eq!(summary.steps[0].severity, Severity::Warning);
        assert_eq!(summary.steps.len(), 5);
    }

    #[test]
    fn fatal_step_stops_the_plan() {
        let plan = Plan::parse(PLAN).unwrap();
        let (mut ops, runner) = operations(&[0, 1]);

        let err = run_plan(&mut ops, &plan, Severity::Error).unwrap_err();

        assert_eq!(err.exit_code(), 19);
        assert_eq!(runner.commands.borrow().len(), 2);
    }

    #[test]
    fn step_severity_falls_back_to_caller_default() {
        let plan = Plan::parse("steps:\n  - op: exec\n    command: 'false'\n").unwrap();
        let (mut ops, _) = operations(&[1]);

        let summary = run_plan(&mut ops, &plan, Severity::Ignore).unwrap();
        assert_eq!(summary.steps[0].severity, Severity::Ignore);
        assert_eq!(summary.failed(), 1);
    }

    #[test]
    fn numeric_modes_and_ids_stay_literal() {
        let plan = Plan::parse(
            r#"
steps:
  - op: chmod
    path: /opt/osf/bin
    mode: 755
    recursive: true
  - op: chmod
    path: /opt/osf/run.sh
    mode: "0750"
  - op: chmod
    path: /opt/osf/run.sh
    mode: u+x
  - op: chown
    path: /opt/osf
    owner: 1000
  - op: chgrp
    path: /opt/osf
    group: 48
"#,
        )
        .unwrap();
        let (mut ops, runner) = operations(&[]);

        run_plan(&mut ops, &plan, Severity::Error).unwrap();

        assert_eq!(
            *runner.commands.borrow(),
            vec![
                "chmod -R \"755\" \"/opt/osf/bin\"",
                "chmod \"0750\" \"/opt/osf/run.sh\"",
                "chmod \"u+x\" \"/opt/osf/run.sh\"",
                "chown \"1000\" \"/opt/osf\"",
                "chgrp \"48\" \"/opt/osf\"",
            ]
        );
    }

    #[test]
    fn rejects_non_scalar_modes() {
        assert!(Plan::parse("steps:\n  - op: chmod\n    path: /opt\n    mode: [7, 5, 5]\n").is_err());
    }

    #[test]
    fn rejects_unknown_operations() {
        assert!(Plan::parse("steps:\n  - op: reboot\n").is_err());
    }

    #[test]
    fn describes_steps() {
        let step = Step::Package {
            action: PackageAction::Uninstall,
            packages: vec!["a".into(), "b".into()],
        };
        assert_eq!(step.describe(), "packageAction uninstall a b");
    }
}
