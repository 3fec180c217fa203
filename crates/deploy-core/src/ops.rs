//! Named deployment operations.
//!
//! Each operation renders a command, runs it, and hands the exit status to the
//! error policy with the operation's fixed code and the caller's severity:
//!
//! * `Ok(true)` the operation succeeded
//! * `Ok(false)` it failed and the deployment goes on
//! * `Err(_)` the deployment must stop with [`OperationError::exit_code`]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::{
    build_package_command, build_pms_command, build_service_action_command,
    build_service_config_command, quote, sed_replace_command, set_ini_command, BuildError,
    PackageAction, PmsAction, ServiceAction, ServiceConfigAction,
};
use crate::config::DeployConfig;
use crate::error::OperationError;
use crate::exec::{CommandExecutor, Runner, ShellRunner};
use crate::log::{FileLog, LogSink};
use crate::policy::{CommandStatus, ErrorPolicy, OperationCode, Outcome, Severity};
use crate::profile::DistroProfile;
use crate::prompt::{Prompt, StdinPrompt};

/// Retry count baked into download commands.
pub const DOWNLOAD_RETRIES: u32 = 3;

pub type OpResult = Result<bool, OperationError>;

pub struct Operations {
    config: DeployConfig,
    executor: CommandExecutor,
    policy: ErrorPolicy,
    log: Arc<dyn LogSink>,
    working_dir: PathBuf,
}

impl Operations {
    pub fn new(
        config: DeployConfig,
        runner: Box<dyn Runner>,
        log: Arc<dyn LogSink>,
        prompt: Box<dyn Prompt>,
    ) -> Self {
        log.set_verbose(config.verbose);
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            executor: CommandExecutor::new(runner, log.clone()),
            policy: ErrorPolicy::new(config.mode, log.clone(), prompt),
            config,
            log,
            working_dir,
        }
    }

    /// Production wiring: `sh` subprocesses, the configured log file and stdin prompts.
    pub fn open(config: DeployConfig) -> io::Result<Self> {
        let log = Arc::new(FileLog::open(&config.log_file, config.verbose)?);
        Ok(Self::new(
            config,
            Box::new(ShellRunner),
            log,
            Box::new(StdinPrompt),
        ))
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn profile(&self) -> &DistroProfile {
        &self.config.profile
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.log
    }

    /// Echo command output on the terminal.
    pub fn verbose(&self) {
        self.log.set_verbose(true);
    }

    /// Stop echoing command output; the log file still receives everything.
    pub fn silent(&self) {
        self.log.set_verbose(false);
    }

    fn conclude(&self, outcome: Outcome, command: impl Into<String>) -> OpResult {
        match outcome {
            Outcome::Success => Ok(true),
            Outcome::RecoverableFailure => Ok(false),
            Outcome::FatalFailure { code } => Err(OperationError::Fatal {
                code,
                command: command.into(),
            }),
        }
    }

    fn evaluate(
        &self,
        status: impl Into<CommandStatus>,
        code: OperationCode,
        severity: Severity,
        command: impl Into<String>,
    ) -> OpResult {
        let outcome = self.policy.evaluate(status, code, severity);
        self.conclude(outcome, command)
    }

    fn execute(&self, command: String, code: OperationCode, severity: Severity) -> OpResult {
        let result = self.executor.run(&command, &self.working_dir);
        self.evaluate(result.exit_status, code, severity, command)
    }

    // A command that cannot be built is always fatal: running nothing would
    // silently skip the step.
    fn built(
        &self,
        code: OperationCode,
        built: Result<String, BuildError>,
    ) -> Result<String, OperationError> {
        built.map_err(|source| {
            self.log.report(Severity::Error, &source.to_string());
            OperationError::Unsupported { code, source }
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.working_dir.join(path)
    }

    /// Run a raw shell command.
    pub fn exec(&self, command: &str, severity: Severity) -> OpResult {
        self.execute(command.to_string(), OperationCode::Exec, severity)
    }

    /// Change the directory later commands run in.
    ///
    /// Only this facade's working directory changes, never the process's.
    pub fn chdir(&mut self, dir: &str, severity: Severity) -> OpResult {
        let command = format!("cd {dir}");
        self.log.command(&command);

        let target = fs::canonicalize(self.resolve(dir)).ok().filter(|p| p.is_dir());
        let changed = target.is_some();
        if let Some(target) = target {
            tracing::debug!(dir = %target.display(), "changed working directory");
            self.working_dir = target;
        }

        self.evaluate(changed, OperationCode::Chdir, severity, command)
    }

    /// Find and replace in `file` with `sed -i`.
    pub fn sed(
        &self,
        find: &str,
        replace: &str,
        file: &str,
        modifiers: &str,
        severity: Severity,
    ) -> OpResult {
        let command = sed_replace_command(find, replace, file, modifiers);
        self.execute(command, OperationCode::Sed, severity)
    }

    /// Append `data` to `file`, creating it when missing.
    pub fn append(&self, data: &str, file: &str, severity: Severity) -> OpResult {
        self.log.command("Append: ");
        self.log.command(data);
        self.log.command(file);

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(file))
            .and_then(|mut f| f.write_all(data.as_bytes()));
        if let Err(err) = &written {
            self.log.output(&format!("append to {file} failed: {err}"));
        }

        self.evaluate(
            written.is_ok(),
            OperationCode::Append,
            severity,
            format!("append to {file}"),
        )
    }

    /// Set `option` within `[section]` of an ini file.
    pub fn set_ini(
        &self,
        section: &str,
        option: &str,
        value: &str,
        file: &str,
        severity: Severity,
    ) -> OpResult {
        for line in [section, option, value, file] {
            self.log.command(line);
        }
        let command = set_ini_command(section, option, value, file);
        self.execute(command, OperationCode::SetIni, severity)
    }

    pub fn mkdir(&self, path: &str, severity: Severity) -> OpResult {
        self.execute(format!("mkdir -p {}", quote(path)), OperationCode::Mkdir, severity)
    }

    /// Remove a path; a path holding `*` is left unquoted for the shell to expand.
    pub fn rm(&self, path: &str, recursive: bool, severity: Severity) -> OpResult {
        let mut command = String::from("rm -f");
        if recursive {
            command.push_str(" -R");
        }
        command.push(' ');
        command.push_str(&glob_or_quote(path));
        self.execute(command, OperationCode::Rm, severity)
    }

    pub fn chown(&self, path: &str, owner: &str, recursive: bool, severity: Severity) -> OpResult {
        self.execute(
            ownership_command("chown", owner, path, recursive),
            OperationCode::Chown,
            severity,
        )
    }

    pub fn chgrp(&self, path: &str, group: &str, recursive: bool, severity: Severity) -> OpResult {
        self.execute(
            ownership_command("chgrp", group, path, recursive),
            OperationCode::Chgrp,
            severity,
        )
    }

    /// `mode` is octal or symbolic.
    pub fn chmod(&self, path: &str, mode: &str, recursive: bool, severity: Severity) -> OpResult {
        self.execute(
            ownership_command("chmod", mode, path, recursive),
            OperationCode::Chmod,
            severity,
        )
    }

    pub fn ln(&self, src: &str, dest: Option<&str>, severity: Severity) -> OpResult {
        let mut command = format!("ln -sf {}", quote(src));
        if let Some(dest) = dest.filter(|d| !d.is_empty()) {
            command.push(' ');
            command.push_str(&quote(dest));
        }
        self.execute(command, OperationCode::Ln, severity)
    }

    pub fn cp(&self, src: &str, dest: &str, recursive: bool, severity: Severity) -> OpResult {
        let mut command = String::from("cp -af");
        if recursive {
            command.push_str(" -R");
        }
        command.push_str(&format!(" {} {}", glob_or_quote(src), quote(dest)));
        self.execute(command, OperationCode::Cp, severity)
    }

    /// Move `src` to `dest`; a bare `*` moves everything in the working directory.
    pub fn mv(&self, src: &str, dest: &str, severity: Severity) -> OpResult {
        let src = if src == "*" { src.to_string() } else { quote(src) };
        self.execute(
            format!("mv -f {} {}", src, quote(dest)),
            OperationCode::Mv,
            severity,
        )
    }

    pub fn unzip(&self, archive: &str, dest: Option<&str>, severity: Severity) -> OpResult {
        let mut command = format!("unzip -o {}", quote(archive));
        if let Some(dest) = dest.filter(|d| !d.is_empty()) {
            command.push_str(&format!(" -d {}", quote(dest)));
        }
        self.execute(command, OperationCode::Unzip, severity)
    }

    /// Download `url` into directory `dest` with wget.
    pub fn wget(&self, url: &str, dest: Option<&str>, retry: bool, severity: Severity) -> OpResult {
        self.execute(wget_command(url, dest, retry), OperationCode::Wget, severity)
    }

    /// Download `url` into file `dest` with curl.
    pub fn curl(&self, url: &str, dest: Option<&str>, retry: bool, severity: Severity) -> OpResult {
        self.execute(curl_command(url, dest, retry), OperationCode::Curl, severity)
    }

    pub fn pms_action(&self, action: PmsAction, severity: Severity) -> OpResult {
        let code = OperationCode::PmsAction;
        let command = self.built(code, build_pms_command(self.profile(), action))?;
        self.execute(command, code, severity)
    }

    pub fn package_action<S: AsRef<str>>(
        &self,
        action: PackageAction,
        packages: &[S],
        severity: Severity,
    ) -> OpResult {
        let code = OperationCode::PackageAction;
        let command = self.built(code, build_package_command(self.profile(), action, packages))?;
        self.execute(command, code, severity)
    }

    pub fn service_config(
        &self,
        action: ServiceConfigAction,
        service: &str,
        severity: Severity,
    ) -> OpResult {
        let code = OperationCode::ServiceConfig;
        let command = self.built(
            code,
            build_service_config_command(self.profile(), action, service),
        )?;
        self.execute(command, code, severity)
    }

    pub fn service_action(
        &self,
        action: ServiceAction,
        service: &str,
        severity: Severity,
    ) -> OpResult {
        let code = OperationCode::ServiceAction;
        let command = self.built(
            code,
            build_service_action_command(self.profile(), action, service),
        )?;
        self.execute(command, code, severity)
    }
}

fn glob_or_quote(path: &str) -> String {
    if path.contains('*') {
        path.to_string()
    } else {
        quote(path)
    }
}

fn ownership_command(tool: &str, value: &str, path: &str, recursive: bool) -> String {
    let mut command = String::from(tool);
    if recursive {
        command.push_str(" -R");
    }
    command.push_str(&format!(" {} {}", quote(value), quote(path)));
    command
}

/// `wget -q --timestamping [--tries=3] [--directory-prefix="DIR"] "URL"`
pub fn wget_command(url: &str, dest: Option<&str>, retry: bool) -> String {
    let mut command = String::from("wget -q --timestamping");
    if retry {
        command.push_str(&format!(" --tries={DOWNLOAD_RETRIES}"));
    }
    if let Some(dest) = dest.filter(|d| !d.is_empty()) {
        command.push_str(&format!(" --directory-prefix={}", quote(dest)));
    }
    command.push(' ');
    command.push_str(&quote(url));
    command
}

/// `curl -s [--retry 3] [--output "FILE"] "URL"`
pub fn curl_command(url: &str, dest: Option<&str>, retry: bool) -> String {
    let mut command = String::from("curl -s");
    if retry {
        command.push_str(&format!(" --retry {DOWNLOAD_RETRIES}"));
    }
    if let Some(dest) = dest.filter(|d| !d.is_empty()) {
        command.push_str(&format!(" --output {}", quote(dest)));
    }
    command.push(' ');
    command.push_str(&quote(url));
    command
}
