//! `kube-beacon doctor`: diagnose configuration and cluster access.

use std::path::Path;

use anyhow::{Result, bail};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::Client;
use kube::api::{Api, ListParams};
use serde::Serialize;

use kube_beacon::backend;
use kube_beacon::build_info;
use kube_beacon::cluster::{namespace_label, scoped_api};
use kube_beacon::config::{Config, ConfigError, WatchScope};
use kube_beacon::integrations::{self, Integration};
use kube_beacon::scope::GlobalScope;

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: CheckStatus,
    message: String,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Ok,
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Section {
    name: String,
    checks: Vec<CheckResult>,
}

impl Section {
    fn new(name: &str, checks: Vec<CheckResult>) -> Self {
        Self {
            name: name.to_string(),
            checks,
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    ok: usize,
    warn: usize,
    error: usize,
}

#[derive(Debug, Serialize)]
struct Report {
    status: CheckStatus,
    version: String,
    sections: Vec<Section>,
    summary: Summary,
}

impl Report {
    fn from_sections(sections: Vec<Section>) -> Self {
        let mut ok = 0;
        let mut warn = 0;
        let mut error = 0;
        for check in sections.iter().flat_map(|s| &s.checks) {
            match check.status {
                CheckStatus::Ok => ok += 1,
                CheckStatus::Warn => warn += 1,
                CheckStatus::Error => error += 1,
            }
        }
        let status = if error > 0 {
            CheckStatus::Error
        } else if warn > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Ok
        };
        Report {
            status,
            version: build_info::version_string(),
            sections,
            summary: Summary { ok, warn, error },
        }
    }

    fn render(&self, format: &str) -> Result<()> {
        match format {
            "json" => {
                println!("{}", serde_json::to_string_pretty(self)?);
            }
            _ => self.render_text(),
        }
        Ok(())
    }

    fn render_text(&self) {
        println!("kube-beacon doctor");
        println!("{}", "=".repeat(50));
        println!("{}", self.version);

        for section in &self.sections {
            if section.checks.is_empty() {
                continue;
            }
            println!();
            println!("{}", section.name);
            println!("{}", "-".repeat(section.name.len()));
            for check in &section.checks {
                let label = match check.status {
                    CheckStatus::Ok => "  OK   ",
                    CheckStatus::Warn => "  WARN ",
                    CheckStatus::Error => "  ERROR",
                };
                println!("{} {}", label, check.message);
            }
        }

        println!();
        let status_label = match self.status {
            CheckStatus::Ok => "PASS",
            CheckStatus::Warn => "PASS (with warnings)",
            CheckStatus::Error => "FAIL",
        };
        println!(
            "{}: {} ok, {} warning(s), {} error(s)",
            status_label, self.summary.ok, self.summary.warn, self.summary.error,
        );
    }
}

// ============================================================================
// Entry Point
// ============================================================================

pub async fn run(config_path: &str, format: &str) -> Result<()> {
    let mut sections = Vec::new();

    if let Some((config, scope)) = check_config(&mut sections, config_path).await {
        check_cluster(&mut sections, &config, &scope).await;
        check_backend(&mut sections, &config);
        check_integrations(&mut sections, &config).await;
    }

    let report = Report::from_sections(sections);
    report.render(format)?;

    if report.summary.error > 0 {
        bail!("{} error(s) found", report.summary.error);
    }
    Ok(())
}

// ============================================================================
// Check: Configuration
// ============================================================================

async fn check_config(
    sections: &mut Vec<Section>,
    config_path: &str,
) -> Option<(Config, WatchScope)> {
    let mut checks = Vec::new();

    if Path::new(config_path).exists() {
        checks.push(CheckResult::ok(format!("Config file '{config_path}' found")));
    } else {
        checks.push(CheckResult::warn(format!(
            "Config file '{config_path}' not found, using defaults"
        )));
    }

    let mut config = match Config::load(config_path).await {
        Ok(c) => c,
        Err(e) => {
            let message = match &e {
                ConfigError::Yaml(_) => format!("Invalid YAML: {e}"),
                ConfigError::MissingEnvVar(var) => {
                    format!("Environment variable '{var}' is not set")
                }
                _ => format!("Failed to load config: {e}"),
            };
            checks.push(CheckResult::error(message));
            sections.push(Section::new("Configuration", checks));
            return None;
        }
    };
    config.apply_env();

    let scope = match config.watch_scope() {
        Ok(scope) => {
            checks.push(CheckResult::ok(format!("Watching namespaces: {scope}")));
            scope
        }
        Err(e) => {
            checks.push(CheckResult::error(format!("Invalid watch namespaces: {e}")));
            sections.push(Section::new("Configuration", checks));
            return None;
        }
    };

    if config.watch.historical {
        checks.push(CheckResult::warn(
            "Historical mode is on; retained events will be reported again",
        ));
    }
    if !config.watch.pods {
        checks.push(CheckResult::warn(
            "Pod watch disabled; failed containers are only seen through events",
        ));
    }
    if config.watch.breadcrumb_limit == 0 {
        checks.push(CheckResult::warn("Breadcrumbs are disabled (breadcrumb_limit: 0)"));
    }

    if config.monitors.enabled {
        checks.push(CheckResult::ok(format!(
            "CronJob monitors enabled (max runtime {}m, check-in margin {}m)",
            config.monitors.max_runtime_minutes, config.monitors.checkin_margin_minutes
        )));
    } else {
        checks.push(CheckResult::warn("CronJob monitors disabled"));
    }

    sections.push(Section::new("Configuration", checks));
    Some((config, scope))
}

// ============================================================================
// Check: Cluster
// ============================================================================

async fn check_cluster(sections: &mut Vec<Section>, config: &Config, scope: &WatchScope) {
    let mut checks = Vec::new();

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            checks.push(CheckResult::error(format!(
                "Cannot create Kubernetes client: {e}"
            )));
            sections.push(Section::new("Cluster", checks));
            return;
        }
    };

    match client.apiserver_version().await {
        Ok(info) => checks.push(CheckResult::ok(format!(
            "Connected to API server ({})",
            info.git_version
        ))),
        Err(e) => {
            checks.push(CheckResult::error(format!("Cannot reach API server: {e}")));
            sections.push(Section::new("Cluster", checks));
            return;
        }
    }

    let first_page = ListParams::default().limit(1);
    for namespace in scope.namespaces() {
        let label = namespace_label(&namespace);

        let events: Api<Event> = scoped_api(client.clone(), &namespace);
        match events.list_metadata(&first_page).await {
            Ok(_) => checks.push(CheckResult::ok(format!("Can list events in {label}"))),
            Err(e) => checks.push(CheckResult::error(format!(
                "Cannot list events in {label}: {e}"
            ))),
        }

        if config.watch.pods {
            let pods: Api<Pod> = scoped_api(client.clone(), &namespace);
            match pods.list_metadata(&first_page).await {
                Ok(_) => checks.push(CheckResult::ok(format!("Can list Pods in {label}"))),
                Err(e) => checks.push(CheckResult::error(format!(
                    "Cannot list Pods in {label}: {e}"
                ))),
            }
        }

        if config.monitors.enabled {
            let cronjobs: Api<CronJob> = scoped_api(client.clone(), &namespace);
            match cronjobs.list_metadata(&first_page).await {
                Ok(_) => checks.push(CheckResult::ok(format!("Can list CronJobs in {label}"))),
                Err(e) => checks.push(CheckResult::error(format!(
                    "Cannot list CronJobs in {label}: {e}"
                ))),
            }
        }
    }

    sections.push(Section::new("Cluster", checks));
}

// ============================================================================
// Check: Backend
// ============================================================================

fn check_backend(sections: &mut Vec<Section>, config: &Config) {
    let check = match backend::from_config(&config.backend) {
        Ok(b) if b.name() == "log" => {
            CheckResult::warn("No backend URL configured; alerts and check-ins are only logged")
        }
        Ok(b) => {
            let mut message = format!("Using {} backend", b.name());
            if config.backend.token.is_none() {
                message.push_str(" without a token");
            }
            CheckResult::ok(message)
        }
        Err(e) => CheckResult::error(format!("Invalid backend configuration: {e}")),
    };
    sections.push(Section::new("Backend", vec![check]));
}

// ============================================================================
// Check: Integrations
// ============================================================================

async fn check_integrations(sections: &mut Vec<Section>, config: &Config) {
    let mut checks = Vec::new();

    let enabled: Vec<_> = Integration::ALL
        .into_iter()
        .filter(|i| i.is_enabled(&config.integrations))
        .collect();
    if enabled.is_empty() {
        sections.push(Section::new("Integrations", checks));
        return;
    }

    let http = match integrations::http_client() {
        Ok(http) => http,
        Err(e) => {
            checks.push(CheckResult::error(format!("Cannot build HTTP client: {e}")));
            sections.push(Section::new("Integrations", checks));
            return;
        }
    };

    for integration in enabled {
        let mut scope = GlobalScope::default();
        match integration.apply(&http, &mut scope).await {
            Ok(()) => checks.push(CheckResult::ok(format!(
                "Integration '{}' resolved {} tag(s)",
                integration.name(),
                scope.tags.len()
            ))),
            Err(e) => checks.push(CheckResult::warn(format!(
                "Integration '{}' unavailable: {e}",
                integration.name()
            ))),
        }
    }

    sections.push(Section::new("Integrations", checks));
}
