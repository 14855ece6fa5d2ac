use strata_core::config::StorageConfig;
use strata_core::recovery::RecoveryTestReport;

use crate::cli::ScenarioArg;
use crate::commands::common::{admin_data, open_subsystem, print_json};
use crate::error::CliError;

pub async fn run_recovery_test(
    scenario: ScenarioArg,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let report = admin_data(subsystem.test_recovery(scenario.into()).await)?;

    if json {
        print_json(&report)?;
    } else {
        for line in format_recovery_report(&report) {
            println!("{line}");
        }
    }

    if report.passed {
        Ok(())
    } else {
        Err(CliError::DrillFailed(report.scenario.to_string()))
    }
}

pub fn format_recovery_report(report: &RecoveryTestReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} in {}ms",
        report.scenario,
        if report.passed { "passed" } else { "FAILED" },
        report.duration_ms
    )];
    for step in &report.steps {
        let mark = if step.passed { "ok  " } else { "FAIL" };
        if step.detail.is_empty() {
            lines.push(format!("  {mark}  {}", step.name));
        } else {
            lines.push(format!("  {mark}  {} - {}", step.name, step.detail));
        }
    }
    lines
}
