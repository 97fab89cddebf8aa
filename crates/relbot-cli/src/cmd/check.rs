use anyhow::Context;
use relbot_core::Config;
use relbot_server::Services;

use crate::output::{print_json, print_table};

pub fn run(config: Config, json: bool) -> anyhow::Result<()> {
    let services = Services::from_config(&config)
        .with_context(|| format!("cannot start relbot with store {}", config.db_path.display()))?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(services.reconciler.run_cycle())?;

    if json {
        return print_json(&report);
    }

    println!(
        "{} releases, {} inspected, {} notifications",
        report.releases,
        report.inspected,
        report.notifications.len()
    );
    if !report.notifications.is_empty() {
        let rows = report
            .notifications
            .iter()
            .map(|(kind, release)| vec![kind.to_string(), release.clone()])
            .collect();
        print_table(&["KIND", "RELEASE"], rows);
    }
    if !report.failures.is_empty() {
        println!();
        let rows = report
            .failures
            .iter()
            .map(|(release, error)| vec![release.clone(), error.clone()])
            .collect();
        print_table(&["RELEASE", "FAILURE"], rows);
    }
    Ok(())
}
