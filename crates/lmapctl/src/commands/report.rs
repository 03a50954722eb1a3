//! Configuration and report rendering commands

use crate::output::{print_success, ReportFormat};
use anyhow::{Context, Result};
use lmap_lib::model::Lmap;
use lmap_lib::{jsonio, validate, xmlio, Workspace};
use std::path::Path;

/// Loads and validates the configuration tree.
pub fn load_config(config_path: &Path) -> Result<Lmap> {
    let mut lmap = Lmap::new();
    xmlio::parse_config_path(&mut lmap, config_path)?;
    validate::validate(&lmap)?;
    Ok(lmap)
}

/// `config`: validate the configuration and render it back.
pub fn config(config_path: &Path, format: ReportFormat) -> Result<()> {
    let lmap = load_config(config_path)?;
    match format {
        ReportFormat::Xml => print!("{}", xmlio::render_config(&lmap)?),
        ReportFormat::Json => println!("{}", jsonio::render_config(&lmap)?),
    }
    Ok(())
}

/// `validate`: check the configuration and report the outcome.
pub fn validate_config(config_path: &Path) -> Result<()> {
    load_config(config_path)?;
    print_success("configuration is valid");
    Ok(())
}

/// `report`: collect the results below the current directory and render
/// the report document.
pub fn report(config_path: &Path, format: ReportFormat) -> Result<()> {
    let mut lmap = load_config(config_path)?;

    if let Some(agent) = lmap.agent.as_mut() {
        if agent.report_date.is_none() {
            agent.report_date = Some(chrono::Utc::now().timestamp());
        }
    }

    Workspace::read_results(&mut lmap, Path::new("."))
        .context("failed to read results")?;

    let rendered = match format {
        ReportFormat::Xml => xmlio::render_report(&lmap)?,
        ReportFormat::Json => jsonio::render_report(&lmap)?,
    };
    print!("{rendered}");
    if format == ReportFormat::Xml {
        println!();
    }
    Ok(())
}
