//! Stats command: ledger health at a glance.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::Settings;
use crate::ledger::{DeliveryStatus, Ledger};

use super::setup::open_ledger;

pub fn run_stats(settings: &Settings, recent: usize) -> anyhow::Result<()> {
    let ledger = open_ledger(settings)?;
    print_stats(&ledger, recent)
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

fn status_cell(status: DeliveryStatus) -> Cell {
    let color = match status {
        DeliveryStatus::Succeeded => Color::Green,
        DeliveryStatus::Pending => Color::Yellow,
        DeliveryStatus::Failed => Color::Red,
    };
    Cell::new(status).fg(color)
}

/// Print per-destination tallies and the most recent artifacts.
pub fn print_stats(ledger: &Ledger, recent: usize) -> anyhow::Result<()> {
    let stats = ledger.stats()?;

    println!(
        "{} artifacts, {} delivery records",
        stats.total_artifacts, stats.total_deliveries
    );

    if !stats.by_destination.is_empty() {
        let mut table = new_table(&["Destination", "Pending", "Succeeded", "Failed"]);
        for (name, tally) in &stats.by_destination {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(tally.pending).fg(Color::Yellow),
                Cell::new(tally.succeeded).fg(Color::Green),
                Cell::new(tally.failed).fg(Color::Red),
            ]);
        }
        println!("{table}");
    }

    if recent == 0 {
        return Ok(());
    }
    let artifacts = ledger.list_artifacts(recent)?;
    if artifacts.is_empty() {
        return Ok(());
    }

    let mut table = new_table(&["#", "File", "Discovered", "Destination", "Status", "Tries"]);
    for artifact in &artifacts {
        let discovered = artifact
            .discovered_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        let records = ledger.deliveries_for(artifact.id)?;

        if records.is_empty() {
            table.add_row(vec![
                Cell::new(artifact.id),
                Cell::new(artifact.file_name()),
                Cell::new(discovered),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
            ]);
            continue;
        }
        for record in records {
            table.add_row(vec![
                Cell::new(artifact.id),
                Cell::new(artifact.file_name()),
                Cell::new(&discovered),
                Cell::new(&record.destination),
                status_cell(record.status),
                Cell::new(record.retries),
            ]);
        }
    }
    println!("{table}");
    Ok(())
}
