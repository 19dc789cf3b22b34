//! CSV export for committed plan records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::report::CommittedRecord;

/// Schema v1 column header for committed-record export.
const HEADER: &str = "timestamp,step_minutes,baseline_kw,served_kw,shed_kw,\
                      hvac_power_kw,hvac_temp_c,battery_charge_kw,battery_discharge_kw,\
                      battery_soc_kwh,pv_kw,grid_import_kw,grid_export_kw,\
                      price_per_kwh,energy_cost,carbon_kg,imputed";

/// Exports committed records to a CSV file at the given path.
///
/// Writes a header row followed by one data row per committed step.
/// Deterministic for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[CommittedRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes committed records as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[CommittedRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in records {
        wtr.write_record(&[
            r.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            r.step_minutes.to_string(),
            format!("{:.3}", r.baseline_kw),
            format!("{:.3}", r.served_kw),
            format!("{:.3}", r.shed_kw),
            format!("{:.3}", r.hvac_power_kw),
            format!("{:.3}", r.hvac_temp_c),
            format!("{:.3}", r.battery_charge_kw),
            format!("{:.3}", r.battery_discharge_kw),
            format!("{:.3}", r.battery_soc_kwh),
            format!("{:.3}", r.pv_generation_kw),
            format!("{:.3}", r.grid_import_kw),
            format!("{:.3}", r.grid_export_kw),
            format!("{:.4}", r.price_per_kwh),
            format!("{:.4}", r.energy_cost),
            format!("{:.4}", r.carbon_kg),
            r.imputed_inputs.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
