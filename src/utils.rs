use crate::models::StoredExpose;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use tracing::info;

const CSV_HEADER: [&str; 11] = [
    "id",
    "created_at",
    "crawler",
    "title",
    "price",
    "price_value",
    "size",
    "size_value",
    "rooms",
    "address",
    "url",
];

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes exposes to `output_path`, replacing the file. Parsed numbers go
/// next to the raw text so the file can be used for statistics directly.
pub fn save_exposes_to_csv(exposes: &[StoredExpose], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)
        .context(format!("Failed to create output file: {}", output_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(CSV_HEADER)?;
    for stored in exposes {
        let expose = &stored.expose;
        writer.write_record([
            expose.id.to_string(),
            stored.created_at.to_rfc3339(),
            expose.crawler.clone(),
            expose.title.clone(),
            expose.price.clone(),
            number(expose.price_value()),
            expose.size.clone(),
            number(expose.size_value()),
            expose.rooms.clone(),
            expose.address.clone(),
            expose.url.clone(),
        ])?;
    }

    writer.flush()?;
    info!(count = exposes.len(), path = %output_path.display(), "Saved exposes to CSV");
    Ok(())
}
