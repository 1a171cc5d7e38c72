use anyhow::{Context, Result};
use sghalal_core::{Establishment, HarvestMetadata, ESTABLISHMENT_COLUMNS};

pub const CSV_FILE: &str = "halal_establishments.csv";
pub const JSON_FILE: &str = "halal_establishments.json";
pub const METADATA_FILE: &str = "metadata.json";

/// RFC 4180 CSV with a single header row in the published column order.
pub fn establishments_csv(records: &[Establishment]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer
        .write_record(ESTABLISHMENT_COLUMNS)
        .context("writing csv header")?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("writing csv row for {}", record.number))?;
    }
    writer.into_inner().context("flushing csv writer")
}

pub fn establishments_json(records: &[Establishment]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(records).context("serializing establishments json")?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn metadata_json(metadata: &HarvestMetadata) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(metadata).context("serializing metadata json")?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn read_establishments_csv(bytes: &[u8]) -> Result<Vec<Establishment>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers().context("reading csv header")?.clone();
    if headers.iter().ne(ESTABLISHMENT_COLUMNS) {
        anyhow::bail!("unexpected csv header: {:?}", headers);
    }
    reader
        .deserialize()
        .enumerate()
        .map(|(idx, row)| row.with_context(|| format!("parsing csv row {}", idx + 1)))
        .collect()
}

pub fn read_establishments_json(bytes: &[u8]) -> Result<Vec<Establishment>> {
    serde_json::from_slice(bytes).context("parsing establishments json")
}
