//! NDJSON payload encoding and gzip framing for sealed days.

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    record::AuditRecord,
};

/// One compact JSON record per line, each terminated by `\n`.
pub fn encode_ndjson(records: &[AuditRecord]) -> LedgerResult<Vec<u8>> {
    let mut payload = Vec::new();
    for record in records {
        serde_json::to_writer(&mut payload, record)
            .map_err(|e| LedgerError::archive(format!("record {} encoding failed: {e}", record.id)))?;
        payload.push(b'\n');
    }
    Ok(payload)
}

pub fn decode_ndjson(payload: &[u8]) -> LedgerResult<Vec<AuditRecord>> {
    payload
        .split(|&b| b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(i, line)| {
            serde_json::from_slice(line)
                .map_err(|e| LedgerError::archive(format!("corrupt archived record at line {}: {e}", i + 1)))
        })
        .collect()
}

pub fn gzip(payload: &[u8]) -> LedgerResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| LedgerError::archive(format!("gzip failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| LedgerError::archive(format!("gzip failed: {e}")))
}

pub fn gunzip(compressed: &[u8]) -> LedgerResult<Vec<u8>> {
    let mut payload = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut payload)
        .map_err(|e| LedgerError::archive(format!("gunzip failed: {e}")))?;
    Ok(payload)
}
