use std::io::{self, Write};

use serde::Serialize;

use crate::jobs::JobRecord;
use crate::response::{BeaconResponse, FilteringTermsResponse, VariantResponse};

/// Writes command results to stdout as JSON; logs go to stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_response(response: &BeaconResponse) -> io::Result<()> {
        Self::print_json(response)
    }

    pub fn print_filtering_terms(response: &FilteringTermsResponse) -> io::Result<()> {
        Self::print_json(response)
    }

    /// The stored payload is printed byte-for-byte, never re-encoded.
    pub fn print_variants(response: &VariantResponse) -> io::Result<()> {
        Self::write_line(response.payload.as_bytes())
    }

    pub fn print_job(record: Option<&JobRecord>) -> io::Result<()> {
        Self::print_json(&record)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        Self::write_line(json.as_bytes())
    }

    fn write_line(bytes: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
