//! Framing-only dumper: renders every chunk as hex plus printable ASCII.

use crate::{ConnMetadata, Direction, DumpError, DumpValue, Dumper};

pub struct HexDumper;

impl Dumper for HexDumper {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn new_conn_metadata(&self) -> ConnMetadata {
        ConnMetadata::default()
    }

    fn read(
        &self,
        payload: &[u8],
        _direction: Direction,
        _metadata: &mut ConnMetadata,
    ) -> Result<Vec<DumpValue>, DumpError> {
        let mut rows = Vec::with_capacity(payload.len() / 16 + 1);
        for chunk in payload.chunks(16) {
            rows.push(
                chunk
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
        let ascii: String = payload
            .iter()
            .map(|&b| {
                if (0x20..0x7f).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();

        Ok(vec![
            DumpValue::str("bytes", rows.join(" ")),
            DumpValue::str("ascii", ascii),
        ])
    }
}
