//! Connection-lifecycle-only dumper. Emits nothing per chunk; the flow
//! tracker and the proxy emit open events on its behalf.

use crate::{ConnMetadata, Direction, DumpError, DumpValue, Dumper};

pub struct ConnDumper;

impl Dumper for ConnDumper {
    fn name(&self) -> &'static str {
        "conn"
    }

    fn new_conn_metadata(&self) -> ConnMetadata {
        ConnMetadata::default()
    }

    fn read(
        &self,
        _payload: &[u8],
        _direction: Direction,
        _metadata: &mut ConnMetadata,
    ) -> Result<Vec<DumpValue>, DumpError> {
        Ok(Vec::new())
    }
}
