//! Chunk partitioning and payload encoding
//!
//! Rows travel to workers as a versioned byte payload: a big-endian `u16`
//! version header followed by the JSON encoding of the row sequence. A
//! worker refuses payloads written with a different version.

use serde::{Deserialize, Serialize};
use tabimport_common::CommonError;
use uuid::Uuid;

use super::types::{ColumnMap, ImportOptions, Row};

/// Current layout of [`ChunkTask::payload`]
pub const CHUNK_PAYLOAD_VERSION: u16 = 1;

const HEADER_LEN: usize = 2;

/// Split `rows` into consecutive chunks of at most `chunk_size` rows.
///
/// Order is preserved; only the last chunk may be shorter. A zero
/// `chunk_size` is treated as one row per chunk.
pub fn partition_rows(rows: Vec<Row>, chunk_size: usize) -> Vec<Vec<Row>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(rows.len().div_ceil(chunk_size));
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
        chunks.push(rows.by_ref().take(chunk_size).collect());
    }

    chunks
}

/// Encode a row sequence as a versioned payload
pub fn encode_rows(rows: &[Row]) -> Result<Vec<u8>, CommonError> {
    let mut payload = CHUNK_PAYLOAD_VERSION.to_be_bytes().to_vec();
    serde_json::to_writer(&mut payload, rows)?;
    Ok(payload)
}

/// Decode a payload produced by [`encode_rows`]
pub fn decode_rows(payload: &[u8]) -> Result<Vec<Row>, CommonError> {
    let Some((header, body)) = payload.split_first_chunk::<HEADER_LEN>() else {
        return Err(CommonError::InvalidPayload(format!(
            "expected at least {} header bytes, got {}",
            HEADER_LEN,
            payload.len()
        )));
    };

    let version = u16::from_be_bytes(*header);
    if version != CHUNK_PAYLOAD_VERSION {
        return Err(CommonError::UnsupportedVersion {
            expected: CHUNK_PAYLOAD_VERSION,
            found: version,
        });
    }

    Ok(serde_json::from_slice(body)?)
}

/// One schedulable unit of an import batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTask {
    /// Owning job; workers reload the job record by id
    pub job_id: Uuid,
    pub chunk_index: usize,
    pub row_count: usize,
    /// Rows encoded with [`encode_rows`]
    pub payload: Vec<u8>,
    pub column_map: ColumnMap,
    pub options: ImportOptions,
}

impl ChunkTask {
    pub fn new(
        job_id: Uuid,
        chunk_index: usize,
        rows: &[Row],
        column_map: ColumnMap,
        options: ImportOptions,
    ) -> Result<Self, CommonError> {
        Ok(Self {
            job_id,
            chunk_index,
            row_count: rows.len(),
            payload: encode_rows(rows)?,
            column_map,
            options,
        })
    }

    pub fn rows(&self) -> Result<Vec<Row>, CommonError> {
        decode_rows(&self.payload)
    }
}

/// Build the chunk tasks of one job
pub fn build_tasks(
    job_id: Uuid,
    rows: Vec<Row>,
    chunk_size: usize,
    column_map: &ColumnMap,
    options: &ImportOptions,
) -> Result<Vec<ChunkTask>, CommonError> {
    partition_rows(rows, chunk_size)
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            ChunkTask::new(job_id, index, chunk, column_map.clone(), options.clone())
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::import::types::CellValue;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from([("n".to_string(), CellValue::Integer(i as i64))]))
            .collect()
    }

    fn index_of(row: &Row) -> i64 {
        match row.get("n") {
            Some(CellValue::Integer(i)) => *i,
            other => panic!("unexpected cell {:?}", other),
        }
    }

    #[test]
    fn test_partition_sizes() {
        let chunks = partition_rows(rows(250), 100);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        assert!(partition_rows(Vec::new(), 100).is_empty());
        assert_eq!(partition_rows(rows(3), 100).len(), 1);
        assert_eq!(partition_rows(rows(3), 0).len(), 3);
    }

    #[test]
    fn test_partition_is_order_preserving_and_deterministic() {
        let first = partition_rows(rows(17), 5);
        let second = partition_rows(rows(17), 5);
        assert_eq!(first, second);

        let flattened: Vec<i64> = first.iter().flatten().map(index_of).collect();
        assert_eq!(flattened, (0..17).collect::<Vec<i64>>());
    }

    #[test]
    fn test_payload_carries_version_header() {
        let payload = encode_rows(&rows(2)).unwrap();
        assert_eq!(&payload[..2], &CHUNK_PAYLOAD_VERSION.to_be_bytes());
        assert_eq!(decode_rows(&payload).unwrap(), rows(2));
    }

    #[test]
    fn test_decode_rejects_foreign_versions() {
        let mut payload = encode_rows(&rows(1)).unwrap();
        payload[..2].copy_from_slice(&9u16.to_be_bytes());
        assert!(matches!(
            decode_rows(&payload),
            Err(CommonError::UnsupportedVersion { expected: 1, found: 9 })
        ));

        assert!(matches!(decode_rows(&[1]), Err(CommonError::InvalidPayload(_))));
    }

    #[test]
    fn test_build_tasks() {
        let job_id = Uuid::new_v4();
        let map = ColumnMap::new().map("n", "n");
        let tasks = build_tasks(job_id, rows(7), 3, &map, &ImportOptions::new()).unwrap();

        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.job_id == job_id));
        assert_eq!(
            tasks.iter().map(|t| t.row_count).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert_eq!(tasks[2].chunk_index, 2);
        assert_eq!(index_of(&tasks[2].rows().unwrap()[0]), 6);
    }
}
