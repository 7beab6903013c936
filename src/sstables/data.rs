//! STRATA - Data Component Encoding
//! Partitions, rows and cells as laid out in the Data component.
//!
//! ## Binary Format
//! ```text
//! partition := [key_len: vint][key] row* [0x01]
//! row       := [0x02] [cell_count: vint] cell*                     (static row)
//!            | [0x03] [ck_len: vint][ck] [cell_count: vint] cell*  (clustering row)
//! cell      := [column: vint] cell_metadata [value_len: vint][value]
//! ```
//! `cell_metadata` is the delta-encoded layout from [`super::delta`];
//! deleted cells carry no value.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::delta::{encode_cell_metadata, read_cell_metadata};
use super::header::SerializationHeader;
use super::vint::{encode_unsigned, read_unsigned_vint};
use crate::error::{Result, StrataError};
use crate::types::{Cell, CellLiveness, ClusteringKey, Partition, PartitionKey, Row};

const END_OF_PARTITION: u8 = 0x01;
const STATIC_ROW: u8 = 0x02;
const CLUSTERING_ROW: u8 = 0x03;

/// Encoded size of one row, kept for large-row reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSize {
    pub clustering: Option<ClusteringKey>,
    pub size: u64,
}

/// Sizes produced by encoding one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPartition {
    pub size: u64,
    pub rows: Vec<RowSize>,
    pub cells: u64,
}

fn put_bytes(buf: &mut BytesMut, raw: &[u8]) {
    encode_unsigned(raw.len() as u64, buf);
    buf.put_slice(raw);
}

fn encode_cell(
    header: &SerializationHeader,
    wide: bool,
    cell: &Cell,
    buf: &mut BytesMut,
) -> Result<()> {
    encode_unsigned(cell.column as u64, buf);
    encode_cell_metadata(header, wide, cell.timestamp, &cell.liveness, buf)?;
    if !matches!(cell.liveness, CellLiveness::Deleted { .. }) {
        put_bytes(buf, &cell.value);
    }
    Ok(())
}

fn encode_row(
    header: &SerializationHeader,
    wide: bool,
    row: &Row,
    buf: &mut BytesMut,
) -> Result<()> {
    match &row.clustering {
        None => buf.put_u8(STATIC_ROW),
        Some(ck) => {
            buf.put_u8(CLUSTERING_ROW);
            put_bytes(buf, &ck.0);
        }
    }
    encode_unsigned(row.cells.len() as u64, buf);
    for cell in &row.cells {
        encode_cell(header, wide, cell, buf)?;
    }
    Ok(())
}

/// Append `partition` to `buf`, returning its encoded sizes.
///
/// On error `buf` may hold a partial partition and must be discarded.
pub fn encode_partition(
    header: &SerializationHeader,
    wide: bool,
    partition: &Partition,
    buf: &mut BytesMut,
) -> Result<EncodedPartition> {
    let start = buf.len();
    put_bytes(buf, &partition.key.0);

    let mut rows = Vec::new();
    let mut cells = 0;
    for row in partition.all_rows() {
        let row_start = buf.len();
        encode_row(header, wide, row, buf)?;
        rows.push(RowSize {
            clustering: row.clustering.clone(),
            size: (buf.len() - row_start) as u64,
        });
        cells += row.cells.len() as u64;
    }
    buf.put_u8(END_OF_PARTITION);

    Ok(EncodedPartition {
        size: (buf.len() - start) as u64,
        rows,
        cells,
    })
}

fn truncated(err: std::io::Error, what: &str) -> StrataError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        StrataError::MalformedStream(format!("unexpected end of stream reading {}", what))
    } else {
        StrataError::Io(err)
    }
}

/// Sequential reader over a Data component stream.
pub struct DataReader<R> {
    reader: BufReader<R>,
    header: SerializationHeader,
    wide: bool,
}

impl<R: AsyncRead + Unpin> DataReader<R> {
    pub fn new(reader: R, header: SerializationHeader, wide: bool) -> Self {
        Self {
            reader: BufReader::new(reader),
            header,
            wide,
        }
    }

    async fn read_u8(&mut self, what: &str) -> Result<u8> {
        self.reader.read_u8().await.map_err(|e| truncated(e, what))
    }

    async fn read_bytes(&mut self, what: &str) -> Result<Bytes> {
        let len = read_unsigned_vint(&mut self.reader).await?;
        let mut raw = Vec::new();
        (&mut self.reader).take(len).read_to_end(&mut raw).await?;
        if (raw.len() as u64) < len {
            return Err(StrataError::MalformedStream(format!(
                "{} declares {} bytes, only {} available",
                what,
                len,
                raw.len()
            )));
        }
        Ok(Bytes::from(raw))
    }

    async fn read_cell(&mut self) -> Result<Cell> {
        let column = read_unsigned_vint(&mut self.reader).await?;
        let column = u32::try_from(column).map_err(|_| {
            StrataError::MalformedSstable(format!("column id {} out of range", column))
        })?;
        let (timestamp, liveness) =
            read_cell_metadata(&mut self.reader, &self.header, self.wide).await?;
        let value = match liveness {
            CellLiveness::Deleted { .. } => Bytes::new(),
            _ => self.read_bytes("cell value").await?,
        };
        Ok(Cell {
            column,
            timestamp,
            liveness,
            value,
        })
    }

    async fn read_cells(&mut self) -> Result<Vec<Cell>> {
        let count = read_unsigned_vint(&mut self.reader).await?;
        let mut cells = Vec::new();
        for _ in 0..count {
            cells.push(self.read_cell().await?);
        }
        Ok(cells)
    }

    /// Next partition, or `None` at a clean end of stream.
    pub async fn next_partition(&mut self) -> Result<Option<Partition>> {
        if self.reader.fill_buf().await?.is_empty() {
            return Ok(None);
        }

        let key = PartitionKey(self.read_bytes("partition key").await?);
        let mut partition = Partition::new(key);
        loop {
            match self.read_u8("row kind").await? {
                END_OF_PARTITION => break,
                STATIC_ROW => {
                    if partition.static_row.is_some() || !partition.rows.is_empty() {
                        return Err(StrataError::MalformedSstable(
                            "static row out of place".to_string(),
                        ));
                    }
                    let cells = self.read_cells().await?;
                    partition.static_row = Some(Row::static_row(cells));
                }
                CLUSTERING_ROW => {
                    let ck = ClusteringKey(self.read_bytes("clustering key").await?);
                    let cells = self.read_cells().await?;
                    partition.rows.push(Row::clustered(ck, cells));
                }
                other => {
                    return Err(StrataError::MalformedSstable(format!(
                        "unknown row kind 0x{:02x}",
                        other
                    )))
                }
            }
        }
        Ok(Some(partition))
    }

    /// Read every remaining partition.
    pub async fn read_all(&mut self) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        while let Some(partition) = self.next_partition().await? {
            partitions.push(partition);
        }
        Ok(partitions)
    }
}
