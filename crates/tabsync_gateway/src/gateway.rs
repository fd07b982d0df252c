//! The remote gateway: range arithmetic, chunking, schema repair.

use crate::error::GatewayResult;
use crate::rows::RemoteRow;
use crate::transport::{CellRect, RangeWrite, TableTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tabsync_core::FieldSchema;
use tracing::{debug, info};

/// Columns scanned when reading the header row, leaving room for columns
/// other tools may have added beyond the schema.
const HEADER_SCAN_COLS: u32 = 256;

/// Configuration for the remote gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Worksheet title holding the synchronized table.
    pub worksheet: String,
    /// Maximum number of cells in a single write request.
    pub max_batch_cells: usize,
    /// Number of rows fetched per read request.
    pub row_fetch_chunk: usize,
}

impl GatewayConfig {
    /// Creates a configuration for the given worksheet.
    pub fn new(worksheet: impl Into<String>) -> Self {
        Self {
            worksheet: worksheet.into(),
            max_batch_cells: 1_000,
            row_fetch_chunk: 2_000,
        }
    }

    /// Sets the per-request cell budget.
    pub fn with_max_batch_cells(mut self, cells: usize) -> Self {
        self.max_batch_cells = cells.max(1);
        self
    }

    /// Sets the read chunk size in rows.
    pub fn with_row_fetch_chunk(mut self, rows: usize) -> Self {
        self.row_fetch_chunk = rows.max(1);
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("items")
    }
}

/// Typed access to the remote table.
///
/// The gateway is the only component that understands the remote store's
/// native range addressing; everything above it deals in [`RemoteRow`]s.
pub struct RemoteGateway<T: TableTransport> {
    transport: Arc<T>,
    schema: FieldSchema,
    config: GatewayConfig,
}

impl<T: TableTransport> RemoteGateway<T> {
    /// Creates a gateway over the given transport.
    pub fn new(transport: T, schema: FieldSchema, config: GatewayConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            schema,
            config,
        }
    }

    /// Creates a gateway sharing an existing transport handle.
    pub fn with_shared_transport(
        transport: Arc<T>,
        schema: FieldSchema,
        config: GatewayConfig,
    ) -> Self {
        Self {
            transport,
            schema,
            config,
        }
    }

    /// Returns the underlying transport handle.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the field schema this gateway serves.
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Verifies and repairs the remote header row.
    ///
    /// The resolved header order is the schema's headers followed by any
    /// unrecognized existing columns (original order, deduplicated). Unknown
    /// columns are never dropped. The header row is rewritten only when it
    /// differs, so a settled table costs one read here.
    pub fn ensure_schema(&self) -> GatewayResult<Vec<String>> {
        self.transport.ensure_worksheet(&self.config.worksheet)?;

        let existing = self
            .transport
            .read_range(
                &self.config.worksheet,
                CellRect::new(1, 1, 1, HEADER_SCAN_COLS),
            )?
            .into_iter()
            .next()
            .unwrap_or_default();

        let required = self.schema.all_headers();
        let mut resolved = required.clone();
        for header in &existing {
            let header = header.trim();
            if header.is_empty() {
                continue;
            }
            if !resolved.iter().any(|h| h == header) {
                resolved.push(header.to_string());
            }
        }

        if existing != resolved {
            info!(
                worksheet = %self.config.worksheet,
                columns = resolved.len(),
                "repairing remote header row"
            );
            let write = RangeWrite {
                rect: CellRect::new(1, 1, 1, resolved.len() as u32),
                values: vec![resolved.clone()],
            };
            self.transport
                .batch_write(&self.config.worksheet, &[write])?;
        }

        Ok(resolved)
    }

    /// Fetches every remote row, reading in bounded chunks and
    /// concatenating in stable row order.
    pub fn fetch_all(&self) -> GatewayResult<Vec<RemoteRow>> {
        let headers = self.ensure_schema()?;
        let cols = headers.len() as u32;
        let chunk = self.config.row_fetch_chunk;

        let mut rows = Vec::new();
        let mut start_row: usize = 2;
        loop {
            let rect = CellRect::new(start_row as u32, 1, chunk as u32, cols);
            let raw = self.transport.read_range(&self.config.worksheet, rect)?;
            let fetched = raw.len();
            rows.extend(
                raw.iter()
                    .filter_map(|cells| RemoteRow::decode(&headers, cells)),
            );
            if fetched < chunk {
                break;
            }
            start_row += chunk;
        }

        debug!(rows = rows.len(), "fetched remote table");
        Ok(rows)
    }

    /// Merges rows into the remote table by identifier.
    ///
    /// Rows with a matching identifier are updated in place (cell-level
    /// merge, preserving columns the incoming row does not carry); unmatched
    /// rows are appended. The table body is then written back in batches
    /// sized to the cell budget.
    pub fn upsert(&self, incoming: &[RemoteRow]) -> GatewayResult<()> {
        if incoming.is_empty() {
            return Ok(());
        }
        let headers = self.ensure_schema()?;
        let mut table = self.fetch_all()?;
        let mut index: HashMap<String, usize> = table
            .iter()
            .enumerate()
            .map(|(position, row)| (row.id.clone(), position))
            .collect();

        for row in incoming {
            match index.get(&row.id) {
                Some(&position) => {
                    let existing = &mut table[position];
                    existing.version = row.version;
                    existing.updated_at = row.updated_at;
                    existing.deleted = row.deleted;
                    for (header, cell) in &row.cells {
                        existing.cells.insert(header.clone(), cell.clone());
                    }
                }
                None => {
                    index.insert(row.id.clone(), table.len());
                    table.push(row.clone());
                }
            }
        }

        self.write_table(&headers, &table)?;
        debug!(
            incoming = incoming.len(),
            total = table.len(),
            "upserted remote rows"
        );
        Ok(())
    }

    /// Removes rows by identifier and rewrites the table.
    pub fn delete(&self, ids: &[String]) -> GatewayResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let headers = self.ensure_schema()?;
        let table = self.fetch_all()?;
        let before = table.len();
        let retained: Vec<RemoteRow> = table
            .into_iter()
            .filter(|row| !ids.contains(&row.id))
            .collect();
        if retained.len() == before {
            return Ok(());
        }

        self.write_table(&headers, &retained)?;

        // Clear the now-stale tail left over from the longer table.
        let removed = before - retained.len();
        let tail = CellRect::new(
            (retained.len() + 2) as u32,
            1,
            removed as u32,
            headers.len() as u32,
        );
        self.transport.batch_clear(&self.config.worksheet, tail)?;
        info!(removed, remaining = retained.len(), "deleted remote rows");
        Ok(())
    }

    /// Writes the table body (rows 2..) in cell-budgeted batches.
    fn write_table(&self, headers: &[String], rows: &[RemoteRow]) -> GatewayResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let cols = headers.len();
        let rows_per_chunk = (self.config.max_batch_cells / cols).max(1);

        for (chunk_index, chunk) in rows.chunks(rows_per_chunk).enumerate() {
            let start_row = 2 + chunk_index * rows_per_chunk;
            let values: Vec<Vec<String>> = chunk.iter().map(|row| row.encode(headers)).collect();
            let write = RangeWrite {
                rect: CellRect::new(start_row as u32, 1, chunk.len() as u32, cols as u32),
                values,
            };
            self.transport
                .batch_write(&self.config.worksheet, &[write])?;
        }
        Ok(())
    }
}
