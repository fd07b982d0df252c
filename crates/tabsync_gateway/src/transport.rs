//! Transport abstraction over the remote tabular service.

use crate::error::{GatewayError, GatewayResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A rectangular cell range. Rows and columns are 1-based, `rows`/`cols`
/// give the extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    /// First row of the range (1-based).
    pub start_row: u32,
    /// First column of the range (1-based).
    pub start_col: u32,
    /// Number of rows covered.
    pub rows: u32,
    /// Number of columns covered.
    pub cols: u32,
}

impl CellRect {
    /// Creates a range.
    pub fn new(start_row: u32, start_col: u32, rows: u32, cols: u32) -> Self {
        Self {
            start_row,
            start_col,
            rows,
            cols,
        }
    }

    /// Total number of cells covered by the range.
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// One rectangular write: a target range and its cell values, row-major.
#[derive(Debug, Clone)]
pub struct RangeWrite {
    /// Target range.
    pub rect: CellRect,
    /// Cell values; outer vec is rows.
    pub values: Vec<Vec<String>>,
}

/// Abstract operations of the remote tabular service.
///
/// This trait hides the concrete service (HTTP spreadsheet API, test fake);
/// the gateway is the only caller and owns all range arithmetic.
pub trait TableTransport: Send + Sync {
    /// Reads a range. May return fewer rows than requested: a short read
    /// means the end of the data was reached.
    fn read_range(&self, worksheet: &str, rect: CellRect) -> GatewayResult<Vec<Vec<String>>>;

    /// Applies a set of rectangular writes in one request.
    fn batch_write(&self, worksheet: &str, writes: &[RangeWrite]) -> GatewayResult<()>;

    /// Clears every cell in a range.
    fn batch_clear(&self, worksheet: &str, rect: CellRect) -> GatewayResult<()>;

    /// Creates the worksheet if it does not exist.
    fn ensure_worksheet(&self, worksheet: &str) -> GatewayResult<()>;
}

/// An in-memory table transport for tests.
///
/// Holds full worksheets as row-major string grids, counts calls, and can
/// inject failures or go offline entirely.
#[derive(Default)]
pub struct InMemoryTransport {
    sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
    offline: AtomicBool,
    read_failures: AtomicUsize,
    write_failures: AtomicUsize,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
    clear_calls: AtomicUsize,
    write_log: Mutex<Vec<(u32, usize)>>,
}

impl InMemoryTransport {
    /// Creates an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a network partition: every call fails retryable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` reads fail with a retryable transport error.
    pub fn inject_read_failures(&self, count: usize) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with a retryable transport error.
    pub fn inject_write_failures(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `read_range` calls served.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of `batch_write` calls served (including failed ones).
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of `batch_clear` calls served.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    /// Returns `(start_row, row_count)` for every range written so far.
    pub fn write_log(&self) -> Vec<(u32, usize)> {
        self.write_log.lock().clone()
    }

    /// Returns a full snapshot of a worksheet grid.
    pub fn grid(&self, worksheet: &str) -> Vec<Vec<String>> {
        self.sheets
            .lock()
            .get(worksheet)
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces a worksheet grid wholesale.
    pub fn set_grid(&self, worksheet: &str, grid: Vec<Vec<String>>) {
        self.sheets.lock().insert(worksheet.to_string(), grid);
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(GatewayError::transport_retryable("remote unreachable"))
        } else {
            Ok(())
        }
    }

    fn consume_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TableTransport for InMemoryTransport {
    fn read_range(&self, worksheet: &str, rect: CellRect) -> GatewayResult<Vec<Vec<String>>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if Self::consume_failure(&self.read_failures) {
            return Err(GatewayError::transport_retryable("injected read failure"));
        }

        let sheets = self.sheets.lock();
        let grid = match sheets.get(worksheet) {
            Some(grid) => grid,
            None => return Ok(Vec::new()),
        };

        let first = rect.start_row as usize - 1;
        let col = rect.start_col as usize - 1;
        let mut out = Vec::new();
        for index in first..(first + rect.rows as usize) {
            let Some(row) = grid.get(index) else { break };
            let end = (col + rect.cols as usize).min(row.len());
            let cells = if col < row.len() {
                row[col..end].to_vec()
            } else {
                Vec::new()
            };
            out.push(cells);
        }
        // Trailing all-empty rows signal the end of data, as the real
        // service omits them.
        while out
            .last()
            .is_some_and(|row| row.iter().all(|cell| cell.is_empty()))
        {
            out.pop();
        }
        Ok(out)
    }

    fn batch_write(&self, worksheet: &str, writes: &[RangeWrite]) -> GatewayResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if Self::consume_failure(&self.write_failures) {
            return Err(GatewayError::transport_retryable("injected write failure"));
        }

        {
            let mut log = self.write_log.lock();
            for write in writes {
                log.push((write.rect.start_row, write.values.len()));
            }
        }

        let mut sheets = self.sheets.lock();
        let grid = sheets.entry(worksheet.to_string()).or_default();
        for write in writes {
            let first = write.rect.start_row as usize - 1;
            let col = write.rect.start_col as usize - 1;
            for (offset, cells) in write.values.iter().enumerate() {
                let index = first + offset;
                if grid.len() <= index {
                    grid.resize(index + 1, Vec::new());
                }
                let row = &mut grid[index];
                if row.len() < col + cells.len() {
                    row.resize(col + cells.len(), String::new());
                }
                row[col..col + cells.len()].clone_from_slice(cells);
            }
        }
        Ok(())
    }

    fn batch_clear(&self, worksheet: &str, rect: CellRect) -> GatewayResult<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut sheets = self.sheets.lock();
        let Some(grid) = sheets.get_mut(worksheet) else {
            return Ok(());
        };
        let first = rect.start_row as usize - 1;
        let col = rect.start_col as usize - 1;
        for index in first..(first + rect.rows as usize) {
            let Some(row) = grid.get_mut(index) else { break };
            let end = (col + rect.cols as usize).min(row.len());
            for cell in row.iter_mut().take(end).skip(col) {
                cell.clear();
            }
        }
        while grid
            .last()
            .is_some_and(|row| row.iter().all(|cell| cell.is_empty()))
        {
            grid.pop();
        }
        Ok(())
    }

    fn ensure_worksheet(&self, worksheet: &str) -> GatewayResult<()> {
        self.check_online()?;
        self.sheets
            .lock()
            .entry(worksheet.to_string())
            .or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(rect: CellRect, values: Vec<Vec<&str>>) -> RangeWrite {
        RangeWrite {
            rect,
            values: values
                .into_iter()
                .map(|row| row.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    #[test]
    fn write_then_read_round_trip() {
        let transport = InMemoryTransport::new();
        transport.ensure_worksheet("items").unwrap();
        transport
            .batch_write(
                "items",
                &[write(CellRect::new(1, 1, 2, 2), vec![vec!["a", "b"], vec!["c", "d"]])],
            )
            .unwrap();

        let rows = transport
            .read_range("items", CellRect::new(1, 1, 10, 2))
            .unwrap();
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn short_read_past_end() {
        let transport = InMemoryTransport::new();
        transport
            .batch_write(
                "items",
                &[write(CellRect::new(1, 1, 1, 1), vec![vec!["only"]])],
            )
            .unwrap();

        let rows = transport
            .read_range("items", CellRect::new(5, 1, 10, 3))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn offline_fails_retryable() {
        let transport = InMemoryTransport::new();
        transport.set_offline(true);
        let err = transport
            .read_range("items", CellRect::new(1, 1, 1, 1))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let transport = InMemoryTransport::new();
        transport.inject_write_failures(1);

        let writes = [write(CellRect::new(1, 1, 1, 1), vec![vec!["x"]])];
        assert!(transport.batch_write("items", &writes).is_err());
        assert!(transport.batch_write("items", &writes).is_ok());
        assert_eq!(transport.write_calls(), 2);
    }

    #[test]
    fn clear_trims_trailing_rows() {
        let transport = InMemoryTransport::new();
        transport
            .batch_write(
                "items",
                &[write(
                    CellRect::new(1, 1, 3, 1),
                    vec![vec!["a"], vec!["b"], vec!["c"]],
                )],
            )
            .unwrap();
        transport
            .batch_clear("items", CellRect::new(2, 1, 2, 1))
            .unwrap();

        let rows = transport
            .read_range("items", CellRect::new(1, 1, 10, 1))
            .unwrap();
        assert_eq!(rows, vec![vec!["a"]]);
    }
}
