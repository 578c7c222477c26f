// Primitives for reading the report worksheets.

use calamine::{open_workbook_auto, DataType, Range, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::etl::*;
use nutrition_star::Count;

/// The number of rows above the data in every report: the report date,
/// a blank row and the column titles.
pub const HEADER_ROWS: usize = 3;

/// Facility cells containing these words are totals, not localities.
const TOTAL_MARKERS: [&str; 2] = ["JUMLAH", "TOTAL"];
/// Facility cells made only of these words are repeated column titles.
const HEADER_MARKERS: [&str; 2] = ["NO", "PUSKESMAS"];

static EMPTY: DataType = DataType::Empty;

/// The first worksheet of a report. All the positions are absolute: row 0 is
/// the first row of the sheet, even when it is empty.
pub struct Sheet {
    pub path: String,
    range: Range<DataType>,
}

pub fn open_sheet(path: &Path) -> EtlResult<Sheet> {
    let p = path.display().to_string();
    debug!("open_sheet: path: {:?}", &p);
    let mut workbook =
        open_workbook_auto(path).context(OpeningWorkbookSnafu { path: p.clone() })?;
    let range = workbook
        .worksheet_range_at(0)
        .context(EmptyWorkbookSnafu { path: p.clone() })?
        .context(OpeningWorkbookSnafu { path: p.clone() })?;
    debug!(
        "open_sheet: path: {:?} start: {:?} end: {:?}",
        &p,
        range.start(),
        range.end()
    );
    Ok(Sheet { path: p, range })
}

impl Sheet {
    #[cfg(test)]
    pub fn from_range(path: &str, range: Range<DataType>) -> Sheet {
        Sheet {
            path: path.to_string(),
            range,
        }
    }

    /// The number of columns, counted from column A.
    pub fn width(&self) -> usize {
        self.range.end().map(|(_, c)| c as usize + 1).unwrap_or(0)
    }

    /// The number of rows, counted from row 1.
    pub fn height(&self) -> usize {
        self.range.end().map(|(r, _)| r as usize + 1).unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &DataType {
        self.range
            .get_value((row as u32, col as u32))
            .unwrap_or(&EMPTY)
    }

    /// The rows below the header, restricted to the first `num_cols` columns.
    ///
    /// Rows without a facility name, totals and repeated titles are skipped.
    /// Fails if the sheet is narrower than `num_cols`.
    pub fn data_rows(&self, num_cols: usize) -> EtlResult<Vec<DataRow<'_>>> {
        let found = self.width();
        ensure!(
            found >= num_cols,
            MissingColumnsSnafu {
                path: self.path.clone(),
                expected: num_cols,
                found,
            }
        );

        let mut res: Vec<DataRow> = Vec::new();
        for row in HEADER_ROWS..self.height() {
            let cells: Vec<&DataType> = (0..num_cols).map(|col| self.cell(row, col)).collect();
            let facility = match cell_text(cells[1]) {
                Some(s) if !s.trim().is_empty() => s,
                _ => {
                    debug!("data_rows: {}: row {}: no facility", self.path, row + 1);
                    continue;
                }
            };
            if is_total_or_title(&facility) {
                debug!(
                    "data_rows: {}: row {}: skipping {:?}",
                    self.path,
                    row + 1,
                    facility
                );
                continue;
            }
            let village = cell_text(cells[2]).unwrap_or_default();
            res.push(DataRow {
                lineno: row + 1,
                facility,
                village,
                cells,
            });
        }
        Ok(res)
    }
}

/// A data row of a report, with the two locality names already read.
#[derive(Debug)]
pub struct DataRow<'a> {
    /// 1-based, as displayed by spreadsheet programs
    pub lineno: usize,
    pub facility: String,
    pub village: String,
    cells: Vec<&'a DataType>,
}

impl<'a> DataRow<'a> {
    pub fn count(&self, col: usize) -> Count {
        self.cells.get(col).map(|c| cell_count(c)).unwrap_or(0.0)
    }
}

/// Is this facility cell a total line or a repeated column title?
pub fn is_total_or_title(facility: &str) -> bool {
    let upper = facility.trim().to_uppercase();
    if TOTAL_MARKERS.iter().any(|m| upper.contains(m)) {
        return true;
    }
    let bare = upper.trim_end_matches('.').trim();
    HEADER_MARKERS.iter().any(|m| bare == *m)
}

/// The text of a cell, None for empty cells and errors.
pub fn cell_text(cell: &DataType) -> Option<String> {
    match cell {
        DataType::String(s) => Some(s.clone()),
        DataType::Float(f) => Some(f.to_string()),
        DataType::Int(i) => Some(i.to_string()),
        DataType::Bool(b) => Some(b.to_string()),
        DataType::DateTime(serial) => excel_serial_to_datetime(*serial)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        _ => None,
    }
}

/// The numeric value of a cell. Anything that is not a finite number counts as 0.
pub fn cell_count(cell: &DataType) -> Count {
    let x = match cell {
        DataType::Float(f) => *f,
        DataType::Int(i) => *i as f64,
        DataType::Bool(true) => 1.0,
        DataType::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// First serial past 9999-12-31, the last date of a worksheet.
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

/// Converts an Excel serial date (days since 1899-12-30) to a date and time.
/// Serials outside the worksheet date range give `None`.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !(0.0..MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let excel_epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    excel_epoch.checked_add_signed(Duration::milliseconds(millis))
}
