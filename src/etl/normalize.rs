/*!
Conversion of the legacy `.xls` exports.

The reporting tool exports its tables as HTML documents with an `.xls`
extension. They are rewritten as real `.xlsx` workbooks next to the original
file:

- cell A1 holds the `Data Tanggal : ...` line of the report, if any, and the
  table starts on the 3rd row. Without that line the table starts on the 1st row.
- cells spanning several rows or columns are merged in the workbook.

A workbook converted by an earlier run is reused as is.
*/

use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::{Format, Workbook};
use scraper::{ElementRef, Html, Selector};

use crate::etl::*;

const LEGACY_EXTENSION: &str = "xls";
/// Start of an OLE compound document: a genuine binary workbook.
const COMPOUND_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];
static DATE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Data Tanggal\s*:\s*([0-9:\-\s]+)").expect("Invalid regex"));
/// Worksheet limits.
const MAX_ROWS: u32 = 1_048_576;
const MAX_COLS: u32 = 16_384;
/// Upper bound on the cells covered by the merges of one table.
const MAX_MERGED_CELLS: u64 = 1 << 20;

/// What happened to an input file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Conversion {
    /// Not a legacy file.
    Unchanged,
    /// A binary `.xls` workbook, readable as is.
    LegacyBinary,
    /// Converted during this call.
    Converted,
    /// Converted by an earlier call.
    Reused,
    /// The conversion failed, the original file is used.
    FellBack { reason: String },
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NormalizedFile {
    pub path: PathBuf,
    pub conversion: Conversion,
}

/// Returns the path of a file that the workbook reader understands.
///
/// This never fails: if a legacy file cannot be converted, the original path
/// is returned along with the reason.
pub fn ensure_xlsx(path: &Path) -> NormalizedFile {
    let is_legacy = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(LEGACY_EXTENSION))
        .unwrap_or(false);
    if !is_legacy {
        debug!("ensure_xlsx: {:?}: not a legacy file", path.display());
        return NormalizedFile {
            path: path.to_path_buf(),
            conversion: Conversion::Unchanged,
        };
    }

    let output = path.with_extension("xlsx");
    if output.exists() {
        info!("Reusing converted workbook {:?}", output.display());
        return NormalizedFile {
            path: output,
            conversion: Conversion::Reused,
        };
    }

    match convert_legacy(path, &output) {
        Ok(Conversion::Converted) => {
            info!(
                "Converted {:?} to {:?}",
                path.display(),
                output.display()
            );
            NormalizedFile {
                path: output,
                conversion: Conversion::Converted,
            }
        }
        Ok(conversion) => NormalizedFile {
            path: path.to_path_buf(),
            conversion,
        },
        Err(e) => {
            let reason = describe(&e);
            warn!("Could not convert {:?}: {}", path.display(), reason);
            NormalizedFile {
                path: path.to_path_buf(),
                conversion: Conversion::FellBack { reason },
            }
        }
    }
}

fn convert_legacy(input: &Path, output: &Path) -> EtlResult<Conversion> {
    let bytes = fs::read(input).context(ReadingFileSnafu {
        path: input.display().to_string(),
    })?;
    if bytes.starts_with(&COMPOUND_MAGIC) {
        info!("{:?} is a binary workbook", input.display());
        return Ok(Conversion::LegacyBinary);
    }
    let html = String::from_utf8_lossy(&bytes);
    let report = read_html_report(&html)?;
    write_workbook(&report, output)?;
    Ok(Conversion::Converted)
}

/// A table cell of the HTML export.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct HtmlCell {
    pub text: String,
    pub colspan: u32,
    pub rowspan: u32,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct HtmlReport {
    /// The whole `Data Tanggal : ...` line
    pub date_line: Option<String>,
    pub rows: Vec<Vec<HtmlCell>>,
}

fn selector(s: &str) -> EtlResult<Selector> {
    match Selector::parse(s) {
        Ok(sel) => Ok(sel),
        Err(e) => whatever!("invalid selector {:?}: {:?}", s, e),
    }
}

fn span(cell: &ElementRef, attr: &str, limit: u32) -> EtlResult<u32> {
    match cell.value().attr(attr) {
        None => Ok(1),
        Some(v) => match v.trim().parse::<u32>() {
            Ok(n) if n > limit => whatever!("{} value {} is larger than {}", attr, n, limit),
            Ok(n) => Ok(n.max(1)),
            Err(_) => whatever!("invalid {} value {:?}", attr, v),
        },
    }
}

/// Reads the report line and the cells of the first table.
pub fn read_html_report(html: &str) -> EtlResult<HtmlReport> {
    let document = Html::parse_document(html);

    let raw_text: String = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<&str>>()
        .join("\n");
    let date_line = DATE_LINE_RE.find(&raw_text).map(|m| m.as_str().trim().to_string());
    debug!("read_html_report: date line: {:?}", date_line);

    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td, th")?;

    let table = match document.select(&table_sel).next() {
        Some(t) => t,
        None => whatever!("no table found"),
    };

    let mut rows: Vec<Vec<HtmlCell>> = Vec::new();
    for tr in table.select(&row_sel) {
        let mut cells: Vec<HtmlCell> = Vec::new();
        for c in tr.select(&cell_sel) {
            cells.push(HtmlCell {
                text: c.text().map(str::trim).collect::<String>(),
                colspan: span(&c, "colspan", MAX_COLS)?,
                rowspan: span(&c, "rowspan", MAX_ROWS)?,
            });
        }
        rows.push(cells);
    }
    debug!("read_html_report: {} table rows", rows.len());
    Ok(HtmlReport { date_line, rows })
}

/// A cell at its place in the workbook, 0-based. A single cell has
/// `last_row == row` and `last_col == col`.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PlacedCell {
    pub row: u32,
    pub col: u32,
    pub last_row: u32,
    pub last_col: u32,
    pub text: String,
}

impl PlacedCell {
    fn is_merged(&self) -> bool {
        self.last_row > self.row || self.last_col > self.col
    }

    fn contains(&self, row: u32, col: u32) -> bool {
        (self.row..=self.last_row).contains(&row) && (self.col..=self.last_col).contains(&col)
    }

    fn overlaps(&self, other: &PlacedCell) -> bool {
        self.row <= other.last_row
            && other.row <= self.last_row
            && self.col <= other.last_col
            && other.col <= self.last_col
    }

    fn area(&self) -> u64 {
        (self.last_row - self.row + 1) as u64 * (self.last_col - self.col + 1) as u64
    }
}

fn last_index(start: u32, span: u32, limit: u32, what: &str) -> EtlResult<u32> {
    match start.checked_add(span - 1) {
        Some(last) if last < limit => Ok(last),
        _ => whatever!("the table goes past the last {} of a worksheet", what),
    }
}

/// Places the table cells, starting at `first_row`.
///
/// Within a row, the cursor moves past the columns covered by a cell merged
/// from a row above. A span that would overlap an earlier merge is not merged.
/// Fails when the table does not fit in a worksheet.
pub fn place_cells(rows: &[Vec<HtmlCell>], first_row: u32) -> EtlResult<Vec<PlacedCell>> {
    let mut merges: Vec<PlacedCell> = Vec::new();
    let mut merged_cells: u64 = 0;
    let mut placed: Vec<PlacedCell> = Vec::new();

    for (idx, cells) in rows.iter().enumerate() {
        let row = match u32::try_from(idx).ok().and_then(|i| first_row.checked_add(i)) {
            Some(r) if r < MAX_ROWS => r,
            _ => whatever!("the table has more rows than a worksheet"),
        };
        let mut col: u32 = 0;
        for cell in cells.iter() {
            while let Some(m) = merges.iter().find(|m| m.contains(row, col)) {
                col = m.last_col.saturating_add(1);
            }
            if col >= MAX_COLS {
                whatever!("the table goes past the last column of a worksheet");
            }
            let mut p = PlacedCell {
                row,
                col,
                last_row: last_index(row, cell.rowspan.max(1), MAX_ROWS, "row")?,
                last_col: last_index(col, cell.colspan.max(1), MAX_COLS, "column")?,
                text: cell.text.clone(),
            };
            if p.is_merged() {
                if merges.iter().any(|m| m.overlaps(&p)) {
                    warn!(
                        "place_cells: span at row {} column {} overlaps another one, not merged",
                        row + 1,
                        col + 1
                    );
                    p.last_row = p.row;
                    p.last_col = p.col;
                } else {
                    merged_cells += p.area();
                    if merged_cells > MAX_MERGED_CELLS {
                        whatever!(
                            "the merged cells of the table cover more than {} cells",
                            MAX_MERGED_CELLS
                        );
                    }
                    merges.push(p.clone());
                }
            }
            col = p.col.saturating_add(cell.colspan.max(1));
            placed.push(p);
        }
    }
    Ok(placed)
}

fn write_workbook(report: &HtmlReport, output: &Path) -> EtlResult<()> {
    let path = output.display().to_string();
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let format = Format::new();

    let first_row = match &report.date_line {
        Some(line) => {
            worksheet
                .write_string(0, 0, line)
                .context(WritingWorkbookSnafu { path: path.clone() })?;
            2
        }
        None => 0,
    };

    for p in place_cells(&report.rows, first_row)? {
        let (col, last_col) = match (u16::try_from(p.col), u16::try_from(p.last_col)) {
            (Ok(c), Ok(lc)) => (c, lc),
            _ => whatever!("too many columns in the table ({})", p.last_col + 1),
        };
        if p.is_merged() {
            worksheet
                .merge_range(p.row, col, p.last_row, last_col, &p.text, &format)
                .context(WritingWorkbookSnafu { path: path.clone() })?;
        } else if !p.text.is_empty() {
            worksheet
                .write_string(p.row, col, &p.text)
                .context(WritingWorkbookSnafu { path: path.clone() })?;
        }
    }

    workbook
        .save(output)
        .context(WritingWorkbookSnafu { path })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::io_common::{cell_text, open_sheet};
    use crate::etl::io_nutrition::parse_nutrition;
    use crate::etl::io_time::extract_time;
    use tempfile::TempDir;

    const LEGACY_REPORT: &str = r#"<html>
<head><meta http-equiv="Content-Type" content="text/html; charset=utf-8"></head>
<body>
<h3>LAPORAN STATUS GIZI BALITA</h3>
<p>Data Tanggal : 2025-03-15 08:30:00</p>
<table border="1">
<tr>
  <th rowspan="2">No</th><th rowspan="2">Puskesmas</th><th rowspan="2">Desa</th>
  <th colspan="5">BB/U</th><th colspan="5">TB/U</th><th colspan="6">BB/TB</th>
</tr>
<tr>
  <th>SK</th><th>K</th><th>N</th><th>RL</th><th>O</th>
  <th>SP</th><th>P</th><th>N</th><th>T</th><th>O</th>
  <th>GB</th><th>GK</th><th>N</th><th>RGL</th><th>GL</th><th>OB</th>
</tr>
<tr>
  <td>1</td><td>Puskesmas A</td><td>Desa X</td>
  <td>1</td><td>2</td><td>10</td><td>0</td><td>0</td>
  <td>2</td><td>3</td><td>9</td><td>0</td><td>0</td>
  <td>0</td><td>1</td><td>11</td><td>0</td><td>0</td><td>0</td>
</tr>
<tr>
  <td colspan="3">Jumlah</td>
  <td>1</td><td>2</td><td>10</td><td>0</td><td>0</td>
  <td>2</td><td>3</td><td>9</td><td>0</td><td>0</td>
  <td>0</td><td>1</td><td>11</td><td>0</td><td>0</td><td>0</td>
</tr>
</table>
</body>
</html>"#;

    fn cell(text: &str, colspan: u32, rowspan: u32) -> HtmlCell {
        HtmlCell {
            text: text.to_string(),
            colspan,
            rowspan,
        }
    }

    #[test]
    fn reads_the_report() {
        let report = read_html_report(LEGACY_REPORT).unwrap();
        assert_eq!(
            report.date_line.as_deref(),
            Some("Data Tanggal : 2025-03-15 08:30:00")
        );
        assert_eq!(report.rows.len(), 4);
        assert_eq!(report.rows[0][3], cell("BB/U", 5, 1));
        assert_eq!(report.rows[0][0], cell("No", 1, 2));
        assert_eq!(report.rows[2].len(), 19);
    }

    #[test]
    fn cursor_skips_merged_columns() {
        let rows = vec![
            vec![cell("A", 1, 2), cell("B", 2, 1), cell("C", 1, 3)],
            vec![cell("b1", 1, 1), cell("b2", 1, 1)],
            vec![cell("x", 1, 1), cell("y", 1, 1)],
        ];
        let placed = place_cells(&rows, 2).unwrap();
        let positions: Vec<(&str, u32, u32)> = placed
            .iter()
            .map(|p| (p.text.as_str(), p.row, p.col))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("A", 2, 0),
                ("B", 2, 1),
                ("C", 2, 3),
                ("b1", 3, 1),
                ("b2", 3, 2),
                ("x", 4, 0),
                ("y", 4, 1),
            ]
        );
        assert_eq!((placed[0].last_row, placed[0].last_col), (3, 0));
        assert_eq!((placed[1].last_row, placed[1].last_col), (2, 2));
        assert_eq!((placed[2].last_row, placed[2].last_col), (4, 3));
    }

    #[test]
    fn overlapping_span_is_not_merged() {
        let rows = vec![
            vec![cell("A", 1, 1), cell("B", 1, 2)],
            vec![cell("wide", 3, 1)],
        ];
        let placed = place_cells(&rows, 0).unwrap();
        // B covers (1, 1): "wide" starts at column 0 and would overlap it.
        assert_eq!((placed[2].row, placed[2].col), (1, 0));
        assert_eq!((placed[2].last_row, placed[2].last_col), (1, 0));
    }

    #[test]
    fn converts_and_reuses() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("gizi.xls");
        fs::write(&legacy, LEGACY_REPORT).unwrap();

        let first = ensure_xlsx(&legacy);
        assert_eq!(first.conversion, Conversion::Converted);
        assert_eq!(first.path, dir.path().join("gizi.xlsx"));

        let sheet = open_sheet(&first.path).unwrap();
        assert_eq!(
            cell_text(sheet.cell(0, 0)).as_deref(),
            Some("Data Tanggal : 2025-03-15 08:30:00")
        );
        assert_eq!(cell_text(sheet.cell(1, 0)), None);
        assert_eq!(cell_text(sheet.cell(2, 3)).as_deref(), Some("BB/U"));
        // Merged from the title row above.
        assert_eq!(cell_text(sheet.cell(3, 1)), None);
        assert_eq!(cell_text(sheet.cell(3, 3)).as_deref(), Some("SK"));
        assert_eq!(cell_text(sheet.cell(4, 1)).as_deref(), Some("Puskesmas A"));
        assert_eq!(cell_text(sheet.cell(5, 0)).as_deref(), Some("Jumlah"));

        let time = extract_time(&sheet);
        assert_eq!(time.month, Month::Known(3));
        assert_eq!(time.day, 15);
        // The 3 skipped rows are the date line, the blank row and the first
        // title row. The second title row and the total have no facility.
        let records = parse_nutrition(&sheet).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_weighed(), 13.0);

        let before = fs::read(&first.path).unwrap();
        let second = ensure_xlsx(&legacy);
        assert_eq!(second.conversion, Conversion::Reused);
        assert_eq!(second.path, first.path);
        assert_eq!(fs::read(&second.path).unwrap(), before);
    }

    #[test]
    fn modern_files_are_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sasaran.xlsx");
        let res = ensure_xlsx(&path);
        assert_eq!(res.path, path);
        assert_eq!(res.conversion, Conversion::Unchanged);
        assert_eq!(ensure_xlsx(&path), res);
    }

    #[test]
    fn binary_workbooks_are_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.XLS");
        let mut bytes = COMPOUND_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 60]);
        fs::write(&path, bytes).unwrap();
        let res = ensure_xlsx(&path);
        assert_eq!(res.path, path);
        assert_eq!(res.conversion, Conversion::LegacyBinary);
        assert!(!dir.path().join("old.xlsx").exists());
    }

    #[test]
    fn falls_back_without_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.xls");
        fs::write(&path, "<html><body>Data Tanggal : 2025-01-01 00:00:00</body></html>").unwrap();
        let res = ensure_xlsx(&path);
        assert_eq!(res.path, path);
        match res.conversion {
            Conversion::FellBack { reason } => assert!(reason.contains("no table"), "{}", reason),
            x => panic!("unexpected conversion {:?}", x),
        }
        assert!(!dir.path().join("empty.xlsx").exists());
    }

    #[test]
    fn bad_span_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.xls");
        fs::write(&path, "<table><tr><td colspan=\"two\">x</td></tr></table>").unwrap();
        let res = ensure_xlsx(&path);
        assert!(matches!(res.conversion, Conversion::FellBack { .. }));
    }

    #[test]
    fn huge_spans_fall_back() {
        let dir = TempDir::new().unwrap();
        let cases = [
            ("cols.xls", "<table><tr><td colspan=\"4294967295\">x</td></tr></table>"),
            ("rows.xls", "<table><tr><td rowspan=\"4294967295\">x</td></tr></table>"),
            ("area.xls", "<table><tr><td colspan=\"16384\" rowspan=\"20000\">x</td></tr></table>"),
        ];
        for (name, html) in cases.iter() {
            let path = dir.path().join(name);
            fs::write(&path, html).unwrap();
            let res = ensure_xlsx(&path);
            assert_eq!(res.path, path);
            assert!(
                matches!(res.conversion, Conversion::FellBack { .. }),
                "{}: {:?}",
                name,
                res.conversion
            );
        }
    }

    #[test]
    fn spans_past_the_sheet_edge_are_errors() {
        let wide = vec![vec![cell("x", 1, 2), cell("y", MAX_COLS, 1)]];
        assert!(place_cells(&wide, 0).is_err());
        let tall = vec![vec![cell("x", 1, 10)]];
        assert!(place_cells(&tall, MAX_ROWS - 5).is_err());
        assert!(place_cells(&[vec![cell("x", u32::MAX, u32::MAX)]], 0).is_err());

        let edge = vec![vec![cell("x", 1, 2), cell("y", MAX_COLS - 1, 1)]];
        let placed = place_cells(&edge, MAX_ROWS - 2).unwrap();
        assert_eq!(placed[1].last_col, MAX_COLS - 1);
        assert_eq!(placed[0].last_row, MAX_ROWS - 1);
    }
}
