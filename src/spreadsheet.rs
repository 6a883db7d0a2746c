//! Streaming spreadsheet reader
//!
//! Presents a uniform chunked view over CSV, XLSX and XLS inputs. CSV is
//! read incrementally; the binary formats have no chunked decoder, so they
//! are buffered whole and sliced — the upload size ceiling bounds peak
//! memory. Row numbers are the zero-based index after the header.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, DataType, Reader};

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SheetFormat {
    /// Detect the format from a normalized extension (with dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".csv" => Some(SheetFormat::Csv),
            ".xlsx" => Some(SheetFormat::Xlsx),
            ".xls" => Some(SheetFormat::Xls),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        Self::from_extension(&format!(".{}", ext))
    }
}

/// One source row: raw cell values aligned with the shared header
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<String>,
}

impl Row {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self { columns, values }
    }

    /// Look up a cell by column name, case-insensitively after trimming
    pub fn get(&self, column: &str) -> Option<&str> {
        let wanted = column.trim().to_lowercase();
        self.columns
            .iter()
            .position(|c| c.trim().to_lowercase() == wanted)
            .and_then(|idx| self.values.get(idx))
            .map(|s| s.as_str())
    }

}

/// Lazily yields chunks of up to `chunk_size` rows
pub struct ChunkIter {
    columns: Arc<Vec<String>>,
    chunk_size: usize,
    source: ChunkSource,
}

enum ChunkSource {
    Csv(csv::Reader<File>),
    Buffered(std::vec::IntoIter<Vec<String>>),
}

impl Iterator for ChunkIter {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.chunk_size);

        match &mut self.source {
            ChunkSource::Csv(reader) => {
                let mut record = csv::StringRecord::new();
                while chunk.len() < self.chunk_size {
                    match reader.read_record(&mut record) {
                        Ok(true) => {
                            let mut values: Vec<String> =
                                record.iter().map(|v| v.to_string()).collect();
                            values.resize(self.columns.len(), String::new());
                            chunk.push(Row::new(Arc::clone(&self.columns), values));
                        }
                        Ok(false) => break,
                        Err(e) => return Some(Err(anyhow!("CSV read error: {}", e))),
                    }
                }
            }
            ChunkSource::Buffered(rows) => {
                while chunk.len() < self.chunk_size {
                    match rows.next() {
                        Some(values) => chunk.push(Row::new(Arc::clone(&self.columns), values)),
                        None => break,
                    }
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Count data rows in one streaming pass, excluding the header.
///
/// Equals the total number of rows `read_chunks` will yield.
pub fn count_rows(path: &Path) -> Result<i64> {
    let format = SheetFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unsupported file format: {}", path.display()))?;

    match format {
        SheetFormat::Csv => {
            let mut reader = csv_reader(path)?;
            // Materializing the header keeps it out of the record count.
            reader.headers().context("Failed to read CSV header")?;
            let mut count = 0i64;
            let mut record = csv::StringRecord::new();
            while reader.read_record(&mut record).context("CSV read error")? {
                count += 1;
            }
            Ok(count)
        }
        SheetFormat::Xlsx | SheetFormat::Xls => {
            let (_, rows) = read_workbook(path)?;
            Ok(rows.len() as i64)
        }
    }
}

/// Read the header row (source column order preserved)
pub fn read_header(path: &Path) -> Result<Vec<String>> {
    let format = SheetFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unsupported file format: {}", path.display()))?;

    match format {
        SheetFormat::Csv => {
            let mut reader = csv_reader(path)?;
            let headers = reader.headers().context("Failed to read CSV header")?;
            Ok(headers.iter().map(|h| h.to_string()).collect())
        }
        SheetFormat::Xlsx | SheetFormat::Xls => {
            let (header, _) = read_workbook(path)?;
            Ok(header)
        }
    }
}

/// Verify the header contains every required column.
///
/// Matching is case-insensitive after trimming; returns the missing names.
pub fn validate_header(header: &[String], required: &[String]) -> Vec<String> {
    let present: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
    required
        .iter()
        .filter(|r| !present.contains(&r.trim().to_lowercase()))
        .cloned()
        .collect()
}

/// Open the file as a lazy sequence of row chunks, header already stripped
pub fn read_chunks(path: &Path, chunk_size: usize) -> Result<ChunkIter> {
    let format = SheetFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unsupported file format: {}", path.display()))?;
    let chunk_size = chunk_size.max(1);

    match format {
        SheetFormat::Csv => {
            let mut reader = csv_reader(path)?;
            let header = reader.headers().context("Failed to read CSV header")?;
            let columns = Arc::new(header.iter().map(|h| h.to_string()).collect::<Vec<_>>());
            Ok(ChunkIter {
                columns,
                chunk_size,
                source: ChunkSource::Csv(reader),
            })
        }
        SheetFormat::Xlsx | SheetFormat::Xls => {
            let (header, rows) = read_workbook(path)?;
            Ok(ChunkIter {
                columns: Arc::new(header),
                chunk_size,
                source: ChunkSource::Buffered(rows.into_iter()),
            })
        }
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// Buffer the first worksheet: header plus data rows, empty rows skipped
fn read_workbook(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.context("Failed to read first worksheet")?,
        None => bail!("Workbook has no worksheets: {}", path.display()),
    };

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(cell_to_string).collect(),
        None => return Ok((Vec::new(), Vec::new())),
    };

    let width = header.len();
    let data: Vec<Vec<String>> = rows
        .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|cells| {
            let mut values: Vec<String> = cells.iter().map(cell_to_string).collect();
            values.resize(width, String::new());
            values
        })
        .collect();

    Ok((header, data))
}

/// Render a typed workbook cell as the raw string the coercion layer expects
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.format("%Y-%m-%d").to_string(),
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => String::new(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR {:?}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SheetFormat::from_extension(".csv"), Some(SheetFormat::Csv));
        assert_eq!(SheetFormat::from_extension(".xlsx"), Some(SheetFormat::Xlsx));
        assert_eq!(SheetFormat::from_extension(".xls"), Some(SheetFormat::Xls));
        assert_eq!(SheetFormat::from_extension(".pdf"), None);
    }

    #[test]
    fn test_count_rows_excludes_header() {
        let file = write_csv("modelo,placa,ano,valor_fipe\nGol,ABC1D23,2020,55000\nUno,DEF2E34,2019,30000.50\n");
        assert_eq!(count_rows(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_count_rows_header_only() {
        let file = write_csv("modelo,placa,ano,valor_fipe\n");
        assert_eq!(count_rows(file.path()).unwrap(), 0);
    }

    #[test]
    fn test_read_chunks_sizes() {
        let mut content = String::from("a,b\n");
        for i in 0..5 {
            content.push_str(&format!("x{},y{}\n", i, i));
        }
        let file = write_csv(&content);

        let chunks: Vec<_> = read_chunks(file.path(), 2)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn test_count_matches_chunk_yield() {
        let file = write_csv("a,b\n1,2\n3,4\n5,6\n");
        let total: usize = read_chunks(file.path(), 2)
            .unwrap()
            .map(|c| c.unwrap().len())
            .sum();
        assert_eq!(total as i64, count_rows(file.path()).unwrap());
    }

    #[test]
    fn test_row_lookup_case_insensitive() {
        let file = write_csv(" Modelo ,PLACA\nGol,ABC1D23\n");
        let chunks: Vec<_> = read_chunks(file.path(), 10)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let row = &chunks[0][0];
        assert_eq!(row.get("modelo"), Some("Gol"));
        assert_eq!(row.get("placa"), Some("ABC1D23"));
        assert_eq!(row.get("ano"), None);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let file = write_csv("a,b,c\n1,2\n");
        let chunks: Vec<_> = read_chunks(file.path(), 10)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let row = &chunks[0][0];
        assert_eq!(row.get("c"), Some(""));
    }

    #[test]
    fn test_validate_header_reports_missing() {
        let header = vec!["Modelo".to_string(), " placa ".to_string()];
        let required = vec![
            "modelo".to_string(),
            "placa".to_string(),
            "ano".to_string(),
            "valor_fipe".to_string(),
        ];
        let missing = validate_header(&header, &required);
        assert_eq!(missing, vec!["ano".to_string(), "valor_fipe".to_string()]);
    }

    #[test]
    fn test_validate_header_ok() {
        let header = vec!["modelo".into(), "placa".into(), "ano".into(), "valor_fipe".into()];
        let required = vec!["placa".to_string(), "modelo".to_string()];
        assert!(validate_header(&header, &required).is_empty());
    }

    #[test]
    fn test_unsupported_extension_fails() {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        assert!(count_rows(file.path()).is_err());
        assert!(read_chunks(file.path(), 10).is_err());
    }
}
