//! Record extraction: tabular bytes → ordered records.
//!
//! ## Formats
//!
//! Workbooks (xlsx, xlsm, xlsb, ods, xls) are opened with calamine's
//! content-sniffing reader, so the uploaded file name's extension does not
//! matter. Anything that is not a workbook is read as UTF-8 CSV.
//!
//! ## Header policy
//!
//! The first row of the sheet's used range holds the field names, taken
//! verbatim. A repeated header keeps its first column and later columns are
//! suffixed `_1`, `_2`, … in column order; an empty header cell becomes
//! `__EMPTY` (then `__EMPTY_1`, …). Empty cells are left out of the record
//! and fully blank rows are skipped.

use crate::error::{MergeError, NoDataReason};
use crate::record::{FieldValue, Record};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const UTF8_BOM: &str = "\u{feff}";

/// Extract the records of `sheet` from a workbook or CSV file.
///
/// `source_name` is only used in error messages.
pub fn extract_records(
    bytes: &[u8],
    source_name: &str,
    sheet: &str,
) -> Result<Vec<Record>, MergeError> {
    let no_data = |reason| MergeError::NoData {
        source_name: source_name.to_string(),
        reason,
    };

    let rows = if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        read_workbook_rows(bytes, sheet).map_err(no_data)?
    } else {
        read_csv_rows(bytes).map_err(no_data)?
    };

    let records = rows_to_records(rows);
    if records.is_empty() {
        return Err(no_data(NoDataReason::NoRows {
            sheet: sheet.to_string(),
        }));
    }

    info!("Extracted {} records from '{}'", records.len(), source_name);
    Ok(records)
}

/// Header names of `sheet`, after duplicate/empty resolution.
pub fn extract_headers(
    bytes: &[u8],
    source_name: &str,
    sheet: &str,
) -> Result<Vec<String>, MergeError> {
    let rows = if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        read_workbook_rows(bytes, sheet)
    } else {
        read_csv_rows(bytes)
    }
    .map_err(|reason| MergeError::NoData {
        source_name: source_name.to_string(),
        reason,
    })?;

    Ok(rows
        .into_iter()
        .find(|row| row.iter().any(Option::is_some))
        .map(|header| resolve_headers(&header))
        .unwrap_or_default())
}

// ── Raw rows ─────────────────────────────────────────────────────────────

type RawRow = Vec<Option<FieldValue>>;

fn read_workbook_rows(bytes: &[u8], sheet: &str) -> Result<Vec<RawRow>, NoDataReason> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| NoDataReason::Unreadable(e.to_string()))?;

    let names = workbook.sheet_names();
    let name = resolve_sheet_name(&names, sheet).ok_or_else(|| NoDataReason::SheetMissing {
        sheet: sheet.to_string(),
        available: names.clone(),
    })?;
    debug!("Reading sheet '{}' (requested '{}')", name, sheet);

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| NoDataReason::Unreadable(e.to_string()))?;

    Ok(range_rows(&range))
}

/// Exact match first, then ASCII case-insensitive (`sheet1` finds `Sheet1`).
fn resolve_sheet_name(names: &[String], wanted: &str) -> Option<String> {
    names
        .iter()
        .find(|n| n.as_str() == wanted)
        .or_else(|| names.iter().find(|n| n.eq_ignore_ascii_case(wanted)))
        .cloned()
}

fn range_rows(range: &Range<Data>) -> Vec<RawRow> {
    range
        .rows()
        .map(|row| row.iter().map(cell_value).collect())
        .collect()
}

fn cell_value(cell: &Data) -> Option<FieldValue> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(FieldValue::Text(s.clone())),
        Data::Float(f) => Some(FieldValue::Number(*f)),
        Data::Int(i) => Some(FieldValue::Number(*i as f64)),
        Data::Bool(b) => Some(FieldValue::Bool(*b)),
        Data::DateTime(dt) => Some(FieldValue::Text(match dt.as_datetime() {
            Some(naive) => format_datetime(naive),
            None => dt.as_f64().to_string(),
        })),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(FieldValue::Text(s.clone())),
        Data::Error(e) => Some(FieldValue::Text(e.to_string())),
    }
}

fn format_datetime(dt: chrono::NaiveDateTime) -> String {
    use chrono::Timelike;
    if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else if dt.second() == 0 {
        dt.format("%Y-%m-%d %H:%M").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn read_csv_rows(bytes: &[u8]) -> Result<Vec<RawRow>, NoDataReason> {
    let content = std::str::from_utf8(bytes)
        .map_err(|e| NoDataReason::Unreadable(format!("not a workbook and not UTF-8 text: {e}")))?;
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(content.as_bytes());

    reader
        .records()
        .map(|result| {
            result
                .map(|row| {
                    row.iter()
                        .map(|cell| {
                            if cell.is_empty() {
                                None
                            } else {
                                Some(FieldValue::Text(cell.to_string()))
                            }
                        })
                        .collect()
                })
                .map_err(|e| NoDataReason::Unreadable(format!("CSV: {e}")))
        })
        .collect()
}

// ── Rows → records ───────────────────────────────────────────────────────

fn rows_to_records(rows: Vec<RawRow>) -> Vec<Record> {
    let mut rows = rows
        .into_iter()
        .filter(|row| row.iter().any(Option::is_some));

    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers = resolve_headers(&header_row);

    rows.map(|row| {
        let mut record = Record::new();
        for (name, value) in headers.iter().zip(row) {
            if let Some(value) = value {
                record.insert(name.clone(), value);
            }
        }
        record
    })
    .collect()
}

fn resolve_headers(row: &[Option<FieldValue>]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    row.iter()
        .map(|cell| {
            let base = match cell {
                Some(v) => v.to_string(),
                None => String::new(),
            };
            let base = if base.is_empty() {
                "__EMPTY".to_string()
            } else {
                base
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{base}_{count}")
            };
            *count += 1;
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(text: &str) -> Result<Vec<Record>, MergeError> {
        extract_records(text.as_bytes(), "data.csv", "sheet1")
    }

    #[test]
    fn csv_rows_keep_source_order() {
        let records = csv("姓名,車牌號碼\n王小明,ABC-123\n李大華,XYZ-789\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text("姓名"), "王小明");
        assert_eq!(records[1].text("車牌號碼"), "XYZ-789");
    }

    #[test]
    fn headers_are_verbatim() {
        let records = csv(" Name ,住（居）所\nx,y\n").unwrap();
        assert_eq!(records[0].text(" Name "), "x");
        assert_eq!(records[0].text("住（居）所"), "y");
    }

    #[test]
    fn duplicate_and_empty_headers_are_resolved() {
        let records = csv("a,a,,a,\n1,2,3,4,5\n").unwrap();
        let r = &records[0];
        assert_eq!(r.text("a"), "1");
        assert_eq!(r.text("a_1"), "2");
        assert_eq!(r.text("__EMPTY"), "3");
        assert_eq!(r.text("a_2"), "4");
        assert_eq!(r.text("__EMPTY_1"), "5");
    }

    #[test]
    fn empty_cells_and_blank_rows_are_skipped() {
        let records = csv("a,b\n1,\n,\n\n3,4\n").unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].contains("b"));
        assert_eq!(records[1].text("b"), "4");
    }

    #[test]
    fn bom_is_stripped() {
        let records = csv("\u{feff}a\n1\n").unwrap();
        assert_eq!(records[0].text("a"), "1");
    }

    #[test]
    fn header_only_is_no_data() {
        let err = csv("a,b\n").unwrap_err();
        assert!(matches!(
            err,
            MergeError::NoData {
                reason: NoDataReason::NoRows { .. },
                ..
            }
        ));
        assert!(matches!(csv("").unwrap_err(), MergeError::NoData { .. }));
    }

    #[test]
    fn binary_garbage_is_unreadable() {
        let err = extract_records(&[0xff, 0xfe, 0x00, 0x81], "data.bin", "sheet1").unwrap_err();
        assert!(matches!(
            err,
            MergeError::NoData {
                reason: NoDataReason::Unreadable(_),
                ..
            }
        ));
    }

    #[test]
    fn sheet_lookup_falls_back_to_case_insensitive() {
        let names = vec!["Sheet1".to_string(), "sheet2".to_string()];
        assert_eq!(resolve_sheet_name(&names, "sheet1").as_deref(), Some("Sheet1"));
        assert_eq!(resolve_sheet_name(&names, "sheet2").as_deref(), Some("sheet2"));
        assert_eq!(resolve_sheet_name(&names, "名冊"), None);
    }

    #[test]
    fn workbook_cells_map_to_field_values() {
        let mut range: Range<Data> = Range::new((0, 0), (1, 3));
        range.set_value((0, 0), Data::String("檢驗結果".into()));
        range.set_value((0, 1), Data::String("合格".into()));
        range.set_value((0, 2), Data::String("次數".into()));
        range.set_value((0, 3), Data::String("備註".into()));
        range.set_value((1, 0), Data::Float(95.0));
        range.set_value((1, 1), Data::Bool(false));
        range.set_value((1, 2), Data::Int(3));

        let records = rows_to_records(range_rows(&range));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text("檢驗結果"), "95");
        assert_eq!(records[0].text("合格"), "FALSE");
        assert_eq!(records[0].text("次數"), "3");
        assert!(!records[0].contains("備註"));
    }

    #[test]
    fn workbook_date_cells_format_as_text() {
        use calamine::{ExcelDateTime, ExcelDateTimeType};

        let serial = |v: f64| Data::DateTime(ExcelDateTime::new(v, ExcelDateTimeType::DateTime, false));
        let mut range: Range<Data> = Range::new((0, 0), (1, 2));
        range.set_value((0, 0), Data::String("通知日期".into()));
        range.set_value((0, 1), Data::String("違反時間".into()));
        range.set_value((0, 2), Data::String("到檢期限".into()));
        // Excel serial 45292 is 2024-01-01 in the 1900 date system.
        range.set_value((1, 0), serial(45292.0));
        range.set_value((1, 1), serial(45292.5));
        range.set_value((1, 2), Data::DateTimeIso("2024-02-01T09:30:00".into()));

        let records = rows_to_records(range_rows(&range));
        assert_eq!(records[0].text("通知日期"), "2024-01-01");
        assert_eq!(records[0].text("違反時間"), "2024-01-01 12:00");
        assert_eq!(records[0].text("到檢期限"), "2024-02-01T09:30:00");
    }

    #[test]
    fn datetimes_drop_zero_components() {
        let d = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(format_datetime(d.and_hms_opt(0, 0, 0).unwrap()), "2024-01-01");
        assert_eq!(
            format_datetime(d.and_hms_opt(10, 0, 0).unwrap()),
            "2024-01-01 10:00"
        );
        assert_eq!(
            format_datetime(d.and_hms_opt(10, 0, 5).unwrap()),
            "2024-01-01 10:00:05"
        );
    }

    #[test]
    fn headers_only_listing() {
        let headers = extract_headers("x,x,\n1,2,3\n".as_bytes(), "d.csv", "sheet1").unwrap();
        assert_eq!(headers, vec!["x", "x_1", "__EMPTY"]);
    }
}
