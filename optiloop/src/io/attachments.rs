//! Attachment ingestion.
//!
//! Attachments are turned into the `attached_data` text the model sees.
//! Workbooks become one labeled block of JSON records per sheet and a CSV is
//! a single sheet named after its file stem; source-like text files are
//! embedded verbatim in a fence. Unsupported or unreadable files are skipped
//! with a warning and the rest of the batch still goes through.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, open_workbook_auto};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

const TEXT_EXTENSIONS: [&str; 7] = ["py", "txt", "md", "json", "toml", "yaml", "yml"];
const WORKBOOK_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

/// How an attachment is presented to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Single-sheet CSV table.
    Table,
    /// Spreadsheet with one or more sheets.
    Workbook,
    Text,
}

impl AttachmentKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "csv" {
            return Some(Self::Table);
        }
        if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
            return Some(Self::Workbook);
        }
        TEXT_EXTENSIONS
            .contains(&ext.as_str())
            .then_some(Self::Text)
    }
}

/// Result of ingesting a batch of attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedAttachments {
    /// Concatenated labeled blocks; empty when nothing was accepted.
    pub attached_data: String,
    /// Files that made it into `attached_data`, in input order.
    pub accepted: Vec<PathBuf>,
    /// User-facing messages for skipped files.
    pub warnings: Vec<String>,
}

pub fn prepare_attachments(paths: &[PathBuf]) -> Result<PreparedAttachments> {
    let mut prepared = PreparedAttachments::default();
    let mut blocks = Vec::new();

    for path in paths {
        let name = display_name(path)?;
        let ingested = match AttachmentKind::detect(path) {
            Some(AttachmentKind::Table) => table_block(path, &name).map(|b| vec![b]),
            Some(AttachmentKind::Workbook) => workbook_blocks(path, &name),
            Some(AttachmentKind::Text) => text_block(path, &name).map(|b| vec![b]),
            None => {
                warn!(file = %path.display(), "unsupported attachment type");
                prepared
                    .warnings
                    .push(format!("Skipped {name}: unsupported file type."));
                continue;
            }
        };
        match ingested {
            Ok(file_blocks) => {
                debug!(file = %path.display(), sheets = file_blocks.len(), "ingested attachment");
                blocks.extend(file_blocks);
                prepared.accepted.push(path.clone());
            }
            Err(err) => {
                warn!(file = %path.display(), err = %format!("{err:#}"), "unreadable attachment");
                prepared
                    .warnings
                    .push(format!("Skipped {name}: could not read it ({err:#})."));
            }
        }
    }

    prepared.attached_data = blocks.join("\n\n");
    Ok(prepared)
}

fn display_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("attachment has no file name {}", path.display()))
}

fn table_block(path: &Path, name: &str) -> Result<String> {
    let sheet = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let records = read_records(path)?;
    sheet_block(name, &sheet, &records)
}

/// One block per sheet, in workbook order. The first row holds the headers.
fn workbook_blocks(path: &Path, name: &str) -> Result<Vec<String>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("open workbook {}", path.display()))?;
    let mut blocks = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("read sheet {sheet} of {}", path.display()))?;
        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, cell)| match cell {
                        Data::Empty => format!("Unnamed: {col}"),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let records: Vec<Map<String, Value>> = rows
            .map(|row| {
                headers
                    .iter()
                    .zip(row)
                    .map(|(header, cell)| (header.clone(), data_value(cell)))
                    .collect()
            })
            .collect();
        blocks.push(sheet_block(name, &sheet, &records)?);
    }
    Ok(blocks)
}

fn sheet_block(name: &str, sheet: &str, records: &[Map<String, Value>]) -> Result<String> {
    let data = serde_json::to_string_pretty(records)
        .with_context(|| format!("serialize sheet {sheet} of {name}"))?;
    Ok(format!("File: {name}, Sheet: {sheet}\nData:\n{data}"))
}

fn text_block(path: &Path, name: &str) -> Result<String> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read attachment {}", path.display()))?;
    let lang = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    Ok(format!(
        "File: {name}\n```{lang}\n{}\n```",
        contents.trim_end_matches('\n')
    ))
}

/// Read a CSV as an ordered list of flat records keyed by header.
fn read_records(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open attachment {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .clone();

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("read row {} of {}", row + 1, path.display()))?;
        let mut entry = Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            entry.insert(header.to_string(), cell_value(field));
        }
        records.push(entry);
    }
    Ok(records)
}

fn data_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Bool(b) => Value::Bool(*b),
        Data::String(text) => Value::String(text.clone()),
        other => cell_value(&other.to_string()),
    }
}

fn cell_value(field: &str) -> Value {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(num) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(num);
    }
    Value::String(field.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn csv_becomes_labeled_sheet_of_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write(temp.path(), "orders.csv", "Item,Qty,Width\nA,4,1.5\nB,,2\n");
        let prepared = prepare_attachments(&[path]).expect("prepare");
        let data = &prepared.attached_data;
        assert!(data.starts_with("File: orders.csv, Sheet: orders\nData:\n"));
        let json = data.split_once("Data:\n").expect("data").1;
        let records: Vec<Value> = serde_json::from_str(json).expect("json");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Qty"], 4);
        assert_eq!(records[0]["Width"], 1.5);
        assert!(records[1]["Qty"].is_null());
        let keys: Vec<&String> = records[0].as_object().expect("object").keys().collect();
        assert_eq!(keys, ["Item", "Qty", "Width"]);
    }

    #[test]
    fn text_files_are_fenced_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write(temp.path(), "notes.md", "Rolls are 100cm wide.\n");
        let prepared = prepare_attachments(&[path]).expect("prepare");
        assert_eq!(
            prepared.attached_data,
            "File: notes.md\n```md\nRolls are 100cm wide.\n```"
        );
    }

    fn sheet_records(data: &str, label: &str) -> Vec<Value> {
        let block = data
            .split("File: ")
            .find(|b| b.starts_with(label))
            .unwrap_or_else(|| panic!("no block {label}"));
        let json = block.split_once("Data:\n").expect("data").1;
        serde_json::from_str(json.trim_end()).expect("json")
    }

    #[test]
    fn workbook_sheets_become_separate_labeled_blocks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let materials = workbook.add_worksheet();
        materials.set_name("Materials").expect("name");
        materials.write_string(0, 0, "Material").expect("cell");
        materials.write_string(0, 1, "Width").expect("cell");
        materials.write_string(1, 0, "Roll").expect("cell");
        materials.write_number(1, 1, 100).expect("cell");
        let orders = workbook.add_worksheet();
        orders.set_name("Orders").expect("name");
        orders.write_string(0, 0, "Item").expect("cell");
        orders.write_string(0, 1, "Qty").expect("cell");
        orders.write_string(0, 2, "Width").expect("cell");
        orders.write_string(1, 0, "A").expect("cell");
        orders.write_number(1, 1, 3).expect("cell");
        orders.write_number(1, 2, 45.5).expect("cell");
        orders.write_string(2, 0, "B").expect("cell");
        orders.write_number(2, 1, 2).expect("cell");
        orders.write_number(2, 2, 30).expect("cell");
        workbook.save(&path).expect("save workbook");

        let prepared = prepare_attachments(&[path.clone()]).expect("prepare");
        assert_eq!(prepared.accepted, vec![path]);
        assert!(prepared.warnings.is_empty());
        let data = &prepared.attached_data;
        assert!(data.starts_with("File: plan.xlsx, Sheet: Materials\nData:\n"));
        let materials_at = data.find("Sheet: Materials").expect("materials");
        let orders_at = data.find("Sheet: Orders").expect("orders");
        assert!(materials_at < orders_at);

        let materials = sheet_records(data, "plan.xlsx, Sheet: Materials");
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0]["Material"], "Roll");
        assert_eq!(materials[0]["Width"], 100);

        let orders = sheet_records(data, "plan.xlsx, Sheet: Orders");
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0]["Qty"], 3);
        assert_eq!(orders[0]["Width"], 45.5);
        let keys: Vec<&String> = orders[1].as_object().expect("object").keys().collect();
        assert_eq!(keys, ["Item", "Qty", "Width"]);
    }

    #[test]
    fn unknown_types_warn_and_skip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let image = write(temp.path(), "layout.png", "binary");
        let csv = write(temp.path(), "demand.csv", "d\n1\n");
        let prepared = prepare_attachments(&[image, csv.clone()]).expect("prepare");
        assert_eq!(prepared.accepted, vec![csv]);
        assert_eq!(prepared.warnings.len(), 1);
        assert!(prepared.warnings[0].contains("layout.png"));
        assert!(prepared.attached_data.starts_with("File: demand.csv"));
    }

    #[test]
    fn unreadable_files_are_skipped_without_losing_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let legacy = temp.path().join("legacy.txt");
        fs::write(&legacy, [0xFF, 0xFE, 0x00, 0x41]).expect("write");
        let broken = write(temp.path(), "broken.xlsx", "not a zip archive");
        let csv = write(temp.path(), "orders.csv", "Item,Qty\nA,4\n");

        let prepared = prepare_attachments(&[legacy, broken, csv.clone()]).expect("prepare");

        assert_eq!(prepared.accepted, vec![csv]);
        assert_eq!(prepared.warnings.len(), 2);
        assert!(prepared.warnings[0].starts_with("Skipped legacy.txt: could not read it"));
        assert!(prepared.warnings[1].starts_with("Skipped broken.xlsx: could not read it"));
        assert!(prepared.attached_data.starts_with("File: orders.csv, Sheet: orders"));
    }

    #[test]
    fn malformed_csv_row_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ragged = write(temp.path(), "ragged.csv", "a,b\n1,2\n3,4,5\n");
        let prepared = prepare_attachments(&[ragged]).expect("prepare");
        assert!(prepared.accepted.is_empty());
        assert!(prepared.attached_data.is_empty());
        assert!(prepared.warnings[0].contains("ragged.csv"));
    }

    #[test]
    fn no_attachments_means_empty_data() {
        let prepared = prepare_attachments(&[]).expect("prepare");
        assert!(prepared.attached_data.is_empty());
    }
}
