//! Built-in leaf extractors.
//!
//! These are deliberately minimal: plain text is decoded as UTF-8, and
//! CSV / TSV is read into rows with the `csv` crate. Binary workbook
//! formats need an extractor registered by the caller.

use super::LeafExtractor;
use crate::error::IngestError;
use crate::output::ParseResult;
use crate::pipeline::input::InputDocument;
use async_trait::async_trait;

/// UTF-8 text (`.txt`, `.md`, `.json`, …), passed through as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl LeafExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    async fn extract(&self, document: &InputDocument) -> Result<ParseResult, IngestError> {
        let text = String::from_utf8_lossy(&document.bytes).into_owned();
        Ok(ParseResult::new(text, self.name()).with_pages(1))
    }
}

/// Comma- or tab-separated values.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedTextExtractor;

#[async_trait]
impl LeafExtractor for DelimitedTextExtractor {
    fn name(&self) -> &'static str {
        "delimited-text"
    }

    async fn extract(&self, document: &InputDocument) -> Result<ParseResult, IngestError> {
        let delimiter = match document.extension().as_str() {
            "csv" => b',',
            "tsv" => b'\t',
            other => {
                return Err(IngestError::UnsupportedPipeline {
                    pipeline: self.name().to_string(),
                    modality: format!("spreadsheet (.{other})"),
                })
            }
        };
        let rows = read_rows(document, delimiter)?;
        let rendered = rows
            .iter()
            .map(|row| row.join("\t"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ParseResult::new(rendered, self.name())
            .with_pages(1)
            .with_rows(rows))
    }
}

/// Read delimited text into rows; quoting follows RFC 4180.
fn read_rows(document: &InputDocument, delimiter: u8) -> Result<Vec<Vec<String>>, IngestError> {
    let text = String::from_utf8_lossy(&document.bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| IngestError::CorruptDocument {
                    name: document.name.clone(),
                    detail: format!("unreadable delimited record: {e}"),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_fields_keep_delimiters_and_newlines() {
        let doc = InputDocument::from_bytes(
            "q.csv",
            b"a,\"b,c\",\"say \"\"hi\"\"\"\r\n1,\"x\ny\",3\n".to_vec(),
        );
        let rows = read_rows(&doc, b',').unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["a", "b,c", "say \"hi\""],
                vec!["1", "x\ny", "3"],
            ]
        );
    }

    #[test]
    fn ragged_rows_and_missing_trailing_newline() {
        let doc = InputDocument::from_bytes("r.tsv", "\u{feff}a\tb\tc\nd".as_bytes().to_vec());
        let rows = read_rows(&doc, b'\t').unwrap();
        assert_eq!(rows, vec![vec!["a", "b", "c"], vec!["d"]]);
    }

    #[tokio::test]
    async fn csv_fills_rows() {
        let doc = InputDocument::from_bytes("t.csv", b"name,qty\nbolt,4\n".to_vec());
        let result = DelimitedTextExtractor.extract(&doc).await.unwrap();
        assert_eq!(result.rows.as_ref().map(Vec::len), Some(2));
        assert_eq!(result.text, "name\tqty\nbolt\t4");
        assert_eq!(result.pipeline, "delimited-text");
    }

    #[tokio::test]
    async fn binary_workbooks_are_rejected() {
        let doc = InputDocument::from_bytes("t.xlsx", vec![0x50, 0x4b, 3, 4]);
        assert!(DelimitedTextExtractor.extract(&doc).await.is_err());
    }
}
