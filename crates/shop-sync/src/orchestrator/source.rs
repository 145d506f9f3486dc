//! JSON-lines batch producer.
//!
//! Each non-blank line is one page of upstream data shaped
//! `{"<table>": [records...], ...}`.

use std::collections::BTreeMap;
use std::path::Path;

use futures::stream::{self, Stream};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::core::{Batch, Page, RawRecord};
use crate::error::Result;

/// Pages read lazily from a JSON-lines file.
pub struct JsonLinesSource {
    lines: Lines<BufReader<File>>,
}

impl JsonLinesSource {
    /// Open the file; pages are read as the stream is polled.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }

    /// Stream of pages in file order.
    ///
    /// A malformed line yields an error item and the stream carries on with
    /// the next line; a read error ends the stream.
    pub fn pages(self) -> impl Stream<Item = Result<Page>> {
        stream::unfold(Some(self.lines), |state| async move {
            let mut lines = state?;
            loop {
                match lines.next_line().await {
                    Ok(None) => return None,
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Some((parse_page(&line), Some(lines))),
                    Err(e) => return Some((Err(e.into()), None)),
                }
            }
        })
    }
}

/// Parse one page.
pub fn parse_page(line: &str) -> Result<Page> {
    let tables: BTreeMap<String, Vec<RawRecord>> = serde_json::from_str(line)?;
    Ok(tables
        .into_iter()
        .map(|(table, rows)| Batch::new(table, rows))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use futures::StreamExt;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_page() {
        let page = parse_page(r#"{"orders": [{"id": 1}, {"id": 2}], "customers": []}"#).unwrap();
        assert_eq!(page.len(), 2);
        let orders = page.iter().find(|b| b.table == "orders").unwrap();
        assert_eq!(orders.len(), 2);
        assert!(page.iter().any(|b| b.table == "customers" && b.is_empty()));
    }

    #[test]
    fn test_parse_page_rejects_non_object_rows() {
        let err = parse_page(r#"{"orders": [1, 2]}"#).unwrap_err();
        assert!(matches!(err, SyncError::Json(_)));
    }

    #[tokio::test]
    async fn test_stream_skips_blank_lines_and_survives_bad_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"orders": [{{"id": 1}}]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"refunds": [{{"id": 9}}]}}"#).unwrap();
        file.flush().unwrap();

        let source = JsonLinesSource::open(file.path()).await.unwrap();
        let items: Vec<_> = source.pages().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert_eq!(items[2].as_ref().unwrap()[0].table, "refunds");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = JsonLinesSource::open("/nonexistent/pages.jsonl").await.err().unwrap();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
