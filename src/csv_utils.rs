//! CSV output helpers for samples and run summaries.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Writes an iterator of records to a CSV writer.
/// Each record must implement Serialize.
pub fn write_csv<T, W>(writer: W, records: impl Iterator<Item = T>) -> csv::Result<()>
where
    T: Serialize,
    W: Write,
{
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Appends records to a CSV file, creating it if needed.
/// The header row is only written when the file is empty.
pub fn append_csv<T, P>(path: P, records: impl Iterator<Item = T>) -> csv::Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(empty)
        .from_writer(file);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{Protocol, TransferRequest};
    use rust_decimal_macros::dec;

    fn request(from: u32, to: u32) -> TransferRequest {
        TransferRequest {
            from,
            to,
            amount: dec!(12.50),
            protocol: Protocol::Optimistic,
        }
    }

    fn read_back(path: impl AsRef<Path>) -> csv::Result<Vec<TransferRequest>> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?
            .into_deserialize()
            .collect()
    }

    #[test]
    fn test_example_fixture_parses() -> csv::Result<()> {
        let requests = read_back("data/example_transfers.csv")?;

        assert_eq!(requests.len(), 6);
        assert_eq!(
            requests[0],
            TransferRequest {
                from: 1,
                to: 2,
                amount: dec!(500.00),
                protocol: Protocol::TwoPhaseLocking,
            }
        );
        assert_eq!(requests[4].protocol, Protocol::Optimistic);
        Ok(())
    }

    #[test]
    fn test_write_csv() -> csv::Result<()> {
        let mut output = Vec::new();
        write_csv(&mut output, [request(1, 2)].into_iter())?;
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "from,to,amount,protocol\n1,2,12.50,OCC\n"
        );
        Ok(())
    }

    #[test]
    fn test_append_csv_writes_header_once() -> csv::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("requests.csv");

        append_csv(&path, [request(1, 2)].into_iter())?;
        append_csv(&path, [request(3, 4), request(4, 1)].into_iter())?;

        let contents = std::fs::read_to_string(&path)?;
        assert_eq!(
            contents,
            "from,to,amount,protocol\n1,2,12.50,OCC\n3,4,12.50,OCC\n4,1,12.50,OCC\n"
        );

        assert_eq!(read_back(&path)?.len(), 3);
        Ok(())
    }
}
