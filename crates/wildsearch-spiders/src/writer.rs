use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::items::Record;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "camelCase")]
pub enum Format {
    #[default]
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "camelCase")]
pub enum FileMode {
    /// Fails if the file already exists
    #[default]
    Create,
    Append,
    Truncate,
}

impl From<FileMode> for fs_err::OpenOptions {
    fn from(mode: FileMode) -> Self {
        let mut opts = fs_err::OpenOptions::new();
        match mode {
            FileMode::Create => opts.write(true).create_new(true),
            FileMode::Append => opts.append(true).create(true),
            FileMode::Truncate => opts.write(true).create(true).truncate(true),
        };
        opts
    }
}

pub enum Sink {
    File(BufWriter<fs_err::File>),
    Stdout(io::Stdout),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(wtr) => wtr.write(buf),
            Self::Stdout(wtr) => wtr.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(wtr) => wtr.flush(),
            Self::Stdout(wtr) => wtr.flush(),
        }
    }
}

pub enum RecordWriter {
    Csv {
        wtr: csv::Writer<Sink>,
        needs_header: bool,
    },
    Jsonl(Sink),
}

impl RecordWriter {
    pub fn to_file(path: &Path, format: Format, mode: FileMode) -> anyhow::Result<Self> {
        let opts: fs_err::OpenOptions = mode.into();
        let file = opts.open(path)?;
        // Appending to a non empty CSV keeps its header
        let has_content = mode == FileMode::Append && file.metadata()?.len() > 0;
        Ok(Self::new(Sink::File(BufWriter::new(file)), format, !has_content))
    }

    pub fn to_stdout(format: Format) -> Self {
        Self::new(Sink::Stdout(io::stdout()), format, true)
    }

    fn new(sink: Sink, format: Format, needs_header: bool) -> Self {
        match format {
            Format::Csv => Self::Csv {
                wtr: csv::WriterBuilder::new().from_writer(sink),
                needs_header,
            },
            Format::Jsonl => Self::Jsonl(sink),
        }
    }

    pub fn write<R: Record>(&mut self, record: &R) -> anyhow::Result<()> {
        match self {
            Self::Csv { wtr, needs_header } => {
                if *needs_header {
                    wtr.write_record(R::FIELDS)?;
                    *needs_header = false;
                }
                wtr.write_record(csv_row(record)?)?;
            }
            Self::Jsonl(wtr) => {
                serde_json::to_writer(&mut *wtr, record)?;
                wtr.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Csv { wtr, .. } => wtr.flush(),
            Self::Jsonl(wtr) => wtr.flush(),
        }
    }
}

/// One cell per field, nested values are JSON encoded.
pub fn csv_row<R: Record>(record: &R) -> anyhow::Result<Vec<String>> {
    let value = serde_json::to_value(record)?;
    let row = R::FIELDS
        .iter()
        .map(|field| match value.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(a)) if a.is_empty() => String::new(),
            Some(nested @ (Value::Array(_) | Value::Object(_))) => nested.to_string(),
            Some(other) => other.to_string(),
        })
        .collect();
    Ok(row)
}

/// Writes every record received until all senders are dropped, then flushes.
///
/// The handle yields the number of records written.
pub fn spawn_writer<R>(mut wtr: RecordWriter, rx_item: Receiver<R>) -> JoinHandle<usize>
where
    R: Record + Send + 'static,
{
    thread::spawn(move || {
        let mut written = 0;
        for record in rx_item {
            match wtr.write(&record) {
                Ok(()) => written += 1,
                Err(e) => log::error!("Couldn't write record: {e}"),
            }
        }
        if let Err(e) = wtr.flush() {
            log::error!("Couldn't flush records: {e}");
        }
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coords;
    use crate::items::ProducerRecord;

    #[test]
    fn csv_cells() {
        let record = ProducerRecord {
            producer_name: Some("ООО \"Ромашка\"".into()),
            producer_coords: Some(Coords::new(59.93, 30.34)),
            producer_distance: Some(634.27),
            producer_price_lists: vec!["https://productcenter.ru/files/a.xls".into()],
            producer_url: "https://productcenter.ru/producers/1/romashka".into(),
            ..Default::default()
        };
        let row = csv_row(&record).unwrap();
        assert_eq!(row.len(), ProducerRecord::FIELDS.len());
        assert_eq!(row[0], "ООО \"Ромашка\"");
        assert_eq!(row[1], "");
        assert_eq!(row[7], r#"{"lat":59.93,"lon":30.34}"#);
        assert_eq!(row[8], "634.27");
        assert_eq!(row[12], r#"["https://productcenter.ru/files/a.xls"]"#);
    }

    #[test]
    fn file_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("producers.csv");
        let record = ProducerRecord {
            producer_url: "https://productcenter.ru/producers/1/a".into(),
            ..Default::default()
        };

        let mut wtr = RecordWriter::to_file(&path, Format::Csv, FileMode::Create).unwrap();
        wtr.write(&record).unwrap();
        wtr.flush().unwrap();
        drop(wtr);
        assert!(RecordWriter::to_file(&path, Format::Csv, FileMode::Create).is_err());

        let mut wtr = RecordWriter::to_file(&path, Format::Csv, FileMode::Append).unwrap();
        wtr.write(&record).unwrap();
        wtr.flush().unwrap();
        drop(wtr);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("producer_name,producer_about"));

        let mut wtr = RecordWriter::to_file(&path, Format::Jsonl, FileMode::Truncate).unwrap();
        wtr.write(&record).unwrap();
        wtr.flush().unwrap();
        drop(wtr);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: ProducerRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn writer_thread_drains_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.jsonl");
        let wtr = RecordWriter::to_file(&path, Format::Jsonl, FileMode::Create).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_writer::<ProducerRecord>(wtr, rx);
        for i in 0..3 {
            tx.send(ProducerRecord {
                producer_url: format!("https://productcenter.ru/producers/{i}/a"),
                ..Default::default()
            })
            .unwrap();
        }
        drop(tx);

        assert_eq!(handle.join().unwrap(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }
}
