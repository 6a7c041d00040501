use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub desc: Option<String>,
    pub seq: Vec<u8>,
}

impl FastaRecord {
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            desc: None,
            seq: seq.into(),
        }
    }
}

pub struct FastaReader<R: BufRead> {
    reader: R,
    buf: String,
    done: bool,
    peek_header: Option<String>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            done: false,
            peek_header: None,
        }
    }

    pub fn next_record(&mut self) -> Result<Option<FastaRecord>> {
        if self.done {
            return Ok(None);
        }

        // Find header line
        let header = if let Some(h) = self.peek_header.take() {
            h
        } else {
            loop {
                self.buf.clear();
                let n = self.reader.read_line(&mut self.buf)?;
                if n == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if self.buf.starts_with('>') {
                    let h = self.buf[1..].trim().to_string();
                    break h;
                }
            }
        };

        // Parse id and description
        let mut parts = header.splitn(2, char::is_whitespace);
        let id = parts.next().unwrap_or("").to_string();
        let desc = parts
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // Read (possibly wrapped) sequence lines; gaps are kept as-is
        let mut seq: Vec<u8> = Vec::new();
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf)?;
            if n == 0 {
                self.done = true;
                break;
            }
            if self.buf.starts_with('>') {
                let h = self.buf[1..].trim().to_string();
                self.peek_header = Some(h);
                break;
            }
            for &b in self.buf.as_bytes() {
                match b {
                    b'\n' | b'\r' | b' ' | b'\t' => {}
                    _ => seq.push(b.to_ascii_uppercase()),
                }
            }
        }

        Ok(Some(FastaRecord { id, desc, seq }))
    }

    pub fn read_all(mut self) -> Result<Vec<FastaRecord>> {
        let mut records = Vec::new();
        while let Some(rec) = self.next_record()? {
            records.push(rec);
        }
        Ok(records)
    }
}

pub fn read_fasta_file(path: &Path) -> Result<Vec<FastaRecord>> {
    let fh = std::fs::File::open(path)?;
    FastaReader::new(std::io::BufReader::new(fh)).read_all()
}

pub struct FastaWriter<W: Write> {
    writer: W,
    /// 0 = whole sequence on one line
    line_width: usize,
}

impl<W: Write> FastaWriter<W> {
    pub fn new(writer: W, line_width: usize) -> Self {
        Self { writer, line_width }
    }

    pub fn write_record(&mut self, rec: &FastaRecord) -> Result<()> {
        match &rec.desc {
            Some(d) => writeln!(self.writer, ">{} {}", rec.id, d)?,
            None => writeln!(self.writer, ">{}", rec.id)?,
        }
        if self.line_width == 0 || rec.seq.is_empty() {
            self.writer.write_all(&rec.seq)?;
            self.writer.write_all(b"\n")?;
        } else {
            for chunk in rec.seq.chunks(self.line_width) {
                self.writer.write_all(chunk)?;
                self.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn write_all(&mut self, records: &[FastaRecord]) -> Result<()> {
        for rec in records {
            self.write_record(rec)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
