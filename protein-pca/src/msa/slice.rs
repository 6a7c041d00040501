use std::path::Path;

use log::{info, warn};

use crate::error::{PipelineError, Result};
use crate::io::fasta::FastaRecord;

/// 序列切片区间：1-based，两端闭区间；`end = None` 表示取到最长序列末尾。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl SliceRange {
    pub fn new(start: usize, end: Option<usize>) -> Result<Self> {
        if start == 0 {
            return Err(PipelineError::Configuration(
                "slice start is 1-based and must be at least 1".into(),
            ));
        }
        if let Some(e) = end {
            if e < start {
                return Err(PipelineError::Configuration(format!(
                    "slice end {} lies before slice start {}",
                    e, start
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// 区间超出序列末尾时保留整条序列
    pub fn apply<'a>(&self, seq: &'a [u8]) -> &'a [u8] {
        let end = self.end.unwrap_or(seq.len());
        if end > seq.len() {
            return seq;
        }
        &seq[(self.start - 1).min(end)..end]
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<SliceRange> {
    let bad = || {
        PipelineError::Configuration(format!(
            "slice positions line {}: expected 'start,end', found '{}'",
            lineno, line
        ))
    };
    let (start, end) = line.split_once(',').ok_or_else(bad)?;
    let start: usize = start.trim().parse().map_err(|_| bad())?;
    let end: usize = end.trim().parse().map_err(|_| bad())?;
    SliceRange::new(start, Some(end))
}

/// 读取切片位置文件（每行 `start,end`，与输入 FASTA 中的序列顺序一一对应）。
///
/// 文件不存在或为空时，所有序列都使用 `default` 区间。
pub fn read_positions(path: Option<&Path>, n_records: usize, default: SliceRange) -> Result<Vec<SliceRange>> {
    let fallback = |reason: &str| {
        warn!(
            "{}. Sequences will be sliced to {}-{}.",
            reason,
            default.start,
            default.end.map_or_else(|| "end".to_string(), |e| e.to_string())
        );
        vec![default; n_records]
    };

    let positions = match path {
        None => vec![default; n_records],
        Some(p) => match std::fs::read_to_string(p) {
            Err(_) => fallback(&format!("Positions file ({}) not found", p.display())),
            Ok(text) => {
                let parsed = text
                    .lines()
                    .enumerate()
                    .filter(|(_, l)| !l.trim().is_empty())
                    .map(|(i, l)| parse_line(l, i + 1))
                    .collect::<Result<Vec<_>>>()?;
                if parsed.is_empty() {
                    fallback("No positions could be found")
                } else {
                    parsed
                }
            }
        },
    };
    info!("List of positions has {} entries.", positions.len());
    Ok(positions)
}

/// 按位置切片序列；ID、序列、位置三者数量必须一致。
pub fn slice_records(records: &[FastaRecord], positions: &[SliceRange]) -> Result<Vec<FastaRecord>> {
    let ids = records.iter().filter(|r| !r.id.is_empty()).count();
    if ids != records.len() || records.len() != positions.len() {
        return Err(PipelineError::SequenceMismatch {
            ids,
            sequences: records.len(),
            positions: positions.len(),
        });
    }
    info!("Found and successfully processed {} sequences.", records.len());

    Ok(records
        .iter()
        .zip(positions)
        .map(|(rec, range)| FastaRecord {
            id: rec.id.clone(),
            desc: rec.desc.clone(),
            seq: range.apply(&rec.seq).to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rec(id: &str, seq: &str) -> FastaRecord {
        FastaRecord::new(id, seq.as_bytes().to_vec())
    }

    #[test]
    fn apply_is_one_based_inclusive() {
        let r = SliceRange::new(2, Some(4)).unwrap();
        assert_eq!(r.apply(b"MKVLA"), b"KVL");
        let whole = SliceRange::new(1, None).unwrap();
        assert_eq!(whole.apply(b"MKVLA"), b"MKVLA");
    }

    #[test]
    fn end_beyond_sequence_keeps_whole_sequence() {
        let r = SliceRange::new(3, Some(50)).unwrap();
        assert_eq!(r.apply(b"MKVLA"), b"MKVLA");
    }

    #[test]
    fn invalid_ranges_rejected() {
        assert!(SliceRange::new(0, None).is_err());
        assert!(SliceRange::new(5, Some(3)).is_err());
    }

    #[test]
    fn reads_positions_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1,3\n\n2, 4").unwrap();
        let default = SliceRange::new(1, None).unwrap();
        let pos = read_positions(Some(f.path()), 2, default).unwrap();
        assert_eq!(pos, vec![SliceRange::new(1, Some(3)).unwrap(), SliceRange::new(2, Some(4)).unwrap()]);
    }

    #[test]
    fn missing_or_empty_file_falls_back_to_default() {
        let default = SliceRange::new(2, None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pos = read_positions(Some(&dir.path().join("nope.txt")), 3, default).unwrap();
        assert_eq!(pos, vec![default; 3]);

        let f = tempfile::NamedTempFile::new().unwrap();
        let pos = read_positions(Some(f.path()), 2, default).unwrap();
        assert_eq!(pos, vec![default; 2]);
    }

    #[test]
    fn malformed_line_is_configuration_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1-3").unwrap();
        let err = read_positions(Some(f.path()), 1, SliceRange::new(1, None).unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn count_mismatch_is_reported() {
        let records = vec![rec("a", "MKV"), rec("b", "MKVL")];
        let positions = vec![SliceRange::new(1, Some(2)).unwrap()];
        let err = slice_records(&records, &positions).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SequenceMismatch { ids: 2, sequences: 2, positions: 1 }
        ));
    }

    #[test]
    fn slices_each_record() {
        let records = vec![rec("a", "MKVL"), rec("b", "WYKV")];
        let positions = vec![SliceRange::new(2, Some(3)).unwrap(), SliceRange::new(1, Some(9)).unwrap()];
        let sliced = slice_records(&records, &positions).unwrap();
        assert_eq!(sliced, vec![rec("a", "KV"), rec("b", "WYKV")]);
    }
}
