//! 多序列比对矩阵，以及比对前的序列切片与外部比对器调用。

pub mod aligner;
pub mod slice;

use std::collections::HashSet;
use std::path::Path;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PipelineError, Result};
use crate::io::fasta::{self, FastaRecord};
use crate::util::alphabet;

/// 比对矩阵：行 = 序列，列 = 比对位置，元素为字母表编码（0 = gap）。
///
/// 构建后不可变；保证至少一行一列，且所有行等长。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMatrix {
    ids: Vec<String>,
    codes: Array2<u8>,
}

impl AlignmentMatrix {
    pub fn from_records(records: &[FastaRecord]) -> Result<Self> {
        let first = records
            .first()
            .ok_or_else(|| PipelineError::MalformedAlignment("alignment contains no sequences".into()))?;
        let width = first.seq.len();
        if width == 0 {
            return Err(PipelineError::MalformedAlignment(format!(
                "sequence '{}' is empty",
                first.id
            )));
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut flat: Vec<u8> = Vec::with_capacity(records.len() * width);
        for (i, rec) in records.iter().enumerate() {
            if rec.id.trim().is_empty() {
                return Err(PipelineError::MalformedAlignment(format!(
                    "sequence {} has an empty ID",
                    i + 1
                )));
            }
            if !seen.insert(rec.id.as_str()) {
                return Err(PipelineError::DuplicateSequenceId(rec.id.clone()));
            }
            if rec.seq.len() != width {
                return Err(PipelineError::MalformedAlignment(format!(
                    "sequence '{}' has length {}, expected {}",
                    rec.id,
                    rec.seq.len(),
                    width
                )));
            }
            let codes = alphabet::encode_seq(&rec.seq).map_err(|b| {
                PipelineError::MalformedAlignment(format!(
                    "sequence '{}' contains unsupported symbol '{}'",
                    rec.id,
                    b.escape_ascii()
                ))
            })?;
            flat.extend_from_slice(&codes);
        }

        let ids = records.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        let codes = Array2::from_shape_vec((ids.len(), width), flat)
            .map_err(|e| PipelineError::MalformedAlignment(e.to_string()))?;
        Ok(Self { ids, codes })
    }

    pub fn from_fasta_file(path: &Path) -> Result<Self> {
        let records = fasta::read_fasta_file(path)?;
        Self::from_records(&records)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn codes(&self) -> ArrayView2<'_, u8> {
        self.codes.view()
    }

    pub fn n_sequences(&self) -> usize {
        self.codes.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.codes.ncols()
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, u8> {
        self.codes.column(j)
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, u8> {
        self.codes.row(i)
    }

    /// 列标签 pos1..posN（1-based）
    pub fn column_labels(&self) -> Vec<String> {
        column_labels(self.n_columns())
    }

    pub fn row_string(&self, i: usize) -> String {
        let row: Vec<u8> = self.codes.row(i).iter().map(|&c| alphabet::decode(c)).collect();
        String::from_utf8_lossy(&row).into_owned()
    }

    /// 去掉 gap 后的原始序列长度
    pub fn degapped_len(&self, i: usize) -> usize {
        self.codes.row(i).iter().filter(|&&c| !alphabet::is_gap(c)).count()
    }

    pub fn to_records(&self) -> Vec<FastaRecord> {
        self.codes
            .axis_iter(Axis(0))
            .zip(&self.ids)
            .map(|(row, id)| {
                let seq: Vec<u8> = row.iter().map(|&c| alphabet::decode(c)).collect();
                FastaRecord::new(id.clone(), seq)
            })
            .collect()
    }
}

pub fn column_labels(n: usize) -> Vec<String> {
    (1..=n).map(|x| format!("pos{}", x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, seq: &str) -> FastaRecord {
        FastaRecord::new(id, seq.as_bytes().to_vec())
    }

    #[test]
    fn builds_rectangular_matrix() {
        let m = AlignmentMatrix::from_records(&[rec("seq0", "A-A"), rec("seq1", "AAB")]).unwrap();
        assert_eq!(m.n_sequences(), 2);
        assert_eq!(m.n_columns(), 3);
        assert_eq!(m.ids(), ["seq0", "seq1"]);
        assert_eq!(m.column(1).to_vec(), vec![0, 1]);
        assert_eq!(m.row_string(0), "A-A");
        assert_eq!(m.column_labels(), vec!["pos1", "pos2", "pos3"]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = AlignmentMatrix::from_records(&[rec("a", "AC"), rec("b", "ACD")]).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAlignment(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = AlignmentMatrix::from_records(&[rec("a", "AC"), rec("a", "AD")]).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateSequenceId(id) if id == "a"));
    }

    #[test]
    fn rejects_empty_ids() {
        let err = AlignmentMatrix::from_records(&[rec("", "MKV"), rec("b", "MKL")]).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAlignment(msg) if msg.contains("sequence 1")));

        // a bare '>' header parses to an empty ID
        let records = fasta::FastaReader::new(&b">\nMKV\n>b\nMKL\n"[..]).read_all().unwrap();
        assert!(matches!(
            AlignmentMatrix::from_records(&records),
            Err(PipelineError::MalformedAlignment(_))
        ));
    }

    #[test]
    fn rejects_unknown_symbols_and_empty_input() {
        let err = AlignmentMatrix::from_records(&[rec("a", "AJ")]).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAlignment(_)));
        assert!(AlignmentMatrix::from_records(&[]).is_err());
        assert!(AlignmentMatrix::from_records(&[rec("a", "")]).is_err());
    }

    #[test]
    fn records_roundtrip_normalizes_dots() {
        let m = AlignmentMatrix::from_records(&[rec("a", "M.K-")]).unwrap();
        assert_eq!(m.to_records(), vec![rec("a", "M-K-")]);
    }
}
