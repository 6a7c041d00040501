//! Delimited text tables exchanged between pipeline stages.
//!
//! Ranking tables and position maps are read back by later runs, so their readers validate
//! strictly. PCA outputs and the loadings report are write-only.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::Array2;

use crate::error::{PipelineError, Result};
use crate::io::write_atomically;
use crate::pca::report::LoadingsReport;
use crate::pca::PcaModel;
use crate::position::PositionMap;
use crate::rank::RankingTable;
use crate::util::alphabet::SIGMA;

pub const SEQUENCE_ID: &str = "Sequence ID";
pub const ALIGNMENT_POSITION: &str = "Alignment position";

fn table_writer<W: Write>(w: W, delimiter: u8) -> csv::Writer<W> {
    WriterBuilder::new().delimiter(delimiter).from_writer(w)
}

/// Header is read as an ordinary record; field counts are checked by the callers.
fn table_reader(file: File) -> csv::Reader<File> {
    ReaderBuilder::new().has_headers(false).flexible(true).from_reader(file)
}

/// 1-based line on which the record starts.
fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, csv::Position::line)
}

// ---------------------------------------------------------------------------
// Ranking table
// ---------------------------------------------------------------------------

/// `Sequence ID,pos1,...,posN`, one row per sequence.
pub fn write_ranking_table(path: &Path, table: &RankingTable) -> Result<()> {
    write_atomically(path, |w| {
        let mut out = table_writer(w, b',');
        out.write_record(std::iter::once(SEQUENCE_ID.to_string()).chain(table.labels().iter().cloned()))?;
        for (i, id) in table.ids().iter().enumerate() {
            out.write_record(std::iter::once(id.clone()).chain(table.row(i).into_iter().map(|r| r.to_string())))?;
        }
        out.flush()?;
        Ok(())
    })
}

/// Import a ranking table written by [`write_ranking_table`].
///
/// Every failure, including a missing file, is reported as `RankImport`.
pub fn read_ranking_table(path: &Path) -> Result<RankingTable> {
    let fh = File::open(path).map_err(|e| PipelineError::rank_import(path, format!("cannot open file: {}", e)))?;
    let mut records = table_reader(fh).into_records();

    let header = match records.next() {
        Some(record) => record.map_err(|e| PipelineError::rank_import(path, e.to_string()))?,
        None => return Err(PipelineError::rank_import(path, "file is empty")),
    };
    if header.get(0) != Some(SEQUENCE_ID) {
        return Err(PipelineError::rank_import(
            path,
            format!("first header field must be '{}'", SEQUENCE_ID),
        ));
    }
    let labels: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    if labels.is_empty() {
        return Err(PipelineError::rank_import(path, "header has no position columns"));
    }
    if let Some(bad) = labels.iter().find(|l| !l.starts_with("pos")) {
        return Err(PipelineError::rank_import(path, format!("unexpected column label '{}'", bad)));
    }

    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    let mut flat: Vec<u8> = Vec::new();
    for record in records {
        let record = record.map_err(|e| PipelineError::rank_import(path, e.to_string()))?;
        let lineno = line_of(&record);
        if record.len() != header.len() {
            return Err(PipelineError::rank_import(
                path,
                format!("line {} has {} fields, expected {}", lineno, record.len(), header.len()),
            ));
        }
        let id = record[0].trim().to_string();
        if id.is_empty() {
            return Err(PipelineError::rank_import(path, format!("line {} has an empty sequence ID", lineno)));
        }
        if !seen.insert(id.clone()) {
            return Err(PipelineError::rank_import(path, format!("sequence ID '{}' occurs more than once", id)));
        }
        for cell in record.iter().skip(1) {
            let rank = cell
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|&r| (r as usize) < SIGMA)
                .ok_or_else(|| {
                    PipelineError::rank_import(
                        path,
                        format!("line {}: '{}' is not a rank in 0..={}", lineno, cell, SIGMA - 1),
                    )
                })?;
            flat.push(rank);
        }
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(PipelineError::rank_import(path, "no data rows"));
    }

    let ranks = Array2::from_shape_vec((ids.len(), labels.len()), flat)
        .map_err(|e| PipelineError::rank_import(path, e.to_string()))?;
    RankingTable::new(ids, labels, ranks).map_err(|e| PipelineError::rank_import(path, e.to_string()))
}

// ---------------------------------------------------------------------------
// Position map
// ---------------------------------------------------------------------------

/// `Alignment position,<id1>,...`; one row per 0-based alignment column, gaps left empty.
pub fn write_position_map(path: &Path, map: &PositionMap) -> Result<()> {
    write_atomically(path, |w| {
        let mut out = table_writer(w, b',');
        out.write_record(std::iter::once(ALIGNMENT_POSITION.to_string()).chain(map.ids().iter().cloned()))?;
        for j in 0..map.n_columns() {
            let cells = std::iter::once(j.to_string())
                .chain(map.column(j).into_iter().map(|p| p.map(|p| p.to_string()).unwrap_or_default()));
            out.write_record(cells)?;
        }
        out.flush()?;
        Ok(())
    })
}

pub fn read_position_map(path: &Path) -> Result<PositionMap> {
    let fh = File::open(path)?;
    let mut records = table_reader(fh).into_records();

    let header = match records.next() {
        Some(record) => record.map_err(|e| PipelineError::malformed_table(path, e.to_string()))?,
        None => return Err(PipelineError::malformed_table(path, "file is empty")),
    };
    if header.get(0) != Some(ALIGNMENT_POSITION) || header.len() < 2 {
        return Err(PipelineError::malformed_table(
            path,
            format!("header must be '{}' followed by sequence IDs", ALIGNMENT_POSITION),
        ));
    }
    let ids: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

    let mut flat: Vec<Option<u32>> = Vec::new();
    let mut n_columns = 0usize;
    for record in records {
        let record = record.map_err(|e| PipelineError::malformed_table(path, e.to_string()))?;
        let lineno = line_of(&record);
        if record.len() != header.len() {
            return Err(PipelineError::malformed_table(
                path,
                format!("line {} has {} fields, expected {}", lineno, record.len(), header.len()),
            ));
        }
        if record[0].trim().parse::<usize>().ok() != Some(n_columns) {
            return Err(PipelineError::malformed_table(
                path,
                format!("line {}: expected alignment position {}, found '{}'", lineno, n_columns, &record[0]),
            ));
        }
        for cell in record.iter().skip(1) {
            let cell = cell.trim();
            if cell.is_empty() {
                flat.push(None);
            } else {
                let p = cell.parse::<u32>().map_err(|_| {
                    PipelineError::malformed_table(path, format!("line {}: '{}' is not a position", lineno, cell))
                })?;
                flat.push(Some(p));
            }
        }
        n_columns += 1;
    }
    if n_columns == 0 {
        return Err(PipelineError::malformed_table(path, "no data rows"));
    }

    let positions = Array2::from_shape_vec((n_columns, ids.len()), flat)
        .map_err(|e| PipelineError::malformed_table(path, e.to_string()))?;
    PositionMap::from_parts(ids, positions)
        .ok_or_else(|| PipelineError::malformed_table(path, "position matrix does not match header"))
}

// ---------------------------------------------------------------------------
// PCA outputs
// ---------------------------------------------------------------------------

fn pc_labels(k: usize) -> impl Iterator<Item = String> {
    (1..=k).map(|c| format!("PC{}", c))
}

fn write_matrix(path: &Path, corner: &str, row_names: &[String], values: &Array2<f64>) -> Result<()> {
    if row_names.len() != values.nrows() {
        return Err(PipelineError::PcaInput(format!(
            "{} row names for a matrix with {} rows",
            row_names.len(),
            values.nrows()
        )));
    }
    write_atomically(path, |w| {
        let mut out = table_writer(w, b',');
        out.write_record(std::iter::once(corner.to_string()).chain(pc_labels(values.ncols())))?;
        for (name, row) in row_names.iter().zip(values.rows()) {
            out.write_record(std::iter::once(name.clone()).chain(row.iter().map(|v| v.to_string())))?;
        }
        out.flush()?;
        Ok(())
    })
}

/// Per-sequence scores: `Sequence ID,PC1,...`.
pub fn write_scores(path: &Path, ids: &[String], scores: &Array2<f64>) -> Result<()> {
    write_matrix(path, SEQUENCE_ID, ids, scores)
}

/// Per-column loadings: `Position,PC1,...`.
pub fn write_loadings(path: &Path, labels: &[String], loadings: &Array2<f64>) -> Result<()> {
    write_matrix(path, "Position", labels, loadings)
}

pub fn write_variance(path: &Path, model: &PcaModel) -> Result<()> {
    write_atomically(path, |w| {
        let mut out = table_writer(w, b',');
        out.write_record(["Component", "Eigenvalue", "Proportion explained"])?;
        let ev = model.explained_variance();
        let ratio = model.explained_variance_ratio();
        for (c, (v, r)) in ev.iter().zip(ratio.iter()).enumerate() {
            out.write_record([format!("PC{}", c + 1), v.to_string(), r.to_string()])?;
        }
        out.flush()?;
        Ok(())
    })
}

/// Tab-separated loadings report, one row per alignment column.
///
/// Position cells are 1-based original residue positions; gaps are left empty.
pub fn write_loadings_report(path: &Path, report: &LoadingsReport) -> Result<()> {
    write_atomically(path, |w| {
        let mut out = table_writer(w, b'\t');
        let header = ["id", "PC1", "PC2", "euclid_dist", "max_distance", "class"]
            .iter()
            .map(|s| s.to_string())
            .chain(report.ids.iter().cloned());
        out.write_record(header)?;
        for row in &report.rows {
            let cells = [
                row.label.clone(),
                row.pc1.to_string(),
                row.pc2.to_string(),
                row.distance.to_string(),
                report.max_distance.to_string(),
                row.class.as_str().to_string(),
            ]
            .into_iter()
            .chain(row.positions.iter().map(|p| p.map(|p| p.to_string()).unwrap_or_default()));
            out.write_record(cells)?;
        }
        out.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fasta::FastaRecord;
    use crate::msa::AlignmentMatrix;
    use crate::rank::rank_alignment;

    fn matrix() -> AlignmentMatrix {
        let records = vec![
            FastaRecord::new("seq0", b"A-A-".to_vec()),
            FastaRecord::new("seq1", b"ABCD".to_vec()),
            FastaRecord::new("seq2", b"ABAB".to_vec()),
            FastaRecord::new("seq3", b"AD--".to_vec()),
        ];
        AlignmentMatrix::from_records(&records).unwrap()
    }

    fn import_reason(path: &Path) -> String {
        match read_ranking_table(path) {
            Err(PipelineError::RankImport { reason, .. }) => reason,
            other => panic!("expected RankImport, got {:?}", other),
        }
    }

    #[test]
    fn ranking_table_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.csv");
        let table = rank_alignment(&matrix()).unwrap();
        write_ranking_table(&path, &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Sequence ID,pos1,pos2,pos3,pos4");
        assert_eq!(lines[1], "seq0,1,0,2,0");
        assert_eq!(lines[4], "seq3,1,1,0,0");

        assert_eq!(read_ranking_table(&path).unwrap(), table);
    }

    #[test]
    fn ranking_table_import_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.csv");

        assert!(import_reason(&path).contains("cannot open"));

        std::fs::write(&path, "").unwrap();
        assert_eq!(import_reason(&path), "file is empty");

        std::fs::write(&path, "id,pos1\na,1\n").unwrap();
        assert!(import_reason(&path).contains("Sequence ID"));

        std::fs::write(&path, "Sequence ID,col1\na,1\n").unwrap();
        assert!(import_reason(&path).contains("col1"));

        std::fs::write(&path, "Sequence ID,pos1,pos2\n").unwrap();
        assert_eq!(import_reason(&path), "no data rows");

        std::fs::write(&path, "Sequence ID,pos1,pos2\na,1,0\nb,1\n").unwrap();
        assert!(import_reason(&path).contains("line 3"));

        std::fs::write(&path, "Sequence ID,pos1\na,24\n").unwrap();
        assert!(import_reason(&path).contains("'24'"));

        std::fs::write(&path, "Sequence ID,pos1\na,x\n").unwrap();
        assert!(import_reason(&path).contains("'x'"));

        std::fs::write(&path, "Sequence ID,pos1\na,1\na,2\n").unwrap();
        assert!(import_reason(&path).contains("more than once"));
    }

    #[test]
    fn ranking_table_tolerates_crlf_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.csv");
        std::fs::write(&path, "Sequence ID,pos1,pos2\r\n\r\na,1,0\r\nb,2,1\r\n").unwrap();
        let table = read_ranking_table(&path).unwrap();
        assert_eq!(table.ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(table.row(1).to_vec(), vec![2, 1]);
    }

    #[test]
    fn quoted_ids_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.csv");
        let ids = vec!["sp|P1,x".to_string(), "two\nlines".to_string(), "say \"hi\"".to_string()];
        let labels = vec!["pos1".to_string(), "pos2".to_string()];
        let ranks = ndarray::array![[1u8, 0], [2, 1], [0, 3]];
        let table = RankingTable::new(ids, labels, ranks).unwrap();
        write_ranking_table(&path, &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"sp|P1,x\",1,0"));
        assert_eq!(read_ranking_table(&path).unwrap(), table);
    }

    #[test]
    fn position_map_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.csv");
        let map = PositionMap::build(&matrix());
        write_position_map(&path, &map).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Alignment position,seq0,seq1,seq2,seq3");
        assert_eq!(lines[1], "0,0,0,0,0");
        assert_eq!(lines[2], "1,,1,1,1");
        assert_eq!(lines[4], "3,,3,3,");

        assert_eq!(read_position_map(&path).unwrap(), map);
    }

    #[test]
    fn position_map_rejects_out_of_order_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.csv");
        std::fs::write(&path, "Alignment position,a\n0,0\n2,1\n").unwrap();
        assert!(matches!(
            read_position_map(&path),
            Err(PipelineError::MalformedTable { .. })
        ));
    }

    #[test]
    fn pca_tables_have_component_headers() {
        let dir = tempfile::tempdir().unwrap();
        let table = rank_alignment(&matrix()).unwrap();
        let model = PcaModel::fit(&table, 2).unwrap();

        let scores_path = dir.path().join("scores.csv");
        write_scores(&scores_path, table.ids(), &model.scores(&table).unwrap()).unwrap();
        let scores = std::fs::read_to_string(&scores_path).unwrap();
        assert!(scores.starts_with("Sequence ID,PC1,PC2\nseq0,"));
        assert_eq!(scores.lines().count(), 5);

        let loadings_path = dir.path().join("loadings.csv");
        write_loadings(&loadings_path, model.labels(), &model.loadings()).unwrap();
        let loadings = std::fs::read_to_string(&loadings_path).unwrap();
        assert!(loadings.starts_with("Position,PC1,PC2\npos1,"));

        let variance_path = dir.path().join("variance.csv");
        write_variance(&variance_path, &model).unwrap();
        let variance = std::fs::read_to_string(&variance_path).unwrap();
        assert_eq!(variance.lines().next(), Some("Component,Eigenvalue,Proportion explained"));
        assert!(variance.lines().nth(2).unwrap().starts_with("PC2,"));

        let bad = write_scores(&dir.path().join("bad.csv"), &table.ids()[..2], &model.scores(&table).unwrap());
        assert!(bad.is_err());
        assert!(!dir.path().join("bad.csv").exists());
    }

    #[test]
    fn loadings_report_is_tab_separated() {
        let dir = tempfile::tempdir().unwrap();
        let m = matrix();
        let table = rank_alignment(&m).unwrap();
        let model = PcaModel::fit(&table, 2).unwrap();
        let report = LoadingsReport::build(&model, &PositionMap::build(&m), 0.1, 0.4).unwrap();

        let path = dir.path().join("report.tsv");
        write_loadings_report(&path, &report).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id\tPC1\tPC2\teuclid_dist\tmax_distance\tclass\tseq0\tseq1\tseq2\tseq3");
        assert_eq!(lines.len(), 5);
        // pos4: seq0 and seq3 are gaps, seq1/seq2 at original position 4
        let last: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(last[0], "pos4");
        assert_eq!(&last[6..], &["", "4", "4", ""]);
    }
}
