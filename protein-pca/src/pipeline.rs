//! Stage orchestration: align → rank → PCA → loadings report.
//!
//! Stages hand immutable values to each other. Each artifact is written atomically as soon as
//! its stage succeeds, so a failed run never leaves a half-written table behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use log::{debug, info, log_enabled, warn, Level};
use ndarray::s;

use crate::config::RunConfig;
use crate::error::Result;
use crate::io::{fasta, table};
use crate::msa::aligner::align_sequences;
use crate::msa::slice::{read_positions, slice_records};
use crate::msa::AlignmentMatrix;
use crate::pca::report::{LoadingsReport, PositionClass};
use crate::pca::{ModelMeta, Pca, PcaModel};
use crate::position::PositionMap;
use crate::rank::{rank_alignment, with_threads, RankingTable};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Artifact paths of one run, all prefixed with the run's start timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub folder: PathBuf,
    pub prefix: String,
    pub sliced_sequences: PathBuf,
    pub alignment: PathBuf,
    pub ranking_table: PathBuf,
    pub position_map: PathBuf,
    pub pca_scores: PathBuf,
    pub pca_loadings: PathBuf,
    pub pca_variance: PathBuf,
    pub pca_model: PathBuf,
    pub loadings_report: PathBuf,
    pub log: PathBuf,
}

impl RunPaths {
    /// Creates the results folder if it does not exist yet.
    pub fn new(config: &RunConfig, timestamp: &str) -> Result<Self> {
        let folder = config.output.results_folder.clone();
        if !folder.is_dir() {
            warn!("Results folder {} does not exist, creating it.", folder.display());
            std::fs::create_dir_all(&folder)?;
        }
        let file = |suffix: &str| folder.join(format!("{}_{}", timestamp, suffix));
        Ok(Self {
            sliced_sequences: file("sliced_sequences.fasta"),
            alignment: file("alignment.fasta"),
            ranking_table: file("ranking_table.csv"),
            position_map: file("position_map.csv"),
            pca_scores: file("pca_scores.csv"),
            pca_loadings: file("pca_loadings.csv"),
            pca_variance: file("pca_variance.csv"),
            pca_model: file("pca.pca"),
            loadings_report: file("loadings_report.tsv"),
            log: file("log.txt"),
            prefix: timestamp.to_string(),
            folder,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RankedAlignment {
    pub table: RankingTable,
    pub positions: PositionMap,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub n_sequences: usize,
    pub n_columns: usize,
    pub n_components: usize,
    /// Sum of the kept components' explained-variance ratios.
    pub variance_explained: f64,
    /// (conserved, variable, other) counts; `None` when fewer than two components were kept.
    pub position_classes: Option<(usize, usize, usize)>,
    pub paths: RunPaths,
}

fn minutes_since(started: DateTime<Local>) -> f64 {
    (Local::now() - started).num_milliseconds() as f64 / 60_000.0
}

/// Read the input FASTA and either align it or, for pre-aligned input, use it as is.
///
/// The aligned FASTA is always persisted at `paths.alignment`.
pub fn align_stage(config: &RunConfig, paths: &RunPaths) -> Result<AlignmentMatrix> {
    let input = config.input_fasta()?;
    let records = fasta::read_fasta_file(input)?;
    info!("Read {} sequences from {}", records.len(), input.display());

    if config.input.pre_aligned {
        let matrix = AlignmentMatrix::from_records(&records)?;
        crate::io::write_atomically(&paths.alignment, |w| {
            fasta::FastaWriter::new(w, 0).write_all(&matrix.to_records())
        })?;
        info!("Input is pre-aligned, skipping the aligner.");
        return Ok(matrix);
    }

    let positions = read_positions(config.input.slice_positions.as_deref(), records.len(), config.slice_range()?)?;
    let sliced = slice_records(&records, &positions)?;
    align_sequences(&sliced, &paths.sliced_sequences, &paths.alignment, &config.aligner_config())
}

pub fn rank_stage(matrix: &AlignmentMatrix, config: &RunConfig) -> Result<RankedAlignment> {
    let table = with_threads(config.analysis.threads, || rank_alignment(matrix))??;
    let positions = PositionMap::build(matrix);
    info!(
        "Ranked {} sequences x {} alignment positions.",
        table.n_sequences(),
        table.n_columns()
    );
    Ok(RankedAlignment { table, positions })
}

pub fn pca_stage(table: &RankingTable, config: &RunConfig) -> Result<PcaModel> {
    let k = config.components_for(table.n_columns());
    info!("Keeping {} principal components.", k);
    let mut pca = Pca::new(k);
    pca.fit(table)?;
    pca.into_model()
}

pub fn report_stage(model: &PcaModel, positions: &PositionMap, config: &RunConfig) -> Result<LoadingsReport> {
    let report = LoadingsReport::build(
        model,
        positions,
        config.analysis.conserved_cutoff,
        config.analysis.variable_cutoff,
    )?;
    let (conserved, variable, other) = report.class_counts();
    info!(
        "{} conserved, {} variable and {} other positions (max loading distance {:.4}).",
        conserved, variable, other, report.max_distance
    );
    if log_enabled!(Level::Debug) {
        for (label, residues) in positions_of(&report, PositionClass::Variable) {
            let residues: Vec<String> = residues.iter().flatten().map(u32::to_string).collect();
            debug!("variable {}: residues {}", label, residues.join(","));
        }
    }
    Ok(report)
}

/// Persist scores (projection onto the first `components_to_project` components), loadings,
/// explained variance and the fitted model.
pub fn write_pca_outputs(model: &PcaModel, table: &RankingTable, paths: &RunPaths, config: &RunConfig) -> Result<()> {
    let wanted = config.analysis.components_to_project;
    let k = if wanted > model.n_components() {
        warn!(
            "{} components to project requested, only {} were kept.",
            wanted,
            model.n_components()
        );
        model.n_components()
    } else {
        wanted
    };

    let scores = model.scores(table)?.slice_move(s![.., ..k]);

    table::write_scores(&paths.pca_scores, table.ids(), &scores)?;
    table::write_loadings(&paths.pca_loadings, model.labels(), &model.loadings())?;
    table::write_variance(&paths.pca_variance, model)?;
    model.save_to_file(&paths.pca_model)?;
    Ok(())
}

/// Import a ranking table written by an earlier run.
pub fn import_ranking_table(path: &Path) -> Result<RankingTable> {
    let table = table::read_ranking_table(path)?;
    info!(
        "Imported ranking table {} ({} sequences x {} positions).",
        path.display(),
        table.n_sequences(),
        table.n_columns()
    );
    Ok(table)
}

/// Run every stage with artifacts named after `timestamp`.
pub fn run_with_timestamp(config: &RunConfig, timestamp: &str) -> Result<RunSummary> {
    config.validate()?;
    let paths = RunPaths::new(config, timestamp)?;

    let started = Local::now();
    let matrix = align_stage(config, &paths)?;
    info!("Alignment stage completed in {:.2} minutes.", minutes_since(started));

    let started = Local::now();
    let ranked = rank_stage(&matrix, config)?;
    table::write_ranking_table(&paths.ranking_table, &ranked.table)?;
    table::write_position_map(&paths.position_map, &ranked.positions)?;
    info!("Ranking stage completed in {:.2} minutes.", minutes_since(started));

    let started = Local::now();
    let mut model = pca_stage(&ranked.table, config)?;
    model.set_meta(ModelMeta {
        ranking_table: Some(paths.ranking_table.display().to_string()),
        build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
        build_timestamp: Some(Utc::now().to_rfc3339()),
    });
    write_pca_outputs(&model, &ranked.table, &paths, config)?;
    info!("PCA stage completed in {:.2} minutes.", minutes_since(started));

    let position_classes = if model.n_components() >= 2 {
        let report = report_stage(&model, &ranked.positions, config)?;
        table::write_loadings_report(&paths.loadings_report, &report)?;
        Some(report.class_counts())
    } else {
        warn!("Only one principal component kept; skipping the loadings report.");
        None
    };

    Ok(RunSummary {
        n_sequences: matrix.n_sequences(),
        n_columns: matrix.n_columns(),
        n_components: model.n_components(),
        variance_explained: model.explained_variance_ratio().sum(),
        position_classes,
        paths,
    })
}

pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let started = Local::now();
    let summary = run_with_timestamp(config, &timestamp())?;
    info!("Run completed in {:.2} minutes.", minutes_since(started));
    Ok(summary)
}

/// Alignment columns of one class, as (label, 1-based positions) pairs.
pub fn positions_of(report: &LoadingsReport, class: PositionClass) -> Vec<(String, Vec<Option<u32>>)> {
    report
        .with_class(class)
        .map(|r| (r.label.clone(), r.positions.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;
    use crate::error::PipelineError;

    const ALIGNED: &str = "\
>seq0 first
AB-CAMKV
>seq1
B-CC-MKV
>seq2
ABCDEMRV
>seq3
-ABCEMRL
>seq4
ABCDEWRL
>seq5
ABCE-WKL
";

    fn config(dir: &Path) -> RunConfig {
        let fasta = dir.join("aligned.fasta");
        std::fs::write(&fasta, ALIGNED).unwrap();
        let mut cfg = RunConfig {
            input: InputConfig {
                fasta: Some(fasta),
                pre_aligned: true,
                ..InputConfig::default()
            },
            ..RunConfig::default()
        };
        cfg.output.results_folder = dir.join("results");
        cfg.analysis.n_components = Some(3);
        cfg
    }

    #[test]
    fn run_paths_are_timestamp_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let paths = RunPaths::new(&cfg, "20240101-120000").unwrap();
        assert!(paths.folder.is_dir());
        assert_eq!(
            paths.ranking_table.file_name().unwrap(),
            "20240101-120000_ranking_table.csv"
        );
        assert_eq!(paths.pca_model.file_name().unwrap(), "20240101-120000_pca.pca");
        assert_eq!(paths.log.file_name().unwrap(), "20240101-120000_log.txt");
    }

    #[test]
    fn full_run_on_pre_aligned_input() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let summary = run_with_timestamp(&cfg, "20240101-120000").unwrap();

        assert_eq!(summary.n_sequences, 6);
        assert_eq!(summary.n_columns, 8);
        assert_eq!(summary.n_components, 3);
        assert!(summary.variance_explained > 0.0 && summary.variance_explained <= 1.0 + 1e-9);
        let (c, v, o) = summary.position_classes.unwrap();
        assert_eq!(c + v + o, 8);

        let p = &summary.paths;
        for f in [
            &p.alignment,
            &p.ranking_table,
            &p.position_map,
            &p.pca_scores,
            &p.pca_loadings,
            &p.pca_variance,
            &p.pca_model,
            &p.loadings_report,
        ] {
            assert!(f.is_file(), "{} missing", f.display());
        }
        assert!(!p.sliced_sequences.exists());

        let table = import_ranking_table(&p.ranking_table).unwrap();
        assert_eq!(table.n_sequences(), 6);
        assert_eq!(table.ids()[0], "seq0");

        let model = PcaModel::load_from_file(&p.pca_model).unwrap();
        assert_eq!(model.n_components(), 3);
        assert_eq!(model.meta().ranking_table.as_deref(), Some(p.ranking_table.display().to_string().as_str()));

        let scores = std::fs::read_to_string(&p.pca_scores).unwrap();
        assert!(scores.starts_with("Sequence ID,PC1,PC2\n"));
    }

    #[test]
    fn stages_compose_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let matrix = AlignmentMatrix::from_fasta_file(cfg.input_fasta().unwrap()).unwrap();
        let ranked = rank_stage(&matrix, &cfg).unwrap();
        let model = pca_stage(&ranked.table, &cfg).unwrap();
        let report = report_stage(&model, &ranked.positions, &cfg).unwrap();
        assert_eq!(report.rows.len(), 8);
        let variable = positions_of(&report, PositionClass::Variable);
        assert_eq!(variable.len(), report.class_counts().1);
    }

    #[test]
    fn single_component_skips_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.analysis.n_components = None;
        let summary = run_with_timestamp(&cfg, "20240101-130000").unwrap();
        assert_eq!(summary.n_components, 1);
        assert!(summary.position_classes.is_none());
        assert!(!summary.paths.loadings_report.exists());
        // a single kept component caps the projection
        let scores = std::fs::read_to_string(&summary.paths.pca_scores).unwrap();
        assert!(scores.starts_with("Sequence ID,PC1\n"));
    }

    #[test]
    fn failed_run_leaves_no_ranking_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        std::fs::write(cfg.input_fasta().unwrap(), ">a\nMKV\n>b\nMK\n").unwrap();
        cfg.analysis.n_components = Some(2);
        let err = run_with_timestamp(&cfg, "20240101-140000").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedAlignment(_)));
        let paths = RunPaths::new(&cfg, "20240101-140000").unwrap();
        assert!(!paths.ranking_table.exists());
        assert!(!paths.position_map.exists());
    }

    #[test]
    fn missing_ranking_table_is_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = import_ranking_table(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::RankImport { .. }));
    }
}
