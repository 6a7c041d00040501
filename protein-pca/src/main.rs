use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

use protein_pca::config::{AnalysisConfig, RunConfig};
use protein_pca::io::{fasta, table};
use protein_pca::msa::aligner::{align_sequences, AlignerKind};
use protein_pca::msa::slice::{read_positions, slice_records};
use protein_pca::msa::AlignmentMatrix;
use protein_pca::pca::report::LoadingsReport;
use protein_pca::pca::{ModelMeta, PcaModel};
use protein_pca::pipeline::{self, RunPaths};
use protein_pca::position::PositionMap;
use protein_pca::rank::{rank_alignment, with_threads};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "protein-pca",
    author,
    version,
    about = "Rank-encoded PCA of protein alignments: conserved vs. variable positions",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct AlignerArgs {
    /// Aligner to run
    #[arg(long, value_enum)]
    aligner: Option<AlignerKind>,
    /// Path to the aligner executable (searched in PATH by default)
    #[arg(long = "aligner-path")]
    aligner_path: Option<PathBuf>,
    /// Aligner threads, 0 = automatic
    #[arg(long = "aligner-threads")]
    aligner_threads: Option<usize>,
    /// Use MAFFT's PartTree for very large inputs
    #[arg(long)]
    parttree: bool,
    /// Kill the aligner after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct SliceArgs {
    /// Text file with one `start,end` line per sequence (1-based, inclusive)
    #[arg(long)]
    positions: Option<PathBuf>,
    #[arg(long = "seq-start")]
    seq_start: Option<usize>,
    #[arg(long = "seq-end")]
    seq_end: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole pipeline: align, rank, PCA and loadings report
    Run {
        /// TOML run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Input protein FASTA (overrides the config file)
        #[arg(short, long)]
        fasta: Option<PathBuf>,
        /// Treat the input FASTA as an existing alignment
        #[arg(long = "pre-aligned")]
        pre_aligned: bool,
        /// Folder receiving the timestamped artifacts
        #[arg(short, long)]
        results: Option<PathBuf>,
        #[command(flatten)]
        slice: SliceArgs,
        #[command(flatten)]
        aligner: AlignerArgs,
        /// Ranking threads, 0 = automatic
        #[arg(short = 't', long)]
        threads: Option<usize>,
        #[arg(long = "n-components")]
        n_components: Option<usize>,
        #[arg(long = "frac-components")]
        frac_components: Option<f64>,
        #[arg(long = "components-to-project")]
        components_to_project: Option<usize>,
    },
    /// Slice and align raw sequences
    Align {
        /// Unaligned protein FASTA
        fasta: PathBuf,
        /// Aligned FASTA output
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        slice: SliceArgs,
        #[command(flatten)]
        aligner: AlignerArgs,
    },
    /// Rank-encode an alignment into a ranking table
    Rank {
        /// Aligned protein FASTA
        alignment: PathBuf,
        /// Ranking table CSV output
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short = 't', long, default_value_t = 0)]
        threads: usize,
    },
    /// Map alignment columns to original sequence positions
    MapPositions {
        /// Aligned protein FASTA
        alignment: PathBuf,
        /// Position map CSV output
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Fit PCA on a previously written ranking table
    Pca {
        /// Ranking table CSV
        ranking_table: PathBuf,
        /// Output folder
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// File name prefix (defaults to the current timestamp)
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long = "n-components")]
        n_components: Option<usize>,
        #[arg(long = "frac-components", default_value_t = 0.1)]
        frac_components: f64,
        #[arg(long = "components-to-project", default_value_t = 2)]
        components_to_project: usize,
    },
    /// Map PC1/PC2 loadings back to sequence positions
    Report {
        /// Fitted PCA model (.pca)
        #[arg(short, long)]
        model: PathBuf,
        /// Position map CSV
        #[arg(short, long)]
        positions: PathBuf,
        /// Loadings report TSV output
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0.1)]
        conserved: f64,
        #[arg(long, default_value_t = 0.4)]
        variable: f64,
    },
}

fn init_terminal_logger(level: LevelFilter) -> Result<()> {
    TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .context("cannot initialise logger")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            fasta,
            pre_aligned,
            results,
            slice,
            aligner,
            threads,
            n_components,
            frac_components,
            components_to_project,
        } => {
            let mut cfg = match &config {
                Some(path) => RunConfig::from_file(path)?,
                None => RunConfig::default(),
            };
            if fasta.is_some() {
                cfg.input.fasta = fasta;
            }
            cfg.input.pre_aligned |= pre_aligned;
            if let Some(r) = results {
                cfg.output.results_folder = r;
            }
            apply_slice_args(&mut cfg, slice);
            apply_aligner_args(&mut cfg, aligner);
            if let Some(t) = threads {
                cfg.analysis.threads = t;
            }
            if n_components.is_some() {
                cfg.analysis.n_components = n_components;
            }
            if let Some(f) = frac_components {
                cfg.analysis.frac_components = f;
            }
            if let Some(k) = components_to_project {
                cfg.analysis.components_to_project = k;
            }
            run_pipeline(cfg, cli.log_level)
        }
        Commands::Align {
            fasta,
            out,
            slice,
            aligner,
        } => {
            init_terminal_logger(cli.log_level)?;
            let mut cfg = RunConfig::default();
            apply_slice_args(&mut cfg, slice);
            apply_aligner_args(&mut cfg, aligner);
            run_align(&fasta, &out, &cfg)
        }
        Commands::Rank { alignment, out, threads } => {
            init_terminal_logger(cli.log_level)?;
            run_rank(&alignment, &out, threads)
        }
        Commands::MapPositions { alignment, out } => {
            init_terminal_logger(cli.log_level)?;
            let matrix = read_alignment(&alignment)?;
            table::write_position_map(&out, &PositionMap::build(&matrix))
                .with_context(|| format!("cannot write position map to '{}'", out.display()))?;
            info!("Position map saved: {}", out.display());
            Ok(())
        }
        Commands::Pca {
            ranking_table,
            out_dir,
            prefix,
            n_components,
            frac_components,
            components_to_project,
        } => {
            init_terminal_logger(cli.log_level)?;
            let mut cfg = RunConfig::default();
            cfg.output.results_folder = out_dir;
            cfg.analysis.n_components = n_components;
            cfg.analysis.frac_components = frac_components;
            cfg.analysis.components_to_project = components_to_project;
            cfg.analysis.validate()?;
            let prefix = prefix.unwrap_or_else(pipeline::timestamp);
            run_pca(&ranking_table, &cfg, &prefix)
        }
        Commands::Report {
            model,
            positions,
            out,
            conserved,
            variable,
        } => {
            init_terminal_logger(cli.log_level)?;
            let analysis = AnalysisConfig {
                conserved_cutoff: conserved,
                variable_cutoff: variable,
                ..AnalysisConfig::default()
            };
            analysis.validate()?;
            run_report(&model, &positions, &out, &analysis)
        }
    }
}

fn apply_slice_args(cfg: &mut RunConfig, args: SliceArgs) {
    if args.positions.is_some() {
        cfg.input.slice_positions = args.positions;
    }
    if let Some(s) = args.seq_start {
        cfg.input.sequence_start = s;
    }
    if args.seq_end.is_some() {
        cfg.input.sequence_end = args.seq_end;
    }
}

fn apply_aligner_args(cfg: &mut RunConfig, args: AlignerArgs) {
    if let Some(kind) = args.aligner {
        cfg.aligner.kind = kind;
    }
    if args.aligner_path.is_some() {
        cfg.aligner.executable = args.aligner_path;
    }
    if let Some(t) = args.aligner_threads {
        cfg.aligner.threads = t;
    }
    cfg.aligner.parttree |= args.parttree;
    if let Some(t) = args.timeout {
        cfg.aligner.timeout_secs = t;
    }
}

fn run_pipeline(cfg: RunConfig, level: LevelFilter) -> Result<()> {
    cfg.validate()?;
    let ts = pipeline::timestamp();
    let paths = RunPaths::new(&cfg, &ts)?;
    let log_file = File::create(&paths.log)
        .with_context(|| format!("cannot create log file '{}'", paths.log.display()))?;
    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .context("cannot initialise logger")?;

    let started = chrono::Local::now();
    let summary = pipeline::run_with_timestamp(&cfg, &ts)?;
    info!(
        "{} sequences x {} positions, {} components explaining {:.1}% of the variance",
        summary.n_sequences,
        summary.n_columns,
        summary.n_components,
        summary.variance_explained * 100.0
    );
    info!("Artifacts written to {}", summary.paths.folder.display());
    info!(
        "Run completed in {:.2} minutes.",
        (chrono::Local::now() - started).num_milliseconds() as f64 / 60_000.0
    );
    Ok(())
}

fn read_alignment(path: &Path) -> Result<AlignmentMatrix> {
    let matrix = AlignmentMatrix::from_fasta_file(path)
        .with_context(|| format!("cannot read alignment '{}'", path.display()))?;
    info!(
        "alignment: {} ({} sequences x {} columns)",
        path.display(),
        matrix.n_sequences(),
        matrix.n_columns()
    );
    Ok(matrix)
}

fn run_align(input: &Path, out: &Path, cfg: &RunConfig) -> Result<()> {
    let records = fasta::read_fasta_file(input)
        .with_context(|| format!("cannot read FASTA '{}'", input.display()))?;
    if records.is_empty() {
        anyhow::bail!("FASTA file '{}' contains no sequences", input.display());
    }
    let positions = read_positions(cfg.input.slice_positions.as_deref(), records.len(), cfg.slice_range()?)?;
    let sliced = slice_records(&records, &positions)?;
    let sliced_path = out.with_extension("sliced.fasta");
    let matrix = align_sequences(&sliced, &sliced_path, out, &cfg.aligner_config())?;
    info!(
        "Alignment saved: {} ({} sequences x {} columns)",
        out.display(),
        matrix.n_sequences(),
        matrix.n_columns()
    );
    Ok(())
}

fn run_rank(alignment: &Path, out: &Path, threads: usize) -> Result<()> {
    let matrix = read_alignment(alignment)?;
    let ranking = with_threads(threads, || rank_alignment(&matrix))??;
    table::write_ranking_table(out, &ranking)
        .with_context(|| format!("cannot write ranking table to '{}'", out.display()))?;
    info!("Ranking table saved: {}", out.display());
    Ok(())
}

fn run_pca(ranking_table: &Path, cfg: &RunConfig, prefix: &str) -> Result<()> {
    let ranking = pipeline::import_ranking_table(ranking_table)?;
    let paths = RunPaths::new(cfg, prefix)?;
    let mut model = pipeline::pca_stage(&ranking, cfg)?;
    model.set_meta(ModelMeta {
        ranking_table: Some(ranking_table.display().to_string()),
        build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
        build_timestamp: Some(chrono::Utc::now().to_rfc3339()),
    });
    pipeline::write_pca_outputs(&model, &ranking, &paths, cfg)?;
    info!("PCA model saved: {}", paths.pca_model.display());
    Ok(())
}

fn run_report(model_path: &Path, positions_path: &Path, out: &Path, analysis: &AnalysisConfig) -> Result<()> {
    let model = PcaModel::load_from_file(model_path)
        .with_context(|| format!("cannot load PCA model '{}'", model_path.display()))?;
    let positions = table::read_position_map(positions_path)
        .with_context(|| format!("cannot read position map '{}'", positions_path.display()))?;
    let report = LoadingsReport::build(&model, &positions, analysis.conserved_cutoff, analysis.variable_cutoff)?;
    table::write_loadings_report(out, &report)?;
    let (c, v, o) = report.class_counts();
    info!("{} conserved, {} variable, {} other positions", c, v, o);
    info!("Loadings report saved: {}", out.display());
    Ok(())
}
