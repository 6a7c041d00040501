//! Run configuration, read from a TOML file and overridden from the command line.
//!
//! ```toml
//! [input]
//! fasta = "proteins.fasta"
//! slice_positions = "positions.txt"
//! sequence_start = 1
//!
//! [output]
//! results_folder = "results"
//!
//! [aligner]
//! kind = "mafft"
//! threads = 4
//!
//! [analysis]
//! frac_components = 0.1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::msa::aligner::{AlignerConfig, AlignerKind};
use crate::msa::slice::SliceRange;
use crate::pca::report::validate_cutoffs;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub aligner: AlignerSection,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Unaligned multi-FASTA; required.
    pub fasta: Option<PathBuf>,
    /// Optional `start,end` lines, one per input sequence.
    pub slice_positions: Option<PathBuf>,
    pub sequence_start: usize,
    /// Unset keeps sequences up to their end.
    pub sequence_end: Option<usize>,
    /// Skip the aligner: `fasta` already holds an alignment.
    pub pre_aligned: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            fasta: None,
            slice_positions: None,
            sequence_start: 1,
            sequence_end: None,
            pre_aligned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub results_folder: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_folder: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignerSection {
    pub kind: AlignerKind,
    pub executable: Option<PathBuf>,
    /// 0 = automatic
    pub threads: usize,
    pub parttree: bool,
    pub timeout_secs: u64,
}

impl Default for AlignerSection {
    fn default() -> Self {
        let d = AlignerConfig::default();
        Self {
            kind: d.kind,
            executable: d.executable,
            threads: d.threads,
            parttree: d.parttree,
            timeout_secs: d.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Fixed component count; overrides `frac_components` when set.
    pub n_components: Option<usize>,
    /// Fraction of alignment columns kept as components.
    pub frac_components: f64,
    pub components_to_project: usize,
    pub conserved_cutoff: f64,
    pub variable_cutoff: f64,
    /// Ranking threads; 0 = automatic
    pub threads: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_components: None,
            frac_components: 0.1,
            components_to_project: 2,
            conserved_cutoff: 0.1,
            variable_cutoff: 0.4,
            threads: 0,
        }
    }
}

impl AnalysisConfig {
    /// Checks shared by full runs and the standalone `pca` / `report` commands.
    pub fn validate(&self) -> Result<()> {
        if !(self.frac_components > 0.0 && self.frac_components <= 1.0) {
            return Err(invalid(format!(
                "frac_components must lie in (0, 1], got {}",
                self.frac_components
            )));
        }
        if self.n_components == Some(0) {
            return Err(invalid("n_components must be at least 1"));
        }
        if self.components_to_project == 0 {
            return Err(invalid("components_to_project must be at least 1"));
        }
        validate_cutoffs(self.conserved_cutoff, self.variable_cutoff)
    }
}

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::Configuration(msg.into())
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| invalid(e.to_string()))
    }

    /// Relative paths in the file are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read config file '{}': {}", path.display(), e)))?;
        let mut cfg = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            cfg.resolve_relative_to(base);
        }
        Ok(cfg)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.input.fasta.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.input.slice_positions.as_mut() {
            resolve(p);
        }
        resolve(&mut self.output.results_folder);
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.fasta.is_none() {
            return Err(invalid("no input FASTA given"));
        }
        self.slice_range()?;

        self.analysis.validate()?;
        if self.aligner.timeout_secs == 0 {
            return Err(invalid("aligner timeout must be positive"));
        }
        Ok(())
    }

    pub fn input_fasta(&self) -> Result<&Path> {
        self.input
            .fasta
            .as_deref()
            .ok_or_else(|| invalid("no input FASTA given"))
    }

    /// Default slice applied to every sequence when no positions file is usable.
    pub fn slice_range(&self) -> Result<SliceRange> {
        SliceRange::new(self.input.sequence_start, self.input.sequence_end)
    }

    pub fn aligner_config(&self) -> AlignerConfig {
        AlignerConfig {
            kind: self.aligner.kind,
            executable: self.aligner.executable.clone(),
            threads: self.aligner.threads,
            parttree: self.aligner.parttree,
            timeout: Duration::from_secs(self.aligner.timeout_secs),
        }
    }

    /// Component count for an alignment with `n_columns` columns.
    pub fn components_for(&self, n_columns: usize) -> usize {
        self.analysis
            .n_components
            .unwrap_or_else(|| crate::pca::components_for(n_columns, self.analysis.frac_components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = RunConfig::from_toml_str("[input]\nfasta = \"in.fasta\"\n").unwrap();
        assert_eq!(cfg.input.fasta.as_deref(), Some(Path::new("in.fasta")));
        assert_eq!(cfg.input.sequence_start, 1);
        assert_eq!(cfg.output.results_folder, PathBuf::from("results"));
        assert_eq!(cfg.aligner.kind, AlignerKind::Mafft);
        assert_eq!(cfg.analysis.frac_components, 0.1);
        assert_eq!(cfg.analysis.components_to_project, 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
            [input]
            fasta = "in.fasta"
            slice_positions = "pos.txt"
            sequence_start = 5
            sequence_end = 80

            [output]
            results_folder = "out"

            [aligner]
            kind = "clustal-omega"
            threads = 0
            parttree = true
            timeout_secs = 60

            [analysis]
            n_components = 3
            conserved_cutoff = 0.2
            variable_cutoff = 0.5
        "#;
        let cfg = RunConfig::from_toml_str(text).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.aligner.kind, AlignerKind::Clustalo);
        assert_eq!(cfg.slice_range().unwrap(), SliceRange { start: 5, end: Some(80) });
        assert_eq!(cfg.components_for(500), 3);

        let al = cfg.aligner_config();
        assert_eq!(al.threads, 0);
        assert!(al.parttree);
        assert_eq!(al.timeout, Duration::from_secs(60));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RunConfig::from_toml_str("[analysis]\nfrac = 0.2\n").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn validation_rules() {
        let base = RunConfig {
            input: InputConfig {
                fasta: Some(PathBuf::from("in.fasta")),
                ..InputConfig::default()
            },
            ..RunConfig::default()
        };
        base.validate().unwrap();

        let broken: [fn(&mut RunConfig); 10] = [
            |c| c.input.fasta = None,
            |c| c.input.sequence_start = 0,
            |c| c.input.sequence_end = Some(0),
            |c| c.analysis.frac_components = 0.0,
            |c| c.analysis.frac_components = 1.5,
            |c| c.analysis.n_components = Some(0),
            |c| c.analysis.components_to_project = 0,
            |c| c.analysis.conserved_cutoff = 0.5,
            |c| c.analysis.variable_cutoff = 1.2,
            |c| c.aligner.timeout_secs = 0,
        ];
        for (i, breaks) in broken.iter().enumerate() {
            let mut cfg = base.clone();
            breaks(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(PipelineError::Configuration(_))),
                "case {} should fail validation",
                i
            );
        }
    }

    #[test]
    fn analysis_section_validates_alone() {
        AnalysisConfig::default().validate().unwrap();

        let reversed = AnalysisConfig {
            conserved_cutoff: 0.5,
            variable_cutoff: 0.1,
            ..AnalysisConfig::default()
        };
        assert!(matches!(reversed.validate(), Err(PipelineError::Configuration(_))));

        let oversized = AnalysisConfig {
            frac_components: 2.0,
            components_to_project: 0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(oversized.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn component_fraction_floor_is_one() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.components_for(5), 1);
        assert_eq!(cfg.components_for(250), 25);
    }

    #[test]
    fn file_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[input]\nfasta = \"seqs.fasta\"\n[output]\nresults_folder = \"/abs/out\"\n").unwrap();
        let cfg = RunConfig::from_file(&path).unwrap();
        assert_eq!(cfg.input.fasta, Some(dir.path().join("seqs.fasta")));
        assert_eq!(cfg.output.results_folder, PathBuf::from("/abs/out"));

        let missing = RunConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(PipelineError::Configuration(_))));
    }
}
