//! 外部多序列比对器（MAFFT / Clustal Omega）的调用封装。
//!
//! 比对器被当作黑盒进程：输入未比对的 multi-FASTA，输出比对后的 FASTA。
//! 进程运行受调用方给定的超时约束，超时即终止。

use std::collections::HashSet;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::io::fasta::{self, FastaRecord, FastaWriter};
use crate::msa::AlignmentMatrix;

/// MAFFT 在不使用 parttree 时能处理的序列数上限
pub const MAFFT_MAX_SEQUENCES: usize = 1_000_000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AlignerKind {
    Mafft,
    #[serde(alias = "clustal-omega")]
    #[value(alias = "clustal-omega")]
    Clustalo,
}

impl AlignerKind {
    pub fn default_executable(self) -> &'static str {
        match self {
            AlignerKind::Mafft => "mafft",
            AlignerKind::Clustalo => "clustalo",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlignerConfig {
    pub kind: AlignerKind,
    /// 显式路径或可执行文件名；None 时在 PATH 中查找默认名称
    pub executable: Option<PathBuf>,
    /// 0 = 由比对器自行决定
    pub threads: usize,
    pub parttree: bool,
    pub timeout: Duration,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            kind: AlignerKind::Mafft,
            executable: None,
            threads: 1,
            parttree: false,
            timeout: Duration::from_secs(3600),
        }
    }
}

fn search_path(name: &Path) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// 定位比对器可执行文件。带目录的路径必须直接存在；裸名称在 PATH 中查找。
pub fn locate_executable(cfg: &AlignerConfig) -> Result<PathBuf> {
    let wanted = cfg
        .executable
        .clone()
        .unwrap_or_else(|| PathBuf::from(cfg.kind.default_executable()));

    if wanted.is_file() {
        return Ok(wanted);
    }
    let bare_name = wanted.parent().map_or(true, |p| p.as_os_str().is_empty());
    if bare_name {
        if let Some(found) = search_path(&wanted) {
            return Ok(found);
        }
    }
    Err(PipelineError::MissingExternalTool(wanted))
}

fn build_command(exe: &Path, input: &Path, output: &Path, cfg: &AlignerConfig) -> Result<Command> {
    let mut cmd = Command::new(exe);
    match cfg.kind {
        AlignerKind::Mafft => {
            // --inputorder：输出顺序与输入一致，后面按顺序恢复原始 ID
            let threads = if cfg.threads == 0 { "-1".to_string() } else { cfg.threads.to_string() };
            cmd.args(["--preservecase", "--inputorder", "--thread", threads.as_str()]);
            if cfg.parttree {
                cmd.arg("--parttree");
            }
            cmd.arg(input);
            cmd.stdout(Stdio::from(File::create(output)?));
        }
        AlignerKind::Clustalo => {
            cmd.arg("-i").arg(input).arg("-o").arg(output);
            cmd.args(["--outfmt=fasta", "--force", "--auto"]);
            if cfg.threads > 0 {
                cmd.arg(format!("--threads={}", cfg.threads));
            }
            cmd.stdout(Stdio::null());
        }
    }
    Ok(cmd)
}

fn log_tail(path: &Path, max_lines: usize) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(max_lines)..].join("\n")
}

/// 运行比对器，stderr 写入 `log_path`。
pub fn run_aligner(input: &Path, output: &Path, log_path: &Path, cfg: &AlignerConfig) -> Result<()> {
    let exe = locate_executable(cfg)?;
    let mut cmd = build_command(&exe, input, output, cfg)?;
    cmd.stdin(Stdio::null()).stderr(Stdio::from(File::create(log_path)?));
    info!("{:?}", cmd);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(PipelineError::MissingExternalTool(exe)),
        Err(e) => return Err(e.into()),
    };

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= cfg.timeout {
            // 进程可能已在 kill 之前退出，忽略该错误
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::AlignerFailed(format!(
                "'{}' timed out after {:.1}s",
                exe.display(),
                cfg.timeout.as_secs_f64()
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    debug!("aligner finished in {:.1}s", started.elapsed().as_secs_f64());

    if !status.success() {
        return Err(PipelineError::AlignerFailed(format!(
            "'{}' exited with {}: {}",
            exe.display(),
            status,
            log_tail(log_path, 5)
        )));
    }
    Ok(())
}

/// 比对器可能截断过长的 ID，按输入顺序换回原始 ID。
pub fn restore_ids(aligned: Vec<FastaRecord>, original_ids: &[String]) -> Result<Vec<FastaRecord>> {
    if aligned.len() != original_ids.len() {
        return Err(PipelineError::AlignerFailed(format!(
            "aligner returned {} sequences for {} inputs",
            aligned.len(),
            original_ids.len()
        )));
    }
    Ok(aligned
        .into_iter()
        .zip(original_ids)
        .map(|(mut rec, id)| {
            rec.id.clone_from(id);
            rec.desc = None;
            rec
        })
        .collect())
}

/// 比对阶段：写出输入 FASTA，调用比对器，读回比对结果并构建比对矩阵。
///
/// 成功后 `output` 中的 FASTA 已带有恢复后的原始 ID。
pub fn align_sequences(
    records: &[FastaRecord],
    input: &Path,
    output: &Path,
    cfg: &AlignerConfig,
) -> Result<AlignmentMatrix> {
    let mut seen = HashSet::with_capacity(records.len());
    for rec in records {
        if !seen.insert(rec.id.as_str()) {
            return Err(PipelineError::DuplicateSequenceId(rec.id.clone()));
        }
    }
    if cfg.kind == AlignerKind::Mafft && !cfg.parttree && records.len() > MAFFT_MAX_SEQUENCES {
        return Err(PipelineError::Configuration(format!(
            "{} sequences exceed the MAFFT limit of {}; enable parttree",
            records.len(),
            MAFFT_MAX_SEQUENCES
        )));
    }

    crate::io::write_atomically(input, |w| FastaWriter::new(w, 60).write_all(records))?;

    let log_path = output.with_extension("aligner.log");
    run_aligner(input, output, &log_path, cfg)?;
    info!("{:?} alignment successfully completed.", cfg.kind);

    let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    let aligned = restore_ids(fasta::read_fasta_file(output)?, &ids)?;
    let matrix = AlignmentMatrix::from_records(&aligned)?;
    crate::io::write_atomically(output, |w| FastaWriter::new(w, 0).write_all(&aligned))?;
    Ok(matrix)
}
