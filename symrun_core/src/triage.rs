use crate::replay::{ReplayError, ReplayRunner, ReplayStatus};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker the replayer prints when the instrumented program did not exit
/// cleanly. Its presence gates a captured block into classification.
pub const ABNORMAL_EXIT_MARKER: &str = "EXIT STATUS: ABNORMAL";

/// Marker identifying sanitizer diagnostic lines within a captured block.
pub const SANITIZER_MARKER: &str = "UndefinedBehaviorSanitizer";

/// Extension of recorded test-case files in a campaign's output directory.
pub const TEST_CASE_EXTENSION: &str = "ktest";

#[derive(Error, Debug)]
pub enum TriageError {
    /// The campaign output directory is absent or unreadable. Fatal for the
    /// triage pass only; a directory with zero test cases is not an error.
    #[error("campaign output directory {path:?} is absent or unreadable: {detail}")]
    OutputDirUnreadable { path: PathBuf, detail: String },

    /// The artifact to replay against does not exist, so no replay can
    /// start. A fatal configuration error for the whole pass.
    #[error("instrumented artifact {0:?} does not exist")]
    InstrumentedArtifactMissing(PathBuf),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// A `DiagnosticExtractor` classifies the captured output of one replay and
/// pulls out its diagnostic payload.
///
/// This is the typed seam over the replay tool's output: the triage
/// algorithm never looks at text itself, so a future structured output
/// format only needs a new implementation of this trait.
pub trait DiagnosticExtractor {
    /// Examines one replay's captured standard-error lines.
    ///
    /// # Returns
    /// * `None`: the replay is not a candidate (no abnormal-exit evidence);
    ///   the expected majority case.
    /// * `Some(payload)`: the block is a candidate; `payload` holds the
    ///   diagnostic lines in capture order and may be empty when the block
    ///   carries no extractable diagnostic.
    fn extract(&self, stderr_lines: &[String]) -> Option<Vec<String>>;
}

/// The concrete substring classifier over the replayer's text output:
/// a block is a candidate iff any line contains [`ABNORMAL_EXIT_MARKER`];
/// the payload is every line containing [`SANITIZER_MARKER`].
#[derive(Debug, Default)]
pub struct UbsanExtractor;

impl UbsanExtractor {
    pub fn new() -> Self {
        UbsanExtractor
    }
}

impl DiagnosticExtractor for UbsanExtractor {
    fn extract(&self, stderr_lines: &[String]) -> Option<Vec<String>> {
        if !stderr_lines.iter().any(|l| l.contains(ABNORMAL_EXIT_MARKER)) {
            return None;
        }
        Some(
            stderr_lines
                .iter()
                .filter(|l| l.contains(SANITIZER_MARKER))
                .cloned()
                .collect(),
        )
    }
}

/// One replayed test case that produced diagnostic evidence.
///
/// Findings are retained per (test case, diagnostic block) pair for
/// provenance, even when their diagnostic text duplicates an earlier
/// finding's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageFinding {
    /// File name of the originating recorded test case.
    pub test_case: String,
    pub diagnostic_lines: Vec<String>,
}

/// Aggregate result of one triage pass.
#[derive(Debug, Default)]
pub struct TriageReport {
    pub findings: Vec<TriageFinding>,
    /// Unique diagnostic lines in first-seen order. The deduplication key
    /// is the exact line content, not the test case: byte-identical
    /// diagnostics from different test cases are counted once.
    pub distinct_diagnostics: Vec<String>,
    pub replayed: usize,
    pub timed_out: usize,
}

impl TriageReport {
    pub fn distinct_count(&self) -> usize {
        self.distinct_diagnostics.len()
    }

    /// Writes the plain-text report: per finding the test-case identifier
    /// and its indented diagnostic lines, then the distinct diagnostic
    /// lines, then the summary count.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for finding in &self.findings {
            writeln!(w, "{}", finding.test_case)?;
            for line in &finding.diagnostic_lines {
                writeln!(w, "\t{line}")?;
            }
        }
        for line in &self.distinct_diagnostics {
            writeln!(w, "{line}")?;
        }
        writeln!(
            w,
            "In total, {} distinct diagnostics are triggered",
            self.distinct_count()
        )
    }
}

/// Replays every recorded test case in `output_dir` against the runner's
/// instrumented artifact, classifies the captured output through
/// `extractor`, and deduplicates diagnostics by exact line content.
///
/// Test cases are visited in directory-listing order; no ordering is
/// guaranteed or assumed. A timed-out or uneventful replay contributes no
/// finding. A candidate block whose payload is empty is dropped from both
/// the finding list and the distinct tally.
pub fn triage(
    output_dir: &Path,
    runner: &ReplayRunner,
    extractor: &dyn DiagnosticExtractor,
) -> Result<TriageReport, TriageError> {
    if !runner.instrumented_artifact().exists() {
        return Err(TriageError::InstrumentedArtifactMissing(
            runner.instrumented_artifact().to_path_buf(),
        ));
    }
    let entries = fs::read_dir(output_dir).map_err(|e| TriageError::OutputDirUnreadable {
        path: output_dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut report = TriageReport::default();
    let mut seen_digests: HashSet<[u8; 16]> = HashSet::new();

    for entry in entries {
        let entry = entry.map_err(|e| TriageError::OutputDirUnreadable {
            path: output_dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TEST_CASE_EXTENSION) {
            continue;
        }

        report.replayed += 1;
        let stderr_lines = match runner.replay(&path)? {
            ReplayStatus::Exited { stderr_lines, .. } => stderr_lines,
            ReplayStatus::TimedOut => {
                report.timed_out += 1;
                continue;
            }
        };

        let Some(payload) = extractor.extract(&stderr_lines) else {
            continue;
        };
        if payload.is_empty() {
            // Abnormal exit without an extractable diagnostic: dropped from
            // both the finding list and the tally.
            continue;
        }

        for line in &payload {
            let digest = md5::compute(line.as_bytes()).0;
            if seen_digests.insert(digest) {
                report.distinct_diagnostics.push(line.clone());
            }
        }
        report.findings.push(TriageFinding {
            test_case: entry.file_name().to_string_lossy().into_owned(),
            diagnostic_lines: payload,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod extractor_tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normal_exit_is_not_a_candidate() {
        let extractor = UbsanExtractor::new();
        let captured = lines(&["KLEE-REPLAY: NOTE: ...", "EXIT STATUS: NORMAL (0 seconds)"]);
        assert_eq!(extractor.extract(&captured), None);
    }

    #[test]
    fn abnormal_exit_yields_sanitizer_lines_in_capture_order() {
        let extractor = UbsanExtractor::new();
        let captured = lines(&[
            "KLEE-REPLAY: NOTE: ...",
            "demo.c:12:5: runtime error: signed integer overflow (UndefinedBehaviorSanitizer)",
            "demo.c:30:1: runtime error: shift exponent too large (UndefinedBehaviorSanitizer)",
            "EXIT STATUS: ABNORMAL (signal 6)",
        ]);
        let payload = extractor.extract(&captured).expect("candidate block");
        assert_eq!(payload.len(), 2);
        assert!(payload[0].contains("signed integer overflow"));
        assert!(payload[1].contains("shift exponent too large"));
    }

    #[test]
    fn abnormal_exit_without_sanitizer_line_is_an_empty_payload() {
        // Open question: such a block is a candidate but currently counts
        // as no finding; triage drops it from the list and the tally.
        let extractor = UbsanExtractor::new();
        let captured = lines(&["Segmentation fault", "EXIT STATUS: ABNORMAL (signal 11)"]);
        let payload = extractor.extract(&captured).expect("candidate block");
        assert!(payload.is_empty());
    }
}

#[cfg(test)]
mod triage_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// Fake replayer that copies the test-case file to stderr, so each
    /// `.ktest` fixture fully scripts its own replay output.
    fn fake_replayer(dir: &Path) -> PathBuf {
        let path = dir.join("fake-replay.sh");
        fs::write(&path, "#!/bin/sh\ncat \"$2\" >&2\nexit 0\n").expect("script written");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("script executable");
        path
    }

    fn runner(dir: &Path, artifact: &Path) -> ReplayRunner {
        ReplayRunner::new(
            fake_replayer(dir),
            artifact.to_path_buf(),
            Duration::from_secs(5),
        )
    }

    struct Fixture {
        root: tempfile::TempDir,
        output_dir: PathBuf,
        artifact: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("temp root");
        let output_dir = root.path().join("output/dfs/demo");
        fs::create_dir_all(&output_dir).expect("output dir");
        let artifact = root.path().join("demo_ubsan.bc");
        fs::write(&artifact, b"bitcode placeholder").expect("artifact placeholder");
        Fixture {
            root,
            output_dir,
            artifact,
        }
    }

    const OVERFLOW_DIAG: &str =
        "demo.c:12:5: runtime error: signed integer overflow (UndefinedBehaviorSanitizer)";
    const SHIFT_DIAG: &str =
        "demo.c:30:1: runtime error: shift exponent too large (UndefinedBehaviorSanitizer)";

    fn write_test_case(fx: &Fixture, name: &str, stderr_text: &str) {
        fs::write(fx.output_dir.join(name), stderr_text).expect("test case written");
    }

    #[test]
    fn byte_identical_diagnostics_count_once_but_both_findings_remain() {
        let fx = fixture();
        let block = format!("{OVERFLOW_DIAG}\nEXIT STATUS: ABNORMAL (signal 6)\n");
        write_test_case(&fx, "test000001.ktest", &block);
        write_test_case(&fx, "test000002.ktest", &block);

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");

        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.distinct_count(), 1);
        assert_eq!(report.distinct_diagnostics, vec![OVERFLOW_DIAG.to_string()]);
    }

    #[test]
    fn distinct_diagnostics_are_kept_in_first_seen_order() {
        let fx = fixture();
        write_test_case(
            &fx,
            "test000001.ktest",
            &format!("{OVERFLOW_DIAG}\n{SHIFT_DIAG}\nEXIT STATUS: ABNORMAL (signal 6)\n"),
        );
        write_test_case(
            &fx,
            "test000002.ktest",
            &format!("{SHIFT_DIAG}\nEXIT STATUS: ABNORMAL (signal 6)\n"),
        );

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");

        assert_eq!(report.findings.len(), 2);
        assert_eq!(
            report.distinct_diagnostics,
            vec![OVERFLOW_DIAG.to_string(), SHIFT_DIAG.to_string()]
        );
        assert_eq!(report.replayed, 2);
    }

    #[test]
    fn empty_output_directory_yields_empty_report_not_an_error() {
        let fx = fixture();
        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");
        assert!(report.findings.is_empty());
        assert_eq!(report.distinct_count(), 0);
        assert_eq!(report.replayed, 0);
    }

    #[test]
    fn non_test_case_files_are_ignored() {
        let fx = fixture();
        fs::write(fx.output_dir.join("run.stats"), b"engine statistics").expect("stats file");
        fs::write(
            fx.output_dir.join("info"),
            format!("{OVERFLOW_DIAG}\nEXIT STATUS: ABNORMAL\n"),
        )
        .expect("info file");

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");
        assert_eq!(report.replayed, 0);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn normal_exits_contribute_no_finding() {
        let fx = fixture();
        write_test_case(&fx, "test000001.ktest", "EXIT STATUS: NORMAL (0 seconds)\n");

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");
        assert_eq!(report.replayed, 1);
        assert!(report.findings.is_empty());
        assert_eq!(report.distinct_count(), 0);
    }

    #[test]
    fn timed_out_replays_are_counted_but_contribute_no_finding() {
        let fx = fixture();
        write_test_case(&fx, "test000001.ktest", "never read\n");

        let slow_replayer = fx.root.path().join("slow-replay.sh");
        fs::write(&slow_replayer, "#!/bin/sh\nsleep 5\n").expect("script written");
        fs::set_permissions(&slow_replayer, fs::Permissions::from_mode(0o755))
            .expect("script executable");
        let runner = ReplayRunner::new(
            slow_replayer,
            fx.artifact.clone(),
            Duration::from_millis(100),
        );

        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");
        assert_eq!(report.replayed, 1);
        assert_eq!(report.timed_out, 1);
        assert!(report.findings.is_empty());
        assert_eq!(report.distinct_count(), 0);
    }

    #[test]
    fn abnormal_exit_without_sanitizer_line_is_not_a_finding() {
        // Flags the documented open question: the candidate block is
        // silently dropped from both the list and the tally.
        let fx = fixture();
        write_test_case(
            &fx,
            "test000001.ktest",
            "Segmentation fault\nEXIT STATUS: ABNORMAL (signal 11)\n",
        );

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");
        assert_eq!(report.replayed, 1);
        assert!(report.findings.is_empty());
        assert_eq!(report.distinct_count(), 0);
    }

    #[test]
    fn absent_output_directory_is_fatal_for_the_pass() {
        let fx = fixture();
        let runner = runner(fx.root.path(), &fx.artifact);
        let result = triage(
            &fx.root.path().join("output/dfs/nonesuch"),
            &runner,
            &UbsanExtractor::new(),
        );
        assert!(matches!(
            result,
            Err(TriageError::OutputDirUnreadable { .. })
        ));
    }

    #[test]
    fn missing_instrumented_artifact_is_fatal_for_the_pass() {
        let fx = fixture();
        write_test_case(&fx, "test000001.ktest", "EXIT STATUS: NORMAL\n");
        let runner = runner(fx.root.path(), &fx.root.path().join("missing_ubsan.bc"));
        let result = triage(&fx.output_dir, &runner, &UbsanExtractor::new());
        assert!(matches!(
            result,
            Err(TriageError::InstrumentedArtifactMissing(_))
        ));
    }

    #[test]
    fn report_lists_findings_then_distinct_lines_then_summary() {
        let fx = fixture();
        let block = format!("{OVERFLOW_DIAG}\nEXIT STATUS: ABNORMAL (signal 6)\n");
        write_test_case(&fx, "test000001.ktest", &block);

        let runner = runner(fx.root.path(), &fx.artifact);
        let report =
            triage(&fx.output_dir, &runner, &UbsanExtractor::new()).expect("triage succeeds");

        let mut rendered = Vec::new();
        report.write_to(&mut rendered).expect("report renders");
        let rendered = String::from_utf8(rendered).expect("report is UTF-8");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "test000001.ktest");
        assert_eq!(lines[1], format!("\t{OVERFLOW_DIAG}"));
        assert_eq!(lines[2], OVERFLOW_DIAG);
        assert_eq!(lines[3], "In total, 1 distinct diagnostics are triggered");
    }
}
