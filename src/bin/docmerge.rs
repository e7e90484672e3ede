//! CLI binary for docmerge.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `MergeConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docmerge::{
    inspect_data, merge, rules, ConversionOutcome, ConverterSettings, JobState, MergeConfig,
    MergeProgressCallback, PageBreakPolicy, ProgressCallback, RuleSet,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while extracting and converting,
/// a record counter while rendering.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Reading inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} records  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }
}

impl MergeProgressCallback for CliProgressCallback {
    fn on_state_change(&self, _job_id: &str, state: JobState) {
        match state {
            JobState::Extracting => {
                self.bar.set_prefix("Extracting");
                self.bar.set_message("reading rows…");
            }
            JobState::Deriving => self.bar.set_prefix("Deriving"),
            JobState::Rendering => {
                self.bar.set_style(Self::bar_style());
                self.bar.set_prefix("Rendering");
            }
            JobState::ConversionRequested => {
                self.bar.set_style(Self::spinner_style());
                self.bar.set_prefix("Converting");
            }
            JobState::Done | JobState::Failed => {}
        }
    }

    fn on_records_loaded(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total} records loaded"))
        ));
    }

    fn on_record_rendered(&self, _index: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_conversion_start(&self, format: &str) {
        self.bar
            .set_message(format!("{} (this can take a while)…", format.to_uppercase()));
    }

    fn on_job_complete(&self, records: usize, _converted: bool) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} records merged",
            green("✔"),
            bold(&records.to_string())
        );
    }

    fn on_job_failed(&self, _error: &str) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge every row of sheet1 into the template's {#records} block
  docmerge --data 名冊.xlsx --template 通知書.docx

  # Also produce a PDF (needs LibreOffice)
  docmerge --data 名冊.xlsx --template 通知書.docx --pdf

  # Violation notices: derive 違規事實 from 違規態樣
  docmerge --data 違規.xlsx --template 處分書.docx --preset violation --pdf

  # Custom derivation rules
  docmerge --data data.csv --template t.docx --rules rules.json

  # Look at the data without rendering
  docmerge --data 名冊.xlsx --inspect-only

  # Machine-readable result
  docmerge --data 名冊.xlsx --template 通知書.docx --json

TEMPLATE SYNTAX:
  {field} or {{field}}   value of the column named `field` (empty if missing)
  {#records}             start of the repeating block, alone in its paragraph
  {/records}             end of the repeating block, alone in its paragraph

  Each record gets one copy of the block; a page break separates copies.

RULE FILE FORMAT (--rules):
  {
    "case_field": "違規態樣",
    "target_field": "違規事實",
    "rules": [
      { "when": { "equals": "超標" },            "template": "… {車牌號碼} …" },
      { "when": { "one_of": ["未到檢", "逾期"] }, "template": "…" },
      { "when": "any",                            "template": "…" }
    ]
  }
  The first matching rule wins; no match leaves the target field empty.

OUTPUT:
  Every run writes into its own directory, <out-dir>/<job-uuid>/, and prints
  the artifact paths on stdout. A failed run leaves nothing behind.

ENVIRONMENT VARIABLES:
  Every flag has a DOCMERGE_* variable, e.g. DOCMERGE_SOFFICE=/opt/lo/soffice.
  RUST_LOG overrides the log filter.
"#;

/// Merge spreadsheet rows into a DOCX template's repeating block.
#[derive(Parser, Debug)]
#[command(
    name = "docmerge",
    version,
    about = "Merge spreadsheet rows into a DOCX template's repeating block",
    long_about = "Merge the rows of a spreadsheet (xlsx, xls, ods or CSV) into the \
{#records} … {/records} block of a Word template, one copy per row with page breaks in \
between, and optionally convert the result to PDF with LibreOffice.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Spreadsheet with one header row and one record per row.
    #[arg(short, long, env = "DOCMERGE_DATA")]
    data: PathBuf,

    /// DOCX template containing the repeating block.
    #[arg(short, long, env = "DOCMERGE_TEMPLATE", required_unless_present = "inspect_only")]
    template: Option<PathBuf>,

    /// Worksheet to read (ignored for CSV).
    #[arg(long, env = "DOCMERGE_SHEET", default_value = "sheet1")]
    sheet: String,

    /// Directory that receives one sub-directory per job.
    #[arg(short, long, env = "DOCMERGE_OUT_DIR", default_value = "output")]
    out_dir: PathBuf,

    /// Also convert the merged document to PDF.
    #[arg(long, env = "DOCMERGE_PDF")]
    pdf: bool,

    /// Converter executable.
    #[arg(long, env = "DOCMERGE_SOFFICE", default_value = "soffice")]
    soffice: String,

    /// Conversion timeout in seconds.
    #[arg(long, env = "DOCMERGE_CONVERT_TIMEOUT", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..))]
    convert_timeout: u64,

    /// Put a page break after the last record too.
    #[arg(long, env = "DOCMERGE_TRAILING_BREAK")]
    trailing_break: bool,

    /// Render newlines in values as spaces instead of line breaks.
    #[arg(long, env = "DOCMERGE_NO_LINE_BREAKS")]
    no_line_breaks: bool,

    /// Name of the repeating block ({#NAME} … {/NAME}).
    #[arg(long, env = "DOCMERGE_BLOCK", default_value = "records")]
    block: String,

    /// JSON rule file for a derived field (repeatable, applied in order).
    #[arg(long, env = "DOCMERGE_RULES", value_delimiter = ',')]
    rules: Vec<PathBuf>,

    /// Built-in rule set, applied before any --rules file.
    #[arg(long, env = "DOCMERGE_PRESET", value_enum)]
    preset: Option<PresetArg>,

    /// Fail the run (and discard the DOCX) when PDF conversion fails.
    #[arg(long, env = "DOCMERGE_STRICT_CONVERSION")]
    strict_conversion: bool,

    /// File stem of the artifacts (NAME.docx, NAME.pdf).
    #[arg(long, env = "DOCMERGE_NAME", default_value = "merged")]
    name: String,

    /// Print headers and sample records only; render nothing.
    #[arg(long, env = "DOCMERGE_INSPECT_ONLY")]
    inspect_only: bool,

    /// Output structured JSON instead of artifact paths.
    #[arg(long, env = "DOCMERGE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCMERGE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCMERGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCMERGE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PresetArg {
    /// 違規態樣 → 違規事實 (超標, 未到檢)
    Violation,
}

impl PresetArg {
    fn rule_set(&self) -> RuleSet {
        match self {
            PresetArg::Violation => rules::violation_rules(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO output when it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn MergeProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let preview = inspect_data(&cli.data, &config)
            .await
            .context("Failed to inspect data")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&preview).context("Failed to serialise preview")?
            );
        } else {
            println!("File:     {}", preview.source_name);
            println!("Sheet:    {}", preview.sheet);
            println!("Records:  {}", preview.records);
            println!("Fields:   {}", preview.headers.join(", "));
            for (i, record) in preview.sample.iter().enumerate() {
                println!();
                println!("{}", bold(&format!("#{}", i + 1)));
                for (name, value) in record.iter() {
                    println!("  {}  {}", dim(&format!("{name}:")), value);
                }
            }
        }
        return Ok(());
    }

    // ── Run merge ────────────────────────────────────────────────────────
    // clap guarantees --template unless --inspect-only.
    let template = cli
        .template
        .as_ref()
        .context("--template is required")?;

    let output = merge(&cli.data, template, &config)
        .await
        .context("Merge failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    println!("{}", output.document.display());
    if let Some(ref pdf) = output.converted {
        println!("{}", pdf.display());
    }

    if !cli.quiet {
        if !show_progress {
            eprintln!(
                "Merged {} records in {}ms",
                output.records, output.stats.total_ms
            );
        }
        if !output.stats.unmatched_placeholders.is_empty() {
            eprintln!(
                "{} no column for: {}",
                cyan("⚠"),
                output.stats.unmatched_placeholders.join(", ")
            );
        }
        if let ConversionOutcome::Failed { ref diagnostic } = output.conversion {
            eprintln!("{} PDF conversion failed: {}", red("✘"), diagnostic);
        }
        eprintln!(
            "   {}",
            dim(&format!(
                "job {}  ·  {} bytes  ·  {}ms total",
                output.job_id, output.stats.document_bytes, output.stats.total_ms
            ))
        );
    }

    Ok(())
}

/// Map CLI args to `MergeConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<MergeConfig> {
    let mut builder = MergeConfig::builder()
        .sheet(&cli.sheet)
        .block_name(&cli.block)
        .page_breaks(if cli.trailing_break {
            PageBreakPolicy::AfterEveryRecord
        } else {
            PageBreakPolicy::BetweenRecords
        })
        .line_breaks(!cli.no_line_breaks)
        .allow_conversion_failure(!cli.strict_conversion)
        .work_root(&cli.out_dir)
        .output_stem(&cli.name);

    if let Some(ref preset) = cli.preset {
        builder = builder.rule_set(preset.rule_set());
    }
    for path in &cli.rules {
        let set = RuleSet::load(path)
            .with_context(|| format!("Failed to load rules from {:?}", path))?;
        builder = builder.rule_set(set);
    }

    if cli.pdf {
        builder = builder.conversion(ConverterSettings {
            program: cli.soffice.clone(),
            timeout_secs: cli.convert_timeout,
            ..ConverterSettings::default()
        });
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
