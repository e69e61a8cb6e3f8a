//! CLI binary for kindle2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnnotateConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use kindle2pdf::{
    annotate, annotate_to_file, inspect, AnnotateConfig, AnnotationKind, AnnotationOutput,
    AnnotationProgressCallback, AnnotationSources, CoLocation, EmptyTextPolicy, HighlightColor,
    PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// page. Pages complete out of order, so timings are keyed by page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Annotations not found so far.
    missed: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set by `on_run_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading annotations…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            missed: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Locating");
        self.bar.reset_eta();
    }
}

impl AnnotationProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Locating annotations on {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, located: usize, unlocated: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.missed.fetch_add(unlocated, Ordering::SeqCst);
        let mark = if unlocated == 0 { green("✓") } else { red("✗") };
        let missed = if unlocated == 0 {
            String::new()
        } else {
            red(&format!("{unlocated} not found"))
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}  {}",
            mark,
            page_num,
            total,
            dim(&format!("{located:>3} found")),
            missed,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, resolved: usize, unlocated: usize) {
        self.bar.finish_and_clear();
        if unlocated == 0 {
            eprintln!(
                "{} {} annotations recovered",
                green("✔"),
                bold(&resolved.to_string())
            );
        } else {
            eprintln!(
                "{} {} annotations recovered  ({} not found)",
                cyan("⚠"),
                bold(&resolved.to_string()),
                red(&self.missed.load(Ordering::SeqCst).to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Annotate using the book.sdr folder next to the PDF
  kindle2pdf book.pdf -o book.annotated.pdf

  # Explicit store files and a clippings export
  kindle2pdf book.pdf --store book.sdr/book.pds --store book.sdr/book.pdt \
      --clippings "My Clippings.txt" -o out.pdf

  # Only the first chapter, strict note placement
  kindle2pdf --pages 1-20 --exact-colocation book.pdf -o ch1.pdf

  # What is in the store? (no text matching)
  kindle2pdf --inspect-only book.pdf

  # Recovered annotations as JSON
  kindle2pdf --json book.pdf > annotations.json

  # Salvage what can be read from a damaged store
  kindle2pdf --best-effort --store broken.pds book.pdf -o out.pdf

ENVIRONMENT VARIABLES:
  KINDLE2PDF_*            Every flag, e.g. KINDLE2PDF_TOLERANCE=3
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Override log filtering (e.g. kindle2pdf=debug)

SETUP:
  pdfium must be installed system-wide or pointed to with PDFIUM_LIB_PATH.
  Prebuilt binaries: https://github.com/bblanchon/pdfium-binaries
"#;

/// Recover Kindle highlights, notes and bookmarks onto the original PDF.
#[derive(Parser, Debug)]
#[command(
    name = "kindle2pdf",
    version,
    about = "Recover Kindle highlights, notes and bookmarks onto the original PDF",
    long_about = "Reads the reader's annotation store (.pds/.pdt in <book>.sdr) and/or a \
'My Clippings.txt' export, locates every highlighted passage on its page, merges notes \
into the highlights they belong to, and writes them into a copy of the PDF as standard \
highlight and text annotations.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// The PDF the annotations were made on.
    pdf: PathBuf,

    /// Store file (.pds/.pdt) or directory to search; repeatable. Default:
    /// the <stem>.sdr folder next to the PDF.
    #[arg(short, long = "store", env = "KINDLE2PDF_STORE", value_delimiter = ',')]
    stores: Vec<PathBuf>,

    /// "My Clippings.txt" export.
    #[arg(long, env = "KINDLE2PDF_CLIPPINGS")]
    clippings: Option<PathBuf>,

    /// Write the annotated PDF to this file.
    #[arg(short, long, env = "KINDLE2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Print structured JSON (AnnotationOutput) on stdout.
    #[arg(long, env = "KINDLE2PDF_JSON")]
    json: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "KINDLE2PDF_PAGES", default_value = "all")]
    pages: String,

    /// Note-to-highlight co-location tolerance in points.
    #[arg(long, env = "KINDLE2PDF_TOLERANCE")]
    tolerance: Option<f32>,

    /// Merge a note only when it sits on a highlight's start point.
    #[arg(long, env = "KINDLE2PDF_EXACT_COLOCATION")]
    exact_colocation: bool,

    /// Minimum fuzzy-match similarity (0.0–1.0).
    #[arg(long, env = "KINDLE2PDF_FUZZY_THRESHOLD", default_value_t = 0.85)]
    fuzzy_threshold: f32,

    /// Highlights without recorded text: use-position or unlocated.
    #[arg(long, env = "KINDLE2PDF_EMPTY_TEXT", value_enum, default_value = "use-position")]
    empty_text: EmptyTextArg,

    /// Keep records decoded before a structural error in a store.
    #[arg(long, env = "KINDLE2PDF_BEST_EFFORT")]
    best_effort: bool,

    /// Highlight colour as RRGGBB hex.
    #[arg(long, env = "KINDLE2PDF_COLOR", default_value = "FFEB3B")]
    color: String,

    /// Number of pages located concurrently.
    #[arg(short, long, env = "KINDLE2PDF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "KINDLE2PDF_PASSWORD")]
    password: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "KINDLE2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// List what the stores contain, without locating anything.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "KINDLE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "KINDLE2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum EmptyTextArg {
    UsePosition,
    Unlocated,
}

impl From<EmptyTextArg> for EmptyTextPolicy {
    fn from(v: EmptyTextArg) -> Self {
        match v {
            EmptyTextArg::UsePosition => EmptyTextPolicy::UsePosition,
            EmptyTextArg::Unlocated => EmptyTextPolicy::Unlocated,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
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

    let mut sources = AnnotationSources::new();
    sources.stores = cli.stores.clone();
    sources.clippings = cli.clippings.clone();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let report = inspect(&cli.pdf, &sources, &config)
            .await
            .context("Failed to inspect annotation sources")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        } else {
            println!("File:         {}", cli.pdf.display());
            println!("Pages:        {}", report.total_pages);
            println!("Records:      {}", report.records.len());
            for (kind, n) in &report.by_kind {
                println!("  {:<12}{}", format!("{kind}s:"), n);
            }
            if report.out_of_range > 0 {
                println!("Out of range: {}", report.out_of_range);
            }
            for (page, n) in &report.by_page {
                println!("  page {:>4}  {}", page, n);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn AnnotationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run recovery ─────────────────────────────────────────────────────
    let output = if let Some(ref output_path) = cli.output {
        let (output, summary) = annotate_to_file(&cli.pdf, &sources, output_path, &config)
            .await
            .context("Annotation failed")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} highlights, {} notes, {} bookmarks  {}ms  →  {}",
                if output.unlocated.is_empty() {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                summary.highlights,
                summary.notes,
                summary.bookmarks,
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
        output
    } else {
        annotate(&cli.pdf, &sources, &config)
            .await
            .context("Annotation failed")?
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        print_listing(&output);
    }

    if !cli.quiet && !cli.json {
        report_missed(&output);
    }

    Ok(())
}

/// Human-readable list of resolved annotations on stdout.
fn print_listing(output: &AnnotationOutput) {
    for r in &output.resolved {
        let body = match r.kind {
            AnnotationKind::Highlight => r.text.clone().unwrap_or_default(),
            _ => r.comment.clone().unwrap_or_default(),
        };
        println!("p.{:<4} {:<9} {}", r.page + 1, r.kind.to_string(), body);
        if r.kind == AnnotationKind::Highlight {
            if let Some(ref c) = r.comment {
                println!("{:16}↳ {}", "", c);
            }
        }
    }
}

/// Unlocated annotations and issues on stderr.
fn report_missed(output: &AnnotationOutput) {
    for u in &output.unlocated {
        eprintln!(
            "  {} p.{} {}: {}",
            red("✗"),
            u.page + 1,
            u.kind,
            truncate(&u.text, 70)
        );
        if !u.context.is_empty() {
            eprintln!("      {}", dim(&format!("near: {}", truncate(&u.context, 90))));
        }
    }
    if !output.issues.is_empty() {
        eprintln!(
            "   {} issue(s) (clamped coordinates, colliding highlights); run with -v for details",
            dim(&output.issues.len().to_string())
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

/// Map CLI args to `AnnotateConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnnotateConfig> {
    let co_location = if cli.exact_colocation {
        CoLocation::Exact {
            tolerance: cli.tolerance.unwrap_or(0.15),
        }
    } else {
        CoLocation::Anchored {
            tolerance: cli.tolerance.unwrap_or(5.0),
        }
    };

    let mut builder = AnnotateConfig::builder()
        .co_location(co_location)
        .fuzzy_threshold(cli.fuzzy_threshold)
        .empty_text(cli.empty_text.clone().into())
        .concurrency(cli.concurrency)
        .pages(parse_pages(&cli.pages)?)
        .best_effort(cli.best_effort)
        .highlight_color(parse_color(&cli.color)?);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--color` as `RRGGBB` (optionally `#`-prefixed).
fn parse_color(s: &str) -> Result<HighlightColor> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        anyhow::bail!("Colour must be 6 hex digits (got '{}')", s);
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).with_context(|| format!("Invalid colour '{}'", s))
    };
    Ok(HighlightColor {
        r: channel(0)?,
        g: channel(2)?,
        b: channel(4)?,
        a: 255,
    })
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages("3-5").unwrap(), PageSelection::Range(3, 5)));
        assert!(matches!(parse_pages("7").unwrap(), PageSelection::Single(7)));
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-3").is_err());
    }

    #[test]
    fn colors() {
        let c = parse_color("#00ff80").unwrap();
        assert_eq!((c.r, c.g, c.b, c.a), (0, 255, 128, 255));
        assert!(parse_color("fff").is_err());
        assert!(parse_color("zzzzzz").is_err());
    }
}
