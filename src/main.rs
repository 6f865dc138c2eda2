//! epub-search - Search the text of EPUB books

use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::panic;
use std::path::Path;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use log::{LevelFilter, Log, Metadata, Record};

use epub_search::paths::{epubs_in_path, unique};
use epub_search::pool::output_discarded;
use epub_search::{PoolConfig, SearchOptions, SearchResult, WorkerPool, search};

#[derive(Parser)]
#[command(name = "epub-search")]
#[command(version, about = "Search ePub contents", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-search ~/Books whale              Count matches in every book
    epub-search -i -c book.epub 'ishmael'  Show matching paragraphs
    epub-search -E -s author ~/Books '^Chapter [0-9]+$'")]
struct Cli {
    /// ePub files or directories to search in
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    paths: Vec<String>,

    /// The text to search for
    #[arg(value_name = "PATTERN")]
    pattern: String,

    /// How the results should be sorted
    #[arg(short, long, value_enum)]
    sort: Option<SortKey>,

    /// Ignore case when matching
    #[arg(short, long)]
    ignore_case: bool,

    /// Treat PATTERN as a regular expression
    #[arg(short = 'E', long)]
    regex: bool,

    /// Print the paragraphs containing matches
    #[arg(short, long)]
    context: bool,

    /// Number of books searched in parallel
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Search books one at a time in this process
    #[arg(long)]
    sync: bool,

    /// Print one JSON object per book instead of a summary
    #[arg(long)]
    json: bool,

    /// Suppress warning output
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,

    /// Output additional info
    #[arg(short, long, conflicts_with = "debug")]
    verbose: bool,

    #[arg(long, hide = true)]
    debug: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortKey {
    Author,
    Title,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Verbosity {
    Quiet,
    Default,
    Verbose,
    Debug,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else if self.debug {
            Verbosity::Debug
        } else {
            Verbosity::Default
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    init_logging(verbosity);
    silence_worker_panics();

    let mut paths = Vec::new();
    for arg in &cli.paths {
        match epubs_in_path(arg) {
            Ok(found) => paths.extend(found.iter().map(|p| p.to_string_lossy().into_owned())),
            Err(e) => Cli::command().error(ErrorKind::ValueValidation, e).exit(),
        }
    }
    let paths = unique(paths);

    match run(&cli, verbosity, &paths) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    cli: &Cli,
    verbosity: Verbosity,
    paths: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let options = SearchOptions::new(cli.pattern.as_str())
        .ignore_case(cli.ignore_case)
        .use_regex(cli.regex)
        .context(cli.context);

    let mut config = PoolConfig::default()
        .with_synchronous(cli.sync)
        .with_discard_worker_output(verbosity < Verbosity::Debug);
    if let Some(jobs) = cli.jobs {
        config = config.with_parallelism(jobs);
    }
    let pool = WorkerPool::new(config);

    let stream = search(paths.to_vec(), &options, &pool)?;

    if cli.json {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for result in stream {
            serde_json::to_writer(&mut out, &result)?;
            writeln!(out)?;
        }
        return Ok(());
    }

    let mut results = Vec::new();
    let mut logged = false;

    for result in stream {
        if let Some(error) = result.error() {
            if verbosity >= Verbosity::Default {
                logged = true;
                eprintln!("Error: {error}");
            }
            continue;
        }

        if let Some(warnings) = result.warnings()
            && verbosity >= Verbosity::Verbose
        {
            logged = true;
            eprintln!(
                "Broken ePub file: '{}'\n\t{}",
                result.path(),
                warnings.join("\n\t")
            );
        }

        if result.is_match() {
            results.push(result);
        }
    }

    // Separate the errors and warnings from the results
    if logged {
        println!("\n");
    }

    if results.is_empty() {
        println!("No matches found");
        return Ok(());
    }

    sort_results(&mut results, cli.sort, paths);

    let separator = thousands_separator();
    println!(
        "Matched {} books out of {}",
        format_count(results.len(), separator),
        format_count(paths.len(), separator)
    );

    let width = results
        .iter()
        .map(|r| format_count(r.match_count(), separator).chars().count())
        .max()
        .unwrap_or(1);
    let (open, close) = if io::stdout().is_terminal() {
        ("\x1b[1m", "\x1b[0m")
    } else {
        ("[", "]")
    };

    for result in &results {
        println!(
            "{:>width$}  {}",
            format_count(result.match_count(), separator),
            result_name(result, cli.sort)
        );

        for found in result.matches().unwrap_or_default() {
            println!("{:width$}    {}:", "", found.label.as_deref().unwrap_or(&found.path));
            for group in &found.groups {
                let line = group.format(open, close).replace('\n', " ");
                println!("{:width$}        {line}", "");
            }
        }
    }

    Ok(())
}

fn sort_results(results: &mut [SearchResult], sort: Option<SortKey>, paths: &[String]) {
    match sort {
        // The order in which the paths were given
        None => {
            let order: HashMap<&str, usize> = paths
                .iter()
                .enumerate()
                .map(|(i, p)| (p.as_str(), i))
                .collect();
            results.sort_by_key(|r| order.get(r.path()).copied().unwrap_or(usize::MAX));
        }
        Some(SortKey::Author) => {
            results.sort_by_cached_key(|r| r.author().unwrap_or("Unknown").to_lowercase())
        }
        Some(SortKey::Title) => {
            results.sort_by_cached_key(|r| r.title().unwrap_or_default().to_lowercase())
        }
    }
}

fn result_name(result: &SearchResult, sort: Option<SortKey>) -> String {
    let title = result.title().unwrap_or_default();
    // Author is optional in the OPF
    let author = result.author().unwrap_or("Unknown");

    match sort {
        None => Path::new(result.path())
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| result.path().to_string()),
        Some(SortKey::Author) => format!("{author} - {title}"),
        Some(SortKey::Title) => format!("{title} - {author}"),
    }
}

/// Digit grouping character of the user's numeric locale. The C locale
/// does not group.
fn thousands_separator() -> Option<char> {
    let locale = ["LC_ALL", "LC_NUMERIC", "LANG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))?;
    separator_for(&locale)
}

fn separator_for(locale: &str) -> Option<char> {
    let language = locale.split(['_', '.', '@', '-']).next().unwrap_or("");
    match language {
        "" | "C" | "POSIX" => None,
        "de" | "es" | "it" | "nl" | "pt" | "da" | "tr" | "id" => Some('.'),
        "fr" | "ru" | "pl" | "cs" | "sv" | "fi" | "nb" | "uk" => Some('\u{a0}'),
        _ => Some(','),
    }
}

fn format_count(n: usize, separator: Option<char>) -> String {
    let digits = n.to_string();
    let Some(separator) = separator else {
        return digits;
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 * 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped
}

/// Drops records logged on worker threads that were told to discard their
/// output, so only this thread writes to the terminal.
struct MainThreadLogger {
    inner: env_logger::Logger,
}

impl Log for MainThreadLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        !output_discarded() && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn init_logging(verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Quiet => LevelFilter::Off,
        Verbosity::Default => LevelFilter::Error,
        Verbosity::Verbose => LevelFilter::Info,
        Verbosity::Debug => LevelFilter::Debug,
    };

    let inner = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .build();
    let max_level = inner.filter();

    if log::set_boxed_logger(Box::new(MainThreadLogger { inner })).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Panics inside work items are reported through their results; keep the
/// default hook from printing them from worker threads.
fn silence_worker_panics() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if !output_discarded() {
            default_hook(info);
        }
    }));
}
