// Command-line layer: argument definitions and the single run flow
// (build query, fetch every page, hand the result to the output sink).

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, Level};

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::normalize::{Shape, UNSUPPORTED_CSV};
use crate::output::{Format, OutputTarget, Sink};
use crate::paginate::aggregate;
use crate::query::{ExportKind, IndicatorFamily, Query};

const ABOUT: &str = "Search AlienVault OTX from the terminal";

const AFTER_HELP: &str = "\
Examples:
  Export YARA rules from subscribed pulses:
    otx-search --export YARA --dump-dir rules
  Get general data about a file hash:
    otx-search --hash general --indicator 076a27c79e5ace2a3d47f9dd2e83e4ff6ea8872b3c2218f66c92b89b55f36560

The API key is read from the OTXAPI environment variable.
Exports may take a while depending on how many pulses you subscribe to.";

/// otx-search: query the OTX DirectConnect API.
#[derive(Debug, Parser)]
#[command(
    name = "otx-search",
    about = ABOUT,
    after_help = AFTER_HELP,
    version,
    arg_required_else_help = true,
    group(
        ArgGroup::new("query")
            .required(true)
            .args(["text", "pulse_id", "export", "ipv4", "ipv6", "domain", "hostname", "hash", "url", "cve"])
    )
)]
pub struct Cli {
    /// Search pulses by raw text; the kitchen sink option.
    #[arg(long, value_name = "TEXT")]
    pub text: Option<String>,

    /// List the indicators of a pulse.
    #[arg(long = "pulse-id", visible_alias = "pulseID", value_name = "ID")]
    pub pulse_id: Option<String>,

    /// Export rules from the pulses you are subscribed to.
    #[arg(long, value_enum, value_name = "KIND")]
    pub export: Option<ExportKind>,

    /// Look up an IPv4 address (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator",
          value_parser = ["general", "reputation", "geo", "url_list", "passive_dns", "http_scans"])]
    pub ipv4: Option<String>,

    /// Look up an IPv6 address (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator",
          value_parser = ["general", "reputation", "geo", "url_list", "passive_dns"])]
    pub ipv6: Option<String>,

    /// Look up a domain (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator",
          value_parser = ["general", "geo", "malware", "url_list", "passive_dns", "whois", "http_scans"])]
    pub domain: Option<String>,

    /// Look up a hostname (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator",
          value_parser = ["general", "geo", "malware", "url_list", "passive_dns", "http_scans"])]
    pub hostname: Option<String>,

    /// Look up a file hash (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator", value_parser = ["general", "analysis"])]
    pub hash: Option<String>,

    /// Look up a URL (needs --indicator).
    #[arg(long, value_name = "SECTION", requires = "indicator", value_parser = ["general", "url_list"])]
    pub url: Option<String>,

    /// Look up a CVE identifier.
    #[arg(long, value_name = "ID")]
    pub cve: Option<String>,

    /// Indicator value for --ipv4, --ipv6, --domain, --hostname, --hash and --url.
    #[arg(long, value_name = "VALUE")]
    pub indicator: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    pub format: Format,

    /// Write to this file instead of the terminal; the extension is added.
    /// Existing files are appended to.
    #[arg(long, value_name = "PATH")]
    pub outfile: Option<PathBuf>,

    /// Directory to write exported rules into, one file per rule.
    #[arg(long = "dump-dir", visible_alias = "dumpDir", value_name = "DIR")]
    pub dump_dir: Option<PathBuf>,

    /// Per-request timeout in seconds (HTTP client default when unset).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// More logging on stderr; repeat for trace output.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// The query selected by the flags.
    pub fn query(&self) -> Result<Query> {
        if let Some(text) = &self.text {
            return Ok(Query::FreeTextSearch(text.clone()));
        }
        if let Some(id) = &self.pulse_id {
            return Ok(Query::PulseById(id.clone()));
        }
        if let Some(kind) = self.export {
            return Ok(Query::Export(kind));
        }

        let lookups = [
            (IndicatorFamily::Ipv4, &self.ipv4),
            (IndicatorFamily::Ipv6, &self.ipv6),
            (IndicatorFamily::Domain, &self.domain),
            (IndicatorFamily::Hostname, &self.hostname),
            (IndicatorFamily::File, &self.hash),
            (IndicatorFamily::Url, &self.url),
        ];
        for (family, section) in lookups {
            let Some(section) = section else { continue };
            let indicator = self
                .indicator
                .clone()
                .ok_or(Error::MissingIndicator { family: family.flag() })?;
            return Ok(Query::IndicatorLookup {
                family,
                indicator,
                section: family.section(section)?,
            });
        }

        match &self.cve {
            Some(id) => Ok(Query::CveLookup(id.clone())),
            None => Err(Error::NoQuery),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        }
    }
}

/// Run one query end to end.
pub fn run(cli: &Cli, config: &Config) -> Result<()> {
    let query = cli.query()?;
    let target = OutputTarget::new(cli.outfile.as_deref(), cli.format);
    debug!(?query, ?target, "resolved invocation");

    if let Some(dir) = &cli.dump_dir {
        fs::create_dir_all(dir)?;
    }

    // Nothing to write, so skip the network round trips.
    if target.format == Format::Csv && Shape::for_query(&query).is_none() {
        println!("{UNSUPPORTED_CSV}");
        return Ok(());
    }

    let client = ApiClient::new(config)?;
    let progress = page_progress();
    let result = aggregate(&client, &query, &progress)?;

    let mut sink = Sink::new(target, cli.dump_dir.clone(), io::stdout().lock());
    sink.emit(&query, &result)
}

/// Progress bar for the pages after the first; drawn on stderr only.
fn page_progress() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner} fetching pages {pos}/{len} [{elapsed}]") {
        bar.set_style(style);
    }
    bar
}
