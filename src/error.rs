// Error taxonomy shared by every layer of the client.

use thiserror::Error;

/// Errors raised while querying OTX and writing results.
#[derive(Debug, Error)]
pub enum Error {
    /// The API key environment variable is unset or empty.
    #[error(
        "OTXAPI environment variable not detected. Set the environment variable, open a new terminal session, and try again..."
    )]
    MissingCredential,

    /// None of the query flags was given.
    #[error("no query given; pass one of --text, --pulse-id, --export, --ipv4, --ipv6, --domain, --hostname, --hash, --url or --cve")]
    NoQuery,

    /// An indicator family lookup was requested without `--indicator`.
    #[error("--indicator is required for {family} lookups")]
    MissingIndicator {
        /// Family flag that needed the indicator.
        family: &'static str,
    },

    /// A lookup section that the indicator family does not offer.
    #[error("'{section}' is not a valid section for {family} lookups")]
    UnknownSection {
        family: &'static str,
        section: String,
    },

    /// Connection, TLS or protocol failure while talking to the API.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response or file body that is not valid JSON.
    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The JSON output file exists but does not hold a JSON array.
    #[error("existing output file {path} does not contain a JSON array")]
    NotAnArray { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
