// Library root
// -----------
// This crate exposes the library surface behind the `otx-search` binary.
// The binary (`main.rs`) parses arguments and hands them to `cli::run`.
//
// Module responsibilities:
// - `config`: immutable run settings (API host, key, timeout).
// - `api`: one authenticated GET against OTX, behind the `Fetch` trait.
// - `query`: the supported lookups and the endpoint each maps to.
// - `paginate`: walks list endpoints page by page into one result.
// - `normalize`: flattens results into CSV rows or rule bodies.
// - `output`: writes results to the terminal, files or a dump directory.
// - `cli`: argument definitions and the run flow tying it together.
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod normalize;
pub mod output;
pub mod paginate;
pub mod query;

pub use error::{Error, Result};
