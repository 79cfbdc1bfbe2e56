// Query model: the fixed set of lookups the client can perform and the
// endpoint each one maps to.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::error::Error;

const SEARCH_PULSES: &str = "/api/v1/search/pulses?q=";
const PULSE_BY_ID: &str = "/api/v1/pulses/";
const EXPORT_INDICATORS: &str = "/api/v1/indicators/export";
const CVE_DETAILS: &str = "/api/v1/indicators/cve/";

/// Bulk export kinds offered by `/indicators/export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    #[value(name = "YARA")]
    Yara,
}

impl ExportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportKind::Yara => "YARA",
        }
    }
}

/// Indicator families with a details endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorFamily {
    Ipv4,
    Ipv6,
    Domain,
    Hostname,
    File,
    Url,
}

impl IndicatorFamily {
    /// Path segment used by the API for this family.
    pub fn segment(self) -> &'static str {
        match self {
            IndicatorFamily::Ipv4 => "IPv4",
            IndicatorFamily::Ipv6 => "IPv6",
            IndicatorFamily::Domain => "domain",
            IndicatorFamily::Hostname => "hostname",
            IndicatorFamily::File => "file",
            IndicatorFamily::Url => "url",
        }
    }

    /// Name of the command-line flag selecting this family.
    pub fn flag(self) -> &'static str {
        match self {
            IndicatorFamily::Ipv4 => "ipv4",
            IndicatorFamily::Ipv6 => "ipv6",
            IndicatorFamily::Domain => "domain",
            IndicatorFamily::Hostname => "hostname",
            IndicatorFamily::File => "hash",
            IndicatorFamily::Url => "url",
        }
    }

    /// Sections the API serves for this family.
    pub fn sections(self) -> &'static [Section] {
        use Section::*;
        match self {
            IndicatorFamily::Ipv4 => &[General, Reputation, Geo, UrlList, PassiveDns, HttpScans],
            IndicatorFamily::Ipv6 => &[General, Reputation, Geo, UrlList, PassiveDns],
            IndicatorFamily::Domain => &[General, Geo, Malware, UrlList, PassiveDns, Whois, HttpScans],
            IndicatorFamily::Hostname => &[General, Geo, Malware, UrlList, PassiveDns, HttpScans],
            IndicatorFamily::File => &[General, Analysis],
            IndicatorFamily::Url => &[General, UrlList],
        }
    }

    /// Parse and check a section name against this family.
    pub fn section(self, name: &str) -> Result<Section, Error> {
        let unknown = || Error::UnknownSection {
            family: self.flag(),
            section: name.to_string(),
        };
        let section: Section = name.parse().map_err(|_| unknown())?;
        if self.sections().contains(&section) {
            Ok(section)
        } else {
            Err(unknown())
        }
    }
}

/// Detail sections of an indicator lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    General,
    Reputation,
    Geo,
    Malware,
    UrlList,
    PassiveDns,
    Whois,
    HttpScans,
    Analysis,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::General => "general",
            Section::Reputation => "reputation",
            Section::Geo => "geo",
            Section::Malware => "malware",
            Section::UrlList => "url_list",
            Section::PassiveDns => "passive_dns",
            Section::Whois => "whois",
            Section::HttpScans => "http_scans",
            Section::Analysis => "analysis",
        }
    }
}

impl FromStr for Section {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "general" => Section::General,
            "reputation" => Section::Reputation,
            "geo" => Section::Geo,
            "malware" => Section::Malware,
            "url_list" => Section::UrlList,
            "passive_dns" => Section::PassiveDns,
            "whois" => Section::Whois,
            "http_scans" => Section::HttpScans,
            "analysis" => Section::Analysis,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lookup against the API. Built once from the command line and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    FreeTextSearch(String),
    PulseById(String),
    Export(ExportKind),
    IndicatorLookup {
        family: IndicatorFamily,
        indicator: String,
        section: Section,
    },
    CveLookup(String),
}

impl Query {
    /// Fixed endpoint prefix for this query.
    pub fn endpoint(&self) -> String {
        match self {
            Query::FreeTextSearch(_) => SEARCH_PULSES.to_string(),
            Query::PulseById(_) => PULSE_BY_ID.to_string(),
            Query::Export(_) => EXPORT_INDICATORS.to_string(),
            Query::IndicatorLookup { family, .. } => format!("/api/v1/indicators/{}/", family.segment()),
            Query::CveLookup(_) => CVE_DETAILS.to_string(),
        }
    }

    /// Query-specific tail appended to the endpoint.
    pub fn uri_vars(&self) -> String {
        match self {
            Query::FreeTextSearch(text) => format!("{text}&sort=-modified"),
            Query::PulseById(id) => format!("{id}/indicators"),
            Query::Export(kind) => format!("?types={}", kind.as_str()),
            Query::IndicatorLookup {
                indicator, section, ..
            } => format!("{indicator}/{section}"),
            Query::CveLookup(id) => format!("{id}/general"),
        }
    }

    /// Base request path, i.e. page 1.
    pub fn path(&self) -> String {
        format!("{}{}", self.endpoint(), self.uri_vars())
    }

    /// Request path for an explicit page number: the base path with
    /// `&page=<n>` appended, for every paginated endpoint alike.
    pub fn page_path(&self, page: u64) -> String {
        format!("{}&page={page}", self.path())
    }

    /// Whether the endpoint answers with `{count, results}` pages.
    pub fn is_paginated(&self) -> bool {
        matches!(
            self,
            Query::FreeTextSearch(_) | Query::PulseById(_) | Query::Export(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_search_path() {
        let q = Query::FreeTextSearch("emotet".into());
        assert_eq!(q.path(), "/api/v1/search/pulses?q=emotet&sort=-modified");
        assert_eq!(q.page_path(3), "/api/v1/search/pulses?q=emotet&sort=-modified&page=3");
        assert!(q.is_paginated());
    }

    #[test]
    fn pulse_pages_are_joined_with_ampersand() {
        let q = Query::PulseById("5f1a".into());
        assert_eq!(q.path(), "/api/v1/pulses/5f1a/indicators");
        assert_eq!(q.page_path(2), "/api/v1/pulses/5f1a/indicators&page=2");
    }

    #[test]
    fn export_path() {
        let q = Query::Export(ExportKind::Yara);
        assert_eq!(q.path(), "/api/v1/indicators/export?types=YARA");
        assert_eq!(q.page_path(2), "/api/v1/indicators/export?types=YARA&page=2");
        assert!(q.is_paginated());
    }

    #[test]
    fn indicator_and_cve_paths_are_single_shot() {
        let q = Query::IndicatorLookup {
            family: IndicatorFamily::File,
            indicator: "076a27c7".into(),
            section: Section::Analysis,
        };
        assert_eq!(q.path(), "/api/v1/indicators/file/076a27c7/analysis");
        assert!(!q.is_paginated());

        let q = Query::CveLookup("CVE-2021-44228".into());
        assert_eq!(q.path(), "/api/v1/indicators/cve/CVE-2021-44228/general");
        assert!(!q.is_paginated());
    }

    #[test]
    fn family_sections_are_checked() {
        assert_eq!(IndicatorFamily::Domain.section("whois").unwrap(), Section::Whois);
        assert!(IndicatorFamily::Ipv6.section("http_scans").is_err());
        assert!(IndicatorFamily::Url.section("nonsense").is_err());
        assert_eq!(IndicatorFamily::Ipv4.segment(), "IPv4");
    }
}
