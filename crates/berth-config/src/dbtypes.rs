//! Database engines, their supported versions and the probe-output parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use berth_utils::error::ConfigError;

/// Database engine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DbEngine {
    Mariadb,
    Mysql,
    Postgres,
}

impl DbEngine {
    /// Versions the bundled images exist for.
    #[must_use]
    pub fn supported_versions(self) -> &'static [&'static str] {
        match self {
            Self::Mariadb => &[
                "5.5", "10.0", "10.1", "10.2", "10.3", "10.4", "10.5", "10.6", "10.7", "10.8",
                "10.11", "11.4", "11.8",
            ],
            Self::Mysql => &["5.5", "5.6", "5.7", "8.0", "8.4"],
            Self::Postgres => &["9", "10", "11", "12", "13", "14", "15", "16", "17", "18"],
        }
    }

    #[must_use]
    pub fn default_version(self) -> &'static str {
        match self {
            Self::Mariadb => "10.11",
            Self::Mysql => "8.0",
            Self::Postgres => "16",
        }
    }

    /// Container-side port the engine listens on.
    #[must_use]
    pub const fn container_port(self) -> u16 {
        match self {
            Self::Mariadb | Self::Mysql => 3306,
            Self::Postgres => 5432,
        }
    }

    #[must_use]
    pub fn is_supported(self, version: &str) -> bool {
        self.supported_versions().contains(&version)
    }
}

/// Engine plus version of a database, configured or found at rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseDesc {
    #[serde(rename = "type")]
    pub engine: DbEngine,
    #[serde(default)]
    pub version: String,
}

impl Default for DatabaseDesc {
    fn default() -> Self {
        Self::new(DbEngine::Mariadb, DbEngine::Mariadb.default_version())
    }
}

impl fmt::Display for DatabaseDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine, self.version)
    }
}

impl DatabaseDesc {
    pub fn new(engine: DbEngine, version: impl Into<String>) -> Self {
        Self {
            engine,
            version: version.into(),
        }
    }

    /// Tag as written to disk by the database image and into snapshot names,
    /// e.g. `mariadb_10.11` or `postgres_16`.
    #[must_use]
    pub fn file_tag(&self) -> String {
        format!("{}_{}", self.engine, self.version)
    }

    /// Raw form the probe container reports for this engine and version.
    #[must_use]
    pub fn render_probe(&self) -> String {
        match self.engine {
            DbEngine::Postgres => self.version.clone(),
            _ => self.file_tag(),
        }
    }

    /// Parse the `engine:version` form used in messages and the CLI.
    pub fn parse_pair(s: &str) -> Result<Self, ConfigError> {
        let (engine, version) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::invalid("database", format!("'{s}' is not engine:version")))?;
        let engine: DbEngine = engine
            .parse()
            .map_err(|_| ConfigError::invalid("database.type", format!("unknown engine '{engine}'")))?;
        Ok(Self::new(engine, version))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.engine.is_supported(&self.version) {
            return Err(ConfigError::invalid(
                "database.version",
                format!(
                    "{} {} is not supported; valid versions are {}",
                    self.engine,
                    self.version,
                    self.engine.supported_versions().join(", ")
                ),
            ));
        }
        Ok(())
    }
}

/// Fallback for probe output nobody recognises.
pub const UNKNOWN_PROBE_DEFAULT: &str = "mariadb:10.3";

static CURRENT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(mariadb|mysql)_(\d+\.\d\d?)$").unwrap());
static PG_MAJOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+$|9\.)").unwrap());
static LEGACY_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d$").unwrap());

/// Normalise raw probe output into `engine:version`.
///
/// ```rust
/// use berth_config::dbtypes::parse_probe_output;
///
/// assert_eq!(parse_probe_output("mariadb_10.11"), "mariadb:10.11");
/// assert_eq!(parse_probe_output("16"), "postgres:16");
/// assert_eq!(parse_probe_output("5.7"), "mysql:5.7");
/// assert_eq!(parse_probe_output("garbage"), "mariadb:10.3");
/// ```
#[must_use]
pub fn parse_probe_output(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(caps) = CURRENT_TAG.captures(raw) {
        return format!("{}:{}", &caps[1], &caps[2]);
    }
    if PG_MAJOR.is_match(raw) {
        // 9.x stores the minor in PG_VERSION; only the major selects an image.
        let major = raw.split('.').next().unwrap_or(raw);
        return format!("postgres:{major}");
    }
    if LEGACY_NUMERIC.is_match(raw) {
        return match raw {
            "5.6" | "5.7" | "8.0" => format!("mysql:{raw}"),
            _ => format!("mariadb:{raw}"),
        };
    }
    UNKNOWN_PROBE_DEFAULT.to_string()
}

/// [`parse_probe_output`] into a typed descriptor.
#[must_use]
pub fn parse_probe(raw: &str) -> DatabaseDesc {
    DatabaseDesc::parse_pair(&parse_probe_output(raw))
        .unwrap_or_else(|_| DatabaseDesc::new(DbEngine::Mariadb, "10.3"))
}
