use std::time::Duration;

use clap::Parser;

use crate::collectors::{CollectorSettings, adzuna, indeed, usajobs};
use crate::upsert::collisions::CollisionPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobmap", about = "Map-first job posting aggregator")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// Mapbox access token used for geocoding
    #[arg(long, env = "MAPBOX_TOKEN", hide_env_values = true)]
    pub mapbox_token: String,

    /// Country assumed for addresses that name none
    #[arg(long, env = "GEOCODE_COUNTRY", default_value = "us")]
    pub geocode_country: String,

    /// `redis://…`, `memory`, or `none`
    #[arg(long, env = "CACHE_URL", default_value = "memory")]
    pub cache_url: String,

    /// Namespace for cache keys
    #[arg(long, env = "CACHE_PREFIX", default_value = "jobmap")]
    pub cache_prefix: String,

    /// Timeout for outbound HTTP requests, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    #[arg(long, env = "ADZUNA_APP_ID")]
    pub adzuna_app_id: Option<String>,

    #[arg(long, env = "ADZUNA_APP_KEY", hide_env_values = true)]
    pub adzuna_app_key: Option<String>,

    #[arg(long, env = "ADZUNA_COUNTRY", default_value = "us")]
    pub adzuna_country: String,

    #[arg(long, env = "ADZUNA_BASE_URL", default_value = adzuna::BASE_URL)]
    pub adzuna_base_url: String,

    #[arg(long, env = "USAJOBS_API_KEY", hide_env_values = true)]
    pub usajobs_api_key: Option<String>,

    /// Contact email USAJobs requires as the User-Agent
    #[arg(long, env = "USAJOBS_USER_AGENT")]
    pub usajobs_user_agent: Option<String>,

    #[arg(long, env = "USAJOBS_BASE_URL", default_value = usajobs::BASE_URL)]
    pub usajobs_base_url: String,

    #[arg(long, env = "INDEED_BASE_URL", default_value = indeed::BASE_URL)]
    pub indeed_base_url: String,

    /// `text` or `json`
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the web server (default when no subcommand given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,

        /// Employer submissions allowed per client per hour
        #[arg(long, env = "SUBMISSIONS_PER_HOUR", default_value = "5")]
        submissions_per_hour: u32,

        /// Throttle submissions by `X-Forwarded-For` (set only behind a proxy)
        #[arg(long, env = "TRUST_FORWARDED_FOR")]
        trust_forwarded_for: bool,
    },
    /// Pull postings from one or more sources
    Ingest {
        /// Source to ingest (repeatable): adzuna, usajobs, indeed, craigslist
        #[arg(long = "source", required = true)]
        sources: Vec<String>,

        /// Search location, e.g. "Phoenix, AZ"
        #[arg(long)]
        location: String,

        #[arg(long)]
        keyword: Option<String>,

        /// Result pages to request per source
        #[arg(long, default_value = "5")]
        max_pages: u32,

        /// Repeat every N seconds instead of running once
        #[arg(long)]
        interval: Option<u64>,

        /// Give up on a source after N seconds
        #[arg(long, default_value = "1800")]
        source_timeout: u64,
    },
    /// Spread or demote postings stacked on one coordinate
    Maintain {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "3")]
        min_cluster: usize,

        #[arg(long, default_value = "5")]
        demote_above: usize,

        #[arg(long, default_value = "75")]
        spacing_m: f64,
    },
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            submissions_per_hour: std::env::var("SUBMISSIONS_PER_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            trust_forwarded_for: std::env::var("TRUST_FORWARDED_FOR")
                .is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on")),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn collector_settings(&self, max_pages: u32) -> CollectorSettings {
        CollectorSettings {
            adzuna_app_id: self.adzuna_app_id.clone(),
            adzuna_app_key: self.adzuna_app_key.clone(),
            adzuna_country: self.adzuna_country.clone(),
            adzuna_base_url: self.adzuna_base_url.clone(),
            usajobs_api_key: self.usajobs_api_key.clone(),
            usajobs_user_agent: self.usajobs_user_agent.clone(),
            usajobs_base_url: self.usajobs_base_url.clone(),
            indeed_base_url: self.indeed_base_url.clone(),
            max_pages: max_pages.max(1),
            http_timeout: self.http_timeout(),
        }
    }
}

impl Command {
    /// Collision policy for `maintain`; `None` for other commands.
    pub fn collision_policy(&self) -> Option<CollisionPolicy> {
        match self {
            Command::Maintain {
                dry_run,
                min_cluster,
                demote_above,
                spacing_m,
            } => Some(CollisionPolicy {
                min_cluster: *min_cluster,
                demote_above: *demote_above,
                spacing_m: *spacing_m,
                dry_run: *dry_run,
                ..CollisionPolicy::default()
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [&str; 5] = [
        "jobmap",
        "--database-url",
        "postgres://localhost/jobmap",
        "--mapbox-token",
        "pk.test",
    ];

    fn parse(extra: &[&str]) -> Config {
        Config::try_parse_from(BASE.iter().chain(extra)).unwrap()
    }

    #[test]
    fn ingest_accepts_repeated_sources() {
        let config = parse(&[
            "ingest", "--source", "adzuna", "--source", "craigslist", "--location", "Phoenix, AZ",
        ]);
        match config.resolved_command() {
            Command::Ingest {
                sources,
                location,
                max_pages,
                interval,
                ..
            } => {
                assert_eq!(sources, vec!["adzuna", "craigslist"]);
                assert_eq!(location, "Phoenix, AZ");
                assert_eq!(max_pages, 5);
                assert_eq!(interval, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn forwarded_for_is_untrusted_by_default() {
        match parse(&["serve"]).resolved_command() {
            Command::Serve {
                trust_forwarded_for,
                submissions_per_hour,
                ..
            } => {
                assert!(!trust_forwarded_for);
                assert_eq!(submissions_per_hour, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
        match parse(&["serve", "--trust-forwarded-for"]).resolved_command() {
            Command::Serve {
                trust_forwarded_for,
                ..
            } => assert!(trust_forwarded_for),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn maintain_builds_a_policy() {
        let config = parse(&["maintain", "--dry-run", "--spacing-m", "50"]);
        let policy = config.resolved_command().collision_policy().unwrap();
        assert!(policy.dry_run);
        assert_eq!(policy.spacing_m, 50.0);
        assert_eq!(policy.min_cluster, 3);
        assert_eq!(policy.demote_above, 5);
        assert_eq!(policy.decimals, 5);
    }

    #[test]
    fn collector_settings_floor_pages() {
        let config = parse(&[]);
        let settings = config.collector_settings(0);
        assert_eq!(settings.max_pages, 1);
        assert_eq!(settings.http_timeout, Duration::from_secs(10));
        assert_eq!(settings.adzuna_country, "us");
        assert_eq!(settings.adzuna_base_url, "https://api.adzuna.com");
        assert_eq!(settings.indeed_base_url, "https://www.indeed.com");
    }

    #[test]
    fn endpoints_can_be_overridden() {
        let config = parse(&["--usajobs-base-url", "http://127.0.0.1:9000"]);
        let settings = config.collector_settings(1);
        assert_eq!(settings.usajobs_base_url, "http://127.0.0.1:9000");
        assert_eq!(settings.adzuna_base_url, adzuna::BASE_URL);
    }
}
