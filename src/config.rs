use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::Config;
use serde::Deserialize;

use crate::parser::shelters::{self, ShelterRanks};

const DEFAULT_CONFIG_FILE: &str = "shelter_sync.toml";
const ENV_PREFIX: &str = "SHELTER_SYNC";

const LISTING_URL: &str = "https://petharbor.com/results.asp?WHERE=type_DOG&searchtype=ALL&friends=1&samaritans=1&nosuccess=0&rows=100&imght=120&imgres=thumb&view=sysadm.v_lact_alert_euth&bgcolor=white&text=blue&alink=000000&vlink=FF6600&fontface=arial&fontsize=10&start=3&col_hdr_bg=e6e6e6&col_bg2=e6e6e6&col_bg=white&SBG=e6e6e6&SHELTERLIST=%27LACT%27,%27LACT1%27,%27LACT4%27,%27LACT3%27,%27LACT2%27,%27LACT5%27,%27LACT6%27&OrderBy=shelter";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FALLBACK_IMAGE: &str = "https://images.unsplash.com/photo-1587300003388-59208cc962cb?w=400";

/// Everything the pipeline needs, resolved once at startup and passed down
/// explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listing_url: String,
    pub site_base: String,
    pub source_tag: String,
    pub category: String,
    pub goal_amount: f64,
    pub scrape_interval_minutes: u64,
    pub startup_delay_secs: u64,
    pub page_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub page_ceiling: u32,
    pub page_delay_millis: u64,
    pub image_concurrency: usize,
    pub user_agent: String,
    pub database_path: PathBuf,
    pub image_dir: PathBuf,
    pub image_url_prefix: String,
    pub fallback_image: String,
    pub shelter_ranks: HashMap<String, u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listing_url: LISTING_URL.to_string(),
            site_base: "https://petharbor.com".to_string(),
            source_tag: "petharbor".to_string(),
            category: "general".to_string(),
            goal_amount: 500.0,
            scrape_interval_minutes: 60,
            startup_delay_secs: 5,
            page_timeout_secs: 10,
            image_timeout_secs: 10,
            page_ceiling: 5,
            page_delay_millis: 1000,
            image_concurrency: 4,
            user_agent: USER_AGENT.to_string(),
            database_path: PathBuf::from("data/shelter.sqlite"),
            image_dir: PathBuf::from("public/dog-images"),
            image_url_prefix: "/dog-images".to_string(),
            fallback_image: FALLBACK_IMAGE.to_string(),
            shelter_ranks: shelters::default_table(),
        }
    }
}

impl Settings {
    /// Layer defaults, the optional TOML file and `SHELTER_SYNC_*` env vars.
    ///
    /// An explicitly passed file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let settings: Settings = Config::builder()
            .add_source(config::File::from(file.clone()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", file))?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scrape_interval_minutes == 0 {
            bail!("scrape_interval_minutes must be greater than zero");
        }
        if self.page_ceiling == 0 {
            bail!("page_ceiling must be greater than zero");
        }
        if self.image_concurrency == 0 {
            bail!("image_concurrency must be greater than zero");
        }
        if self.source_tag.trim().is_empty() {
            bail!("source_tag must not be empty");
        }
        url::Url::parse(&self.listing_url).context("listing_url is not a valid URL")?;
        url::Url::parse(&self.site_base).context("site_base is not a valid URL")?;
        Ok(())
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_minutes * 60)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_millis)
    }

    pub fn ranks(&self) -> ShelterRanks {
        ShelterRanks::new(&self.shelter_ranks)
    }
}
