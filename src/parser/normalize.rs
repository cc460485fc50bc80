use chrono::{DateTime, Utc};
use url::Url;

use super::fields;
use super::rows::CandidateBlock;
use super::shelters::ShelterRanks;
use crate::config::Settings;
use crate::db::NormalizedRecord;
use crate::utils::truncate;

// Column bounds of the animals table.
pub const MAX_NAME: usize = 100;
pub const MAX_BREED: usize = 50;
pub const MAX_AGE: usize = 50;
pub const MAX_GENDER: usize = 20;
pub const MAX_SHELTER: usize = 100;
pub const MAX_DESCRIPTION: usize = 500;
pub const MAX_URL: usize = 500;

/// Per-run inputs to normalization that do not come from the page.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub now: DateTime<Utc>,
    pub ranks: ShelterRanks,
    pub site_base: Url,
    pub source_tag: String,
    pub category: String,
    pub goal_amount: f64,
}

impl ParseContext {
    pub fn new(settings: &Settings, now: DateTime<Utc>) -> anyhow::Result<Self> {
        Ok(Self {
            now,
            ranks: settings.ranks(),
            site_base: Url::parse(&settings.site_base)?,
            source_tag: settings.source_tag.clone(),
            category: settings.category.clone(),
            goal_amount: settings.goal_amount,
        })
    }
}

/// Turn one row into a record, or `None` when the row has no animal id.
pub fn normalize(block: &CandidateBlock, ctx: &ParseContext) -> Option<NormalizedRecord> {
    let text = block.text.as_str();
    let external_id = fields::external_id(text)?;

    let name = truncate(
        &fields::name(block.emphasized.as_deref(), &external_id).into_value(),
        MAX_NAME,
    );
    let shelter_name = truncate(&fields::shelter(text).into_value(), MAX_SHELTER);
    let deadline_date = fields::deadline(text, ctx.now.date_naive()).into_value();

    Some(NormalizedRecord {
        breed: truncate(&fields::breed(text).into_value(), MAX_BREED),
        age: truncate(&fields::age(text).into_value(), MAX_AGE),
        gender: truncate(fields::gender(text).value().as_str(), MAX_GENDER),
        shelter_priority_rank: ctx.ranks.rank_of(&shelter_name),
        days_until_deadline: fields::days_until(deadline_date, ctx.now),
        photo_source_url: block
            .photo_src
            .as_deref()
            .and_then(|src| ctx.site_base.join(src).ok())
            .map(|u| truncate(u.as_str(), MAX_URL)),
        detail_url: truncate(&detail_url(&ctx.site_base, &external_id), MAX_URL),
        description: fields::description(&name, &shelter_name, deadline_date, MAX_DESCRIPTION),
        source_tag: ctx.source_tag.clone(),
        category: ctx.category.clone(),
        goal_amount: ctx.goal_amount,
        rescue_only: fields::rescue_only(text).into_value(),
        intake_date: fields::intake_date(text),
        list_date: fields::list_date(text),
        name,
        shelter_name,
        external_id,
        deadline_date,
    })
}

/// Upstream detail page, keyed by the numeric part of the id.
fn detail_url(base: &Url, external_id: &str) -> String {
    let digits: String = external_id.chars().skip(1).collect();
    format!("{}/pet.asp?uaid={}", base.as_str().trim_end_matches('/'), digits)
}
