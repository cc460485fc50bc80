pub mod breeds;
pub mod fields;
pub mod normalize;
pub mod rows;
pub mod shelters;

use crate::db::NormalizedRecord;
use normalize::ParseContext;

/// Two-pass pipeline: page markup → candidate rows → normalized records.
pub fn parse_page(html: &str, ctx: &ParseContext) -> Vec<NormalizedRecord> {
    rows::extract_rows(html)
        .iter()
        .filter_map(|block| normalize::normalize(block, ctx))
        .collect()
}
