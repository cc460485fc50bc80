use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::fields;
use crate::utils::squash_whitespace;

static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"table[bgcolor="white"]"#).unwrap());
static EMPHASIS_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("b, strong").unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());

/// Hints that an `img` is the animal photo rather than a spacer or logo.
const PHOTO_HINTS: &[&str] = &["get_image", "petharbor"];

/// One animal's row, still unstructured.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBlock {
    /// Text nodes of the row, trimmed and joined with newlines.
    pub text: String,
    /// First bold text in the row, the usual home of the animal's name.
    pub emphasized: Option<String>,
    /// Raw `src` of the photo, possibly relative.
    pub photo_src: Option<String>,
}

/// Split a listing page into per-animal rows.
///
/// Header, footer and spacer tables carry no animal identifier and are
/// dropped here without complaint.
pub fn extract_rows(html: &str) -> Vec<CandidateBlock> {
    let doc = Html::parse_document(html);

    doc.select(&ROW_SEL)
        .filter(|table| is_innermost(table))
        .filter_map(|table| {
            let text = row_text(&table);
            fields::external_id(&text)?;
            Some(CandidateBlock {
                emphasized: first_emphasis(&table),
                photo_src: photo_src(&table),
                text,
            })
        })
        .collect()
}

/// Wrapper tables that hold several rows would otherwise read as one animal.
fn is_innermost(table: &ElementRef) -> bool {
    !table.select(&ROW_SEL).any(|inner| inner.id() != table.id())
}

fn row_text(el: &ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_emphasis(el: &ElementRef) -> Option<String> {
    el.select(&EMPHASIS_SEL)
        .map(|b| squash_whitespace(&b.text().collect::<String>()))
        .find(|t| !t.is_empty() && !t.ends_with(':'))
}

fn photo_src(el: &ElementRef) -> Option<String> {
    el.select(&IMG_SEL)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| {
            let lower = src.to_lowercase();
            PHOTO_HINTS.iter().any(|h| lower.contains(h))
        })
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn animal_row(name: &str, id: &str, shelter: &str, deadline: &str) -> String {
        format!(
            r#"<table bgcolor="white"><tr>
<td><a href="pet.asp?uaid=LACT.{id}"><img src="get_image.asp?RES=thumb&ID={id}&LOCATION=LACT"></a></td>
<td><font face="arial"><b>{name}</b> ({id})<br>
NEUTERED MALE GERMAN SHEPHERD DOG MIX Shelter: {shelter}<br>
Age: 2 years old<br>
Scheduled Euthanasia Date: {deadline}<br>
This animal is only available to a rescue:Yes This animal has been at the shelter since 09/01/2026.
</font></td></tr></table>"#
        )
    }

    pub(crate) fn page(rows: &[String]) -> String {
        format!(
            r##"<html><body>
<table bgcolor="white"><tr><td><b>Animals at risk</b></td><td>Sorted by shelter</td></tr></table>
{}
<table bgcolor="#e6e6e6"><tr><td>Page 1 of 1</td></tr></table>
</body></html>"##,
            rows.join("\n")
        )
    }

    #[test]
    fn header_rows_are_skipped() {
        let html = page(&[
            animal_row("BUDDY", "A1234567", "SOUTH LA", "10/20/2026"),
            animal_row("DAISY", "A7654321", "HARBOR", "10/25/2026"),
            animal_row("ROCKY", "A1111111", "EAST VALLEY", "10/22/2026"),
        ]);
        let rows = extract_rows(&html);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].emphasized.as_deref(), Some("BUDDY"));
        assert!(rows[1].text.contains("A7654321"));
    }

    #[test]
    fn photo_src_is_captured() {
        let html = page(&[animal_row("BUDDY", "A1234567", "SOUTH LA", "10/20/2026")]);
        let rows = extract_rows(&html);
        assert_eq!(
            rows[0].photo_src.as_deref(),
            Some("get_image.asp?RES=thumb&ID=A1234567&LOCATION=LACT")
        );
    }

    #[test]
    fn wrapper_table_is_not_a_row() {
        let html = format!(
            r#"<table bgcolor="white"><tr><td>{}{}</td></tr></table>"#,
            animal_row("BUDDY", "A1234567", "SOUTH LA", "10/20/2026"),
            animal_row("DAISY", "A7654321", "HARBOR", "10/25/2026"),
        );
        let rows = extract_rows(&html);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(extract_rows("<html><body>No animals found</body></html>").is_empty());
        assert!(extract_rows("").is_empty());
    }

    #[test]
    fn label_colon_is_not_a_name() {
        let html = r#"<table bgcolor="white"><tr><td><b>Name:</b> <b>MAX</b> (A2222222) Shelter: SOUTH LA</td></tr></table>"#;
        let rows = extract_rows(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].emphasized.as_deref(), Some("MAX"));
    }
}
