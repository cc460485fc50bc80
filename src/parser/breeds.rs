use std::sync::LazyLock;

use regex::Regex;

use crate::utils::squash_whitespace;

/// Verbose upstream breed names and their short forms. Applied in order, so
/// longer phrases come before anything they contain.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("AMERICAN PIT BULL TERRIER", "Pit Bull"),
    ("PIT BULL TERRIER", "Pit Bull"),
    ("AMERICAN STAFFORDSHIRE TERRIER", "AmStaff"),
    ("STAFFORDSHIRE BULL TERRIER", "Staffy"),
    ("GERMAN SHEPHERD DOG", "German Shepherd"),
    ("LABRADOR RETRIEVER", "Lab"),
    ("GOLDEN RETRIEVER", "Golden"),
    ("SIBERIAN HUSKY", "Husky"),
    ("ALASKAN MALAMUTE", "Malamute"),
    ("AUSTRALIAN CATTLE DOG", "Cattle Dog"),
    ("AUSTRALIAN SHEPHERD", "Aussie"),
    ("BELGIAN MALINOIS", "Malinois"),
    ("CHIHUAHUA - SMOOTH COATED", "Chihuahua"),
    ("CHIHUAHUA - LONG HAIRED", "Chihuahua LH"),
    ("JACK RUSSELL TERRIER", "JRT"),
    ("AMERICAN BULLDOG", "Am. Bulldog"),
    ("CANE CORSO MASTIFF", "Cane Corso"),
    ("MIXED BREED", "Mix"),
    ("MIX", "Mix"),
];

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(long, short)| {
            let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(long))).unwrap();
            (re, *short)
        })
        .collect()
});

/// Shorten a raw breed string using the fixed dictionary.
pub fn abbreviate(raw: &str) -> String {
    let mut out = squash_whitespace(raw);
    for (re, short) in RULES.iter() {
        out = re.replace_all(&out, *short).into_owned();
    }
    squash_whitespace(&out)
}
