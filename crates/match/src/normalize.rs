//! Domain-aware normalizers shared by the scorer, the entity processors and
//! the merge safety suite.
//!
//! Every function here is pure and cheap: no allocation beyond the returned
//! value, no I/O, no panics on malformed input.

use std::collections::BTreeSet;

// ── tokenization ──────────────────────────────────────────────────────────────

const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Lowercased tokens with punctuation stripped.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Token set with stop words removed, used by the cheap prescreens.
pub fn key_tokens(text: &str) -> BTreeSet<String> {
    tokens(text)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity over two token sets, in [0, 1].
pub fn token_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

// ── person names ──────────────────────────────────────────────────────────────

const TITLES: &[&str] = &["mr", "mrs", "ms", "dr", "prof", "sir", "lady", "lord"];
const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "phd", "md", "esq"];

/// Nickname families; any two members of a family are considered variants of
/// the same given name, in either direction.
const NICKNAME_FAMILIES: &[&[&str]] = &[
    &["anthony", "tony", "ant"],
    &["david", "dave", "davy"],
    &["peter", "pete", "pier"],
    &["robert", "rob", "bob", "bobby"],
    &["william", "will", "bill", "billy"],
    &["richard", "rick", "dick", "rich"],
    &["elizabeth", "liz", "beth", "betty"],
    &["catherine", "cat", "cath", "kate", "katie"],
    &["michael", "mike", "mick"],
    &["christopher", "chris"],
    &["patricia", "pat", "patty", "trish"],
];

/// Strip titles and suffixes from a person name and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty() && !TITLES.contains(t) && !SUFFIXES.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether two normalized names share a recognized nickname pattern.
pub fn are_name_variants(name_a: &str, name_b: &str) -> bool {
    for token_a in name_a.split_whitespace() {
        for token_b in name_b.split_whitespace() {
            if token_a == token_b {
                continue;
            }
            for family in NICKNAME_FAMILIES {
                if family.contains(&token_a) && family.contains(&token_b) {
                    return true;
                }
            }
        }
    }
    false
}

// ── organizations ─────────────────────────────────────────────────────────────

/// Abbreviation → canonical form, applied token-wise in both directions
/// (both sides normalize onto the canonical spelling).
const ORG_ABBREVIATIONS: &[(&str, &str)] = &[
    ("tc", "council"),
    ("cc", "council"),
    ("dc", "council"),
    ("bc", "council"),
    ("pc", "council"),
    ("ltd", "limited"),
    ("corp", "corporation"),
    ("inc", "incorporated"),
    ("assoc", "association"),
    ("dept", "department"),
    ("gov", "government"),
    ("auth", "authority"),
];

/// Lowercase, strip `.,-()&`, expand known abbreviations, collapse whitespace.
pub fn normalize_organization(org: &str) -> String {
    org.to_lowercase()
        .chars()
        .map(|c| if matches!(c, '.' | ',' | '-' | '(' | ')' | '&') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(|t| {
            ORG_ABBREVIATIONS
                .iter()
                .find(|(abbrev, _)| *abbrev == t)
                .map(|(_, full)| *full)
                .unwrap_or(t)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Acronym check: one side is a single token whose letters are exactly the
/// first letters of the other side's tokens ("stc" vs "swanage town council").
pub fn is_acronym_pair(name_a: &str, name_b: &str) -> bool {
    fn matches(abbrev: &str, words: &[&str]) -> bool {
        if abbrev.len() < 2 || abbrev.len() != words.len() {
            return false;
        }
        abbrev
            .chars()
            .zip(words.iter())
            .all(|(c, word)| word.starts_with(c))
    }

    let words_a: Vec<&str> = name_a.split_whitespace().collect();
    let words_b: Vec<&str> = name_b.split_whitespace().collect();
    if words_a.len() == 1 && words_b.len() >= 2 {
        matches(words_a[0], &words_b)
    } else if words_b.len() == 1 && words_a.len() >= 2 {
        matches(words_b[0], &words_a)
    } else {
        false
    }
}

// ── locations ─────────────────────────────────────────────────────────────────

const STREET_ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("str", "street"),
    ("rd", "road"),
    ("ave", "avenue"),
    ("pl", "place"),
    ("ct", "court"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("cl", "close"),
];

/// Expand street-type abbreviations and strip punctuation.
pub fn normalize_location(location: &str) -> String {
    location
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '.' | ',' | '-' | '#') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(|t| {
            STREET_ABBREVIATIONS
                .iter()
                .find(|(abbrev, _)| *abbrev == t)
                .map(|(_, full)| *full)
                .unwrap_or(t)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── contact identifiers ───────────────────────────────────────────────────────

/// Normalize a phone number to the 11-digit national form, or empty when the
/// input cannot be brought into that shape. Handles the `44` country prefix
/// and missing leading zero.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let digits = if digits.len() == 13 && digits.starts_with("44") {
        // Country code ahead of a full national number: drop it.
        digits[2..].to_string()
    } else if digits.len() == 12 && digits.starts_with("44") {
        // Country code ahead of a subscriber number: the leading zero takes
        // its place.
        format!("0{}", &digits[2..])
    } else if digits.len() == 10 {
        format!("0{digits}")
    } else {
        digits
    };
    if digits.len() == 11 { digits } else { String::new() }
}

/// Digits of a phone number, for loose suffix comparisons.
pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Lowercase, strip scheme and `www.`, strip trailing slash.
pub fn normalize_website(website: &str) -> String {
    let mut site = website.trim().to_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = site.strip_prefix(prefix) {
            site = rest.to_string();
            break;
        }
    }
    if let Some(rest) = site.strip_prefix("www.") {
        site = rest.to_string();
    }
    site.trim_end_matches('/').to_string()
}

/// Like [`normalize_website`] but also drops the fragment and query.
pub fn normalize_url(url: &str) -> String {
    let site = normalize_website(url);
    site.split(['#', '?']).next().unwrap_or("").to_string()
}

/// Domain part of an email address, lowercased; empty when absent.
pub fn email_domain(email: &str) -> String {
    let email = email.trim().to_lowercase();
    match email.rsplit_once('@') {
        Some((_, domain)) if !domain.is_empty() => domain.to_string(),
        _ => String::new(),
    }
}
