//! Per-entity-type candidate prescreens and confidence aggregation.
//!
//! The four processors form a closed set dispatched on [`EntityType`]; each
//! declares its comparison fields, a cheap symmetric prescreen, and a
//! symmetric confidence aggregator over the scorer's output.

use coalesce_types::{EntityType, Record};

use crate::dates;
use crate::normalize;
use crate::similarity::{field_text, ScoreSet};

/// Events whose parsed dates fall within this window are temporally close.
const TEMPORAL_PROXIMITY_SECS: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct EntityProcessor {
    kind: EntityType,
    acronym_bonus: f64,
}

impl EntityProcessor {
    pub fn new(kind: EntityType) -> Self {
        Self {
            kind,
            acronym_bonus: 50.0,
        }
    }

    /// Tune the organization acronym bonus (default 50.0). The default
    /// saturates confidence quickly; deployments may lower it.
    pub fn with_acronym_bonus(mut self, bonus: f64) -> Self {
        self.acronym_bonus = bonus;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.kind
    }

    /// Fields handed to the similarity scorer for this entity type.
    pub fn comparison_fields(&self) -> &'static [&'static str] {
        match self.kind {
            EntityType::Person => {
                &["name", "email", "phone", "organization", "role", "address", "notes"]
            }
            EntityType::Organization => &[
                "organization_name",
                "website",
                "email",
                "phone",
                "address",
                "category",
                "key_people",
                "notes",
            ],
            EntityType::EventPlace => &["name", "date", "location", "type", "description", "people"],
            EntityType::Document => &[
                "document_name",
                "entry_title",
                "title",
                "name",
                "document_type",
                "description",
                "notes",
                "source",
                "url",
            ],
        }
    }

    /// Primary identifying fields for this entity type.
    pub fn primary_fields(&self) -> &'static [&'static str] {
        match self.kind {
            EntityType::Person => &["name", "email", "phone"],
            EntityType::Organization => &["organization_name", "website", "email"],
            EntityType::EventPlace => &["name", "date", "location"],
            EntityType::Document => &["document_name", "entry_title", "title", "url"],
        }
    }

    /// Cheap symmetric prescreen deciding whether a pair is worth scoring.
    pub fn is_candidate(&self, a: &Record, b: &Record) -> bool {
        match self.kind {
            EntityType::Person => person_candidate(a, b),
            EntityType::Organization => organization_candidate(a, b),
            EntityType::EventPlace => event_candidate(a, b),
            EntityType::Document => document_candidate(a, b),
        }
    }

    /// Aggregate field scores into a pair confidence in [0, 100].
    ///
    /// Symmetric in its record arguments.
    pub fn confidence(&self, scores: &ScoreSet, a: &Record, b: &Record) -> f64 {
        match self.kind {
            EntityType::Person => person_confidence(scores, a, b),
            EntityType::Organization => organization_confidence(scores, a, b, self.acronym_bonus),
            EntityType::EventPlace => event_confidence(scores),
            EntityType::Document => document_confidence(scores, a, b),
        }
    }
}

// ── person ────────────────────────────────────────────────────────────────────

fn person_candidate(a: &Record, b: &Record) -> bool {
    let email_a = field_text(a, "email").to_lowercase();
    let email_b = field_text(b, "email").to_lowercase();
    if !email_a.is_empty() && email_a == email_b {
        return true;
    }

    let phone_a = normalize::normalize_phone(&field_text(a, "phone"));
    let phone_b = normalize::normalize_phone(&field_text(b, "phone"));
    if !phone_a.is_empty() && phone_a == phone_b {
        return true;
    }

    let tokens_a = normalize::key_tokens(&field_text(a, "name"));
    let tokens_b = normalize::key_tokens(&field_text(b, "name"));
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return false;
    }
    let overlap = tokens_a.intersection(&tokens_b).count();
    let smaller = tokens_a.len().min(tokens_b.len());
    overlap as f64 / smaller as f64 >= 0.6
}

fn person_confidence(scores: &ScoreSet, a: &Record, b: &Record) -> f64 {
    if scores.has_exact(&["email"]) || scores.has_exact(&["phone"]) {
        return 95.0;
    }
    let phone_a = normalize::normalize_phone(&field_text(a, "phone"));
    let phone_b = normalize::normalize_phone(&field_text(b, "phone"));
    if !phone_a.is_empty() && phone_a == phone_b {
        return 95.0;
    }

    let confidence = 0.6 * scores.composite("name")
        + 0.2 * scores.composite("organization")
        + 0.2 * scores.composite("role");

    let supporting = ["organization", "role", "address"]
        .iter()
        .filter(|f| scores.composite(f) > 70.0)
        .count();
    let bonus = match supporting {
        0 => 0.0,
        1 => 5.0,
        _ => 15.0,
    };
    (confidence + bonus).min(100.0)
}

// ── organization ──────────────────────────────────────────────────────────────

fn organization_candidate(a: &Record, b: &Record) -> bool {
    let site_a = normalize::normalize_website(&field_text(a, "website"));
    let site_b = normalize::normalize_website(&field_text(b, "website"));
    if !site_a.is_empty() && site_a == site_b {
        return true;
    }

    let domain_a = normalize::email_domain(&field_text(a, "email"));
    let domain_b = normalize::email_domain(&field_text(b, "email"));
    if !domain_a.is_empty() && domain_a == domain_b {
        return true;
    }

    let name_a = normalize::normalize_organization(&field_text(a, "organization_name"));
    let name_b = normalize::normalize_organization(&field_text(b, "organization_name"));
    if name_a.is_empty() || name_b.is_empty() {
        return false;
    }
    if normalize::is_acronym_pair(&name_a, &name_b) {
        return true;
    }
    let tokens_a = normalize::key_tokens(&name_a);
    let tokens_b = normalize::key_tokens(&name_b);
    normalize::token_jaccard(&tokens_a, &tokens_b) >= 0.5
}

fn organization_confidence(scores: &ScoreSet, a: &Record, b: &Record, acronym_bonus: f64) -> f64 {
    let site_a = normalize::normalize_website(&field_text(a, "website"));
    let site_b = normalize::normalize_website(&field_text(b, "website"));
    if (!site_a.is_empty() && site_a == site_b) || scores.has_exact(&["website", "email"]) {
        return 95.0;
    }

    let mut confidence = 0.5 * scores.composite("organization_name")
        + 0.2 * scores.composite("website")
        + 0.2 * scores.composite("email")
        + 0.1 * scores.composite("category");

    let name_a = normalize::normalize_organization(&field_text(a, "organization_name"));
    let name_b = normalize::normalize_organization(&field_text(b, "organization_name"));
    if normalize::is_acronym_pair(&name_a, &name_b) {
        confidence = (confidence + acronym_bonus).min(100.0);
    }

    let supporting = ["website", "email", "phone", "address"]
        .iter()
        .filter(|f| scores.composite(f) > 80.0)
        .count();
    let bonus = match supporting {
        0 => 0.0,
        1 => 10.0,
        _ => 20.0,
    };
    (confidence + bonus).min(100.0)
}

// ── event / place ─────────────────────────────────────────────────────────────

fn event_candidate(a: &Record, b: &Record) -> bool {
    let tokens_a = normalize::key_tokens(&field_text(a, "name"));
    let tokens_b = normalize::key_tokens(&field_text(b, "name"));
    if !tokens_a.is_empty() && !tokens_b.is_empty() {
        let similarity = normalize::token_jaccard(&tokens_a, &tokens_b);
        if similarity >= 0.8 {
            return true;
        }
        if similarity >= 0.6 && temporally_close(a, b) {
            return true;
        }
    }
    // Distinct names can still denote one event when they coincide in both
    // time and place.
    colocated_same_day(a, b)
}

fn temporally_close(a: &Record, b: &Record) -> bool {
    let date_a = field_text(a, "date");
    let date_b = field_text(b, "date");
    match dates::seconds_between(&date_a, &date_b) {
        // Missing or unparseable dates never exclude a pair.
        None => true,
        Some(seconds) => seconds <= TEMPORAL_PROXIMITY_SECS,
    }
}

fn colocated_same_day(a: &Record, b: &Record) -> bool {
    let (Some(date_a), Some(date_b)) = (
        dates::parse_flexible_date(&field_text(a, "date")),
        dates::parse_flexible_date(&field_text(b, "date")),
    ) else {
        return false;
    };
    if date_a.date() != date_b.date() {
        return false;
    }
    let loc_a = normalize::key_tokens(&field_text(a, "location"));
    let loc_b = normalize::key_tokens(&field_text(b, "location"));
    !loc_a.is_empty() && normalize::token_jaccard(&loc_a, &loc_b) >= 0.5
}

fn event_confidence(scores: &ScoreSet) -> f64 {
    let date = scores.composite("date");
    let location = scores.composite("location");
    let mut confidence = 0.3 * scores.composite("name")
        + 0.3 * date
        + 0.3 * location
        + 0.05 * scores.composite("type")
        + 0.05 * scores.composite("description");

    if date == 100.0 && location > 50.0 {
        confidence += 25.0;
    } else if date > 80.0 && location > 80.0 {
        confidence += 15.0;
    }
    confidence.min(100.0)
}

// ── document ──────────────────────────────────────────────────────────────────

const DOCUMENT_TITLE_FIELDS: &[&str] = &["document_name", "entry_title", "title", "name"];

fn document_title(record: &Record) -> String {
    for field in DOCUMENT_TITLE_FIELDS {
        let title = record.text(field);
        if !title.is_empty() {
            return title;
        }
    }
    String::new()
}

fn document_candidate(a: &Record, b: &Record) -> bool {
    let url_a = normalize::normalize_url(&field_text(a, "url"));
    let url_b = normalize::normalize_url(&field_text(b, "url"));
    if !url_a.is_empty() && url_a == url_b {
        return true;
    }

    let tokens_a = normalize::key_tokens(&document_title(a));
    let tokens_b = normalize::key_tokens(&document_title(b));
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return false;
    }
    normalize::token_jaccard(&tokens_a, &tokens_b) >= 0.7
}

fn document_confidence(scores: &ScoreSet, a: &Record, b: &Record) -> f64 {
    let url_a = normalize::normalize_url(&field_text(a, "url"));
    let url_b = normalize::normalize_url(&field_text(b, "url"));
    if (!url_a.is_empty() && url_a == url_b) || scores.has_exact(&["url"]) {
        return 95.0;
    }

    let title = scores.max_composite(DOCUMENT_TITLE_FIELDS);
    let confidence = 0.5 * title
        + 0.2 * scores.composite("url")
        + 0.1 * scores.composite("document_type")
        + 0.1 * scores.composite("description")
        + 0.1 * scores.composite("source");

    let supporting = ["document_type", "description", "source"]
        .iter()
        .filter(|f| scores.composite(f) > 70.0)
        .count();
    let bonus = match supporting {
        0 => 0.0,
        1 => 5.0,
        _ => 10.0,
    };
    (confidence + bonus).min(100.0)
}
