pub mod record;
pub mod signal;

pub use record::Record;
pub use signal::{AiAction, AiRisk, AiSignal, GraphSignal};

use serde::{Deserialize, Serialize};

/// Closed set of entity categories the pipeline knows how to process.
///
/// Each input collection is analyzed under exactly one of these; collections
/// that match no known category fall back to [`EntityType::Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Organization,
    EventPlace,
    Document,
}

impl EntityType {
    /// Map a collection name to its entity type by keyword.
    ///
    /// Document is the fallback for anything unrecognized.
    pub fn for_collection(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("people") || lower.contains("person") || lower.contains("contact") {
            EntityType::Person
        } else if lower.contains("organization") || lower.contains("organisation") || lower.contains("bodies") {
            EntityType::Organization
        } else if lower.contains("event") || lower.contains("place") {
            EntityType::EventPlace
        } else {
            EntityType::Document
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::EventPlace => "event_place",
            EntityType::Document => "document",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_map_to_entity_types() {
        assert_eq!(EntityType::for_collection("People & Contacts"), EntityType::Person);
        assert_eq!(
            EntityType::for_collection("Organizations & Bodies"),
            EntityType::Organization
        );
        assert_eq!(EntityType::for_collection("Key Places & Events"), EntityType::EventPlace);
        assert_eq!(EntityType::for_collection("Documents & Evidence"), EntityType::Document);
    }

    #[test]
    fn unknown_collection_falls_back_to_document() {
        assert_eq!(EntityType::for_collection("Actionable Tasks"), EntityType::Document);
    }
}
