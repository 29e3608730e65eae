//! Stereotype taxonomies: the closed set a profile's stereotype comes from.

use crate::model::Stereotype;

/// A closed stereotype enumeration.
pub trait StereotypeTaxonomy: Send + Sync {
    fn name(&self) -> &str;

    /// Canonical labels with a one-line description, in prompt order.
    fn entries(&self) -> &[(&'static str, &'static str)];

    /// Map a model-provided label onto the closed set.
    fn parse(&self, raw: &str) -> Option<Stereotype>;

    fn contains(&self, stereotype: &Stereotype) -> bool {
        self.entries().iter().any(|(label, _)| *label == stereotype.as_str())
    }
}

/// Stereotypes of ERP-style schemas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErpTaxonomy;

const ERP_ENTRIES: &[(&str, &str)] = &[
    ("master_data", "long-lived business entity referenced by many others (partner, product, employee)"),
    ("transaction", "business event or document with a lifecycle (order, invoice, payment)"),
    ("detail", "line or item rows belonging to one transaction"),
    ("junction", "pure many-to-many link between two entities"),
    ("lookup", "small reference list of codes or categories"),
    ("configuration", "system or module settings"),
    ("audit", "log or history of changes and events"),
];

impl StereotypeTaxonomy for ErpTaxonomy {
    fn name(&self) -> &str {
        "erp"
    }

    fn entries(&self) -> &[(&'static str, &'static str)] {
        ERP_ENTRIES
    }

    fn parse(&self, raw: &str) -> Option<Stereotype> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let label = match normalized.as_str() {
            "master_data" | "master" | "masterdata" => "master_data",
            "transaction" | "transactional" => "transaction",
            "detail" | "line" | "item" | "line_item" => "detail",
            "junction" | "link" | "bridge" => "junction",
            "lookup" | "reference" => "lookup",
            "configuration" | "config" | "settings" => "configuration",
            "audit" | "log" | "history" => "audit",
            _ => return None,
        };
        Some(Stereotype::new(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        let t = ErpTaxonomy;
        assert_eq!(t.parse("Master").unwrap().as_str(), "master_data");
        assert_eq!(t.parse("  Config ").unwrap().as_str(), "configuration");
        assert_eq!(t.parse("LOG").unwrap().as_str(), "audit");
        assert_eq!(t.parse("line-item").unwrap().as_str(), "detail");
    }

    #[test]
    fn test_closed_set() {
        let t = ErpTaxonomy;
        assert_eq!(t.parse("unknown"), None);
        assert_eq!(t.parse(""), None);
        assert!(t.contains(&Stereotype::new("lookup")));
        assert!(!t.contains(&Stereotype::new("misc")));
    }
}
