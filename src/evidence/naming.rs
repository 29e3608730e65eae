//! Naming-convention lexicons.
//!
//! A lexicon turns a table or column name into scored tags. The stock
//! [`ErpLexicon`] knows common ERP conventions (`res_` master data,
//! `_line` detail tables, `create_uid` audit columns, ...) and accepts
//! extra rules from configuration.

use smallvec::SmallVec;

use crate::config::NamingRuleConfig;
use crate::model::NamingTag;

pub type Tokens = SmallVec<[String; 4]>;

/// Pluggable naming heuristics.
pub trait NamingLexicon: Send + Sync {
    fn name(&self) -> &str;

    fn table_tags(&self, table: &str) -> Vec<NamingTag>;

    fn column_tags(&self, column: &str) -> Vec<NamingTag>;
}

/// Split an identifier into lowercase word tokens (`_`, `-`, spaces and
/// camelCase boundaries).
pub fn tokenize(name: &str) -> Tokens {
    let mut tokens = Tokens::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Crude English singular: `categories` → `category`, `boxes` → `box`,
/// `orders` → `order`.
pub fn singular(token: &str) -> String {
    if let Some(stem) = token.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Prefix,
    Suffix,
    Exact,
    Contains,
}

impl MatchKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "prefix" => Some(Self::Prefix),
            "suffix" => Some(Self::Suffix),
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }

    fn default_weight(self) -> f64 {
        match self {
            Self::Exact => 1.0,
            Self::Prefix | Self::Suffix => 0.8,
            Self::Contains => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Table,
    Column,
}

#[derive(Debug, Clone)]
pub struct NamingRule {
    pub tag: String,
    pub kind: MatchKind,
    pub patterns: Vec<String>,
    pub scope: Scope,
    pub weight: f64,
}

impl NamingRule {
    fn new(scope: Scope, kind: MatchKind, tag: &str, patterns: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            scope,
            weight: kind.default_weight(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| match self.kind {
            MatchKind::Prefix => name.starts_with(p.as_str()),
            MatchKind::Suffix => name.ends_with(p.as_str()),
            MatchKind::Exact => name == p,
            MatchKind::Contains => name.contains(p.as_str()),
        })
    }
}

/// Rule-table lexicon seeded with ERP conventions.
#[derive(Debug, Clone)]
pub struct ErpLexicon {
    rules: Vec<NamingRule>,
}

impl ErpLexicon {
    pub fn stock() -> Self {
        use MatchKind::*;
        use Scope::*;
        let rules = vec![
            NamingRule::new(Table, Suffix, "junction_table_suffix", &["_rel", "_rel_id"]),
            NamingRule::new(Table, Suffix, "detail_table_suffix", &["_line", "_lines", "_item", "_items"]),
            NamingRule::new(Table, Prefix, "system_internal_prefix", &["ir_"]),
            NamingRule::new(Table, Prefix, "master_data_prefix", &["res_"]),
            NamingRule::new(Table, Prefix, "custom_entity_prefix", &["x_", "x_studio_"]),
            NamingRule::new(Table, Suffix, "log_table_suffix", &["_log", "_logs", "_history", "_audit"]),
            NamingRule::new(Table, Suffix, "settings_table_suffix", &["_config", "_settings"]),
            NamingRule::new(Column, Exact, "primary_key_candidate", &["id"]),
            NamingRule::new(Column, Exact, "audit_user", &["create_uid", "write_uid"]),
            NamingRule::new(Column, Exact, "audit_timestamp", &["create_date", "write_date", "created_at", "updated_at"]),
            NamingRule::new(Column, Suffix, "foreign_key_single_suffix", &["_id"]),
            NamingRule::new(Column, Suffix, "foreign_key_many_suffix", &["_ids"]),
            NamingRule::new(Column, Prefix, "boolean_flag_prefix", &["is_", "has_", "can_", "allow_"]),
            NamingRule::new(Column, Contains, "monetary_value_keyword", &["amount", "total", "price", "cost", "value", "revenue", "balance"]),
            NamingRule::new(Column, Contains, "quantity_keyword", &["qty", "quantity", "count", "number"]),
            NamingRule::new(Column, Contains, "date_time_keyword", &["date", "due", "_at", "_on"]),
            NamingRule::new(Column, Contains, "contact_info_keyword", &["email", "phone", "mobile", "fax", "website", "url"]),
        ];
        Self { rules }
    }

    /// Append configured rules. Entries with an unknown kind or scope are
    /// skipped; `GenesisConfig::validate` rejects them earlier.
    pub fn with_rules(mut self, extra: &[NamingRuleConfig]) -> Self {
        for rule in extra {
            let Some(kind) = MatchKind::parse(&rule.kind) else { continue };
            let scope = match rule.scope.as_str() {
                "table" => Scope::Table,
                "column" => Scope::Column,
                _ => continue,
            };
            self.rules.push(NamingRule {
                tag: rule.tag.clone(),
                kind,
                patterns: rule.patterns.iter().map(|p| p.to_lowercase()).collect(),
                scope,
                weight: rule.weight,
            });
        }
        self
    }

    fn tags(&self, scope: Scope, name: &str) -> Vec<NamingTag> {
        let name = name.to_lowercase();
        let mut tags: Vec<NamingTag> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.scope == scope && r.matches(&name)) {
            match tags.iter_mut().find(|t| t.tag == rule.tag) {
                Some(existing) => existing.score = existing.score.max(rule.weight),
                None => tags.push(NamingTag { tag: rule.tag.clone(), score: rule.weight }),
            }
        }
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        tags
    }
}

impl Default for ErpLexicon {
    fn default() -> Self {
        Self::stock()
    }
}

impl NamingLexicon for ErpLexicon {
    fn name(&self) -> &str {
        "erp"
    }

    fn table_tags(&self, table: &str) -> Vec<NamingTag> {
        self.tags(Scope::Table, table)
    }

    fn column_tags(&self, column: &str) -> Vec<NamingTag> {
        self.tags(Scope::Column, column)
    }
}
