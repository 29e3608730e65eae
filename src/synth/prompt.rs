//! Prompt rendering and response validation for synthesis.

use std::fmt::Write as _;

use serde_json::Value as Json;

use super::taxonomy::StereotypeTaxonomy;
use crate::model::{EvidenceDossier, Stereotype};

pub const SYSTEM_PROMPT: &str = "You are a data architect. You answer with one raw JSON object and nothing else.";

const TEMPLATE: &str = "\
Synthesize the evidence below into a structured description of one database table.
Be dense and factual: the summary is embedded for vector similarity search.

### ENTITY
- Entity: {entity}

### EVIDENCE
{evidence}

### RESPONSE SCHEMA
Return a single JSON object with exactly these keys:
{
  \"purpose\": \"functional purpose of the entity, in English\",
  \"business_logic\": \"business rules inferred from the evidence (e.g. from distinct values), or null\",
  \"stereotype\": \"one of: {stereotypes}\",
  \"summary\": \"one dense paragraph combining every relevant clue, for embedding\",
  \"confidence\": 0.0
}
`confidence` is a number between 0.0 and 1.0.

### STEREOTYPES
{stereotype_help}

### JSON OUTPUT ONLY:
";

/// Render the synthesis prompt. Pure function of the dossier and taxonomy.
pub fn render_prompt(dossier: &EvidenceDossier, taxonomy: &dyn StereotypeTaxonomy) -> String {
    let labels: Vec<&str> = taxonomy.entries().iter().map(|(l, _)| *l).collect();
    let help: Vec<String> = taxonomy.entries().iter().map(|(l, d)| format!("- {l}: {d}")).collect();
    TEMPLATE
        .replace("{entity}", &dossier.entity.to_string())
        .replace("{evidence}", &render_evidence(dossier))
        .replace("{stereotypes}", &labels.join(", "))
        .replace("{stereotype_help}", &help.join("\n"))
}

fn render_evidence(d: &EvidenceDossier) -> String {
    let mut out = String::new();
    let s = &d.structural;

    let _ = writeln!(out, "# --- Structure ---");
    if let Some(comment) = &s.comment {
        let _ = writeln!(out, "comment: {comment}");
    }
    let _ = writeln!(out, "columns: {}", s.column_count);
    let _ = writeln!(out, "primary_key: [{}]", s.primary_key.join(", "));
    let _ = writeln!(out, "is_junction: {}", s.is_junction);
    for c in &s.columns {
        let mut flags = Vec::new();
        if c.is_primary_key {
            flags.push("pk");
        }
        if c.is_foreign_key {
            flags.push("fk");
        }
        if !c.nullable {
            flags.push("not null");
        }
        let _ = write!(out, "- {} {}", c.name, c.data_type);
        if !flags.is_empty() {
            let _ = write!(out, " ({})", flags.join(", "));
        }
        if let Some(comment) = &c.comment {
            let _ = write!(out, " -- {comment}");
        }
        out.push('\n');
    }
    for fk in &s.foreign_keys {
        let _ = writeln!(
            out,
            "fk: ({}) -> {}({}) on delete {} on update {}",
            fk.columns.join(", "),
            fk.target,
            fk.target_columns.join(", "),
            fk.on_delete,
            fk.on_update
        );
    }
    for u in &s.unique_constraints {
        let _ = writeln!(out, "unique: {u}");
    }
    for i in &s.indexes {
        let _ = writeln!(out, "index: {i}");
    }

    let r = &d.relational;
    let _ = writeln!(out, "\n# --- Relations ---");
    let _ = writeln!(out, "fan_in: {} {:?}", r.fan_in, r.referenced_by);
    let _ = writeln!(out, "fan_out: {} {:?}", r.fan_out, r.references);
    if !r.junctions.is_empty() {
        let _ = writeln!(out, "junctions: {:?}", r.junctions);
    }

    let n = &d.naming;
    let _ = writeln!(out, "\n# --- Naming ({}) ---", n.lexicon);
    let _ = writeln!(out, "tokens: {:?}", n.table_tokens);
    for t in &n.table_tags {
        let _ = writeln!(out, "tag: {} ({:.1})", t.tag, t.score);
    }
    for (column, tags) in &n.column_tags {
        let tags: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        let _ = writeln!(out, "{column}: {}", tags.join(", "));
    }

    let st = &d.statistical;
    let _ = writeln!(out, "\n# --- Data profile ---");
    let _ = writeln!(out, "row_count: {} (sampled {})", st.row_count, st.sample_size);
    for (column, stats) in &st.columns {
        let _ = write!(
            out,
            "{column}: null_ratio={:.2} distinct={} samples={:?}",
            stats.null_ratio, stats.distinct_estimate, stats.sample_values
        );
        if let Some(values) = &stats.categorical_values {
            let _ = write!(out, " categorical={values:?}");
        }
        out.push('\n');
    }
    out
}

/// A response that passed schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProfile {
    pub purpose: String,
    pub business_logic: Option<String>,
    pub stereotype: Stereotype,
    pub summary: String,
    pub confidence: f64,
}

/// The outermost `{ ... }` span of a model reply.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn required_text(obj: &serde_json::Map<String, Json>, key: &str) -> Result<String, String> {
    match obj.get(key) {
        Some(Json::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Json::String(_)) => Err(format!("field '{key}' is empty")),
        Some(_) => Err(format!("field '{key}' is not a string")),
        None => Err(format!("missing required field '{key}'")),
    }
}

/// Validate a reply against the response schema.
pub fn parse_response(text: &str, taxonomy: &dyn StereotypeTaxonomy) -> Result<ParsedProfile, String> {
    let raw = extract_json_object(text).ok_or("no JSON object in response")?;
    let json: Json = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = json.as_object().ok_or("response is not a JSON object")?;

    let purpose = required_text(obj, "purpose")?;
    let summary = required_text(obj, "summary")?;
    let stereotype_raw = required_text(obj, "stereotype")?;
    let stereotype = taxonomy
        .parse(&stereotype_raw)
        .ok_or_else(|| format!("stereotype '{stereotype_raw}' is not in the {} taxonomy", taxonomy.name()))?;

    let business_logic = match obj.get("business_logic") {
        None | Some(Json::Null) => None,
        Some(Json::String(s)) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("null") => None,
        Some(Json::String(s)) => Some(s.trim().to_string()),
        Some(_) => return Err("field 'business_logic' is not a string".into()),
    };

    let confidence = match obj.get("confidence") {
        Some(Json::Number(n)) => n.as_f64().ok_or("confidence is not a number")?,
        Some(Json::String(s)) => s.trim().parse::<f64>().map_err(|_| format!("confidence '{s}' is not a number"))?,
        Some(_) => return Err("field 'confidence' is not a number".into()),
        None => return Err("missing required field 'confidence'".into()),
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }

    Ok(ParsedProfile { purpose, business_logic, stereotype, summary, confidence })
}

/// Entity named on the `- Entity:` line of a rendered prompt.
pub fn prompt_entity(prompt: &str) -> Option<&str> {
    prompt.lines().find_map(|l| l.trim().strip_prefix("- Entity:")).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::taxonomy::ErpTaxonomy;

    const GOOD: &str = r#"Sure! {"purpose": "Customer master", "business_logic": null,
        "stereotype": "Master", "summary": "Partners of the company.", "confidence": 0.9} done"#;

    #[test]
    fn test_parse_valid_response() {
        let p = parse_response(GOOD, &ErpTaxonomy).unwrap();
        assert_eq!(p.stereotype.as_str(), "master_data");
        assert_eq!(p.business_logic, None);
        assert_eq!(p.confidence, 0.9);
    }

    #[test]
    fn test_missing_stereotype_is_rejected() {
        let text = r#"{"purpose": "x", "summary": "y", "confidence": 0.5}"#;
        let err = parse_response(text, &ErpTaxonomy).unwrap_err();
        assert!(err.contains("stereotype"));
    }

    #[test]
    fn test_out_of_set_and_out_of_range() {
        let unknown = r#"{"purpose": "x", "summary": "y", "stereotype": "Unknown", "confidence": 0.5}"#;
        assert!(parse_response(unknown, &ErpTaxonomy).is_err());
        let high = r#"{"purpose": "x", "summary": "y", "stereotype": "log", "confidence": 1.5}"#;
        assert!(parse_response(high, &ErpTaxonomy).is_err());
        let string_conf = r#"{"purpose": "x", "summary": "y", "stereotype": "log", "confidence": "0.7"}"#;
        assert_eq!(parse_response(string_conf, &ErpTaxonomy).unwrap().confidence, 0.7);
    }

    #[test]
    fn test_no_json() {
        assert!(parse_response("I cannot help with that", &ErpTaxonomy).is_err());
        assert_eq!(extract_json_object("} {"), None);
    }

    #[test]
    fn test_prompt_entity_line() {
        assert_eq!(prompt_entity("### ENTITY\n- Entity: public.orders\n"), Some("public.orders"));
        assert_eq!(prompt_entity("nothing"), None);
    }
}
