// C4 model to D2 converter. Single-pass line parser: boundaries open a D2
// container, entities map to shapes via a fixed table, relationships are
// qualified by the container an entity was declared in.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::sys_debug;

lazy_static! {
    static ref TITLE: Regex = Regex::new(r"title\s+(.+)").unwrap();
    static ref C4_LEVEL: Regex =
        Regex::new(r"(?i)^C4(Context|Container|Component|Dynamic|Deployment)").unwrap();
    static ref BOUNDARY: Regex = Regex::new(
        r#"^(Boundary|Enterprise_Boundary|System_Boundary|Container_Boundary)\s*\(\s*(\w+)\s*,\s*"([^"]+)"\s*\)\s*\{"#
    )
    .unwrap();
    static ref ENTITY: Regex = Regex::new(
        r#"^(\w+)\s*\(\s*(\w+)\s*,\s*"([^"]+)"(?:\s*,\s*"([^"]*)")?(?:\s*,\s*"([^"]*)")?\s*\)"#
    )
    .unwrap();
    static ref REL: Regex = Regex::new(
        r#"^Rel(?:_[A-Za-z]+)?\s*\(\s*(\w+)\s*,\s*(\w+)\s*,\s*"([^"]+)"(?:\s*,\s*"([^"]*)")?\s*\)"#
    )
    .unwrap();
    static ref C4_HINTS: Vec<Regex> = vec![
        Regex::new(r"\b(Person|System|Container|Component)\s*\(").unwrap(),
        Regex::new(r"\bRel\s*\(").unwrap(),
        Regex::new(r"\bC4(Context|Container|Component|Dynamic|Deployment)\b").unwrap(),
        Regex::new(r"\bBoundary\s*\(").unwrap(),
    ];
}

/// Shape and optional styling for a C4 entity type.
fn shape_for(entity_type: &str) -> (&'static str, Option<&'static str>) {
    match entity_type {
        "Person" => ("person", None),
        "Person_Ext" => ("person", Some("stroke: \"#999\"; fill: \"#f5f5f5\"")),
        "System" => ("rectangle", Some("fill: \"#1168bd\"; stroke: \"#0b4884\"")),
        "System_Ext" => ("rectangle", Some("fill: \"#999\"; stroke: \"#666\"")),
        "SystemDb" => ("cylinder", Some("fill: \"#1168bd\"; stroke: \"#0b4884\"")),
        "SystemDb_Ext" => ("cylinder", Some("fill: \"#999\"; stroke: \"#666\"")),
        "SystemQueue" => ("queue", Some("fill: \"#1168bd\"; stroke: \"#0b4884\"")),
        "SystemQueue_Ext" => ("queue", Some("fill: \"#999\"; stroke: \"#666\"")),
        "Container" => ("rectangle", Some("fill: \"#438dd5\"; stroke: \"#3682c3\"")),
        "Container_Ext" => ("rectangle", Some("fill: \"#999\"; stroke: \"#666\"")),
        "ContainerDb" => ("cylinder", Some("fill: \"#438dd5\"; stroke: \"#3682c3\"")),
        "ContainerDb_Ext" => ("cylinder", Some("fill: \"#999\"; stroke: \"#666\"")),
        "ContainerQueue" => ("queue", Some("fill: \"#438dd5\"; stroke: \"#3682c3\"")),
        "ContainerQueue_Ext" => ("queue", Some("fill: \"#999\"; stroke: \"#666\"")),
        "Component" => ("rectangle", Some("fill: \"#85bbf0\"; stroke: \"#78a8d8\"")),
        "Component_Ext" => ("rectangle", Some("fill: \"#999\"; stroke: \"#666\"")),
        "ComponentDb" => ("cylinder", Some("fill: \"#85bbf0\"; stroke: \"#78a8d8\"")),
        "ComponentDb_Ext" => ("cylinder", Some("fill: \"#999\"; stroke: \"#666\"")),
        "ComponentQueue" => ("queue", Some("fill: \"#85bbf0\"; stroke: \"#78a8d8\"")),
        "ComponentQueue_Ext" => ("queue", Some("fill: \"#999\"; stroke: \"#666\"")),
        _ => ("rectangle", None),
    }
}

/// Detect whether source is C4 syntax, even without a language marker.
pub fn looks_like_c4(code: &str) -> bool {
    if code.trim().is_empty() {
        return false;
    }
    C4_HINTS.iter().any(|pattern| pattern.is_match(code))
}

/// Convert C4 source to D2. Unknown lines are skipped; an entity's container
/// binding is fixed at declaration time and survives boundary close.
pub fn convert_c4_to_d2(c4_code: &str) -> String {
    if c4_code.trim().is_empty() {
        return String::new();
    }

    let mut d2_lines: Vec<String> = Vec::new();
    let mut current_container: Option<String> = None;
    // entity id -> container id, bound where the entity was declared
    let mut entity_containers: HashMap<String, String> = HashMap::new();

    if let Some(caps) = TITLE.captures(c4_code) {
        d2_lines.push(format!("# {}", &caps[1]));
        d2_lines.push(String::new());
    }

    d2_lines.push("direction: down".to_string());
    d2_lines.push(String::new());

    for line in c4_code.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if C4_LEVEL.is_match(trimmed) || trimmed.starts_with("title ") {
            continue;
        }

        if trimmed == "}" {
            if current_container.take().is_some() {
                d2_lines.push("}".to_string());
                d2_lines.push(String::new());
            }
            continue;
        }

        if let Some(caps) = BOUNDARY.captures(trimmed) {
            let boundary_id = caps[2].to_string();
            let label = &caps[3];
            current_container = Some(boundary_id.clone());

            d2_lines.push(format!("{}: {{", boundary_id));
            d2_lines.push(format!("  label: \"{}\"", label));
            d2_lines.push("  style: {".to_string());
            d2_lines.push("    stroke: \"#666\"".to_string());
            d2_lines.push("    stroke-width: 2".to_string());
            d2_lines.push("    stroke-dash: 5".to_string());
            d2_lines.push("    fill: transparent".to_string());
            d2_lines.push("  }".to_string());
            d2_lines.push(String::new());
            continue;
        }

        if let Some(caps) = REL.captures(trimmed) {
            let from = qualify(&caps[1], current_container.as_deref(), &entity_containers);
            let to = qualify(&caps[2], current_container.as_deref(), &entity_containers);
            let label = &caps[3];
            let full_label = match caps.get(4).map(|m| m.as_str()).filter(|t| !t.is_empty()) {
                Some(tech) => format!("{}\\n[{}]", label, tech),
                None => label.to_string(),
            };
            d2_lines.push(format!("{} -> {}: \"{}\"", from, to, full_label));
            sys_debug!("[C4] Added relationship: {} -> {}", from, to);
            continue;
        }

        if let Some(caps) = ENTITY.captures(trimmed) {
            let entity_type = &caps[1];
            let entity_id = caps[2].to_string();
            let label = &caps[3];
            let description = caps.get(4).map(|m| m.as_str()).filter(|d| !d.is_empty());
            let technology = caps.get(5).map(|m| m.as_str()).filter(|t| !t.is_empty());
            let (shape, style) = shape_for(entity_type);

            if let Some(container) = &current_container {
                entity_containers.insert(entity_id.clone(), container.clone());
            }

            let prefix = if current_container.is_some() { "  " } else { "" };
            d2_lines.push(format!("{}{}: {{", prefix, entity_id));
            d2_lines.push(format!("{}  label: \"{}\"", prefix, label));
            d2_lines.push(format!("{}  shape: {}", prefix, shape));

            if description.is_some() || technology.is_some() {
                let tooltip = match technology {
                    Some(tech) => format!("{}\\n[{}]", description.unwrap_or(""), tech),
                    None => description.unwrap_or("").to_string(),
                };
                d2_lines.push(format!("{}  tooltip: \"{}\"", prefix, tooltip));
            }
            if let Some(style) = style {
                d2_lines.push(format!("{}  style: {{{}}}", prefix, style));
            }

            d2_lines.push(format!("{}}}", prefix));
            d2_lines.push(String::new());
            continue;
        }
    }

    if current_container.is_some() {
        d2_lines.push("}".to_string());
        d2_lines.push(String::new());
    }

    d2_lines.join("\n")
}

/// Qualify a relationship endpoint with its container: the enclosing boundary
/// wins while open, otherwise the container recorded at declaration.
fn qualify(
    entity_id: &str,
    current_container: Option<&str>,
    entity_containers: &HashMap<String, String>,
) -> String {
    if entity_id.contains('.') {
        return entity_id.to_string();
    }
    if let Some(container) = current_container {
        return format!("{}.{}", container, entity_id);
    }
    if let Some(container) = entity_containers.get(entity_id) {
        return format!("{}.{}", container, entity_id);
    }
    entity_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_c4() {
        assert!(looks_like_c4("Person(user, \"User\")"));
        assert!(looks_like_c4("C4Context\ntitle X"));
        assert!(looks_like_c4("Rel(a, b, \"calls\")"));
        assert!(!looks_like_c4("a -> b: \"plain d2\""));
        assert!(!looks_like_c4(""));
    }

    #[test]
    fn test_person_maps_to_person_shape() {
        let d2 = convert_c4_to_d2("Person(user, \"End User\")");
        assert!(d2.contains("user: {"));
        assert!(d2.contains("label: \"End User\""));
        assert!(d2.contains("shape: person"));
        assert!(d2.contains("direction: down"));
    }

    #[test]
    fn test_database_maps_to_cylinder() {
        let d2 = convert_c4_to_d2("ContainerDb(db, \"Orders DB\", \"PostgreSQL\")");
        assert!(d2.contains("shape: cylinder"));
        assert!(d2.contains("tooltip: \"PostgreSQL\""));
    }

    #[test]
    fn test_unknown_entity_defaults_to_rectangle() {
        let d2 = convert_c4_to_d2("Widget(w, \"Widget\")");
        assert!(d2.contains("shape: rectangle"));
    }

    #[test]
    fn test_relationship_with_technology_label() {
        let d2 = convert_c4_to_d2("Rel(app, db, \"reads\", \"JDBC\")");
        assert!(d2.contains("app -> db: \"reads\\n[JDBC]\""));
    }

    #[test]
    fn test_title_becomes_comment() {
        let d2 = convert_c4_to_d2("title Shop Architecture\nPerson(u, \"U\")");
        assert!(d2.starts_with("# Shop Architecture"));
    }

    #[test]
    fn test_boundary_scopes_entities_and_relationships() {
        let c4 = r#"System_Boundary(shop, "Shop") {
    Container(api, "API")
    ContainerDb(db, "DB")
}
Rel(api, db, "reads")"#;
        let d2 = convert_c4_to_d2(c4);
        assert!(d2.contains("shop: {"));
        assert!(d2.contains("  api: {"));
        // Declared-in-boundary entities keep their qualification after close
        assert!(d2.contains("shop.api -> shop.db: \"reads\""));
    }

    #[test]
    fn test_relationship_inside_open_boundary_uses_it() {
        let c4 = r#"System_Boundary(b, "B") {
    Container(x, "X")
    Container(y, "Y")
    Rel(x, y, "talks")
}"#;
        let d2 = convert_c4_to_d2(c4);
        assert!(d2.contains("b.x -> b.y: \"talks\""));
    }

    #[test]
    fn test_c4_level_and_comment_lines_skipped() {
        let d2 = convert_c4_to_d2("C4Context\n# note\nPerson(u, \"U\")");
        assert!(!d2.contains("C4Context"));
        assert!(d2.contains("u: {"));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert_eq!(convert_c4_to_d2("   "), "");
    }

    #[test]
    fn test_unclosed_boundary_closed_at_end() {
        let c4 = "System_Boundary(b, \"B\") {\n    Container(x, \"X\")";
        let d2 = convert_c4_to_d2(c4);
        let opens = d2.matches('{').count();
        let closes = d2.matches('}').count();
        assert_eq!(opens, closes);
    }
}
