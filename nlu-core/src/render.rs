//! # Renderização para Humanos
//!
//! Converte ids em descrições (`2` → `"2 (照明)"`) e monta o bloco de saída do
//! REPL. Ids fora das tabelas nunca derrubam a renderização: mantêm o número e
//! ganham a marca `unknown_type`.

use serde_json::{json, Value};

use crate::config::NluConfig;
use crate::pipeline::Prediction;
use crate::tagger::Entity;

pub fn intent_name(config: &NluConfig, intent: usize) -> Option<&str> {
    config.intent_names.get(intent).map(String::as_str)
}

/// Nome do tipo de entidade; `type_id` é 1-indexado.
pub fn entity_type_name(config: &NluConfig, type_id: u32) -> Option<&str> {
    let index = (type_id as usize).checked_sub(1)?;
    config.entity_names.get(index).map(String::as_str)
}

/// Entidades como array JSON, com o `type_id` descrito.
pub fn render_entities(config: &NluConfig, entities: &[Entity]) -> Value {
    let items = entities
        .iter()
        .map(|entity| {
            let mut item = json!({
                "text": entity.text,
                "start": entity.start,
                "end": entity.end,
                "confidence": entity.confidence,
            });
            match entity_type_name(config, entity.type_id) {
                Some(name) => {
                    item["type_id"] = json!(format!("{} ({name})", entity.type_id));
                }
                None => {
                    item["type_id"] = json!(entity.type_id);
                    item["unknown_type"] = json!(true);
                }
            }
            item
        })
        .collect();
    Value::Array(items)
}

fn describe_intent(config: &NluConfig, intent: usize) -> String {
    match intent_name(config, intent) {
        Some(name) => format!("{intent} ({name})"),
        None => format!("{intent} (?)"),
    }
}

/// Bloco de saída do REPL:
///
/// ```text
/// Input   : 照明をつけて
/// Intent  : 1 (点灯したい)
/// Entities: [ ... ]
/// ```
pub fn format_output(config: &NluConfig, prediction: &Prediction) -> String {
    let entities = render_entities(config, &prediction.entities);
    let entities = serde_json::to_string_pretty(&entities).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Input   : {}\nIntent  : {}\nEntities: {}\n",
        prediction.text,
        describe_intent(config, prediction.intent),
        entities
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(text: &str, start: usize, end: usize, type_id: u32) -> Entity {
        Entity {
            text: text.to_string(),
            start,
            end,
            type_id,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_names_are_bounds_checked() {
        let config = NluConfig::default();
        assert_eq!(intent_name(&config, 1), Some("点灯したい"));
        assert_eq!(intent_name(&config, 7), None);
        assert_eq!(entity_type_name(&config, 2), Some("照明"));
        assert_eq!(entity_type_name(&config, 0), None);
        assert_eq!(entity_type_name(&config, 9), None);
    }

    #[test]
    fn test_render_known_and_unknown_types() {
        let config = NluConfig::default();
        let rendered = render_entities(&config, &[entity("照明", 0, 2, 2), entity("x", 3, 4, 12)]);

        assert_eq!(rendered[0]["type_id"], "2 (照明)");
        assert!(rendered[0].get("unknown_type").is_none());
        assert_eq!(rendered[1]["type_id"], 12);
        assert_eq!(rendered[1]["unknown_type"], true);
        assert_eq!(rendered[1]["start"], 3);
    }

    #[test]
    fn test_format_output_block() {
        let config = NluConfig::default();
        let prediction = Prediction {
            text: "照明をつけて".into(),
            intent: 1,
            intent_confidence: 0.8,
            entities: vec![entity("照明", 0, 2, 2)],
            processing_ms: 3,
        };
        let out = format_output(&config, &prediction);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Input   : 照明をつけて");
        assert_eq!(lines[1], "Intent  : 1 (点灯したい)");
        assert!(lines[2].starts_with("Entities: ["));
        assert!(out.contains("\"2 (照明)\""));
    }

    #[test]
    fn test_format_output_unknown_intent() {
        let config = NluConfig::default();
        let prediction = Prediction {
            text: "x".into(),
            intent: 40,
            intent_confidence: 0.1,
            entities: vec![],
            processing_ms: 0,
        };
        assert!(format_output(&config, &prediction).contains("Intent  : 40 (?)"));
    }
}
