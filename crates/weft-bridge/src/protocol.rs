//! Wire encoding of the effect stream.
//!
//! Each effect serializes as `{op, node_id, type?, props_delta?,
//! parent_id?, index?}`; a commit's effects travel together in a batch
//! tagged with the commit revision. The native renderer must apply effects
//! in stream order.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use weft_core::{CommitBatch, Effect, PropValue, Props};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOp {
    Create,
    Update,
    Delete,
    Move,
}

/// One serialized mutation instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEffect {
    pub op: WireOp,
    pub node_id: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props_delta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// One commit's worth of wire effects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireBatch {
    pub commit: u64,
    pub effects: Vec<WireEffect>,
}

pub fn encode_batch(batch: &CommitBatch) -> WireBatch {
    WireBatch {
        commit: batch.revision,
        effects: batch.effects.iter().map(encode_effect).collect(),
    }
}

pub fn encode_effect(effect: &Effect) -> WireEffect {
    match effect {
        Effect::Create {
            node,
            parent,
            index,
            tag,
            props,
        } => WireEffect {
            op: WireOp::Create,
            node_id: node.to_bits(),
            node_type: Some(tag.to_string()),
            props_delta: Some(props_to_json(props)),
            parent_id: parent.map(|id| id.to_bits()),
            index: Some(*index),
        },
        Effect::Update { node, delta } => WireEffect {
            op: WireOp::Update,
            node_id: node.to_bits(),
            node_type: None,
            props_delta: Some(props_to_json(delta)),
            parent_id: None,
            index: None,
        },
        Effect::Delete { node } => WireEffect {
            op: WireOp::Delete,
            node_id: node.to_bits(),
            node_type: None,
            props_delta: None,
            parent_id: None,
            index: None,
        },
        Effect::Move {
            node,
            parent,
            index,
        } => WireEffect {
            op: WireOp::Move,
            node_id: node.to_bits(),
            node_type: None,
            props_delta: None,
            parent_id: Some(parent.to_bits()),
            index: Some(*index),
        },
    }
}

pub fn props_to_json(props: &Props) -> Map<String, Value> {
    props
        .iter()
        .map(|(name, value)| (name.to_string(), value_to_json(value)))
        .collect()
}

pub fn value_to_json(value: &PropValue) -> Value {
    match value {
        PropValue::Null => Value::Null,
        PropValue::Bool(value) => Value::Bool(*value),
        PropValue::Int(value) => Value::from(*value),
        PropValue::Float(value) => serde_json::Number::from_f64(*value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PropValue::Str(value) => Value::String(value.to_string()),
        PropValue::List(items) => Value::Array(items.iter().map(value_to_json).collect()),
        PropValue::Map(map) => Value::Object(props_to_json(map)),
        PropValue::Callback(id) => json!({ "$callback": id.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::NodeId;

    fn props(pairs: &[(&str, PropValue)]) -> Props {
        pairs
            .iter()
            .map(|(name, value)| (Arc::from(*name), value.clone()))
            .collect()
    }

    #[test]
    fn create_effect_carries_type_and_props() {
        let node = NodeId::from_bits(1);
        let effect = Effect::Create {
            node,
            parent: None,
            index: 0,
            tag: Arc::from("view"),
            props: props(&[("w", PropValue::Int(10))]),
        };
        let wire = encode_effect(&effect);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["op"], "create");
        assert_eq!(json["type"], "view");
        assert_eq!(json["props_delta"]["w"], 10);
        assert_eq!(json["index"], 0);
        assert!(json.get("parent_id").is_none());
    }

    #[test]
    fn update_effect_carries_only_the_delta() {
        let effect = Effect::Update {
            node: NodeId::from_bits(4),
            delta: props(&[("label", PropValue::from("hi"))]),
        };
        let json = serde_json::to_value(encode_effect(&effect)).unwrap();
        assert_eq!(json["op"], "update");
        assert_eq!(json["node_id"], 4);
        assert_eq!(json["props_delta"]["label"], "hi");
        assert!(json.get("type").is_none());
        assert!(json.get("index").is_none());
    }

    #[test]
    fn move_and_delete_shapes() {
        let delete = serde_json::to_value(encode_effect(&Effect::Delete {
            node: NodeId::from_bits(9),
        }))
        .unwrap();
        assert_eq!(delete["op"], "delete");
        assert!(delete.get("props_delta").is_none());

        let mv = serde_json::to_value(encode_effect(&Effect::Move {
            node: NodeId::from_bits(9),
            parent: NodeId::from_bits(2),
            index: 3,
        }))
        .unwrap();
        assert_eq!(mv["op"], "move");
        assert_eq!(mv["parent_id"], 2);
        assert_eq!(mv["index"], 3);
    }

    #[test]
    fn nested_values_encode_structurally() {
        let inner = props(&[("x", PropValue::Int(1))]);
        let value = value_to_json(&PropValue::Map(inner));
        assert_eq!(value["x"], 1);
        let list = value_to_json(&PropValue::List(vec![
            PropValue::Bool(true),
            PropValue::Null,
        ]));
        assert_eq!(list, json!([true, null]));
        let callback = value_to_json(&PropValue::Callback(weft_core::CallbackId(7)));
        assert_eq!(callback["$callback"], 7);
    }
}
