//! Schema strictification for strict structured-output modes.
//!
//! Every object node that declares `properties` gets `type: "object"` and a
//! `required` list naming all of its properties. The walk descends into
//! property schemas, `items`, the `oneOf`/`anyOf`/`allOf` combinators and
//! `definitions`/`$defs`. Applying it twice is the same as applying it once.

use serde_json::{Map, Value};

const COMBINATORS: [&str; 3] = ["oneOf", "anyOf", "allOf"];
const DEFINITION_KEYS: [&str; 2] = ["definitions", "$defs"];

/// Return a strictified copy of `schema`.
pub fn strictify(schema: &Value) -> Value {
    let mut out = schema.clone();
    strictify_in_place(&mut out);
    out
}

pub fn strictify_in_place(node: &mut Value) {
    match node {
        Value::Array(members) => {
            for member in members {
                strictify_in_place(member);
            }
        }
        Value::Object(map) => strictify_object(map),
        _ => {}
    }
}

fn strictify_object(map: &mut Map<String, Value>) {
    let mut required = None;
    if let Some(Value::Object(props)) = map.get_mut("properties") {
        required = Some(
            props
                .keys()
                .map(|name| Value::String(name.clone()))
                .collect::<Vec<_>>(),
        );
        for prop in props.values_mut() {
            strictify_in_place(prop);
        }
    }
    if let Some(names) = required {
        map.insert("type".to_string(), Value::String("object".to_string()));
        map.insert("required".to_string(), Value::Array(names));
    }

    if let Some(items) = map.get_mut("items") {
        strictify_in_place(items);
    }
    for key in COMBINATORS {
        if let Some(members) = map.get_mut(key) {
            strictify_in_place(members);
        }
    }
    for key in DEFINITION_KEYS {
        if let Some(Value::Object(defs)) = map.get_mut(key) {
            for def in defs.values_mut() {
                strictify_in_place(def);
            }
        }
    }
}
