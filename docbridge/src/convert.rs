//! JSON and BSON conversion for event payloads
//!
//! Incoming objects are read as MongoDB Extended JSON, so `{"$oid": "..."}`
//! becomes an ObjectId. Outgoing documents render ObjectIds as plain hex
//! strings and everything else as relaxed Extended JSON.

use mongodb::bson::{Bson, Document};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid document: {0}")]
    Invalid(String),

    #[error("expected a JSON object")]
    NotAnObject,
}

/// Convert a JSON object into a BSON document
pub fn json_to_document(object: &Map<String, Value>) -> Result<Document, ConvertError> {
    let bson = Bson::try_from(Value::Object(object.clone())).map_err(|e| ConvertError::Invalid(e.to_string()))?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        _ => Err(ConvertError::NotAnObject),
    }
}

/// Convert a BSON document into a JSON object
pub fn document_to_json(doc: &Document) -> Value {
    Value::Object(
        doc.iter()
            .map(|(key, value)| (key.clone(), bson_to_json(value)))
            .collect(),
    )
}

fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Document(doc) => document_to_json(doc),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        other => other.clone().into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use mongodb::bson::oid::ObjectId;
    use serde_json::json;

    #[test]
    fn test_json_to_document_reads_oid() {
        let oid = ObjectId::new();
        let object = json!({ "_id": { "$oid": oid.to_hex() }, "amount": 10, "tags": ["a"] });

        let doc = json_to_document(object.as_object().unwrap()).unwrap();
        assert_eq!(doc.get_object_id("_id").unwrap(), oid);
        assert_eq!(doc.get_i32("amount").unwrap(), 10);
        assert_eq!(doc.get_array("tags").unwrap().len(), 1);
    }

    #[test]
    fn test_document_to_json_renders_nested_oids_as_hex() {
        let oid = ObjectId::new();
        let doc = doc! { "_id": oid, "items": [{ "ref": oid }], "price": 1.5, "name": "tea" };

        let json = document_to_json(&doc);
        assert_eq!(json["_id"], json!(oid.to_hex()));
        assert_eq!(json["items"][0]["ref"], json!(oid.to_hex()));
        assert_eq!(json["price"], json!(1.5));
        assert_eq!(json["name"], json!("tea"));
    }

    #[test]
    fn test_equal_json_converts_to_equal_documents() {
        let a = json_to_document(json!({ "amount": 10 }).as_object().unwrap()).unwrap();
        let b = json_to_document(json!({ "amount": 10 }).as_object().unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
