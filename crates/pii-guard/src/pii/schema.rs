//! PII field descriptors from OpenAPI schemas.
//!
//! Properties are marked with an `x-pii` extension, either as a plain flag or
//! with explicit handling:
//!
//! ```yaml
//! email:
//!   type: string
//!   x-pii:
//!     dataType: email
//!     hash: true        # write email_hash
//!     tokenize: false
//!     encrypt: true     # the default
//! ssn:
//!   type: string
//!   x-pii: true         # encrypt as text, confidential
//! ```
//!
//! Nested objects produce dotted paths (`"user.address.zip"`), arrays a `[]`
//! suffix (`"orders[].card_number"`). Local `$ref`s into
//! `components/schemas` are followed.

use std::collections::{BTreeMap, HashSet};

use common::{CryptoError, CryptoResult, DataType, PiiField, Sensitivity};
use openapiv3::{OpenAPI, ReferenceOr, Schema, SchemaKind, Type};
use serde::Deserialize;
use tracing::warn;

const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

/// The object form of an `x-pii` annotation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PiiAnnotation {
    #[serde(default)]
    data_type: DataType,
    #[serde(default)]
    sensitivity: Sensitivity,
    #[serde(default = "default_encrypt")]
    encrypt: bool,
    #[serde(default)]
    hash: bool,
    #[serde(default)]
    tokenize: bool,
}

fn default_encrypt() -> bool {
    true
}

/// Parse an OpenAPI document from YAML, falling back to JSON.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidInput`] if the text is neither.
pub fn parse_openapi(text: &str) -> CryptoResult<OpenAPI> {
    if let Ok(api) = serde_yaml::from_str(text) {
        return Ok(api);
    }
    serde_json::from_str(text).map_err(|e| {
        CryptoError::InvalidInput(format!("OpenAPI document is not valid YAML or JSON: {e}"))
    })
}

/// PII field descriptors for every schema in `components/schemas`, keyed by
/// schema name.
pub fn resolve_pii_fields(api: &OpenAPI) -> BTreeMap<String, Vec<PiiField>> {
    let Some(components) = &api.components else {
        return BTreeMap::new();
    };
    components
        .schemas
        .iter()
        .filter_map(|(name, schema_ref)| {
            let mut walker = Walker {
                api,
                fields: Vec::new(),
                visiting: HashSet::from([name.clone()]),
            };
            let schema = walker.resolve(schema_ref)?;
            walker.walk(schema, "");
            Some((name.clone(), walker.fields))
        })
        .collect()
}

/// PII field descriptors for one named schema.
pub fn pii_fields_for(api: &OpenAPI, schema_name: &str) -> Option<Vec<PiiField>> {
    resolve_pii_fields(api).remove(schema_name)
}

struct Walker<'a> {
    api: &'a OpenAPI,
    fields: Vec<PiiField>,
    /// Schemas on the current `$ref` chain, to stop on cycles.
    visiting: HashSet<String>,
}

impl<'a> Walker<'a> {
    fn lookup(&self, reference: &str) -> Option<&'a Schema> {
        let name = reference.strip_prefix(SCHEMA_REF_PREFIX)?;
        match self.api.components.as_ref()?.schemas.get(name)? {
            ReferenceOr::Item(schema) => Some(schema),
            ReferenceOr::Reference { .. } => None,
        }
    }

    fn resolve(&self, schema_ref: &'a ReferenceOr<Schema>) -> Option<&'a Schema> {
        match schema_ref {
            ReferenceOr::Item(schema) => Some(schema),
            ReferenceOr::Reference { reference } => self.lookup(reference),
        }
    }

    fn resolve_boxed(&self, schema_ref: &'a ReferenceOr<Box<Schema>>) -> Option<&'a Schema> {
        match schema_ref {
            ReferenceOr::Item(schema) => Some(schema),
            ReferenceOr::Reference { reference } => self.lookup(reference),
        }
    }

    fn walk(&mut self, schema: &'a Schema, prefix: &str) {
        match &schema.schema_kind {
            SchemaKind::Type(Type::Object(obj)) => {
                for (prop_name, prop_ref) in &obj.properties {
                    let path = if prefix.is_empty() {
                        prop_name.clone()
                    } else {
                        format!("{prefix}.{prop_name}")
                    };
                    let target = ref_name(prop_ref);
                    let Some(prop) = self.resolve_boxed(prop_ref) else {
                        continue;
                    };
                    if let Some(field) = annotation(prop, &path) {
                        self.fields.push(field);
                    }
                    self.descend(prop, &path, target);
                }
            }
            SchemaKind::Type(Type::Array(arr)) if !prefix.is_empty() => {
                let Some(items_ref) = &arr.items else { return };
                let target = ref_name(items_ref);
                let Some(items) = self.resolve_boxed(items_ref) else {
                    return;
                };
                let array_path = format!("{prefix}[]");
                if let Some(mut field) = annotation(items, prefix) {
                    field.field_path = array_path.clone();
                    self.fields.push(field);
                }
                self.descend(items, &array_path, target);
            }
            _ => {}
        }
    }

    fn descend(&mut self, schema: &'a Schema, path: &str, ref_name: Option<String>) {
        match ref_name {
            Some(name) => {
                if !self.visiting.insert(name.clone()) {
                    return;
                }
                self.walk(schema, path);
                self.visiting.remove(&name);
            }
            None => self.walk(schema, path),
        }
    }
}

fn ref_name<T>(schema_ref: &ReferenceOr<T>) -> Option<String> {
    match schema_ref {
        ReferenceOr::Reference { reference } => {
            reference.strip_prefix(SCHEMA_REF_PREFIX).map(str::to_owned)
        }
        ReferenceOr::Item(_) => None,
    }
}

/// The descriptor for one property's `x-pii` annotation, if it has one.
fn annotation(schema: &Schema, path: &str) -> Option<PiiField> {
    let value = schema.schema_data.extensions.get("x-pii")?;
    match value {
        serde_json::Value::Bool(true) => Some(PiiField::new(path, DataType::Text).encrypted()),
        serde_json::Value::Bool(false) => None,
        other => match serde_json::from_value::<PiiAnnotation>(other.clone()) {
            Ok(a) => Some(PiiField {
                field_path: path.to_owned(),
                data_type: a.data_type,
                sensitivity: a.sensitivity,
                encryption_required: a.encrypt,
                hashing_required: a.hash,
                tokenization_required: a.tokenize,
            }),
            Err(e) => {
                warn!(field = path, error = %e, "ignoring malformed x-pii annotation");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r##"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
"##;

    fn parse(components: &str) -> OpenAPI {
        parse_openapi(&format!("{HEADER}{components}")).expect("valid document")
    }

    fn paths(fields: &[PiiField]) -> Vec<&str> {
        let mut paths: Vec<_> = fields.iter().map(|f| f.field_path.as_str()).collect();
        paths.sort_unstable();
        paths
    }

    #[test]
    fn flag_and_object_annotations() {
        let api = parse(
            r##"
components:
  schemas:
    Donor:
      type: object
      properties:
        name:
          type: string
          x-pii:
            dataType: name
            encrypt: false
            hash: true
        email:
          type: string
          x-pii:
            dataType: email
            sensitivity: restricted
            tokenize: true
        ssn:
          type: string
          x-pii: true
        city:
          type: string
"##,
        );
        let fields = pii_fields_for(&api, "Donor").unwrap();
        assert_eq!(paths(&fields), vec!["email", "name", "ssn"]);

        let name = fields.iter().find(|f| f.field_path == "name").unwrap();
        assert!(!name.encryption_required && name.hashing_required);
        assert_eq!(name.data_type, DataType::Name);

        let email = fields.iter().find(|f| f.field_path == "email").unwrap();
        assert!(email.encryption_required && email.tokenization_required);
        assert_eq!(email.sensitivity, Sensitivity::Restricted);

        let ssn = fields.iter().find(|f| f.field_path == "ssn").unwrap();
        assert_eq!(ssn.data_type, DataType::Text);
        assert!(ssn.encryption_required);
    }

    #[test]
    fn nested_arrays_and_refs() {
        let api = parse(
            r##"
components:
  schemas:
    Card:
      type: object
      properties:
        number:
          type: string
          x-pii:
            dataType: card_number
    Order:
      type: object
      properties:
        address:
          type: object
          properties:
            zip:
              type: string
              x-pii: true
        cards:
          type: array
          items:
            $ref: "#/components/schemas/Card"
        tags:
          type: array
          items:
            type: string
            x-pii: true
"##,
        );
        let fields = pii_fields_for(&api, "Order").unwrap();
        assert_eq!(paths(&fields), vec!["address.zip", "cards[].number", "tags[]"]);
    }

    #[test]
    fn recursive_refs_terminate() {
        let api = parse(
            r##"
components:
  schemas:
    Person:
      type: object
      properties:
        email:
          type: string
          x-pii: true
        manager:
          $ref: "#/components/schemas/Person"
"##,
        );
        let fields = pii_fields_for(&api, "Person").unwrap();
        assert_eq!(paths(&fields), vec!["email"]);
    }

    #[test]
    fn no_components_and_json_input() {
        let api = parse("");
        assert!(resolve_pii_fields(&api).is_empty());

        let json = r##"{"openapi":"3.0.0","info":{"title":"t","version":"1"},"paths":{}}"##;
        assert!(parse_openapi(json).is_ok());
        assert!(parse_openapi("::: not a document").is_err());
    }

    #[test]
    fn malformed_annotations_are_ignored() {
        let api = parse(
            r##"
components:
  schemas:
    Thing:
      type: object
      properties:
        odd:
          type: string
          x-pii:
            dataType: not-a-type
"##,
        );
        assert!(pii_fields_for(&api, "Thing").unwrap().is_empty());
    }
}
