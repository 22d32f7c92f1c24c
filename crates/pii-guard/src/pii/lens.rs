//! Typed field paths into JSON records.
//!
//! A [`FieldPath`] is parsed once from its dot-separated form
//! (`"contact.email"`, `"orders[].card"`) and then used to find, read, or
//! write values without re-parsing strings.
//!
//! Reading never creates anything: absent fields, `null` fields, and
//! intermediates of the wrong shape are simply not found. Writing creates
//! missing (or `null`) intermediate objects and fails on any other non-object
//! intermediate.

use std::fmt;

use common::{CryptoError, CryptoResult};
use serde_json::{Map, Value};

/// One component of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// An object member.
    Key(String),
    /// An object member holding an array; the path continues into every element.
    Each(String),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dot-separated path. A `[]` suffix marks a fan-out segment.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] for empty paths, empty segments,
    /// and stray brackets.
    pub fn parse(path: &str) -> CryptoResult<Self> {
        let invalid = |why: &str| CryptoError::InvalidInput(format!("field path {path:?}: {why}"));
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        let segments = path
            .split('.')
            .map(|part| {
                let (name, each) = match part.strip_suffix("[]") {
                    Some(name) => (name, true),
                    None => (part, false),
                };
                if name.is_empty() {
                    return Err(invalid("empty segment"));
                }
                if name.contains(['[', ']']) {
                    return Err(invalid("brackets are only allowed as a trailing []"));
                }
                Ok(if each {
                    Segment::Each(name.to_owned())
                } else {
                    Segment::Key(name.to_owned())
                })
            })
            .collect::<CryptoResult<Vec<_>>>()?;
        Ok(Self {
            raw: path.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `true` if the path fans out over at least one array.
    pub fn has_fan_out(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Each(_)))
    }

    /// Every present, non-null value the path reaches in `root`.
    pub fn locate(&self, root: &Value) -> Vec<Location> {
        let mut frontier: Vec<(&Value, Vec<Step>)> = vec![(root, Vec::new())];
        for segment in &self.segments {
            let mut next = Vec::new();
            for (value, steps) in frontier {
                let Some(obj) = value.as_object() else { continue };
                match segment {
                    Segment::Key(key) => {
                        if let Some(child) = obj.get(key) {
                            let mut steps = steps;
                            steps.push(Step::Key(key.clone()));
                            next.push((child, steps));
                        }
                    }
                    Segment::Each(key) => {
                        let Some(items) = obj.get(key).and_then(Value::as_array) else {
                            continue;
                        };
                        for (i, item) in items.iter().enumerate() {
                            let mut steps = steps.clone();
                            steps.push(Step::Key(key.clone()));
                            steps.push(Step::Index(i));
                            next.push((item, steps));
                        }
                    }
                }
            }
            frontier = next;
        }
        frontier
            .into_iter()
            .filter(|(value, _)| !value.is_null())
            .map(|(_, steps)| Location { steps })
            .collect()
    }

    /// The path to the sibling field `<last segment><suffix>`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] if the path ends in a fan-out
    /// segment, whose elements have no field name.
    pub fn with_suffix(&self, suffix: &str) -> CryptoResult<Self> {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(Segment::Key(name)) => name.push_str(suffix),
            _ => {
                return Err(CryptoError::InvalidInput(format!(
                    "{}: array elements have no sibling fields",
                    self.raw
                )))
            }
        }
        Ok(Self {
            raw: format!("{}{suffix}", self.raw),
            segments,
        })
    }

    /// Write `value` at this path, creating missing intermediate objects.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] for fan-out paths, a non-object
    /// root, or a non-object intermediate.
    pub fn set(&self, root: &mut Value, value: Value) -> CryptoResult<()> {
        let mut keys = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => keys.push(key.as_str()),
                Segment::Each(_) => {
                    return Err(CryptoError::InvalidInput(format!(
                        "cannot write through fan-out path {:?}",
                        self.raw
                    )))
                }
            }
        }
        let Some((leaf, parents)) = keys.split_last() else {
            return Err(CryptoError::InvalidInput("empty field path".into()));
        };

        let mut current = root;
        for key in parents {
            let obj = self.object_mut(current, key)?;
            let child = obj
                .entry((*key).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            current = child;
        }
        self.object_mut(current, leaf)?
            .insert((*leaf).to_owned(), value);
        Ok(())
    }

    fn object_mut<'a>(
        &self,
        value: &'a mut Value,
        at: &str,
    ) -> CryptoResult<&'a mut Map<String, Value>> {
        value.as_object_mut().ok_or_else(|| {
            CryptoError::InvalidInput(format!(
                "field path {:?}: parent of {at:?} is not an object",
                self.raw
            ))
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One step of a concrete [`Location`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// The concrete position of one value inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    steps: Vec<Step>,
}

impl Location {
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.steps.iter().try_fold(root, |value, step| match step {
            Step::Key(key) => value.as_object()?.get(key),
            Step::Index(i) => value.as_array()?.get(*i),
        })
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.steps.iter().try_fold(root, |value, step| match step {
            Step::Key(key) => value.as_object_mut()?.get_mut(key),
            Step::Index(i) => value.as_array_mut()?.get_mut(*i),
        })
    }

    /// Write `value` next to this location as `<field name><suffix>`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidInput`] if the location is an array
    /// element, which has no field name to derive a sibling from.
    pub fn set_sibling(&self, root: &mut Value, suffix: &str, value: Value) -> CryptoResult<()> {
        let Some((Step::Key(name), parent_steps)) = self.steps.split_last() else {
            return Err(CryptoError::InvalidInput(format!(
                "{self}: array elements have no sibling fields"
            )));
        };
        let parent = Location {
            steps: parent_steps.to_vec(),
        };
        let obj = parent
            .get_mut(root)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| CryptoError::InvalidInput(format!("{self}: parent is not an object")))?;
        obj.insert(format!("{name}{suffix}"), value);
        Ok(())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::Key(key) if i == 0 => write!(f, "{key}")?,
                Step::Key(key) => write!(f, ".{key}")?,
                Step::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_plain_and_fan_out_segments() {
        let path = FieldPath::parse("orders[].card.number").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Each("orders".into()),
                Segment::Key("card".into()),
                Segment::Key("number".into()),
            ]
        );
        assert!(path.has_fan_out());
        assert!(!FieldPath::parse("email").unwrap().has_fan_out());
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for bad in ["", "a..b", ".a", "a.", "[]", "a[0]", "a]b"] {
            assert!(FieldPath::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn locate_skips_absent_and_null_values() {
        let record = json!({"contact": {"email": "a@b.c", "phone": null}});
        let email = FieldPath::parse("contact.email").unwrap();
        let phone = FieldPath::parse("contact.phone").unwrap();
        let fax = FieldPath::parse("contact.fax.number").unwrap();

        let found = email.locate(&record);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get(&record), Some(&json!("a@b.c")));
        assert_eq!(found[0].to_string(), "contact.email");
        assert!(phone.locate(&record).is_empty());
        assert!(fax.locate(&record).is_empty());
    }

    #[test]
    fn locate_fans_out_over_arrays() {
        let record = json!({"orders": [{"card": "1"}, {"other": true}, {"card": "3"}]});
        let path = FieldPath::parse("orders[].card").unwrap();
        let found: Vec<String> = path.locate(&record).iter().map(ToString::to_string).collect();
        assert_eq!(found, vec!["orders[0].card", "orders[2].card"]);
    }

    #[test]
    fn set_creates_missing_intermediates() {
        let mut record = json!({"a": null});
        FieldPath::parse("a.b.c").unwrap().set(&mut record, json!(1)).unwrap();
        FieldPath::parse("x.y").unwrap().set(&mut record, json!(2)).unwrap();
        assert_eq!(record, json!({"a": {"b": {"c": 1}}, "x": {"y": 2}}));
    }

    #[test]
    fn suffixed_path_names_the_sibling() {
        let path = FieldPath::parse("contact.email").unwrap();
        let sibling = path.with_suffix("_hash").unwrap();
        assert_eq!(sibling.as_str(), "contact.email_hash");
        assert_eq!(sibling, FieldPath::parse("contact.email_hash").unwrap());

        let mut record = json!({"contact": {"email": "a@b.c"}});
        sibling.set(&mut record, json!("h")).unwrap();
        assert_eq!(record, json!({"contact": {"email": "a@b.c", "email_hash": "h"}}));

        assert!(FieldPath::parse("tags[]").unwrap().with_suffix("_hash").is_err());
    }

    #[test]
    fn set_refuses_to_overwrite_scalars_or_fan_out() {
        let mut record = json!({"a": "scalar"});
        assert!(FieldPath::parse("a.b").unwrap().set(&mut record, json!(1)).is_err());
        assert!(FieldPath::parse("l[].b").unwrap().set(&mut record, json!(1)).is_err());
        assert_eq!(record, json!({"a": "scalar"}));
    }

    #[test]
    fn siblings_are_written_next_to_the_field() {
        let mut record = json!({"user": {"name": "Ada"}, "items": [{"sku": "x"}]});
        let found = FieldPath::parse("user.name").unwrap().locate(&record);
        found[0].set_sibling(&mut record, "_hash", json!("h")).unwrap();
        assert_eq!(record["user"]["name_hash"], "h");

        let found = FieldPath::parse("items[].sku").unwrap().locate(&record);
        found[0].set_sibling(&mut record, "_token", json!("t")).unwrap();
        assert_eq!(record["items"][0]["sku_token"], "t");
    }

    #[test]
    fn array_elements_have_no_siblings() {
        let mut record = json!({"tags": ["a", "b"]});
        let found = FieldPath::parse("tags[]").unwrap().locate(&record);
        assert_eq!(found.len(), 2);
        assert!(found[0].set_sibling(&mut record, "_hash", json!("h")).is_err());
        *found[1].get_mut(&mut record).unwrap() = json!("B");
        assert_eq!(record, json!({"tags": ["a", "B"]}));
    }
}
