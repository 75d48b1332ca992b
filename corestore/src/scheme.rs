//! The [`Scheme`]: a named, versioned set of fields plus the constraints
//! and relational metadata the migration engine and query builder need.

use std::collections::{HashMap, HashSet};

use corestore_common::{Result, StoreError};

use crate::field::{Field, OnRemove};

/// A declared schema for one logical table.
#[derive(Debug, Clone)]
pub struct Scheme {
    pub name: String,
    pub version: u32,
    pub fields: Vec<Field>,
    /// Field-name tuples that must be jointly unique, beyond any
    /// single-field `UNIQUE` flags.
    pub unique_constraints: Vec<Vec<String>>,
    /// Whether writes to this scheme are recorded in the delta/changelog
    /// table for downstream consumers.
    pub has_delta: bool,
    /// A detached scheme has no backing table of its own; its rows live
    /// embedded inside another scheme's `Extra` field.
    pub is_detached: bool,
}

impl Scheme {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            fields: Vec::new(),
            unique_constraints: Vec::new(),
            has_delta: true,
            is_detached: false,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique(mut self, fields: &[&str]) -> Self {
        self.unique_constraints
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn without_delta(mut self) -> Self {
        self.has_delta = false;
        self
    }

    pub fn detached(mut self) -> Self {
        self.is_detached = true;
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates internal consistency: no duplicate field names, unique
    /// constraints reference real fields, `on_remove` is only set on
    /// `Object` fields.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(StoreError::SchemaMismatch(format!(
                    "scheme '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
            if field.kind.is_relational() && field.on_remove.is_none() {
                return Err(StoreError::SchemaMismatch(format!(
                    "scheme '{}' field '{}' is relational but has no on_remove policy",
                    self.name, field.name
                )));
            }
        }
        for constraint in &self.unique_constraints {
            for name in constraint {
                if self.find_field(name).is_none() {
                    return Err(StoreError::SchemaMismatch(format!(
                        "scheme '{}' unique constraint references unknown field '{}'",
                        self.name, name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The set of foreign links this scheme declares, as
    /// `(field_name, target_scheme, on_remove)`. Covers both a bare
    /// `Object` reference and a `Set` whose element is itself an `Object`
    /// reference; a `Set` of scalars has an `on_remove` policy for its
    /// join-table rows but no target scheme, so it is excluded here.
    pub fn outgoing_links(&self) -> Vec<(&str, &str, OnRemove)> {
        self.fields
            .iter()
            .filter_map(|f| match (f.target_scheme(), f.on_remove) {
                (Some(target), Some(policy)) => Some((f.name.as_str(), target, policy)),
                _ => None,
            })
            .collect()
    }
}

/// A registry of every declared [`Scheme`], used to resolve cross-scheme
/// links and to drive cascade-removal traversal.
#[derive(Debug, Default)]
pub struct SchemeRegistry {
    schemes: HashMap<String, Scheme>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scheme: Scheme) -> Result<()> {
        scheme.validate()?;
        if self.schemes.contains_key(&scheme.name) {
            return Err(StoreError::SchemaMismatch(format!(
                "scheme '{}' already registered",
                scheme.name
            )));
        }
        self.schemes.insert(scheme.name.clone(), scheme);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Scheme> {
        self.schemes
            .get(name)
            .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown scheme '{name}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scheme> {
        self.schemes.values()
    }

    /// Every scheme with an `Object` field pointing at `target`, along
    /// with the field name and removal policy, used to walk cascades
    /// when a row of `target` is deleted.
    pub fn dependents_of<'a>(&'a self, target: &str) -> Vec<(&'a Scheme, &'a str, OnRemove)> {
        self.schemes
            .values()
            .flat_map(|scheme| {
                scheme
                    .outgoing_links()
                    .into_iter()
                    .filter(move |(_, t, _)| *t == target)
                    .map(move |(field, _, policy)| (scheme, field, policy))
            })
            .collect()
    }

    /// Detects reference cycles formed entirely of `StrongReference`
    /// links, which would make every member of the cycle permanently
    /// unremovable.
    pub fn find_strong_reference_cycle(&self) -> Option<Vec<String>> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for scheme in self.schemes.values() {
            if let Some(cycle) = self.walk_strong(&scheme.name, &mut visiting, &mut visited) {
                return Some(cycle);
            }
        }
        None
    }

    fn walk_strong(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if visited.contains(name) {
            return None;
        }
        if !visiting.insert(name.to_string()) {
            return Some(vec![name.to_string()]);
        }
        if let Some(scheme) = self.schemes.get(name) {
            for (_, target, policy) in scheme.outgoing_links() {
                if policy == OnRemove::StrongReference {
                    if let Some(mut cycle) = self.walk_strong(target, visiting, visited) {
                        cycle.push(name.to_string());
                        return Some(cycle);
                    }
                }
            }
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    fn users() -> Scheme {
        Scheme::new("users").field(Field::new("email", FieldKind::Text).required().unique())
    }

    fn posts() -> Scheme {
        Scheme::new("posts").field(
            Field::new(
                "author",
                FieldKind::Object {
                    target: "users".into(),
                },
            )
            .on_remove(OnRemove::Cascade)
            .unwrap(),
        )
    }

    #[test]
    fn registry_finds_dependents() {
        let mut reg = SchemeRegistry::new();
        reg.register(users()).unwrap();
        reg.register(posts()).unwrap();
        let deps = reg.dependents_of("users");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0.name, "posts");
        assert_eq!(deps[0].1, "author");
        assert_eq!(deps[0].2, OnRemove::Cascade);
    }

    #[test]
    fn set_of_objects_counts_as_outgoing_link() {
        let mut reg = SchemeRegistry::new();
        let tags = Scheme::new("tags").field(
            Field::new(
                "tagged_posts",
                FieldKind::Set {
                    element: Box::new(FieldKind::Object { target: "posts".into() }),
                },
            )
            .on_remove(OnRemove::Reference)
            .unwrap(),
        );
        reg.register(users()).unwrap();
        reg.register(posts()).unwrap();
        reg.register(tags).unwrap();
        let deps = reg.dependents_of("posts");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0.name, "tags");
        assert_eq!(deps[0].1, "tagged_posts");
    }

    #[test]
    fn set_of_scalars_is_not_an_outgoing_link() {
        let scheme = Scheme::new("items").field(
            Field::new("tags", FieldKind::Set { element: Box::new(FieldKind::Text) })
                .on_remove(OnRemove::Reference)
                .unwrap(),
        );
        assert!(scheme.outgoing_links().is_empty());
    }

    #[test]
    fn duplicate_field_names_rejected() {
        let scheme = Scheme::new("x")
            .field(Field::new("a", FieldKind::Text))
            .field(Field::new("a", FieldKind::Integer));
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn relational_field_without_policy_rejected() {
        let scheme = Scheme::new("x").field(Field::new(
            "owner",
            FieldKind::Object {
                target: "users".into(),
            },
        ));
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn strong_reference_cycle_detected() {
        let mut reg = SchemeRegistry::new();
        let a = Scheme::new("a").field(
            Field::new("b", FieldKind::Object { target: "b".into() })
                .on_remove(OnRemove::StrongReference)
                .unwrap(),
        );
        let b = Scheme::new("b").field(
            Field::new("a", FieldKind::Object { target: "a".into() })
                .on_remove(OnRemove::StrongReference)
                .unwrap(),
        );
        reg.register(a).unwrap();
        reg.register(b).unwrap();
        assert!(reg.find_strong_reference_cycle().is_some());
    }
}
