//! Field metadata and index declarations.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::SortDirection;

/// Shape of a declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A single value. Paths cannot continue past it.
    Scalar,
    /// An array of single values.
    ScalarArray,
    /// A nested document.
    Composite(BTreeMap<String, FieldDef>),
    /// An array of nested documents.
    Collection(BTreeMap<String, FieldDef>),
    /// A document with arbitrary keys. Path segments after it are used
    /// verbatim.
    FreeForm,
}

/// A field of an entity: its logical name, storage name and shape.
///
/// ```
/// use arena_persistence::schema::FieldDef;
///
/// let header = FieldDef::composite("Header", "header", [
///     FieldDef::scalar("Filestamp", "filestamp"),
/// ]);
/// assert_eq!(header.child("Filestamp").unwrap().storage(), "filestamp");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    storage: String,
    kind: FieldKind,
}

impl FieldDef {
    /// A single-valued field.
    pub fn scalar(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self::new(name, storage, FieldKind::Scalar)
    }

    /// An array of single values.
    pub fn scalar_array(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self::new(name, storage, FieldKind::ScalarArray)
    }

    /// A nested document.
    pub fn composite(
        name: impl Into<String>,
        storage: impl Into<String>,
        children: impl IntoIterator<Item = FieldDef>,
    ) -> Self {
        Self::new(name, storage, FieldKind::Composite(index(children)))
    }

    /// An array of nested documents.
    pub fn collection(
        name: impl Into<String>,
        storage: impl Into<String>,
        children: impl IntoIterator<Item = FieldDef>,
    ) -> Self {
        Self::new(name, storage, FieldKind::Collection(index(children)))
    }

    /// A document with arbitrary keys.
    pub fn free_form(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self::new(name, storage, FieldKind::FreeForm)
    }

    fn new(name: impl Into<String>, storage: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
            kind,
        }
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage name of this segment.
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Shape of the field.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Looks up a nested field by logical name.
    pub fn child(&self, name: &str) -> Option<&FieldDef> {
        match &self.kind {
            FieldKind::Composite(children) | FieldKind::Collection(children) => children.get(name),
            _ => None,
        }
    }

    /// Returns `true` if the stored value is an array.
    pub fn is_array(&self) -> bool {
        matches!(self.kind, FieldKind::ScalarArray | FieldKind::Collection(_))
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = &FieldDef> {
        let children = match &self.kind {
            FieldKind::Composite(children) | FieldKind::Collection(children) => Some(children),
            _ => None,
        };
        children.into_iter().flat_map(|c| c.values())
    }
}

pub(crate) fn index(fields: impl IntoIterator<Item = FieldDef>) -> BTreeMap<String, FieldDef> {
    fields
        .into_iter()
        .map(|field| (field.name.clone(), field))
        .collect()
}

/// One key of an index, on a storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexKey {
    /// Storage path.
    pub path: String,
    /// Key order.
    pub direction: SortDirection,
}

/// An index the collection of an entity should carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Keys in order.
    pub keys: Vec<IndexKey>,
    /// Rejects two documents with the same key values.
    pub unique: bool,
    /// Skips documents that lack every key.
    pub sparse: bool,
}

impl IndexSpec {
    /// Returns the storage paths of the keys.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_lookup() {
        let tags = FieldDef::collection(
            "Tags",
            "tags",
            [FieldDef::scalar("Label", "label"), FieldDef::scalar("Weight", "weight")],
        );
        assert!(tags.is_array());
        assert_eq!(tags.child("Label").unwrap().storage(), "label");
        assert!(tags.child("Missing").is_none());
        assert_eq!(tags.children().count(), 2);
        assert!(FieldDef::scalar("GameID", "game_id").child("Anything").is_none());
    }
}
