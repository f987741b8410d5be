//! The per-entity field access schema.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use super::field::{FieldDef, FieldKind, IndexKey, IndexSpec, index};
use crate::error::{SchemaError, SchemaResult};
use crate::tenant::RESOURCE_OWNER_PATH;
use crate::types::{ID_FIELD, SortDirection};

const WILDCARD_SUFFIX: &str = ".*";

/// Storage path of the primary key.
pub const ID_PATH: &str = "_id";

/// A logical field resolved to its storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// Dotted storage path.
    pub path: String,
    /// The predicate must hold for some element of the value rather than
    /// the value itself.
    pub element_match: bool,
}

/// Sorted view of a schema, for introspection endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDescription {
    /// Entity type the schema belongs to.
    pub entity_type: String,
    /// Collection the entity is stored in.
    pub collection: String,
    /// Whitelisted logical fields.
    pub queryable: Vec<String>,
    /// Explicitly denied logical fields.
    pub denied: Vec<String>,
    /// Logical to storage path mappings.
    pub mapped: BTreeMap<String, String>,
    /// Declared indexes.
    pub indexes: Vec<IndexSpec>,
}

/// The whitelist and logical-to-storage mapping of one entity type.
///
/// Built once at startup through [`FieldAccessSchema::builder`] and
/// immutable afterwards, apart from the internal resolution cache.
///
/// ```
/// use arena_persistence::schema::{FieldAccessSchema, FieldDef};
///
/// let schema = FieldAccessSchema::builder("MatchRecord", "match_records")
///     .field(FieldDef::composite("Header", "header", [
///         FieldDef::scalar("Filestamp", "filestamp"),
///     ]))
///     .queryable(["Header.Filestamp"])
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.resolve("Header.Filestamp").unwrap().path, "header.filestamp");
/// assert!(schema.check_queryable("Header.Filestamp").is_ok());
/// assert!(schema.check_queryable("Header").is_err());
/// ```
#[derive(Debug)]
pub struct FieldAccessSchema {
    entity_type: String,
    collection: String,
    queryable: BTreeMap<String, bool>,
    mapping: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldDef>,
    indexes: Vec<IndexSpec>,
    idempotency_path: Option<String>,
    cache: RwLock<HashMap<String, ResolvedField>>,
}

impl FieldAccessSchema {
    /// Starts a schema for an entity type stored in `collection`.
    ///
    /// The primary key is pre-registered as the queryable logical field
    /// `ID` mapped to `_id`.
    pub fn builder(
        entity_type: impl Into<String>,
        collection: impl Into<String>,
    ) -> FieldAccessSchemaBuilder {
        FieldAccessSchemaBuilder::new(entity_type.into(), collection.into())
    }

    /// Entity type the schema belongs to.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Collection the entity is stored in.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Declared indexes.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Storage path of the idempotency key, if the entity declares one.
    pub fn idempotency_path(&self) -> Option<&str> {
        self.idempotency_path.as_deref()
    }

    /// Resolves a logical field to its storage path.
    ///
    /// A trailing `.*` marks a wildcard: resolution stops at the prefix and
    /// the result asks for element matching when the prefix is nested or
    /// array-valued. Successful resolutions are cached.
    pub fn resolve(&self, logical: &str) -> SchemaResult<ResolvedField> {
        if let Some(hit) = self.cache.read().get(logical) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(logical)?;
        self.cache
            .write()
            .entry(logical.to_string())
            .or_insert_with(|| resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, logical: &str) -> SchemaResult<ResolvedField> {
        if logical.is_empty() || logical == WILDCARD_SUFFIX || logical.trim() != logical {
            return Err(SchemaError::EmptyField);
        }

        if let Some(prefix) = logical.strip_suffix(WILDCARD_SUFFIX) {
            if let Some(path) = self.mapping.get(logical).or_else(|| self.mapping.get(prefix)) {
                return Ok(ResolvedField {
                    element_match: path.contains('.'),
                    path: path.clone(),
                });
            }
            let (path, node) = self.walk(prefix)?;
            let element_match = path.contains('.') || node.is_some_and(FieldDef::is_array);
            return Ok(ResolvedField {
                path,
                element_match,
            });
        }

        if let Some(path) = self.mapping.get(logical) {
            return Ok(ResolvedField {
                path: path.clone(),
                element_match: false,
            });
        }

        if let Some(path) = self.free_form_mapping(logical) {
            return Ok(ResolvedField {
                path,
                element_match: false,
            });
        }

        let (path, _) = self.walk(logical)?;
        Ok(ResolvedField {
            path,
            element_match: false,
        })
    }

    /// A mapping key `X.*` maps everything below `X` verbatim.
    fn free_form_mapping(&self, logical: &str) -> Option<String> {
        let mut split = logical.len();
        while let Some(dot) = logical[..split].rfind('.') {
            let key = format!("{}{WILDCARD_SUFFIX}", &logical[..dot]);
            if let Some(base) = self.mapping.get(&key) {
                return Some(format!("{base}{}", &logical[dot..]));
            }
            split = dot;
        }
        None
    }

    /// Walks the metadata tree. Returns the storage path and, unless a
    /// free-form node cut the walk short, the node the path ends at.
    fn walk(&self, logical: &str) -> SchemaResult<(String, Option<&FieldDef>)> {
        let unknown = || SchemaError::UnknownField {
            field: logical.to_string(),
        };

        let mut segments = logical.split('.');
        let first = segments.next().ok_or_else(unknown)?;
        let mut node = self.fields.get(first).ok_or_else(unknown)?;
        let mut path = node.storage().to_string();

        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(unknown());
            }
            match node.kind() {
                FieldKind::FreeForm => {
                    path.push('.');
                    path.push_str(segment);
                    for rest in segments.by_ref() {
                        if rest.is_empty() {
                            return Err(unknown());
                        }
                        path.push('.');
                        path.push_str(rest);
                    }
                    return Ok((path, None));
                }
                FieldKind::Scalar | FieldKind::ScalarArray => return Err(unknown()),
                FieldKind::Composite(_) | FieldKind::Collection(_) => {
                    node = node.child(segment).ok_or_else(unknown)?;
                    path.push('.');
                    path.push_str(node.storage());
                }
            }
        }

        Ok((path, Some(node)))
    }

    /// Checks a logical field against the whitelist.
    ///
    /// Exact names must carry an allowing entry. A wildcard `P.*` passes
    /// when an allowing entry equals `P` or `P.*`, or lies below `P`, and no
    /// entry denies `P` or `P.*`.
    pub fn check_queryable(&self, logical: &str) -> SchemaResult<()> {
        if logical.is_empty() {
            return Err(SchemaError::EmptyField);
        }

        if let Some(prefix) = logical.strip_suffix(WILDCARD_SUFFIX) {
            let denied = [prefix, logical]
                .iter()
                .any(|key| self.queryable.get(*key) == Some(&false));
            let below = format!("{prefix}.");
            let allowed = self
                .queryable
                .iter()
                .any(|(entry, allowed)| {
                    *allowed && (entry == prefix || entry == logical || entry.starts_with(&below))
                });
            if denied || !allowed {
                warn!(entity_type = %self.entity_type, field = %logical, "wildcard field rejected");
                return Err(SchemaError::InvalidWildcard {
                    prefix: prefix.to_string(),
                });
            }
            return Ok(());
        }

        if self.queryable.get(logical) == Some(&true) {
            Ok(())
        } else {
            warn!(entity_type = %self.entity_type, field = %logical, "field rejected by whitelist");
            Err(SchemaError::FieldNotQueryable {
                field: logical.to_string(),
            })
        }
    }

    /// Whitelist check followed by resolution.
    pub fn resolve_queryable(&self, logical: &str) -> SchemaResult<ResolvedField> {
        self.check_queryable(logical)?;
        self.resolve(logical)
    }

    /// Resolves a field a caller sorts by or picks.
    ///
    /// Unlisted fields pass. A field fails when a deny entry names it, an
    /// enclosing field, or anything below it.
    pub fn resolve_unrestricted(&self, logical: &str) -> SchemaResult<ResolvedField> {
        let base = logical.strip_suffix(WILDCARD_SUFFIX).unwrap_or(logical);
        let below = format!("{base}.");
        let denied = self.queryable.iter().any(|(entry, allowed)| {
            if *allowed {
                return false;
            }
            let entry = entry.strip_suffix(WILDCARD_SUFFIX).unwrap_or(entry);
            entry == base
                || entry.starts_with(&below)
                || base
                    .strip_prefix(entry)
                    .is_some_and(|rest| rest.starts_with('.'))
        });
        if denied {
            warn!(entity_type = %self.entity_type, field = %logical, "denied field rejected");
            return Err(SchemaError::FieldNotQueryable {
                field: logical.to_string(),
            });
        }
        self.resolve(logical)
    }

    /// Returns a sorted view of the schema.
    pub fn describe(&self) -> SchemaDescription {
        let (queryable, denied): (Vec<_>, Vec<_>) =
            self.queryable.iter().partition(|(_, allowed)| **allowed);
        SchemaDescription {
            entity_type: self.entity_type.clone(),
            collection: self.collection.clone(),
            queryable: queryable.into_iter().map(|(k, _)| k.clone()).collect(),
            denied: denied.into_iter().map(|(k, _)| k.clone()).collect(),
            mapped: self.mapping.clone(),
            indexes: self.indexes.clone(),
        }
    }

    #[cfg(test)]
    fn cached(&self, logical: &str) -> bool {
        self.cache.read().contains_key(logical)
    }
}

/// Builder for [`FieldAccessSchema`].
#[derive(Debug)]
pub struct FieldAccessSchemaBuilder {
    entity_type: String,
    collection: String,
    queryable: BTreeMap<String, bool>,
    mapping: BTreeMap<String, String>,
    fields: Vec<FieldDef>,
    indexes: Vec<(String, Vec<(String, SortDirection)>, bool, bool)>,
    idempotency_key: Option<String>,
}

impl FieldAccessSchemaBuilder {
    fn new(entity_type: String, collection: String) -> Self {
        let mut builder = Self {
            entity_type,
            collection,
            queryable: BTreeMap::new(),
            mapping: BTreeMap::new(),
            fields: Vec::new(),
            indexes: Vec::new(),
            idempotency_key: None,
        };
        builder.mapping.insert(ID_FIELD.to_string(), ID_PATH.to_string());
        builder.queryable.insert(ID_FIELD.to_string(), true);
        builder
    }

    /// Whitelists logical fields. Entries may end in `.*`.
    pub fn queryable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self.queryable.insert(field.into(), true);
        }
        self
    }

    /// Explicitly denies logical fields, overriding earlier allows.
    pub fn deny<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self.queryable.insert(field.into(), false);
        }
        self
    }

    /// Maps a logical field (or `X.*` subtree) directly to a storage path.
    pub fn map(mut self, logical: impl Into<String>, storage: impl Into<String>) -> Self {
        self.mapping.insert(logical.into(), storage.into());
        self
    }

    /// Declares a top-level field of the entity.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a unique index over logical fields.
    ///
    /// The index is sparse, so documents lacking every key never conflict.
    pub fn unique_index<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = fields
            .into_iter()
            .map(|f| (f.into(), SortDirection::Ascending))
            .collect();
        self.indexes.push((name.into(), keys, true, true));
        self
    }

    /// Declares the logical field holding the entity's idempotency key.
    ///
    /// Adds a sparse unique index named `idempotency_key_unique` over it.
    /// Sparse indexes still index explicit `null`s, so the field must be
    /// omitted from documents without a key, see
    /// [`Entity::idempotency_key`](crate::types::Entity::idempotency_key).
    pub fn idempotency_key(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.idempotency_key = Some(field.clone());
        self.unique_index("idempotency_key_unique", [field])
    }

    /// Declares a plain index over logical fields.
    pub fn index<I, S>(mut self, name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = (S, SortDirection)>,
        S: Into<String>,
    {
        let keys = keys.into_iter().map(|(f, d)| (f.into(), d)).collect();
        self.indexes.push((name.into(), keys, false, false));
        self
    }

    /// Validates the declarations and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidMapping`] for a malformed mapping or
    /// index, and [`SchemaError::UnknownField`] for a whitelisted field that
    /// does not resolve.
    pub fn build(self) -> SchemaResult<FieldAccessSchema> {
        for (logical, storage) in &self.mapping {
            check_storage_path(logical, storage)?;
        }
        for field in &self.fields {
            check_field(field)?;
        }
        if self.fields.iter().any(|f| f.storage() == RESOURCE_OWNER_PATH)
            || self.mapping.values().any(|p| is_owner_path(p))
        {
            return Err(SchemaError::InvalidMapping {
                field: RESOURCE_OWNER_PATH.to_string(),
                message: "ownership fields are managed by tenancy enforcement".to_string(),
            });
        }

        let mut schema = FieldAccessSchema {
            entity_type: self.entity_type,
            collection: self.collection,
            queryable: self.queryable,
            mapping: self.mapping,
            fields: index(self.fields),
            indexes: Vec::new(),
            idempotency_path: None,
            cache: RwLock::new(HashMap::new()),
        };

        let allowed: Vec<String> = schema
            .queryable
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(field, _)| field.clone())
            .collect();
        for field in &allowed {
            schema.resolve(field)?;
        }

        for (name, keys, unique, sparse) in self.indexes {
            if keys.is_empty() {
                return Err(SchemaError::InvalidMapping {
                    field: name,
                    message: "index has no keys".to_string(),
                });
            }
            let keys = keys
                .into_iter()
                .map(|(field, direction)| {
                    Ok(IndexKey {
                        path: schema.resolve(&field)?.path,
                        direction,
                    })
                })
                .collect::<SchemaResult<Vec<_>>>()?;
            schema.indexes.push(IndexSpec {
                name,
                keys,
                unique,
                sparse,
            });
        }

        if let Some(field) = &self.idempotency_key {
            schema.idempotency_path = Some(schema.resolve(field)?.path);
        }

        debug!(
            entity_type = %schema.entity_type,
            queryable = allowed.len(),
            indexes = schema.indexes.len(),
            "field access schema built"
        );
        Ok(schema)
    }
}

fn is_owner_path(path: &str) -> bool {
    path == RESOURCE_OWNER_PATH
        || path
            .strip_prefix(RESOURCE_OWNER_PATH)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn check_storage_path(logical: &str, storage: &str) -> SchemaResult<()> {
    let invalid = |message: &str| SchemaError::InvalidMapping {
        field: logical.to_string(),
        message: message.to_string(),
    };
    if logical.is_empty() {
        return Err(invalid("logical name is empty"));
    }
    if storage.is_empty() {
        return Err(invalid("storage path is empty"));
    }
    if storage.split('.').any(|segment| segment.is_empty()) {
        return Err(invalid("storage path has an empty segment"));
    }
    if storage.split('.').any(|segment| segment.starts_with('$')) {
        return Err(invalid("storage path starts with '$'"));
    }
    Ok(())
}

fn check_field(field: &FieldDef) -> SchemaResult<()> {
    if field.name().contains('.') || field.storage().contains('.') {
        return Err(SchemaError::InvalidMapping {
            field: field.name().to_string(),
            message: "field segments cannot contain '.'".to_string(),
        });
    }
    check_storage_path(field.name(), field.storage())?;
    field.children().try_for_each(check_field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FieldAccessSchema {
        FieldAccessSchema::builder("MatchRecord", "match_records")
            .field(FieldDef::scalar("GameID", "game_id"))
            .field(FieldDef::composite(
                "Header",
                "header",
                [
                    FieldDef::scalar("Filestamp", "filestamp"),
                    FieldDef::composite("Server", "server", [FieldDef::scalar("Region", "region")]),
                ],
            ))
            .field(FieldDef::collection(
                "Tags",
                "tags",
                [FieldDef::scalar("Label", "label")],
            ))
            .field(FieldDef::scalar_array("Regions", "regions"))
            .field(FieldDef::free_form("Stats", "stats"))
            .field(FieldDef::scalar("Secret", "secret"))
            .map("Header.Filestamp", "header.filestamp")
            .map("Extra.*", "extra")
            .queryable(["GameID", "Header.Filestamp", "Tags.Label", "Regions", "Stats.*"])
            .deny(["Secret"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_direct_mapping() {
        let resolved = schema().resolve("Header.Filestamp").unwrap();
        assert_eq!(resolved.path, "header.filestamp");
        assert!(!resolved.element_match);
    }

    #[test]
    fn test_resolve_walks_nested_fields() {
        let schema = schema();
        assert_eq!(schema.resolve("Header.Server.Region").unwrap().path, "header.server.region");
        assert_eq!(schema.resolve("Tags.Label").unwrap().path, "tags.label");
        assert_eq!(schema.resolve("ID").unwrap().path, "_id");
    }

    #[test]
    fn test_resolve_unknown_segments() {
        let schema = schema();
        assert!(matches!(
            schema.resolve("Header.Missing"),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            schema.resolve("GameID.Deeper"),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(schema.resolve("Nope"), Err(SchemaError::UnknownField { .. })));
        assert_eq!(schema.resolve(""), Err(SchemaError::EmptyField));
    }

    #[test]
    fn test_resolve_free_form_short_circuits() {
        let schema = schema();
        assert_eq!(schema.resolve("Stats.kills.total").unwrap().path, "stats.kills.total");
        assert_eq!(schema.resolve("Extra.anything.goes").unwrap().path, "extra.anything.goes");
    }

    #[test]
    fn test_wildcard_element_matching() {
        let schema = schema();
        let tags = schema.resolve("Tags.*").unwrap();
        assert_eq!(tags.path, "tags");
        assert!(tags.element_match);

        let server = schema.resolve("Header.Server.*").unwrap();
        assert_eq!(server.path, "header.server");
        assert!(server.element_match);

        let stats = schema.resolve("Stats.*").unwrap();
        assert_eq!(stats.path, "stats");
        assert!(!stats.element_match);
    }

    #[test]
    fn test_resolution_is_cached_only_on_success() {
        let schema = schema();
        schema.resolve("Header.Server.Region").unwrap();
        assert!(schema.cached("Header.Server.Region"));
        let _ = schema.resolve("Header.Nope");
        assert!(!schema.cached("Header.Nope"));
    }

    #[test]
    fn test_check_queryable_exact() {
        let schema = schema();
        assert!(schema.check_queryable("GameID").is_ok());
        assert!(schema.check_queryable("ID").is_ok());
        assert_eq!(
            schema.check_queryable("Secret"),
            Err(SchemaError::FieldNotQueryable {
                field: "Secret".to_string()
            })
        );
        assert!(schema.check_queryable("Header.Server.Region").is_err());
    }

    #[test]
    fn test_check_queryable_wildcards() {
        let schema = schema();
        assert!(schema.check_queryable("Tags.*").is_ok());
        assert!(schema.check_queryable("Regions.*").is_ok());
        assert!(schema.check_queryable("Stats.*").is_ok());
        assert_eq!(
            schema.check_queryable("Secret.*"),
            Err(SchemaError::InvalidWildcard {
                prefix: "Secret".to_string()
            })
        );
        // "Game" is a string prefix of "GameID" but not a path prefix.
        assert!(schema.check_queryable("Game.*").is_err());
    }

    #[test]
    fn test_resolve_unrestricted_honours_deny_entries() {
        let schema = schema();
        assert_eq!(
            schema.resolve_unrestricted("Secret"),
            Err(SchemaError::FieldNotQueryable {
                field: "Secret".to_string()
            })
        );
        // Unlisted but resolvable fields pass.
        assert_eq!(
            schema.resolve_unrestricted("Header.Server.Region").unwrap().path,
            "header.server.region"
        );
        // "SecretX" only shares a string prefix with the denied field.
        assert!(matches!(
            schema.resolve_unrestricted("SecretX"),
            Err(SchemaError::UnknownField { .. })
        ));

        let nested = FieldAccessSchema::builder("MatchRecord", "match_records")
            .field(FieldDef::composite("Wallet", "wallet", [FieldDef::scalar("Key", "key")]))
            .deny(["Wallet.Key"])
            .build()
            .unwrap();
        assert!(nested.resolve_unrestricted("Wallet.Key").is_err());
        assert!(nested.resolve_unrestricted("Wallet").is_err());
        assert!(nested.resolve_unrestricted("Wallet.*").is_err());
    }

    #[test]
    fn test_build_rejects_unresolvable_whitelist() {
        let result = FieldAccessSchema::builder("MatchRecord", "match_records")
            .field(FieldDef::scalar("GameID", "game_id"))
            .queryable(["GameId"])
            .build();
        assert!(matches!(result, Err(SchemaError::UnknownField { .. })));
    }

    #[test]
    fn test_build_rejects_bad_storage_paths() {
        let dollar = FieldAccessSchema::builder("MatchRecord", "match_records")
            .map("Evil", "$where")
            .build();
        assert!(matches!(dollar, Err(SchemaError::InvalidMapping { .. })));

        let empty = FieldAccessSchema::builder("MatchRecord", "match_records")
            .map("Empty", "")
            .build();
        assert!(matches!(empty, Err(SchemaError::InvalidMapping { .. })));

        let owner = FieldAccessSchema::builder("MatchRecord", "match_records")
            .map("Owner", "resource_owner.tenant_id")
            .build();
        assert!(matches!(owner, Err(SchemaError::InvalidMapping { .. })));
    }

    #[test]
    fn test_indexes_resolve_to_storage_paths() {
        let schema = FieldAccessSchema::builder("Payment", "payments")
            .field(FieldDef::scalar("IdempotencyKey", "idempotency_key"))
            .field(FieldDef::scalar("CreatedAt", "created_at"))
            .idempotency_key("IdempotencyKey")
            .index("created_at_desc", [("CreatedAt", SortDirection::Descending)])
            .build()
            .unwrap();

        let indexes = schema.indexes();
        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].unique && indexes[0].sparse);
        assert_eq!(indexes[0].keys[0].path, "idempotency_key");
        assert_eq!(indexes[1].keys[0].direction, SortDirection::Descending);
        assert_eq!(schema.idempotency_path(), Some("idempotency_key"));
    }

    #[test]
    fn test_describe_is_sorted() {
        let description = schema().describe();
        assert_eq!(
            description.queryable,
            vec!["GameID", "Header.Filestamp", "ID", "Regions", "Stats.*", "Tags.Label"]
        );
        assert_eq!(description.denied, vec!["Secret"]);
        assert_eq!(description.mapped.get("ID").map(String::as_str), Some("_id"));
    }
}
