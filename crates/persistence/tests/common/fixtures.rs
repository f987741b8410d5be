//! Test fixtures: the match record entity and its schema.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use arena_persistence::schema::{FieldAccessSchema, FieldDef};
use arena_persistence::tenant::ResourceOwner;
use arena_persistence::types::{BaseEntity, Entity, SortDirection};

/// Collection the match records live in.
pub const MATCH_COLLECTION: &str = "match_records";

/// Demo file header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub filestamp: String,
    pub map_name: String,
}

/// A tag attached to a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub label: String,
    pub level: i64,
}

/// Credentials that must never be searchable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub token: String,
}

/// A recorded match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    #[serde(flatten)]
    pub base: BaseEntity,
    pub game_id: String,
    pub header: Header,
    pub score: i64,
    pub played_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub regions: Vec<String>,
    pub tags: Vec<Tag>,
    pub stats: Value,
    pub secret: Secret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Entity for MatchRecord {
    fn id(&self) -> Uuid {
        self.base.id
    }

    fn resource_owner(&self) -> &ResourceOwner {
        &self.base.resource_owner
    }

    fn set_resource_owner(&mut self, owner: ResourceOwner) {
        self.base.resource_owner = owner;
    }

    fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.base.updated_at = now;
    }
}

impl MatchRecord {
    /// A record for `game_id` with an unset owner.
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            base: BaseEntity::default(),
            game_id: game_id.into(),
            header: Header {
                filestamp: "HLTV-1.0.0".to_string(),
                map_name: "de_dust2".to_string(),
            },
            score: 0,
            played_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            duration_ms: 30 * 60 * 1000,
            regions: vec!["eu".to_string()],
            tags: Vec::new(),
            stats: json!({"kills": 0}),
            secret: Secret {
                token: "s3cr3t".to_string(),
            },
            idempotency_key: None,
        }
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    pub fn with_filestamp(mut self, filestamp: impl Into<String>) -> Self {
        self.header.filestamp = filestamp.into();
        self
    }

    pub fn with_played_at(mut self, played_at: DateTime<Utc>) -> Self {
        self.played_at = played_at;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_regions(mut self, regions: &[&str]) -> Self {
        self.regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_tag(mut self, label: impl Into<String>, level: i64) -> Self {
        self.tags.push(Tag {
            label: label.into(),
            level,
        });
        self
    }

    pub fn with_stats(mut self, stats: Value) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Pretends the record was written by someone else.
    pub fn with_owner(mut self, owner: ResourceOwner) -> Self {
        self.base.resource_owner = owner;
        self
    }
}

/// The field access schema of [`MatchRecord`].
pub fn match_schema() -> FieldAccessSchema {
    FieldAccessSchema::builder("MatchRecord", MATCH_COLLECTION)
        .field(FieldDef::scalar("GameID", "game_id"))
        .field(FieldDef::composite(
            "Header",
            "header",
            [
                FieldDef::scalar("Filestamp", "filestamp"),
                FieldDef::scalar("MapName", "map_name"),
            ],
        ))
        .field(FieldDef::scalar("Score", "score"))
        .field(FieldDef::scalar("PlayedAt", "played_at"))
        .field(FieldDef::scalar("Duration", "duration_ms"))
        .field(FieldDef::scalar_array("Regions", "regions"))
        .field(FieldDef::collection(
            "Tags",
            "tags",
            [
                FieldDef::scalar("Label", "label"),
                FieldDef::scalar("Level", "level"),
            ],
        ))
        .field(FieldDef::free_form("Stats", "stats"))
        .field(FieldDef::composite(
            "Secret",
            "secret",
            [FieldDef::scalar("Token", "token")],
        ))
        .field(FieldDef::scalar("IdempotencyKey", "idempotency_key"))
        .queryable([
            "GameID",
            "Header.Filestamp",
            "Header.MapName",
            "Score",
            "PlayedAt",
            "Duration",
            "Regions",
            "Tags.Label",
            "Tags.Level",
            "Stats.kills",
        ])
        .deny(["Secret.Token"])
        .idempotency_key("IdempotencyKey")
        .index("played_at_desc", [("PlayedAt", SortDirection::Descending)])
        .build()
        .expect("match schema is valid")
}
