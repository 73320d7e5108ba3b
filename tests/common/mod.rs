//! Shared fixtures: an in-memory object graph that fires hooks the way a
//! persistence layer would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use trails_core::audit::{MemoryTrailStore, Trail, TrailMarker};
use trails_core::error::LoadError;
use trails_core::hooks::{Hook, M2mAction};
use trails_core::{
    label_key, Actor, Entity, EntityLoader, EntityMeta, ObjectId, ObjectKey, Trails, TrailsConfig,
};

pub const USER: &str = "auth.User";
pub const EMAIL: &str = "app.UserEmail";
pub const TEAM: &str = "app.Team";
pub const MEMBERSHIP: &str = "app.UserTeamAssociation";
pub const PROFILE: &str = "app.Profile";

/// A persisted row: label, id and column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub entity: String,
    pub id: Option<i64>,
    pub values: HashMap<String, Value>,
    pub title: String,
}

impl Row {
    pub fn new(entity: &str, title: &str) -> Self {
        Self {
            entity: entity.to_string(),
            id: None,
            values: HashMap::new(),
            title: title.to_string(),
        }
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.values.insert(field.to_string(), value);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.entity, self.id.unwrap_or_default())
    }
}

impl Entity for Row {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn id(&self) -> Option<ObjectId> {
        self.id.map(ObjectId::Int)
    }

    fn value(&self, field: &str) -> Option<Value> {
        self.values.get(field).cloned()
    }

    fn display(&self) -> String {
        self.title.clone()
    }
}

pub fn user(username: &str, password: &str) -> Row {
    Row::new(USER, username)
        .set("username", json!(username))
        .set("password", json!(password))
        .set("last_login", Value::Null)
}

pub fn email(address: &str, user_id: Option<i64>) -> Row {
    Row::new(EMAIL, address)
        .set("email", json!(address))
        .set("user_id", user_id.map(Value::from).unwrap_or(Value::Null))
}

pub fn team(name: &str) -> Row {
    Row::new(TEAM, name).set("name", json!(name))
}

pub fn profile(bio: &str, user_id: Option<i64>) -> Row {
    Row::new(PROFILE, bio)
        .set("bio", json!(bio))
        .set("user_id", user_id.map(Value::from).unwrap_or(Value::Null))
}

pub fn catalog() -> Vec<EntityMeta> {
    vec![
        EntityMeta::new("auth", "User")
            .field("username")
            .field("password")
            .field("last_login")
            .many_to_many("teams", TEAM, MEMBERSHIP),
        EntityMeta::new("app", "UserEmail")
            .field("email")
            .foreign_key("user", USER, "user_id"),
        EntityMeta::new("app", "Team")
            .field("name")
            .many_to_many("users", USER, MEMBERSHIP),
        EntityMeta::new("app", "UserTeamAssociation")
            .foreign_key("user", USER, "user_id")
            .foreign_key("team", TEAM, "team_id"),
        EntityMeta::new("app", "Profile")
            .field("bio")
            .one_to_one("user", USER, "user_id"),
    ]
}

pub fn admin() -> Actor {
    Actor::new(ObjectKey::new(USER, 1000), "admin")
}

/// In-memory rows and many-to-many links.
#[derive(Default)]
pub struct Db {
    rows: Mutex<HashMap<(String, i64), Row>>,
    links: Mutex<HashMap<(String, i64, String), Vec<i64>>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl Db {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        })
    }

    /// Makes every load fail until reset.
    pub fn fail_loads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn insert(&self, trails: &Trails, row: Row) -> Row {
        self.insert_with(trails, row, false)
    }

    pub fn insert_raw(&self, trails: &Trails, row: Row) -> Row {
        self.insert_with(trails, row, true)
    }

    fn insert_with(&self, trails: &Trails, mut row: Row, raw: bool) -> Row {
        trails.dispatch(&Hook::PreSave {
            instance: &row,
            raw,
            update_fields: None,
        });
        row.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.put(&row);
        trails.dispatch(&Hook::PostSave {
            instance: &row,
            created: true,
            raw,
            update_fields: None,
        });
        row
    }

    pub fn update(&self, trails: &Trails, row: &Row) {
        self.update_fields(trails, row, None);
    }

    pub fn update_fields(&self, trails: &Trails, row: &Row, update_fields: Option<&[String]>) {
        trails.dispatch(&Hook::PreSave {
            instance: row,
            raw: false,
            update_fields,
        });
        match update_fields {
            Some(only) => {
                let mut rows = self.rows.lock().unwrap();
                if let Some(stored) = rows.get_mut(&slot(row)) {
                    for field in only {
                        if let Some(value) = row.values.get(field) {
                            stored.values.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
            None => self.put(row),
        }
        trails.dispatch(&Hook::PostSave {
            instance: row,
            created: false,
            raw: false,
            update_fields,
        });
    }

    pub fn delete(&self, trails: &Trails, row: &Row) {
        trails.dispatch(&Hook::PreDelete { instance: row });
        self.rows.lock().unwrap().remove(&slot(row));
        trails.dispatch(&Hook::PostDelete { instance: row });
    }

    pub fn link(&self, trails: &Trails, instance: &Row, field: &str, target: &str, ids: &[i64]) {
        let object_ids = to_ids(ids);
        self.m2m(trails, M2mAction::PreAdd, instance, target, &object_ids);
        let mut links = self.links.lock().unwrap();
        let linked = links.entry(link_slot(instance, field)).or_default();
        for id in ids {
            if !linked.contains(id) {
                linked.push(*id);
            }
        }
        drop(links);
        self.m2m(trails, M2mAction::PostAdd, instance, target, &object_ids);
    }

    pub fn unlink(&self, trails: &Trails, instance: &Row, field: &str, target: &str, ids: &[i64]) {
        let object_ids = to_ids(ids);
        self.m2m(trails, M2mAction::PreRemove, instance, target, &object_ids);
        if let Some(linked) = self.links.lock().unwrap().get_mut(&link_slot(instance, field)) {
            linked.retain(|id| !ids.contains(id));
        }
        self.m2m(trails, M2mAction::PostRemove, instance, target, &object_ids);
    }

    pub fn clear(&self, trails: &Trails, instance: &Row, field: &str, target: &str) {
        self.m2m(trails, M2mAction::PreClear, instance, target, &[]);
        self.links.lock().unwrap().remove(&link_slot(instance, field));
        self.m2m(trails, M2mAction::PostClear, instance, target, &[]);
    }

    fn m2m(&self, trails: &Trails, action: M2mAction, instance: &Row, target: &str, ids: &[ObjectId]) {
        trails.dispatch(&Hook::M2mChanged {
            through: MEMBERSHIP,
            action,
            instance,
            target,
            ids,
        });
    }

    fn put(&self, row: &Row) {
        self.rows.lock().unwrap().insert(slot(row), row.clone());
    }
}

impl EntityLoader for Db {
    fn load(&self, entity: &str, id: &ObjectId) -> Result<Option<Box<dyn Entity>>, LoadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoadError::new(entity, "database unavailable"));
        }
        let ObjectId::Int(id) = id else {
            return Ok(None);
        };
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&(label_key(entity), *id))
            .map(|row| Box::new(row.clone()) as Box<dyn Entity>))
    }

    fn linked_ids(&self, instance: &dyn Entity, field: &str) -> Result<Vec<ObjectId>, LoadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoadError::new(instance.entity(), "database unavailable"));
        }
        let Some(ObjectId::Int(id)) = instance.id() else {
            return Ok(Vec::new());
        };
        let links = self.links.lock().unwrap();
        let key = (label_key(instance.entity()), id, field.to_string());
        Ok(links.get(&key).map(|ids| to_ids(ids)).unwrap_or_default())
    }
}

fn slot(row: &Row) -> (String, i64) {
    (label_key(&row.entity), row.id.unwrap_or_default())
}

fn link_slot(row: &Row, field: &str) -> (String, i64, String) {
    (label_key(&row.entity), row.id.unwrap_or_default(), field.to_string())
}

fn to_ids(ids: &[i64]) -> Vec<ObjectId> {
    ids.iter().copied().map(ObjectId::Int).collect()
}

/// Builds a `Trails` over `db` with the test catalog.
pub fn trails_with(db: &Arc<Db>, store: &Arc<MemoryTrailStore>, config: TrailsConfig) -> Trails {
    trails_over(catalog(), db, store, config)
}

/// Builds a `Trails` over `db` with a custom catalog.
pub fn trails_over(
    catalog: Vec<EntityMeta>,
    db: &Arc<Db>,
    store: &Arc<MemoryTrailStore>,
    config: TrailsConfig,
) -> Trails {
    catalog
        .into_iter()
        .fold(Trails::builder(db.clone(), store.clone()), |builder, meta| builder.entity(meta))
        .config(config)
        .build()
        .unwrap()
}

pub fn quiet_config() -> TrailsConfig {
    TrailsConfig {
        use_logger: false,
        ..TrailsConfig::default()
    }
}

/// Routes `tracing` output to the test harness; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn setup() -> (Arc<Db>, Arc<MemoryTrailStore>, Trails) {
    init_tracing();
    let db = Db::new();
    let store = Arc::new(MemoryTrailStore::new());
    let trails = trails_with(&db, &store, quiet_config());
    (db, store, trails)
}

/// The most recent trail and its markers.
pub fn last_trail(store: &MemoryTrailStore) -> (Trail, Vec<TrailMarker>) {
    let trail = store.trails().pop().unwrap();
    let markers = store.markers_for(trail.id());
    (trail, markers)
}
