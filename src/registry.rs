//! Resolution of tracking policies from configuration patterns.
//!
//! The registry holds the declared entity catalog. [`Registry::resolve`]
//! turns the catalog plus include/exclude/sensitive patterns into one
//! [`TrackingPolicy`] per included entity type and one [`RelationPolicy`]
//! per many-to-many association type with at least one included side.
//!
//! Resolution order:
//! 1. every entity type starts unresolved;
//! 2. include patterns mark matching types included;
//! 3. exclude patterns mark matching types excluded (exclude wins);
//! 4. the trail's own entity types are always excluded;
//! 5. exclude-field patterns mark matching fields [`FieldAction::Ignore`];
//! 6. sensitive-field patterns mark matching tracked fields [`FieldAction::Sensitive`].
//!
//! Relation fields are classified when the field map is built: foreign keys
//! and one-to-ones become [`FieldAction::ForeignKey`] with their id field
//! tracked, many-to-many fields point at their association type.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::TrailsConfig;
use crate::error::Result;
use crate::model::{label_key, EntityMeta, FieldKind};
use crate::pattern::LabelPattern;

/// Label of the persisted trail entity, never tracked.
pub const TRAIL_ENTITY: &str = "trails.Trail";
/// Label of the persisted trail marker entity, never tracked.
pub const TRAIL_MARKER_ENTITY: &str = "trails.TrailMarker";

/// What to do with one field of a tracked entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAction {
    /// Serialize and diff the value
    Track,
    /// Serialize and diff, but persist a redaction marker instead of the value
    Sensitive,
    /// Relation stored in `id_field`; the id field itself is tracked
    ForeignKey {
        /// Normalized label of the related entity type
        target: String,
        /// Column holding the related id
        id_field: String,
    },
    /// Many-to-many relation held by an association type
    ManyToManyThrough {
        /// Normalized label of the association type
        through: String,
        /// Normalized label of the related entity type
        target: String,
    },
    /// Never serialized
    Ignore,
}

/// Resolved field actions for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingPolicy {
    entity: String,
    namespace: String,
    fields: IndexMap<String, FieldAction>,
}

impl TrackingPolicy {
    /// Returns the normalized entity label.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the normalized namespace owning the entity type.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the action for a field.
    pub fn action(&self, field: &str) -> Option<&FieldAction> {
        self.fields.get(field)
    }

    /// Returns every field action in declaration order.
    pub fn fields(&self) -> &IndexMap<String, FieldAction> {
        &self.fields
    }

    /// Returns the fields whose values are serialized (tracked or sensitive).
    pub fn discrete_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, action)| matches!(action, FieldAction::Track | FieldAction::Sensitive))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns true if the field is redacted.
    pub fn is_sensitive(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(FieldAction::Sensitive))
    }

    /// Finds the relation stored in `id_field`, returning the relation name
    /// and the related entity label.
    pub fn relation_for_id_field(&self, id_field: &str) -> Option<(&str, &str)> {
        self.fields.iter().find_map(|(name, action)| match action {
            FieldAction::ForeignKey {
                target,
                id_field: column,
            } if column == id_field => Some((name.as_str(), target.as_str())),
            _ => None,
        })
    }
}

/// One side of a many-to-many association, declared or inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSide {
    /// Normalized label of the entity the field belongs to
    pub entity: String,
    /// Field name on that entity
    pub field: String,
    /// Normalized label of the entity on the other end
    pub target: String,
    /// Whether `entity` is tracked
    pub included: bool,
}

/// Sides of one association type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationPolicy {
    through: String,
    namespace: String,
    sides: Vec<RelationSide>,
}

impl RelationPolicy {
    /// Returns the normalized association label.
    pub fn through(&self) -> &str {
        &self.through
    }

    /// Returns the normalized namespace owning the association type.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the sides of the association.
    ///
    /// A relation declared on one entity only gets its other side filled in
    /// from the declared target, with the field named `<type>_set`.
    pub fn sides(&self) -> &[RelationSide] {
        &self.sides
    }

    /// Resolves the side used when `entity` links objects of type `target`.
    ///
    /// Prefers the side declared on `entity` pointing at `target`, then any
    /// side declared on `entity`.
    pub fn side_for(&self, entity: &str, target: &str) -> Option<&RelationSide> {
        let entity = label_key(entity);
        let target = label_key(target);
        self.sides
            .iter()
            .find(|side| side.entity == entity && side.target == target)
            .or_else(|| self.sides.iter().find(|side| side.entity == entity))
    }
}

/// Output of one registry resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRegistry {
    /// Policies of included entity types, keyed by normalized label
    pub entities: IndexMap<String, Arc<TrackingPolicy>>,
    /// Policies of tracked association types, keyed by normalized label
    pub relations: IndexMap<String, Arc<RelationPolicy>>,
    /// Normalized labels of entity types that are not tracked
    pub excluded: Vec<String>,
}

impl ResolvedRegistry {
    /// Returns the policy of an included entity type.
    pub fn policy(&self, entity: &str) -> Option<&Arc<TrackingPolicy>> {
        self.entities.get(&label_key(entity))
    }

    /// Returns true if the entity type is tracked.
    pub fn is_tracked(&self, entity: &str) -> bool {
        self.entities.contains_key(&label_key(entity))
    }
}

/// Catalog of declared entity types.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    catalog: Vec<EntityMeta>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an entity type, replacing an earlier declaration with the same label.
    pub fn register(&mut self, meta: EntityMeta) {
        let label = label_key(&meta.label());
        self.catalog.retain(|existing| label_key(&existing.label()) != label);
        self.catalog.push(meta);
    }

    /// Returns the declared entity types.
    pub fn catalog(&self) -> &[EntityMeta] {
        &self.catalog
    }

    /// Resolves tracking policies for the catalog under `config`.
    ///
    /// Patterns matching nothing are logged as warnings. Identical input
    /// always yields an identical result.
    pub fn resolve(&self, config: &TrailsConfig) -> Result<ResolvedRegistry> {
        // label -> index into catalog, covering alternate labels
        let mut model_labels: IndexMap<String, usize> = IndexMap::new();
        // field label -> (catalog index, field name)
        let mut field_labels: IndexMap<String, (usize, String)> = IndexMap::new();
        let mut included: Vec<Option<bool>> = vec![None; self.catalog.len()];
        let mut field_maps: Vec<IndexMap<String, FieldAction>> = Vec::with_capacity(self.catalog.len());

        for (index, meta) in self.catalog.iter().enumerate() {
            for label in meta.labels() {
                model_labels.insert(label, index);
            }
            let fields = build_field_map(meta);
            let primary = label_key(&meta.label());
            for name in fields.keys() {
                field_labels.insert(format!("{}.{}", primary, label_key(name)), (index, name.clone()));
            }
            field_maps.push(fields);
        }

        for pattern in LabelPattern::compile_all(&config.include_models)? {
            let matched = pattern.filter(model_labels.keys().map(String::as_str));
            if matched.is_empty() {
                tracing::warn!(pattern = pattern.as_str(), "include pattern does not match any known models");
            }
            for label in matched {
                included[model_labels[label]] = Some(true);
            }
        }

        for pattern in LabelPattern::compile_all(&config.exclude_models)? {
            let matched = pattern.filter(model_labels.keys().map(String::as_str));
            if matched.is_empty() {
                tracing::warn!(pattern = pattern.as_str(), "exclude pattern does not match any known models");
            }
            for label in matched {
                included[model_labels[label]] = Some(false);
            }
        }

        for own in [TRAIL_ENTITY, TRAIL_MARKER_ENTITY] {
            if let Some(&index) = model_labels.get(&label_key(own)) {
                included[index] = Some(false);
            }
        }

        for pattern in LabelPattern::compile_all(&config.exclude_fields)? {
            let matched = pattern.filter(field_labels.keys().map(String::as_str));
            if matched.is_empty() {
                tracing::warn!(pattern = pattern.as_str(), "exclude pattern does not match any known fields");
            }
            for label in matched {
                let (index, name) = &field_labels[label];
                field_maps[*index].insert(name.clone(), FieldAction::Ignore);
            }
        }

        for pattern in LabelPattern::compile_all(&config.sensitive_fields)? {
            let matched = pattern.filter(field_labels.keys().map(String::as_str));
            if matched.is_empty() {
                tracing::warn!(
                    pattern = pattern.as_str(),
                    "sensitive fields pattern does not match any known fields"
                );
            }
            for label in matched {
                let (index, name) = &field_labels[label];
                if let Some(action) = field_maps[*index].get_mut(name) {
                    if *action == FieldAction::Track {
                        *action = FieldAction::Sensitive;
                    }
                }
            }
        }

        let mut resolved = ResolvedRegistry::default();
        let mut relations: IndexMap<String, (String, Vec<RelationSide>)> = IndexMap::new();

        for (index, meta) in self.catalog.iter().enumerate() {
            let label = label_key(&meta.label());
            let is_included = included[index] == Some(true);
            let fields = std::mem::take(&mut field_maps[index]);

            for (name, action) in &fields {
                if let FieldAction::ManyToManyThrough { through, target } = action {
                    let entry = relations
                        .entry(through.clone())
                        .or_insert_with(|| (self.namespace_of(through), Vec::new()));
                    entry.1.push(RelationSide {
                        entity: label.clone(),
                        field: name.clone(),
                        target: target.clone(),
                        included: is_included,
                    });
                }
            }

            if is_included {
                resolved.entities.insert(
                    label.clone(),
                    Arc::new(TrackingPolicy {
                        entity: label,
                        namespace: label_key(meta.namespace()),
                        fields,
                    }),
                );
            } else {
                resolved.excluded.push(label);
            }
        }

        for (_, sides) in relations.values_mut() {
            let mut reverse: Vec<RelationSide> = Vec::new();
            for side in sides.iter() {
                let index = model_labels.get(&side.target).copied();
                let entity = index.map_or_else(|| side.target.clone(), |i| label_key(&self.catalog[i].label()));
                let answered = sides
                    .iter()
                    .chain(reverse.iter())
                    .any(|other| other.entity == entity && other.target == side.entity);
                if !answered {
                    reverse.push(RelationSide {
                        field: reverse_accessor(&side.entity),
                        entity,
                        target: side.entity.clone(),
                        included: index.is_some_and(|i| included[i] == Some(true)),
                    });
                }
            }
            sides.extend(reverse);
        }

        for (through, (namespace, sides)) in relations {
            if sides.iter().any(|side| side.included) {
                resolved.relations.insert(
                    through.clone(),
                    Arc::new(RelationPolicy {
                        through,
                        namespace,
                        sides,
                    }),
                );
            }
        }

        Ok(resolved)
    }

    fn namespace_of(&self, label: &str) -> String {
        self.catalog
            .iter()
            .find(|meta| meta.labels().iter().any(|l| l == label))
            .map(|meta| label_key(meta.namespace()))
            .unwrap_or_else(|| match label.rsplit_once('.') {
                Some((namespace, _)) => namespace.to_string(),
                None => label.to_string(),
            })
    }
}

/// Accessor name of the undeclared side of a many-to-many: `team_set` for
/// a relation declared on `app.Team`.
fn reverse_accessor(entity: &str) -> String {
    let name = entity.rsplit_once('.').map_or(entity, |(_, name)| name);
    format!("{}_set", name.to_lowercase())
}

fn build_field_map(meta: &EntityMeta) -> IndexMap<String, FieldAction> {
    let mut fields = IndexMap::new();
    for field in meta.fields() {
        match &field.kind {
            FieldKind::Value => {
                fields.insert(field.name.clone(), FieldAction::Track);
            }
            FieldKind::ForeignKey { target, id_field } | FieldKind::OneToOne { target, id_field } => {
                if *id_field == field.name {
                    fields.insert(field.name.clone(), FieldAction::Track);
                } else {
                    fields.insert(
                        field.name.clone(),
                        FieldAction::ForeignKey {
                            target: label_key(target),
                            id_field: id_field.clone(),
                        },
                    );
                    fields.insert(id_field.clone(), FieldAction::Track);
                }
            }
            FieldKind::ManyToMany { target, through } => {
                fields.insert(
                    field.name.clone(),
                    FieldAction::ManyToManyThrough {
                        through: label_key(through),
                        target: label_key(target),
                    },
                );
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            EntityMeta::new("auth", "User")
                .field("username")
                .field("password")
                .field("last_login")
                .many_to_many("teams", "app.Team", "app.UserTeamAssociation"),
        );
        registry.register(
            EntityMeta::new("app", "UserEmail")
                .field("email")
                .foreign_key("user", "auth.User", "user_id"),
        );
        registry.register(
            EntityMeta::new("app", "Team")
                .field("name")
                .many_to_many("users", "auth.User", "app.UserTeamAssociation"),
        );
        registry.register(
            EntityMeta::new("app", "UserTeamAssociation")
                .foreign_key("user", "auth.User", "user_id")
                .foreign_key("team", "app.Team", "team_id")
                .field("manager"),
        );
        registry.register(EntityMeta::new("trails", "Trail").field("action"));
        registry.register(EntityMeta::new("trails", "TrailMarker").field("rel"));
        registry
    }

    fn config(include: &[&str], exclude: &[&str]) -> TrailsConfig {
        TrailsConfig {
            include_models: include.iter().map(|s| s.to_string()).collect(),
            exclude_models: exclude.iter().map(|s| s.to_string()).collect(),
            exclude_fields: Vec::new(),
            sensitive_fields: Vec::new(),
            ..TrailsConfig::default()
        }
    }

    #[test]
    fn include_then_exclude() {
        let resolved = catalog()
            .resolve(&config(&["app.*"], &["app.UserTeam*"]))
            .unwrap();
        assert!(resolved.is_tracked("app.UserEmail"));
        assert!(resolved.is_tracked("app.Team"));
        assert!(!resolved.is_tracked("app.UserTeamAssociation"));
        assert!(!resolved.is_tracked("auth.User"));
        assert!(resolved.excluded.contains(&"auth.user".to_string()));
    }

    #[test]
    fn trail_types_are_always_excluded() {
        let resolved = catalog().resolve(&config(&["*"], &[])).unwrap();
        assert!(!resolved.is_tracked("trails.Trail"));
        assert!(!resolved.is_tracked("trails.TrailMarker"));
        assert!(resolved.is_tracked("auth.User"));
    }

    #[test]
    fn patterns_are_case_insensitive() {
        let resolved = catalog().resolve(&config(&["AUTH.USER"], &[])).unwrap();
        assert!(resolved.is_tracked("auth.User"));
    }

    #[test]
    fn foreign_keys_track_their_id_field() {
        let resolved = catalog().resolve(&config(&["app.UserEmail"], &[])).unwrap();
        let policy = resolved.policy("app.UserEmail").unwrap();
        assert_eq!(
            policy.action("user"),
            Some(&FieldAction::ForeignKey {
                target: "auth.user".to_string(),
                id_field: "user_id".to_string()
            })
        );
        assert_eq!(policy.action("user_id"), Some(&FieldAction::Track));
        assert_eq!(policy.discrete_fields(), vec!["email", "user_id"]);
        assert_eq!(policy.relation_for_id_field("user_id"), Some(("user", "auth.user")));
    }

    #[test]
    fn excluded_and_sensitive_fields() {
        let mut cfg = config(&["auth.User"], &[]);
        cfg.exclude_fields = vec!["auth.User.last_login".to_string()];
        cfg.sensitive_fields = vec!["auth.User.pass*".to_string(), "auth.User.last_login".to_string()];
        let resolved = catalog().resolve(&cfg).unwrap();
        let policy = resolved.policy("auth.User").unwrap();
        assert_eq!(policy.action("last_login"), Some(&FieldAction::Ignore));
        assert_eq!(policy.action("password"), Some(&FieldAction::Sensitive));
        assert!(policy.is_sensitive("password"));
        assert_eq!(policy.discrete_fields(), vec!["username", "password"]);
    }

    #[test]
    fn relation_tracked_when_one_side_is_included() {
        let resolved = catalog().resolve(&config(&["app.Team"], &[])).unwrap();
        let relation = resolved.relations.get("app.userteamassociation").unwrap();
        assert_eq!(relation.namespace(), "app");
        assert_eq!(relation.sides().len(), 2);

        let side = relation.side_for("app.Team", "auth.User").unwrap();
        assert_eq!(side.field, "users");
        assert!(side.included);
        let other = relation.side_for("auth.User", "app.Team").unwrap();
        assert_eq!(other.field, "teams");
        assert!(!other.included);
    }

    #[test]
    fn relation_dropped_when_no_side_is_included() {
        let resolved = catalog().resolve(&config(&["app.UserEmail"], &[])).unwrap();
        assert!(resolved.relations.is_empty());
    }

    #[test]
    fn unmatched_patterns_are_not_errors() {
        let mut cfg = config(&["nothing.Here"], &["nope.*"]);
        cfg.sensitive_fields = vec!["no.such.field".to_string()];
        let resolved = catalog().resolve(&cfg).unwrap();
        assert!(resolved.entities.is_empty());
    }

    #[test]
    fn invalid_pattern_fails_resolution() {
        assert!(catalog().resolve(&config(&["app.[Team"], &[])).is_err());
    }

    #[test]
    fn resolution_is_idempotent() {
        let registry = catalog();
        let cfg = config(&["*"], &["auth.*"]);
        assert_eq!(registry.resolve(&cfg).unwrap(), registry.resolve(&cfg).unwrap());
    }

    #[test]
    fn register_replaces_same_label() {
        let mut registry = catalog();
        let before = registry.catalog().len();
        registry.register(EntityMeta::new("App", "Team").field("name").field("motto"));
        assert_eq!(registry.catalog().len(), before);
    }

    #[test]
    fn one_sided_relation_gets_reverse_side() {
        let mut registry = Registry::new();
        registry.register(EntityMeta::new("auth", "User").field("username"));
        registry.register(
            EntityMeta::new("app", "Team")
                .field("name")
                .many_to_many("users", "auth.User", "app.UserTeamAssociation"),
        );
        let resolved = registry.resolve(&config(&["auth.User"], &[])).unwrap();
        let relation = resolved.relations.get("app.userteamassociation").unwrap();
        assert_eq!(relation.sides().len(), 2);

        let reverse = relation.side_for("auth.User", "app.Team").unwrap();
        assert_eq!(reverse.field, "team_set");
        assert_eq!(reverse.target, "app.team");
        assert!(reverse.included);
        assert!(!relation.side_for("app.Team", "auth.User").unwrap().included);
    }

    #[test]
    fn alternate_namespace_matches_include_patterns() {
        let mut registry = Registry::new();
        registry.register(
            EntityMeta::new("accounts", "Profile")
                .alt_namespace("accounts.models")
                .field("bio"),
        );
        registry.register(EntityMeta::new("billing", "Invoice").field("total"));

        let resolved = registry.resolve(&config(&["accounts.models.*"], &[])).unwrap();
        assert!(resolved.is_tracked("accounts.Profile"));
        assert!(!resolved.is_tracked("billing.Invoice"));
        assert_eq!(resolved.policy("accounts.Profile").unwrap().namespace(), "accounts");

        let resolved = registry
            .resolve(&config(&["*"], &["accounts.models.profile"]))
            .unwrap();
        assert!(!resolved.is_tracked("accounts.Profile"));
    }

    #[test]
    fn one_to_one_is_classified_like_a_foreign_key() {
        let mut registry = Registry::new();
        registry.register(
            EntityMeta::new("app", "Profile")
                .field("bio")
                .one_to_one("user", "auth.User", "user_id"),
        );
        let resolved = registry.resolve(&config(&["app.Profile"], &[])).unwrap();
        let policy = resolved.policy("app.Profile").unwrap();
        assert_eq!(policy.discrete_fields(), vec!["bio", "user_id"]);
        assert_eq!(policy.relation_for_id_field("user_id"), Some(("user", "auth.user")));
    }
}
