use std::sync::Arc;

use serde_json::Value;

use super::{describe, Migrating, SharedContext, Stash, Tracker, TrackingContext};
use crate::audit::Action;
use crate::hooks::{Hook, HookHandler, HookPoint};
use crate::logging::trace_hook;
use crate::model::{Entity, ObjectId, ObjectKey, ObjectRef};
use crate::pipeline::{RelatedObject, TrailEvent};
use crate::registry::TrackingPolicy;
use crate::secret::redact;
use crate::snapshot::{FieldDiff, Snapshot};

/// Records add, change and delete trails for one entity type.
///
/// On pre-save the persisted state is re-fetched and stashed; on post-save
/// it is compared with the written state. On pre-delete the identity and
/// display text are stashed under the address of the instance, since the
/// object may have lost its id by the time post-delete arrives.
pub struct EntityTracker {
    policy: Arc<TrackingPolicy>,
    context: SharedContext,
    before_save: Stash<ObjectKey, Snapshot>,
    before_delete: Stash<usize, ObjectRef>,
    migrating: Migrating,
}

impl EntityTracker {
    /// Creates a tracker for the entity type described by `policy`.
    pub fn new(policy: Arc<TrackingPolicy>, context: SharedContext) -> Self {
        trace_hook!(entity = policy.entity(), "entity tracker created");
        Self {
            policy,
            context,
            before_save: Stash::new(),
            before_delete: Stash::new(),
            migrating: Migrating::new(),
        }
    }

    /// Returns the policy the tracker applies.
    pub fn policy(&self) -> &Arc<TrackingPolicy> {
        &self.policy
    }

    fn suppressed(&self, ctx: &TrackingContext, raw: bool) -> bool {
        (self.migrating.active() && !ctx.config.track_migrations) || (raw && !ctx.config.track_raw)
    }

    /// Tracked fields, narrowed to `update_fields` for partial updates.
    fn fields(&self, update_fields: Option<&[String]>) -> Vec<String> {
        let fields = self.policy.discrete_fields();
        match update_fields {
            Some(only) => fields.into_iter().filter(|f| only.contains(f)).collect(),
            None => fields,
        }
    }

    fn pre_save(&self, ctx: &TrackingContext, instance: &dyn Entity, update_fields: Option<&[String]>) {
        let Some(key) = ObjectKey::of(instance) else {
            return;
        };
        // A snapshot left by a save whose post-hook never arrived must not
        // stand in for this one.
        self.before_save.take(key.clone());
        let fields = self.fields(update_fields);
        let persisted = match ctx.loader.load(instance.entity(), &key.id) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(object = %key, error = %e, "could not load persisted state, no before snapshot");
                return;
            }
        };
        let snapshot = Snapshot::capture(persisted.as_ref(), &fields);
        if !snapshot.is_empty() {
            self.before_save.put(key, snapshot);
        }
    }

    fn post_save(
        &self,
        ctx: &TrackingContext,
        instance: &dyn Entity,
        created: bool,
        update_fields: Option<&[String]>,
    ) {
        let fields = self.fields(update_fields);
        let event = if created {
            if let Some(key) = ObjectKey::of(instance) {
                self.before_save.take(key);
            }
            self.added(ctx, instance, &fields)
        } else {
            self.changed(ctx, instance, &fields)
        };
        if let Some(event) = event {
            ctx.pipeline.record(event);
        }
    }

    fn added(&self, ctx: &TrackingContext, instance: &dyn Entity, fields: &[String]) -> Option<TrailEvent> {
        let mut snapshot = Snapshot::capture(instance, fields);
        let mut related = Vec::new();
        for field in fields {
            let Some(value) = snapshot.get(field).cloned() else {
                continue;
            };
            if self.policy.is_sensitive(field) {
                let text = &ctx.config.sensitive_text;
                snapshot.set(field, redact(&value, text, ctx.config.sensitive_show_empty));
            } else if let Some((relation, target)) = self.policy.relation_for_id_field(field) {
                if let Some(id) = ObjectId::from_value(&value) {
                    related.push(RelatedObject::new(relation, describe(ctx.loader.as_ref(), target, &id)));
                }
            }
        }
        Some(
            TrailEvent::new(Action::Add)
                .with_instance(ObjectRef::of(instance))
                .with_instance_data(snapshot.to_payload())
                .with_related(related),
        )
    }

    fn changed(&self, ctx: &TrackingContext, instance: &dyn Entity, fields: &[String]) -> Option<TrailEvent> {
        let before = ObjectKey::of(instance)
            .and_then(|key| self.before_save.take(key))
            .unwrap_or_default();
        let after = Snapshot::capture(instance, fields);
        let mut diff = FieldDiff::between(&before, &after, fields);
        if diff.is_empty() {
            return None;
        }

        let mut related = Vec::new();
        for field in fields {
            let Some(change) = diff.get_mut(field) else {
                continue;
            };
            if self.policy.is_sensitive(field) {
                let text = &ctx.config.sensitive_text;
                let show_empty = ctx.config.sensitive_show_empty;
                change.before = Some(redact(change.before.as_ref().unwrap_or(&Value::Null), text, show_empty));
                change.after = Some(redact(change.after.as_ref().unwrap_or(&Value::Null), text, show_empty));
            } else if let Some((relation, target)) = self.policy.relation_for_id_field(field) {
                let sides = [("-", change.before.as_ref()), ("+", change.after.as_ref())];
                for (sign, value) in sides {
                    if let Some(id) = value.and_then(ObjectId::from_value) {
                        let object = describe(ctx.loader.as_ref(), target, &id);
                        related.push(RelatedObject::new(format!("{}{}", sign, relation), object));
                    }
                }
            }
        }

        Some(
            TrailEvent::new(Action::Change)
                .with_instance(ObjectRef::of(instance))
                .with_instance_data(diff.to_payload())
                .with_related(related),
        )
    }

    fn pre_delete(&self, instance: &dyn Entity) {
        let address = address_of(instance);
        match ObjectKey::of(instance) {
            Some(key) => {
                let descriptor = ObjectRef::new(Some(key), instance.display());
                self.before_delete.put(address, descriptor);
            }
            None => {
                self.before_delete.take(address);
            }
        }
    }

    fn post_delete(&self, ctx: &TrackingContext, instance: &dyn Entity) {
        if let Some(descriptor) = self.before_delete.take(address_of(instance)) {
            ctx.pipeline.record(TrailEvent::new(Action::Delete).with_instance(descriptor));
        }
    }
}

/// Pre-delete and post-delete receive the same instance, so its address
/// pairs them even after the persistence layer has cleared the id.
fn address_of(instance: &dyn Entity) -> usize {
    (instance as *const dyn Entity).cast::<()>() as usize
}

impl HookHandler for EntityTracker {
    fn handle(&self, hook: &Hook<'_>) {
        trace_hook!(entity = self.policy.entity(), hook = ?hook, "entity tracker hook");
        let ctx = self.context.load();
        match hook {
            Hook::PreMigrate { namespace } if namespace.eq_ignore_ascii_case(self.policy.namespace()) => {
                self.migrating.start()
            }
            Hook::PostMigrate { namespace } if namespace.eq_ignore_ascii_case(self.policy.namespace()) => {
                self.migrating.end()
            }
            Hook::PreSave {
                instance,
                raw,
                update_fields,
            } if !self.suppressed(&ctx, *raw) => self.pre_save(&ctx, *instance, *update_fields),
            Hook::PostSave {
                instance,
                created,
                raw,
                update_fields,
            } if !self.suppressed(&ctx, *raw) => self.post_save(&ctx, *instance, *created, *update_fields),
            Hook::PreDelete { instance } if !self.suppressed(&ctx, false) => self.pre_delete(*instance),
            Hook::PostDelete { instance } if !self.suppressed(&ctx, false) => self.post_delete(&ctx, *instance),
            _ => {}
        }
    }
}

impl Tracker for EntityTracker {
    fn subscriber_id(&self) -> String {
        format!("trails:entity:{}", self.policy.entity())
    }

    fn hook_points(&self) -> Vec<HookPoint> {
        let entity = self.policy.entity().to_string();
        let namespace = self.policy.namespace().to_string();
        vec![
            HookPoint::PreMigrate(namespace.clone()),
            HookPoint::PostMigrate(namespace),
            HookPoint::PreSave(entity.clone()),
            HookPoint::PostSave(entity.clone()),
            HookPoint::PreDelete(entity.clone()),
            HookPoint::PostDelete(entity),
        ]
    }
}
