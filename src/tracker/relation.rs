use std::sync::Arc;

use super::{describe, Migrating, SharedContext, Stash, Tracker, TrackingContext};
use crate::audit::Action;
use crate::hooks::{Hook, HookHandler, HookPoint, M2mAction};
use crate::logging::trace_hook;
use crate::model::{label_key, Entity, ObjectId, ObjectKey, ObjectRef};
use crate::pipeline::{RelatedObject, TrailEvent};
use crate::registry::RelationPolicy;

/// Records associate and disassociate trails for one association type.
///
/// The object whose relation accessor was used is the primary object and
/// gets an empty relation label; each linked object is labeled with the
/// field name of the primary side. Add, remove and clear are each recorded
/// on their own, without reconciling them against one another. A clear is
/// recorded even when nothing was linked.
pub struct RelationTracker {
    policy: Arc<RelationPolicy>,
    context: SharedContext,
    before_clear: Stash<(ObjectKey, String), Vec<ObjectId>>,
    migrating: Migrating,
}

impl RelationTracker {
    /// Creates a tracker for the association described by `policy`.
    pub fn new(policy: Arc<RelationPolicy>, context: SharedContext) -> Self {
        trace_hook!(through = policy.through(), "relation tracker created");
        Self {
            policy,
            context,
            before_clear: Stash::new(),
            migrating: Migrating::new(),
        }
    }

    /// Returns the policy the tracker applies.
    pub fn policy(&self) -> &Arc<RelationPolicy> {
        &self.policy
    }

    /// Field name of the side used from `instance` towards `target`.
    fn primary_field(&self, instance: &dyn Entity, target: &str) -> Option<String> {
        let side = self.policy.side_for(instance.entity(), target);
        if side.is_none() {
            tracing::warn!(
                through = self.policy.through(),
                entity = instance.entity(),
                target = target,
                "association changed from an entity with no side in it"
            );
        }
        side.map(|side| side.field.clone())
    }

    fn changed(&self, ctx: &TrackingContext, action: Action, instance: &dyn Entity, target: &str, ids: &[ObjectId]) {
        if ids.is_empty() {
            return;
        }
        let rel = self.primary_field(instance, target).unwrap_or_default();
        self.linked(ctx, action, instance, &rel, target, ids);
    }

    fn linked(
        &self,
        ctx: &TrackingContext,
        action: Action,
        instance: &dyn Entity,
        rel: &str,
        target: &str,
        ids: &[ObjectId],
    ) {
        let mut related = Vec::with_capacity(ids.len() + 1);
        related.push(RelatedObject::new("", ObjectRef::of(instance)));
        for object in self.resolve(ctx, target, ids) {
            related.push(RelatedObject::new(rel, object));
        }
        ctx.pipeline.record(TrailEvent::new(action).with_related(related));
    }

    fn resolve(&self, ctx: &TrackingContext, target: &str, ids: &[ObjectId]) -> Vec<ObjectRef> {
        match ctx.loader.load_many(target, ids) {
            Ok(objects) => objects.iter().map(|o| ObjectRef::of(o.as_ref())).collect(),
            Err(e) => {
                tracing::warn!(entity = target, error = %e, "could not load linked objects");
                ids.iter().map(|id| describe(ctx.loader.as_ref(), target, id)).collect()
            }
        }
    }

    fn pre_clear(&self, ctx: &TrackingContext, instance: &dyn Entity, target: &str) {
        let (Some(key), Some(field)) = (ObjectKey::of(instance), self.primary_field(instance, target)) else {
            return;
        };
        match ctx.loader.linked_ids(instance, &field) {
            Ok(ids) => self.before_clear.put((key, field), ids),
            Err(e) => {
                tracing::warn!(object = %key, field = %field, error = %e, "could not load links before clear");
                self.before_clear.take((key, field));
            }
        }
    }

    fn post_clear(&self, ctx: &TrackingContext, instance: &dyn Entity, target: &str) {
        let field = self.primary_field(instance, target).unwrap_or_default();
        let ids = ObjectKey::of(instance)
            .and_then(|key| self.before_clear.take((key, field.clone())))
            .unwrap_or_default();
        self.linked(ctx, Action::Disassociate, instance, &field, target, &ids);
    }
}

impl HookHandler for RelationTracker {
    fn handle(&self, hook: &Hook<'_>) {
        trace_hook!(through = self.policy.through(), hook = ?hook, "relation tracker hook");
        let ctx = self.context.load();
        match hook {
            Hook::PreMigrate { namespace } if namespace.eq_ignore_ascii_case(self.policy.namespace()) => {
                self.migrating.start()
            }
            Hook::PostMigrate { namespace } if namespace.eq_ignore_ascii_case(self.policy.namespace()) => {
                self.migrating.end()
            }
            Hook::M2mChanged {
                through,
                action,
                instance,
                target,
                ids,
            } if label_key(through) == self.policy.through() => {
                if self.migrating.active() && !ctx.config.track_migrations {
                    return;
                }
                let target = label_key(target);
                match action {
                    M2mAction::PostAdd => self.changed(&ctx, Action::Associate, *instance, &target, ids),
                    M2mAction::PostRemove => self.changed(&ctx, Action::Disassociate, *instance, &target, ids),
                    M2mAction::PreClear => self.pre_clear(&ctx, *instance, &target),
                    M2mAction::PostClear => self.post_clear(&ctx, *instance, &target),
                    M2mAction::PreAdd | M2mAction::PreRemove => {}
                }
            }
            _ => {}
        }
    }
}

impl Tracker for RelationTracker {
    fn subscriber_id(&self) -> String {
        format!("trails:relation:{}", self.policy.through())
    }

    fn hook_points(&self) -> Vec<HookPoint> {
        let namespace = self.policy.namespace().to_string();
        vec![
            HookPoint::PreMigrate(namespace.clone()),
            HookPoint::PostMigrate(namespace),
            HookPoint::M2mChanged(self.policy.through().to_string()),
        ]
    }
}
