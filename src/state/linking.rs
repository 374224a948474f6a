use std::sync::Arc;

use crate::state::error::StateResult;
use crate::state::events::{ChatEvent, EventHandler};
use crate::state::model::{
    ChannelMember, ChatChannel, ChatMessage, Entity, EntityId, MessageReaction,
};
use crate::state::query::ListKey;
use crate::state::store::StoreSession;

/// What an event means for one entity's list membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkTarget<Id> {
    /// The entity was created or changed; membership may have to be re-evaluated.
    Changed(Id),
    Deleted(Id),
    /// The server placed the entity in the user's view.
    AddedToView(Id),
    RemovedFromView(Id),
}

/// Entities whose list membership can be derived from events.
pub trait Linkable: Entity {
    fn link_targets(event: &ChatEvent) -> Vec<LinkTarget<Self::Id>>;
}

impl Linkable for ChatChannel {
    fn link_targets(event: &ChatEvent) -> Vec<LinkTarget<Self::Id>> {
        match event {
            ChatEvent::ChannelDeleted { cid } => vec![LinkTarget::Deleted(cid.clone())],
            ChatEvent::NotificationAddedToChannel { channel } => {
                vec![LinkTarget::AddedToView(channel.cid.clone())]
            }
            ChatEvent::NotificationRemovedFromChannel { cid } => {
                vec![LinkTarget::RemovedFromView(cid.clone())]
            }
            ChatEvent::ChannelUpdated { .. }
            | ChatEvent::ChannelHidden { .. }
            | ChatEvent::ChannelVisible { .. }
            | ChatEvent::MessageNew { .. }
            | ChatEvent::MemberAdded { .. }
            | ChatEvent::MemberRemoved { .. } => event
                .cid()
                .map(|cid| vec![LinkTarget::Changed(cid.clone())])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

impl Linkable for ChatMessage {
    fn link_targets(event: &ChatEvent) -> Vec<LinkTarget<Self::Id>> {
        match event {
            ChatEvent::MessageNew { message } | ChatEvent::MessageUpdated { message } => {
                vec![LinkTarget::Changed(message.id.clone())]
            }
            ChatEvent::MessageDeleted { message, hard: true } => {
                vec![LinkTarget::Deleted(message.id.clone())]
            }
            ChatEvent::MessageDeleted { message, hard: false } => {
                vec![LinkTarget::Changed(message.id.clone())]
            }
            _ => Vec::new(),
        }
    }
}

impl Linkable for ChannelMember {
    fn link_targets(event: &ChatEvent) -> Vec<LinkTarget<Self::Id>> {
        match event {
            ChatEvent::MemberAdded { member } | ChatEvent::MemberUpdated { member } => {
                vec![LinkTarget::Changed(member.id())]
            }
            ChatEvent::MemberRemoved { member } => vec![LinkTarget::Deleted(member.id())],
            _ => Vec::new(),
        }
    }
}

impl Linkable for MessageReaction {
    fn link_targets(event: &ChatEvent) -> Vec<LinkTarget<Self::Id>> {
        match event {
            ChatEvent::ReactionNew { reaction } | ChatEvent::ReactionUpdated { reaction } => {
                vec![LinkTarget::Changed(reaction.id())]
            }
            ChatEvent::ReactionDeleted { reaction } => vec![LinkTarget::Deleted(reaction.id())],
            _ => Vec::new(),
        }
    }
}

pub type EntityPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

/// How a list decides membership.
#[derive(Clone)]
pub enum LinkFilter<T> {
    /// Membership is evaluated by the server and changes only through
    /// added-to-view / removed-from-view events.
    Static,
    /// Membership is evaluated locally against the persisted entity.
    Dynamic(EntityPredicate<T>),
}

impl<T> LinkFilter<T> {
    pub fn dynamic<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        LinkFilter::Dynamic(Arc::new(predicate))
    }
}

/// Keeps the link records of one list in step with incoming events so the list's
/// observer sees membership changes as ordinary store changes.
pub struct ListLinkingCoordinator<T: Linkable> {
    list: ListKey,
    filter: LinkFilter<T>,
    admission: Option<EntityPredicate<T>>,
}

impl<T: Linkable> ListLinkingCoordinator<T> {
    pub fn new(list: ListKey, filter: LinkFilter<T>) -> Self {
        Self {
            list,
            filter,
            admission: None,
        }
    }

    /// Extra condition an entity must meet to be newly linked. Entities already in
    /// the list are not affected.
    pub fn with_admission<F>(mut self, admission: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.admission = Some(Arc::new(admission));
        self
    }

    pub fn list(&self) -> &ListKey {
        &self.list
    }

    /// Applies the membership consequences of `event` in `session`. Decisions read
    /// the entity as stored in the session, never the event payload.
    pub fn process(&self, session: &mut StoreSession<'_>, event: &ChatEvent) -> StateResult<()> {
        for target in T::link_targets(event) {
            self.apply(session, &target)?;
        }
        Ok(())
    }

    fn apply(&self, session: &mut StoreSession<'_>, target: &LinkTarget<T::Id>) -> StateResult<()> {
        match (target, &self.filter) {
            (LinkTarget::Deleted(id), _) => session.unlink(&self.list, id),
            (LinkTarget::AddedToView(id), LinkFilter::Static) => session.link(&self.list, id),
            (LinkTarget::RemovedFromView(id), LinkFilter::Static) => {
                session.unlink(&self.list, id)
            }
            (LinkTarget::Changed(_), LinkFilter::Static) => {}
            (
                LinkTarget::Changed(id)
                | LinkTarget::AddedToView(id)
                | LinkTarget::RemovedFromView(id),
                LinkFilter::Dynamic(predicate),
            ) => self.reevaluate(session, id, predicate)?,
        }
        Ok(())
    }

    fn reevaluate(
        &self,
        session: &mut StoreSession<'_>,
        id: &T::Id,
        predicate: &EntityPredicate<T>,
    ) -> StateResult<()> {
        let linked = session.is_linked(&self.list, id.as_key());
        let Some(entity) = session.entity::<T>(id)? else {
            if linked {
                session.unlink(&self.list, id);
            }
            return Ok(());
        };

        let matches = predicate(&entity);
        if linked && !matches {
            session.unlink(&self.list, id);
        } else if !linked
            && matches
            && self
                .admission
                .as_ref()
                .map_or(true, |admission| admission(&entity))
        {
            session.link(&self.list, id);
        }
        Ok(())
    }
}

impl<T: Linkable> EventHandler for ListLinkingCoordinator<T> {
    fn handle(&self, session: &mut StoreSession<'_>, event: &ChatEvent) -> StateResult<()> {
        self.process(session, event)
    }
}
