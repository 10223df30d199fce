use std::rc::Rc;

use crate::desc::{DescriptionChanges, MediaDescription, StreamDescription};

/// The three descriptions of one offer/answer round.
///
/// The signaling layer builds one per round. Descriptions are reference counted
/// so that [`OfferAnswerContext::copy_from`] can alias another context's
/// descriptions, while [`OfferAnswerContext::dup_from`] takes private copies.
///
/// Access to a single stream goes through a [`StreamView`], created fresh for
/// each index with [`OfferAnswerContext::scope`] or
/// [`OfferAnswerContext::scope_with_diff`]. The context itself is never
/// mutated by scoping.
///
/// ```
/// use callstreams::{OfferAnswerContext, MediaDescription};
///
/// let mut ctx = OfferAnswerContext::new();
/// ctx.set_local(MediaDescription::new("192.168.0.2"));
/// ctx.set_local_is_offerer(true);
///
/// let view = ctx.scope(3);
/// assert!(view.local_stream().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct OfferAnswerContext {
    local: Option<Rc<MediaDescription>>,
    remote: Option<Rc<MediaDescription>>,
    result: Option<Rc<MediaDescription>>,
    local_is_offerer: bool,
}

impl OfferAnswerContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        OfferAnswerContext::default()
    }

    /// Set the local description.
    pub fn set_local(&mut self, md: impl Into<Rc<MediaDescription>>) {
        self.local = Some(md.into());
    }

    /// Set the remote description.
    pub fn set_remote(&mut self, md: impl Into<Rc<MediaDescription>>) {
        self.remote = Some(md.into());
    }

    /// Set the negotiated result.
    pub fn set_result(&mut self, md: impl Into<Rc<MediaDescription>>) {
        self.result = Some(md.into());
    }

    /// Whether the local side made the offer in this round.
    pub fn set_local_is_offerer(&mut self, v: bool) {
        self.local_is_offerer = v;
    }

    /// Whether the local side made the offer in this round.
    pub fn local_is_offerer(&self) -> bool {
        self.local_is_offerer
    }

    /// The local description.
    pub fn local(&self) -> Option<&MediaDescription> {
        self.local.as_deref()
    }

    /// The remote description.
    pub fn remote(&self) -> Option<&MediaDescription> {
        self.remote.as_deref()
    }

    /// The negotiated result.
    pub fn result(&self) -> Option<&MediaDescription> {
        self.result.as_deref()
    }

    /// Mutable access to the local description.
    ///
    /// If the description is shared with another context it is copied first.
    pub fn local_mut(&mut self) -> Option<&mut MediaDescription> {
        self.local.as_mut().map(Rc::make_mut)
    }

    pub(crate) fn remote_rc(&self) -> Option<Rc<MediaDescription>> {
        self.remote.clone()
    }

    pub(crate) fn set_remote_rc(&mut self, md: Option<Rc<MediaDescription>>) {
        self.remote = md;
    }

    pub(crate) fn result_rc(&self) -> Option<Rc<MediaDescription>> {
        self.result.clone()
    }

    pub(crate) fn set_result_rc(&mut self, md: Option<Rc<MediaDescription>>) {
        self.result = md;
    }

    /// Alias the descriptions of `other`. No copies are made.
    pub fn copy_from(&mut self, other: &OfferAnswerContext) {
        self.local = other.local.clone();
        self.remote = other.remote.clone();
        self.result = other.result.clone();
        self.local_is_offerer = other.local_is_offerer;
    }

    /// Take private deep copies of the descriptions of `other`.
    pub fn dup_from(&mut self, other: &OfferAnswerContext) {
        let dup = |md: &Option<Rc<MediaDescription>>| md.as_deref().map(|m| Rc::new(m.clone()));
        self.local = dup(&other.local);
        self.remote = dup(&other.remote);
        self.result = dup(&other.result);
        self.local_is_offerer = other.local_is_offerer;
    }

    /// Release the descriptions.
    pub fn clear(&mut self) {
        self.local = None;
        self.remote = None;
        self.result = None;
        self.local_is_offerer = false;
    }

    /// Whether the context holds no description at all.
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none() && self.result.is_none()
    }

    /// View of the stream at `index`, without change information.
    pub fn scope(&self, index: usize) -> StreamView<'_> {
        StreamView {
            ctx: self,
            index,
            local_changes: DescriptionChanges::empty(),
            result_changes: DescriptionChanges::empty(),
        }
    }

    /// View of the stream at `index`, with the changes relative to `previous`.
    ///
    /// Changes are only computed where both contexts have the description,
    /// otherwise the set is empty.
    pub fn scope_with_diff(&self, index: usize, previous: &OfferAnswerContext) -> StreamView<'_> {
        let diff = |now: Option<&MediaDescription>, prev: Option<&MediaDescription>| match (now, prev)
        {
            (Some(now), Some(prev)) => {
                now.global_changes_from(prev) | now.stream(index).changes_from(prev.stream(index))
            }
            _ => DescriptionChanges::empty(),
        };

        StreamView {
            ctx: self,
            index,
            local_changes: diff(self.local(), previous.local()),
            result_changes: diff(self.result(), previous.result()),
        }
    }
}

/// One stream index of an [`OfferAnswerContext`].
///
/// Out of range indexes yield [`StreamDescription::empty()`].
#[derive(Debug, Clone, Copy)]
pub struct StreamView<'a> {
    ctx: &'a OfferAnswerContext,
    index: usize,
    local_changes: DescriptionChanges,
    result_changes: DescriptionChanges,
}

impl<'a> StreamView<'a> {
    /// The stream index this view is scoped to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The whole context.
    pub fn context(&self) -> &'a OfferAnswerContext {
        self.ctx
    }

    /// Whether the local side made the offer.
    pub fn local_is_offerer(&self) -> bool {
        self.ctx.local_is_offerer
    }

    /// Local whole description.
    pub fn local_media(&self) -> Option<&'a MediaDescription> {
        self.ctx.local()
    }

    /// Remote whole description.
    pub fn remote_media(&self) -> Option<&'a MediaDescription> {
        self.ctx.remote()
    }

    /// Result whole description.
    pub fn result_media(&self) -> Option<&'a MediaDescription> {
        self.ctx.result()
    }

    /// Local stream at this index.
    pub fn local_stream(&self) -> &'a StreamDescription {
        stream_at(self.ctx.local(), self.index)
    }

    /// Remote stream at this index.
    pub fn remote_stream(&self) -> &'a StreamDescription {
        stream_at(self.ctx.remote(), self.index)
    }

    /// Result stream at this index.
    pub fn result_stream(&self) -> &'a StreamDescription {
        stream_at(self.ctx.result(), self.index)
    }

    /// Changes of the local description since the previous round.
    pub fn local_changes(&self) -> DescriptionChanges {
        self.local_changes
    }

    /// Changes of the result description since the previous round.
    pub fn result_changes(&self) -> DescriptionChanges {
        self.result_changes
    }
}

fn stream_at(md: Option<&MediaDescription>, index: usize) -> &StreamDescription {
    match md {
        Some(md) => md.stream(index),
        None => StreamDescription::empty(),
    }
}
