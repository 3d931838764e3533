//! Registration store, middleware composition, and the dispatcher.
//!
//! The [`Router`] holds two layers of state:
//!
//! - the **registration store**, mutated only through registration calls,
//!   all of which take the single exclusive registry lock and raise the
//!   dirty flag
//! - the **composed table**, a derived cache in which every registered
//!   chain is already prefixed with the middleware snapshot; it is never
//!   mutated in place, only rebuilt under exclusive access and swapped
//!
//! Dispatch takes a snapshot of the composed table (rebuilding first when
//! dirty), classifies the update, and executes the matched chains in
//! registration order. Any handler calling abort ends dispatch for that
//! update entirely.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use regex::Regex;
use tracing::{Level, debug, span, trace};

use courier_core::api::BoxedApi;
use courier_core::context::Context;
use courier_core::handler::{BoxedHandler, Handler, HandlerChain, IntoChain};
use courier_core::update::{Message, Payload, Poll, PollKind, Update, UpdateKind};

use crate::error::{RouterError, RouterResult};
use crate::pattern::Pattern;
use crate::predicate::{FileFilter, GeoRange, PollFilter};
use crate::query::{parse_query, split_subject};

type RawChain = Vec<BoxedHandler>;

/// Appends a chain to the bucket with a structurally equal key, creating
/// the bucket on first registration. Bucket order is registration order.
fn bucket_push<K: PartialEq>(table: &mut Vec<(K, Vec<RawChain>)>, key: K, chain: RawChain) {
    if let Some((_, bucket)) = table.iter_mut().find(|(existing, _)| *existing == key) {
        bucket.push(chain);
    } else {
        table.push((key, vec![chain]));
    }
}

/// The registration store. Mutated only under the registry lock.
#[derive(Default)]
struct Registry {
    middlewares: Vec<BoxedHandler>,
    update: Vec<RawChain>,
    text: Vec<RawChain>,
    commands: HashMap<String, RawChain>,
    command_patterns: Vec<(Regex, RawChain)>,
    document: Vec<RawChain>,
    audio: Vec<RawChain>,
    video: Vec<RawChain>,
    photo: Vec<RawChain>,
    sticker: Vec<RawChain>,
    voice: Vec<RawChain>,
    video_note: Vec<RawChain>,
    animation: Vec<RawChain>,
    game: Vec<RawChain>,
    location: Vec<RawChain>,
    live_location: Vec<RawChain>,
    contact: Vec<RawChain>,
    poll: Vec<RawChain>,
    quiz: Vec<RawChain>,
    regular_poll: Vec<RawChain>,
    callback: Vec<RawChain>,
    callback_routes: Vec<(Pattern, RawChain)>,
    channel_post: Vec<RawChain>,
    inline_query: Vec<RawChain>,
    geo_ranges: Vec<(GeoRange, Vec<RawChain>)>,
    file_filters: Vec<(FileFilter, Vec<RawChain>)>,
    poll_filters: Vec<(PollFilter, Vec<RawChain>)>,
    edited_message: Option<RawChain>,
    edited_channel_post: Option<RawChain>,
    my_chat_member: Option<RawChain>,
    chat_member: Option<RawChain>,
    poll_answer: Option<RawChain>,
    pre_checkout: Option<RawChain>,
    shipping: Option<RawChain>,
    successful_payment: Option<RawChain>,
    group_chat_created: Option<RawChain>,
    supergroup_chat_created: Option<RawChain>,
    channel_chat_created: Option<RawChain>,
    new_chat_members: Option<RawChain>,
    left_chat_member: Option<RawChain>,
    new_chat_title: Option<RawChain>,
    new_chat_photo: Option<RawChain>,
    delete_chat_photo: Option<RawChain>,
}

/// The derived, disposable "ready to execute" table: every chain already
/// carries the middleware snapshot taken at composition time.
#[derive(Default)]
struct Composed {
    update: Vec<HandlerChain>,
    text: Vec<HandlerChain>,
    commands: HashMap<String, HandlerChain>,
    command_patterns: Vec<(Regex, HandlerChain)>,
    document: Vec<HandlerChain>,
    audio: Vec<HandlerChain>,
    video: Vec<HandlerChain>,
    photo: Vec<HandlerChain>,
    sticker: Vec<HandlerChain>,
    voice: Vec<HandlerChain>,
    video_note: Vec<HandlerChain>,
    animation: Vec<HandlerChain>,
    game: Vec<HandlerChain>,
    location: Vec<HandlerChain>,
    live_location: Vec<HandlerChain>,
    contact: Vec<HandlerChain>,
    poll: Vec<HandlerChain>,
    quiz: Vec<HandlerChain>,
    regular_poll: Vec<HandlerChain>,
    callback: Vec<HandlerChain>,
    callback_routes: Vec<(Pattern, HandlerChain)>,
    channel_post: Vec<HandlerChain>,
    inline_query: Vec<HandlerChain>,
    geo_ranges: Vec<(GeoRange, Vec<HandlerChain>)>,
    file_filters: Vec<(FileFilter, Vec<HandlerChain>)>,
    poll_filters: Vec<(PollFilter, Vec<HandlerChain>)>,
    edited_message: Option<HandlerChain>,
    edited_channel_post: Option<HandlerChain>,
    my_chat_member: Option<HandlerChain>,
    chat_member: Option<HandlerChain>,
    poll_answer: Option<HandlerChain>,
    pre_checkout: Option<HandlerChain>,
    shipping: Option<HandlerChain>,
    successful_payment: Option<HandlerChain>,
    group_chat_created: Option<HandlerChain>,
    supergroup_chat_created: Option<HandlerChain>,
    channel_chat_created: Option<HandlerChain>,
    new_chat_members: Option<HandlerChain>,
    left_chat_member: Option<HandlerChain>,
    new_chat_title: Option<HandlerChain>,
    new_chat_photo: Option<HandlerChain>,
    delete_chat_photo: Option<HandlerChain>,
}

impl Composed {
    fn build(registry: &Registry) -> Self {
        let wrap = |chain: &RawChain| -> HandlerChain {
            let mut full = Vec::with_capacity(registry.middlewares.len() + chain.len());
            full.extend(registry.middlewares.iter().cloned());
            full.extend(chain.iter().cloned());
            Arc::from(full)
        };
        let wrap_list = |chains: &[RawChain]| chains.iter().map(wrap).collect::<Vec<_>>();
        let wrap_single = |chain: &Option<RawChain>| chain.as_ref().map(wrap);

        Self {
            update: wrap_list(&registry.update),
            text: wrap_list(&registry.text),
            commands: registry
                .commands
                .iter()
                .map(|(name, chain)| (name.clone(), wrap(chain)))
                .collect(),
            command_patterns: registry
                .command_patterns
                .iter()
                .map(|(regex, chain)| (regex.clone(), wrap(chain)))
                .collect(),
            document: wrap_list(&registry.document),
            audio: wrap_list(&registry.audio),
            video: wrap_list(&registry.video),
            photo: wrap_list(&registry.photo),
            sticker: wrap_list(&registry.sticker),
            voice: wrap_list(&registry.voice),
            video_note: wrap_list(&registry.video_note),
            animation: wrap_list(&registry.animation),
            game: wrap_list(&registry.game),
            location: wrap_list(&registry.location),
            live_location: wrap_list(&registry.live_location),
            contact: wrap_list(&registry.contact),
            poll: wrap_list(&registry.poll),
            quiz: wrap_list(&registry.quiz),
            regular_poll: wrap_list(&registry.regular_poll),
            callback: wrap_list(&registry.callback),
            callback_routes: registry
                .callback_routes
                .iter()
                .map(|(pattern, chain)| (pattern.clone(), wrap(chain)))
                .collect(),
            channel_post: wrap_list(&registry.channel_post),
            inline_query: wrap_list(&registry.inline_query),
            geo_ranges: registry
                .geo_ranges
                .iter()
                .map(|(key, bucket)| (*key, wrap_list(bucket)))
                .collect(),
            file_filters: registry
                .file_filters
                .iter()
                .map(|(key, bucket)| (key.clone(), wrap_list(bucket)))
                .collect(),
            poll_filters: registry
                .poll_filters
                .iter()
                .map(|(key, bucket)| (key.clone(), wrap_list(bucket)))
                .collect(),
            edited_message: wrap_single(&registry.edited_message),
            edited_channel_post: wrap_single(&registry.edited_channel_post),
            my_chat_member: wrap_single(&registry.my_chat_member),
            chat_member: wrap_single(&registry.chat_member),
            poll_answer: wrap_single(&registry.poll_answer),
            pre_checkout: wrap_single(&registry.pre_checkout),
            shipping: wrap_single(&registry.shipping),
            successful_payment: wrap_single(&registry.successful_payment),
            group_chat_created: wrap_single(&registry.group_chat_created),
            supergroup_chat_created: wrap_single(&registry.supergroup_chat_created),
            channel_chat_created: wrap_single(&registry.channel_chat_created),
            new_chat_members: wrap_single(&registry.new_chat_members),
            left_chat_member: wrap_single(&registry.left_chat_member),
            new_chat_title: wrap_single(&registry.new_chat_title),
            new_chat_photo: wrap_single(&registry.new_chat_photo),
            delete_chat_photo: wrap_single(&registry.delete_chat_photo),
        }
    }
}

/// The routing and dispatch engine.
///
/// Registration calls take the exclusive registry lock and mark the
/// composed table stale; the next dispatch rebuilds it once before
/// concurrent reads resume. `Router` is `Send + Sync`; registrations and
/// dispatches may interleave freely from any task.
pub struct Router {
    registry: RwLock<Registry>,
    composed: RwLock<Arc<Composed>>,
    dirty: AtomicBool,
    api: Option<BoxedApi>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router with no outbound API client.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            composed: RwLock::new(Arc::new(Composed::default())),
            dirty: AtomicBool::new(false),
            api: None,
        }
    }

    /// Creates an empty router whose contexts carry the given API client.
    pub fn with_api(api: BoxedApi) -> Self {
        Self {
            api: Some(api),
            ..Self::new()
        }
    }

    fn register(&self, mutate: impl FnOnce(&mut Registry)) {
        let mut registry = self.registry.write();
        mutate(&mut registry);
        self.dirty.store(true, Ordering::Release);
    }

    // ─── Registration surface ─────────────────────────────────────────────

    /// Appends global middleware, run ahead of every matched chain.
    pub fn use_middleware(&self, middleware: impl Handler) -> &Self {
        self.register(|r| r.middlewares.push(middleware.into_boxed()));
        self
    }

    /// Registers handlers run for every update before classification.
    pub fn on_update(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.update.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for plain text messages.
    pub fn on_text(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.text.push(handlers.into_chain()));
        self
    }

    /// Registers a text handler guarded by a prefix match.
    pub fn on_text_prefix(&self, prefix: impl Into<String>, handler: impl Handler) -> &Self {
        let prefix = prefix.into();
        let inner = handler.into_boxed();
        self.on_text(BoxedHandler::new(move |ctx: Arc<Context>| {
            let prefix = prefix.clone();
            let inner = inner.clone();
            async move {
                let matched = ctx
                    .message()
                    .and_then(|m| m.text.as_deref())
                    .is_some_and(|text| text.starts_with(&prefix));
                if matched {
                    inner.call(ctx).await;
                }
            }
        }))
    }

    /// Registers a text handler guarded by a regular expression.
    pub fn on_text_regex(&self, pattern: &str, handler: impl Handler) -> RouterResult<&Self> {
        let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidTextPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let inner = handler.into_boxed();
        Ok(self.on_text(BoxedHandler::new(move |ctx: Arc<Context>| {
            let regex = regex.clone();
            let inner = inner.clone();
            async move {
                let matched = ctx
                    .message()
                    .and_then(|m| m.text.as_deref())
                    .is_some_and(|text| regex.is_match(text));
                if matched {
                    inner.call(ctx).await;
                }
            }
        })))
    }

    /// Registers handlers for an exact command name.
    ///
    /// Dispatch tries the exact table first; only when the name is absent
    /// does it fall through to the regex fallback list.
    pub fn on_command(&self, name: impl Into<String>, handlers: impl IntoChain) -> &Self {
        let name = name.into();
        self.register(move |r| {
            r.commands.insert(name, handlers.into_chain());
        });
        self
    }

    /// Registers a command fallback matched by regular expression.
    ///
    /// Fallbacks are tested in registration order and stop at the first
    /// match — unlike callback routes, this list does not fan out.
    pub fn on_command_regex(&self, pattern: &str, handlers: impl IntoChain) -> RouterResult<&Self> {
        let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidCommandPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.register(move |r| r.command_patterns.push((regex, handlers.into_chain())));
        Ok(self)
    }

    /// Registers handlers for document messages.
    pub fn on_document(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.document.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for documents satisfying a [`FileFilter`].
    ///
    /// Field-for-field identical filters accumulate into the same bucket.
    /// Every bucket whose filter matches runs (fan-out), before the generic
    /// document handlers.
    pub fn on_document_matching(&self, filter: FileFilter, handlers: impl IntoChain) -> &Self {
        self.register(move |r| bucket_push(&mut r.file_filters, filter, handlers.into_chain()));
        self
    }

    /// Registers handlers for audio messages.
    pub fn on_audio(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.audio.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for video messages.
    pub fn on_video(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.video.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for photo messages.
    pub fn on_photo(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.photo.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for sticker messages.
    pub fn on_sticker(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.sticker.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for voice messages.
    pub fn on_voice(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.voice.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for video notes.
    pub fn on_video_note(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.video_note.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for animations.
    pub fn on_animation(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.animation.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for game messages.
    pub fn on_game(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.game.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for location messages.
    pub fn on_location(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.location.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for locations inside a [`GeoRange`].
    ///
    /// Identical ranges accumulate into the same bucket. Every bucket whose
    /// range contains the location runs (fan-out), before the live-location
    /// and generic location handlers.
    pub fn on_location_in(&self, range: GeoRange, handlers: impl IntoChain) -> &Self {
        self.register(move |r| bucket_push(&mut r.geo_ranges, range, handlers.into_chain()));
        self
    }

    /// Registers handlers for live locations.
    ///
    /// These run in addition to, not instead of, the generic location
    /// handlers when the location carries a live-location marker.
    pub fn on_live_location(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.live_location.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for contact messages.
    pub fn on_contact(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.contact.push(handlers.into_chain()));
        self
    }

    /// Registers handlers run for every poll, after the sub-kind handlers.
    pub fn on_poll(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.poll.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for quiz polls.
    pub fn on_quiz(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.quiz.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for regular polls.
    pub fn on_regular_poll(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.regular_poll.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for polls satisfying a [`PollFilter`].
    ///
    /// Identical filters accumulate into the same bucket. Every bucket
    /// whose filter matches runs (fan-out), before the quiz/regular and
    /// generic poll handlers.
    pub fn on_poll_matching(&self, filter: PollFilter, handlers: impl IntoChain) -> &Self {
        self.register(move |r| bucket_push(&mut r.poll_filters, filter, handlers.into_chain()));
        self
    }

    /// Registers a callback route by pattern.
    ///
    /// Routes are tested in registration order and **every** matching
    /// route's chain runs for a given subject (fan-out); the generic
    /// callback handlers run afterwards either way.
    pub fn on_callback(&self, pattern: &str, handlers: impl IntoChain) -> RouterResult<&Self> {
        let compiled = Pattern::compile(pattern)?;
        self.register(move |r| r.callback_routes.push((compiled, handlers.into_chain())));
        Ok(self)
    }

    /// Registers handlers run for every callback query, after any routes.
    pub fn on_callback_any(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.callback.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for channel posts.
    pub fn on_channel_post(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.channel_post.push(handlers.into_chain()));
        self
    }

    /// Registers handlers for inline queries.
    pub fn on_inline_query(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.inline_query.push(handlers.into_chain()));
        self
    }

    // Single-chain event slots: registering again replaces the previous chain.

    /// Registers the edited-message chain, replacing any previous one.
    pub fn on_edited_message(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.edited_message = Some(handlers.into_chain()));
        self
    }

    /// Registers the edited-channel-post chain, replacing any previous one.
    pub fn on_edited_channel_post(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.edited_channel_post = Some(handlers.into_chain()));
        self
    }

    /// Registers the own-membership-update chain, replacing any previous one.
    pub fn on_my_chat_member(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.my_chat_member = Some(handlers.into_chain()));
        self
    }

    /// Registers the chat-member-update chain, replacing any previous one.
    pub fn on_chat_member(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.chat_member = Some(handlers.into_chain()));
        self
    }

    /// Registers the poll-answer chain, replacing any previous one.
    pub fn on_poll_answer(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.poll_answer = Some(handlers.into_chain()));
        self
    }

    /// Registers the pre-checkout chain, replacing any previous one.
    pub fn on_pre_checkout(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.pre_checkout = Some(handlers.into_chain()));
        self
    }

    /// Registers the shipping-query chain, replacing any previous one.
    pub fn on_shipping(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.shipping = Some(handlers.into_chain()));
        self
    }

    /// Registers the successful-payment chain, replacing any previous one.
    pub fn on_successful_payment(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.successful_payment = Some(handlers.into_chain()));
        self
    }

    /// Registers the group-chat-created chain, replacing any previous one.
    pub fn on_group_chat_created(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.group_chat_created = Some(handlers.into_chain()));
        self
    }

    /// Registers the supergroup-chat-created chain, replacing any previous one.
    pub fn on_supergroup_chat_created(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.supergroup_chat_created = Some(handlers.into_chain()));
        self
    }

    /// Registers the channel-chat-created chain, replacing any previous one.
    pub fn on_channel_chat_created(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.channel_chat_created = Some(handlers.into_chain()));
        self
    }

    /// Registers the new-chat-members chain, replacing any previous one.
    pub fn on_new_chat_members(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.new_chat_members = Some(handlers.into_chain()));
        self
    }

    /// Registers the left-chat-member chain, replacing any previous one.
    pub fn on_left_chat_member(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.left_chat_member = Some(handlers.into_chain()));
        self
    }

    /// Registers the new-chat-title chain, replacing any previous one.
    pub fn on_new_chat_title(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.new_chat_title = Some(handlers.into_chain()));
        self
    }

    /// Registers the new-chat-photo chain, replacing any previous one.
    pub fn on_new_chat_photo(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.new_chat_photo = Some(handlers.into_chain()));
        self
    }

    /// Registers the chat-photo-deleted chain, replacing any previous one.
    pub fn on_delete_chat_photo(&self, handlers: impl IntoChain) -> &Self {
        self.register(|r| r.delete_chat_photo = Some(handlers.into_chain()));
        self
    }

    // ─── Composition ──────────────────────────────────────────────────────

    /// Returns the composed-table snapshot, rebuilding it first if any
    /// registration ran since the last build.
    ///
    /// The rebuild happens under the exclusive composed lock; concurrent
    /// dispatches queue behind it and then resume shared reads. Rebuilding
    /// is idempotent — building twice without an intervening registration
    /// yields behaviorally identical chains.
    fn snapshot(&self) -> Arc<Composed> {
        if self.dirty.load(Ordering::Acquire) {
            let mut slot = self.composed.write();
            // Re-check under the lock: a concurrent dispatch may have
            // rebuilt while this one waited.
            if self.dirty.swap(false, Ordering::AcqRel) {
                let registry = self.registry.read();
                *slot = Arc::new(Composed::build(&registry));
                trace!("composed table rebuilt");
            }
            return Arc::clone(&slot);
        }
        Arc::clone(&self.composed.read())
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────

    /// Dispatches one update through the matched handler chains.
    ///
    /// Chains execute sequentially on the calling task; concurrency across
    /// updates comes from dispatching different updates on different tasks.
    pub async fn dispatch(&self, update: Update) {
        let update = Arc::new(update);
        let kind = update.kind();
        let span = span!(Level::DEBUG, "dispatch", update_id = update.update_id, kind = ?kind);
        let _enter = span.enter();

        let composed = self.snapshot();
        let ctx = Arc::new(Context::new(Arc::clone(&update), self.api.clone()));

        // Generic update handlers run first, for every update.
        if !run_list(&ctx, &composed.update).await {
            return;
        }

        // Layered service/event chains, before the main category.
        if let Payload::Message(message) = &update.payload
            && !run_message_events(&composed, &ctx, message).await
        {
            return;
        }
        let none = None;
        let layered = match &update.payload {
            Payload::EditedMessage(_) => &composed.edited_message,
            Payload::EditedChannelPost(_) => &composed.edited_channel_post,
            Payload::MyChatMember(_) => &composed.my_chat_member,
            Payload::ChatMember(_) => &composed.chat_member,
            Payload::PollAnswer(_) => &composed.poll_answer,
            Payload::PreCheckoutQuery(_) => &composed.pre_checkout,
            Payload::ShippingQuery(_) => &composed.shipping,
            _ => &none,
        };
        if !run_single(&ctx, layered).await {
            return;
        }

        // The main category.
        match &update.payload {
            Payload::Message(message) => dispatch_message(&composed, &ctx, message).await,
            Payload::CallbackQuery(query) => {
                let subject = query.data.as_deref().unwrap_or("");
                dispatch_callback(&composed, &ctx, subject).await;
            }
            Payload::Poll(poll) => {
                dispatch_poll(&composed, &ctx, poll).await;
            }
            Payload::ChannelPost(_) => {
                run_list(&ctx, &composed.channel_post).await;
            }
            Payload::InlineQuery(_) => {
                run_list(&ctx, &composed.inline_query).await;
            }
            _ => {}
        }
    }
}

/// Runs each chain in order; `false` means the dispatch was aborted.
async fn run_list(ctx: &Arc<Context>, chains: &[HandlerChain]) -> bool {
    for chain in chains {
        Arc::clone(ctx).run(Arc::clone(chain)).await;
        if ctx.is_aborted() {
            debug!("chain aborted, ending dispatch");
            return false;
        }
    }
    true
}

async fn run_single(ctx: &Arc<Context>, chain: &Option<HandlerChain>) -> bool {
    match chain {
        Some(chain) => {
            Arc::clone(ctx).run(Arc::clone(chain)).await;
            !ctx.is_aborted()
        }
        None => true,
    }
}

/// Service markers folded into message payloads, each honoring abort.
async fn run_message_events(composed: &Composed, ctx: &Arc<Context>, message: &Message) -> bool {
    if message.group_chat_created && !run_single(ctx, &composed.group_chat_created).await {
        return false;
    }
    if message.supergroup_chat_created && !run_single(ctx, &composed.supergroup_chat_created).await
    {
        return false;
    }
    if message.channel_chat_created && !run_single(ctx, &composed.channel_chat_created).await {
        return false;
    }
    if !message.new_chat_members.is_empty() && !run_single(ctx, &composed.new_chat_members).await {
        return false;
    }
    if message.left_chat_member.is_some() && !run_single(ctx, &composed.left_chat_member).await {
        return false;
    }
    if message.new_chat_title.is_some() && !run_single(ctx, &composed.new_chat_title).await {
        return false;
    }
    if !message.new_chat_photo.is_empty() && !run_single(ctx, &composed.new_chat_photo).await {
        return false;
    }
    if message.delete_chat_photo && !run_single(ctx, &composed.delete_chat_photo).await {
        return false;
    }
    if message.successful_payment.is_some() && !run_single(ctx, &composed.successful_payment).await
    {
        return false;
    }
    true
}

/// The main message category, resolved by the fixed media precedence.
async fn dispatch_message(composed: &Composed, ctx: &Arc<Context>, message: &Message) {
    match message.kind() {
        UpdateKind::Command => {
            if let Some(name) = message.command() {
                dispatch_command(composed, ctx, name).await;
            }
        }
        UpdateKind::Text => {
            run_list(ctx, &composed.text).await;
        }
        UpdateKind::Document => {
            if let Some(document) = &message.document {
                for (filter, bucket) in &composed.file_filters {
                    if filter.matches(document) && !run_list(ctx, bucket).await {
                        return;
                    }
                }
                run_list(ctx, &composed.document).await;
            }
        }
        UpdateKind::Audio => {
            run_list(ctx, &composed.audio).await;
        }
        UpdateKind::Video => {
            run_list(ctx, &composed.video).await;
        }
        UpdateKind::Photo => {
            run_list(ctx, &composed.photo).await;
        }
        UpdateKind::Sticker => {
            run_list(ctx, &composed.sticker).await;
        }
        UpdateKind::Location => {
            if let Some(location) = &message.location {
                for (range, bucket) in &composed.geo_ranges {
                    if range.contains(location) && !run_list(ctx, bucket).await {
                        return;
                    }
                }
                if location.is_live() && !run_list(ctx, &composed.live_location).await {
                    return;
                }
                run_list(ctx, &composed.location).await;
            }
        }
        UpdateKind::Contact => {
            run_list(ctx, &composed.contact).await;
        }
        UpdateKind::Poll => {
            if let Some(poll) = &message.poll {
                dispatch_poll(composed, ctx, poll).await;
            }
        }
        UpdateKind::Game => {
            run_list(ctx, &composed.game).await;
        }
        UpdateKind::Voice => {
            run_list(ctx, &composed.voice).await;
        }
        UpdateKind::VideoNote => {
            run_list(ctx, &composed.video_note).await;
        }
        UpdateKind::Animation => {
            run_list(ctx, &composed.animation).await;
        }
        _ => {}
    }
}

/// Exact command lookup, then the regex fallback list (first match wins).
///
/// An unmatched command is a no-op: there is no implicit "not found"
/// surfaced back to the platform.
async fn dispatch_command(composed: &Composed, ctx: &Arc<Context>, name: &str) {
    if let Some(chain) = composed.commands.get(name) {
        Arc::clone(ctx).run(Arc::clone(chain)).await;
        return;
    }
    for (regex, chain) in &composed.command_patterns {
        if regex.is_match(name) {
            Arc::clone(ctx).run(Arc::clone(chain)).await;
            return;
        }
    }
    trace!(command = name, "no handler for command");
}

/// Callback dispatch: every matching route fans out, then the generic
/// callback handlers run.
async fn dispatch_callback(composed: &Composed, ctx: &Arc<Context>, subject: &str) {
    let (path, query) = split_subject(subject);
    if let Some(query) = query {
        ctx.set_query(parse_query(query));
    }
    for (pattern, chain) in &composed.callback_routes {
        if let Some(bound) = pattern.matches(path) {
            trace!(pattern = pattern.raw(), "callback route matched");
            ctx.set_params(bound.into_iter().collect());
            Arc::clone(ctx).run(Arc::clone(chain)).await;
            if ctx.is_aborted() {
                return;
            }
        }
    }
    run_list(ctx, &composed.callback).await;
}

/// Poll dispatch: descriptor predicates fan out, then the quiz/regular
/// sub-kind chains, then the generic poll chains.
async fn dispatch_poll(composed: &Composed, ctx: &Arc<Context>, poll: &Poll) {
    for (filter, bucket) in &composed.poll_filters {
        if filter.matches(poll) && !run_list(ctx, bucket).await {
            return;
        }
    }
    let sub_kind = match poll.kind {
        PollKind::Quiz => &composed.quiz,
        PollKind::Regular => &composed.regular_poll,
    };
    if !run_list(ctx, sub_kind).await {
        return;
    }
    run_list(ctx, &composed.poll).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::update::{
        CallbackQuery, Chat, Document, Location, Message, Payload, Poll, User,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn trace_to(log: &Log, name: &str) -> BoxedHandler {
        let log = Arc::clone(log);
        let name = name.to_string();
        BoxedHandler::new(move |_ctx| {
            let log = Arc::clone(&log);
            let name = name.clone();
            async move {
                log.lock().push(name);
            }
        })
    }

    fn abort_handler(log: &Log, name: &str) -> BoxedHandler {
        let log = Arc::clone(log);
        let name = name.to_string();
        BoxedHandler::new(move |ctx: Arc<Context>| {
            let log = Arc::clone(&log);
            let name = name.clone();
            async move {
                log.lock().push(name);
                ctx.abort();
            }
        })
    }

    fn user() -> User {
        User {
            id: 1,
            first_name: "u".into(),
            username: None,
        }
    }

    fn text_update(id: u64, text: &str) -> Update {
        Update::new(
            id,
            Payload::Message(Message::new(id as i64, Chat::private(1)).with_text(text)),
        )
    }

    fn callback_update(id: u64, data: &str) -> Update {
        Update::new(
            id,
            Payload::CallbackQuery(CallbackQuery::new("cq", user(), data)),
        )
    }

    fn location_update(id: u64, lat: f64, lon: f64, live: Option<u32>) -> Update {
        let mut location = Location::new(lat, lon);
        location.live_period = live;
        Update::new(
            id,
            Payload::Message(Message::new(id as i64, Chat::private(1)).with_location(location)),
        )
    }

    fn document_update(id: u64, mime: &str, size: u64) -> Update {
        Update::new(
            id,
            Payload::Message(Message::new(id as i64, Chat::private(1)).with_document(
                Document {
                    file_id: "f".into(),
                    file_name: None,
                    mime_type: Some(mime.into()),
                    file_size: Some(size),
                },
            )),
        )
    }

    fn poll_update(id: u64, kind: PollKind, votes: u32) -> Update {
        Update::new(
            id,
            Payload::Poll(Poll {
                id: "p".into(),
                question: "q".into(),
                options: Vec::new(),
                total_voter_count: votes,
                is_anonymous: false,
                kind,
                allows_multiple_answers: false,
            }),
        )
    }

    #[tokio::test]
    async fn text_chains_run_in_registration_order() {
        let router = Router::new();
        let log = log();
        router.on_text(trace_to(&log, "first"));
        router.on_text(trace_to(&log, "second"));

        router.dispatch(text_update(1, "hello")).await;
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn exact_command_runs_only_its_chain() {
        let router = Router::new();
        let log = log();
        router.on_command("start", trace_to(&log, "start"));
        router.on_command("stop", trace_to(&log, "stop"));
        router.on_text(trace_to(&log, "text"));

        router.dispatch(text_update(1, "/start now")).await;
        // A command never falls through to the text handlers.
        assert_eq!(*log.lock(), vec!["start"]);
    }

    #[tokio::test]
    async fn command_regex_fallback_stops_at_first_match() {
        let router = Router::new();
        let log = log();
        router.on_command("start", trace_to(&log, "exact"));
        router
            .on_command_regex("^admin_", trace_to(&log, "underscore"))
            .unwrap();
        router
            .on_command_regex("^admin", trace_to(&log, "prefix"))
            .unwrap();

        router.dispatch(text_update(1, "/admin_panel")).await;
        assert_eq!(*log.lock(), vec!["underscore"]);
    }

    #[tokio::test]
    async fn unmatched_command_runs_nothing() {
        let router = Router::new();
        let log = log();
        router.on_command("start", trace_to(&log, "start"));
        router
            .on_command_regex("^admin_", trace_to(&log, "fallback"))
            .unwrap();

        // "adminpanel" has no exact entry and does not match "^admin_".
        router.dispatch(text_update(1, "/adminpanel")).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_command_regex_fails_at_registration() {
        let router = Router::new();
        let result = router.on_command_regex("(unclosed", trace_to(&log(), "x"));
        assert!(matches!(
            result,
            Err(RouterError::InvalidCommandPattern { .. })
        ));
    }

    #[tokio::test]
    async fn callback_route_binds_params_and_query() {
        let router = Router::new();
        let log = log();
        let seen = log.clone();
        router
            .on_callback(
                "user/:id/profile",
                BoxedHandler::new(move |ctx: Arc<Context>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push(format!(
                            "id={} tab={}",
                            ctx.param("id").unwrap_or_default(),
                            ctx.query("tab").unwrap_or_default()
                        ));
                    }
                }),
            )
            .unwrap();
        router
            .on_callback("user/:id/settings", trace_to(&log, "other-route"))
            .unwrap();

        router
            .dispatch(callback_update(1, "user/42/profile?tab=settings"))
            .await;
        assert_eq!(*log.lock(), vec!["id=42 tab=settings"]);
    }

    #[tokio::test]
    async fn callback_routes_fan_out_to_every_match() {
        let router = Router::new();
        let log = log();
        router
            .on_callback("user/:id", trace_to(&log, "by-user"))
            .unwrap();
        router
            .on_callback(":kind/42", trace_to(&log, "by-kind"))
            .unwrap();
        router.on_callback_any(trace_to(&log, "generic"));

        router.dispatch(callback_update(1, "user/42")).await;
        assert_eq!(*log.lock(), vec!["by-user", "by-kind", "generic"]);
    }

    #[tokio::test]
    async fn overlapping_ranges_fan_out() {
        let router = Router::new();
        let log = log();
        router.on_location_in(GeoRange::new(0.0, 50.0, 0.0, 50.0), trace_to(&log, "wide"));
        router.on_location_in(
            GeoRange::new(10.0, 20.0, 10.0, 20.0),
            trace_to(&log, "narrow"),
        );
        router.on_location_in(
            GeoRange::new(30.0, 40.0, 30.0, 40.0),
            trace_to(&log, "elsewhere"),
        );
        router.on_location(trace_to(&log, "generic"));

        router.dispatch(location_update(1, 15.0, 15.0, None)).await;
        assert_eq!(*log.lock(), vec!["wide", "narrow", "generic"]);
    }

    #[tokio::test]
    async fn identical_range_keys_accumulate_into_one_bucket() {
        let router = Router::new();
        let log = log();
        let range = GeoRange::new(0.0, 10.0, 0.0, 10.0);
        router.on_location_in(range, trace_to(&log, "first"));
        router.on_location_in(range, trace_to(&log, "second"));

        router.dispatch(location_update(1, 5.0, 5.0, None)).await;
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn live_location_runs_in_addition_to_generic() {
        let router = Router::new();
        let log = log();
        router.on_live_location(trace_to(&log, "live"));
        router.on_location(trace_to(&log, "generic"));

        router
            .dispatch(location_update(1, 1.0, 1.0, Some(60)))
            .await;
        assert_eq!(*log.lock(), vec!["live", "generic"]);

        log.lock().clear();
        router.dispatch(location_update(2, 1.0, 1.0, None)).await;
        assert_eq!(*log.lock(), vec!["generic"]);
    }

    #[tokio::test]
    async fn abort_in_middleware_skips_the_handler() {
        let router = Router::new();
        let log = log();
        router.use_middleware(abort_handler(&log, "gate"));
        router.on_text(trace_to(&log, "handler"));

        router.dispatch(text_update(1, "hello")).await;
        assert_eq!(*log.lock(), vec!["gate"]);
    }

    #[tokio::test]
    async fn abort_ends_dispatch_across_categories() {
        let router = Router::new();
        let log = log();
        router.on_poll_matching(
            PollFilter {
                kind: Some(PollKind::Quiz),
                min_votes: 0,
                is_anonymous: false,
                allows_multiple: false,
            },
            abort_handler(&log, "filter"),
        );
        router.on_quiz(trace_to(&log, "quiz"));
        router.on_poll(trace_to(&log, "poll"));

        router.dispatch(poll_update(1, PollKind::Quiz, 0)).await;
        assert_eq!(*log.lock(), vec!["filter"]);
    }

    #[tokio::test]
    async fn middleware_wraps_every_chain() {
        let router = Router::new();
        let log = log();
        router.use_middleware(trace_to(&log, "mw"));
        router.on_text(trace_to(&log, "a"));
        router.on_text(trace_to(&log, "b"));

        router.dispatch(text_update(1, "hello")).await;
        assert_eq!(*log.lock(), vec!["mw", "a", "mw", "b"]);
    }

    #[tokio::test]
    async fn composition_is_idempotent_across_dispatches() {
        let router = Router::new();
        let log = log();
        router.use_middleware(trace_to(&log, "mw"));
        router.on_text(trace_to(&log, "handler"));

        router.dispatch(text_update(1, "one")).await;
        let first = log.lock().clone();
        router.dispatch(text_update(2, "two")).await;
        let both = log.lock().clone();

        assert_eq!(both.len(), first.len() * 2);
        assert_eq!(&both[..first.len()], &first[..]);
        assert_eq!(&both[first.len()..], &first[..]);
    }

    #[tokio::test]
    async fn registration_invalidates_the_composed_cache() {
        let router = Router::new();
        let log = log();
        router.on_text(trace_to(&log, "old"));

        router.dispatch(text_update(1, "one")).await;
        router.on_text(trace_to(&log, "new"));
        router.dispatch(text_update(2, "two")).await;

        assert_eq!(*log.lock(), vec!["old", "old", "new"]);
    }

    #[tokio::test]
    async fn document_filters_run_before_generic_handlers() {
        let router = Router::new();
        let log = log();
        router.on_document_matching(FileFilter::mime("application/pdf"), trace_to(&log, "pdf"));
        router.on_document_matching(FileFilter::mime("image/png"), trace_to(&log, "png"));
        router.on_document_matching(
            FileFilter::mime("application/pdf").max_size(10),
            trace_to(&log, "small-pdf"),
        );
        router.on_document(trace_to(&log, "generic"));

        router
            .dispatch(document_update(1, "application/pdf", 100))
            .await;
        assert_eq!(*log.lock(), vec!["pdf", "generic"]);
    }

    #[tokio::test]
    async fn poll_layering_runs_concrete_before_generic() {
        let router = Router::new();
        let log = log();
        router.on_poll_matching(
            PollFilter {
                kind: None,
                min_votes: 5,
                is_anonymous: false,
                allows_multiple: false,
            },
            trace_to(&log, "popular"),
        );
        router.on_quiz(trace_to(&log, "quiz"));
        router.on_regular_poll(trace_to(&log, "regular"));
        router.on_poll(trace_to(&log, "poll"));

        router.dispatch(poll_update(1, PollKind::Quiz, 9)).await;
        assert_eq!(*log.lock(), vec!["popular", "quiz", "poll"]);

        log.lock().clear();
        router.dispatch(poll_update(2, PollKind::Regular, 0)).await;
        assert_eq!(*log.lock(), vec!["regular", "poll"]);
    }

    #[tokio::test]
    async fn service_events_run_before_the_main_category() {
        let router = Router::new();
        let log = log();
        router.on_new_chat_members(trace_to(&log, "joined"));
        router.on_text(trace_to(&log, "text"));
        router.on_update(trace_to(&log, "update"));

        let mut message = Message::new(1, Chat::private(1)).with_text("welcome");
        message.new_chat_members.push(user());
        router
            .dispatch(Update::new(1, Payload::Message(message)))
            .await;
        assert_eq!(*log.lock(), vec!["update", "joined", "text"]);
    }

    #[tokio::test]
    async fn text_prefix_and_regex_guards() {
        let router = Router::new();
        let log = log();
        router.on_text_prefix("!", trace_to(&log, "bang"));
        router.on_text_regex("ping$", trace_to(&log, "ping")).unwrap();

        router.dispatch(text_update(1, "!ping")).await;
        assert_eq!(*log.lock(), vec!["bang", "ping"]);

        log.lock().clear();
        router.dispatch(text_update(2, "pong")).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_dispatches_count_every_update_once() {
        let router = Arc::new(Router::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        router.on_update(BoxedHandler::new(move |_ctx| {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let mut tasks = Vec::new();
        for id in 0..64u64 {
            let router = Arc::clone(&router);
            tasks.push(tokio::spawn(async move {
                router.dispatch(text_update(id, "hello")).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }
}
