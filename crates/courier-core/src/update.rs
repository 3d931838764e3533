//! Update model for the Courier router.
//!
//! An [`Update`] is one inbound event from the chat platform. Exactly one
//! [`Payload`] variant is populated per update; the `update_id` is a
//! monotonically increasing sequence identifier assigned by the platform and
//! used by the ingestion source for resumption.
//!
//! Classification into an [`UpdateKind`] follows a fixed precedence order:
//! concrete categories are checked before generic ones, so a message that is
//! both a command and plain text is a command, and a message carrying a
//! document never classifies as text.

use serde::{Deserialize, Serialize};

/// One inbound event from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing sequence identifier.
    pub update_id: u64,
    /// The populated payload variant.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Update {
    /// Creates an update with the given sequence identifier and payload.
    pub fn new(update_id: u64, payload: Payload) -> Self {
        Self { update_id, payload }
    }

    /// Resolves the update's dispatch category.
    ///
    /// Message payloads defer to [`Message::kind`] for the media precedence
    /// order; every other payload variant maps to exactly one kind.
    pub fn kind(&self) -> UpdateKind {
        match &self.payload {
            Payload::Message(message) => message.kind(),
            Payload::EditedMessage(_) => UpdateKind::EditedMessage,
            Payload::ChannelPost(_) => UpdateKind::ChannelPost,
            Payload::EditedChannelPost(_) => UpdateKind::EditedChannelPost,
            Payload::InlineQuery(_) => UpdateKind::InlineQuery,
            Payload::CallbackQuery(_) => UpdateKind::CallbackQuery,
            Payload::Poll(_) => UpdateKind::Poll,
            Payload::PollAnswer(_) => UpdateKind::PollAnswer,
            Payload::MyChatMember(_) => UpdateKind::MyChatMember,
            Payload::ChatMember(_) => UpdateKind::ChatMember,
            Payload::ShippingQuery(_) => UpdateKind::ShippingQuery,
            Payload::PreCheckoutQuery(_) => UpdateKind::PreCheckoutQuery,
        }
    }

    /// Returns the message payload, if this update carries one.
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// The tagged union of payload kinds an update can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// A new incoming message of any media kind.
    Message(Message),
    /// A new version of a previously sent message.
    EditedMessage(Message),
    /// A new post in a channel.
    ChannelPost(Message),
    /// A new version of a channel post.
    EditedChannelPost(Message),
    /// An incoming inline query.
    InlineQuery(InlineQuery),
    /// An incoming callback query from an inline button.
    CallbackQuery(CallbackQuery),
    /// A new poll state (stopped or vote counts changed).
    Poll(Poll),
    /// A user changed their answer in a non-anonymous poll.
    PollAnswer(PollAnswer),
    /// The bot's own chat member status was updated.
    MyChatMember(ChatMemberUpdate),
    /// Another chat member's status was updated.
    ChatMember(ChatMemberUpdate),
    /// An incoming shipping query.
    ShippingQuery(ShippingQuery),
    /// An incoming pre-checkout query.
    PreCheckoutQuery(PreCheckoutQuery),
}

/// The dispatch category an update resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Command,
    Text,
    Document,
    Audio,
    Video,
    Photo,
    Sticker,
    Location,
    Contact,
    Poll,
    Game,
    Voice,
    VideoNote,
    Animation,
    CallbackQuery,
    PollAnswer,
    InlineQuery,
    ChannelPost,
    EditedMessage,
    EditedChannelPost,
    MyChatMember,
    ChatMember,
    ShippingQuery,
    PreCheckoutQuery,
    /// No category claimed the update (e.g. a pure service message).
    Unclassified,
}

/// A user on the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// The flavor of chat a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A conversation the bot participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(default)]
    pub title: Option<String>,
}

impl Chat {
    /// Convenience constructor for a private chat.
    pub fn private(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Private,
            title: None,
        }
    }
}

/// A message of any media kind, including the service markers the platform
/// folds into message objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub audio: Option<Audio>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
    #[serde(default)]
    pub voice: Option<Voice>,
    #[serde(default)]
    pub video_note: Option<VideoNote>,
    #[serde(default)]
    pub animation: Option<Animation>,
    #[serde(default)]
    pub game: Option<Game>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub poll: Option<Poll>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    #[serde(default)]
    pub left_chat_member: Option<User>,
    #[serde(default)]
    pub new_chat_title: Option<String>,
    #[serde(default)]
    pub new_chat_photo: Vec<PhotoSize>,
    #[serde(default)]
    pub delete_chat_photo: bool,
    #[serde(default)]
    pub group_chat_created: bool,
    #[serde(default)]
    pub supergroup_chat_created: bool,
    #[serde(default)]
    pub channel_chat_created: bool,
}

impl Message {
    /// Creates an empty message in the given chat.
    pub fn new(message_id: i64, chat: Chat) -> Self {
        Self {
            message_id,
            chat,
            from: None,
            text: None,
            document: None,
            audio: None,
            video: None,
            photo: Vec::new(),
            sticker: None,
            voice: None,
            video_note: None,
            animation: None,
            game: None,
            location: None,
            contact: None,
            poll: None,
            successful_payment: None,
            new_chat_members: Vec::new(),
            left_chat_member: None,
            new_chat_title: None,
            new_chat_photo: Vec::new(),
            delete_chat_photo: false,
            group_chat_created: false,
            supergroup_chat_created: false,
            channel_chat_created: false,
        }
    }

    /// Sets the text body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attaches a document.
    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Attaches a location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches a contact card.
    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Attaches a poll.
    pub fn with_poll(mut self, poll: Poll) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Returns the command name if the text body is a `/command`.
    ///
    /// The name runs from the slash to the first whitespace or `@` (a
    /// trailing `@botname` is addressing, not part of the name). A bare `/`
    /// is not a command.
    pub fn command(&self) -> Option<&str> {
        let rest = self.text.as_deref()?.strip_prefix('/')?;
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '@')
            .unwrap_or(rest.len());
        let name = &rest[..end];
        if name.is_empty() { None } else { Some(name) }
    }

    /// Returns the text following the command name, trimmed, if any.
    pub fn command_args(&self) -> Option<&str> {
        self.command()?;
        let text = self.text.as_deref()?;
        let (_, args) = text.split_once(char::is_whitespace)?;
        let args = args.trim();
        if args.is_empty() { None } else { Some(args) }
    }

    /// Returns `true` if the text body is a command.
    pub fn is_command(&self) -> bool {
        self.command().is_some()
    }

    /// Resolves the media precedence order for message payloads.
    ///
    /// Commands win over plain text; every media kind is checked before the
    /// fallback. A message carrying only service markers (member changes,
    /// chat photo updates, ...) resolves to [`UpdateKind::Unclassified`].
    pub fn kind(&self) -> UpdateKind {
        if self.is_command() {
            UpdateKind::Command
        } else if self.text.as_deref().is_some_and(|t| !t.is_empty()) {
            UpdateKind::Text
        } else if self.document.is_some() {
            UpdateKind::Document
        } else if self.audio.is_some() {
            UpdateKind::Audio
        } else if self.video.is_some() {
            UpdateKind::Video
        } else if !self.photo.is_empty() {
            UpdateKind::Photo
        } else if self.sticker.is_some() {
            UpdateKind::Sticker
        } else if self.location.is_some() {
            UpdateKind::Location
        } else if self.contact.is_some() {
            UpdateKind::Contact
        } else if self.poll.is_some() {
            UpdateKind::Poll
        } else if self.game.is_some() {
            UpdateKind::Game
        } else if self.voice.is_some() {
            UpdateKind::Voice
        } else if self.video_note.is_some() {
            UpdateKind::VideoNote
        } else if self.animation.is_some() {
            UpdateKind::Animation
        } else {
            UpdateKind::Unclassified
        }
    }
}

/// A generic file attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// An audio track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audio {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A video clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub duration: u32,
}

/// One size variant of a photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// A sticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

/// A voice note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
}

/// A round video note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoNote {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
}

/// A soundless looping clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animation {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
}

/// A game attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub title: String,
}

/// A geographic point, optionally shared live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Present only while the location is being updated live.
    #[serde(default)]
    pub live_period: Option<u32>,
}

impl Location {
    /// Creates a static location.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            live_period: None,
        }
    }

    /// Returns `true` if this location carries a live-location marker.
    pub fn is_live(&self) -> bool {
        self.live_period.is_some()
    }
}

/// A shared contact card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    pub first_name: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// The sub-kind of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollKind {
    Quiz,
    Regular,
}

/// One answer option of a poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub voter_count: u32,
}

/// A poll, either standalone or attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub total_voter_count: u32,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(rename = "type")]
    pub kind: PollKind,
    #[serde(default)]
    pub allows_multiple_answers: bool,
}

/// A user's answer in a non-anonymous poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollAnswer {
    pub poll_id: String,
    pub user: User,
    #[serde(default)]
    pub option_ids: Vec<u32>,
}

/// A callback query fired by an inline button.
///
/// The `data` field is the callback subject: `<path>[?<query>]`, matched
/// against registered callback routes by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Box<Message>>,
    #[serde(default)]
    pub data: Option<String>,
}

impl CallbackQuery {
    /// Creates a callback query with the given subject.
    pub fn new(id: impl Into<String>, from: User, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from,
            message: None,
            data: Some(data.into()),
        }
    }
}

/// An inline query typed after the bot's username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
    #[serde(default)]
    pub offset: String,
}

/// A chat member status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMemberUpdate {
    pub chat: Chat,
    pub from: User,
    pub old_status: String,
    pub new_status: String,
}

/// A shipping query from a payment flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingQuery {
    pub id: String,
    pub from: User,
    pub invoice_payload: String,
}

/// A pre-checkout query from a payment flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: u64,
    pub invoice_payload: String,
}

/// A completed payment attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessfulPayment {
    pub currency: String,
    pub total_amount: u64,
    pub invoice_payload: String,
}
