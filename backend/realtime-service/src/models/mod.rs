pub mod conversation;
pub mod message;
pub mod notification;
pub mod user;

pub use conversation::{Conversation, ParticipantSettings, SettingsUpdate};
pub use message::{
    FileAttachment, Message, MessageKind, MessageStatus, NewMessage, Reaction, Receipt,
};
pub use notification::{
    Notification, NotificationContext, NotificationStats, NotificationType, NotifyOutcome,
    SuppressReason,
};
pub use user::UserProfile;
