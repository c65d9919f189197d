pub mod attachments;
pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod moderation;
pub mod notify;
pub mod platform;
pub mod rooms;
pub mod server;
pub mod session;
pub mod subscription;

mod appresult;

pub use appresult::{AppError, AppResult};
pub use attachments::{AttachmentTransfer, FileUpload};
pub use error::{AuthError, Error, Result, ValidationError};
pub use messages::MessageStream;
pub use moderation::ModerationConsole;
pub use notify::{Notice, Notifier};
pub use platform::{Platform, PlatformConfig};
pub use rooms::RoomDirectory;
pub use session::{AccessContext, SessionStore};
