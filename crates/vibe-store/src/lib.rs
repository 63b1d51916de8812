pub mod collection;
pub mod error;
pub mod file;
pub mod queries;
pub mod read_status;

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use vibe_types::models::{Channel, Message, User};

pub use collection::{Collection, RetryPolicy};
pub use error::StoreError;
pub use file::{JsonFile, Record};
pub use read_status::ReadStatusCoordinator;

pub const USERS_FILE: &str = "users.json";
pub const CHANNELS_FILE: &str = "channels.json";
pub const CHANNEL_MESSAGES_FILE: &str = "messages.json";
pub const DIRECT_MESSAGES_FILE: &str = "direct_messages.json";
pub const READ_STATUS_FILE: &str = "user_read_status.json";

/// The five persisted collections, one JSON file each under `dir`.
pub struct Store {
    dir: PathBuf,
    users: Collection<User>,
    channels: Collection<Channel>,
    channel_messages: Collection<Message>,
    direct_messages: Collection<Message>,
    read_status: ReadStatusCoordinator,
}

impl Store {
    /// Build the store without touching the disk.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            users: Collection::new("users", dir.join(USERS_FILE), RetryPolicy::once()),
            channels: Collection::new("channels", dir.join(CHANNELS_FILE), RetryPolicy::once()),
            channel_messages: Collection::new(
                "channel messages",
                dir.join(CHANNEL_MESSAGES_FILE),
                RetryPolicy::once(),
            ),
            direct_messages: Collection::new(
                "direct messages",
                dir.join(DIRECT_MESSAGES_FILE),
                RetryPolicy::once(),
            ),
            read_status: ReadStatusCoordinator::new(dir.join(READ_STATUS_FILE)),
        }
    }

    /// Create the data directory and seed any collection file that is missing.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).await.map_err(StoreError::io(dir))?;

        let store = Self::new(dir);
        store.users.initialize().await?;
        store.channels.initialize().await?;
        store.channel_messages.initialize().await?;
        store.direct_messages.initialize().await?;
        store.read_status.collection().initialize().await?;

        info!("Data store opened at {}", dir.display());
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_status(&self) -> &ReadStatusCoordinator {
        &self.read_status
    }
}
