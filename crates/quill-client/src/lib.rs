pub mod backend;
pub mod cache;
pub mod channel;
pub mod chat_log;
pub mod color;
pub mod context;
pub mod cursors;
pub mod error;
pub mod session;
pub mod store;
pub mod transport;

pub use backend::{Backend, HttpBackend};
pub use cache::DocumentCache;
pub use channel::{ChannelStatus, CollabEvent, CollaborationChannel, Subscription};
pub use context::{AppContext, ClientConfig};
pub use error::{ClientError, Result};
pub use session::{AuthUser, Session, SessionStore};
pub use store::DocumentStore;
