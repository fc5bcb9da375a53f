#![doc = include_str!("../README.md")]

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod postback;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod session;
pub mod signer;
pub mod state;
pub mod store;
pub mod traits;
pub mod types;
pub mod validator;

// Re-exports for convenient access
pub use catalog::{Creative, InMemoryCatalog, Placement};
pub use config::RewardConfig;
pub use error::Error;
pub use events::{Ack, EventProcessor, EventReport};
#[cfg(feature = "http-postback")]
pub use postback::HttpTransport;
pub use postback::{
    DispatchReport, Dispatcher, DispatcherHandle, PostbackJob, PostbackQueue, PostbackReceiver,
    RetryPolicy, RewardNotification, RewardStatus,
};
pub use service::RewardService;
pub use session::{Ad, SessionIssuer, SessionToken};
pub use signer::{Signer, SigningKey};
pub use state::Transition;
pub use store::{CasOutcome, InMemorySessionStore, SessionRecord};
pub use traits::{BoxError, Catalog, PostbackTransport, SessionStore};
pub use types::{CreativeId, EventType, PlacementId, SessionId, SessionState, UserId};
pub use validator::{EventTicket, SessionValidator};
