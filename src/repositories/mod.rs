// src/repositories/mod.rs
//
// Explicit per-entity data access. Each repository owns a pool handle and
// speaks plain SQL; handlers never touch sqlx directly.
pub mod chats;
pub mod messages;
pub mod profiles;
pub mod sessions;
pub mod users;

pub use chats::ChatRepository;
pub use messages::ChatMessageRepository;
pub use profiles::TripProfileRepository;
pub use sessions::AuthSessionRepository;
pub use users::UserRepository;
