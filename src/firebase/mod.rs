pub mod auth;
pub mod firestore;
pub mod messaging;
