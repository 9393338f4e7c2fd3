//! Passkey (`WebAuthn`) ceremonies and their persisted state.

mod config;
mod models;
mod repo;
mod service;

pub use config::PasskeyConfig;
pub use models::{CeremonyChallenge, CeremonyType, PasskeyCredential};
pub use repo::{ChallengeRepo, CredentialRepo};
pub use service::{
    AuthenticationCeremonyError, PasskeyService, RegistrationCeremonyError,
};
