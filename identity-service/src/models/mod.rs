pub mod account;
pub mod permission_override;
pub mod registration_challenge;
pub mod role;
pub mod webauthn_credential;

pub use account::{normalize_username, Account, AccountRow, NewAccount};
pub use permission_override::{
    AccountOverride, AccountOverrideRow, OverrideMode, UnknownOverrideMode,
};
pub use registration_challenge::{
    ChallengeSelector, ChallengeStatus, NewRegistrationChallenge, RegistrationChallenge,
    RegistrationChallengeRow,
};
pub use role::{Permission, Role, RolePolicyEntry};
pub use webauthn_credential::{
    CredentialUsage, NewWebAuthnCredential, WebAuthnCredential, WebAuthnCredentialRow,
};
