// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! External collaborator seams: non-volatile blob storage, authorization
//! sessions and the loaded-key store.
//!
//! The core engine only ever sees these narrow traits. Session bookkeeping
//! (OIAP/OSAP nonce rolling, HMAC checks) and key loading live behind them.

use crate::tpm12proto::KeyUsage;
use crate::tpm12proto::SigScheme;
use crate::tpm12proto::TpmDigest;
use crate::tpm12proto::TpmNonce;
use crate::tpm12proto::TpmSecret;
use thiserror::Error;

/// Failure inside the NV storage backend itself (not a format error).
#[derive(Debug, Error)]
#[error("non-volatile storage access failed")]
pub struct NvStorageError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// Named-blob NV storage, keyed by TPM instance number.
///
/// Instances are independent; `tpm_number` only namespaces the store.
pub trait NvStorage: Send {
    /// Load a named blob. `Ok(None)` means the blob does not exist, which
    /// callers treat as a first-boot condition rather than an error.
    fn load_named_blob(
        &mut self,
        tpm_number: u32,
        name: &str,
    ) -> Result<Option<Vec<u8>>, NvStorageError>;

    fn store_named_blob(
        &mut self,
        tpm_number: u32,
        name: &str,
        data: &[u8],
    ) -> Result<(), NvStorageError>;

    fn delete_named_blob(
        &mut self,
        tpm_number: u32,
        name: &str,
        must_exist: bool,
    ) -> Result<(), NvStorageError>;
}

/// Incoming authorization trailer of an AUTH1 command.
#[derive(Debug, Clone, Copy)]
pub struct AuthIn {
    pub auth_handle: u32,
    pub nonce_odd: TpmNonce,
    pub continue_auth_session: bool,
    pub auth: TpmDigest,
}

/// Outgoing authorization trailer of an AUTH1 response.
#[derive(Debug, Clone, Copy)]
pub struct AuthOut {
    pub nonce_even: TpmNonce,
    pub continue_auth_session: bool,
    pub res_auth: TpmDigest,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no free authorization session slots")]
    NoResources,
    #[error("unknown authorization session handle {0:#010x}")]
    InvalidHandle(u32),
    #[error("authorization HMAC validation failed")]
    AuthFail,
}

/// Authorization-session collaborator (OIAP/OSAP/DSAP lifecycle).
pub trait AuthSessions: Send {
    /// Create a fresh OIAP session, returning its handle and nonceEven.
    fn open_oiap(&mut self) -> Result<(u32, TpmNonce), SessionError>;

    /// Validate the AUTH1 trailer of a command against `secret` and the
    /// input parameter digest, rolling the session nonces on success.
    fn validate_auth1(
        &mut self,
        secret: &TpmSecret,
        param_digest: &TpmDigest,
        auth: &AuthIn,
    ) -> Result<AuthOut, SessionError>;

    /// Drop a session. Called on validation failure and on
    /// `continueAuthSession == FALSE`.
    fn terminate(&mut self, handle: u32);
}

/// A key currently loaded in the TPM, as seen by this core.
pub struct LoadedKey {
    pub usage: KeyUsage,
    pub scheme: SigScheme,
    pub usage_auth: TpmSecret,
    pub key: rsa::RsaPrivateKey,
}

/// Loaded-key collaborator; key loading/eviction is out of scope.
pub trait KeyStore: Send {
    fn lookup(&self, handle: u32) -> Option<&LoadedKey>;
}
