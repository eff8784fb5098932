// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 1.2 core state engine: persistent state, ordinal auditing and the
//! command processors built on them.
//!
//! This crate implements the stateful heart of a software TPM 1.2 - the
//! permanent flags/data model, the integrity-checked NV persistence
//! protocol with rollback, the ordinal audit machinery and the command
//! dispatch template - behind narrow collaborator traits for NV storage,
//! authorization sessions and loaded keys ([`platform`]). Transport
//! framing, the key hierarchy and the remaining ordinal set live outside.
//!
//! Each [`TpmInstance`] is fully independent; `tpm_number` only namespaces
//! blobs inside the storage backend.

pub mod audit;
mod commands;
pub mod marshal;
pub mod permanent;
pub mod platform;
pub mod tpm12proto;

use crate::commands::CommandContext;
use crate::commands::CommandOutput;
use crate::permanent::NvLoadOutcome;
use crate::permanent::PermanentStateError;
use crate::permanent::TpmPermanentState;
use crate::permanent::TPM_PERMANENT_ALL_NAME;
use crate::platform::AuthSessions;
use crate::platform::KeyStore;
use crate::platform::NvStorage;
use crate::tpm12proto::new_u16_be;
use crate::tpm12proto::new_u32_be;
use crate::tpm12proto::sha1_digest;
use crate::tpm12proto::RequestHeader;
use crate::tpm12proto::ResponseHeader;
use crate::tpm12proto::StartupType;
use crate::tpm12proto::TpmDigest;
use crate::tpm12proto::RESPONSE_HEADER_SIZE;
use crate::tpm12proto::TPM_BADTAG;
use crate::tpm12proto::TPM_BAD_ORDINAL;
use crate::tpm12proto::TPM_BAD_PARAM_SIZE;
use crate::tpm12proto::TPM_FAIL;
use crate::tpm12proto::TPM_SUCCESS;
use crate::tpm12proto::TPM_TAG_RQU_AUTH1_COMMAND;
use crate::tpm12proto::TPM_TAG_RQU_COMMAND;
use crate::tpm12proto::TPM_TAG_RSP_AUTH1_COMMAND;
use crate::tpm12proto::TPM_TAG_RSP_COMMAND;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// AUTH1 trailer: handle (4) + nonceOdd (20) + continue (1) + HMAC (20).
const AUTH_TRAILER_SIZE: usize = 45;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct TpmError(#[from] TpmErrorKind);

#[derive(Debug, Error)]
pub enum TpmErrorKind {
    #[error("failed to restore permanent state")]
    RestorePermanentState(#[source] PermanentStateError),
    #[error("failed to persist permanent state")]
    PersistPermanentState(#[source] PermanentStateError),
    #[error("audit status lookup for an unprocessed ordinal")]
    AuditStatusLookup(#[source] audit::UnknownOrdinal),
}

/// One emulated TPM 1.2 instance.
pub struct TpmInstance {
    tpm_number: u32,

    // Runtime glue
    storage: Box<dyn NvStorage>,
    sessions: Box<dyn AuthSessions>,
    keys: Box<dyn KeyStore>,

    // Persisted state
    permanent: TpmPermanentState,

    // Volatile (STClear) state
    audit_digest: TpmDigest,

    /// Set once a fatal persistence error occurs. Every subsequent command
    /// answers `TPM_FAIL` until the instance is torn down.
    failure_mode: bool,
}

impl TpmInstance {
    /// Restore an instance from NV storage, or manufacture and persist a
    /// fresh one when no state blob exists yet.
    pub fn new(
        tpm_number: u32,
        storage: Box<dyn NvStorage>,
        sessions: Box<dyn AuthSessions>,
        keys: Box<dyn KeyStore>,
    ) -> Result<Self, TpmError> {
        let mut instance = Self {
            tpm_number,
            storage,
            sessions,
            keys,
            permanent: TpmPermanentState::manufacture(),
            audit_digest: [0; 20],
            failure_mode: false,
        };
        match instance
            .permanent
            .nv_load(instance.storage.as_mut(), tpm_number)
            .map_err(TpmErrorKind::RestorePermanentState)?
        {
            NvLoadOutcome::Loaded => {}
            NvLoadOutcome::FirstBoot => {
                tracing::info!(tpm_number, "manufacturing new TPM instance");
                instance
                    .permanent
                    .nv_store(instance.storage.as_mut(), tpm_number, true, TPM_SUCCESS)
                    .map_err(TpmErrorKind::PersistPermanentState)?;
            }
        }
        Ok(instance)
    }

    /// Apply TPM_Startup semantics to volatile state. `Clear` discards the
    /// STClear audit digest; `State` and `Deactivated` preserve it.
    pub fn startup(&mut self, startup_type: StartupType) {
        tracing::info!(tpm_number = self.tpm_number, ?startup_type, "startup");
        if startup_type == StartupType::Clear {
            self.audit_digest = [0; 20];
        }
    }

    /// Whether a fatal error has put the instance into failure mode.
    pub fn is_failed(&self) -> bool {
        self.failure_mode
    }

    /// Destroy the instance and erase its state blob from NV storage. The
    /// next [`Self::new`] for this `tpm_number` manufactures from scratch.
    pub fn teardown(mut self) -> Result<(), TpmError> {
        tracing::info!(tpm_number = self.tpm_number, "tearing down TPM instance");
        self.storage
            .delete_named_blob(self.tpm_number, TPM_PERMANENT_ALL_NAME, false)
            .map_err(|err| {
                TpmErrorKind::PersistPermanentState(PermanentStateError::Storage(err))
            })?;
        Ok(())
    }

    /// Running audit digest; all zeroes while no audit session is open.
    pub fn audit_digest(&self) -> &TpmDigest {
        &self.audit_digest
    }

    /// Execute one marshalled command and produce its marshalled response.
    /// A fatal persistence error flips the instance into failure mode; the
    /// caller always gets a well-formed response either way.
    pub fn process_command(&mut self, request: &[u8]) -> Vec<u8> {
        if self.failure_mode {
            return error_response(TPM_FAIL);
        }
        match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    tpm_number = self.tpm_number,
                    error = &err as &dyn std::error::Error,
                    "fatal error, entering failure mode"
                );
                self.failure_mode = true;
                error_response(TPM_FAIL)
            }
        }
    }

    fn dispatch(&mut self, request: &[u8]) -> Result<Vec<u8>, TpmError> {
        // Header and framing validation.
        let Ok((header, body)) = RequestHeader::read_from_prefix(request) else {
            return Ok(error_response(TPM_BAD_PARAM_SIZE));
        };
        let tag = header.tag.get();
        if !matches!(tag, TPM_TAG_RQU_COMMAND | TPM_TAG_RQU_AUTH1_COMMAND) {
            return Ok(error_response(TPM_BADTAG));
        }
        if header.param_size.get() as usize != request.len() {
            return Ok(error_response(TPM_BAD_PARAM_SIZE));
        }

        // Split off the authorization trailer if the tag carries one.
        let (params, auth) = if tag == TPM_TAG_RQU_AUTH1_COMMAND {
            let Some(param_len) = body.len().checked_sub(AUTH_TRAILER_SIZE) else {
                return Ok(error_response(TPM_BAD_PARAM_SIZE));
            };
            let mut cursor = crate::marshal::Cursor::new(&body[param_len..]);
            let auth = match commands::parse_auth_trailer(&mut cursor) {
                Ok(auth) => auth,
                Err(_) => return Ok(error_response(TPM_BAD_PARAM_SIZE)),
            };
            (&body[..param_len], Some(auth))
        } else {
            (body, None)
        };

        let ordinal = header.ordinal.get();
        tracing::trace!(tpm_number = self.tpm_number, ordinal, "dispatching");

        // Unprocessed ordinals are rejected before any audit bookkeeping;
        // the audit table is only consulted for ordinals with a processor.
        let Some(handler) = commands::lookup(ordinal) else {
            return Ok(error_response(TPM_BAD_ORDINAL));
        };

        // The audit decision is made once, before the handler can mutate
        // the audit bits; input and output extends both follow it.
        let audit_status = audit::get_audit_status(&self.permanent.data, ordinal)
            .map_err(TpmErrorKind::AuditStatusLookup)?;
        let in_parm_digest = sha1_digest(&[&ordinal.to_be_bytes(), params]);
        let mut counter_incremented = false;
        if audit_status {
            counter_incremented = audit::extend_in(
                &mut self.permanent.data,
                &mut self.audit_digest,
                in_parm_digest,
            );
        }

        let mut ctx = CommandContext {
            permanent: &mut self.permanent,
            audit_digest: &mut self.audit_digest,
            sessions: self.sessions.as_mut(),
            keys: self.keys.as_ref(),
            in_parm_digest,
            auth,
        };
        let out = handler(&mut ctx, params);

        let out_parm_digest = sha1_digest(&[
            &out.rc.to_be_bytes(),
            &ordinal.to_be_bytes(),
            &out.out_params,
        ]);
        if audit_status {
            audit::extend_out(&self.permanent.data, &mut self.audit_digest, out_parm_digest);
        }

        // Persist or roll back. The audit counter increment alone dirties
        // permanent state even when the handler changed nothing.
        let rc = self
            .permanent
            .nv_store(
                self.storage.as_mut(),
                self.tpm_number,
                out.write_flag || counter_incremented,
                out.rc,
            )
            .map_err(TpmErrorKind::PersistPermanentState)?;

        // A rollback reverts the audit counter increment too, but the
        // events already folded into the volatile digest carry the
        // incremented value; re-apply it so the counter reported alongside
        // the chain matches the snapshots inside it.
        if counter_incremented && rc != TPM_SUCCESS {
            self.permanent.data.audit_monotonic_counter =
                self.permanent.data.audit_monotonic_counter.wrapping_add(1);
        }

        // Sessions do not survive errors, nor a cleared continue flag.
        if let Some(auth) = &auth {
            let keep = rc == TPM_SUCCESS
                && out
                    .auth_out
                    .is_some_and(|auth_out| auth_out.continue_auth_session);
            if !keep {
                self.sessions.terminate(auth.auth_handle);
            }
        }

        Ok(build_response(rc, &out))
    }
}

fn error_response(rc: u32) -> Vec<u8> {
    let header = ResponseHeader {
        tag: new_u16_be(TPM_TAG_RSP_COMMAND),
        param_size: new_u32_be(RESPONSE_HEADER_SIZE as u32),
        return_code: new_u32_be(rc),
    };
    header.as_bytes().to_vec()
}

/// Serialize a response. Errors are reported header-only with the plain
/// response tag; successful AUTH1 commands append the outgoing trailer.
fn build_response(rc: u32, out: &CommandOutput) -> Vec<u8> {
    if rc != TPM_SUCCESS {
        return error_response(rc);
    }
    let auth_len = if out.auth_out.is_some() {
        AUTH_TRAILER_SIZE - 4
    } else {
        0
    };
    let total = RESPONSE_HEADER_SIZE + out.out_params.len() + auth_len;
    let header = ResponseHeader {
        tag: new_u16_be(if out.auth_out.is_some() {
            TPM_TAG_RSP_AUTH1_COMMAND
        } else {
            TPM_TAG_RSP_COMMAND
        }),
        param_size: new_u32_be(total as u32),
        return_code: new_u32_be(rc),
    };
    let mut response = Vec::with_capacity(total);
    response.extend_from_slice(header.as_bytes());
    response.extend_from_slice(&out.out_params);
    if let Some(auth_out) = &out.auth_out {
        response.extend_from_slice(&auth_out.nonce_even);
        response.push(auth_out.continue_auth_session as u8);
        response.extend_from_slice(&auth_out.res_auth);
    }
    response
}

#[cfg(test)]
impl TpmInstance {
    fn permanent_mut(&mut self) -> &mut TpmPermanentState {
        &mut self.permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Cursor;
    use crate::marshal::Sbuffer;
    use crate::platform::testing::InMemoryNvStorage;
    use crate::platform::testing::SharedNvStorage;
    use crate::platform::testing::TestAuthSessions;
    use crate::platform::testing::TestKeyStore;
    use crate::tpm12proto::TPM_ORD_GET_AUDIT_DIGEST;
    use crate::tpm12proto::TPM_ORD_OIAP;
    use crate::tpm12proto::TPM_ORD_SET_ORDINAL_AUDIT_STATUS;

    fn new_instance() -> TpmInstance {
        let mut instance = TpmInstance::new(
            0,
            Box::new(InMemoryNvStorage::default()),
            Box::new(TestAuthSessions::default()),
            Box::new(TestKeyStore::default()),
        )
        .unwrap();
        instance.permanent_mut().data.owner_installed = true;
        instance
    }

    fn build_request(tag: u16, ordinal: u32, params: &[u8], auth_handle: Option<u32>) -> Vec<u8> {
        let mut body = Sbuffer::new();
        body.append_bytes(params);
        if let Some(handle) = auth_handle {
            body.append_u32(handle);
            body.append_bytes(&[0x0d; 20]); // nonceOdd
            body.append_bool(true); // continueAuthSession
            body.append_bytes(&[0x0e; 20]); // auth HMAC
        }
        let header = RequestHeader {
            tag: new_u16_be(tag),
            param_size: new_u32_be((10 + body.len()) as u32),
            ordinal: new_u32_be(ordinal),
        };
        let mut request = header.as_bytes().to_vec();
        request.extend_from_slice(body.as_bytes());
        request
    }

    fn response_rc(response: &[u8]) -> u32 {
        let (header, _) = ResponseHeader::read_from_prefix(response).unwrap();
        assert_eq!(header.param_size.get() as usize, response.len());
        header.return_code.get()
    }

    /// Send OIAP and return the fresh session handle.
    fn open_session(instance: &mut TpmInstance) -> u32 {
        let response =
            instance.process_command(&build_request(TPM_TAG_RQU_COMMAND, TPM_ORD_OIAP, &[], None));
        assert_eq!(response_rc(&response), TPM_SUCCESS);
        let mut cursor = Cursor::new(&response[10..]);
        cursor.load_u32().unwrap()
    }

    /// Owner-authorized SetOrdinalAuditStatus through the full dispatcher.
    fn set_audit(instance: &mut TpmInstance, ordinal: u32, state: bool) -> u32 {
        let handle = open_session(instance);
        let mut params = Sbuffer::new();
        params.append_u32(ordinal);
        params.append_bool(state);
        let request = build_request(
            TPM_TAG_RQU_AUTH1_COMMAND,
            TPM_ORD_SET_ORDINAL_AUDIT_STATUS,
            params.as_bytes(),
            Some(handle),
        );
        response_rc(&instance.process_command(&request))
    }

    /// GetAuditDigest through the dispatcher: (counter, digest, ordinals).
    fn read_audit_digest(instance: &mut TpmInstance) -> (u32, TpmDigest, Vec<u8>) {
        let request = build_request(
            TPM_TAG_RQU_COMMAND,
            TPM_ORD_GET_AUDIT_DIGEST,
            &0u32.to_be_bytes(),
            None,
        );
        let response = instance.process_command(&request);
        assert_eq!(response_rc(&response), TPM_SUCCESS);
        let mut cursor = Cursor::new(&response[10..]);
        cursor.load_u16().unwrap(); // counter tag
        cursor.load_bytes(4).unwrap(); // label
        let counter = cursor.load_u32().unwrap();
        let digest = cursor.load_array().unwrap();
        cursor.load_bool().unwrap(); // more
        let list = cursor.load_sized(4096).unwrap().to_vec();
        (counter, digest, list)
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let mut instance = new_instance();
        // Short header.
        assert_eq!(response_rc(&instance.process_command(&[0; 4])), TPM_BAD_PARAM_SIZE);
        // Unknown header tag.
        let request = build_request(0x00c7, TPM_ORD_OIAP, &[], None);
        assert_eq!(response_rc(&instance.process_command(&request)), TPM_BADTAG);
        // paramSize disagreeing with the buffer.
        let mut request = build_request(TPM_TAG_RQU_COMMAND, TPM_ORD_OIAP, &[], None);
        request.push(0);
        assert_eq!(
            response_rc(&instance.process_command(&request)),
            TPM_BAD_PARAM_SIZE
        );
        // AUTH1 tag without room for the trailer.
        let request = build_request(TPM_TAG_RQU_AUTH1_COMMAND, TPM_ORD_OIAP, &[], None);
        assert_eq!(
            response_rc(&instance.process_command(&request)),
            TPM_BAD_PARAM_SIZE
        );
    }

    #[test]
    fn unknown_ordinal() {
        let mut instance = new_instance();
        let request = build_request(TPM_TAG_RQU_COMMAND, 0x00ff, &[], None);
        assert_eq!(
            response_rc(&instance.process_command(&request)),
            TPM_BAD_ORDINAL
        );
    }

    #[test]
    fn state_survives_reconstruction() {
        let storage = SharedNvStorage::default();
        let mut instance = TpmInstance::new(
            7,
            Box::new(storage.clone()),
            Box::new(TestAuthSessions::default()),
            Box::new(TestKeyStore::default()),
        )
        .unwrap();
        instance.permanent_mut().data.owner_installed = true;
        let proof = instance.permanent_mut().data.tpm_proof;
        assert_eq!(set_audit(&mut instance, TPM_ORD_OIAP, true), TPM_SUCCESS);
        drop(instance);

        let mut reborn = TpmInstance::new(
            7,
            Box::new(storage),
            Box::new(TestAuthSessions::default()),
            Box::new(TestKeyStore::default()),
        )
        .unwrap();
        // Same manufactured identity, and the persisted audit bit is back.
        assert_eq!(reborn.permanent_mut().data.tpm_proof, proof);
        assert!(audit::get_audit_status(&reborn.permanent_mut().data, TPM_ORD_OIAP).unwrap());
    }

    #[test]
    fn teardown_erases_state() {
        let storage = SharedNvStorage::default();
        let mut instance = TpmInstance::new(
            3,
            Box::new(storage.clone()),
            Box::new(TestAuthSessions::default()),
            Box::new(TestKeyStore::default()),
        )
        .unwrap();
        let proof = instance.permanent_mut().data.tpm_proof;
        instance.teardown().unwrap();

        // Re-creation manufactures a new identity.
        let mut fresh = TpmInstance::new(
            3,
            Box::new(storage),
            Box::new(TestAuthSessions::default()),
            Box::new(TestKeyStore::default()),
        )
        .unwrap();
        assert_ne!(fresh.permanent_mut().data.tpm_proof, proof);
    }

    #[test]
    fn audited_command_extends_chain_and_counts_once() {
        let mut instance = new_instance();
        assert_eq!(set_audit(&mut instance, TPM_ORD_OIAP, true), TPM_SUCCESS);
        let (counter, digest, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 0);
        assert_eq!(digest, [0; 20]);

        // First audited command: counter increments, digest leaves zero.
        open_session(&mut instance);
        let (counter, first_digest, list) = read_audit_digest(&mut instance);
        assert_eq!(counter, 1);
        assert_ne!(first_digest, [0; 20]);
        assert_eq!(&list[..4], &TPM_ORD_OIAP.to_be_bytes());

        // Second audited command: chain moves, counter does not.
        open_session(&mut instance);
        let (counter, second_digest, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 1);
        assert_ne!(second_digest, first_digest);
    }

    #[test]
    fn audit_chain_matches_manual_computation() {
        let mut instance = new_instance();
        assert_eq!(set_audit(&mut instance, TPM_ORD_OIAP, true), TPM_SUCCESS);
        let label = instance.permanent_mut().data.audit_counter_label;

        let request = build_request(TPM_TAG_RQU_COMMAND, TPM_ORD_OIAP, &[], None);
        let response = instance.process_command(&request);
        assert_eq!(response_rc(&response), TPM_SUCCESS);

        // Replay the chain: in-extend with the input digest, out-extend
        // with the output digest, counter 1 for both events.
        let in_parms = sha1_digest(&[&TPM_ORD_OIAP.to_be_bytes()]);
        let out_parms = sha1_digest(&[
            &TPM_SUCCESS.to_be_bytes(),
            &TPM_ORD_OIAP.to_be_bytes(),
            &response[10..],
        ]);
        let mut data = permanent::PermanentData::manufacture();
        data.audit_counter_label = label;
        data.audit_monotonic_counter = 0;
        let mut expected = [0u8; 20];
        assert!(audit::extend_in(&mut data, &mut expected, in_parms));
        audit::extend_out(&data, &mut expected, out_parms);
        assert_eq!(*instance.audit_digest(), expected);
    }

    #[test]
    fn set_ordinal_audit_status_audits_by_premutation_state() {
        let mut instance = new_instance();

        // Turning auditing on for SetOrdinalAuditStatus itself: decided
        // before the handler flips the bit, so not audited yet.
        assert_eq!(
            set_audit(&mut instance, TPM_ORD_SET_ORDINAL_AUDIT_STATUS, true),
            TPM_SUCCESS
        );
        let (counter, digest, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 0);
        assert_eq!(digest, [0; 20]);

        // The next invocation sees the bit set and is audited.
        assert_eq!(set_audit(&mut instance, TPM_ORD_OIAP, true), TPM_SUCCESS);
        let (counter, digest, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 1);
        assert_ne!(digest, [0; 20]);
    }

    #[test]
    fn unhandled_ordinal_leaves_audit_state_untouched() {
        let mut instance = new_instance();
        // TSC_PhysicalPresence is audited by default but has no processor
        // here; it must be rejected before any audit bookkeeping.
        let request = build_request(
            TPM_TAG_RQU_COMMAND,
            tpm12proto::TSC_ORD_PHYSICAL_PRESENCE,
            &[],
            None,
        );
        assert_eq!(
            response_rc(&instance.process_command(&request)),
            TPM_BAD_ORDINAL
        );
        assert_eq!(*instance.audit_digest(), [0; 20]);
        assert_eq!(instance.permanent_mut().data.audit_monotonic_counter, 0);
    }

    #[test]
    fn failed_audited_command_keeps_counter_and_chain_in_step() {
        let mut instance = new_instance();
        assert_eq!(
            set_audit(&mut instance, TPM_ORD_SET_ORDINAL_AUDIT_STATUS, true),
            TPM_SUCCESS
        );
        let label = instance.permanent_mut().data.audit_counter_label;

        // Audited invocation that fails: never-auditable target ordinal.
        let handle = open_session(&mut instance);
        let mut params = Sbuffer::new();
        params.append_u32(tpm12proto::TPM_ORD_GET_AUDIT_DIGEST_SIGNED);
        params.append_bool(true);
        let body = params.as_bytes().to_vec();
        let request = build_request(
            TPM_TAG_RQU_AUTH1_COMMAND,
            TPM_ORD_SET_ORDINAL_AUDIT_STATUS,
            &body,
            Some(handle),
        );
        let response = instance.process_command(&request);
        assert_eq!(response_rc(&response), tpm12proto::TPM_BAD_PARAMETER);

        // The rollback dropped the handler's effects, but the chain keeps
        // both events; the counter reported next to the digest matches the
        // snapshots inside it, so an external replay succeeds.
        let (counter, digest, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 1);
        let in_parms = sha1_digest(&[&TPM_ORD_SET_ORDINAL_AUDIT_STATUS.to_be_bytes(), &body]);
        let out_parms = sha1_digest(&[
            &tpm12proto::TPM_BAD_PARAMETER.to_be_bytes(),
            &TPM_ORD_SET_ORDINAL_AUDIT_STATUS.to_be_bytes(),
        ]);
        let mut data = permanent::PermanentData::manufacture();
        data.audit_counter_label = label;
        data.audit_monotonic_counter = 0;
        let mut expected = [0u8; 20];
        assert!(audit::extend_in(&mut data, &mut expected, in_parms));
        audit::extend_out(&data, &mut expected, out_parms);
        assert_eq!(digest, expected);
    }

    #[test]
    fn startup_clear_resets_audit_digest() {
        let mut instance = new_instance();
        assert_eq!(set_audit(&mut instance, TPM_ORD_OIAP, true), TPM_SUCCESS);
        open_session(&mut instance);
        assert_ne!(*instance.audit_digest(), [0; 20]);

        instance.startup(StartupType::State);
        assert_ne!(*instance.audit_digest(), [0; 20]);
        instance.startup(StartupType::Clear);
        assert_eq!(*instance.audit_digest(), [0; 20]);

        // The next audited command starts a new audit session.
        open_session(&mut instance);
        let (counter, _, _) = read_audit_digest(&mut instance);
        assert_eq!(counter, 2);
    }

    #[test]
    fn failed_command_terminates_session() {
        let mut instance = new_instance();
        let handle = open_session(&mut instance);
        // Never-auditable target ordinal: TPM_BAD_PARAMETER.
        let mut params = Sbuffer::new();
        params.append_u32(tpm12proto::TPM_ORD_GET_AUDIT_DIGEST_SIGNED);
        params.append_bool(true);
        let request = build_request(
            TPM_TAG_RQU_AUTH1_COMMAND,
            TPM_ORD_SET_ORDINAL_AUDIT_STATUS,
            params.as_bytes(),
            Some(handle),
        );
        let response = instance.process_command(&request);
        assert_eq!(response_rc(&response), tpm12proto::TPM_BAD_PARAMETER);
        // Error responses are header-only with the plain tag.
        assert_eq!(response.len(), RESPONSE_HEADER_SIZE);

        // The session is gone: reusing the handle now fails.
        assert_eq!(
            set_audit_with_handle(&mut instance, handle),
            tpm12proto::TPM_INVALID_AUTHHANDLE
        );
    }

    fn set_audit_with_handle(instance: &mut TpmInstance, handle: u32) -> u32 {
        let mut params = Sbuffer::new();
        params.append_u32(TPM_ORD_OIAP);
        params.append_bool(true);
        let request = build_request(
            TPM_TAG_RQU_AUTH1_COMMAND,
            TPM_ORD_SET_ORDINAL_AUDIT_STATUS,
            params.as_bytes(),
            Some(handle),
        );
        response_rc(&instance.process_command(&request))
    }

    #[test]
    fn successful_auth_response_carries_trailer() {
        let mut instance = new_instance();
        let handle = open_session(&mut instance);
        let mut params = Sbuffer::new();
        params.append_u32(TPM_ORD_OIAP);
        params.append_bool(true);
        let request = build_request(
            TPM_TAG_RQU_AUTH1_COMMAND,
            TPM_ORD_SET_ORDINAL_AUDIT_STATUS,
            params.as_bytes(),
            Some(handle),
        );
        let response = instance.process_command(&request);
        let (header, rest) = ResponseHeader::read_from_prefix(&response).unwrap();
        assert_eq!(header.tag.get(), TPM_TAG_RSP_AUTH1_COMMAND);
        assert_eq!(header.return_code.get(), TPM_SUCCESS);
        // No output params for this ordinal: just the 41-byte trailer.
        assert_eq!(rest.len(), 41);
    }
}
