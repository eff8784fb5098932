// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ordinal processors.
//!
//! Each handler parses its above-the-line parameters from the raw body,
//! performs the operation against the shared context and returns the
//! serialized output parameters plus a return code. Header handling, audit
//! gating and NV persistence are the dispatcher's job (`lib.rs`); a handler
//! only reports through `write_flag` whether it dirtied permanent state.

use crate::audit;
use crate::audit::SetAuditError;
use crate::marshal::Cursor;
use crate::marshal::MarshalError;
use crate::marshal::Sbuffer;
use crate::permanent::TpmPermanentState;
use crate::platform::AuthIn;
use crate::platform::AuthOut;
use crate::platform::AuthSessions;
use crate::platform::KeyStore;
use crate::platform::SessionError;
use crate::tpm12proto::serialize_sign_info;
use crate::tpm12proto::sha1_digest;
use crate::tpm12proto::CounterValue;
use crate::tpm12proto::KeyUsage;
use crate::tpm12proto::SigScheme;
use crate::tpm12proto::TpmDigest;
use crate::tpm12proto::SIGN_INFO_FIXED_ADIG;
use crate::tpm12proto::TPM_AUTHFAIL;
use crate::tpm12proto::TPM_BADTAG;
use crate::tpm12proto::TPM_BAD_PARAMETER;
use crate::tpm12proto::TPM_BAD_PARAM_SIZE;
use crate::tpm12proto::TPM_FAIL;
use crate::tpm12proto::TPM_INAPPROPRIATE_SIG;
use crate::tpm12proto::TPM_INVALID_AUTHHANDLE;
use crate::tpm12proto::TPM_INVALID_KEYHANDLE;
use crate::tpm12proto::TPM_INVALID_KEYUSAGE;
use crate::tpm12proto::TPM_ORD_GET_AUDIT_DIGEST;
use crate::tpm12proto::TPM_ORD_GET_AUDIT_DIGEST_SIGNED;
use crate::tpm12proto::TPM_ORD_OIAP;
use crate::tpm12proto::TPM_ORD_SET_ORDINAL_AUDIT_STATUS;
use crate::tpm12proto::TPM_RESOURCES;
use crate::tpm12proto::TPM_SUCCESS;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use zerocopy::IntoBytes;

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub permanent: &'a mut TpmPermanentState,
    /// STClear running audit digest.
    pub audit_digest: &'a mut TpmDigest,
    pub sessions: &'a mut dyn AuthSessions,
    pub keys: &'a dyn KeyStore,
    /// SHA-1 over ordinal and above-the-line input parameters, as used for
    /// authorization HMACs.
    pub in_parm_digest: TpmDigest,
    /// Authorization trailer, present iff the request carried an AUTH1 tag.
    pub auth: Option<AuthIn>,
}

/// Handler result consumed by the dispatcher.
pub struct CommandOutput {
    pub rc: u32,
    pub out_params: Vec<u8>,
    pub auth_out: Option<AuthOut>,
    /// True when permanent state changed and must be written back.
    pub write_flag: bool,
}

impl CommandOutput {
    pub(crate) fn error(rc: u32) -> Self {
        Self {
            rc,
            out_params: Vec::new(),
            auth_out: None,
            write_flag: false,
        }
    }
}

pub(crate) type Handler = fn(&mut CommandContext<'_>, &[u8]) -> CommandOutput;

/// Resolve the processor for `ordinal`, or `None` if this core does not
/// implement it. The dispatcher must settle this before it consults the
/// audit table, which only knows processed ordinals.
pub(crate) fn lookup(ordinal: u32) -> Option<Handler> {
    Some(match ordinal {
        TPM_ORD_OIAP => oiap,
        TPM_ORD_GET_AUDIT_DIGEST => get_audit_digest,
        TPM_ORD_GET_AUDIT_DIGEST_SIGNED => get_audit_digest_signed,
        TPM_ORD_SET_ORDINAL_AUDIT_STATUS => set_ordinal_audit_status,
        _ => return None,
    })
}

/// Parse the 45-byte AUTH1 trailer: handle, nonceOdd, continue flag, HMAC.
pub(crate) fn parse_auth_trailer(cursor: &mut Cursor<'_>) -> Result<AuthIn, MarshalError> {
    Ok(AuthIn {
        auth_handle: cursor.load_u32()?,
        nonce_odd: cursor.load_array()?,
        continue_auth_session: cursor.load_bool()?,
        auth: cursor.load_array()?,
    })
}

fn session_rc(err: SessionError) -> u32 {
    match err {
        SessionError::NoResources => TPM_RESOURCES,
        SessionError::InvalidHandle(_) => TPM_INVALID_AUTHHANDLE,
        SessionError::AuthFail => TPM_AUTHFAIL,
    }
}

/// TPM_OIAP: open a fresh authorization session.
fn oiap(ctx: &mut CommandContext<'_>, params: &[u8]) -> CommandOutput {
    if ctx.auth.is_some() {
        return CommandOutput::error(TPM_BADTAG);
    }
    if !params.is_empty() {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    }
    let (auth_handle, nonce_even) = match ctx.sessions.open_oiap() {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "OIAP rejected");
            return CommandOutput::error(session_rc(err));
        }
    };
    let mut out = Sbuffer::with_capacity(24);
    out.append_u32(auth_handle);
    out.append_bytes(&nonce_even);
    CommandOutput {
        rc: TPM_SUCCESS,
        out_params: out.into_vec(),
        auth_out: None,
        write_flag: false,
    }
}

/// TPM_GetAuditDigest: report the running digest, the audit counter and
/// the audited-ordinal list from `startOrdinal` on.
fn get_audit_digest(ctx: &mut CommandContext<'_>, params: &[u8]) -> CommandOutput {
    if ctx.auth.is_some() {
        return CommandOutput::error(TPM_BADTAG);
    }
    let mut cursor = Cursor::new(params);
    let start_ordinal = match cursor.load_u32() {
        Ok(val) => val,
        Err(_) => return CommandOutput::error(TPM_BAD_PARAM_SIZE),
    };
    if cursor.remaining() != 0 {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    }

    let data = &ctx.permanent.data;
    let counter = CounterValue::new(data.audit_counter_label, data.audit_monotonic_counter);
    let list = audit::store_audit_list(data, start_ordinal);

    let mut out = Sbuffer::with_capacity(40 + list.len() * 4);
    out.append_bytes(counter.as_bytes());
    out.append_bytes(&*ctx.audit_digest);
    // The full list always fits one response; no continuation.
    out.append_bool(false);
    out.append_sized(&audit::serialize_ordinal_list(&list));
    CommandOutput {
        rc: TPM_SUCCESS,
        out_params: out.into_vec(),
        auth_out: None,
        write_flag: false,
    }
}

/// TPM_GetAuditDigestSigned: sign the audit report with a loaded key,
/// optionally closing the audit session (identity keys only).
fn get_audit_digest_signed(ctx: &mut CommandContext<'_>, params: &[u8]) -> CommandOutput {
    let Some(auth) = ctx.auth else {
        return CommandOutput::error(TPM_AUTHFAIL);
    };
    let mut cursor = Cursor::new(params);
    let parsed = (|| -> Result<(u32, bool, TpmDigest), MarshalError> {
        let key_handle = cursor.load_u32()?;
        let close_audit = cursor.load_bool()?;
        let anti_replay = cursor.load_array()?;
        Ok((key_handle, close_audit, anti_replay))
    })();
    let Ok((key_handle, close_audit, anti_replay)) = parsed else {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    };
    if cursor.remaining() != 0 {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    }

    let Some(key) = ctx.keys.lookup(key_handle) else {
        return CommandOutput::error(TPM_INVALID_KEYHANDLE);
    };
    let auth_out = match ctx
        .sessions
        .validate_auth1(&key.usage_auth, &ctx.in_parm_digest, &auth)
    {
        Ok(out) => out,
        Err(err) => {
            ctx.sessions.terminate(auth.auth_handle);
            return CommandOutput::error(session_rc(err));
        }
    };
    if !matches!(
        key.usage,
        KeyUsage::Signing | KeyUsage::Identity | KeyUsage::Legacy
    ) {
        return CommandOutput::error(TPM_INVALID_KEYUSAGE);
    }
    if !matches!(
        key.scheme,
        SigScheme::RsaSsaPkcs1v15Sha1 | SigScheme::RsaSsaPkcs1v15Info
    ) {
        return CommandOutput::error(TPM_INAPPROPRIATE_SIG);
    }
    // Closing the audit session is reserved for identity keys.
    if close_audit && key.usage != KeyUsage::Identity {
        return CommandOutput::error(TPM_INVALID_KEYUSAGE);
    }

    let data = &ctx.permanent.data;
    let counter = CounterValue::new(data.audit_counter_label, data.audit_monotonic_counter);
    let list = audit::store_audit_list(data, 0);
    let list_bytes = audit::serialize_ordinal_list(&list);

    // signed data = auditDigest || counterValue || SHA1(ordinal list)
    let ordinal_digest = sha1_digest(&[&list_bytes]);
    let mut signed_data = Vec::with_capacity(50);
    signed_data.extend_from_slice(&*ctx.audit_digest);
    signed_data.extend_from_slice(counter.as_bytes());
    signed_data.extend_from_slice(&ordinal_digest);
    let sign_info = serialize_sign_info(SIGN_INFO_FIXED_ADIG, &anti_replay, &signed_data);
    let digest_to_sign = sha1_digest(&[&sign_info]);
    let sig = match key.key.sign(Pkcs1v15Sign::new::<Sha1>(), &digest_to_sign) {
        Ok(sig) => sig,
        Err(err) => {
            tracing::error!(error = %err, "audit digest signing failed");
            return CommandOutput::error(TPM_FAIL);
        }
    };

    let mut out = Sbuffer::with_capacity(40 + list_bytes.len() + sig.len());
    out.append_bytes(counter.as_bytes());
    out.append_bytes(&*ctx.audit_digest);
    out.append_sized(&list_bytes);
    out.append_sized(&sig);

    // The outputs above reflect the digest as the command found it; the
    // close happens afterwards.
    if close_audit {
        *ctx.audit_digest = [0; 20];
        tracing::info!("audit session closed by GetAuditDigestSigned");
    }

    CommandOutput {
        rc: TPM_SUCCESS,
        out_params: out.into_vec(),
        auth_out: Some(auth_out),
        write_flag: false,
    }
}

/// TPM_SetOrdinalAuditStatus: owner-authorized toggle of one ordinal's
/// audit bit.
fn set_ordinal_audit_status(ctx: &mut CommandContext<'_>, params: &[u8]) -> CommandOutput {
    let Some(auth) = ctx.auth else {
        return CommandOutput::error(TPM_AUTHFAIL);
    };
    let mut cursor = Cursor::new(params);
    let parsed = (|| -> Result<(u32, bool), MarshalError> {
        Ok((cursor.load_u32()?, cursor.load_bool()?))
    })();
    let Ok((ordinal_to_audit, audit_state)) = parsed else {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    };
    if cursor.remaining() != 0 {
        return CommandOutput::error(TPM_BAD_PARAM_SIZE);
    }

    if !ctx.permanent.data.owner_installed {
        return CommandOutput::error(TPM_AUTHFAIL);
    }
    let owner_auth = ctx.permanent.data.owner_auth;
    let auth_out = match ctx
        .sessions
        .validate_auth1(&owner_auth, &ctx.in_parm_digest, &auth)
    {
        Ok(out) => out,
        Err(err) => {
            ctx.sessions.terminate(auth.auth_handle);
            return CommandOutput::error(session_rc(err));
        }
    };

    let altered =
        match audit::set_audit_status(&mut ctx.permanent.data, ordinal_to_audit, audit_state) {
            Ok(altered) => altered,
            Err(err @ (SetAuditError::NotAuditable(_) | SetAuditError::Unknown(_))) => {
                tracing::warn!(error = %err, "SetOrdinalAuditStatus rejected");
                return CommandOutput {
                    rc: TPM_BAD_PARAMETER,
                    out_params: Vec::new(),
                    auth_out: Some(auth_out),
                    write_flag: false,
                };
            }
        };

    CommandOutput {
        rc: TPM_SUCCESS,
        out_params: Vec::new(),
        auth_out: Some(auth_out),
        write_flag: altered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::TestAuthSessions;
    use crate::platform::testing::TestKeyStore;
    use crate::platform::LoadedKey;
    use crate::tpm12proto::TPM_ORD_OIAP;
    use rsa::RsaPrivateKey;

    struct Fixture {
        permanent: TpmPermanentState,
        audit_digest: TpmDigest,
        sessions: TestAuthSessions,
        keys: TestKeyStore,
    }

    impl Fixture {
        fn new() -> Self {
            let mut permanent = TpmPermanentState::manufacture();
            permanent.data.owner_installed = true;
            Self {
                permanent,
                audit_digest: [0; 20],
                sessions: TestAuthSessions::default(),
                keys: TestKeyStore::default(),
            }
        }

        fn ctx(&mut self, auth: Option<AuthIn>) -> CommandContext<'_> {
            CommandContext {
                permanent: &mut self.permanent,
                audit_digest: &mut self.audit_digest,
                sessions: &mut self.sessions,
                keys: &self.keys,
                in_parm_digest: [0x44; 20],
                auth,
            }
        }
    }

    fn test_auth(handle: u32) -> AuthIn {
        AuthIn {
            auth_handle: handle,
            nonce_odd: [1; 20],
            continue_auth_session: true,
            auth: [2; 20],
        }
    }

    fn signing_key(usage: KeyUsage, scheme: SigScheme) -> LoadedKey {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        LoadedKey {
            usage,
            scheme,
            usage_auth: [0x77; 20],
            key,
        }
    }

    #[test]
    fn oiap_returns_handle_and_nonce() {
        let mut fix = Fixture::new();
        let out = lookup(TPM_ORD_OIAP).unwrap()(&mut fix.ctx(None), &[]);
        assert_eq!(out.rc, TPM_SUCCESS);
        assert_eq!(out.out_params.len(), 24);
        assert!(!out.write_flag);
        let mut cursor = Cursor::new(&out.out_params);
        assert_eq!(cursor.load_u32().unwrap(), 0x0200_0000);
        assert_eq!(cursor.load_bytes(20).unwrap(), &[0x5a; 20]);
    }

    #[test]
    fn oiap_rejects_parameters_and_auth() {
        let mut fix = Fixture::new();
        let out = oiap(&mut fix.ctx(None), &[0, 0]);
        assert_eq!(out.rc, TPM_BAD_PARAM_SIZE);
        let out = oiap(&mut fix.ctx(Some(test_auth(1))), &[]);
        assert_eq!(out.rc, TPM_BADTAG);
    }

    #[test]
    fn unknown_ordinal_has_no_handler() {
        assert!(lookup(0x4f).is_none());
        // TSC pseudo-ordinals have audit bits but no processor here.
        assert!(lookup(crate::tpm12proto::TSC_ORD_PHYSICAL_PRESENCE).is_none());
    }

    #[test]
    fn get_audit_digest_reports_counter_digest_and_list() {
        let mut fix = Fixture::new();
        audit::set_audit_status(&mut fix.permanent.data, TPM_ORD_OIAP, true).unwrap();
        fix.permanent.data.audit_monotonic_counter = 5;
        fix.audit_digest = [0xab; 20];

        let params = 0u32.to_be_bytes();
        let out = get_audit_digest(&mut fix.ctx(None), &params);
        assert_eq!(out.rc, TPM_SUCCESS);
        assert!(!out.write_flag);

        let mut cursor = Cursor::new(&out.out_params);
        // counterValue: tag, label, count
        assert_eq!(cursor.load_u16().unwrap(), 0x000e);
        cursor.load_bytes(4).unwrap();
        assert_eq!(cursor.load_u32().unwrap(), 5);
        assert_eq!(cursor.load_bytes(20).unwrap(), &[0xab; 20]);
        assert!(!cursor.load_bool().unwrap());
        let list = cursor.load_sized(1024).unwrap();
        // OIAP plus the two default-audited TSC ordinals.
        assert_eq!(
            list,
            audit::serialize_ordinal_list(&[0x0a, 0x4000_000a, 0x4000_000b])
        );
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn get_audit_digest_rejects_bad_sizes() {
        let mut fix = Fixture::new();
        assert_eq!(
            get_audit_digest(&mut fix.ctx(None), &[1, 2]).rc,
            TPM_BAD_PARAM_SIZE
        );
        assert_eq!(
            get_audit_digest(&mut fix.ctx(None), &[0; 6]).rc,
            TPM_BAD_PARAM_SIZE
        );
    }

    fn signed_params(key_handle: u32, close_audit: bool, anti_replay: &TpmDigest) -> Vec<u8> {
        let mut params = Sbuffer::new();
        params.append_u32(key_handle);
        params.append_bool(close_audit);
        params.append_bytes(anti_replay);
        params.into_vec()
    }

    #[test]
    fn signed_audit_digest_verifies() {
        let mut fix = Fixture::new();
        let key = signing_key(KeyUsage::Signing, SigScheme::RsaSsaPkcs1v15Sha1);
        let public = key.key.to_public_key();
        fix.keys.insert(0x100, key);
        fix.audit_digest = [0x21; 20];
        fix.permanent.data.audit_monotonic_counter = 3;
        audit::set_audit_status(&mut fix.permanent.data, TPM_ORD_OIAP, true).unwrap();
        let handle = fix.sessions.open_oiap().unwrap().0;

        let anti_replay = [0x66; 20];
        let params = signed_params(0x100, false, &anti_replay);
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = get_audit_digest_signed(&mut ctx, &params);
        assert_eq!(out.rc, TPM_SUCCESS);
        assert!(out.auth_out.is_some());

        let mut cursor = Cursor::new(&out.out_params);
        let counter_bytes = cursor.load_bytes(10).unwrap().to_vec();
        let digest = cursor.load_bytes(20).unwrap().to_vec();
        let list_bytes = cursor.load_sized(1024).unwrap().to_vec();
        let sig = cursor.load_sized(1024).unwrap().to_vec();
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(digest, vec![0x21; 20]);

        // Reconstruct the signed structure and verify the signature.
        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&digest);
        signed_data.extend_from_slice(&counter_bytes);
        signed_data.extend_from_slice(&sha1_digest(&[&list_bytes]));
        let sign_info = serialize_sign_info(SIGN_INFO_FIXED_ADIG, &anti_replay, &signed_data);
        let expected = sha1_digest(&[&sign_info]);
        public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &expected, &sig)
            .unwrap();
    }

    #[test]
    fn close_audit_requires_identity_key() {
        let mut fix = Fixture::new();
        fix.keys.insert(
            0x100,
            signing_key(KeyUsage::Signing, SigScheme::RsaSsaPkcs1v15Sha1),
        );
        fix.keys.insert(
            0x101,
            signing_key(KeyUsage::Identity, SigScheme::RsaSsaPkcs1v15Sha1),
        );
        fix.audit_digest = [0x21; 20];

        // Non-identity key: rejected, digest untouched.
        let handle = fix.sessions.open_oiap().unwrap().0;
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x100, true, &[0; 20]));
        assert_eq!(out.rc, TPM_INVALID_KEYUSAGE);
        assert_eq!(fix.audit_digest, [0x21; 20]);

        // Identity key: signed output carries the pre-close digest, then
        // the running digest is zeroed.
        let handle = fix.sessions.open_oiap().unwrap().0;
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x101, true, &[0; 20]));
        assert_eq!(out.rc, TPM_SUCCESS);
        assert_eq!(&out.out_params[10..30], &[0x21; 20]);
        assert_eq!(fix.audit_digest, [0; 20]);
    }

    #[test]
    fn signed_rejects_bad_keys_and_schemes() {
        let mut fix = Fixture::new();
        fix.keys.insert(
            0x100,
            signing_key(KeyUsage::Storage, SigScheme::RsaSsaPkcs1v15Sha1),
        );
        fix.keys
            .insert(0x101, signing_key(KeyUsage::Signing, SigScheme::None));

        let handle = fix.sessions.open_oiap().unwrap().0;
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x999, false, &[0; 20]));
        assert_eq!(out.rc, TPM_INVALID_KEYHANDLE);
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x100, false, &[0; 20]));
        assert_eq!(out.rc, TPM_INVALID_KEYUSAGE);
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x101, false, &[0; 20]));
        assert_eq!(out.rc, TPM_INAPPROPRIATE_SIG);
    }

    #[test]
    fn signed_auth_failure_terminates_session() {
        let mut fix = Fixture::new();
        fix.keys.insert(
            0x100,
            signing_key(KeyUsage::Signing, SigScheme::RsaSsaPkcs1v15Sha1),
        );
        let handle = fix.sessions.open_oiap().unwrap().0;
        fix.sessions.reject_auth = true;
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = get_audit_digest_signed(&mut ctx, &signed_params(0x100, false, &[0; 20]));
        assert_eq!(out.rc, TPM_AUTHFAIL);
        assert_eq!(fix.sessions.terminated, vec![handle]);
    }

    fn set_params(ordinal: u32, state: bool) -> Vec<u8> {
        let mut params = Sbuffer::new();
        params.append_u32(ordinal);
        params.append_bool(state);
        params.into_vec()
    }

    #[test]
    fn set_ordinal_audit_status_flow() {
        let mut fix = Fixture::new();
        let handle = fix.sessions.open_oiap().unwrap().0;
        let mut ctx = fix.ctx(Some(test_auth(handle)));

        // Turning a bit on dirties permanent state.
        let out = set_ordinal_audit_status(&mut ctx, &set_params(TPM_ORD_OIAP, true));
        assert_eq!(out.rc, TPM_SUCCESS);
        assert!(out.write_flag);
        assert!(out.auth_out.is_some());

        // Setting it again changes nothing; no write.
        let out = set_ordinal_audit_status(&mut ctx, &set_params(TPM_ORD_OIAP, true));
        assert_eq!(out.rc, TPM_SUCCESS);
        assert!(!out.write_flag);

        // Never-auditable ordinal is a parameter error, bit untouched.
        let out = set_ordinal_audit_status(
            &mut ctx,
            &set_params(TPM_ORD_GET_AUDIT_DIGEST_SIGNED, true),
        );
        assert_eq!(out.rc, TPM_BAD_PARAMETER);
        assert!(!out.write_flag);
        assert!(audit::get_audit_status(&ctx.permanent.data, TPM_ORD_OIAP).unwrap());
    }

    #[test]
    fn set_ordinal_audit_status_requires_owner() {
        let mut fix = Fixture::new();
        fix.permanent.data.owner_installed = false;
        let handle = fix.sessions.open_oiap().unwrap().0;
        let mut ctx = fix.ctx(Some(test_auth(handle)));
        let out = set_ordinal_audit_status(&mut ctx, &set_params(TPM_ORD_OIAP, true));
        assert_eq!(out.rc, TPM_AUTHFAIL);
    }

    #[test]
    fn auth_trailer_parsing() {
        let mut buf = Sbuffer::new();
        buf.append_u32(0x0200_0001);
        buf.append_bytes(&[9; 20]);
        buf.append_bool(true);
        buf.append_bytes(&[8; 20]);
        let bytes = buf.into_vec();
        assert_eq!(bytes.len(), 45);
        let mut cursor = Cursor::new(&bytes);
        let auth = parse_auth_trailer(&mut cursor).unwrap();
        assert_eq!(auth.auth_handle, 0x0200_0001);
        assert_eq!(auth.nonce_odd, [9; 20]);
        assert!(auth.continue_auth_session);
        assert_eq!(auth.auth, [8; 20]);
        assert_eq!(cursor.remaining(), 0);
    }
}
