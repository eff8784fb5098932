// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 1.2 protocol types, as defined in the TPM Main Specification
//! (Parts 2 and 3), plus the NV-state format tags private to this
//! implementation.

use self::packed_nums::*;
use sha1::Digest;
use sha1::Sha1;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[allow(non_camel_case_types)]
pub mod packed_nums {
    pub type u16_be = zerocopy::U16<zerocopy::BigEndian>;
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
}

/// Workaround to allow constructing a zerocopy U32 in a const context.
pub const fn new_u32_be(val: u32) -> u32_be {
    u32_be::from_bytes(val.to_be_bytes())
}

/// Workaround to allow constructing a zerocopy U16 in a const context.
pub const fn new_u16_be(val: u16) -> u16_be {
    u16_be::from_bytes(val.to_be_bytes())
}

// Fixed sizes (TPM 1.2 is a SHA-1 design).
pub const TPM_DIGEST_SIZE: usize = 20;
pub const TPM_SECRET_SIZE: usize = 20;
pub const TPM_NONCE_SIZE: usize = 20;

pub type TpmDigest = [u8; TPM_DIGEST_SIZE];
pub type TpmSecret = [u8; TPM_SECRET_SIZE];
pub type TpmNonce = [u8; TPM_NONCE_SIZE];

// Build-time capacity constants. These parameterize array sizes in
// PermanentData and must not become runtime-configurable.
pub const TPM_ORDINALS_MAX: usize = 256;
pub const TPM_ORDINAL_AUDIT_STATUS_SIZE: usize = TPM_ORDINALS_MAX / 8;
pub const TPM_NUM_PCR: usize = 24;
pub const TPM_MIN_COUNTERS: usize = 4;
pub const TPM_NUM_FAMILY_TABLE_ENTRY_MIN: usize = 8;
pub const TPM_NUM_DELEGATE_TABLE_ENTRY_MIN: usize = 2;
pub const TPM_OWNER_EVICT_KEY_HANDLES: usize = 2;
/// Maximum serialized size of the aggregate NV blob.
pub const TPM_MAX_NV_SPACE: usize = 16384;
/// Upper bound for any single opaque key blob carried in PermanentData.
pub const TPM_MAX_KEY_BLOB: usize = 4096;
/// Upper bound for user data in one defined NV index.
pub const TPM_MAX_NV_INDEX_DATA: usize = 2048;

// Command / response header tags.
pub const TPM_TAG_RQU_COMMAND: u16 = 0x00c1;
pub const TPM_TAG_RQU_AUTH1_COMMAND: u16 = 0x00c2;
pub const TPM_TAG_RQU_AUTH2_COMMAND: u16 = 0x00c3;
pub const TPM_TAG_RSP_COMMAND: u16 = 0x00c4;
pub const TPM_TAG_RSP_AUTH1_COMMAND: u16 = 0x00c5;
pub const TPM_TAG_RSP_AUTH2_COMMAND: u16 = 0x00c6;

// Structure tags.
pub const TPM_TAG_SIGNINFO: u16 = 0x0005;
pub const TPM_TAG_PERSISTENT_DATA: u16 = 0x0009;
pub const TPM_TAG_COUNTER_VALUE: u16 = 0x000e;
pub const TPM_TAG_AUDIT_EVENT_IN: u16 = 0x0012;
pub const TPM_TAG_AUDIT_EVENT_OUT: u16 = 0x0013;
pub const TPM_TAG_DELEGATE_TABLE_ROW: u16 = 0x001c;
pub const TPM_TAG_FAMILY_TABLE_ENTRY: u16 = 0x001e;

// NV-state format tags. These version the serialized state this
// implementation persists; they are not wire-visible TPM structures.
pub const TPM_TAG_NVSTATE_V1: u16 = 0x0001;
/// PermanentFlags bitmap layout predating `disable_full_da_logic_info`.
pub const TPM_TAG_NVSTATE_PF94: u16 = 0x0002;
/// Current PermanentFlags bitmap layout.
pub const TPM_TAG_NVSTATE_PF97: u16 = 0x0003;

// Ordinals processed by this core.
pub const TPM_ORD_OIAP: u32 = 0x0000000a;
pub const TPM_ORD_GET_AUDIT_DIGEST: u32 = 0x00000085;
pub const TPM_ORD_GET_AUDIT_DIGEST_SIGNED: u32 = 0x00000086;
pub const TPM_ORD_SET_ORDINAL_AUDIT_STATUS: u32 = 0x0000008d;

// Ordinals that only appear in the static audit table.
pub const TPM_ORD_SELF_TEST_FULL: u32 = 0x00000050;
pub const TPM_ORD_CONTINUE_SELF_TEST: u32 = 0x00000053;
pub const TPM_ORD_GET_TEST_RESULT: u32 = 0x00000054;
pub const TPM_ORD_SAVE_STATE: u32 = 0x00000098;
pub const TPM_ORD_STARTUP: u32 = 0x00000099;
pub const TPM_ORD_FIELD_UPGRADE: u32 = 0x000000aa;

/// Connection-ordinal flag bit: TSC ordinals live outside the 0..256 space.
pub const TPM_ORD_CONNECTION: u32 = 0x40000000;
pub const TSC_ORD_PHYSICAL_PRESENCE: u32 = TPM_ORD_CONNECTION + 0x0a;
pub const TSC_ORD_RESET_ESTABLISHMENT_BIT: u32 = TPM_ORD_CONNECTION + 0x0b;

// Dedicated audit-status mask bits for the TSC ordinals.
pub const TSC_PHYS_PRES_AUDIT_BIT: u8 = 0x01;
pub const TSC_RESET_ESTAB_AUDIT_BIT: u8 = 0x02;

// Return codes (TPM Main Specification Part 2, Section 16).
pub const TPM_SUCCESS: u32 = 0;
pub const TPM_AUTHFAIL: u32 = 1;
pub const TPM_BAD_PARAMETER: u32 = 3;
pub const TPM_DEACTIVATED: u32 = 6;
pub const TPM_DISABLED: u32 = 7;
pub const TPM_FAIL: u32 = 9;
pub const TPM_BAD_ORDINAL: u32 = 10;
pub const TPM_INVALID_KEYHANDLE: u32 = 12;
pub const TPM_KEYNOTFOUND: u32 = 13;
pub const TPM_NOSPACE: u32 = 17;
pub const TPM_RESOURCES: u32 = 21;
pub const TPM_SIZE: u32 = 23;
pub const TPM_BAD_PARAM_SIZE: u32 = 25;
pub const TPM_BADTAG: u32 = 30;
pub const TPM_INVALID_AUTHHANDLE: u32 = 34;
pub const TPM_INVALID_KEYUSAGE: u32 = 36;
pub const TPM_INVALID_POSTINIT: u32 = 38;
pub const TPM_INAPPROPRIATE_SIG: u32 = 39;
pub const TPM_BAD_MODE: u32 = 44;
pub const TPM_MAXNVWRITES: u32 = 72;

/// `TPM_KEY_USAGE`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum KeyUsage {
    Signing = 0x0010,
    Storage = 0x0011,
    Identity = 0x0012,
    AuthChange = 0x0013,
    Bind = 0x0014,
    Legacy = 0x0015,
    Migrate = 0x0016,
}

impl KeyUsage {
    pub fn from_u16(val: u16) -> Option<KeyUsage> {
        let ret = match val {
            0x0010 => Self::Signing,
            0x0011 => Self::Storage,
            0x0012 => Self::Identity,
            0x0013 => Self::AuthChange,
            0x0014 => Self::Bind,
            0x0015 => Self::Legacy,
            0x0016 => Self::Migrate,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_SIG_SCHEME`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum SigScheme {
    None = 0x0001,
    RsaSsaPkcs1v15Sha1 = 0x0002,
    RsaSsaPkcs1v15Der = 0x0003,
    RsaSsaPkcs1v15Info = 0x0004,
}

impl SigScheme {
    pub fn from_u16(val: u16) -> Option<SigScheme> {
        let ret = match val {
            0x0001 => Self::None,
            0x0002 => Self::RsaSsaPkcs1v15Sha1,
            0x0003 => Self::RsaSsaPkcs1v15Der,
            0x0004 => Self::RsaSsaPkcs1v15Info,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_STARTUP_TYPE`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum StartupType {
    Clear = 0x0001,
    State = 0x0002,
    Deactivated = 0x0003,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RequestHeader {
    pub tag: u16_be,
    pub param_size: u32_be,
    pub ordinal: u32_be,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ResponseHeader {
    pub tag: u16_be,
    pub param_size: u32_be,
    pub return_code: u32_be,
}

pub const REQUEST_HEADER_SIZE: usize = size_of::<RequestHeader>();
pub const RESPONSE_HEADER_SIZE: usize = size_of::<ResponseHeader>();

/// `TPM_COUNTER_VALUE`
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CounterValue {
    pub tag: u16_be,
    pub label: [u8; 4],
    pub counter: u32_be,
}

impl CounterValue {
    pub fn new(label: [u8; 4], counter: u32) -> Self {
        Self {
            tag: new_u16_be(TPM_TAG_COUNTER_VALUE),
            label,
            counter: counter.into(),
        }
    }
}

/// `TPM_AUDIT_EVENT_IN`
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct AuditEventIn {
    pub tag: u16_be,
    pub input_parms: TpmDigest,
    pub audit_count: CounterValue,
}

impl AuditEventIn {
    pub fn new(input_parms: TpmDigest, audit_count: CounterValue) -> Self {
        Self {
            tag: new_u16_be(TPM_TAG_AUDIT_EVENT_IN),
            input_parms,
            audit_count,
        }
    }
}

/// `TPM_AUDIT_EVENT_OUT`
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct AuditEventOut {
    pub tag: u16_be,
    pub output_parms: TpmDigest,
    pub audit_count: CounterValue,
}

impl AuditEventOut {
    pub fn new(output_parms: TpmDigest, audit_count: CounterValue) -> Self {
        Self {
            tag: new_u16_be(TPM_TAG_AUDIT_EVENT_OUT),
            output_parms,
            audit_count,
        }
    }
}

/// Fixed-prefix value in `TPM_SIGN_INFO` for GetAuditDigestSigned.
pub const SIGN_INFO_FIXED_ADIG: [u8; 4] = *b"ADIG";

/// Serialize a `TPM_SIGN_INFO` structure: tag, 4-byte fixed usage string,
/// caller anti-replay nonce, then the sized data area.
pub fn serialize_sign_info(fixed: [u8; 4], replay: &TpmNonce, data: &[u8]) -> Vec<u8> {
    let mut buffer = crate::marshal::Sbuffer::with_capacity(
        size_of::<u16>() + fixed.len() + replay.len() + size_of::<u32>() + data.len(),
    );
    buffer.append_u16(TPM_TAG_SIGNINFO);
    buffer.append_bytes(&fixed);
    buffer.append_bytes(replay);
    buffer.append_sized(data);
    buffer.into_vec()
}

/// SHA-1 over the concatenation of `parts`.
pub fn sha1_digest(parts: &[&[u8]]) -> TpmDigest {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
