// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ordinal audit policy and the audit digest hash chain.
//!
//! The static ordinal table fixes, per ordinal, whether auditing may ever be
//! enabled and what the manufactured default is. The mutable per-ordinal
//! audit bits live in `PermanentData::ordinal_audit_status` (main ordinals)
//! and `tsc_ordinal_audit_status` (the two TSC pseudo-ordinals); the running
//! digest itself is STClear state owned by the instance.

use crate::permanent::PermanentData;
use crate::tpm12proto::AuditEventIn;
use crate::tpm12proto::AuditEventOut;
use crate::tpm12proto::CounterValue;
use crate::tpm12proto::sha1_digest;
use crate::tpm12proto::TpmDigest;
use crate::tpm12proto::TPM_ORDINALS_MAX;
use crate::tpm12proto::TPM_ORDINAL_AUDIT_STATUS_SIZE;
use crate::tpm12proto::TPM_ORD_CONTINUE_SELF_TEST;
use crate::tpm12proto::TPM_ORD_FIELD_UPGRADE;
use crate::tpm12proto::TPM_ORD_GET_AUDIT_DIGEST_SIGNED;
use crate::tpm12proto::TPM_ORD_GET_TEST_RESULT;
use crate::tpm12proto::TPM_ORD_SAVE_STATE;
use crate::tpm12proto::TPM_ORD_SELF_TEST_FULL;
use crate::tpm12proto::TPM_ORD_STARTUP;
use crate::tpm12proto::TSC_ORD_PHYSICAL_PRESENCE;
use crate::tpm12proto::TSC_ORD_RESET_ESTABLISHMENT_BIT;
use crate::tpm12proto::TSC_PHYS_PRES_AUDIT_BIT;
use crate::tpm12proto::TSC_RESET_ESTAB_AUDIT_BIT;
use thiserror::Error;
use zerocopy::IntoBytes;

/// Static audit attributes of one ordinal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OrdinalAttr {
    /// Whether SetOrdinalAuditStatus may ever turn auditing on.
    pub auditable: bool,
    /// Audit state applied at manufacture.
    pub audit_default: bool,
}

/// Ordinals whose audit bit must stay clear: GetAuditDigestSigned would
/// recursively extend the chain it reports, and the startup/self-test/
/// upgrade ordinals run while the audit machinery may not be coherent.
const NEVER_AUDITABLE: &[u32] = &[
    TPM_ORD_GET_AUDIT_DIGEST_SIGNED,
    TPM_ORD_SELF_TEST_FULL,
    TPM_ORD_CONTINUE_SELF_TEST,
    TPM_ORD_GET_TEST_RESULT,
    TPM_ORD_SAVE_STATE,
    TPM_ORD_STARTUP,
    TPM_ORD_FIELD_UPGRADE,
];

const fn build_table() -> [OrdinalAttr; TPM_ORDINALS_MAX] {
    let mut table = [OrdinalAttr {
        auditable: true,
        audit_default: false,
    }; TPM_ORDINALS_MAX];
    let mut i = 0;
    while i < NEVER_AUDITABLE.len() {
        table[NEVER_AUDITABLE[i] as usize].auditable = false;
        i += 1;
    }
    table
}

/// Attributes for ordinals 0..256. TSC pseudo-ordinals are handled
/// separately; see [`TSC_ATTR`].
static ORDINAL_TABLE: [OrdinalAttr; TPM_ORDINALS_MAX] = build_table();

/// Both TSC pseudo-ordinals are auditable and audited by default.
const TSC_ATTR: OrdinalAttr = OrdinalAttr {
    auditable: true,
    audit_default: true,
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("ordinal {0:#010x} has no audit table entry")]
pub struct UnknownOrdinal(pub u32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetAuditError {
    #[error(transparent)]
    Unknown(#[from] UnknownOrdinal),
    #[error("ordinal {0:#010x} is never auditable")]
    NotAuditable(u32),
}

/// Where an ordinal's mutable audit bit is stored.
enum AuditSlot {
    Main(usize),
    Tsc(u8),
}

fn slot_of(ordinal: u32) -> Result<(OrdinalAttr, AuditSlot), UnknownOrdinal> {
    match ordinal {
        TSC_ORD_PHYSICAL_PRESENCE => Ok((TSC_ATTR, AuditSlot::Tsc(TSC_PHYS_PRES_AUDIT_BIT))),
        TSC_ORD_RESET_ESTABLISHMENT_BIT => {
            Ok((TSC_ATTR, AuditSlot::Tsc(TSC_RESET_ESTAB_AUDIT_BIT)))
        }
        ord if (ord as usize) < TPM_ORDINALS_MAX => {
            Ok((ORDINAL_TABLE[ord as usize], AuditSlot::Main(ord as usize)))
        }
        _ => Err(UnknownOrdinal(ordinal)),
    }
}

/// Apply the manufactured audit defaults to `data`.
pub fn init_defaults(data: &mut PermanentData) {
    data.ordinal_audit_status = [0; TPM_ORDINAL_AUDIT_STATUS_SIZE];
    for (ordinal, attr) in ORDINAL_TABLE.iter().enumerate() {
        if attr.audit_default {
            data.ordinal_audit_status[ordinal / 8] |= 1 << (ordinal % 8);
        }
    }
    data.tsc_ordinal_audit_status = 0;
    if TSC_ATTR.audit_default {
        data.tsc_ordinal_audit_status = TSC_PHYS_PRES_AUDIT_BIT | TSC_RESET_ESTAB_AUDIT_BIT;
    }
}

/// Current audit state of a dispatched ordinal.
pub fn get_audit_status(data: &PermanentData, ordinal: u32) -> Result<bool, UnknownOrdinal> {
    let (_, slot) = slot_of(ordinal)?;
    Ok(match slot {
        AuditSlot::Main(ord) => data.ordinal_audit_status[ord / 8] & (1 << (ord % 8)) != 0,
        AuditSlot::Tsc(mask) => data.tsc_ordinal_audit_status & mask != 0,
    })
}

/// Set or clear an ordinal's audit bit. Never-auditable ordinals are
/// rejected before any state is touched. Returns whether the stored bit
/// actually changed, so the caller knows if permanent state is dirty.
pub fn set_audit_status(
    data: &mut PermanentData,
    ordinal: u32,
    audit_state: bool,
) -> Result<bool, SetAuditError> {
    let (attr, slot) = slot_of(ordinal)?;
    if audit_state && !attr.auditable {
        return Err(SetAuditError::NotAuditable(ordinal));
    }
    let altered = match slot {
        AuditSlot::Main(ord) => {
            let byte = &mut data.ordinal_audit_status[ord / 8];
            let mask = 1 << (ord % 8);
            let old = *byte;
            if audit_state {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
            *byte != old
        }
        AuditSlot::Tsc(mask) => {
            let old = data.tsc_ordinal_audit_status;
            if audit_state {
                data.tsc_ordinal_audit_status |= mask;
            } else {
                data.tsc_ordinal_audit_status &= !mask;
            }
            data.tsc_ordinal_audit_status != old
        }
    };
    Ok(altered)
}

/// Enumerate the currently audited ordinals, ascending, starting at
/// `start`. The TSC pseudo-ordinals sort after every main ordinal by
/// construction of their values.
pub fn store_audit_list(data: &PermanentData, start: u32) -> Vec<u32> {
    let mut list = Vec::new();
    let first = (start as usize).min(TPM_ORDINALS_MAX);
    for ordinal in first..TPM_ORDINALS_MAX {
        if data.ordinal_audit_status[ordinal / 8] & (1 << (ordinal % 8)) != 0 {
            list.push(ordinal as u32);
        }
    }
    for (tsc, mask) in [
        (TSC_ORD_PHYSICAL_PRESENCE, TSC_PHYS_PRES_AUDIT_BIT),
        (TSC_ORD_RESET_ESTABLISHMENT_BIT, TSC_RESET_ESTAB_AUDIT_BIT),
    ] {
        if tsc >= start && data.tsc_ordinal_audit_status & mask != 0 {
            list.push(tsc);
        }
    }
    list
}

/// Big-endian concatenation of an ordinal list, as carried on the wire and
/// as hashed into the signed audit report.
pub fn serialize_ordinal_list(list: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(list.len() * 4);
    for ordinal in list {
        out.extend_from_slice(&ordinal.to_be_bytes());
    }
    out
}

/// Extend the audit chain with the input-parameter event of an audited
/// command. An all-zero digest marks the start of a new audit session, so
/// the audit monotonic counter increments first; the return value reports
/// that increment because it dirties permanent state.
pub fn extend_in(
    data: &mut PermanentData,
    audit_digest: &mut TpmDigest,
    input_parms: TpmDigest,
) -> bool {
    let counter_incremented = *audit_digest == [0; 20];
    if counter_incremented {
        data.audit_monotonic_counter = data.audit_monotonic_counter.wrapping_add(1);
        tracing::debug!(
            counter = data.audit_monotonic_counter,
            "new audit session, incremented audit counter"
        );
    }
    let event = AuditEventIn::new(
        input_parms,
        CounterValue::new(data.audit_counter_label, data.audit_monotonic_counter),
    );
    *audit_digest = sha1_digest(&[&audit_digest[..], event.as_bytes()]);
    counter_incremented
}

/// Extend the audit chain with the output-parameter event. Always paired
/// with a preceding [`extend_in`] for the same command.
pub fn extend_out(data: &PermanentData, audit_digest: &mut TpmDigest, output_parms: TpmDigest) {
    let event = AuditEventOut::new(
        output_parms,
        CounterValue::new(data.audit_counter_label, data.audit_monotonic_counter),
    );
    *audit_digest = sha1_digest(&[&audit_digest[..], event.as_bytes()]);
}
