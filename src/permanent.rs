// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Persistent TPM state: PermanentFlags, PermanentData, owner-evicted keys,
//! NV-defined space, and the aggregate integrity-checked store.
//!
//! Everything in this module round-trips through a big-endian stream
//! format versioned by `TPM_TAG_NVSTATE_V1`. The aggregate blob carries a
//! trailing SHA-1 digest over every preceding byte; a mismatch on load is a
//! fatal TPM-failure condition with no recovery path.

use crate::audit;
use crate::marshal::Cursor;
use crate::marshal::MarshalError;
use crate::marshal::Sbuffer;
use crate::platform::NvStorage;
use crate::platform::NvStorageError;
use crate::tpm12proto::sha1_digest;
use crate::tpm12proto::TpmDigest;
use crate::tpm12proto::TpmNonce;
use crate::tpm12proto::TpmSecret;
use crate::tpm12proto::TPM_DIGEST_SIZE;
use crate::tpm12proto::TPM_MAX_KEY_BLOB;
use crate::tpm12proto::TPM_MAX_NV_INDEX_DATA;
use crate::tpm12proto::TPM_MAX_NV_SPACE;
use crate::tpm12proto::TPM_MIN_COUNTERS;
use crate::tpm12proto::TPM_NUM_DELEGATE_TABLE_ENTRY_MIN;
use crate::tpm12proto::TPM_NUM_FAMILY_TABLE_ENTRY_MIN;
use crate::tpm12proto::TPM_NUM_PCR;
use crate::tpm12proto::TPM_ORDINAL_AUDIT_STATUS_SIZE;
use crate::tpm12proto::TPM_OWNER_EVICT_KEY_HANDLES;
use crate::tpm12proto::TPM_SUCCESS;
use crate::tpm12proto::TPM_TAG_DELEGATE_TABLE_ROW;
use crate::tpm12proto::TPM_TAG_FAMILY_TABLE_ENTRY;
use crate::tpm12proto::TPM_TAG_NVSTATE_PF94;
use crate::tpm12proto::TPM_TAG_NVSTATE_PF97;
use crate::tpm12proto::TPM_TAG_NVSTATE_V1;
use crate::tpm12proto::TPM_TAG_PERSISTENT_DATA;
use bitfield_struct::bitfield;
use thiserror::Error;

/// Name of the single aggregate blob in the NV storage backend.
pub const TPM_PERMANENT_ALL_NAME: &str = "permall";

/// Build option: ship with the TPM enabled and activated.
const TPM_SHIP_ACTIVATED: bool = false;

const TPM_REV_MAJOR: u8 = 1;
const TPM_REV_MINOR: u8 = 2;

/// Label stamped into the audit monotonic counter at manufacture.
const AUDIT_COUNTER_LABEL: [u8; 4] = *b"AUD\0";

#[derive(Debug, Error)]
pub enum PermanentStateError {
    #[error("malformed persistent stream")]
    Format(#[from] MarshalError),
    #[error("unsupported PermanentFlags version tag {0:#06x}")]
    UnsupportedFlagsTag(u16),
    #[error("persistent stream trailer is {remaining} bytes, expected the 20-byte integrity digest")]
    BadIntegrityTrailer { remaining: usize },
    #[error("integrity digest mismatch on persistent state load")]
    IntegrityDigestMismatch,
    #[error("persistent stream declares {count} {table} entries, maximum {max}")]
    TableOverflow {
        table: &'static str,
        count: usize,
        max: usize,
    },
    #[error("serialized state is {len} bytes, exceeding the {max}-byte NV budget")]
    NoSpace { len: usize, max: usize },
    #[error("NV storage backend failed")]
    Storage(#[from] NvStorageError),
    #[error("no last-good persistent blob to roll back to")]
    MissingRollbackBlob,
    #[error("rollback reload failed after ordinal error {original_rc:#x}")]
    RollbackFailed {
        original_rc: u32,
        #[source]
        cause: Box<PermanentStateError>,
    },
}

/// Which historical bitmap layout a serialized PermanentFlags uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FlagsLayout {
    /// 19 flags, predates `disable_full_da_logic_info`.
    Pf94,
    /// Current layout.
    Pf97,
}

/// `TPM_PERMANENT_FLAGS`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PermanentFlags {
    pub disable: bool,
    pub ownership: bool,
    pub deactivated: bool,
    pub read_pubek: bool,
    pub disable_owner_clear: bool,
    pub allow_maintenance: bool,
    pub physical_presence_lifetime_lock: bool,
    pub physical_presence_hw_enable: bool,
    pub physical_presence_cmd_enable: bool,
    pub cekp_used: bool,
    pub tpm_post: bool,
    pub tpm_post_lock: bool,
    pub fips: bool,
    pub tpm_operator: bool,
    pub enable_revoke_ek: bool,
    pub nv_locked: bool,
    pub read_srk_pub: bool,
    pub tpm_established: bool,
    pub maintenance_done: bool,
    pub disable_full_da_logic_info: bool,
}

impl PermanentFlags {
    /// Manufacturer-policy defaults.
    pub fn init() -> Self {
        Self {
            disable: !TPM_SHIP_ACTIVATED,
            deactivated: !TPM_SHIP_ACTIVATED,
            read_pubek: true,
            allow_maintenance: true,
            ..Default::default()
        }
    }

    /// The one place the bit order is defined. Both the pack and unpack
    /// loops walk this list, so the layouts cannot drift apart.
    fn bitmap_slots(&mut self, layout: FlagsLayout) -> Vec<&mut bool> {
        let mut slots = vec![
            &mut self.disable,
            &mut self.ownership,
            &mut self.deactivated,
            &mut self.read_pubek,
            &mut self.disable_owner_clear,
            &mut self.allow_maintenance,
            &mut self.physical_presence_lifetime_lock,
            &mut self.physical_presence_hw_enable,
            &mut self.physical_presence_cmd_enable,
            &mut self.cekp_used,
            &mut self.tpm_post,
            &mut self.tpm_post_lock,
            &mut self.fips,
            &mut self.tpm_operator,
            &mut self.enable_revoke_ek,
            &mut self.nv_locked,
            &mut self.read_srk_pub,
            &mut self.tpm_established,
            &mut self.maintenance_done,
        ];
        if layout == FlagsLayout::Pf97 {
            slots.push(&mut self.disable_full_da_logic_info);
        }
        slots
    }

    /// Unpack a versioned bitmap. Unrecognized tags fail hard: there is no
    /// forward compatibility for persisted flag layouts.
    pub fn load_bitmap(tag: u16, bits: u32) -> Result<Self, PermanentStateError> {
        let layout = match tag {
            TPM_TAG_NVSTATE_PF94 => FlagsLayout::Pf94,
            TPM_TAG_NVSTATE_PF97 => FlagsLayout::Pf97,
            other => return Err(PermanentStateError::UnsupportedFlagsTag(other)),
        };
        let mut flags = Self::default();
        for (i, slot) in flags.bitmap_slots(layout).into_iter().enumerate() {
            *slot = bits & (1 << i) != 0;
        }
        Ok(flags)
    }

    /// Pack in the current build's layout, emitting the current tag.
    pub fn store_bitmap(&self) -> (u16, u32) {
        let mut copy = *self;
        let mut bits = 0u32;
        for (i, slot) in copy.bitmap_slots(FlagsLayout::Pf97).into_iter().enumerate() {
            if *slot {
                bits |= 1 << i;
            }
        }
        (TPM_TAG_NVSTATE_PF97, bits)
    }

    /// Byte-per-flag stream for `TPM_CAP_FLAG_PERMANENT` capability
    /// responses, independent of the NV bitmap format.
    pub fn store_bytes(&self) -> Vec<u8> {
        let mut copy = *self;
        copy.bitmap_slots(FlagsLayout::Pf97)
            .into_iter()
            .map(|slot| *slot as u8)
            .collect()
    }

    fn store(&self, buffer: &mut Sbuffer) {
        let (tag, bits) = self.store_bitmap();
        buffer.append_u16(tag);
        buffer.append_u32(bits);
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, PermanentStateError> {
        let tag = cursor.load_u16()?;
        let bits = cursor.load_u32()?;
        Self::load_bitmap(tag, bits)
    }
}

/// One general-purpose monotonic counter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSlot {
    pub valid: bool,
    pub label: [u8; 4],
    pub counter: u32,
    pub auth: TpmSecret,
}

impl CounterSlot {
    fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_bool(self.valid);
        buffer.append_bytes(&self.label);
        buffer.append_u32(self.counter);
        buffer.append_bytes(&self.auth);
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, MarshalError> {
        Ok(Self {
            valid: cursor.load_bool()?,
            label: cursor.load_array()?,
            counter: cursor.load_u32()?,
            auth: cursor.load_array()?,
        })
    }
}

/// Per-PCR attribute record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcrAttrib {
    pub pcr_reset: bool,
    pub pcr_reset_local: u8,
    pub pcr_extend_local: u8,
}

impl PcrAttrib {
    fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_bool(self.pcr_reset);
        buffer.append_u8(self.pcr_reset_local);
        buffer.append_u8(self.pcr_extend_local);
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, MarshalError> {
        Ok(Self {
            pcr_reset: cursor.load_bool()?,
            pcr_reset_local: cursor.load_u8()?,
            pcr_extend_local: cursor.load_u8()?,
        })
    }
}

/// `TPM_FAMILY_TABLE_ENTRY` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilyTableEntry {
    pub valid: bool,
    pub family_label: u8,
    pub family_id: u32,
    pub verification_count: u32,
    pub flags: u32,
}

impl FamilyTableEntry {
    fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_bool(self.valid);
        if self.valid {
            buffer.append_u16(TPM_TAG_FAMILY_TABLE_ENTRY);
            buffer.append_u8(self.family_label);
            buffer.append_u32(self.family_id);
            buffer.append_u32(self.verification_count);
            buffer.append_u32(self.flags);
        }
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, MarshalError> {
        if !cursor.load_bool()? {
            return Ok(Self::default());
        }
        cursor.expect_tag(TPM_TAG_FAMILY_TABLE_ENTRY)?;
        Ok(Self {
            valid: true,
            family_label: cursor.load_u8()?,
            family_id: cursor.load_u32()?,
            verification_count: cursor.load_u32()?,
            flags: cursor.load_u32()?,
        })
    }
}

/// `TPM_DELEGATE_TABLE_ROW` slot. Delegation protocol logic is out of
/// scope; the row only persists the fields other ordinals account against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelegateTableRow {
    pub valid: bool,
    pub label: u8,
    pub family_id: u32,
    pub verification_count: u32,
    pub per1: u32,
    pub per2: u32,
    pub blob_auth: TpmSecret,
}

impl DelegateTableRow {
    fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_bool(self.valid);
        if self.valid {
            buffer.append_u16(TPM_TAG_DELEGATE_TABLE_ROW);
            buffer.append_u8(self.label);
            buffer.append_u32(self.family_id);
            buffer.append_u32(self.verification_count);
            buffer.append_u32(self.per1);
            buffer.append_u32(self.per2);
            buffer.append_bytes(&self.blob_auth);
        }
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, MarshalError> {
        if !cursor.load_bool()? {
            return Ok(Self::default());
        }
        cursor.expect_tag(TPM_TAG_DELEGATE_TABLE_ROW)?;
        Ok(Self {
            valid: true,
            label: cursor.load_u8()?,
            family_id: cursor.load_u32()?,
            verification_count: cursor.load_u32()?,
            per1: cursor.load_u32()?,
            per2: cursor.load_u32()?,
            blob_auth: cursor.load_array()?,
        })
    }
}

/// `TPM_PERMANENT_DATA`: the authoritative secret-bearing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermanentData {
    pub rev_major: u8,
    pub rev_minor: u8,
    pub tpm_proof: TpmSecret,
    pub ek_reset: TpmNonce,
    pub owner_auth: TpmSecret,
    pub operator_auth: TpmSecret,
    pub auth_dir: TpmDigest,
    /// Manufacturer maintenance public key, if one was installed.
    pub manu_maint_pub: Option<Vec<u8>>,
    pub endorsement_key: Vec<u8>,
    pub srk: Vec<u8>,
    pub context_key: Vec<u8>,
    pub delegate_key: Vec<u8>,
    pub audit_monotonic_counter: u32,
    pub audit_counter_label: [u8; 4],
    pub monotonic_counter: [CounterSlot; TPM_MIN_COUNTERS],
    pub pcr_attrib: [PcrAttrib; TPM_NUM_PCR],
    pub ordinal_audit_status: [u8; TPM_ORDINAL_AUDIT_STATUS_SIZE],
    pub family_table: [FamilyTableEntry; TPM_NUM_FAMILY_TABLE_ENTRY_MIN],
    pub delegate_table: [DelegateTableRow; TPM_NUM_DELEGATE_TABLE_ENTRY_MIN],
    pub last_family_id: u32,
    pub no_owner_nv_write: u32,
    pub restrict_delegate: u32,
    pub tpm_daa_seed: TpmNonce,
    pub owner_installed: bool,
    pub tsc_ordinal_audit_status: u8,
    pub allow_load_maint_pub: bool,
    pub daa_proof: TpmNonce,
    pub daa_blob_key: Vec<u8>,
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    // There is no fallback entropy source; a TPM with guessable secrets
    // must not come into existence, so manufacture aborts here.
    getrandom::getrandom(&mut out).expect("rng failure");
    out
}

impl PermanentData {
    /// Manufacturing/first-boot initialization: generate every secret and
    /// apply the ordinal-audit defaults. Key-pair generation (EK, SRK) is
    /// left to the key hierarchy layer; the blobs start empty.
    pub fn manufacture() -> Self {
        let mut data = Self {
            rev_major: TPM_REV_MAJOR,
            rev_minor: TPM_REV_MINOR,
            tpm_proof: random_bytes(),
            ek_reset: random_bytes(),
            owner_auth: [0; 20],
            operator_auth: [0; 20],
            auth_dir: [0; 20],
            manu_maint_pub: None,
            endorsement_key: Vec::new(),
            srk: Vec::new(),
            context_key: random_bytes::<16>().to_vec(),
            delegate_key: random_bytes::<16>().to_vec(),
            audit_monotonic_counter: 0,
            audit_counter_label: AUDIT_COUNTER_LABEL,
            monotonic_counter: Default::default(),
            pcr_attrib: Default::default(),
            ordinal_audit_status: [0; TPM_ORDINAL_AUDIT_STATUS_SIZE],
            family_table: Default::default(),
            delegate_table: Default::default(),
            last_family_id: 0,
            no_owner_nv_write: 0,
            restrict_delegate: 0,
            tpm_daa_seed: random_bytes(),
            owner_installed: false,
            tsc_ordinal_audit_status: 0,
            allow_load_maint_pub: true,
            daa_proof: random_bytes(),
            daa_blob_key: random_bytes::<16>().to_vec(),
        };
        audit::init_defaults(&mut data);
        data
    }

    pub fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_u16(TPM_TAG_PERSISTENT_DATA);
        buffer.append_u8(self.rev_major);
        buffer.append_u8(self.rev_minor);
        buffer.append_bytes(&self.tpm_proof);
        buffer.append_bytes(&self.ek_reset);
        buffer.append_bytes(&self.owner_auth);
        buffer.append_bytes(&self.operator_auth);
        buffer.append_bytes(&self.auth_dir);
        match &self.manu_maint_pub {
            Some(blob) => {
                buffer.append_bool(true);
                buffer.append_sized(blob);
            }
            None => buffer.append_bool(false),
        }
        buffer.append_sized(&self.endorsement_key);
        buffer.append_sized(&self.srk);
        buffer.append_sized(&self.context_key);
        buffer.append_sized(&self.delegate_key);
        buffer.append_bytes(&self.audit_counter_label);
        buffer.append_u32(self.audit_monotonic_counter);
        for slot in &self.monotonic_counter {
            slot.store(buffer);
        }
        for attrib in &self.pcr_attrib {
            attrib.store(buffer);
        }
        buffer.append_bytes(&self.ordinal_audit_status);
        for entry in &self.family_table {
            entry.store(buffer);
        }
        for row in &self.delegate_table {
            row.store(buffer);
        }
        buffer.append_u32(self.last_family_id);
        buffer.append_u32(self.no_owner_nv_write);
        buffer.append_u32(self.restrict_delegate);
        buffer.append_bytes(&self.tpm_daa_seed);
        buffer.append_bool(self.owner_installed);
        buffer.append_u8(self.tsc_ordinal_audit_status);
        buffer.append_bool(self.allow_load_maint_pub);
        buffer.append_bytes(&self.daa_proof);
        buffer.append_sized(&self.daa_blob_key);
    }

    pub fn load(cursor: &mut Cursor<'_>) -> Result<Self, PermanentStateError> {
        cursor.expect_tag(TPM_TAG_PERSISTENT_DATA)?;
        let rev_major = cursor.load_u8()?;
        let rev_minor = cursor.load_u8()?;
        let tpm_proof = cursor.load_array()?;
        let ek_reset = cursor.load_array()?;
        let owner_auth = cursor.load_array()?;
        let operator_auth = cursor.load_array()?;
        let auth_dir = cursor.load_array()?;
        let manu_maint_pub = if cursor.load_bool()? {
            Some(cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec())
        } else {
            None
        };
        let endorsement_key = cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec();
        let srk = cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec();
        let context_key = cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec();
        let delegate_key = cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec();
        let audit_counter_label = cursor.load_array()?;
        let audit_monotonic_counter = cursor.load_u32()?;
        let mut monotonic_counter: [CounterSlot; TPM_MIN_COUNTERS] = Default::default();
        for slot in &mut monotonic_counter {
            *slot = CounterSlot::load(cursor)?;
        }
        let mut pcr_attrib: [PcrAttrib; TPM_NUM_PCR] = Default::default();
        for attrib in &mut pcr_attrib {
            *attrib = PcrAttrib::load(cursor)?;
        }
        let ordinal_audit_status = cursor.load_array()?;
        let mut family_table: [FamilyTableEntry; TPM_NUM_FAMILY_TABLE_ENTRY_MIN] =
            Default::default();
        for entry in &mut family_table {
            *entry = FamilyTableEntry::load(cursor)?;
        }
        let mut delegate_table: [DelegateTableRow; TPM_NUM_DELEGATE_TABLE_ENTRY_MIN] =
            Default::default();
        for row in &mut delegate_table {
            *row = DelegateTableRow::load(cursor)?;
        }
        Ok(Self {
            rev_major,
            rev_minor,
            tpm_proof,
            ek_reset,
            owner_auth,
            operator_auth,
            auth_dir,
            manu_maint_pub,
            endorsement_key,
            srk,
            context_key,
            delegate_key,
            audit_monotonic_counter,
            audit_counter_label,
            monotonic_counter,
            pcr_attrib,
            ordinal_audit_status,
            family_table,
            delegate_table,
            last_family_id: cursor.load_u32()?,
            no_owner_nv_write: cursor.load_u32()?,
            restrict_delegate: cursor.load_u32()?,
            tpm_daa_seed: cursor.load_array()?,
            owner_installed: cursor.load_bool()?,
            tsc_ordinal_audit_status: cursor.load_u8()?,
            allow_load_maint_pub: cursor.load_bool()?,
            daa_proof: cursor.load_array()?,
            daa_blob_key: cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec(),
        })
    }
}

/// NV index attribute word (`TPM_NV_ATTRIBUTES` permission bits).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct NvAttributes {
    pub pp_write: bool,
    pub owner_write: bool,
    pub auth_write: bool,
    #[bits(9)]
    _reserved0: u16,
    pub write_all: bool,
    pub write_define: bool,
    pub write_stclear: bool,
    pub global_lock: bool,
    pub pp_read: bool,
    pub owner_read: bool,
    pub auth_read: bool,
    #[bits(12)]
    _reserved1: u16,
    pub read_stclear: bool,
}

/// One user-defined NV index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvIndexEntry {
    pub nv_index: u32,
    pub attributes: NvAttributes,
    pub read_st_clear: bool,
    pub write_st_clear: bool,
    pub write_define: bool,
    pub auth_value: TpmSecret,
    pub data: Vec<u8>,
}

impl NvIndexEntry {
    fn store(&self, buffer: &mut Sbuffer) {
        buffer.append_u32(self.nv_index);
        buffer.append_u32(self.attributes.into_bits());
        buffer.append_bool(self.read_st_clear);
        buffer.append_bool(self.write_st_clear);
        buffer.append_bool(self.write_define);
        buffer.append_bytes(&self.auth_value);
        buffer.append_sized(&self.data);
    }

    fn load(cursor: &mut Cursor<'_>) -> Result<Self, PermanentStateError> {
        Ok(Self {
            nv_index: cursor.load_u32()?,
            attributes: NvAttributes::from_bits(cursor.load_u32()?),
            read_st_clear: cursor.load_bool()?,
            write_st_clear: cursor.load_bool()?,
            write_define: cursor.load_bool()?,
            auth_value: cursor.load_array()?,
            data: cursor.load_sized(TPM_MAX_NV_INDEX_DATA)?.to_vec(),
        })
    }
}

/// A key the Owner asked the TPM to keep loaded across power cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEvictKey {
    pub handle: u32,
    pub blob: Vec<u8>,
}

/// Outcome of the initial NV read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NvLoadOutcome {
    Loaded,
    /// The blob does not exist yet: first boot, not an error.
    FirstBoot,
}

/// The aggregate persistent state and its single-blob store protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPermanentState {
    pub data: PermanentData,
    pub flags: PermanentFlags,
    pub owner_evict: Vec<OwnerEvictKey>,
    pub nv_space: Vec<NvIndexEntry>,
}

impl TpmPermanentState {
    pub fn manufacture() -> Self {
        Self {
            data: PermanentData::manufacture(),
            flags: PermanentFlags::init(),
            owner_evict: Vec::new(),
            nv_space: Vec::new(),
        }
    }

    /// Serialize the four sections in fixed order, then append the SHA-1
    /// integrity digest over everything preceding it.
    pub fn store(&self) -> Vec<u8> {
        let mut buffer = Sbuffer::with_capacity(1024);
        buffer.append_u16(TPM_TAG_NVSTATE_V1);
        self.data.store(&mut buffer);
        self.flags.store(&mut buffer);
        buffer.append_u32(self.owner_evict.len() as u32);
        for entry in &self.owner_evict {
            buffer.append_u32(entry.handle);
            buffer.append_sized(&entry.blob);
        }
        buffer.append_u32(self.nv_space.len() as u32);
        for entry in &self.nv_space {
            entry.store(&mut buffer);
        }
        let digest = sha1_digest(&[buffer.as_bytes()]);
        buffer.append_bytes(&digest);
        buffer.into_vec()
    }

    /// Deserialize and verify a stream produced by [`Self::store`]. Any
    /// integrity mismatch is fatal; partial acceptance never happens.
    pub fn load(stream: &[u8]) -> Result<Self, PermanentStateError> {
        let mut cursor = Cursor::new(stream);
        cursor.expect_tag(TPM_TAG_NVSTATE_V1)?;
        let data = PermanentData::load(&mut cursor)?;
        let flags = PermanentFlags::load(&mut cursor)?;

        let evict_count = cursor.load_u32()? as usize;
        if evict_count > TPM_OWNER_EVICT_KEY_HANDLES {
            return Err(PermanentStateError::TableOverflow {
                table: "owner-evict key",
                count: evict_count,
                max: TPM_OWNER_EVICT_KEY_HANDLES,
            });
        }
        let mut owner_evict = Vec::with_capacity(evict_count);
        for _ in 0..evict_count {
            owner_evict.push(OwnerEvictKey {
                handle: cursor.load_u32()?,
                blob: cursor.load_sized(TPM_MAX_KEY_BLOB)?.to_vec(),
            });
        }

        let nv_count = cursor.load_u32()? as usize;
        if nv_count * 8 > TPM_MAX_NV_SPACE {
            return Err(PermanentStateError::TableOverflow {
                table: "NV index",
                count: nv_count,
                max: TPM_MAX_NV_SPACE / 8,
            });
        }
        let mut nv_space = Vec::with_capacity(nv_count);
        for _ in 0..nv_count {
            nv_space.push(NvIndexEntry::load(&mut cursor)?);
        }

        if cursor.remaining() != TPM_DIGEST_SIZE {
            return Err(PermanentStateError::BadIntegrityTrailer {
                remaining: cursor.remaining(),
            });
        }
        let covered = &stream[..cursor.consumed()];
        let stored: [u8; TPM_DIGEST_SIZE] = cursor.load_array()?;
        if sha1_digest(&[covered]) != stored {
            return Err(PermanentStateError::IntegrityDigestMismatch);
        }

        Ok(Self {
            data,
            flags,
            owner_evict,
            nv_space,
        })
    }

    /// Read the aggregate blob from NV. A missing blob is the distinguished
    /// first-boot condition; a malformed or corrupt blob is fatal.
    pub fn nv_load(
        &mut self,
        storage: &mut dyn NvStorage,
        tpm_number: u32,
    ) -> Result<NvLoadOutcome, PermanentStateError> {
        match storage.load_named_blob(tpm_number, TPM_PERMANENT_ALL_NAME)? {
            Some(blob) => {
                *self = Self::load(&blob)?;
                tracing::info!(tpm_number, len = blob.len(), "loaded permanent state");
                Ok(NvLoadOutcome::Loaded)
            }
            None => {
                tracing::info!(tpm_number, "no permanent state blob, first boot");
                Ok(NvLoadOutcome::FirstBoot)
            }
        }
    }

    /// Central persistence / rollback protocol, run at the end of every
    /// ordinal that may have touched permanent state.
    ///
    /// * `write_flag` false: nothing was supposed to change; pass
    ///   `incoming_rc` through untouched.
    /// * `write_flag` true, ordinal succeeded: serialize and write; any
    ///   failure here is fatal because memory and NV may now disagree.
    /// * `write_flag` true, ordinal failed: in-memory structures may be
    ///   partially mutated, so discard them, reload the last-good blob, and
    ///   return the ordinal's original error code.
    pub fn nv_store(
        &mut self,
        storage: &mut dyn NvStorage,
        tpm_number: u32,
        write_flag: bool,
        incoming_rc: u32,
    ) -> Result<u32, PermanentStateError> {
        if !write_flag {
            return Ok(incoming_rc);
        }

        if incoming_rc == TPM_SUCCESS {
            let blob = self.store();
            if blob.len() > TPM_MAX_NV_SPACE {
                return Err(PermanentStateError::NoSpace {
                    len: blob.len(),
                    max: TPM_MAX_NV_SPACE,
                });
            }
            storage.store_named_blob(tpm_number, TPM_PERMANENT_ALL_NAME, &blob)?;
            tracing::debug!(tpm_number, len = blob.len(), "persisted permanent state");
            Ok(TPM_SUCCESS)
        } else {
            // Rollback-then-report: the caller's error code survives, a
            // failure of the reload itself does not.
            tracing::warn!(
                tpm_number,
                rc = incoming_rc,
                "ordinal failed after mutating state, rolling back from NV"
            );
            match self.nv_load(storage, tpm_number) {
                Ok(NvLoadOutcome::Loaded) => Ok(incoming_rc),
                // A missing blob leaves the partial mutation in memory
                // with nothing valid to fall back to.
                Ok(NvLoadOutcome::FirstBoot) => Err(PermanentStateError::RollbackFailed {
                    original_rc: incoming_rc,
                    cause: Box::new(PermanentStateError::MissingRollbackBlob),
                }),
                Err(cause) => Err(PermanentStateError::RollbackFailed {
                    original_rc: incoming_rc,
                    cause: Box::new(cause),
                }),
            }
        }
    }

    /// Dry-run store: would the current state still fit the NV budget?
    pub fn is_space(&self) -> Result<(), PermanentStateError> {
        let len = self.store().len();
        if len > TPM_MAX_NV_SPACE {
            return Err(PermanentStateError::NoSpace {
                len,
                max: TPM_MAX_NV_SPACE,
            });
        }
        Ok(())
    }

    /// Dry-run store: free bytes under the NV budget.
    pub fn get_space(&self) -> usize {
        TPM_MAX_NV_SPACE.saturating_sub(self.store().len())
    }
}
