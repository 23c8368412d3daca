//! LVM Records and Row Parser
//!
//! Typed physical volume, volume group and logical volume records parsed from
//! the `--nameprefixes` output of `pvs`, `vgs` and `lvs`. Every row is a list of
//! `LVM2_KEY='value'` components joined by [`SEPARATOR`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Separator passed to the LVM tools with `--separator`
pub const SEPARATOR: &str = "<:SEP:>";

/// Components in an `lvs` row
pub const LV_ARITY: usize = 8;
/// Components in a `vgs` row
pub const VG_ARITY: usize = 5;
/// Components in a `pvs` row
pub const PV_ARITY: usize = 4;

/// Length of the `lv_attr` bitfield
pub const LV_ATTR_LEN: usize = 10;

// =============================================================================
// Attribute Bitfield
// =============================================================================

/// Declares a single-character attribute enum. Characters outside the known
/// set are kept verbatim so that decoding never loses information.
macro_rules! lv_attr_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $ch:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
            Other(char),
        }

        impl $name {
            pub fn from_char(c: char) -> Self {
                match c {
                    $($ch => $name::$variant,)+
                    other => $name::Other(other),
                }
            }

            pub fn as_char(&self) -> char {
                match self {
                    $($name::$variant => $ch,)+
                    $name::Other(c) => *c,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_char())
            }
        }
    };
}

lv_attr_enum! {
    /// Position 0: volume type
    VolumeType {
        Mirrored = 'm',
        MirroredWithoutSync = 'M',
        Origin = 'o',
        OriginWithMergingSnapshot = 'O',
        Raid = 'r',
        RaidWithoutSync = 'R',
        Snapshot = 's',
        MergingSnapshot = 'S',
        PvMove = 'p',
        VirtualMirror = 'v',
        VirtualRaidImage = 'i',
        RaidImageOutOfSync = 'I',
        MirrorLog = 'l',
        UnderConversion = 'c',
        Thin = 'V',
        ThinPool = 't',
        ThinPoolData = 'T',
        RaidOrThinPoolMetadata = 'e',
        Plain = '-',
    }
}

lv_attr_enum! {
    /// Position 1: permissions
    VolumePermissions {
        Writeable = 'w',
        ReadOnly = 'r',
        ReadOnlyActivation = 'R',
    }
}

lv_attr_enum! {
    /// Position 2: allocation policy
    VolumeAllocation {
        Anywhere = 'a',
        Contiguous = 'c',
        Inherited = 'i',
        Cling = 'l',
        Normal = 'n',
        AnywhereLocked = 'A',
        ContiguousLocked = 'C',
        InheritedLocked = 'I',
        ClingLocked = 'L',
        NormalLocked = 'N',
    }
}

lv_attr_enum! {
    /// Position 3: fixed minor number
    VolumeFixedMinor {
        Enabled = 'm',
        Disabled = '-',
    }
}

lv_attr_enum! {
    /// Position 4: state
    VolumeState {
        Active = 'a',
        Suspended = 's',
        InvalidSnapshot = 'I',
        InvalidSuspendedSnapshot = 'S',
        SnapshotMergeFailed = 'm',
        SuspendedSnapshotMergeFailed = 'M',
        MappedDevicePresentWithoutTables = 'd',
        MappedDevicePresentWithInactiveTable = 'i',
        Inactive = '-',
    }
}

lv_attr_enum! {
    /// Position 5: device open
    VolumeOpen {
        IsOpen = 'o',
        IsNotOpen = '-',
    }
}

lv_attr_enum! {
    /// Position 6: target type
    VolumeTargetType {
        Mirror = 'm',
        Raid = 'r',
        Snapshot = 's',
        Thin = 't',
        Unknown = 'u',
        Virtual = 'v',
        None = '-',
    }
}

lv_attr_enum! {
    /// Position 7: newly-allocated data blocks are zeroed
    VolumeZeroing {
        IsZeroing = 'z',
        IsNonZeroing = '-',
    }
}

lv_attr_enum! {
    /// Position 8: volume health
    VolumeHealth {
        Ok = '-',
        Partial = 'p',
        RefreshNeeded = 'r',
        MismatchesExist = 'm',
        Writemostly = 'w',
    }
}

lv_attr_enum! {
    /// Position 9: activation skipped
    VolumeActivationSkipped {
        IsSkipped = 's',
        IsNotSkipped = '-',
    }
}

/// Decoded `lv_attr` bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvAttributes {
    pub volume_type: VolumeType,
    pub permissions: VolumePermissions,
    pub allocation: VolumeAllocation,
    pub fixed_minor: VolumeFixedMinor,
    pub state: VolumeState,
    pub open: VolumeOpen,
    pub target_type: VolumeTargetType,
    pub zeroing: VolumeZeroing,
    pub health: VolumeHealth,
    pub activation_skipped: VolumeActivationSkipped,
}

impl LvAttributes {
    /// Decode the 10-character attribute string, one property per position
    pub fn parse(attrs: &str) -> Result<Self> {
        let chars: Vec<char> = attrs.chars().collect();
        if chars.len() != LV_ATTR_LEN {
            return Err(Error::AttributeLength {
                len: chars.len(),
                attrs: attrs.to_string(),
            });
        }

        Ok(Self {
            volume_type: VolumeType::from_char(chars[0]),
            permissions: VolumePermissions::from_char(chars[1]),
            allocation: VolumeAllocation::from_char(chars[2]),
            fixed_minor: VolumeFixedMinor::from_char(chars[3]),
            state: VolumeState::from_char(chars[4]),
            open: VolumeOpen::from_char(chars[5]),
            target_type: VolumeTargetType::from_char(chars[6]),
            zeroing: VolumeZeroing::from_char(chars[7]),
            health: VolumeHealth::from_char(chars[8]),
            activation_skipped: VolumeActivationSkipped::from_char(chars[9]),
        })
    }

    pub fn activation_skipped(&self) -> bool {
        self.activation_skipped == VolumeActivationSkipped::IsSkipped
    }
}

impl std::fmt::Display for LvAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}{}{}{}{}",
            self.volume_type,
            self.permissions,
            self.allocation,
            self.fixed_minor,
            self.state,
            self.open,
            self.target_type,
            self.zeroing,
            self.health,
            self.activation_skipped
        )
    }
}

// =============================================================================
// Records
// =============================================================================

/// A logical volume as reported by `lvs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    pub size: u64,
    pub uuid: String,
    pub attributes: LvAttributes,
    pub copy_percent: String,
    pub kernel_major: u32,
    pub kernel_minor: u32,
    pub tags: Vec<String>,
}

/// A volume group as reported by `vgs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    pub size: u64,
    pub free_size: u64,
    pub uuid: String,
    pub tags: Vec<String>,
}

/// A physical volume as reported by `pvs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolume {
    pub name: String,
    pub vg_name: String,
    pub size: u64,
    pub uuid: String,
}

impl LogicalVolume {
    /// Parse one `lvs -o lv_name,lv_size,lv_uuid,lv_attr,copy_percent,lv_kernel_major,lv_kernel_minor,lv_tags` row
    pub fn parse(line: &str) -> Result<Self> {
        let fields = parse_fields(line, LV_ARITY)?;

        Ok(Self {
            name: field(&fields, "LVM2_LV_NAME")?.to_string(),
            size: parse_u64(&fields, "LVM2_LV_SIZE")?,
            uuid: field(&fields, "LVM2_LV_UUID")?.to_string(),
            attributes: LvAttributes::parse(field(&fields, "LVM2_LV_ATTR")?)?,
            copy_percent: field(&fields, "LVM2_COPY_PERCENT")?.to_string(),
            kernel_major: parse_u32(&fields, "LVM2_LV_KERNEL_MAJOR")?,
            kernel_minor: parse_u32(&fields, "LVM2_LV_KERNEL_MINOR")?,
            tags: parse_tags(field(&fields, "LVM2_LV_TAGS")?),
        })
    }
}

impl VolumeGroup {
    /// Parse one `vgs -o vg_name,vg_size,vg_free,vg_uuid,vg_tags` row
    pub fn parse(line: &str) -> Result<Self> {
        let fields = parse_fields(line, VG_ARITY)?;

        Ok(Self {
            name: field(&fields, "LVM2_VG_NAME")?.to_string(),
            size: parse_u64(&fields, "LVM2_VG_SIZE")?,
            free_size: parse_u64(&fields, "LVM2_VG_FREE")?,
            uuid: field(&fields, "LVM2_VG_UUID")?.to_string(),
            tags: parse_tags(field(&fields, "LVM2_VG_TAGS")?),
        })
    }
}

impl PhysicalVolume {
    /// Parse one `pvs -o vg_name,pv_name,pv_size,pv_uuid` row
    pub fn parse(line: &str) -> Result<Self> {
        let fields = parse_fields(line, PV_ARITY)?;

        Ok(Self {
            name: field(&fields, "LVM2_PV_NAME")?.to_string(),
            vg_name: field(&fields, "LVM2_VG_NAME")?.to_string(),
            size: parse_u64(&fields, "LVM2_PV_SIZE")?,
            uuid: field(&fields, "LVM2_PV_UUID")?.to_string(),
        })
    }
}

// =============================================================================
// Row Parsing
// =============================================================================

/// Split a row into its `key -> value` components.
///
/// Fails when the component count differs from `arity`, when a component has
/// no `=`, or when the value is not wrapped in single quotes.
pub fn parse_fields(line: &str, arity: usize) -> Result<BTreeMap<String, String>> {
    let components: Vec<&str> = line.split(SEPARATOR).collect();
    if components.len() != arity {
        return Err(Error::MalformedRecord(format!(
            "expected {} components, got {}",
            arity,
            components.len()
        )));
    }

    let mut fields = BTreeMap::new();
    for component in components {
        let (key, value) = component.split_once('=').ok_or_else(|| {
            Error::MalformedRecord(format!("failed to parse component '{}'", component))
        })?;

        let unquoted = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .ok_or_else(|| {
                Error::MalformedRecord(format!("failed to parse component '{}'", component))
            })?;

        fields.insert(key.to_string(), unquoted.to_string());
    }

    Ok(fields)
}

/// Parse every data row of a listing, skipping blank and `WARNING` lines
pub fn parse_rows<T>(output: &str, parse: impl Fn(&str) -> Result<T>) -> Result<Vec<T>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("WARNING"))
        .map(|line| {
            parse(line).map_err(|e| match e {
                Error::MalformedRecord(reason) => {
                    Error::MalformedRecord(format!("{}: {}", line, reason))
                }
                other => other,
            })
        })
        .collect()
}

/// Comma-split tag list; an empty string means no tags
pub fn parse_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|t| t.to_string()).collect()
}

fn field<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::MalformedRecord(format!("missing field {}", key)))
}

fn parse_u64(fields: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    let raw = field(fields, key)?;
    raw.parse()
        .map_err(|_| Error::MalformedRecord(format!("invalid {}: '{}'", key, raw)))
}

fn parse_u32(fields: &BTreeMap<String, String>, key: &str) -> Result<u32> {
    let raw = field(fields, key)?;
    raw.parse()
        .map_err(|_| Error::MalformedRecord(format!("invalid {}: '{}'", key, raw)))
}
