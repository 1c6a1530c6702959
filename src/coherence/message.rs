use serde::Serialize;
use std::fmt;

use super::AccessInfo;
use crate::cache::Tag;

pub type MessageId = u64;

/// Size of a message that carries control information only.
pub const CONTROL_BYTES: u32 = 8;

/// Size of a message that carries a full line.
pub fn data_bytes(line_size: u32) -> u32 {
    line_size + CONTROL_BYTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DeviceId {
    L1(usize),
    Llc,
    Memory,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1(core) => write!(f, "l1[{}]", core),
            Self::Llc => f.write_str("llc"),
            Self::Memory => f.write_str("mem"),
        }
    }
}

/// Protocol message kinds.  Reply-only fields are filled in by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    DownwardRead { shared: bool },
    DownwardWrite,
    Evict { dirty: bool },
    UpwardRead { has_copyback: bool },
    UpwardWrite,
    MemRead,
    MemWrite,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownwardRead { .. } => "DownwardRead",
            Self::DownwardWrite => "DownwardWrite",
            Self::Evict { .. } => "Evict",
            Self::UpwardRead { .. } => "UpwardRead",
            Self::UpwardWrite => "UpwardWrite",
            Self::MemRead => "MemRead",
            Self::MemWrite => "MemWrite",
        }
    }
}

/// A request travelling between devices.  The same value travels back as the reply, routed to
/// `sender` and matched to the waiting process by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: DeviceId,
    pub access: AccessInfo,
    pub tag: Tag,
    pub kind: MessageKind,
    pub has_error: bool,
}

impl Message {
    pub fn new(id: MessageId, sender: DeviceId, access: AccessInfo, tag: Tag, kind: MessageKind) -> Self {
        Self {
            id,
            sender,
            access,
            tag,
            kind,
            has_error: false,
        }
    }

    /// Index of the first-level cache that sent this message.
    pub fn source_core(&self) -> usize {
        match self.sender {
            DeviceId::L1(core) => core,
            other => panic!("{} expected from a first-level cache, got {}", self.kind.name(), other),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} from {} @ 0x{:08x} ({})",
            self.kind.name(),
            self.id,
            self.sender,
            self.tag,
            self.access
        )?;
        if self.has_error {
            f.write_str(" [error]")?;
        }
        Ok(())
    }
}
