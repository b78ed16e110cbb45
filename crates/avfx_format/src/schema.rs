// SPDX-License-Identifier: MIT OR Apache-2.0
//! Closed per-kind layouts describing how each tag's payload is typed.
//!
//! Tags that a layout does not list are kept as raw bytes, so a layout only
//! has to cover what the editor wants to interpret.

use crate::chunk::Tag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of the root chunk of an effect file
pub const ROOT_TAG: Tag = Tag::new("AVFX");

/// Kinds of top-level nodes held by a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Spawn schedule
    Scheduler,
    /// Timeline of emitter items
    Timeline,
    /// Particle emitter
    Emitter,
    /// Particle definition
    Particle,
    /// Force / post effect
    Effector,
    /// Attachment binder
    Binder,
    /// Texture path
    Texture,
    /// Mesh data
    Model,
}

impl NodeKind {
    /// All kinds in the order their groups are written in a root chunk
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Scheduler,
        NodeKind::Timeline,
        NodeKind::Emitter,
        NodeKind::Particle,
        NodeKind::Effector,
        NodeKind::Binder,
        NodeKind::Texture,
        NodeKind::Model,
    ];

    /// Chunk tag of a node of this kind
    pub const fn tag(self) -> Tag {
        match self {
            NodeKind::Scheduler => Tag::new("Schd"),
            NodeKind::Timeline => Tag::new("TmLn"),
            NodeKind::Emitter => Tag::new("Emit"),
            NodeKind::Particle => Tag::new("Ptcl"),
            NodeKind::Effector => Tag::new("Efct"),
            NodeKind::Binder => Tag::new("Bind"),
            NodeKind::Texture => Tag::new("Tex"),
            NodeKind::Model => Tag::new("Modl"),
        }
    }

    /// Kind owning `tag`, if it is a node tag
    pub fn from_tag(tag: Tag) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Slot of this kind in per-kind arrays
    pub const fn slot(self) -> usize {
        match self {
            NodeKind::Scheduler => 0,
            NodeKind::Timeline => 1,
            NodeKind::Emitter => 2,
            NodeKind::Particle => 3,
            NodeKind::Effector => 4,
            NodeKind::Binder => 5,
            NodeKind::Texture => 6,
            NodeKind::Model => 7,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Scheduler => "Scheduler",
            NodeKind::Timeline => "Timeline",
            NodeKind::Emitter => "Emitter",
            NodeKind::Particle => "Particle",
            NodeKind::Effector => "Effector",
            NodeKind::Binder => "Binder",
            NodeKind::Texture => "Texture",
            NodeKind::Model => "Model",
        }
    }

    /// Prefix of the stable identifier used in rename maps
    pub fn workspace_prefix(self) -> &'static str {
        match self {
            NodeKind::Scheduler => "Schd",
            NodeKind::Timeline => "Tmln",
            NodeKind::Emitter => "Emit",
            NodeKind::Particle => "Ptcl",
            NodeKind::Effector => "Efct",
            NodeKind::Binder => "Bind",
            NodeKind::Texture => "Tex",
            NodeKind::Model => "Mdl",
        }
    }

    /// Body layout for this kind
    pub fn layout(self) -> &'static Layout {
        match self {
            NodeKind::Scheduler => &SCHEDULER,
            NodeKind::Timeline => &TIMELINE,
            NodeKind::Emitter => &EMITTER,
            NodeKind::Particle => &PARTICLE,
            NodeKind::Effector => &EFFECTOR,
            NodeKind::Binder => &BINDER,
            NodeKind::Texture => &TEXTURE,
            NodeKind::Model => &MODEL,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a tag's payload is interpreted
#[derive(Debug, Clone, Copy)]
pub enum Spec {
    /// 1, 2 or 4 byte integer
    Int,
    /// 4-byte float
    Float,
    /// One byte flag plus padding; `0xFF` is "no value"
    Bool,
    /// NUL-terminated string
    Text,
    /// Packed curve keys
    Curve,
    /// Lifetime block, or `-1` when disabled
    Life,
    /// Index into the group of the given kind; `-1` is "no target"
    Select(NodeKind),
    /// Nested chunks with their own layout
    Block(&'static Layout),
    /// Opaque bytes
    Raw,
}

/// Tag-to-spec table for one chunk body
#[derive(Debug)]
pub struct Layout {
    /// Name used in diagnostics
    pub name: &'static str,
    /// Known tags
    pub fields: &'static [(Tag, Spec)],
}

impl Layout {
    /// Spec for `tag`, `Spec::Raw` if the tag is not listed
    pub fn spec(&self, tag: Tag) -> Spec {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map_or(Spec::Raw, |(_, spec)| *spec)
    }
}

/// Top-level parameters of the root chunk
pub static ROOT: Layout = Layout {
    name: "Root",
    fields: &[
        (Tag::new("Ver"), Spec::Int),
        (Tag::new("bDFP"), Spec::Bool),
        (Tag::new("bDAP"), Spec::Bool),
        (Tag::new("bDRP"), Spec::Bool),
        (Tag::new("bGFD"), Spec::Bool),
        (Tag::new("bGSA"), Spec::Bool),
        (Tag::new("DwPT"), Spec::Int),
        (Tag::new("CulS"), Spec::Int),
        (Tag::new("RvSx"), Spec::Float),
        (Tag::new("RvSy"), Spec::Float),
        (Tag::new("RvSz"), Spec::Float),
        (Tag::new("NSTx"), Spec::Float),
        (Tag::new("FLTx"), Spec::Float),
    ],
};

/// Lifetime values
pub static LIFE: Layout = Layout {
    name: "Life",
    fields: &[
        (Tag::new("Val"), Spec::Float),
        (Tag::new("ValR"), Spec::Float),
        (Tag::new("Type"), Spec::Int),
    ],
};

/// Animated curve
pub static CURVE: Layout = Layout {
    name: "Curve",
    fields: &[
        (Tag::new("BvR"), Spec::Int),
        (Tag::new("CCT"), Spec::Int),
        (Tag::new("Keys"), Spec::Curve),
    ],
};

/// Scheduler item or trigger
pub static SCHEDULER_ITEM: Layout = Layout {
    name: "SchedulerItem",
    fields: &[
        (Tag::new("bEna"), Spec::Bool),
        (Tag::new("StTm"), Spec::Int),
        (Tag::new("TlNo"), Spec::Select(NodeKind::Timeline)),
    ],
};

/// Scheduler body
pub static SCHEDULER: Layout = Layout {
    name: "Scheduler",
    fields: &[
        (Tag::new("ItCn"), Spec::Int),
        (Tag::new("TrCn"), Spec::Int),
        (Tag::new("Item"), Spec::Block(&SCHEDULER_ITEM)),
        (Tag::new("Trgr"), Spec::Block(&SCHEDULER_ITEM)),
    ],
};

/// Timeline item
pub static TIMELINE_ITEM: Layout = Layout {
    name: "TimelineItem",
    fields: &[
        (Tag::new("bEna"), Spec::Bool),
        (Tag::new("StTm"), Spec::Int),
        (Tag::new("EdTm"), Spec::Int),
        (Tag::new("BdNo"), Spec::Select(NodeKind::Binder)),
        (Tag::new("EfNo"), Spec::Select(NodeKind::Effector)),
        (Tag::new("EmNo"), Spec::Select(NodeKind::Emitter)),
        (Tag::new("Plat"), Spec::Int),
        (Tag::new("ClNo"), Spec::Int),
    ],
};

/// Timeline body
pub static TIMELINE: Layout = Layout {
    name: "Timeline",
    fields: &[
        (Tag::new("TICn"), Spec::Int),
        (Tag::new("TCCn"), Spec::Int),
        (Tag::new("BnNo"), Spec::Select(NodeKind::Binder)),
        (Tag::new("bLp"), Spec::Bool),
        (Tag::new("LpSt"), Spec::Int),
        (Tag::new("LpEd"), Spec::Int),
        (Tag::new("Item"), Spec::Block(&TIMELINE_ITEM)),
    ],
};

/// Emitter item spawning a child emitter
pub static EMITTER_ITEM: Layout = Layout {
    name: "EmitterItem",
    fields: &[
        (Tag::new("bEnb"), Spec::Bool),
        (Tag::new("EmNo"), Spec::Select(NodeKind::Emitter)),
        (Tag::new("LpSt"), Spec::Int),
        (Tag::new("TgtB"), Spec::Int),
    ],
};

/// Emitter item spawning particles
pub static PARTICLE_ITEM: Layout = Layout {
    name: "ParticleItem",
    fields: &[
        (Tag::new("bEnb"), Spec::Bool),
        (Tag::new("PrNo"), Spec::Select(NodeKind::Particle)),
        (Tag::new("LpSt"), Spec::Int),
        (Tag::new("TgtB"), Spec::Int),
    ],
};

/// Emitter body
pub static EMITTER: Layout = Layout {
    name: "Emitter",
    fields: &[
        (Tag::new("SdNm"), Spec::Text),
        (Tag::new("SdNo"), Spec::Int),
        (Tag::new("EVT"), Spec::Int),
        (Tag::new("RBNo"), Spec::Int),
        (Tag::new("Life"), Spec::Life),
        (Tag::new("CrI"), Spec::Float),
        (Tag::new("EfNo"), Spec::Select(NodeKind::Effector)),
        (Tag::new("bRSp"), Spec::Bool),
        (Tag::new("Col"), Spec::Block(&CURVE)),
        (Tag::new("IntR"), Spec::Block(&CURVE)),
        (Tag::new("ItEm"), Spec::Block(&EMITTER_ITEM)),
        (Tag::new("ItPr"), Spec::Block(&PARTICLE_ITEM)),
    ],
};

/// Texture slot inside a particle
pub static TEXTURE_SLOT: Layout = Layout {
    name: "TextureSlot",
    fields: &[
        (Tag::new("bEna"), Spec::Bool),
        (Tag::new("UvSN"), Spec::Int),
        (Tag::new("TxNo"), Spec::Select(NodeKind::Texture)),
        (Tag::new("TFT"), Spec::Int),
    ],
};

/// Particle type specific data
pub static PARTICLE_DATA: Layout = Layout {
    name: "ParticleData",
    fields: &[
        (Tag::new("MdNo"), Spec::Select(NodeKind::Model)),
        (Tag::new("Mdl2"), Spec::Select(NodeKind::Model)),
        (Tag::new("Wid"), Spec::Block(&CURVE)),
        (Tag::new("Len"), Spec::Block(&CURVE)),
    ],
};

/// Particle body
pub static PARTICLE: Layout = Layout {
    name: "Particle",
    fields: &[
        (Tag::new("PrVT"), Spec::Int),
        (Tag::new("Life"), Spec::Life),
        (Tag::new("bDFP"), Spec::Bool),
        (Tag::new("bSCt"), Spec::Bool),
        (Tag::new("Scl"), Spec::Block(&CURVE)),
        (Tag::new("Rot"), Spec::Block(&CURVE)),
        (Tag::new("TC1"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TC2"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TC3"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TC4"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TN"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TR"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TD"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("TP"), Spec::Block(&TEXTURE_SLOT)),
        (Tag::new("Data"), Spec::Block(&PARTICLE_DATA)),
    ],
};

/// Effector body
pub static EFFECTOR: Layout = Layout {
    name: "Effector",
    fields: &[
        (Tag::new("EfVT"), Spec::Int),
        (Tag::new("RnPT"), Spec::Int),
        (Tag::new("bAFC"), Spec::Bool),
        (Tag::new("bTSC"), Spec::Bool),
        (Tag::new("Data"), Spec::Raw),
    ],
};

/// Binder body
pub static BINDER: Layout = Layout {
    name: "Binder",
    fields: &[
        (Tag::new("bStP"), Spec::Bool),
        (Tag::new("bRMN"), Spec::Bool),
        (Tag::new("bLkC"), Spec::Bool),
        (Tag::new("BnTp"), Spec::Int),
        (Tag::new("BnVr"), Spec::Int),
        (Tag::new("Life"), Spec::Life),
        (Tag::new("Data"), Spec::Raw),
    ],
};

/// Texture body
pub static TEXTURE: Layout = Layout {
    name: "Texture",
    fields: &[(Tag::new("Path"), Spec::Text)],
};

/// Model body; vertex data is kept raw
pub static MODEL: Layout = Layout {
    name: "Model",
    fields: &[
        (Tag::new("VDrw"), Spec::Raw),
        (Tag::new("VIdx"), Spec::Raw),
        (Tag::new("VEmt"), Spec::Raw),
        (Tag::new("VNum"), Spec::Raw),
    ],
};
