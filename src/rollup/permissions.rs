//! Permission-compatibility scoring.
//!
//! A directory may absorb its subdirectories only when everyone allowed to
//! read the merged database was already allowed to read every subdirectory's
//! database. Only read/execute bits take part; write bits never change what a
//! reader of the index can see.

use std::fmt;

use serde::Serialize;

/// `{mode, uid, gid}` from a directory's root summary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Which compatibility rule justified a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RollupScore {
    /// Parent and every child are world readable and searchable, same owner and group.
    OtherReadable = 1,
    /// User and group bits match, same owner and group.
    UserGroup = 2,
    /// User bits match, children grant nothing to group or world, same owner.
    UserOnly = 3,
    /// User, group and world bits all match, same owner and group.
    Full = 4,
}

impl RollupScore {
    pub const ALL: [Self; 4] = [Self::OtherReadable, Self::UserGroup, Self::UserOnly, Self::Full];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::OtherReadable),
            2 => Some(Self::UserGroup),
            3 => Some(Self::UserOnly),
            4 => Some(Self::Full),
            _ => None,
        }
    }

    /// Zero-based slot for per-score counters.
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for RollupScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

const OTHER_RX: u32 = 0o005;
const UGO_RX: u32 = 0o555;
const UG_RX: u32 = 0o550;
const U_RX: u32 = 0o500;
const GO_RX: u32 = 0o055;

fn other_readable(parent: &Permissions, child: &Permissions) -> bool {
    parent.mode & OTHER_RX == OTHER_RX
        && child.mode & OTHER_RX == OTHER_RX
        && parent.uid == child.uid
        && parent.gid == child.gid
}

fn full_match(parent: &Permissions, child: &Permissions) -> bool {
    parent.mode & UGO_RX == child.mode & UGO_RX
        && parent.uid == child.uid
        && parent.gid == child.gid
}

fn user_group_match(parent: &Permissions, child: &Permissions) -> bool {
    parent.mode & UG_RX == child.mode & UG_RX && parent.uid == child.uid && parent.gid == child.gid
}

fn user_only_match(parent: &Permissions, child: &Permissions) -> bool {
    parent.mode & U_RX == child.mode & U_RX && child.mode & GO_RX == 0 && parent.uid == child.uid
}

/// Score `parent` against all of `children` at once.
///
/// A rule applies only if it holds for every child. Rules are tried in the
/// order o+rx, full, user+group, user-only; the first that applies wins.
/// No children means every rule holds.
pub fn check_permissions(parent: &Permissions, children: &[Permissions]) -> Option<RollupScore> {
    let rules: [(RollupScore, fn(&Permissions, &Permissions) -> bool); 4] = [
        (RollupScore::OtherReadable, other_readable),
        (RollupScore::Full, full_match),
        (RollupScore::UserGroup, user_group_match),
        (RollupScore::UserOnly, user_only_match),
    ];

    rules
        .iter()
        .find(|(_, rule)| children.iter().all(|child| rule(parent, child)))
        .map(|(score, _)| *score)
}
