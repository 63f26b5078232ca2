//! Pull request categories and the display taxonomy.

use serde::{Deserialize, Serialize};

/// Relationship of a pull request to the configured viewer.
///
/// Serialized with the variant name (`"MineApproved"`, ...), matching what the
/// UI layer expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PullRequestCategory {
    MineApproved,
    MineChangesRequested,
    MinePending,
    ReviewRequested,
    Rereview,
    ReviewMissing,
}

impl PullRequestCategory {
    /// Every category, in declaration order.
    pub const ALL: [PullRequestCategory; 6] = [
        Self::MineApproved,
        Self::MineChangesRequested,
        Self::MinePending,
        Self::ReviewRequested,
        Self::Rereview,
        Self::ReviewMissing,
    ];

    /// Whether the viewer authored the pull request.
    pub fn is_mine(&self) -> bool {
        matches!(
            self,
            Self::MineApproved | Self::MineChangesRequested | Self::MinePending
        )
    }

    /// Key of the level-0 group this category is displayed under.
    pub fn parent_group(&self) -> &'static str {
        if self.is_mine() {
            "mine"
        } else {
            "review_requested"
        }
    }
}

impl std::fmt::Display for PullRequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MineApproved => write!(f, "MineApproved"),
            Self::MineChangesRequested => write!(f, "MineChangesRequested"),
            Self::MinePending => write!(f, "MinePending"),
            Self::ReviewRequested => write!(f, "ReviewRequested"),
            Self::Rereview => write!(f, "Rereview"),
            Self::ReviewMissing => write!(f, "ReviewMissing"),
        }
    }
}

impl std::str::FromStr for PullRequestCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.to_string() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// A node of the display taxonomy.
///
/// Level-0 nodes aggregate the categories of their children; level-1 nodes
/// map to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryNode {
    pub name: &'static str,
    pub level: u8,
    pub key: &'static str,
    pub categories: &'static [PullRequestCategory],
}

use PullRequestCategory::*;

/// The fixed taxonomy, in display order.
pub static CATEGORIES: &[CategoryNode] = &[
    CategoryNode {
        name: "Author",
        level: 0,
        key: "mine",
        categories: &[MineApproved, MineChangesRequested, MinePending],
    },
    CategoryNode {
        name: "Approved",
        level: 1,
        key: "mine_approved",
        categories: &[MineApproved],
    },
    CategoryNode {
        name: "Changes requested",
        level: 1,
        key: "mine_changes_requested",
        categories: &[MineChangesRequested],
    },
    CategoryNode {
        name: "Pending",
        level: 1,
        key: "mine_pending",
        categories: &[MinePending],
    },
    CategoryNode {
        name: "Reviewer",
        level: 0,
        key: "review_requested",
        categories: &[ReviewRequested, Rereview, ReviewMissing],
    },
    CategoryNode {
        name: "Review requested",
        level: 1,
        key: "review_requested_direct",
        categories: &[ReviewRequested],
    },
    CategoryNode {
        name: "Re-review",
        level: 1,
        key: "re-review",
        categories: &[Rereview],
    },
    CategoryNode {
        name: "Review missing",
        level: 1,
        key: "review_missing",
        categories: &[ReviewMissing],
    },
];

/// Nodes at the given level, in display order.
pub fn nodes_for_level(level: u8) -> impl Iterator<Item = &'static CategoryNode> {
    CATEGORIES.iter().filter(move |node| node.level == level)
}

/// The level-1 node that displays a category.
pub fn leaf_for(category: PullRequestCategory) -> Option<&'static CategoryNode> {
    nodes_for_level(1).find(|node| node.categories == [category])
}
