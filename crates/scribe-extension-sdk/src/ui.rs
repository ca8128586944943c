//! UI element descriptors contributed by extensions.
//!
//! The host window itself lives elsewhere; extensions only describe what
//! they contribute, and the host tracks those descriptors so it can remove
//! them again at unload time.

use serde::{Deserialize, Serialize};

/// Kind of UI element an extension can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiElementKind {
    MenuItem,
    ToolbarButton,
    SidebarPanel,
    StatusBarItem,
}

/// A UI element registered by an extension. The `id` is assigned by the host
/// when the element is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: String,
    pub kind: UiElementKind,
    pub title: String,
}

impl std::fmt::Display for UiElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MenuItem => write!(f, "menu_item"),
            Self::ToolbarButton => write!(f, "toolbar_button"),
            Self::SidebarPanel => write!(f, "sidebar_panel"),
            Self::StatusBarItem => write!(f, "status_bar_item"),
        }
    }
}
