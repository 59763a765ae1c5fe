//! Multi-display layout optimizer.
//!
//! A device may expose up to four displays at once.  The panel that shows them
//! arranges the displays in a binary *split-tree*: every internal node splits
//! its area either side by side (horizontal) or one above the other (vertical),
//! and every leaf shows one display.  All displays are drawn with the same
//! scale factor, so the best tree is the one whose composite size lets that
//! common scale be as large as possible inside the available canvas.
//!
//! # How the search works (for beginners)
//!
//! With four or fewer rectangles the number of possible trees is tiny, so the
//! optimizer simply tries all of them:
//!
//! ```text
//!            {0,1,2}
//!      ┌────────┼─────────┐
//!  {0}|{1,2}  {0,1}|{2}  {0,2}|{1}     ← partitions; the first group always holds
//!      │                                  the lowest index so mirror images are
//!   H or V                                never enumerated twice
//!      │
//!  {1,2} split again with the orientation that differs from its parent
//! ```
//!
//! A tree's size is computed bottom-up: a horizontal split sums the widths of
//! its children and takes the larger height; a vertical split does the
//! opposite.  The scale of a candidate is
//! `min(canvas_width / tree_width, canvas_height / tree_height)`.
//!
//! The optimizer's output is also what the surrounding panel persists, in the
//! serialisable [`PanelLayout`] form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::display::Size;

/// Largest number of rectangles the optimizer accepts.
pub const MAX_RECTANGLES: usize = 4;

/// Errors that can occur while computing or converting a layout.
#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    /// No rectangles were supplied.
    #[error("at least one rectangle is required")]
    NoRectangles,

    /// More rectangles than the exhaustive search supports.
    #[error("too many rectangles: {0} (at most {MAX_RECTANGLES} are supported)")]
    TooManyRectangles(usize),

    /// The canvas has a zero dimension.
    #[error("available space must have a non-zero width and height")]
    EmptyCanvas,

    /// One of the rectangles has a zero dimension.
    #[error("rectangle {0} has a zero width or height")]
    EmptyRectangle(usize),

    /// A leaf references a rectangle index with no matching display id.
    #[error("no display id for rectangle index {0}")]
    UnknownRectangleIndex(usize),

    /// A persisted panel layout could not be read or written.
    #[error("panel layout serialization failed: {0}")]
    Serialization(String),
}

/// Direction in which a split node divides its area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    /// Children are placed side by side.
    Horizontal,
    /// Children are stacked vertically.
    Vertical,
}

impl SplitType {
    const ALL: [SplitType; 2] = [SplitType::Horizontal, SplitType::Vertical];
}

/// Immutable split-tree produced by [`best_layout`].
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutNode {
    Leaf {
        /// Index into the slice passed to [`best_layout`].
        rectangle_index: usize,
        size: Size,
    },
    Split {
        split_type: SplitType,
        first: Box<LayoutNode>,
        second: Box<LayoutNode>,
    },
}

impl LayoutNode {
    fn split(split_type: SplitType, first: LayoutNode, second: LayoutNode) -> Self {
        LayoutNode::Split {
            split_type,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Composite size of the subtree at scale 1.
    pub fn size(&self) -> Size {
        match self {
            LayoutNode::Leaf { size, .. } => *size,
            LayoutNode::Split { split_type, first, second } => {
                let a = first.size();
                let b = second.size();
                match split_type {
                    SplitType::Horizontal => Size::new(a.width.saturating_add(b.width), a.height.max(b.height)),
                    SplitType::Vertical => Size::new(a.width.max(b.width), a.height.saturating_add(b.height)),
                }
            }
        }
    }

    /// Fraction of the split axis occupied by the first child, or `None` for a leaf.
    pub fn split_ratio(&self) -> Option<f64> {
        match self {
            LayoutNode::Leaf { .. } => None,
            LayoutNode::Split { split_type, first, second } => {
                let a = first.size();
                let b = second.size();
                let (a, b) = match split_type {
                    SplitType::Horizontal => (a.width, b.width),
                    SplitType::Vertical => (a.height, b.height),
                };
                Some(f64::from(a) / (f64::from(a) + f64::from(b)))
            }
        }
    }

    /// Largest uniform scale at which this tree fits inside `available`.
    pub fn scale_to_fit(&self, available: Size) -> f64 {
        let size = self.size();
        let sx = f64::from(available.width) / f64::from(size.width);
        let sy = f64::from(available.height) / f64::from(size.height);
        sx.min(sy)
    }

    /// Rectangle indices in left-to-right leaf order.
    pub fn leaf_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            LayoutNode::Leaf { rectangle_index, .. } => out.push(*rectangle_index),
            LayoutNode::Split { first, second, .. } => {
                first.collect_leaves(out);
                second.collect_leaves(out);
            }
        }
    }
}

// ── Optimizer ─────────────────────────────────────────────────────────────────

/// Finds the split-tree that maximises the common scale of `sizes` inside
/// `available`.
///
/// A single rectangle is returned as a leaf without searching.  Among
/// candidates with equal scale, the first one enumerated wins.
///
/// # Errors
///
/// Returns [`LayoutError`] for an empty or oversized input, an empty canvas,
/// or an empty rectangle.
pub fn best_layout(available: Size, sizes: &[Size]) -> Result<LayoutNode, LayoutError> {
    match sizes.len() {
        0 => return Err(LayoutError::NoRectangles),
        n if n > MAX_RECTANGLES => return Err(LayoutError::TooManyRectangles(n)),
        _ => {}
    }
    if let Some(index) = sizes.iter().position(Size::is_empty) {
        return Err(LayoutError::EmptyRectangle(index));
    }
    if sizes.len() == 1 {
        return Ok(LayoutNode::Leaf { rectangle_index: 0, size: sizes[0] });
    }
    if available.is_empty() {
        return Err(LayoutError::EmptyCanvas);
    }

    let indices: Vec<usize> = (0..sizes.len()).collect();
    let mut best: Option<(f64, LayoutNode)> = None;
    for candidate in enumerate_trees(&indices, sizes, None) {
        let scale = candidate.scale_to_fit(available);
        let better = match &best {
            Some((best_scale, _)) => scale > *best_scale,
            None => true,
        };
        if better {
            best = Some((scale, candidate));
        }
    }

    best.map(|(_, node)| node).ok_or(LayoutError::NoRectangles)
}

/// Enumerates every canonical tree over `group`.
///
/// `parent` is the orientation of the enclosing split when `group` is that
/// split's first child; such a subtree must not start with the same
/// orientation, because `(A | B) | C` and `A | (B | C)` are the same
/// arrangement.  The second child is unconstrained so that a run of three or
/// four displays in one row or column is still reachable.
fn enumerate_trees(group: &[usize], sizes: &[Size], parent: Option<SplitType>) -> Vec<LayoutNode> {
    if let [index] = group {
        return vec![LayoutNode::Leaf { rectangle_index: *index, size: sizes[*index] }];
    }

    let (head, rest) = (group[0], &group[1..]);
    let mut trees = Vec::new();

    // Each bit of `mask` moves one element of `rest` into the first group.
    // The all-ones mask would leave the second group empty.
    for mask in 0..(1u32 << rest.len()) - 1 {
        let mut first = vec![head];
        let mut second = Vec::new();
        for (bit, &index) in rest.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                first.push(index);
            } else {
                second.push(index);
            }
        }

        for split_type in SplitType::ALL {
            if parent == Some(split_type) {
                continue;
            }
            let first_trees = enumerate_trees(&first, sizes, Some(split_type));
            let second_trees = enumerate_trees(&second, sizes, None);
            for a in &first_trees {
                for b in &second_trees {
                    trees.push(LayoutNode::split(split_type, a.clone(), b.clone()));
                }
            }
        }
    }
    trees
}

// ── Persisted panel layout ────────────────────────────────────────────────────

/// Serialisable split-panel state written and read by the multi-display panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelLayout {
    Display {
        display_id: u32,
    },
    Split {
        orientation: SplitType,
        /// Fraction of the split axis given to `first`.
        proportion: f64,
        first: Box<PanelLayout>,
        second: Box<PanelLayout>,
    },
}

impl PanelLayout {
    /// Converts an optimizer result, mapping rectangle index `i` to
    /// `display_ids[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnknownRectangleIndex`] if a leaf index has no id.
    pub fn from_layout_node(node: &LayoutNode, display_ids: &[u32]) -> Result<Self, LayoutError> {
        match node {
            LayoutNode::Leaf { rectangle_index, .. } => display_ids
                .get(*rectangle_index)
                .map(|&display_id| PanelLayout::Display { display_id })
                .ok_or(LayoutError::UnknownRectangleIndex(*rectangle_index)),
            LayoutNode::Split { split_type, first, second } => Ok(PanelLayout::Split {
                orientation: *split_type,
                proportion: node.split_ratio().unwrap_or(0.5),
                first: Box::new(Self::from_layout_node(first, display_ids)?),
                second: Box::new(Self::from_layout_node(second, display_ids)?),
            }),
        }
    }

    /// Display ids in leaf order.
    pub fn display_ids(&self) -> Vec<u32> {
        match self {
            PanelLayout::Display { display_id } => vec![*display_id],
            PanelLayout::Split { first, second, .. } => {
                let mut ids = first.display_ids();
                ids.extend(second.display_ids());
                ids
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`LayoutError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, LayoutError> {
        serde_json::to_string(self).map_err(|e| LayoutError::Serialization(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`LayoutError::Serialization`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        serde_json::from_str(json).map_err(|e| LayoutError::Serialization(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sz(width: u32, height: u32) -> Size {
        Size::new(width, height)
    }

    // ── Degenerate inputs ─────────────────────────────────────────────────────

    #[test]
    fn test_best_layout_single_rectangle_returns_leaf() {
        // Arrange / Act
        let node = best_layout(sz(50, 50), &[sz(100, 100)]).unwrap();

        // Assert
        assert_eq!(node, LayoutNode::Leaf { rectangle_index: 0, size: sz(100, 100) });
        assert_eq!(node.split_ratio(), None);
    }

    #[test]
    fn test_best_layout_rejects_empty_input() {
        assert_eq!(best_layout(sz(100, 100), &[]), Err(LayoutError::NoRectangles));
    }

    #[test]
    fn test_best_layout_rejects_more_than_four_rectangles() {
        let sizes = vec![sz(10, 10); 5];
        assert_eq!(best_layout(sz(100, 100), &sizes), Err(LayoutError::TooManyRectangles(5)));
    }

    #[test]
    fn test_best_layout_rejects_zero_sized_rectangle() {
        let result = best_layout(sz(100, 100), &[sz(10, 10), sz(0, 10)]);
        assert_eq!(result, Err(LayoutError::EmptyRectangle(1)));
    }

    #[test]
    fn test_best_layout_rejects_empty_canvas_for_multiple_rectangles() {
        let result = best_layout(sz(0, 100), &[sz(10, 10), sz(10, 10)]);
        assert_eq!(result, Err(LayoutError::EmptyCanvas));
    }

    // ── Search results ────────────────────────────────────────────────────────

    #[test]
    fn test_best_layout_two_squares_in_wide_canvas_split_horizontally() {
        // Arrange
        let canvas = sz(300, 100);

        // Act
        let node = best_layout(canvas, &[sz(100, 100), sz(100, 100)]).unwrap();

        // Assert
        match &node {
            LayoutNode::Split { split_type, .. } => assert_eq!(*split_type, SplitType::Horizontal),
            other => panic!("expected a split, got {other:?}"),
        }
        assert_eq!(node.split_ratio(), Some(0.5));
        assert_eq!(node.size(), sz(200, 100));
        assert!((node.scale_to_fit(canvas) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_layout_two_squares_in_tall_canvas_split_vertically() {
        let node = best_layout(sz(100, 300), &[sz(100, 100), sz(100, 100)]).unwrap();
        assert!(matches!(node, LayoutNode::Split { split_type: SplitType::Vertical, .. }));
    }

    #[test]
    fn test_best_layout_three_squares_in_wide_canvas_form_one_row() {
        // Arrange: a row of three fits at scale 1, any other shape is smaller.
        let canvas = sz(300, 100);

        // Act
        let node = best_layout(canvas, &[sz(100, 100); 3]).unwrap();

        // Assert
        assert_eq!(node.size(), sz(300, 100));
        assert!((node.scale_to_fit(canvas) - 1.0).abs() < 1e-9);
        let mut leaves = node.leaf_indices();
        leaves.sort_unstable();
        assert_eq!(leaves, vec![0, 1, 2]);
    }

    #[test]
    fn test_best_layout_four_squares_in_square_canvas_form_grid() {
        // Arrange
        let canvas = sz(200, 200);

        // Act
        let node = best_layout(canvas, &[sz(100, 100); 4]).unwrap();

        // Assert: a 2x2 grid fills the canvas exactly.
        assert_eq!(node.size(), sz(200, 200));
        assert!((node.scale_to_fit(canvas) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_layout_mixed_sizes_prefers_tall_beside_stack() {
        // Arrange: one tall display and two small ones that stack to the same height.
        let sizes = [sz(100, 200), sz(100, 100), sz(100, 100)];
        let canvas = sz(200, 200);

        // Act
        let node = best_layout(canvas, &sizes).unwrap();

        // Assert
        assert_eq!(node.size(), sz(200, 200));
        match &node {
            LayoutNode::Split { split_type, first, second } => {
                assert_eq!(*split_type, SplitType::Horizontal);
                assert_eq!(first.leaf_indices(), vec![0]);
                assert!(matches!(**second, LayoutNode::Split { split_type: SplitType::Vertical, .. }));
            }
            other => panic!("expected a split, got {other:?}"),
        }
    }

    #[test]
    fn test_best_layout_first_group_always_contains_index_zero() {
        let node = best_layout(sz(400, 100), &[sz(50, 100), sz(100, 100), sz(150, 100)]).unwrap();
        assert_eq!(node.leaf_indices()[0], 0);
    }

    #[test]
    fn test_enumerate_trees_first_child_never_repeats_parent_orientation() {
        fn check(node: &LayoutNode) {
            if let LayoutNode::Split { split_type, first, second } = node {
                if let LayoutNode::Split { split_type: inner, .. } = first.as_ref() {
                    assert_ne!(inner, split_type);
                }
                check(first);
                check(second);
            }
        }
        let sizes = [sz(1, 1); 4];
        for tree in enumerate_trees(&[0, 1, 2, 3], &sizes, None) {
            check(&tree);
        }
    }

    // ── Node geometry ─────────────────────────────────────────────────────────

    #[test]
    fn test_vertical_split_ratio_uses_heights() {
        let node = LayoutNode::split(
            SplitType::Vertical,
            LayoutNode::Leaf { rectangle_index: 0, size: sz(10, 30) },
            LayoutNode::Leaf { rectangle_index: 1, size: sz(20, 10) },
        );
        assert_eq!(node.size(), sz(20, 40));
        assert_eq!(node.split_ratio(), Some(0.75));
    }

    // ── Panel layout ──────────────────────────────────────────────────────────

    #[test]
    fn test_split_of_huge_rectangles_saturates_instead_of_overflowing() {
        // Arrange
        let leaf = |rectangle_index| LayoutNode::Leaf {
            rectangle_index,
            size: sz(u32::MAX, u32::MAX),
        };
        let node = LayoutNode::split(SplitType::Horizontal, leaf(0), leaf(1));

        // Act / Assert
        assert_eq!(node.size(), sz(u32::MAX, u32::MAX));
        assert_eq!(node.split_ratio(), Some(0.5));
    }

    #[test]
    fn test_panel_layout_from_node_maps_display_ids() {
        // Arrange
        let node = best_layout(sz(300, 100), &[sz(100, 100), sz(100, 100)]).unwrap();

        // Act
        let panel = PanelLayout::from_layout_node(&node, &[0, 7]).unwrap();

        // Assert
        assert_eq!(panel.display_ids(), vec![0, 7]);
        match panel {
            PanelLayout::Split { orientation, proportion, .. } => {
                assert_eq!(orientation, SplitType::Horizontal);
                assert!((proportion - 0.5).abs() < 1e-9);
            }
            other => panic!("expected a split, got {other:?}"),
        }
    }

    #[test]
    fn test_panel_layout_from_node_rejects_missing_display_id() {
        let node = LayoutNode::Leaf { rectangle_index: 2, size: sz(1, 1) };
        assert_eq!(
            PanelLayout::from_layout_node(&node, &[0]),
            Err(LayoutError::UnknownRectangleIndex(2))
        );
    }

    #[test]
    fn test_panel_layout_json_uses_tagged_form() {
        // Arrange
        let panel = PanelLayout::Split {
            orientation: SplitType::Vertical,
            proportion: 0.25,
            first: Box::new(PanelLayout::Display { display_id: 0 }),
            second: Box::new(PanelLayout::Display { display_id: 1 }),
        };

        // Act
        let json = panel.to_json().unwrap();

        // Assert
        assert!(json.contains(r#""type":"split""#));
        assert!(json.contains(r#""orientation":"vertical""#));
        assert_eq!(PanelLayout::from_json(&json).unwrap(), panel);
    }

    #[test]
    fn test_panel_layout_from_json_rejects_garbage() {
        assert!(matches!(PanelLayout::from_json("{"), Err(LayoutError::Serialization(_))));
    }
}
