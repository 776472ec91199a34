//! Draw items and the per-frame culling statistics block

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert;

use crate::backend::types::IndexFormat;

/// Range of indices inside a geometry's index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawRange {
    /// Byte offset relative to the geometry's index binding.
    pub offset: u64,
    /// Number of indices.
    pub count: u32,
}

/// Range of meshlets inside a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshletRange {
    pub offset: u32,
    pub count: u32,
}

/// One batch of visible geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawItem {
    pub geometry_index: u32,
    pub matrix_index: u32,
    pub index_format: IndexFormat,
    pub index_range: DrawRange,
    pub meshlet_range: MeshletRange,
}

impl DrawItem {
    pub fn new(geometry_index: u32, matrix_index: u32) -> Self {
        Self {
            geometry_index,
            matrix_index,
            index_format: IndexFormat::Uint32,
            index_range: DrawRange::default(),
            meshlet_range: MeshletRange::default(),
        }
    }

    pub fn with_index_format(mut self, format: IndexFormat) -> Self {
        self.index_format = format;
        self
    }

    pub fn with_indices(mut self, offset: u64, count: u32) -> Self {
        self.index_range = DrawRange { offset, count };
        self
    }

    pub fn with_meshlets(mut self, offset: u32, count: u32) -> Self {
        self.meshlet_range = MeshletRange { offset, count };
        self
    }

    /// First index of the range in units of the item's index width.
    pub fn first_index(&self) -> u32 {
        (self.index_range.offset / self.index_format.size()) as u32
    }
}

/// Ordered sequence of draw items.
///
/// Ordering is decided upstream (sorted by geometry, then matrix); the recorder
/// consumes it as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    items: Vec<DrawItem>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<DrawItem>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, item: DrawItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of meshlets referenced, i.e. the number of culled output slots.
    pub fn total_meshlets(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.meshlet_range.count as u64)
            .sum()
    }
}

impl FromIterator<DrawItem> for DrawList {
    fn from_iter<I: IntoIterator<Item = DrawItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Culling statistics, mirrored into the GPU statistics buffer every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CullStats {
    pub tasks_input: u32,
    pub tasks_output: u32,
    pub meshlets_input: u32,
    pub meshlets_output: u32,
    pub tris_input: u32,
    pub tris_output: u32,
    pub attr_input: u32,
    pub attr_output: u32,
    pub debug_a: [u32; 64],
    pub debug_b: [u32; 64],
    pub debug_c: [u32; 64],
}

const_assert!(std::mem::size_of::<CullStats>() % 4 == 0);
const_assert!(std::mem::size_of::<CullStats>() <= 65536);

impl Default for CullStats {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_index_uses_item_width() {
        let item = DrawItem::new(0, 0).with_indices(96, 30);
        assert_eq!(item.first_index(), 24);

        let item = item.with_index_format(IndexFormat::Uint16);
        assert_eq!(item.first_index(), 48);
    }

    #[test]
    fn test_total_meshlets() {
        let list: DrawList = [
            DrawItem::new(0, 0).with_meshlets(0, 40),
            DrawItem::new(1, 0).with_meshlets(8, 2),
            DrawItem::new(1, 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.len(), 3);
        assert_eq!(list.total_meshlets(), 42);
    }

    #[test]
    fn test_cull_stats_size() {
        assert_eq!(std::mem::size_of::<CullStats>(), 800);
    }
}
