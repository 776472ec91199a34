//! Per-geometry buffer bindings provided by the scene storage layer

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use static_assertions::const_assert_eq;

use crate::backend::traits::DeviceLimits;
use crate::backend::types::{align_up, BufferRange, DrawIndexedIndirectCommand};
use crate::error::{RendererError, RendererResult};

/// Size of one meshlet descriptor in bytes.
pub const MESHLET_DESC_SIZE: u64 = 16;
/// Meshlet primitive and index-offset data are addressed in 32-bit words.
pub const MESHLET_WORD_SIZE: u64 = 4;

/// GPU buffer ranges of one geometry.
///
/// Geometries are packed into chunks; all geometries of a chunk live in the
/// same buffers and share one descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryBinding {
    pub chunk: u32,
    pub vertex: BufferRange,
    pub attribute: BufferRange,
    pub index: BufferRange,
    /// Per-meshlet indirect command templates read by the culling pass.
    pub indirect_commands: BufferRange,
    pub meshlet_desc: BufferRange,
    pub meshlet_prim: BufferRange,
    pub mesh_index_offset: BufferRange,
}

/// Per-geometry element offsets pushed to the culling shader.
///
/// Order matches the push constant block: descriptor, primitive, index-offset,
/// indirect template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryConstants {
    pub meshlet_desc: u32,
    pub meshlet_prim: u32,
    pub mesh_index_offset: u32,
    pub indirect_template: u32,
}

impl GeometryConstants {
    pub fn for_geometry(geometry: &GeometryBinding) -> Self {
        Self {
            meshlet_desc: geometry.meshlet_desc.element_offset(MESHLET_DESC_SIZE) as u32,
            meshlet_prim: geometry.meshlet_prim.element_offset(MESHLET_WORD_SIZE) as u32,
            mesh_index_offset: geometry
                .mesh_index_offset
                .element_offset(MESHLET_WORD_SIZE) as u32,
            indirect_template: geometry
                .indirect_commands
                .element_offset(DrawIndexedIndirectCommand::STRIDE as u64)
                as u32,
        }
    }

    pub fn to_array(self) -> [u32; 4] {
        [
            self.meshlet_desc,
            self.meshlet_prim,
            self.mesh_index_offset,
            self.indirect_template,
        ]
    }
}

/// Per-object transform block, one per matrix index in the matrix buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MatrixNode {
    pub world_matrix: Mat4,
    pub world_matrix_it: Mat4,
    pub object_matrix: Mat4,
    pub bbox_min: Vec4,
    pub bbox_max: Vec4,
    pub _pad0: Vec3,
    pub winding: f32,
    pub color: Vec4,
}

const_assert_eq!(std::mem::size_of::<MatrixNode>(), 256);

impl MatrixNode {
    /// Matrix stride satisfying the device's dynamic offset alignment.
    pub fn aligned_stride(limits: &DeviceLimits) -> u64 {
        align_up(
            std::mem::size_of::<Self>() as u64,
            limits.min_uniform_buffer_offset_alignment,
        )
    }
}

/// Everything the recorder reads from the scene storage layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBindings {
    pub geometries: Vec<GeometryBinding>,
    /// Byte distance between consecutive matrices in the object uniform buffer.
    pub matrix_stride: u64,
    pub vertex_size: u64,
    pub attribute_size: u64,
    /// Output of the culling pass, one indirect command slot per meshlet.
    pub culled_commands: Option<BufferRange>,
}

impl SceneBindings {
    pub fn geometry(&self, index: u32) -> Option<&GeometryBinding> {
        self.geometries.get(index as usize)
    }

    /// Number of chunks referenced by the geometries.
    pub fn chunk_count(&self) -> u32 {
        self.geometries
            .iter()
            .map(|g| g.chunk + 1)
            .max()
            .unwrap_or(0)
    }

    /// Dynamic offset of `matrix_index` into the object uniform buffer.
    pub fn matrix_offset(&self, matrix_index: u32) -> RendererResult<u32> {
        (matrix_index as u64)
            .checked_mul(self.matrix_stride)
            .and_then(|offset| u32::try_from(offset).ok())
            .ok_or(RendererError::MatrixOffsetOverflow {
                matrix: matrix_index,
                stride: self.matrix_stride,
            })
    }

    /// Number of indirect commands the culled output can hold.
    pub fn culled_capacity(&self) -> u64 {
        self.culled_commands
            .map(|range| range.range / DrawIndexedIndirectCommand::STRIDE as u64)
            .unwrap_or(0)
    }

    /// Check strides and offsets against the device limits.
    pub fn validate(&self, limits: &DeviceLimits) -> RendererResult<()> {
        let alignment = limits.min_uniform_buffer_offset_alignment.max(1);
        if self.matrix_stride == 0 || self.matrix_stride % alignment != 0 {
            return Err(RendererError::MisalignedMatrixStride {
                stride: self.matrix_stride,
                alignment,
            });
        }

        for (index, geometry) in self.geometries.iter().enumerate() {
            let checks = [
                ("vertex", geometry.vertex.offset, self.vertex_size),
                ("attribute", geometry.attribute.offset, self.attribute_size),
                ("meshlet descriptor", geometry.meshlet_desc.offset, MESHLET_DESC_SIZE),
                ("meshlet primitive", geometry.meshlet_prim.offset, MESHLET_WORD_SIZE),
                ("mesh index offset", geometry.mesh_index_offset.offset, MESHLET_WORD_SIZE),
                (
                    "indirect command",
                    geometry.indirect_commands.offset,
                    DrawIndexedIndirectCommand::STRIDE as u64,
                ),
            ];
            for (what, offset, element_size) in checks {
                if element_size == 0 || offset % element_size != 0 {
                    return Err(RendererError::MisalignedGeometry {
                        geometry: index,
                        what,
                        offset,
                        element_size,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::BufferHandle;

    fn range(buffer: u64, offset: u64, size: u64) -> BufferRange {
        BufferRange::new(BufferHandle::from_raw(buffer), offset, size)
    }

    fn geometry(chunk: u32) -> GeometryBinding {
        GeometryBinding {
            chunk,
            vertex: range(1, 160, 1600),
            attribute: range(2, 320, 3200),
            index: range(3, 0, 600),
            indirect_commands: range(4, 200, 200),
            meshlet_desc: range(5, 64, 160),
            meshlet_prim: range(6, 12, 400),
            mesh_index_offset: range(7, 40, 40),
        }
    }

    fn scene() -> SceneBindings {
        SceneBindings {
            geometries: vec![geometry(0), geometry(2)],
            matrix_stride: 256,
            vertex_size: 16,
            attribute_size: 32,
            culled_commands: Some(range(9, 0, 2000)),
        }
    }

    #[test]
    fn test_geometry_constants() {
        let constants = GeometryConstants::for_geometry(&geometry(0));
        assert_eq!(constants.to_array(), [4, 3, 10, 10]);
    }

    #[test]
    fn test_matrix_offset() {
        let scene = scene();
        assert_eq!(scene.matrix_offset(0), Ok(0));
        assert_eq!(scene.matrix_offset(3), Ok(768));
        assert!(matches!(
            scene.matrix_offset(u32::MAX),
            Err(RendererError::MatrixOffsetOverflow { .. })
        ));
    }

    #[test]
    fn test_chunk_count_and_capacity() {
        let scene = scene();
        assert_eq!(scene.chunk_count(), 3);
        assert_eq!(scene.culled_capacity(), 100);
    }

    #[test]
    fn test_validate_rejects_misaligned_stride() {
        let mut scene = scene();
        assert_eq!(scene.validate(&DeviceLimits::default()), Ok(()));

        scene.matrix_stride = 192;
        assert_eq!(
            scene.validate(&DeviceLimits::default()),
            Err(RendererError::MisalignedMatrixStride {
                stride: 192,
                alignment: 256
            })
        );
    }

    #[test]
    fn test_validate_rejects_misaligned_vertex_offset() {
        let mut scene = scene();
        scene.geometries[1].vertex.offset = 8;
        assert!(matches!(
            scene.validate(&DeviceLimits::default()),
            Err(RendererError::MisalignedGeometry {
                geometry: 1,
                what: "vertex",
                ..
            })
        ));
    }

    #[test]
    fn test_aligned_stride() {
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: 64,
            ..Default::default()
        };
        assert_eq!(MatrixNode::aligned_stride(&limits), 256);
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: 512,
            ..Default::default()
        };
        assert_eq!(MatrixNode::aligned_stride(&limits), 512);
    }
}
