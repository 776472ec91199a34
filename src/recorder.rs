//! Command recording for the cached secondary streams
//!
//! The recorder walks the draw list exactly once per stream, in the given
//! order, and only emits a bind when the bound value actually changes. It is
//! pure: the output is a [`CommandList`] which the renderer encodes into a
//! secondary command buffer (or, for the culling pass, replays into the
//! per-frame primary buffer).
//!
//! Push constant layout shared by the culling and bounding-box shaders:
//!
//! | offset | contents                                                        |
//! |--------|-----------------------------------------------------------------|
//! | 0      | geometry: meshlet desc, meshlet prim, mesh index offset, template |
//! | 16     | item: meshlet offset, meshlet count, output slot, matrix index    |

use crate::backend::traits::{Command, CommandList, DeviceLimits};
use crate::backend::types::*;
use crate::config::DrawStrategy;
use crate::error::{RendererError, RendererResult};
use crate::resources::{DescriptorSlot, DrawSetup, DrawSetups};
use crate::scene::{DrawItem, GeometryBinding, GeometryConstants, SceneBindings};

/// Byte offset of the per-item push constants.
pub const ITEM_CONSTANTS_OFFSET: u32 = 16;

/// Last bound value of every piece of state the traversal tracks.
#[derive(Debug, Default)]
struct BindState {
    geometry: Option<u32>,
    matrix: Option<u32>,
    chunk: Option<u32>,
    index: Option<(u32, IndexFormat)>,
}

/// Store `value` in `slot`, returning whether it differs from the previous value.
fn changed<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> bool {
    if *slot == Some(value) {
        return false;
    }
    *slot = Some(value);
    true
}

/// Everything recorded for one draw list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedStreams {
    pub geometry: CommandList,
    pub bbox: CommandList,
    /// Compute culling commands, replayed inline every frame.
    pub culling: Option<CommandList>,
}

/// Records the command lists for a draw list against one scene.
#[derive(Debug, Clone, Copy)]
pub struct CommandRecorder<'a> {
    scene: &'a SceneBindings,
    limits: DeviceLimits,
    extent: Extent2d,
    task_group_size: u32,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(
        scene: &'a SceneBindings,
        limits: DeviceLimits,
        extent: Extent2d,
        task_group_size: u32,
    ) -> Self {
        Self {
            scene,
            limits,
            extent,
            task_group_size: task_group_size.max(1),
        }
    }

    /// Record the geometry stream, the bounding-box stream and, for the culled
    /// strategy, the culling pass.
    pub fn record_streams(
        &self,
        items: &[DrawItem],
        setups: &DrawSetups,
        strategy: DrawStrategy,
    ) -> RendererResult<RecordedStreams> {
        crate::profile_scope!("record_streams");

        let culling = match strategy {
            DrawStrategy::DirectIndexed => None,
            DrawStrategy::ComputeCulled => {
                let setup = setups.cull.as_ref().ok_or_else(|| {
                    RendererError::InvalidConfig(
                        "compute culling requires a cull pipeline".into(),
                    )
                })?;
                Some(self.record_culling(items, setup)?)
            }
        };

        let streams = RecordedStreams {
            geometry: self.record_geometry(items, &setups.standard, strategy)?,
            bbox: self.record_bounding_boxes(items, &setups.bbox)?,
            culling,
        };

        log::trace!(
            "recorded {} items: geometry {} cmds, bbox {} cmds, culling {:?} cmds",
            items.len(),
            streams.geometry.len(),
            streams.bbox.len(),
            streams.culling.as_ref().map(CommandList::len)
        );
        Ok(streams)
    }

    /// Record the main geometry stream with the given strategy.
    pub fn record_geometry(
        &self,
        items: &[DrawItem],
        setup: &DrawSetup,
        strategy: DrawStrategy,
    ) -> RendererResult<CommandList> {
        match strategy {
            DrawStrategy::DirectIndexed => self.record_direct(items, setup),
            DrawStrategy::ComputeCulled => self.record_culled_draws(items, setup),
        }
    }

    /// One indexed draw per item.
    pub fn record_direct(&self, items: &[DrawItem], setup: &DrawSetup) -> RendererResult<CommandList> {
        let mut list = CommandList::with_capacity(items.len() * 3 + 4);
        self.begin_stream(&mut list, setup)?;

        let mut state = BindState::default();
        for (index, item) in items.iter().enumerate() {
            let geometry = self.geometry(index, item)?;

            if changed(&mut state.geometry, item.geometry_index) {
                list.push(Command::BindVertexBuffers {
                    buffers: [geometry.vertex.buffer, geometry.attribute.buffer],
                    offsets: [geometry.vertex.offset, geometry.attribute.offset],
                });
            }
            if changed(&mut state.index, (item.geometry_index, item.index_format)) {
                list.push(Command::BindIndexBuffer {
                    buffer: geometry.index.buffer,
                    offset: geometry.index.offset,
                    format: item.index_format,
                });
            }
            if changed(&mut state.matrix, item.matrix_index) {
                self.bind_matrix(&mut list, setup, item.matrix_index)?;
            }

            list.push(Command::DrawIndexed {
                index_count: item.index_range.count,
                instance_count: 1,
                first_index: item.first_index(),
                vertex_offset: 0,
                first_instance: 0,
            });
        }

        Ok(list)
    }

    /// Draw the output of the culling pass.
    ///
    /// Every meshlet owns one indirect command slot; slots are assigned in
    /// draw list order. Consecutive items sharing a chunk and index width are
    /// drawn with a single multi-draw.
    pub fn record_culled_draws(
        &self,
        items: &[DrawItem],
        setup: &DrawSetup,
    ) -> RendererResult<CommandList> {
        let output = self.culled_output(items)?;

        let mut list = CommandList::with_capacity(items.len() + 6);
        self.begin_stream(&mut list, setup)?;
        // Shaders index the matrix buffer by instance, so it is bound once at offset 0.
        self.bind_matrix_set(&mut list, setup, 0)?;

        let mut run: Option<(u32, IndexFormat)> = None;
        let mut run_start = 0u64;
        let mut slot = 0u64;
        for (index, item) in items.iter().enumerate() {
            let geometry = self.geometry(index, item)?;
            let key = (geometry.chunk, item.index_format);

            if run != Some(key) {
                if let Some(output) = output {
                    self.draw_indirect_run(&mut list, output, run_start, slot);
                }
                run = Some(key);
                run_start = slot;
                list.push(Command::BindVertexBuffers {
                    buffers: [geometry.vertex.buffer, geometry.attribute.buffer],
                    offsets: [0, 0],
                });
                list.push(Command::BindIndexBuffer {
                    buffer: geometry.index.buffer,
                    offset: 0,
                    format: item.index_format,
                });
            }
            slot += item.meshlet_range.count as u64;
        }
        if let Some(output) = output {
            self.draw_indirect_run(&mut list, output, run_start, slot);
        }

        Ok(list)
    }

    /// Record the compute culling pass.
    ///
    /// Ends with the barrier that makes the written indirect commands visible
    /// to the indirect draws of the geometry stream.
    pub fn record_culling(&self, items: &[DrawItem], setup: &DrawSetup) -> RendererResult<CommandList> {
        self.culled_output(items)?;

        let mut list = CommandList::with_capacity(items.len() * 3 + 4);
        self.bind_pipeline(&mut list, setup)?;

        let mut state = BindState::default();
        let mut slot = 0u32;
        for (index, item) in items.iter().enumerate() {
            let geometry = self.geometry(index, item)?;

            if changed(&mut state.chunk, geometry.chunk) {
                self.bind_chunk(&mut list, setup, geometry.chunk)?;
            }
            if changed(&mut state.matrix, item.matrix_index) {
                self.bind_matrix(&mut list, setup, item.matrix_index)?;
            }
            if changed(&mut state.geometry, item.geometry_index) {
                list.push(Command::PushConstants {
                    layout: setup.container.layout,
                    stages: ShaderStages::COMPUTE,
                    offset: 0,
                    values: GeometryConstants::for_geometry(geometry).to_array(),
                });
            }

            let meshlets = item.meshlet_range;
            list.push(Command::PushConstants {
                layout: setup.container.layout,
                stages: ShaderStages::COMPUTE,
                offset: ITEM_CONSTANTS_OFFSET,
                values: [meshlets.offset, meshlets.count, slot, item.matrix_index],
            });
            list.push(Command::Dispatch {
                x: meshlets.count.div_ceil(self.task_group_size),
                y: 1,
                z: 1,
            });
            slot += meshlets.count;
        }

        list.push(Command::PipelineBarrier(MemoryBarrier::compute_to_indirect()));
        Ok(list)
    }

    /// One point per meshlet, expanded into a box by the geometry shader.
    pub fn record_bounding_boxes(
        &self,
        items: &[DrawItem],
        setup: &DrawSetup,
    ) -> RendererResult<CommandList> {
        let mut list = CommandList::with_capacity(items.len() * 2 + 4);
        self.begin_stream(&mut list, setup)?;

        let stages = ShaderStages::VERTEX | ShaderStages::GEOMETRY;
        let mut state = BindState::default();
        for (index, item) in items.iter().enumerate() {
            let geometry = self.geometry(index, item)?;

            if changed(&mut state.chunk, geometry.chunk) {
                self.bind_chunk(&mut list, setup, geometry.chunk)?;
            }
            if changed(&mut state.geometry, item.geometry_index) {
                list.push(Command::PushConstants {
                    layout: setup.container.layout,
                    stages,
                    offset: 0,
                    values: GeometryConstants::for_geometry(geometry).to_array(),
                });
            }
            if changed(&mut state.matrix, item.matrix_index) {
                self.bind_matrix(&mut list, setup, item.matrix_index)?;
            }

            list.push(Command::Draw {
                vertex_count: item.meshlet_range.count,
                instance_count: 1,
                first_vertex: item.meshlet_range.offset,
                first_instance: 0,
            });
        }

        Ok(list)
    }

    fn geometry(&self, index: usize, item: &DrawItem) -> RendererResult<&'a GeometryBinding> {
        self.scene
            .geometry(item.geometry_index)
            .ok_or(RendererError::GeometryOutOfRange {
                item: index,
                geometry: item.geometry_index,
                available: self.scene.geometries.len(),
            })
    }

    /// The culled output range, checked against the draw list's meshlet count.
    fn culled_output(&self, items: &[DrawItem]) -> RendererResult<Option<BufferRange>> {
        let required: u64 = items.iter().map(|i| i.meshlet_range.count as u64).sum();
        let capacity = self.scene.culled_capacity();
        if required > capacity {
            return Err(RendererError::IndirectOutputTooSmall { capacity, required });
        }
        Ok(self.scene.culled_commands)
    }

    /// Viewport state, pipeline and scene set at the start of a graphics stream.
    fn begin_stream(&self, list: &mut CommandList, setup: &DrawSetup) -> RendererResult<()> {
        list.push(Command::SetViewportScissor {
            extent: self.extent,
        });
        self.bind_pipeline(list, setup)
    }

    fn bind_pipeline(&self, list: &mut CommandList, setup: &DrawSetup) -> RendererResult<()> {
        let scene = setup.container.set(DescriptorSlot::Scene, None)?;
        list.push(Command::BindPipeline {
            bind_point: setup.bind_point,
            pipeline: setup.pipeline,
        });
        list.push(Command::BindDescriptorSet {
            bind_point: setup.bind_point,
            layout: setup.container.layout,
            slot: DescriptorSlot::Scene.index(),
            set: scene,
            dynamic_offset: None,
        });
        Ok(())
    }

    fn bind_matrix(&self, list: &mut CommandList, setup: &DrawSetup, matrix: u32) -> RendererResult<()> {
        let offset = self.scene.matrix_offset(matrix)?;
        self.bind_matrix_set(list, setup, offset)
    }

    fn bind_matrix_set(&self, list: &mut CommandList, setup: &DrawSetup, offset: u32) -> RendererResult<()> {
        let set = setup.container.set(DescriptorSlot::Object, None)?;
        list.push(Command::BindDescriptorSet {
            bind_point: setup.bind_point,
            layout: setup.container.layout,
            slot: DescriptorSlot::Object.index(),
            set,
            dynamic_offset: Some(offset),
        });
        Ok(())
    }

    fn bind_chunk(&self, list: &mut CommandList, setup: &DrawSetup, chunk: u32) -> RendererResult<()> {
        let set = setup.container.set(DescriptorSlot::Geometry, Some(chunk))?;
        list.push(Command::BindDescriptorSet {
            bind_point: setup.bind_point,
            layout: setup.container.layout,
            slot: DescriptorSlot::Geometry.index(),
            set,
            dynamic_offset: None,
        });
        Ok(())
    }

    /// Indirect draws for output slots `start..end`.
    fn draw_indirect_run(&self, list: &mut CommandList, output: BufferRange, start: u64, end: u64) {
        if end <= start {
            return;
        }
        let stride = DrawIndexedIndirectCommand::STRIDE;
        let offset = output.offset + start * stride as u64;
        let count = (end - start) as u32;

        if self.limits.multi_draw_indirect {
            list.push(Command::DrawIndexedIndirect {
                buffer: output.buffer,
                offset,
                draw_count: count,
                stride,
            });
        } else {
            for i in 0..count as u64 {
                list.push(Command::DrawIndexedIndirect {
                    buffer: output.buffer,
                    offset: offset + i * stride as u64,
                    draw_count: 1,
                    stride,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::DescriptorContainer;

    fn range(buffer: u64, offset: u64, size: u64) -> BufferRange {
        BufferRange::new(BufferHandle::from_raw(buffer), offset, size)
    }

    fn geometry(chunk: u32, base: u64) -> GeometryBinding {
        GeometryBinding {
            chunk,
            vertex: range(100 + chunk as u64, base * 16, 1024),
            attribute: range(200 + chunk as u64, base * 32, 2048),
            index: range(300 + chunk as u64, base * 4, 512),
            indirect_commands: range(400 + chunk as u64, base * 20, 200),
            meshlet_desc: range(500 + chunk as u64, base * 16, 160),
            meshlet_prim: range(600 + chunk as u64, base * 4, 160),
            mesh_index_offset: range(700 + chunk as u64, base * 4, 40),
        }
    }

    fn scene() -> SceneBindings {
        SceneBindings {
            geometries: vec![geometry(0, 0), geometry(0, 64), geometry(1, 0)],
            matrix_stride: 256,
            vertex_size: 16,
            attribute_size: 32,
            culled_commands: Some(range(900, 40, 20 * 64)),
        }
    }

    fn container() -> DescriptorContainer {
        DescriptorContainer::new(PipelineLayoutHandle::from_raw(7))
            .with_scene(DescriptorSetHandle::from_raw(70))
            .with_object(DescriptorSetHandle::from_raw(71))
            .with_geometry_sets(vec![
                DescriptorSetHandle::from_raw(72),
                DescriptorSetHandle::from_raw(73),
            ])
    }

    fn graphics_setup() -> DrawSetup {
        DrawSetup::graphics(PipelineHandle::from_raw(1), container())
    }

    fn compute_setup() -> DrawSetup {
        DrawSetup::compute(PipelineHandle::from_raw(2), container())
    }

    fn recorder(scene: &SceneBindings) -> CommandRecorder<'_> {
        CommandRecorder::new(scene, DeviceLimits::default(), Extent2d::new(640, 480), 32)
    }

    fn is_pipeline(c: &Command) -> bool {
        matches!(c, Command::BindPipeline { .. })
    }

    fn is_matrix_bind(c: &Command) -> bool {
        matches!(c, Command::BindDescriptorSet { slot: 1, .. })
    }

    fn is_vertex_bind(c: &Command) -> bool {
        matches!(c, Command::BindVertexBuffers { .. })
    }

    #[test]
    fn test_single_pipeline_bind_regardless_of_item_count() {
        let scene = scene();
        for n in [1usize, 10, 100] {
            let items: Vec<_> = (0..n)
                .map(|i| DrawItem::new((i % 3) as u32, i as u32).with_indices(0, 3))
                .collect();
            let list = recorder(&scene).record_direct(&items, &graphics_setup()).unwrap();
            assert_eq!(list.count(is_pipeline), 1);
        }
    }

    #[test]
    fn test_rebinds_follow_value_changes() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0),
            DrawItem::new(0, 0),
            DrawItem::new(0, 1),
            DrawItem::new(1, 1),
            DrawItem::new(1, 2),
            DrawItem::new(0, 2),
        ];
        let list = recorder(&scene).record_direct(&items, &graphics_setup()).unwrap();
        assert_eq!(list.count(is_vertex_bind), 3);
        assert_eq!(list.count(is_matrix_bind), 3);
        assert_eq!(list.count(|c| matches!(c, Command::DrawIndexed { .. })), 6);
    }

    #[test]
    fn test_index_width_change_rebinds_index_buffer() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0).with_indices(12, 3),
            DrawItem::new(0, 0)
                .with_index_format(IndexFormat::Uint16)
                .with_indices(12, 3),
        ];
        let list = recorder(&scene).record_direct(&items, &graphics_setup()).unwrap();
        assert_eq!(list.count(is_vertex_bind), 1);
        assert_eq!(
            list.count(|c| matches!(c, Command::BindIndexBuffer { .. })),
            2
        );

        let first_indices: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexed { first_index, .. } => Some(*first_index),
                _ => None,
            })
            .collect();
        assert_eq!(first_indices, vec![3, 6]);
    }

    #[test]
    fn test_matrix_dynamic_offset() {
        let scene = scene();
        let list = recorder(&scene)
            .record_direct(&[DrawItem::new(0, 3)], &graphics_setup())
            .unwrap();
        assert!(list.iter().any(|c| matches!(
            c,
            Command::BindDescriptorSet {
                slot: 1,
                dynamic_offset: Some(768),
                ..
            }
        )));
    }

    #[test]
    fn test_unknown_geometry_is_an_error() {
        let scene = scene();
        let items = [DrawItem::new(0, 0), DrawItem::new(5, 0)];
        assert_eq!(
            recorder(&scene).record_direct(&items, &graphics_setup()),
            Err(RendererError::GeometryOutOfRange {
                item: 1,
                geometry: 5,
                available: 3
            })
        );
    }

    #[test]
    fn test_culling_pass() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0).with_meshlets(0, 40),
            DrawItem::new(1, 0).with_meshlets(4, 8),
            DrawItem::new(2, 1).with_meshlets(0, 5),
        ];
        let list = recorder(&scene).record_culling(&items, &compute_setup()).unwrap();

        let dispatches: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, .. } => Some(*x),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![2, 1, 1]);

        let slots: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Command::PushConstants {
                    offset: ITEM_CONSTANTS_OFFSET,
                    values,
                    ..
                } => Some(values[2]),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 40, 48]);

        // one chunk set per chunk change
        assert_eq!(
            list.count(|c| matches!(c, Command::BindDescriptorSet { slot: 2, .. })),
            2
        );
        assert_eq!(
            list.commands().last(),
            Some(&Command::PipelineBarrier(MemoryBarrier::compute_to_indirect()))
        );
    }

    #[test]
    fn test_culled_draws_per_chunk_run() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0).with_meshlets(0, 10),
            DrawItem::new(1, 1).with_meshlets(0, 6),
            DrawItem::new(2, 1).with_meshlets(0, 4),
        ];
        let list = recorder(&scene)
            .record_culled_draws(&items, &graphics_setup())
            .unwrap();

        let draws: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexedIndirect {
                    offset, draw_count, ..
                } => Some((*offset, *draw_count)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(40, 16), (40 + 16 * 20, 4)]);
    }

    #[test]
    fn test_single_chunk_scene_draws_once() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0).with_meshlets(0, 10),
            DrawItem::new(1, 1).with_meshlets(0, 6),
        ];
        let list = recorder(&scene)
            .record_culled_draws(&items, &graphics_setup())
            .unwrap();
        assert_eq!(
            list.count(|c| matches!(c, Command::DrawIndexedIndirect { .. })),
            1
        );
    }

    #[test]
    fn test_culled_output_too_small() {
        let scene = scene();
        let items = [DrawItem::new(0, 0).with_meshlets(0, 65)];
        assert_eq!(
            recorder(&scene).record_culling(&items, &compute_setup()),
            Err(RendererError::IndirectOutputTooSmall {
                capacity: 64,
                required: 65
            })
        );
    }

    #[test]
    fn test_without_multi_draw_indirect() {
        let scene = scene();
        let limits = DeviceLimits {
            multi_draw_indirect: false,
            ..Default::default()
        };
        let recorder = CommandRecorder::new(&scene, limits, Extent2d::new(8, 8), 32);
        let items = [DrawItem::new(0, 0).with_meshlets(0, 3)];
        let list = recorder.record_culled_draws(&items, &graphics_setup()).unwrap();
        assert_eq!(
            list.count(|c| matches!(c, Command::DrawIndexedIndirect { draw_count: 1, .. })),
            3
        );
    }

    #[test]
    fn test_bounding_boxes() {
        let scene = scene();
        let items = [
            DrawItem::new(0, 0).with_meshlets(2, 7),
            DrawItem::new(0, 1).with_meshlets(9, 3),
        ];
        let list = recorder(&scene)
            .record_bounding_boxes(&items, &graphics_setup())
            .unwrap();
        assert_eq!(list.count(is_pipeline), 1);
        assert_eq!(list.count(is_matrix_bind), 2);
        assert!(list.iter().any(|c| *c
            == Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 9,
                first_instance: 0
            }));
    }

    #[test]
    fn test_streams_start_with_viewport() {
        let scene = scene();
        let list = recorder(&scene)
            .record_direct(&[DrawItem::new(0, 0)], &graphics_setup())
            .unwrap();
        assert_eq!(
            list.commands()[0],
            Command::SetViewportScissor {
                extent: Extent2d::new(640, 480)
            }
        );
    }
}
