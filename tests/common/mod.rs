//! Common utilities for renderer integration tests.
//!
//! Builds a small scene against the dummy backend: two chunks, three
//! geometries, and a pipeline setup for each of the three passes.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::RwLock;

use redlilium_meshlet::backend::types::*;
use redlilium_meshlet::backend::RenderTarget;
use redlilium_meshlet::{
    Command, CommonBuffers, DescriptorContainer, DrawItem, DrawList, DrawSetup, DrawSetups,
    DummyBackend, GeometryBinding, ResourceSet, SceneBindings, SharedResources,
};

pub const STANDARD_PIPELINE: PipelineHandle = PipelineHandle::from_raw(9001);
pub const CULL_PIPELINE: PipelineHandle = PipelineHandle::from_raw(9002);
pub const BBOX_PIPELINE: PipelineHandle = PipelineHandle::from_raw(9003);

pub const VIEW_BUFFER: BufferHandle = BufferHandle::from_raw(8001);
pub const STATS_BUFFER: BufferHandle = BufferHandle::from_raw(8002);
pub const READBACK_BUFFER: BufferHandle = BufferHandle::from_raw(8003);
pub const CULLED_BUFFER: BufferHandle = BufferHandle::from_raw(8004);

/// Capacity of the culled indirect output, in commands.
pub const CULLED_CAPACITY: u64 = 256;

/// Install a test logger once; repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn range(buffer: u64, offset: u64, size: u64) -> BufferRange {
    BufferRange::new(BufferHandle::from_raw(buffer), offset, size)
}

/// Geometry `slot` of `chunk`, packed behind the previous slots of the chunk.
pub fn geometry(chunk: u32, slot: u64) -> GeometryBinding {
    let c = chunk as u64 * 10;
    GeometryBinding {
        chunk,
        vertex: range(100 + c, slot * 1024, 1024),
        attribute: range(101 + c, slot * 2048, 2048),
        index: range(102 + c, slot * 768, 768),
        indirect_commands: range(103 + c, slot * 16 * 20, 16 * 20),
        meshlet_desc: range(104 + c, slot * 16 * 16, 16 * 16),
        meshlet_prim: range(105 + c, slot * 256, 256),
        mesh_index_offset: range(106 + c, slot * 64, 64),
    }
}

pub fn scene_bindings() -> SceneBindings {
    SceneBindings {
        geometries: vec![geometry(0, 0), geometry(0, 1), geometry(1, 0)],
        matrix_stride: 256,
        vertex_size: 16,
        attribute_size: 32,
        culled_commands: Some(BufferRange::new(
            CULLED_BUFFER,
            0,
            CULLED_CAPACITY * DrawIndexedIndirectCommand::STRIDE as u64,
        )),
    }
}

fn container(layout: u64) -> DescriptorContainer {
    DescriptorContainer::new(PipelineLayoutHandle::from_raw(layout))
        .with_scene(DescriptorSetHandle::from_raw(layout * 10))
        .with_object(DescriptorSetHandle::from_raw(layout * 10 + 1))
        .with_geometry_sets(vec![
            DescriptorSetHandle::from_raw(layout * 10 + 2),
            DescriptorSetHandle::from_raw(layout * 10 + 3),
        ])
}

pub fn draw_setups() -> DrawSetups {
    DrawSetups {
        standard: DrawSetup::graphics(STANDARD_PIPELINE, container(71)),
        cull: Some(DrawSetup::compute(CULL_PIPELINE, container(72))),
        bbox: DrawSetup::graphics(BBOX_PIPELINE, container(73)),
    }
}

pub fn render_target(width: u32, height: u32) -> RenderTarget {
    RenderTarget {
        render_pass: RenderPassHandle::from_raw(7001),
        framebuffer: FramebufferHandle::from_raw(7002),
        extent: Extent2d::new(width, height),
    }
}

pub fn shared_resources() -> SharedResources {
    Arc::new(RwLock::new(ResourceSet::new(
        draw_setups(),
        scene_bindings(),
        CommonBuffers {
            view: VIEW_BUFFER,
            stats: STATS_BUFFER,
            stats_readback: READBACK_BUFFER,
        },
        render_target(1280, 720),
    )))
}

/// Items sorted by geometry, then matrix.
pub fn draw_list() -> Arc<DrawList> {
    Arc::new(DrawList::from_items(vec![
        DrawItem::new(0, 0).with_indices(0, 96).with_meshlets(0, 12),
        DrawItem::new(0, 1).with_indices(0, 96).with_meshlets(0, 12),
        DrawItem::new(1, 1).with_indices(384, 48).with_meshlets(0, 40),
        DrawItem::new(2, 2)
            .with_index_format(IndexFormat::Uint16)
            .with_indices(64, 30)
            .with_meshlets(3, 5),
    ]))
}

/// The commands of the most recently submitted primary buffer.
pub fn last_primary(backend: &DummyBackend) -> Vec<Command> {
    backend
        .last_submitted()
        .map(|cmd| backend.commands(cmd).to_vec())
        .unwrap_or_default()
}

/// The secondary buffers executed by a primary command list.
pub fn executed_secondaries(primary: &[Command]) -> Vec<CommandBufferHandle> {
    primary
        .iter()
        .find_map(|c| match c {
            Command::ExecuteCommands(secondaries) => Some(secondaries.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

pub fn position(commands: &[Command], predicate: impl Fn(&Command) -> bool) -> usize {
    commands
        .iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("command not found in {:?}", commands))
}
