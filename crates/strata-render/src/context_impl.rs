//! Implementation of [`RenderDevice`] for [`GraphicsContext`].
//!
//! Fallible creation runs inside wgpu error scopes so validation failures
//! come back as [`DeviceError`] instead of reaching the uncaptured-error
//! handler.

use std::ops::Range;

use strata_test_utils::{
    BindGroupDescriptor, BindGroupResource, CommandRecorder, DeviceError, DeviceLimits,
    GpuBindGroup, GpuBindGroupLayout, GpuBuffer, GpuCommandBuffer, GpuRenderPipeline, GpuSampler,
    GpuShaderModule, GpuTexture, GpuTextureView, RenderDevice, RenderPassDescriptor,
    RenderPipelineDescriptor, SubmitFuture,
};

use crate::context::GraphicsContext;

impl GraphicsContext {
    fn scoped<T>(&self, label: &str, create: impl FnOnce() -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match (validation, out_of_memory) {
            (Some(err), _) => {
                tracing::error!("Validation error creating {label}: {err}");
                Err(DeviceError::Validation(err.to_string()))
            }
            (None, Some(_)) => Err(DeviceError::OutOfMemory),
            (None, None) => Ok(value),
        }
    }
}

impl RenderDevice for GraphicsContext {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits::from(&self.device.limits())
    }

    fn create_buffer(&self, desc: &wgpu::BufferDescriptor) -> GpuBuffer {
        GpuBuffer::from_wgpu(self.ids.allocate(), self.device.create_buffer(desc))
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer.as_wgpu(), offset, data);
    }

    fn create_texture(&self, desc: &wgpu::TextureDescriptor) -> GpuTexture {
        GpuTexture::from_wgpu(self.ids.allocate(), self.device.create_texture(desc))
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8], bytes_per_row: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_texture_view(&self, texture: &GpuTexture) -> GpuTextureView {
        let view = texture
            .as_wgpu()
            .create_view(&wgpu::TextureViewDescriptor::default());
        GpuTextureView::from_wgpu(self.ids.allocate(), view)
    }

    fn create_sampler(&self, desc: &wgpu::SamplerDescriptor) -> GpuSampler {
        GpuSampler::from_wgpu(self.ids.allocate(), self.device.create_sampler(desc))
    }

    fn create_shader_module(
        &self,
        desc: &wgpu::ShaderModuleDescriptor,
    ) -> Result<GpuShaderModule, DeviceError> {
        let module = self.scoped("shader module", || {
            self.device.create_shader_module(desc.clone())
        })?;
        Ok(GpuShaderModule::from_wgpu(self.ids.allocate(), module))
    }

    fn create_bind_group_layout(
        &self,
        desc: &wgpu::BindGroupLayoutDescriptor,
    ) -> GpuBindGroupLayout {
        GpuBindGroupLayout::from_wgpu(self.ids.allocate(), self.device.create_bind_group_layout(desc))
    }

    fn create_bind_group(&self, desc: &BindGroupDescriptor) -> Result<GpuBindGroup, DeviceError> {
        let entries: Vec<wgpu::BindGroupEntry> = desc
            .entries
            .iter()
            .map(|entry| wgpu::BindGroupEntry {
                binding: entry.binding,
                resource: match &entry.resource {
                    BindGroupResource::TextureView(view) => {
                        wgpu::BindingResource::TextureView(view.as_wgpu())
                    }
                    BindGroupResource::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(sampler.as_wgpu())
                    }
                    BindGroupResource::Buffer(buffer) => buffer.as_wgpu().as_entire_binding(),
                },
            })
            .collect();

        let group = self.scoped("bind group", || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: desc.label,
                layout: desc.layout.as_wgpu(),
                entries: &entries,
            })
        })?;
        Ok(GpuBindGroup::from_wgpu(self.ids.allocate(), desc.layout.id(), group))
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, DeviceError> {
        let layouts: Vec<&wgpu::BindGroupLayout> =
            desc.bind_group_layouts.iter().map(GpuBindGroupLayout::as_wgpu).collect();
        let buffers: Vec<wgpu::VertexBufferLayout> =
            desc.vertex_buffers.iter().map(|layout| layout.as_wgpu()).collect();

        let pipeline = self.scoped("render pipeline", || {
            let layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label,
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: desc.label,
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: desc.module.as_wgpu(),
                        entry_point: Some(desc.vertex_entry),
                        buffers: &buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: desc.module.as_wgpu(),
                        entry_point: Some(desc.fragment_entry),
                        targets: desc.targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: desc.primitive,
                    depth_stencil: desc.depth_stencil.clone(),
                    multisample: desc.multisample,
                    multiview: None,
                    cache: None,
                })
        })?;
        Ok(GpuRenderPipeline::from_wgpu(self.ids.allocate(), pipeline))
    }

    fn create_command_recorder(&self, label: Option<&str>) -> Box<dyn CommandRecorder> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label });
        Box::new(WgpuCommandRecorder {
            encoder,
            pass: None,
        })
    }

    fn submit(&self, commands: GpuCommandBuffer) -> SubmitFuture {
        let (future, signal) = SubmitFuture::pending();
        let index = self.queue.submit(Some(commands.into_wgpu()));
        self.queue.on_submitted_work_done(move || signal.complete());

        // Native backends only run the completion callback from a device
        // poll, so awaiting the frame waits on its submission.
        let device = self.device.clone();
        future.driven(move || {
            let wait = wgpu::PollType::Wait {
                submission_index: Some(index.clone()),
                timeout: None,
            };
            if let Err(e) = device.poll(wait) {
                tracing::warn!("Device poll failed while awaiting a frame: {e}");
            }
        })
    }
}

/// Records into a wgpu command encoder, holding at most one open pass.
pub struct WgpuCommandRecorder {
    encoder: wgpu::CommandEncoder,
    pass: Option<wgpu::RenderPass<'static>>,
}

impl CommandRecorder for WgpuCommandRecorder {
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pass = None;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = desc
            .color_attachments
            .iter()
            .map(|attachment| {
                Some(wgpu::RenderPassColorAttachment {
                    view: attachment.view.as_wgpu(),
                    depth_slice: None,
                    resolve_target: attachment.resolve_target.as_ref().map(GpuTextureView::as_wgpu),
                    ops: wgpu::Operations {
                        load: attachment.load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment =
            desc.depth_stencil
                .as_ref()
                .map(|ds| wgpu::RenderPassDepthStencilAttachment {
                    view: ds.view.as_wgpu(),
                    depth_ops: ds.depth_load.map(|load| wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: ds.stencil_load.map(|load| wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let pass = self
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: desc.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                ..Default::default()
            })
            .forget_lifetime();
        self.pass = Some(pass);
    }

    fn end_render_pass(&mut self) {
        self.pass = None;
    }

    fn set_pipeline(&mut self, pipeline: &GpuRenderPipeline) {
        if let Some(pass) = &mut self.pass {
            pass.set_pipeline(pipeline.as_wgpu());
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer) {
        if let Some(pass) = &mut self.pass {
            pass.set_vertex_buffer(slot, buffer.as_wgpu().slice(..));
        }
    }

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: wgpu::IndexFormat) {
        if let Some(pass) = &mut self.pass {
            pass.set_index_buffer(buffer.as_wgpu().slice(..), format);
        }
    }

    fn set_bind_group(&mut self, index: u32, group: &GpuBindGroup) {
        if let Some(pass) = &mut self.pass {
            pass.set_bind_group(index, group.as_wgpu(), &[]);
        }
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        if let Some(pass) = &mut self.pass {
            pass.set_stencil_reference(reference);
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if let Some(pass) = &mut self.pass {
            pass.draw(vertices, instances);
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        if let Some(pass) = &mut self.pass {
            pass.draw_indexed(indices, base_vertex, instances);
        }
    }

    fn insert_debug_marker(&mut self, label: &str) {
        match &mut self.pass {
            Some(pass) => pass.insert_debug_marker(label),
            None => self.encoder.insert_debug_marker(label),
        }
    }

    fn copy_texture_to_buffer(
        &mut self,
        texture: &GpuTexture,
        buffer: &GpuBuffer,
        bytes_per_row: u32,
    ) {
        if self.pass.is_some() {
            tracing::warn!("Ignoring texture copy recorded inside a render pass");
            return;
        }
        self.encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: texture.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: buffer.as_wgpu(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    fn finish(mut self: Box<Self>) -> GpuCommandBuffer {
        self.pass = None;
        GpuCommandBuffer::from_wgpu(self.encoder.finish())
    }
}
