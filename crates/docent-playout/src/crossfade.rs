use std::time::Duration;

use tracing::debug;

use crate::fetch::ImageHandle;

/// A render surface the host UI exposes: one image layer with an opacity.
pub trait Surface: Send {
    fn set_image(&mut self, handle: &ImageHandle);
    fn set_opacity(&mut self, opacity: f32);
}

/// Two-buffer image swap.
///
/// The idle buffer receives the next image and is faded in while the front
/// buffer fades out, frame by frame. The endpoint state is pinned exactly:
/// target opacity 1.0, source opacity 0.0 — at most one visible image once
/// the fade completes.
pub struct Crossfader {
    surfaces: [Box<dyn Surface>; 2],
    front: usize,
    frame_interval: Duration,
}

impl Crossfader {
    pub fn new(a: Box<dyn Surface>, b: Box<dyn Surface>, frame_interval_ms: u64) -> Self {
        Self {
            surfaces: [a, b],
            front: 0,
            frame_interval: Duration::from_millis(frame_interval_ms.max(1)),
        }
    }

    /// Fade `handle` in over `duration`, then swap the buffer roles.
    pub async fn crossfade(&mut self, handle: &ImageHandle, duration: Duration) {
        let back = 1 - self.front;
        self.surfaces[back].set_image(handle);

        let frames = (duration.as_millis() / self.frame_interval.as_millis()).max(1) as u32;
        debug!(url = %handle.url, frames, "crossfade start");

        for i in 1..=frames {
            let t = i as f32 / frames as f32;
            self.surfaces[back].set_opacity(t);
            self.surfaces[self.front].set_opacity(1.0 - t);
            tokio::time::sleep(self.frame_interval).await;
        }

        // Pin the endpoint state regardless of float accumulation.
        self.surfaces[back].set_opacity(1.0);
        self.surfaces[self.front].set_opacity(0.0);
        self.front = back;
    }

    /// Index of the buffer currently showing the image.
    pub fn front(&self) -> usize {
        self.front
    }
}
