//! Demo scene shared across the cluster.
//!
//! The authority advances a frame counter and a simulation clock; followers
//! apply whatever arrives. Every node logs the same scene at the same frame.

use std::time::Duration;

use framelock_core::{StateCodec, StateError, StateReader, StateWriter};

/// Scene state owned by the codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    /// Frames rendered since start
    pub frame: u64,
    /// Simulation time in seconds
    pub clock: f64,
    /// Clock stands still while set
    pub paused: bool,
    /// Text shown with the scene
    pub caption: String,
}

/// Codec that advances the scene on encode and overwrites it on decode.
#[derive(Debug, Default)]
pub struct SceneCodec {
    scene: Scene,
    step: f64,
}

impl SceneCodec {
    /// Codec advancing the clock by `frame_interval` each frame.
    pub fn new(frame_interval: Duration) -> Self {
        Self { scene: Scene::default(), step: frame_interval.as_secs_f64() }
    }
}

impl StateCodec for SceneCodec {
    fn encode(&mut self, writer: &mut StateWriter<'_>) {
        let scene = &mut self.scene;
        if !scene.paused {
            scene.frame += 1;
            scene.clock += self.step;
        }
        scene.caption = format!("frame {}", scene.frame);

        writer.write_u64(scene.frame);
        writer.write_f64(scene.clock);
        writer.write_bool(scene.paused);
        writer.write_str(&scene.caption);
    }

    fn decode(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.scene = Scene {
            frame: reader.read_u64()?,
            clock: reader.read_f64()?,
            paused: reader.read_bool()?,
            caption: reader.read_str()?.to_owned(),
        };
        if self.scene.frame % 600 == 0 {
            tracing::info!(frame = self.scene.frame, clock = self.scene.clock, "scene");
        }
        Ok(())
    }
}
