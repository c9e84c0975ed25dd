//! Source-to-destination routing over the mixer's streams

use dashmap::DashMap;
use std::sync::Arc;

use crate::audio::buffer::AudioBlock;
use crate::mixer::stream::{Mixer, MixerStream};

/// Many-to-many routing table. Destinations are ids only; routes to streams
/// that do not exist are silently ignored at delivery time.
#[derive(Debug, Default)]
pub struct Router {
    routes: DashMap<String, Vec<String>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&self, source: &str, destination: &str) {
        let mut destinations = self.routes.entry(source.to_string()).or_default();
        if !destinations.iter().any(|d| d == destination) {
            destinations.push(destination.to_string());
        }
    }

    /// Remove one route; a source left without destinations is forgotten
    pub fn remove_route(&self, source: &str, destination: &str) {
        let now_empty = match self.routes.get_mut(source) {
            Some(mut destinations) => {
                destinations.retain(|d| d != destination);
                destinations.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.routes.remove_if(source, |_, d| d.is_empty());
        }
    }

    pub fn destinations(&self, source: &str) -> Vec<String> {
        self.routes
            .get(source)
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Clear one source's routes, or every route
    pub fn clear_routes(&self, source: Option<&str>) {
        match source {
            Some(source) => {
                self.routes.remove(source);
            }
            None => self.routes.clear(),
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Mixer plus router: delivers source blocks to their destinations' buffers
pub struct MultiStreamManager {
    mixer: Mixer,
    router: Router,
}

impl MultiStreamManager {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            mixer: Mixer::new(channels, sample_rate),
            router: Router::new(),
        }
    }

    pub fn create_stream(&self, id: &str, name: &str) -> Arc<MixerStream> {
        self.mixer.add_stream(id, name)
    }

    /// Deliver to every mapped destination, or to `source` itself when it
    /// has no routes. Returns the number of streams that received the block.
    pub fn route(&self, block: &AudioBlock, source: &str) -> usize {
        let mut destinations = self.router.destinations(source);
        if destinations.is_empty() {
            destinations.push(source.to_string());
        }

        let mut delivered = 0;
        for destination in &destinations {
            if let Some(stream) = self.mixer.stream(destination) {
                stream.add_audio(block.clone());
                delivered += 1;
            }
        }
        delivered
    }

    pub fn mix(&self, frames: usize) -> AudioBlock {
        self.mixer.mix(frames)
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}
