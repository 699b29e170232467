// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Build and inference timing.

use std::time::Duration;

/// How long the builder spent in each stage.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BuildTimings {
    pub parse: Option<Duration>,
    pub build: Option<Duration>,
}

impl BuildTimings {
    pub fn summary(&self) -> String {
        let ms = |d: Option<Duration>| {
            d.map_or_else(|| "-".to_string(), |d| format!("{:.2}ms", d.as_secs_f64() * 1000.0))
        };
        format!("Build: parse {}, compile {}", ms(self.parse), ms(self.build))
    }
}

/// Timing for one inference request.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InferenceMetrics {
    /// Plan that served the request.
    pub model: String,
    /// Wall-clock time of each image's copy/execute/copy/synchronize.
    pub image_durations: Vec<Duration>,
    /// Wall-clock time of the whole request including host staging.
    pub total: Duration,
}

impl InferenceMetrics {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn record_image(&mut self, duration: Duration) {
        self.image_durations.push(duration);
    }

    pub fn finish(&mut self, total: Duration) {
        self.total = total;
    }

    pub fn images(&self) -> usize {
        self.image_durations.len()
    }

    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.image_durations.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.image_durations.iter().sum::<Duration>() / n,
        }
    }

    pub fn images_per_second(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs <= 0.0 || self.image_durations.is_empty() {
            return 0.0;
        }
        self.image_durations.len() as f64 / secs
    }

    pub fn summary(&self) -> String {
        format!(
            "Inference '{}': {} images in {:.2}ms, {:.3}ms mean latency ({:.1} img/s)",
            self.model,
            self.images(),
            self.total.as_secs_f64() * 1000.0,
            self.mean_latency().as_secs_f64() * 1000.0,
            self.images_per_second(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = InferenceMetrics::new("m");
        assert_eq!(m.images(), 0);
        assert_eq!(m.mean_latency(), Duration::ZERO);
        assert_eq!(m.images_per_second(), 0.0);
    }

    #[test]
    fn test_record_and_finish() {
        let mut m = InferenceMetrics::new("m");
        m.record_image(Duration::from_millis(2));
        m.record_image(Duration::from_millis(4));
        m.finish(Duration::from_millis(10));
        assert_eq!(m.images(), 2);
        assert_eq!(m.mean_latency(), Duration::from_millis(3));
        assert!((m.images_per_second() - 200.0).abs() < 0.01);
    }

    #[test]
    fn test_summary_format() {
        let mut m = InferenceMetrics::new("cls");
        m.record_image(Duration::from_millis(1));
        m.finish(Duration::from_millis(1));
        let s = m.summary();
        assert!(s.contains("Inference 'cls'"));
        assert!(s.contains("1 images"));
    }

    #[test]
    fn test_build_timings_summary() {
        let t = BuildTimings {
            parse: Some(Duration::from_millis(5)),
            build: None,
        };
        assert_eq!(t.summary(), "Build: parse 5.00ms, compile -");
    }
}
