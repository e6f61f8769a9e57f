use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[cfg(feature = "backend-ffmpeg")]
use std::sync::OnceLock;

use crate::backends::mock::{MockOptions, MockReader};
use crate::core::{DynFrameReader, FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mock,
    Ffmpeg,
}

impl FromStr for Backend {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "ffmpeg" => Ok(Backend::Ffmpeg),
            other => Err(FrameError::configuration(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Ffmpeg => "ffmpeg",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compiled_backends() -> Vec<Backend> {
    let mut backends = Vec::new();
    #[cfg(feature = "backend-ffmpeg")]
    {
        if ffmpeg_runtime_available() {
            backends.push(Backend::Ffmpeg);
        }
    }
    backends.push(Backend::Mock);
    backends
}

#[cfg(feature = "backend-ffmpeg")]
pub(crate) fn ffmpeg_runtime_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => true,
        Err(err) => {
            log::warn!("ffmpeg backend disabled: failed to initialize libraries ({err})");
            false
        }
    })
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub backend: Backend,
    pub input: Option<PathBuf>,
    pub mock: MockOptions,
}

impl Default for Configuration {
    fn default() -> Self {
        let backend = compiled_backends()
            .into_iter()
            .next()
            .unwrap_or(Backend::Mock);
        Self {
            backend,
            input: None,
            mock: MockOptions::default(),
        }
    }
}

impl Configuration {
    /// Defaults overridden by `CLIPSIFT_BACKEND`, `CLIPSIFT_INPUT` and
    /// `CLIPSIFT_MOCK_FRAMES`.
    pub fn from_env() -> FrameResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`Configuration::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> FrameResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Configuration::default();
        if let Some(backend) = lookup("CLIPSIFT_BACKEND") {
            config.backend = Backend::from_str(&backend)?;
        }
        if let Some(path) = lookup("CLIPSIFT_INPUT") {
            config.input = Some(PathBuf::from(path));
        }
        if let Some(frames) = lookup("CLIPSIFT_MOCK_FRAMES") {
            let parsed: u64 = frames.parse().map_err(|_| {
                FrameError::configuration(format!(
                    "failed to parse CLIPSIFT_MOCK_FRAMES='{frames}' as a non-negative integer"
                ))
            })?;
            config.mock.frame_count = parsed;
        }
        Ok(config)
    }

    pub fn available_backends() -> Vec<Backend> {
        compiled_backends()
    }

    /// Opens a reader for the configured backend on the calling thread.
    pub fn create_reader(&self) -> FrameResult<DynFrameReader> {
        match self.backend {
            Backend::Mock => Ok(Box::new(MockReader::new(self.mock.clone()))),
            Backend::Ffmpeg => {
                #[cfg(feature = "backend-ffmpeg")]
                {
                    let path = self.input.clone().ok_or_else(|| {
                        FrameError::configuration("FFmpeg backend requires CLIPSIFT_INPUT")
                    })?;
                    crate::backends::ffmpeg::boxed_ffmpeg(path)
                }
                #[cfg(not(feature = "backend-ffmpeg"))]
                {
                    Err(FrameError::unsupported("ffmpeg"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in [Backend::Mock, Backend::Ffmpeg] {
            assert_eq!(Backend::from_str(backend.as_str()).unwrap(), backend);
        }
        assert_eq!(Backend::from_str(" FFmpeg ").unwrap(), Backend::Ffmpeg);
    }

    #[test]
    fn unknown_backend_is_configuration_error() {
        let err = Backend::from_str("vulkan").unwrap_err();
        assert!(matches!(err, FrameError::Configuration { .. }));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CLIPSIFT_BACKEND", "mock"),
            ("CLIPSIFT_INPUT", "/videos/reef.mp4"),
            ("CLIPSIFT_MOCK_FRAMES", "12"),
        ]
        .into_iter()
        .collect();
        let config =
            Configuration::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
                .unwrap();
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.input, Some(PathBuf::from("/videos/reef.mp4")));
        assert_eq!(config.mock.frame_count, 12);
    }

    #[test]
    fn empty_lookup_keeps_defaults() {
        let config = Configuration::from_lookup(|_| None).unwrap();
        assert_eq!(config.backend, Configuration::default().backend);
        assert!(config.input.is_none());
    }

    #[test]
    fn bad_mock_frame_count_is_rejected() {
        let result = Configuration::from_lookup(|key| {
            (key == "CLIPSIFT_MOCK_FRAMES").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(FrameError::Configuration { .. })));
    }

    #[test]
    fn mock_is_always_available() {
        assert!(Configuration::available_backends().contains(&Backend::Mock));
    }

    #[cfg(not(feature = "backend-ffmpeg"))]
    #[test]
    fn ffmpeg_reports_unsupported_without_feature() {
        let config = Configuration {
            backend: Backend::Ffmpeg,
            ..Configuration::default()
        };
        assert!(matches!(
            config.create_reader(),
            Err(FrameError::Unsupported { backend: "ffmpeg" })
        ));
    }
}
