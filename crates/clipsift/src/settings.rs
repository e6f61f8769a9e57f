use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::annotate::{BoxAnnotator, FontError};
use crate::cli::{CliArgs, CliSources};
use crate::export::ExportConfig;
use crate::ranges::RangeSettings;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    backend: Option<String>,
    gap_tolerance: Option<u64>,
    buffer_before_secs: Option<f64>,
    buffer_after_secs: Option<f64>,
    min_confidence: Option<f32>,
    crf: Option<u32>,
    annotate: Option<AnnotateFileConfig>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct AnnotateFileConfig {
    enable: Option<bool>,
    thickness: Option<u32>,
    color: Option<[u8; 3]>,
    /// TrueType font for captions.
    font: Option<PathBuf>,
    font_size: Option<f32>,
}

#[derive(Debug)]
pub struct EffectiveSettings {
    pub backend: Option<String>,
    pub ranges: RangeSettings,
    pub min_confidence: f32,
    pub annotation: Option<BoxAnnotator>,
    pub export: ExportConfig,
    pub config_path: Option<PathBuf>,
}

const MAX_CRF: u32 = 63;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } | ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

/// Explicit path first, then `./config.toml`, then the per-user config dir.
fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return read_config(path).map(|config| (config, Some(path.to_path_buf())));
    }

    for candidate in [project_config_path(), default_config_path()]
        .into_iter()
        .flatten()
    {
        if candidate.exists() {
            let config = read_config(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }
    Ok((FileConfig::default(), None))
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let FileConfig {
        backend: file_backend,
        gap_tolerance: file_gap_tolerance,
        buffer_before_secs: file_buffer_before,
        buffer_after_secs: file_buffer_after,
        min_confidence: file_min_confidence,
        crf: file_crf,
        annotate: file_annotate,
    } = file;

    let mut backend = normalize_string(cli.backend.clone());
    if backend.is_none() {
        backend = normalize_string(file_backend);
    }

    let mut gap_tolerance = cli.gap_tolerance;
    if !sources.gap_tolerance_from_cli {
        if let Some(value) = file_gap_tolerance {
            gap_tolerance = value;
        }
    }

    let buffer_before_secs = pick_seconds(
        cli.buffer_before,
        sources.buffer_before_from_cli,
        file_buffer_before,
        "buffer_before_secs",
        config_path.as_ref(),
    )?;
    let buffer_after_secs = pick_seconds(
        cli.buffer_after,
        sources.buffer_after_from_cli,
        file_buffer_after,
        "buffer_after_secs",
        config_path.as_ref(),
    )?;

    let mut min_confidence = cli.min_confidence;
    let mut min_confidence_path = None;
    if !sources.min_confidence_from_cli {
        if let Some(value) = file_min_confidence {
            min_confidence = value;
            min_confidence_path = config_path.clone();
        }
    }
    if !(0.0..=1.0).contains(&min_confidence) {
        return Err(ConfigError::InvalidValue {
            path: min_confidence_path,
            field: "min_confidence",
            value: min_confidence.to_string(),
        });
    }

    let mut crf = cli.crf;
    let mut crf_path = None;
    if !sources.crf_from_cli {
        if let Some(value) = file_crf {
            crf = value;
            crf_path = config_path.clone();
        }
    }
    if crf > MAX_CRF {
        return Err(ConfigError::InvalidValue {
            path: crf_path,
            field: "crf",
            value: crf.to_string(),
        });
    }

    let annotate_section = file_annotate.unwrap_or_default();
    let annotate = cli.annotate || annotate_section.enable.unwrap_or(false);
    let mut thickness = cli.box_thickness;
    if !sources.box_thickness_from_cli {
        if let Some(value) = annotate_section.thickness {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "annotate.thickness",
                    value: value.to_string(),
                });
            }
            thickness = value;
        }
    }
    let annotation = if annotate {
        Some(annotator(annotate_section, thickness, config_path.as_deref())?)
    } else {
        None
    };

    Ok(EffectiveSettings {
        backend,
        ranges: RangeSettings {
            gap_tolerance,
            buffer_before_secs,
            buffer_after_secs,
        },
        min_confidence,
        annotation,
        export: ExportConfig { crf: Some(crf) },
        config_path,
    })
}

fn annotator(
    section: AnnotateFileConfig,
    thickness: u32,
    config_path: Option<&Path>,
) -> Result<BoxAnnotator, ConfigError> {
    let defaults = BoxAnnotator::default();
    let text_scale = section.font_size.unwrap_or(defaults.text_scale);
    if !(text_scale.is_finite() && text_scale > 0.0) {
        return Err(ConfigError::InvalidValue {
            path: config_path.map(Path::to_path_buf),
            field: "annotate.font_size",
            value: text_scale.to_string(),
        });
    }
    let font = match section.font {
        Some(path) => Some(BoxAnnotator::load_font(&path).map_err(|err| match err {
            FontError::Io { path, source } => ConfigError::Io { path, source },
            FontError::Invalid { path } => ConfigError::InvalidValue {
                path: config_path.map(Path::to_path_buf),
                field: "annotate.font",
                value: path.display().to_string(),
            },
        })?),
        None => None,
    };
    Ok(BoxAnnotator {
        color: section.color.unwrap_or(defaults.color),
        thickness,
        text_scale,
        font,
        ..defaults
    })
}

fn pick_seconds(
    cli_value: f64,
    from_cli: bool,
    file_value: Option<f64>,
    field: &'static str,
    config_path: Option<&PathBuf>,
) -> Result<f64, ConfigError> {
    let (value, path) = match file_value {
        Some(value) if !from_cli => (value, config_path.cloned()),
        _ => (cli_value, None),
    };
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidValue {
            path,
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "clipsift", "clipsift")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
