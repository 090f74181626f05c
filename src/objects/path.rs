//! Template path validation and script location
//!
//! Template paths follow the client data layout:
//! - Must start with `object/`
//! - Segments separated by `/`, each `[a-z0-9_]+`
//! - Final segment ends in `.iff`, conventionally `shared_<name>.iff`
//! - Max 255 characters total
//! - Normalized to lowercase

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Validation errors for template paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePathError {
    /// Path is empty
    Empty,
    /// Path doesn't start with `object/`
    MissingRoot,
    /// Path is too long (> 255 chars)
    TooLong,
    /// Path doesn't end with `.iff`
    MissingExtension,
    /// Segment contains invalid characters or is empty
    InvalidSegment(String),
}

impl fmt::Display for TemplatePathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplatePathError::Empty => write!(f, "Template path cannot be empty"),
            TemplatePathError::MissingRoot => {
                write!(f, "Template path must start with 'object/'")
            }
            TemplatePathError::TooLong => {
                write!(f, "Template path must be 255 characters or less")
            }
            TemplatePathError::MissingExtension => {
                write!(f, "Template path must end with '.iff'")
            }
            TemplatePathError::InvalidSegment(seg) => write!(
                f,
                "Segment '{}' contains invalid characters (allowed: lowercase letters, digits, underscores)",
                seg
            ),
        }
    }
}

impl std::error::Error for TemplatePathError {}

static SEGMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

/// Validate and normalize a template path.
///
/// # Examples
/// ```
/// use worldd::objects::validate_template_path;
///
/// assert!(validate_template_path("object/cell/shared_cell.iff").is_ok());
/// assert_eq!(
///     validate_template_path("Object/Building/Shared_Hut.iff").unwrap(),
///     "object/building/shared_hut.iff"
/// );
/// assert!(validate_template_path("misc/shared_x.iff").is_err());
/// assert!(validate_template_path("object/cell/shared_cell").is_err());
/// ```
pub fn validate_template_path(path: &str) -> Result<String, TemplatePathError> {
    if path.is_empty() {
        return Err(TemplatePathError::Empty);
    }

    let normalized = path.to_lowercase();

    if !normalized.starts_with("object/") {
        return Err(TemplatePathError::MissingRoot);
    }
    if normalized.len() > 255 {
        return Err(TemplatePathError::TooLong);
    }
    let Some(stem) = normalized.strip_suffix(".iff") else {
        return Err(TemplatePathError::MissingExtension);
    };

    for segment in stem.split('/') {
        if !SEGMENT_REGEX.is_match(segment) {
            return Err(TemplatePathError::InvalidSegment(segment.to_string()));
        }
    }

    Ok(normalized)
}

/// Where the behavior script for a template lives, relative to the scripts root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptLocation {
    /// Template directory, e.g. `object/tangible/furniture`
    pub dir: String,
    /// Script name, e.g. `chair` for `shared_chair.iff`
    pub name: String,
}

impl ScriptLocation {
    /// Path of the Lua file relative to the scripts root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(format!("{}.lua", self.name))
    }

    /// Stable cache key
    pub fn key(&self) -> String {
        format!("{}/{}", self.dir, self.name)
    }
}

/// Derive the script location for a template, honoring a custom server template.
///
/// # Examples
/// ```
/// use worldd::objects::script_location;
///
/// let loc = script_location("object/tangible/furniture/shared_chair.iff", None).unwrap();
/// assert_eq!(loc.dir, "object/tangible/furniture");
/// assert_eq!(loc.name, "chair");
///
/// let loc = script_location("object/mobile/shared_dressed_guard.iff", Some("elite_guard")).unwrap();
/// assert_eq!(loc.name, "elite_guard");
/// ```
pub fn script_location(template: &str, server_template: Option<&str>) -> Option<ScriptLocation> {
    let (dir, file) = template.rsplit_once('/')?;
    let stem = file.strip_suffix(".iff").unwrap_or(file);
    let base = stem.strip_prefix("shared_").unwrap_or(stem);
    let name = server_template.unwrap_or(base);
    if dir.is_empty() || name.is_empty() {
        return None;
    }
    Some(ScriptLocation {
        dir: dir.to_string(),
        name: name.to_string(),
    })
}
