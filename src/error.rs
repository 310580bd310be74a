use wasm_bindgen::JsValue;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Statistics,
    Query,
    Config,
    Store,
}

#[derive(Debug)]
pub enum RouteError {
    /// Not parseable XML, or no `<gpx>` root element.
    InvalidFormat { reason: String },
    /// The document parsed but no usable track point survived validation.
    NoTrackData,
    /// Fewer than two points, so there is no distance or bounding box.
    DegenerateGeometry { point_count: usize },
    InvalidQueryParameter {
        name: &'static str,
        value: String,
    },
    InvalidCoordinate { input: String },
    /// Multi-segment upload while the segment policy forbids it.
    MultiSegment { segments: usize },
    InvalidConfig { message: String },
    NotFound { id: String },
    /// Failure reported by a `RouteStore` or `SourceFileStore` implementation.
    Store { message: String },
}

impl RouteError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidFormat { .. }
            | Self::NoTrackData
            | Self::MultiSegment { .. }
            | Self::InvalidCoordinate { .. } => Stage::Parse,
            Self::DegenerateGeometry { .. } => Stage::Statistics,
            Self::InvalidQueryParameter { .. } => Stage::Query,
            Self::InvalidConfig { .. } => Stage::Config,
            Self::NotFound { .. } | Self::Store { .. } => Stage::Store,
        }
    }

    pub(crate) fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_query(name: &'static str, value: f64) -> Self {
        Self::InvalidQueryParameter {
            name,
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat { reason } => write!(f, "Invalid GPX format: {reason}"),
            Self::NoTrackData => write!(f, "GPX file contains no usable track points"),
            Self::DegenerateGeometry { point_count } => write!(
                f,
                "Route has {point_count} valid point(s), at least 2 are required"
            ),
            Self::InvalidQueryParameter { name, value } => {
                write!(f, "Invalid query parameter '{name}': {value}")
            }
            Self::InvalidCoordinate { input } => write!(f, "Invalid coordinate '{input}'"),
            Self::MultiSegment { segments } => write!(
                f,
                "GPX file has {segments} track segments, only single-segment tracks are accepted"
            ),
            Self::InvalidConfig { message } => write!(f, "Configuration error: {message}"),
            Self::NotFound { id } => write!(f, "Route '{id}' not found"),
            Self::Store { message } => write!(f, "Route store error: {message}"),
        }
    }
}

impl std::error::Error for RouteError {}

impl From<quick_xml::Error> for RouteError {
    fn from(e: quick_xml::Error) -> Self {
        Self::invalid_format(format!("XML parse error: {e}"))
    }
}

impl From<RouteError> for JsValue {
    fn from(e: RouteError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = RouteError::DegenerateGeometry { point_count: 1 };
        assert!(err.to_string().contains("1 valid point"));

        let err = RouteError::invalid_query("radiusKm", f64::NAN);
        assert_eq!(err.to_string(), "Invalid query parameter 'radiusKm': NaN");
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(RouteError::NoTrackData.stage(), Stage::Parse);
        assert_eq!(
            RouteError::DegenerateGeometry { point_count: 0 }.stage(),
            Stage::Statistics
        );
        assert_eq!(RouteError::invalid_query("lat", 91.0).stage(), Stage::Query);
        assert_eq!(
            RouteError::NotFound { id: "x".into() }.stage(),
            Stage::Store
        );
    }
}
