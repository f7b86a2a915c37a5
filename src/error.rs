/// Everything that can go wrong while anchoring an object to the globe.
///
/// All variants except [`AnchorError::Configuration`] are recoverable: the operation that
/// reported them has been logged and turned into a no-op, and the next attach or explicit move is
/// the retry.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AnchorError {
    /// The operation needs a reference frame, but none has been resolved yet.
    #[error("no reference frame has been resolved yet")]
    NotYetResolved,
    /// A globe position was requested before any globe transform was known.
    #[error("the globe transform is not known yet")]
    NotYetValid,
    /// The anchor is not attached to a scene node.
    #[error("the anchor has no scene node")]
    MissingSceneNode,
    /// No reference frame exists and none can be created.
    #[error("reference frame configuration error: {0}")]
    Configuration(String),
    /// A matrix was not affine, was singular, or contained non-finite values.
    #[error("transform is not a finite, invertible affine transform")]
    DegenerateTransform,
    /// A persisted record was written by a newer format than this crate understands.
    #[error("unsupported anchor record version {0}")]
    UnsupportedRecordVersion(u32),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnchorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_strings() {
        insta::assert_snapshot!(
            AnchorError::NotYetValid,
            @"the globe transform is not known yet"
        );
        insta::assert_snapshot!(
            AnchorError::Configuration("no georeference tagged \"World\"".into()),
            @r#"reference frame configuration error: no georeference tagged "World""#
        );
        insta::assert_snapshot!(
            AnchorError::UnsupportedRecordVersion(7),
            @"unsupported anchor record version 7"
        );
    }
}
